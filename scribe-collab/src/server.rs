//! WebSocket front end for the message handler.
//!
//! Architecture:
//! ```text
//! Client A ──┐                       ┌── Hub queue A ── writer A ──► Client A
//!             ├── reader ── MessageHandler ──┤
//! Client B ──┘          │            └── Hub queue B ── writer B ──► Client B
//!                       │
//!                       ├── PadManager ── Pad (per-pad lock)
//!                       └── dyn DataStore (memory or RocksDB)
//! ```
//!
//! Each connection gets one reader loop feeding the handler in arrival
//! order and one writer task draining its hub queue.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::error::Result;
use crate::handler::MessageHandler;
use crate::hub::Hub;
use crate::settings::Settings;
use crate::storage::{DataStore, MemoryDataStore};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Connections allowed on one pad
    pub max_sessions_per_pad: usize,
    /// Outbound messages buffered per connection
    pub outbound_capacity: usize,
    /// Persistence storage path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
    pub settings: Settings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9001".to_string(),
            max_sessions_per_pad: 100,
            outbound_capacity: 256,
            storage_path: None,
            settings: Settings::default(),
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
}

/// The pad server.
#[derive(Clone)]
pub struct PadServer {
    config: ServerConfig,
    handler: Arc<MessageHandler>,
    stats: Arc<RwLock<ServerStats>>,
}

impl PadServer {
    /// Create a server, opening persistent storage when a path is set.
    pub fn new(config: ServerConfig) -> Result<Self> {
        let store = open_store(config.storage_path.as_ref())?;
        Ok(Self::with_store(config, store))
    }

    /// Create a server over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<dyn DataStore>) -> Self {
        let hub = Arc::new(Hub::new(config.outbound_capacity, config.max_sessions_per_pad));
        let handler = Arc::new(MessageHandler::new(store, config.settings.clone(), hub));
        Self {
            config,
            handler,
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// Create with default configuration (in-memory, no persistence).
    pub fn with_defaults() -> Self {
        Self::with_store(ServerConfig::default(), Arc::new(MemoryDataStore::new()))
    }

    /// Bind the configured address and serve until an accept error.
    pub async fn run(&self) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Pad server listening on {}", self.config.bind_addr);
        self.serve(listener).await?;
        Ok(())
    }

    /// Accept connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let handler = self.handler.clone();
            let stats = self.stats.clone();
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, addr, handler, stats).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        handler: Arc<MessageHandler>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let conn = Uuid::new_v4();
        let mut outbound = handler.handle_connect(conn).await;
        log::info!("WebSocket connection {conn} established from {addr}");

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // Ends when the hub drops the queue on disconnect
        let writer = tokio::spawn(async move {
            while let Some(text) = outbound.recv().await {
                if ws_sender.send(Message::Text(text.to_string().into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_sender.close().await;
        });

        // Pings are answered by tungstenite on the next flush
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    {
                        let mut s = stats.write().await;
                        s.total_messages += 1;
                        s.total_bytes += text.len() as u64;
                    }
                    handler.handle_text(conn, text.as_str()).await;
                }
                Ok(Message::Binary(_)) => {
                    log::warn!("Ignoring binary frame from {addr}");
                }
                Ok(Message::Close(_)) => {
                    log::info!("Connection closed from {addr}");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    log::error!("WebSocket error from {addr}: {e}");
                    break;
                }
            }
        }

        handler.handle_disconnect(conn).await;
        if let Err(e) = writer.await {
            log::debug!("Writer task for {conn} ended abnormally: {e}");
        }

        let mut s = stats.write().await;
        s.active_connections = s.active_connections.saturating_sub(1);
        Ok(())
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Get the configured bind address.
    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn handler(&self) -> &Arc<MessageHandler> {
        &self.handler
    }
}

#[cfg(feature = "rocksdb")]
fn open_store(path: Option<&PathBuf>) -> Result<Arc<dyn DataStore>> {
    use crate::storage::{RocksDataStore, StoreConfig};

    match path {
        Some(path) => {
            let config = StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            };
            let store = RocksDataStore::open(config)?;
            log::info!("Opened pad store at {}", path.display());
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryDataStore::new())),
    }
}

#[cfg(not(feature = "rocksdb"))]
fn open_store(path: Option<&PathBuf>) -> Result<Arc<dyn DataStore>> {
    match path {
        Some(path) => Err(crate::error::PadError::Unavailable(format!(
            "cannot open {}: built without the rocksdb feature",
            path.display()
        ))),
        None => Ok(Arc::new(MemoryDataStore::new())),
    }
}
