//! WebSocket pad client.
//!
//! Provides:
//! - Connection lifecycle (connect, CLIENT_READY, disconnect)
//! - Local edits with one commit in flight at a time
//! - Rebasing of local work over remote revisions
//! - Chat, history and user info requests
//!
//! Local state is three changesets deep:
//! ```text
//!   rev(head) ──pending──► ──unsent──► visible text
//!               (sent,      (not sent
//!               awaiting     yet)
//!               NEW_CHANGES)
//! ```
//! A remote revision `c` is folded in with `follow`, so the client ends up
//! with the same text the server commits.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use scribe_core::{
    apply_to_atext, compose, follow, make_splice, move_ops_to_new_pool, prepare_for_wire, AText,
    Attribute, AttributePool, Changeset, PoolJson,
};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::tungstenite::Message;

use crate::error::{ErrorKind, PadError, Result};
use crate::protocol::{
    AuthorInfo, ChatEntry, ClientMessage, ClientVars, ProtocolError, ServerMessage, UserInfo,
};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open, CLIENT_VARS not received yet.
    Joining,
    Connected,
}

/// Events emitted by the pad client.
#[derive(Debug, Clone)]
pub enum PadEvent {
    /// Socket open and CLIENT_READY sent.
    Connected,
    /// CLIENT_VARS received; the document is live.
    Ready { head_rev: u64, read_only: bool },
    /// Our in-flight commit became revision `rev`.
    Acknowledged { rev: u64 },
    /// Someone else's revision was merged into the local text.
    NewRevision { rev: u64, author: Option<String> },
    /// Reply to a history request.
    Changesets {
        request_id: u64,
        start: u64,
        end: u64,
        changeset: String,
        backwards_changeset: String,
        apool: PoolJson,
    },
    Chat(ChatEntry),
    ChatHistory(Vec<ChatEntry>),
    UserJoined(AuthorInfo),
    UserUpdated(AuthorInfo),
    UserLeft(AuthorInfo),
    Suggestion(serde_json::Map<String, serde_json::Value>),
    Custom(serde_json::Map<String, serde_json::Value>),
    PadDeleted,
    Error { kind: ErrorKind, message: String },
    Disconnected,
}

/// What a remote NEW_CHANGES did to the local document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Acknowledged,
    Merged,
}

// ─── Document state ─────────────────────────────────────────────────

/// Client-side view of a pad: the last known server revision plus local
/// work on top of it.
#[derive(Debug, Clone)]
pub struct ClientDocument {
    author: String,
    read_only: bool,
    rev: u64,
    atext: AText,
    pool: AttributePool,
    /// Sent and not yet acknowledged.
    pending: Option<Changeset>,
    /// Edited locally since the last send.
    unsent: Option<Changeset>,
}

impl ClientDocument {
    pub fn from_vars(vars: &ClientVars) -> Result<Self> {
        Ok(Self {
            author: vars.user_id.clone(),
            read_only: vars.read_only,
            rev: vars.head_rev,
            atext: vars.atext.clone(),
            pool: AttributePool::from_jsonable(vars.apool.clone())?,
            pending: None,
            unsent: None,
        })
    }

    pub fn rev(&self) -> u64 {
        self.rev
    }

    pub fn text(&self) -> &str {
        &self.atext.text
    }

    pub fn atext(&self) -> &AText {
        &self.atext
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether local work has not been committed yet.
    pub fn is_dirty(&self) -> bool {
        self.pending.is_some() || self.unsent.is_some()
    }

    /// Replace `ndel` chars at `start` with `ins`. The final newline is
    /// never touched.
    pub fn splice(&mut self, start: usize, ndel: usize, ins: &str) -> Result<()> {
        if self.read_only {
            return Err(PadError::ReadOnly);
        }
        let editable = self.atext.len().saturating_sub(1);
        let start = start.min(editable);
        let ndel = ndel.min(editable - start);
        if ndel == 0 && ins.is_empty() {
            return Ok(());
        }
        let cs = make_splice(
            &self.atext.text,
            start,
            ndel,
            ins,
            &[Attribute::author(self.author.as_str())],
            &mut self.pool,
        )?;
        self.atext = apply_to_atext(&cs, &self.atext, &mut self.pool)?;
        self.unsent = Some(match self.unsent.take() {
            Some(unsent) => compose(&unsent, &cs, &mut self.pool)?,
            None => cs,
        });
        Ok(())
    }

    /// Move unsent work in flight and build its USER_CHANGES. Nothing is
    /// returned while a commit is already pending.
    pub fn take_outgoing(&mut self) -> Result<Option<ClientMessage>> {
        if self.pending.is_some() {
            return Ok(None);
        }
        let Some(unsent) = self.unsent.take() else {
            return Ok(None);
        };
        if unsent.is_identity() {
            return Ok(None);
        }
        let (wire, wire_pool) = prepare_for_wire(&unsent, &self.pool)?;
        self.pending = Some(unsent);
        Ok(Some(ClientMessage::UserChanges {
            base_rev: self.rev as i64,
            changeset: wire.pack(),
            apool: wire_pool.to_jsonable(),
        }))
    }

    /// Fold a NEW_CHANGES into the local state.
    pub fn receive(
        &mut self,
        rev: u64,
        changeset: &str,
        apool: PoolJson,
        author: Option<&str>,
    ) -> Result<Applied> {
        if rev != self.rev + 1 {
            return Err(PadError::BadRevision(format!(
                "expected revision {}, got {rev}",
                self.rev + 1
            )));
        }
        if self.pending.is_some() && author == Some(self.author.as_str()) {
            self.pending = None;
            self.rev = rev;
            return Ok(Applied::Acknowledged);
        }

        let wire_pool = AttributePool::from_jsonable(apool)?;
        let mut c = move_ops_to_new_pool(&Changeset::unpack(changeset)?, &wire_pool, &mut self.pool)?;
        if let Some(pending) = self.pending.take() {
            let rebased = follow(&c, &pending, false, &mut self.pool)?;
            c = follow(&pending, &c, true, &mut self.pool)?;
            self.pending = Some(rebased);
        }
        if let Some(unsent) = self.unsent.take() {
            let rebased = follow(&c, &unsent, true, &mut self.pool)?;
            c = follow(&unsent, &c, false, &mut self.pool)?;
            self.unsent = Some(rebased);
        }
        self.atext = apply_to_atext(&c, &self.atext, &mut self.pool)?;
        self.rev = rev;
        Ok(Applied::Merged)
    }
}

// ─── Connection ─────────────────────────────────────────────────────

/// The pad client.
///
/// Manages a WebSocket connection to the pad server and keeps a
/// [`ClientDocument`] in step with it.
pub struct PadClient {
    server_url: String,
    pad_id: String,
    token: String,
    user_info: UserInfo,

    state: Arc<RwLock<ConnectionState>>,
    document: Arc<Mutex<Option<ClientDocument>>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    event_rx: Option<mpsc::Receiver<PadEvent>>,
    event_tx: mpsc::Sender<PadEvent>,
}

impl PadClient {
    pub fn new(
        server_url: impl Into<String>,
        pad_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            pad_id: pad_id.into(),
            token: token.into(),
            user_info: UserInfo::default(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            document: Arc::new(Mutex::new(None)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    pub fn with_user_info(mut self, user_info: UserInfo) -> Self {
        self.user_info = user_info;
        self
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<PadEvent>> {
        self.event_rx.take()
    }

    /// Open the socket and send CLIENT_READY. [`PadEvent::Ready`] follows
    /// once the server answers.
    pub async fn connect(&mut self) -> std::result::Result<(), ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = match tokio_tungstenite::connect_async(self.server_url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                log::warn!("Failed to connect to {}: {e}", self.server_url);
                *self.state.write().await = ConnectionState::Disconnected;
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward outgoing channel to WebSocket
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if ws_writer.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let ready = ClientMessage::ClientReady {
            pad_id: self.pad_id.clone(),
            token: self.token.clone(),
            session_ids: Vec::new(),
            user_info: self.user_info.clone(),
        };
        out_tx
            .send(ready.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)?;
        *self.state.write().await = ConnectionState::Joining;
        let _ = self.event_tx.send(PadEvent::Connected).await;

        // Reader task: process incoming WebSocket messages
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        let document = self.document.clone();
        let reply_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(server_msg) => {
                            let event =
                                Self::on_message(server_msg, &state, &document, &reply_tx).await;
                            if let Some(evt) = event {
                                let _ = event_tx.send(evt).await;
                            }
                        }
                        Err(e) => log::warn!("Undecodable server message: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(PadEvent::Disconnected).await;
        });

        self.outgoing_tx = Some(out_tx);
        Ok(())
    }

    async fn on_message(
        msg: ServerMessage,
        state: &RwLock<ConnectionState>,
        document: &Mutex<Option<ClientDocument>>,
        out_tx: &mpsc::Sender<String>,
    ) -> Option<PadEvent> {
        match msg {
            ServerMessage::ClientVars(vars) => match ClientDocument::from_vars(&vars) {
                Ok(doc) => {
                    *document.lock().await = Some(doc);
                    *state.write().await = ConnectionState::Connected;
                    Some(PadEvent::Ready {
                        head_rev: vars.head_rev,
                        read_only: vars.read_only,
                    })
                }
                Err(e) => Some(PadEvent::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                }),
            },
            ServerMessage::NewChanges {
                new_rev,
                changeset,
                apool,
                author,
                ..
            } => {
                let mut guard = document.lock().await;
                let doc = guard.as_mut()?;
                match doc.receive(new_rev, &changeset, apool, author.as_deref()) {
                    Ok(Applied::Acknowledged) => {
                        // Next batch goes out as soon as the previous one landed
                        if let Ok(Some(next)) = doc.take_outgoing() {
                            if let Ok(text) = next.encode() {
                                let _ = out_tx.send(text).await;
                            }
                        }
                        Some(PadEvent::Acknowledged { rev: new_rev })
                    }
                    Ok(Applied::Merged) => Some(PadEvent::NewRevision {
                        rev: new_rev,
                        author,
                    }),
                    Err(e) => {
                        log::error!("Failed to apply revision {new_rev}: {e}");
                        Some(PadEvent::Error {
                            kind: e.kind(),
                            message: e.to_string(),
                        })
                    }
                }
            }
            ServerMessage::ChangesetReq {
                request_id,
                start,
                changeset,
                backwards_changeset,
                apool,
                actual_end_num,
                ..
            } => Some(PadEvent::Changesets {
                request_id,
                start,
                end: actual_end_num,
                changeset,
                backwards_changeset,
                apool,
            }),
            ServerMessage::ChatMessage(entry) => Some(PadEvent::Chat(entry)),
            ServerMessage::ChatMessages { messages } => Some(PadEvent::ChatHistory(messages)),
            ServerMessage::UserNewinfo { user_info } => Some(PadEvent::UserJoined(user_info)),
            ServerMessage::UserinfoUpdate { user_info } => Some(PadEvent::UserUpdated(user_info)),
            ServerMessage::UserLeave { user_info } => Some(PadEvent::UserLeft(user_info)),
            ServerMessage::SuggestUserinfo { payload } => Some(PadEvent::Suggestion(payload)),
            ServerMessage::ClientMessage { payload } => Some(PadEvent::Custom(payload)),
            ServerMessage::PadDeleted { .. } => Some(PadEvent::PadDeleted),
            ServerMessage::Error { kind, message } => Some(PadEvent::Error { kind, message }),
        }
    }

    async fn send(&self, msg: &ClientMessage) -> std::result::Result<(), ProtocolError> {
        let tx = self.outgoing_tx.as_ref().ok_or(ProtocolError::ConnectionClosed)?;
        tx.send(msg.encode()?)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Edit the local text. Nothing is sent until [`PadClient::flush`].
    pub async fn splice(&self, start: usize, ndel: usize, ins: &str) -> Result<()> {
        let mut guard = self.document.lock().await;
        let doc = guard.as_mut().ok_or(PadError::SessionNotInitialized)?;
        doc.splice(start, ndel, ins)
    }

    /// Insert at `pos`.
    pub async fn insert(&self, pos: usize, text: &str) -> Result<()> {
        self.splice(pos, 0, text).await
    }

    /// Submit unsent edits unless a commit is in flight. Edits made while
    /// one is in flight go out with its acknowledgement.
    pub async fn flush(&self) -> Result<bool> {
        let outgoing = {
            let mut guard = self.document.lock().await;
            let doc = guard.as_mut().ok_or(PadError::SessionNotInitialized)?;
            doc.take_outgoing()?
        };
        let Some(msg) = outgoing else {
            return Ok(false);
        };
        self.send(&msg)
            .await
            .map_err(|e| PadError::Unavailable(e.to_string()))?;
        Ok(true)
    }

    pub async fn send_chat(&self, text: &str) -> std::result::Result<(), ProtocolError> {
        self.send(&ClientMessage::ChatMessage {
            text: text.to_string(),
            time: None,
            author_id: None,
        })
        .await
    }

    pub async fn request_chat(&self, start: u64, end: u64) -> std::result::Result<(), ProtocolError> {
        self.send(&ClientMessage::GetChatMessages { start, end }).await
    }

    pub async fn request_changesets(
        &self,
        start: u64,
        granularity: u64,
        request_id: u64,
    ) -> std::result::Result<(), ProtocolError> {
        self.send(&ClientMessage::ChangesetReq {
            start: start as i64,
            granularity: granularity as i64,
            request_id,
        })
        .await
    }

    pub async fn update_user_info(&self, user_info: UserInfo) -> std::result::Result<(), ProtocolError> {
        self.send(&ClientMessage::UserinfoUpdate { user_info }).await
    }

    /// Close the connection; the reader task reports [`PadEvent::Disconnected`].
    pub fn disconnect(&mut self) {
        self.outgoing_tx = None;
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Visible text, including local edits. None before CLIENT_VARS.
    pub async fn text(&self) -> Option<String> {
        self.document.lock().await.as_ref().map(|d| d.text().to_string())
    }

    /// Last server revision folded into the local text.
    pub async fn rev(&self) -> Option<u64> {
        self.document.lock().await.as_ref().map(ClientDocument::rev)
    }

    /// Whether local edits are still waiting for their commit.
    pub async fn is_dirty(&self) -> bool {
        self.document
            .lock()
            .await
            .as_ref()
            .is_some_and(ClientDocument::is_dirty)
    }

    pub fn pad_id(&self) -> &str {
        &self.pad_id
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
