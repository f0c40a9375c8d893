//! # scribe-collab — Pads, revision log and the real-time pad protocol
//!
//! Turns the changeset algebra of `scribe-core` into a multi-user service:
//! pads with an append-only revision log, authors, chat, read-only links,
//! and a WebSocket protocol that keeps every client converged.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────────┐
//! │ PadClient   │ ◄────────────────► │ PadServer        │
//! │ pending /   │     JSON frames    │  MessageHandler  │
//! │ unsent      │                    └────────┬─────────┘
//! └─────────────┘                             │
//!                         ┌───────────────────┼──────────────────┐
//!                         ▼                   ▼                  ▼
//!                  ┌─────────────┐     ┌─────────────┐    ┌─────────────┐
//!                  │ SessionStore│     │ PadManager  │    │ Hub         │
//!                  │ conn → pad  │     │ Pad (lock)  │    │ fan-out     │
//!                  └─────────────┘     └──────┬──────┘    └─────────────┘
//!                                             │
//!                                     ┌───────┴───────┐
//!                                     │ dyn DataStore │
//!                                     │ memory / Rocks│
//!                                     └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`pad`] — one document: head, revision log, chat
//! - [`pad_manager`] — pad cache, ids, read-only aliases, groups
//! - [`author`] — authors and token mapping
//! - [`storage`] — persistence contract and backends
//! - [`protocol`] — JSON messages and envelope
//! - [`session`], [`hub`], [`handler`] — the server side of the protocol
//! - [`server`] — WebSocket front end
//! - [`client`] — WebSocket client with local rebasing

pub mod author;
pub mod client;
pub mod error;
pub mod handler;
pub mod hub;
pub mod pad;
pub mod pad_manager;
pub mod protocol;
pub mod server;
pub mod session;
pub mod settings;
pub mod storage;

// Re-exports for convenience
pub use author::AuthorManager;
pub use client::{Applied, ClientDocument, ConnectionState, PadClient, PadEvent};
pub use error::{ErrorKind, PadError, Result};
pub use handler::MessageHandler;
pub use hub::{Hub, HubStats};
pub use pad::Pad;
pub use pad_manager::{PadHandle, PadIds, PadManager};
pub use protocol::{
    AuthorInfo, ChatEntry, ClientMessage, ClientVars, ProtocolError, ServerMessage, UserInfo,
};
pub use server::{PadServer, ServerConfig, ServerStats};
pub use session::{SessionInfo, SessionStore};
pub use settings::Settings;
pub use storage::{
    AuthorRecord, ChatMessage, DataStore, MemoryDataStore, PadRecord, RevisionRecord, StoreError,
};
#[cfg(feature = "rocksdb")]
pub use storage::{RocksDataStore, StoreConfig};
