//! Protocol core: turns decoded client messages into pad operations and
//! outbound server messages.
//!
//! ```text
//!   ws reader ──► handle_text ──► ClientMessage ──┬─► CLIENT_READY ─► session + CLIENT_VARS
//!                                                 ├─► USER_CHANGES ─► follow ─► append ─► NEW_CHANGES
//!                                                 ├─► CHANGESET_REQ ─► compose + inverse
//!                                                 └─► chat, user info, forwards, admin
//!                                                           │
//!                                              Hub (per-connection queues) ◄┘
//! ```
//!
//! Commits and their NEW_CHANGES fan-out happen under the per-pad lock,
//! so every connection sees revisions in commit order. Failures are
//! reported to the sender only, as an ERROR message.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use scribe_core::cursor::char_len;
use scribe_core::{
    follow, inverse, move_ops_to_new_pool, prepare_for_wire, split_attribution_lines,
    split_text_lines, AttributeMap, AttributePool, Changeset, ChangesetError, OpKind, PoolJson,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::author::AuthorManager;
use crate::error::{PadError, Result};
use crate::hub::Hub;
use crate::pad::now_millis;
use crate::pad_manager::{is_read_only_id, PadManager};
use crate::protocol::{
    AuthorInfo, ChatEntry, ClientMessage, ClientVars, ServerMessage, UserInfo,
};
use crate::session::{SessionInfo, SessionStore};
use crate::settings::Settings;
use crate::storage::{AuthorRecord, ChatMessage, DataStore};

static COLOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^#(?:[0-9A-F]{3}){1,2}$").expect("color pattern"));

pub fn is_valid_color(color: &str) -> bool {
    COLOR.is_match(color)
}

fn author_info(author: &AuthorRecord) -> AuthorInfo {
    AuthorInfo {
        user_id: author.id.clone(),
        name: author.name.clone(),
        color_id: author.color.clone(),
    }
}

pub struct MessageHandler {
    pads: Arc<PadManager>,
    authors: Arc<AuthorManager>,
    sessions: Arc<SessionStore>,
    hub: Arc<Hub>,
    settings: Arc<Settings>,
}

impl MessageHandler {
    pub fn new(store: Arc<dyn DataStore>, settings: Settings, hub: Arc<Hub>) -> Self {
        let settings = Arc::new(settings);
        Self {
            pads: Arc::new(PadManager::new(store.clone(), settings.clone())),
            authors: Arc::new(AuthorManager::new(store)),
            sessions: Arc::new(SessionStore::new()),
            hub,
            settings,
        }
    }

    pub fn pads(&self) -> &Arc<PadManager> {
        &self.pads
    }

    pub fn authors(&self) -> &Arc<AuthorManager> {
        &self.authors
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    /// Register a new connection; the receiver feeds its writer task.
    pub async fn handle_connect(&self, conn: Uuid) -> mpsc::Receiver<Arc<str>> {
        self.hub.connect(conn).await
    }

    /// Decode and handle one text frame. Undecodable frames are dropped.
    pub async fn handle_text(&self, conn: Uuid, text: &str) {
        match ClientMessage::decode(text) {
            Ok(msg) => self.handle_message(conn, msg).await,
            Err(e) => log::warn!("Dropping malformed message from {conn}: {e}"),
        }
    }

    pub async fn handle_message(&self, conn: Uuid, msg: ClientMessage) {
        let kind = msg.type_name();
        let result = match msg {
            ClientMessage::ClientReady {
                pad_id,
                token,
                session_ids,
                user_info,
            } => {
                self.handle_client_ready(conn, &pad_id, &token, &session_ids, user_info)
                    .await
            }
            other => {
                let Some(session) = self.sessions.get(&conn) else {
                    log::warn!("Dropping {kind} from {conn}: no session");
                    return;
                };
                self.dispatch(conn, session, other).await
            }
        };
        if let Err(e) = result {
            log::warn!("Rejected {kind} from {conn}: {e}");
            self.send(
                &conn,
                &ServerMessage::Error {
                    kind: e.kind(),
                    message: e.to_string(),
                },
            )
            .await;
        }
    }

    async fn dispatch(&self, conn: Uuid, session: SessionInfo, msg: ClientMessage) -> Result<()> {
        match msg {
            ClientMessage::UserChanges {
                base_rev,
                changeset,
                apool,
            } => {
                self.handle_user_changes(&session, base_rev, &changeset, apool)
                    .await
            }
            ClientMessage::ChangesetReq {
                start,
                granularity,
                request_id,
            } => {
                self.handle_changeset_req(conn, &session, start, granularity, request_id)
                    .await
            }
            ClientMessage::ChatMessage {
                text,
                time,
                author_id,
            } => self.handle_chat(&session, &text, time, author_id).await,
            ClientMessage::GetChatMessages { start, end } => {
                self.handle_get_chat(conn, &session, start, end).await
            }
            ClientMessage::UserinfoUpdate { user_info } => {
                self.handle_userinfo_update(conn, &session, user_info).await
            }
            ClientMessage::SuggestUserinfo { payload } => {
                self.broadcast_except(&session.pad_id, &conn, &ServerMessage::SuggestUserinfo { payload })
                    .await;
                Ok(())
            }
            ClientMessage::ClientMessage { payload } => {
                self.broadcast_except(&session.pad_id, &conn, &ServerMessage::ClientMessage { payload })
                    .await;
                Ok(())
            }
            ClientMessage::SaveRevision => self.handle_save_revision(&session).await,
            ClientMessage::PadDelete { pad_id } => self.handle_pad_delete(&session, &pad_id).await,
            ClientMessage::ClientReady { .. } => Ok(()),
        }
    }

    // ─── CLIENT_READY ─────────────────────────────────────────────────

    async fn handle_client_ready(
        &self,
        conn: Uuid,
        requested: &str,
        token: &str,
        session_ids: &[String],
        user_info: UserInfo,
    ) -> Result<()> {
        let mut author = self
            .authors
            .get_or_create_author_for_token(token, user_info.name.as_deref())?;
        if let Some(color) = user_info.color_id.as_deref() {
            if is_valid_color(color) && color != author.color {
                author = self.authors.set_author_color(&author.id, color)?;
            }
        }

        let read_only = requested.starts_with("r.");
        let (pad_id, handle, read_only_pad_id) = if read_only {
            if !is_read_only_id(requested) {
                return Err(PadError::InvalidReadOnlyId(requested.to_string()));
            }
            let pad_id = self.pads.get_pad_id_for_read_only(requested)?;
            let handle = self.pads.get_existing_pad(&pad_id).await?;
            (pad_id, handle, requested.to_string())
        } else {
            let pad_id = PadManager::sanitize_pad_id(requested)?;
            if !self.pads.session_grants_access(&pad_id, &author.id, session_ids) {
                return Err(PadError::Unauthorized(format!("no session grants access to {pad_id}")));
            }
            let handle = self.pads.get_pad(&pad_id, None, Some(&author.id)).await?;
            let read_only_pad_id = self.pads.get_read_only_id(&pad_id).await?;
            self.authors.add_pad(&author.id, &pad_id)?;
            (pad_id, handle, read_only_pad_id)
        };

        if let Some(previous) = self.sessions.remove(&conn) {
            self.hub.leave(&previous.pad_id, &conn).await;
        }

        let pad = handle.lock().await;
        if !self.hub.join(&pad_id, conn).await {
            return Err(PadError::Unavailable(format!("pad {pad_id} is full")));
        }

        let mut historical_author_data = BTreeMap::new();
        for id in pad.get_all_authors() {
            match self.authors.get_author(&id) {
                Ok(record) => {
                    historical_author_data.insert(id, author_info(&record));
                }
                Err(e) => log::debug!("Skipping historical author {id}: {e}"),
            }
        }

        // Read-only viewers never learn the editable id
        let vars = ClientVars {
            pad_id: if read_only {
                read_only_pad_id.clone()
            } else {
                pad_id.clone()
            },
            read_only_id: read_only_pad_id.clone(),
            read_only,
            user_id: author.id.clone(),
            user_name: author.name.clone(),
            user_color: author.color.clone(),
            atext: pad.atext().clone(),
            apool: pad.pool().to_jsonable(),
            head_rev: pad.head(),
            chat_head: pad.chat_head(),
            historical_author_data,
        };
        self.sessions.insert(
            conn,
            SessionInfo {
                pad_id: pad_id.clone(),
                read_only_pad_id,
                author: author.id.clone(),
                read_only,
                revision: pad.head(),
            },
        );
        self.send(&conn, &ServerMessage::ClientVars(vars)).await;
        drop(pad);

        // Introduce the newcomer and the people already present to each other
        let newcomer = ServerMessage::UserNewinfo {
            user_info: author_info(&author),
        };
        self.broadcast_except(&pad_id, &conn, &newcomer).await;
        for peer in self.sessions.connections_on_pad(&pad_id) {
            if peer == conn {
                continue;
            }
            let Some(info) = self.sessions.get(&peer) else {
                continue;
            };
            if let Ok(record) = self.authors.get_author(&info.author) {
                let msg = ServerMessage::UserNewinfo {
                    user_info: author_info(&record),
                };
                self.send(&conn, &msg).await;
            }
        }

        log::info!(
            "Connection {conn} joined pad {pad_id} as {}{}",
            author.id,
            if read_only { " (read-only)" } else { "" }
        );
        Ok(())
    }

    // ─── USER_CHANGES ─────────────────────────────────────────────────

    async fn handle_user_changes(
        &self,
        session: &SessionInfo,
        base_rev: i64,
        changeset: &str,
        apool: PoolJson,
    ) -> Result<()> {
        if session.read_only {
            return Err(PadError::ReadOnly);
        }
        let wire_pool = AttributePool::from_jsonable(apool)?;
        let incoming = Changeset::unpack_checked(changeset)?;

        for op in &incoming.ops {
            if op.kind == OpKind::Delete || op.attribs.is_empty() {
                continue;
            }
            let attribs = AttributeMap::from_attribs(&op.attribs, &wire_pool)?;
            if let Some(author) = attribs.get("author") {
                if !author.is_empty() && author != session.author {
                    return Err(PadError::Unauthorized(format!(
                        "changeset claims author {author}"
                    )));
                }
            }
        }

        let handle = self.pads.get_existing_pad(&session.pad_id).await?;
        let mut pad = handle.lock().await;
        let head = pad.head();
        if base_rev < 0 || base_rev as u64 > head {
            return Err(PadError::BadRevision(format!(
                "base revision {base_rev} outside 0..{head}"
            )));
        }
        let base_rev = base_rev as u64;

        let mut cs = move_ops_to_new_pool(&incoming, &wire_pool, pad.pool_mut())?;
        if base_rev < head {
            for record in pad.get_revisions_between(base_rev + 1, head)? {
                let committed = Changeset::unpack(&record.changeset)?;
                cs = follow(&committed, &cs, false, pad.pool_mut())?;
            }
        }
        let expected = pad.atext().len();
        if cs.old_len != expected {
            return Err(ChangesetError::LengthMismatch {
                expected,
                actual: cs.old_len,
            }
            .into());
        }

        let new_rev = pad.append_revision(&cs, Some(&session.author))?;
        let (wire_cs, wire_pool) = prepare_for_wire(&cs, pad.pool())?;
        let msg = ServerMessage::NewChanges {
            new_rev,
            changeset: wire_cs.pack(),
            apool: wire_pool.to_jsonable(),
            author: Some(session.author.clone()),
            time: now_millis(),
        };
        self.broadcast(&session.pad_id, &msg).await;
        for conn in self.hub.members(&session.pad_id).await {
            self.sessions.advance_revision(&conn, new_rev);
        }
        Ok(())
    }

    // ─── CHANGESET_REQ ────────────────────────────────────────────────

    async fn handle_changeset_req(
        &self,
        conn: Uuid,
        session: &SessionInfo,
        start: i64,
        granularity: i64,
        request_id: u64,
    ) -> Result<()> {
        if start < 0 || granularity <= 0 {
            return Err(PadError::BadRevision(format!(
                "start {start}, granularity {granularity}"
            )));
        }
        let (start, granularity) = (start as u64, granularity as u64);

        let handle = self.pads.get_existing_pad(&session.pad_id).await?;
        let mut pad = handle.lock().await;
        let head = pad.head();
        if start > head {
            return Err(PadError::BadRevision(format!("start {start} is past head {head}")));
        }
        let end = start.saturating_add(granularity).min(head);

        let forward = pad.get_changeset_between(start, end)?;
        let bank = char_len(&forward.char_bank);
        if bank > self.settings.max_changeset_bank {
            return Err(PadError::RangeTooLarge {
                len: bank,
                max: self.settings.max_changeset_bank,
            });
        }

        let from = pad.get_internal_revision_atext(start)?;
        let lines = split_text_lines(&from.text);
        let alines = split_attribution_lines(&from.attribs, &from.text)?;
        let backward = inverse(&forward, &lines, &alines, pad.pool_mut())?;

        let mut wire_pool = AttributePool::new();
        let forward = move_ops_to_new_pool(&forward, pad.pool(), &mut wire_pool)?;
        let backward = move_ops_to_new_pool(&backward, pad.pool(), &mut wire_pool)?;
        let time_delta = pad.get_revision_date(end)? - pad.get_revision_date(start)?;
        drop(pad);

        let reply = ServerMessage::ChangesetReq {
            request_id,
            start,
            granularity,
            changeset: forward.pack(),
            backwards_changeset: backward.pack(),
            apool: wire_pool.to_jsonable(),
            actual_end_num: end,
            time_delta,
        };
        self.send(&conn, &reply).await;
        Ok(())
    }

    // ─── Chat ─────────────────────────────────────────────────────────

    async fn handle_chat(
        &self,
        session: &SessionInfo,
        text: &str,
        time: Option<i64>,
        author_id: Option<String>,
    ) -> Result<()> {
        if session.read_only {
            return Err(PadError::ReadOnly);
        }
        if let Some(claimed) = author_id.filter(|a| *a != session.author) {
            return Err(PadError::Unauthorized(format!("chat claims author {claimed}")));
        }
        let len = char_len(text);
        if len > self.settings.max_text_len {
            return Err(PadError::TextTooLong {
                len,
                max: self.settings.max_text_len,
            });
        }

        let handle = self.pads.get_existing_pad(&session.pad_id).await?;
        let mut pad = handle.lock().await;
        let message = pad.append_chat_message(
            text,
            Some(&session.author),
            time.unwrap_or_else(now_millis),
        )?;
        let entry = self.chat_entry(message, &mut BTreeMap::new());
        self.broadcast(&session.pad_id, &ServerMessage::ChatMessage(entry))
            .await;
        Ok(())
    }

    async fn handle_get_chat(
        &self,
        conn: Uuid,
        session: &SessionInfo,
        start: u64,
        end: u64,
    ) -> Result<()> {
        if end < start {
            return Err(PadError::BadRevision(format!("chat range {start}..{end}")));
        }
        let len = (end - start).saturating_add(1) as usize;
        if len > self.settings.max_chat_page {
            return Err(PadError::RangeTooLarge {
                len,
                max: self.settings.max_chat_page,
            });
        }

        let handle = self.pads.get_existing_pad(&session.pad_id).await?;
        let messages = handle.lock().await.get_chat_messages(start, end)?;
        let mut names = BTreeMap::new();
        let messages = messages
            .into_iter()
            .map(|m| self.chat_entry(m, &mut names))
            .collect();
        self.send(&conn, &ServerMessage::ChatMessages { messages })
            .await;
        Ok(())
    }

    /// Attach the author's display name, looked up once per author.
    fn chat_entry(
        &self,
        message: ChatMessage,
        names: &mut BTreeMap<String, Option<String>>,
    ) -> ChatEntry {
        let display_name = message.author.as_ref().and_then(|id| {
            names
                .entry(id.clone())
                .or_insert_with(|| self.authors.get_author(id).ok().and_then(|a| a.name))
                .clone()
        });
        ChatEntry {
            seq: message.seq,
            text: message.text,
            time: message.timestamp,
            author: message.author,
            display_name,
        }
    }

    // ─── User info ────────────────────────────────────────────────────

    async fn handle_userinfo_update(
        &self,
        conn: Uuid,
        session: &SessionInfo,
        user_info: UserInfo,
    ) -> Result<()> {
        if let Some(color) = user_info.color_id.as_deref() {
            if !is_valid_color(color) {
                return Err(PadError::InvalidColor(color.to_string()));
            }
        }
        let mut author = self.authors.get_author(&session.author)?;
        if let Some(name) = user_info.name.as_deref() {
            author = self.authors.set_author_name(&author.id, name)?;
        }
        if let Some(color) = user_info.color_id.as_deref() {
            author = self.authors.set_author_color(&author.id, color)?;
        }
        let msg = ServerMessage::UserinfoUpdate {
            user_info: author_info(&author),
        };
        self.broadcast_except(&session.pad_id, &conn, &msg).await;
        Ok(())
    }

    // ─── Saved revisions and deletion ─────────────────────────────────

    async fn handle_save_revision(&self, session: &SessionInfo) -> Result<()> {
        if session.read_only {
            return Err(PadError::ReadOnly);
        }
        let handle = self.pads.get_existing_pad(&session.pad_id).await?;
        let mut pad = handle.lock().await;
        let head = pad.head();
        pad.add_saved_revision(head)?;
        log::info!("Saved revision {head} of pad {}", session.pad_id);
        Ok(())
    }

    async fn handle_pad_delete(&self, session: &SessionInfo, pad_id: &str) -> Result<()> {
        if session.read_only {
            return Err(PadError::ReadOnly);
        }
        if pad_id != session.pad_id {
            return Err(PadError::Unauthorized(format!(
                "session is not attached to {pad_id}"
            )));
        }
        let handle = self.pads.get_existing_pad(pad_id).await?;
        let creator = handle.lock().await.get_revision_author(0)?;
        if creator.as_deref() != Some(session.author.as_str()) {
            return Err(PadError::Unauthorized(
                "only the pad creator may delete it".to_string(),
            ));
        }

        let authors = self.pads.remove_pad(pad_id).await?;
        for author in authors {
            if let Err(e) = self.authors.remove_pad(&author, pad_id) {
                log::debug!("Author {author} not updated for deleted pad: {e}");
            }
        }

        let notice = ServerMessage::PadDeleted {
            pad_id: pad_id.to_string(),
        };
        self.broadcast(pad_id, &notice).await;
        for conn in self.hub.members(pad_id).await {
            self.hub.leave(pad_id, &conn).await;
            self.sessions.remove(&conn);
        }
        log::info!("Pad {pad_id} deleted by {}", session.author);
        Ok(())
    }

    // ─── Disconnect ───────────────────────────────────────────────────

    pub async fn handle_disconnect(&self, conn: Uuid) {
        self.hub.disconnect(&conn).await;
        if let Some((pad_id, leave)) = self.end_session(&conn) {
            self.broadcast(&pad_id, &leave).await;
        }
    }

    /// Drop the session of `conn`. Returns the USER_LEAVE to announce
    /// unless the author is still on the pad through another connection.
    fn end_session(&self, conn: &Uuid) -> Option<(String, ServerMessage)> {
        let session = self.sessions.remove(conn)?;
        log::info!("Connection {conn} left pad {}", session.pad_id);
        if self
            .sessions
            .author_has_other_connection(&session.pad_id, &session.author, conn)
        {
            return None;
        }
        let user_info = match self.authors.get_author(&session.author) {
            Ok(author) => author_info(&author),
            Err(_) => AuthorInfo {
                user_id: session.author.clone(),
                name: None,
                color_id: String::new(),
            },
        };
        Some((session.pad_id, ServerMessage::UserLeave { user_info }))
    }

    /// End the sessions of connections the hub evicted for falling behind.
    /// Their sockets close; clients rejoin with a fresh CLIENT_READY.
    async fn reap_evicted(&self) {
        loop {
            let evicted = self.hub.take_evicted();
            if evicted.is_empty() {
                return;
            }
            for conn in evicted {
                let Some((pad_id, leave)) = self.end_session(&conn) else {
                    continue;
                };
                match leave.encode() {
                    Ok(text) => {
                        self.hub.broadcast(&pad_id, Arc::from(text)).await;
                    }
                    Err(e) => log::error!("Failed to encode USER_LEAVE for {pad_id}: {e}"),
                }
            }
        }
    }

    // ─── Outbound ─────────────────────────────────────────────────────

    async fn send(&self, conn: &Uuid, msg: &ServerMessage) {
        match msg.encode() {
            Ok(text) => {
                self.hub.send_to(conn, Arc::from(text)).await;
            }
            Err(e) => log::error!("Failed to encode message for {conn}: {e}"),
        }
        self.reap_evicted().await;
    }

    async fn broadcast(&self, pad_id: &str, msg: &ServerMessage) {
        match msg.encode() {
            Ok(text) => {
                self.hub.broadcast(pad_id, Arc::from(text)).await;
            }
            Err(e) => log::error!("Failed to encode broadcast for {pad_id}: {e}"),
        }
        self.reap_evicted().await;
    }

    async fn broadcast_except(&self, pad_id: &str, except: &Uuid, msg: &ServerMessage) {
        match msg.encode() {
            Ok(text) => {
                self.hub.broadcast_except(pad_id, except, Arc::from(text)).await;
            }
            Err(e) => log::error!("Failed to encode broadcast for {pad_id}: {e}"),
        }
        self.reap_evicted().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::MemoryDataStore;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Conn {
        id: Uuid,
        rx: mpsc::Receiver<Arc<str>>,
    }

    impl Conn {
        async fn recv(&mut self) -> ServerMessage {
            let text = timeout(Duration::from_secs(2), self.rx.recv())
                .await
                .expect("timed out")
                .expect("queue closed");
            ServerMessage::decode(&text).unwrap()
        }

        fn assert_idle(&mut self) {
            assert!(self.rx.try_recv().is_err(), "unexpected message queued");
        }
    }

    fn handler() -> MessageHandler {
        MessageHandler::new(
            Arc::new(MemoryDataStore::new()),
            Settings::for_testing(),
            Arc::new(Hub::new(64, 16)),
        )
    }

    async fn join(h: &MessageHandler, pad: &str, token: &str) -> (Conn, ClientVars) {
        let id = Uuid::new_v4();
        let rx = h.handle_connect(id).await;
        let mut conn = Conn { id, rx };
        h.handle_message(
            id,
            ClientMessage::ClientReady {
                pad_id: pad.into(),
                token: token.into(),
                session_ids: vec![],
                user_info: UserInfo::default(),
            },
        )
        .await;
        match conn.recv().await {
            ServerMessage::ClientVars(vars) => (conn, vars),
            other => panic!("expected CLIENT_VARS, got {other:?}"),
        }
    }

    fn user_changes(base_rev: i64, cs: &str) -> ClientMessage {
        ClientMessage::UserChanges {
            base_rev,
            changeset: cs.into(),
            apool: PoolJson::default(),
        }
    }

    #[tokio::test]
    async fn test_client_ready_snapshot() {
        let h = handler();
        let (_conn, vars) = join(&h, "p", "t.1").await;
        assert_eq!(vars.pad_id, "p");
        assert_eq!(vars.head_rev, 0);
        assert_eq!(vars.atext.text, "\n");
        assert_eq!(vars.chat_head, -1);
        assert!(!vars.read_only);
        assert!(is_read_only_id(&vars.read_only_id));
    }

    #[tokio::test]
    async fn test_user_changes_broadcast_to_all() {
        let h = handler();
        let (mut a, vars_a) = join(&h, "p", "t.a").await;
        let (mut b, _) = join(&h, "p", "t.b").await;
        // a learns about b
        assert!(matches!(a.recv().await, ServerMessage::UserNewinfo { .. }));
        assert!(matches!(b.recv().await, ServerMessage::UserNewinfo { .. }));

        h.handle_message(a.id, user_changes(0, "Z:1>3+3$def")).await;
        for conn in [&mut a, &mut b] {
            match conn.recv().await {
                ServerMessage::NewChanges {
                    new_rev, author, ..
                } => {
                    assert_eq!(new_rev, 1);
                    assert_eq!(author.as_deref(), Some(vars_a.user_id.as_str()));
                }
                other => panic!("expected NEW_CHANGES, got {other:?}"),
            }
        }
        let handle = h.pads().get_pad("p", None, None).await.unwrap();
        assert_eq!(handle.lock().await.text(), "def\n");
    }

    #[tokio::test]
    async fn test_lagging_client_is_cut_off_without_gaps() {
        let h = MessageHandler::new(
            Arc::new(MemoryDataStore::new()),
            Settings::for_testing(),
            Arc::new(Hub::new(2, 16)),
        );
        let (mut slow, _) = join(&h, "p", "t.slow").await;
        let (mut peer, _) = join(&h, "p", "t.peer").await;
        assert!(matches!(slow.recv().await, ServerMessage::UserNewinfo { .. }));
        assert!(matches!(peer.recv().await, ServerMessage::UserNewinfo { .. }));

        // slow never drains; the third revision overflows its queue
        for rev in 1..=3 {
            h.handle_message(peer.id, user_changes(0, "Z:1>1+1$x")).await;
            match peer.recv().await {
                ServerMessage::NewChanges { new_rev, .. } => assert_eq!(new_rev, rev),
                other => panic!("expected NEW_CHANGES, got {other:?}"),
            }
        }
        assert!(matches!(peer.recv().await, ServerMessage::UserLeave { .. }));
        assert!(h.sessions().get(&slow.id).is_none());
        assert_eq!(h.hub().members("p").await, vec![peer.id]);

        // Its session is gone, so further commits are dropped
        h.handle_message(slow.id, user_changes(0, "Z:1>1+1$y")).await;
        peer.assert_idle();

        let mut received = Vec::new();
        while let Some(text) = timeout(Duration::from_secs(2), slow.rx.recv()).await.unwrap() {
            match ServerMessage::decode(&text).unwrap() {
                ServerMessage::NewChanges { new_rev, .. } => received.push(new_rev),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(received, vec![1, 2]);

        let handle = h.pads().get_pad("p", None, None).await.unwrap();
        assert_eq!(handle.lock().await.head(), 3);
    }

    #[tokio::test]
    async fn test_stale_base_is_followed() {
        let h = handler();
        let (mut a, _) = join(&h, "p", "t.a").await;
        h.handle_message(a.id, user_changes(0, "Z:1>2+2$ab")).await;
        a.recv().await;
        // Built against rev 0 ("\n"), lands after "ab"
        h.handle_message(a.id, user_changes(0, "Z:1>1+1$x")).await;
        match a.recv().await {
            ServerMessage::NewChanges { new_rev, changeset, .. } => {
                assert_eq!(new_rev, 2);
                assert_eq!(Changeset::unpack(&changeset).unwrap().old_len, 3);
            }
            other => panic!("expected NEW_CHANGES, got {other:?}"),
        }
        let handle = h.pads().get_pad("p", None, None).await.unwrap();
        assert_eq!(handle.lock().await.text(), "abx\n");
    }

    #[tokio::test]
    async fn test_read_only_rejected() {
        let h = handler();
        let (mut editor, vars) = join(&h, "p", "t.e").await;
        let (mut viewer, ro_vars) = join(&h, &vars.read_only_id, "t.v").await;
        assert!(ro_vars.read_only);
        editor.recv().await; // USER_NEWINFO
        viewer.recv().await; // USER_NEWINFO

        h.handle_message(viewer.id, user_changes(0, "Z:1>1+1$x")).await;
        match viewer.recv().await {
            ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::Unauthorized),
            other => panic!("expected ERROR, got {other:?}"),
        }
        editor.assert_idle();
        let handle = h.pads().get_pad("p", None, None).await.unwrap();
        assert_eq!(handle.lock().await.head(), 0);
    }

    #[tokio::test]
    async fn test_rejections_reach_sender_only() {
        let h = handler();
        let (mut a, _) = join(&h, "p", "t.a").await;
        let (mut b, _) = join(&h, "p", "t.b").await;
        a.recv().await;
        b.recv().await;

        for bad in [
            user_changes(5, "Z:1>1+1$x"),
            user_changes(-1, "Z:1>1+1$x"),
            user_changes(0, "Z:9>1+1$x"),
            user_changes(0, "garbage"),
        ] {
            h.handle_message(a.id, bad).await;
            assert!(matches!(a.recv().await, ServerMessage::Error { .. }));
        }
        b.assert_idle();
    }

    #[tokio::test]
    async fn test_foreign_author_rejected() {
        let h = handler();
        let (mut a, _) = join(&h, "p", "t.a").await;
        let mut pool = AttributePool::new();
        pool.put_attrib(scribe_core::Attribute::author("a.somebodyelse"));
        h.handle_message(
            a.id,
            ClientMessage::UserChanges {
                base_rev: 0,
                changeset: "Z:1>1*0+1$x".into(),
                apool: pool.to_jsonable(),
            },
        )
        .await;
        match a.recv().await {
            ServerMessage::Error { kind, .. } => assert_eq!(kind, ErrorKind::Unauthorized),
            other => panic!("expected ERROR, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_no_session_is_silent() {
        let h = handler();
        let id = Uuid::new_v4();
        let mut conn = Conn {
            id,
            rx: h.handle_connect(id).await,
        };
        h.handle_message(id, user_changes(0, "Z:1>1+1$x")).await;
        h.handle_text(id, "{not json").await;
        conn.assert_idle();
    }

    #[tokio::test]
    async fn test_changeset_req_and_backwards() {
        let h = handler();
        let (mut a, _) = join(&h, "p", "t.a").await;
        for (rev, cs) in ["Z:1>1+1$a", "Z:2>1=1+1$b", "Z:3>1=2+1$c"].iter().enumerate() {
            h.handle_message(a.id, user_changes(rev as i64, cs)).await;
            a.recv().await;
        }
        h.handle_message(
            a.id,
            ClientMessage::ChangesetReq {
                start: 1,
                granularity: 10,
                request_id: 7,
            },
        )
        .await;
        let ServerMessage::ChangesetReq {
            request_id,
            changeset,
            backwards_changeset,
            apool,
            actual_end_num,
            ..
        } = a.recv().await
        else {
            panic!("expected CHANGESET_REQ");
        };
        assert_eq!(request_id, 7);
        assert_eq!(actual_end_num, 3);
        let mut pool = AttributePool::from_jsonable(apool).unwrap();
        let forward = Changeset::unpack(&changeset).unwrap();
        let backward = Changeset::unpack(&backwards_changeset).unwrap();
        let at_one = scribe_core::AText::new("a\n", None);
        let at_three = scribe_core::apply_to_atext(&forward, &at_one, &mut pool).unwrap();
        assert_eq!(at_three.text, "abc\n");
        let back = scribe_core::apply_to_atext(&backward, &at_three, &mut pool).unwrap();
        assert_eq!(back.text, "a\n");

        h.handle_message(
            a.id,
            ClientMessage::ChangesetReq {
                start: 9,
                granularity: 1,
                request_id: 8,
            },
        )
        .await;
        assert!(matches!(a.recv().await, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn test_chat_flow() {
        let h = handler();
        let (mut a, _) = join(&h, "p", "t.a").await;
        h.handle_message(
            a.id,
            ClientMessage::UserinfoUpdate {
                user_info: UserInfo {
                    name: Some("Ada".into()),
                    color_id: Some("#A0B".into()),
                },
            },
        )
        .await;
        for text in ["one", "two", "three"] {
            h.handle_message(
                a.id,
                ClientMessage::ChatMessage {
                    text: text.into(),
                    time: Some(1),
                    author_id: None,
                },
            )
            .await;
            match a.recv().await {
                ServerMessage::ChatMessage(entry) => {
                    assert_eq!(entry.text, text);
                    assert_eq!(entry.display_name.as_deref(), Some("Ada"));
                }
                other => panic!("expected CHAT_MESSAGE, got {other:?}"),
            }
        }
        h.handle_message(a.id, ClientMessage::GetChatMessages { start: 1, end: 5 })
            .await;
        let ServerMessage::ChatMessages { messages } = a.recv().await else {
            panic!("expected CHAT_MESSAGES");
        };
        assert_eq!(messages.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![1, 2]);

        h.handle_message(a.id, ClientMessage::GetChatMessages { start: 0, end: 50 })
            .await;
        assert!(matches!(a.recv().await, ServerMessage::Error { .. }));
    }

    #[tokio::test]
    async fn test_userinfo_update_validates_color() {
        let h = handler();
        let (mut a, _) = join(&h, "p", "t.a").await;
        let (mut b, _) = join(&h, "p", "t.b").await;
        a.recv().await;
        b.recv().await;

        h.handle_message(
            a.id,
            ClientMessage::UserinfoUpdate {
                user_info: UserInfo {
                    name: None,
                    color_id: Some("red".into()),
                },
            },
        )
        .await;
        assert!(matches!(a.recv().await, ServerMessage::Error { kind: ErrorKind::Malformed, .. }));
        b.assert_idle();

        h.handle_message(
            a.id,
            ClientMessage::UserinfoUpdate {
                user_info: UserInfo {
                    name: None,
                    color_id: Some("#00ff00".into()),
                },
            },
        )
        .await;
        match b.recv().await {
            ServerMessage::UserinfoUpdate { user_info } => assert_eq!(user_info.color_id, "#00ff00"),
            other => panic!("expected USERINFO_UPDATE, got {other:?}"),
        }
        a.assert_idle();
    }

    #[tokio::test]
    async fn test_pad_delete_by_creator_only() {
        let h = handler();
        let (mut creator, _) = join(&h, "p", "t.c").await;
        let (mut other, _) = join(&h, "p", "t.o").await;
        creator.recv().await;
        other.recv().await;

        h.handle_message(other.id, ClientMessage::PadDelete { pad_id: "p".into() })
            .await;
        assert!(matches!(other.recv().await, ServerMessage::Error { .. }));

        h.handle_message(creator.id, ClientMessage::PadDelete { pad_id: "p".into() })
            .await;
        for conn in [&mut creator, &mut other] {
            assert!(matches!(conn.recv().await, ServerMessage::PadDeleted { .. }));
        }
        assert!(!h.pads().does_pad_exist("p").await.unwrap());
        assert!(h.sessions().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_announces_leave() {
        let h = handler();
        let (mut a, _) = join(&h, "p", "t.a").await;
        let (b, vars_b) = join(&h, "p", "t.b").await;
        a.recv().await; // USER_NEWINFO for b

        h.handle_disconnect(b.id).await;
        match a.recv().await {
            ServerMessage::UserLeave { user_info } => assert_eq!(user_info.user_id, vars_b.user_id),
            other => panic!("expected USER_LEAVE, got {other:?}"),
        }
        assert_eq!(h.sessions().len(), 1);
    }

    #[tokio::test]
    async fn test_save_revision() {
        let h = handler();
        let (mut a, _) = join(&h, "p", "t.a").await;
        h.handle_message(a.id, user_changes(0, "Z:1>1+1$x")).await;
        a.recv().await;
        h.handle_message(a.id, ClientMessage::SaveRevision).await;
        let handle = h.pads().get_pad("p", None, None).await.unwrap();
        assert!(handle.lock().await.saved_revisions().contains(&1));
    }
}
