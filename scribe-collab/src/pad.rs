//! A single pad: head document, attribute pool, revision log and chat.
//!
//! ```text
//!   rev 0          rev 1          rev 2               head
//!  ┌──────┐  cs1  ┌──────┐  cs2  ┌──────┐        ┌──────────────┐
//!  │ "\n" │ ────► │ ...  │ ────► │ ...  │  ...   │ atext + pool │
//!  └──────┘       └──────┘       └──────┘        └──────────────┘
//!      every RevisionRecord stores its changeset and resulting atext
//! ```
//!
//! A `Pad` is always accessed through the per-pad lock held by
//! [`PadManager`](crate::PadManager). Memory is only updated after the
//! revision row is durable, so a store failure leaves the pad untouched.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use scribe_core::cursor::char_len;
use scribe_core::{
    apply_to_atext, compose, make_splice, AText, Attribute, AttributePool, Builder, Changeset,
    ChangesetError,
};

use crate::error::{PadError, Result};
use crate::settings::Settings;
use crate::storage::{ChatMessage, DataStore, PadRecord, RevisionRecord, StoreError};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Normalize line endings and whitespace the editor cannot represent.
pub fn clean_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\t', "        ")
        .replace('\u{a0}', " ")
}

fn author_attribs(author: Option<&str>) -> Vec<Attribute> {
    author.map(Attribute::author).into_iter().collect()
}

pub struct Pad {
    id: String,
    store: Arc<dyn DataStore>,
    settings: Arc<Settings>,
    head: u64,
    atext: AText,
    pool: AttributePool,
    chat_head: i64,
    saved_revisions: BTreeSet<u64>,
    read_only_id: Option<String>,
    public_status: bool,
    /// Pool size as last persisted, by the pad record or a snapshot.
    stored_pool_len: usize,
    /// Set by `remove`; every later write fails with `PadNotFound`.
    removed: bool,
}

impl Pad {
    /// Load `id` from the store, or create it with `text` (falling back to
    /// the configured default) as revision 0.
    pub fn load_or_create(
        id: &str,
        store: Arc<dyn DataStore>,
        settings: Arc<Settings>,
        text: Option<&str>,
        author: Option<&str>,
    ) -> Result<Self> {
        match store.get_pad(id) {
            Ok(record) => {
                let mut pad = Self::from_record(id, store, settings, record);
                pad.catch_up()?;
                Ok(pad)
            }
            Err(StoreError::NotFound(_)) => Self::create(id, store, settings, text, author),
            Err(e) => Err(e.into()),
        }
    }

    fn from_record(
        id: &str,
        store: Arc<dyn DataStore>,
        settings: Arc<Settings>,
        record: PadRecord,
    ) -> Self {
        let stored_pool_len = record.pool.len();
        Self {
            id: id.to_string(),
            store,
            settings,
            head: record.head,
            atext: record.atext,
            pool: record.pool,
            chat_head: record.chat_head,
            saved_revisions: record.saved_revisions,
            read_only_id: record.read_only_id,
            public_status: record.public_status,
            stored_pool_len,
            removed: false,
        }
    }

    fn create(
        id: &str,
        store: Arc<dyn DataStore>,
        settings: Arc<Settings>,
        text: Option<&str>,
        author: Option<&str>,
    ) -> Result<Self> {
        let text = clean_text(text.unwrap_or(&settings.default_pad_text));
        let len = char_len(&text);
        if len > settings.max_pad_text_len {
            return Err(PadError::TextTooLong {
                len,
                max: settings.max_pad_text_len,
            });
        }

        let mut pool = AttributePool::new();
        let cs = Builder::new(1)
            .insert_with(&text, &author_attribs(author), &mut pool)
            .build()?;
        let atext = apply_to_atext(&cs, &AText::initial(), &mut pool)?;

        let record = RevisionRecord {
            rev: 0,
            changeset: cs.pack(),
            atext: atext.clone(),
            pool: Some(pool.clone()),
            author: author.map(str::to_string),
            timestamp: now_millis(),
        };
        store.save_revision(id, &record)?;

        let mut pad = Self {
            id: id.to_string(),
            store,
            settings,
            head: 0,
            atext,
            pool,
            chat_head: -1,
            saved_revisions: BTreeSet::new(),
            read_only_id: None,
            public_status: false,
            stored_pool_len: 0,
            removed: false,
        };
        pad.save()?;
        log::info!("Created pad {id}");
        Ok(pad)
    }

    /// Pick up revisions written after the last successful pad record save.
    fn catch_up(&mut self) -> Result<()> {
        loop {
            let record = match self.store.get_revision(&self.id, self.head + 1) {
                Ok(record) => record,
                Err(StoreError::NotFound(_)) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            log::warn!(
                "Pad {} record is behind its revision log, advancing to {}",
                self.id,
                record.rev
            );
            self.head = record.rev;
            self.atext = record.atext;
            if let Some(pool) = record.pool {
                self.stored_pool_len = pool.len();
                self.pool = pool;
            }
        }
    }

    fn record(&self) -> PadRecord {
        PadRecord {
            head: self.head,
            atext: self.atext.clone(),
            pool: self.pool.clone(),
            chat_head: self.chat_head,
            saved_revisions: self.saved_revisions.clone(),
            read_only_id: self.read_only_id.clone(),
            public_status: self.public_status,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.removed {
            return Err(PadError::PadNotFound(self.id.clone()));
        }
        Ok(())
    }

    fn save(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.store.create_pad(&self.id, &self.record())?;
        self.stored_pool_len = self.pool.len();
        Ok(())
    }

    /// Save the head record once the revision itself is durable; a
    /// failure here is repaired by `catch_up` on the next load.
    fn save_after_commit(&mut self) {
        if let Err(e) = self.save() {
            log::error!("Failed to save pad record for {}: {e}", self.id);
        }
    }

    // ─── Accessors ────────────────────────────────────────────────────

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn atext(&self) -> &AText {
        &self.atext
    }

    pub fn text(&self) -> &str {
        &self.atext.text
    }

    pub fn pool(&self) -> &AttributePool {
        &self.pool
    }

    /// Mutable pool access for translating incoming changesets.
    pub fn pool_mut(&mut self) -> &mut AttributePool {
        &mut self.pool
    }

    /// Sequence number of the newest chat message, -1 when empty.
    pub fn chat_head(&self) -> i64 {
        self.chat_head
    }

    pub fn saved_revisions(&self) -> &BTreeSet<u64> {
        &self.saved_revisions
    }

    pub fn read_only_id(&self) -> Option<&str> {
        self.read_only_id.as_deref()
    }

    pub fn public_status(&self) -> bool {
        self.public_status
    }

    // ─── Revisions ────────────────────────────────────────────────────

    /// Commit `cs`, whose attribute numbers must already refer to this
    /// pad's pool. Returns the new head revision.
    pub fn append_revision(&mut self, cs: &Changeset, author: Option<&str>) -> Result<u64> {
        self.ensure_live()?;
        let old_len = self.atext.len();
        if cs.old_len != old_len {
            return Err(ChangesetError::LengthMismatch {
                expected: old_len,
                actual: cs.old_len,
            }
            .into());
        }

        let mut pool = self.pool.clone();
        if let Some(author) = author {
            pool.put_attrib(Attribute::author(author));
        }
        let atext = apply_to_atext(cs, &self.atext, &mut pool)?;

        let rev = self.head + 1;
        let interval = self.settings.key_revision_interval;
        let key_revision =
            (interval > 0 && rev % interval == 0) || pool.len() != self.stored_pool_len;
        let record = RevisionRecord {
            rev,
            changeset: cs.pack(),
            atext: atext.clone(),
            pool: key_revision.then(|| pool.clone()),
            author: author.map(str::to_string),
            timestamp: now_millis(),
        };
        self.store.save_revision(&self.id, &record)?;

        self.head = rev;
        self.atext = atext;
        self.pool = pool;
        if key_revision {
            self.stored_pool_len = self.pool.len();
        }
        self.save_after_commit();
        log::debug!("Committed revision {rev} of pad {} by {author:?}", self.id);
        Ok(rev)
    }

    pub fn get_revision(&self, rev: u64) -> Result<RevisionRecord> {
        if rev > self.head {
            return Err(self.revision_not_found(rev));
        }
        self.store.get_revision(&self.id, rev).map_err(|e| match e {
            StoreError::NotFound(_) => self.revision_not_found(rev),
            e => e.into(),
        })
    }

    pub fn get_revision_changeset(&self, rev: u64) -> Result<Changeset> {
        Ok(Changeset::unpack(&self.get_revision(rev)?.changeset)?)
    }

    /// Records `start..=end`, all of which must exist.
    pub fn get_revisions_between(&self, start: u64, end: u64) -> Result<Vec<RevisionRecord>> {
        if start > end || end > self.head {
            return Err(self.revision_not_found(end));
        }
        self.store
            .get_revisions(&self.id, start, end)
            .map_err(|e| match e {
                StoreError::NotFound(_) => self.revision_not_found(end),
                e => e.into(),
            })
    }

    pub fn get_revision_author(&self, rev: u64) -> Result<Option<String>> {
        Ok(self.get_revision(rev)?.author)
    }

    /// Commit time of `rev` in milliseconds.
    pub fn get_revision_date(&self, rev: u64) -> Result<i64> {
        Ok(self.get_revision(rev)?.timestamp)
    }

    /// Document state right after `rev`.
    pub fn get_internal_revision_atext(&self, rev: u64) -> Result<AText> {
        if rev == self.head {
            return Ok(self.atext.clone());
        }
        Ok(self.get_revision(rev)?.atext)
    }

    /// One changeset taking `rev(a)` to `rev(b)`.
    pub fn get_changeset_between(&mut self, a: u64, b: u64) -> Result<Changeset> {
        if a > b || b > self.head {
            return Err(PadError::BadRevision(format!(
                "range {a}..{b} outside 0..{}",
                self.head
            )));
        }
        if a == b {
            return Ok(Changeset::identity(self.get_internal_revision_atext(a)?.len()));
        }
        let revisions = self.get_revisions_between(a + 1, b)?;
        let mut composed: Option<Changeset> = None;
        for record in revisions {
            let cs = Changeset::unpack(&record.changeset)?;
            composed = Some(match composed {
                Some(acc) => compose(&acc, &cs, &mut self.pool)?,
                None => cs,
            });
        }
        composed.ok_or_else(|| self.revision_not_found(b))
    }

    fn revision_not_found(&self, rev: u64) -> PadError {
        PadError::RevisionNotFound {
            pad_id: self.id.clone(),
            rev,
        }
    }

    // ─── Text edits ───────────────────────────────────────────────────

    /// Replace `ndel` chars at `start` with `ins`. A splice reaching the
    /// end of the document gets a trailing newline when `ins` lacks one.
    pub fn splice_text(
        &mut self,
        start: usize,
        ndel: usize,
        ins: &str,
        author: Option<&str>,
    ) -> Result<u64> {
        let orig_len = self.atext.len();
        let start = start.min(orig_len);
        let ndel = ndel.min(orig_len - start);
        let mut ins = clean_text(ins);
        if start + ndel == orig_len && !ins.ends_with('\n') {
            ins.push('\n');
        }
        let cs = make_splice(
            &self.atext.text,
            start,
            ndel,
            &ins,
            &author_attribs(author),
            &mut self.pool,
        )?;
        self.append_revision(&cs, author)
    }

    /// Replace the whole document.
    pub fn set_text(&mut self, text: &str, author: Option<&str>) -> Result<u64> {
        let len = self.atext.len();
        self.splice_text(0, len, text, author)
    }

    /// Insert `text` in front of the final newline.
    pub fn append_text(&mut self, text: &str, author: Option<&str>) -> Result<u64> {
        let at = self.atext.len().saturating_sub(1);
        self.splice_text(at, 0, text, author)
    }

    // ─── Chat ─────────────────────────────────────────────────────────

    pub fn append_chat_message(
        &mut self,
        text: &str,
        author: Option<&str>,
        timestamp: i64,
    ) -> Result<ChatMessage> {
        self.ensure_live()?;
        let message = ChatMessage {
            seq: (self.chat_head + 1) as u64,
            text: text.to_string(),
            author: author.map(str::to_string),
            timestamp,
        };
        self.store.save_chat_message(&self.id, &message)?;
        self.chat_head += 1;
        self.save_after_commit();
        Ok(message)
    }

    /// Messages `start..=end`, clamped to the chat log.
    pub fn get_chat_messages(&self, start: u64, end: u64) -> Result<Vec<ChatMessage>> {
        if self.chat_head < 0 {
            return Ok(Vec::new());
        }
        let end = end.min(self.chat_head as u64);
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self.store.get_chats_of_pad(&self.id, start, end)?)
    }

    // ─── Metadata ─────────────────────────────────────────────────────

    pub fn add_saved_revision(&mut self, rev: u64) -> Result<()> {
        self.ensure_live()?;
        if rev > self.head {
            return Err(self.revision_not_found(rev));
        }
        if self.saved_revisions.insert(rev) {
            self.save()?;
        }
        Ok(())
    }

    pub fn set_public_status(&mut self, public: bool) -> Result<()> {
        self.ensure_live()?;
        self.public_status = public;
        self.save()
    }

    pub(crate) fn set_read_only_id(&mut self, read_only_id: &str) -> Result<()> {
        self.ensure_live()?;
        self.read_only_id = Some(read_only_id.to_string());
        self.save()
    }

    /// Every author id referenced by the pool, sorted.
    pub fn get_all_authors(&self) -> Vec<String> {
        self.pool
            .values_for_key("author")
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Verify the pad's structural invariants against the store.
    pub fn check(&self) -> Result<()> {
        if self.id.trim() != self.id {
            return Err(PadError::InvalidPadId(self.id.clone()));
        }
        if let Some(&last) = self.saved_revisions.iter().next_back() {
            if last > self.head {
                return Err(PadError::BadRevision(format!(
                    "saved revision {last} is past head {}",
                    self.head
                )));
            }
        }
        self.pool.check()?;
        self.atext.check()?;
        self.ensure_live()?;
        // Replay starts at revision 0
        self.get_revision(0)?;
        let stored = self.get_revision(self.head)?;
        if stored.atext != self.atext {
            return Err(PadError::BadRevision(format!(
                "head atext differs from stored revision {}",
                self.head
            )));
        }
        Ok(())
    }

    /// Delete revisions, chat, aliases and finally the pad record.
    pub fn remove(&mut self) -> Result<()> {
        self.ensure_live()?;
        self.removed = true;
        self.store.remove_revisions_of_pad(&self.id)?;
        self.store.remove_chat(&self.id)?;
        self.store.remove_read_only_id(&self.id)?;
        self.store.remove_pad(&self.id)?;
        log::info!("Removed pad {}", self.id);
        Ok(())
    }
}
