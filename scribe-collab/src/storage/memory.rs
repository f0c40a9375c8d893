//! In-memory [`DataStore`] backed by `parking_lot` locked maps.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use super::{
    AuthorRecord, ChatMessage, DataStore, GroupRecord, PadRecord, RevisionRecord, SessionRecord,
    StoreError,
};

#[derive(Default)]
struct Tables {
    pads: HashMap<String, PadRecord>,
    revisions: HashMap<String, BTreeMap<u64, RevisionRecord>>,
    chats: HashMap<String, BTreeMap<u64, ChatMessage>>,
    authors: HashMap<String, AuthorRecord>,
    tokens: HashMap<String, String>,
    read_only: HashMap<String, String>,
    read_only_reverse: HashMap<String, String>,
    sessions: HashMap<String, SessionRecord>,
    groups: HashMap<String, GroupRecord>,
}

/// Volatile store; everything is lost on drop.
#[derive(Default)]
pub struct MemoryDataStore {
    tables: RwLock<Tables>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found(table: &str, key: impl std::fmt::Display) -> StoreError {
    StoreError::NotFound(format!("{table}:{key}"))
}

impl DataStore for MemoryDataStore {
    fn get_pad(&self, pad_id: &str) -> Result<PadRecord, StoreError> {
        self.tables
            .read()
            .pads
            .get(pad_id)
            .cloned()
            .ok_or_else(|| not_found("pad", pad_id))
    }

    fn create_pad(&self, pad_id: &str, record: &PadRecord) -> Result<(), StoreError> {
        self.tables.write().pads.insert(pad_id.to_string(), record.clone());
        Ok(())
    }

    fn does_pad_exist(&self, pad_id: &str) -> Result<bool, StoreError> {
        Ok(self.tables.read().pads.contains_key(pad_id))
    }

    fn remove_pad(&self, pad_id: &str) -> Result<(), StoreError> {
        self.tables.write().pads.remove(pad_id);
        Ok(())
    }

    fn list_pad_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids: Vec<String> = self.tables.read().pads.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }

    fn save_revision(&self, pad_id: &str, record: &RevisionRecord) -> Result<(), StoreError> {
        self.tables
            .write()
            .revisions
            .entry(pad_id.to_string())
            .or_default()
            .entry(record.rev)
            .or_insert_with(|| record.clone());
        Ok(())
    }

    fn get_revision(&self, pad_id: &str, rev: u64) -> Result<RevisionRecord, StoreError> {
        self.tables
            .read()
            .revisions
            .get(pad_id)
            .and_then(|revs| revs.get(&rev))
            .cloned()
            .ok_or_else(|| not_found("revision", format!("{pad_id}:{rev}")))
    }

    fn get_revisions(
        &self,
        pad_id: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<RevisionRecord>, StoreError> {
        let tables = self.tables.read();
        let revs = tables.revisions.get(pad_id);
        (start..=end)
            .map(|rev| {
                revs.and_then(|r| r.get(&rev))
                    .cloned()
                    .ok_or_else(|| not_found("revision", format!("{pad_id}:{rev}")))
            })
            .collect()
    }

    fn remove_revisions_of_pad(&self, pad_id: &str) -> Result<(), StoreError> {
        self.tables.write().revisions.remove(pad_id);
        Ok(())
    }

    fn save_chat_message(&self, pad_id: &str, message: &ChatMessage) -> Result<(), StoreError> {
        self.tables
            .write()
            .chats
            .entry(pad_id.to_string())
            .or_default()
            .entry(message.seq)
            .or_insert_with(|| message.clone());
        Ok(())
    }

    fn get_chats_of_pad(
        &self,
        pad_id: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        if start > end {
            return Ok(Vec::new());
        }
        Ok(self
            .tables
            .read()
            .chats
            .get(pad_id)
            .map(|chats| chats.range(start..=end).map(|(_, m)| m.clone()).collect())
            .unwrap_or_default())
    }

    fn remove_chat(&self, pad_id: &str) -> Result<(), StoreError> {
        self.tables.write().chats.remove(pad_id);
        Ok(())
    }

    fn save_author(&self, author: &AuthorRecord) -> Result<(), StoreError> {
        self.tables.write().authors.insert(author.id.clone(), author.clone());
        Ok(())
    }

    fn get_author(&self, author_id: &str) -> Result<AuthorRecord, StoreError> {
        self.tables
            .read()
            .authors
            .get(author_id)
            .cloned()
            .ok_or_else(|| not_found("author", author_id))
    }

    fn get_author_for_token(&self, token: &str) -> Result<String, StoreError> {
        self.tables
            .read()
            .tokens
            .get(token)
            .cloned()
            .ok_or_else(|| not_found("token", token))
    }

    fn set_author_for_token(&self, token: &str, author_id: &str) -> Result<(), StoreError> {
        self.tables
            .write()
            .tokens
            .insert(token.to_string(), author_id.to_string());
        Ok(())
    }

    fn save_read_only_id(&self, pad_id: &str, read_only_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        tables.read_only.insert(pad_id.to_string(), read_only_id.to_string());
        tables
            .read_only_reverse
            .insert(read_only_id.to_string(), pad_id.to_string());
        Ok(())
    }

    fn get_read_only_id(&self, pad_id: &str) -> Result<String, StoreError> {
        self.tables
            .read()
            .read_only
            .get(pad_id)
            .cloned()
            .ok_or_else(|| not_found("pad2readonly", pad_id))
    }

    fn get_pad_id_for_read_only(&self, read_only_id: &str) -> Result<String, StoreError> {
        self.tables
            .read()
            .read_only_reverse
            .get(read_only_id)
            .cloned()
            .ok_or_else(|| not_found("readonly2pad", read_only_id))
    }

    fn remove_read_only_id(&self, pad_id: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if let Some(ro) = tables.read_only.remove(pad_id) {
            tables.read_only_reverse.remove(&ro);
        }
        Ok(())
    }

    fn save_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        self.tables
            .write()
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn get_session(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        self.tables
            .read()
            .sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| not_found("session", session_id))
    }

    fn remove_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.tables.write().sessions.remove(session_id);
        Ok(())
    }

    fn save_group(&self, group: &GroupRecord) -> Result<(), StoreError> {
        self.tables.write().groups.insert(group.id.clone(), group.clone());
        Ok(())
    }

    fn get_group(&self, group_id: &str) -> Result<GroupRecord, StoreError> {
        self.tables
            .read()
            .groups
            .get(group_id)
            .cloned()
            .ok_or_else(|| not_found("group", group_id))
    }

    fn remove_group(&self, group_id: &str) -> Result<(), StoreError> {
        self.tables.write().groups.remove(group_id);
        Ok(())
    }
}
