//! Pad registry: id validation, loading, caching, aliases and groups.
//!
//! ```text
//!   get_pad("notes")
//!        │  read lock: cached? ──► Arc<Mutex<Pad>>
//!        ▼
//!   write lock, double-check, Pad::load_or_create, insert
//! ```
//!
//! The map lock is only held for lookup, insert and eviction. All pad
//! state lives behind the per-pad `Mutex`.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tokio::sync::{Mutex, RwLock};

use crate::author::random_id;
use crate::error::{PadError, Result};
use crate::pad::{now_millis, Pad};
use crate::settings::Settings;
use crate::storage::{DataStore, GroupRecord, SessionRecord, StoreError};

static PAD_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(g\.[a-zA-Z0-9]{16}\$)?[^$]{1,50}$").expect("pad id pattern")
});

static READ_ONLY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^r\.[A-Za-z0-9]{16}$").expect("read-only id pattern"));

/// Shared handle to a loaded pad.
pub type PadHandle = Arc<Mutex<Pad>>;

/// Editable and read-only ids of one pad.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadIds {
    pub pad_id: String,
    pub read_only_pad_id: String,
    /// The id the caller presented was the read-only alias.
    pub readonly: bool,
}

pub fn is_valid_pad_id(id: &str) -> bool {
    PAD_ID.is_match(id)
}

pub fn is_read_only_id(id: &str) -> bool {
    READ_ONLY_ID.is_match(id)
}

pub struct PadManager {
    store: Arc<dyn DataStore>,
    settings: Arc<Settings>,
    pads: Arc<RwLock<HashMap<String, PadHandle>>>,
}

impl PadManager {
    pub fn new(store: Arc<dyn DataStore>, settings: Arc<Settings>) -> Self {
        Self {
            store,
            settings,
            pads: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Replace whitespace and `:` with `_`, then validate.
    pub fn sanitize_pad_id(id: &str) -> Result<String> {
        let sanitized: String = id
            .trim()
            .chars()
            .map(|c| if c.is_whitespace() || c == ':' { '_' } else { c })
            .collect();
        if is_valid_pad_id(&sanitized) {
            Ok(sanitized)
        } else {
            Err(PadError::InvalidPadId(id.to_string()))
        }
    }

    /// Get a cached pad, loading it from the store or creating it with
    /// `text` when it does not exist yet.
    pub async fn get_pad(
        &self,
        id: &str,
        text: Option<&str>,
        author: Option<&str>,
    ) -> Result<PadHandle> {
        if !is_valid_pad_id(id) {
            return Err(PadError::InvalidPadId(id.to_string()));
        }

        // Fast path: read lock
        {
            let pads = self.pads.read().await;
            if let Some(pad) = pads.get(id) {
                return Ok(pad.clone());
            }
        }

        // Slow path: write lock to load
        let mut pads = self.pads.write().await;
        if let Some(pad) = pads.get(id) {
            return Ok(pad.clone());
        }
        let pad = Pad::load_or_create(
            id,
            self.store.clone(),
            self.settings.clone(),
            text,
            author,
        )?;
        let handle = Arc::new(Mutex::new(pad));
        pads.insert(id.to_string(), handle.clone());
        Ok(handle)
    }

    /// Like [`get_pad`](Self::get_pad) but fails with `PadExists`.
    pub async fn create_pad(
        &self,
        id: &str,
        text: Option<&str>,
        author: Option<&str>,
    ) -> Result<PadHandle> {
        if self.does_pad_exist(id).await? {
            return Err(PadError::PadExists(id.to_string()));
        }
        self.get_pad(id, text, author).await
    }

    /// Existing pads only; never creates.
    pub async fn get_existing_pad(&self, id: &str) -> Result<PadHandle> {
        if !self.does_pad_exist(id).await? {
            return Err(PadError::PadNotFound(id.to_string()));
        }
        self.get_pad(id, None, None).await
    }

    pub async fn does_pad_exist(&self, id: &str) -> Result<bool> {
        if !is_valid_pad_id(id) {
            return Ok(false);
        }
        if self.pads.read().await.contains_key(id) {
            return Ok(true);
        }
        Ok(self.store.does_pad_exist(id)?)
    }

    /// Ids of every stored pad, sorted.
    pub fn list_pad_ids(&self) -> Result<Vec<String>> {
        let mut ids = self.store.list_pad_ids()?;
        ids.sort();
        Ok(ids)
    }

    /// Evict from the cache; the next access reloads from the store.
    pub async fn unload(&self, id: &str) -> bool {
        self.pads.write().await.remove(id).is_some()
    }

    pub async fn loaded_count(&self) -> usize {
        self.pads.read().await.len()
    }

    /// Delete the pad with its history and evict it. Returns the authors
    /// that had contributed to it.
    pub async fn remove_pad(&self, id: &str) -> Result<Vec<String>> {
        let handle = self.get_existing_pad(id).await?;
        let mut pad = handle.lock().await;
        let authors = pad.get_all_authors();
        pad.remove()?;
        if let Some(group_id) = group_of(id) {
            self.update_group(group_id, |g| {
                g.pad_ids.remove(id);
            })?;
        }
        self.unload(id).await;
        Ok(authors)
    }

    // ─── Read-only aliases ────────────────────────────────────────────

    /// The `r.<16>` alias of a pad, allocated on first use.
    pub async fn get_read_only_id(&self, pad_id: &str) -> Result<String> {
        let handle = self.get_pad(pad_id, None, None).await?;
        let mut pad = handle.lock().await;
        if let Some(id) = pad.read_only_id() {
            return Ok(id.to_string());
        }
        let read_only_id = match self.store.get_read_only_id(pad_id) {
            Ok(id) => id,
            Err(StoreError::NotFound(_)) => {
                let id = random_id("r.");
                self.store.save_read_only_id(pad_id, &id)?;
                id
            }
            Err(e) => return Err(e.into()),
        };
        pad.set_read_only_id(&read_only_id)?;
        Ok(read_only_id)
    }

    pub fn get_pad_id_for_read_only(&self, read_only_id: &str) -> Result<String> {
        if !is_read_only_id(read_only_id) {
            return Err(PadError::InvalidReadOnlyId(read_only_id.to_string()));
        }
        match self.store.get_pad_id_for_read_only(read_only_id) {
            Ok(id) => Ok(id),
            Err(StoreError::NotFound(_)) => Err(PadError::PadNotFound(read_only_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve either kind of id into both.
    pub async fn get_ids(&self, id: &str) -> Result<PadIds> {
        if id.starts_with("r.") {
            let pad_id = self.get_pad_id_for_read_only(id)?;
            return Ok(PadIds {
                pad_id,
                read_only_pad_id: id.to_string(),
                readonly: true,
            });
        }
        let pad_id = Self::sanitize_pad_id(id)?;
        let read_only_pad_id = self.get_read_only_id(&pad_id).await?;
        Ok(PadIds {
            pad_id,
            read_only_pad_id,
            readonly: false,
        })
    }

    // ─── Groups and API sessions ──────────────────────────────────────

    pub fn create_group(&self) -> Result<String> {
        let group = GroupRecord {
            id: random_id("g."),
            ..Default::default()
        };
        self.store.save_group(&group)?;
        Ok(group.id)
    }

    /// Create `<group>$<name>` inside an existing group.
    pub async fn create_group_pad(
        &self,
        group_id: &str,
        name: &str,
        text: Option<&str>,
    ) -> Result<String> {
        let pad_id = format!("{group_id}${name}");
        if !is_valid_pad_id(&pad_id) {
            return Err(PadError::InvalidPadId(pad_id));
        }
        self.store.get_group(group_id)?;
        self.create_pad(&pad_id, text, None).await?;
        self.update_group(group_id, |g| {
            g.pad_ids.insert(pad_id.clone());
        })?;
        Ok(pad_id)
    }

    pub fn list_group_pads(&self, group_id: &str) -> Result<Vec<String>> {
        Ok(self.store.get_group(group_id)?.pad_ids.into_iter().collect())
    }

    /// Remove the group together with all of its pads.
    pub async fn delete_group(&self, group_id: &str) -> Result<()> {
        for pad_id in self.list_group_pads(group_id)? {
            self.remove_pad(&pad_id).await?;
        }
        self.store.remove_group(group_id)?;
        Ok(())
    }

    /// Grant `author_id` access to a group's pads until `valid_until`
    /// (seconds since the epoch).
    pub fn create_session(&self, group_id: &str, author_id: &str, valid_until: i64) -> Result<String> {
        self.store.get_group(group_id)?;
        let session = SessionRecord {
            id: random_id("s."),
            group_id: group_id.to_string(),
            author_id: author_id.to_string(),
            valid_until,
        };
        self.store.save_session(&session)?;
        Ok(session.id)
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        Ok(self.store.remove_session(session_id)?)
    }

    /// True when one of `session_ids` is live and grants `author_id`
    /// access to the group owning `pad_id`. Pads outside groups are open.
    pub fn session_grants_access(&self, pad_id: &str, author_id: &str, session_ids: &[String]) -> bool {
        let Some(group_id) = group_of(pad_id) else {
            return true;
        };
        let now = now_millis() / 1000;
        session_ids.iter().any(|sid| match self.store.get_session(sid) {
            Ok(s) => s.group_id == group_id && s.author_id == author_id && s.valid_until > now,
            Err(_) => false,
        })
    }

    fn update_group(&self, group_id: &str, f: impl FnOnce(&mut GroupRecord)) -> Result<()> {
        let mut group = self.store.get_group(group_id)?;
        f(&mut group);
        self.store.save_group(&group)?;
        Ok(())
    }
}

/// `g.xxx` for a group pad id `g.xxx$name`.
fn group_of(pad_id: &str) -> Option<&str> {
    pad_id
        .split_once('$')
        .map(|(group, _)| group)
        .filter(|g| g.starts_with("g."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDataStore;

    fn manager() -> PadManager {
        PadManager::new(
            Arc::new(MemoryDataStore::new()),
            Arc::new(Settings::for_testing()),
        )
    }

    #[test]
    fn test_pad_id_validation() {
        assert!(is_valid_pad_id("notes"));
        assert!(is_valid_pad_id("g.abcdefghABCDEFGH$notes"));
        assert!(!is_valid_pad_id(""));
        assert!(!is_valid_pad_id("a$b"));
        assert!(!is_valid_pad_id(&"x".repeat(51)));
        assert!(is_read_only_id("r.0123456789abcdef"));
        assert!(!is_read_only_id("r.short"));
    }

    #[test]
    fn test_sanitize_pad_id() {
        assert_eq!(PadManager::sanitize_pad_id(" my pad:1 ").unwrap(), "my_pad_1");
        assert!(matches!(
            PadManager::sanitize_pad_id("a$b$c"),
            Err(PadError::InvalidPadId(_))
        ));
    }

    #[tokio::test]
    async fn test_get_pad_caches() {
        let pads = manager();
        let a = pads.get_pad("p", Some("hi"), None).await.unwrap();
        let b = pads.get_pad("p", Some("ignored"), None).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.lock().await.text(), "hi\n");
        assert_eq!(pads.loaded_count().await, 1);
    }

    #[tokio::test]
    async fn test_unload_and_reload() {
        let pads = manager();
        {
            let handle = pads.get_pad("p", Some("a"), None).await.unwrap();
            handle.lock().await.append_text("b", None).unwrap();
        }
        assert!(pads.unload("p").await);
        let handle = pads.get_pad("p", None, None).await.unwrap();
        let pad = handle.lock().await;
        assert_eq!(pad.head(), 1);
        assert_eq!(pad.text(), "ab\n");
    }

    #[tokio::test]
    async fn test_create_and_remove() {
        let pads = manager();
        pads.create_pad("p", None, Some("a.1")).await.unwrap();
        assert!(matches!(
            pads.create_pad("p", None, None).await,
            Err(PadError::PadExists(_))
        ));
        assert_eq!(pads.list_pad_ids().unwrap(), vec!["p"]);

        let authors = pads.remove_pad("p").await.unwrap();
        assert_eq!(authors, vec!["a.1"]);
        assert!(!pads.does_pad_exist("p").await.unwrap());
        assert!(matches!(
            pads.get_existing_pad("p").await,
            Err(PadError::PadNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_stale_handle_cannot_revive_removed_pad() {
        let pads = manager();
        let handle = pads.get_pad("p", Some("seed"), Some("a.1")).await.unwrap();
        handle.lock().await.append_text("x", Some("a.1")).unwrap();

        pads.remove_pad("p").await.unwrap();

        // A commit queued behind the delete still holds the old handle
        let mut pad = handle.lock().await;
        assert!(matches!(pad.append_text("late", Some("a.1")), Err(PadError::PadNotFound(_))));
        assert!(matches!(
            pad.append_chat_message("late", Some("a.1"), 1),
            Err(PadError::PadNotFound(_))
        ));
        drop(pad);

        assert!(!pads.does_pad_exist("p").await.unwrap());
        assert!(pads.store().get_revision("p", 0).is_err());
        assert!(pads.list_pad_ids().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_only_ids() {
        let pads = manager();
        let ids = pads.get_ids("p").await.unwrap();
        assert!(!ids.readonly);
        assert!(is_read_only_id(&ids.read_only_pad_id));

        let again = pads.get_ids("p").await.unwrap();
        assert_eq!(again.read_only_pad_id, ids.read_only_pad_id);

        let alias = pads.get_ids(&ids.read_only_pad_id).await.unwrap();
        assert!(alias.readonly);
        assert_eq!(alias.pad_id, "p");

        assert!(matches!(
            pads.get_ids("r.AAAAAAAAAAAAAAAA").await,
            Err(PadError::PadNotFound(_))
        ));
        assert!(matches!(
            pads.get_ids("r.bad").await,
            Err(PadError::InvalidReadOnlyId(_))
        ));
    }

    #[tokio::test]
    async fn test_groups_and_sessions() {
        let pads = manager();
        let group = pads.create_group().unwrap();
        let pad_id = pads.create_group_pad(&group, "plan", Some("x")).await.unwrap();
        assert_eq!(pad_id, format!("{group}$plan"));
        assert_eq!(pads.list_group_pads(&group).unwrap(), vec![pad_id.clone()]);

        let far_future = now_millis() / 1000 + 3600;
        let session = pads.create_session(&group, "a.1", far_future).unwrap();
        assert!(pads.session_grants_access(&pad_id, "a.1", &[session.clone()]));
        assert!(!pads.session_grants_access(&pad_id, "a.2", &[session.clone()]));
        assert!(pads.session_grants_access("open", "a.2", &[]));
        pads.delete_session(&session).unwrap();
        assert!(!pads.session_grants_access(&pad_id, "a.1", &[session]));

        pads.delete_group(&group).await.unwrap();
        assert!(!pads.does_pad_exist(&pad_id).await.unwrap());
        assert!(pads.list_group_pads(&group).is_err());
    }
}
