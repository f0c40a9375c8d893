//! Authors: identity, display name and color, and the pads they touched.
//!
//! Browsers hold an opaque token; the first CLIENT_READY with an unknown
//! token mints a fresh `a.<16>` author and remembers the mapping.

use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{PadError, Result};
use crate::pad::now_millis;
use crate::storage::{AuthorRecord, DataStore, StoreError};

/// Colors handed out to new authors.
pub const COLOR_PALETTE: [&str; 64] = [
    "#ffc7c7", "#fff1c7", "#e3ffc7", "#c7ffd5", "#c7ffff", "#c7d5ff", "#e3c7ff", "#ffc7f1",
    "#ffa8a8", "#ffe699", "#cfff9e", "#99ffb3", "#a3ffff", "#99b3ff", "#cc99ff", "#ff99e5",
    "#e7b1b1", "#e9dcAf", "#cde9af", "#bfedcc", "#b1e7e7", "#c3cdee", "#d2b8ea", "#eec3e6",
    "#e9cece", "#e7e0ca", "#d3e5c7", "#bce1c5", "#c1e2e2", "#c1c9e2", "#cfc1e2", "#e0bdd9",
    "#baded3", "#a0f8eb", "#b1e7e0", "#c3c8e4", "#cec5e2", "#b1d5e7", "#cda8f0", "#f0f0a8",
    "#f2f2a6", "#f5a8eb", "#c5f9a9", "#ececbb", "#e7c4bc", "#daf0b2", "#b0a0fd", "#bce2e7",
    "#cce2bb", "#ec9afe", "#edabbd", "#aeaeea", "#c4e7b1", "#d722bb", "#f3a5e7", "#ffa8a8",
    "#d8c0c5", "#eaaedd", "#adc6eb", "#bedad1", "#dee9af", "#e9afc2", "#f8d2a0", "#b3b3e6",
];

/// `<prefix><16 random alphanumerics>`, used for author and alias ids.
pub(crate) fn random_id(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("{prefix}{suffix}")
}

pub struct AuthorManager {
    store: Arc<dyn DataStore>,
}

impl AuthorManager {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    /// Mint a new author with a random palette color.
    pub fn create_author(&self, name: Option<&str>) -> Result<AuthorRecord> {
        let index = rand::thread_rng().gen_range(0..COLOR_PALETTE.len());
        let author = AuthorRecord {
            id: random_id("a."),
            name: name.map(str::to_string),
            color: COLOR_PALETTE[index].to_string(),
            pad_ids: Default::default(),
            timestamp: now_millis(),
        };
        self.store.save_author(&author)?;
        log::debug!("Created author {}", author.id);
        Ok(author)
    }

    /// Resolve the author behind `token`, creating one on first sight.
    /// A given `name` overwrites the stored one.
    pub fn get_or_create_author_for_token(
        &self,
        token: &str,
        name: Option<&str>,
    ) -> Result<AuthorRecord> {
        match self.store.get_author_for_token(token) {
            Ok(author_id) => {
                let mut author = self.get_author(&author_id)?;
                if let Some(name) = name {
                    if author.name.as_deref() != Some(name) {
                        author.name = Some(name.to_string());
                        self.store.save_author(&author)?;
                    }
                }
                Ok(author)
            }
            Err(StoreError::NotFound(_)) => {
                let author = self.create_author(name)?;
                self.store.set_author_for_token(token, &author.id)?;
                Ok(author)
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_author(&self, author_id: &str) -> Result<AuthorRecord> {
        match self.store.get_author(author_id) {
            Ok(author) => Ok(author),
            Err(StoreError::NotFound(_)) => Err(PadError::AuthorNotFound(author_id.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_author_name(&self, author_id: &str, name: &str) -> Result<AuthorRecord> {
        self.update(author_id, |a| a.name = Some(name.to_string()))
    }

    /// `color` must already be validated by the caller.
    pub fn set_author_color(&self, author_id: &str, color: &str) -> Result<AuthorRecord> {
        self.update(author_id, |a| a.color = color.to_string())
    }

    /// Record that the author contributed to `pad_id`.
    pub fn add_pad(&self, author_id: &str, pad_id: &str) -> Result<()> {
        self.update(author_id, |a| {
            a.pad_ids.insert(pad_id.to_string());
        })?;
        Ok(())
    }

    pub fn remove_pad(&self, author_id: &str, pad_id: &str) -> Result<()> {
        self.update(author_id, |a| {
            a.pad_ids.remove(pad_id);
        })?;
        Ok(())
    }

    pub fn list_pads_of_author(&self, author_id: &str) -> Result<Vec<String>> {
        Ok(self.get_author(author_id)?.pad_ids.into_iter().collect())
    }

    fn update(&self, author_id: &str, f: impl FnOnce(&mut AuthorRecord)) -> Result<AuthorRecord> {
        let mut author = self.get_author(author_id)?;
        f(&mut author);
        self.store.save_author(&author)?;
        Ok(author)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryDataStore;

    fn manager() -> AuthorManager {
        AuthorManager::new(Arc::new(MemoryDataStore::new()))
    }

    #[test]
    fn test_create_author_shape() {
        let authors = manager();
        let author = authors.create_author(Some("Ada")).unwrap();
        assert!(author.id.starts_with("a."));
        assert_eq!(author.id.len(), 18);
        assert!(COLOR_PALETTE.contains(&author.color.as_str()));
        assert_eq!(authors.get_author(&author.id).unwrap().name.as_deref(), Some("Ada"));
    }

    #[test]
    fn test_token_maps_to_same_author() {
        let authors = manager();
        let first = authors.get_or_create_author_for_token("t.abc", None).unwrap();
        let second = authors
            .get_or_create_author_for_token("t.abc", Some("Grace"))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.name.as_deref(), Some("Grace"));

        let other = authors.get_or_create_author_for_token("t.xyz", None).unwrap();
        assert_ne!(first.id, other.id);
    }

    #[test]
    fn test_pad_membership() {
        let authors = manager();
        let author = authors.create_author(None).unwrap();
        authors.add_pad(&author.id, "p1").unwrap();
        authors.add_pad(&author.id, "p2").unwrap();
        authors.remove_pad(&author.id, "p1").unwrap();
        assert_eq!(authors.list_pads_of_author(&author.id).unwrap(), vec!["p2"]);
    }

    #[test]
    fn test_unknown_author() {
        let authors = manager();
        assert!(matches!(
            authors.set_author_color("a.missing", "#fff"),
            Err(PadError::AuthorNotFound(_))
        ));
    }
}
