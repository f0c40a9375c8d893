//! Engine settings threaded through the pad manager and message handler.

use serde::Deserialize;

pub const DEFAULT_PAD_TEXT: &str = "Welcome to scribe!\n\n\
This pad text is synchronized as you type, so that everyone viewing this page sees the same text.\n";

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Settings {
    /// Text of a pad created without explicit content.
    pub default_pad_text: String,
    /// Ceiling on the initial text of a new pad, in chars.
    pub max_pad_text_len: usize,
    /// Ceiling on the char bank of a composed CHANGESET_REQ range.
    pub max_changeset_bank: usize,
    /// Most chat messages returned by one GET_CHAT_MESSAGES.
    pub max_chat_page: usize,
    /// Ceiling on a single chat message, in chars.
    pub max_text_len: usize,
    /// Every n-th revision stores a pool snapshot.
    pub key_revision_interval: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_pad_text: DEFAULT_PAD_TEXT.to_string(),
            max_pad_text_len: 100_000,
            max_changeset_bank: 1024 * 1024,
            max_chat_page: 100,
            max_text_len: 10_000,
            key_revision_interval: 100,
        }
    }
}

impl Settings {
    /// Small limits and an empty default text.
    pub fn for_testing() -> Self {
        Self {
            default_pad_text: String::new(),
            max_pad_text_len: 1_000,
            max_changeset_bank: 4 * 1024,
            max_chat_page: 10,
            max_text_len: 200,
            key_revision_interval: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_default() {
        let s = Settings::default();
        assert_eq!(s.max_pad_text_len, 100_000);
        assert_eq!(s.max_chat_page, 100);
        assert_eq!(s.key_revision_interval, 100);
        assert!(s.default_pad_text.ends_with('\n'));
    }

    #[test]
    fn test_settings_partial_json() {
        let s: Settings = serde_json::from_str(r#"{"maxChatPage": 25, "defaultPadText": "hi"}"#).unwrap();
        assert_eq!(s.max_chat_page, 25);
        assert_eq!(s.default_pad_text, "hi");
        assert_eq!(s.max_changeset_bank, 1024 * 1024);
    }
}
