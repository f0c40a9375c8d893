//! Scribe pad server binary.
//!
//! Reads an optional JSON settings file, applies command-line overrides,
//! and serves the pad protocol over WebSocket until killed.

use std::path::{Path, PathBuf};

use clap::Parser;
use scribe_collab::{PadServer, ServerConfig, Settings};
use serde::Deserialize;

/// Server command line arguments.
#[derive(Parser, Debug, Default)]
#[command(name = "scribe-server")]
#[command(author, version, about = "Real-time collaborative plain-text pad server")]
struct Args {
    /// JSON settings file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// RocksDB directory; in-memory when absent
    #[arg(long, value_name = "PATH")]
    storage: Option<PathBuf>,

    /// Connections allowed on one pad
    #[arg(long, value_name = "N")]
    max_sessions_per_pad: Option<usize>,

    /// Outbound messages buffered per connection
    #[arg(long, value_name = "N")]
    outbound_capacity: Option<usize>,
}

/// Settings file layout. Pad settings sit at the top level next to the
/// server keys.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FileConfig {
    bind_addr: Option<String>,
    max_sessions_per_pad: Option<usize>,
    outbound_capacity: Option<usize>,
    storage_path: Option<PathBuf>,
    #[serde(flatten)]
    settings: Settings,
}

fn load_file(path: &Path) -> Result<FileConfig, Box<dyn std::error::Error>> {
    let raw = std::fs::read_to_string(path)?;
    let file = serde_json::from_str(&raw)?;
    log::info!("Loaded settings from {}", path.display());
    Ok(file)
}

/// Defaults, then the settings file, then flags.
fn build_config(args: Args) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let file = match &args.config {
        Some(path) => load_file(path)?,
        None => FileConfig::default(),
    };
    let defaults = ServerConfig::default();
    Ok(ServerConfig {
        bind_addr: args.bind.or(file.bind_addr).unwrap_or(defaults.bind_addr),
        max_sessions_per_pad: args
            .max_sessions_per_pad
            .or(file.max_sessions_per_pad)
            .unwrap_or(defaults.max_sessions_per_pad),
        outbound_capacity: args
            .outbound_capacity
            .or(file.outbound_capacity)
            .unwrap_or(defaults.outbound_capacity),
        storage_path: args.storage.or(file.storage_path),
        settings: file.settings,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = build_config(Args::parse())?;
    log::info!(
        "Starting scribe-server on {} ({} storage)",
        config.bind_addr,
        if config.storage_path.is_some() { "rocksdb" } else { "in-memory" }
    );

    let server = PadServer::new(config)?;
    server.run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = build_config(Args::default()).unwrap();
        assert_eq!(config.bind_addr, ServerConfig::default().bind_addr);
        assert!(config.storage_path.is_none());
        assert_eq!(config.settings.max_chat_page, 100);
    }

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"bindAddr": "0.0.0.0:7000", "maxSessionsPerPad": 5, "maxChatPage": 25}"#,
        )
        .unwrap();

        let args = Args {
            config: Some(path),
            max_sessions_per_pad: Some(9),
            ..Args::default()
        };
        let config = build_config(args).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:7000");
        assert_eq!(config.max_sessions_per_pad, 9);
        assert_eq!(config.settings.max_chat_page, 25);
        assert_eq!(config.settings.max_pad_text_len, 100_000);
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ nope").unwrap();
        let args = Args {
            config: Some(path),
            ..Args::default()
        };
        assert!(build_config(args).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let args = Args::try_parse_from(["scribe-server", "-b", "127.0.0.1:1", "--storage", "/tmp/db"])
            .unwrap();
        assert_eq!(args.bind.as_deref(), Some("127.0.0.1:1"));
        assert_eq!(args.storage, Some(PathBuf::from("/tmp/db")));
    }
}
