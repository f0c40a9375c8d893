//! RocksDB-backed [`DataStore`].
//!
//! Column families:
//! - `pads`      — pad head records, keyed by pad id
//! - `revisions` — revision records, keyed by `<padId>:<rev u64 BE>`
//! - `chats`     — chat messages, keyed by `<padId>:<seq u64 BE>`
//! - `authors`   — author records
//! - `tokens`    — token → author id
//! - `readonly`  — `pad2readonly:<id>` and `readonly2pad:<id>` rows
//! - `sessions`  — API sessions
//! - `groups`    — groups and their pads
//!
//! Values are bincode (serde mode). The atext inside a revision record is
//! additionally LZ4-compressed since it carries the whole document.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    Direction, IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use scribe_core::{AText, AttributePool};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{
    AuthorRecord, ChatMessage, DataStore, GroupRecord, PadRecord, RevisionRecord, SessionRecord,
    StoreError,
};

const CF_PADS: &str = "pads";
const CF_REVISIONS: &str = "revisions";
const CF_CHATS: &str = "chats";
const CF_AUTHORS: &str = "authors";
const CF_TOKENS: &str = "tokens";
const CF_READONLY: &str = "readonly";
const CF_SESSIONS: &str = "sessions";
const CF_GROUPS: &str = "groups";

const COLUMN_FAMILIES: &[&str] = &[
    CF_PADS,
    CF_REVISIONS,
    CF_CHATS,
    CF_AUTHORS,
    CF_TOKENS,
    CF_READONLY,
    CF_SESSIONS,
    CF_GROUPS,
];

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync on every write
    pub sync_writes: bool,
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 32MB)
    pub write_buffer_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("scribe_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 512,
            write_buffer_size: 32 * 1024 * 1024,
        }
    }
}

impl StoreConfig {
    /// Small caches for tests.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// On-disk shape of a revision: the atext travels compressed.
#[derive(Serialize, Deserialize)]
struct StoredRevision {
    rev: u64,
    changeset: String,
    atext_lz4: Vec<u8>,
    pool: Option<AttributePool>,
    author: Option<String>,
    timestamp: i64,
}

impl StoredRevision {
    fn pack(record: &RevisionRecord) -> Result<Self, StoreError> {
        let atext = encode(&record.atext)?;
        Ok(Self {
            rev: record.rev,
            changeset: record.changeset.clone(),
            atext_lz4: lz4_flex::compress_prepend_size(&atext),
            pool: record.pool.clone(),
            author: record.author.clone(),
            timestamp: record.timestamp,
        })
    }

    fn unpack(self) -> Result<RevisionRecord, StoreError> {
        let atext = lz4_flex::decompress_size_prepended(&self.atext_lz4)
            .map_err(|e| StoreError::Compression(e.to_string()))?;
        Ok(RevisionRecord {
            rev: self.rev,
            changeset: self.changeset,
            atext: decode::<AText>(&atext)?,
            pool: self.pool,
            author: self.author,
            timestamp: self.timestamp,
        })
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

fn seq_prefix(pad_id: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(pad_id.len() + 9);
    key.extend_from_slice(pad_id.as_bytes());
    key.push(b':');
    key
}

/// `<padId>:<n u64 BE>`; sorts revisions and chat in numeric order.
fn seq_key(pad_id: &str, n: u64) -> Vec<u8> {
    let mut key = seq_prefix(pad_id);
    key.extend_from_slice(&n.to_be_bytes());
    key
}

pub struct RocksDataStore {
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Serializes the check-then-put of write-once inserts.
    write_once: Mutex<()>,
}

impl RocksDataStore {
    /// Open the store, creating the database and column families if needed.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Opened RocksDB store at {}", config.path.display());

        Ok(Self {
            db,
            config,
            write_once: Mutex::new(()),
        })
    }

    fn cf_options(name: &str, config: &StoreConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_compression_type(DBCompressionType::Lz4);
        opts.set_write_buffer_size(config.write_buffer_size);

        match name {
            CF_REVISIONS | CF_CHATS => {
                // Append-heavy, prefix-scanned by pad id
                opts.set_max_write_buffer_number(4);
            }
            _ => {
                opts.set_max_write_buffer_number(2);
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
        }
        opts
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Flush memtables to disk.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }

    fn write_opts(&self) -> WriteOptions {
        let mut opts = WriteOptions::default();
        opts.set_sync(self.config.sync_writes);
        opts
    }

    fn put<T: Serialize>(&self, cf: &str, key: &[u8], value: &T) -> Result<(), StoreError> {
        let cf = self.cf(cf)?;
        self.db.put_cf_opt(cf, key, encode(value)?, &self.write_opts())?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8], label: &str) -> Result<T, StoreError> {
        let cf = self.cf(cf_name)?;
        match self.db.get_cf(cf, key)? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(format!(
                "{cf_name}:{}",
                String::from_utf8_lossy(label.as_bytes())
            ))),
        }
    }

    fn delete(&self, cf: &str, key: &[u8]) -> Result<(), StoreError> {
        let cf = self.cf(cf)?;
        self.db.delete_cf_opt(cf, key, &self.write_opts())?;
        Ok(())
    }

    /// Insert unless the key is already present.
    fn put_once(&self, cf_name: &str, key: &[u8], value: Vec<u8>) -> Result<(), StoreError> {
        let cf = self.cf(cf_name)?;
        let _guard = self.write_once.lock();
        if self.db.get_cf(cf, key)?.is_some() {
            log::debug!("Ignoring duplicate write-once insert into {cf_name}");
            return Ok(());
        }
        self.db.put_cf_opt(cf, key, value, &self.write_opts())?;
        Ok(())
    }

    /// Values stored under `<padId>:<n>` with `start <= n <= end`.
    fn scan_seq(&self, cf_name: &str, pad_id: &str, start: u64, end: u64) -> Result<Vec<(u64, Vec<u8>)>, StoreError> {
        let cf = self.cf(cf_name)?;
        let prefix = seq_prefix(pad_id);
        let start_key = seq_key(pad_id, start);
        let mut out = Vec::new();

        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start_key, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            // A longer id sharing the prefix, such as "p:x" for "p"
            if key.len() != prefix.len() + 8 {
                continue;
            }
            let mut n_buf = [0u8; 8];
            n_buf.copy_from_slice(&key[prefix.len()..]);
            let n = u64::from_be_bytes(n_buf);
            if n > end {
                break;
            }
            out.push((n, value.to_vec()));
        }
        Ok(out)
    }

    fn delete_seq(&self, cf_name: &str, pad_id: &str) -> Result<(), StoreError> {
        let cf = self.cf(cf_name)?;
        let mut batch = WriteBatch::default();
        for (n, _) in self.scan_seq(cf_name, pad_id, 0, u64::MAX)? {
            batch.delete_cf(cf, seq_key(pad_id, n));
        }
        self.db.write_opt(batch, &self.write_opts())?;
        Ok(())
    }
}

impl DataStore for RocksDataStore {
    fn get_pad(&self, pad_id: &str) -> Result<PadRecord, StoreError> {
        self.get(CF_PADS, pad_id.as_bytes(), pad_id)
    }

    fn create_pad(&self, pad_id: &str, record: &PadRecord) -> Result<(), StoreError> {
        self.put(CF_PADS, pad_id.as_bytes(), record)
    }

    fn does_pad_exist(&self, pad_id: &str) -> Result<bool, StoreError> {
        let cf = self.cf(CF_PADS)?;
        Ok(self.db.get_cf(cf, pad_id.as_bytes())?.is_some())
    }

    fn remove_pad(&self, pad_id: &str) -> Result<(), StoreError> {
        self.delete(CF_PADS, pad_id.as_bytes())
    }

    fn list_pad_ids(&self) -> Result<Vec<String>, StoreError> {
        let cf = self.cf(CF_PADS)?;
        let mut ids = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, _) = item?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| StoreError::Deserialization(e.to_string()))?;
            ids.push(id);
        }
        Ok(ids)
    }

    fn save_revision(&self, pad_id: &str, record: &RevisionRecord) -> Result<(), StoreError> {
        let value = encode(&StoredRevision::pack(record)?)?;
        self.put_once(CF_REVISIONS, &seq_key(pad_id, record.rev), value)
    }

    fn get_revision(&self, pad_id: &str, rev: u64) -> Result<RevisionRecord, StoreError> {
        let stored: StoredRevision =
            self.get(CF_REVISIONS, &seq_key(pad_id, rev), &format!("{pad_id}:{rev}"))?;
        stored.unpack()
    }

    fn get_revisions(
        &self,
        pad_id: &str,
        start: u64,
        end: u64,
    ) -> Result<Vec<RevisionRecord>, StoreError> {
        let rows = self.scan_seq(CF_REVISIONS, pad_id, start, end)?;
        let mut out = Vec::with_capacity(rows.len());
        for (expected, (rev, bytes)) in (start..=end).zip(rows) {
            if rev != expected {
                return Err(StoreError::NotFound(format!("revisions:{pad_id}:{expected}")));
            }
            out.push(decode::<StoredRevision>(&bytes)?.unpack()?);
        }
        let wanted = end.saturating_sub(start) + 1;
        if start > end || out.len() as u64 != wanted {
            return Err(StoreError::NotFound(format!(
                "revisions:{pad_id}:{}",
                start + out.len() as u64
            )));
        }
        Ok(out)
    }

    fn remove_revisions_of_pad(&self, pad_id: &str) -> Result<(), StoreError> {
        self.delete_seq(CF_REVISIONS, pad_id)
    }

    fn save_chat_message(&self, pad_id: &str, message: &ChatMessage) -> Result<(), StoreError> {
        self.put_once(CF_CHATS, &seq_key(pad_id, message.seq), encode(message)?)
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
        self.scan_seq(CF_CHATS, pad_id, start, end)?
            .into_iter()
            .map(|(_, bytes)| decode(&bytes))
            .collect()
    }

    fn remove_chat(&self, pad_id: &str) -> Result<(), StoreError> {
        self.delete_seq(CF_CHATS, pad_id)
    }

    fn save_author(&self, author: &AuthorRecord) -> Result<(), StoreError> {
        self.put(CF_AUTHORS, author.id.as_bytes(), author)
    }

    fn get_author(&self, author_id: &str) -> Result<AuthorRecord, StoreError> {
        self.get(CF_AUTHORS, author_id.as_bytes(), author_id)
    }

    fn get_author_for_token(&self, token: &str) -> Result<String, StoreError> {
        self.get(CF_TOKENS, token.as_bytes(), token)
    }

    fn set_author_for_token(&self, token: &str, author_id: &str) -> Result<(), StoreError> {
        self.put(CF_TOKENS, token.as_bytes(), &author_id.to_string())
    }

    fn save_read_only_id(&self, pad_id: &str, read_only_id: &str) -> Result<(), StoreError> {
        let cf = self.cf(CF_READONLY)?;
        let mut batch = WriteBatch::default();
        batch.put_cf(cf, format!("pad2readonly:{pad_id}"), encode(&read_only_id.to_string())?);
        batch.put_cf(cf, format!("readonly2pad:{read_only_id}"), encode(&pad_id.to_string())?);
        self.db.write_opt(batch, &self.write_opts())?;
        Ok(())
    }

    fn get_read_only_id(&self, pad_id: &str) -> Result<String, StoreError> {
        let key = format!("pad2readonly:{pad_id}");
        self.get(CF_READONLY, key.as_bytes(), &key)
    }

    fn get_pad_id_for_read_only(&self, read_only_id: &str) -> Result<String, StoreError> {
        let key = format!("readonly2pad:{read_only_id}");
        self.get(CF_READONLY, key.as_bytes(), &key)
    }

    fn remove_read_only_id(&self, pad_id: &str) -> Result<(), StoreError> {
        let read_only_id = match self.get_read_only_id(pad_id) {
            Ok(id) => id,
            Err(StoreError::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let cf = self.cf(CF_READONLY)?;
        let mut batch = WriteBatch::default();
        batch.delete_cf(cf, format!("pad2readonly:{pad_id}"));
        batch.delete_cf(cf, format!("readonly2pad:{read_only_id}"));
        self.db.write_opt(batch, &self.write_opts())?;
        Ok(())
    }

    fn save_session(&self, session: &SessionRecord) -> Result<(), StoreError> {
        self.put(CF_SESSIONS, session.id.as_bytes(), session)
    }

    fn get_session(&self, session_id: &str) -> Result<SessionRecord, StoreError> {
        self.get(CF_SESSIONS, session_id.as_bytes(), session_id)
    }

    fn remove_session(&self, session_id: &str) -> Result<(), StoreError> {
        self.delete(CF_SESSIONS, session_id.as_bytes())
    }

    fn save_group(&self, group: &GroupRecord) -> Result<(), StoreError> {
        self.put(CF_GROUPS, group.id.as_bytes(), group)
    }

    fn get_group(&self, group_id: &str) -> Result<GroupRecord, StoreError> {
        self.get(CF_GROUPS, group_id.as_bytes(), group_id)
    }

    fn remove_group(&self, group_id: &str) -> Result<(), StoreError> {
        self.delete(CF_GROUPS, group_id.as_bytes())
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn open_temp() -> (tempfile::TempDir, RocksDataStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = RocksDataStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();
        (dir, store)
    }

    fn revision(rev: u64) -> RevisionRecord {
        RevisionRecord {
            rev,
            changeset: format!("Z:1>{}+{}${}", rev, rev, "x".repeat(rev as usize)),
            atext: AText::new(format!("{}\n", "x".repeat(rev as usize)), None),
            pool: (rev == 0).then(AttributePool::new),
            author: Some("a.rocks".into()),
            timestamp: rev as i64,
        }
    }

    #[test]
    fn test_store_open() {
        let (_dir, store) = open_temp();
        assert!(store.path().exists());
        assert!(store.list_pad_ids().unwrap().is_empty());
    }

    #[test]
    fn test_pad_record_roundtrip() {
        let (_dir, store) = open_temp();
        let record = PadRecord {
            head: 3,
            atext: AText::new("hello\n", None),
            pool: AttributePool::new(),
            chat_head: -1,
            saved_revisions: BTreeSet::from([1, 3]),
            read_only_id: None,
            public_status: false,
        };
        store.create_pad("p", &record).unwrap();
        assert_eq!(store.get_pad("p").unwrap(), record);
        assert!(store.does_pad_exist("p").unwrap());
        store.remove_pad("p").unwrap();
        assert!(matches!(store.get_pad("p"), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_revisions_write_once_and_ordered() {
        let (_dir, store) = open_temp();
        for rev in (0..12).rev() {
            store.save_revision("p", &revision(rev)).unwrap();
        }
        let mut dup = revision(2);
        dup.changeset = "Z:1>0$".into();
        store.save_revision("p", &dup).unwrap();

        let revs = store.get_revisions("p", 0, 11).unwrap();
        assert_eq!(revs.len(), 12);
        assert_eq!(revs[2], revision(2));
        assert!(revs.windows(2).all(|w| w[0].rev + 1 == w[1].rev));
        assert!(store.get_revisions("p", 10, 12).is_err());
    }

    #[test]
    fn test_prefix_isolation() {
        let (_dir, store) = open_temp();
        store.save_revision("p", &revision(0)).unwrap();
        store.save_revision("p:x", &revision(0)).unwrap();
        store.save_revision("p:x", &revision(1)).unwrap();
        store.remove_revisions_of_pad("p").unwrap();
        assert!(store.get_revision("p", 0).is_err());
        assert_eq!(store.get_revisions("p:x", 0, 1).unwrap().len(), 2);
    }

    #[test]
    fn test_chat_and_aliases() {
        let (_dir, store) = open_temp();
        for seq in 0..5 {
            let msg = ChatMessage {
                seq,
                text: format!("hi {seq}"),
                author: None,
                timestamp: 0,
            };
            store.save_chat_message("p", &msg).unwrap();
        }
        let page = store.get_chats_of_pad("p", 1, 3).unwrap();
        assert_eq!(page.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![1, 2, 3]);
        store.remove_chat("p").unwrap();
        assert!(store.get_chats_of_pad("p", 0, 10).unwrap().is_empty());

        store.save_read_only_id("p", "r.aaaaaaaaaaaaaaaa").unwrap();
        assert_eq!(store.get_pad_id_for_read_only("r.aaaaaaaaaaaaaaaa").unwrap(), "p");
        store.remove_read_only_id("p").unwrap();
        assert!(store.get_pad_id_for_read_only("r.aaaaaaaaaaaaaaaa").is_err());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let store = RocksDataStore::open(StoreConfig::for_testing(&path)).unwrap();
            store.save_revision("p", &revision(0)).unwrap();
            store.set_author_for_token("t.1", "a.1").unwrap();
            store.sync().unwrap();
        }
        let store = RocksDataStore::open(StoreConfig::for_testing(&path)).unwrap();
        assert_eq!(store.get_revision("p", 0).unwrap(), revision(0));
        assert_eq!(store.get_author_for_token("t.1").unwrap(), "a.1");
    }
}
