//! Durable log store backed by a single append-only file
//!
//! Per STORE.md §3-§5: every log's records land in one file, `store.log`,
//! in global append order. An entry's record is written before the entry
//! becomes visible in memory, and a log's BIND record is written at the
//! moment its key is published, so replay can rebuild exactly the bound
//! logs. A record that tears off at the end of the file marks the crash
//! point and is cut away so later appends continue from the clean prefix;
//! damage anywhere else refuses to replay.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::errors::{StoreError, StoreResult};
use super::record::{StoreRecord, MIN_RECORD_SIZE};
use super::{LogStore, VersionLog};
use crate::history::{KeyHistory, LatestInfo, Lookup, Payload};
use crate::version::Version;

/// Name of the record file inside the store directory.
const STORE_LOG: &str = "store.log";

/// Durability tuning for [`FileStore`].
#[derive(Debug, Clone, Copy)]
pub struct FileStoreConfig {
    /// Fsync after every appended record. Disabling trades durability of
    /// the newest records for append throughput; a crash may then also
    /// leave damage beyond the tail, which replay refuses to skip.
    pub sync_on_append: bool,
}

impl FileStoreConfig {
    /// Fsync per append. The default.
    pub fn strict() -> Self {
        FileStoreConfig {
            sync_on_append: true,
        }
    }

    /// Let the OS schedule writeback.
    pub fn buffered() -> Self {
        FileStoreConfig {
            sync_on_append: false,
        }
    }
}

impl Default for FileStoreConfig {
    fn default() -> Self {
        Self::strict()
    }
}

/// Serialized writer over the record file.
#[derive(Debug)]
struct Appender {
    file: File,
    sync_on_append: bool,
}

impl Appender {
    fn append(&mut self, record: &StoreRecord) -> StoreResult<()> {
        let bytes = record.serialize();
        self.file
            .write_all(&bytes)
            .map_err(|e| StoreError::io("append", e))?;
        if self.sync_on_append {
            self.file
                .sync_all()
                .map_err(|e| StoreError::io("sync", e))?;
        }
        Ok(())
    }
}

/// A key's version log backed by the store's record file.
///
/// The durable record is written before the in-memory commit, so an entry
/// can be lost only with the tail of the file, never observed in memory
/// without a durable image (STORE.md §4).
#[derive(Debug)]
pub struct DurableLog<V> {
    id: u64,
    appender: Arc<Mutex<Appender>>,
    entries: KeyHistory<V>,
}

impl<V> DurableLog<V> {
    fn new(id: u64, appender: Arc<Mutex<Appender>>) -> Self {
        DurableLog {
            id,
            appender,
            entries: KeyHistory::new(),
        }
    }

    /// The store-assigned log handle.
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<V> VersionLog<V> for DurableLog<V>
where
    V: Clone + Serialize + Send + Sync,
{
    fn append(&self, version: Version, payload: Payload<V>) -> StoreResult<()> {
        let record = match &payload {
            Payload::Value(value) => {
                let bytes =
                    serde_json::to_vec(value).map_err(|e| StoreError::codec("value", e))?;
                StoreRecord::entry(self.id, version, bytes)
            }
            Payload::Tombstone => StoreRecord::tombstone(self.id, version),
        };
        {
            let mut appender = self
                .appender
                .lock()
                .map_err(|_| StoreError::Internal("appender lock poisoned".into()))?;
            appender.append(&record)?;
        }
        self.entries.append(version, payload);
        Ok(())
    }

    fn find(&self, asof: Version) -> Lookup<V> {
        self.entries.find(asof)
    }

    fn scan(&self) -> Vec<(Version, V)> {
        self.entries.scan()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn latest(&self) -> Option<LatestInfo> {
        self.entries.latest()
    }
}

/// Append-only durable backend.
#[derive(Debug)]
pub struct FileStore<K, V> {
    dir: PathBuf,
    appender: Arc<Mutex<Appender>>,
    next_log_id: AtomicU64,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> FileStore<K, V> {
    /// Opens or creates a store rooted at `dir` with default durability.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        Self::open_with(dir, FileStoreConfig::default())
    }

    /// Opens or creates a store rooted at `dir`.
    pub fn open_with(dir: impl AsRef<Path>, config: FileStoreConfig) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| StoreError::io("create store directory", e))?;
        let path = dir.join(STORE_LOG);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io("open store log", e))?;
        tracing::info!(path = %path.display(), sync_on_append = config.sync_on_append, "opened store log");
        Ok(FileStore {
            dir,
            appender: Arc::new(Mutex::new(Appender {
                file,
                sync_on_append: config.sync_on_append,
            })),
            next_log_id: AtomicU64::new(1),
            _marker: PhantomData,
        })
    }

    /// The directory the store was opened in.
    pub fn directory(&self) -> &Path {
        &self.dir
    }

    fn append_record(&self, record: &StoreRecord) -> StoreResult<()> {
        let mut appender = self
            .appender
            .lock()
            .map_err(|_| StoreError::Internal("appender lock poisoned".into()))?;
        appender.append(record)
    }
}

impl<K, V> LogStore<K, V> for FileStore<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    type Log = DurableLog<V>;

    fn allocate(&self) -> StoreResult<Arc<DurableLog<V>>> {
        let id = self.next_log_id.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(DurableLog::new(id, Arc::clone(&self.appender))))
    }

    fn deallocate(&self, log: &Arc<DurableLog<V>>, reclaim_only: bool) -> StoreResult<()> {
        if reclaim_only {
            return Ok(());
        }
        self.append_record(&StoreRecord::dealloc(log.id()))?;
        tracing::debug!(log_id = log.id(), "marked log abandoned");
        Ok(())
    }

    fn bind(&self, key: &K, log: &Arc<DurableLog<V>>) -> StoreResult<()> {
        let key_bytes = serde_json::to_vec(key).map_err(|e| StoreError::codec("key", e))?;
        self.append_record(&StoreRecord::bind(log.id(), key_bytes))
    }

    fn restore(&self, inserter: &mut dyn FnMut(K, Arc<DurableLog<V>>)) -> StoreResult<Version> {
        let path = self.dir.join(STORE_LOG);
        let file = File::open(&path).map_err(|e| StoreError::io("open store log for replay", e))?;
        let file_len = file
            .metadata()
            .map_err(|e| StoreError::io("stat store log", e))?
            .len();
        let mut reader = BufReader::new(file);
        let mut offset: u64 = 0;

        let mut logs: BTreeMap<u64, Arc<DurableLog<V>>> = BTreeMap::new();
        let mut bindings: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
        let mut watermark = Version::ZERO;
        let mut max_id = 0u64;
        let mut records = 0usize;

        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    if offset < file_len {
                        tracing::warn!(offset, "torn length prefix at store tail, truncating replay");
                    }
                    break;
                }
                Err(e) => return Err(StoreError::io("replay read", e)),
            }

            let record_len = u32::from_le_bytes(len_buf) as usize;
            // A crash shortens a record but never rewrites its length
            // prefix, so an impossible length is damage even at the tail.
            if record_len < MIN_RECORD_SIZE {
                return Err(StoreError::Corruption {
                    offset,
                    message: format!(
                        "record length {record_len} below minimum {MIN_RECORD_SIZE}"
                    ),
                });
            }
            let record_end = offset + record_len as u64;
            if record_end > file_len {
                tracing::warn!(offset, record_len, "torn record at store tail, truncating replay");
                break;
            }

            let mut record_buf = vec![0u8; record_len];
            record_buf[..4].copy_from_slice(&len_buf);
            reader
                .read_exact(&mut record_buf[4..])
                .map_err(|e| StoreError::io("replay read", e))?;

            let record = match StoreRecord::deserialize(&record_buf) {
                Ok((record, _consumed)) => record,
                Err(err) => {
                    // A final record failing verification at exactly the end
                    // of the file is the crash tail; anywhere else the image
                    // is damaged.
                    if record_end == file_len {
                        tracing::warn!(offset, "damaged record at store tail, truncating replay");
                        break;
                    }
                    return Err(rebase_corruption(err, offset));
                }
            };

            max_id = max_id.max(record.log_id());
            match record {
                StoreRecord::Bind { log_id, key } => {
                    logs.entry(log_id)
                        .or_insert_with(|| Arc::new(DurableLog::new(log_id, Arc::clone(&self.appender))));
                    bindings.insert(log_id, key);
                }
                StoreRecord::Entry {
                    log_id,
                    version,
                    tombstone,
                    value,
                } => {
                    let payload = if tombstone {
                        Payload::Tombstone
                    } else {
                        let value: V = serde_json::from_slice(&value)
                            .map_err(|e| StoreError::codec("value", e))?;
                        Payload::Value(value)
                    };
                    let log = logs.entry(log_id).or_insert_with(|| {
                        Arc::new(DurableLog::new(log_id, Arc::clone(&self.appender)))
                    });
                    log.entries.append(version, payload);
                    watermark = watermark.max(version);
                }
                StoreRecord::Dealloc { log_id } => {
                    logs.remove(&log_id);
                    bindings.remove(&log_id);
                }
            }
            records += 1;
            offset = record_end;
        }

        if offset < file_len {
            // The torn bytes must not sit between the clean prefix and the
            // next append, or the following replay would read them as a
            // damaged interior record.
            let appender = self
                .appender
                .lock()
                .map_err(|_| StoreError::Internal("appender lock poisoned".into()))?;
            appender
                .file
                .set_len(offset)
                .map_err(|e| StoreError::io("truncate torn tail", e))?;
            tracing::warn!(
                offset,
                discarded = file_len - offset,
                "cut torn tail from store log"
            );
        }

        let mut delivered = 0usize;
        for (log_id, key_bytes) in bindings {
            let Some(log) = logs.remove(&log_id) else {
                return Err(StoreError::InvalidHandle { id: log_id });
            };
            let key: K =
                serde_json::from_slice(&key_bytes).map_err(|e| StoreError::codec("key", e))?;
            inserter(key, log);
            delivered += 1;
        }
        if !logs.is_empty() {
            tracing::debug!(orphans = logs.len(), "dropped unbound logs during replay");
        }

        self.next_log_id.fetch_max(max_id + 1, Ordering::Relaxed);
        tracing::info!(records, delivered, watermark = %watermark, "store replay complete");
        Ok(watermark)
    }
}

fn rebase_corruption(err: StoreError, base: u64) -> StoreError {
    match err {
        StoreError::Corruption { offset, message } => StoreError::Corruption {
            offset: base + offset,
            message,
        },
        other => other,
    }
}
