use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::DEFAULT_STORAGE_PREFIX;
use crate::error::{StoreError, StoreResult};
use crate::lesson::LessonKey;
use crate::snapshot::WorkbookSnapshot;

/// String key/value storage shared by every view of the same origin.
pub trait StorageBackend: Send + Sync {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> StoreResult<()>;
    fn remove_item(&self, key: &str) -> StoreResult<()>;
}

impl<B: StorageBackend + ?Sized> StorageBackend for Arc<B> {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        (**self).set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        (**self).remove_item(key)
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    entries: Mutex<HashMap<String, String>>,
    quota: Option<usize>,
    disabled: AtomicBool,
}

/// In-process storage. Clones share the same entries, the way every tab of
/// one origin sees the same local storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<MemoryInner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage that rejects writes pushing the total size of keys and values
    /// past `bytes`.
    pub fn with_quota(bytes: usize) -> Self {
        MemoryStorage {
            inner: Arc::new(MemoryInner {
                quota: Some(bytes),
                ..MemoryInner::default()
            }),
        }
    }

    /// Turns every operation into [`StoreError::Unavailable`] while `true`.
    pub fn set_disabled(&self, disabled: bool) {
        self.inner.disabled.store(disabled, Ordering::SeqCst);
    }

    /// Raw entry access, bypassing the snapshot layer.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        // A writer that panicked mid-insert cannot leave a half-written String.
        self.inner
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_enabled(&self) -> StoreResult<()> {
        if self.inner.disabled.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_enabled()?;
        Ok(self.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_enabled()?;
        let mut entries = self.lock();
        if let Some(quota) = self.inner.quota {
            let others: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        self.check_enabled()?;
        self.lock().remove(key);
        Ok(())
    }
}

/// Directory-backed storage: one gzip-compressed file per key, named after
/// the percent-encoded key.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        info!("file storage at {}", dir.display());
        Ok(FileStorage { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json.gz", urlencoding::encode(key)))
    }
}

impl StorageBackend for FileStorage {
    fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        let file = match File::open(self.path_for(key)) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut reader = BufReader::new(GzDecoder::new(file));
        let mut raw = String::new();
        reader.read_to_string(&mut raw)?;
        Ok(Some(raw))
    }

    fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        // Write next to the target and rename, so readers never see a
        // truncated file.
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        {
            let encoder = GzEncoder::new(tmp.as_file(), Compression::default());
            let mut writer = BufWriter::new(encoder);
            writer.write_all(value.as_bytes())?;
            writer
                .into_inner()
                .map_err(|e| e.into_error())?
                .finish()?;
        }
        tmp.persist(self.path_for(key)).map_err(|e| e.error)?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> StoreResult<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Lesson-keyed snapshot persistence.
///
/// Storage is unreliable by nature (quotas, disabled storage, corrupt
/// entries), so no operation here fails the caller: saves report `false`,
/// loads report a miss, clears are best-effort.
#[derive(Debug, Clone)]
pub struct SnapshotStore<B> {
    backend: B,
    prefix: String,
}

impl<B: StorageBackend> SnapshotStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_prefix(backend, DEFAULT_STORAGE_PREFIX)
    }

    pub fn with_prefix(backend: B, prefix: impl Into<String>) -> Self {
        SnapshotStore {
            backend,
            prefix: prefix.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn storage_key(&self, lesson: &LessonKey) -> String {
        format!("{}{}", self.prefix, lesson)
    }

    pub fn save(&self, lesson: &LessonKey, snapshot: &WorkbookSnapshot) -> bool {
        let key = self.storage_key(lesson);
        let result = snapshot
            .to_json_string()
            .map_err(StoreError::from)
            .and_then(|json| self.backend.set_item(&key, &json));
        match result {
            Ok(()) => {
                debug!("saved snapshot for {:?} under {:?}", lesson.as_str(), key);
                true
            }
            Err(e) => {
                error!("failed to save snapshot for {:?}: {}", lesson.as_str(), e);
                false
            }
        }
    }

    pub fn load(&self, lesson: &LessonKey) -> Option<WorkbookSnapshot> {
        let key = self.storage_key(lesson);
        let raw = match self.backend.get_item(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("failed to load snapshot for {:?}: {}", lesson.as_str(), e);
                return None;
            }
        };
        match WorkbookSnapshot::from_json_str(&raw) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(
                    "ignoring corrupted snapshot for {:?}: {}",
                    lesson.as_str(),
                    e
                );
                None
            }
        }
    }

    pub fn clear(&self, lesson: &LessonKey) {
        if let Err(e) = self.backend.remove_item(&self.storage_key(lesson)) {
            debug!("could not clear snapshot for {:?}: {}", lesson.as_str(), e);
        }
    }
}
