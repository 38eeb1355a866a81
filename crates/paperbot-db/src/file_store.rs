//! File-backed seen-paper store.
//!
//! The seen set lives in one JSON document inside the cache folder:
//!
//! ```json
//! { "version": 1, "seen": { "2301.07041": "2026-10-18T09:00:00Z" } }
//! ```
//!
//! Commits rewrite the whole document through [`write_atomic`], so a crash
//! leaves either the previous or the next document on disk. The in-memory view
//! is swapped only after the rename succeeded, and the write runs on a
//! blocking task so dropping the awaiting future cannot split disk and memory.
//!
//! One process per file. Concurrent writers from different processes are not
//! detected and will lose updates.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use paperbot_core::defaults::SEEN_FILE_NAME;
use paperbot_core::{Error, PaperId, Result, SeenPaperStore, SeenSet};

use crate::atomic::write_atomic;

/// On-disk format version.
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SeenDocument {
    version: u32,
    seen: SeenSet,
}

/// Seen-paper store persisted as a JSON document.
#[derive(Clone)]
pub struct FileSeenStore {
    path: PathBuf,
    state: Arc<RwLock<SeenSet>>,
    commit_lock: Arc<Mutex<()>>,
}

impl FileSeenStore {
    /// Open the store at `path`, loading existing state.
    ///
    /// A missing file is an empty store. An unreadable or corrupt file is
    /// `StoreUnavailable`: treating it as empty would re-announce every paper.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let seen = read_document(&path).await?;

        info!(
            subsystem = "store",
            component = "file_store",
            op = "open",
            path = %path.display(),
            seen = seen.len(),
            "Seen-paper store opened"
        );

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(seen)),
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Open `seen.json` inside `cache_folder`.
    pub async fn open_in(cache_folder: impl AsRef<Path>) -> Result<Self> {
        Self::open(cache_folder.as_ref().join(SEEN_FILE_NAME)).await
    }

    /// Location of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn snapshot(&self) -> Result<SeenSet> {
        self.state
            .read()
            .map(|s| s.clone())
            .map_err(|_| Error::Internal("seen-set lock poisoned".to_string()))
    }
}

async fn read_document(path: &Path) -> Result<SeenSet> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "No seen-paper document yet, starting empty");
            return Ok(SeenSet::new());
        }
        Err(e) => {
            return Err(Error::StoreUnavailable(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };

    let doc: SeenDocument = serde_json::from_slice(&bytes).map_err(|e| {
        Error::StoreUnavailable(format!("Corrupt seen-paper document {}: {}", path.display(), e))
    })?;

    if doc.version != FORMAT_VERSION {
        return Err(Error::StoreUnavailable(format!(
            "Unsupported seen-paper document version {} in {}",
            doc.version,
            path.display()
        )));
    }

    Ok(doc.seen)
}

fn commit_blocking(
    path: &Path,
    state: &RwLock<SeenSet>,
    commit_lock: &Mutex<()>,
    ids: BTreeSet<PaperId>,
    at: DateTime<Utc>,
) -> Result<BTreeSet<PaperId>> {
    let _guard = commit_lock
        .lock()
        .map_err(|_| Error::Internal("commit lock poisoned".to_string()))?;

    let mut next = state
        .read()
        .map_err(|_| Error::Internal("seen-set lock poisoned".to_string()))?
        .clone();

    let mut added = BTreeSet::new();
    for id in ids {
        if next.record(id.clone(), at) {
            added.insert(id);
        }
    }
    if added.is_empty() {
        return Ok(added);
    }

    let doc = SeenDocument {
        version: FORMAT_VERSION,
        seen: next,
    };
    let data = serde_json::to_vec_pretty(&doc)?;
    write_atomic(path, &data).map_err(|e| {
        Error::StoreUnavailable(format!("Failed to write {}: {}", path.display(), e))
    })?;

    *state
        .write()
        .map_err(|_| Error::Internal("seen-set lock poisoned".to_string()))? = doc.seen;

    Ok(added)
}

#[async_trait]
impl SeenPaperStore for FileSeenStore {
    /// Read the durable document. The in-memory view is left alone: only a
    /// successful commit may replace it.
    async fn load(&self) -> Result<SeenSet> {
        read_document(&self.path).await
    }

    async fn has(&self, id: &PaperId) -> Result<bool> {
        self.state
            .read()
            .map(|s| s.contains(id))
            .map_err(|_| Error::Internal("seen-set lock poisoned".to_string()))
    }

    #[instrument(skip(self, ids), fields(subsystem = "store", component = "file_store", op = "commit", count = ids.len()))]
    async fn commit(&self, ids: &BTreeSet<PaperId>, at: DateTime<Utc>) -> Result<BTreeSet<PaperId>> {
        if ids.is_empty() {
            return Ok(BTreeSet::new());
        }

        let path = self.path.clone();
        let state = self.state.clone();
        let commit_lock = self.commit_lock.clone();
        let ids = ids.clone();

        let added = tokio::task::spawn_blocking(move || {
            commit_blocking(&path, &state, &commit_lock, ids, at)
        })
        .await
        .map_err(|e| Error::Internal(format!("Commit task failed: {}", e)))??;

        debug!(added = added.len(), "Seen-paper commit durable");
        Ok(added)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.snapshot()?.len())
    }
}
