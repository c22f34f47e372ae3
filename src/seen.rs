// src/seen.rs
//! Persistent set of already-processed item ids with FIFO eviction.
//!
//! Load-at-startup / flush-on-change discipline. If the backing file is
//! unreadable the store starts empty for the run (duplicate emission is the
//! accepted degraded mode; silent data loss is not). An id present in the
//! store is never re-emitted; an absent id may still be old — eviction
//! trades a bounded false-negative rate for bounded memory.

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::PersistenceError;

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    posts: Vec<String>,
    updated_at: String,
    count: usize,
}

#[derive(Debug)]
struct Inner {
    /// Record order, oldest at the front.
    order: VecDeque<String>,
    index: HashSet<String>,
}

/// Thread-safe seen-id tracker. `record` is idempotent; re-recording a
/// present id neither duplicates it nor refreshes its eviction position.
#[derive(Debug)]
pub struct SeenStore {
    inner: Mutex<Inner>,
    ceiling: usize,
    path: Option<PathBuf>,
}

impl SeenStore {
    /// In-memory-only store (tests, degraded mode).
    pub fn in_memory(ceiling: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                order: VecDeque::new(),
                index: HashSet::new(),
            }),
            ceiling: ceiling.max(1),
            path: None,
        }
    }

    /// Load from `path`, starting empty when the file is absent or corrupt.
    pub fn load(path: &Path, ceiling: usize) -> Self {
        let mut store = Self::in_memory(ceiling);
        store.path = Some(path.to_path_buf());

        match fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Snapshot>(&raw) {
                Ok(snap) => {
                    let mut inner = store.inner.lock().expect("seen store mutex poisoned");
                    for id in snap.posts {
                        if inner.index.insert(id.clone()) {
                            inner.order.push_back(id);
                        }
                    }
                    Self::evict_over(&mut inner, store.ceiling);
                    info!(count = inner.order.len(), path = %path.display(), "loaded seen posts");
                }
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "corrupt seen-store snapshot, starting empty");
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no seen-store snapshot yet");
            }
            Err(e) => {
                warn!(error = %e, path = %path.display(), "seen-store unreadable, degrading to in-memory");
            }
        }
        store
    }

    pub fn has(&self, id: &str) -> bool {
        self.inner
            .lock()
            .expect("seen store mutex poisoned")
            .index
            .contains(id)
    }

    /// Mark an id as processed. No-op when already present.
    pub fn record(&self, id: &str) {
        let mut inner = self.inner.lock().expect("seen store mutex poisoned");
        if !inner.index.insert(id.to_string()) {
            return;
        }
        inner.order.push_back(id.to_string());
        Self::evict_over(&mut inner, self.ceiling);
    }

    /// Atomic has-then-record. Returns true when the id was new.
    pub fn check_and_record(&self, id: &str) -> bool {
        let mut inner = self.inner.lock().expect("seen store mutex poisoned");
        if !inner.index.insert(id.to_string()) {
            return false;
        }
        inner.order.push_back(id.to_string());
        Self::evict_over(&mut inner, self.ceiling);
        true
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("seen store mutex poisoned")
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_over(inner: &mut Inner, ceiling: usize) {
        while inner.order.len() > ceiling {
            if let Some(old) = inner.order.pop_front() {
                inner.index.remove(&old);
                debug!(id = %old, "evicted oldest seen id");
            }
        }
    }

    /// Write the current snapshot. No-op for in-memory stores.
    pub fn flush(&self) -> Result<(), PersistenceError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        // Snapshot under the lock, write outside it.
        let posts: Vec<String> = {
            let inner = self.inner.lock().expect("seen store mutex poisoned");
            inner.order.iter().cloned().collect()
        };
        let snap = Snapshot {
            count: posts.len(),
            updated_at: chrono::Utc::now().to_rfc3339(),
            posts,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string(&snap).expect("seen snapshot serializes");
        fs::write(path, raw)?;
        debug!(count = snap.count, path = %path.display(), "flushed seen posts");
        Ok(())
    }
}
