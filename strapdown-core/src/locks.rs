//! Per-document mutual exclusion
//!
//! Each document path maps to its own async mutex, created on first use and
//! dropped again once nobody holds or awaits it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::object::DocPath;

/// Mutex of one document and the number of holders and waiters using it
struct Slot {
    mutex: Arc<AsyncMutex<()>>,
    users: usize,
}

type LockMap = Arc<Mutex<HashMap<DocPath, Slot>>>;

/// Keyed mutex map over document paths
#[derive(Clone, Default)]
pub struct DocumentLocks {
    map: LockMap,
}

/// Registration in the map, counted from the start of the wait
struct Lease {
    doc: DocPath,
    map: LockMap,
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = map.get_mut(&self.doc) {
            slot.users -= 1;
            if slot.users == 0 {
                map.remove(&self.doc);
            }
        }
    }
}

/// Held while a document is being mutated; released on drop
pub struct DocumentGuard {
    // field order matters: the mutex is released before the lease
    _guard: OwnedMutexGuard<()>,
    _lease: Lease,
}

impl DocumentLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `doc`
    pub async fn lock(&self, doc: &DocPath) -> DocumentGuard {
        let (mutex, lease) = {
            let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
            let slot = map.entry(doc.clone()).or_insert_with(|| Slot {
                mutex: Arc::default(),
                users: 0,
            });
            slot.users += 1;
            let lease = Lease {
                doc: doc.clone(),
                map: self.map.clone(),
            };
            (slot.mutex.clone(), lease)
        };
        // a waiter dropped here gives its lease back
        let guard = mutex.lock_owned().await;
        DocumentGuard {
            _guard: guard,
            _lease: lease,
        }
    }

    /// Number of documents with a live lock entry
    pub fn active(&self) -> usize {
        self.map.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
