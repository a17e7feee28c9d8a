//! In-memory map from run ID to the kill handle of its converter process.
//!
//! Entries are inserted when the converter is spawned and removed when it exits
//! or is killed. The map is process-local: a restart forgets every handle, so a
//! kill after restart only marks the run failed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Default)]
pub struct ProcessRegistry {
    handles: Arc<Mutex<HashMap<Uuid, oneshot::Sender<()>>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a run and returns the receiver its supervising task waits on.
    pub fn register(&self, run_id: Uuid) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let replaced = self.lock().insert(run_id, tx);
        if replaced.is_some() {
            debug!(run_id = %run_id, "Replaced stale process handle");
        }
        rx
    }

    /// Drops the registration after the process exited on its own.
    pub fn remove(&self, run_id: Uuid) -> bool {
        self.lock().remove(&run_id).is_some()
    }

    /// Removes the registration and signals termination. Returns whether a
    /// live handle received the signal.
    pub fn kill(&self, run_id: Uuid) -> bool {
        let handle = self.lock().remove(&run_id);
        match handle {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Number of converter processes currently registered.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, oneshot::Sender<()>>> {
        // A panic while holding this lock cannot leave the map half-updated.
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
impl ProcessRegistry {
    pub fn is_registered(&self, run_id: Uuid) -> bool {
        self.lock().contains_key(&run_id)
    }
}
