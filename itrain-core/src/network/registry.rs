use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{ConnId, ConnectionInfo};

/// Externally visible set of live connections.
///
/// The reactor inserts on accept and removes on destroy; everyone else
/// reads snapshots.
#[derive(Debug, Clone, Default)]
pub struct LiveConnections {
    inner: Arc<Mutex<BTreeMap<ConnId, ConnectionInfo>>>,
}

impl LiveConnections {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnId, ConnectionInfo>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(&self, info: ConnectionInfo) {
        self.lock().insert(info.id, info);
    }

    pub(crate) fn remove(&self, id: ConnId) -> Option<ConnectionInfo> {
        self.lock().remove(&id)
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }

    /// Connections ordered by id.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        self.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
