use crate::{CorrelationStore, DeliveredResult, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Unbounded in-memory correlation store.
///
/// Entries are never evicted: the map grows by one entry per distinct request
/// id for the lifetime of the process. This is acceptable for a single,
/// regularly restarted instance. Use [`TtlStore`](crate::TtlStore) when
/// memory must stay bounded by traffic over a window.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, DeliveredResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CorrelationStore for MemoryStore {
    fn upsert(&self, result: DeliveredResult) -> Result<Option<DeliveredResult>> {
        let mut entries = self.entries.write();
        Ok(entries.insert(result.request_id.clone(), result))
    }

    fn get(&self, request_id: &str) -> Result<Option<DeliveredResult>> {
        Ok(self.entries.read().get(request_id).cloned())
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }
}
