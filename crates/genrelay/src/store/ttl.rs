use crate::{CorrelationStore, DeliveredResult, MonotonicClock, Result, TimeSource};
use core::time::Duration;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Clone)]
struct Entry {
    result: DeliveredResult,
    stored_at: u64,
}

/// In-memory correlation store whose entries expire.
///
/// An entry stops being retrievable once `ttl` has elapsed since its last
/// upsert. Expired entries are removed lazily when a lookup hits them, and in
/// bulk by [`CorrelationStore::evict_expired`], which a host should call
/// periodically to reclaim entries nobody asks for.
///
/// A duplicate delivery refreshes the entry's timestamp.
#[derive(Debug)]
pub struct TtlStore<T: TimeSource = MonotonicClock> {
    entries: RwLock<HashMap<String, Entry>>,
    ttl_millis: u64,
    clock: T,
}

impl TtlStore<MonotonicClock> {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, MonotonicClock)
    }
}

impl<T: TimeSource> TtlStore<T> {
    pub fn with_clock(ttl: Duration, clock: T) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_millis: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_millis)
    }

    fn is_expired(&self, entry: &Entry, now: u64) -> bool {
        now.saturating_sub(entry.stored_at) >= self.ttl_millis
    }
}

impl<T: TimeSource> CorrelationStore for TtlStore<T> {
    fn upsert(&self, result: DeliveredResult) -> Result<Option<DeliveredResult>> {
        let now = self.clock.current_millis();
        let entry = Entry {
            result,
            stored_at: now,
        };
        let mut entries = self.entries.write();
        let previous = entries.insert(entry.result.request_id.clone(), entry);
        Ok(previous
            .filter(|old| !self.is_expired(old, now))
            .map(|old| old.result))
    }

    fn get(&self, request_id: &str) -> Result<Option<DeliveredResult>> {
        let now = self.clock.current_millis();
        {
            let entries = self.entries.read();
            match entries.get(request_id) {
                None => return Ok(None),
                Some(entry) if !self.is_expired(entry, now) => {
                    return Ok(Some(entry.result.clone()));
                }
                Some(_) => {}
            }
        }

        // Re-check under the write lock: a fresh upsert may have landed
        // between the two acquisitions.
        let mut entries = self.entries.write();
        if entries
            .get(request_id)
            .is_some_and(|entry| self.is_expired(entry, now))
        {
            entries.remove(request_id);
            tracing::debug!(request_id, "evicted expired result on lookup");
            return Ok(None);
        }
        Ok(entries.get(request_id).map(|entry| entry.result.clone()))
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn evict_expired(&self) -> usize {
        let now = self.clock.current_millis();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| !self.is_expired(entry, now));
        before - entries.len()
    }
}
