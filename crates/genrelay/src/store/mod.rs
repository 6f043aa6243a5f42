//! # Correlation store
//!
//! Maps a request identifier to the [`DeliveredResult`] generated for it. The
//! store is the relay's memory of "what has been generated", and the pull
//! path ([`Lookup`](crate::Lookup)) reads nothing else.
//!
//! The [`ResultRouter`](crate::ResultRouter) is the only writer. Upserts are
//! last-writer-wins, which makes duplicate deliveries from an at-least-once
//! queue harmless.
//!
//! ## Implementations
//!
//! - [`MemoryStore`] - unbounded map; entries live for the whole process.
//! - [`TtlStore`] - entries expire after a fixed time-to-live.
//!
//! Both guard their map with a [`parking_lot::RwLock`]. Lock guards never
//! outlive a single method call, so they are never held across an `.await`.

mod memory;
mod ttl;


pub use memory::*;
pub use ttl::*;

use crate::{DeliveredResult, Result};
use std::sync::OnceLock;
use std::time::Instant;

/// Storage backend for delivered results.
///
/// Methods return [`Result`] so that implementations backed by external
/// systems can report failures. The in-process implementations never fail.
pub trait CorrelationStore: Send + Sync {
    /// Inserts `result` under its request id, replacing any previous entry.
    ///
    /// Returns the replaced entry, if there was one.
    fn upsert(&self, result: DeliveredResult) -> Result<Option<DeliveredResult>>;

    /// Returns the result stored for `request_id`.
    fn get(&self, request_id: &str) -> Result<Option<DeliveredResult>>;

    /// Number of entries currently held, including any that expired but have
    /// not been evicted yet.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops entries that are no longer retrievable and returns how many were
    /// removed. Stores without expiry have nothing to do.
    fn evict_expired(&self) -> usize {
        0
    }
}

/// A source of millisecond timestamps.
///
/// Lets [`TtlStore`] run against a mocked clock in tests.
pub trait TimeSource: Send + Sync {
    /// Milliseconds elapsed since an arbitrary, fixed origin.
    fn current_millis(&self) -> u64;
}

/// Monotonic clock measuring time since the first call in this process.
///
/// Immune to wall-clock adjustments, which is all a time-to-live needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl TimeSource for MonotonicClock {
    fn current_millis(&self) -> u64 {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        let origin = ORIGIN.get_or_init(Instant::now);
        u64::try_from(origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}
