use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one coalesced registry instance.
#[derive(Debug, Default)]
pub struct CoalescedStats {
    /// Successful flush pipelines
    pub flushes: AtomicU64,
    /// Values written by successful flushes
    pub flushed_writes: AtomicU64,
    /// Tombstones applied by successful flushes
    pub flushed_deletes: AtomicU64,
    /// Completed refresh cycles
    pub refreshes: AtomicU64,
    /// Cache entries replaced by a refresh
    pub refresh_updates: AtomicU64,
    /// Cache entries evicted because the key vanished from the store
    pub refresh_evictions: AtomicU64,
    /// Swallowed flush/refresh failures
    pub errors: AtomicU64,
}

impl CoalescedStats {
    pub fn snapshot(&self) -> CoalescedStatsSnapshot {
        CoalescedStatsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            flushed_writes: self.flushed_writes.load(Ordering::Relaxed),
            flushed_deletes: self.flushed_deletes.load(Ordering::Relaxed),
            refreshes: self.refreshes.load(Ordering::Relaxed),
            refresh_updates: self.refresh_updates.load(Ordering::Relaxed),
            refresh_evictions: self.refresh_evictions.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CoalescedStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalescedStatsSnapshot {
    pub flushes: u64,
    pub flushed_writes: u64,
    pub flushed_deletes: u64,
    pub refreshes: u64,
    pub refresh_updates: u64,
    pub refresh_evictions: u64,
    pub errors: u64,
}
