//! Approximate, low-overhead cache statistics.
//!
//! Counters are plain relaxed atomics: each increment is a single atomic
//! operation and the periodic reset is an atomic swap, so the hot path never
//! takes a lock and every increment lands in exactly one reporting window.
//! Counts racing a window boundary may be split across two windows — they
//! are diagnostic, not authoritative.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::info;

/// Shared counters for one cache instance.
#[derive(Debug, Default)]
pub struct Stats {
    total: AtomicU64,
    hit: AtomicU64,
    miss: AtomicU64,
    db_fails: AtomicU64,
    shared: AtomicU64,
}

/// One reporting window's captured counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub total: u64,
    pub hit: u64,
    pub miss: u64,
    pub db_fails: u64,
    pub shared: u64,
}

impl Snapshot {
    /// Hit ratio as a percentage of total requests.
    pub fn hit_ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.hit as f64 / self.total as f64
        }
    }
}

impl Stats {
    pub fn incr_total(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_hit(&self) {
        self.hit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_miss(&self) {
        self.miss.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_db_fails(&self) {
        self.db_fails.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_shared(&self) {
        self.shared.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically captures every counter and resets it to zero.
    pub fn snapshot_and_reset(&self) -> Snapshot {
        Snapshot {
            total: self.total.swap(0, Ordering::Relaxed),
            hit: self.hit.swap(0, Ordering::Relaxed),
            miss: self.miss.swap(0, Ordering::Relaxed),
            db_fails: self.db_fails.swap(0, Ordering::Relaxed),
            shared: self.shared.swap(0, Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    pub(crate) fn peek(&self) -> Snapshot {
        Snapshot {
            total: self.total.load(Ordering::Relaxed),
            hit: self.hit.load(Ordering::Relaxed),
            miss: self.miss.load(Ordering::Relaxed),
            db_fails: self.db_fails.load(Ordering::Relaxed),
            shared: self.shared.load(Ordering::Relaxed),
        }
    }
}

/// Periodic reporting loop, run as a task owned by the cache facade.
///
/// Each tick swaps the counters to zero; windows with no activity emit
/// nothing.
pub async fn report_loop(stats: Arc<Stats>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick of a tokio interval fires immediately; skip it.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let snapshot = stats.snapshot_and_reset();
        if snapshot.total == 0 {
            continue;
        }
        info!(
            total = snapshot.total,
            hit_ratio = %format!("{:.1}%", snapshot.hit_ratio()),
            hit = snapshot.hit,
            miss = snapshot.miss,
            db_fails = snapshot.db_fails,
            shared = snapshot.shared,
            "cache stats"
        );
    }
}
