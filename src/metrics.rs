// Library metrics module
//
// Lock-free counters for scan, refresh and transfer activity

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Library activity metrics
///
/// Uses atomic operations so scan tasks and refresh passes can record
/// without locks. Logged on shutdown or on demand.
#[derive(Debug)]
pub struct Metrics {
    /// Completed full scans
    pub scans: AtomicU64,

    /// Completed refresh passes (one per object reconciled)
    pub refreshes: AtomicU64,

    /// Mods tracked after the last scan
    pub mods_tracked: AtomicUsize,

    /// Identities regenerated because another folder already owned them
    pub identity_collisions: AtomicU64,

    /// Settings files renamed to `.invalid`
    pub quarantined: AtomicU64,

    /// Stale duplicate folders renamed during refresh
    pub duplicates_renamed: AtomicU64,

    /// Mods moved between objects
    pub mods_transferred: AtomicU64,

    /// Mods copied out by exports
    pub mods_exported: AtomicU64,

    /// Total scan time in milliseconds
    pub total_scan_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans: AtomicU64::new(0),
            refreshes: AtomicU64::new(0),
            mods_tracked: AtomicUsize::new(0),
            identity_collisions: AtomicU64::new(0),
            quarantined: AtomicU64::new(0),
            duplicates_renamed: AtomicU64::new(0),
            mods_transferred: AtomicU64::new(0),
            mods_exported: AtomicU64::new(0),
            total_scan_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_scan(&self, duration: Duration, mods: usize) {
        self.scans.fetch_add(1, Ordering::Relaxed);
        self.total_scan_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        self.mods_tracked.store(mods, Ordering::Relaxed);
    }

    pub fn record_refresh(&self) {
        self.refreshes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_identity_collision(&self) {
        self.identity_collisions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_quarantine(&self) {
        self.quarantined.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicates(&self, count: usize) {
        self.duplicates_renamed
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_transferred(&self, count: usize) {
        self.mods_transferred
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_exported(&self, count: usize) {
        self.mods_exported.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average scan time in milliseconds
    pub fn avg_scan_time_ms(&self) -> f64 {
        let total = self.total_scan_time_ms.load(Ordering::Relaxed);
        let count = self.scans.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Library Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Scans: {} (avg {:.2}ms), refreshes: {}, mods tracked: {}",
            self.scans.load(Ordering::Relaxed),
            self.avg_scan_time_ms(),
            self.refreshes.load(Ordering::Relaxed),
            self.mods_tracked.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Identity collisions: {}, quarantined: {}, duplicates renamed: {}",
            self.identity_collisions.load(Ordering::Relaxed),
            self.quarantined.load(Ordering::Relaxed),
            self.duplicates_renamed.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Transferred: {}, exported: {}",
            self.mods_transferred.load(Ordering::Relaxed),
            self.mods_exported.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
