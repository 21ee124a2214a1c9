//! Per-connection traffic statistics
//!
//! Thread-safe counters shared between the caller, the receive thread and
//! the writer thread. Uses lock-free atomics for all operations.

use std::sync::atomic::{AtomicU64, Ordering};

/// Traffic counters for one connection (fully lock-free)
#[derive(Debug, Default)]
pub struct LinkStats {
    /// Total bytes handed to the transport
    tx_bytes: AtomicU64,
    /// Total raw bytes read from the transport (including garbage)
    rx_bytes: AtomicU64,
    /// Frames encoded and queued for transmission
    tx_frames: AtomicU64,
    /// Frames decoded and dispatched to subscribers
    rx_frames: AtomicU64,
    /// Transport write failures and drops after writer shutdown
    tx_errors: AtomicU64,
}

impl LinkStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one encoded frame of `bytes` queued for transmission
    #[inline]
    pub fn add_tx(&self, bytes: usize) {
        self.tx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        self.tx_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Record `bytes` of raw inbound data
    #[inline]
    pub fn add_rx(&self, bytes: usize) {
        self.rx_bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record one decoded inbound frame
    #[inline]
    pub fn add_rx_frame(&self) {
        self.rx_frames.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one failed or dropped transmission
    #[inline]
    pub fn add_tx_error(&self) {
        self.tx_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            tx_bytes: self.tx_bytes.load(Ordering::Relaxed),
            rx_bytes: self.rx_bytes.load(Ordering::Relaxed),
            tx_frames: self.tx_frames.load(Ordering::Relaxed),
            rx_frames: self.rx_frames.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of the counters at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub tx_bytes: u64,
    pub rx_bytes: u64,
    pub tx_frames: u64,
    pub rx_frames: u64,
    pub tx_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let stats = LinkStats::new();
        stats.add_tx(17);
        stats.add_tx(8);
        stats.add_rx(42);
        stats.add_rx_frame();
        stats.add_tx_error();

        let snap = stats.snapshot();
        assert_eq!(snap.tx_bytes, 25);
        assert_eq!(snap.tx_frames, 2);
        assert_eq!(snap.rx_bytes, 42);
        assert_eq!(snap.rx_frames, 1);
        assert_eq!(snap.tx_errors, 1);
    }

    #[test]
    fn test_snapshot_starts_zeroed() {
        let stats = LinkStats::new();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }
}
