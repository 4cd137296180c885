use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live multiplexer counters.
#[derive(Debug, Default)]
pub struct MuxStats {
    pub(crate) bytes_ingested: AtomicU64,
    pub(crate) frames_decoded: AtomicU64,
    pub(crate) checksum_failures: AtomicU64,
    pub(crate) unsupported_types: AtomicU64,
    pub(crate) malformed_frames: AtomicU64,
    pub(crate) packets_dispatched: AtomicU64,
    pub(crate) handler_panics: AtomicU64,
    pub(crate) inbound_dropped: AtomicU64,
    pub(crate) outbound_dropped: AtomicU64,
    pub(crate) accumulation_overflows: AtomicU64,
    pub(crate) packets_sent: AtomicU64,
    pub(crate) bytes_written: AtomicU64,
}

/// Point-in-time copy of [`MuxStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub bytes_ingested: u64,
    pub frames_decoded: u64,
    pub checksum_failures: u64,
    pub unsupported_types: u64,
    pub malformed_frames: u64,
    pub packets_dispatched: u64,
    pub handler_panics: u64,
    pub inbound_dropped: u64,
    pub outbound_dropped: u64,
    pub accumulation_overflows: u64,
    pub packets_sent: u64,
    pub bytes_written: u64,
}

impl StatsSnapshot {
    /// Frames that reached the decoder but were discarded.
    pub fn frames_rejected(&self) -> u64 {
        self.checksum_failures + self.unsupported_types + self.malformed_frames
    }
}

pub(crate) fn bump(counter: &AtomicU64) {
    add(counter, 1);
}

pub(crate) fn add(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl MuxStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            bytes_ingested: load(&self.bytes_ingested),
            frames_decoded: load(&self.frames_decoded),
            checksum_failures: load(&self.checksum_failures),
            unsupported_types: load(&self.unsupported_types),
            malformed_frames: load(&self.malformed_frames),
            packets_dispatched: load(&self.packets_dispatched),
            handler_panics: load(&self.handler_panics),
            inbound_dropped: load(&self.inbound_dropped),
            outbound_dropped: load(&self.outbound_dropped),
            accumulation_overflows: load(&self.accumulation_overflows),
            packets_sent: load(&self.packets_sent),
            bytes_written: load(&self.bytes_written),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = MuxStats::default();
        bump(&stats.checksum_failures);
        bump(&stats.malformed_frames);
        add(&stats.bytes_ingested, 42);

        let snap = stats.snapshot();
        assert_eq!(snap.bytes_ingested, 42);
        assert_eq!(snap.frames_rejected(), 2);
    }

    #[test]
    fn snapshot_serializes_field_names() {
        let stats = MuxStats::default();
        bump(&stats.packets_sent);
        let value = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(value["packets_sent"], 1);
        assert_eq!(value["outbound_dropped"], 0);
    }
}
