use std::sync::atomic::{AtomicU64, Ordering::Relaxed};

/// Publisher telemetry.
///
/// `Telemetry` tracks what happened to each metric handed to the publisher: whether it was sampled out, sent, or
/// dropped because the transport failed. Updates are relaxed atomic increments, so tracking is safe to do from every
/// calling thread at once.
#[derive(Debug, Default)]
pub(crate) struct Telemetry {
    packets_sent: AtomicU64,
    packets_dropped: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_dropped: AtomicU64,
    sampled_out: AtomicU64,
}

impl Telemetry {
    /// Tracks a successful packet send.
    pub fn track_packet_send_succeeded(&self, bytes_len: usize) {
        self.packets_sent.fetch_add(1, Relaxed);
        self.bytes_sent.fetch_add(bytes_len as u64, Relaxed);
    }

    /// Tracks a failed packet send.
    pub fn track_packet_send_failed(&self, bytes_len: usize) {
        self.packets_dropped.fetch_add(1, Relaxed);
        self.bytes_dropped.fetch_add(bytes_len as u64, Relaxed);
    }

    /// Tracks a metric that lost the sampling draw.
    pub fn track_sampled_out(&self) {
        self.sampled_out.fetch_add(1, Relaxed);
    }

    /// Takes a point-in-time copy of the counters.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            packets_sent: self.packets_sent.load(Relaxed),
            packets_dropped: self.packets_dropped.load(Relaxed),
            bytes_sent: self.bytes_sent.load(Relaxed),
            bytes_dropped: self.bytes_dropped.load(Relaxed),
            sampled_out: self.sampled_out.load(Relaxed),
        }
    }
}

/// A point-in-time copy of publisher telemetry.
///
/// Counters are read individually, so a snapshot taken while other threads are publishing may not be consistent
/// across fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    packets_sent: u64,
    packets_dropped: u64,
    bytes_sent: u64,
    bytes_dropped: u64,
    sampled_out: u64,
}

impl TelemetrySnapshot {
    /// Number of payloads handed to the transport successfully.
    pub const fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    /// Number of payloads the transport failed to send.
    pub const fn packets_dropped(&self) -> u64 {
        self.packets_dropped
    }

    /// Number of payload bytes sent.
    pub const fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Number of payload bytes dropped on failed sends.
    pub const fn bytes_dropped(&self) -> u64 {
        self.bytes_dropped
    }

    /// Number of metrics skipped by the sampling gate.
    pub const fn sampled_out(&self) -> u64 {
        self.sampled_out
    }
}
