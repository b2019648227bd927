//! Statistics snapshots for streams and readers

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Stream-level statistics
#[derive(Debug, Clone)]
pub struct StreamStats {
    /// Time since the stream was initialized
    pub uptime: Duration,
    /// Units accepted through `write_unit`
    pub units_written: u64,
    /// RTP packets accepted through `write_rtp_packet`
    pub rtp_packets_received: u64,
    /// RTP payload bytes accepted
    pub bytes_received: u64,
    /// Packets or units rejected by a format processor
    pub processing_errors: u64,
    /// Reader callback failures, all readers combined
    pub delivery_errors: u64,
    /// Registered readers
    pub readers: usize,
    /// Readers currently receiving units
    pub running_readers: usize,
}

impl StreamStats {
    /// Average ingest bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.uptime.as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }
}

/// Reader-level statistics
#[derive(Debug, Clone, Default)]
pub struct ReaderStats {
    /// Whether the reader's worker is running
    pub running: bool,
    /// Units handed to the callback successfully
    pub delivered: u64,
    /// Units discarded because the reader's queue was full
    pub dropped: u64,
    /// Units the callback failed on
    pub failed: u64,
}

/// Ingest counters owned by a stream
#[derive(Debug)]
pub(crate) struct IngestCounters {
    started_at: Instant,
    units_written: AtomicU64,
    rtp_packets_received: AtomicU64,
    bytes_received: AtomicU64,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            units_written: AtomicU64::new(0),
            rtp_packets_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
        }
    }

    pub fn on_unit(&self, bytes: usize) {
        self.units_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn on_rtp_packet(&self, bytes: usize) {
        self.rtp_packets_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn units_written(&self) -> u64 {
        self.units_written.load(Ordering::Relaxed)
    }

    pub fn rtp_packets_received(&self) -> u64 {
        self.rtp_packets_received.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}
