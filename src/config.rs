//! Stream configuration

use std::time::Duration;

use crate::error::{ProcessorError, Result};

/// Size of the fixed RTP header (no CSRCs, no extensions)
pub const RTP_HEADER_SIZE: usize = 12;

/// Default maximum UDP payload size: 1500 (Ethernet MTU) - 20 (IPv4) - 8 (UDP)
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1472;

/// Largest UDP payload that fits an IPv4 datagram: 65535 - 20 (IPv4) - 8 (UDP)
pub const MAX_UDP_PAYLOAD_SIZE: usize = 65507;

/// Largest per-reader queue capacity a bounded tokio channel accepts
pub const MAX_READER_QUEUE_CAPACITY: usize = tokio::sync::Semaphore::MAX_PERMITS;

/// Default per-reader queue capacity, in units
pub const DEFAULT_READER_QUEUE_CAPACITY: usize = 512;

/// Configuration accepted by [`Stream::initialize`](crate::Stream::initialize)
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Build encoders so that the stream can originate RTP packets from
    /// decoded units (as opposed to only relaying packets it receives)
    pub generate_rtp_packets: bool,

    /// Maximum UDP payload size in bytes (transport MTU minus IP/UDP headers)
    pub max_payload_size: usize,

    /// Capacity of each reader's queue, in units
    pub reader_queue_capacity: usize,

    /// Minimum interval between two log lines of the same error counter
    pub error_report_interval: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            generate_rtp_packets: true,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            reader_queue_capacity: DEFAULT_READER_QUEUE_CAPACITY,
            error_report_interval: Duration::from_secs(1),
        }
    }
}

impl StreamConfig {
    /// Create a config for a stream that only relays received RTP packets
    pub fn relay_only() -> Self {
        Self {
            generate_rtp_packets: false,
            ..Default::default()
        }
    }

    /// Set whether the stream originates RTP packets
    pub fn generate_rtp_packets(mut self, generate: bool) -> Self {
        self.generate_rtp_packets = generate;
        self
    }

    /// Set the maximum UDP payload size
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    /// Set the per-reader queue capacity
    pub fn reader_queue_capacity(mut self, capacity: usize) -> Self {
        self.reader_queue_capacity = capacity;
        self
    }

    /// Set the error report interval
    pub fn error_report_interval(mut self, interval: Duration) -> Self {
        self.error_report_interval = interval;
        self
    }

    /// Maximum RTP payload an encoder may put in one packet
    pub fn max_rtp_payload_size(&self) -> usize {
        self.max_payload_size.saturating_sub(RTP_HEADER_SIZE)
    }

    /// Check that the configuration can back a stream
    pub fn validate(&self) -> Result<()> {
        if self.max_payload_size <= RTP_HEADER_SIZE {
            return Err(ProcessorError::configuration(format!(
                "maximum payload size ({}) cannot hold an RTP header",
                self.max_payload_size
            ))
            .into());
        }
        if self.max_payload_size > MAX_UDP_PAYLOAD_SIZE {
            return Err(ProcessorError::configuration(format!(
                "maximum payload size ({}) exceeds the UDP maximum ({})",
                self.max_payload_size, MAX_UDP_PAYLOAD_SIZE
            ))
            .into());
        }
        if self.reader_queue_capacity == 0 {
            return Err(
                ProcessorError::configuration("reader queue capacity must be positive").into(),
            );
        }
        if self.reader_queue_capacity > MAX_READER_QUEUE_CAPACITY {
            return Err(ProcessorError::configuration(format!(
                "reader queue capacity ({}) exceeds {}",
                self.reader_queue_capacity, MAX_READER_QUEUE_CAPACITY
            ))
            .into());
        }
        Ok(())
    }
}
