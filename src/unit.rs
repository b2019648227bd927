//! Media units
//!
//! A [`Unit`] is one media access unit as it travels from the publisher to
//! readers: its timing, the RTP packets that carry it, and (when some reader
//! asked for it) the decoded payload.
//!
//! Units are broadcast as `Arc<Unit>` and payload buffers are `Bytes`, so
//! every reader shares the same allocation.

use std::time::SystemTime;

use bytes::Bytes;
use rtp::packet::Packet;

/// Decoded payload of a unit, one variant per payload shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Interleaved PCM samples (G.711, LPCM)
    Samples(Bytes),
    /// NAL units of one H.264 access unit
    AccessUnit(Vec<Bytes>),
    /// Opus packets
    Packets(Vec<Bytes>),
    /// MPEG-4 audio access units
    AccessUnits(Vec<Bytes>),
}

impl Payload {
    /// Short name of the payload shape, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Samples(_) => "samples",
            Payload::AccessUnit(_) => "access unit",
            Payload::Packets(_) => "packets",
            Payload::AccessUnits(_) => "access units",
        }
    }

    /// Total payload bytes
    pub fn size(&self) -> usize {
        match self {
            Payload::Samples(samples) => samples.len(),
            Payload::AccessUnit(items)
            | Payload::Packets(items)
            | Payload::AccessUnits(items) => items.iter().map(|b| b.len()).sum(),
        }
    }
}

/// One media access unit
#[derive(Debug, Clone)]
pub struct Unit {
    /// RTP packets carrying this unit (empty until encoded)
    pub rtp_packets: Vec<Packet>,
    /// Wall-clock capture time
    pub ntp: SystemTime,
    /// Presentation timestamp, in the format's clock rate
    pub pts: i64,
    /// Decoded payload; `None` means RTP passthrough
    pub payload: Option<Payload>,
}

impl Unit {
    /// Create a unit from decoded payload, to be encoded by the stream
    pub fn new(pts: i64, ntp: SystemTime, payload: Payload) -> Self {
        Self {
            rtp_packets: Vec::new(),
            ntp,
            pts,
            payload: Some(payload),
        }
    }

    /// Create a unit carrying a single received RTP packet
    pub fn from_rtp(packet: Packet, ntp: SystemTime, pts: i64) -> Self {
        Self {
            rtp_packets: vec![packet],
            ntp,
            pts,
            payload: None,
        }
    }

    /// Unit of PCM samples
    pub fn samples(pts: i64, ntp: SystemTime, samples: Bytes) -> Self {
        Self::new(pts, ntp, Payload::Samples(samples))
    }

    /// Unit of one H.264 access unit
    pub fn access_unit(pts: i64, ntp: SystemTime, nalus: Vec<Bytes>) -> Self {
        Self::new(pts, ntp, Payload::AccessUnit(nalus))
    }

    /// Whether this unit carries decoded payload
    pub fn is_decoded(&self) -> bool {
        self.payload.is_some()
    }

    /// Whether there is nothing to deliver
    pub fn is_empty(&self) -> bool {
        self.rtp_packets.is_empty() && self.payload.is_none()
    }

    /// PCM samples, if decoded
    pub fn get_samples(&self) -> Option<&Bytes> {
        match &self.payload {
            Some(Payload::Samples(samples)) => Some(samples),
            _ => None,
        }
    }

    /// H.264 NAL units, if decoded
    pub fn get_access_unit(&self) -> Option<&[Bytes]> {
        match &self.payload {
            Some(Payload::AccessUnit(nalus)) => Some(nalus),
            _ => None,
        }
    }

    /// Opus packets, if decoded
    pub fn get_packets(&self) -> Option<&[Bytes]> {
        match &self.payload {
            Some(Payload::Packets(packets)) => Some(packets),
            _ => None,
        }
    }

    /// MPEG-4 audio access units, if decoded
    pub fn get_access_units(&self) -> Option<&[Bytes]> {
        match &self.payload {
            Some(Payload::AccessUnits(aus)) => Some(aus),
            _ => None,
        }
    }

    /// Total bytes of RTP payload carried by this unit
    pub fn rtp_payload_size(&self) -> usize {
        self.rtp_packets.iter().map(|p| p.payload.len()).sum()
    }
}
