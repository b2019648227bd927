//! G.711 format processor
//!
//! G.711 is companded 8-bit audio packed exactly like L8, so this processor
//! runs the linear PCM packetizer with a fixed bit depth.

use std::time::SystemTime;

use rtp::packet::Packet;

use crate::description::{G711Format, LpcmFormat};
use crate::error::Result;
use crate::unit::Unit;

use super::lpcm::Lpcm;

#[derive(Debug)]
pub struct G711 {
    inner: Lpcm,
}

impl G711 {
    pub(crate) fn new(
        format: &G711Format,
        max_payload_size: usize,
        generate_rtp_packets: bool,
    ) -> Result<Self> {
        let linear = LpcmFormat {
            payload_type: format.payload_type,
            bit_depth: 8,
            sample_rate: format.sample_rate,
            channel_count: format.channel_count,
        };

        Ok(Self {
            inner: Lpcm::new(&linear, max_payload_size, generate_rtp_packets)?,
        })
    }

    pub fn timestamp_origin(&self) -> u32 {
        self.inner.timestamp_origin()
    }

    pub fn is_decoding(&self) -> bool {
        self.inner.is_decoding()
    }

    pub fn process_unit(&mut self, unit: &mut Unit) -> Result<()> {
        self.inner.process_unit(unit)
    }

    pub fn process_rtp_packet(
        &mut self,
        pkt: Packet,
        ntp: SystemTime,
        pts: i64,
        needs_decoding: bool,
    ) -> Result<Unit> {
        self.inner.process_rtp_packet(pkt, ntp, pts, needs_decoding)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_stereo_pcma_packs_sample_pairs() {
        let format = G711Format {
            channel_count: 2,
            ..G711Format::pcma()
        };
        // budget of 11 bytes holds 5 stereo frames
        let mut proc = G711::new(&format, 23, true).unwrap();

        let samples = Bytes::from_static(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12]);
        let mut unit = Unit::samples(0, SystemTime::UNIX_EPOCH, samples);
        proc.process_unit(&mut unit).unwrap();

        let sizes: Vec<usize> = unit.rtp_packets.iter().map(|p| p.payload.len()).collect();
        assert_eq!(sizes, vec![10, 2]);
        assert!(unit.rtp_packets.iter().all(|p| p.header.payload_type == 8));
        assert_eq!(
            unit.rtp_packets[1]
                .header
                .timestamp
                .wrapping_sub(unit.rtp_packets[0].header.timestamp),
            5
        );
    }

    #[test]
    fn test_mono_odd_sample_count() {
        let mut proc = G711::new(&G711Format::pcmu(), 1472, true).unwrap();
        let mut unit = Unit::samples(0, SystemTime::UNIX_EPOCH, Bytes::from_static(&[1, 2, 3]));
        proc.process_unit(&mut unit).unwrap();
        assert_eq!(unit.rtp_packets.len(), 1);
        assert_eq!(&unit.rtp_packets[0].payload[..], &[1, 2, 3]);
    }
}
