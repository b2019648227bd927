//! Opus format processor (RFC 7587)
//!
//! Each Opus packet travels in its own RTP packet. Opus packets are never
//! fragmented, so a unit holding a packet larger than the payload budget
//! cannot be sent.

use std::time::SystemTime;

use bytes::Bytes;
use rtp::packet::Packet;

use crate::description::OpusFormat;
use crate::error::{ProcessorError, Result};
use crate::media::opus::packet_duration;
use crate::unit::{Payload, Unit};

use super::rtp::PacketWriter;
use super::{prepare_packet, stamp, sticky_decoder, wrong_payload};

#[derive(Debug)]
pub(crate) struct OpusEncoder {
    writer: PacketWriter,
}

impl OpusEncoder {
    pub fn new(writer: PacketWriter) -> Self {
        Self { writer }
    }

    /// One RTP packet per Opus packet, timestamps advanced by packet duration
    pub fn encode(&mut self, packets: &[Bytes]) -> Result<Vec<Packet>> {
        if packets.is_empty() {
            return Err(ProcessorError::encoding("no Opus packets").into());
        }

        let max = self.writer.max_payload_size();
        let mut out = Vec::with_capacity(packets.len());
        let mut timestamp = 0u32;

        for packet in packets {
            if packet.len() > max {
                return Err(ProcessorError::encoding(format!(
                    "Opus packet of {} bytes exceeds payload budget ({})",
                    packet.len(),
                    max
                ))
                .into());
            }
            let duration =
                packet_duration(packet).map_err(|e| ProcessorError::encoding(e.to_string()))?;
            out.push(self.writer.write(timestamp, false, packet.clone()));
            timestamp = timestamp.wrapping_add(duration);
        }

        Ok(out)
    }
}

#[derive(Debug, Default)]
pub(crate) struct OpusDecoder;

impl OpusDecoder {
    pub fn decode(&self, pkt: &Packet) -> Result<Bytes> {
        if pkt.payload.is_empty() {
            return Err(ProcessorError::decode("empty Opus packet").into());
        }
        Ok(pkt.payload.clone())
    }
}

/// Format processor for Opus
#[derive(Debug)]
pub struct Opus {
    max_payload_size: usize,
    encoder: Option<OpusEncoder>,
    decoder: Option<OpusDecoder>,
    random_start: u32,
}

impl Opus {
    pub(crate) fn new(
        format: &OpusFormat,
        max_payload_size: usize,
        generate_rtp_packets: bool,
    ) -> Result<Self> {
        if !matches!(format.channel_count, 1 | 2) {
            return Err(ProcessorError::configuration(format!(
                "unsupported Opus channel count {}",
                format.channel_count
            ))
            .into());
        }

        let encoder = if generate_rtp_packets {
            let writer =
                PacketWriter::new(format.payload_type, super::rtp_budget(max_payload_size))?;
            Some(OpusEncoder::new(writer))
        } else {
            None
        };

        Ok(Self {
            max_payload_size,
            encoder,
            decoder: None,
            random_start: rand::random(),
        })
    }

    pub fn timestamp_origin(&self) -> u32 {
        self.random_start
    }

    pub fn is_decoding(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn process_unit(&mut self, unit: &mut Unit) -> Result<()> {
        let Some(encoder) = self.encoder.as_mut() else {
            return Ok(());
        };

        let packets = match &unit.payload {
            Some(Payload::Packets(packets)) => packets,
            other => return Err(wrong_payload("packets", other)),
        };

        let mut out = encoder.encode(packets)?;
        stamp(&mut out, self.random_start, unit.pts);
        unit.rtp_packets = out;
        Ok(())
    }

    pub fn process_rtp_packet(
        &mut self,
        mut pkt: Packet,
        ntp: SystemTime,
        pts: i64,
        needs_decoding: bool,
    ) -> Result<Unit> {
        prepare_packet(&mut pkt, self.max_payload_size)?;

        let packet = match sticky_decoder(&mut self.decoder, needs_decoding, OpusDecoder::default)
        {
            Some(decoder) => Some(decoder.decode(&pkt)?),
            None => None,
        };

        let mut unit = Unit::from_rtp(pkt, ntp, pts);
        unit.payload = packet.map(|p| Payload::Packets(vec![p]));
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stereo() -> OpusFormat {
        OpusFormat {
            payload_type: 111,
            channel_count: 2,
        }
    }

    #[test]
    fn test_timestamps_follow_packet_duration() {
        let mut proc = Opus::new(&stereo(), 1472, true).unwrap();

        // CELT 20 ms (960), then CELT 10 ms (480)
        let packets = vec![
            Bytes::from_static(&[0xF8, 0xFF, 0xFE]),
            Bytes::from_static(&[0xF0, 0x01]),
            Bytes::from_static(&[0xF8, 0x02]),
        ];
        let mut unit = Unit::new(480, SystemTime::UNIX_EPOCH, Payload::Packets(packets));
        proc.process_unit(&mut unit).unwrap();

        let origin = proc.timestamp_origin();
        let timestamps: Vec<u32> = unit
            .rtp_packets
            .iter()
            .map(|p| p.header.timestamp.wrapping_sub(origin))
            .collect();
        assert_eq!(timestamps, vec![480, 1440, 1920]);
    }

    #[test]
    fn test_oversized_packet_is_encoding_error() {
        let mut proc = Opus::new(&stereo(), 40, true).unwrap();
        let mut big = vec![0xF8];
        big.extend([0u8; 40]);

        let mut unit = Unit::new(
            0,
            SystemTime::UNIX_EPOCH,
            Payload::Packets(vec![Bytes::from(big)]),
        );
        let err = proc.process_unit(&mut unit).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Processor(ProcessorError::Encoding(_))
        ));
        assert!(unit.rtp_packets.is_empty());
    }

    #[test]
    fn test_malformed_toc_is_encoding_error() {
        let mut proc = Opus::new(&stereo(), 1472, true).unwrap();

        // code 3 with a frame count of zero
        let mut unit = Unit::new(
            0,
            SystemTime::UNIX_EPOCH,
            Payload::Packets(vec![Bytes::from_static(&[0xFB, 0x00])]),
        );
        let err = proc.process_unit(&mut unit).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Processor(ProcessorError::Encoding(_))
        ));
        assert!(!err.is_fatal());
        assert!(unit.rtp_packets.is_empty());
    }

    #[test]
    fn test_decode_yields_one_packet() {
        let mut proc = Opus::new(&stereo(), 1472, false).unwrap();
        let mut pkt = Packet::default();
        pkt.payload = Bytes::from_static(&[0xF8, 0xAA]);

        let unit = proc
            .process_rtp_packet(pkt, SystemTime::UNIX_EPOCH, 0, true)
            .unwrap();
        assert_eq!(
            unit.get_packets().unwrap(),
            &[Bytes::from_static(&[0xF8, 0xAA])]
        );
    }

    #[test]
    fn test_rejects_surround() {
        let format = OpusFormat {
            payload_type: 111,
            channel_count: 6,
        };
        assert!(Opus::new(&format, 1472, true).is_err());
    }
}
