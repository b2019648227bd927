//! Linear PCM format processor (L8 / L16 / L24)
//!
//! Samples are packed back to back: a packet holds as many whole sample
//! frames (one sample per channel) as fit in the payload budget. There is
//! no fragmentation and no auxiliary data, so decoding is the identity on
//! the payload once its length has been checked.

use std::time::SystemTime;

use bytes::Bytes;
use rtp::packet::Packet;

use crate::description::LpcmFormat;
use crate::error::{ProcessorError, Result};
use crate::unit::{Payload, Unit};

use super::rtp::PacketWriter;
use super::{prepare_packet, stamp, sticky_decoder, wrong_payload};

/// Bytes of one sample frame (all channels)
fn sample_size(bit_depth: u8, channel_count: u8) -> Result<usize> {
    if !matches!(bit_depth, 8 | 16 | 24) {
        return Err(
            ProcessorError::configuration(format!("unsupported bit depth {}", bit_depth)).into(),
        );
    }
    if channel_count == 0 {
        return Err(ProcessorError::configuration("channel count must be positive").into());
    }
    Ok(bit_depth as usize / 8 * channel_count as usize)
}

/// Splits a sample buffer across packets
#[derive(Debug)]
pub(crate) struct LpcmEncoder {
    writer: PacketWriter,
    sample_size: usize,
    max_chunk: usize,
}

impl LpcmEncoder {
    pub fn new(writer: PacketWriter, sample_size: usize) -> Result<Self> {
        let max_chunk = (writer.max_payload_size() / sample_size) * sample_size;
        if max_chunk == 0 {
            return Err(ProcessorError::configuration(format!(
                "payload budget ({}) smaller than one sample frame ({})",
                writer.max_payload_size(),
                sample_size
            ))
            .into());
        }

        Ok(Self {
            writer,
            sample_size,
            max_chunk,
        })
    }

    /// Encode samples; packet timestamps are sample offsets within the buffer
    pub fn encode(&mut self, samples: &Bytes) -> Result<Vec<Packet>> {
        if samples.is_empty() {
            return Err(ProcessorError::encoding("no samples").into());
        }
        if samples.len() % self.sample_size != 0 {
            return Err(ProcessorError::encoding(format!(
                "sample buffer of {} bytes is not a multiple of the sample size ({})",
                samples.len(),
                self.sample_size
            ))
            .into());
        }

        let mut packets = Vec::with_capacity(samples.len().div_ceil(self.max_chunk));
        let mut offset = 0;
        while offset < samples.len() {
            let end = (offset + self.max_chunk).min(samples.len());
            let timestamp = (offset / self.sample_size) as u32;
            packets.push(
                self.writer
                    .write(timestamp, false, samples.slice(offset..end)),
            );
            offset = end;
        }

        Ok(packets)
    }
}

#[derive(Debug)]
pub(crate) struct LpcmDecoder {
    sample_size: usize,
}

impl LpcmDecoder {
    pub fn new(sample_size: usize) -> Self {
        Self { sample_size }
    }

    pub fn decode(&self, pkt: &Packet) -> Result<Bytes> {
        if pkt.payload.is_empty() || pkt.payload.len() % self.sample_size != 0 {
            return Err(ProcessorError::decode(format!(
                "received payload of wrong size ({} bytes, sample size {})",
                pkt.payload.len(),
                self.sample_size
            ))
            .into());
        }
        Ok(pkt.payload.clone())
    }
}

/// Format processor for linear PCM
#[derive(Debug)]
pub struct Lpcm {
    max_payload_size: usize,
    sample_size: usize,
    encoder: Option<LpcmEncoder>,
    decoder: Option<LpcmDecoder>,
    random_start: u32,
}

impl Lpcm {
    pub(crate) fn new(
        format: &LpcmFormat,
        max_payload_size: usize,
        generate_rtp_packets: bool,
    ) -> Result<Self> {
        let sample_size = sample_size(format.bit_depth, format.channel_count)?;

        let encoder = if generate_rtp_packets {
            let writer =
                PacketWriter::new(format.payload_type, super::rtp_budget(max_payload_size))?;
            Some(LpcmEncoder::new(writer, sample_size)?)
        } else {
            None
        };

        Ok(Self {
            max_payload_size,
            sample_size,
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

        let samples = match &unit.payload {
            Some(Payload::Samples(samples)) => samples,
            other => return Err(wrong_payload("samples", other)),
        };

        let mut packets = encoder.encode(samples)?;
        stamp(&mut packets, self.random_start, unit.pts);
        unit.rtp_packets = packets;
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

        let sample_size = self.sample_size;
        let samples = match sticky_decoder(&mut self.decoder, needs_decoding, || {
            LpcmDecoder::new(sample_size)
        }) {
            Some(decoder) => Some(decoder.decode(&pkt)?),
            None => None,
        };

        let mut unit = Unit::from_rtp(pkt, ntp, pts);
        unit.payload = samples.map(Payload::Samples);
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l16_stereo() -> LpcmFormat {
        LpcmFormat {
            payload_type: 96,
            bit_depth: 16,
            sample_rate: 48000,
            channel_count: 2,
        }
    }

    #[test]
    fn test_round_trip_across_packets() {
        // 100 bytes of budget = 25 stereo L16 frames per packet
        let mut proc = Lpcm::new(&l16_stereo(), 112, true).unwrap();
        let samples = Bytes::from((0..240u32).map(|i| i as u8).collect::<Vec<_>>());

        let mut unit = Unit::samples(1000, SystemTime::UNIX_EPOCH, samples.clone());
        proc.process_unit(&mut unit).unwrap();
        assert_eq!(unit.rtp_packets.len(), 3);

        let origin = proc.timestamp_origin();
        let timestamps: Vec<u32> = unit
            .rtp_packets
            .iter()
            .map(|p| p.header.timestamp)
            .collect();
        assert_eq!(
            timestamps,
            vec![
                origin.wrapping_add(1000),
                origin.wrapping_add(1025),
                origin.wrapping_add(1050)
            ]
        );

        let mut receiver = Lpcm::new(&l16_stereo(), 112, false).unwrap();
        let mut decoded = Vec::new();
        for pkt in unit.rtp_packets {
            let u = receiver
                .process_rtp_packet(pkt, SystemTime::UNIX_EPOCH, 0, true)
                .unwrap();
            decoded.extend_from_slice(u.get_samples().unwrap());
        }
        assert_eq!(Bytes::from(decoded), samples);
    }

    #[test]
    fn test_encode_rejects_partial_frame() {
        let mut proc = Lpcm::new(&l16_stereo(), 1472, true).unwrap();
        let mut unit = Unit::samples(0, SystemTime::UNIX_EPOCH, Bytes::from_static(&[0; 6]));
        let err = proc.process_unit(&mut unit).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Processor(ProcessorError::Encoding(_))
        ));
    }

    #[test]
    fn test_decode_rejects_partial_frame() {
        let mut proc = Lpcm::new(&l16_stereo(), 1472, false).unwrap();
        let mut pkt = Packet::default();
        pkt.payload = Bytes::from_static(&[0; 5]);

        let err = proc
            .process_rtp_packet(pkt, SystemTime::UNIX_EPOCH, 0, true)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Processor(ProcessorError::Decode(_))
        ));
    }

    #[test]
    fn test_invalid_formats() {
        let mut format = l16_stereo();
        format.bit_depth = 12;
        assert!(Lpcm::new(&format, 1472, false).is_err());

        let mut format = l16_stereo();
        format.channel_count = 0;
        assert!(Lpcm::new(&format, 1472, false).is_err());

        // 24-bit 8 channels = 24 byte frames, budget of 20 bytes
        let format = LpcmFormat {
            payload_type: 96,
            bit_depth: 24,
            sample_rate: 48000,
            channel_count: 8,
        };
        assert!(Lpcm::new(&format, 32, true).is_err());
        assert!(Lpcm::new(&format, 32, false).is_ok());
    }
}
