//! Format processors
//!
//! A format processor converts between the two representations of a media
//! unit for one codec:
//!
//! ```text
//!   decoded unit ──process_unit──► unit + RTP packets      (encode)
//!   RTP packet ──process_rtp_packet──► unit [+ payload]    (decode)
//! ```
//!
//! Every processor owns a random RTP timestamp origin drawn at construction.
//! Packets it produces carry `origin + pts` (wrapping), so the same stream
//! never exposes its PTS base to the network.
//!
//! Decoding is lazy and sticky: the decoder is only built the first time a
//! packet arrives while some reader wants decoded data, and once built it
//! keeps decoding every packet so that its reassembly state stays coherent.

pub mod g711;
pub mod h264;
pub mod lpcm;
pub mod mpeg4audio;
pub mod opus;
mod rtp;

use std::time::SystemTime;

use ::rtp::packet::Packet;
use util::marshal::MarshalSize;

use crate::config::RTP_HEADER_SIZE;
use crate::description::Format;
use crate::error::{ProcessorError, Result};
use crate::unit::{Payload, Unit};

pub use self::g711::G711;
pub use self::h264::H264;
pub use self::lpcm::Lpcm;
pub use self::mpeg4audio::Mpeg4Audio;
pub use self::opus::Opus;

/// RTP payload budget left by a maximum UDP payload size
pub(crate) fn rtp_budget(max_payload_size: usize) -> usize {
    max_payload_size.saturating_sub(RTP_HEADER_SIZE)
}

/// Normalize an inbound packet: drop padding and enforce the size limit.
///
/// Padding bytes have already been stripped from the payload when the
/// packet was parsed; clearing the flag makes the packet re-marshal without
/// them.
pub(crate) fn prepare_packet(pkt: &mut Packet, max_payload_size: usize) -> Result<()> {
    pkt.header.padding = false;

    let size = pkt.marshal_size();
    if size > max_payload_size {
        return Err(ProcessorError::OversizedPacket {
            size,
            max: max_payload_size,
        }
        .into());
    }
    Ok(())
}

/// Turn unit-relative packet timestamps into wire timestamps
pub(crate) fn stamp(packets: &mut [Packet], random_start: u32, pts: i64) {
    let base = random_start.wrapping_add(pts as u32);
    for pkt in packets {
        pkt.header.timestamp = base.wrapping_add(pkt.header.timestamp);
    }
}

/// Build the decoder on first demand, then keep returning it
pub(crate) fn sticky_decoder<D>(
    slot: &mut Option<D>,
    needs_decoding: bool,
    create: impl FnOnce() -> D,
) -> Option<&mut D> {
    if slot.is_none() && needs_decoding {
        *slot = Some(create());
    }
    slot.as_mut()
}

/// Encoding error for a unit whose payload does not suit the codec
pub(crate) fn wrong_payload(expected: &str, got: &Option<Payload>) -> crate::error::Error {
    let got = got.as_ref().map(Payload::kind).unwrap_or("nothing");
    ProcessorError::encoding(format!("expected {}, got {}", expected, got)).into()
}

/// Codec-specific processor for one format of a track
#[derive(Debug)]
pub enum FormatProcessor {
    G711(G711),
    Lpcm(Lpcm),
    H264(H264),
    Opus(Opus),
    Mpeg4Audio(Mpeg4Audio),
}

impl FormatProcessor {
    /// Build the processor for a format.
    ///
    /// Encoders are only built when `generate_rtp_packets` is set; a stream
    /// that only relays received packets has no use for them.
    pub fn new(format: &Format, max_payload_size: usize, generate_rtp_packets: bool) -> Result<Self> {
        let proc = match format {
            Format::G711(f) => {
                FormatProcessor::G711(G711::new(f, max_payload_size, generate_rtp_packets)?)
            }
            Format::Lpcm(f) => {
                FormatProcessor::Lpcm(Lpcm::new(f, max_payload_size, generate_rtp_packets)?)
            }
            Format::H264(f) => {
                FormatProcessor::H264(H264::new(f, max_payload_size, generate_rtp_packets)?)
            }
            Format::Opus(f) => {
                FormatProcessor::Opus(Opus::new(f, max_payload_size, generate_rtp_packets)?)
            }
            Format::Mpeg4Audio(f) => FormatProcessor::Mpeg4Audio(Mpeg4Audio::new(
                f,
                max_payload_size,
                generate_rtp_packets,
            )?),
        };
        Ok(proc)
    }

    /// Encode a decoded unit into RTP packets, in place
    pub fn process_unit(&mut self, unit: &mut Unit) -> Result<()> {
        match self {
            FormatProcessor::G711(p) => p.process_unit(unit),
            FormatProcessor::Lpcm(p) => p.process_unit(unit),
            FormatProcessor::H264(p) => p.process_unit(unit),
            FormatProcessor::Opus(p) => p.process_unit(unit),
            FormatProcessor::Mpeg4Audio(p) => p.process_unit(unit),
        }
    }

    /// Wrap an inbound RTP packet into a unit, decoding it if asked to (or
    /// if decoding was asked for before)
    pub fn process_rtp_packet(
        &mut self,
        pkt: Packet,
        ntp: SystemTime,
        pts: i64,
        needs_decoding: bool,
    ) -> Result<Unit> {
        match self {
            FormatProcessor::G711(p) => p.process_rtp_packet(pkt, ntp, pts, needs_decoding),
            FormatProcessor::Lpcm(p) => p.process_rtp_packet(pkt, ntp, pts, needs_decoding),
            FormatProcessor::H264(p) => p.process_rtp_packet(pkt, ntp, pts, needs_decoding),
            FormatProcessor::Opus(p) => p.process_rtp_packet(pkt, ntp, pts, needs_decoding),
            FormatProcessor::Mpeg4Audio(p) => p.process_rtp_packet(pkt, ntp, pts, needs_decoding),
        }
    }

    /// Random RTP timestamp origin of this processor
    pub fn timestamp_origin(&self) -> u32 {
        match self {
            FormatProcessor::G711(p) => p.timestamp_origin(),
            FormatProcessor::Lpcm(p) => p.timestamp_origin(),
            FormatProcessor::H264(p) => p.timestamp_origin(),
            FormatProcessor::Opus(p) => p.timestamp_origin(),
            FormatProcessor::Mpeg4Audio(p) => p.timestamp_origin(),
        }
    }

    /// Whether the decoder has been built
    pub fn is_decoding(&self) -> bool {
        match self {
            FormatProcessor::G711(p) => p.is_decoding(),
            FormatProcessor::Lpcm(p) => p.is_decoding(),
            FormatProcessor::H264(p) => p.is_decoding(),
            FormatProcessor::Opus(p) => p.is_decoding(),
            FormatProcessor::Mpeg4Audio(p) => p.is_decoding(),
        }
    }
}

#[cfg(test)]
mod tests {
    use ::rtp::header::Header;
    use bytes::Bytes;

    use super::*;
    use crate::description::{G711Format, H264Format};
    use crate::error::Error;

    fn packet(payload_len: usize, padding: bool) -> Packet {
        Packet {
            header: Header {
                version: 2,
                padding,
                payload_type: 8,
                sequence_number: 123,
                timestamp: 45678,
                ssrc: 9012,
                ..Default::default()
            },
            payload: Bytes::from(vec![1u8; payload_len]),
            ..Default::default()
        }
    }

    fn pcma(generate: bool) -> FormatProcessor {
        FormatProcessor::new(&Format::G711(G711Format::pcma()), 1472, generate).unwrap()
    }

    #[test]
    fn test_padding_is_removed() {
        let mut proc = pcma(false);
        let unit = proc
            .process_rtp_packet(packet(4, true), SystemTime::UNIX_EPOCH, 0, false)
            .unwrap();

        let pkt = &unit.rtp_packets[0];
        assert!(!pkt.header.padding);
        assert_eq!(pkt.marshal_size(), RTP_HEADER_SIZE + 4);
        assert!(!unit.is_decoded());
    }

    #[test]
    fn test_size_boundary() {
        let mut proc = pcma(false);

        let exact = packet(1472 - RTP_HEADER_SIZE, false);
        assert!(proc
            .process_rtp_packet(exact, SystemTime::UNIX_EPOCH, 0, false)
            .is_ok());

        let over = packet(1472 - RTP_HEADER_SIZE + 1, false);
        let err = proc
            .process_rtp_packet(over, SystemTime::UNIX_EPOCH, 0, false)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Processor(ProcessorError::OversizedPacket {
                size: 1473,
                max: 1472
            })
        ));
        assert_eq!(
            err.to_string(),
            "Payload size (1473) is greater than maximum allowed (1472)"
        );
    }

    #[test]
    fn test_decoder_is_sticky() {
        let mut proc = pcma(false);

        let unit = proc
            .process_rtp_packet(packet(4, false), SystemTime::UNIX_EPOCH, 0, false)
            .unwrap();
        assert!(!unit.is_decoded());
        assert!(!proc.is_decoding());

        let unit = proc
            .process_rtp_packet(packet(4, false), SystemTime::UNIX_EPOCH, 0, true)
            .unwrap();
        assert_eq!(unit.get_samples(), Some(&Bytes::from_static(&[1, 1, 1, 1])));

        // keeps decoding after readers stop asking
        let unit = proc
            .process_rtp_packet(packet(4, false), SystemTime::UNIX_EPOCH, 0, false)
            .unwrap();
        assert!(unit.is_decoded());
        assert!(proc.is_decoding());
    }

    #[test]
    fn test_timestamp_is_origin_plus_pts() {
        let mut proc = pcma(true);
        let mut unit = Unit::samples(
            30000,
            SystemTime::UNIX_EPOCH,
            Bytes::from_static(&[1, 2, 3, 4]),
        );
        proc.process_unit(&mut unit).unwrap();

        assert_eq!(
            unit.rtp_packets[0].header.timestamp,
            proc.timestamp_origin().wrapping_add(30000)
        );
    }

    #[test]
    fn test_origins_are_independent() {
        // 16 draws of a random u32 will not all collide
        let origins: Vec<u32> = (0..16).map(|_| pcma(true).timestamp_origin()).collect();
        assert!(origins.iter().any(|o| *o != origins[0]));
    }

    #[test]
    fn test_relay_only_does_not_encode() {
        let mut proc = pcma(false);
        let mut unit = Unit::samples(0, SystemTime::UNIX_EPOCH, Bytes::from_static(&[1, 2]));
        proc.process_unit(&mut unit).unwrap();
        assert!(unit.rtp_packets.is_empty());
    }

    #[test]
    fn test_wrong_payload_shape() {
        let mut proc = pcma(true);
        let mut unit = Unit::access_unit(0, SystemTime::UNIX_EPOCH, vec![Bytes::from_static(&[5])]);
        assert!(matches!(
            proc.process_unit(&mut unit),
            Err(Error::Processor(ProcessorError::Encoding(_)))
        ));
    }

    #[test]
    fn test_wrong_payload_names_both_shapes() {
        let err = wrong_payload("samples", &Some(Payload::AccessUnit(vec![])));
        let message = err.to_string();
        assert!(message.contains("expected samples"));
        assert!(message.contains(Payload::AccessUnit(vec![]).kind()));

        let err = wrong_payload("packets", &None);
        assert!(err.to_string().contains("got nothing"));
    }

    #[test]
    fn test_configuration_error_is_fatal() {
        let format = Format::H264(H264Format {
            packetization_mode: 2,
            ..H264Format::new(96)
        });
        let err = FormatProcessor::new(&format, 1472, true).unwrap_err();
        assert!(err.is_fatal());
    }
}
