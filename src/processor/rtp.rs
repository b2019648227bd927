//! Outgoing RTP packet construction shared by all encoders

use bytes::Bytes;
use rtp::header::Header;
use rtp::packet::Packet;

use crate::error::{ProcessorError, Result};

const RTP_VERSION: u8 = 2;

/// Stamps outgoing packets with payload type, SSRC and sequence numbers.
///
/// Codec encoders decide how a unit is split into payloads; the writer turns
/// each payload into a packet. Timestamps written here are offsets within the
/// unit: the processor adds its random origin and the unit PTS afterwards.
#[derive(Debug)]
pub(crate) struct PacketWriter {
    payload_type: u8,
    ssrc: u32,
    sequence_number: u16,
    max_payload_size: usize,
}

impl PacketWriter {
    /// `max_payload_size` is the RTP payload budget, header excluded
    pub fn new(payload_type: u8, max_payload_size: usize) -> Result<Self> {
        if payload_type > 127 {
            return Err(ProcessorError::configuration(format!(
                "invalid payload type {}",
                payload_type
            ))
            .into());
        }
        if max_payload_size == 0 {
            return Err(ProcessorError::configuration("no room for RTP payload").into());
        }

        Ok(Self {
            payload_type,
            ssrc: rand::random(),
            sequence_number: rand::random(),
            max_payload_size,
        })
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    pub fn write(&mut self, timestamp: u32, marker: bool, payload: Bytes) -> Packet {
        let header = Header {
            version: RTP_VERSION,
            marker,
            payload_type: self.payload_type,
            sequence_number: self.sequence_number,
            timestamp,
            ssrc: self.ssrc,
            ..Default::default()
        };
        self.sequence_number = self.sequence_number.wrapping_add(1);

        Packet {
            header,
            payload,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_numbers_increase() {
        let mut writer = PacketWriter::new(96, 1460).unwrap();

        let first = writer.write(0, false, Bytes::from_static(&[1]));
        let second = writer.write(0, true, Bytes::from_static(&[2]));

        assert_eq!(first.header.version, 2);
        assert_eq!(first.header.payload_type, 96);
        assert_eq!(first.header.ssrc, second.header.ssrc);
        assert_eq!(
            second.header.sequence_number,
            first.header.sequence_number.wrapping_add(1)
        );
        assert!(!first.header.marker);
        assert!(second.header.marker);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(PacketWriter::new(128, 1460).is_err());
        assert!(PacketWriter::new(96, 0).is_err());
    }
}
