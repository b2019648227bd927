//! H.264 format processor (RFC 6184, packetization mode 1)
//!
//! Outgoing access units are packetized as:
//! - STAP-A when several small NAL units fit in one packet
//! - a single NAL unit packet when one NAL unit fits alone
//! - FU-A fragments when a NAL unit exceeds the payload budget
//!
//! Parameter sets are tracked from the stream itself: SPS/PPS found in an
//! access unit replace the stored ones and are removed from the unit, and
//! every IDR access unit is re-emitted with the current SPS/PPS in front so
//! that readers joining mid-stream can start decoding at the next keyframe.

use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use rtp::packet::Packet;

use crate::description::H264Format;
use crate::error::{ProcessorError, Result};
use crate::media::h264::{is_random_access, level_string, profile_name, NaluType};
use crate::unit::{Payload, Unit};

use super::rtp::PacketWriter;
use super::{prepare_packet, stamp, sticky_decoder, wrong_payload};

/// Upper bound on NAL units in one access unit
const MAX_NALUS_PER_AU: usize = 1024;

/// Upper bound on the size of a reassembled NAL unit or access unit
const MAX_AU_SIZE: usize = 8 * 1024 * 1024;

/// FU-A indicator + FU header
const FU_A_OVERHEAD: usize = 2;

/// STAP-A NAL header
const STAP_A_HEADER: usize = 1;

/// Per-NALU size field inside a STAP-A
const STAP_A_LENGTH: usize = 2;

#[derive(Debug)]
pub(crate) struct H264Encoder {
    writer: PacketWriter,
}

impl H264Encoder {
    pub fn new(writer: PacketWriter) -> Result<Self> {
        if writer.max_payload_size() <= FU_A_OVERHEAD {
            return Err(ProcessorError::configuration(format!(
                "payload budget ({}) too small for FU-A fragmentation",
                writer.max_payload_size()
            ))
            .into());
        }
        Ok(Self { writer })
    }

    /// Encode one access unit; the last packet carries the marker bit
    pub fn encode(&mut self, nalus: &[Bytes]) -> Result<Vec<Packet>> {
        if nalus.is_empty() {
            return Err(ProcessorError::encoding("empty access unit").into());
        }

        let max = self.writer.max_payload_size();
        let mut payloads = Vec::new();
        let mut batch: Vec<&Bytes> = Vec::new();
        let mut batch_size = STAP_A_HEADER;

        for nalu in nalus {
            if nalu.is_empty() {
                return Err(ProcessorError::encoding("empty NAL unit").into());
            }

            if nalu.len() > max {
                Self::flush_batch(&mut batch, &mut payloads);
                batch_size = STAP_A_HEADER;
                Self::fragment(nalu, max, &mut payloads);
                continue;
            }

            // too long for a STAP-A size field
            if nalu.len() > u16::MAX as usize {
                Self::flush_batch(&mut batch, &mut payloads);
                batch_size = STAP_A_HEADER;
                payloads.push(nalu.clone());
                continue;
            }

            if batch_size + STAP_A_LENGTH + nalu.len() > max {
                Self::flush_batch(&mut batch, &mut payloads);
                batch_size = STAP_A_HEADER;
            }
            batch.push(nalu);
            batch_size += STAP_A_LENGTH + nalu.len();
        }
        Self::flush_batch(&mut batch, &mut payloads);

        let count = payloads.len();
        Ok(payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| self.writer.write(0, i == count - 1, payload))
            .collect())
    }

    fn flush_batch(batch: &mut Vec<&Bytes>, payloads: &mut Vec<Bytes>) {
        match batch.len() {
            0 => {}
            1 => payloads.push(batch[0].clone()),
            _ => {
                let size = batch.iter().map(|n| STAP_A_LENGTH + n.len()).sum::<usize>();
                let nri = batch.iter().map(|n| n[0] & 0x60).max().unwrap_or(0);

                let mut buf = BytesMut::with_capacity(STAP_A_HEADER + size);
                buf.put_u8(nri | NaluType::StapA as u8);
                for nalu in batch.iter() {
                    buf.put_u16(nalu.len() as u16);
                    buf.put_slice(nalu);
                }
                payloads.push(buf.freeze());
            }
        }
        batch.clear();
    }

    fn fragment(nalu: &Bytes, max: usize, payloads: &mut Vec<Bytes>) {
        let header = nalu[0];
        let indicator = (header & 0xE0) | NaluType::FuA as u8;
        let nalu_type = header & 0x1F;

        let data = nalu.slice(1..);
        let chunk = max - FU_A_OVERHEAD;
        let count = data.len().div_ceil(chunk);

        for (i, start) in (0..data.len()).step_by(chunk).enumerate() {
            let end = (start + chunk).min(data.len());

            let mut fu_header = nalu_type;
            if i == 0 {
                fu_header |= 0x80;
            }
            if i == count - 1 {
                fu_header |= 0x40;
            }

            let mut buf = BytesMut::with_capacity(FU_A_OVERHEAD + end - start);
            buf.put_u8(indicator);
            buf.put_u8(fu_header);
            buf.put_slice(&data[start..end]);
            payloads.push(buf.freeze());
        }
    }
}

/// Reassembles access units from RTP packets
#[derive(Debug, Default)]
pub(crate) struct H264Decoder {
    /// NAL unit being reassembled from FU-A fragments
    fragment: Option<Fragment>,
    /// NAL units of the access unit in progress
    frame: Vec<Bytes>,
    frame_size: usize,
}

#[derive(Debug)]
struct Fragment {
    buf: BytesMut,
    next_sequence_number: u16,
}

impl H264Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet. Returns the access unit once its last packet
    /// (marker bit) has been received.
    pub fn decode(&mut self, pkt: &Packet) -> Result<Option<Vec<Bytes>>> {
        let payload = &pkt.payload;
        if payload.is_empty() {
            return Err(ProcessorError::decode("empty RTP payload").into());
        }

        match NaluType::from_byte(payload[0]) {
            Some(NaluType::FuA) => {
                if !self.decode_fragment(pkt)? {
                    return Ok(None);
                }
            }
            Some(other) if self.fragment.is_some() => {
                self.reset();
                return Err(ProcessorError::decode(format!(
                    "received {:?} while reassembling a fragmented NAL unit",
                    other
                ))
                .into());
            }
            Some(NaluType::StapA) => {
                let mut rest = payload.slice(STAP_A_HEADER..);
                while !rest.is_empty() {
                    if rest.len() < STAP_A_LENGTH {
                        self.reset();
                        return Err(ProcessorError::decode("truncated STAP-A").into());
                    }
                    let size = u16::from_be_bytes([rest[0], rest[1]]) as usize;
                    if size == 0 || rest.len() < STAP_A_LENGTH + size {
                        self.reset();
                        return Err(ProcessorError::decode("invalid STAP-A NAL unit size").into());
                    }
                    self.push_nalu(rest.slice(STAP_A_LENGTH..STAP_A_LENGTH + size))?;
                    rest = rest.slice(STAP_A_LENGTH + size..);
                }
            }
            Some(
                t @ (NaluType::StapB | NaluType::Mtap16 | NaluType::Mtap24 | NaluType::FuB),
            ) => {
                return Err(ProcessorError::decode(format!(
                    "packetization {:?} is not supported",
                    t
                ))
                .into());
            }
            Some(_) => self.push_nalu(payload.clone())?,
            None => {
                self.reset();
                return Err(ProcessorError::decode(format!(
                    "invalid NAL unit type {}",
                    payload[0] & 0x1F
                ))
                .into());
            }
        }

        if !pkt.header.marker || self.frame.is_empty() {
            return Ok(None);
        }
        self.frame_size = 0;
        Ok(Some(std::mem::take(&mut self.frame)))
    }

    /// Returns true once the fragmented NAL unit is complete
    fn decode_fragment(&mut self, pkt: &Packet) -> Result<bool> {
        let payload = &pkt.payload;
        if payload.len() < FU_A_OVERHEAD + 1 {
            self.reset();
            return Err(ProcessorError::decode("invalid FU-A packet").into());
        }

        let fu_header = payload[1];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let sequence_number = pkt.header.sequence_number;

        if start {
            if end {
                self.reset();
                return Err(
                    ProcessorError::decode("FU-A packet with both start and end bits").into(),
                );
            }
            let mut buf = BytesMut::with_capacity(payload.len() * 4);
            buf.put_u8((payload[0] & 0xE0) | (fu_header & 0x1F));
            buf.put_slice(&payload[FU_A_OVERHEAD..]);
            self.fragment = Some(Fragment {
                buf,
                next_sequence_number: sequence_number.wrapping_add(1),
            });
            return Ok(false);
        }

        let Some(fragment) = self.fragment.as_mut() else {
            // joined mid-NALU: wait for the next start fragment
            return Ok(false);
        };

        if sequence_number != fragment.next_sequence_number {
            self.reset();
            return Err(ProcessorError::decode(
                "discarding fragmented NAL unit since an RTP packet is missing",
            )
            .into());
        }
        if fragment.buf.len() + payload.len() - FU_A_OVERHEAD > MAX_AU_SIZE {
            self.reset();
            return Err(ProcessorError::decode(format!(
                "fragmented NAL unit exceeds {} bytes",
                MAX_AU_SIZE
            ))
            .into());
        }

        fragment.buf.put_slice(&payload[FU_A_OVERHEAD..]);
        fragment.next_sequence_number = sequence_number.wrapping_add(1);

        if !end {
            return Ok(false);
        }

        let nalu = self
            .fragment
            .take()
            .map(|f| f.buf.freeze())
            .unwrap_or_default();
        self.push_nalu(nalu)?;
        Ok(true)
    }

    fn push_nalu(&mut self, nalu: Bytes) -> Result<()> {
        if self.frame.len() >= MAX_NALUS_PER_AU {
            self.reset();
            return Err(ProcessorError::decode(format!(
                "access unit has more than {} NAL units",
                MAX_NALUS_PER_AU
            ))
            .into());
        }
        if self.frame_size + nalu.len() > MAX_AU_SIZE {
            self.reset();
            return Err(ProcessorError::decode(format!(
                "access unit exceeds {} bytes",
                MAX_AU_SIZE
            ))
            .into());
        }
        self.frame_size += nalu.len();
        self.frame.push(nalu);
        Ok(())
    }

    fn reset(&mut self) {
        self.fragment = None;
        self.frame.clear();
        self.frame_size = 0;
    }
}

/// Format processor for H.264
#[derive(Debug)]
pub struct H264 {
    max_payload_size: usize,
    encoder: Option<H264Encoder>,
    decoder: Option<H264Decoder>,
    random_start: u32,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
}

impl H264 {
    pub(crate) fn new(
        format: &H264Format,
        max_payload_size: usize,
        generate_rtp_packets: bool,
    ) -> Result<Self> {
        if format.packetization_mode != 1 {
            return Err(ProcessorError::configuration(format!(
                "unsupported packetization mode {}",
                format.packetization_mode
            ))
            .into());
        }

        let encoder = if generate_rtp_packets {
            let writer =
                PacketWriter::new(format.payload_type, super::rtp_budget(max_payload_size))?;
            Some(H264Encoder::new(writer)?)
        } else {
            None
        };

        Ok(Self {
            max_payload_size,
            encoder,
            decoder: None,
            random_start: rand::random(),
            sps: format.sps.clone(),
            pps: format.pps.clone(),
        })
    }

    pub fn timestamp_origin(&self) -> u32 {
        self.random_start
    }

    pub fn is_decoding(&self) -> bool {
        self.decoder.is_some()
    }

    /// Current parameter sets
    pub fn parameter_sets(&self) -> (Option<&Bytes>, Option<&Bytes>) {
        (self.sps.as_ref(), self.pps.as_ref())
    }

    pub fn process_unit(&mut self, unit: &mut Unit) -> Result<()> {
        let nalus = match unit.payload.take() {
            Some(Payload::AccessUnit(nalus)) => nalus,
            other => return Err(wrong_payload("access unit", &other)),
        };

        let au = self.remux(nalus);
        if au.is_empty() {
            unit.rtp_packets.clear();
            return Ok(());
        }

        if let Some(encoder) = self.encoder.as_mut() {
            let mut packets = encoder.encode(&au)?;
            stamp(&mut packets, self.random_start, unit.pts);
            unit.rtp_packets = packets;
        }
        unit.payload = Some(Payload::AccessUnit(au));
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

        let au = match sticky_decoder(&mut self.decoder, needs_decoding, H264Decoder::new) {
            Some(decoder) => decoder.decode(&pkt)?,
            None => None,
        };

        let mut unit = Unit::from_rtp(pkt, ntp, pts);
        if let Some(au) = au {
            let au = self.remux(au);
            if !au.is_empty() {
                unit.payload = Some(Payload::AccessUnit(au));
            }
        }
        Ok(unit)
    }

    /// Update parameter sets from the access unit, drop delimiters and
    /// in-band parameter sets, and put SPS/PPS in front of IDR units.
    fn remux(&mut self, nalus: Vec<Bytes>) -> Vec<Bytes> {
        let mut out = Vec::with_capacity(nalus.len() + 2);

        for nalu in nalus {
            match NaluType::of(&nalu) {
                Some(t) if t.is_parameter_set() => self.update_parameter_set(t, nalu),
                Some(NaluType::Aud) => {}
                None if nalu.is_empty() => {}
                _ => out.push(nalu),
            }
        }

        if out.is_empty() {
            return out;
        }

        if is_random_access(&out) {
            if let (Some(sps), Some(pps)) = (&self.sps, &self.pps) {
                out.insert(0, pps.clone());
                out.insert(0, sps.clone());
            }
        }
        out
    }

    fn update_parameter_set(&mut self, nalu_type: NaluType, nalu: Bytes) {
        let slot = match nalu_type {
            NaluType::Sps => &mut self.sps,
            _ => &mut self.pps,
        };
        if slot.as_ref() == Some(&nalu) {
            return;
        }

        match (nalu_type, &nalu[..]) {
            (NaluType::Sps, &[_, profile, _, level, ..]) => tracing::debug!(
                profile = profile_name(profile),
                level = %level_string(level),
                size = nalu.len(),
                "H264 SPS updated"
            ),
            _ => tracing::debug!(kind = ?nalu_type, size = nalu.len(), "H264 parameter set updated"),
        }
        *slot = Some(nalu);
    }
}

#[cfg(test)]
mod tests {
    use util::marshal::MarshalSize;

    use super::*;

    const SPS: &[u8] = &[0x67, 0x64, 0x00, 0x1F];
    const PPS: &[u8] = &[0x68, 0xEF, 0x38];

    fn format() -> H264Format {
        H264Format {
            sps: Some(Bytes::from_static(SPS)),
            pps: Some(Bytes::from_static(PPS)),
            ..H264Format::new(96)
        }
    }

    fn decode_all(packets: Vec<Packet>) -> Vec<Vec<Bytes>> {
        let mut receiver = H264::new(&H264Format::new(96), 1472, false).unwrap();
        packets
            .into_iter()
            .filter_map(|pkt| {
                receiver
                    .process_rtp_packet(pkt, SystemTime::UNIX_EPOCH, 0, true)
                    .unwrap()
                    .get_access_unit()
                    .map(|au| au.to_vec())
            })
            .collect()
    }

    #[test]
    fn test_idr_gets_parameter_sets() {
        let mut proc = H264::new(&format(), 1472, true).unwrap();
        let mut unit = Unit::access_unit(
            0,
            SystemTime::UNIX_EPOCH,
            vec![Bytes::from_static(&[0x05, 0x02, 0x03, 0x04])],
        );
        proc.process_unit(&mut unit).unwrap();

        assert_eq!(
            unit.get_access_unit().unwrap(),
            &[
                Bytes::from_static(SPS),
                Bytes::from_static(PPS),
                Bytes::from_static(&[0x05, 0x02, 0x03, 0x04]),
            ]
        );

        // everything fits in a single STAP-A
        assert_eq!(unit.rtp_packets.len(), 1);
        let pkt = &unit.rtp_packets[0];
        assert!(pkt.header.marker);
        assert_eq!(pkt.payload[0] & 0x1F, 24);
        assert_eq!(pkt.header.timestamp, proc.timestamp_origin());
    }

    #[test]
    fn test_non_idr_left_alone() {
        let mut proc = H264::new(&format(), 1472, true).unwrap();
        let p_slice = Bytes::from_static(&[0x41, 0x9A, 0x00]);
        let mut unit = Unit::access_unit(
            3000,
            SystemTime::UNIX_EPOCH,
            vec![Bytes::from_static(&[0x09, 0xF0]), p_slice.clone()],
        );
        proc.process_unit(&mut unit).unwrap();

        assert_eq!(unit.get_access_unit().unwrap(), &[p_slice.clone()]);
        assert_eq!(unit.rtp_packets.len(), 1);
        assert_eq!(unit.rtp_packets[0].payload, p_slice);
        assert_eq!(
            unit.rtp_packets[0].header.timestamp,
            proc.timestamp_origin().wrapping_add(3000)
        );
    }

    #[test]
    fn test_in_band_parameter_sets_replace_stored_ones() {
        let mut proc = H264::new(&format(), 1472, true).unwrap();
        let new_sps = Bytes::from_static(&[0x67, 0x42, 0x00, 0x0A]);
        let mut unit = Unit::access_unit(
            0,
            SystemTime::UNIX_EPOCH,
            vec![new_sps.clone(), Bytes::from_static(&[0x65, 0x88])],
        );
        proc.process_unit(&mut unit).unwrap();

        assert_eq!(proc.parameter_sets().0, Some(&new_sps));
        assert_eq!(unit.get_access_unit().unwrap()[0], new_sps);
    }

    #[test]
    fn test_truncated_sps_and_aud() {
        let mut proc = H264::new(&format(), 1472, true).unwrap();
        let short_sps = Bytes::from_static(&[0x67, 0x42]);
        let mut unit = Unit::access_unit(
            0,
            SystemTime::UNIX_EPOCH,
            vec![
                Bytes::from_static(&[0x09, 0xF0]),
                short_sps.clone(),
                Bytes::from_static(&[0x65, 0x88]),
            ],
        );
        proc.process_unit(&mut unit).unwrap();

        assert_eq!(proc.parameter_sets().0, Some(&short_sps));
        assert_eq!(
            unit.get_access_unit().unwrap(),
            &[
                short_sps,
                Bytes::from_static(PPS),
                Bytes::from_static(&[0x65, 0x88])
            ]
        );
    }

    #[test]
    fn test_parameter_sets_only_unit_is_empty() {
        let mut proc = H264::new(&format(), 1472, true).unwrap();
        let mut unit = Unit::access_unit(
            0,
            SystemTime::UNIX_EPOCH,
            vec![Bytes::from_static(SPS), Bytes::from_static(PPS)],
        );
        proc.process_unit(&mut unit).unwrap();
        assert!(unit.is_empty());
    }

    #[test]
    fn test_fragmentation_round_trip() {
        let mut proc = H264::new(&H264Format::new(96), 112, true).unwrap();
        let mut idr = vec![0x65];
        idr.extend((0..350u32).map(|i| (i % 251) as u8));
        let idr = Bytes::from(idr);
        let slice = Bytes::from_static(&[0x41, 0x01, 0x02]);

        let mut unit = Unit::access_unit(0, SystemTime::UNIX_EPOCH, vec![idr.clone(), slice.clone()]);
        proc.process_unit(&mut unit).unwrap();

        // 350 bytes of data in 98-byte chunks = 4 fragments, then the slice
        assert_eq!(unit.rtp_packets.len(), 5);
        assert!(unit.rtp_packets[..4].iter().all(|p| p.payload[0] & 0x1F == 28));
        assert_eq!(unit.rtp_packets[0].payload[1] & 0x80, 0x80);
        assert_eq!(unit.rtp_packets[3].payload[1] & 0x40, 0x40);
        assert!(unit.rtp_packets.iter().all(|p| p.marshal_size() <= 112));
        assert!(unit.rtp_packets[4].header.marker);

        let aus = decode_all(unit.rtp_packets);
        assert_eq!(aus, vec![vec![idr, slice]]);
    }

    #[test]
    fn test_nalu_too_long_for_aggregation_is_sent_alone() {
        let mut proc = H264::new(&H264Format::new(96), 100_000, true).unwrap();
        let mut big = vec![0x41];
        big.extend((0..69_999u32).map(|i| (i % 251) as u8));
        let big = Bytes::from(big);
        let small = Bytes::from(vec![0x41; 10]);

        let mut unit =
            Unit::access_unit(0, SystemTime::UNIX_EPOCH, vec![big.clone(), small.clone()]);
        proc.process_unit(&mut unit).unwrap();

        assert_eq!(unit.rtp_packets.len(), 2);
        assert!(unit.rtp_packets.iter().all(|p| p.payload[0] & 0x1F != 24));
        assert_eq!(unit.rtp_packets[0].payload, big);
        assert!(unit.rtp_packets[1].header.marker);

        let mut receiver = H264::new(&H264Format::new(96), 100_000, false).unwrap();
        let mut decoded = None;
        for pkt in unit.rtp_packets {
            let unit = receiver
                .process_rtp_packet(pkt, SystemTime::UNIX_EPOCH, 0, true)
                .unwrap();
            if let Some(au) = unit.get_access_unit() {
                decoded = Some(au.to_vec());
            }
        }
        assert_eq!(decoded, Some(vec![big, small]));
    }

    #[test]
    fn test_missing_fragment_is_decode_error() {
        let mut proc = H264::new(&H264Format::new(96), 112, true).unwrap();
        let mut idr = vec![0x65];
        idr.extend(std::iter::repeat(7u8).take(300));
        let mut unit = Unit::access_unit(0, SystemTime::UNIX_EPOCH, vec![Bytes::from(idr)]);
        proc.process_unit(&mut unit).unwrap();

        let mut receiver = H264::new(&H264Format::new(96), 1472, false).unwrap();
        let mut packets = unit.rtp_packets.into_iter();
        let first = packets.next().unwrap();
        let _lost = packets.next().unwrap();
        let third = packets.next().unwrap();

        receiver
            .process_rtp_packet(first, SystemTime::UNIX_EPOCH, 0, true)
            .unwrap();
        let err = receiver
            .process_rtp_packet(third, SystemTime::UNIX_EPOCH, 0, true)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::Processor(ProcessorError::Decode(_))
        ));
    }

    #[test]
    fn test_continuation_without_start_is_passthrough() {
        let mut receiver = H264::new(&H264Format::new(96), 1472, false).unwrap();
        let mut pkt = Packet::default();
        pkt.payload = Bytes::from_static(&[0x7C, 0x05, 0xAA, 0xBB]);

        let unit = receiver
            .process_rtp_packet(pkt, SystemTime::UNIX_EPOCH, 0, true)
            .unwrap();
        assert!(!unit.is_decoded());
        assert_eq!(unit.rtp_packets.len(), 1);
    }

    #[test]
    fn test_unsupported_packetization() {
        let mut receiver = H264::new(&H264Format::new(96), 1472, false).unwrap();
        let mut pkt = Packet::default();
        pkt.payload = Bytes::from_static(&[0x19, 0x00, 0x00]);

        assert!(receiver
            .process_rtp_packet(pkt, SystemTime::UNIX_EPOCH, 0, true)
            .is_err());
    }

    #[test]
    fn test_rejects_packetization_mode_0() {
        let format = H264Format {
            packetization_mode: 0,
            ..H264Format::new(96)
        };
        assert!(H264::new(&format, 1472, true).is_err());
    }
}
