//! MPEG-4 audio format processor (RFC 3640 generic mode)
//!
//! Payload layout:
//! ```text
//! AU-headers-length (16 bits, in bits) | AU-header* | padding to byte | AU data*
//! AU-header = AU-size (sizeLength) | AU-index / AU-index-delta
//! ```
//!
//! Small access units are aggregated into one packet. An access unit that
//! does not fit alone is fragmented: every fragment carries a single AU
//! header with the full AU size, and only the last fragment has the marker
//! bit set.

use std::time::SystemTime;

use bytes::{BufMut, Bytes, BytesMut};
use rtp::packet::Packet;

use crate::description::Mpeg4AudioFormat;
use crate::error::{ProcessorError, Result};
use crate::media::bits::{BitReader, BitWriter};
use crate::unit::{Payload, Unit};

use super::rtp::PacketWriter;
use super::{prepare_packet, stamp, sticky_decoder, wrong_payload};

const MAX_AUS_PER_PACKET: usize = 1024;

const MAX_AU_SIZE: usize = 8 * 1024 * 1024;

/// AU header field widths
#[derive(Debug, Clone, Copy)]
struct HeaderLayout {
    size_length: usize,
    index_length: usize,
    index_delta_length: usize,
}

impl HeaderLayout {
    fn new(format: &Mpeg4AudioFormat) -> Result<Self> {
        if !(1..=16).contains(&format.size_length)
            || format.index_length > 8
            || format.index_delta_length > 8
        {
            return Err(ProcessorError::configuration(format!(
                "unsupported AU header layout (size {}, index {}, index delta {})",
                format.size_length, format.index_length, format.index_delta_length
            ))
            .into());
        }

        Ok(Self {
            size_length: format.size_length as usize,
            index_length: format.index_length as usize,
            index_delta_length: format.index_delta_length as usize,
        })
    }

    fn header_bits(&self, count: usize) -> usize {
        self.size_length + self.index_length
            + (count - 1) * (self.size_length + self.index_delta_length)
    }

    /// AU-headers-length field plus `count` headers, byte aligned
    fn header_bytes(&self, count: usize) -> usize {
        2 + self.header_bits(count).div_ceil(8)
    }

    fn max_au_size(&self) -> usize {
        (1 << self.size_length) - 1
    }

    fn write(&self, sizes: &[usize]) -> BytesMut {
        let mut w = BitWriter::new();
        w.write(self.header_bits(sizes.len()) as u32, 16);
        for (i, size) in sizes.iter().enumerate() {
            w.write(*size as u32, self.size_length);
            let index_bits = if i == 0 {
                self.index_length
            } else {
                self.index_delta_length
            };
            w.write(0, index_bits);
        }
        w.finish()
    }

    /// Returns AU sizes and the AU data section
    fn read(&self, payload: &Bytes) -> Result<(Vec<usize>, Bytes)> {
        if payload.len() < 2 {
            return Err(ProcessorError::decode("payload too short").into());
        }
        let header_bits = u16::from_be_bytes([payload[0], payload[1]]) as usize;
        let header_end = 2 + header_bits.div_ceil(8);
        if header_bits == 0 || payload.len() < header_end {
            return Err(ProcessorError::decode(format!(
                "invalid AU-headers-length {}",
                header_bits
            ))
            .into());
        }

        let mut r = BitReader::new(&payload[2..header_end]);
        let mut sizes = Vec::new();
        let mut consumed = 0;

        while consumed < header_bits {
            let index_bits = if sizes.is_empty() {
                self.index_length
            } else {
                self.index_delta_length
            };
            if consumed + self.size_length + index_bits > header_bits {
                return Err(ProcessorError::decode("AU headers do not fill AU-headers-length").into());
            }
            if sizes.len() >= MAX_AUS_PER_PACKET {
                return Err(ProcessorError::decode(format!(
                    "more than {} AUs in one packet",
                    MAX_AUS_PER_PACKET
                ))
                .into());
            }

            let size = r
                .read(self.size_length)
                .ok_or_else(|| ProcessorError::decode("truncated AU header"))?;
            r.read(index_bits)
                .ok_or_else(|| ProcessorError::decode("truncated AU header"))?;
            consumed += self.size_length + index_bits;
            sizes.push(size as usize);
        }

        Ok((sizes, payload.slice(header_end..)))
    }
}

#[derive(Debug)]
pub(crate) struct Mpeg4AudioEncoder {
    writer: PacketWriter,
    layout: HeaderLayout,
    samples_per_frame: u32,
}

impl Mpeg4AudioEncoder {
    fn new(writer: PacketWriter, layout: HeaderLayout, samples_per_frame: u32) -> Result<Self> {
        if writer.max_payload_size() <= layout.header_bytes(1) {
            return Err(ProcessorError::configuration(format!(
                "payload budget ({}) cannot hold an AU header",
                writer.max_payload_size()
            ))
            .into());
        }
        Ok(Self {
            writer,
            layout,
            samples_per_frame,
        })
    }

    /// Timestamps are AU index times samples per frame
    pub fn encode(&mut self, aus: &[Bytes]) -> Result<Vec<Packet>> {
        if aus.is_empty() {
            return Err(ProcessorError::encoding("no access units").into());
        }

        let max = self.writer.max_payload_size();
        let mut packets = Vec::new();
        let mut batch: Vec<&Bytes> = Vec::new();
        let mut batch_start = 0;
        let mut batch_data = 0;

        for (i, au) in aus.iter().enumerate() {
            if au.is_empty() {
                return Err(ProcessorError::encoding("empty access unit").into());
            }
            if au.len() > self.layout.max_au_size() {
                return Err(ProcessorError::encoding(format!(
                    "access unit of {} bytes does not fit the AU-size field",
                    au.len()
                ))
                .into());
            }

            if self.layout.header_bytes(1) + au.len() > max {
                self.flush(&mut batch, batch_start, &mut packets);
                batch_data = 0;
                self.fragment(au, i, max, &mut packets);
                continue;
            }

            if !batch.is_empty() && !self.fits(batch.len() + 1, batch_data + au.len(), max) {
                self.flush(&mut batch, batch_start, &mut packets);
                batch_data = 0;
            }
            if batch.is_empty() {
                batch_start = i;
            }
            batch.push(au);
            batch_data += au.len();
        }
        self.flush(&mut batch, batch_start, &mut packets);

        Ok(packets)
    }

    /// Whether `count` AUs totalling `data` bytes fit in one packet
    fn fits(&self, count: usize, data: usize, max: usize) -> bool {
        count <= MAX_AUS_PER_PACKET
            && self.layout.header_bits(count) <= u16::MAX as usize
            && self.layout.header_bytes(count) + data <= max
    }

    fn timestamp(&self, index: usize) -> u32 {
        (index as u32).wrapping_mul(self.samples_per_frame)
    }

    fn flush(&mut self, batch: &mut Vec<&Bytes>, start: usize, packets: &mut Vec<Packet>) {
        if batch.is_empty() {
            return;
        }
        let sizes: Vec<usize> = batch.iter().map(|au| au.len()).collect();
        let mut buf = self.layout.write(&sizes);
        for au in batch.iter() {
            buf.put_slice(au);
        }
        let timestamp = self.timestamp(start);
        packets.push(self.writer.write(timestamp, true, buf.freeze()));
        batch.clear();
    }

    fn fragment(&mut self, au: &Bytes, index: usize, max: usize, packets: &mut Vec<Packet>) {
        let chunk = max - self.layout.header_bytes(1);
        let timestamp = self.timestamp(index);

        let mut offset = 0;
        while offset < au.len() {
            let end = (offset + chunk).min(au.len());
            let mut buf = self.layout.write(&[au.len()]);
            buf.put_slice(&au[offset..end]);
            packets.push(self.writer.write(timestamp, end == au.len(), buf.freeze()));
            offset = end;
        }
    }
}

#[derive(Debug)]
struct Fragment {
    buf: BytesMut,
    size: usize,
    next_sequence_number: u16,
}

#[derive(Debug)]
pub(crate) struct Mpeg4AudioDecoder {
    layout: HeaderLayout,
    fragment: Option<Fragment>,
}

impl Mpeg4AudioDecoder {
    fn new(layout: HeaderLayout) -> Self {
        Self {
            layout,
            fragment: None,
        }
    }

    /// Returns the access units of a packet, or `None` while a fragmented
    /// AU is incomplete
    pub fn decode(&mut self, pkt: &Packet) -> Result<Option<Vec<Bytes>>> {
        let (sizes, data) = match self.layout.read(&pkt.payload) {
            Ok(v) => v,
            Err(e) => {
                self.fragment = None;
                return Err(e);
            }
        };

        if self.fragment.is_some() {
            return self.decode_fragment(pkt, &sizes, data);
        }

        if sizes.len() == 1 && data.len() < sizes[0] {
            if pkt.header.marker {
                // last fragment of an AU whose start was never seen
                tracing::debug!(
                    received = data.len(),
                    size = sizes[0],
                    "Skipping tail of fragmented access unit"
                );
                return Ok(None);
            }
            if sizes[0] > MAX_AU_SIZE {
                return Err(ProcessorError::decode(format!(
                    "access unit exceeds {} bytes",
                    MAX_AU_SIZE
                ))
                .into());
            }

            let mut buf = BytesMut::with_capacity(sizes[0]);
            buf.put_slice(&data);
            self.fragment = Some(Fragment {
                buf,
                size: sizes[0],
                next_sequence_number: pkt.header.sequence_number.wrapping_add(1),
            });
            return Ok(None);
        }

        let total: usize = sizes.iter().sum();
        if total != data.len() {
            return Err(ProcessorError::decode(format!(
                "AU sizes ({} bytes) do not match payload ({} bytes)",
                total,
                data.len()
            ))
            .into());
        }

        let mut aus = Vec::with_capacity(sizes.len());
        let mut offset = 0;
        for size in sizes {
            aus.push(data.slice(offset..offset + size));
            offset += size;
        }
        Ok(Some(aus))
    }

    fn decode_fragment(
        &mut self,
        pkt: &Packet,
        sizes: &[usize],
        data: Bytes,
    ) -> Result<Option<Vec<Bytes>>> {
        let Some(fragment) = self.fragment.as_mut() else {
            return Ok(None);
        };

        if pkt.header.sequence_number != fragment.next_sequence_number {
            self.fragment = None;
            return Err(ProcessorError::decode(
                "discarding fragmented access unit since an RTP packet is missing",
            )
            .into());
        }
        if sizes.len() != 1 || sizes[0] != fragment.size {
            self.fragment = None;
            return Err(ProcessorError::decode("inconsistent AU header in fragment").into());
        }
        if fragment.buf.len() + data.len() > fragment.size {
            self.fragment = None;
            return Err(ProcessorError::decode("fragment overflows access unit").into());
        }

        fragment.buf.put_slice(&data);
        fragment.next_sequence_number = pkt.header.sequence_number.wrapping_add(1);

        if !pkt.header.marker {
            return Ok(None);
        }

        let Some(fragment) = self.fragment.take() else {
            return Ok(None);
        };
        if fragment.buf.len() != fragment.size {
            // joined in the middle of the AU
            tracing::debug!(
                received = fragment.buf.len(),
                size = fragment.size,
                "Skipping tail of fragmented access unit"
            );
            return Ok(None);
        }
        Ok(Some(vec![fragment.buf.freeze()]))
    }
}

/// Format processor for MPEG-4 audio
#[derive(Debug)]
pub struct Mpeg4Audio {
    max_payload_size: usize,
    layout: HeaderLayout,
    encoder: Option<Mpeg4AudioEncoder>,
    decoder: Option<Mpeg4AudioDecoder>,
    random_start: u32,
}

impl Mpeg4Audio {
    pub(crate) fn new(
        format: &Mpeg4AudioFormat,
        max_payload_size: usize,
        generate_rtp_packets: bool,
    ) -> Result<Self> {
        let layout = HeaderLayout::new(format)?;
        if format.config.sampling_frequency == 0 {
            return Err(ProcessorError::configuration("sampling frequency must be positive").into());
        }

        let encoder = if generate_rtp_packets {
            let writer =
                PacketWriter::new(format.payload_type, super::rtp_budget(max_payload_size))?;
            Some(Mpeg4AudioEncoder::new(
                writer,
                layout,
                format.config.samples_per_frame(),
            )?)
        } else {
            None
        };

        Ok(Self {
            max_payload_size,
            layout,
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

        let aus = match &unit.payload {
            Some(Payload::AccessUnits(aus)) => aus,
            other => return Err(wrong_payload("access units", other)),
        };

        let mut packets = encoder.encode(aus)?;
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

        let layout = self.layout;
        let aus = match sticky_decoder(&mut self.decoder, needs_decoding, || {
            Mpeg4AudioDecoder::new(layout)
        }) {
            Some(decoder) => decoder.decode(&pkt)?,
            None => None,
        };

        let mut unit = Unit::from_rtp(pkt, ntp, pts);
        unit.payload = aus.map(Payload::AccessUnits);
        Ok(unit)
    }
}
