//! MSB-first bit reader/writer for bit-packed headers

use bytes::{BufMut, BytesMut};

/// Reads big-endian bit fields from a byte slice
pub struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of bits not yet consumed
    pub fn remaining(&self) -> usize {
        self.data.len() * 8 - self.pos
    }

    /// Read `n` bits (at most 32), or `None` if not enough data is left
    pub fn read(&mut self, n: usize) -> Option<u32> {
        if n > 32 || n > self.remaining() {
            return None;
        }

        let mut value: u32 = 0;
        for _ in 0..n {
            let byte = self.data[self.pos / 8];
            let bit = (byte >> (7 - (self.pos % 8))) & 0x01;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Some(value)
    }
}

/// Writes big-endian bit fields, zero-padding the final byte
#[derive(Default)]
pub struct BitWriter {
    buf: BytesMut,
    current: u8,
    used: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the low `n` bits of `value` (at most 32)
    pub fn write(&mut self, value: u32, n: usize) {
        for i in (0..n).rev() {
            let bit = ((value >> i) & 0x01) as u8;
            self.current = (self.current << 1) | bit;
            self.used += 1;
            if self.used == 8 {
                self.buf.put_u8(self.current);
                self.current = 0;
                self.used = 0;
            }
        }
    }

    pub fn finish(mut self) -> BytesMut {
        if self.used > 0 {
            self.buf.put_u8(self.current << (8 - self.used));
        }
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_fields() {
        let data = [0b1010_1100, 0b0101_0000];
        let mut reader = BitReader::new(&data);

        assert_eq!(reader.read(1), Some(1));
        assert_eq!(reader.read(3), Some(0b010));
        assert_eq!(reader.read(6), Some(0b1100_01));
        assert_eq!(reader.remaining(), 6);
        assert_eq!(reader.read(7), None);
        assert_eq!(reader.read(6), Some(0b01_0000));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_write_pads_last_byte() {
        let mut writer = BitWriter::new();
        writer.write(0x1F, 13);
        writer.write(0, 3);
        writer.write(0b101, 3);

        let out = writer.finish();
        assert_eq!(&out[..], &[0x00, 0xF8, 0xA0]);
    }
}
