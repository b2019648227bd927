//! Opus packet inspection
//!
//! Only the TOC byte (RFC 6716 section 3.1) is looked at: it is enough to
//! know how much audio a packet carries, which drives RTP timestamps.
//!
//! ```text
//!  0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+
//! | config  |s| c |
//! +-+-+-+-+-+-+-+-+
//! ```

use crate::error::{MediaError, Result};

/// Opus RTP clock rate (always 48 kHz, RFC 7587)
pub const CLOCK_RATE: u32 = 48000;

/// Longest audio an Opus packet may carry, in 48 kHz samples (120 ms)
const MAX_PACKET_DURATION: u32 = 5760;

/// Duration of one frame for a TOC config value, in 48 kHz samples
fn frame_duration(config: u8) -> u32 {
    match config {
        // SILK-only: 10, 20, 40, 60 ms
        0..=11 => [480, 960, 1920, 2880][(config % 4) as usize],
        // Hybrid: 10, 20 ms
        12..=15 => [480, 960][(config % 2) as usize],
        // CELT-only: 2.5, 5, 10, 20 ms
        _ => [120, 240, 480, 960][(config % 4) as usize],
    }
}

/// Duration of an Opus packet, in 48 kHz samples
pub fn packet_duration(packet: &[u8]) -> Result<u32> {
    let toc = *packet.first().ok_or(MediaError::InvalidOpusPacket)?;

    let frames = match toc & 0x03 {
        0 => 1,
        1 | 2 => 2,
        _ => {
            let count = packet.get(1).ok_or(MediaError::InvalidOpusPacket)? & 0x3F;
            if count == 0 {
                return Err(MediaError::InvalidOpusPacket.into());
            }
            count as u32
        }
    };

    let duration = frame_duration(toc >> 3) * frames;
    if duration > MAX_PACKET_DURATION {
        return Err(MediaError::InvalidOpusPacket.into());
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame_durations() {
        // config 1: SILK NB 20 ms
        assert_eq!(packet_duration(&[1 << 3]).unwrap(), 960);
        // config 13: Hybrid FB 20 ms
        assert_eq!(packet_duration(&[13 << 3]).unwrap(), 960);
        // config 16: CELT NB 2.5 ms
        assert_eq!(packet_duration(&[16 << 3]).unwrap(), 120);
        // config 31: CELT FB 20 ms
        assert_eq!(packet_duration(&[31 << 3 | 0x04]).unwrap(), 960);
    }

    #[test]
    fn test_multi_frame_packets() {
        // two equal frames of 20 ms
        assert_eq!(packet_duration(&[31 << 3 | 1]).unwrap(), 1920);
        // code 3 with 3 frames of 20 ms
        assert_eq!(packet_duration(&[31 << 3 | 3, 3]).unwrap(), 2880);
    }

    #[test]
    fn test_invalid_packets() {
        assert!(packet_duration(&[]).is_err());
        // code 3 without frame count byte
        assert!(packet_duration(&[31 << 3 | 3]).is_err());
        // code 3 with zero frames
        assert!(packet_duration(&[31 << 3 | 3, 0]).is_err());
        // 7 frames of 60 ms exceeds 120 ms
        assert!(packet_duration(&[3 << 3 | 3, 7]).is_err());
    }
}
