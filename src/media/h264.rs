//! H.264/AVC bitstream helpers
//!
//! Access units travel through the relay as a list of NAL units without
//! start codes or length prefixes. This module types NAL units and parses
//! the AVCDecoderConfigurationRecord that publishers hand over out of band,
//! which is the usual source of the initial SPS/PPS.
//!
//! AVCDecoderConfigurationRecord:
//! ```text
//! configurationVersion (1) | AVCProfileIndication (1) | profile_compatibility (1)
//! | AVCLevelIndication (1) | lengthSizeMinusOne (1, lower 2 bits)
//! | numOfSPS (1, lower 5 bits) | { spsLength (2) | spsNALUnit }*
//! | numOfPPS (1) | { ppsLength (2) | ppsNALUnit }*
//! ```

use bytes::{Buf, Bytes};

use crate::error::{MediaError, Result};

/// NAL unit type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice
    Slice = 1,
    /// Slice data partition A
    SlicePartA = 2,
    /// Slice data partition B
    SlicePartB = 3,
    /// Slice data partition C
    SlicePartC = 4,
    /// IDR slice (keyframe)
    Idr = 5,
    /// Supplemental enhancement information
    Sei = 6,
    /// Sequence parameter set
    Sps = 7,
    /// Picture parameter set
    Pps = 8,
    /// Access unit delimiter
    Aud = 9,
    /// End of sequence
    EndSeq = 10,
    /// End of stream
    EndStream = 11,
    /// Filler data
    Filler = 12,
    /// Single-time aggregation packet (RTP only)
    StapA = 24,
    /// Single-time aggregation packet B (RTP only)
    StapB = 25,
    /// Multi-time aggregation packet, 16-bit offset (RTP only)
    Mtap16 = 26,
    /// Multi-time aggregation packet, 24-bit offset (RTP only)
    Mtap24 = 27,
    /// Fragmentation unit A (RTP only)
    FuA = 28,
    /// Fragmentation unit B (RTP only)
    FuB = 29,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            1 => Some(NaluType::Slice),
            2 => Some(NaluType::SlicePartA),
            3 => Some(NaluType::SlicePartB),
            4 => Some(NaluType::SlicePartC),
            5 => Some(NaluType::Idr),
            6 => Some(NaluType::Sei),
            7 => Some(NaluType::Sps),
            8 => Some(NaluType::Pps),
            9 => Some(NaluType::Aud),
            10 => Some(NaluType::EndSeq),
            11 => Some(NaluType::EndStream),
            12 => Some(NaluType::Filler),
            24 => Some(NaluType::StapA),
            25 => Some(NaluType::StapB),
            26 => Some(NaluType::Mtap16),
            27 => Some(NaluType::Mtap24),
            28 => Some(NaluType::FuA),
            29 => Some(NaluType::FuB),
            _ => None,
        }
    }

    /// Type of a NAL unit, from its header byte
    pub fn of(nalu: &[u8]) -> Option<Self> {
        nalu.first().and_then(|b| Self::from_byte(*b))
    }

    pub fn is_keyframe(&self) -> bool {
        matches!(self, NaluType::Idr)
    }

    pub fn is_parameter_set(&self) -> bool {
        matches!(self, NaluType::Sps | NaluType::Pps)
    }
}

/// Whether an access unit contains an IDR slice
pub fn is_random_access(au: &[Bytes]) -> bool {
    au.iter()
        .any(|nalu| NaluType::of(nalu).is_some_and(|t| t.is_keyframe()))
}

/// Name of an AVC profile_idc
pub fn profile_name(profile: u8) -> &'static str {
    match profile {
        66 => "Baseline",
        77 => "Main",
        88 => "Extended",
        100 => "High",
        110 => "High 10",
        122 => "High 4:2:2",
        244 => "High 4:4:4",
        _ => "Unknown",
    }
}

/// AVC level_idc as a string (e.g., 31 -> "3.1")
pub fn level_string(level: u8) -> String {
    format!("{}.{}", level / 10, level % 10)
}

/// AVC decoder configuration (AVCDecoderConfigurationRecord)
#[derive(Debug, Clone)]
pub struct AvcConfig {
    /// AVC profile (66=Baseline, 77=Main, 100=High, etc.)
    pub profile: u8,
    /// Profile compatibility flags
    pub compatibility: u8,
    /// AVC level (e.g., 31 = 3.1)
    pub level: u8,
    /// NALU length size (1, 2 or 4)
    pub nalu_length_size: u8,
    /// Sequence Parameter Sets
    pub sps: Vec<Bytes>,
    /// Picture Parameter Sets
    pub pps: Vec<Bytes>,
}

impl AvcConfig {
    /// Parse from AVCDecoderConfigurationRecord
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < 7 {
            return Err(MediaError::InvalidAvcConfig.into());
        }

        let version = data.get_u8();
        if version != 1 {
            return Err(MediaError::InvalidAvcConfig.into());
        }

        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let num_sps = (data.get_u8() & 0x1F) as usize;
        let sps = Self::parse_parameter_sets(&mut data, num_sps)?;

        if data.is_empty() {
            return Err(MediaError::InvalidAvcConfig.into());
        }
        let num_pps = data.get_u8() as usize;
        let pps = Self::parse_parameter_sets(&mut data, num_pps)?;

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
        })
    }

    fn parse_parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>> {
        let mut sets = Vec::with_capacity(count);
        for _ in 0..count {
            if data.len() < 2 {
                return Err(MediaError::InvalidAvcConfig.into());
            }
            let len = data.get_u16() as usize;
            if len == 0 || data.len() < len {
                return Err(MediaError::InvalidAvcConfig.into());
            }
            sets.push(data.copy_to_bytes(len));
        }
        Ok(sets)
    }
}
