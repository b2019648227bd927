//! Codec bitstream helpers
//!
//! This module provides:
//! - H.264 NAL unit typing, profile/level naming and AVC decoder configuration parsing
//! - MPEG-4 AudioSpecificConfig parsing
//! - Opus packet duration from the TOC byte
//! - Bit-level readers/writers for packed headers

pub mod aac;
pub mod bits;
pub mod h264;
pub mod opus;

pub use aac::{AacProfile, AudioSpecificConfig};
pub use h264::{AvcConfig, NaluType};
