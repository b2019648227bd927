//! MPEG-4 audio (AAC) configuration
//!
//! RTP transports AAC access units raw (no ADTS headers); the decoder
//! parameters travel out of band as an AudioSpecificConfig:
//! ```text
//! audioObjectType (5) | samplingFrequencyIndex (4)
//! | [samplingFrequency (24) if index == 0xF]
//! | channelConfiguration (4) | frameLengthFlag (1)
//! | dependsOnCoreCoder (1) | extensionFlag (1)
//! ```

use crate::error::{MediaError, Result};

use super::bits::BitReader;

/// AAC profile (audio object type)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacProfile {
    /// AAC Main
    Main = 1,
    /// AAC LC (Low Complexity) - most common
    Lc = 2,
    /// AAC SSR (Scalable Sample Rate)
    Ssr = 3,
    /// AAC LTP (Long Term Prediction)
    Ltp = 4,
    /// SBR (Spectral Band Replication) - HE-AAC
    Sbr = 5,
    /// AAC Scalable
    Scalable = 6,
}

/// AudioSpecificConfig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    /// Audio object type (profile)
    pub audio_object_type: u8,
    /// Sampling frequency in Hz
    pub sampling_frequency: u32,
    /// Channel configuration (1=mono, 2=stereo, etc.)
    pub channel_configuration: u8,
    /// Frame length flag (960 instead of 1024 samples)
    pub frame_length_flag: bool,
}

impl AudioSpecificConfig {
    /// Standard sampling frequencies by index
    const SAMPLING_FREQUENCIES: [u32; 13] = [
        96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
    ];

    /// AAC-LC configuration
    pub fn lc(sampling_frequency: u32, channel_configuration: u8) -> Self {
        Self {
            audio_object_type: AacProfile::Lc as u8,
            sampling_frequency,
            channel_configuration,
            frame_length_flag: false,
        }
    }

    /// Parse from the raw config bytes
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut r = BitReader::new(data);
        let mut field = |n| r.read(n).ok_or(MediaError::InvalidAacConfig);

        let audio_object_type = field(5)? as u8;
        if audio_object_type == 0 || audio_object_type == 31 {
            // 31 = escape to extended object types, not supported
            return Err(MediaError::InvalidAacConfig.into());
        }

        let index = field(4)? as usize;
        let sampling_frequency = if index == 0x0F {
            field(24)?
        } else {
            *Self::SAMPLING_FREQUENCIES
                .get(index)
                .ok_or(MediaError::InvalidAacConfig)?
        };
        if sampling_frequency == 0 {
            return Err(MediaError::InvalidAacConfig.into());
        }

        let channel_configuration = field(4)? as u8;
        let frame_length_flag = field(1)? == 1;

        Ok(AudioSpecificConfig {
            audio_object_type,
            sampling_frequency,
            channel_configuration,
            frame_length_flag,
        })
    }

    /// Get samples per frame
    pub fn samples_per_frame(&self) -> u32 {
        if self.frame_length_flag {
            960
        } else {
            1024
        }
    }
}
