//! Published session description
//!
//! A [`Description`] lists the tracks ([`Media`]) a publisher offers and, for
//! each track, the formats it may carry. Formats are a closed set: every
//! variant of [`Format`] has exactly one format processor behind it.

use bytes::Bytes;

use crate::media::aac::AudioSpecificConfig;
use crate::media::h264::AvcConfig;
use crate::media::opus;

/// Kind of media carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
    Application,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
            MediaKind::Application => write!(f, "application"),
        }
    }
}

/// Session description: the tracks of one published stream
#[derive(Debug, Clone, Default)]
pub struct Description {
    /// Optional session title
    pub title: Option<String>,
    /// Tracks, addressed by index
    pub medias: Vec<Media>,
}

impl Description {
    pub fn new(medias: Vec<Media>) -> Self {
        Self {
            title: None,
            medias,
        }
    }

    /// Find the first track carrying a format with the given codec name
    pub fn find_format(&self, codec: &str) -> Option<(usize, &Format)> {
        self.medias.iter().enumerate().find_map(|(idx, media)| {
            media
                .formats
                .iter()
                .find(|f| f.codec() == codec)
                .map(|f| (idx, f))
        })
    }
}

/// One track of a session
#[derive(Debug, Clone)]
pub struct Media {
    pub kind: MediaKind,
    pub formats: Vec<Format>,
}

impl Media {
    pub fn new(kind: MediaKind, formats: Vec<Format>) -> Self {
        Self { kind, formats }
    }

    /// Audio track
    pub fn audio(formats: Vec<Format>) -> Self {
        Self::new(MediaKind::Audio, formats)
    }

    /// Video track
    pub fn video(formats: Vec<Format>) -> Self {
        Self::new(MediaKind::Video, formats)
    }
}

/// G.711 (PCMU / PCMA)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct G711Format {
    pub payload_type: u8,
    /// µ-law (PCMU) when true, A-law (PCMA) otherwise
    pub mu_law: bool,
    pub sample_rate: u32,
    pub channel_count: u8,
}

impl G711Format {
    /// Static payload type 0, 8 kHz mono
    pub fn pcmu() -> Self {
        Self {
            payload_type: 0,
            mu_law: true,
            sample_rate: 8000,
            channel_count: 1,
        }
    }

    /// Static payload type 8, 8 kHz mono
    pub fn pcma() -> Self {
        Self {
            payload_type: 8,
            mu_law: false,
            sample_rate: 8000,
            channel_count: 1,
        }
    }
}

/// Linear PCM (L8 / L16 / L24), big-endian interleaved samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LpcmFormat {
    pub payload_type: u8,
    pub bit_depth: u8,
    pub sample_rate: u32,
    pub channel_count: u8,
}

/// H.264
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H264Format {
    pub payload_type: u8,
    pub packetization_mode: u8,
    /// Initial sequence parameter set, if known out of band
    pub sps: Option<Bytes>,
    /// Initial picture parameter set, if known out of band
    pub pps: Option<Bytes>,
}

impl H264Format {
    pub fn new(payload_type: u8) -> Self {
        Self {
            payload_type,
            packetization_mode: 1,
            sps: None,
            pps: None,
        }
    }

    /// Seed parameter sets from an AVC decoder configuration record
    pub fn with_avc_config(mut self, config: &AvcConfig) -> Self {
        self.sps = config.sps.first().cloned();
        self.pps = config.pps.first().cloned();
        self
    }
}

/// Opus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpusFormat {
    pub payload_type: u8,
    pub channel_count: u8,
}

/// MPEG-4 audio, RFC 3640 generic mode (AAC-hbr by default)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mpeg4AudioFormat {
    pub payload_type: u8,
    pub config: AudioSpecificConfig,
    /// Bits of the AU-size field of each AU header
    pub size_length: u8,
    /// Bits of the AU-index field of the first AU header
    pub index_length: u8,
    /// Bits of the AU-index-delta field of following AU headers
    pub index_delta_length: u8,
}

impl Mpeg4AudioFormat {
    /// AAC-hbr mode: sizeLength=13, indexLength=3, indexDeltaLength=3
    pub fn aac_hbr(payload_type: u8, config: AudioSpecificConfig) -> Self {
        Self {
            payload_type,
            config,
            size_length: 13,
            index_length: 3,
            index_delta_length: 3,
        }
    }
}

/// Format of a track. Identity within a track is the RTP payload type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Format {
    G711(G711Format),
    Lpcm(LpcmFormat),
    H264(H264Format),
    Opus(OpusFormat),
    Mpeg4Audio(Mpeg4AudioFormat),
}

impl Format {
    /// RTP payload type
    pub fn payload_type(&self) -> u8 {
        match self {
            Format::G711(f) => f.payload_type,
            Format::Lpcm(f) => f.payload_type,
            Format::H264(f) => f.payload_type,
            Format::Opus(f) => f.payload_type,
            Format::Mpeg4Audio(f) => f.payload_type,
        }
    }

    /// RTP clock rate, which is also the rate of unit PTS values
    pub fn clock_rate(&self) -> u32 {
        match self {
            Format::G711(f) => f.sample_rate,
            Format::Lpcm(f) => f.sample_rate,
            Format::H264(_) => 90000,
            Format::Opus(_) => opus::CLOCK_RATE,
            Format::Mpeg4Audio(f) => f.config.sampling_frequency,
        }
    }

    /// Codec name, as used in SDP rtpmap
    pub fn codec(&self) -> &'static str {
        match self {
            Format::G711(f) if f.mu_law => "PCMU",
            Format::G711(_) => "PCMA",
            Format::Lpcm(f) => match f.bit_depth {
                8 => "L8",
                16 => "L16",
                _ => "L24",
            },
            Format::H264(_) => "H264",
            Format::Opus(_) => "opus",
            Format::Mpeg4Audio(_) => "MPEG4-GENERIC",
        }
    }
}
