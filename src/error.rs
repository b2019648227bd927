//! Error types for the relay core
//!
//! Errors are split by layer:
//! - [`MediaError`]: malformed codec bitstream structures
//! - [`ProcessorError`]: failures of a format processor (per packet / per unit,
//!   or fatal at construction)
//! - [`StreamError`]: misuse of the stream API
//!
//! Only [`ProcessorError::Configuration`] is fatal to a stream. Everything else
//! is scoped to the single packet, unit or reader it was raised for.

use crate::stream::ReaderId;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug, Clone)]
pub enum Error {
    /// Codec bitstream error
    Media(MediaError),
    /// Format processor error
    Processor(ProcessorError),
    /// Stream API error
    Stream(StreamError),
    /// A reader callback failed to handle a unit
    Delivery(String),
}

impl Error {
    /// Create a delivery error, for use by reader callbacks
    pub fn delivery(reason: impl Into<String>) -> Self {
        Error::Delivery(reason.into())
    }

    /// Whether this error is fatal to the stream that raised it
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Processor(ProcessorError::Configuration(_)))
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Media(e) => write!(f, "Media error: {}", e),
            Error::Processor(e) => write!(f, "{}", e),
            Error::Stream(e) => write!(f, "Stream error: {}", e),
            Error::Delivery(reason) => write!(f, "Delivery error: {}", reason),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Media(e) => Some(e),
            Error::Processor(e) => Some(e),
            Error::Stream(e) => Some(e),
            Error::Delivery(_) => None,
        }
    }
}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        Error::Media(e)
    }
}

impl From<ProcessorError> for Error {
    fn from(e: ProcessorError) -> Self {
        Error::Processor(e)
    }
}

impl From<StreamError> for Error {
    fn from(e: StreamError) -> Self {
        Error::Stream(e)
    }
}

/// Malformed codec bitstream structures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Invalid AVCDecoderConfigurationRecord
    InvalidAvcConfig,
    /// Invalid H.264 NAL unit
    InvalidNalu,
    /// Invalid AudioSpecificConfig
    InvalidAacConfig,
    /// Invalid Opus packet (TOC byte / frame count)
    InvalidOpusPacket,
}

impl std::fmt::Display for MediaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaError::InvalidAvcConfig => write!(f, "Invalid AVC decoder configuration"),
            MediaError::InvalidNalu => write!(f, "Invalid NAL unit"),
            MediaError::InvalidAacConfig => write!(f, "Invalid AudioSpecificConfig"),
            MediaError::InvalidOpusPacket => write!(f, "Invalid Opus packet"),
        }
    }
}

impl std::error::Error for MediaError {}

/// Format processor errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    /// The processor (or stream) cannot be built from the given parameters
    Configuration(String),
    /// Inbound packet is larger than the maximum payload size
    OversizedPacket {
        /// Marshaled packet size
        size: usize,
        /// Configured maximum
        max: usize,
    },
    /// Inbound payload could not be decoded
    Decode(String),
    /// Outgoing unit could not be packetized
    Encoding(String),
}

impl ProcessorError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        ProcessorError::Configuration(reason.into())
    }

    pub(crate) fn decode(reason: impl Into<String>) -> Self {
        ProcessorError::Decode(reason.into())
    }

    pub(crate) fn encoding(reason: impl Into<String>) -> Self {
        ProcessorError::Encoding(reason.into())
    }
}

impl std::fmt::Display for ProcessorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessorError::Configuration(reason) => {
                write!(f, "Configuration error: {}", reason)
            }
            ProcessorError::OversizedPacket { size, max } => write!(
                f,
                "Payload size ({}) is greater than maximum allowed ({})",
                size, max
            ),
            ProcessorError::Decode(reason) => write!(f, "Decode error: {}", reason),
            ProcessorError::Encoding(reason) => write!(f, "Encoding error: {}", reason),
        }
    }
}

impl std::error::Error for ProcessorError {}

/// Stream API errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// No track with this index
    MediaNotFound(usize),
    /// Track has no format with this payload type
    FormatNotFound {
        /// Track index
        media: usize,
        /// Payload type
        payload_type: u8,
    },
    /// Reader was never added (or was removed)
    ReaderNotFound(ReaderId),
    /// Reader is already running
    ReaderAlreadyRunning(ReaderId),
    /// Stream has been closed
    Closed,
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::MediaNotFound(media) => write!(f, "Media not found: {}", media),
            StreamError::FormatNotFound {
                media,
                payload_type,
            } => write!(
                f,
                "Format not found: media {} payload type {}",
                media, payload_type
            ),
            StreamError::ReaderNotFound(id) => write!(f, "Reader not found: {}", id),
            StreamError::ReaderAlreadyRunning(id) => write!(f, "Reader already running: {}", id),
            StreamError::Closed => write!(f, "Stream closed"),
        }
    }
}

impl std::error::Error for StreamError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_is_fatal() {
        let fatal: Error = ProcessorError::configuration("bad channel count").into();
        assert!(fatal.is_fatal());

        let local: Error = ProcessorError::OversizedPacket { size: 1500, max: 1472 }.into();
        assert!(!local.is_fatal());
        assert!(!Error::delivery("sink gone").is_fatal());
        assert!(!Error::from(StreamError::Closed).is_fatal());
    }

    #[test]
    fn test_display() {
        let err: Error = ProcessorError::OversizedPacket { size: 1473, max: 1472 }.into();
        assert_eq!(
            err.to_string(),
            "Payload size (1473) is greater than maximum allowed (1472)"
        );

        let err: Error = StreamError::FormatNotFound {
            media: 1,
            payload_type: 96,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Stream error: Format not found: media 1 payload type 96"
        );
    }
}
