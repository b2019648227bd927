//! RTP media relay core
//!
//! Ingests audio/video from one publishing session, as RTP packets or as
//! decoded units, and redistributes it to any number of independently paced
//! readers.
//!
//! # Architecture
//!
//! ```text
//!   publisher session
//!         │ write_unit / write_rtp_packet
//!         ▼
//!   ┌──────────────────────── Stream ─────────────────────────┐
//!   │  medias[track] ──► formats[payload type]                │
//!   │                        │                                │
//!   │                  FormatProcessor                        │
//!   │        (RTP ⇄ Unit, lazy sticky decoding)               │
//!   │                        │ Arc<Unit>                      │
//!   │        ┌───────────────┼───────────────┐                │
//!   │        ▼               ▼               ▼                │
//!   │   bounded queue   bounded queue   bounded queue         │
//!   └────────┼───────────────┼───────────────┼────────────────┘
//!            ▼               ▼               ▼
//!         worker          worker          worker
//!            │               │               │
//!        callback        callback        callback
//! ```
//!
//! A slow reader fills its own queue and loses units; it never slows down
//! the publisher or the other readers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::SystemTime;
//!
//! use bytes::Bytes;
//! use media_relay::{
//!     Description, Format, G711Format, Media, OnUnit, ReaderId, Stream, StreamConfig, Unit,
//! };
//!
//! # async fn run() -> media_relay::Result<()> {
//! let description = Description::new(vec![Media::audio(vec![Format::G711(G711Format::pcmu())])]);
//! let stream = Stream::initialize(description, StreamConfig::default())?;
//!
//! let reader = ReaderId::new(1);
//! stream.add_reader(
//!     reader,
//!     0,
//!     0,
//!     OnUnit::new(|unit: Arc<Unit>| async move {
//!         println!("{} RTP packets at pts {}", unit.rtp_packets.len(), unit.pts);
//!         Ok(())
//!     }),
//! )?;
//! stream.start_reader(reader)?;
//!
//! let samples = Bytes::from_static(&[0xFF; 160]);
//! stream.write_unit(0, 0, Unit::samples(0, SystemTime::now(), samples))?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod description;
pub mod error;
pub mod media;
pub mod processor;
pub mod stats;
pub mod stream;
pub mod unit;

pub use config::StreamConfig;
pub use description::{
    Description, Format, G711Format, H264Format, LpcmFormat, Media, MediaKind, Mpeg4AudioFormat,
    OpusFormat,
};
pub use error::{Error, MediaError, ProcessorError, Result, StreamError};
pub use processor::FormatProcessor;
pub use stats::{ReaderStats, StreamStats};
pub use stream::{OnUnit, ReaderId, Stream};
pub use unit::{Payload, Unit};
