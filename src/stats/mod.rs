//! Statistics and error accounting

pub mod counter;
pub mod metrics;

pub use counter::ErrorCounter;
pub use metrics::{ReaderStats, StreamStats};
