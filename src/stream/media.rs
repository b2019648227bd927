//! Per-track format table

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::StreamConfig;
use crate::description::Media;
use crate::error::{ProcessorError, Result};
use crate::stats::ErrorCounter;

use super::format::StreamFormat;

/// Formats of one track, keyed by RTP payload type. Built once.
#[derive(Debug)]
pub(crate) struct StreamMedia {
    formats: HashMap<u8, StreamFormat>,
}

impl StreamMedia {
    pub fn new(
        index: usize,
        media: &Media,
        config: &StreamConfig,
        processing_errors: &Arc<ErrorCounter>,
    ) -> Result<Self> {
        let mut formats = HashMap::with_capacity(media.formats.len());

        for format in &media.formats {
            let payload_type = format.payload_type();
            if formats.contains_key(&payload_type) {
                return Err(ProcessorError::configuration(format!(
                    "media {} declares payload type {} twice",
                    index, payload_type
                ))
                .into());
            }

            let stream_format = StreamFormat::new(format, config, processing_errors.clone())?;
            tracing::debug!(
                media = index,
                kind = %media.kind,
                payload_type = payload_type,
                codec = format.codec(),
                "Format processor ready"
            );
            formats.insert(payload_type, stream_format);
        }

        Ok(Self { formats })
    }

    pub fn format(&self, payload_type: u8) -> Option<&StreamFormat> {
        self.formats.get(&payload_type)
    }
}
