//! Per-format fan-out
//!
//! A [`StreamFormat`] binds one format of one track to its processor and to
//! the readers subscribed to it. Ingest runs in three steps:
//!
//! 1. snapshot the subscribers (under the subscriber lock)
//! 2. run the processor (under the processor lock)
//! 3. push the resulting unit to each running subscriber's queue
//!
//! so registry changes never wait on codec work and the processor never
//! waits on readers.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use rtp::packet::Packet;

use crate::config::StreamConfig;
use crate::description::Format;
use crate::error::Result;
use crate::processor::FormatProcessor;
use crate::stats::ErrorCounter;
use crate::unit::Unit;

use super::reader::{ReaderId, ReaderSink};

#[derive(Debug)]
struct Subscriber {
    reader: ReaderId,
    slot: usize,
    /// Reader asked for decoded payload
    decoded: bool,
    /// Set while the reader is running
    sink: Option<ReaderSink>,
}

#[derive(Debug)]
pub(crate) struct StreamFormat {
    format: Format,
    processor: Mutex<FormatProcessor>,
    subscribers: Mutex<Vec<Subscriber>>,
    processing_errors: Arc<ErrorCounter>,
}

impl StreamFormat {
    pub fn new(
        format: &Format,
        config: &StreamConfig,
        processing_errors: Arc<ErrorCounter>,
    ) -> Result<Self> {
        let processor = FormatProcessor::new(
            format,
            config.max_payload_size,
            config.generate_rtp_packets,
        )?;

        Ok(Self {
            format: format.clone(),
            processor: Mutex::new(processor),
            subscribers: Mutex::new(Vec::new()),
            processing_errors,
        })
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    pub fn timestamp_origin(&self) -> u32 {
        self.processor().timestamp_origin()
    }

    pub fn is_decoding(&self) -> bool {
        self.processor().is_decoding()
    }

    pub fn add_subscriber(&self, reader: ReaderId, slot: usize, decoded: bool) {
        self.subscribers().push(Subscriber {
            reader,
            slot,
            decoded,
            sink: None,
        });
    }

    /// Attach a running reader's queue to its subscription
    pub fn activate_subscriber(&self, reader: ReaderId, slot: usize, sink: ReaderSink) {
        if let Some(sub) = self
            .subscribers()
            .iter_mut()
            .find(|s| s.reader == reader && s.slot == slot)
        {
            sub.sink = Some(sink);
        }
    }

    pub fn remove_subscriber(&self, reader: ReaderId) {
        self.subscribers().retain(|s| s.reader != reader);
    }

    /// Encode a decoded unit and broadcast it
    pub fn write_unit(&self, mut unit: Unit) -> Result<()> {
        let (sinks, _) = self.snapshot();

        if let Err(e) = self.processor().process_unit(&mut unit) {
            self.processing_errors.increment();
            return Err(e);
        }

        if !unit.is_empty() {
            broadcast(&sinks, Arc::new(unit));
        }
        Ok(())
    }

    /// Wrap (and decode if needed) an inbound packet and broadcast it
    pub fn write_rtp_packet(
        &self,
        pkt: Packet,
        ntp: SystemTime,
        pts: i64,
    ) -> Result<Arc<Unit>> {
        let (sinks, needs_decoding) = self.snapshot();

        let unit = match self
            .processor()
            .process_rtp_packet(pkt, ntp, pts, needs_decoding)
        {
            Ok(unit) => Arc::new(unit),
            Err(e) => {
                self.processing_errors.increment();
                return Err(e);
            }
        };

        if !unit.is_empty() {
            broadcast(&sinks, unit.clone());
        }
        Ok(unit)
    }

    /// Running sinks, and whether any subscriber (running or not) wants
    /// decoded payload
    fn snapshot(&self) -> (Vec<ReaderSink>, bool) {
        let subscribers = self.subscribers();
        let needs_decoding = subscribers.iter().any(|s| s.decoded);
        let sinks = subscribers.iter().filter_map(|s| s.sink.clone()).collect();
        (sinks, needs_decoding)
    }

    fn processor(&self) -> std::sync::MutexGuard<'_, FormatProcessor> {
        self.processor.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn broadcast(sinks: &[ReaderSink], unit: Arc<Unit>) {
    for sink in sinks {
        sink.push(unit.clone());
    }
}
