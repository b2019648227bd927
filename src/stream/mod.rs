//! Stream: fan-out of one published session to many readers
//!
//! ```text
//!                   ┌──────────────── Stream ────────────────┐
//!  write_unit ─────►│ medias[i] ── formats[pt] ── processor  │
//!  write_rtp_packet │                   │                    │
//!                   │          ┌────────┼────────┐           │
//!                   │       queue    queue    queue          │
//!                   └──────────┼────────┼────────┼───────────┘
//!                           worker   worker   worker
//!                              │        │        │
//!                          callback callback callback
//! ```
//!
//! The track/format table is built once by [`Stream::initialize`]. Readers
//! come and go at any time: they are added (one subscription per track and
//! format), started (queue and worker are created) and removed.

mod format;
mod media;
mod reader;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use rtp::packet::Packet;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use util::marshal::Unmarshal;

use crate::config::StreamConfig;
use crate::description::Description;
use crate::error::{ProcessorError, Result, StreamError};
use crate::stats::metrics::IngestCounters;
use crate::stats::{ErrorCounter, ReaderStats, StreamStats};
use crate::unit::Unit;

use self::format::StreamFormat;
use self::media::StreamMedia;
use self::reader::{spawn_worker, ReaderCounters, ReaderSink};

pub use self::reader::{OnUnit, ReaderId, UnitFuture};

/// One subscription of a reader
#[derive(Debug)]
struct Subscription {
    media: usize,
    payload_type: u8,
    on_unit: OnUnit,
}

#[derive(Debug)]
struct Reader {
    subscriptions: Vec<Subscription>,
    counters: Arc<ReaderCounters>,
    /// Present while the reader is running
    stop: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Reader {
    fn is_running(&self) -> bool {
        self.stop.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RunState {
    running: usize,
    closed: bool,
}

/// A published stream
#[derive(Debug)]
pub struct Stream {
    description: Description,
    config: StreamConfig,
    medias: Vec<StreamMedia>,
    readers: Mutex<HashMap<ReaderId, Reader>>,
    state: watch::Sender<RunState>,
    closed: AtomicBool,
    ingest: IngestCounters,
    processing_errors: Arc<ErrorCounter>,
    delivery_errors: Arc<ErrorCounter>,
}

impl Stream {
    /// Build a stream for a session description.
    ///
    /// One format processor is built per declared format; if any of them
    /// cannot be built the whole stream fails.
    pub fn initialize(description: Description, config: StreamConfig) -> Result<Self> {
        config.validate()?;

        let scope = description.title.clone().unwrap_or_else(|| "stream".into());
        let processing_errors = Arc::new(ErrorCounter::new(
            "processing errors",
            scope.clone(),
            config.error_report_interval,
        ));
        let delivery_errors = Arc::new(ErrorCounter::new(
            "reader callback errors",
            scope,
            config.error_report_interval,
        ));

        let medias = description
            .medias
            .iter()
            .enumerate()
            .map(|(index, media)| StreamMedia::new(index, media, &config, &processing_errors))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(
            title = ?description.title,
            medias = medias.len(),
            generate_rtp_packets = config.generate_rtp_packets,
            max_payload_size = config.max_payload_size,
            "Stream initialized"
        );

        let (state, _) = watch::channel(RunState::default());

        Ok(Self {
            description,
            config,
            medias,
            readers: Mutex::new(HashMap::new()),
            state,
            closed: AtomicBool::new(false),
            ingest: IngestCounters::new(),
            processing_errors,
            delivery_errors,
        })
    }

    pub fn description(&self) -> &Description {
        &self.description
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// RTP timestamp origin of a format's processor
    pub fn rtp_timestamp_origin(&self, media: usize, payload_type: u8) -> Result<u32> {
        Ok(self.format(media, payload_type)?.timestamp_origin())
    }

    /// Whether a format's processor decodes inbound packets
    pub fn is_decoding(&self, media: usize, payload_type: u8) -> Result<bool> {
        Ok(self.format(media, payload_type)?.is_decoding())
    }

    /// Publish a decoded unit. Packets are generated for it if the stream
    /// was configured to.
    pub fn write_unit(&self, media: usize, payload_type: u8, unit: Unit) -> Result<()> {
        self.ensure_open()?;
        let format = self.format(media, payload_type)?;

        let size = unit.payload.as_ref().map(|p| p.size()).unwrap_or(0);
        self.ingest.on_unit(size);

        format.write_unit(unit)
    }

    /// Publish a received RTP packet. Returns the unit handed to readers.
    pub fn write_rtp_packet(
        &self,
        media: usize,
        payload_type: u8,
        pkt: Packet,
        ntp: SystemTime,
        pts: i64,
    ) -> Result<Arc<Unit>> {
        self.ensure_open()?;
        let format = self.format(media, payload_type)?;

        self.ingest.on_rtp_packet(pkt.payload.len());

        format.write_rtp_packet(pkt, ntp, pts)
    }

    /// Parse and publish a raw RTP packet
    pub fn write_rtp_bytes(
        &self,
        media: usize,
        payload_type: u8,
        data: &[u8],
        ntp: SystemTime,
        pts: i64,
    ) -> Result<Arc<Unit>> {
        self.ensure_open()?;

        let mut buf = data;
        let pkt = match Packet::unmarshal(&mut buf) {
            Ok(pkt) => pkt,
            Err(e) => {
                self.processing_errors.increment();
                return Err(ProcessorError::decode(format!("invalid RTP packet: {}", e)).into());
            }
        };

        self.write_rtp_packet(media, payload_type, pkt, ntp, pts)
    }

    /// Subscribe a reader to a format, with decoded payload.
    ///
    /// Nothing is delivered until [`start_reader`](Self::start_reader).
    pub fn add_reader(
        &self,
        reader: ReaderId,
        media: usize,
        payload_type: u8,
        on_unit: OnUnit,
    ) -> Result<()> {
        self.subscribe(reader, media, payload_type, on_unit, true)
    }

    /// Subscribe a reader to a format's RTP packets only
    pub fn add_rtp_reader(
        &self,
        reader: ReaderId,
        media: usize,
        payload_type: u8,
        on_unit: OnUnit,
    ) -> Result<()> {
        self.subscribe(reader, media, payload_type, on_unit, false)
    }

    fn subscribe(
        &self,
        id: ReaderId,
        media: usize,
        payload_type: u8,
        on_unit: OnUnit,
        decoded: bool,
    ) -> Result<()> {
        let mut readers = self.readers();
        // checked under the registry lock so close() cannot race us
        self.ensure_open()?;
        let format = self.format(media, payload_type)?;

        let reader = readers.entry(id).or_insert_with(|| Reader {
            subscriptions: Vec::new(),
            counters: Arc::new(ReaderCounters::new(id, self.config.error_report_interval)),
            stop: None,
            worker: None,
        });
        if reader.is_running() {
            return Err(StreamError::ReaderAlreadyRunning(id).into());
        }

        let slot = reader.subscriptions.len();
        reader.subscriptions.push(Subscription {
            media,
            payload_type,
            on_unit,
        });
        format.add_subscriber(id, slot, decoded);

        tracing::debug!(
            reader = %id,
            media = media,
            payload_type = payload_type,
            codec = format.format().codec(),
            decoded = decoded,
            "Reader subscribed"
        );
        Ok(())
    }

    /// Start delivering units to a reader.
    ///
    /// Spawns the reader's worker, so this must be called from within a
    /// Tokio runtime.
    pub fn start_reader(&self, id: ReaderId) -> Result<()> {
        let mut readers = self.readers();
        self.ensure_open()?;

        let reader = readers
            .get_mut(&id)
            .ok_or(StreamError::ReaderNotFound(id))?;
        if reader.is_running() {
            return Err(StreamError::ReaderAlreadyRunning(id).into());
        }

        let (tx, rx) = mpsc::channel(self.config.reader_queue_capacity);
        let (stop_tx, stop_rx) = oneshot::channel();

        for (slot, sub) in reader.subscriptions.iter().enumerate() {
            let format = self.format(sub.media, sub.payload_type)?;
            format.activate_subscriber(
                id,
                slot,
                ReaderSink::new(slot, tx.clone(), reader.counters.clone()),
            );
        }

        let callbacks = reader
            .subscriptions
            .iter()
            .map(|s| s.on_unit.clone())
            .collect();
        reader.worker = Some(spawn_worker(
            id,
            rx,
            callbacks,
            reader.counters.clone(),
            self.delivery_errors.clone(),
            stop_rx,
        ));
        reader.stop = Some(stop_tx);

        self.state.send_modify(|s| s.running += 1);

        tracing::info!(
            reader = %id,
            subscriptions = reader.subscriptions.len(),
            queue_capacity = self.config.reader_queue_capacity,
            "Reader started"
        );
        Ok(())
    }

    /// Stop and forget a reader. Removing an unknown reader does nothing.
    pub fn remove_reader(&self, id: ReaderId) {
        let mut readers = self.readers();
        let Some(reader) = readers.remove(&id) else {
            return;
        };
        self.release(id, reader);

        tracing::info!(reader = %id, readers = readers.len(), "Reader removed");
    }

    fn release(&self, id: ReaderId, mut reader: Reader) {
        for sub in &reader.subscriptions {
            if let Ok(format) = self.format(sub.media, sub.payload_type) {
                format.remove_subscriber(id);
            }
        }

        if let Some(stop) = reader.stop.take() {
            // the worker may already be gone
            let _ = stop.send(());
            self.state
                .send_modify(|s| s.running = s.running.saturating_sub(1));
        }
        // detach: a callback in flight runs to completion
        drop(reader.worker.take());
        reader.counters.flush();
    }

    /// Wait until at least one reader is running
    pub async fn wait_running_reader(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|s| s.running > 0 || s.closed)
            .await
            .map_err(|_| StreamError::Closed)?;

        if state.closed {
            return Err(StreamError::Closed.into());
        }
        Ok(())
    }

    /// Tear the stream down: stop every reader and reject further calls
    pub fn close(&self) {
        let mut readers = self.readers();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let count = readers.len();
        for (id, reader) in readers.drain() {
            self.release(id, reader);
        }

        self.state.send_modify(|s| {
            s.running = 0;
            s.closed = true;
        });
        self.processing_errors.flush();
        self.delivery_errors.flush();

        tracing::info!(
            title = ?self.description.title,
            readers = count,
            units_written = self.ingest.units_written(),
            rtp_packets_received = self.ingest.rtp_packets_received(),
            "Stream closed"
        );
    }

    /// Stream statistics snapshot
    pub fn stats(&self) -> StreamStats {
        let readers = self.readers();

        StreamStats {
            uptime: self.ingest.uptime(),
            units_written: self.ingest.units_written(),
            rtp_packets_received: self.ingest.rtp_packets_received(),
            bytes_received: self.ingest.bytes_received(),
            processing_errors: self.processing_errors.total(),
            delivery_errors: self.delivery_errors.total(),
            readers: readers.len(),
            running_readers: readers.values().filter(|r| r.is_running()).count(),
        }
    }

    /// Statistics snapshot of one reader
    pub fn reader_stats(&self, id: ReaderId) -> Result<ReaderStats> {
        let readers = self.readers();
        let reader = readers.get(&id).ok_or(StreamError::ReaderNotFound(id))?;
        Ok(reader.counters.snapshot(reader.is_running()))
    }

    fn format(&self, media: usize, payload_type: u8) -> Result<&StreamFormat> {
        let stream_media = self
            .medias
            .get(media)
            .ok_or(StreamError::MediaNotFound(media))?;
        let format = stream_media
            .format(payload_type)
            .ok_or(StreamError::FormatNotFound {
                media,
                payload_type,
            })?;
        Ok(format)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(StreamError::Closed.into());
        }
        Ok(())
    }

    fn readers(&self) -> std::sync::MutexGuard<'_, HashMap<ReaderId, Reader>> {
        self.readers.lock().unwrap_or_else(|e| e.into_inner())
    }
}
