//! Readers: identity, callbacks and the delivery worker
//!
//! Every running reader owns one bounded queue and one worker task:
//!
//! ```text
//!   broadcast ──try_send──► [ bounded queue ] ──recv──► worker ──► callback
//!                 │ full
//!                 └──► dropped counter
//! ```
//!
//! The producer side never waits: a full queue rejects the incoming unit.
//! The worker invokes callbacks one at a time, in queue order.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::Result;
use crate::stats::{ErrorCounter, ReaderStats};
use crate::unit::Unit;

/// Identity of a reader, chosen by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReaderId(u64);

impl ReaderId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ReaderId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ReaderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Future returned by a reader callback
pub type UnitFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Reader callback, invoked once per delivered unit
///
/// ```ignore
/// let on_unit = OnUnit::new(|unit: Arc<Unit>| async move {
///     send_to_client(&unit.rtp_packets).await?;
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct OnUnit(Arc<dyn Fn(Arc<Unit>) -> UnitFuture + Send + Sync>);

impl OnUnit {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arc<Unit>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self(Arc::new(move |unit| Box::pin(f(unit))))
    }

    pub(crate) fn call(&self, unit: Arc<Unit>) -> UnitFuture {
        (self.0)(unit)
    }
}

impl std::fmt::Debug for OnUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("OnUnit")
    }
}

/// Per-reader delivery counters, shared by the broadcast path and the worker
#[derive(Debug)]
pub(crate) struct ReaderCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: ErrorCounter,
}

impl ReaderCounters {
    pub fn new(id: ReaderId, report_interval: Duration) -> Self {
        Self {
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: ErrorCounter::new(
                "units discarded, reader is too slow",
                format!("reader {}", id),
                report_interval,
            ),
        }
    }

    pub fn snapshot(&self, running: bool) -> ReaderStats {
        ReaderStats {
            running,
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.total(),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    pub fn flush(&self) {
        self.dropped.flush();
    }
}

/// One queued unit and the subscription it was produced for
#[derive(Debug)]
pub(crate) struct Delivery {
    slot: usize,
    unit: Arc<Unit>,
}

/// Producer-side handle to a running reader's queue, for one subscription
#[derive(Debug, Clone)]
pub(crate) struct ReaderSink {
    slot: usize,
    tx: mpsc::Sender<Delivery>,
    counters: Arc<ReaderCounters>,
}

impl ReaderSink {
    pub fn new(slot: usize, tx: mpsc::Sender<Delivery>, counters: Arc<ReaderCounters>) -> Self {
        Self { slot, tx, counters }
    }

    /// Enqueue without waiting; a full queue drops the unit
    pub fn push(&self, unit: Arc<Unit>) {
        let delivery = Delivery {
            slot: self.slot,
            unit,
        };
        match self.tx.try_send(delivery) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => self.counters.dropped.increment(),
            // worker already stopped, reader is being removed
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Spawn the delivery worker of a reader.
///
/// The worker exits when `stop` fires (or its sender is dropped) or when
/// every sender of the queue is gone. Units still queued at that point are
/// discarded; a callback already running completes first.
pub(crate) fn spawn_worker(
    id: ReaderId,
    mut rx: mpsc::Receiver<Delivery>,
    callbacks: Vec<OnUnit>,
    counters: Arc<ReaderCounters>,
    delivery_errors: Arc<ErrorCounter>,
    mut stop: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(reader = %id, "Reader worker started");

        loop {
            let delivery = tokio::select! {
                biased;
                _ = &mut stop => break,
                delivery = rx.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let Some(callback) = callbacks.get(delivery.slot) else {
                continue;
            };

            match callback.call(delivery.unit).await {
                Ok(()) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    delivery_errors.increment();
                    tracing::debug!(reader = %id, error = %e, "Reader callback failed");
                }
            }
        }

        tracing::debug!(reader = %id, "Reader worker stopped");
    })
}
