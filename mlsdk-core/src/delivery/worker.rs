//! Per-session delivery queue and its background worker
//!
//! Each session owns one [`DeliveryWorker`]. Starting it creates a FIFO
//! channel and spawns a single task that pops messages one at a time, hands
//! each to the [`Transport`], and appends the outcome to the shared
//! [`DeliveryLog`] before taking the next one. Only one request is ever in
//! flight per session, which is what keeps delivery in submission order.
//!
//! Shutdown pushes a sentinel behind everything already queued and awaits the
//! task, so every message enqueued before shutdown is handled first.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::error::{Error, Result};
use crate::logging::LogHandle;
use crate::types::DeliveryOutcome;

use super::transport::{Method, Request, Transport, EVENTS_PATH};

/// A serialized message plus the project it is sent for
#[derive(Debug, Clone)]
pub struct Outbound {
    pub app_id: String,
    pub body: serde_json::Value,
}

/// Item on the delivery queue
#[derive(Debug)]
enum QueueItem {
    /// Transmit and record the outcome
    Deliver(Outbound),
    /// Pass through the queue without transmission or history entry
    Marker(serde_json::Value),
    /// No more messages; never transmitted
    Shutdown,
}

/// Ordered audit trail of delivery outcomes
#[derive(Debug, Default, Clone)]
pub struct DeliveryLog {
    history: Vec<DeliveryOutcome>,
    errors: usize,
}

impl DeliveryLog {
    pub fn record(&mut self, outcome: DeliveryOutcome) {
        if outcome.errored {
            self.errors += 1;
        }
        self.history.push(outcome);
    }

    pub fn history(&self) -> &[DeliveryOutcome] {
        &self.history
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    /// Only the errored entries, in delivery order
    pub fn errors(&self) -> Vec<DeliveryOutcome> {
        self.history.iter().filter(|o| o.errored).cloned().collect()
    }
}

/// Live queue handle; exists only while the worker task runs
struct QueueHandle {
    sender: mpsc::UnboundedSender<QueueItem>,
}

/// Owner of one session's queue and worker task
pub struct DeliveryWorker {
    transport: Arc<dyn Transport>,
    log: LogHandle,
    capacity: Option<usize>,
    queue: Option<QueueHandle>,
    task: Option<JoinHandle<()>>,
    history: Arc<Mutex<DeliveryLog>>,
    /// Messages enqueued but not yet handled by the worker
    pending: Arc<watch::Sender<usize>>,
}

impl DeliveryWorker {
    /// Create an idle worker; nothing runs until [`DeliveryWorker::start`]
    ///
    /// `capacity` bounds the number of undelivered messages; `None` leaves
    /// the queue unbounded.
    pub fn new(transport: Arc<dyn Transport>, capacity: Option<usize>, log: LogHandle) -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            transport,
            log,
            capacity,
            queue: None,
            task: None,
            history: Arc::new(Mutex::new(DeliveryLog::default())),
            pending: Arc::new(pending),
        }
    }

    /// Create the queue and spawn the worker task
    ///
    /// Does nothing if the worker is already running.
    pub fn start(&mut self) -> Result<()> {
        if self.queue.is_some() {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let (sender, receiver) = mpsc::unbounded_channel();

        let task = runtime.spawn(
            run(
                receiver,
                Arc::clone(&self.transport),
                Arc::clone(&self.history),
                PendingReset(Arc::clone(&self.pending)),
                self.log.clone(),
            )
            .instrument(self.log.span().clone()),
        );

        self.queue = Some(QueueHandle { sender });
        self.task = Some(task);
        Ok(())
    }

    /// Replace the logging handle used by the next [`DeliveryWorker::start`]
    pub fn set_log(&mut self, log: LogHandle) {
        self.log = log;
    }

    /// Whether a live queue exists
    pub fn is_running(&self) -> bool {
        self.queue.is_some()
    }

    /// Whether the worker task handle is still held
    pub fn has_task(&self) -> bool {
        self.task.is_some()
    }

    /// Append a message to the queue tail without waiting
    ///
    /// Fails with [`Error::NotStarted`] when no queue exists and with
    /// [`Error::QueueFull`] when a bounded queue is at capacity.
    pub fn enqueue(&self, message: Outbound) -> Result<()> {
        self.push(QueueItem::Deliver(message), true)
    }

    /// Append a message, ignoring the capacity bound
    ///
    /// Used for the closing messages of a session so shutdown always completes.
    pub fn enqueue_unbounded(&self, message: Outbound) -> Result<()> {
        self.push(QueueItem::Deliver(message), false)
    }

    /// Append a synthetic marker that is never transmitted or recorded
    pub fn enqueue_marker(&self, payload: serde_json::Value) -> Result<()> {
        self.push(QueueItem::Marker(payload), true)
    }

    fn push(&self, item: QueueItem, bounded: bool) -> Result<()> {
        let queue = self.queue.as_ref().ok_or(Error::NotStarted)?;

        if bounded {
            if let Some(capacity) = self.capacity {
                if *self.pending.borrow() >= capacity {
                    return Err(Error::QueueFull { capacity });
                }
            }
        }

        self.pending.send_modify(|n| *n += 1);
        if queue.sender.send(item).is_err() {
            // worker task is gone
            self.pending.send_modify(|n| *n = n.saturating_sub(1));
            return Err(Error::NotStarted);
        }
        Ok(())
    }

    /// Push the sentinel without awaiting the task
    ///
    /// Clears the queue handle; the task keeps draining in the background.
    pub fn close(&mut self) {
        if let Some(queue) = self.queue.take() {
            let _ = queue.sender.send(QueueItem::Shutdown);
        }
    }

    /// Push the sentinel and wait for every earlier message to be handled
    ///
    /// Afterwards both the queue and task handles are cleared; calling
    /// [`DeliveryWorker::start`] again creates a fresh pair.
    pub async fn shutdown(&mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(parent: self.log.span(), error = %e, "Delivery worker task failed");
            }
        }
    }

    /// Wait until every message enqueued so far has been handled
    ///
    /// Returns immediately when the worker is not running.
    pub async fn flush(&self) {
        if self.task.is_none() {
            return;
        }
        let mut pending = self.pending.subscribe();
        let _ = pending.wait_for(|n| *n == 0).await;
    }

    /// Number of messages enqueued but not yet handled
    pub fn pending_count(&self) -> usize {
        *self.pending.borrow()
    }

    /// Snapshot of the delivery history
    pub fn history(&self) -> Vec<DeliveryOutcome> {
        self.history.lock().history().to_vec()
    }

    /// Errored entries of the delivery history
    pub fn errors(&self) -> Vec<DeliveryOutcome> {
        self.history.lock().errors()
    }

    pub fn error_count(&self) -> usize {
        self.history.lock().error_count()
    }
}

/// Pending counter owned by the worker task
///
/// Dropping it zeroes the count, so waiters are released even when the task
/// is aborted before it runs.
struct PendingReset(Arc<watch::Sender<usize>>);

impl Drop for PendingReset {
    fn drop(&mut self) {
        self.0.send_replace(0);
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> &str {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        reason
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason
    } else {
        "unknown panic"
    }
}

/// Worker loop: one message at a time until the sentinel
async fn run(
    mut receiver: mpsc::UnboundedReceiver<QueueItem>,
    transport: Arc<dyn Transport>,
    history: Arc<Mutex<DeliveryLog>>,
    pending: PendingReset,
    log: LogHandle,
) {
    tracing::debug!("Delivery worker listening");
    let method = Method::POST;

    while let Some(item) = receiver.recv().await {
        match item {
            QueueItem::Shutdown => break,
            QueueItem::Marker(payload) => {
                if log.is_debug() {
                    tracing::debug!(payload = %payload, "Skipping marker message");
                }
            }
            QueueItem::Deliver(message) => {
                if log.is_debug() {
                    tracing::debug!(body = %message.body, "Processing message");
                }
                let send = transport.send(Request {
                    method: &method,
                    path: EVENTS_PATH,
                    app_id: &message.app_id,
                    body: &message.body,
                });
                let outcome = match AssertUnwindSafe(send).catch_unwind().await {
                    Ok(outcome) => outcome,
                    Err(payload) => DeliveryOutcome::request_failed(format!(
                        "transport panicked: {}",
                        panic_reason(payload.as_ref())
                    )),
                };
                if outcome.errored {
                    tracing::warn!(
                        status = outcome.status,
                        message = %outcome.message,
                        "Delivery failed"
                    );
                }
                history.lock().record(outcome);
            }
        }
        pending.0.send_modify(|n| *n = n.saturating_sub(1));
    }

    tracing::debug!("Delivery worker finished");
}
