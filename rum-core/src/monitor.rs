//! The monitor: serialized command processing on a worker thread
//!
//! Producers on any thread post [`Command`]s; a single worker thread owns the
//! [`ApplicationScope`] and drains them strictly in queue order, handing the
//! resulting events to the [`EventSink`].
//!
//! ```text
//!  UI thread ─┐                        ┌──────────── worker ────────────┐
//!  network  ──┼─► crossbeam channel ──►│ ApplicationScope::process(cmd) │──► EventSink
//!  timers   ──┘   (bounded, FIFO)      └────────────────────────────────┘
//! ```
//!
//! Posting never blocks and never fails loudly: a full queue or a stopped
//! worker drops the command with a warning.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::command::{Command, CommandKind, Subject};
use crate::config::RumConfig;
use crate::context::ContextSnapshot;
use crate::error::{Result, RumError};
use crate::identifier::{IdGenerator, Identifier, RandomIdGenerator};
use crate::propagation::{self, HeaderMap, HeaderStyle, SpanContext};
use crate::scope::{ApplicationScope, ScopeTreeState};
use crate::sink::EventSink;

/// Ingestion surface shared by the live monitor and the no-op fallback
pub trait RumMonitor: Send + Sync + fmt::Debug {
    /// Post a command, reporting why it was not accepted
    fn try_process(&self, command: Command) -> Result<()>;

    /// Post a command; failures are logged and the command is dropped
    fn process(&self, command: Command) {
        if let Err(err) = self.try_process(command) {
            warn!(code = err.error_code(), error = %err, "Command dropped");
        }
    }

    /// Start a span at `time`, optionally continuing a propagated context
    fn start_span_at(
        &self,
        operation: &str,
        parent: Option<&SpanContext>,
        time: DateTime<Utc>,
    ) -> SpanHandle;

    fn start_span(&self, operation: &str) -> SpanHandle {
        self.start_span_at(operation, None, Utc::now())
    }

    /// Block until everything posted before this call was processed and the
    /// sink flushed
    fn flush(&self);

    fn is_noop(&self) -> bool {
        false
    }
}

enum Message {
    Command(Command),
    Flush(Sender<()>),
    State(Sender<(ScopeTreeState, ContextSnapshot)>),
    Shutdown,
}

/// Queue counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    pub accepted: u64,
    pub dropped: u64,
    pub processed: u64,
    pub events: u64,
    pub sink_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    accepted: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    events: AtomicU64,
    sink_errors: AtomicU64,
}

struct MonitorInner {
    application_id: String,
    sender: Sender<Message>,
    capacity: Option<usize>,
    ids: Arc<dyn IdGenerator>,
    running: AtomicBool,
    counters: Arc<Counters>,
}

impl MonitorInner {
    fn enqueue(&self, command: Command) -> Result<()> {
        if !self.running.load(Ordering::Acquire) {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return Err(RumError::MonitorStopped);
        }
        match self.sender.try_send(Message::Command(command)) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(RumError::QueueFull {
                    capacity: self.capacity.unwrap_or_default(),
                })
            }
            Err(TrySendError::Disconnected(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Err(RumError::MonitorStopped)
            }
        }
    }

    /// Send a control message and wait for its reply
    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Message) -> Option<T> {
        if !self.running.load(Ordering::Acquire) {
            return None;
        }
        let (reply_tx, reply_rx) = channel::bounded(1);
        self.sender.send(build(reply_tx)).ok()?;
        reply_rx.recv().ok()
    }
}

/// The live monitor
pub struct Monitor {
    inner: Arc<MonitorInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("application_id", &self.inner.application_id)
            .field("capacity", &self.inner.capacity)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Monitor {
    /// Validate `config` and start the worker with a random identifier source
    pub fn start(config: RumConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;
        let ids = Arc::new(RandomIdGenerator::new(&config.identifiers)?);
        Self::with_generator(config, sink, ids)
    }

    /// Start the worker with an explicit identifier source
    pub fn with_generator(
        config: RumConfig,
        sink: Arc<dyn EventSink>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = match config.queue_capacity {
            Some(capacity) => channel::bounded(capacity),
            None => channel::unbounded(),
        };
        let counters = Arc::new(Counters::default());
        let scope = ApplicationScope::new(config.clone(), Arc::clone(&ids));

        let worker_counters = Arc::clone(&counters);
        let worker = thread::Builder::new()
            .name("rum-monitor".to_string())
            .spawn(move || run_loop(scope, receiver, sink, worker_counters))?;

        debug!(
            application = %config.application_id,
            capacity = ?config.queue_capacity,
            "Monitor started"
        );

        Ok(Self {
            inner: Arc::new(MonitorInner {
                application_id: config.application_id,
                sender,
                capacity: config.queue_capacity,
                ids,
                running: AtomicBool::new(true),
                counters,
            }),
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn application_id(&self) -> &str {
        &self.inner.application_id
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> MonitorStats {
        let c = &self.inner.counters;
        MonitorStats {
            accepted: c.accepted.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            processed: c.processed.load(Ordering::Relaxed),
            events: c.events.load(Ordering::Relaxed),
            sink_errors: c.sink_errors.load(Ordering::Relaxed),
        }
    }

    /// Tree state after everything posted so far; `None` once stopped
    pub fn state(&self) -> Option<ScopeTreeState> {
        self.inner.request(Message::State).map(|(state, _)| state)
    }

    /// Live context after everything posted so far; `None` once stopped
    pub fn context_snapshot(&self) -> Option<ContextSnapshot> {
        self.inner.request(Message::State).map(|(_, snapshot)| snapshot)
    }

    /// Drain the queue, flush the sink and join the worker
    ///
    /// Outstanding span handles become no-ops. Idempotent.
    pub fn shutdown(&self) {
        if !self.inner.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if self.inner.sender.send(Message::Shutdown).is_err() {
            debug!("Monitor worker already gone");
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!(application = %self.inner.application_id, "Monitor worker panicked");
            }
        }
        debug!(application = %self.inner.application_id, "Monitor stopped");
    }
}

impl RumMonitor for Monitor {
    fn try_process(&self, command: Command) -> Result<()> {
        self.inner.enqueue(command)
    }

    fn start_span_at(
        &self,
        operation: &str,
        parent: Option<&SpanContext>,
        time: DateTime<Utc>,
    ) -> SpanHandle {
        let span_id = self.inner.ids.generate();
        let (trace_id, parent_span_id) = match parent.filter(|p| p.is_valid()) {
            Some(parent) => (parent.trace_id, Some(parent.span_id)),
            None => (self.inner.ids.generate(), None),
        };
        let subject = Subject::new(span_id.to_string());

        // Ids are fixed here so the caller can propagate them before the
        // worker has seen the start.
        let kind = CommandKind::StartSpan {
            operation: operation.to_string(),
            trace_id: Some(trace_id),
            span_id: Some(span_id),
            parent_span_id,
        };
        self.process(Command::new(kind, subject.clone(), time));

        SpanHandle {
            subject,
            context: SpanContext::new(trace_id, span_id),
            parent_span_id,
            started_at: time,
            monitor: Arc::downgrade(&self.inner),
            finished: false,
        }
    }

    fn flush(&self) {
        if self.inner.request(Message::Flush).is_none() {
            debug!("Flush skipped; monitor not running");
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(
    mut scope: ApplicationScope,
    receiver: Receiver<Message>,
    sink: Arc<dyn EventSink>,
    counters: Arc<Counters>,
) {
    let mut events = Vec::new();

    for message in receiver.iter() {
        match message {
            Message::Command(command) => {
                scope.process(&command, &mut events);
                counters.processed.fetch_add(1, Ordering::Relaxed);
                for event in events.drain(..) {
                    counters.events.fetch_add(1, Ordering::Relaxed);
                    if let Err(err) = sink.write(event) {
                        counters.sink_errors.fetch_add(1, Ordering::Relaxed);
                        warn!(sink = sink.name(), error = %err, "Event dropped by sink");
                    }
                }
            }
            Message::Flush(reply) => {
                if let Err(err) = sink.flush() {
                    counters.sink_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(sink = sink.name(), error = %err, "Sink flush failed");
                }
                let _ = reply.send(());
            }
            Message::State(reply) => {
                let _ = reply.send((scope.state(), scope.context_snapshot()));
            }
            Message::Shutdown => break,
        }
    }

    // Commands queued before the shutdown message still get processed.
    for message in receiver.try_iter() {
        if let Message::Command(command) = message {
            scope.process(&command, &mut events);
            counters.processed.fetch_add(1, Ordering::Relaxed);
            for event in events.drain(..) {
                counters.events.fetch_add(1, Ordering::Relaxed);
                if sink.write(event).is_err() {
                    counters.sink_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
    if let Err(err) = sink.flush() {
        warn!(sink = sink.name(), error = %err, "Sink flush on shutdown failed");
    }
}

/// Fallback used before the registry is enabled; accepts and discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NopMonitor;

impl RumMonitor for NopMonitor {
    fn try_process(&self, _command: Command) -> Result<()> {
        Err(RumError::NotEnabled)
    }

    fn process(&self, _command: Command) {}

    fn start_span_at(
        &self,
        operation: &str,
        _parent: Option<&SpanContext>,
        time: DateTime<Utc>,
    ) -> SpanHandle {
        SpanHandle::noop(operation, time)
    }

    fn flush(&self) {}

    fn is_noop(&self) -> bool {
        true
    }
}

/// Caller-side handle of a started span
///
/// Holds only a weak reference to the monitor: finishing after the monitor is
/// gone does nothing. Dropping an unfinished handle finishes the span at the
/// current time.
pub struct SpanHandle {
    subject: Subject,
    context: SpanContext,
    parent_span_id: Option<Identifier>,
    started_at: DateTime<Utc>,
    monitor: Weak<MonitorInner>,
    finished: bool,
}

impl fmt::Debug for SpanHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpanHandle")
            .field("subject", &self.subject)
            .field("trace_id", &self.context.trace_id)
            .field("span_id", &self.context.span_id)
            .field("parent_span_id", &self.parent_span_id)
            .field("started_at", &self.started_at)
            .field("finished", &self.finished)
            .finish()
    }
}

impl SpanHandle {
    fn noop(operation: &str, time: DateTime<Utc>) -> Self {
        Self {
            subject: Subject::new(operation),
            context: SpanContext::new(Identifier::INVALID, Identifier::INVALID),
            parent_span_id: None,
            started_at: time,
            monitor: Weak::new(),
            finished: true,
        }
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn trace_id(&self) -> Identifier {
        self.context.trace_id
    }

    pub fn span_id(&self) -> Identifier {
        self.context.span_id
    }

    pub fn parent_span_id(&self) -> Option<Identifier> {
        self.parent_span_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn context(&self) -> SpanContext {
        self.context
    }

    pub fn is_noop(&self) -> bool {
        !self.context.is_valid()
    }

    /// Headers continuing this span in a downstream service
    pub fn propagation_headers(&self, style: HeaderStyle) -> HeaderMap {
        propagation::inject(&self.context, style)
    }

    pub fn finish(self) {
        self.finish_at(Utc::now());
    }

    pub fn finish_at(mut self, time: DateTime<Utc>) {
        self.send_stop(time);
    }

    fn send_stop(&mut self, time: DateTime<Utc>) {
        if std::mem::replace(&mut self.finished, true) {
            return;
        }
        let Some(monitor) = self.monitor.upgrade() else {
            debug!(span = %self.context.span_id, "Monitor gone; span finish dropped");
            return;
        };
        if let Err(err) = monitor.enqueue(Command::stop_span(self.subject.clone(), time)) {
            debug!(span = %self.context.span_id, error = %err, "Span finish dropped");
        }
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        self.send_stop(Utc::now());
    }
}
