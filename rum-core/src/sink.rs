//! Event sinks
//!
//! The monitor hands every finished [`Event`] to an [`EventSink`]. Batching,
//! persistence and upload live behind this trait and are out of this crate's
//! hands; the implementations here cover tests, tooling and the disabled state.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rum_core::sink::{EventSink, InMemorySink};
//!
//! let sink = Arc::new(InMemorySink::new());
//! assert_eq!(sink.name(), "in-memory");
//! assert!(sink.is_empty());
//! ```

use std::io::Write;

use parking_lot::{Mutex, RwLock};

use crate::error::{Result, RumError};
use crate::event::{Event, EventType};
use crate::identifier::Identifier;

/// Destination for finished events
///
/// Called from the monitor's worker thread only, one event at a time, in
/// emission order. A failing write loses that event and nothing else.
pub trait EventSink: Send + Sync {
    /// Accept one finished event
    fn write(&self, event: Event) -> Result<()>;

    /// Push buffered events downstream
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Sink name (for logging/debugging)
    fn name(&self) -> &'static str;
}

/// Keeps every event in memory, in arrival order
#[derive(Debug, Default)]
pub struct InMemorySink {
    events: RwLock<Vec<Event>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    pub fn events_of_type(&self, event_type: EventType) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .cloned()
            .collect()
    }

    pub fn events_for_session(&self, session_id: Identifier) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.session_id() == session_id)
            .cloned()
            .collect()
    }

    /// Remove and return everything written so far
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.events.write())
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for InMemorySink {
    fn write(&self, event: Event) -> Result<()> {
        self.events.write().push(event);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn write(&self, _event: Event) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

/// Forwards each event to a closure
pub struct CallbackSink {
    callback: Box<dyn Fn(Event) + Send + Sync>,
}

impl CallbackSink {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }
}

impl std::fmt::Debug for CallbackSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSink")
            .field("callback", &"<callback>")
            .finish()
    }
}

impl EventSink for CallbackSink {
    fn write(&self, event: Event) -> Result<()> {
        (self.callback)(event);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "callback"
    }
}

/// Writes one JSON document per line to any writer
#[derive(Debug)]
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn write(&self, event: Event) -> Result<()> {
        let line = event.to_json_line()?;
        writeln!(self.writer.lock(), "{}", line).map_err(|e| RumError::SinkWrite {
            sink: self.name().to_string(),
            reason: e.to_string(),
        })
    }

    fn flush(&self) -> Result<()> {
        self.writer.lock().flush().map_err(|e| RumError::SinkWrite {
            sink: self.name().to_string(),
            reason: e.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "json-lines"
    }
}
