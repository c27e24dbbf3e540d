//! Finished, attributed telemetry events
//!
//! An [`Event`] pairs a typed [`EventPayload`] with the [`ContextSnapshot`]
//! that was in effect when the underlying activity began. Events are values:
//! once built they are never mutated, and ownership passes to the sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::command::{ActionType, Attributes, ErrorSource, ResourceKind};
use crate::context::ContextSnapshot;
use crate::error::Result;
use crate::identifier::Identifier;

/// Event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    View,
    Action,
    Resource,
    Error,
    LongTask,
    Span,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::View => "view",
            EventType::Action => "action",
            EventType::Resource => "resource",
            EventType::Error => "error",
            EventType::LongTask => "long_task",
            EventType::Span => "span",
        }
    }

    /// RUM events are subject to session sampling; spans are not
    pub fn is_rum_event(&self) -> bool {
        !matches!(self, EventType::Span)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "view" => Ok(EventType::View),
            "action" => Ok(EventType::Action),
            "resource" => Ok(EventType::Resource),
            "error" => Ok(EventType::Error),
            "long_task" => Ok(EventType::LongTask),
            "span" => Ok(EventType::Span),
            _ => Err(format!("Unknown event type: {}", s)),
        }
    }
}

/// View update: the latest known state of a view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewPayload {
    pub view_id: Identifier,
    pub key: String,
    pub name: String,
    /// Incremented on every update of the same view
    pub version: u64,
    pub time_spent_ms: u64,
    pub action_count: u64,
    pub resource_count: u64,
    pub error_count: u64,
    pub long_task_count: u64,
    pub interaction_count: u64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    pub action_id: Identifier,
    pub action_type: ActionType,
    pub name: String,
    /// Set for continuous actions and application start
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub resource_count: u64,
    #[serde(default)]
    pub error_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourcePayload {
    pub resource_id: Identifier,
    pub method: String,
    pub url: String,
    pub resource_kind: ResourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub message: String,
    pub source: ErrorSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    /// URL of the failed resource, for network errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTaskPayload {
    pub duration_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanPayload {
    pub trace_id: Identifier,
    pub span_id: Identifier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<Identifier>,
    pub operation: String,
    pub duration_ms: u64,
}

/// Type-safe event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    View(ViewPayload),
    Action(ActionPayload),
    Resource(ResourcePayload),
    Error(ErrorPayload),
    LongTask(LongTaskPayload),
    Span(SpanPayload),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::View(_) => EventType::View,
            EventPayload::Action(_) => EventType::Action,
            EventPayload::Resource(_) => EventType::Resource,
            EventPayload::Error(_) => EventType::Error,
            EventPayload::LongTask(_) => EventType::LongTask,
            EventPayload::Span(_) => EventType::Span,
        }
    }
}

/// A finished telemetry event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// When the underlying activity began
    pub time: DateTime<Utc>,

    /// Attribution context captured at activity start
    pub context: ContextSnapshot,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    pub payload: EventPayload,
}

impl Event {
    pub fn new(time: DateTime<Utc>, context: ContextSnapshot, payload: EventPayload) -> Self {
        Self {
            time,
            context,
            attributes: Attributes::new(),
            payload,
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn session_id(&self) -> Identifier {
        self.context.session_id
    }

    pub fn view_id(&self) -> Option<Identifier> {
        self.context.view_id()
    }

    pub fn view_payload(&self) -> Option<&ViewPayload> {
        match &self.payload {
            EventPayload::View(view) => Some(view),
            _ => None,
        }
    }

    /// Single-line JSON form used by the replay tool and file sinks
    pub fn to_json_line(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Whole milliseconds from `start` to `end`, zero when `end` is earlier
pub(crate) fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}
