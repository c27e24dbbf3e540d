//! Commands: immutable records of observed activity
//!
//! Producers (UI instrumentation, network hooks, the manual API, the touch
//! capture collaborator) build a [`Command`] and hand it to the monitor. The
//! scope tree consumes each command exactly once.
//!
//! A command is an envelope (time, subject, optional target view, attributes)
//! around a closed [`CommandKind`]. Adding a kind is a compile-time-checked
//! change everywhere commands are matched.
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use rum_core::command::{ActionType, Command};
//!
//! let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
//! let view = Command::start_view("checkout", "Checkout", t0);
//! let tap = Command::add_action(ActionType::Tap, "Pay", t0).with_attribute("amount", 42);
//! assert_eq!(view.kind_name(), "start_view");
//! assert_eq!(tap.attributes["amount"], 42);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::ContextUpdate;
use crate::identifier::Identifier;

/// Attribute map; ordered so serialized output is stable
pub type Attributes = BTreeMap<String, Value>;

/// Opaque identity of the element, view, resource or span a command is about
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Subject(String);

impl Subject {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Subject {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for Subject {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Tap,
    Click,
    Scroll,
    Swipe,
    Custom,
    ApplicationStart,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSource {
    Source,
    Network,
    Console,
    Custom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    #[default]
    Native,
    Xhr,
    Image,
    Document,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchPhase {
    Down,
    Move,
    Up,
}

/// The closed set of command kinds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandKind {
    ApplicationStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        launch_duration_ms: Option<u64>,
    },
    StartView {
        name: String,
    },
    StopView,
    AddUserAction {
        action_type: ActionType,
        name: String,
    },
    StartUserAction {
        action_type: ActionType,
        name: String,
    },
    StopUserAction {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    StartResource {
        method: String,
        url: String,
    },
    StopResource {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        size: Option<u64>,
        #[serde(default)]
        resource_kind: ResourceKind,
    },
    StopResourceWithError {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },
    AddError {
        message: String,
        source: ErrorSource,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    AddLongTask {
        duration_ms: u64,
    },
    /// Interaction snapshot from the touch capture collaborator
    AddTouch {
        x: f64,
        y: f64,
        phase: TouchPhase,
    },
    StartSpan {
        operation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trace_id: Option<Identifier>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        span_id: Option<Identifier>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_span_id: Option<Identifier>,
    },
    StopSpan,
    StopSession,
    UpdateContext {
        update: ContextUpdate,
    },
}

impl CommandKind {
    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::ApplicationStart { .. } => "application_start",
            CommandKind::StartView { .. } => "start_view",
            CommandKind::StopView => "stop_view",
            CommandKind::AddUserAction { .. } => "add_user_action",
            CommandKind::StartUserAction { .. } => "start_user_action",
            CommandKind::StopUserAction { .. } => "stop_user_action",
            CommandKind::StartResource { .. } => "start_resource",
            CommandKind::StopResource { .. } => "stop_resource",
            CommandKind::StopResourceWithError { .. } => "stop_resource_with_error",
            CommandKind::AddError { .. } => "add_error",
            CommandKind::AddLongTask { .. } => "add_long_task",
            CommandKind::AddTouch { .. } => "add_touch",
            CommandKind::StartSpan { .. } => "start_span",
            CommandKind::StopSpan => "stop_span",
            CommandKind::StopSession => "stop_session",
            CommandKind::UpdateContext { .. } => "update_context",
        }
    }

    /// Actions the user performed directly
    pub fn is_user_interaction(&self) -> bool {
        matches!(
            self,
            CommandKind::AddUserAction { .. } | CommandKind::StartUserAction { .. }
        )
    }
}

/// One observed activity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// When the activity happened (producer clock)
    pub time: DateTime<Utc>,

    pub subject: Subject,

    /// Explicit target view for actions, resources, errors and long tasks;
    /// `None` routes to the active view
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<Subject>,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    #[serde(flatten)]
    pub kind: CommandKind,
}

impl Command {
    pub fn new(kind: CommandKind, subject: impl Into<Subject>, time: DateTime<Utc>) -> Self {
        Self {
            time,
            subject: subject.into(),
            view: None,
            attributes: Attributes::new(),
            kind,
        }
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes.extend(attributes);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Route to the view started with `key` instead of the active view
    pub fn targeting_view(mut self, key: impl Into<Subject>) -> Self {
        self.view = Some(key.into());
        self
    }

    pub fn kind_name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn application_start(launch_duration_ms: Option<u64>, time: DateTime<Utc>) -> Self {
        Self::new(
            CommandKind::ApplicationStart { launch_duration_ms },
            "application",
            time,
        )
    }

    pub fn start_view(
        key: impl Into<Subject>,
        name: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        Self::new(CommandKind::StartView { name: name.into() }, key, time)
    }

    pub fn stop_view(key: impl Into<Subject>, time: DateTime<Utc>) -> Self {
        Self::new(CommandKind::StopView, key, time)
    }

    pub fn add_action(
        action_type: ActionType,
        name: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        Self::new(
            CommandKind::AddUserAction {
                action_type,
                name: name.clone(),
            },
            name,
            time,
        )
    }

    pub fn start_action(
        action_type: ActionType,
        name: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        let name = name.into();
        Self::new(
            CommandKind::StartUserAction {
                action_type,
                name: name.clone(),
            },
            name,
            time,
        )
    }

    pub fn stop_action(time: DateTime<Utc>) -> Self {
        Self::new(CommandKind::StopUserAction { name: None }, "user-action", time)
    }

    pub fn start_resource(
        key: impl Into<Subject>,
        method: impl Into<String>,
        url: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        Self::new(
            CommandKind::StartResource {
                method: method.into(),
                url: url.into(),
            },
            key,
            time,
        )
    }

    pub fn stop_resource(
        key: impl Into<Subject>,
        status_code: Option<u16>,
        time: DateTime<Utc>,
    ) -> Self {
        Self::new(
            CommandKind::StopResource {
                status_code,
                size: None,
                resource_kind: ResourceKind::Native,
            },
            key,
            time,
        )
    }

    pub fn stop_resource_with_error(
        key: impl Into<Subject>,
        message: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        Self::new(
            CommandKind::StopResourceWithError {
                message: message.into(),
                status_code: None,
            },
            key,
            time,
        )
    }

    pub fn add_error(message: impl Into<String>, source: ErrorSource, time: DateTime<Utc>) -> Self {
        Self::new(
            CommandKind::AddError {
                message: message.into(),
                source,
                stack: None,
            },
            "error",
            time,
        )
    }

    pub fn add_long_task(duration_ms: u64, time: DateTime<Utc>) -> Self {
        Self::new(CommandKind::AddLongTask { duration_ms }, "long-task", time)
    }

    pub fn add_touch(x: f64, y: f64, phase: TouchPhase, time: DateTime<Utc>) -> Self {
        Self::new(CommandKind::AddTouch { x, y, phase }, "touch", time)
    }

    pub fn start_span(
        key: impl Into<Subject>,
        operation: impl Into<String>,
        time: DateTime<Utc>,
    ) -> Self {
        Self::new(
            CommandKind::StartSpan {
                operation: operation.into(),
                trace_id: None,
                span_id: None,
                parent_span_id: None,
            },
            key,
            time,
        )
    }

    pub fn stop_span(key: impl Into<Subject>, time: DateTime<Utc>) -> Self {
        Self::new(CommandKind::StopSpan, key, time)
    }

    pub fn stop_session(time: DateTime<Utc>) -> Self {
        Self::new(CommandKind::StopSession, "session", time)
    }

    pub fn update_context(update: ContextUpdate, time: DateTime<Utc>) -> Self {
        Self::new(CommandKind::UpdateContext { update }, "context", time)
    }
}
