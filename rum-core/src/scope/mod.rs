//! The scope tree: session lifecycle and command routing
//!
//! ```text
//! ApplicationScope                      (root, lives for the monitor's lifetime)
//!  ├── CoreContext                      (user, device, network, attributes)
//!  ├── WriteScheduler                   (captured snapshots of pending work)
//!  ├── spans: Subject -> SpanScope
//!  └── SessionSlot
//!       NoSession | Expired | Active(SessionScope)
//!                              ├── active view: ViewScope
//!                              │     ├── active user action
//!                              │     └── resources: Subject -> ResourceScope
//!                              └── detached resources and action
//!                                  (stopped views, orphan policy)
//! ```
//!
//! Ownership is strictly top-down. A child never holds a reference to its
//! parent: the parent passes its own snapshot down as a borrowed argument for
//! the duration of one call, so there is nothing to dangle.
//!
//! Processing is a pure fold. [`ApplicationScope::process`] takes a command,
//! mutates the tree and appends zero or more events to a caller-provided
//! buffer. It performs no I/O and reads no clock; all time comes from command
//! timestamps, so replaying a log reproduces the same sessions and events.

pub mod application;
pub mod session;
pub mod view;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RumConfig;
use crate::context::CoreContext;
use crate::identifier::{IdGenerator, Identifier};
use crate::scheduler::WriteScheduler;

pub use application::ApplicationScope;
pub use session::SessionScope;
pub use view::{ViewCounters, ViewScope};

/// Borrowed collaborators handed down the tree for one command
pub(crate) struct ScopeEnv<'a> {
    pub core: &'a CoreContext,
    pub ids: &'a dyn IdGenerator,
    pub scheduler: &'a WriteScheduler,
    pub config: &'a RumConfig,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Inactivity,
    MaxDuration,
    Stopped,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Inactivity => "inactivity",
            EndReason::MaxDuration => "max_duration",
            EndReason::Stopped => "stopped",
        }
    }
}

/// Serializable summary of the tree, compared by the determinism tests and
/// printed by the replay tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScopeTreeState {
    pub session: SessionState,
    pub application_started: bool,
    /// Subjects of spans started and not yet stopped, sorted
    pub pending_spans: Vec<String>,
    pub processed_commands: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    NoSession,
    Active {
        session_id: Identifier,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_session_id: Option<Identifier>,
        started_at: DateTime<Utc>,
        last_activity: DateTime<Utc>,
        sampled: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        active_view: Option<ViewState>,
        detached_resources: Vec<String>,
    },
    Expired {
        session_id: Identifier,
        reason: EndReason,
    },
}

impl SessionState {
    pub fn session_id(&self) -> Option<Identifier> {
        match self {
            SessionState::NoSession => None,
            SessionState::Active { session_id, .. } | SessionState::Expired { session_id, .. } => {
                Some(*session_id)
            }
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SessionState::Active { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub view_id: Identifier,
    pub key: String,
    pub name: String,
    pub version: u64,
    pub counters: ViewCounters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_action: Option<Identifier>,
    pub pending_resources: Vec<String>,
}
