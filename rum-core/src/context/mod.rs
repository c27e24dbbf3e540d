//! Cross-feature context and point-in-time snapshots
//!
//! [`CoreContext`] is the mutable, shared state that every feature attributes
//! its telemetry to: application id, user identity, device and network
//! metadata, global attributes. The scope tree owns one and changes it only
//! through [`ContextUpdate`] commands, in queue order.
//!
//! [`ContextSnapshot`] is an immutable copy of that state joined with the live
//! session/view/action ids. Consumers always receive a copy; later tree
//! mutation can never alter a snapshot that was already captured.
//!
//! ```text
//! CoreContext ──┐
//!               ├──► ContextSnapshot (owned copy) ──► Event
//! ScopeTree ────┘        session / view / action ids
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::Attributes;
use crate::identifier::Identifier;

/// Identity of the current user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Extra user attributes
    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub extra: Attributes,
}

impl UserInfo {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }
}

/// Device metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub os_name: String,
    #[serde(default)]
    pub os_version: String,
}

/// Whether the network is reachable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Yes,
    #[default]
    Maybe,
    No,
}

/// Network metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    #[serde(default)]
    pub reachability: Reachability,
    /// Available interfaces ("wifi", "cellular", ...)
    #[serde(default)]
    pub interfaces: Vec<String>,
}

/// The view a snapshot is attributed to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewContext {
    pub id: Identifier,
    /// Subject key the view was started with
    pub key: String,
    pub name: String,
}

/// A change to the cross-feature context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "update", rename_all = "snake_case")]
pub enum ContextUpdate {
    User { user: UserInfo },
    Device { device: DeviceInfo },
    Network { network: NetworkInfo },
    AddAttribute { key: String, value: Value },
    RemoveAttribute { key: String },
}

/// Mutable cross-feature state owned by the scope tree root
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoreContext {
    pub application_id: String,
    pub user: UserInfo,
    pub device: DeviceInfo,
    pub network: NetworkInfo,
    /// Global attributes attached to every snapshot
    pub attributes: Attributes,
}

impl CoreContext {
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            ..Self::default()
        }
    }

    pub fn apply(&mut self, update: &ContextUpdate) {
        match update {
            ContextUpdate::User { user } => self.user = user.clone(),
            ContextUpdate::Device { device } => self.device = device.clone(),
            ContextUpdate::Network { network } => self.network = network.clone(),
            ContextUpdate::AddAttribute { key, value } => {
                self.attributes.insert(key.clone(), value.clone());
            }
            ContextUpdate::RemoveAttribute { key } => {
                self.attributes.remove(key);
            }
        }
    }

    /// Snapshot with no session, view or action attached
    pub fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            application_id: self.application_id.clone(),
            session_id: Identifier::INVALID,
            previous_session_id: None,
            session_sampled: false,
            view: None,
            user_action_id: None,
            user: self.user.clone(),
            device: self.device.clone(),
            network: self.network.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

/// Immutable point-in-time copy of the context used for attribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub application_id: String,

    /// [`Identifier::INVALID`] until the first session starts
    pub session_id: Identifier,

    /// Session this one replaced, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_session_id: Option<Identifier>,

    /// Whether events of this session are kept by sampling
    #[serde(default)]
    pub session_sampled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_action_id: Option<Identifier>,

    #[serde(default)]
    pub user: UserInfo,

    #[serde(default)]
    pub device: DeviceInfo,

    #[serde(default)]
    pub network: NetworkInfo,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,
}

impl ContextSnapshot {
    pub fn has_session(&self) -> bool {
        self.session_id.is_valid()
    }

    pub fn view_id(&self) -> Option<Identifier> {
        self.view.as_ref().map(|v| v.id)
    }

    pub fn view_key(&self) -> Option<&str> {
        self.view.as_ref().map(|v| v.key.as_str())
    }

    pub(crate) fn with_session(
        mut self,
        session_id: Identifier,
        previous_session_id: Option<Identifier>,
        sampled: bool,
    ) -> Self {
        self.session_id = session_id;
        self.previous_session_id = previous_session_id;
        self.session_sampled = sampled;
        self
    }

    pub(crate) fn with_view(mut self, view: ViewContext) -> Self {
        self.view = Some(view);
        self
    }

    pub(crate) fn with_user_action(mut self, action_id: Option<Identifier>) -> Self {
        self.user_action_id = action_id;
        self
    }
}
