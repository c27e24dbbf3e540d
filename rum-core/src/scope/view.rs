//! View scope and its children (continuous user action, resources)

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::{ActionType, Attributes, Command, CommandKind, ErrorSource, Subject};
use crate::context::{ContextSnapshot, ViewContext};
use crate::event::{
    elapsed_ms, ActionPayload, ErrorPayload, Event, EventPayload, LongTaskPayload,
    ResourcePayload, ViewPayload,
};
use crate::identifier::{IdGenerator, Identifier};
use crate::scheduler::{ActivityKind, CapturedContextHandle};

use super::{ScopeEnv, ViewState};

/// Name of the action emitted for `ApplicationStart`
pub const APPLICATION_START_ACTION: &str = "application_start";

/// Per-view event counters carried by view updates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewCounters {
    pub action_count: u64,
    pub resource_count: u64,
    pub error_count: u64,
    pub long_task_count: u64,
    pub interaction_count: u64,
}

/// Build the event for a command that completes in one step
///
/// Returns `None` for commands that are not one-shot activities.
pub(crate) fn one_shot_event(
    command: &Command,
    snapshot: ContextSnapshot,
    ids: &dyn IdGenerator,
) -> Option<Event> {
    let payload = match &command.kind {
        CommandKind::AddUserAction { action_type, name } => EventPayload::Action(ActionPayload {
            action_id: ids.generate(),
            action_type: *action_type,
            name: name.clone(),
            duration_ms: None,
            resource_count: 0,
            error_count: 0,
        }),
        CommandKind::ApplicationStart { launch_duration_ms } => EventPayload::Action(ActionPayload {
            action_id: ids.generate(),
            action_type: ActionType::ApplicationStart,
            name: APPLICATION_START_ACTION.to_string(),
            duration_ms: *launch_duration_ms,
            resource_count: 0,
            error_count: 0,
        }),
        CommandKind::AddError {
            message,
            source,
            stack,
        } => EventPayload::Error(ErrorPayload {
            message: message.clone(),
            source: *source,
            stack: stack.clone(),
            resource_url: None,
            status_code: None,
        }),
        CommandKind::AddLongTask { duration_ms } => EventPayload::LongTask(LongTaskPayload {
            duration_ms: *duration_ms,
        }),
        _ => return None,
    };
    Some(Event::new(command.time, snapshot, payload).with_attributes(command.attributes.clone()))
}

/// A resource between start and stop
#[derive(Debug)]
pub(crate) struct ResourceScope {
    handle: CapturedContextHandle,
    method: String,
    url: String,
    attributes: Attributes,
}

impl ResourceScope {
    /// Capture `snapshot` for a new resource; `None` unless `command` is a resource start
    pub(crate) fn start(
        command: &Command,
        snapshot: ContextSnapshot,
        env: &ScopeEnv<'_>,
    ) -> Option<Self> {
        let CommandKind::StartResource { method, url } = &command.kind else {
            return None;
        };
        let handle = env.scheduler.begin_activity(
            ActivityKind::Resource,
            env.ids.generate(),
            command.time,
            snapshot,
        );
        Some(Self {
            handle,
            method: method.clone(),
            url: url.clone(),
            attributes: command.attributes.clone(),
        })
    }

    pub(crate) fn id(&self) -> Identifier {
        self.handle.activity_id()
    }

    /// Complete with a resource event, or an error event for a failed resource
    pub(crate) fn stop(self, command: &Command) -> Option<Event> {
        let mut attributes = self.attributes;
        attributes.extend(command.attributes.clone());

        match &command.kind {
            CommandKind::StopResource {
                status_code,
                size,
                resource_kind,
            } => {
                let payload = ResourcePayload {
                    resource_id: self.handle.activity_id(),
                    method: self.method,
                    url: self.url,
                    resource_kind: *resource_kind,
                    status_code: *status_code,
                    size: *size,
                    duration_ms: elapsed_ms(self.handle.started_at(), command.time),
                };
                self.handle.complete(EventPayload::Resource(payload), attributes)
            }
            CommandKind::StopResourceWithError {
                message,
                status_code,
            } => {
                let payload = ErrorPayload {
                    message: message.clone(),
                    source: ErrorSource::Network,
                    stack: None,
                    resource_url: Some(self.url),
                    status_code: *status_code,
                };
                let time = command.time;
                self.handle
                    .complete(EventPayload::Error(payload), attributes)
                    .map(|mut event| {
                        event.time = time;
                        event
                    })
            }
            _ => None,
        }
    }
}

/// A continuous user action between start and stop
#[derive(Debug)]
pub(crate) struct UserActionScope {
    handle: CapturedContextHandle,
    action_type: ActionType,
    name: String,
    attributes: Attributes,
    resource_count: u64,
    error_count: u64,
}

impl UserActionScope {
    pub(crate) fn id(&self) -> Identifier {
        self.handle.activity_id()
    }

    pub(crate) fn stop(self, command: &Command) -> Option<Event> {
        let name = match &command.kind {
            CommandKind::StopUserAction { name: Some(name) } => name.clone(),
            _ => self.name,
        };
        let mut attributes = self.attributes;
        attributes.extend(command.attributes.clone());

        let payload = ActionPayload {
            action_id: self.handle.activity_id(),
            action_type: self.action_type,
            name,
            duration_ms: Some(elapsed_ms(self.handle.started_at(), command.time)),
            resource_count: self.resource_count,
            error_count: self.error_count,
        };
        self.handle.complete(EventPayload::Action(payload), attributes)
    }
}

/// Activities still running when their view stopped
///
/// They keep the snapshot captured at their start and complete later
/// through the session.
#[derive(Debug)]
pub(crate) struct InFlight {
    pub(crate) resources: BTreeMap<Subject, ResourceScope>,
    pub(crate) action: Option<UserActionScope>,
}

/// A started, not yet stopped view
#[derive(Debug)]
pub struct ViewScope {
    id: Identifier,
    key: Subject,
    name: String,
    started_at: DateTime<Utc>,
    version: u64,
    time_spent_ms: u64,
    counters: ViewCounters,
    active_action: Option<UserActionScope>,
    resources: BTreeMap<Subject, ResourceScope>,
}

impl ViewScope {
    pub(crate) fn start(
        key: Subject,
        name: &str,
        time: DateTime<Utc>,
        ids: &dyn IdGenerator,
    ) -> Self {
        Self {
            id: ids.generate(),
            key,
            name: name.to_string(),
            started_at: time,
            version: 0,
            time_spent_ms: 0,
            counters: ViewCounters::default(),
            active_action: None,
            resources: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    pub fn key(&self) -> &Subject {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn counters(&self) -> ViewCounters {
        self.counters
    }

    pub fn active_action_id(&self) -> Option<Identifier> {
        self.active_action.as_ref().map(UserActionScope::id)
    }

    pub fn has_active_action(&self) -> bool {
        self.active_action.is_some()
    }

    pub fn has_resource(&self, subject: &Subject) -> bool {
        self.resources.contains_key(subject)
    }

    pub fn context(&self) -> ViewContext {
        ViewContext {
            id: self.id,
            key: self.key.to_string(),
            name: self.name.clone(),
        }
    }

    /// Session snapshot extended with this view and its active action
    pub(crate) fn snapshot(&self, parent: &ContextSnapshot) -> ContextSnapshot {
        parent
            .clone()
            .with_view(self.context())
            .with_user_action(self.active_action_id())
    }

    pub(crate) fn state(&self) -> ViewState {
        ViewState {
            view_id: self.id,
            key: self.key.to_string(),
            name: self.name.clone(),
            version: self.version,
            counters: self.counters,
            active_action: self.active_action_id(),
            pending_resources: self.resources.keys().map(Subject::to_string).collect(),
        }
    }

    /// Next view update; bumps the version
    pub(crate) fn update_event(
        &mut self,
        parent: &ContextSnapshot,
        time: DateTime<Utc>,
        is_active: bool,
    ) -> Event {
        self.version += 1;
        self.time_spent_ms = self.time_spent_ms.max(elapsed_ms(self.started_at, time));

        let payload = ViewPayload {
            view_id: self.id,
            key: self.key.to_string(),
            name: self.name.clone(),
            version: self.version,
            time_spent_ms: self.time_spent_ms,
            action_count: self.counters.action_count,
            resource_count: self.counters.resource_count,
            error_count: self.counters.error_count,
            long_task_count: self.counters.long_task_count,
            interaction_count: self.counters.interaction_count,
            is_active,
        };
        let context = parent.clone().with_view(self.context());
        Event::new(self.started_at, context, EventPayload::View(payload))
    }

    /// Final update, plus the activities that are still running
    pub(crate) fn stop(
        mut self,
        parent: &ContextSnapshot,
        time: DateTime<Utc>,
    ) -> (Event, InFlight) {
        let event = self.update_event(parent, time, false);
        let in_flight = InFlight {
            resources: std::mem::take(&mut self.resources),
            action: self.active_action.take(),
        };
        (event, in_flight)
    }

    /// Route one command to this view
    pub(crate) fn process(
        &mut self,
        command: &Command,
        parent: &ContextSnapshot,
        env: &ScopeEnv<'_>,
        out: &mut Vec<Event>,
    ) {
        let counted = match &command.kind {
            CommandKind::AddUserAction { .. } | CommandKind::ApplicationStart { .. } => {
                match one_shot_event(command, self.snapshot(parent), env.ids) {
                    Some(event) => {
                        out.push(event);
                        self.counters.action_count += 1;
                        true
                    }
                    None => false,
                }
            }
            CommandKind::AddError { .. } | CommandKind::AddLongTask { .. } => {
                match one_shot_event(command, self.snapshot(parent), env.ids) {
                    Some(event) => {
                        if let CommandKind::AddError { .. } = command.kind {
                            self.counters.error_count += 1;
                            if let Some(action) = self.active_action.as_mut() {
                                action.error_count += 1;
                            }
                        } else {
                            self.counters.long_task_count += 1;
                        }
                        out.push(event);
                        true
                    }
                    None => false,
                }
            }
            CommandKind::StartUserAction { action_type, name } => {
                if let Some(active) = &self.active_action {
                    debug!(
                        view = %self.id,
                        action = %active.id(),
                        "User action already active; start ignored"
                    );
                } else {
                    let handle = env.scheduler.begin_activity(
                        ActivityKind::UserAction,
                        env.ids.generate(),
                        command.time,
                        self.snapshot(parent),
                    );
                    self.active_action = Some(UserActionScope {
                        handle,
                        action_type: *action_type,
                        name: name.clone(),
                        attributes: command.attributes.clone(),
                        resource_count: 0,
                        error_count: 0,
                    });
                }
                false
            }
            CommandKind::StopUserAction { .. } => match self.active_action.take() {
                Some(action) => match action.stop(command) {
                    Some(event) => {
                        out.push(event);
                        self.counters.action_count += 1;
                        true
                    }
                    None => false,
                },
                None => {
                    debug!(view = %self.id, "No active user action to stop");
                    false
                }
            },
            CommandKind::StartResource { .. } => {
                if let Some(resource) = ResourceScope::start(command, self.snapshot(parent), env) {
                    if let Some(action) = self.active_action.as_mut() {
                        action.resource_count += 1;
                    }
                    let previous = self.resources.insert(command.subject.clone(), resource);
                    if let Some(previous) = previous {
                        debug!(
                            resource = %previous.id(),
                            subject = %command.subject,
                            "Resource restarted; earlier start dropped"
                        );
                    }
                }
                false
            }
            CommandKind::StopResource { .. } | CommandKind::StopResourceWithError { .. } => {
                match self.resources.remove(&command.subject) {
                    Some(resource) => match resource.stop(command) {
                        Some(event) => {
                            match event.payload {
                                EventPayload::Error(_) => self.counters.error_count += 1,
                                _ => self.counters.resource_count += 1,
                            }
                            out.push(event);
                            true
                        }
                        None => false,
                    },
                    None => false,
                }
            }
            CommandKind::AddTouch { .. } => {
                self.counters.interaction_count += 1;
                false
            }
            _ => false,
        };

        if counted {
            out.push(self.update_event(parent, command.time, true));
        }
    }
}
