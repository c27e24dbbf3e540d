//! Session scope: one bounded window of user activity

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::command::{Command, CommandKind, Subject};
use crate::config::{OrphanPolicy, SessionConfig};
use crate::context::{ContextSnapshot, CoreContext, ViewContext};
use crate::event::Event;
use crate::identifier::Identifier;

use super::view::{one_shot_event, InFlight, ResourceScope, UserActionScope, ViewScope};
use super::{EndReason, ScopeEnv, SessionState};

/// Key and name of the view opened for `ApplicationStart`
pub const APPLICATION_LAUNCH_VIEW: (&str, &str) = ("application-launch", "ApplicationLaunch");

/// Key and name of the synthetic view opened by [`OrphanPolicy::BackgroundView`]
pub const BACKGROUND_VIEW: (&str, &str) = ("background", "Background");

const KNUTH_FACTOR: u64 = 1_111_111_111_111_111_111;

/// Sampling decision derived from the session id alone, so a replay keeps
/// exactly the sessions the live run kept
pub fn is_sampled(session_id: Identifier, sample_rate: f64) -> bool {
    if sample_rate >= 100.0 {
        return true;
    }
    if sample_rate <= 0.0 {
        return false;
    }
    let bucket = session_id.low().wrapping_mul(KNUTH_FACTOR) % 10_000;
    (bucket as f64) < sample_rate * 100.0
}

/// An active session
///
/// Once it expires or is stopped the application scope drops it and builds a
/// fresh one; a session never becomes active again.
#[derive(Debug)]
pub struct SessionScope {
    id: Identifier,
    previous_id: Option<Identifier>,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    sampled: bool,
    active_view: Option<ViewScope>,
    last_view: Option<ViewContext>,
    detached_resources: BTreeMap<Subject, ResourceScope>,
    detached_action: Option<UserActionScope>,
}

impl SessionScope {
    pub(crate) fn start(
        time: DateTime<Utc>,
        previous_id: Option<Identifier>,
        env: &ScopeEnv<'_>,
    ) -> Self {
        let id = env.ids.generate();
        let sampled = is_sampled(id, env.config.session.sample_rate);
        debug!(session = %id, previous = ?previous_id, sampled, "Session started");
        Self {
            id,
            previous_id,
            started_at: time,
            last_activity: time,
            sampled,
            active_view: None,
            last_view: None,
            detached_resources: BTreeMap::new(),
            detached_action: None,
        }
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    pub fn previous_id(&self) -> Option<Identifier> {
        self.previous_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn is_sampled(&self) -> bool {
        self.sampled
    }

    pub fn active_view(&self) -> Option<&ViewScope> {
        self.active_view.as_ref()
    }

    /// Why the session is expired at `now`, if it is
    ///
    /// Comparisons are strict; a `now` earlier than the recorded timestamps
    /// never expires anything.
    pub fn expiry_reason(&self, now: DateTime<Utc>, config: &SessionConfig) -> Option<EndReason> {
        if now - self.started_at > config.max_duration() {
            Some(EndReason::MaxDuration)
        } else if now - self.last_activity > config.inactivity_timeout() {
            Some(EndReason::Inactivity)
        } else {
            None
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, config: &SessionConfig) -> bool {
        self.expiry_reason(now, config).is_some()
    }

    /// Snapshot with this session and no view attached
    pub(crate) fn snapshot(&self, core: &CoreContext) -> ContextSnapshot {
        core.snapshot().with_session(self.id, self.previous_id, self.sampled)
    }

    /// Snapshot with the active view and action, as seen right now
    pub(crate) fn context(&self, core: &CoreContext) -> ContextSnapshot {
        let parent = self.snapshot(core);
        match &self.active_view {
            Some(view) => view.snapshot(&parent),
            None => parent,
        }
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState::Active {
            session_id: self.id,
            previous_session_id: self.previous_id,
            started_at: self.started_at,
            last_activity: self.last_activity,
            sampled: self.sampled,
            active_view: self.active_view.as_ref().map(ViewScope::state),
            detached_resources: self.detached_resources.keys().map(Subject::to_string).collect(),
        }
    }

    /// Record activity at `time`; never moves backwards
    fn refresh(&mut self, time: DateTime<Utc>) {
        if time > self.last_activity {
            self.last_activity = time;
        }
    }

    pub(crate) fn start_view(
        &mut self,
        key: Subject,
        name: &str,
        time: DateTime<Utc>,
        env: &ScopeEnv<'_>,
        out: &mut Vec<Event>,
    ) {
        self.stop_active_view(time, env, out);

        let parent = self.snapshot(env.core);
        let mut view = ViewScope::start(key, name, time, env.ids);
        out.push(view.update_event(&parent, time, true));
        self.active_view = Some(view);
    }

    fn stop_active_view(&mut self, time: DateTime<Utc>, env: &ScopeEnv<'_>, out: &mut Vec<Event>) {
        if let Some(view) = self.active_view.take() {
            let parent = self.snapshot(env.core);
            self.last_view = Some(view.context());
            let (event, in_flight) = view.stop(&parent, time);
            out.push(event);
            self.detach(in_flight);
        }
    }

    /// Keep a stopped view's running activities until their own stop arrives
    fn detach(&mut self, in_flight: InFlight) {
        for (subject, resource) in in_flight.resources {
            if let Some(previous) = self.detached_resources.insert(subject, resource) {
                debug!(
                    resource = %previous.id(),
                    "Detached resource replaced; earlier start dropped"
                );
            }
        }
        if let Some(action) = in_flight.action {
            if let Some(previous) = self.detached_action.replace(action) {
                debug!(
                    action = %previous.id(),
                    "Detached user action replaced; earlier start dropped"
                );
            }
        }
    }

    /// End the session at `time`, returning the key and name of the view that
    /// was active so a successor session can restart it
    pub(crate) fn end(
        mut self,
        time: DateTime<Utc>,
        env: &ScopeEnv<'_>,
        out: &mut Vec<Event>,
    ) -> Option<(Subject, String)> {
        let carried = self
            .active_view
            .as_ref()
            .map(|view| (view.key().clone(), view.name().to_string()));
        self.stop_active_view(time, env, out);
        if !self.detached_resources.is_empty() || self.detached_action.is_some() {
            debug!(
                session = %self.id,
                resources = self.detached_resources.len(),
                action = self.detached_action.is_some(),
                "Session ended with running activities; their writes are dropped"
            );
        }
        carried
    }

    /// Route one command within this session
    pub(crate) fn process(&mut self, command: &Command, env: &ScopeEnv<'_>, out: &mut Vec<Event>) {
        self.refresh(command.time);

        match &command.kind {
            CommandKind::StartView { name } => {
                self.start_view(command.subject.clone(), name, command.time, env, out);
            }
            CommandKind::StopView => {
                let matches = self
                    .active_view
                    .as_ref()
                    .map(|view| view.key() == &command.subject)
                    .unwrap_or(false);
                if matches {
                    self.stop_active_view(command.time, env, out);
                } else {
                    debug!(
                        subject = %command.subject,
                        "Stop for a view that is not active; ignored"
                    );
                }
            }
            CommandKind::ApplicationStart { .. } => {
                if self.active_view.is_none() {
                    let (key, name) = APPLICATION_LAUNCH_VIEW;
                    self.start_view(Subject::from(key), name, command.time, env, out);
                }
                self.route(command, env, out);
            }
            CommandKind::StopResource { .. } | CommandKind::StopResourceWithError { .. } => {
                let parent = self.snapshot(env.core);
                match self.active_view.as_mut() {
                    Some(view) if view.has_resource(&command.subject) => {
                        view.process(command, &parent, env, out);
                    }
                    _ => match self.detached_resources.remove(&command.subject) {
                        Some(resource) => out.extend(resource.stop(command)),
                        None => {
                            debug!(
                                subject = %command.subject,
                                "Stop for an unknown resource; ignored"
                            );
                        }
                    },
                }
            }
            CommandKind::StopUserAction { .. } => {
                let parent = self.snapshot(env.core);
                match self.active_view.as_mut() {
                    Some(view) if view.has_active_action() => {
                        view.process(command, &parent, env, out);
                    }
                    _ => match self.detached_action.take() {
                        Some(action) => out.extend(action.stop(command)),
                        None => {
                            debug!("No user action to stop; ignored");
                        }
                    },
                }
            }
            CommandKind::AddTouch { .. } => {
                let parent = self.snapshot(env.core);
                if let Some(view) = self.active_view.as_mut() {
                    view.process(command, &parent, env, out);
                }
            }
            CommandKind::AddUserAction { .. }
            | CommandKind::StartUserAction { .. }
            | CommandKind::StartResource { .. }
            | CommandKind::AddError { .. }
            | CommandKind::AddLongTask { .. } => self.route(command, env, out),
            CommandKind::StartSpan { .. }
            | CommandKind::StopSpan
            | CommandKind::StopSession
            | CommandKind::UpdateContext { .. } => {}
        }
    }

    /// Deliver a view-bound command, applying the orphan policy when no view matches
    fn route(&mut self, command: &Command, env: &ScopeEnv<'_>, out: &mut Vec<Event>) {
        let matched = match (&command.view, &self.active_view) {
            (None, Some(_)) => true,
            (Some(key), Some(view)) => view.key() == key,
            (_, None) => false,
        };

        if !matched {
            match env.config.orphan_policy {
                OrphanPolicy::Drop => {
                    debug!(
                        command = command.kind_name(),
                        subject = %command.subject,
                        "No matching view; command dropped"
                    );
                    return;
                }
                OrphanPolicy::AttachToLastView if self.active_view.is_none() => {
                    self.process_detached(command, env, out);
                    return;
                }
                OrphanPolicy::BackgroundView if self.active_view.is_none() => {
                    let (key, name) = BACKGROUND_VIEW;
                    self.start_view(Subject::from(key), name, command.time, env, out);
                }
                OrphanPolicy::AttachToLastView | OrphanPolicy::BackgroundView => {}
            }
        }

        let parent = self.snapshot(env.core);
        if let Some(view) = self.active_view.as_mut() {
            view.process(command, &parent, env, out);
        }
    }

    /// Attribute to the most recently stopped view without touching counters
    fn process_detached(&mut self, command: &Command, env: &ScopeEnv<'_>, out: &mut Vec<Event>) {
        let Some(last_view) = self.last_view.clone() else {
            debug!(command = command.kind_name(), "No view to attach to; command dropped");
            return;
        };
        let snapshot = self.snapshot(env.core).with_view(last_view);

        match &command.kind {
            CommandKind::StartResource { .. } => {
                if let Some(resource) = ResourceScope::start(command, snapshot, env) {
                    if let Some(previous) =
                        self.detached_resources.insert(command.subject.clone(), resource)
                    {
                        debug!(
                            resource = %previous.id(),
                            "Detached resource replaced; earlier start dropped"
                        );
                    }
                }
            }
            CommandKind::StartUserAction { .. } => {
                debug!(
                    subject = %command.subject,
                    "Continuous action needs an active view; dropped"
                );
            }
            _ => out.extend(one_shot_event(command, snapshot, env.ids)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_sampling_bounds() {
        for low in 1..500u64 {
            let id = Identifier::from_low(low);
            assert!(is_sampled(id, 100.0));
            assert!(!is_sampled(id, 0.0));
        }
    }

    #[test]
    fn test_sampling_rate_is_roughly_honoured() {
        let kept = (1..=10_000u64)
            .filter(|low| {
                let id = Identifier::from_low(low.wrapping_mul(0x9e37_79b9_7f4a_7c15));
                is_sampled(id, 25.0)
            })
            .count();
        assert!((2_000..3_000).contains(&kept), "kept {}", kept);
    }

    #[test]
    fn test_expiry_reasons() {
        let config = SessionConfig::new()
            .inactivity_timeout_ms(1_000)
            .max_duration_ms(10_000);
        let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let session = SessionScope {
            id: Identifier::from_low(1),
            previous_id: None,
            started_at: t0,
            last_activity: t0 + Duration::seconds(9),
            sampled: true,
            active_view: None,
            last_view: None,
            detached_resources: BTreeMap::new(),
            detached_action: None,
        };

        assert_eq!(session.expiry_reason(t0 + Duration::seconds(10), &config), None);
        assert_eq!(
            session.expiry_reason(t0 + Duration::milliseconds(10_001), &config),
            Some(EndReason::MaxDuration)
        );
        assert_eq!(session.expiry_reason(t0, &config), None);

        let idle = SessionScope {
            last_activity: t0,
            ..session
        };
        assert_eq!(idle.expiry_reason(t0 + Duration::milliseconds(1_000), &config), None);
        assert_eq!(
            idle.expiry_reason(t0 + Duration::milliseconds(1_001), &config),
            Some(EndReason::Inactivity)
        );
    }
}
