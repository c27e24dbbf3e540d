//! Application scope: tree root and session state machine
//!
//! ```text
//!              qualifying command
//!  NoSession ─────────────────────────► Active(S1)
//!                                          │  inactivity > timeout
//!                                          │  age > max duration
//!                                          │  StopSession
//!                                          ▼
//!                                      Expired(S1) ──renewing command──► Active(S2, previous = S1)
//! ```
//!
//! Expiry is evaluated lazily against each command's own timestamp; there is
//! no timer. An expired session is replaced, never revived.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::command::{Attributes, Command, CommandKind, Subject};
use crate::config::{RumConfig, SessionConfig};
use crate::context::{ContextSnapshot, CoreContext};
use crate::error::Result;
use crate::event::{elapsed_ms, Event, EventPayload, SpanPayload};
use crate::identifier::{IdGenerator, Identifier, RandomIdGenerator};
use crate::scheduler::{ActivityKind, CapturedContextHandle, WriteScheduler};

use super::session::SessionScope;
use super::view::ViewScope;
use super::{EndReason, ScopeEnv, ScopeTreeState, SessionState};

/// Commands that may open the first session
pub fn starts_session(kind: &CommandKind, config: &SessionConfig) -> bool {
    match kind {
        CommandKind::StartView { .. } | CommandKind::ApplicationStart { .. } => true,
        CommandKind::AddUserAction { .. }
        | CommandKind::StartUserAction { .. }
        | CommandKind::StartResource { .. }
        | CommandKind::AddError { .. }
        | CommandKind::AddLongTask { .. } => config.start_on_any_activity,
        _ => false,
    }
}

/// Commands that may open a session after the previous one ended
///
/// A user interaction always renews: the user is demonstrably back.
pub fn renews_session(kind: &CommandKind, config: &SessionConfig) -> bool {
    kind.is_user_interaction() || starts_session(kind, config)
}

#[derive(Debug)]
struct SpanScope {
    handle: CapturedContextHandle,
    trace_id: Identifier,
    parent_span_id: Option<Identifier>,
    operation: String,
    attributes: Attributes,
}

#[derive(Debug)]
struct ExpiredSession {
    session_id: Identifier,
    reason: EndReason,
    carried_view: Option<(Subject, String)>,
}

#[derive(Debug)]
enum SessionSlot {
    NoSession,
    Active(SessionScope),
    Expired(ExpiredSession),
}

/// Root of the scope tree
///
/// Must be driven from a single execution context; the monitor's worker
/// thread owns the live instance.
#[derive(Debug)]
pub struct ApplicationScope {
    config: RumConfig,
    core: CoreContext,
    ids: Arc<dyn IdGenerator>,
    scheduler: WriteScheduler,
    session: SessionSlot,
    spans: BTreeMap<Subject, SpanScope>,
    application_started: bool,
    processed: u64,
}

impl ApplicationScope {
    pub fn new(config: RumConfig, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            core: CoreContext::new(config.application_id.clone()),
            config,
            ids,
            scheduler: WriteScheduler::new(),
            session: SessionSlot::NoSession,
            spans: BTreeMap::new(),
            application_started: false,
            processed: 0,
        }
    }

    /// Validate `config` and use a thread-local random generator
    pub fn from_config(config: RumConfig) -> Result<Self> {
        config.validate()?;
        let ids = RandomIdGenerator::new(&config.identifiers)?;
        Ok(Self::new(config, Arc::new(ids)))
    }

    pub fn config(&self) -> &RumConfig {
        &self.config
    }

    pub fn core(&self) -> &CoreContext {
        &self.core
    }

    pub fn scheduler(&self) -> &WriteScheduler {
        &self.scheduler
    }

    pub fn id_generator(&self) -> Arc<dyn IdGenerator> {
        Arc::clone(&self.ids)
    }

    pub fn session(&self) -> Option<&SessionScope> {
        match &self.session {
            SessionSlot::Active(session) => Some(session),
            _ => None,
        }
    }

    pub fn session_id(&self) -> Option<Identifier> {
        self.session().map(SessionScope::id)
    }

    pub fn active_view(&self) -> Option<&ViewScope> {
        self.session().and_then(SessionScope::active_view)
    }

    pub fn pending_span_count(&self) -> usize {
        self.spans.len()
    }

    /// Snapshot of the live context: session, active view and action, core state
    pub fn context_snapshot(&self) -> ContextSnapshot {
        match &self.session {
            SessionSlot::Active(session) => session.context(&self.core),
            _ => self.core.snapshot(),
        }
    }

    pub fn state(&self) -> ScopeTreeState {
        let session = match &self.session {
            SessionSlot::NoSession => SessionState::NoSession,
            SessionSlot::Active(session) => session.state(),
            SessionSlot::Expired(expired) => SessionState::Expired {
                session_id: expired.session_id,
                reason: expired.reason,
            },
        };
        ScopeTreeState {
            session,
            application_started: self.application_started,
            pending_spans: self.spans.keys().map(Subject::to_string).collect(),
            processed_commands: self.processed,
        }
    }

    /// Consume one command, appending the events it produces to `out`
    ///
    /// Never fails: unknown subjects, out-of-order stops and commands with no
    /// session are absorbed. Always returns `true` (keep sending).
    pub fn process(&mut self, command: &Command, out: &mut Vec<Event>) -> bool {
        self.processed += 1;

        if let CommandKind::UpdateContext { update } = &command.kind {
            self.core.apply(update);
            return true;
        }

        self.expire_if_needed(command.time, out);

        match &command.kind {
            CommandKind::StartSpan { .. } => self.start_span(command),
            CommandKind::StopSpan => out.extend(self.stop_span(command)),
            CommandKind::StopSession => self.end_session(EndReason::Stopped, command.time, out),
            CommandKind::ApplicationStart { .. } if self.application_started => {
                debug!("Application already started; command ignored");
            }
            _ => self.process_rum(command, out),
        }
        true
    }

    /// Convenience fold over a command sequence
    pub fn process_all<'a>(
        &mut self,
        commands: impl IntoIterator<Item = &'a Command>,
    ) -> Vec<Event> {
        let mut out = Vec::new();
        for command in commands {
            self.process(command, &mut out);
        }
        out
    }

    fn expire_if_needed(&mut self, now: DateTime<Utc>, out: &mut Vec<Event>) {
        let expiry = match &self.session {
            SessionSlot::Active(session) => session
                .expiry_reason(now, &self.config.session)
                .map(|reason| (reason, session.last_activity())),
            _ => None,
        };
        if let Some((reason, ended_at)) = expiry {
            self.end_session(reason, ended_at, out);
        }
    }

    fn end_session(&mut self, reason: EndReason, time: DateTime<Utc>, out: &mut Vec<Event>) {
        let session = match std::mem::replace(&mut self.session, SessionSlot::NoSession) {
            SessionSlot::Active(session) => session,
            other => {
                self.session = other;
                return;
            }
        };

        let env = ScopeEnv {
            core: &self.core,
            ids: self.ids.as_ref(),
            scheduler: &self.scheduler,
            config: &self.config,
        };
        let session_id = session.id();
        let sampled = session.is_sampled();
        debug!(session = %session_id, reason = reason.as_str(), "Session ended");

        let mut events = Vec::new();
        let carried_view = session.end(time, &env, &mut events);
        if sampled {
            out.append(&mut events);
        }
        self.session = SessionSlot::Expired(ExpiredSession {
            session_id,
            reason,
            carried_view,
        });
    }

    fn process_rum(&mut self, command: &Command, out: &mut Vec<Event>) {
        let env = ScopeEnv {
            core: &self.core,
            ids: self.ids.as_ref(),
            scheduler: &self.scheduler,
            config: &self.config,
        };
        let mut events = Vec::new();

        if !matches!(self.session, SessionSlot::Active(_)) {
            let (qualifies, previous, carried) = match &self.session {
                SessionSlot::Expired(expired) => (
                    renews_session(&command.kind, &env.config.session),
                    Some(expired.session_id),
                    expired.carried_view.clone(),
                ),
                _ => (starts_session(&command.kind, &env.config.session), None, None),
            };
            if !qualifies {
                debug!(command = command.kind_name(), "No active session; command absorbed");
                return;
            }

            let mut session = SessionScope::start(command.time, previous, &env);
            let restarts_view = !matches!(command.kind, CommandKind::StartView { .. });
            if let (Some((key, name)), true) = (carried, restarts_view) {
                session.start_view(key, &name, command.time, &env, &mut events);
            }
            self.session = SessionSlot::Active(session);
        }

        let SessionSlot::Active(session) = &mut self.session else {
            return;
        };
        session.process(command, &env, &mut events);

        if let CommandKind::ApplicationStart { .. } = command.kind {
            self.application_started = true;
        }
        if session.is_sampled() {
            out.append(&mut events);
        }
    }

    fn start_span(&mut self, command: &Command) {
        let CommandKind::StartSpan {
            operation,
            trace_id,
            span_id,
            parent_span_id,
        } = &command.kind
        else {
            return;
        };

        let trace_id = trace_id.unwrap_or_else(|| self.ids.generate());
        let span_id = span_id.unwrap_or_else(|| self.ids.generate());
        let handle = self.scheduler.begin_activity(
            ActivityKind::Span,
            span_id,
            command.time,
            self.context_snapshot(),
        );
        let span = SpanScope {
            handle,
            trace_id,
            parent_span_id: *parent_span_id,
            operation: operation.clone(),
            attributes: command.attributes.clone(),
        };
        if self.spans.insert(command.subject.clone(), span).is_some() {
            debug!(subject = %command.subject, "Span restarted; earlier start dropped");
        }
        self.evict_oldest_spans();
    }

    /// Keep at most `max_pending_spans` unfinished spans, dropping the
    /// earliest started first
    fn evict_oldest_spans(&mut self) {
        while self.spans.len() > self.config.max_pending_spans {
            let oldest = self
                .spans
                .iter()
                .min_by_key(|(_, span)| span.handle.started_at())
                .map(|(subject, _)| subject.clone());
            let Some(subject) = oldest else {
                return;
            };
            if let Some(span) = self.spans.remove(&subject) {
                debug!(
                    subject = %subject,
                    span = %span.handle.activity_id(),
                    limit = self.config.max_pending_spans,
                    "Too many pending spans; oldest dropped"
                );
            }
        }
    }

    fn stop_span(&mut self, command: &Command) -> Option<Event> {
        let Some(span) = self.spans.remove(&command.subject) else {
            debug!(subject = %command.subject, "Stop for an unknown span; ignored");
            return None;
        };

        let mut attributes = span.attributes;
        attributes.extend(command.attributes.clone());
        let payload = SpanPayload {
            trace_id: span.trace_id,
            span_id: span.handle.activity_id(),
            parent_span_id: span.parent_span_id,
            operation: span.operation,
            duration_ms: elapsed_ms(span.handle.started_at(), command.time),
        };
        self.scheduler
            .complete_activity(span.handle, EventPayload::Span(payload), attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{ActionType, ErrorSource};
    use crate::config::{OrphanPolicy, SessionConfig};
    use crate::context::{ContextUpdate, UserInfo};
    use crate::event::EventType;
    use crate::identifier::SeededIdGenerator;
    use chrono::{Duration, TimeZone};

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn scope_with(config: RumConfig) -> ApplicationScope {
        ApplicationScope::new(config, Arc::new(SeededIdGenerator::from_seed(7)))
    }

    fn scope() -> ApplicationScope {
        scope_with(RumConfig::new("app"))
    }

    fn types(events: &[Event]) -> Vec<EventType> {
        events.iter().map(Event::event_type).collect()
    }

    #[test]
    fn test_no_session_absorbs_non_qualifying_commands() {
        let mut app = scope();
        let mut out = Vec::new();

        assert!(app.process(&Command::add_error("early", ErrorSource::Source, t(0)), &mut out));
        assert!(app.process(&Command::stop_view("ghost", t(1)), &mut out));
        assert!(app.process(&Command::stop_resource("r", None, t(2)), &mut out));
        assert!(app.process(&Command::add_action(ActionType::Tap, "x", t(3)), &mut out));

        assert!(out.is_empty());
        assert_eq!(app.state().session, SessionState::NoSession);
        assert_eq!(app.state().processed_commands, 4);
    }

    #[test]
    fn test_start_on_any_activity() {
        let config =
            RumConfig::new("app").with_session(SessionConfig::new().start_on_any_activity(true));
        let mut app = scope_with(config);
        let mut out = Vec::new();

        app.process(&Command::add_error("first", ErrorSource::Console, t(0)), &mut out);
        assert!(app.session_id().is_some());
        // No view to attach to yet: the error is dropped but the session exists.
        assert!(out.is_empty());
    }

    #[test]
    fn test_view_start_opens_session_and_emits_update() {
        let mut app = scope();
        let out = app.process_all(&[Command::start_view("home", "Home", t(0))]);

        assert_eq!(types(&out), vec![EventType::View]);
        let session_id = app.session_id().unwrap();
        assert_eq!(out[0].session_id(), session_id);
        assert_eq!(out[0].view_id(), app.active_view().map(ViewScope::id));
    }

    #[test]
    fn test_starting_a_view_stops_the_previous_one() {
        let mut app = scope();
        let out = app.process_all(&[
            Command::start_view("a", "A", t(0)),
            Command::start_view("b", "B", t(100)),
        ]);

        assert_eq!(types(&out), vec![EventType::View, EventType::View, EventType::View]);
        let stopped = out[1].view_payload().unwrap();
        assert_eq!(stopped.key, "a");
        assert!(!stopped.is_active);
        assert_eq!(stopped.time_spent_ms, 100);
        assert_eq!(out[2].view_payload().unwrap().key, "b");
        assert_eq!(app.active_view().map(|v| v.name().to_string()), Some("B".to_string()));
    }

    #[test]
    fn test_inactivity_renews_session_and_restarts_view() {
        let config =
            RumConfig::new("app").with_session(SessionConfig::new().inactivity_timeout_ms(1_000));
        let mut app = scope_with(config);
        let out = app.process_all(&[
            Command::start_view("home", "Home", t(0)),
            Command::add_action(ActionType::Tap, "Buy", t(5_000)),
        ]);

        let first = out[0].session_id();
        let last = out.last().unwrap().session_id();
        assert_ne!(first, last);

        // Final update for the expired view is pinned to the last activity.
        let closed = out[1].view_payload().unwrap();
        assert!(!closed.is_active);
        assert_eq!(closed.time_spent_ms, 0);
        assert_eq!(out[1].session_id(), first);

        // Restarted view: same key, new id, new session linked to the old one.
        let restarted = out[2].view_payload().unwrap();
        assert_eq!(restarted.key, "home");
        assert_ne!(restarted.view_id, closed.view_id);
        assert_eq!(out[2].context.previous_session_id, Some(first));

        assert_eq!(out[3].event_type(), EventType::Action);
        assert_eq!(out[3].view_id(), Some(restarted.view_id));
    }

    #[test]
    fn test_expired_session_ignores_non_renewing_commands() {
        let config =
            RumConfig::new("app").with_session(SessionConfig::new().inactivity_timeout_ms(1_000));
        let mut app = scope_with(config);
        let mut out = Vec::new();
        app.process(&Command::start_view("home", "Home", t(0)), &mut out);
        let first = app.session_id().unwrap();

        app.process(&Command::add_long_task(300, t(10_000)), &mut out);
        assert!(matches!(
            app.state().session,
            SessionState::Expired {
                session_id,
                reason: EndReason::Inactivity,
            } if session_id == first
        ));
        assert_eq!(app.session_id(), None);
    }

    #[test]
    fn test_stop_session_then_renew() {
        let mut app = scope();
        let mut out = Vec::new();
        app.process(&Command::start_view("home", "Home", t(0)), &mut out);
        let first = app.session_id().unwrap();

        app.process(&Command::stop_session(t(10)), &mut out);
        assert_eq!(app.session_id(), None);

        app.process(&Command::start_view("next", "Next", t(20)), &mut out);
        let second = app.session_id().unwrap();
        assert_ne!(first, second);
        assert_eq!(app.session().and_then(SessionScope::previous_id), Some(first));
        // A renewing view start does not resurrect the carried view.
        assert_eq!(app.active_view().map(|v| v.key().to_string()), Some("next".to_string()));
        assert_eq!(out.iter().filter(|e| e.session_id() == second).count(), 1);
    }

    #[test]
    fn test_application_start_only_once() {
        let mut app = scope();
        let out = app.process_all(&[
            Command::application_start(Some(850), t(0)),
            Command::application_start(Some(900), t(10)),
        ]);

        assert_eq!(types(&out), vec![EventType::View, EventType::Action, EventType::View]);
        assert_eq!(out[0].view_payload().unwrap().name, "ApplicationLaunch");
        match &out[1].payload {
            EventPayload::Action(action) => {
                assert_eq!(action.action_type, ActionType::ApplicationStart);
                assert_eq!(action.duration_ms, Some(850));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(app.state().application_started);
    }

    #[test]
    fn test_orphan_policies() {
        let commands = [
            Command::start_view("a", "A", t(0)),
            Command::stop_view("a", t(10)),
            Command::add_error("late", ErrorSource::Source, t(20)),
        ];

        let mut attach = scope();
        let out = attach.process_all(&commands);
        let error = out.last().unwrap();
        assert_eq!(error.event_type(), EventType::Error);
        assert_eq!(error.context.view_key(), Some("a"));

        let mut dropping = scope_with(RumConfig::new("app").with_orphan_policy(OrphanPolicy::Drop));
        let out = dropping.process_all(&commands);
        assert_eq!(types(&out), vec![EventType::View, EventType::View]);

        let mut background =
            scope_with(RumConfig::new("app").with_orphan_policy(OrphanPolicy::BackgroundView));
        let out = background.process_all(&commands);
        assert_eq!(
            types(&out),
            vec![
                EventType::View,
                EventType::View,
                EventType::View,
                EventType::Error,
                EventType::View,
            ]
        );
        assert_eq!(out[3].context.view_key(), Some("background"));
    }

    #[test]
    fn test_context_updates_flow_into_snapshots() {
        let mut app = scope();
        let mut out = Vec::new();
        app.process(
            &Command::update_context(
                ContextUpdate::User {
                    user: UserInfo::with_id("u-1"),
                },
                t(0),
            ),
            &mut out,
        );
        assert!(out.is_empty());
        assert_eq!(app.session_id(), None);

        app.process(&Command::start_view("home", "Home", t(1)), &mut out);
        assert_eq!(out[0].context.user.id.as_deref(), Some("u-1"));
        assert_eq!(app.context_snapshot().view_key(), Some("home"));
    }

    #[test]
    fn test_unsampled_session_emits_no_rum_events_but_keeps_spans() {
        let config = RumConfig::new("app").with_session(SessionConfig::new().sample_rate(0.0));
        let mut app = scope_with(config);
        let out = app.process_all(&[
            Command::start_view("home", "Home", t(0)),
            Command::start_span("s", "load", t(1)),
            Command::add_action(ActionType::Tap, "Buy", t(2)),
            Command::stop_span("s", t(3)),
        ]);

        assert_eq!(types(&out), vec![EventType::Span]);
        assert!(!out[0].context.session_sampled);
        assert!(app.session().map(|s| !s.is_sampled()).unwrap_or(false));
    }

    #[test]
    fn test_view_switch_keeps_running_resources() {
        let mut app = scope();
        let out = app.process_all(&[
            Command::start_view("a", "A", t(0)),
            Command::start_resource("r1", "GET", "https://x/y", t(10)),
            Command::start_view("b", "B", t(20)),
            Command::stop_resource("r1", Some(200), t(30)),
        ]);

        assert_eq!(
            types(&out),
            vec![EventType::View, EventType::View, EventType::View, EventType::Resource]
        );
        assert_eq!(out[3].context.view_key(), Some("a"));
        // View b's counters are untouched; no extra update is emitted
        assert_eq!(app.active_view().map(|v| v.counters().resource_count), Some(0));
        assert_eq!(app.scheduler().pending_count(), 0);
    }

    #[test]
    fn test_pending_spans_are_bounded() {
        let mut app = scope_with(RumConfig::new("app").with_max_pending_spans(2));
        let out = app.process_all(&[
            Command::start_span("a", "first", t(0)),
            Command::start_span("b", "second", t(1)),
            Command::start_span("c", "third", t(2)),
        ]);
        assert!(out.is_empty());
        assert_eq!(app.pending_span_count(), 2);
        assert_eq!(app.state().pending_spans, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(app.scheduler().pending_count(), 2);

        let out = app.process_all(&[
            Command::stop_span("a", t(3)),
            Command::stop_span("b", t(4)),
        ]);
        assert_eq!(types(&out), vec![EventType::Span]);
        match &out[0].payload {
            EventPayload::Span(span) => assert_eq!(span.operation, "second"),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_span_without_session_and_unknown_stop() {
        let mut app = scope();
        let out = app.process_all(&[
            Command::stop_span("never-started", t(0)),
            Command::start_span("s", "boot", t(1)),
            Command::stop_span("s", t(4)),
        ]);

        assert_eq!(types(&out), vec![EventType::Span]);
        assert!(!out[0].context.has_session());
        match &out[0].payload {
            EventPayload::Span(span) => assert_eq!(span.duration_ms, 3),
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(app.pending_span_count(), 0);
    }
}
