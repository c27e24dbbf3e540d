//! Work is attributed to the context that was live when it began

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rum_core::command::{ActionType, Command};
use rum_core::config::RumConfig;
use rum_core::context::{ContextUpdate, UserInfo};
use rum_core::event::{Event, EventPayload, EventType};
use rum_core::identifier::SeededIdGenerator;
use rum_core::monitor::{Monitor, RumMonitor};
use rum_core::propagation::{self, HeaderStyle};
use rum_core::scope::ApplicationScope;
use rum_core::sink::InMemorySink;

fn t(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::milliseconds(ms)
}

fn tree() -> ApplicationScope {
    ApplicationScope::new(RumConfig::new("app"), Arc::new(SeededIdGenerator::from_seed(8)))
}

fn only(events: &[Event], event_type: EventType) -> &Event {
    let mut matching = events.iter().filter(|e| e.event_type() == event_type);
    let event = matching.next().expect("one event of the type");
    assert!(matching.next().is_none(), "more than one {} event", event_type);
    event
}

#[test]
fn span_started_in_view_a_stays_in_view_a() {
    let mut tree = tree();
    let mut events = Vec::new();

    tree.process(&Command::start_view("a", "A", t(0)), &mut events);
    let view_a = tree.active_view().unwrap().id();

    tree.process(&Command::start_span("checkout", "db.query", t(100)), &mut events);
    tree.process(&Command::start_view("b", "B", t(200)), &mut events);
    let view_b = tree.active_view().unwrap().id();
    tree.process(&Command::stop_span("checkout", t(500)), &mut events);

    let span = only(&events, EventType::Span);
    assert_eq!(span.view_id(), Some(view_a));
    assert_ne!(span.view_id(), Some(view_b));
    assert_eq!(span.context.view_key(), Some("a"));
    assert_eq!(span.time, t(100));
    match &span.payload {
        EventPayload::Span(payload) => {
            assert_eq!(payload.operation, "db.query");
            assert_eq!(payload.duration_ms, 400);
        }
        other => panic!("expected a span payload, got {:?}", other),
    }
}

#[test]
fn resource_in_flight_across_navigation_stays_in_its_view() {
    let mut tree = tree();
    let mut events = Vec::new();

    tree.process(&Command::start_view("a", "A", t(0)), &mut events);
    let view_a = tree.active_view().unwrap().id();
    let request = Command::start_resource("r1", "GET", "https://api.test/cart", t(50));
    tree.process(&request, &mut events);
    tree.process(&Command::start_view("b", "B", t(100)), &mut events);
    tree.process(&Command::stop_resource("r1", Some(200), t(400)), &mut events);

    let resource = only(&events, EventType::Resource);
    assert_eq!(resource.view_id(), Some(view_a));
    assert_eq!(resource.context.view_key(), Some("a"));
    assert_eq!(resource.time, t(50));
    match &resource.payload {
        EventPayload::Resource(payload) => assert_eq!(payload.duration_ms, 350),
        other => panic!("expected a resource payload, got {:?}", other),
    }

    let stats = tree.scheduler().stats();
    assert_eq!((stats.completed, stats.dropped, stats.pending), (1, 0, 0));
}

#[test]
fn continuous_action_across_navigation_stays_in_its_view() {
    let mut tree = tree();
    let events = tree.process_all(&[
        Command::start_view("a", "A", t(0)),
        Command::start_action(ActionType::Scroll, "Feed", t(10)),
        Command::start_view("b", "B", t(20)),
        Command::stop_action(t(90)),
    ]);

    let action = only(&events, EventType::Action);
    assert_eq!(action.context.view_key(), Some("a"));
    match &action.payload {
        EventPayload::Action(payload) => assert_eq!(payload.duration_ms, Some(80)),
        other => panic!("expected an action payload, got {:?}", other),
    }
}

#[test]
fn span_started_before_rollover_keeps_its_session() {
    let mut tree = tree();
    let mut events = Vec::new();

    tree.process(&Command::start_view("a", "A", t(0)), &mut events);
    let first = tree.session_id().unwrap();
    tree.process(&Command::start_span("sync", "sync", t(10)), &mut events);

    let later = t(20 * 60 * 1000);
    tree.process(&Command::add_action(ActionType::Tap, "Open", later), &mut events);
    assert_ne!(tree.session_id(), Some(first));
    tree.process(&Command::stop_span("sync", later), &mut events);

    assert_eq!(only(&events, EventType::Span).session_id(), first);
}

#[test]
fn resource_keeps_the_user_it_started_with() {
    let mut tree = tree();
    let events = tree.process_all(&[
        Command::update_context(ContextUpdate::User { user: UserInfo::with_id("alice") }, t(0)),
        Command::start_view("home", "Home", t(10)),
        Command::start_resource("img", "GET", "https://cdn.test/a.png", t(20)),
        Command::update_context(ContextUpdate::User { user: UserInfo::with_id("bob") }, t(30)),
        Command::stop_resource("img", Some(200), t(40)),
        Command::add_error("late", rum_core::command::ErrorSource::Console, t(50)),
    ]);

    let resource = only(&events, EventType::Resource);
    assert_eq!(resource.context.user.id.as_deref(), Some("alice"));
    assert_eq!(resource.time, t(20));

    let error = only(&events, EventType::Error);
    assert_eq!(error.context.user.id.as_deref(), Some("bob"));
}

#[test]
fn resources_started_inside_an_action_carry_the_action() {
    let mut tree = tree();
    let events = tree.process_all(&[
        Command::start_view("home", "Home", t(0)),
        Command::start_action(ActionType::Scroll, "Feed", t(10)),
        Command::start_resource("page2", "GET", "https://api.test/feed?page=2", t(20)),
        Command::stop_action(t(30)),
        Command::stop_resource("page2", Some(200), t(40)),
    ]);

    let action = only(&events, EventType::Action);
    let resource = only(&events, EventType::Resource);
    let action_id = match &action.payload {
        EventPayload::Action(payload) => payload.action_id,
        other => panic!("expected an action payload, got {:?}", other),
    };
    assert_eq!(resource.context.user_action_id, Some(action_id));
}

#[test]
fn monitor_span_is_attributed_to_view_at_start() {
    let sink = Arc::new(InMemorySink::new());
    let monitor = Monitor::with_generator(
        RumConfig::new("app"),
        sink.clone(),
        Arc::new(SeededIdGenerator::from_seed(4)),
    )
    .unwrap();

    monitor.process(Command::start_view("a", "A", t(0)));
    let span = monitor.start_span_at("http.request", None, t(100));
    let headers = span.propagation_headers(HeaderStyle::W3c);
    monitor.process(Command::start_view("b", "B", t(200)));
    span.finish_at(t(300));
    monitor.flush();

    let events = sink.events();
    let span_event = only(&events, EventType::Span);
    assert_eq!(span_event.context.view_key(), Some("a"));

    let propagated = propagation::extract(&headers, HeaderStyle::W3c).unwrap();
    match &span_event.payload {
        EventPayload::Span(payload) => {
            assert_eq!(payload.trace_id, propagated.trace_id);
            assert_eq!(payload.span_id, propagated.span_id);
        }
        other => panic!("expected a span payload, got {:?}", other),
    }
}
