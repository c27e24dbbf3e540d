//! Same commands, same seed, same configuration: same events, byte for byte

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rum_core::command::{ActionType, Command, ErrorSource};
use rum_core::config::{OrphanPolicy, RumConfig, SessionConfig};
use rum_core::context::{ContextUpdate, UserInfo};
use rum_core::replay::{self, diff, to_json_lines};

const VIEWS: [&str; 4] = ["home", "search", "cart", "profile"];

/// A random but reproducible command log, with gaps long enough to expire sessions
fn command_log(seed: u64, len: usize) -> Vec<Command> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut now: DateTime<Utc> = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
    let mut commands = Vec::with_capacity(len);

    for i in 0..len {
        let gap_ms = if rng.gen_bool(0.02) {
            rng.gen_range(15 * 60 * 1000..40 * 60 * 1000)
        } else {
            rng.gen_range(0..5_000)
        };
        now += Duration::milliseconds(gap_ms);

        let resource = format!("r{}", rng.gen_range(0..6));
        let span = format!("s{}", rng.gen_range(0..4));
        let view = VIEWS[rng.gen_range(0..VIEWS.len())];

        let command = match rng.gen_range(0..13) {
            0 => Command::start_view(view, view.to_uppercase(), now),
            1 => Command::stop_view(view, now),
            2 => Command::add_action(ActionType::Tap, format!("tap-{}", i), now),
            3 => Command::start_action(ActionType::Scroll, "scroll", now),
            4 => Command::stop_action(now),
            5 => Command::start_resource(resource, "GET", format!("https://api.test/{}", i), now),
            6 => Command::stop_resource(resource, Some(200), now),
            7 => Command::stop_resource_with_error(resource, "timeout", now),
            8 => Command::add_error(format!("error-{}", i), ErrorSource::Source, now),
            9 => Command::add_long_task(rng.gen_range(50..500), now),
            10 => Command::start_span(span, "work", now),
            11 => Command::stop_span(span, now),
            _ => Command::update_context(
                ContextUpdate::User {
                    user: UserInfo::with_id(format!("user-{}", rng.gen_range(0..3))),
                },
                now,
            ),
        };
        commands.push(command);
    }
    commands
}

fn configs() -> Vec<RumConfig> {
    vec![
        RumConfig::new("app"),
        RumConfig::new("app").with_orphan_policy(OrphanPolicy::Drop),
        RumConfig::new("app").with_orphan_policy(OrphanPolicy::BackgroundView),
        RumConfig::new("app").with_session(
            SessionConfig::new()
                .sample_rate(50.0)
                .start_on_any_activity(true),
        ),
    ]
}

#[test]
fn replay_is_byte_identical() {
    let log = command_log(7, 2_000);
    for config in configs() {
        let first = replay::replay(&log, &config, 1234).unwrap();
        let second = replay::replay(&log, &config, 1234).unwrap();

        assert_eq!(
            to_json_lines(&first.events).unwrap(),
            to_json_lines(&second.events).unwrap()
        );
        assert_eq!(first.final_state, second.final_state);
        assert!(diff(&first.events, &second.events).identical);
    }
}

#[test]
fn long_gaps_produce_several_sessions() {
    let log = command_log(11, 3_000);
    let result = replay::replay(&log, &RumConfig::new("app"), 1).unwrap();
    assert!(result.stats.sessions > 1, "stats: {:?}", result.stats);
}

#[test]
fn serialized_log_replays_identically() {
    let log = command_log(21, 500);
    let mut ndjson = String::new();
    for command in &log {
        ndjson.push_str(&serde_json::to_string(command).unwrap());
        ndjson.push('\n');
    }
    let reloaded = replay::load_commands(&ndjson).unwrap();
    assert_eq!(reloaded, log);

    let config = RumConfig::new("app");
    let original = replay::replay(&log, &config, 3).unwrap();
    let from_disk = replay::replay(&reloaded, &config, 3).unwrap();
    assert!(diff(&original.events, &from_disk.events).identical);
}

#[test]
fn a_different_seed_changes_only_identifiers() {
    let log = command_log(5, 400);
    let config = RumConfig::new("app");
    let a = replay::replay(&log, &config, 1).unwrap();
    let b = replay::replay(&log, &config, 2).unwrap();

    assert_eq!(a.events.len(), b.events.len());
    assert_eq!(a.stats.events_by_type, b.stats.events_by_type);
    for (x, y) in a.events.iter().zip(&b.events) {
        assert_eq!(x.time, y.time);
        assert_eq!(x.event_type(), y.event_type());
    }
    assert!(!diff(&a.events, &b.events).identical);
}
