//! Deterministic replay of command logs
//!
//! Session boundaries depend only on command timestamps and identifiers come
//! from a seeded generator, so replaying the same log with the same seed and
//! configuration always yields the same events. [`diff`] locates the first
//! point where two event sequences diverge.
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use rum_core::command::Command;
//! use rum_core::config::RumConfig;
//! use rum_core::replay::{diff, replay};
//!
//! let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
//! let log = vec![Command::start_view("home", "Home", t0)];
//! let config = RumConfig::new("app");
//!
//! let a = replay(&log, &config, 42).unwrap();
//! let b = replay(&log, &config, 42).unwrap();
//! assert!(diff(&a.events, &b.events).identical);
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::command::Command;
use crate::config::RumConfig;
use crate::error::Result;
use crate::event::{elapsed_ms, Event};
use crate::identifier::{Identifier, SeededIdGenerator};
use crate::scope::{ApplicationScope, ScopeTreeState};

/// Outcome of replaying a command log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayResult {
    /// Every emitted event, in emission order
    pub events: Vec<Event>,

    /// Tree state after the last command
    pub final_state: ScopeTreeState,

    pub stats: ReplayStats,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayStats {
    pub commands: usize,
    pub total_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    /// Distinct sessions seen in emitted events
    pub sessions: usize,
    /// Time between the first and the last command
    pub span_of_log_ms: u64,
}

/// Replay `commands` through a fresh scope tree
pub fn replay(commands: &[Command], config: &RumConfig, seed: u64) -> Result<ReplayResult> {
    config.validate()?;
    let epoch = commands.first().map(|c| c.time.timestamp()).unwrap_or(0);
    let ids = SeededIdGenerator::new(seed, &config.identifiers)?.with_epoch(epoch);
    let mut scope = ApplicationScope::new(config.clone(), Arc::new(ids));

    let mut events = Vec::new();
    for command in commands {
        scope.process(command, &mut events);
    }

    let stats = compute_stats(commands, &events);
    Ok(ReplayResult {
        events,
        final_state: scope.state(),
        stats,
    })
}

fn compute_stats(commands: &[Command], events: &[Event]) -> ReplayStats {
    let mut events_by_type = BTreeMap::new();
    let mut sessions = BTreeSet::new();
    for event in events {
        *events_by_type
            .entry(event.event_type().to_string())
            .or_insert(0) += 1;
        if event.session_id() != Identifier::INVALID {
            sessions.insert(event.session_id());
        }
    }

    let span_of_log_ms = match (commands.first(), commands.last()) {
        (Some(first), Some(last)) => elapsed_ms(first.time, last.time),
        _ => 0,
    };

    ReplayStats {
        commands: commands.len(),
        total_events: events.len(),
        events_by_type,
        sessions: sessions.len(),
        span_of_log_ms,
    }
}

/// Difference between two event sequences
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayDiff {
    pub identical: bool,

    /// First differing field of the first differing event in the common prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_difference: Option<EventDifference>,

    pub summary: DiffSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDifference {
    pub index: usize,
    pub event_type: String,
    pub field: String,
    pub first_value: Value,
    pub second_value: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub first_count: usize,
    pub second_count: usize,
    pub common_prefix_length: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub divergence_point: Option<usize>,
}

/// Compare two event sequences
pub fn diff(first: &[Event], second: &[Event]) -> ReplayDiff {
    let common = first.len().min(second.len());
    let divergence = (0..common)
        .find(|&i| first[i] != second[i])
        .or(if first.len() != second.len() { Some(common) } else { None });

    let first_difference = divergence
        .filter(|&i| i < common)
        .and_then(|i| field_difference(i, &first[i], &second[i]));

    ReplayDiff {
        identical: divergence.is_none(),
        first_difference,
        summary: DiffSummary {
            first_count: first.len(),
            second_count: second.len(),
            common_prefix_length: divergence.unwrap_or(common),
            divergence_point: divergence,
        },
    }
}

fn field_difference(index: usize, a: &Event, b: &Event) -> Option<EventDifference> {
    let a = serde_json::to_value(a).ok()?;
    let b = serde_json::to_value(b).ok()?;
    let event_type = a
        .pointer("/payload/type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();

    ["time", "context", "attributes", "payload"]
        .iter()
        .find(|field| a.get(**field) != b.get(**field))
        .map(|field| EventDifference {
            index,
            event_type,
            field: field.to_string(),
            first_value: a.get(*field).cloned().unwrap_or(Value::Null),
            second_value: b.get(*field).cloned().unwrap_or(Value::Null),
        })
}

/// Parse a command log: a JSON array, or one JSON command per line
///
/// Blank lines and lines starting with `#` are skipped in the line form.
pub fn load_commands(input: &str) -> Result<Vec<Command>> {
    let trimmed = input.trim_start();
    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let mut commands = Vec::new();
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        commands.push(serde_json::from_str(line)?);
    }
    Ok(commands)
}

pub fn load_commands_file(path: impl AsRef<Path>) -> Result<Vec<Command>> {
    let content = std::fs::read_to_string(path.as_ref())?;
    load_commands(&content)
}

/// Render events as JSON lines
pub fn to_json_lines(events: &[Event]) -> Result<String> {
    let mut output = String::new();
    for event in events {
        output.push_str(&event.to_json_line()?);
        output.push('\n');
    }
    Ok(output)
}
