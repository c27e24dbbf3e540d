//! Context-consistent writes for long-lived activities
//!
//! Spans, resources and continuous user actions start now and finish later.
//! By the time they finish, the active view (or even the session) may have
//! changed. The [`WriteScheduler`] captures a [`ContextSnapshot`] when the
//! activity begins and hands that exact snapshot back when it completes:
//!
//! ```text
//! begin_activity(id, snapshot@A) ──► CapturedContextHandle ─┐
//!        │                                                   │ view A -> B
//!        ▼                                                   ▼
//!   pending[id] = snapshot@A           complete(payload) ──► Event { context: A }
//! ```
//!
//! The handle holds only a [`Weak`] reference to the pending table. If the
//! scheduler is gone by completion time, or the entry was discarded because its
//! owning scope was torn down, completion yields `None` and nothing is written.
//! Dropping an uncompleted handle discards its entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::command::Attributes;
use crate::context::ContextSnapshot;
use crate::event::{Event, EventPayload};
use crate::identifier::Identifier;

/// Kinds of deferred activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Span,
    Resource,
    UserAction,
}

impl ActivityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityKind::Span => "span",
            ActivityKind::Resource => "resource",
            ActivityKind::UserAction => "user_action",
        }
    }
}

#[derive(Debug)]
struct PendingWrite {
    kind: ActivityKind,
    snapshot: ContextSnapshot,
}

#[derive(Debug, Default)]
struct PendingTable {
    entries: Mutex<HashMap<Identifier, PendingWrite>>,
    captured: AtomicU64,
    completed: AtomicU64,
    dropped: AtomicU64,
}

impl PendingTable {
    fn discard(&self, activity_id: Identifier) -> bool {
        let removed = self.entries.lock().remove(&activity_id).is_some();
        if removed {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        removed
    }
}

/// Counters for captured, completed and dropped writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub captured: u64,
    pub completed: u64,
    pub dropped: u64,
    pub pending: usize,
}

/// Stores captured snapshots keyed by activity id
#[derive(Debug, Default)]
pub struct WriteScheduler {
    table: Arc<PendingTable>,
}

impl WriteScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture `snapshot` for the activity `activity_id`
    ///
    /// Must run before the activity's ids are handed to its producer, so no
    /// activity exists without a captured context. Capturing twice for the same
    /// id replaces the earlier snapshot.
    pub fn begin_activity(
        &self,
        kind: ActivityKind,
        activity_id: Identifier,
        started_at: DateTime<Utc>,
        snapshot: ContextSnapshot,
    ) -> CapturedContextHandle {
        let previous = self
            .table
            .entries
            .lock()
            .insert(activity_id, PendingWrite { kind, snapshot });
        if previous.is_some() {
            debug!(activity = %activity_id, "Replaced captured context for activity");
        }
        self.table.captured.fetch_add(1, Ordering::Relaxed);

        CapturedContextHandle {
            activity_id,
            kind,
            started_at,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Pair the captured snapshot with completion data
    ///
    /// Returns `None` when the capture is gone; the write is dropped rather
    /// than attributed to a different context.
    pub fn complete_activity(
        &self,
        handle: CapturedContextHandle,
        payload: EventPayload,
        attributes: Attributes,
    ) -> Option<Event> {
        handle.complete(payload, attributes)
    }

    /// Drop the capture for `activity_id`; a later completion becomes a no-op
    pub fn discard(&self, activity_id: Identifier) -> bool {
        self.table.discard(activity_id)
    }

    /// Snapshot captured for `activity_id`, if still pending
    pub fn captured(&self, activity_id: Identifier) -> Option<ContextSnapshot> {
        self.table
            .entries
            .lock()
            .get(&activity_id)
            .map(|pending| pending.snapshot.clone())
    }

    pub fn pending_count(&self) -> usize {
        self.table.entries.lock().len()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            captured: self.table.captured.load(Ordering::Relaxed),
            completed: self.table.completed.load(Ordering::Relaxed),
            dropped: self.table.dropped.load(Ordering::Relaxed),
            pending: self.pending_count(),
        }
    }
}

/// Opaque handle bound to one captured snapshot
///
/// Not `Clone`: an activity completes at most once.
#[derive(Debug)]
pub struct CapturedContextHandle {
    activity_id: Identifier,
    kind: ActivityKind,
    started_at: DateTime<Utc>,
    table: Weak<PendingTable>,
}

impl CapturedContextHandle {
    pub fn activity_id(&self) -> Identifier {
        self.activity_id
    }

    pub fn kind(&self) -> ActivityKind {
        self.kind
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether completing now would produce an event
    pub fn is_live(&self) -> bool {
        self.table
            .upgrade()
            .map(|table| table.entries.lock().contains_key(&self.activity_id))
            .unwrap_or(false)
    }

    /// Copy of the captured snapshot
    pub fn snapshot(&self) -> Option<ContextSnapshot> {
        let table = self.table.upgrade()?;
        let entries = table.entries.lock();
        entries.get(&self.activity_id).map(|p| p.snapshot.clone())
    }

    /// Build the activity's event with the captured snapshot
    ///
    /// The event is timestamped at activity start.
    pub fn complete(self, payload: EventPayload, attributes: Attributes) -> Option<Event> {
        let Some(table) = self.table.upgrade() else {
            debug!(
                activity = %self.activity_id,
                kind = self.kind.as_str(),
                "Scheduler torn down before completion; write dropped"
            );
            return None;
        };

        let pending = table.entries.lock().remove(&self.activity_id);
        match pending {
            Some(pending) if pending.kind == self.kind => {
                table.completed.fetch_add(1, Ordering::Relaxed);
                let event = Event::new(self.started_at, pending.snapshot, payload);
                Some(event.with_attributes(attributes))
            }
            Some(_) | None => {
                table.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(
                    activity = %self.activity_id,
                    kind = self.kind.as_str(),
                    "No captured context for activity; write dropped"
                );
                None
            }
        }
    }
}

impl Drop for CapturedContextHandle {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.discard(self.activity_id);
        }
    }
}
