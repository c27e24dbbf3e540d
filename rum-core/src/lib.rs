//! # RUM Core - event attribution for real user monitoring
//!
//! Every telemetry event a client produces (view updates, user actions,
//! resource loads, errors, long tasks, spans) is attributed to the session and
//! view that were active when the activity *started*, not when it ended.
//!
//! - **Identifiers**: 128-bit ids in decimal, hex16 and hex32 encodings
//! - **Scope tree**: Application → Session → View → Action/Resource, with
//!   inactivity and max-duration session expiry evaluated lazily per command
//! - **Write scheduler**: captures a context snapshot when work begins and
//!   hands it back when the work completes
//! - **Monitor**: a single worker thread that folds commands into events and
//!   delivers them to an [`EventSink`]
//!
//! ## Core Principle
//!
//! > The scope tree is a pure fold over timestamped commands.
//!
//! Session boundaries are decided by command timestamps alone, so the same
//! command log and the same identifier seed always give the same events.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::{Duration, TimeZone, Utc};
//! use rum_core::{ApplicationScope, Command, EventType, RumConfig, SeededIdGenerator};
//!
//! let t0 = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
//! let mut tree = ApplicationScope::new(
//!     RumConfig::new("com.example.shop"),
//!     Arc::new(SeededIdGenerator::from_seed(7)),
//! );
//!
//! let events = tree.process_all(&[
//!     Command::start_view("home", "Home", t0),
//!     Command::start_resource("r1", "GET", "https://example.com/a", t0 + Duration::seconds(1)),
//!     Command::start_view("cart", "Cart", t0 + Duration::seconds(2)),
//!     Command::stop_resource("r1", Some(200), t0 + Duration::seconds(3)),
//! ]);
//!
//! // The request finished on "cart" but started on "home"
//! let resource = events.iter().find(|e| e.event_type() == EventType::Resource).unwrap();
//! assert_eq!(resource.context.view_key(), Some("home"));
//! assert!(tree.session_id().is_some());
//! ```

pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod identifier;
pub mod monitor;
pub mod propagation;
pub mod registry;
pub mod replay;
pub mod scheduler;
pub mod scope;
pub mod sink;

// Re-export main types
pub use command::{
    ActionType, Attributes, Command, CommandKind, ErrorSource, ResourceKind, Subject,
};
pub use config::{IdentifierConfig, OrphanPolicy, RumConfig, SessionConfig};
pub use context::{ContextSnapshot, ContextUpdate, CoreContext, UserInfo};
pub use error::{ErrorCategory, ErrorDetail, ErrorResponse, Result, RumError};
pub use event::{Event, EventPayload, EventType};
pub use identifier::{
    HighWordMode, IdEncoding, IdGenerator, Identifier, RandomIdGenerator, SeededIdGenerator,
};
pub use monitor::{Monitor, MonitorStats, NopMonitor, RumMonitor, SpanHandle};
pub use propagation::{HeaderMap, HeaderStyle, SpanContext};
pub use registry::Registry;
pub use replay::{ReplayDiff, ReplayResult};
pub use scheduler::{ActivityKind, CapturedContextHandle, WriteScheduler};
pub use scope::{ApplicationScope, ScopeTreeState, SessionState};
pub use sink::{CallbackSink, EventSink, InMemorySink, JsonLinesSink, NullSink};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn test_full_workflow() {
        let mut tree = ApplicationScope::new(
            RumConfig::new("com.test.app"),
            Arc::new(SeededIdGenerator::from_seed(11)),
        );

        let events = tree.process_all(&[
            Command::application_start(Some(850), t(0)),
            Command::start_view("home", "Home", t(1)),
            Command::start_resource("img", "GET", "https://cdn.test/logo.png", t(2)),
            Command::stop_resource("img", Some(200), t(3)),
            Command::add_error("boom", ErrorSource::Source, t(4)),
            Command::stop_view("home", t(5)),
        ]);

        let session = tree.session_id().unwrap();
        assert!(events.iter().all(|e| e.session_id() == session));
        assert!(events.iter().any(|e| e.event_type() == EventType::Action));
        assert!(events.iter().any(|e| e.event_type() == EventType::Resource));
        assert!(events.iter().any(|e| e.event_type() == EventType::Error));

        let last_view = events
            .iter()
            .rev()
            .find_map(|e| e.view_payload())
            .unwrap();
        assert_eq!(last_view.key, "home");
        assert!(!last_view.is_active);
        assert_eq!(last_view.resource_count, 1);
        assert_eq!(last_view.error_count, 1);
    }

    #[test]
    fn test_registry_round_trip() {
        let registry = Registry::new();
        let sink = Arc::new(InMemorySink::new());
        registry.enable(RumConfig::new("com.test.app"), sink.clone()).unwrap();

        let monitor = registry.monitor();
        monitor.process(Command::start_view("home", "Home", t(0)));
        monitor.flush();

        assert_eq!(sink.events_of_type(EventType::View).len(), 1);
        assert!(registry.disable());
    }
}
