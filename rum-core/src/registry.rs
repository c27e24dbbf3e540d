//! Explicit registry of the process's RUM monitor
//!
//! There is no global: the host constructs one [`Registry`] at startup and
//! passes it (or an `Arc` of it) to whatever needs to report activity.
//!
//! ```text
//! Registry::new() ──enable(config, sink)──► Monitor (live)
//!        │                                     │
//!   monitor() before enable                disable()
//!        ▼                                     ▼
//!   NopMonitor + one error! log            NopMonitor again
//! ```
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rum_core::config::RumConfig;
//! use rum_core::registry::Registry;
//! use rum_core::sink::NullSink;
//!
//! let registry = Registry::new();
//! assert!(registry.monitor().is_noop());
//!
//! registry.enable(RumConfig::new("my-app"), Arc::new(NullSink)).unwrap();
//! assert!(!registry.monitor().is_noop());
//! registry.disable();
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::config::RumConfig;
use crate::error::{Result, RumError};
use crate::identifier::IdGenerator;
use crate::monitor::{Monitor, NopMonitor, RumMonitor};
use crate::sink::EventSink;

/// Holds the live monitor, or nothing before `enable`
#[derive(Debug, Default)]
pub struct Registry {
    monitor: RwLock<Option<Arc<Monitor>>>,
    misuse_reported: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the monitor; fails if one is already running
    pub fn enable(&self, config: RumConfig, sink: Arc<dyn EventSink>) -> Result<Arc<Monitor>> {
        self.install(|| Monitor::start(config, sink))
    }

    /// Start the monitor with an explicit identifier source
    pub fn enable_with_generator(
        &self,
        config: RumConfig,
        sink: Arc<dyn EventSink>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Arc<Monitor>> {
        self.install(|| Monitor::with_generator(config, sink, ids))
    }

    fn install(&self, build: impl FnOnce() -> Result<Monitor>) -> Result<Arc<Monitor>> {
        let mut slot = self.monitor.write();
        if let Some(existing) = slot.as_ref() {
            return Err(RumError::AlreadyEnabled {
                application_id: existing.application_id().to_string(),
            });
        }
        let monitor = Arc::new(build()?);
        *slot = Some(Arc::clone(&monitor));
        debug!(application = %monitor.application_id(), "RUM enabled");
        Ok(monitor)
    }

    pub fn is_enabled(&self) -> bool {
        self.monitor.read().is_some()
    }

    /// The live monitor, or the no-op fallback
    ///
    /// Asking before `enable` is a programming error: it is reported once,
    /// loudly, and every later call quietly gets the fallback.
    pub fn monitor(&self) -> Arc<dyn RumMonitor> {
        if let Some(monitor) = self.monitor.read().as_ref() {
            return Arc::clone(monitor) as Arc<dyn RumMonitor>;
        }
        if !self.misuse_reported.swap(true, Ordering::Relaxed) {
            error!("RUM monitor requested before Registry::enable(); telemetry will be dropped");
        }
        Arc::new(NopMonitor)
    }

    /// The live monitor, without the fallback
    pub fn try_monitor(&self) -> Result<Arc<Monitor>> {
        self.monitor.read().as_ref().cloned().ok_or(RumError::NotEnabled)
    }

    /// Stop and forget the live monitor; returns whether one was running
    pub fn disable(&self) -> bool {
        let monitor = self.monitor.write().take();
        match monitor {
            Some(monitor) => {
                monitor.shutdown();
                debug!(application = %monitor.application_id(), "RUM disabled");
                true
            }
            None => false,
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.disable();
    }
}
