//! Event-driven foreground watcher.
//!
//! The OS invokes [`EventWatcher::handle_event`] on an arbitrary callback
//! thread whenever the foreground window changes. The callback itself only
//! filters and hops onto the runtime; the gating decision runs there,
//! against the same shared snapshot the polling path reads, so the two
//! detectors can never disagree about what is protected.

use crate::gate::{try_submit, DetectionSource, GateRequest};
use crate::state::SharedProtectionState;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

/// Event kinds delivered by the foreground-event subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForegroundEventKind {
    /// A window moved to the foreground.
    WindowForeground,
    /// Anything else the subscription delivers.
    Other,
}

pub struct EventWatcher {
    state: Arc<SharedProtectionState>,
    tx: mpsc::Sender<GateRequest>,
    self_package: String,
    runtime: Handle,
}

impl EventWatcher {
    /// Capture the current runtime so callback threads can hop onto it.
    /// Panics outside a tokio runtime.
    pub fn new(
        state: Arc<SharedProtectionState>,
        tx: mpsc::Sender<GateRequest>,
        self_package: String,
    ) -> Self {
        Self {
            state,
            tx,
            self_package,
            runtime: Handle::current(),
        }
    }

    /// OS callback entry point. Safe to call from any thread: a couple of
    /// comparisons and a task spawn, no storage access and no lock held
    /// across the hop. When enforcement is disabled the spawned check is a
    /// no-op.
    pub fn handle_event(&self, package: &str, kind: ForegroundEventKind) {
        if kind != ForegroundEventKind::WindowForeground {
            return;
        }
        if package == self.self_package {
            return;
        }

        let state = Arc::clone(&self.state);
        let tx = self.tx.clone();
        let package = package.to_string();
        let self_package = self.self_package.clone();
        self.runtime.spawn(async move {
            let snapshot = state.snapshot();
            if snapshot.should_gate(&package, &self_package) {
                log::info!("events: protected app {package} in foreground");
                try_submit(&tx, GateRequest::new(package, DetectionSource::Event));
            }
        });
    }
}
