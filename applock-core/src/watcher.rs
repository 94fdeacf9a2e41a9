//! Polling foreground watcher.
//!
//! Samples the foreground-observation capability on a fixed interval and
//! emits a gate request when a protected application surfaces. Permission
//! absence is an expected, retried condition, not an error: the loop backs
//! off and keeps retrying for as long as it runs.

use crate::gate::{try_submit, DetectionSource, GateRequest};
use crate::state::{ProtectionSnapshot, SharedProtectionState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Direction of a foreground transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    MovedToForeground,
    MovedToBackground,
}

/// One entry of the OS foreground-transition log.
#[derive(Debug, Clone)]
pub struct ForegroundTransition {
    pub timestamp: SystemTime,
    pub package: String,
    pub kind: TransitionKind,
}

/// OS capability for observing which application holds the foreground.
pub trait ForegroundProvider: Send + Sync + 'static {
    /// Whether the host has been granted foreground observation.
    fn has_observation_permission(&self) -> bool;

    /// Foreground transitions within the trailing window, oldest first.
    fn recent_transitions(&self, window: Duration) -> Vec<ForegroundTransition>;
}

/// Most recent moved-to-foreground identifier in the window, if any.
pub fn current_foreground(
    provider: &dyn ForegroundProvider,
    window: Duration,
) -> Option<String> {
    provider
        .recent_transitions(window)
        .into_iter()
        .filter(|t| t.kind == TransitionKind::MovedToForeground)
        .last()
        .map(|t| t.package)
}

/// Timing knobs for the polling loop.
#[derive(Debug, Clone)]
pub struct PollingConfig {
    /// Interval between foreground samples.
    pub poll_interval: Duration,
    /// Retry interval while observation permission is missing.
    pub permission_backoff: Duration,
    /// Trailing window queried for transitions.
    pub window: Duration,
    /// Identifier the host application runs under; never gated.
    pub self_package: String,
}

/// Debounce memory for the polling path.
///
/// Tracks the last observed foreground identifier and the last identifier
/// this watcher gated. Sustained foreground yields exactly one request; the
/// debounce re-arms as soon as the foreground changes or the gating
/// predicate stops holding for the observed app (so a cleared exemption
/// re-gates without requiring a foreground change first).
#[derive(Debug, Default)]
struct TickState {
    last_observed: Option<String>,
    last_gated: Option<String>,
}

impl TickState {
    /// Evaluate one foreground sample against a snapshot. Returns the
    /// package to gate, if any, and the package whose unlock lease ends
    /// because it left the foreground. A tick with no observable foreground
    /// changes nothing.
    fn observe(
        &mut self,
        sample: Option<&str>,
        snapshot: &ProtectionSnapshot,
        self_package: &str,
    ) -> (Option<String>, Option<String>) {
        let Some(package) = sample else {
            return (None, None);
        };

        let mut departed = None;
        if self.last_observed.as_deref() != Some(package) {
            departed = self.last_observed.replace(package.to_string());
        }

        if snapshot.should_gate(package, self_package) {
            if self.last_gated.as_deref() != Some(package) {
                self.last_gated = Some(package.to_string());
                return (Some(package.to_string()), departed);
            }
        } else {
            self.last_gated = None;
        }
        (None, departed)
    }
}

/// Long-lived polling detector. One per engine; runs until stopped.
pub struct PollingWatcher {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl PollingWatcher {
    /// Spawn the watcher task. Must be called from within a tokio runtime.
    pub fn spawn(
        state: Arc<SharedProtectionState>,
        provider: Arc<dyn ForegroundProvider>,
        tx: mpsc::Sender<GateRequest>,
        config: PollingConfig,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let loop_running = Arc::clone(&running);

        let handle = tokio::spawn(async move {
            let mut tick = TickState::default();
            log::info!("watcher: polling every {:?}", config.poll_interval);

            while loop_running.load(Ordering::SeqCst) {
                if !provider.has_observation_permission() {
                    log::debug!("watcher: foreground observation not granted, backing off");
                    tokio::time::sleep(config.permission_backoff).await;
                    continue;
                }

                let sample = current_foreground(provider.as_ref(), config.window);
                let snapshot = state.snapshot();
                let (gated, departed) =
                    tick.observe(sample.as_deref(), &snapshot, &config.self_package);

                if let Some(package) = departed {
                    // The previous foreground app left; its lease ends here.
                    state.clear_temporary_unlock(&package);
                }
                if let Some(package) = gated {
                    log::info!("watcher: protected app {package} in foreground");
                    try_submit(&tx, GateRequest::new(package, DetectionSource::Polling));
                }

                tokio::time::sleep(config.poll_interval).await;
            }
        });

        Self { running, handle }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.handle.is_finished()
    }

    /// Stop future ticks. The pending sleep is aborted, so shutdown never
    /// waits out a tick interval; no shared state is touched on the way out.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.handle.abort();
    }
}
