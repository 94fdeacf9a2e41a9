//! Gate controller - the single chokepoint between detection and the lock
//! screen.
//!
//! Both detectors drain into one bounded queue consumed by a single
//! presentation worker, which is therefore the only writer of the
//! "gate currently showing" flag and can de-duplicate requests across
//! detector sources. Presentation is fire-and-forget: the user's decision
//! arrives later through [`GateController::resolve`].

use crate::state::SharedProtectionState;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which detector observed the foreground change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    Polling,
    Event,
}

/// One detected protected-foreground occurrence.
#[derive(Debug, Clone)]
pub struct GateRequest {
    pub package: String,
    pub detected_at: SystemTime,
    pub source: DetectionSource,
}

impl GateRequest {
    pub fn new(package: impl Into<String>, source: DetectionSource) -> Self {
        Self {
            package: package.into(),
            detected_at: SystemTime::now(),
            source,
        }
    }
}

/// User decision reported back from the lock screen. Back navigation is
/// routed to `Dismissed` by the presentation layer; there is no third way
/// out of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateOutcome {
    /// The user passed the challenge; the app is exempt until its lease
    /// ends.
    Unlocked,
    /// The user declined. No state mutation; the app re-gates on its next
    /// detected foreground entry.
    Dismissed,
}

/// Modal presentation capability. Brings a blocking screen to the
/// foreground; what happens there is outside the engine's control.
#[async_trait]
pub trait GatePresenter: Send + Sync {
    async fn present_lock_gate(&self, package: &str);
}

/// Enqueue without blocking the caller. A full queue drops the request: the
/// same foreground app is re-detected on the next tick or event, so nothing
/// is lost silently.
pub(crate) fn try_submit(tx: &mpsc::Sender<GateRequest>, request: GateRequest) {
    let package = request.package.clone();
    if let Err(err) = tx.try_send(request) {
        log::warn!("gate: dropping request for {package}: {err}");
    }
}

pub struct GateController {
    tx: mpsc::Sender<GateRequest>,
    active: Arc<Mutex<Option<String>>>,
    state: Arc<SharedProtectionState>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl GateController {
    /// Spawn the presentation worker. Must be called from within a tokio
    /// runtime.
    pub fn new(
        state: Arc<SharedProtectionState>,
        presenter: Arc<dyn GatePresenter>,
        queue_depth: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<GateRequest>(queue_depth);
        let active = Arc::new(Mutex::new(None::<String>));

        let worker_active = Arc::clone(&active);
        let worker = tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                {
                    let mut active = worker_active.lock().unwrap();
                    if active.as_deref() == Some(request.package.as_str()) {
                        log::debug!(
                            "gate: {} already showing, dropping {:?} request",
                            request.package,
                            request.source
                        );
                        continue;
                    }
                    *active = Some(request.package.clone());
                }
                log::info!(
                    "gate: presenting lock gate for {} ({:?})",
                    request.package,
                    request.source
                );
                presenter.present_lock_gate(&request.package).await;
            }
        });

        Self {
            tx,
            active,
            state,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Sender handed to detectors.
    pub fn request_sender(&self) -> mpsc::Sender<GateRequest> {
        self.tx.clone()
    }

    /// Package currently gated, if any.
    pub fn active_gate(&self) -> Option<String> {
        self.active.lock().unwrap().clone()
    }

    /// Apply the user's decision for a presented gate.
    pub fn resolve(&self, package: &str, outcome: GateOutcome) {
        match outcome {
            GateOutcome::Unlocked => {
                log::info!("gate: {package} unlocked");
                self.state.mark_temporarily_unlocked(package);
            }
            GateOutcome::Dismissed => {
                log::debug!("gate: {package} dismissed");
            }
        }
        let mut active = self.active.lock().unwrap();
        if active.as_deref() == Some(package) {
            *active = None;
        }
    }

    pub fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().unwrap().take() {
            worker.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::scripted::RecordingGatePresenter;
    use crate::state::DEFAULT_UNLOCK_TTL;
    use std::time::Duration;

    fn controller() -> (GateController, Arc<RecordingGatePresenter>, Arc<SharedProtectionState>) {
        let state = Arc::new(SharedProtectionState::new(DEFAULT_UNLOCK_TTL));
        let presenter = Arc::new(RecordingGatePresenter::new());
        let gate = GateController::new(
            Arc::clone(&state),
            Arc::clone(&presenter) as Arc<dyn GatePresenter>,
            16,
        );
        (gate, presenter, state)
    }

    async fn wait_for_presentations(presenter: &RecordingGatePresenter, count: usize) {
        for _ in 0..100 {
            if presenter.presented().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!(
            "expected {count} presentations, saw {:?}",
            presenter.presented()
        );
    }

    #[tokio::test]
    async fn presents_and_tracks_active_gate() {
        let (gate, presenter, _state) = controller();

        try_submit(
            &gate.request_sender(),
            GateRequest::new("com.a", DetectionSource::Polling),
        );
        wait_for_presentations(&presenter, 1).await;

        assert_eq!(presenter.presented(), vec!["com.a"]);
        assert_eq!(gate.active_gate().as_deref(), Some("com.a"));
        gate.shutdown();
    }

    #[tokio::test]
    async fn duplicate_request_for_active_gate_is_dropped() {
        let (gate, presenter, _state) = controller();
        let tx = gate.request_sender();

        try_submit(&tx, GateRequest::new("com.a", DetectionSource::Polling));
        wait_for_presentations(&presenter, 1).await;
        // Same package from the other detector while the gate is up.
        try_submit(&tx, GateRequest::new("com.a", DetectionSource::Event));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(presenter.presented(), vec!["com.a"]);
        gate.shutdown();
    }

    #[tokio::test]
    async fn different_package_replaces_active_gate() {
        let (gate, presenter, _state) = controller();
        let tx = gate.request_sender();

        try_submit(&tx, GateRequest::new("com.a", DetectionSource::Polling));
        try_submit(&tx, GateRequest::new("com.b", DetectionSource::Event));
        wait_for_presentations(&presenter, 2).await;

        assert_eq!(presenter.presented(), vec!["com.a", "com.b"]);
        assert_eq!(gate.active_gate().as_deref(), Some("com.b"));
        gate.shutdown();
    }

    #[tokio::test]
    async fn resolve_unlocked_grants_lease_and_clears_active() {
        let (gate, presenter, state) = controller();

        try_submit(
            &gate.request_sender(),
            GateRequest::new("com.a", DetectionSource::Event),
        );
        wait_for_presentations(&presenter, 1).await;

        gate.resolve("com.a", GateOutcome::Unlocked);
        assert!(state.is_temporarily_unlocked("com.a"));
        assert_eq!(gate.active_gate(), None);
        gate.shutdown();
    }

    #[tokio::test]
    async fn resolve_dismissed_mutates_nothing() {
        let (gate, presenter, state) = controller();

        try_submit(
            &gate.request_sender(),
            GateRequest::new("com.a", DetectionSource::Event),
        );
        wait_for_presentations(&presenter, 1).await;

        gate.resolve("com.a", GateOutcome::Dismissed);
        assert!(!state.is_temporarily_unlocked("com.a"));
        assert_eq!(gate.active_gate(), None);

        // The same app gates again after a dismissal.
        try_submit(
            &gate.request_sender(),
            GateRequest::new("com.a", DetectionSource::Event),
        );
        wait_for_presentations(&presenter, 2).await;
        assert_eq!(presenter.presented(), vec!["com.a", "com.a"]);
        gate.shutdown();
    }
}
