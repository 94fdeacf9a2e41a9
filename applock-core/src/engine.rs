//! Engine - the composition root.
//!
//! Wires the store, the shared protection state, both detectors, and the
//! gate controller, and exposes the surface collaborators call: PIN-gated
//! enable/disable, protected-list mutations, the foreground-event entry
//! point, gate resolution, and status.

use crate::config::ApplockConfig;
use crate::error::Result;
use crate::events::{EventWatcher, ForegroundEventKind};
use crate::gate::{GateController, GateOutcome, GatePresenter};
use crate::pin::PinGate;
use crate::state::{refresh_from, SharedProtectionState};
use crate::store::{ProtectedApp, ProtectionStore};
use crate::watcher::{ForegroundProvider, PollingWatcher};
use serde::Serialize;
use std::fs;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub enforcing: bool,
    pub pin_set: bool,
    pub protected_count: usize,
    pub observation_permission: bool,
    pub watcher_running: bool,
    pub active_gate: Option<String>,
}

pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    config: ApplockConfig,
    store: Arc<Mutex<ProtectionStore>>,
    state: Arc<SharedProtectionState>,
    gate: GateController,
    pin_gate: PinGate,
    events: EventWatcher,
    provider: Arc<dyn ForegroundProvider>,
    watcher: Mutex<Option<PollingWatcher>>,
}

impl Engine {
    /// Open the store, seed the shared state from it, and spawn the gate
    /// worker. The polling watcher starts only while enforcement is
    /// enabled. Must be called from within a tokio runtime.
    pub fn start(
        config: ApplockConfig,
        provider: Arc<dyn ForegroundProvider>,
        presenter: Arc<dyn GatePresenter>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;

        let store = ProtectionStore::open(config.data_dir.join("applockd.sqlite3"))?;
        let state = Arc::new(SharedProtectionState::new(config.unlock_ttl()));
        refresh_from(&store, &state)?;

        let store = Arc::new(Mutex::new(store));
        let gate = GateController::new(Arc::clone(&state), presenter, config.gate_queue_depth);
        let events = EventWatcher::new(
            Arc::clone(&state),
            gate.request_sender(),
            config.self_package.clone(),
        );
        let pin_gate = PinGate::new(Arc::clone(&store), Arc::clone(&state));

        let inner = Arc::new(EngineInner {
            config,
            store,
            state,
            gate,
            pin_gate,
            events,
            provider,
            watcher: Mutex::new(None),
        });

        if inner.state.enabled() {
            Self::start_watcher(&inner);
        }
        log::info!("engine: started (data dir {:?})", inner.config.data_dir);
        Ok(Self { inner })
    }

    fn start_watcher(inner: &Arc<EngineInner>) {
        let mut slot = inner.watcher.lock().unwrap();
        if slot.is_some() {
            return;
        }
        *slot = Some(PollingWatcher::spawn(
            Arc::clone(&inner.state),
            Arc::clone(&inner.provider),
            inner.gate.request_sender(),
            inner.config.polling(),
        ));
    }

    fn stop_watcher(inner: &Arc<EngineInner>) {
        if let Some(watcher) = inner.watcher.lock().unwrap().take() {
            watcher.stop();
        }
    }

    /// PIN-gated enforcement enable; starts the polling watcher on success.
    pub async fn enable(&self, pin: &str) -> Result<()> {
        self.inner.pin_gate.enable(pin).await?;
        Self::start_watcher(&self.inner);
        Ok(())
    }

    /// PIN-gated enforcement disable; stops the polling watcher on success.
    /// The event path degrades to a no-op check on its own.
    pub async fn disable(&self, pin: &str) -> Result<()> {
        self.inner.pin_gate.disable(pin).await?;
        Self::stop_watcher(&self.inner);
        Ok(())
    }

    /// Check a candidate PIN without changing anything.
    pub fn verify_pin(&self, pin: &str) -> Result<bool> {
        self.inner.pin_gate.verify(pin)
    }

    /// Add one application to the protected list. Persists first, then
    /// refreshes the shared snapshot.
    pub fn add_protected(&self, label: &str, package: &str) -> Result<()> {
        let store = self.inner.store.lock().unwrap();
        store.insert_protected(label, package)?;
        refresh_from(&store, &self.inner.state)
    }

    /// Bulk form of [`add_protected`]; one refresh at the end.
    ///
    /// [`add_protected`]: Engine::add_protected
    pub fn add_protected_many(&self, apps: &[(String, String)]) -> Result<()> {
        let store = self.inner.store.lock().unwrap();
        for (label, package) in apps {
            store.insert_protected(label, package)?;
        }
        refresh_from(&store, &self.inner.state)
    }

    /// Remove by package identifier. Returns whether anything was removed.
    pub fn remove_protected(&self, package: &str) -> Result<bool> {
        let store = self.inner.store.lock().unwrap();
        let removed = store.remove_protected(package)?;
        refresh_from(&store, &self.inner.state)?;
        Ok(removed)
    }

    pub fn protected_apps(&self) -> Result<Vec<ProtectedApp>> {
        self.inner.store.lock().unwrap().list_protected()
    }

    /// Entry point for the OS foreground-event subscription; safe from any
    /// thread.
    pub fn handle_foreground_event(&self, package: &str, kind: ForegroundEventKind) {
        self.inner.events.handle_event(package, kind);
    }

    /// Report the user's decision for a presented lock gate.
    pub fn resolve_gate(&self, package: &str, outcome: GateOutcome) {
        self.inner.gate.resolve(package, outcome);
    }

    pub fn is_temporarily_unlocked(&self, package: &str) -> bool {
        self.inner.state.is_temporarily_unlocked(package)
    }

    pub fn status(&self) -> Result<EngineStatus> {
        let pin_set = {
            let store = self.inner.store.lock().unwrap();
            store.settings_or_default()?.pin_hash.is_some()
        };
        let snapshot = self.inner.state.snapshot();
        Ok(EngineStatus {
            enforcing: snapshot.enabled,
            pin_set,
            protected_count: snapshot.protected.len(),
            observation_permission: self.inner.provider.has_observation_permission(),
            watcher_running: self
                .inner
                .watcher
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|w| w.is_running()),
            active_gate: self.inner.gate.active_gate(),
        })
    }

    /// Stop the watcher and the gate worker. Idempotent.
    pub fn shutdown(&self) {
        Self::stop_watcher(&self.inner);
        self.inner.gate.shutdown();
        log::info!("engine: stopped");
    }
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.lock().unwrap().take() {
            watcher.stop();
        }
        self.gate.shutdown();
    }
}
