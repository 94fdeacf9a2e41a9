//! Process-wide protection snapshot shared by both detectors.
//!
//! The whole triple (enabled, protected set, temporary unlocks) lives behind
//! one mutex so a detector can never observe a torn update, e.g. enforcement
//! enabled against a stale empty protected set. The store stays the source
//! of truth; this cache is refreshed from persisted values after every write
//! and both detectors read only from here.
//!
//! A temporary unlock is a lease: it carries an expiry checked on every
//! read, and the polling watcher additionally clears it as soon as the
//! exempted application leaves the foreground.

use crate::error::Result;
use crate::store::{ProtectedApp, ProtectionSettings, ProtectionStore};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Default lifetime of a temporary-unlock lease.
pub const DEFAULT_UNLOCK_TTL: Duration = Duration::from_secs(300);

/// Atomic clone of the full protection triple.
#[derive(Debug, Clone)]
pub struct ProtectionSnapshot {
    pub enabled: bool,
    pub protected: HashSet<String>,
    pub temporarily_unlocked: HashSet<String>,
}

impl ProtectionSnapshot {
    /// The single gating predicate shared by both detectors: a foreground
    /// identifier is gated iff enforcement is enabled, the identifier is not
    /// the host application itself, it is protected, and it holds no unlock
    /// lease.
    pub fn should_gate(&self, package: &str, self_package: &str) -> bool {
        self.enabled
            && package != self_package
            && self.protected.contains(package)
            && !self.temporarily_unlocked.contains(package)
    }
}

struct StateInner {
    enabled: bool,
    protected: HashSet<String>,
    /// Package identifier -> lease expiry.
    temp_unlocks: HashMap<String, Instant>,
}

impl StateInner {
    fn prune_expired(&mut self, now: Instant) {
        self.temp_unlocks.retain(|_, expiry| *expiry > now);
    }
}

/// Thread-safe in-memory mirror of the protection store, plus the
/// temporary-unlock leases that exist only for the process lifetime.
///
/// Constructed once by the engine and handed to collaborators by `Arc`.
pub struct SharedProtectionState {
    inner: Mutex<StateInner>,
    unlock_ttl: Duration,
}

impl SharedProtectionState {
    pub fn new(unlock_ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(StateInner {
                enabled: false,
                protected: HashSet::new(),
                temp_unlocks: HashMap::new(),
            }),
            unlock_ttl,
        }
    }

    /// Atomic read of the full triple.
    pub fn snapshot(&self) -> ProtectionSnapshot {
        let mut inner = self.inner.lock().unwrap();
        inner.prune_expired(Instant::now());
        ProtectionSnapshot {
            enabled: inner.enabled,
            protected: inner.protected.clone(),
            temporarily_unlocked: inner.temp_unlocks.keys().cloned().collect(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.inner.lock().unwrap().enabled
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.lock().unwrap().enabled = enabled;
    }

    pub fn replace_protected_set(&self, packages: HashSet<String>) {
        self.inner.lock().unwrap().protected = packages;
    }

    /// Grant an unlock lease. Idempotent; re-marking restarts the lease.
    pub fn mark_temporarily_unlocked(&self, package: &str) {
        let expiry = Instant::now() + self.unlock_ttl;
        self.inner
            .lock()
            .unwrap()
            .temp_unlocks
            .insert(package.to_string(), expiry);
    }

    /// Drop a lease. Idempotent; a no-op when none exists.
    pub fn clear_temporary_unlock(&self, package: &str) {
        self.inner.lock().unwrap().temp_unlocks.remove(package);
    }

    pub fn is_temporarily_unlocked(&self, package: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.prune_expired(Instant::now());
        inner.temp_unlocks.contains_key(package)
    }

    /// Replace the cached enabled flag and protected set in one critical
    /// section. Leases are left alone: they are process-local state, not a
    /// mirror of anything persisted.
    pub fn refresh(&self, settings: &ProtectionSettings, protected: &[ProtectedApp]) {
        let mut inner = self.inner.lock().unwrap();
        inner.enabled = settings.enabled;
        inner.protected = protected.iter().map(|app| app.package.clone()).collect();
    }
}

/// Mirror freshly persisted rows into the shared cache. Persistence is the
/// write-ahead step everywhere; this runs after it, before the mutating call
/// returns success.
pub fn refresh_from(store: &ProtectionStore, state: &SharedProtectionState) -> Result<()> {
    let settings = store.settings_or_default()?;
    let protected = store.list_protected()?;
    state.refresh(&settings, &protected);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SharedProtectionState {
        SharedProtectionState::new(DEFAULT_UNLOCK_TTL)
    }

    fn settings(enabled: bool) -> ProtectionSettings {
        ProtectionSettings {
            enabled,
            pin_hash: enabled.then(|| "hash".to_string()),
            updated_at: 0,
        }
    }

    fn apps(packages: &[&str]) -> Vec<ProtectedApp> {
        packages
            .iter()
            .enumerate()
            .map(|(i, package)| ProtectedApp {
                id: i as i64,
                label: package.to_string(),
                package: package.to_string(),
            })
            .collect()
    }

    #[test]
    fn should_gate_predicate() {
        let state = state();
        state.refresh(&settings(true), &apps(&["com.a", "com.b"]));

        let snapshot = state.snapshot();
        assert!(snapshot.should_gate("com.a", "com.self"));
        assert!(snapshot.should_gate("com.b", "com.self"));
        // Not protected.
        assert!(!snapshot.should_gate("com.c", "com.self"));
        // The host itself is never gated, even if listed.
        state.refresh(&settings(true), &apps(&["com.self"]));
        assert!(!state.snapshot().should_gate("com.self", "com.self"));
    }

    #[test]
    fn disabled_never_gates() {
        let state = state();
        state.refresh(&settings(false), &apps(&["com.a"]));
        assert!(!state.snapshot().should_gate("com.a", "com.self"));
    }

    #[test]
    fn unlock_lease_suppresses_gating() {
        let state = state();
        state.refresh(&settings(true), &apps(&["com.a"]));

        state.mark_temporarily_unlocked("com.a");
        assert!(state.is_temporarily_unlocked("com.a"));
        assert!(!state.snapshot().should_gate("com.a", "com.self"));

        state.clear_temporary_unlock("com.a");
        assert!(!state.is_temporarily_unlocked("com.a"));
        assert!(state.snapshot().should_gate("com.a", "com.self"));
    }

    #[test]
    fn mark_and_clear_are_idempotent() {
        let state = state();
        state.mark_temporarily_unlocked("com.a");
        state.mark_temporarily_unlocked("com.a");
        assert!(state.is_temporarily_unlocked("com.a"));

        state.clear_temporary_unlock("com.a");
        state.clear_temporary_unlock("com.a");
        assert!(!state.is_temporarily_unlocked("com.a"));
    }

    #[test]
    fn lease_expires_on_read() {
        let state = SharedProtectionState::new(Duration::ZERO);
        state.refresh(&settings(true), &apps(&["com.a"]));

        state.mark_temporarily_unlocked("com.a");
        // Zero TTL: the lease is already past its expiry on the next read.
        assert!(!state.is_temporarily_unlocked("com.a"));
        assert!(state.snapshot().should_gate("com.a", "com.self"));
    }

    #[test]
    fn refresh_keeps_leases() {
        let state = state();
        state.refresh(&settings(true), &apps(&["com.a"]));
        state.mark_temporarily_unlocked("com.a");

        state.refresh(&settings(true), &apps(&["com.a", "com.b"]));
        assert!(state.is_temporarily_unlocked("com.a"));
    }

    #[test]
    fn snapshot_reflects_replace_protected_set() {
        let state = state();
        state.set_enabled(true);
        state.replace_protected_set(["com.x".to_string()].into_iter().collect());
        assert!(state.snapshot().should_gate("com.x", "com.self"));
    }
}
