//! Scriptable capability stand-ins.

use crate::gate::GatePresenter;
use crate::watcher::{ForegroundProvider, ForegroundTransition, TransitionKind};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

/// Foreground provider driven by explicit [`set_foreground`] calls.
///
/// Keeps a transition log shaped like the OS one: every foreground change
/// records a background transition for the departing app and a foreground
/// transition for the arriving one.
///
/// [`set_foreground`]: ScriptedForegroundProvider::set_foreground
pub struct ScriptedForegroundProvider {
    permission: AtomicBool,
    transitions: Mutex<Vec<ForegroundTransition>>,
}

impl ScriptedForegroundProvider {
    pub fn new() -> Self {
        Self {
            permission: AtomicBool::new(true),
            transitions: Mutex::new(Vec::new()),
        }
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    /// Record `package` moving to the foreground now.
    pub fn set_foreground(&self, package: &str) {
        let now = SystemTime::now();
        let mut transitions = self.transitions.lock().unwrap();

        let departing = transitions
            .iter()
            .rev()
            .find(|t| t.kind == TransitionKind::MovedToForeground)
            .map(|t| t.package.clone());
        if let Some(previous) = departing {
            transitions.push(ForegroundTransition {
                timestamp: now,
                package: previous,
                kind: TransitionKind::MovedToBackground,
            });
        }
        transitions.push(ForegroundTransition {
            timestamp: now,
            package: package.to_string(),
            kind: TransitionKind::MovedToForeground,
        });
    }

    /// Forget everything, as if no app ever came to the foreground.
    pub fn clear(&self) {
        self.transitions.lock().unwrap().clear();
    }
}

impl Default for ScriptedForegroundProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ForegroundProvider for ScriptedForegroundProvider {
    fn has_observation_permission(&self) -> bool {
        self.permission.load(Ordering::SeqCst)
    }

    fn recent_transitions(&self, window: Duration) -> Vec<ForegroundTransition> {
        let cutoff = SystemTime::now()
            .checked_sub(window)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.timestamp >= cutoff)
            .cloned()
            .collect()
    }
}

/// Presenter that records every presentation for assertions.
#[derive(Default)]
pub struct RecordingGatePresenter {
    presented: Mutex<Vec<String>>,
}

impl RecordingGatePresenter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn presented(&self) -> Vec<String> {
        self.presented.lock().unwrap().clone()
    }
}

#[async_trait]
impl GatePresenter for RecordingGatePresenter {
    async fn present_lock_gate(&self, package: &str) {
        self.presented.lock().unwrap().push(package.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::current_foreground;

    #[test]
    fn latest_foreground_wins() {
        let provider = ScriptedForegroundProvider::new();
        assert_eq!(current_foreground(&provider, Duration::from_secs(10)), None);

        provider.set_foreground("com.a");
        provider.set_foreground("com.b");
        assert_eq!(
            current_foreground(&provider, Duration::from_secs(10)).as_deref(),
            Some("com.b")
        );
    }

    #[test]
    fn records_background_transition_for_departing_app() {
        let provider = ScriptedForegroundProvider::new();
        provider.set_foreground("com.a");
        provider.set_foreground("com.b");

        let transitions = provider.recent_transitions(Duration::from_secs(10));
        assert!(transitions
            .iter()
            .any(|t| t.package == "com.a" && t.kind == TransitionKind::MovedToBackground));
    }

    #[test]
    fn clear_empties_the_log() {
        let provider = ScriptedForegroundProvider::new();
        provider.set_foreground("com.a");
        provider.clear();
        assert_eq!(current_foreground(&provider, Duration::from_secs(10)), None);
    }
}
