//! applock-core - application-lock enforcement engine.
//!
//! Decides, in near-real-time, whether the device's current foreground
//! application must be intercepted and gated behind a PIN challenge. Two
//! independent detectors (a polling watcher and an event-driven watcher)
//! read one shared protection snapshot and feed a single gate controller,
//! which presents the blocking lock screen through a capability trait.
//!
//! This is not a sandbox: a protected app that already reached the
//! foreground keeps executing; the engine only races to put a blocking
//! screen in front of it.

pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod events;
pub mod gate;
pub mod pin;
pub mod platform;
pub mod state;
pub mod store;
pub mod watcher;

// Re-export common types
pub use crate::config::ApplockConfig;
pub use crate::crypto::MIN_PIN_LEN;
pub use crate::engine::{Engine, EngineStatus};
pub use crate::error::{LockError, Result};
pub use crate::events::{EventWatcher, ForegroundEventKind};
pub use crate::gate::{
    DetectionSource, GateController, GateOutcome, GatePresenter, GateRequest,
};
pub use crate::pin::PinGate;
pub use crate::state::{ProtectionSnapshot, SharedProtectionState};
pub use crate::store::{ProtectedApp, ProtectionSettings, ProtectionStore};
pub use crate::watcher::{
    ForegroundProvider, ForegroundTransition, PollingConfig, PollingWatcher, TransitionKind,
};
