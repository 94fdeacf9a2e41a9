//! PIN gate - every enforcement transition is authenticated here.
//!
//! Transitions are serialized through one async mutex so two concurrent
//! attempts cannot interleave their read-modify-write on the settings row.
//! Persistence is the write-ahead step: the settings row is upserted first
//! and the shared snapshot is then refreshed from the persisted values,
//! never the reverse.

use crate::crypto::{self, MIN_PIN_LEN};
use crate::error::{LockError, Result};
use crate::state::{refresh_from, SharedProtectionState};
use crate::store::ProtectionStore;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

pub struct PinGate {
    store: Arc<Mutex<ProtectionStore>>,
    state: Arc<SharedProtectionState>,
    transition: AsyncMutex<()>,
}

impl PinGate {
    pub fn new(store: Arc<Mutex<ProtectionStore>>, state: Arc<SharedProtectionState>) -> Self {
        Self {
            store,
            state,
            transition: AsyncMutex::new(()),
        }
    }

    /// Turn enforcement on. With no PIN on record the candidate becomes the
    /// new PIN (minimum 4 characters); otherwise it must match the stored
    /// hash. On mismatch nothing changes.
    pub async fn enable(&self, pin: &str) -> Result<()> {
        let _transition = self.transition.lock().await;

        let store = self.store.lock().unwrap();
        let mut settings = store.settings_or_default()?;
        match settings.pin_hash.as_deref() {
            None => {
                if pin.chars().count() < MIN_PIN_LEN {
                    return Err(LockError::NeedsNewPin { min: MIN_PIN_LEN });
                }
                settings.pin_hash = Some(crypto::hash_pin(pin));
            }
            Some(stored) => {
                if !crypto::verify_pin(pin, stored) {
                    return Err(LockError::IncorrectPin);
                }
            }
        }
        settings.enabled = true;
        settings.updated_at = chrono::Utc::now().timestamp_millis();
        store.upsert_settings(&settings)?;
        refresh_from(&store, &self.state)?;
        log::info!("pin: enforcement enabled");
        Ok(())
    }

    /// Turn enforcement off after verifying the PIN. If no PIN was ever
    /// established there is nothing to verify and the transition goes
    /// through unchallenged.
    pub async fn disable(&self, pin: &str) -> Result<()> {
        let _transition = self.transition.lock().await;

        let store = self.store.lock().unwrap();
        let mut settings = store.settings_or_default()?;
        match settings.pin_hash.as_deref() {
            None => {}
            Some(stored) if crypto::verify_pin(pin, stored) => {}
            Some(_) => return Err(LockError::IncorrectPin),
        }
        settings.enabled = false;
        settings.updated_at = chrono::Utc::now().timestamp_millis();
        store.upsert_settings(&settings)?;
        refresh_from(&store, &self.state)?;
        log::info!("pin: enforcement disabled");
        Ok(())
    }

    /// Check a candidate against the stored PIN without changing anything.
    /// False when no PIN has been established.
    pub fn verify(&self, pin: &str) -> Result<bool> {
        let store = self.store.lock().unwrap();
        let settings = store.settings_or_default()?;
        Ok(match settings.pin_hash.as_deref() {
            Some(stored) => crypto::verify_pin(pin, stored),
            None => false,
        })
    }
}
