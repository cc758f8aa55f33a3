use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use keyview_interfaces::TokenError;
use tracing::debug;

use crate::{
    HResult, SlotManager,
    hsm_lib::HsmLib,
    token_api::{LibraryInfo, TokenApi},
};

struct SlotState {
    password: Option<String>,
    slot: Option<Arc<SlotManager>>,
}

/// Entry point of the layer: one loaded PKCS#11 backend plus the slots the
/// caller is configured to use.
///
/// Slots are instantiated lazily on first [`Self::get_slot`] and reused
/// afterwards; [`Self::close_slot`] drops the manager (and with it the
/// slot's login session) so the slot can be reopened with another password.
pub struct TokenClient {
    api: Arc<dyn TokenApi>,
    slots: Mutex<HashMap<usize, SlotState>>,
}

impl TokenClient {
    /// Load the PKCS#11 library at `path` and configure the usable slots.
    ///
    /// `passwords` maps each usable slot id to its optional user PIN; slots
    /// absent from the map are not accessible through this client.
    pub fn open<P: AsRef<std::ffi::OsStr>>(
        path: P,
        passwords: HashMap<usize, Option<String>>,
    ) -> HResult<Self> {
        let api = Arc::new(HsmLib::instantiate(path)?);
        Ok(Self::with_api(api, passwords))
    }

    /// Build a client over any backend. This is how the test-suites plug in
    /// [`crate::soft_token::SoftToken`].
    pub fn with_api(api: Arc<dyn TokenApi>, passwords: HashMap<usize, Option<String>>) -> Self {
        let mut slots = HashMap::with_capacity(passwords.len());
        for (k, v) in &passwords {
            slots.insert(
                *k,
                SlotState {
                    password: v.clone(),
                    slot: None,
                },
            );
        }
        Self {
            api,
            slots: Mutex::new(slots),
        }
    }

    /// Get a slot manager.
    /// If the slot has already been opened, the opened instance is returned.
    /// To reopen a slot with another password, call [`Self::close_slot`] first.
    pub fn get_slot(&self, slot_id: usize) -> HResult<Arc<SlotManager>> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| TokenError::Default(format!("failed to acquire lock on slots: {e}")))?;
        if let Some(slot_state) = slots.get_mut(&slot_id) {
            if let Some(s) = &slot_state.slot {
                Ok(s.clone())
            } else {
                debug!("Instantiating slot {slot_id}");
                let manager = Arc::new(SlotManager::instantiate(
                    self.api.clone(),
                    slot_id,
                    slot_state.password.clone(),
                )?);
                slot_state.slot = Some(manager.clone());
                Ok(manager)
            }
        } else {
            Err(TokenError::TokenNotFound(slot_id).into())
        }
    }

    pub fn close_slot(&self, slot_id: usize) -> HResult<()> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|e| TokenError::Default(format!("failed to acquire lock on slots: {e}")))?;
        if let Some(slot_state) = slots.get_mut(&slot_id) {
            slot_state.slot = None;
        }
        Ok(())
    }

    /// Identification of the loaded library, from `C_GetInfo`.
    pub fn get_info(&self) -> HResult<LibraryInfo> {
        self.api.info()
    }
}
