use std::{
    fmt,
    num::NonZeroUsize,
    sync::{Arc, Mutex},
};

use cryptoki_sys::CK_OBJECT_HANDLE;
use keyview_interfaces::TokenError;
use lru::LruCache;

use crate::{HResult, Session, token_api::TokenApi};

const HANDLE_CACHE_SIZE: usize = 100;

/// An LRU cache mapping object labels to raw PKCS#11 object handles.
///
/// Label lookups go through `C_FindObjects`, a full token round trip; the
/// cache keeps the handles of recently used labels. Entries are evicted
/// least-recently-used first and can be removed explicitly when an object
/// is known to be gone.
pub struct ObjectHandlesCache(Mutex<LruCache<Vec<u8>, CK_OBJECT_HANDLE>>);

impl Default for ObjectHandlesCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectHandlesCache {
    #[must_use]
    pub fn new() -> Self {
        #[allow(unsafe_code)]
        let max = unsafe { NonZeroUsize::new_unchecked(HANDLE_CACHE_SIZE) };
        Self(Mutex::new(LruCache::new(max)))
    }

    pub fn get(&self, key: &[u8]) -> HResult<Option<CK_OBJECT_HANDLE>> {
        Ok(self
            .0
            .lock()
            .map_err(|e| TokenError::Default(format!("failed to lock the handles cache: {e}")))?
            .get(key)
            .copied())
    }

    pub fn insert(&self, key: Vec<u8>, value: CK_OBJECT_HANDLE) -> HResult<()> {
        self.0
            .lock()
            .map_err(|e| TokenError::Default(format!("failed to lock the handles cache: {e}")))?
            .put(key, value);
        Ok(())
    }

    pub fn remove(&self, key: &[u8]) -> HResult<()> {
        self.0
            .lock()
            .map_err(|e| TokenError::Default(format!("failed to lock the handles cache: {e}")))?
            .pop(key);
        Ok(())
    }

    pub fn clear(&self) -> HResult<()> {
        self.0
            .lock()
            .map_err(|e| TokenError::Default(format!("failed to lock the handles cache: {e}")))?
            .clear();
        Ok(())
    }
}

/// Manager for one configured slot of a token.
///
/// Holds the slot's label→handle cache and, when the slot was configured
/// with a password, a persistent login session. PKCS#11 login state is per
/// token, so keeping one authenticated session alive authenticates every
/// further session on the slot.
pub struct SlotManager {
    api: Arc<dyn TokenApi>,
    slot_id: usize,
    object_handles_cache: Arc<ObjectHandlesCache>,
    _login_session: Option<Session>,
}

impl fmt::Debug for SlotManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotManager")
            .field("slot_id", &self.slot_id)
            .finish_non_exhaustive()
    }
}

impl SlotManager {
    /// Create the manager, authenticating the slot when a password is
    /// provided.
    pub fn instantiate(
        api: Arc<dyn TokenApi>,
        slot_id: usize,
        login_password: Option<String>,
    ) -> HResult<Self> {
        let object_handles_cache = Arc::new(ObjectHandlesCache::new());
        if let Some(password) = login_password {
            let login_session = Self::open_session_(
                &api,
                slot_id,
                false,
                object_handles_cache.clone(),
                Some(password),
            )?;
            Ok(Self {
                api,
                slot_id,
                object_handles_cache,
                _login_session: Some(login_session),
            })
        } else {
            Ok(Self {
                api,
                slot_id,
                object_handles_cache,
                _login_session: None,
            })
        }
    }

    #[must_use]
    pub const fn slot_id(&self) -> usize {
        self.slot_id
    }

    /// Open a new session on this slot. The session is closed when the
    /// returned [`Session`] is dropped.
    pub fn open_session(&self, read_write: bool) -> HResult<Session> {
        Self::open_session_(
            &self.api,
            self.slot_id,
            read_write,
            self.object_handles_cache.clone(),
            None,
        )
    }

    fn open_session_(
        api: &Arc<dyn TokenApi>,
        slot_id: usize,
        read_write: bool,
        object_handles_cache: Arc<ObjectHandlesCache>,
        login_password: Option<String>,
    ) -> HResult<Session> {
        let session_handle = api.open_session(slot_id, read_write)?;
        if let Some(password) = login_password.as_ref() {
            if let Err(e) = api.login(session_handle, password) {
                // the raw session must not outlive a failed login
                drop(api.close_session(session_handle));
                return Err(e);
            }
        }
        Ok(Session::new(
            api.clone(),
            session_handle,
            object_handles_cache,
            login_password.is_some(),
        ))
    }
}
