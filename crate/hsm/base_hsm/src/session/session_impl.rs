//! Session lifecycle and object enumeration.
//!
//! A [`Session`] wraps one PKCS#11 session handle. It hands out
//! session-bound [`ObjectHandle`]s, closes itself exactly once (explicitly
//! or on drop, logging out first when it logged in) and refuses every
//! operation after close with `SessionClosed`. Attribute reading,
//! classification and key-material export live in the sibling
//! `attributes` module.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use cryptoki_sys::{
    CK_OBJECT_HANDLE, CK_SESSION_HANDLE, CKA_CLASS, CKA_LABEL, CKO_PRIVATE_KEY, CKO_PUBLIC_KEY,
    CKO_SECRET_KEY,
};
use keyview_interfaces::{ObjectHandle, TokenError};
use tracing::debug;

use crate::{
    HResult, ObjectHandlesCache,
    token_api::{TokenApi, ck_ulong_bytes},
};

/// Narrow an enumeration to one object class, or list everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectFilter {
    Any,
    PublicKeys,
    PrivateKeys,
    SecretKeys,
}

pub struct Session {
    api: Arc<dyn TokenApi>,
    handle: CK_SESSION_HANDLE,
    object_handles_cache: Arc<ObjectHandlesCache>,
    logged_in: bool,
    closed: AtomicBool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("logged_in", &self.logged_in)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(
        api: Arc<dyn TokenApi>,
        session_handle: CK_SESSION_HANDLE,
        object_handles_cache: Arc<ObjectHandlesCache>,
        logged_in: bool,
    ) -> Self {
        debug!("Creating new session: {session_handle}. Logged in? {logged_in}");
        Self {
            api,
            handle: session_handle,
            object_handles_cache,
            logged_in,
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn api(&self) -> &Arc<dyn TokenApi> {
        &self.api
    }

    pub(crate) const fn session_handle(&self) -> CK_SESSION_HANDLE {
        self.handle
    }

    /// Close the session, logging out first when this session logged in.
    ///
    /// Closing is idempotent: the first call releases the token session,
    /// later calls (including the one from `Drop`) return `Ok(())`.
    pub fn close(&self) -> HResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing session {}", self.handle);
        if self.logged_in {
            self.api.logout(self.handle)?;
        }
        self.api.close_session(self.handle)
    }

    pub(crate) fn ensure_open(&self) -> HResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TokenError::SessionClosed.into());
        }
        Ok(())
    }

    /// Validate that `object` belongs to this session and that the session
    /// is still usable, then unwrap the raw token handle.
    pub(crate) fn checked_raw(&self, object: ObjectHandle) -> HResult<CK_OBJECT_HANDLE> {
        self.ensure_open()?;
        if object.session() != self.handle as u64 {
            return Err(TokenError::SessionClosed.into());
        }
        Ok(object.raw() as CK_OBJECT_HANDLE)
    }

    pub(crate) fn wrap_handle(&self, raw: CK_OBJECT_HANDLE) -> ObjectHandle {
        ObjectHandle::new(self.handle as u64, raw as u64)
    }

    /// List the handles of the objects matching the filter. Zero matches
    /// is an empty vector, not an error.
    pub fn list_objects(&self, object_filter: ObjectFilter) -> HResult<Vec<ObjectHandle>> {
        self.ensure_open()?;
        let mut template = Vec::new();
        match object_filter {
            ObjectFilter::Any => {}
            ObjectFilter::PublicKeys => template.push((CKA_CLASS, ck_ulong_bytes(CKO_PUBLIC_KEY))),
            ObjectFilter::PrivateKeys => {
                template.push((CKA_CLASS, ck_ulong_bytes(CKO_PRIVATE_KEY)));
            }
            ObjectFilter::SecretKeys => template.push((CKA_CLASS, ck_ulong_bytes(CKO_SECRET_KEY))),
        }
        let handles = self.api.find_objects(self.handle, &template)?;
        Ok(handles.into_iter().map(|h| self.wrap_handle(h)).collect())
    }

    /// Retrieve the handle of the object carrying the given label.
    ///
    /// Previously found handles are served from the slot's LRU cache. When
    /// several objects share the label (key pairs often do), the first
    /// match wins; use [`Self::list_objects`] and
    /// [`Self::describe`](Session::describe) to disambiguate.
    pub fn get_object_handle(&self, label: &str) -> HResult<ObjectHandle> {
        self.ensure_open()?;
        if let Some(raw) = self.object_handles_cache.get(label.as_bytes())? {
            return Ok(self.wrap_handle(raw));
        }

        let template = vec![(CKA_LABEL, label.as_bytes().to_vec())];
        let object_handles = self.api.find_objects(self.handle, &template)?;
        let raw = *object_handles
            .first()
            .ok_or_else(|| TokenError::Default(format!("no object found with label {label}")))?;
        if object_handles.len() > 1 {
            debug!(
                "Found {} objects labelled {label}, using handle {raw}",
                object_handles.len()
            );
        }

        self.object_handles_cache
            .insert(label.as_bytes().to_vec(), raw)?;
        Ok(self.wrap_handle(raw))
    }

    /// Remove one label from the handle cache, e.g. after the object was
    /// seen to have vanished.
    pub fn delete_object_handle(&self, label: &str) -> HResult<()> {
        self.object_handles_cache.remove(label.as_bytes())
    }

    /// Drop every cached label→handle association for this slot.
    pub fn clear_object_handles(&self) -> HResult<()> {
        self.object_handles_cache.clear()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        drop(self.close());
    }
}
