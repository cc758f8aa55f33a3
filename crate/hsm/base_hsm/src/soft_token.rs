//! An in-memory [`TokenApi`] backend.
//!
//! The soft token gives the test-suites a deterministic PKCS#11 token:
//! configurable slots and PINs, a session limit, key objects whose value
//! attributes honor the sensitive/extractable policy, and object removal
//! to reproduce objects vanishing between enumeration and read. It lives
//! in the crate proper (not behind `cfg(test)`) so dependent crates can
//! drive their integration tests with it.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, MutexGuard},
};

use cryptoki_sys::{
    CK_ATTRIBUTE_TYPE, CK_OBJECT_HANDLE, CK_SESSION_HANDLE, CKA_CLASS, CKA_COEFFICIENT,
    CKA_DECRYPT, CKA_DERIVE, CKA_ENCRYPT, CKA_EXPONENT_1, CKA_EXPONENT_2, CKA_EXTRACTABLE, CKA_ID,
    CKA_KEY_GEN_MECHANISM, CKA_KEY_TYPE, CKA_LABEL, CKA_LOCAL, CKA_MODIFIABLE, CKA_MODULUS,
    CKA_PRIME_1, CKA_PRIME_2, CKA_PRIVATE, CKA_PRIVATE_EXPONENT, CKA_PUBLIC_EXPONENT,
    CKA_SENSITIVE, CKA_SIGN, CKA_SIGN_RECOVER, CKA_TOKEN, CKA_UNWRAP, CKA_VALUE, CKA_VERIFY,
    CKA_WRAP, CKK_AES, CKK_RSA, CKM_AES_KEY_GEN, CKM_RSA_PKCS_KEY_PAIR_GEN, CKO_DATA,
    CKO_PRIVATE_KEY, CKO_PUBLIC_KEY, CKO_SECRET_KEY,
};
use keyview_interfaces::{RsaPrivateKeyMaterial, TokenError};

use crate::{
    HResult,
    token_api::{AttrValue, LibraryInfo, TokenApi, ck_ulong_bytes},
};

const DEFAULT_MAX_SESSIONS: usize = 8;

fn bool_bytes(value: bool) -> Vec<u8> {
    vec![u8::from(value)]
}

struct SoftObject {
    attributes: HashMap<CK_ATTRIBUTE_TYPE, Vec<u8>>,
    /// Attribute types the token refuses to reveal for this object.
    withheld: HashSet<CK_ATTRIBUTE_TYPE>,
}

struct SoftSlot {
    pin: Option<String>,
    objects: BTreeMap<CK_OBJECT_HANDLE, SoftObject>,
}

struct SessionState {
    slot_id: usize,
    logged_in: bool,
}

struct Inner {
    slots: HashMap<usize, SoftSlot>,
    sessions: HashMap<CK_SESSION_HANDLE, SessionState>,
    next_session: CK_SESSION_HANDLE,
    next_object: CK_OBJECT_HANDLE,
    max_sessions: usize,
}

pub struct SoftToken {
    inner: Mutex<Inner>,
}

impl Default for SoftToken {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftToken {
    #[must_use]
    pub fn new() -> Self {
        Self::with_session_limit(DEFAULT_MAX_SESSIONS)
    }

    #[must_use]
    pub fn with_session_limit(max_sessions: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: HashMap::new(),
                sessions: HashMap::new(),
                next_session: 1,
                next_object: 1,
                max_sessions,
            }),
        }
    }

    fn lock(&self) -> HResult<MutexGuard<'_, Inner>> {
        Ok(self
            .inner
            .lock()
            .map_err(|e| TokenError::Default(format!("failed to lock the soft token: {e}")))?)
    }

    pub fn add_slot(&self, slot_id: usize, pin: Option<&str>) -> HResult<()> {
        self.lock()?.slots.insert(
            slot_id,
            SoftSlot {
                pin: pin.map(ToOwned::to_owned),
                objects: BTreeMap::new(),
            },
        );
        Ok(())
    }

    fn add_object(&self, slot_id: usize, object: SoftObject) -> HResult<u64> {
        let mut inner = self.lock()?;
        let handle = inner.next_object;
        inner.next_object += 1;
        inner
            .slots
            .get_mut(&slot_id)
            .ok_or(TokenError::TokenNotFound(slot_id))?
            .objects
            .insert(handle, object);
        Ok(handle as u64)
    }

    fn common_attributes(class: u64, label: &str) -> HashMap<CK_ATTRIBUTE_TYPE, Vec<u8>> {
        HashMap::from([
            (CKA_CLASS, ck_ulong_bytes(class as _)),
            (CKA_LABEL, label.as_bytes().to_vec()),
            (CKA_ID, label.as_bytes().to_vec()),
            (CKA_TOKEN, bool_bytes(true)),
            (CKA_PRIVATE, bool_bytes(false)),
            (CKA_MODIFIABLE, bool_bytes(true)),
            (CKA_LOCAL, bool_bytes(true)),
        ])
    }

    /// Add an RSA public key object. Returns the raw handle.
    pub fn add_rsa_public_key(
        &self,
        slot_id: usize,
        label: &str,
        modulus: &[u8],
        public_exponent: &[u8],
    ) -> HResult<u64> {
        let mut attributes = Self::common_attributes(CKO_PUBLIC_KEY as u64, label);
        attributes.extend([
            (CKA_KEY_TYPE, ck_ulong_bytes(CKK_RSA as _)),
            (
                CKA_KEY_GEN_MECHANISM,
                ck_ulong_bytes(CKM_RSA_PKCS_KEY_PAIR_GEN as _),
            ),
            (CKA_DERIVE, bool_bytes(false)),
            (CKA_ENCRYPT, bool_bytes(true)),
            (CKA_VERIFY, bool_bytes(true)),
            (CKA_WRAP, bool_bytes(false)),
            (CKA_MODULUS, modulus.to_vec()),
            (CKA_PUBLIC_EXPONENT, public_exponent.to_vec()),
        ]);
        self.add_object(
            slot_id,
            SoftObject {
                attributes,
                withheld: HashSet::new(),
            },
        )
    }

    /// Add an RSA private key object. When the key is sensitive or not
    /// extractable, the private value attributes are withheld the way a
    /// real token withholds them.
    pub fn add_rsa_private_key(
        &self,
        slot_id: usize,
        label: &str,
        material: &RsaPrivateKeyMaterial,
        sensitive: bool,
        extractable: bool,
    ) -> HResult<u64> {
        let mut attributes = Self::common_attributes(CKO_PRIVATE_KEY as u64, label);
        attributes.extend([
            (CKA_KEY_TYPE, ck_ulong_bytes(CKK_RSA as _)),
            (
                CKA_KEY_GEN_MECHANISM,
                ck_ulong_bytes(CKM_RSA_PKCS_KEY_PAIR_GEN as _),
            ),
            (CKA_SENSITIVE, bool_bytes(sensitive)),
            (CKA_EXTRACTABLE, bool_bytes(extractable)),
            (CKA_DERIVE, bool_bytes(false)),
            (CKA_DECRYPT, bool_bytes(true)),
            (CKA_SIGN, bool_bytes(true)),
            (CKA_SIGN_RECOVER, bool_bytes(false)),
            (CKA_UNWRAP, bool_bytes(false)),
            (CKA_MODULUS, material.modulus.clone()),
            (CKA_PUBLIC_EXPONENT, material.public_exponent.clone()),
            (CKA_PRIVATE_EXPONENT, material.private_exponent.to_vec()),
            (CKA_PRIME_1, material.prime_1.to_vec()),
            (CKA_PRIME_2, material.prime_2.to_vec()),
            (CKA_EXPONENT_1, material.exponent_1.to_vec()),
            (CKA_EXPONENT_2, material.exponent_2.to_vec()),
            (CKA_COEFFICIENT, material.coefficient.to_vec()),
        ]);
        let withheld = if sensitive || !extractable {
            HashSet::from([
                CKA_PRIVATE_EXPONENT,
                CKA_PRIME_1,
                CKA_PRIME_2,
                CKA_EXPONENT_1,
                CKA_EXPONENT_2,
                CKA_COEFFICIENT,
            ])
        } else {
            HashSet::new()
        };
        self.add_object(
            slot_id,
            SoftObject {
                attributes,
                withheld,
            },
        )
    }

    /// Add an AES secret key object.
    pub fn add_aes_key(
        &self,
        slot_id: usize,
        label: &str,
        value: &[u8],
        sensitive: bool,
        extractable: bool,
    ) -> HResult<u64> {
        let mut attributes = Self::common_attributes(CKO_SECRET_KEY as u64, label);
        attributes.extend([
            (CKA_KEY_TYPE, ck_ulong_bytes(CKK_AES as _)),
            (CKA_KEY_GEN_MECHANISM, ck_ulong_bytes(CKM_AES_KEY_GEN as _)),
            (CKA_SENSITIVE, bool_bytes(sensitive)),
            (CKA_EXTRACTABLE, bool_bytes(extractable)),
            (CKA_DERIVE, bool_bytes(false)),
            (CKA_ENCRYPT, bool_bytes(true)),
            (CKA_DECRYPT, bool_bytes(true)),
            (CKA_SIGN, bool_bytes(false)),
            (CKA_VERIFY, bool_bytes(false)),
            (CKA_WRAP, bool_bytes(true)),
            (CKA_UNWRAP, bool_bytes(true)),
            (CKA_VALUE, value.to_vec()),
        ]);
        let withheld = if sensitive || !extractable {
            HashSet::from([CKA_VALUE])
        } else {
            HashSet::new()
        };
        self.add_object(
            slot_id,
            SoftObject {
                attributes,
                withheld,
            },
        )
    }

    /// Add a plain data object, i.e. something that is not a key.
    pub fn add_data_object(&self, slot_id: usize, label: &str) -> HResult<u64> {
        let attributes = Self::common_attributes(CKO_DATA as u64, label);
        self.add_object(
            slot_id,
            SoftObject {
                attributes,
                withheld: HashSet::new(),
            },
        )
    }

    /// Remove an object, simulating it vanishing under a live session.
    pub fn remove_object(&self, slot_id: usize, raw: u64) -> HResult<()> {
        self.lock()?
            .slots
            .get_mut(&slot_id)
            .ok_or(TokenError::TokenNotFound(slot_id))?
            .objects
            .remove(&(raw as CK_OBJECT_HANDLE));
        Ok(())
    }
}

impl TokenApi for SoftToken {
    fn info(&self) -> HResult<LibraryInfo> {
        Ok(LibraryInfo {
            cryptoki_version: (2, 40),
            manufacturer_id: "keyview".to_owned(),
            flags: 0,
            library_description: "keyview soft token".to_owned(),
            library_version: (0, 2),
        })
    }

    fn open_session(&self, slot_id: usize, _read_write: bool) -> HResult<CK_SESSION_HANDLE> {
        let mut inner = self.lock()?;
        if !inner.slots.contains_key(&slot_id) {
            return Err(TokenError::TokenNotFound(slot_id).into());
        }
        if inner.sessions.len() >= inner.max_sessions {
            return Err(TokenError::SessionLimitExceeded.into());
        }
        let handle = inner.next_session;
        inner.next_session += 1;
        inner.sessions.insert(
            handle,
            SessionState {
                slot_id,
                logged_in: false,
            },
        );
        Ok(handle)
    }

    fn close_session(&self, session: CK_SESSION_HANDLE) -> HResult<()> {
        self.lock()?
            .sessions
            .remove(&session)
            .map(|_| ())
            .ok_or_else(|| TokenError::SessionClosed.into())
    }

    fn login(&self, session: CK_SESSION_HANDLE, pin: &str) -> HResult<()> {
        let mut inner = self.lock()?;
        let slot_id = inner
            .sessions
            .get(&session)
            .ok_or(TokenError::SessionClosed)?
            .slot_id;
        let slot = inner
            .slots
            .get(&slot_id)
            .ok_or(TokenError::TokenNotFound(slot_id))?;
        if let Some(expected) = &slot.pin {
            if expected != pin {
                return Err(TokenError::AuthFailed(format!(
                    "invalid PIN for slot {slot_id}"
                ))
                .into());
            }
        }
        if let Some(state) = inner.sessions.get_mut(&session) {
            state.logged_in = true;
        }
        Ok(())
    }

    fn logout(&self, session: CK_SESSION_HANDLE) -> HResult<()> {
        let mut inner = self.lock()?;
        let state = inner
            .sessions
            .get_mut(&session)
            .ok_or(TokenError::SessionClosed)?;
        state.logged_in = false;
        Ok(())
    }

    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[(CK_ATTRIBUTE_TYPE, Vec<u8>)],
    ) -> HResult<Vec<CK_OBJECT_HANDLE>> {
        let inner = self.lock()?;
        let slot_id = inner
            .sessions
            .get(&session)
            .ok_or(TokenError::SessionClosed)?
            .slot_id;
        let slot = inner
            .slots
            .get(&slot_id)
            .ok_or(TokenError::TokenNotFound(slot_id))?;
        Ok(slot
            .objects
            .iter()
            .filter(|(_, object)| {
                template.iter().all(|(attribute_type, value)| {
                    object.attributes.get(attribute_type) == Some(value)
                })
            })
            .map(|(handle, _)| *handle)
            .collect())
    }

    fn get_attributes(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> HResult<Vec<AttrValue>> {
        let inner = self.lock()?;
        let slot_id = inner
            .sessions
            .get(&session)
            .ok_or(TokenError::SessionClosed)?
            .slot_id;
        let soft_object = inner
            .slots
            .get(&slot_id)
            .ok_or(TokenError::TokenNotFound(slot_id))?
            .objects
            .get(&object)
            .ok_or(TokenError::ObjectVanished(object as u64))?;
        Ok(types
            .iter()
            .map(|attribute_type| {
                if soft_object.withheld.contains(attribute_type) {
                    AttrValue::Sensitive
                } else if let Some(bytes) = soft_object.attributes.get(attribute_type) {
                    AttrValue::Bytes(bytes.clone())
                } else {
                    AttrValue::TypeInvalid
                }
            })
            .collect())
    }
}
