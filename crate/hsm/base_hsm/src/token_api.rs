use std::fmt::{self, Display, Formatter};

use cryptoki_sys::{CK_ATTRIBUTE_TYPE, CK_OBJECT_HANDLE, CK_SESSION_HANDLE, CK_ULONG};

use crate::HResult;

/// The outcome of reading a single attribute.
///
/// A batch read keeps going when one attribute is refused; only
/// object-level and session-level failures abort. This mirrors how
/// `C_GetAttributeValue` reports per-attribute status through
/// `CK_UNAVAILABLE_INFORMATION` while still returning the rest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Bytes(Vec<u8>),
    /// The object is sensitive or not extractable; the value is withheld.
    Sensitive,
    /// The attribute does not apply to this object.
    TypeInvalid,
    /// The token could not produce the value for another reason.
    Unavailable,
}

/// Identification of the loaded PKCS#11 library, from `C_GetInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryInfo {
    pub cryptoki_version: (u8, u8),
    pub manufacturer_id: String,
    pub flags: u64,
    pub library_description: String,
    pub library_version: (u8, u8),
}

impl Display for LibraryInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Cryptoki Version: {}.{}\nManufacturer ID: {}\nFlags: {}\nLibrary Description: \
             {}\nLibrary Version: {}.{}",
            self.cryptoki_version.0,
            self.cryptoki_version.1,
            self.manufacturer_id,
            self.flags,
            self.library_description,
            self.library_version.0,
            self.library_version.1
        )
    }
}

/// The blocking backend boundary of this crate.
///
/// [`crate::HsmLib`] implements it over a dynamically loaded PKCS#11
/// library; [`crate::soft_token::SoftToken`] implements it in memory for
/// the test-suites. Everything above this trait (slots, sessions,
/// attribute decoding, classification) is backend-agnostic.
pub trait TokenApi: Send + Sync {
    fn info(&self) -> HResult<LibraryInfo>;

    fn open_session(&self, slot_id: usize, read_write: bool) -> HResult<CK_SESSION_HANDLE>;

    fn close_session(&self, session: CK_SESSION_HANDLE) -> HResult<()>;

    fn login(&self, session: CK_SESSION_HANDLE, pin: &str) -> HResult<()>;

    fn logout(&self, session: CK_SESSION_HANDLE) -> HResult<()>;

    /// Return every object handle matching the attribute template. An empty
    /// template matches all objects; an empty result is not an error.
    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[(CK_ATTRIBUTE_TYPE, Vec<u8>)],
    ) -> HResult<Vec<CK_OBJECT_HANDLE>>;

    /// Read the requested attributes, one [`AttrValue`] per requested type,
    /// in order. Fails with `ObjectVanished` when the object is gone and
    /// `SessionClosed` when the session is not usable.
    fn get_attributes(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> HResult<Vec<AttrValue>>;
}

/// Encode a `CK_ULONG` the way `C_FindObjects` templates expect it, i.e.
/// the platform's native representation.
#[must_use]
pub fn ck_ulong_bytes(value: CK_ULONG) -> Vec<u8> {
    value.to_ne_bytes().to_vec()
}
