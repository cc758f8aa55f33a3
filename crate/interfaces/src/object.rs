use std::fmt::{self, Display, Formatter};

use strum_macros::Display;
use zeroize::Zeroizing;

use crate::error::TokenError;

/// An opaque reference to a token-resident object.
///
/// The raw value is the handle minted by the token; the session value binds
/// the handle to the session that produced it. Handles are plain data: they
/// stay printable after the session is gone, but using one against another
/// session (or a closed one) fails with [`TokenError::SessionClosed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    session: u64,
    raw: u64,
}

impl ObjectHandle {
    #[must_use]
    pub const fn new(session: u64, raw: u64) -> Self {
        Self { session, raw }
    }

    /// The token-assigned handle value.
    #[must_use]
    pub const fn raw(&self) -> u64 {
        self.raw
    }

    /// The session this handle was minted by.
    #[must_use]
    pub const fn session(&self) -> u64 {
        self.session
    }
}

impl Display for ObjectHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// The coarse object taxonomy this layer works with.
///
/// Anything that is not a key (certificates, data objects, mechanism
/// objects, vendor extensions) classifies as `Other` and is listed but
/// never read for key attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
pub enum ObjectClass {
    PublicKey,
    PrivateKey,
    SecretKey,
    Other,
}

/// Key algorithm, decoded from the token's key type attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
    Aes,
    Unknown,
}

/// The mechanism the key was generated with, when the token reveals it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum KeyGenMechanism {
    RsaPkcsKeyPairGen,
    EcKeyPairGen,
    AesKeyGen,
    GenericSecretKeyGen,
    /// The token reported the value as unavailable (e.g. imported keys).
    Unavailable,
    Unknown,
}

/// Immutable snapshot of an object's header attributes.
///
/// Flags a token refuses to reveal decode to `None` rather than failing
/// the whole read; a missing label decodes to an empty string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDescriptor {
    pub handle: ObjectHandle,
    pub class: ObjectClass,
    pub label: String,
    pub token: Option<bool>,
    pub private: Option<bool>,
    pub modifiable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyAttributes {
    pub id: Vec<u8>,
    pub algorithm: KeyAlgorithm,
    pub mechanism: KeyGenMechanism,
    pub local: Option<bool>,
    pub derive: Option<bool>,
    pub encrypt: Option<bool>,
    pub verify: Option<bool>,
    pub wrap: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateKeyAttributes {
    pub id: Vec<u8>,
    pub algorithm: KeyAlgorithm,
    pub mechanism: KeyGenMechanism,
    pub local: Option<bool>,
    pub sensitive: Option<bool>,
    pub extractable: Option<bool>,
    pub derive: Option<bool>,
    pub decrypt: Option<bool>,
    pub sign: Option<bool>,
    pub sign_recover: Option<bool>,
    pub unwrap: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretKeyAttributes {
    pub id: Vec<u8>,
    pub algorithm: KeyAlgorithm,
    pub mechanism: KeyGenMechanism,
    pub local: Option<bool>,
    pub sensitive: Option<bool>,
    pub extractable: Option<bool>,
    pub derive: Option<bool>,
    pub encrypt: Option<bool>,
    pub decrypt: Option<bool>,
    pub sign: Option<bool>,
    pub verify: Option<bool>,
    pub wrap: Option<bool>,
    pub unwrap: Option<bool>,
}

/// Per-class attribute snapshot of a key object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyAttributes {
    PublicKey(PublicKeyAttributes),
    PrivateKey(PrivateKeyAttributes),
    SecretKey(SecretKeyAttributes),
}

impl KeyAttributes {
    #[must_use]
    pub const fn class(&self) -> ObjectClass {
        match self {
            Self::PublicKey(_) => ObjectClass::PublicKey,
            Self::PrivateKey(_) => ObjectClass::PrivateKey,
            Self::SecretKey(_) => ObjectClass::SecretKey,
        }
    }

    #[must_use]
    pub const fn algorithm(&self) -> KeyAlgorithm {
        match self {
            Self::PublicKey(a) => a.algorithm,
            Self::PrivateKey(a) => a.algorithm,
            Self::SecretKey(a) => a.algorithm,
        }
    }

    #[must_use]
    pub fn id(&self) -> &[u8] {
        match self {
            Self::PublicKey(a) => &a.id,
            Self::PrivateKey(a) => &a.id,
            Self::SecretKey(a) => &a.id,
        }
    }

    /// The single place the sensitive/extractable policy is enforced.
    ///
    /// Public keys are always exportable. Private and secret keys must carry
    /// `extractable == true`; an unknown flag counts as not extractable since
    /// refusing can never leak key material. A `sensitive == true` key is
    /// rejected here even when the token would only fail later, at the value
    /// read.
    pub fn ensure_exportable(&self) -> Result<(), TokenError> {
        let (sensitive, extractable) = match self {
            Self::PublicKey(_) => return Ok(()),
            Self::PrivateKey(a) => (a.sensitive, a.extractable),
            Self::SecretKey(a) => (a.sensitive, a.extractable),
        };
        if extractable != Some(true) {
            return Err(TokenError::NotExtractable);
        }
        if sensitive == Some(true) {
            return Err(TokenError::AttributeSensitive);
        }
        Ok(())
    }
}

/// RSA public components, big-endian unsigned bytes as read from the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKeyMaterial {
    pub modulus: Vec<u8>,
    pub public_exponent: Vec<u8>,
}

/// Full RSA CRT key. The private components are wiped on drop.
#[derive(Debug)]
pub struct RsaPrivateKeyMaterial {
    pub modulus: Vec<u8>,
    pub public_exponent: Vec<u8>,
    pub private_exponent: Zeroizing<Vec<u8>>,
    pub prime_1: Zeroizing<Vec<u8>>,
    pub prime_2: Zeroizing<Vec<u8>>,
    pub exponent_1: Zeroizing<Vec<u8>>,
    pub exponent_2: Zeroizing<Vec<u8>>,
    pub coefficient: Zeroizing<Vec<u8>>,
}

/// Raw key material read from a token object.
#[derive(Debug)]
pub enum KeyMaterial {
    RsaPublicKey(RsaPublicKeyMaterial),
    RsaPrivateKey(RsaPrivateKeyMaterial),
    AesKey(Zeroizing<Vec<u8>>),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn private_attrs(sensitive: Option<bool>, extractable: Option<bool>) -> KeyAttributes {
        KeyAttributes::PrivateKey(PrivateKeyAttributes {
            id: b"test".to_vec(),
            algorithm: KeyAlgorithm::Rsa,
            mechanism: KeyGenMechanism::RsaPkcsKeyPairGen,
            local: Some(true),
            sensitive,
            extractable,
            derive: None,
            decrypt: Some(true),
            sign: Some(true),
            sign_recover: None,
            unwrap: None,
        })
    }

    #[test]
    fn public_keys_are_always_exportable() {
        let attrs = KeyAttributes::PublicKey(PublicKeyAttributes {
            id: vec![],
            algorithm: KeyAlgorithm::Rsa,
            mechanism: KeyGenMechanism::Unknown,
            local: None,
            derive: None,
            encrypt: None,
            verify: None,
            wrap: None,
        });
        attrs.ensure_exportable().unwrap();
    }

    #[test]
    fn non_extractable_private_key_is_refused() {
        let err = private_attrs(Some(false), Some(false))
            .ensure_exportable()
            .unwrap_err();
        assert!(matches!(err, TokenError::NotExtractable));
    }

    #[test]
    fn unknown_extractable_counts_as_not_extractable() {
        let err = private_attrs(Some(false), None)
            .ensure_exportable()
            .unwrap_err();
        assert!(matches!(err, TokenError::NotExtractable));
    }

    #[test]
    fn sensitive_beats_extractable() {
        let err = private_attrs(Some(true), Some(true))
            .ensure_exportable()
            .unwrap_err();
        assert!(matches!(err, TokenError::AttributeSensitive));
    }

    #[test]
    fn exportable_private_key_passes() {
        private_attrs(Some(false), Some(true))
            .ensure_exportable()
            .unwrap();
    }

    #[test]
    fn handles_display_their_raw_value() {
        let handle = ObjectHandle::new(7, 515);
        assert_eq!(handle.to_string(), "515");
        assert_eq!(handle.session(), 7);
    }

    #[test]
    fn object_class_display() {
        assert_eq!(ObjectClass::PublicKey.to_string(), "PublicKey");
        assert_eq!(ObjectClass::Other.to_string(), "Other");
    }
}
