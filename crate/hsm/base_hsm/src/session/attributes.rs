//! Attribute reading, object classification and key-material export.
//!
//! Attributes are read with fixed per-class templates through the
//! [`TokenApi::get_attributes`](crate::TokenApi::get_attributes) batch
//! protocol. A flag the token withholds decodes to "unknown" (`None`);
//! only object-level and session-level failures propagate. Key values are
//! only read after [`KeyAttributes::ensure_exportable`] passed, so no
//! partial key bytes leave the token for a non-exportable key.

use cryptoki_sys::{
    CK_ATTRIBUTE_TYPE, CK_OBJECT_HANDLE, CK_UNAVAILABLE_INFORMATION, CKA_CLASS, CKA_COEFFICIENT,
    CKA_DECRYPT, CKA_DERIVE, CKA_ENCRYPT, CKA_EXPONENT_1, CKA_EXPONENT_2, CKA_EXTRACTABLE, CKA_ID,
    CKA_KEY_GEN_MECHANISM, CKA_KEY_TYPE, CKA_LABEL, CKA_LOCAL, CKA_MODIFIABLE, CKA_MODULUS,
    CKA_PRIME_1, CKA_PRIME_2, CKA_PRIVATE, CKA_PRIVATE_EXPONENT, CKA_PUBLIC_EXPONENT,
    CKA_SENSITIVE, CKA_SIGN, CKA_SIGN_RECOVER, CKA_TOKEN, CKA_UNWRAP, CKA_VALUE, CKA_VERIFY,
    CKA_WRAP, CKK_AES, CKK_EC, CKK_RSA, CKM_AES_KEY_GEN, CKM_EC_KEY_PAIR_GEN,
    CKM_GENERIC_SECRET_KEY_GEN, CKM_RSA_PKCS_KEY_PAIR_GEN, CKO_PRIVATE_KEY, CKO_PUBLIC_KEY,
    CKO_SECRET_KEY,
};
use keyview_interfaces::{
    KeyAlgorithm, KeyAttributes, KeyGenMechanism, KeyMaterial, ObjectClass, ObjectDescriptor,
    ObjectHandle, PrivateKeyAttributes, PublicKeyAttributes, RsaPrivateKeyMaterial,
    RsaPublicKeyMaterial, SecretKeyAttributes, TokenError,
};
use tracing::{debug, trace};
use zeroize::Zeroizing;

use crate::{HError, HResult, session::Session, token_api::AttrValue};

const DESCRIPTOR_TEMPLATE: [CK_ATTRIBUTE_TYPE; 5] =
    [CKA_CLASS, CKA_LABEL, CKA_TOKEN, CKA_PRIVATE, CKA_MODIFIABLE];

const PUBLIC_KEY_TEMPLATE: [CK_ATTRIBUTE_TYPE; 8] = [
    CKA_ID,
    CKA_KEY_TYPE,
    CKA_KEY_GEN_MECHANISM,
    CKA_LOCAL,
    CKA_DERIVE,
    CKA_ENCRYPT,
    CKA_VERIFY,
    CKA_WRAP,
];

const PRIVATE_KEY_TEMPLATE: [CK_ATTRIBUTE_TYPE; 11] = [
    CKA_ID,
    CKA_KEY_TYPE,
    CKA_KEY_GEN_MECHANISM,
    CKA_LOCAL,
    CKA_SENSITIVE,
    CKA_EXTRACTABLE,
    CKA_DERIVE,
    CKA_DECRYPT,
    CKA_SIGN,
    CKA_SIGN_RECOVER,
    CKA_UNWRAP,
];

const SECRET_KEY_TEMPLATE: [CK_ATTRIBUTE_TYPE; 13] = [
    CKA_ID,
    CKA_KEY_TYPE,
    CKA_KEY_GEN_MECHANISM,
    CKA_LOCAL,
    CKA_SENSITIVE,
    CKA_EXTRACTABLE,
    CKA_DERIVE,
    CKA_ENCRYPT,
    CKA_DECRYPT,
    CKA_SIGN,
    CKA_VERIFY,
    CKA_WRAP,
    CKA_UNWRAP,
];

const RSA_PUBLIC_MATERIAL_TEMPLATE: [CK_ATTRIBUTE_TYPE; 2] = [CKA_MODULUS, CKA_PUBLIC_EXPONENT];

const RSA_PRIVATE_MATERIAL_TEMPLATE: [CK_ATTRIBUTE_TYPE; 8] = [
    CKA_MODULUS,
    CKA_PUBLIC_EXPONENT,
    CKA_PRIVATE_EXPONENT,
    CKA_PRIME_1,
    CKA_PRIME_2,
    CKA_EXPONENT_1,
    CKA_EXPONENT_2,
    CKA_COEFFICIENT,
];

/// Map a raw `CKA_CLASS` value to the object taxonomy. Unknown and vendor
/// classes map to `Other`, never fail.
pub(crate) fn classify_class(value: u64) -> ObjectClass {
    if value == CKO_PUBLIC_KEY as u64 {
        ObjectClass::PublicKey
    } else if value == CKO_PRIVATE_KEY as u64 {
        ObjectClass::PrivateKey
    } else if value == CKO_SECRET_KEY as u64 {
        ObjectClass::SecretKey
    } else {
        ObjectClass::Other
    }
}

fn key_algorithm(value: Option<u64>) -> KeyAlgorithm {
    match value {
        Some(v) if v == CKK_RSA as u64 => KeyAlgorithm::Rsa,
        Some(v) if v == CKK_EC as u64 => KeyAlgorithm::Ec,
        Some(v) if v == CKK_AES as u64 => KeyAlgorithm::Aes,
        other => {
            trace!("unrecognized key type attribute: {other:?}");
            KeyAlgorithm::Unknown
        }
    }
}

fn key_gen_mechanism(value: Option<u64>) -> KeyGenMechanism {
    let Some(v) = value else {
        return KeyGenMechanism::Unknown;
    };
    if v == CK_UNAVAILABLE_INFORMATION as u64 {
        KeyGenMechanism::Unavailable
    } else if v == CKM_RSA_PKCS_KEY_PAIR_GEN as u64 {
        KeyGenMechanism::RsaPkcsKeyPairGen
    } else if v == CKM_EC_KEY_PAIR_GEN as u64 {
        KeyGenMechanism::EcKeyPairGen
    } else if v == CKM_AES_KEY_GEN as u64 {
        KeyGenMechanism::AesKeyGen
    } else if v == CKM_GENERIC_SECRET_KEY_GEN as u64 {
        KeyGenMechanism::GenericSecretKeyGen
    } else {
        KeyGenMechanism::Unknown
    }
}

fn attr_bool(values: &[AttrValue], index: usize) -> Option<bool> {
    match values.get(index) {
        Some(AttrValue::Bytes(bytes)) if bytes.len() == 1 => Some(bytes[0] != 0),
        _ => None,
    }
}

fn attr_ulong(values: &[AttrValue], index: usize) -> Option<u64> {
    match values.get(index) {
        Some(AttrValue::Bytes(bytes)) => match bytes.len() {
            8 => Some(u64::from_ne_bytes(bytes.as_slice().try_into().ok()?)),
            4 => Some(u64::from(u32::from_ne_bytes(
                bytes.as_slice().try_into().ok()?,
            ))),
            _ => None,
        },
        _ => None,
    }
}

fn attr_bytes(values: &[AttrValue], index: usize) -> Option<Vec<u8>> {
    match values.get(index) {
        Some(AttrValue::Bytes(bytes)) => Some(bytes.clone()),
        _ => None,
    }
}

fn attr_string(values: &[AttrValue], index: usize) -> Option<String> {
    attr_bytes(values, index).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// A value attribute is mandatory where a flag is not: failing to read one
/// is an error, typed after what the token reported.
fn required_bytes(values: &[AttrValue], index: usize, what: &str) -> HResult<Vec<u8>> {
    match values.get(index) {
        Some(AttrValue::Bytes(bytes)) => Ok(bytes.clone()),
        Some(AttrValue::Sensitive) => Err(TokenError::AttributeSensitive.into()),
        Some(AttrValue::TypeInvalid) => Err(TokenError::AttributeTypeInvalid.into()),
        _ => Err(TokenError::MalformedAttributes(format!("missing {what}")).into()),
    }
}

impl Session {
    /// Read the header attributes of an object and classify it.
    pub fn describe(&self, object: ObjectHandle) -> HResult<ObjectDescriptor> {
        let raw = self.checked_raw(object)?;
        let values = self
            .api()
            .get_attributes(self.session_handle(), raw, &DESCRIPTOR_TEMPLATE)?;
        let class = attr_ulong(&values, 0).map_or(ObjectClass::Other, classify_class);
        Ok(ObjectDescriptor {
            handle: object,
            class,
            label: attr_string(&values, 1).unwrap_or_default(),
            token: attr_bool(&values, 2),
            private: attr_bool(&values, 3),
            modifiable: attr_bool(&values, 4),
        })
    }

    /// Describe a batch of objects, reporting per-object failures without
    /// aborting the batch.
    ///
    /// An object that vanished between enumeration and description, or
    /// that refuses its header attributes, yields an `Err` entry for its
    /// handle; the remaining objects are still described. Session-level
    /// failures abort the whole batch.
    #[allow(clippy::type_complexity)]
    pub fn describe_objects(
        &self,
        handles: &[ObjectHandle],
    ) -> HResult<Vec<(ObjectHandle, Result<ObjectDescriptor, TokenError>)>> {
        let mut reports = Vec::with_capacity(handles.len());
        for &handle in handles {
            match self.describe(handle) {
                Ok(descriptor) => reports.push((handle, Ok(descriptor))),
                Err(HError::Token(
                    e @ (TokenError::ObjectVanished(_)
                    | TokenError::AttributeSensitive
                    | TokenError::AttributeTypeInvalid),
                )) => {
                    debug!("skipping object {handle}: {e}");
                    reports.push((handle, Err(e)));
                }
                Err(e) => return Err(e),
            }
        }
        Ok(reports)
    }

    /// Read the key-attribute snapshot for an object of the given class.
    ///
    /// Returns `Ok(None)` for `Other`: non-key objects have no key
    /// template. Reading the same unchanged object twice yields identical
    /// snapshots.
    pub fn read_key_attributes(
        &self,
        object: ObjectHandle,
        class: ObjectClass,
    ) -> HResult<Option<KeyAttributes>> {
        let raw = self.checked_raw(object)?;
        let attributes = match class {
            ObjectClass::Other => return Ok(None),
            ObjectClass::PublicKey => {
                let v = self
                    .api()
                    .get_attributes(self.session_handle(), raw, &PUBLIC_KEY_TEMPLATE)?;
                KeyAttributes::PublicKey(PublicKeyAttributes {
                    id: attr_bytes(&v, 0).unwrap_or_default(),
                    algorithm: key_algorithm(attr_ulong(&v, 1)),
                    mechanism: key_gen_mechanism(attr_ulong(&v, 2)),
                    local: attr_bool(&v, 3),
                    derive: attr_bool(&v, 4),
                    encrypt: attr_bool(&v, 5),
                    verify: attr_bool(&v, 6),
                    wrap: attr_bool(&v, 7),
                })
            }
            ObjectClass::PrivateKey => {
                let v = self
                    .api()
                    .get_attributes(self.session_handle(), raw, &PRIVATE_KEY_TEMPLATE)?;
                KeyAttributes::PrivateKey(PrivateKeyAttributes {
                    id: attr_bytes(&v, 0).unwrap_or_default(),
                    algorithm: key_algorithm(attr_ulong(&v, 1)),
                    mechanism: key_gen_mechanism(attr_ulong(&v, 2)),
                    local: attr_bool(&v, 3),
                    sensitive: attr_bool(&v, 4),
                    extractable: attr_bool(&v, 5),
                    derive: attr_bool(&v, 6),
                    decrypt: attr_bool(&v, 7),
                    sign: attr_bool(&v, 8),
                    sign_recover: attr_bool(&v, 9),
                    unwrap: attr_bool(&v, 10),
                })
            }
            ObjectClass::SecretKey => {
                let v = self
                    .api()
                    .get_attributes(self.session_handle(), raw, &SECRET_KEY_TEMPLATE)?;
                KeyAttributes::SecretKey(SecretKeyAttributes {
                    id: attr_bytes(&v, 0).unwrap_or_default(),
                    algorithm: key_algorithm(attr_ulong(&v, 1)),
                    mechanism: key_gen_mechanism(attr_ulong(&v, 2)),
                    local: attr_bool(&v, 3),
                    sensitive: attr_bool(&v, 4),
                    extractable: attr_bool(&v, 5),
                    derive: attr_bool(&v, 6),
                    encrypt: attr_bool(&v, 7),
                    decrypt: attr_bool(&v, 8),
                    sign: attr_bool(&v, 9),
                    verify: attr_bool(&v, 10),
                    wrap: attr_bool(&v, 11),
                    unwrap: attr_bool(&v, 12),
                })
            }
        };
        Ok(Some(attributes))
    }

    /// Export the raw key material of an object, if policy allows it.
    ///
    /// The exportability check runs on the attribute snapshot before any
    /// value attribute is requested, so a refused export never moves key
    /// bytes out of the token. Objects without key material and keys of an
    /// algorithm this layer cannot represent fail `UnsupportedAlgorithm`.
    pub fn export_key(&self, object: ObjectHandle) -> HResult<KeyMaterial> {
        let descriptor = self.describe(object)?;
        let Some(attributes) = self.read_key_attributes(object, descriptor.class)? else {
            return Err(TokenError::UnsupportedAlgorithm(format!(
                "object {object} of class {} holds no key material",
                descriptor.class
            ))
            .into());
        };
        attributes.ensure_exportable()?;
        debug!(
            "Exporting key material of object {object} ({} {})",
            descriptor.class,
            attributes.algorithm()
        );
        let raw = self.checked_raw(object)?;
        match (descriptor.class, attributes.algorithm()) {
            (ObjectClass::PublicKey, KeyAlgorithm::Rsa) => Ok(KeyMaterial::RsaPublicKey(
                self.read_rsa_public_material(raw)?,
            )),
            (ObjectClass::PrivateKey, KeyAlgorithm::Rsa) => Ok(KeyMaterial::RsaPrivateKey(
                self.read_rsa_private_material(raw)?,
            )),
            (ObjectClass::SecretKey, KeyAlgorithm::Aes) => {
                Ok(KeyMaterial::AesKey(self.read_aes_material(raw)?))
            }
            (_, algorithm) => Err(TokenError::UnsupportedAlgorithm(algorithm.to_string()).into()),
        }
    }

    fn read_rsa_public_material(&self, raw: CK_OBJECT_HANDLE) -> HResult<RsaPublicKeyMaterial> {
        let v = self.api().get_attributes(
            self.session_handle(),
            raw,
            &RSA_PUBLIC_MATERIAL_TEMPLATE,
        )?;
        Ok(RsaPublicKeyMaterial {
            modulus: required_bytes(&v, 0, "modulus")?,
            public_exponent: required_bytes(&v, 1, "public exponent")?,
        })
    }

    fn read_rsa_private_material(&self, raw: CK_OBJECT_HANDLE) -> HResult<RsaPrivateKeyMaterial> {
        let v = self.api().get_attributes(
            self.session_handle(),
            raw,
            &RSA_PRIVATE_MATERIAL_TEMPLATE,
        )?;
        Ok(RsaPrivateKeyMaterial {
            modulus: required_bytes(&v, 0, "modulus")?,
            public_exponent: required_bytes(&v, 1, "public exponent")?,
            private_exponent: Zeroizing::new(required_bytes(&v, 2, "private exponent")?),
            prime_1: Zeroizing::new(required_bytes(&v, 3, "prime 1")?),
            prime_2: Zeroizing::new(required_bytes(&v, 4, "prime 2")?),
            exponent_1: Zeroizing::new(required_bytes(&v, 5, "exponent 1")?),
            exponent_2: Zeroizing::new(required_bytes(&v, 6, "exponent 2")?),
            coefficient: Zeroizing::new(required_bytes(&v, 7, "coefficient")?),
        })
    }

    fn read_aes_material(&self, raw: CK_OBJECT_HANDLE) -> HResult<Zeroizing<Vec<u8>>> {
        let v = self
            .api()
            .get_attributes(self.session_handle(), raw, &[CKA_VALUE])?;
        Ok(Zeroizing::new(required_bytes(&v, 0, "key value")?))
    }
}
