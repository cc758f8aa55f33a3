//! DER serialization of RSA key material.
//!
//! Public keys serialize to an RFC 5280 `SubjectPublicKeyInfo` wrapping the
//! PKCS#1 `RSAPublicKey`; private keys serialize to PKCS#1
//! `RSAPrivateKey`, optionally wrapped in a PKCS#8 `PrivateKeyInfo`. CKA
//! big-endian values may carry leading zero octets; ASN.1 INTEGERs must
//! not, so every component is trimmed before encoding.

use der::{
    Any, AnyRef, Encode,
    asn1::{BitString, ObjectIdentifier, UintRef},
};
use keyview_interfaces::{
    KeyAlgorithm, KeyAttributes, KeyMaterial, ObjectClass, RsaPrivateKeyMaterial,
    RsaPublicKeyMaterial, TokenError, TokenResult,
};
use pkcs8::{PrivateKeyInfo, spki::AlgorithmIdentifierRef};
use x509_cert::spki::{AlgorithmIdentifierOwned, SubjectPublicKeyInfoOwned};
use zeroize::Zeroizing;

const RSA_ENCRYPTION_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

/// The serialization of a private key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEncoding {
    /// `SubjectPublicKeyInfo`; for a private key, the public half.
    PublicKey,
    /// PKCS#1 `RSAPrivateKey`.
    PrivateKeyPkcs1,
    /// PKCS#8 `PrivateKeyInfo` wrapping the PKCS#1 structure.
    PrivateKeyPkcs8,
}

impl KeyEncoding {
    /// The RFC 7468 PEM type label for this encoding.
    #[must_use]
    pub const fn pem_label(self) -> &'static str {
        match self {
            Self::PublicKey => "PUBLIC KEY",
            Self::PrivateKeyPkcs1 => "RSA PRIVATE KEY",
            Self::PrivateKeyPkcs8 => "PRIVATE KEY",
        }
    }
}

/// Key material that passed the export policy, ready to serialize.
#[derive(Debug)]
pub enum ExportableKey {
    RsaPublic(RsaPublicKeyMaterial),
    RsaPrivate(RsaPrivateKeyMaterial),
}

/// Check the export policy and pair the attributes with the material.
///
/// The sensitive/extractable policy is checked again here so a caller
/// holding key material from elsewhere cannot bypass it. The material must
/// match the class the attributes announce.
pub fn build_exportable(
    attributes: &KeyAttributes,
    material: KeyMaterial,
) -> TokenResult<ExportableKey> {
    attributes.ensure_exportable()?;
    if attributes.algorithm() != KeyAlgorithm::Rsa {
        return Err(TokenError::UnsupportedAlgorithm(
            attributes.algorithm().to_string(),
        ));
    }
    match (attributes.class(), material) {
        (ObjectClass::PublicKey, KeyMaterial::RsaPublicKey(m)) => Ok(ExportableKey::RsaPublic(m)),
        (ObjectClass::PrivateKey, KeyMaterial::RsaPrivateKey(m)) => {
            Ok(ExportableKey::RsaPrivate(m))
        }
        _ => Err(TokenError::MalformedAttributes(
            "key material does not match the object class".to_owned(),
        )),
    }
}

impl ExportableKey {
    /// Serialize to DER with the requested encoding.
    pub fn to_der(&self, encoding: KeyEncoding) -> TokenResult<Vec<u8>> {
        match (self, encoding) {
            (Self::RsaPublic(material), KeyEncoding::PublicKey) => {
                rsa_spki_der(&material.modulus, &material.public_exponent)
            }
            (Self::RsaPublic(_), _) => Err(TokenError::EncodingError(
                "a public key has no private key encoding".to_owned(),
            )),
            (Self::RsaPrivate(material), KeyEncoding::PublicKey) => {
                rsa_spki_der(&material.modulus, &material.public_exponent)
            }
            (Self::RsaPrivate(material), KeyEncoding::PrivateKeyPkcs1) => {
                Ok(rsa_pkcs1_private_der(material)?.to_vec())
            }
            (Self::RsaPrivate(material), KeyEncoding::PrivateKeyPkcs8) => {
                let pkcs1_der = rsa_pkcs1_private_der(material)?;
                let info = PrivateKeyInfo::new(
                    AlgorithmIdentifierRef {
                        oid: RSA_ENCRYPTION_OID,
                        parameters: Some(AnyRef::NULL),
                    },
                    &pkcs1_der,
                );
                info.to_der().map_err(der_err)
            }
        }
    }
}

fn der_err(e: der::Error) -> TokenError {
    TokenError::EncodingError(e.to_string())
}

/// Strip the leading zero octets of a big-endian unsigned value. An
/// all-zero value keeps a single zero octet.
fn trim_uint(bytes: &[u8]) -> &[u8] {
    match bytes.iter().position(|b| *b != 0) {
        Some(start) => &bytes[start..],
        None => &bytes[bytes.len().saturating_sub(1)..],
    }
}

fn rsa_pkcs1_public_der(modulus: &[u8], public_exponent: &[u8]) -> TokenResult<Vec<u8>> {
    pkcs1::RsaPublicKey {
        modulus: UintRef::new(trim_uint(modulus)).map_err(der_err)?,
        public_exponent: UintRef::new(trim_uint(public_exponent)).map_err(der_err)?,
    }
    .to_der()
    .map_err(der_err)
}

fn rsa_spki_der(modulus: &[u8], public_exponent: &[u8]) -> TokenResult<Vec<u8>> {
    let pkcs1_der = rsa_pkcs1_public_der(modulus, public_exponent)?;
    SubjectPublicKeyInfoOwned {
        algorithm: AlgorithmIdentifierOwned {
            oid: RSA_ENCRYPTION_OID,
            parameters: Some(Any::from(AnyRef::NULL)),
        },
        subject_public_key: BitString::from_bytes(&pkcs1_der).map_err(der_err)?,
    }
    .to_der()
    .map_err(der_err)
}

fn rsa_pkcs1_private_der(material: &RsaPrivateKeyMaterial) -> TokenResult<Zeroizing<Vec<u8>>> {
    let der = pkcs1::RsaPrivateKey {
        modulus: UintRef::new(trim_uint(&material.modulus)).map_err(der_err)?,
        public_exponent: UintRef::new(trim_uint(&material.public_exponent)).map_err(der_err)?,
        private_exponent: UintRef::new(trim_uint(&material.private_exponent)).map_err(der_err)?,
        prime1: UintRef::new(trim_uint(&material.prime_1)).map_err(der_err)?,
        prime2: UintRef::new(trim_uint(&material.prime_2)).map_err(der_err)?,
        exponent1: UintRef::new(trim_uint(&material.exponent_1)).map_err(der_err)?,
        exponent2: UintRef::new(trim_uint(&material.exponent_2)).map_err(der_err)?,
        coefficient: UintRef::new(trim_uint(&material.coefficient)).map_err(der_err)?,
        other_prime_infos: None,
    }
    .to_der()
    .map_err(der_err)?;
    Ok(Zeroizing::new(der))
}

#[cfg(test)]
mod tests {
    use keyview_interfaces::{
        KeyAlgorithm, KeyGenMechanism, PublicKeyAttributes, SecretKeyAttributes,
    };
    use zeroize::Zeroizing;

    use super::*;

    fn public_attrs() -> KeyAttributes {
        KeyAttributes::PublicKey(PublicKeyAttributes {
            id: b"pub".to_vec(),
            algorithm: KeyAlgorithm::Rsa,
            mechanism: KeyGenMechanism::RsaPkcsKeyPairGen,
            local: Some(true),
            derive: None,
            encrypt: Some(true),
            verify: Some(true),
            wrap: None,
        })
    }

    #[test]
    fn leading_zeros_are_trimmed() {
        assert_eq!(trim_uint(&[0x00, 0x00, 0x8e, 0x01]), &[0x8e, 0x01]);
        assert_eq!(trim_uint(&[0x8e, 0x00]), &[0x8e, 0x00]);
        assert_eq!(trim_uint(&[0x00, 0x00]), &[0x00]);
        assert!(trim_uint(&[]).is_empty());
    }

    #[test]
    fn pem_labels() {
        assert_eq!(KeyEncoding::PublicKey.pem_label(), "PUBLIC KEY");
        assert_eq!(KeyEncoding::PrivateKeyPkcs1.pem_label(), "RSA PRIVATE KEY");
        assert_eq!(KeyEncoding::PrivateKeyPkcs8.pem_label(), "PRIVATE KEY");
    }

    #[test]
    fn mismatched_material_is_refused() {
        let err = build_exportable(
            &public_attrs(),
            KeyMaterial::RsaPrivateKey(RsaPrivateKeyMaterial {
                modulus: vec![0x8e],
                public_exponent: vec![0x01, 0x00, 0x01],
                private_exponent: Zeroizing::new(vec![0x01]),
                prime_1: Zeroizing::new(vec![0x03]),
                prime_2: Zeroizing::new(vec![0x05]),
                exponent_1: Zeroizing::new(vec![0x01]),
                exponent_2: Zeroizing::new(vec![0x01]),
                coefficient: Zeroizing::new(vec![0x02]),
            }),
        )
        .unwrap_err();
        assert!(matches!(err, TokenError::MalformedAttributes(_)));
    }

    #[test]
    fn aes_material_is_unsupported() {
        let attrs = KeyAttributes::SecretKey(SecretKeyAttributes {
            id: b"aes".to_vec(),
            algorithm: KeyAlgorithm::Aes,
            mechanism: KeyGenMechanism::AesKeyGen,
            local: Some(true),
            sensitive: Some(false),
            extractable: Some(true),
            derive: None,
            encrypt: Some(true),
            decrypt: Some(true),
            sign: None,
            verify: None,
            wrap: None,
            unwrap: None,
        });
        let err = build_exportable(&attrs, KeyMaterial::AesKey(Zeroizing::new(vec![0x42; 32])))
            .unwrap_err();
        assert!(matches!(err, TokenError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn public_keys_have_no_private_encoding() {
        let key = ExportableKey::RsaPublic(RsaPublicKeyMaterial {
            modulus: vec![0x8e, 0x01],
            public_exponent: vec![0x01, 0x00, 0x01],
        });
        let err = key.to_der(KeyEncoding::PrivateKeyPkcs1).unwrap_err();
        assert!(matches!(err, TokenError::EncodingError(_)));
        let err = key.to_der(KeyEncoding::PrivateKeyPkcs8).unwrap_err();
        assert!(matches!(err, TokenError::EncodingError(_)));
    }
}
