//! Shared object model and error taxonomy for the keyview PKCS#11 client.
//!
//! This crate has no FFI dependencies so that pure consumers (encoders,
//! front-ends, tests) can use the types without linking a token backend.

mod error;
mod object;

pub use error::{TokenError, TokenResult};
pub use object::{
    KeyAlgorithm, KeyAttributes, KeyGenMechanism, KeyMaterial, ObjectClass, ObjectDescriptor,
    ObjectHandle, PrivateKeyAttributes, PublicKeyAttributes, RsaPrivateKeyMaterial,
    RsaPublicKeyMaterial, SecretKeyAttributes,
};
