#![allow(clippy::panic_in_result_fn)]
#![allow(clippy::unwrap_used)]

use std::{collections::HashMap, sync::Arc};

use keyview_interfaces::{KeyAlgorithm, KeyAttributes, KeyGenMechanism, KeyMaterial, ObjectClass, TokenError};
use keyview_logger::log_init;

use crate::{
    HError, HResult, ObjectFilter, TokenClient,
    soft_token::SoftToken,
    test_helpers::{test_rsa_modulus, test_rsa_private_key_material, test_rsa_public_exponent},
};

const SLOT: usize = 4;
const EMPTY_SLOT: usize = 5;
const PIN: &str = "12345678";

const RSA_PUB_LABEL: &str = "rsa-pub";
const RSA_PRIV_LABEL: &str = "rsa-priv";
const AES_LABEL: &str = "aes-locked";
const DATA_LABEL: &str = "metadata";

fn populated_token() -> HResult<Arc<SoftToken>> {
    let token = Arc::new(SoftToken::new());
    token.add_slot(SLOT, Some(PIN))?;
    token.add_slot(EMPTY_SLOT, None)?;
    token.add_rsa_public_key(
        SLOT,
        RSA_PUB_LABEL,
        &test_rsa_modulus()?,
        &test_rsa_public_exponent(),
    )?;
    token.add_rsa_private_key(
        SLOT,
        RSA_PRIV_LABEL,
        &test_rsa_private_key_material()?,
        false,
        true,
    )?;
    token.add_aes_key(SLOT, AES_LABEL, &[0x42_u8; 32], false, false)?;
    token.add_data_object(SLOT, DATA_LABEL)?;
    Ok(token)
}

fn client(token: Arc<SoftToken>) -> TokenClient {
    TokenClient::with_api(
        token,
        HashMap::from([
            (SLOT, Some(PIN.to_owned())),
            (EMPTY_SLOT, None),
        ]),
    )
}

#[test]
fn library_info() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let info = client.get_info()?;
    assert_eq!(info.cryptoki_version, (2, 40));
    assert!(info.to_string().contains("keyview"));
    Ok(())
}

#[test]
fn unknown_slot_is_token_not_found() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let err = client.get_slot(99).unwrap_err();
    assert!(matches!(
        err.token_error(),
        Some(TokenError::TokenNotFound(99))
    ));
    Ok(())
}

#[test]
fn wrong_pin_is_auth_failed() -> HResult<()> {
    log_init("info");
    let token = populated_token()?;
    let client = TokenClient::with_api(token, HashMap::from([(SLOT, Some("badpin".to_owned()))]));
    let err = client.get_slot(SLOT).unwrap_err();
    assert!(matches!(
        err.token_error(),
        Some(TokenError::AuthFailed(_))
    ));
    Ok(())
}

#[test]
fn failed_login_does_not_leak_the_session() -> HResult<()> {
    log_init("info");
    let token = Arc::new(SoftToken::with_session_limit(1));
    token.add_slot(SLOT, Some(PIN))?;
    let bad = TokenClient::with_api(
        token.clone(),
        HashMap::from([(SLOT, Some("badpin".to_owned()))]),
    );
    assert!(bad.get_slot(SLOT).is_err());
    // the single session slot must be free again
    let good = TokenClient::with_api(token, HashMap::from([(SLOT, Some(PIN.to_owned()))]));
    good.get_slot(SLOT)?;
    Ok(())
}

#[test]
fn session_limit_is_surfaced() -> HResult<()> {
    log_init("info");
    let token = Arc::new(SoftToken::with_session_limit(1));
    token.add_slot(SLOT, Some(PIN))?;
    let client = TokenClient::with_api(token, HashMap::from([(SLOT, Some(PIN.to_owned()))]));
    // the login session takes the only slot
    let slot = client.get_slot(SLOT)?;
    let err = slot.open_session(false).unwrap_err();
    assert!(matches!(
        err.token_error(),
        Some(TokenError::SessionLimitExceeded)
    ));
    Ok(())
}

#[test]
fn enumeration_and_filters() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let session = client.get_slot(SLOT)?.open_session(false)?;

    assert_eq!(session.list_objects(ObjectFilter::Any)?.len(), 4);
    assert_eq!(session.list_objects(ObjectFilter::PublicKeys)?.len(), 1);
    assert_eq!(session.list_objects(ObjectFilter::PrivateKeys)?.len(), 1);
    assert_eq!(session.list_objects(ObjectFilter::SecretKeys)?.len(), 1);
    Ok(())
}

#[test]
fn empty_enumeration_is_not_an_error() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let session = client.get_slot(EMPTY_SLOT)?.open_session(false)?;
    assert!(session.list_objects(ObjectFilter::Any)?.is_empty());
    Ok(())
}

#[test]
fn classification_covers_every_object() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let session = client.get_slot(SLOT)?.open_session(false)?;

    let mut classes = Vec::new();
    for handle in session.list_objects(ObjectFilter::Any)? {
        let descriptor = session.describe(handle)?;
        classes.push((descriptor.label.clone(), descriptor.class));
        assert_eq!(descriptor.handle, handle);
        assert_eq!(descriptor.token, Some(true));
    }
    classes.sort();
    assert_eq!(
        classes,
        vec![
            (AES_LABEL.to_owned(), ObjectClass::SecretKey),
            (DATA_LABEL.to_owned(), ObjectClass::Other),
            (RSA_PRIV_LABEL.to_owned(), ObjectClass::PrivateKey),
            (RSA_PUB_LABEL.to_owned(), ObjectClass::PublicKey),
        ]
    );
    Ok(())
}

#[test]
fn vanished_object_does_not_abort_the_batch() -> HResult<()> {
    log_init("info");
    let token = populated_token()?;
    let client = client(token.clone());
    let session = client.get_slot(SLOT)?.open_session(false)?;

    let handles = session.list_objects(ObjectFilter::Any)?;
    let doomed = session.get_object_handle(AES_LABEL)?;
    token.remove_object(SLOT, doomed.raw())?;

    let reports = session.describe_objects(&handles)?;
    assert_eq!(reports.len(), handles.len());
    let vanished: Vec<_> = reports
        .iter()
        .filter(|(_, r)| matches!(r, Err(TokenError::ObjectVanished(_))))
        .collect();
    assert_eq!(vanished.len(), 1);
    assert_eq!(vanished[0].0, doomed);
    let described = reports.iter().filter(|(_, r)| r.is_ok()).count();
    assert_eq!(described, handles.len() - 1);
    Ok(())
}

#[test]
fn key_attribute_reads_are_idempotent() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let session = client.get_slot(SLOT)?.open_session(false)?;

    let handle = session.get_object_handle(RSA_PRIV_LABEL)?;
    let first = session
        .read_key_attributes(handle, ObjectClass::PrivateKey)?
        .unwrap();
    let second = session
        .read_key_attributes(handle, ObjectClass::PrivateKey)?
        .unwrap();
    assert_eq!(first, second);

    let KeyAttributes::PrivateKey(attrs) = first else {
        panic!("expected private key attributes");
    };
    assert_eq!(attrs.id, RSA_PRIV_LABEL.as_bytes());
    assert_eq!(attrs.algorithm, KeyAlgorithm::Rsa);
    assert_eq!(attrs.mechanism, KeyGenMechanism::RsaPkcsKeyPairGen);
    assert_eq!(attrs.sensitive, Some(false));
    assert_eq!(attrs.extractable, Some(true));
    assert_eq!(attrs.sign, Some(true));
    Ok(())
}

#[test]
fn non_key_objects_have_no_key_attributes() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let session = client.get_slot(SLOT)?.open_session(false)?;
    let handle = session.get_object_handle(DATA_LABEL)?;
    assert!(
        session
            .read_key_attributes(handle, ObjectClass::Other)?
            .is_none()
    );
    Ok(())
}

#[test]
fn export_rsa_public_key_material() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let session = client.get_slot(SLOT)?.open_session(false)?;
    let handle = session.get_object_handle(RSA_PUB_LABEL)?;
    let KeyMaterial::RsaPublicKey(material) = session.export_key(handle)? else {
        panic!("expected RSA public key material");
    };
    assert_eq!(material.modulus, test_rsa_modulus()?);
    assert_eq!(material.public_exponent, test_rsa_public_exponent());
    Ok(())
}

#[test]
fn export_extractable_rsa_private_key_material() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let session = client.get_slot(SLOT)?.open_session(false)?;
    let handle = session.get_object_handle(RSA_PRIV_LABEL)?;
    let KeyMaterial::RsaPrivateKey(material) = session.export_key(handle)? else {
        panic!("expected RSA private key material");
    };
    let reference = test_rsa_private_key_material()?;
    assert_eq!(material.modulus, reference.modulus);
    assert_eq!(material.private_exponent, reference.private_exponent);
    assert_eq!(material.prime_1, reference.prime_1);
    assert_eq!(material.coefficient, reference.coefficient);
    Ok(())
}

#[test]
fn non_extractable_private_key_is_refused_before_any_read() -> HResult<()> {
    log_init("info");
    let token = populated_token()?;
    token.add_rsa_private_key(
        SLOT,
        "rsa-locked",
        &test_rsa_private_key_material()?,
        false,
        false,
    )?;
    let client = client(token);
    let session = client.get_slot(SLOT)?.open_session(false)?;
    let handle = session.get_object_handle("rsa-locked")?;
    let err = session.export_key(handle).unwrap_err();
    assert!(matches!(
        err.token_error(),
        Some(TokenError::NotExtractable)
    ));
    Ok(())
}

#[test]
fn sensitive_private_key_is_refused() -> HResult<()> {
    log_init("info");
    let token = populated_token()?;
    token.add_rsa_private_key(
        SLOT,
        "rsa-sensitive",
        &test_rsa_private_key_material()?,
        true,
        true,
    )?;
    let client = client(token);
    let session = client.get_slot(SLOT)?.open_session(false)?;
    let handle = session.get_object_handle("rsa-sensitive")?;
    let err = session.export_key(handle).unwrap_err();
    assert!(matches!(
        err.token_error(),
        Some(TokenError::AttributeSensitive)
    ));
    Ok(())
}

#[test]
fn non_extractable_secret_key_is_refused() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let session = client.get_slot(SLOT)?.open_session(false)?;
    let handle = session.get_object_handle(AES_LABEL)?;
    let err = session.export_key(handle).unwrap_err();
    assert!(matches!(
        err.token_error(),
        Some(TokenError::NotExtractable)
    ));
    Ok(())
}

#[test]
fn extractable_secret_key_exports_its_value() -> HResult<()> {
    log_init("info");
    let token = populated_token()?;
    token.add_aes_key(SLOT, "aes-open", &[0x17_u8; 32], false, true)?;
    let client = client(token);
    let session = client.get_slot(SLOT)?.open_session(false)?;
    let handle = session.get_object_handle("aes-open")?;
    let KeyMaterial::AesKey(value) = session.export_key(handle)? else {
        panic!("expected AES key material");
    };
    assert_eq!(value.as_slice(), &[0x17_u8; 32]);
    Ok(())
}

#[test]
fn data_objects_cannot_be_exported() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let session = client.get_slot(SLOT)?.open_session(false)?;
    let handle = session.get_object_handle(DATA_LABEL)?;
    let err = session.export_key(handle).unwrap_err();
    assert!(matches!(
        err.token_error(),
        Some(TokenError::UnsupportedAlgorithm(_))
    ));
    Ok(())
}

#[test]
fn use_after_close_is_session_closed() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let session = client.get_slot(SLOT)?.open_session(false)?;
    let handle = session.get_object_handle(RSA_PUB_LABEL)?;

    session.close()?;
    // closing twice is a no-op
    session.close()?;

    let err = session.list_objects(ObjectFilter::Any).unwrap_err();
    assert!(matches!(err.token_error(), Some(TokenError::SessionClosed)));
    let err = session.describe(handle).unwrap_err();
    assert!(matches!(err.token_error(), Some(TokenError::SessionClosed)));
    let err = session.export_key(handle).unwrap_err();
    assert!(matches!(err.token_error(), Some(TokenError::SessionClosed)));
    Ok(())
}

#[test]
fn handles_are_bound_to_their_session() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let slot = client.get_slot(SLOT)?;
    let session_a = slot.open_session(false)?;
    let session_b = slot.open_session(false)?;

    let handle = session_a.get_object_handle(RSA_PUB_LABEL)?;
    let err = session_b.describe(handle).unwrap_err();
    assert!(matches!(err.token_error(), Some(TokenError::SessionClosed)));
    Ok(())
}

#[test]
fn label_lookup_uses_the_cache() -> HResult<()> {
    log_init("info");
    let token = populated_token()?;
    let client = client(token.clone());
    let session = client.get_slot(SLOT)?.open_session(false)?;

    let first = session.get_object_handle(RSA_PUB_LABEL)?;
    // even with the object gone, the cached handle is returned as-is
    token.remove_object(SLOT, first.raw())?;
    let second = session.get_object_handle(RSA_PUB_LABEL)?;
    assert_eq!(first, second);

    session.delete_object_handle(RSA_PUB_LABEL)?;
    let err = session.get_object_handle(RSA_PUB_LABEL).unwrap_err();
    assert!(matches!(err.token_error(), Some(TokenError::Default(_))));
    Ok(())
}

#[test]
fn unknown_label_is_an_error() -> HResult<()> {
    log_init("info");
    let client = client(populated_token()?);
    let session = client.get_slot(SLOT)?.open_session(false)?;
    let err = session.get_object_handle("no-such-object").unwrap_err();
    assert!(matches!(err, HError::Token(TokenError::Default(_))));
    Ok(())
}
