use thiserror::Error;

pub type TokenResult<T> = Result<T, TokenError>;

/// The error taxonomy shared by every layer of the keyview workspace.
///
/// Variants are typed so callers can react to the cases that matter
/// (re-authentication, re-enumeration, skipping an object) without parsing
/// messages. Unmapped PKCS#11 return values fall through to [`Self::Pkcs11`].
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("{0}")]
    Default(String),

    #[error("no token present in slot {0}")]
    TokenNotFound(usize),

    #[error("token authentication failed: {0}")]
    AuthFailed(String),

    #[error("the token cannot open any more sessions")]
    SessionLimitExceeded,

    #[error("the session is closed")]
    SessionClosed,

    #[error("object {0} no longer exists on the token")]
    ObjectVanished(u64),

    #[error("the attribute is sensitive and cannot be revealed")]
    AttributeSensitive,

    #[error("the attribute does not apply to this object")]
    AttributeTypeInvalid,

    #[error("the key is not extractable")]
    NotExtractable,

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("malformed attributes: {0}")]
    MalformedAttributes(String),

    #[error("encoding error: {0}")]
    EncodingError(String),

    #[error("failed writing the key to the sink: {0}")]
    SinkWrite(#[from] std::io::Error),

    #[error("PKCS#11 error: {0}")]
    Pkcs11(String),
}
