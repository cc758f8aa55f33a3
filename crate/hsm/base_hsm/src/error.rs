use cryptoki_sys::{
    CK_RV, CKR_ATTRIBUTE_SENSITIVE, CKR_ATTRIBUTE_TYPE_INVALID, CKR_PIN_EXPIRED,
    CKR_PIN_INCORRECT, CKR_PIN_LOCKED, CKR_SESSION_CLOSED, CKR_SESSION_COUNT,
    CKR_SESSION_HANDLE_INVALID,
};
use keyview_interfaces::TokenError;
use thiserror::Error;

pub type HResult<T> = Result<T, HError>;

#[derive(Error, Debug)]
pub enum HError {
    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Error loading the PKCS#11 library: {0}")]
    LibLoading(#[from] libloading::Error),

    #[error(transparent)]
    TryFromIntError(#[from] std::num::TryFromIntError),

    #[error("{0}")]
    Default(String),
}

impl HError {
    /// The typed token error, when this wraps one.
    #[must_use]
    pub const fn token_error(&self) -> Option<&TokenError> {
        match self {
            Self::Token(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HError> for TokenError {
    fn from(e: HError) -> Self {
        match e {
            HError::Token(e) => e,
            e => Self::Default(e.to_string()),
        }
    }
}

/// Map a PKCS#11 return value to the typed taxonomy.
///
/// `CKR_SLOT_ID_INVALID`, `CKR_TOKEN_NOT_PRESENT` and
/// `CKR_OBJECT_HANDLE_INVALID` are handled at the call sites that know which
/// slot or object was involved; everything unmapped lands in
/// [`TokenError::Pkcs11`] with the call context and the raw code.
pub fn rv_error(rv: CK_RV, context: &str) -> HError {
    match rv {
        CKR_SESSION_HANDLE_INVALID | CKR_SESSION_CLOSED => TokenError::SessionClosed.into(),
        CKR_SESSION_COUNT => TokenError::SessionLimitExceeded.into(),
        CKR_PIN_INCORRECT | CKR_PIN_EXPIRED | CKR_PIN_LOCKED => {
            TokenError::AuthFailed(format!("{context} (CKR {rv:#06x})")).into()
        }
        CKR_ATTRIBUTE_SENSITIVE => TokenError::AttributeSensitive.into(),
        CKR_ATTRIBUTE_TYPE_INVALID => TokenError::AttributeTypeInvalid.into(),
        rv => TokenError::Pkcs11(format!("{context} (CKR {rv:#06x})")).into(),
    }
}
