//! PKCS#11 session, object enumeration and attribute access layer.
//!
//! The crate is organized around the [`TokenApi`] backend trait:
//! [`HsmLib`] implements it over a dynamically loaded PKCS#11 library,
//! [`soft_token::SoftToken`] implements it in memory for tests. On top of
//! the trait sit [`TokenClient`] (configured slots), [`SlotManager`]
//! (per-slot login session and handle cache) and [`Session`] (object
//! enumeration, attribute reading, classification and key-material export
//! under the sensitive/extractable policy).

mod client;
mod error;
mod hsm_lib;
mod session;
mod slots;
pub mod soft_token;
pub mod test_helpers;
mod token_api;

pub use client::TokenClient;
pub use error::{HError, HResult};
pub use hsm_lib::HsmLib;
pub use session::{ObjectFilter, Session};
pub use slots::{ObjectHandlesCache, SlotManager};
pub use token_api::{AttrValue, LibraryInfo, TokenApi, ck_ulong_bytes};

#[cfg(test)]
mod tests;

/// A macro is used here to ensure inline expansion due to mutable pointer parameters
#[macro_export]
macro_rules! hsm_call {
    ($lib:expr, $msg:expr, $func:ident $(, $arg:expr)*) => {{
        let rv = match $lib.$func {
            Some(func) => unsafe { func($($arg),*) },
            None => {
                return Err($crate::HError::Default(
                    concat!(stringify!($func), " not available on library").to_owned(),
                ));
            }
        };
        if rv != cryptoki_sys::CKR_OK {
            return Err($crate::error::rv_error(rv, $msg));
        }
    }};
}
