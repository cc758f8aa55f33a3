#![allow(non_snake_case)]

use std::{ffi::CStr, ptr};

use cryptoki_sys::*;
use keyview_interfaces::TokenError;
use libloading::Library;
use tracing::{debug, trace, warn};

use crate::{
    HError, HResult,
    error::rv_error,
    hsm_call,
    token_api::{AttrValue, LibraryInfo, TokenApi},
};

/// How many handles `C_FindObjects` is asked for per round trip.
const FIND_OBJECTS_CHUNK: usize = 64;

/// A dynamically loaded PKCS#11 library.
///
/// The needed `C_*` entry points are resolved once into an
/// optional-function table; `C_Initialize` runs on construction and
/// `C_Finalize` on drop. The wrapper keeps the [`Library`] alive for as
/// long as any function pointer may be called.
///
/// All FFI happens behind the [`TokenApi`] implementation; callers never
/// touch the raw function pointers.
pub struct HsmLib {
    _library: Library,
    pub(crate) C_Initialize: CK_C_Initialize,
    pub(crate) C_Finalize: CK_C_Finalize,

    pub(crate) C_GetInfo: CK_C_GetInfo,

    pub(crate) C_OpenSession: CK_C_OpenSession,
    pub(crate) C_CloseSession: CK_C_CloseSession,
    pub(crate) C_Login: CK_C_Login,
    pub(crate) C_Logout: CK_C_Logout,

    pub(crate) C_FindObjectsInit: CK_C_FindObjectsInit,
    pub(crate) C_FindObjects: CK_C_FindObjects,
    pub(crate) C_FindObjectsFinal: CK_C_FindObjectsFinal,

    pub(crate) C_GetAttributeValue: CK_C_GetAttributeValue,
}

impl HsmLib {
    pub fn instantiate<P>(path: P) -> HResult<Self>
    where
        P: AsRef<std::ffi::OsStr>,
    {
        unsafe {
            let library = Library::new(path)?;
            let hsm_lib = Self {
                C_Initialize: Some(*library.get(b"C_Initialize")?),
                C_Finalize: Some(*library.get(b"C_Finalize")?),
                C_GetInfo: Some(*library.get(b"C_GetInfo")?),
                C_OpenSession: Some(*library.get(b"C_OpenSession")?),
                C_CloseSession: Some(*library.get(b"C_CloseSession")?),
                C_Login: Some(*library.get(b"C_Login")?),
                C_Logout: Some(*library.get(b"C_Logout")?),
                C_FindObjectsInit: Some(*library.get(b"C_FindObjectsInit")?),
                C_FindObjects: Some(*library.get(b"C_FindObjects")?),
                C_FindObjectsFinal: Some(*library.get(b"C_FindObjectsFinal")?),
                C_GetAttributeValue: Some(*library.get(b"C_GetAttributeValue")?),
                // we need to keep the library alive
                _library: library,
            };
            Self::initialize(&hsm_lib)?;
            Ok(hsm_lib)
        }
    }

    fn initialize(hsm_lib: &Self) -> HResult<()> {
        let pInitArgs = CK_C_INITIALIZE_ARGS {
            CreateMutex: None,
            DestroyMutex: None,
            LockMutex: None,
            UnlockMutex: None,
            flags: CKF_OS_LOCKING_OK,
            pReserved: ptr::null_mut(),
        };
        let rv = match hsm_lib.C_Initialize {
            Some(func) => unsafe {
                func(&pInitArgs as *const CK_C_INITIALIZE_ARGS as CK_VOID_PTR)
            },
            None => {
                return Err(HError::Default(
                    "C_Initialize not available on library".to_owned(),
                ));
            }
        };
        if rv != CKR_OK {
            return Err(rv_error(rv, "Failed initializing the library"));
        }
        Ok(())
    }

    fn finalize(&self) -> HResult<()> {
        let rv = match self.C_Finalize {
            Some(func) => unsafe { func(ptr::null_mut()) },
            None => {
                return Err(HError::Default(
                    "C_Finalize not available on library".to_owned(),
                ));
            }
        };
        if rv != CKR_OK {
            return Err(rv_error(rv, "Failed finalizing the library"));
        }
        Ok(())
    }
}

impl Drop for HsmLib {
    fn drop(&mut self) {
        drop(self.finalize());
    }
}

impl TokenApi for HsmLib {
    fn info(&self) -> HResult<LibraryInfo> {
        let mut info: CK_INFO = unsafe { std::mem::zeroed() };
        let rv = match self.C_GetInfo {
            Some(func) => unsafe { func(&raw mut info) },
            None => {
                return Err(HError::Default(
                    "C_GetInfo not available on library".to_owned(),
                ));
            }
        };
        if rv != CKR_OK {
            return Err(rv_error(rv, "Failed getting the library info"));
        }
        Ok(LibraryInfo {
            cryptoki_version: (info.cryptokiVersion.major, info.cryptokiVersion.minor),
            manufacturer_id: CStr::from_bytes_until_nul(&info.manufacturerID)
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            flags: u64::from(info.flags),
            library_description: CStr::from_bytes_until_nul(&info.libraryDescription)
                .unwrap_or_default()
                .to_string_lossy()
                .to_string(),
            library_version: (info.libraryVersion.major, info.libraryVersion.minor),
        })
    }

    fn open_session(&self, slot_id: usize, read_write: bool) -> HResult<CK_SESSION_HANDLE> {
        let flags: CK_FLAGS = if read_write {
            CKF_RW_SESSION | CKF_SERIAL_SESSION
        } else {
            CKF_SERIAL_SESSION
        };
        let mut session_handle: CK_SESSION_HANDLE = 0;
        let rv = match self.C_OpenSession {
            Some(func) => unsafe {
                func(
                    slot_id as CK_SLOT_ID,
                    flags,
                    ptr::null_mut(),
                    None,
                    &raw mut session_handle,
                )
            },
            None => {
                return Err(HError::Default(
                    "C_OpenSession not available on library".to_owned(),
                ));
            }
        };
        match rv {
            CKR_OK => {
                debug!("Opened session {session_handle} on slot {slot_id}");
                Ok(session_handle)
            }
            CKR_SLOT_ID_INVALID | CKR_TOKEN_NOT_PRESENT => {
                Err(TokenError::TokenNotFound(slot_id).into())
            }
            rv => Err(rv_error(rv, "Failed opening a session")),
        }
    }

    fn close_session(&self, session: CK_SESSION_HANDLE) -> HResult<()> {
        hsm_call!(self, "Failed closing a session", C_CloseSession, session);
        Ok(())
    }

    fn login(&self, session: CK_SESSION_HANDLE, pin: &str) -> HResult<()> {
        let mut pin_bytes = pin.as_bytes().to_vec();
        let rv = match self.C_Login {
            Some(func) => unsafe {
                func(
                    session,
                    CKU_USER,
                    pin_bytes.as_mut_ptr() as CK_UTF8CHAR_PTR,
                    pin_bytes.len() as CK_ULONG,
                )
            },
            None => {
                return Err(HError::Default(
                    "C_Login not available on library".to_owned(),
                ));
            }
        };
        if rv == CKR_USER_ALREADY_LOGGED_IN {
            warn!("user already logged in, ignoring login");
            return Ok(());
        }
        if rv != CKR_OK {
            return Err(rv_error(rv, "Failed logging in"));
        }
        Ok(())
    }

    fn logout(&self, session: CK_SESSION_HANDLE) -> HResult<()> {
        hsm_call!(self, "Failed logging out", C_Logout, session);
        Ok(())
    }

    fn find_objects(
        &self,
        session: CK_SESSION_HANDLE,
        template: &[(CK_ATTRIBUTE_TYPE, Vec<u8>)],
    ) -> HResult<Vec<CK_OBJECT_HANDLE>> {
        let mut ck_template: Vec<CK_ATTRIBUTE> = Vec::with_capacity(template.len());
        for (attribute_type, value) in template {
            ck_template.push(CK_ATTRIBUTE {
                type_: *attribute_type,
                pValue: value.as_ptr().cast::<std::ffi::c_void>().cast_mut(),
                ulValueLen: CK_ULONG::try_from(value.len())?,
            });
        }

        let mut object_handles: Vec<CK_OBJECT_HANDLE> = Vec::new();
        hsm_call!(
            self,
            "Failed to initialize object search",
            C_FindObjectsInit,
            session,
            ck_template.as_mut_ptr(),
            CK_ULONG::try_from(ck_template.len())?
        );

        let mut handles_buf = vec![CK_OBJECT_HANDLE::default(); FIND_OBJECTS_CHUNK];
        let mut object_count: CK_ULONG = 0;
        loop {
            hsm_call!(
                self,
                "Failed to find objects",
                C_FindObjects,
                session,
                handles_buf.as_mut_ptr(),
                CK_ULONG::try_from(FIND_OBJECTS_CHUNK)?,
                &raw mut object_count
            );
            if object_count == 0 {
                break;
            }
            trace!("Found {object_count} objects");
            let returned = usize::try_from(object_count)?;
            object_handles.extend_from_slice(handles_buf.get(..returned).ok_or_else(|| {
                HError::Default("More objects returned than requested".to_owned())
            })?);
        }
        hsm_call!(
            self,
            "Failed to finalize object search",
            C_FindObjectsFinal,
            session
        );
        Ok(object_handles)
    }

    fn get_attributes(
        &self,
        session: CK_SESSION_HANDLE,
        object: CK_OBJECT_HANDLE,
        types: &[CK_ATTRIBUTE_TYPE],
    ) -> HResult<Vec<AttrValue>> {
        if types.is_empty() {
            return Ok(Vec::new());
        }
        let func = self.C_GetAttributeValue.ok_or_else(|| {
            HError::Default("C_GetAttributeValue not available on library".to_owned())
        })?;

        // First pass probes the lengths with null value pointers.
        let mut template: Vec<CK_ATTRIBUTE> = types
            .iter()
            .map(|attribute_type| CK_ATTRIBUTE {
                type_: *attribute_type,
                pValue: ptr::null_mut(),
                ulValueLen: 0,
            })
            .collect();
        let rv = unsafe {
            func(
                session,
                object,
                template.as_mut_ptr(),
                CK_ULONG::try_from(template.len())?,
            )
        };
        check_attribute_rv(rv, object)?;

        // Second pass fills buffers for the attributes the token sized.
        // Withheld attributes keep a null pointer and are skipped by the
        // token.
        let mut buffers: Vec<Option<Vec<u8>>> = Vec::with_capacity(template.len());
        for attribute in &template {
            if attribute.ulValueLen == CK_UNAVAILABLE_INFORMATION {
                buffers.push(None);
            } else {
                buffers.push(Some(vec![0_u8; usize::try_from(attribute.ulValueLen)?]));
            }
        }
        for (attribute, buffer) in template.iter_mut().zip(buffers.iter_mut()) {
            if let Some(buffer) = buffer {
                attribute.pValue = buffer.as_mut_ptr().cast::<std::ffi::c_void>();
            }
        }
        let rv = unsafe {
            func(
                session,
                object,
                template.as_mut_ptr(),
                CK_ULONG::try_from(template.len())?,
            )
        };
        check_attribute_rv(rv, object)?;

        // A single return value covers the whole template, so the status of
        // an individual withheld attribute is taken from it.
        let withheld = match rv {
            CKR_ATTRIBUTE_SENSITIVE => AttrValue::Sensitive,
            CKR_ATTRIBUTE_TYPE_INVALID => AttrValue::TypeInvalid,
            _ => AttrValue::Unavailable,
        };
        let mut values = Vec::with_capacity(template.len());
        for (attribute, buffer) in template.iter().zip(buffers.into_iter()) {
            match buffer {
                Some(mut bytes) if attribute.ulValueLen != CK_UNAVAILABLE_INFORMATION => {
                    bytes.truncate(usize::try_from(attribute.ulValueLen)?);
                    values.push(AttrValue::Bytes(bytes));
                }
                _ => values.push(withheld.clone()),
            }
        }
        Ok(values)
    }
}

/// Shared rv handling for both `C_GetAttributeValue` passes. Per-attribute
/// refusals are not errors at this level.
fn check_attribute_rv(rv: CK_RV, object: CK_OBJECT_HANDLE) -> HResult<()> {
    match rv {
        CKR_OK | CKR_ATTRIBUTE_SENSITIVE | CKR_ATTRIBUTE_TYPE_INVALID => Ok(()),
        CKR_OBJECT_HANDLE_INVALID => Err(TokenError::ObjectVanished(object as u64).into()),
        rv => Err(rv_error(rv, "Failed getting object attributes")),
    }
}
