//! Serialization of key material read from a PKCS#11 token.
//!
//! [`build_exportable`] pairs the attributes of a key object with the raw
//! material read from the token, re-checking the sensitive/extractable
//! policy; the result serializes to DER or RFC 7468 PEM and can be written
//! to any [`std::io::Write`] sink with [`write_key`].

use der::{Decode, Document, pem::LineEnding};
use keyview_interfaces::{TokenError, TokenResult};
use tracing::debug;

mod rsa;

pub use rsa::{ExportableKey, KeyEncoding, build_exportable};

/// The output framing of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// RFC 7468 PEM with LF line endings.
    Pem,
    /// Raw DER.
    Der,
}

/// Serialize a key to the requested format and encoding.
pub fn encode_key(
    key: &ExportableKey,
    format: ExportFormat,
    encoding: KeyEncoding,
) -> TokenResult<Vec<u8>> {
    let der = key.to_der(encoding)?;
    match format {
        ExportFormat::Der => Ok(der),
        ExportFormat::Pem => {
            let document = Document::from_der(&der)
                .map_err(|e| TokenError::EncodingError(e.to_string()))?;
            let pem = document
                .to_pem(encoding.pem_label(), LineEnding::LF)
                .map_err(|e| TokenError::EncodingError(e.to_string()))?;
            Ok(pem.into_bytes())
        }
    }
}

/// Serialize a key and write it to `sink`.
///
/// Nothing is written when serialization fails; a short write surfaces as
/// [`TokenError::SinkWrite`].
pub fn write_key<W: std::io::Write>(
    key: &ExportableKey,
    format: ExportFormat,
    encoding: KeyEncoding,
    sink: &mut W,
) -> TokenResult<()> {
    let encoded = encode_key(key, format, encoding)?;
    debug!(
        "Writing {} bytes of {:?}-encoded key material",
        encoded.len(),
        format
    );
    sink.write_all(&encoded)?;
    sink.flush()?;
    Ok(())
}
