//! Opaque continuation cursors.
//!
//! A cursor is the JSON form of a store position, base64 encoded with the
//! URL-safe alphabet and no padding so it can travel as a query parameter.

use crate::error::FlowError;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode a position into a cursor string.
pub fn encode<T: Serialize>(position: &T) -> eyre::Result<String> {
    let json = serde_json::to_vec(position)?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decode a cursor string. Any failure is the caller's fault.
pub fn decode<T: DeserializeOwned>(cursor: &str) -> Result<T, FlowError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor.trim().as_bytes())
        .map_err(|_| FlowError::InvalidCursor)?;
    serde_json::from_slice(&bytes).map_err(|_| FlowError::InvalidCursor)
}
