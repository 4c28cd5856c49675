//! Byte codec shared by the controller and the worker.
//!
//! Frames are MessagePack with named fields, so any `serde_json::Value`
//! (including insertion-ordered maps) survives the trip. Both sides always
//! use this module, which makes a decode failure a protocol fault rather
//! than a recoverable runtime condition.

use crate::core::Result;
use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode a value into an owned frame.
///
/// The returned `Bytes` is moved across the channel without another copy.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Bytes> {
    let buf = rmp_serde::to_vec_named(value)?;
    Ok(Bytes::from(buf))
}

/// Decode a frame produced by [`encode`]
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}
