//! MsgPack marshaller using `rmp-serde`.
//!
//! **CRITICAL**: Always use `to_vec_named`, NEVER `to_vec`!
//! Peers written against map-format MessagePack decoders (JavaScript's
//! `@msgpack/msgpack` among them) expect struct-as-map encoding.
//!
//! - `to_vec` serializes structs as arrays (positional)
//! - `to_vec_named` serializes structs as maps (with field names)

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Marshaller;
use crate::error::Result;

/// MessagePack codec for structured data.
///
/// Uses `rmp_serde::to_vec_named` so structs are serialized as maps (with
/// field names) rather than arrays (positional).
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackMarshaller;

impl Marshaller for MsgPackMarshaller {
    #[inline]
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        // CRITICAL: to_vec_named, NOT to_vec!
        Ok(rmp_serde::to_vec_named(value)?)
    }

    #[inline]
    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(data)?)
    }

    fn name(&self) -> &'static str {
        "msgpack"
    }
}
