//! JSON marshaller using `serde_json`.
//!
//! This is the default marshaller: header maps and bodies are plain JSON
//! objects, which keeps blocks inspectable with nothing but a hex dump and
//! a pair of eyes.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::Marshaller;
use crate::error::Result;

/// JSON codec for structured data.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    #[inline]
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    #[inline]
    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(data)?)
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
