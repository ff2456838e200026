//! Codec module - body/header marshalling for blocks.
//!
//! A [`Marshaller`] turns typed values into the body bytes of a block and
//! back. The framework never inspects body bytes itself; everything it
//! decodes (header maps, bound payloads) goes through the active marshaller.
//!
//! Built-ins:
//!
//! - [`JsonMarshaller`] - JSON via `serde_json` (the default)
//! - [`MsgPackMarshaller`] - MessagePack via `rmp-serde` (struct-as-map)
//!
//! # Design
//!
//! Marshallers are selected at compile time through a type parameter rather
//! than a trait object, which keeps `marshal`/`unmarshal` generic over the
//! payload type. Raw byte bodies skip the marshaller entirely via
//! [`Framer::pack_raw`](crate::protocol::Framer::pack_raw) and
//! [`Context::reply_raw`](crate::handler::Context::reply_raw).
//!
//! # Example
//!
//! ```
//! use muxwire::codec::{JsonMarshaller, Marshaller, MsgPackMarshaller};
//!
//! let json = JsonMarshaller;
//! let encoded = json.marshal(&"hello").unwrap();
//! let decoded: String = json.unmarshal(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let pack = MsgPackMarshaller;
//! let encoded = pack.marshal(&42u32).unwrap();
//! let decoded: u32 = pack.unmarshal(&encoded).unwrap();
//! assert_eq!(decoded, 42);
//! ```

mod json;
mod msgpack;

pub use json::JsonMarshaller;
pub use msgpack::MsgPackMarshaller;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Encoding policy for block bodies and header maps.
///
/// Implementations must be stateless enough to share behind an `Arc` across
/// every connection of a server.
pub trait Marshaller: Send + Sync + 'static {
    /// Encode a value to body bytes.
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode body bytes to a value.
    fn unmarshal<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;

    /// Short format name, used in diagnostics.
    fn name(&self) -> &'static str;
}
