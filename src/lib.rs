//! # muxwire
//!
//! Length-prefixed message-dispatch server framework for TCP-family and
//! UDP-family transports.
//!
//! Bytes arrive on a socket, the framer extracts one self-describing
//! *block* (length, message id, header map, body), the mux resolves the
//! registered handler plus its applicable middleware, and the per-request
//! [`Context`] drives the chain with `next`/`abort`/`reset`.
//!
//! ## Architecture
//!
//! - **Stream transports** (`tcp*`, `unix`): one read loop per connection,
//!   requests serialized per connection, `on_connect`/`on_close` hooks.
//! - **Datagram transports** (`udp*`): one block per datagram, each request
//!   on its own task (or a bounded worker pool).
//! - **Middleware anchors**: a keyed middleware applies to exactly the
//!   handlers registered between its `use` and `unuse` moments.
//!
//! ## Example
//!
//! ```ignore
//! use muxwire::{handler_fn, Server};
//!
//! #[tokio::main]
//! async fn main() -> muxwire::Result<()> {
//!     let mut server = Server::new();
//!     server.add_handler(1, handler_fn(|ctx| async move {
//!         let body: String = ctx.bind()?;
//!         ctx.reply(1, &body).await
//!     }));
//!     server.listen_and_serve("tcp", "0.0.0.0:7171").await
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod transport;

mod mux;

pub use codec::{JsonMarshaller, Marshaller, MsgPackMarshaller};
pub use error::{MuxwireError, Result};
pub use handler::{handler_fn, Context, FnHandler, Handler, HandlerFuture};
pub use mux::{Mux, NOT_EXPIRE};
pub use protocol::Framer;
pub use server::{DatagramDispatch, Server, ServerConfig};
