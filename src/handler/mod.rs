//! Handler module - the handler contract and the per-request context.
//!
//! A [`Handler`] is one link of a request's chain: global middleware,
//! anchored middleware, self middleware and the terminal handler all share
//! this shape. Handlers receive a [`Context`] and drive the rest of the
//! chain through [`Context::next`].
//!
//! # Example
//!
//! ```ignore
//! use muxwire::handler::{handler_fn, Context};
//! use muxwire::codec::JsonMarshaller;
//!
//! let logging = handler_fn(|ctx: Context<JsonMarshaller>| async move {
//!     tracing::debug!(message_id = ?ctx.message_id(), "inbound");
//!     ctx.next().await
//! });
//! ```

mod context;

pub use context::Context;

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use crate::codec::Marshaller;
use crate::error::Result;

/// Boxed future returned by handler invocations.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// One link in a request's middleware/handler chain.
///
/// A handler that returns `Err` aborts the remainder of the chain; the
/// error is logged at the read-loop boundary.
pub trait Handler<M: Marshaller>: Send + Sync + 'static {
    /// Run this link with the request's context.
    fn call(&self, ctx: Context<M>) -> HandlerFuture;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnHandler<F, Fut> {
    /// Wrap a closure.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

impl<M, F, Fut> Handler<M> for FnHandler<F, Fut>
where
    M: Marshaller,
    F: Fn(Context<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, ctx: Context<M>) -> HandlerFuture {
        Box::pin((self.f)(ctx))
    }
}

/// Convenience constructor for [`FnHandler`].
///
/// ```ignore
/// server.add_handler(1, handler_fn(|ctx| async move {
///     let body: String = ctx.bind()?;
///     ctx.reply(1, &body).await
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F, Fut> {
    FnHandler::new(f)
}
