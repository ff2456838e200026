//! Server module - lifecycle, dispatch, and the public facade.
//!
//! [`Server`] owns the routing [`Mux`], the lifecycle hooks, and the
//! transport configuration. `listen_and_serve` picks the stream or datagram
//! loop from the network name and runs it in the caller's task; [`stop`]
//! cancels cooperatively and waits for every read loop and in-flight
//! handler chain to drain.
//!
//! # Example
//!
//! ```ignore
//! use muxwire::{handler_fn, Server};
//!
//! let mut server = Server::new();
//! server.add_handler(1, handler_fn(|ctx| async move {
//!     let body: String = ctx.bind()?;
//!     ctx.reply(1, &body).await
//! }));
//! server.listen_and_serve("tcp", "0.0.0.0:7171").await?;
//! ```

pub(crate) mod registry;

mod datagram;
mod stream;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::codec::{JsonMarshaller, Marshaller};
use crate::error::{MuxwireError, Result};
use crate::handler::{Context, Handler};
use crate::mux::Mux;
use crate::protocol::Framer;
use crate::transport::{self, NetworkKind};
use self::registry::ConnectionRegistry;

/// How datagram requests are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramDispatch {
    /// One task per datagram.
    Unbounded,
    /// A fixed pool of worker tasks over a bounded queue; datagrams that
    /// arrive while the queue is full are dropped with a warning.
    Bounded(usize),
}

/// Transport configuration, fixed before `listen_and_serve`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Receive buffer for one datagram. Default 4096.
    pub datagram_buffer_size: usize,
    /// Maximum declared block length accepted or produced.
    pub max_block_size: u32,
    /// Datagram scheduling policy.
    pub datagram_dispatch: DatagramDispatch,
    /// Reserved toggle carried on the configuration surface; no effect yet.
    pub broadcast_signal: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            datagram_buffer_size: 4096,
            max_block_size: crate::protocol::DEFAULT_MAX_BLOCK_SIZE,
            datagram_dispatch: DatagramDispatch::Unbounded,
            broadcast_signal: false,
        }
    }
}

struct RunState {
    shutdown: CancellationToken,
    tracker: TaskTracker,
    registry: Arc<ConnectionRegistry>,
    local_addr: Option<SocketAddr>,
}

/// Message-dispatch server over stream and datagram transports.
///
/// When an `on_message` hook is set the server is in catch-all mode: every
/// block runs `globals + anchored + on_message` and per-id routing is
/// skipped entirely. Otherwise blocks are routed through the [`Mux`] by
/// message id.
pub struct Server<M: Marshaller = JsonMarshaller> {
    marshaller: Arc<M>,
    mux: Arc<Mux<M>>,
    config: ServerConfig,
    on_connect: Option<Arc<dyn Handler<M>>>,
    on_message: Option<Arc<dyn Handler<M>>>,
    on_close: Option<Arc<dyn Handler<M>>>,
    run: Mutex<Option<RunState>>,
}

impl Server<JsonMarshaller> {
    /// Create a server with the default JSON marshaller.
    pub fn new() -> Self {
        Self::with_marshaller(JsonMarshaller)
    }
}

impl Default for Server<JsonMarshaller> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Marshaller> Clone for Server<M> {
    /// Shallow configuration copy: routing tables, hooks and config are
    /// carried over (handlers shared by `Arc`); run state is not.
    fn clone(&self) -> Self {
        Self {
            marshaller: self.marshaller.clone(),
            mux: Arc::new((*self.mux).clone()),
            config: self.config.clone(),
            on_connect: self.on_connect.clone(),
            on_message: self.on_message.clone(),
            on_close: self.on_close.clone(),
            run: Mutex::new(None),
        }
    }
}

impl<M: Marshaller> Server<M> {
    /// Create a server with an explicit marshaller.
    pub fn with_marshaller(marshaller: M) -> Self {
        Self {
            marshaller: Arc::new(marshaller),
            mux: Arc::new(Mux::new()),
            config: ServerConfig::default(),
            on_connect: None,
            on_message: None,
            on_close: None,
            run: Mutex::new(None),
        }
    }

    // --- configuration ---

    /// Receive buffer size for one datagram.
    pub fn datagram_buffer_size(&mut self, size: usize) -> &mut Self {
        self.config.datagram_buffer_size = size;
        self
    }

    /// Datagram scheduling policy.
    pub fn datagram_dispatch(&mut self, dispatch: DatagramDispatch) -> &mut Self {
        self.config.datagram_dispatch = dispatch;
        self
    }

    /// Maximum declared block length accepted or produced.
    pub fn max_block_size(&mut self, max: u32) -> &mut Self {
        self.config.max_block_size = max;
        self
    }

    /// Reserved toggle; stored but currently without effect.
    pub fn broadcast_signal(&mut self, enabled: bool) -> &mut Self {
        self.config.broadcast_signal = enabled;
        self
    }

    /// Hook run on each stream connection before its read loop starts.
    pub fn on_connect(&mut self, hook: impl Handler<M>) -> &mut Self {
        self.on_connect = Some(Arc::new(hook));
        self
    }

    /// Catch-all message hook; setting it disables per-id routing.
    pub fn on_message(&mut self, hook: impl Handler<M>) -> &mut Self {
        self.on_message = Some(Arc::new(hook));
        self
    }

    /// Hook run after a stream connection's read loop exits.
    pub fn on_close(&mut self, hook: impl Handler<M>) -> &mut Self {
        self.on_close = Some(Arc::new(hook));
        self
    }

    // --- registration (delegated to the mux) ---

    /// Register the terminal handler for a message id.
    pub fn add_handler(&self, message_id: i32, handler: impl Handler<M>) {
        self.mux.add_handler(message_id, handler);
    }

    /// Register a handler with self middleware for a message id.
    pub fn add_handler_chain(
        &self,
        message_id: i32,
        middlewares: Vec<Arc<dyn Handler<M>>>,
        handler: impl Handler<M>,
    ) {
        self.mux.add_handler_chain(message_id, middlewares, handler);
    }

    /// Register (or replace) a keyed anchored middleware.
    pub fn use_middleware(&self, key: &str, middleware: impl Handler<M>) {
        self.mux.use_middleware(key, middleware);
    }

    /// Retire a keyed middleware for handlers registered from now on.
    pub fn unuse(&self, key: &str) -> Result<()> {
        self.mux.unuse(key)
    }

    /// Append a global middleware.
    pub fn use_global(&self, middleware: impl Handler<M>) {
        self.mux.use_global(middleware);
    }

    /// The routing multiplexer.
    pub fn mux(&self) -> &Mux<M> {
        &self.mux
    }

    // --- lifecycle ---

    pub(crate) fn framer(&self) -> Framer<M> {
        Framer::new(self.marshaller.clone()).with_max_block_size(self.config.max_block_size)
    }

    fn dispatcher(&self) -> Arc<Dispatcher<M>> {
        Arc::new(Dispatcher {
            framer: self.framer(),
            mux: self.mux.clone(),
            on_message: self.on_message.clone(),
        })
    }

    fn begin_run(&self, local_addr: Option<SocketAddr>) -> Result<RunHandles> {
        let mut run = self.run.lock().unwrap();
        if run.is_some() {
            return Err(MuxwireError::AlreadyServing);
        }
        let state = RunState {
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            registry: Arc::new(ConnectionRegistry::new()),
            local_addr,
        };
        let handles = RunHandles {
            shutdown: state.shutdown.clone(),
            tracker: state.tracker.clone(),
            registry: state.registry.clone(),
        };
        *run = Some(state);
        Ok(handles)
    }

    /// Bind the transport named by `network` and serve until [`stop`].
    ///
    /// Runs the accept loop (stream) or reader loop (datagram) in the
    /// caller's task; returns after a graceful stop, or immediately with
    /// `Listen`/`Unsupported` when binding fails.
    ///
    /// [`stop`]: Self::stop
    pub async fn listen_and_serve(&self, network: &str, addr: &str) -> Result<()> {
        match transport::classify(network)? {
            NetworkKind::Stream => {
                let listener = transport::StreamListener::bind(network, addr).await?;
                let handles = self.begin_run(listener.local_addr())?;
                stream::serve(self, listener, handles).await
            }
            NetworkKind::Datagram => {
                let socket = transport::bind_datagram(network, addr).await?;
                let handles = self.begin_run(socket.local_addr().ok())?;
                datagram::serve(self, socket, handles).await
            }
        }
    }

    /// Stop serving: no new connections or datagrams are admitted, every
    /// read loop is cancelled at its next block boundary, and the call
    /// returns only after all tasks (including in-flight handler chains)
    /// have finished.
    pub async fn stop(&self) -> Result<()> {
        let state = self
            .run
            .lock()
            .unwrap()
            .take()
            .ok_or(MuxwireError::AlreadyStopped)?;
        state.shutdown.cancel();
        state.tracker.close();
        state.tracker.wait().await;
        Ok(())
    }

    /// Bound local address while serving, when the transport has one.
    ///
    /// Useful after binding port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.run
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|state| state.local_addr)
    }

    /// Close the stream connection bound to an identity via
    /// [`Context::online`]. Returns whether a live connection was found.
    pub fn kick(&self, identity: &str) -> bool {
        self.run
            .lock()
            .unwrap()
            .as_ref()
            .map(|state| state.registry.kick(identity))
            .unwrap_or(false)
    }

    /// Number of live stream connections.
    pub fn connection_count(&self) -> usize {
        self.run
            .lock()
            .unwrap()
            .as_ref()
            .map(|state| state.registry.len())
            .unwrap_or(0)
    }
}

pub(crate) struct RunHandles {
    pub(crate) shutdown: CancellationToken,
    pub(crate) tracker: TaskTracker,
    pub(crate) registry: Arc<ConnectionRegistry>,
}

/// What the read loop should do after a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchOutcome {
    Continue,
    /// A handler panicked; the connection is not trustworthy anymore.
    Close,
}

/// Chain assembly and execution, shared by both transports.
pub(crate) struct Dispatcher<M: Marshaller> {
    pub(crate) framer: Framer<M>,
    mux: Arc<Mux<M>>,
    on_message: Option<Arc<dyn Handler<M>>>,
}

impl<M: Marshaller> Dispatcher<M> {
    fn chain_for(&self, block: &[u8]) -> Result<Vec<Arc<dyn Handler<M>>>> {
        match &self.on_message {
            Some(terminal) => Ok(self.mux.on_message_chain(terminal.clone())),
            None => {
                let message_id = crate::protocol::message_id_of(block)?;
                self.mux.resolve(message_id)
            }
        }
    }

    /// Run one block through its chain on the given context.
    ///
    /// Routing misses and handler errors are logged and leave the
    /// connection open; a handler panic closes it.
    pub(crate) async fn dispatch(&self, ctx: &Context<M>, block: Bytes) -> DispatchOutcome {
        let chain = match self.chain_for(&block) {
            Ok(chain) => chain,
            Err(MuxwireError::UnknownMessageId(id)) => {
                tracing::warn!(message_id = id, "no handler registered, block dropped");
                return DispatchOutcome::Continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to route block");
                return DispatchOutcome::Continue;
            }
        };

        ctx.set_block(block);
        ctx.load_chain(chain);
        let outcome = match AssertUnwindSafe(ctx.next()).catch_unwind().await {
            Ok(Ok(())) => DispatchOutcome::Continue,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "handler chain failed");
                DispatchOutcome::Continue
            }
            Err(_) => {
                tracing::error!("handler panicked, closing connection");
                DispatchOutcome::Close
            }
        };
        ctx.reset();
        outcome
    }
}

/// Run a lifecycle hook, containing errors and panics.
pub(crate) async fn run_hook<M: Marshaller>(
    hook: &Arc<dyn Handler<M>>,
    ctx: &Context<M>,
    name: &'static str,
) {
    match AssertUnwindSafe(hook.call(ctx.clone())).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(hook = name, error = %e, "hook failed"),
        Err(_) => tracing::error!(hook = name, "hook panicked"),
    }
}
