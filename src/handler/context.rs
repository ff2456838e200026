//! Per-request context and the chain driver.
//!
//! `Context` carries the current inbound block, the assembled handler
//! chain with its cursor, a request-scoped key/value store, and the
//! connection handle used for replies.
//!
//! # Thread safety
//!
//! `Context` is `Clone` and internally shared. On a stream connection the
//! same context is reused for every request and is only ever driven by the
//! connection's read task, so requests stay serialized. Datagram contexts
//! are created per packet and may run on any task. The short std mutexes
//! guarding the mutable state are never held across an `.await`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::UdpSocket;

use super::Handler;
use crate::codec::Marshaller;
use crate::error::{MuxwireError, Result};
use crate::protocol::{body_bytes_of, message_id_of, Framer};
use crate::server::registry::ConnectionRegistry;

/// Exclusive writer for one stream connection.
pub(crate) type SharedWriter = Arc<tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

/// The transport endpoint behind a context.
pub(crate) enum ConnHandle {
    /// No transport attached; replies succeed as no-ops (testing mode).
    None,
    /// One stream connection with its serialized writer.
    Stream(SharedWriter),
    /// The shared packet socket plus the datagram's origin.
    Datagram {
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    },
}

/// Cursor value marking an aborted chain.
const ABORTED: usize = usize::MAX;

struct ChainState<M: Marshaller> {
    handlers: Vec<Arc<dyn Handler<M>>>,
    offset: usize,
}

struct Shared<M: Marshaller> {
    conn: ConnHandle,
    framer: Framer<M>,
    block: Mutex<Bytes>,
    chain: Mutex<ChainState<M>>,
    store: Mutex<HashMap<String, Value>>,
    registry: Option<Arc<ConnectionRegistry>>,
    conn_id: u64,
    remote_addr: Option<SocketAddr>,
}

/// Per-request state handed to every handler in a chain.
pub struct Context<M: Marshaller> {
    shared: Arc<Shared<M>>,
}

impl<M: Marshaller> Clone for Context<M> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<M: Marshaller> Context<M> {
    fn build(
        conn: ConnHandle,
        framer: Framer<M>,
        registry: Option<Arc<ConnectionRegistry>>,
        conn_id: u64,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                conn,
                framer,
                block: Mutex::new(Bytes::new()),
                chain: Mutex::new(ChainState {
                    handlers: Vec::new(),
                    offset: 0,
                }),
                store: Mutex::new(HashMap::new()),
                registry,
                conn_id,
                remote_addr,
            }),
        }
    }

    /// Create a context with no transport attached.
    ///
    /// Replies are accepted and dropped, which makes handler units testable
    /// without a socket.
    pub fn detached(framer: Framer<M>) -> Self {
        Self::build(ConnHandle::None, framer, None, 0, None)
    }

    pub(crate) fn for_stream(
        framer: Framer<M>,
        writer: SharedWriter,
        registry: Arc<ConnectionRegistry>,
        conn_id: u64,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        Self::build(
            ConnHandle::Stream(writer),
            framer,
            Some(registry),
            conn_id,
            remote_addr,
        )
    }

    pub(crate) fn for_datagram(
        framer: Framer<M>,
        socket: Arc<UdpSocket>,
        peer: SocketAddr,
    ) -> Self {
        Self::build(
            ConnHandle::Datagram { socket, peer },
            framer,
            None,
            0,
            Some(peer),
        )
    }

    // --- inbound block ---

    /// The complete current block, length prefix included.
    pub fn block(&self) -> Bytes {
        self.shared.block.lock().unwrap().clone()
    }

    pub(crate) fn set_block(&self, block: Bytes) {
        *self.shared.block.lock().unwrap() = block;
    }

    /// Message id of the current block.
    pub fn message_id(&self) -> Result<i32> {
        message_id_of(&self.block())
    }

    /// Header map of the current block.
    pub fn header(&self) -> Result<HashMap<String, String>> {
        self.shared.framer.header_of(&self.block())
    }

    /// Decode the current block's body into a typed value.
    pub fn bind<T: DeserializeOwned>(&self) -> Result<T> {
        let block = self.block();
        let body = body_bytes_of(&block)?;
        self.shared.framer.marshaller().unmarshal(body)
    }

    /// Raw body bytes of the current block.
    pub fn body(&self) -> Result<Bytes> {
        let block = self.block();
        let body = body_bytes_of(&block)?;
        Ok(block.slice_ref(body))
    }

    // --- chain driver ---

    pub(crate) fn load_chain(&self, handlers: Vec<Arc<dyn Handler<M>>>) {
        let mut chain = self.shared.chain.lock().unwrap();
        chain.handlers = handlers;
        chain.offset = 0;
    }

    /// Execute the next handler in the chain.
    ///
    /// The cursor advances *before* the handler runs, so a nested `next`
    /// call inside the handler continues the chain. Past the end of the
    /// chain, or after [`abort`](Self::abort), this is a no-op.
    pub async fn next(&self) -> Result<()> {
        let handler = {
            let mut chain = self.shared.chain.lock().unwrap();
            if chain.offset >= chain.handlers.len() {
                return Ok(());
            }
            let handler = chain.handlers[chain.offset].clone();
            chain.offset += 1;
            handler
        };
        handler.call(self.clone()).await
    }

    /// Skip every remaining handler in the chain.
    pub fn abort(&self) {
        self.shared.chain.lock().unwrap().offset = ABORTED;
    }

    /// Whether the chain has run to completion or been aborted.
    pub fn is_done(&self) -> bool {
        let chain = self.shared.chain.lock().unwrap();
        chain.offset >= chain.handlers.len()
    }

    /// Clear the chain, cursor and request store, ready for the next block.
    ///
    /// The store is request-scoped: values set during one request do not
    /// survive into the next one on the same connection.
    pub fn reset(&self) {
        {
            let mut chain = self.shared.chain.lock().unwrap();
            chain.handlers.clear();
            chain.offset = 0;
        }
        self.shared.store.lock().unwrap().clear();
    }

    // --- request store ---

    /// Store a value for later links of this request's chain.
    pub fn set(&self, key: &str, value: Value) {
        self.shared
            .store
            .lock()
            .unwrap()
            .insert(key.to_string(), value);
    }

    /// Fetch a value stored earlier in this request's chain.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.shared.store.lock().unwrap().get(key).cloned()
    }

    // --- replies ---

    /// Encode a body via the marshaller and send it with the given id.
    pub async fn reply<T: Serialize>(&self, message_id: i32, body: &T) -> Result<()> {
        let block = self.shared.framer.pack(message_id, body, None)?;
        self.write_block(&block).await
    }

    /// Like [`reply`](Self::reply), with an explicit header map.
    pub async fn reply_with_header<T: Serialize>(
        &self,
        message_id: i32,
        body: &T,
        header: &HashMap<String, String>,
    ) -> Result<()> {
        let block = self.shared.framer.pack(message_id, body, Some(header))?;
        self.write_block(&block).await
    }

    /// Send pre-serialized body bytes with the given id.
    pub async fn reply_raw(&self, message_id: i32, body: &[u8]) -> Result<()> {
        let block = self.shared.framer.pack_raw(message_id, body, None)?;
        self.write_block(&block).await
    }

    async fn write_block(&self, block: &Bytes) -> Result<()> {
        match &self.shared.conn {
            ConnHandle::None => Ok(()),
            ConnHandle::Stream(writer) => {
                let mut guard = writer.lock().await;
                guard.write_all(block).await?;
                guard.flush().await?;
                Ok(())
            }
            ConnHandle::Datagram { socket, peer } => {
                socket.send_to(block, *peer).await?;
                Ok(())
            }
        }
    }

    // --- connection identity ---

    /// Bind a user-visible identity to this connection.
    ///
    /// Stream transport only; a datagram context has no connection to bind.
    pub fn online(&self, identity: &str) -> Result<()> {
        match (&self.shared.conn, &self.shared.registry) {
            (ConnHandle::Stream(_), Some(registry)) => {
                registry.bind_identity(self.shared.conn_id, identity);
                Ok(())
            }
            _ => Err(MuxwireError::Unsupported(
                "online is stream-only".to_string(),
            )),
        }
    }

    /// Drop this connection's identity binding, if any.
    pub fn offline(&self) -> Result<()> {
        match (&self.shared.conn, &self.shared.registry) {
            (ConnHandle::Stream(_), Some(registry)) => {
                registry.unbind_identity(self.shared.conn_id);
                Ok(())
            }
            _ => Err(MuxwireError::Unsupported(
                "offline is stream-only".to_string(),
            )),
        }
    }

    /// Remote address of the peer, when the transport exposes one.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.shared.remote_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonMarshaller;
    use crate::handler::handler_fn;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> Context<JsonMarshaller> {
        Context::detached(Framer::new(Arc::new(JsonMarshaller)))
    }

    fn counting_handler(
        counter: Arc<AtomicUsize>,
        continue_chain: bool,
    ) -> Arc<dyn Handler<JsonMarshaller>> {
        Arc::new(handler_fn(move |c: Context<JsonMarshaller>| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                if continue_chain {
                    c.next().await?;
                }
                Ok(())
            }
        }))
    }

    #[tokio::test]
    async fn test_next_runs_chain_links_in_order() {
        let c = ctx();
        let counter = Arc::new(AtomicUsize::new(0));
        c.load_chain(vec![
            counting_handler(counter.clone(), true),
            counting_handler(counter.clone(), true),
            counting_handler(counter.clone(), false),
        ]);

        c.next().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(c.is_done());
    }

    #[tokio::test]
    async fn test_middleware_that_skips_next_stops_the_chain() {
        let c = ctx();
        let counter = Arc::new(AtomicUsize::new(0));
        c.load_chain(vec![
            counting_handler(counter.clone(), false),
            counting_handler(counter.clone(), false),
        ]);

        c.next().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abort_makes_next_a_noop() {
        let c = ctx();
        let counter = Arc::new(AtomicUsize::new(0));
        let aborting = Arc::new(handler_fn(move |c: Context<JsonMarshaller>| async move {
            c.abort();
            c.next().await
        })) as Arc<dyn Handler<JsonMarshaller>>;
        c.load_chain(vec![aborting, counting_handler(counter.clone(), false)]);

        c.next().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(c.is_done());
    }

    #[tokio::test]
    async fn test_next_past_end_is_noop() {
        let c = ctx();
        c.load_chain(Vec::new());
        c.next().await.unwrap();
        c.next().await.unwrap();
    }

    #[test]
    fn test_reset_clears_chain_and_store() {
        let c = ctx();
        c.load_chain(vec![counting_handler(Arc::new(AtomicUsize::new(0)), false)]);
        c.set("user", json!("alice"));

        c.reset();
        assert!(c.is_done());
        assert!(c.get("user").is_none());
    }

    #[test]
    fn test_store_roundtrip() {
        let c = ctx();
        c.set("n", json!(42));
        assert_eq!(c.get("n"), Some(json!(42)));
        assert!(c.get("missing").is_none());
    }

    #[tokio::test]
    async fn test_bind_decodes_current_block() {
        let c = ctx();
        let framer = Framer::new(Arc::new(JsonMarshaller));
        let block = framer.pack(7, &"payload".to_string(), None).unwrap();
        c.set_block(block);

        assert_eq!(c.message_id().unwrap(), 7);
        let body: String = c.bind().unwrap();
        assert_eq!(body, "payload");
    }

    #[tokio::test]
    async fn test_detached_reply_is_noop_ok() {
        let c = ctx();
        assert!(c.reply(1, &"anything").await.is_ok());
        assert!(c.reply_raw(1, b"raw").await.is_ok());
    }

    #[test]
    fn test_online_rejected_without_stream() {
        let c = ctx();
        assert!(matches!(
            c.online("alice").unwrap_err(),
            MuxwireError::Unsupported(_)
        ));
        assert!(matches!(
            c.offline().unwrap_err(),
            MuxwireError::Unsupported(_)
        ));
    }
}
