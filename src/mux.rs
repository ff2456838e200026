//! Routing multiplexer: handlers by message id plus the middleware anchor
//! model.
//!
//! Middleware applicability is tracked with a monotonic anchor counter.
//! Every registration (a middleware, its retirement, or a handler) consumes
//! one tick. A keyed middleware registered at tick `a` and retired at tick
//! `e` applies to exactly the handlers registered at ticks `h` with
//! `a < h <= e`; while active its expiry is [`NOT_EXPIRE`]. This gives
//! "applies to handlers registered between these two moments" without ever
//! rebuilding routing tables.
//!
//! # Example
//!
//! ```ignore
//! mux.use_middleware("auth", handler_fn(auth));
//! mux.add_handler(1, handler_fn(hello));     // auth applies
//! mux.unuse("auth")?;
//! mux.add_handler(2, handler_fn(goodbye));   // auth does not apply
//! ```

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::codec::Marshaller;
use crate::error::{MuxwireError, Result};
use crate::handler::Handler;

/// Expiry value of a middleware that has not been retired.
pub const NOT_EXPIRE: u64 = u64::MAX;

/// A keyed middleware registration with its activation window.
struct MiddlewareAnchor<M: Marshaller> {
    handler: Arc<dyn Handler<M>>,
    anchor_index: u64,
    expire_index: u64,
}

struct Tables<M: Marshaller> {
    /// Terminal handlers by message id. Re-registering an id replaces the
    /// previous handler and re-anchors the id (last registration wins).
    handlers: HashMap<i32, Arc<dyn Handler<M>>>,
    /// Keyed anchored middleware.
    anchors: HashMap<String, MiddlewareAnchor<M>>,
    /// Global middleware, in registration order.
    globals: Vec<Arc<dyn Handler<M>>>,
    /// Per-id self middleware, in registration order.
    self_middlewares: HashMap<i32, Vec<Arc<dyn Handler<M>>>>,
    /// Registration tick of each message id.
    id_anchors: HashMap<i32, u64>,
    /// Monotonic registration counter.
    anchor_index: u64,
}

impl<M: Marshaller> Tables<M> {
    fn next_anchor(&mut self) -> u64 {
        self.anchor_index += 1;
        self.anchor_index
    }
}

impl<M: Marshaller> Clone for Tables<M> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
            anchors: self
                .anchors
                .iter()
                .map(|(k, a)| {
                    (
                        k.clone(),
                        MiddlewareAnchor {
                            handler: a.handler.clone(),
                            anchor_index: a.anchor_index,
                            expire_index: a.expire_index,
                        },
                    )
                })
                .collect(),
            globals: self.globals.clone(),
            self_middlewares: self.self_middlewares.clone(),
            id_anchors: self.id_anchors.clone(),
            anchor_index: self.anchor_index,
        }
    }
}

/// Routing table shared read-mostly across every connection.
///
/// Registration is expected to happen before serving; mutation while
/// serving is still consistent because every `resolve` snapshot happens
/// under one read guard.
pub struct Mux<M: Marshaller> {
    tables: RwLock<Tables<M>>,
}

impl<M: Marshaller> Default for Mux<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Marshaller> Clone for Mux<M> {
    fn clone(&self) -> Self {
        Self {
            tables: RwLock::new(self.tables.read().unwrap().clone()),
        }
    }
}

impl<M: Marshaller> Mux<M> {
    /// Create an empty multiplexer.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables {
                handlers: HashMap::new(),
                anchors: HashMap::new(),
                globals: Vec::new(),
                self_middlewares: HashMap::new(),
                id_anchors: HashMap::new(),
                anchor_index: 0,
            }),
        }
    }

    /// Register the terminal handler for a message id.
    ///
    /// Re-registering an id replaces the handler and re-anchors the id at
    /// the current tick, so middleware windows are evaluated against the
    /// latest registration.
    pub fn add_handler(&self, message_id: i32, handler: impl Handler<M>) {
        self.add_handler_arc(message_id, Vec::new(), Arc::new(handler));
    }

    /// Register a handler together with its self middleware.
    ///
    /// The middleware run, in order, between the anchored middleware and
    /// the handler; they apply to this id only. Re-registering replaces any
    /// previous self middleware for the id.
    pub fn add_handler_chain(
        &self,
        message_id: i32,
        middlewares: Vec<Arc<dyn Handler<M>>>,
        handler: impl Handler<M>,
    ) {
        self.add_handler_arc(message_id, middlewares, Arc::new(handler));
    }

    fn add_handler_arc(
        &self,
        message_id: i32,
        middlewares: Vec<Arc<dyn Handler<M>>>,
        handler: Arc<dyn Handler<M>>,
    ) {
        let mut tables = self.tables.write().unwrap();
        if middlewares.is_empty() {
            tables.self_middlewares.remove(&message_id);
        } else {
            tables.self_middlewares.insert(message_id, middlewares);
        }
        tables.handlers.insert(message_id, handler);
        let anchor = tables.next_anchor();
        tables.id_anchors.insert(message_id, anchor);
    }

    /// Register (or replace) a keyed anchored middleware.
    ///
    /// A replaced key is re-anchored at the current tick with a fresh,
    /// unexpired window.
    pub fn use_middleware(&self, key: &str, middleware: impl Handler<M>) {
        let mut tables = self.tables.write().unwrap();
        let anchor = tables.next_anchor();
        tables.anchors.insert(
            key.to_string(),
            MiddlewareAnchor {
                handler: Arc::new(middleware),
                anchor_index: anchor,
                expire_index: NOT_EXPIRE,
            },
        );
    }

    /// Retire a keyed middleware at the current tick.
    ///
    /// Handlers registered after this point no longer see it; handlers
    /// registered while it was active keep it.
    pub fn unuse(&self, key: &str) -> Result<()> {
        let mut tables = self.tables.write().unwrap();
        let expire = tables.next_anchor();
        match tables.anchors.get_mut(key) {
            Some(anchor) => {
                anchor.expire_index = expire;
                Ok(())
            }
            None => Err(MuxwireError::UnknownMiddleware(key.to_string())),
        }
    }

    /// Append a global middleware; it applies to every dispatch.
    pub fn use_global(&self, middleware: impl Handler<M>) {
        self.tables
            .write()
            .unwrap()
            .globals
            .push(Arc::new(middleware));
    }

    /// Whether a handler is registered for the id.
    pub fn has_handler(&self, message_id: i32) -> bool {
        self.tables.read().unwrap().handlers.contains_key(&message_id)
    }

    /// Build the ordered chain for a message id.
    ///
    /// Order: globals, then anchored middleware whose window covers the
    /// id's registration tick (sorted by anchor index ascending for
    /// determinism), then self middleware, then the handler.
    pub fn resolve(&self, message_id: i32) -> Result<Vec<Arc<dyn Handler<M>>>> {
        let tables = self.tables.read().unwrap();
        let handler = tables
            .handlers
            .get(&message_id)
            .ok_or(MuxwireError::UnknownMessageId(message_id))?
            .clone();
        let id_anchor = tables.id_anchors.get(&message_id).copied().unwrap_or(0);

        let mut chain = tables.globals.clone();
        chain.extend(Self::anchored_sorted(&tables, |a| {
            id_anchor > a.anchor_index && id_anchor <= a.expire_index
        }));
        if let Some(self_mids) = tables.self_middlewares.get(&message_id) {
            chain.extend(self_mids.iter().cloned());
        }
        chain.push(handler);
        Ok(chain)
    }

    /// Build the chain for the catch-all dispatch mode: globals plus every
    /// active (unretired) anchored middleware, terminated by `terminal`.
    ///
    /// No handler lookup happens, so unknown ids are not an error here.
    pub fn on_message_chain(&self, terminal: Arc<dyn Handler<M>>) -> Vec<Arc<dyn Handler<M>>> {
        let tables = self.tables.read().unwrap();
        let mut chain = tables.globals.clone();
        chain.extend(Self::anchored_sorted(&tables, |a| {
            a.expire_index == NOT_EXPIRE
        }));
        chain.push(terminal);
        chain
    }

    fn anchored_sorted(
        tables: &Tables<M>,
        applies: impl Fn(&MiddlewareAnchor<M>) -> bool,
    ) -> Vec<Arc<dyn Handler<M>>> {
        let mut picked: Vec<(u64, Arc<dyn Handler<M>>)> = tables
            .anchors
            .values()
            .filter(|a| applies(a))
            .map(|a| (a.anchor_index, a.handler.clone()))
            .collect();
        picked.sort_by_key(|(index, _)| *index);
        picked.into_iter().map(|(_, handler)| handler).collect()
    }
}
