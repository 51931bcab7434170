//! Shared request bookkeeping.
//!
//! Request bodies, routes and handlers live behind three separate locks.
//! No method ever holds two of them at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use crate::dc::DcRoute;
use crate::errors::InvocationError;

/// Identifies one submitted request for its whole life, across resends
/// and DC switches.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A serialized request as stored between (re)sends.
#[derive(Clone, Debug)]
pub(crate) struct SerializedRequest {
    pub id: RequestId,
    pub body: Arc<[u8]>,
    /// Request that must be processed by the server first.
    pub after: Option<RequestId>,
    /// Wrap in `invokeWithLayer(initConnection(..))` even on an initialised
    /// connection.
    pub needs_layer: bool,
    pub created: Instant,
}

/// Success and failure continuations of one request. Consumed by whichever
/// runs first.
pub struct ResponseHandler {
    callback: Box<dyn FnOnce(Result<Vec<u8>, InvocationError>) + Send>,
}

impl ResponseHandler {
    pub fn new(
        done: impl FnOnce(Vec<u8>) + Send + 'static,
        fail: impl FnOnce(InvocationError) + Send + 'static,
    ) -> Self {
        Self::once(move |result| match result {
            Ok(body) => done(body),
            Err(e) => fail(e),
        })
    }

    /// A single continuation receiving either outcome.
    pub fn once(callback: impl FnOnce(Result<Vec<u8>, InvocationError>) + Send + 'static) -> Self {
        Self { callback: Box::new(callback) }
    }

    pub fn done(self, body: Vec<u8>) {
        (self.callback)(Ok(body))
    }

    pub fn fail(self, error: InvocationError) {
        (self.callback)(Err(error))
    }
}

impl fmt::Debug for ResponseHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResponseHandler")
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    requests: RwLock<HashMap<RequestId, SerializedRequest>>,
    routes: RwLock<HashMap<RequestId, DcRoute>>,
    handlers: Mutex<HashMap<RequestId, ResponseHandler>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn next_id(&self) -> RequestId {
        RequestId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn store(&self, request: SerializedRequest, route: DcRoute, handler: ResponseHandler) {
        let id = request.id;
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).insert(id, handler);
        self.routes.write().unwrap_or_else(PoisonError::into_inner).insert(id, route);
        self.requests.write().unwrap_or_else(PoisonError::into_inner).insert(id, request);
    }

    pub fn get(&self, id: RequestId) -> Option<SerializedRequest> {
        self.requests.read().unwrap_or_else(PoisonError::into_inner).get(&id).cloned()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.requests.read().unwrap_or_else(PoisonError::into_inner).contains_key(&id)
    }

    pub fn route(&self, id: RequestId) -> Option<DcRoute> {
        self.routes.read().unwrap_or_else(PoisonError::into_inner).get(&id).copied()
    }

    pub fn set_route(&self, id: RequestId, route: DcRoute) {
        if let Some(r) = self.routes.write().unwrap_or_else(PoisonError::into_inner).get_mut(&id) {
            *r = route;
        }
    }

    pub fn set_needs_layer(&self, id: RequestId) {
        if let Some(r) = self.requests.write().unwrap_or_else(PoisonError::into_inner).get_mut(&id) {
            r.needs_layer = true;
        }
    }

    pub fn clear_after(&self, id: RequestId) {
        if let Some(r) = self.requests.write().unwrap_or_else(PoisonError::into_inner).get_mut(&id) {
            r.after = None;
        }
    }

    /// Take the handler out so that nobody else can fire it.
    pub fn take_handler(&self, id: RequestId) -> Option<ResponseHandler> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).remove(&id)
    }

    /// Forget a request entirely, returning its handler if still present.
    pub fn remove(&self, id: RequestId) -> Option<ResponseHandler> {
        self.requests.write().unwrap_or_else(PoisonError::into_inner).remove(&id);
        self.routes.write().unwrap_or_else(PoisonError::into_inner).remove(&id);
        self.take_handler(id)
    }

    /// Fail every stored request with `error`.
    pub fn drain(&self, error: impl Fn() -> InvocationError) {
        let handlers: Vec<ResponseHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, h)| h)
            .collect();
        self.requests.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.routes.write().unwrap_or_else(PoisonError::into_inner).clear();
        for handler in handlers {
            handler.fail(error());
        }
    }

    pub fn len(&self) -> usize {
        self.requests.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}
