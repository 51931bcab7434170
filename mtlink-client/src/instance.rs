//! The runtime object tying sessions, registry and controller together.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use mtlink_wire::{Deserializable, RemoteCall};
use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::dc::{DcRoute, DcState, ShiftedDcId};
use crate::errors::InvocationError;
use crate::migration::{self, ControlCommand};
use crate::registry::{Registry, RequestId, ResponseHandler, SerializedRequest};
use crate::session::{self, SessionCommand, SessionHandle};
use crate::transport::TransportKind;

// ─── SendOptions ──────────────────────────────────────────────────────────────

/// Per-request routing and batching options.
#[derive(Clone, Copy, Debug, Default)]
pub struct SendOptions {
    /// Target session. `0` is the main DC; a bare id of `0` with a shift is
    /// that shift on the main DC.
    pub dc: ShiftedDcId,
    /// How long the request may sit in the queue to be batched with others.
    pub can_wait: Duration,
    /// Request the server must process first.
    pub after: Option<RequestId>,
}

// ─── Shared ───────────────────────────────────────────────────────────────────

/// State reachable from the instance, every session and the controller.
pub(crate) struct Shared {
    pub config: Config,
    pub registry: Registry,
    pub control: mpsc::UnboundedSender<ControlCommand>,
    main_dc: AtomicI32,
    authorized: AtomicBool,
    /// Non-main DCs that received an imported authorization.
    authorized_dcs: Mutex<HashSet<i32>>,
    sessions: Mutex<HashMap<ShiftedDcId, SessionHandle>>,
    closed: AtomicBool,
}

impl Shared {
    pub fn main_dc(&self) -> i32 {
        self.main_dc.load(Ordering::Acquire)
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized.load(Ordering::Acquire)
    }

    pub fn is_authorized_on(&self, dc: i32) -> bool {
        dc == self.main_dc()
            || self.authorized_dcs.lock().unwrap_or_else(PoisonError::into_inner).contains(&dc)
    }

    pub fn mark_authorized_on(&self, dc: i32) {
        self.authorized_dcs.lock().unwrap_or_else(PoisonError::into_inner).insert(dc);
    }

    pub fn forget_authorization(&self, dc: i32) {
        self.authorized_dcs.lock().unwrap_or_else(PoisonError::into_inner).remove(&dc);
    }

    /// Register a request and hand it to its session.
    pub fn submit(
        self: &Arc<Self>,
        body: Vec<u8>,
        handler: ResponseHandler,
        options: SendOptions,
    ) -> RequestId {
        let id = self.registry.next_id();
        let after = options.after.filter(|after| self.registry.contains(*after));
        let request = SerializedRequest {
            id,
            body: body.into(),
            after,
            needs_layer: false,
            created: Instant::now(),
        };
        let route = DcRoute::resolve(options.dc, self.main_dc());
        self.registry.store(request, route, handler);

        if after.is_some() {
            // the controller knows whether `after` is itself parked
            let _ = self.control.send(ControlCommand::Dispatch { id, can_wait: options.can_wait });
        } else {
            self.dispatch(id, options.can_wait);
        }
        id
    }

    /// Queue a registered request on the session its route points at now.
    pub fn dispatch(self: &Arc<Self>, id: RequestId, can_wait: Duration) {
        let Some(route) = self.registry.route(id) else { return };
        let dc = route.target(self.main_dc());
        if let Some(session) = self.session(dc) {
            session.send(SessionCommand::Send { id, can_wait });
        }
    }

    /// The session for `dc`, started on first use. `None` once shut down.
    fn session(self: &Arc<Self>, dc: ShiftedDcId) -> Option<SessionHandle> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = sessions.get(&dc).filter(|h| !h.is_closed()) {
            return Some(handle.clone());
        }
        let handle = session::spawn(dc, Arc::clone(self));
        sessions.insert(dc, handle.clone());
        Some(handle)
    }

    fn existing_session(&self, dc: ShiftedDcId) -> Option<SessionHandle> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).get(&dc).cloned()
    }

    pub fn session_command(&self, dc: ShiftedDcId, command: SessionCommand) {
        if let Some(session) = self.existing_session(dc) {
            session.send(command);
        }
    }

    pub fn kill_session(&self, dc: ShiftedDcId) {
        let session = self.sessions.lock().unwrap_or_else(PoisonError::into_inner).remove(&dc);
        if let Some(session) = session {
            tracing::debug!("[mtlink] killing session {dc}");
            session.send(SessionCommand::Kill);
        }
    }

    /// Switch the main DC. The old main session is killed and its queued
    /// requests follow the new main.
    pub fn set_main_dc(&self, dc: i32) {
        let old = self.main_dc.swap(dc, Ordering::AcqRel);
        if old != dc {
            tracing::info!("[mtlink] main DC {old} -> {dc}");
            self.kill_session(old);
        }
    }
}

// ─── Instance ─────────────────────────────────────────────────────────────────

/// A set of DC sessions sharing one request registry and retry controller.
///
/// Dropping the instance shuts it down: sessions end and every pending
/// request fails with [`InvocationError::Dropped`].
///
/// ```rust,no_run
/// # async fn f() -> Result<(), Box<dyn std::error::Error>> {
/// use mtlink_client::{Config, Instance, ResponseHandler, SendOptions};
///
/// let instance = Instance::new(Config::default());
/// let body: Vec<u8> = Vec::new(); // a serialized request
/// instance.send(
///     body,
///     ResponseHandler::new(|reply| println!("{} bytes", reply.len()), |e| eprintln!("{e}")),
///     SendOptions::default(),
/// );
/// # Ok(()) }
/// ```
pub struct Instance {
    shared: Arc<Shared>,
}

impl Instance {
    /// Create an instance and start its controller.
    ///
    /// Must be called from within a tokio runtime. Sessions are started
    /// lazily on the first request to each DC.
    pub fn new(config: Config) -> Self {
        let (control, control_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            main_dc: AtomicI32::new(config.main_dc_id),
            authorized: AtomicBool::new(config.authorized),
            authorized_dcs: Mutex::new(HashSet::new()),
            sessions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            registry: Registry::default(),
            control,
            config,
        });
        migration::spawn(shared.clone(), control_rx);
        tracing::info!("[mtlink] instance started, main DC {}", shared.main_dc());
        Self { shared }
    }

    // ─── Requests ─────────────────────────────────────────────────────────────

    /// Submit an already-serialized request.
    ///
    /// Exactly one of the handler's continuations runs, on a background
    /// task, unless the request is [cancelled](Self::cancel) first.
    pub fn send(&self, body: Vec<u8>, handler: ResponseHandler, options: SendOptions) -> RequestId {
        self.shared.submit(body, handler, options)
    }

    /// Call `request` on the main DC and decode the reply.
    pub async fn invoke<R: RemoteCall>(&self, request: &R) -> Result<R::Return, InvocationError> {
        self.invoke_on(0, request).await
    }

    /// Call `request` on session `dc` and decode the reply.
    pub async fn invoke_on<R: RemoteCall>(
        &self,
        dc: ShiftedDcId,
        request: &R,
    ) -> Result<R::Return, InvocationError> {
        let (tx, rx) = oneshot::channel();
        let handler = ResponseHandler::once(move |result| {
            let _ = tx.send(result);
        });
        self.send(request.to_bytes(), handler, SendOptions { dc, ..SendOptions::default() });
        let body = rx.await.map_err(|_| InvocationError::Dropped)??;
        Ok(R::Return::from_bytes(&body)?)
    }

    /// Forget a request. Neither of its continuations will run.
    ///
    /// If it was already sent the server is asked to drop the answer, which
    /// does not undo the call itself.
    pub fn cancel(&self, id: RequestId) {
        let shared = &self.shared;
        let Some(route) = shared.registry.route(id) else { return };
        shared.registry.remove(id);
        tracing::debug!("[mtlink] {id} cancelled");
        shared.session_command(route.target(shared.main_dc()), SessionCommand::Cancel(id));
        let _ = shared.control.send(ControlCommand::Cancelled(id));
    }

    // ─── Diagnostics ──────────────────────────────────────────────────────────

    fn resolve(&self, dc: ShiftedDcId) -> ShiftedDcId {
        let main = self.shared.main_dc();
        DcRoute::resolve(dc, main).target(main)
    }

    /// Connection state of session `dc` (`0` for the main DC).
    pub fn dcstate(&self, dc: ShiftedDcId) -> DcState {
        self.shared.existing_session(self.resolve(dc)).map_or(DcState::Disconnected, |s| s.state())
    }

    /// Transport session `dc` is connected through, if connected.
    pub fn dctransport(&self, dc: ShiftedDcId) -> Option<TransportKind> {
        self.shared.existing_session(self.resolve(dc)).and_then(|s| s.transport())
    }

    /// Number of requests not yet answered, failed or cancelled.
    pub fn pending(&self) -> usize {
        self.shared.registry.len()
    }

    // ─── Control ──────────────────────────────────────────────────────────────

    pub fn main_dc_id(&self) -> i32 {
        self.shared.main_dc()
    }

    pub fn set_main_dc_id(&self, dc: i32) {
        self.shared.set_main_dc(dc);
    }

    /// Whether the main DC's authorization may be exported to other DCs.
    pub fn set_authorized(&self, authorized: bool) {
        self.shared.authorized.store(authorized, Ordering::Release);
    }

    /// Reconnect session `dc` now.
    pub fn restart(&self, dc: ShiftedDcId) {
        self.shared.session_command(self.resolve(dc), SessionCommand::Restart);
    }

    pub fn restart_all(&self) {
        let sessions: Vec<SessionHandle> = self
            .shared
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for session in sessions {
            session.send(SessionCommand::Restart);
        }
    }

    /// Close the connection of session `dc` but keep its queue. The next
    /// request to it reconnects.
    pub fn stop_session(&self, dc: ShiftedDcId) {
        self.shared.session_command(self.resolve(dc), SessionCommand::Stop);
    }

    /// End session `dc`. Its unanswered requests are sent again through
    /// whichever session their route points at.
    pub fn kill_session(&self, dc: ShiftedDcId) {
        self.shared.kill_session(self.resolve(dc));
    }

    /// End every session and the controller. Pending requests fail with
    /// [`InvocationError::Dropped`].
    pub fn shutdown(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let sessions: Vec<SessionHandle> = shared
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, s)| s)
            .collect();
        drop(sessions);
        let _ = shared.control.send(ControlCommand::Shutdown);
        shared.registry.drain(|| InvocationError::Dropped);
        tracing::info!("[mtlink] instance shut down");
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("main_dc", &self.shared.main_dc())
            .field("pending", &self.shared.registry.len())
            .finish_non_exhaustive()
    }
}
