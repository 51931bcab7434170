//! The retry controller.
//!
//! Sessions report every retryable server error here. One task owns all
//! retry bookkeeping and decides, per [`ErrorClass`], whether a request is
//! resent later, sent elsewhere, parked behind another request or behind an
//! authorization transfer, or failed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use mtlink_wire::schema::auth::{ExportAuthorization, ExportedAuthorization, ImportAuthorization};
use mtlink_wire::{Deserializable, Serializable};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};

use crate::dc::{DcRoute, ShiftedDcId, bare_dc_id, dc_id_shift, shift_dc_id};
use crate::errors::{ErrorClass, InvocationError, RpcError};
use crate::instance::{SendOptions, Shared};
use crate::registry::{RequestId, ResponseHandler};
use crate::session::SessionCommand;

/// Added to every flood wait so the resend lands after the server's window.
const FLOOD_WAIT_SLACK: Duration = Duration::from_millis(10);
const MIN_SERVER_ERROR_DELAY: Duration = Duration::from_secs(1);
const MAX_SERVER_ERROR_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub(crate) enum ControlCommand {
    /// Session `dc` got a retryable error for `id`.
    Retry { id: RequestId, dc: ShiftedDcId, error: RpcError },
    /// `id` got its final answer.
    Completed(RequestId),
    /// The caller cancelled `id`.
    Cancelled(RequestId),
    /// Session `dc` was killed with these requests unanswered.
    Orphaned { dc: ShiftedDcId, ids: Vec<RequestId> },
    /// A new request with an `after` dependency.
    Dispatch { id: RequestId, can_wait: Duration },
    ExportDone { target: i32, result: Result<ExportedAuthorization, InvocationError> },
    ImportDone { target: i32, result: Result<(), InvocationError> },
    Shutdown,
}

pub(crate) fn spawn(shared: Arc<Shared>, rx: mpsc::UnboundedReceiver<ControlCommand>) {
    let controller = Controller {
        shared,
        rx,
        delayed: VecDeque::new(),
        server_error_delays: HashMap::new(),
        dependents: HashMap::new(),
        auth_retried: HashSet::new(),
        auth_waiters: HashMap::new(),
        transfers: HashSet::new(),
    };
    tokio::spawn(controller.run());
}

struct Controller {
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<ControlCommand>,
    /// Requests waiting to be resent, earliest first. Each id at most once.
    delayed: VecDeque<(Instant, RequestId)>,
    /// Last backoff used for a request failing with server errors.
    server_error_delays: HashMap<RequestId, Duration>,
    /// Parked requests, by the request they wait for.
    dependents: HashMap<RequestId, RequestId>,
    /// Requests that already went through an authorization transfer.
    auth_retried: HashSet<RequestId>,
    /// Requests waiting for an authorization transfer to a bare DC, with
    /// the error that sent them there.
    auth_waiters: HashMap<i32, Vec<(RequestId, RpcError)>>,
    /// Export and import calls issued by the controller itself.
    transfers: HashSet<RequestId>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl Controller {
    async fn run(mut self) {
        loop {
            let head = self.delayed.front().map(|(at, _)| *at);
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(ControlCommand::Shutdown) | None => break,
                    Some(command) => self.on_command(command),
                },
                () = sleep_until_opt(head) => self.resend_due(),
            }
        }
        tracing::debug!("[mtlink] controller finished");
    }

    fn on_command(&mut self, command: ControlCommand) {
        match command {
            ControlCommand::Retry { id, dc, error } => self.on_error(id, dc, error),
            ControlCommand::Completed(id) => {
                self.forget(id);
                self.release_dependents(id);
            }
            ControlCommand::Cancelled(id) => {
                self.delayed.retain(|(_, queued)| *queued != id);
                self.dependents.remove(&id);
                for waiters in self.auth_waiters.values_mut() {
                    waiters.retain(|(queued, _)| *queued != id);
                }
                self.forget(id);
                self.release_dependents(id);
            }
            ControlCommand::Orphaned { dc, ids } => {
                tracing::debug!("[mtlink] re-dispatching {} requests from DC {dc}", ids.len());
                for id in ids {
                    self.resend(id);
                }
            }
            ControlCommand::Dispatch { id, can_wait } => {
                let after = self.shared.registry.get(id).and_then(|r| r.after);
                match after {
                    Some(after) if self.dependents.contains_key(&after) => {
                        self.dependents.insert(id, after);
                    }
                    _ => self.shared.dispatch(id, can_wait),
                }
            }
            ControlCommand::ExportDone { target, result } => self.on_exported(target, result),
            ControlCommand::ImportDone { target, result } => self.on_imported(target, result),
            ControlCommand::Shutdown => {}
        }
    }

    fn on_error(&mut self, id: RequestId, dc: ShiftedDcId, error: RpcError) {
        if !self.shared.registry.contains(id) {
            return;
        }
        match error.class() {
            ErrorClass::Migrate { dc: new_dc } => self.on_migrate(id, dc, new_dc, error),
            ErrorClass::FloodWait { seconds } => {
                tracing::info!("[mtlink] {id} flood wait of {seconds}s");
                self.delay(id, Duration::from_secs(seconds.into()) + FLOOD_WAIT_SLACK);
            }
            ErrorClass::ServerError => {
                let delay = match self.server_error_delays.get(&id) {
                    Some(last) => (*last * 2).min(MAX_SERVER_ERROR_DELAY),
                    None => MIN_SERVER_ERROR_DELAY,
                };
                self.server_error_delays.insert(id, delay);
                tracing::debug!("[mtlink] {id} got {error}, resending in {delay:?}");
                self.delay(id, delay);
            }
            ErrorClass::Unauthorized | ErrorClass::BadGuestDc => self.on_unauthorized(id, dc, error),
            ErrorClass::LayerInvalid => {
                tracing::debug!("[mtlink] {id} got {error}, initialising connection again");
                self.shared.registry.set_needs_layer(id);
                self.shared.session_command(dc, SessionCommand::SetConnectionNotInited);
                self.resend(id);
            }
            ErrorClass::DependencyWait => self.on_dependency_wait(id, dc, error),
            ErrorClass::Terminal => self.fail(id, error),
        }
    }

    fn on_migrate(&mut self, id: RequestId, dc: ShiftedDcId, new_dc: i32, error: RpcError) {
        let Some(route) = self.shared.registry.route(id) else { return };
        if route.to_main {
            tracing::info!("[mtlink] {error}: main DC is now {new_dc}");
            self.shared.set_main_dc(new_dc);
            self.resend(id);
            return;
        }

        let target = shift_dc_id(new_dc, dc_id_shift(dc));
        tracing::info!("[mtlink] {id} migrating from DC {dc} to {target}");
        self.shared.registry.set_route(id, DcRoute { shifted: target, to_main: false });
        if self.shared.is_authorized() && !self.shared.is_authorized_on(new_dc) {
            self.wait_for_auth(id, new_dc, error);
        } else {
            self.resend(id);
        }
    }

    fn on_unauthorized(&mut self, id: RequestId, dc: ShiftedDcId, error: RpcError) {
        let bare = bare_dc_id(dc);
        let first_time = self.auth_retried.insert(id);
        if bare == self.shared.main_dc()
            || !self.shared.is_authorized()
            || self.transfers.contains(&id)
            || !first_time
        {
            return self.fail(id, error);
        }
        tracing::info!("[mtlink] {id} got {error} on DC {dc}, transferring authorization");
        self.shared.forget_authorization(bare);
        self.wait_for_auth(id, bare, error);
    }

    fn on_dependency_wait(&mut self, id: RequestId, dc: ShiftedDcId, error: RpcError) {
        let Some(after) = self.shared.registry.get(id).and_then(|r| r.after) else {
            return self.fail(id, error);
        };
        let main = self.shared.main_dc();
        let after_target = self.shared.registry.route(after).map(|r| r.target(main));
        if after_target == Some(dc) {
            tracing::debug!("[mtlink] {id} waits for {after}");
            self.dependents.insert(id, after);
        } else {
            tracing::debug!("[mtlink] {id} no longer waits for {after}");
            self.shared.registry.clear_after(id);
            self.resend(id);
        }
    }

    // ─── Delayed queue ────────────────────────────────────────────────────────

    fn delay(&mut self, id: RequestId, delay: Duration) {
        if self.delayed.iter().any(|(_, queued)| *queued == id) {
            return;
        }
        let at = Instant::now() + delay;
        let pos = self.delayed.iter().position(|(t, _)| *t > at).unwrap_or(self.delayed.len());
        self.delayed.insert(pos, (at, id));
    }

    fn resend_due(&mut self) {
        let now = Instant::now();
        while let Some(&(at, id)) = self.delayed.front() {
            if at > now {
                break;
            }
            self.delayed.pop_front();
            self.resend(id);
        }
    }

    fn resend(&self, id: RequestId) {
        if self.shared.registry.contains(id) {
            self.shared.dispatch(id, Duration::ZERO);
        }
    }

    // ─── Completion ───────────────────────────────────────────────────────────

    fn fail(&mut self, id: RequestId, error: RpcError) {
        tracing::debug!("[mtlink] {id} failed: {error}");
        let handler = self.shared.registry.take_handler(id);
        self.shared.registry.remove(id);
        self.forget(id);
        if let Some(handler) = handler {
            handler.fail(InvocationError::Rpc(error));
        }
        self.release_dependents(id);
    }

    fn forget(&mut self, id: RequestId) {
        self.server_error_delays.remove(&id);
        self.auth_retried.remove(&id);
        self.transfers.remove(&id);
    }

    /// Resend everything parked behind `id`, directly or through other
    /// parked requests.
    fn release_dependents(&mut self, id: RequestId) {
        let mut released = Vec::new();
        let mut frontier = vec![id];
        while let Some(done) = frontier.pop() {
            let mut next: Vec<RequestId> =
                self.dependents.iter().filter(|(_, after)| **after == done).map(|(d, _)| *d).collect();
            next.sort();
            for dependent in &next {
                self.dependents.remove(dependent);
            }
            released.extend(next.iter().copied());
            frontier.extend(next);
        }
        for dependent in released {
            self.resend(dependent);
        }
    }

    // ─── Authorization transfer ───────────────────────────────────────────────

    fn wait_for_auth(&mut self, id: RequestId, target: i32, error: RpcError) {
        let waiters = self.auth_waiters.entry(target).or_default();
        waiters.push((id, error));
        if waiters.len() == 1 {
            self.start_export(target);
        }
    }

    fn start_export(&mut self, target: i32) {
        tracing::info!("[mtlink] exporting authorization to DC {target}");
        let control = self.shared.control.clone();
        let handler = ResponseHandler::once(move |result| {
            let result = result.and_then(|body| Ok(ExportedAuthorization::from_bytes(&body)?));
            let _ = control.send(ControlCommand::ExportDone { target, result });
        });
        let body = ExportAuthorization { dc_id: target }.to_bytes();
        let id = self.shared.submit(body, handler, SendOptions::default());
        self.transfers.insert(id);
    }

    fn on_exported(&mut self, target: i32, result: Result<ExportedAuthorization, InvocationError>) {
        let exported = match result {
            Ok(exported) => exported,
            Err(e) => return self.fail_waiters(target, &e),
        };
        let control = self.shared.control.clone();
        let handler = ResponseHandler::once(move |result| {
            let _ = control.send(ControlCommand::ImportDone { target, result: result.map(drop) });
        });
        let body = ImportAuthorization { id: exported.id, bytes: exported.bytes }.to_bytes();
        let id = self.shared.submit(body, handler, SendOptions { dc: target, ..SendOptions::default() });
        self.transfers.insert(id);
    }

    fn on_imported(&mut self, target: i32, result: Result<(), InvocationError>) {
        if let Err(e) = result {
            return self.fail_waiters(target, &e);
        }
        tracing::info!("[mtlink] authorization imported to DC {target}");
        self.shared.mark_authorized_on(target);
        for (id, _) in self.auth_waiters.remove(&target).unwrap_or_default() {
            self.resend(id);
        }
    }

    /// The transfer failed: every waiter fails with the error that made it
    /// wait.
    fn fail_waiters(&mut self, target: i32, cause: &InvocationError) {
        tracing::warn!("[mtlink] authorization transfer to DC {target} failed: {cause}");
        for (id, error) in self.auth_waiters.remove(&target).unwrap_or_default() {
            self.fail(id, error);
        }
    }
}
