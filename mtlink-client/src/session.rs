//! One session per shifted DC id.
//!
//! Each session is a tokio task owning its connection. Everything else
//! talks to it through a [`SessionHandle`]. The task:
//!
//! * keeps a connection up, reconnecting with [`RetryDelay`] after errors
//!   and timing each attempt out through [`ConnectBackoff`];
//! * tears a connection down when it stays silent past the receive timeout
//!   or leaves a `ping_delay_disconnect` unanswered;
//! * batches queued requests into containers, wrapping them in
//!   `invokeAfterMsg` and `invokeWithLayer(initConnection(..))` as needed;
//! * matches answers to requests, completing them or handing retryable
//!   errors to the controller.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::mem;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::time::Duration;

use mtlink_mtproto::envelope::{self, Inbound, Incoming};
use mtlink_mtproto::message::parse_plaintext;
use mtlink_mtproto::{Message, MessageSequencer};
use mtlink_wire::schema::{
    ContainerItem, HttpWait, InitConnection, InvokeAfterMsg, InvokeWithLayer, MsgContainer, MsgsAck,
    PingDelayDisconnect, RpcDropAnswer,
};
use mtlink_wire::{Blob, Serializable};
use tokio::sync::mpsc;
use tokio::time::{Instant, Sleep, Timeout, sleep_until};

use crate::dc::{DcState, ShiftedDcId, bare_dc_id, dc_id_shift};
use crate::errors::{ErrorClass, InvocationError, RpcError, TransportError};
use crate::instance::Shared;
use crate::migration::ControlCommand;
use crate::registry::{RequestId, SerializedRequest};
use crate::transport::{
    ConnectBackoff, ConnectFuture, ConnectTarget, Connection, RetryDelay, TransportKind, poll_opt,
};

/// Unacknowledged server messages are acked no later than this.
const ACK_DELAY: Duration = Duration::from_secs(10);
/// Requests packed into one container.
const MAX_BATCH: usize = 64;
/// `max_wait` of the `http_wait` long poll, in milliseconds.
const HTTP_WAIT_MS: i32 = 25_000;

/// Silence tolerated after a send before the connection is rebuilt.
/// Doubles on every expiry up to the max.
const MIN_RECEIVE_TIMEOUT: Duration = Duration::from_secs(4);
const MAX_RECEIVE_TIMEOUT: Duration = Duration::from_secs(64);
/// Large packets get longer: 8 KiB per second of receive timeout.
const RECEIVE_BYTES_PER_TIMEOUT_SEC: u64 = 8192;

/// Keepalive pings on shift-0 sessions.
const PING_SEND_AFTER: Duration = Duration::from_secs(30);
/// A ping still unanswered this long after it went out kills the connection.
const PING_SEND_AFTER_FORCE: Duration = Duration::from_secs(45);
/// `disconnect_delay` of `ping_delay_disconnect`, in seconds.
const PING_DISCONNECT_DELAY: i32 = 60;

// ─── Handle ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) enum SessionCommand {
    /// Send (or resend) a registered request within `can_wait`.
    Send { id: RequestId, can_wait: Duration },
    /// Forget a request; ask the server to drop the answer if it was sent.
    Cancel(RequestId),
    /// Drop the connection and connect again right away.
    Restart,
    /// Drop the connection and stay idle until the next send.
    Stop,
    /// End the task, handing unanswered requests back to the controller.
    Kill,
    /// Wrap the next request in `initConnection` again.
    SetConnectionNotInited,
}

#[derive(Clone, Debug)]
pub(crate) struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
    state: Arc<AtomicI32>,
    transport: Arc<AtomicU8>,
}

impl SessionHandle {
    /// Queue a command. `false` if the task is gone.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn state(&self) -> DcState {
        DcState::from_raw(self.state.load(Ordering::Relaxed))
    }

    pub fn transport(&self) -> Option<TransportKind> {
        match self.transport.load(Ordering::Relaxed) {
            1 => Some(TransportKind::Tcp),
            2 => Some(TransportKind::Http),
            _ => None,
        }
    }
}

/// Start the task for session `dc`. It begins connecting immediately.
pub(crate) fn spawn(dc: ShiftedDcId, shared: Arc<Shared>) -> SessionHandle {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = SessionHandle {
        tx,
        state: Arc::new(AtomicI32::new(DcState::Disconnected.to_raw())),
        transport: Arc::new(AtomicU8::new(0)),
    };
    let config = &shared.config;
    let worker = Worker {
        dc,
        rx,
        state: handle.state.clone(),
        transport: handle.transport.clone(),
        backoff: ConnectBackoff::new(config.min_connect_timeout, config.max_connect_timeout),
        retry: RetryDelay::default(),
        shared: shared.clone(),
        conn: None,
        connecting: None,
        retry_timer: None,
        flush_timer: None,
        receive_timer: None,
        wait_received: MIN_RECEIVE_TIMEOUT,
        first_sent_at: None,
        ping: Ping::default(),
        seq: MessageSequencer::new(),
        to_send: VecDeque::new(),
        sent: BTreeMap::new(),
        containers: HashMap::new(),
        msg_of: HashMap::new(),
        pending_acks: Vec::new(),
        pending_drops: Vec::new(),
        connection_inited: false,
        stopped: false,
    };
    tokio::spawn(worker.run());
    handle
}

// ─── Worker ───────────────────────────────────────────────────────────────────

struct Worker {
    dc: ShiftedDcId,
    shared: Arc<Shared>,
    rx: mpsc::UnboundedReceiver<SessionCommand>,
    state: Arc<AtomicI32>,
    transport: Arc<AtomicU8>,

    conn: Option<Connection>,
    connecting: Option<Pin<Box<Timeout<ConnectFuture>>>>,
    backoff: ConnectBackoff,
    retry: RetryDelay,
    retry_timer: Option<Pin<Box<Sleep>>>,
    flush_timer: Option<Pin<Box<Sleep>>>,
    /// Armed when something awaiting an answer goes out, cleared on inbound.
    receive_timer: Option<Pin<Box<Sleep>>>,
    wait_received: Duration,
    first_sent_at: Option<Instant>,
    ping: Ping,

    seq: MessageSequencer,
    /// Requests waiting for the next flush, in send order.
    to_send: VecDeque<RequestId>,
    /// Sent and not yet answered, by message id.
    sent: BTreeMap<i64, RequestId>,
    /// Sent containers and the message ids inside them.
    containers: HashMap<i64, Vec<i64>>,
    /// Latest message id of each sent request.
    msg_of: HashMap<RequestId, i64>,
    pending_acks: Vec<i64>,
    pending_drops: Vec<i64>,
    connection_inited: bool,
    stopped: bool,
}

#[derive(Default)]
struct Ping {
    timer: Option<Pin<Box<Sleep>>>,
    /// Goes out with the next flush.
    due: bool,
    /// Message id of the ping awaiting its pong.
    in_flight: Option<i64>,
    sent_at: Option<Instant>,
    next_id: i64,
}

async fn recv_opt(conn: &mut Option<Connection>) -> Result<Vec<u8>, TransportError> {
    match conn {
        Some(c) => c.recv().await,
        None => std::future::pending().await,
    }
}

impl Worker {
    async fn run(mut self) {
        tracing::debug!("[session] DC {} started", self.dc);
        self.start_connect();
        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => {
                        if !self.on_command(command) {
                            break;
                        }
                    }
                    None => break,
                },
                result = poll_opt(&mut self.connecting) => {
                    self.connecting = None;
                    match result {
                        Ok(Ok(conn)) => self.on_connected(conn),
                        Ok(Err(TransportError::Timeout)) | Err(_) => self.on_connect_timeout(),
                        Ok(Err(e)) => {
                            tracing::debug!("[session] DC {} connect failed: {e}", self.dc);
                            self.schedule_retry();
                        }
                    }
                }
                () = poll_opt(&mut self.retry_timer) => {
                    self.retry_timer = None;
                    self.start_connect();
                }
                () = poll_opt(&mut self.flush_timer) => {
                    self.flush_timer = None;
                    self.flush().await;
                }
                () = poll_opt(&mut self.receive_timer) => {
                    self.receive_timer = None;
                    self.on_receive_timeout();
                }
                () = poll_opt(&mut self.ping.timer) => {
                    self.ping.timer = None;
                    self.on_ping_timer();
                }
                result = recv_opt(&mut self.conn) => match result {
                    Ok(packet) => self.on_packet(packet),
                    Err(e) => self.on_transport_error(e),
                },
            }
        }
        self.set_state(DcState::Disconnected);
        tracing::debug!("[session] DC {} finished", self.dc);
    }

    /// Returns `false` once the task should end.
    fn on_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Send { id, can_wait } => {
                if !self.to_send.contains(&id) {
                    self.to_send.push_back(id);
                }
                self.stopped = false;
                self.ensure_connecting();
                self.schedule_flush(can_wait);
            }
            SessionCommand::Cancel(id) => {
                self.to_send.retain(|queued| *queued != id);
                if let Some(msg_id) = self.msg_of.remove(&id) {
                    self.sent.remove(&msg_id);
                    self.pending_drops.push(msg_id);
                    self.schedule_flush(Duration::ZERO);
                }
            }
            SessionCommand::Restart => {
                tracing::debug!("[session] DC {} restart", self.dc);
                self.drop_connection();
                self.stopped = false;
                self.retry.reset();
                self.start_connect();
            }
            SessionCommand::Stop => {
                tracing::debug!("[session] DC {} stopped", self.dc);
                self.drop_connection();
                self.stopped = true;
            }
            SessionCommand::SetConnectionNotInited => self.connection_inited = false,
            SessionCommand::Kill => {
                self.kill();
                return false;
            }
        }
        true
    }

    fn kill(&mut self) {
        self.drop_connection();
        let ids: Vec<RequestId> = self.to_send.drain(..).collect();
        if !ids.is_empty() {
            tracing::debug!("[session] DC {} killed with {} unanswered", self.dc, ids.len());
            self.notify(ControlCommand::Orphaned { dc: self.dc, ids });
        }
    }

    fn notify(&self, command: ControlCommand) {
        if self.shared.control.send(command).is_err() {
            tracing::trace!("[session] controller gone");
        }
    }

    fn set_state(&self, state: DcState) {
        self.state.store(state.to_raw(), Ordering::Relaxed);
    }

    // ─── Connection lifecycle ─────────────────────────────────────────────────

    fn ensure_connecting(&mut self) {
        if self.conn.is_none() && self.connecting.is_none() && self.retry_timer.is_none() {
            self.start_connect();
        }
    }

    fn start_connect(&mut self) {
        if self.stopped {
            return;
        }
        let config = &self.shared.config;
        let Some(endpoint) = config.endpoint(bare_dc_id(self.dc)).cloned() else {
            tracing::warn!("[session] {}", TransportError::NoEndpoint(bare_dc_id(self.dc)));
            self.schedule_retry();
            return;
        };
        let target = ConnectTarget {
            dc: self.dc,
            endpoint,
            mode: config.transport,
            secret: config.proxy_secret,
            http_grace: config.http_grace,
            max_packet_len: config.max_packet_len,
            connect_timeout: self.backoff.current(),
        };
        let deadline = target.deadline();
        let attempt = config.connector.connect(target);
        self.connecting = Some(Box::pin(tokio::time::timeout(deadline, attempt)));
        self.set_state(DcState::Connecting);
    }

    fn on_connected(&mut self, conn: Connection) {
        let kind = conn.kind();
        tracing::info!("[session] DC {} connected via {kind}", self.dc);
        self.backoff.on_connected();
        self.retry.reset();
        self.transport.store(
            match kind {
                TransportKind::Tcp => 1,
                TransportKind::Http => 2,
            },
            Ordering::Relaxed,
        );
        self.conn = Some(conn);
        self.connection_inited = false;
        self.set_state(DcState::Connected);
        if dc_id_shift(self.dc) == 0 {
            self.ping.timer = Some(Box::pin(sleep_until(Instant::now() + PING_SEND_AFTER)));
        }
        if !self.to_send.is_empty() || !self.pending_drops.is_empty() {
            self.schedule_flush(Duration::ZERO);
        }
    }

    /// A timed-out attempt is replaced right away with a longer timeout.
    fn on_connect_timeout(&mut self) {
        self.backoff.on_timeout();
        tracing::debug!(
            "[session] DC {} connect timed out, next timeout {:?}",
            self.dc,
            self.backoff.current()
        );
        self.start_connect();
    }

    fn on_receive_timeout(&mut self) {
        tracing::debug!("[session] DC {} nothing received in {:?}", self.dc, self.wait_received);
        self.wait_received = (self.wait_received * 2).min(MAX_RECEIVE_TIMEOUT);
        self.on_transport_error(TransportError::NoResponse);
    }

    fn on_ping_timer(&mut self) {
        if self.ping.in_flight.is_some() {
            tracing::warn!("[session] DC {} ping unanswered, restarting", self.dc);
            self.on_transport_error(TransportError::NoResponse);
            return;
        }
        self.ping.due = true;
        self.schedule_flush(Duration::ZERO);
    }

    fn schedule_retry(&mut self) {
        let delay = self.retry.next();
        tracing::debug!("[session] DC {} reconnecting in {delay:?}", self.dc);
        self.set_state(DcState::WaitingRetry(delay));
        self.retry_timer = Some(Box::pin(sleep_until(Instant::now() + delay)));
    }

    fn on_transport_error(&mut self, error: TransportError) {
        if error.key_possibly_bad() {
            tracing::warn!("[session] DC {} does not know this client: {error}", self.dc);
        } else {
            tracing::debug!("[session] DC {} connection lost: {error}", self.dc);
        }
        self.drop_connection();
        self.schedule_retry();
    }

    /// Close everything and put unanswered requests back in the queue.
    fn drop_connection(&mut self) {
        self.conn = None;
        self.connecting = None;
        self.retry_timer = None;
        self.receive_timer = None;
        self.first_sent_at = None;
        self.ping = Ping { next_id: self.ping.next_id, ..Ping::default() };
        self.transport.store(0, Ordering::Relaxed);
        self.set_state(DcState::Disconnected);

        let unanswered: Vec<RequestId> = mem::take(&mut self.sent).into_values().collect();
        self.containers.clear();
        self.msg_of.clear();
        self.pending_acks.clear();
        self.pending_drops.clear();
        for id in unanswered.into_iter().rev() {
            if !self.to_send.contains(&id) {
                self.to_send.push_front(id);
            }
        }
    }

    // ─── Outbound ─────────────────────────────────────────────────────────────

    fn schedule_flush(&mut self, within: Duration) {
        let at = Instant::now() + within;
        match &mut self.flush_timer {
            Some(timer) if timer.deadline() <= at => {}
            Some(timer) => timer.as_mut().reset(at),
            None => self.flush_timer = Some(Box::pin(sleep_until(at))),
        }
    }

    async fn flush(&mut self) {
        if self.conn.is_none() {
            return;
        }
        let Some(packet) = self.build_packet() else { return };
        let result = match self.conn.as_mut() {
            Some(conn) => conn.send(&packet).await,
            None => Ok(()),
        };
        match result {
            Ok(()) => {
                self.on_sent(packet.len());
                if !self.to_send.is_empty() {
                    self.schedule_flush(Duration::ZERO);
                }
            }
            Err(e) => self.on_transport_error(e),
        }
    }

    fn awaiting_answer(&self) -> bool {
        !self.sent.is_empty() || self.ping.in_flight.is_some()
    }

    /// Arm the receive timeout, scaled up for large packets.
    fn on_sent(&mut self, size: usize) {
        if !self.awaiting_answer() {
            return;
        }
        if self.receive_timer.is_none() {
            let wait = self.wait_received;
            let by_size = Duration::from_millis(
                (size as u64).saturating_mul(wait.as_millis() as u64) / RECEIVE_BYTES_PER_TIMEOUT_SEC,
            );
            let remain = by_size.clamp(wait, MAX_RECEIVE_TIMEOUT);
            self.receive_timer = Some(Box::pin(sleep_until(Instant::now() + remain)));
        }
        if self.first_sent_at.is_none() {
            self.first_sent_at = Some(Instant::now());
        }
    }

    /// Anything arriving proves the connection alive. A quick round trip
    /// shortens the receive timeout again.
    fn on_received(&mut self) {
        self.receive_timer = None;
        if let Some(at) = self.first_sent_at.take() {
            let took = at.elapsed();
            if !took.is_zero() && took * 2 < self.wait_received {
                self.wait_received = (took * 2).max(MIN_RECEIVE_TIMEOUT);
            }
        }
    }

    /// Pack everything due into one unencrypted message.
    fn build_packet(&mut self) -> Option<Vec<u8>> {
        let mut messages: Vec<Message> = Vec::new();

        if !self.pending_acks.is_empty() {
            let ack = MsgsAck { msg_ids: mem::take(&mut self.pending_acks) };
            messages.push(self.seq.pack(ack.to_bytes(), false));
        }

        if mem::take(&mut self.ping.due) {
            let ping = PingDelayDisconnect {
                ping_id: self.ping.next_id,
                disconnect_delay: PING_DISCONNECT_DELAY,
            };
            self.ping.next_id = self.ping.next_id.wrapping_add(1);
            let message = self.seq.pack(ping.to_bytes(), true);
            let now = Instant::now();
            self.ping.in_flight = Some(message.id.0);
            self.ping.sent_at = Some(now);
            self.ping.timer = Some(Box::pin(sleep_until(now + PING_SEND_AFTER_FORCE)));
            messages.push(message);
        }

        let mut batched = 0;
        while batched < MAX_BATCH {
            let Some(id) = self.to_send.pop_front() else { break };
            let Some(request) = self.shared.registry.get(id) else { continue };
            let body = self.wrap(&request);
            let message = self.seq.pack(body, true);
            self.sent.insert(message.id.0, id);
            self.msg_of.insert(id, message.id.0);
            messages.push(message);
            batched += 1;
        }

        for req_msg_id in mem::take(&mut self.pending_drops) {
            messages.push(self.seq.pack(RpcDropAnswer { req_msg_id }.to_bytes(), true));
        }

        let needs_http_wait = self.conn.as_ref().is_some_and(Connection::needs_http_wait);
        if needs_http_wait && self.awaiting_answer() {
            let wait = HttpWait { max_delay: 0, wait_after: 0, max_wait: HTTP_WAIT_MS };
            messages.push(self.seq.pack(wait.to_bytes(), false));
        }

        // containers are kept only while something inside is unanswered
        self.containers.retain(|_, children| children.iter().any(|c| self.sent.contains_key(c)));

        if messages.len() > 1 {
            let children: Vec<i64> = messages.iter().map(|m| m.id.0).collect();
            let container = MsgContainer {
                messages: messages
                    .into_iter()
                    .map(|m| ContainerItem { msg_id: m.id.0, seq_no: m.seq_no, body: m.body })
                    .collect(),
            };
            let message = self.seq.pack(container.to_bytes(), false);
            self.containers.insert(message.id.0, children);
            return Some(message.to_plaintext_bytes());
        }
        messages.pop().map(|m| m.to_plaintext_bytes())
    }

    fn wrap(&mut self, request: &SerializedRequest) -> Vec<u8> {
        let mut body = request.body.to_vec();
        if let Some(msg_id) = request.after.and_then(|after| self.msg_of.get(&after).copied()) {
            body = InvokeAfterMsg { msg_id, query: Blob(body) }.to_bytes();
        }
        if !self.connection_inited || request.needs_layer {
            let init = &self.shared.config.init;
            let query = InitConnection {
                api_id: init.api_id,
                device_model: init.device_model.clone(),
                system_version: init.system_version.clone(),
                app_version: init.app_version.clone(),
                system_lang_code: init.system_lang_code.clone(),
                lang_pack: init.lang_pack.clone(),
                lang_code: init.lang_code.clone(),
                query: Blob(body),
            };
            body = InvokeWithLayer { layer: init.layer, query: Blob(query.to_bytes()) }.to_bytes();
            self.connection_inited = true;
        }
        body
    }

    // ─── Inbound ──────────────────────────────────────────────────────────────

    fn on_packet(&mut self, packet: Vec<u8>) {
        self.on_received();
        if !packet.is_empty() {
            if let Err(e) = self.handle_packet(&packet) {
                self.on_transport_error(e);
                return;
            }
        }
        // an HTTP session needs a long poll open while answers are due
        if self.conn.as_ref().is_some_and(Connection::needs_http_wait) && self.awaiting_answer() {
            self.schedule_flush(Duration::ZERO);
        }
    }

    fn handle_packet(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        let (msg_id, body) = parse_plaintext(packet)?;
        for Incoming { msg_id, item } in envelope::unpack(msg_id.0, body)? {
            if item.needs_ack() {
                self.pending_acks.push(msg_id);
            }
            match item {
                Inbound::Result { req_msg_id, body } => self.on_answer(req_msg_id, Ok(body)),
                Inbound::Error { req_msg_id, code, message } => {
                    self.on_answer(req_msg_id, Err(RpcError::from_server(code, &message)));
                }
                Inbound::BadMsg { bad_msg_id, error_code, new_salt } => {
                    tracing::debug!(
                        "[session] DC {} bad message {bad_msg_id} (code {error_code}, salt {new_salt:?})",
                        self.dc
                    );
                    self.resend_message(bad_msg_id);
                    self.schedule_flush(Duration::ZERO);
                }
                Inbound::NewSession { first_msg_id } => {
                    let stale: Vec<i64> = self.sent.range(..first_msg_id).map(|(id, _)| *id).collect();
                    tracing::debug!("[session] DC {} new server session, {} to resend", self.dc, stale.len());
                    for id in stale {
                        self.resend_message(id);
                    }
                    self.schedule_flush(Duration::ZERO);
                }
                Inbound::Pong { msg_id: ping_msg_id } => self.on_pong(ping_msg_id),
                Inbound::Ack { .. } => {}
                Inbound::Other { constructor, .. } => {
                    tracing::debug!("[session] DC {} ignoring {constructor:#010x}", self.dc);
                }
            }
        }
        if !self.pending_acks.is_empty() {
            self.schedule_flush(ACK_DELAY);
        }
        Ok(())
    }

    fn on_pong(&mut self, ping_msg_id: i64) {
        if self.ping.in_flight != Some(ping_msg_id) {
            return;
        }
        self.ping.in_flight = None;
        let sent_at = self.ping.sent_at.take().unwrap_or_else(Instant::now);
        self.ping.timer = Some(Box::pin(sleep_until(sent_at + PING_SEND_AFTER)));
    }

    fn resend_message(&mut self, msg_id: i64) {
        if self.ping.in_flight == Some(msg_id) {
            self.ping.in_flight = None;
            self.ping.due = true;
            return;
        }
        if let Some(id) = self.sent.remove(&msg_id) {
            self.msg_of.remove(&id);
            if !self.to_send.contains(&id) {
                self.to_send.push_back(id);
            }
        } else if let Some(children) = self.containers.remove(&msg_id) {
            for child in children {
                self.resend_message(child);
            }
        }
    }

    /// Route an answer to the request it belongs to.
    ///
    /// The handler is taken out of the registry before it runs, so it fires
    /// at most once. Retryable errors leave it in place for the controller.
    fn on_answer(&mut self, req_msg_id: i64, answer: Result<Vec<u8>, RpcError>) {
        let Some(id) = self.sent.remove(&req_msg_id) else {
            tracing::trace!("[session] DC {} answer to unknown message {req_msg_id}", self.dc);
            return;
        };
        self.msg_of.remove(&id);
        let registry = &self.shared.registry;

        match answer {
            Ok(body) => {
                if let Some(handler) = registry.take_handler(id) {
                    if let Some(request) = registry.get(id) {
                        tracing::trace!("[session] {id} answered in {:?}", request.created.elapsed());
                    }
                    registry.remove(id);
                    handler.done(body);
                }
                self.notify(ControlCommand::Completed(id));
            }
            Err(error) if error.class() == ErrorClass::Terminal => {
                tracing::debug!("[session] {id} failed: {error}");
                if let Some(handler) = registry.take_handler(id) {
                    registry.remove(id);
                    handler.fail(InvocationError::Rpc(error));
                }
                self.notify(ControlCommand::Completed(id));
            }
            Err(error) => {
                tracing::debug!("[session] {id} got {error}, handing to controller");
                self.notify(ControlCommand::Retry { id, dc: self.dc, error });
            }
        }
    }
}
