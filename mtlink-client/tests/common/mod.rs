//! An in-memory fake DC.
//!
//! [`FakeNet`] is a [`Connector`] handing out duplex pipes. Behind each pipe
//! a server task speaks the obfuscated abridged protocol, unwraps every call
//! the client sends and answers according to a script.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mtlink_client::{
    Config, ConnectTarget, Connection, Connector, InvocationError, Instance, RequestId,
    ResponseHandler, SendOptions, ShiftedDcId, TransportError, TransportMode,
};
use mtlink_client::transport::{ConnectFuture, TcpTransport};
use mtlink_crypto::Obfuscator;
use mtlink_crypto::obfuscation::{ABRIDGED_TAG, NONCE_LEN};
use mtlink_mtproto::message::parse_plaintext;
use mtlink_mtproto::transport::{MAX_PACKET_LEN, encode_packet};
use mtlink_mtproto::{Frame, FrameDecoder, MessageSequencer};
use mtlink_wire::schema::{
    HttpWait, InitConnection, InvokeAfterMsg, InvokeWithLayer, MsgContainer, MsgsAck,
    PingDelayDisconnect, Pong, RpcDropAnswer, RpcError, RpcResult,
};
use mtlink_wire::{Blob, Deserializable, Identifiable, Serializable, peek_constructor};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

// ─── Script ───────────────────────────────────────────────────────────────────

/// A call as the fake DC saw it, with all wrappers taken off.
#[derive(Clone, Debug)]
pub struct Call {
    pub dc: ShiftedDcId,
    pub msg_id: i64,
    pub body: Vec<u8>,
    /// Arrived inside `invokeWithLayer(initConnection(..))`.
    pub layer: bool,
    /// `invokeAfterMsg` target, if any.
    pub after: Option<i64>,
    /// How many times this body was seen before, on any DC.
    pub attempt: usize,
    pub at: Instant,
}

impl Call {
    pub fn constructor(&self) -> Option<u32> {
        peek_constructor(&self.body)
    }
}

pub enum Reply {
    Result(Vec<u8>),
    Error(i32, &'static str),
    /// Never answer.
    Silent,
    /// Drop the connection.
    Disconnect,
    /// Answer later.
    After(Duration, Box<Reply>),
    /// Answer a ping.
    Pong(i64),
}

impl Reply {
    pub fn error(code: i32, message: &'static str) -> Self {
        Self::Error(code, message)
    }

    pub fn later(delay: Duration, reply: Reply) -> Self {
        Self::After(delay, Box::new(reply))
    }
}

type Script = dyn Fn(&Call) -> Reply + Send + Sync;

// ─── FakeNet ──────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Log {
    calls: Vec<Call>,
    drops: Vec<(ShiftedDcId, i64)>,
    connects: Vec<ShiftedDcId>,
    pings: Vec<ShiftedDcId>,
    seen: HashMap<Vec<u8>, usize>,
}

#[derive(Clone)]
pub struct FakeNet {
    script: Arc<Script>,
    log: Arc<Mutex<Log>>,
    ignore_pings: bool,
}

impl FakeNet {
    pub fn new(script: impl Fn(&Call) -> Reply + Send + Sync + 'static) -> Self {
        Self { script: Arc::new(script), log: Arc::default(), ignore_pings: false }
    }

    /// Leave every ping unanswered.
    pub fn ignoring_pings(mut self) -> Self {
        self.ignore_pings = true;
        self
    }

    /// Echo every call back.
    pub fn echo() -> Self {
        Self::new(|call| Reply::Result(call.body.clone()))
    }

    pub fn config(&self) -> Config {
        Config {
            transport: TransportMode::Tcp,
            connector: Arc::new(self.clone()),
            ..Config::default()
        }
    }

    pub fn instance(&self) -> Instance {
        Instance::new(self.config())
    }

    /// Calls seen so far, in arrival order.
    pub fn calls(&self) -> Vec<Call> {
        self.log.lock().unwrap().calls.clone()
    }

    pub fn calls_with(&self, body: &[u8]) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.body == body).collect()
    }

    pub fn calls_to(&self, constructor: u32) -> Vec<Call> {
        self.calls().into_iter().filter(|c| c.constructor() == Some(constructor)).collect()
    }

    /// `rpc_drop_answer` requests seen, as `(dc, req_msg_id)`.
    pub fn drops(&self) -> Vec<(ShiftedDcId, i64)> {
        self.log.lock().unwrap().drops.clone()
    }

    /// Connections accepted, by session.
    pub fn connects(&self) -> Vec<ShiftedDcId> {
        self.log.lock().unwrap().connects.clone()
    }

    /// Pings received, by session.
    pub fn pings(&self) -> Vec<ShiftedDcId> {
        self.log.lock().unwrap().pings.clone()
    }

    /// Sleep in small steps until `cond` holds.
    pub async fn wait_until(&self, mut cond: impl FnMut(&FakeNet) -> bool) {
        for _ in 0..10_000 {
            if cond(self) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }
}

impl Connector for FakeNet {
    fn connect(&self, target: ConnectTarget) -> ConnectFuture {
        let net = self.clone();
        Box::pin(async move {
            let (client, server) = tokio::io::duplex(1 << 16);
            net.log.lock().unwrap().connects.push(target.dc);
            tokio::spawn(net.clone().serve(target.dc, server));
            let tcp =
                TcpTransport::handshake(client, target.secret.as_ref(), target.max_packet_len).await?;
            Ok::<_, TransportError>(Connection::Tcp(tcp))
        })
    }
}

// ─── Server side ──────────────────────────────────────────────────────────────

/// Strip `invokeWithLayer`, `initConnection` and `invokeAfterMsg`.
fn unwrap_call(mut body: Vec<u8>) -> (Vec<u8>, bool, Option<i64>) {
    let mut layer = false;
    let mut after = None;
    loop {
        match peek_constructor(&body) {
            Some(InvokeWithLayer::CONSTRUCTOR_ID) => {
                layer = true;
                body = InvokeWithLayer::from_bytes(&body).unwrap().query.0;
            }
            Some(InitConnection::CONSTRUCTOR_ID) => {
                body = InitConnection::from_bytes(&body).unwrap().query.0;
            }
            Some(InvokeAfterMsg::CONSTRUCTOR_ID) => {
                let wrapped = InvokeAfterMsg::from_bytes(&body).unwrap();
                after = Some(wrapped.msg_id);
                body = wrapped.query.0;
            }
            _ => return (body, layer, after),
        }
    }
}

fn answer(seq: &mut MessageSequencer, req_msg_id: i64, reply: &Reply) -> Option<Vec<u8>> {
    let result = match reply {
        Reply::Pong(ping_id) => {
            let pong = Pong { msg_id: req_msg_id, ping_id: *ping_id };
            return Some(seq.pack(pong.to_bytes(), true).to_plaintext_bytes());
        }
        Reply::Result(body) => Blob(body.clone()),
        Reply::Error(code, message) => {
            Blob(RpcError { error_code: *code, error_message: (*message).into() }.to_bytes())
        }
        _ => return None,
    };
    let body = RpcResult { req_msg_id, result }.to_bytes();
    Some(seq.pack(body, true).to_plaintext_bytes())
}

impl FakeNet {
    async fn serve(self, dc: ShiftedDcId, mut stream: DuplexStream) {
        let mut header = [0u8; NONCE_LEN];
        if stream.read_exact(&mut header).await.is_err() {
            return;
        }
        let mut obf = Obfuscator::server(&header, None, ABRIDGED_TAG).unwrap();
        let mut decoder = FrameDecoder::new(MAX_PACKET_LEN);
        let mut seq = MessageSequencer::new();
        let (later_tx, mut later_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let mut buf = vec![0u8; 16 * 1024];

        loop {
            let mut outgoing = Vec::new();
            tokio::select! {
                read = stream.read(&mut buf) => {
                    let n = match read {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    obf.decrypt(&mut buf[..n]);
                    decoder.push(&buf[..n]);
                    while let Some(frame) = decoder.next_frame().unwrap() {
                        let Frame::Packet(packet) = frame else { continue };
                        for (msg_id, body) in self.messages(&packet) {
                            match self.on_message(dc, msg_id, body) {
                                None => {}
                                Some(Reply::Disconnect) => return,
                                Some(Reply::After(delay, reply)) => {
                                    if let Some(packet) = answer(&mut seq, msg_id, &reply) {
                                        let tx = later_tx.clone();
                                        tokio::spawn(async move {
                                            tokio::time::sleep(delay).await;
                                            let _ = tx.send(packet);
                                        });
                                    }
                                }
                                Some(reply) => outgoing.extend(answer(&mut seq, msg_id, &reply)),
                            }
                        }
                    }
                }
                Some(packet) = later_rx.recv() => outgoing.push(packet),
            }
            for packet in outgoing {
                let mut frame = encode_packet(&packet);
                obf.encrypt(&mut frame);
                if stream.write_all(&frame).await.is_err() {
                    return;
                }
            }
        }
    }

    fn messages(&self, packet: &[u8]) -> Vec<(i64, Vec<u8>)> {
        let (msg_id, body) = parse_plaintext(packet).unwrap();
        if peek_constructor(body) == Some(MsgContainer::CONSTRUCTOR_ID) {
            MsgContainer::from_bytes(body)
                .unwrap()
                .messages
                .into_iter()
                .map(|m| (m.msg_id, m.body))
                .collect()
        } else {
            vec![(msg_id.0, body.to_vec())]
        }
    }

    fn on_message(&self, dc: ShiftedDcId, msg_id: i64, body: Vec<u8>) -> Option<Reply> {
        match peek_constructor(&body)? {
            MsgsAck::CONSTRUCTOR_ID | HttpWait::CONSTRUCTOR_ID => None,
            RpcDropAnswer::CONSTRUCTOR_ID => {
                let drop = RpcDropAnswer::from_bytes(&body).unwrap();
                self.log.lock().unwrap().drops.push((dc, drop.req_msg_id));
                None
            }
            PingDelayDisconnect::CONSTRUCTOR_ID => {
                let ping = PingDelayDisconnect::from_bytes(&body).unwrap();
                self.log.lock().unwrap().pings.push(dc);
                (!self.ignore_pings).then_some(Reply::Pong(ping.ping_id))
            }
            _ => {
                let (body, layer, after) = unwrap_call(body);
                let call = {
                    let mut log = self.log.lock().unwrap();
                    let attempt = log.seen.entry(body.clone()).or_default();
                    let call = Call { dc, msg_id, body, layer, after, attempt: *attempt, at: Instant::now() };
                    *attempt += 1;
                    log.calls.push(call.clone());
                    call
                };
                Some((self.script)(&call))
            }
        }
    }
}

// ─── Client helpers ───────────────────────────────────────────────────────────

/// A distinct request body.
pub fn body(n: u32) -> Vec<u8> {
    let mut out = 0x7e57_0000u32.to_bytes();
    out.extend(n.to_bytes());
    out
}

/// Submit `body` and return its id plus a receiver for the outcome.
pub fn submit(
    instance: &Instance,
    body: Vec<u8>,
    options: SendOptions,
) -> (RequestId, oneshot::Receiver<Result<Vec<u8>, InvocationError>>) {
    let (tx, rx) = oneshot::channel();
    let id = instance.send(
        body,
        ResponseHandler::once(move |result| {
            let _ = tx.send(result);
        }),
        options,
    );
    (id, rx)
}

pub async fn call(instance: &Instance, body: Vec<u8>) -> Result<Vec<u8>, InvocationError> {
    let (_, rx) = submit(instance, body, SendOptions::default());
    rx.await.expect("handler dropped without firing")
}

pub fn on_dc(dc: ShiftedDcId) -> SendOptions {
    SendOptions { dc, ..SendOptions::default() }
}
