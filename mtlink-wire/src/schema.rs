//! Service constructors spoken by the transport layer itself.
//!
//! Only the handful of types the session machinery produces or consumes
//! live here: the reachability probe, RPC envelopes, acknowledgements,
//! wrappers used to order or initialise calls, and the authorization
//! transfer calls used during DC migration. All of them are boxed, i.e. the
//! encoded form starts with [`Identifiable::CONSTRUCTOR_ID`].

use crate::deserialize::{Buffer, Result, expect_constructor};
use crate::{Blob, Deserializable, Identifiable, RemoteCall, Serializable};

macro_rules! identifiable {
    ($($t:ty => $id:literal),+ $(,)?) => {$(
        impl Identifiable for $t {
            const CONSTRUCTOR_ID: u32 = $id;
        }
    )+};
}

identifiable! {
    ReqPq              => 0x60469778,
    ResPq              => 0x05162463,
    RpcResult          => 0xf35c6d01,
    RpcError           => 0x2144ca19,
    MsgsAck            => 0x62d6b459,
    MsgContainer       => 0x73f1f8dc,
    GzipPacked         => 0x3072cfa1,
    Pong               => 0x347773c5,
    BadMsgNotification => 0xa7eff811,
    BadServerSalt      => 0xedab447b,
    NewSessionCreated  => 0x9ec20908,
    HttpWait           => 0x9299359f,
    PingDelayDisconnect => 0xf3427b8c,
    RpcDropAnswer      => 0x58e4a740,
    InvokeAfterMsg     => 0xcb9f372d,
    InvokeWithLayer    => 0xda9b0d0d,
    InitConnection     => 0xc1cd5ea9,
    auth::ExportAuthorization   => 0xe5bfffcd,
    auth::ExportedAuthorization => 0xb434e2b8,
    auth::ImportAuthorization   => 0xa57a7dad,
}

// ─── Probe ────────────────────────────────────────────────────────────────────

/// `req_pq#60469778 nonce:int128 = ResPQ`
///
/// First message of key exchange. Sent on its own it makes a cheap
/// reachability probe: any live DC answers with [`ResPq`] echoing the nonce.
#[derive(Clone, Debug, PartialEq)]
pub struct ReqPq {
    pub nonce: [u8; 16],
}

impl Serializable for ReqPq {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
    }
}

#[cfg(feature = "deserializable-functions")]
impl Deserializable for ReqPq {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self { nonce: <[u8; 16]>::deserialize(buf)? })
    }
}

impl RemoteCall for ReqPq {
    type Return = ResPq;
}

/// `resPQ#05162463 nonce:int128 server_nonce:int128 pq:bytes
/// server_public_key_fingerprints:Vector<long> = ResPQ`
#[derive(Clone, Debug, PartialEq)]
pub struct ResPq {
    pub nonce: [u8; 16],
    pub server_nonce: [u8; 16],
    pub pq: Vec<u8>,
    pub server_public_key_fingerprints: Vec<i64>,
}

impl Serializable for ResPq {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.nonce.serialize(buf);
        self.server_nonce.serialize(buf);
        self.pq.serialize(buf);
        self.server_public_key_fingerprints.serialize(buf);
    }
}

impl Deserializable for ResPq {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            nonce: <[u8; 16]>::deserialize(buf)?,
            server_nonce: <[u8; 16]>::deserialize(buf)?,
            pq: Vec::<u8>::deserialize(buf)?,
            server_public_key_fingerprints: Vec::<i64>::deserialize(buf)?,
        })
    }
}

// ─── RPC envelopes ────────────────────────────────────────────────────────────

/// `rpc_result#f35c6d01 req_msg_id:long result:Object = RpcResult`
#[derive(Clone, Debug, PartialEq)]
pub struct RpcResult {
    pub req_msg_id: i64,
    pub result: Blob,
}

impl Serializable for RpcResult {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
        self.result.serialize(buf);
    }
}

impl Deserializable for RpcResult {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self { req_msg_id: i64::deserialize(buf)?, result: Blob::deserialize(buf)? })
    }
}

/// `rpc_error#2144ca19 error_code:int error_message:string = RpcError`
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    pub error_code: i32,
    pub error_message: String,
}

impl Serializable for RpcError {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.error_code.serialize(buf);
        self.error_message.serialize(buf);
    }
}

impl Deserializable for RpcError {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            error_code: i32::deserialize(buf)?,
            // servers occasionally send non-UTF-8 garbage here
            error_message: String::from_utf8_lossy(&Vec::<u8>::deserialize(buf)?).into_owned(),
        })
    }
}

/// One message inside a [`MsgContainer`]: `msg_id:long seqno:int bytes:int body`.
#[derive(Clone, Debug, PartialEq)]
pub struct ContainerItem {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

/// `msg_container#73f1f8dc messages:vector<message> = MessageContainer`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MsgContainer {
    pub messages: Vec<ContainerItem>,
}

impl Serializable for MsgContainer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        (self.messages.len() as i32).serialize(buf);
        for m in &self.messages {
            m.msg_id.serialize(buf);
            m.seq_no.serialize(buf);
            (m.body.len() as i32).serialize(buf);
            buf.extend(m.body.iter().copied());
        }
    }
}

impl Deserializable for MsgContainer {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        let count = i32::deserialize(buf)?;
        if count < 0 {
            return Err(crate::deserialize::Error::InvalidLength(count.into()));
        }
        let mut messages = Vec::new();
        for _ in 0..count {
            let msg_id = i64::deserialize(buf)?;
            let seq_no = i32::deserialize(buf)?;
            let len = i32::deserialize(buf)?;
            let len = usize::try_from(len)
                .map_err(|_| crate::deserialize::Error::InvalidLength(len.into()))?;
            messages.push(ContainerItem { msg_id, seq_no, body: buf.take(len)?.to_vec() });
        }
        Ok(Self { messages })
    }
}

/// `gzip_packed#3072cfa1 packed_data:bytes = Object`
#[derive(Clone, Debug, PartialEq)]
pub struct GzipPacked {
    pub packed_data: Vec<u8>,
}

impl Serializable for GzipPacked {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.packed_data.serialize(buf);
    }
}

impl Deserializable for GzipPacked {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self { packed_data: Vec::<u8>::deserialize(buf)? })
    }
}

// ─── Service notifications ────────────────────────────────────────────────────

/// `msgs_ack#62d6b459 msg_ids:Vector<long> = MsgsAck`
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MsgsAck {
    pub msg_ids: Vec<i64>,
}

impl Serializable for MsgsAck {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_ids.serialize(buf);
    }
}

impl Deserializable for MsgsAck {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self { msg_ids: Vec::<i64>::deserialize(buf)? })
    }
}

/// `pong#347773c5 msg_id:long ping_id:long = Pong`
#[derive(Clone, Debug, PartialEq)]
pub struct Pong {
    pub msg_id: i64,
    pub ping_id: i64,
}

impl Serializable for Pong {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_id.serialize(buf);
        self.ping_id.serialize(buf);
    }
}

impl Deserializable for Pong {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self { msg_id: i64::deserialize(buf)?, ping_id: i64::deserialize(buf)? })
    }
}

/// `bad_msg_notification#a7eff811 bad_msg_id:long bad_msg_seqno:int error_code:int`
#[derive(Clone, Debug, PartialEq)]
pub struct BadMsgNotification {
    pub bad_msg_id: i64,
    pub bad_msg_seqno: i32,
    pub error_code: i32,
}

impl Serializable for BadMsgNotification {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.bad_msg_id.serialize(buf);
        self.bad_msg_seqno.serialize(buf);
        self.error_code.serialize(buf);
    }
}

impl Deserializable for BadMsgNotification {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            bad_msg_id: i64::deserialize(buf)?,
            bad_msg_seqno: i32::deserialize(buf)?,
            error_code: i32::deserialize(buf)?,
        })
    }
}

/// `bad_server_salt#edab447b bad_msg_id:long bad_msg_seqno:int error_code:int
/// new_server_salt:long`
#[derive(Clone, Debug, PartialEq)]
pub struct BadServerSalt {
    pub bad_msg_id: i64,
    pub bad_msg_seqno: i32,
    pub error_code: i32,
    pub new_server_salt: i64,
}

impl Serializable for BadServerSalt {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.bad_msg_id.serialize(buf);
        self.bad_msg_seqno.serialize(buf);
        self.error_code.serialize(buf);
        self.new_server_salt.serialize(buf);
    }
}

impl Deserializable for BadServerSalt {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            bad_msg_id: i64::deserialize(buf)?,
            bad_msg_seqno: i32::deserialize(buf)?,
            error_code: i32::deserialize(buf)?,
            new_server_salt: i64::deserialize(buf)?,
        })
    }
}

/// `new_session_created#9ec20908 first_msg_id:long unique_id:long server_salt:long`
#[derive(Clone, Debug, PartialEq)]
pub struct NewSessionCreated {
    pub first_msg_id: i64,
    pub unique_id: i64,
    pub server_salt: i64,
}

impl Serializable for NewSessionCreated {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.first_msg_id.serialize(buf);
        self.unique_id.serialize(buf);
        self.server_salt.serialize(buf);
    }
}

impl Deserializable for NewSessionCreated {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            first_msg_id: i64::deserialize(buf)?,
            unique_id: i64::deserialize(buf)?,
            server_salt: i64::deserialize(buf)?,
        })
    }
}

// ─── Outgoing service calls ───────────────────────────────────────────────────

/// `http_wait#9299359f max_delay:int wait_after:int max_wait:int = HttpWait`
///
/// Long-poll request keeping an HTTP POST open until the server has
/// something to deliver or `max_wait` milliseconds pass.
#[derive(Clone, Debug, PartialEq)]
pub struct HttpWait {
    pub max_delay: i32,
    pub wait_after: i32,
    pub max_wait: i32,
}

impl Serializable for HttpWait {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.max_delay.serialize(buf);
        self.wait_after.serialize(buf);
        self.max_wait.serialize(buf);
    }
}

#[cfg(feature = "deserializable-functions")]
impl Deserializable for HttpWait {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self {
            max_delay: i32::deserialize(buf)?,
            wait_after: i32::deserialize(buf)?,
            max_wait: i32::deserialize(buf)?,
        })
    }
}

/// `ping_delay_disconnect#f3427b8c ping_id:long disconnect_delay:int = Pong`
///
/// Keepalive. The server also closes the connection by itself if no further
/// ping arrives within `disconnect_delay` seconds.
#[derive(Clone, Debug, PartialEq)]
pub struct PingDelayDisconnect {
    pub ping_id: i64,
    pub disconnect_delay: i32,
}

impl Serializable for PingDelayDisconnect {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.ping_id.serialize(buf);
        self.disconnect_delay.serialize(buf);
    }
}

#[cfg(feature = "deserializable-functions")]
impl Deserializable for PingDelayDisconnect {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self { ping_id: i64::deserialize(buf)?, disconnect_delay: i32::deserialize(buf)? })
    }
}

impl RemoteCall for PingDelayDisconnect {
    type Return = Pong;
}

/// `rpc_drop_answer#58e4a740 req_msg_id:long = RpcDropAnswer`
#[derive(Clone, Debug, PartialEq)]
pub struct RpcDropAnswer {
    pub req_msg_id: i64,
}

impl Serializable for RpcDropAnswer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.req_msg_id.serialize(buf);
    }
}

#[cfg(feature = "deserializable-functions")]
impl Deserializable for RpcDropAnswer {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self { req_msg_id: i64::deserialize(buf)? })
    }
}

impl RemoteCall for RpcDropAnswer {
    type Return = Blob;
}

/// `invokeAfterMsg#cb9f372d msg_id:long query:!X = X`
///
/// The server holds `query` until the message `msg_id` has been processed.
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeAfterMsg {
    pub msg_id: i64,
    pub query: Blob,
}

impl Serializable for InvokeAfterMsg {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.msg_id.serialize(buf);
        self.query.serialize(buf);
    }
}

#[cfg(feature = "deserializable-functions")]
impl Deserializable for InvokeAfterMsg {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self { msg_id: i64::deserialize(buf)?, query: Blob::deserialize(buf)? })
    }
}

/// `invokeWithLayer#da9b0d0d layer:int query:!X = X`
#[derive(Clone, Debug, PartialEq)]
pub struct InvokeWithLayer {
    pub layer: i32,
    pub query: Blob,
}

impl Serializable for InvokeWithLayer {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        self.layer.serialize(buf);
        self.query.serialize(buf);
    }
}

#[cfg(feature = "deserializable-functions")]
impl Deserializable for InvokeWithLayer {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        Ok(Self { layer: i32::deserialize(buf)?, query: Blob::deserialize(buf)? })
    }
}

/// `initConnection#c1cd5ea9 flags:# api_id:int device_model:string
/// system_version:string app_version:string system_lang_code:string
/// lang_pack:string lang_code:string query:!X = X`
///
/// Optional `proxy` and `params` fields are never set, so `flags` is 0.
#[derive(Clone, Debug, PartialEq)]
pub struct InitConnection {
    pub api_id: i32,
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    pub system_lang_code: String,
    pub lang_pack: String,
    pub lang_code: String,
    pub query: Blob,
}

impl Serializable for InitConnection {
    fn serialize(&self, buf: &mut impl Extend<u8>) {
        Self::CONSTRUCTOR_ID.serialize(buf);
        0u32.serialize(buf);
        self.api_id.serialize(buf);
        self.device_model.serialize(buf);
        self.system_version.serialize(buf);
        self.app_version.serialize(buf);
        self.system_lang_code.serialize(buf);
        self.lang_pack.serialize(buf);
        self.lang_code.serialize(buf);
        self.query.serialize(buf);
    }
}

#[cfg(feature = "deserializable-functions")]
impl Deserializable for InitConnection {
    fn deserialize(buf: Buffer) -> Result<Self> {
        expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
        let _flags = u32::deserialize(buf)?;
        Ok(Self {
            api_id: i32::deserialize(buf)?,
            device_model: String::deserialize(buf)?,
            system_version: String::deserialize(buf)?,
            app_version: String::deserialize(buf)?,
            system_lang_code: String::deserialize(buf)?,
            lang_pack: String::deserialize(buf)?,
            lang_code: String::deserialize(buf)?,
            query: Blob::deserialize(buf)?,
        })
    }
}

// ─── Authorization transfer ───────────────────────────────────────────────────

pub mod auth {
    use super::*;

    /// `auth.exportAuthorization#e5bfffcd dc_id:int = auth.ExportedAuthorization`
    #[derive(Clone, Debug, PartialEq)]
    pub struct ExportAuthorization {
        pub dc_id: i32,
    }

    impl Serializable for ExportAuthorization {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            Self::CONSTRUCTOR_ID.serialize(buf);
            self.dc_id.serialize(buf);
        }
    }

    #[cfg(feature = "deserializable-functions")]
    impl Deserializable for ExportAuthorization {
        fn deserialize(buf: Buffer) -> Result<Self> {
            expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
            Ok(Self { dc_id: i32::deserialize(buf)? })
        }
    }

    impl RemoteCall for ExportAuthorization {
        type Return = ExportedAuthorization;
    }

    /// `auth.exportedAuthorization#b434e2b8 id:long bytes:bytes`
    #[derive(Clone, Debug, PartialEq)]
    pub struct ExportedAuthorization {
        pub id: i64,
        pub bytes: Vec<u8>,
    }

    impl Serializable for ExportedAuthorization {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            Self::CONSTRUCTOR_ID.serialize(buf);
            self.id.serialize(buf);
            self.bytes.serialize(buf);
        }
    }

    impl Deserializable for ExportedAuthorization {
        fn deserialize(buf: Buffer) -> Result<Self> {
            expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
            Ok(Self { id: i64::deserialize(buf)?, bytes: Vec::<u8>::deserialize(buf)? })
        }
    }

    /// `auth.importAuthorization#a57a7dad id:long bytes:bytes = auth.Authorization`
    ///
    /// The returned authorization is not inspected; success is all that matters.
    #[derive(Clone, Debug, PartialEq)]
    pub struct ImportAuthorization {
        pub id: i64,
        pub bytes: Vec<u8>,
    }

    impl Serializable for ImportAuthorization {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            Self::CONSTRUCTOR_ID.serialize(buf);
            self.id.serialize(buf);
            self.bytes.serialize(buf);
        }
    }

    #[cfg(feature = "deserializable-functions")]
    impl Deserializable for ImportAuthorization {
        fn deserialize(buf: Buffer) -> Result<Self> {
            expect_constructor(buf, Self::CONSTRUCTOR_ID)?;
            Ok(Self { id: i64::deserialize(buf)?, bytes: Vec::<u8>::deserialize(buf)? })
        }
    }

    impl RemoteCall for ImportAuthorization {
        type Return = Blob;
    }
}
