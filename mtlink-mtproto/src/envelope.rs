//! Unpacking what the server sends.
//!
//! A single inbound message can be a container of several messages, any
//! of which can be gzip-packed, and an RPC result can itself hold a packed
//! payload. [`unpack`] flattens all of that into a list of [`Incoming`]
//! items the session can act on one by one.

use std::io::Read;

use mtlink_wire::schema::{
    BadMsgNotification, BadServerSalt, GzipPacked, MsgContainer, MsgsAck, NewSessionCreated, Pong,
    RpcError, RpcResult,
};
use mtlink_wire::{Deserializable, Identifiable, peek_constructor};

/// Failure to make sense of an inbound message.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// Shorter than the 20-byte unencrypted header.
    #[error("envelope too short: {len} bytes")]
    TooShort {
        /// Actual frame length.
        len: usize,
    },
    /// Non-zero `auth_key_id`: an encrypted message this layer cannot read.
    #[error("envelope carries an encrypted message")]
    Encrypted,
    /// The declared body length runs past the end of the frame.
    #[error("envelope declares {declared} bytes, {available} available")]
    Truncated {
        /// Length from the header.
        declared: usize,
        /// Bytes actually present.
        available: usize,
    },
    /// A constructor failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] mtlink_wire::deserialize::Error),
    /// A gzip-packed payload failed to inflate.
    #[error("gzip payload: {0}")]
    Inflate(#[from] std::io::Error),
}

/// One actionable item from the server.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    /// Successful answer to `req_msg_id`.
    Result {
        /// Message id of the request being answered.
        req_msg_id: i64,
        /// Raw result object.
        body: Vec<u8>,
    },
    /// Error answer to `req_msg_id`.
    Error {
        /// Message id of the request being answered.
        req_msg_id: i64,
        /// Error code (HTTP-like, or negative).
        code: i32,
        /// Error type string, e.g. `FLOOD_WAIT_5`.
        message: String,
    },
    /// The server rejected one of our messages and wants it sent again.
    BadMsg {
        /// The rejected message (possibly a container).
        bad_msg_id: i64,
        /// Reason code.
        error_code: i32,
        /// Salt to use from now on, for `bad_server_salt`.
        new_salt: Option<i64>,
    },
    /// The server started a new session; earlier messages may be lost.
    NewSession {
        /// First message id covered by the new session.
        first_msg_id: i64,
    },
    /// Answer to a ping.
    Pong {
        /// Message id of the ping.
        msg_id: i64,
    },
    /// The server acknowledged some of our messages.
    Ack {
        /// Acknowledged ids.
        msg_ids: Vec<i64>,
    },
    /// Anything else (updates and the like).
    Other {
        /// Constructor id of the object.
        constructor: u32,
        /// The whole object.
        body: Vec<u8>,
    },
}

impl Inbound {
    /// Whether the carrying message must be acknowledged.
    pub fn needs_ack(&self) -> bool {
        !matches!(self, Inbound::BadMsg { .. } | Inbound::Pong { .. } | Inbound::Ack { .. })
    }
}

/// An [`Inbound`] item and the id of the message that carried it.
#[derive(Clone, Debug, PartialEq)]
pub struct Incoming {
    /// Id of the carrying message (the inner one for container items).
    pub msg_id: i64,
    /// What it says.
    pub item: Inbound,
}

/// Flatten the body of message `msg_id`.
pub fn unpack(msg_id: i64, body: &[u8]) -> Result<Vec<Incoming>, EnvelopeError> {
    let mut out = Vec::new();
    unpack_into(msg_id, body, &mut out)?;
    Ok(out)
}

fn unpack_into(msg_id: i64, body: &[u8], out: &mut Vec<Incoming>) -> Result<(), EnvelopeError> {
    let constructor = peek_constructor(body).ok_or(mtlink_wire::deserialize::Error::UnexpectedEof)?;
    let item = match constructor {
        MsgContainer::CONSTRUCTOR_ID => {
            for inner in MsgContainer::from_bytes(body)?.messages {
                unpack_into(inner.msg_id, &inner.body, out)?;
            }
            return Ok(());
        }
        GzipPacked::CONSTRUCTOR_ID => {
            let packed = GzipPacked::from_bytes(body)?;
            return unpack_into(msg_id, &inflate(&packed.packed_data)?, out);
        }
        RpcResult::CONSTRUCTOR_ID => {
            let res = RpcResult::from_bytes(body)?;
            rpc_result(res.req_msg_id, res.result.0)?
        }
        BadMsgNotification::CONSTRUCTOR_ID => {
            let bad = BadMsgNotification::from_bytes(body)?;
            Inbound::BadMsg { bad_msg_id: bad.bad_msg_id, error_code: bad.error_code, new_salt: None }
        }
        BadServerSalt::CONSTRUCTOR_ID => {
            let bad = BadServerSalt::from_bytes(body)?;
            Inbound::BadMsg {
                bad_msg_id: bad.bad_msg_id,
                error_code: bad.error_code,
                new_salt: Some(bad.new_server_salt),
            }
        }
        NewSessionCreated::CONSTRUCTOR_ID => {
            Inbound::NewSession { first_msg_id: NewSessionCreated::from_bytes(body)?.first_msg_id }
        }
        Pong::CONSTRUCTOR_ID => Inbound::Pong { msg_id: Pong::from_bytes(body)?.msg_id },
        MsgsAck::CONSTRUCTOR_ID => Inbound::Ack { msg_ids: MsgsAck::from_bytes(body)?.msg_ids },
        _ => Inbound::Other { constructor, body: body.to_vec() },
    };
    out.push(Incoming { msg_id, item });
    Ok(())
}

fn rpc_result(req_msg_id: i64, mut result: Vec<u8>) -> Result<Inbound, EnvelopeError> {
    if peek_constructor(&result) == Some(GzipPacked::CONSTRUCTOR_ID) {
        result = inflate(&GzipPacked::from_bytes(&result)?.packed_data)?;
    }
    if peek_constructor(&result) == Some(RpcError::CONSTRUCTOR_ID) {
        let err = RpcError::from_bytes(&result)?;
        return Ok(Inbound::Error { req_msg_id, code: err.error_code, message: err.error_message });
    }
    Ok(Inbound::Result { req_msg_id, body: result })
}

/// Inflate a `gzip_packed` payload. Some servers send a bare zlib stream.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, EnvelopeError> {
    let mut out = Vec::new();
    if flate2::read::GzDecoder::new(data).read_to_end(&mut out).is_ok() && !out.is_empty() {
        return Ok(out);
    }
    out.clear();
    flate2::read::ZlibDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
