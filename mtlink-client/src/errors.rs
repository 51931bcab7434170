//! Error types for mtlink-client.
//!
//! Three layers, kept apart on purpose:
//! * [`TransportError`]: the byte pipe broke. Always handled internally by
//!   reconnecting; callers never see it.
//! * [`RpcError`] + [`ErrorClass`]: the server answered with an error. The
//!   class decides whether the request is retried, redirected or failed.
//! * [`InvocationError`]: what a caller's failure handler receives.

use std::{fmt, io};

use mtlink_crypto::{HandshakeError, RandomError};
use mtlink_mtproto::{EnvelopeError, FrameError, ProbeError};

// ─── RpcError ─────────────────────────────────────────────────────────────────

/// An error answer from the server.
///
/// A numeric suffix is split off the error type and placed in
/// [`RpcError::value`]: `FLOOD_WAIT_30` becomes
/// `RpcError { code: 420, name: "FLOOD_WAIT", value: Some(30) }`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    /// HTTP-like status code; negative for transport-level failures.
    pub code: i32,
    /// Error type in SCREAMING_SNAKE_CASE without the numeric suffix.
    pub name: String,
    /// Numeric suffix of the error type, if any.
    pub value: Option<u32>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.error_type())
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    /// Parse the `(code, type)` pair of an `rpc_error`.
    pub fn from_server(code: i32, message: &str) -> Self {
        if let Some((name, suffix)) = message.rsplit_once('_') {
            if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                if let Ok(value) = suffix.parse::<u32>() {
                    return Self { code, name: name.to_owned(), value: Some(value) };
                }
            }
        }
        Self { code, name: message.to_owned(), value: None }
    }

    /// The error type as the server spelled it.
    pub fn error_type(&self) -> String {
        match self.value {
            Some(v) => format!("{}_{v}", self.name),
            None => self.name.clone(),
        }
    }

    /// Match the error name, with an optional leading or trailing `'*'`.
    ///
    /// - `err.is("FLOOD_WAIT")`: exact
    /// - `err.is("FILE_*")`: prefix
    /// - `err.is("*_MIGRATE")`: suffix
    pub fn is(&self, pattern: &str) -> bool {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.name.starts_with(prefix)
        } else if let Some(suffix) = pattern.strip_prefix('*') {
            self.name.ends_with(suffix)
        } else {
            self.name == pattern
        }
    }

    /// Decide how this error is handled.
    pub fn class(&self) -> ErrorClass {
        let name = self.name.as_str();
        match (name, self.value) {
            ("FILE_MIGRATE" | "PHONE_MIGRATE" | "NETWORK_MIGRATE" | "USER_MIGRATE", Some(dc))
                if dc > 0 =>
            {
                return ErrorClass::Migrate { dc: dc as i32 };
            }
            ("MSG_WAIT_TIMEOUT" | "MSG_WAIT_FAILED", None) => return ErrorClass::DependencyWait,
            _ => {}
        }
        if self.code < 0 || self.code >= 500 {
            return ErrorClass::ServerError;
        }
        match (name, self.value) {
            ("FLOOD_WAIT" | "FLOOD_PREMIUM_WAIT", Some(seconds)) => ErrorClass::FloodWait { seconds },
            // longer slowmode waits are the caller's business
            ("SLOWMODE_WAIT", Some(seconds)) if seconds < 3 => ErrorClass::FloodWait { seconds },
            _ if self.code == 401 && name != "AUTH_KEY_PERM_EMPTY" => ErrorClass::Unauthorized,
            ("FILE_ID_INVALID", None) if self.code == 400 => ErrorClass::BadGuestDc,
            ("CONNECTION_NOT_INITED" | "CONNECTION_LAYER_INVALID", None) => ErrorClass::LayerInvalid,
            _ => ErrorClass::Terminal,
        }
    }

    /// Seconds to wait if this is a flood-control error.
    pub fn flood_wait_seconds(&self) -> Option<u32> {
        match self.class() {
            ErrorClass::FloodWait { seconds } => Some(seconds),
            _ => None,
        }
    }
}

// ─── ErrorClass ───────────────────────────────────────────────────────────────

/// What the retry controller does with a server error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// `(FILE|PHONE|NETWORK|USER)_MIGRATE_N`: resend to DC `dc`.
    Migrate { dc: i32 },
    /// Flood control: resend after `seconds`.
    FloodWait { seconds: u32 },
    /// Negative or 5xx code: resend with exponential backoff.
    ServerError,
    /// 401 on a DC without imported authorization.
    Unauthorized,
    /// `FILE_ID_INVALID` from a DC we may not be authorized on.
    BadGuestDc,
    /// The connection must be initialised (again) before the call.
    LayerInvalid,
    /// `MSG_WAIT_*`: the call depends on another one still in progress.
    DependencyWait,
    /// Goes straight to the caller.
    Terminal,
}

// ─── InvocationError ──────────────────────────────────────────────────────────

/// The error a request's failure handler receives.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    /// The server rejected the request and no retry applies.
    #[error("{0}")]
    Rpc(RpcError),
    /// The reply could not be decoded into the expected type.
    #[error("deserialize error: {0}")]
    Deserialize(#[from] mtlink_wire::deserialize::Error),
    /// The instance shut down before an answer arrived.
    #[error("request dropped")]
    Dropped,
}

impl From<RpcError> for InvocationError {
    fn from(e: RpcError) -> Self {
        Self::Rpc(e)
    }
}

impl InvocationError {
    /// `true` if this is the named RPC error (supports `'*'` wildcards).
    pub fn is(&self, pattern: &str) -> bool {
        match self {
            Self::Rpc(e) => e.is(pattern),
            _ => false,
        }
    }
}

// ─── TransportError ───────────────────────────────────────────────────────────

/// Anything that breaks a connection.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("bad frame: {0}")]
    Frame(#[from] FrameError),
    #[error("bad envelope: {0}")]
    Envelope(#[from] EnvelopeError),
    /// One-word frame from the server, e.g. `-404` for an unknown key.
    #[error("transport error code {0}")]
    Code(i32),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Random(#[from] RandomError),
    #[error("no address known for DC {0}")]
    NoEndpoint(i32),
    #[error("connect timed out")]
    Timeout,
    /// A live connection stayed silent past the receive timeout, or left a
    /// ping unanswered.
    #[error("no response from server")]
    NoResponse,
    #[error("connection closed by peer")]
    Closed,
}

impl TransportError {
    /// The negative code this failure maps to, when there is one.
    ///
    /// HTTP statuses are negated so both transports report alike.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Code(c) => Some(*c),
            Self::Status(s) => Some(-i32::from(*s)),
            _ => None,
        }
    }

    /// `-404`: the server does not know our key.
    pub fn key_possibly_bad(&self) -> bool {
        self.code() == Some(-404)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
