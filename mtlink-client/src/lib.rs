//! # mtlink-client
//!
//! Resilient RPC transport and session layer for MTProto-style servers.
//!
//! ## Features
//! - Obfuscated TCP and HTTP transports, raced on connect (TCP preferred)
//! - One session task per DC and purpose shift, with batching into containers
//! - Reconnects with growing delays; unanswered requests are sent again
//! - `FLOOD_WAIT` and 5xx retries through a time-sorted delayed queue
//! - `*_MIGRATE_N` handling, including main DC switches
//! - Authorization export/import to other DCs, once per target DC
//! - `invokeAfterMsg` ordering and `initConnection` renegotiation
//! - Exactly-once delivery of every answer
//!
//! Requests are opaque serialized bodies; see [`Instance::send`]. Typed
//! calls go through [`Instance::invoke`].

#![deny(unsafe_code)]

mod config;
mod dc;
mod errors;
mod instance;
mod migration;
mod registry;
mod session;
pub mod transport;

pub use config::{Config, DcEndpoint, InitParams, TransportMode, default_dc_endpoints};
pub use dc::{
    CONFIG_SHIFT, DOWNLOAD_SHIFT_BASE, DcState, EXPORT_MEDIA_SHIFT, EXPORT_SHIFT, LOGOUT_SHIFT,
    MAX_MEDIA_SESSIONS, SHIFT_STEP, ShiftedDcId, UPDATER_SHIFT, UPLOAD_SHIFT_BASE, bare_dc_id,
    dc_id_shift, download_dc_id, shift_dc_id, upload_dc_id,
};
pub use errors::{ErrorClass, InvocationError, RpcError, TransportError};
pub use instance::{Instance, SendOptions};
pub use registry::{RequestId, ResponseHandler};
pub use transport::{Connection, ConnectTarget, Connector, NetworkConnector, TransportKind};
