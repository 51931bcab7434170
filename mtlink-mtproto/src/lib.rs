//! MTProto framing building blocks.
//!
//! This crate handles:
//! * Message ids and sequence numbers ([`MessageSequencer`])
//! * The unencrypted message envelope ([`Message`], [`message::parse_plaintext`])
//! * Abridged length-prefixed frames, with an incremental decoder
//! * Unpacking server envelopes (results, errors, containers, gzip)
//! * The `req_pq` reachability probe used to race transports
//!
//! It performs no I/O: bytes in, bytes out. Sockets live in `mtlink-client`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod message;
pub mod probe;
pub mod sequencer;
pub mod transport;

pub use envelope::{EnvelopeError, Inbound, Incoming};
pub use message::{Message, MessageId};
pub use probe::{FakePq, ProbeError};
pub use sequencer::MessageSequencer;
pub use transport::{Frame, FrameDecoder, FrameError};
