//! Per-session message numbering.

use crate::message::{Message, MessageId};

/// Hands out message ids and sequence numbers for one session.
///
/// Ids are strictly increasing even if the wall clock stalls or steps back.
/// Reset it (or build a new one) whenever the server announces a new session.
///
/// ```rust
/// use mtlink_mtproto::MessageSequencer;
///
/// let mut seq = MessageSequencer::new();
/// let a = seq.pack(vec![0; 4], true);
/// let b = seq.pack(vec![0; 4], false);
/// assert!(b.id > a.id);
/// assert_eq!(a.seq_no & 1, 1);
/// assert_eq!(b.seq_no & 1, 0);
/// ```
#[derive(Debug, Default)]
pub struct MessageSequencer {
    last_id: i64,
    /// Content-related messages sent so far.
    content_count: i32,
}

impl MessageSequencer {
    /// A fresh sequencer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next message id.
    pub fn next_msg_id(&mut self) -> MessageId {
        let now = MessageId::now().0;
        self.last_id = if now > self.last_id { now } else { self.last_id + 4 };
        MessageId(self.last_id)
    }

    /// Sequence number for the next message.
    ///
    /// Content-related messages (anything expecting an answer or an ack) get
    /// `2 * count + 1` and bump the count; others get `2 * count`.
    pub fn next_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let n = self.content_count * 2 + 1;
            self.content_count += 1;
            n
        } else {
            self.content_count * 2
        }
    }

    /// Number `body` as the next message.
    pub fn pack(&mut self, body: Vec<u8>, content_related: bool) -> Message {
        let id = self.next_msg_id();
        let seq_no = self.next_seq_no(content_related);
        Message::new(id, seq_no, body)
    }

    /// Forget sequence state, keeping ids monotonic.
    pub fn reset(&mut self) {
        self.content_count = 0;
    }
}
