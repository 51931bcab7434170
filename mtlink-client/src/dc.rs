//! Data-center ids and per-DC session state.
//!
//! Several sessions may talk to the same DC at once (main traffic, file
//! downloads, uploads...). They are told apart by a *shift*:
//! `shifted = dc + 10000 * shift`. A bare id of `0` stands for "whatever the
//! main DC currently is".

use std::time::Duration;

/// A DC id combined with a session shift.
pub type ShiftedDcId = i32;

/// Distance between shift slots.
pub const SHIFT_STEP: i32 = 10_000;

pub const CONFIG_SHIFT: i32 = 1;
pub const LOGOUT_SHIFT: i32 = 2;
pub const UPDATER_SHIFT: i32 = 3;
pub const EXPORT_SHIFT: i32 = 4;
pub const EXPORT_MEDIA_SHIFT: i32 = 5;
pub const DOWNLOAD_SHIFT_BASE: i32 = 0x10;
pub const UPLOAD_SHIFT_BASE: i32 = 0x20;
/// Parallel download or upload sessions per DC.
pub const MAX_MEDIA_SESSIONS: i32 = 0x10;

pub const fn shift_dc_id(dc: i32, shift: i32) -> ShiftedDcId {
    dc + SHIFT_STEP * shift
}

pub const fn bare_dc_id(shifted: ShiftedDcId) -> i32 {
    shifted % SHIFT_STEP
}

pub const fn dc_id_shift(shifted: ShiftedDcId) -> i32 {
    shifted / SHIFT_STEP
}

/// Session slot for the `index`-th parallel download from `dc`.
pub const fn download_dc_id(dc: i32, index: i32) -> ShiftedDcId {
    shift_dc_id(dc, DOWNLOAD_SHIFT_BASE + index % MAX_MEDIA_SESSIONS)
}

/// Session slot for the `index`-th parallel upload to `dc`.
pub const fn upload_dc_id(dc: i32, index: i32) -> ShiftedDcId {
    shift_dc_id(dc, UPLOAD_SHIFT_BASE + index % MAX_MEDIA_SESSIONS)
}

// ─── Routing ──────────────────────────────────────────────────────────────────

/// Where a request goes.
///
/// `to_main` requests follow the main DC when it changes; others stay on
/// the concrete `shifted` id they were resolved to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct DcRoute {
    pub shifted: ShiftedDcId,
    pub to_main: bool,
}

impl DcRoute {
    /// Resolve a caller-supplied DC against the current main DC.
    pub fn resolve(requested: ShiftedDcId, main_dc: i32) -> Self {
        if requested == 0 {
            Self { shifted: main_dc, to_main: true }
        } else if bare_dc_id(requested) == 0 {
            Self { shifted: shift_dc_id(main_dc, dc_id_shift(requested)), to_main: false }
        } else {
            Self { shifted: requested, to_main: false }
        }
    }

    /// The session id this route points at right now.
    pub fn target(&self, main_dc: i32) -> ShiftedDcId {
        if self.to_main { main_dc } else { self.shifted }
    }
}

// ─── DcState ──────────────────────────────────────────────────────────────────

/// Connection state of one session, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DcState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect scheduled after the given delay.
    WaitingRetry(Duration),
}

impl DcState {
    /// Decode the value sessions publish through an atomic: negative values
    /// are a pending retry delay in milliseconds.
    pub(crate) fn from_raw(raw: i32) -> Self {
        match raw {
            0 => Self::Disconnected,
            1 => Self::Connecting,
            2 => Self::Connected,
            n if n < 0 => Self::WaitingRetry(Duration::from_millis(n.unsigned_abs().into())),
            _ => Self::Disconnected,
        }
    }

    pub(crate) fn to_raw(self) -> i32 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::WaitingRetry(d) => -(d.as_millis().min(i32::MAX as u128) as i32).max(1),
        }
    }
}
