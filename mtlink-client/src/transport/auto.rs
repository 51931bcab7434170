//! Racing TCP against HTTP.
//!
//! Both legs are probed at once. TCP wins as soon as it answers. HTTP wins
//! when TCP fails, or when TCP is still silent a short grace period after
//! HTTP answered. Whatever loses is dropped before the winner is returned.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::time::Sleep;

use super::poll_opt;

// ─── State machine ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoState {
    WaitingBoth,
    WaitingHttp,
    WaitingTcp,
    /// HTTP answered; TCP still has until the grace timer fires.
    HttpReady,
    UsingHttp,
    UsingTcp,
    /// Both legs failed.
    FinishedWork,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoEvent {
    TcpOk,
    TcpFail,
    HttpOk,
    HttpFail,
    GraceExpired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AutoAction {
    Wait,
    ArmGrace,
    AdoptTcp,
    AdoptHttp,
    Fail,
}

impl AutoState {
    pub fn on(self, event: AutoEvent) -> (Self, AutoAction) {
        use AutoAction::*;
        use AutoEvent::*;
        use AutoState::*;

        match (self, event) {
            (WaitingBoth | WaitingTcp | HttpReady, TcpOk) => (UsingTcp, AdoptTcp),
            (WaitingBoth, TcpFail) => (WaitingHttp, Wait),
            (WaitingBoth, HttpOk) => (HttpReady, ArmGrace),
            (WaitingBoth, HttpFail) => (WaitingTcp, Wait),
            (WaitingHttp, HttpOk) => (UsingHttp, AdoptHttp),
            (WaitingHttp, HttpFail) | (WaitingTcp, TcpFail) => (FinishedWork, Fail),
            (HttpReady, TcpFail | GraceExpired) => (UsingHttp, AdoptHttp),
            (state, _) => (state, Wait),
        }
    }
}

// ─── Race ─────────────────────────────────────────────────────────────────────

/// The transport that won a [`race`].
#[derive(Debug)]
pub enum Winner<T, H> {
    Tcp(T),
    Http(H),
}

/// Drive both connection attempts through [`AutoState`].
///
/// Each future resolves once its transport has answered a probe. If both
/// fail, the error of the last one to fail is returned.
pub async fn race<T, H, E, FT, FH>(tcp: FT, http: FH, grace: Duration) -> Result<Winner<T, H>, E>
where
    FT: Future<Output = Result<T, E>>,
    FH: Future<Output = Result<H, E>>,
{
    let mut tcp = Some(Box::pin(tcp));
    let mut http = Some(Box::pin(http));
    let mut grace_timer: Option<Pin<Box<Sleep>>> = None;
    let mut tcp_ready = None;
    let mut http_ready = None;
    let mut last_error = None;
    let mut state = AutoState::WaitingBoth;

    loop {
        let event = tokio::select! {
            res = poll_opt(&mut tcp) => {
                tcp = None;
                match res {
                    Ok(t) => {
                        tcp_ready = Some(t);
                        AutoEvent::TcpOk
                    }
                    Err(e) => {
                        last_error = Some(e);
                        AutoEvent::TcpFail
                    }
                }
            }
            res = poll_opt(&mut http) => {
                http = None;
                match res {
                    Ok(h) => {
                        http_ready = Some(h);
                        AutoEvent::HttpOk
                    }
                    Err(e) => {
                        last_error = Some(e);
                        AutoEvent::HttpFail
                    }
                }
            }
            () = poll_opt(&mut grace_timer) => {
                grace_timer = None;
                AutoEvent::GraceExpired
            }
        };

        let (next, action) = state.on(event);
        tracing::debug!("[auto] {state:?} --{event:?}--> {next:?}");
        state = next;

        match action {
            AutoAction::Wait => {}
            AutoAction::ArmGrace => grace_timer = Some(Box::pin(tokio::time::sleep(grace))),
            AutoAction::AdoptTcp => {
                drop(http.take());
                drop(http_ready.take());
                if let Some(t) = tcp_ready.take() {
                    return Ok(Winner::Tcp(t));
                }
            }
            AutoAction::AdoptHttp => {
                drop(tcp.take());
                if let Some(h) = http_ready.take() {
                    return Ok(Winner::Http(h));
                }
            }
            AutoAction::Fail => {
                if let Some(e) = last_error.take() {
                    return Err(e);
                }
            }
        }
    }
}
