//! Byte-level connections to a DC.
//!
//! A [`Connection`] is either an obfuscated TCP stream or an HTTP poster.
//! Neither heals itself: any error is returned to the owning session, which
//! drops the connection and asks its [`Connector`] for a new one.

pub mod auto;
pub mod http;
pub mod tcp;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::config::{DcEndpoint, TransportMode};
use crate::dc::ShiftedDcId;
use crate::errors::TransportError;

pub use auto::{AutoAction, AutoEvent, AutoState, Winner};
pub use http::HttpTransport;
pub use tcp::TcpTransport;

// ─── TransportKind ────────────────────────────────────────────────────────────

/// The transport a session ended up on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Http,
}

impl TransportKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Http => "HTTP",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ─── Connection ───────────────────────────────────────────────────────────────

/// A live connection.
pub enum Connection {
    Tcp(TcpTransport),
    Http(HttpTransport),
}

impl Connection {
    /// Send one packet (an unencrypted envelope).
    pub async fn send(&mut self, packet: &[u8]) -> Result<(), TransportError> {
        match self {
            Self::Tcp(t) => t.send(packet).await,
            Self::Http(h) => h.send(packet),
        }
    }

    /// Wait for the next inbound packet.
    ///
    /// Cancel-safe: dropping the future loses no data.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        match self {
            Self::Tcp(t) => t.recv().await,
            Self::Http(h) => h.recv().await,
        }
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Tcp(_) => TransportKind::Tcp,
            Self::Http(_) => TransportKind::Http,
        }
    }

    /// Whether the session must issue `http_wait` to get answers delivered.
    pub fn needs_http_wait(&self) -> bool {
        match self {
            Self::Tcp(_) => false,
            Self::Http(h) => h.needs_http_wait(),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Connection").field(&self.kind()).finish()
    }
}

// ─── Connector ────────────────────────────────────────────────────────────────

/// Everything a connector needs to reach one session's DC.
#[derive(Clone, Debug)]
pub struct ConnectTarget {
    /// Session the connection is for.
    pub dc: ShiftedDcId,
    pub endpoint: DcEndpoint,
    pub mode: TransportMode,
    pub secret: Option<[u8; 16]>,
    pub http_grace: Duration,
    pub max_packet_len: usize,
    /// Bound on each leg's connect and probe. The grace window comes on top.
    pub connect_timeout: Duration,
}

impl ConnectTarget {
    /// How long a whole connect may take, grace window included.
    pub fn deadline(&self) -> Duration {
        match self.mode {
            TransportMode::Auto => self.connect_timeout + self.http_grace,
            TransportMode::Tcp | TransportMode::Http => self.connect_timeout,
        }
    }
}

pub type ConnectFuture = Pin<Box<dyn Future<Output = Result<Connection, TransportError>> + Send>>;

/// Produces connections for sessions.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, target: ConnectTarget) -> ConnectFuture;
}

/// Connects over the real network.
///
/// * [`TransportMode::Tcp`]: obfuscated TCP, no probe.
/// * [`TransportMode::Http`]: HTTP, after a successful probe.
/// * [`TransportMode::Auto`]: both, probed in parallel; see [`auto::race`].
#[derive(Clone, Copy, Debug, Default)]
pub struct NetworkConnector;

impl Connector for NetworkConnector {
    fn connect(&self, target: ConnectTarget) -> ConnectFuture {
        Box::pin(async move {
            let limit = target.connect_timeout;
            let tcp = bounded(limit, async {
                let mut tcp = TcpTransport::open(&target).await?;
                if target.mode == TransportMode::Auto {
                    tcp.probe().await?;
                }
                Ok(tcp)
            });
            let http = bounded(limit, async {
                let mut http = HttpTransport::new(&target.endpoint)?;
                http.probe().await?;
                Ok(http)
            });
            match target.mode {
                TransportMode::Tcp => Ok(Connection::Tcp(tcp.await?)),
                TransportMode::Http => Ok(Connection::Http(http.await?)),
                TransportMode::Auto => Ok(match auto::race(tcp, http, target.http_grace).await? {
                    Winner::Tcp(t) => Connection::Tcp(t),
                    Winner::Http(h) => Connection::Http(h),
                }),
            }
        })
    }
}

/// Run one connect leg, failing with [`TransportError::Timeout`] past `limit`.
async fn bounded<T>(
    limit: Duration,
    leg: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(limit, leg).await.map_err(|_| TransportError::Timeout)?
}

// ─── Timers ───────────────────────────────────────────────────────────────────

/// Connect timeout that doubles every time an attempt times out.
#[derive(Debug)]
pub(crate) struct ConnectBackoff {
    timeout: Duration,
    min: Duration,
    max: Duration,
}

impl ConnectBackoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let min = min.max(Duration::from_millis(1));
        Self { timeout: min, min, max: max.max(min) }
    }

    /// Timeout for the attempt about to start.
    pub fn current(&self) -> Duration {
        self.timeout
    }

    pub fn on_timeout(&mut self) {
        self.timeout = (self.timeout * 2).min(self.max);
    }

    pub fn on_connected(&mut self) {
        self.timeout = self.min;
    }
}

/// Delay before reconnecting after a broken connection:
/// 1, 2, 3 ms, then 1 s doubling up to 64 s.
#[derive(Debug, Default)]
pub(crate) struct RetryDelay {
    failures: u32,
}

impl RetryDelay {
    pub fn next(&mut self) -> Duration {
        let ms = match self.failures {
            n @ 0..=2 => u64::from(n) + 1,
            n => (1000u64 << (n - 3).min(6)).min(64_000),
        };
        self.failures = self.failures.saturating_add(1);
        Duration::from_millis(ms)
    }

    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

/// Await an optional future; pending forever when there is none.
pub(crate) async fn poll_opt<F: Future + Unpin>(fut: &mut Option<F>) -> F::Output {
    match fut {
        Some(f) => f.await,
        None => std::future::pending().await,
    }
}
