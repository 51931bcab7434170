//! Instance configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::transport::{Connector, NetworkConnector};

// ─── TransportMode ────────────────────────────────────────────────────────────

/// Which transport sessions use.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransportMode {
    /// Race TCP and HTTP on every connect and keep the winner.
    #[default]
    Auto,
    /// Obfuscated TCP only.
    Tcp,
    /// HTTP POST only.
    Http,
}

// ─── DcEndpoint ───────────────────────────────────────────────────────────────

/// Network address of one DC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DcEndpoint {
    pub id: i32,
    pub ip: String,
    /// TCP port for the obfuscated transport.
    pub port: u16,
    /// Port for the HTTP transport.
    pub http_port: u16,
}

impl DcEndpoint {
    pub fn new(id: i32, ip: impl Into<String>, port: u16) -> Self {
        Self { id, ip: ip.into(), port, http_port: 80 }
    }

    pub fn tcp_addr(&self) -> String {
        if self.ip.contains(':') {
            format!("[{}]:{}", self.ip, self.port)
        } else {
            format!("{}:{}", self.ip, self.port)
        }
    }

    pub fn http_url(&self) -> String {
        if self.ip.contains(':') {
            format!("http://[{}]:{}/api", self.ip, self.http_port)
        } else {
            format!("http://{}:{}/api", self.ip, self.http_port)
        }
    }
}

/// Production DC addresses.
pub fn default_dc_endpoints() -> Vec<DcEndpoint> {
    vec![
        DcEndpoint::new(1, "149.154.175.53", 443),
        DcEndpoint::new(2, "149.154.167.51", 443),
        DcEndpoint::new(3, "149.154.175.100", 443),
        DcEndpoint::new(4, "149.154.167.91", 443),
        DcEndpoint::new(5, "91.108.56.130", 443),
    ]
}

// ─── InitParams ───────────────────────────────────────────────────────────────

/// Values sent in `invokeWithLayer(initConnection(...))`.
#[derive(Clone, Debug)]
pub struct InitParams {
    pub api_id: i32,
    pub layer: i32,
    pub device_model: String,
    pub system_version: String,
    pub app_version: String,
    pub system_lang_code: String,
    pub lang_pack: String,
    pub lang_code: String,
}

impl Default for InitParams {
    fn default() -> Self {
        Self {
            api_id: 0,
            layer: 224,
            device_model: "mtlink".into(),
            system_version: std::env::consts::OS.into(),
            app_version: env!("CARGO_PKG_VERSION").into(),
            system_lang_code: "en".into(),
            lang_pack: String::new(),
            lang_code: "en".into(),
        }
    }
}

// ─── Config ───────────────────────────────────────────────────────────────────

/// Configuration for [`crate::Instance::new`].
#[derive(Clone)]
pub struct Config {
    /// DC that `dc = 0` requests go to until a migration says otherwise.
    pub main_dc_id: i32,
    /// Known DC addresses.
    pub dc_endpoints: Vec<DcEndpoint>,
    /// Transport selection (default: race both).
    pub transport: TransportMode,
    /// 16-byte proxy secret mixed into the obfuscation keys.
    pub proxy_secret: Option<[u8; 16]>,
    /// First connect timeout; doubles on every timeout up to the max.
    pub min_connect_timeout: Duration,
    pub max_connect_timeout: Duration,
    /// How long a ready HTTP transport waits for TCP to catch up.
    pub http_grace: Duration,
    /// Largest accepted inbound frame, in bytes.
    pub max_packet_len: usize,
    /// `initConnection` parameters.
    pub init: InitParams,
    /// Whether the main DC holds a logged-in authorization that can be
    /// exported to other DCs.
    pub authorized: bool,
    /// Produces connections. Swap it out to run over something other than
    /// the real network.
    pub connector: Arc<dyn Connector>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            main_dc_id: 2,
            dc_endpoints: default_dc_endpoints(),
            transport: TransportMode::Auto,
            proxy_secret: None,
            min_connect_timeout: Duration::from_secs(1),
            max_connect_timeout: Duration::from_secs(8),
            http_grace: Duration::from_secs(2),
            max_packet_len: mtlink_mtproto::transport::MAX_PACKET_LEN,
            init: InitParams::default(),
            authorized: false,
            connector: Arc::new(NetworkConnector),
        }
    }
}

impl Config {
    /// Address of bare DC `dc`.
    pub fn endpoint(&self, dc: i32) -> Option<&DcEndpoint> {
        self.dc_endpoints.iter().find(|e| e.id == dc)
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("main_dc_id", &self.main_dc_id)
            .field("dc_endpoints", &self.dc_endpoints)
            .field("transport", &self.transport)
            .field("proxy_secret", &self.proxy_secret.map(|_| ".."))
            .field("authorized", &self.authorized)
            .finish_non_exhaustive()
    }
}
