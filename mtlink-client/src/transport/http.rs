//! HTTP transport.
//!
//! Every packet is POSTed on its own to `http://<ip>:<port>/api`; the
//! response body, if any, is the server's next packet. Several posts may be
//! in flight at once. When none is, the server has no way to reach us, so
//! the session keeps one `http_wait` long-poll open.

use std::io;

use mtlink_mtproto::{FakePq, MessageSequencer};
use mtlink_wire::schema::ResPq;
use reqwest::header::CONTENT_TYPE;
use tokio::task::JoinSet;

use crate::config::DcEndpoint;
use crate::errors::TransportError;

pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    inflight: JoinSet<Result<Vec<u8>, TransportError>>,
}

impl HttpTransport {
    pub fn new(endpoint: &DcEndpoint) -> Result<Self, TransportError> {
        Self::with_url(endpoint.http_url())
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(Self { client, url: url.into(), inflight: JoinSet::new() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start a POST carrying `payload`. Its response arrives through
    /// [`recv`](Self::recv).
    pub fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(payload.to_vec());
        self.inflight.spawn(async move {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(TransportError::Status(status.as_u16()));
            }
            let body = response.bytes().await?;
            validate_body(&body)?;
            Ok(body.to_vec())
        });
        Ok(())
    }

    /// Next response body. Pending while nothing is in flight.
    ///
    /// An empty body (a long poll that ran out) is returned as an empty
    /// packet so the owner can decide whether to poll again.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        match self.inflight.join_next().await {
            None => std::future::pending().await,
            Some(Ok(result)) => result,
            Some(Err(e)) => Err(TransportError::Io(io::Error::other(e))),
        }
    }

    pub fn needs_http_wait(&self) -> bool {
        self.inflight.is_empty()
    }

    /// POST `req_pq` and wait for the matching `resPQ`.
    pub async fn probe(&mut self) -> Result<ResPq, TransportError> {
        let probe = FakePq::new()?;
        self.send(&probe.request(&mut MessageSequencer::new()))?;
        let reply = self.recv().await?;
        let res = probe.verify(&reply)?;
        tracing::debug!("[http] probe answered by {}", self.url);
        Ok(res)
    }
}

/// A body must be empty, or word-aligned and at least two words long.
fn validate_body(body: &[u8]) -> Result<(), TransportError> {
    if !body.is_empty() && (body.len() % 4 != 0 || body.len() < 8) {
        tracing::debug!("[http] bad response body of {} bytes", body.len());
        return Err(TransportError::Code(-500));
    }
    Ok(())
}
