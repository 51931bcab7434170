use std::net::SocketAddr;
use std::time::Duration;

use mtlink_client::transport::HttpTransport;
use mtlink_client::{
    ConnectTarget, Connector, DcEndpoint, NetworkConnector, TransportKind, TransportMode,
};
use mtlink_mtproto::MessageId;
use mtlink_mtproto::message::{parse_plaintext, plaintext_bytes};
use mtlink_wire::schema::{ReqPq, ResPq};
use mtlink_wire::{Deserializable, Serializable};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const LIMIT: Duration = Duration::from_secs(10);

/// Read one HTTP request and return its body.
async fn read_body(sock: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let len: usize = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map_or(0, |v| v.trim().parse().unwrap());
            while buf.len() < end + 4 + len {
                let n = sock.read(&mut chunk).await.unwrap();
                assert!(n > 0, "request body cut short");
                buf.extend_from_slice(&chunk[..n]);
            }
            return buf[end + 4..end + 4 + len].to_vec();
        }
        let n = sock.read(&mut chunk).await.unwrap();
        if n == 0 {
            return Vec::new();
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn res_pq_for(request: &[u8]) -> Vec<u8> {
    let (_, body) = parse_plaintext(request).unwrap();
    let req = ReqPq::from_bytes(body).unwrap();
    let res = ResPq {
        nonce: req.nonce,
        server_nonce: [7; 16],
        pq: vec![0x17, 0xed, 0x48, 0x94, 0x1a, 0x08, 0xf9, 0x81],
        server_public_key_fingerprints: vec![1],
    };
    plaintext_bytes(MessageId(0x5f00_0000_0000_0001), &res.to_bytes())
}

/// A DC HTTP endpoint answering every POST with `status` (and a `resPQ`
/// when the status is 200).
async fn http_dc(status: u16) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            tokio::spawn(async move {
                let request = read_body(&mut sock).await;
                let reply = if status == 200 { res_pq_for(&request) } else { Vec::new() };
                let head = format!(
                    "HTTP/1.1 {status} Status\r\nContent-Length: {}\r\n\
                     Content-Type: application/octet-stream\r\nConnection: close\r\n\r\n",
                    reply.len()
                );
                let _ = sock.write_all(head.as_bytes()).await;
                let _ = sock.write_all(&reply).await;
            });
        }
    });
    addr
}

/// A local port nothing listens on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn http_probe_gets_res_pq() {
    let addr = http_dc(200).await;
    let mut http = HttpTransport::with_url(format!("http://{addr}/api")).unwrap();

    let res = timeout(LIMIT, http.probe()).await.unwrap().unwrap();
    assert_eq!(res.server_nonce, [7; 16]);
    assert!(http.needs_http_wait(), "no post left in flight");
}

#[tokio::test]
async fn http_status_is_a_negative_code() {
    let addr = http_dc(404).await;
    let mut http = HttpTransport::with_url(format!("http://{addr}/api")).unwrap();

    let err = timeout(LIMIT, http.probe()).await.unwrap().unwrap_err();
    assert_eq!(err.code(), Some(-404));
    assert!(err.key_possibly_bad());
}

#[tokio::test]
async fn auto_falls_back_to_http_when_tcp_is_refused() {
    let http = http_dc(200).await;
    let mut endpoint = DcEndpoint::new(2, "127.0.0.1", closed_port().await);
    endpoint.http_port = http.port();
    let target = ConnectTarget {
        dc: 2,
        endpoint,
        mode: TransportMode::Auto,
        secret: None,
        http_grace: Duration::from_millis(200),
        max_packet_len: 1 << 20,
        connect_timeout: Duration::from_secs(5),
    };

    let conn = timeout(LIMIT, NetworkConnector.connect(target)).await.unwrap().unwrap();
    assert_eq!(conn.kind(), TransportKind::Http);
}

#[tokio::test]
async fn tcp_mode_reports_refusal() {
    let endpoint = DcEndpoint::new(2, "127.0.0.1", closed_port().await);
    let target = ConnectTarget {
        dc: 2,
        endpoint,
        mode: TransportMode::Tcp,
        secret: None,
        http_grace: Duration::from_millis(200),
        max_packet_len: 1 << 20,
        connect_timeout: Duration::from_secs(5),
    };

    let err = timeout(LIMIT, NetworkConnector.connect(target)).await.unwrap().unwrap_err();
    assert!(matches!(err, mtlink_client::TransportError::Io(_)));
}
