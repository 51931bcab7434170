//! Obfuscated abridged TCP transport.
//!
//! After the 64-byte handshake header every byte in both directions runs
//! through AES-256-CTR keyed from that header, so the stream looks like
//! noise to anything in between. Inside the cipher, packets use abridged
//! framing.

use std::time::Duration;

use mtlink_crypto::obfuscation::ABRIDGED_TAG;
use mtlink_crypto::Obfuscator;
use mtlink_mtproto::transport::encode_packet;
use mtlink_mtproto::{FakePq, Frame, FrameDecoder, MessageSequencer};
use mtlink_wire::schema::ResPq;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use super::ConnectTarget;
use crate::errors::TransportError;

const KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// Anything a TCP transport can run over.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub struct TcpTransport {
    stream: Box<dyn AsyncStream>,
    obf: Obfuscator,
    decoder: FrameDecoder,
    sent_packets: u32,
}

impl TcpTransport {
    /// Connect to the target's TCP address and send the handshake header.
    pub async fn open(target: &ConnectTarget) -> Result<Self, TransportError> {
        let addr = target.endpoint.tcp_addr();
        tracing::debug!("[tcp] connecting to {addr} for DC {}", target.dc);
        let stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(true)?;
        socket2::SockRef::from(&stream)
            .set_tcp_keepalive(&socket2::TcpKeepalive::new().with_time(KEEPALIVE_TIME))?;
        Self::handshake(stream, target.secret.as_ref(), target.max_packet_len).await
    }

    /// Start an obfuscated session over an already-open stream.
    ///
    /// A fresh nonce, and so a fresh key pair, is generated on every call.
    pub async fn handshake<S: AsyncStream + 'static>(
        mut stream: S,
        secret: Option<&[u8; 16]>,
        max_packet_len: usize,
    ) -> Result<Self, TransportError> {
        let (obf, header) = Obfuscator::client(ABRIDGED_TAG, secret)?;
        stream.write_all(&header).await?;
        stream.flush().await?;
        tracing::trace!("[tcp] handshake header sent");
        Ok(Self {
            stream: Box::new(stream),
            obf,
            decoder: FrameDecoder::new(max_packet_len),
            sent_packets: 0,
        })
    }

    /// Frame, encrypt and write one packet.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let mut frame = encode_packet(payload);
        self.obf.encrypt(&mut frame);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;
        self.sent_packets = self.sent_packets.wrapping_add(1);
        Ok(())
    }

    /// Read until one complete packet is available.
    pub async fn recv(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut chunk = [0u8; 16 * 1024];
        loop {
            match self.decoder.next_frame()? {
                Some(Frame::Packet(packet)) => return Ok(packet),
                Some(Frame::TransportError(code)) => return Err(TransportError::Code(code)),
                None => {}
            }
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(TransportError::Closed);
            }
            self.obf.decrypt(&mut chunk[..n]);
            self.decoder.push(&chunk[..n]);
        }
    }

    /// Send `req_pq` and wait for the matching `resPQ`.
    pub async fn probe(&mut self) -> Result<ResPq, TransportError> {
        let probe = FakePq::new()?;
        self.send(&probe.request(&mut MessageSequencer::new())).await?;
        let reply = self.recv().await?;
        let res = probe.verify(&reply)?;
        tracing::debug!("[tcp] probe answered");
        Ok(res)
    }

    pub fn sent_packets(&self) -> u32 {
        self.sent_packets
    }

    pub fn received_packets(&self) -> u32 {
        self.decoder.packets()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtlink_crypto::obfuscation::NONCE_LEN;
    use tokio::io::DuplexStream;

    async fn accept(server: &mut DuplexStream) -> Obfuscator {
        let mut header = [0u8; NONCE_LEN];
        server.read_exact(&mut header).await.unwrap();
        Obfuscator::server(&header, None, ABRIDGED_TAG).unwrap()
    }

    async fn server_write(server: &mut DuplexStream, obf: &mut Obfuscator, payload: &[u8]) {
        let mut frame = encode_packet(payload);
        obf.encrypt(&mut frame);
        server.write_all(&frame).await.unwrap();
    }

    #[tokio::test]
    async fn packets_cross_in_both_directions() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut tcp = TcpTransport::handshake(client, None, 1 << 20).await.unwrap();
        let mut obf = accept(&mut server).await;

        tcp.send(&[1, 2, 3, 4, 5, 6, 7, 8]).await.unwrap();
        let mut wire = [0u8; 9];
        server.read_exact(&mut wire).await.unwrap();
        obf.decrypt(&mut wire);
        assert_eq!(wire, [2, 1, 2, 3, 4, 5, 6, 7, 8]);

        server_write(&mut server, &mut obf, &[9; 12]).await;
        assert_eq!(tcp.recv().await.unwrap(), vec![9; 12]);
        assert_eq!((tcp.sent_packets(), tcp.received_packets()), (1, 1));
    }

    #[tokio::test]
    async fn one_word_frame_is_transport_error() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut tcp = TcpTransport::handshake(client, None, 1 << 20).await.unwrap();
        let mut obf = accept(&mut server).await;

        server_write(&mut server, &mut obf, &(-404i32).to_le_bytes()).await;
        let err = tcp.recv().await.unwrap_err();
        assert!(err.key_possibly_bad());
    }

    #[tokio::test]
    async fn peer_close_is_reported() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut tcp = TcpTransport::handshake(client, None, 1 << 20).await.unwrap();
        accept(&mut server).await;
        drop(server);
        assert!(matches!(tcp.recv().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn oversized_frame_is_fatal() {
        let (client, mut server) = tokio::io::duplex(4096);
        let mut tcp = TcpTransport::handshake(client, None, 64).await.unwrap();
        let mut obf = accept(&mut server).await;

        server_write(&mut server, &mut obf, &[0; 128]).await;
        assert!(matches!(tcp.recv().await, Err(TransportError::Frame(_))));
    }
}
