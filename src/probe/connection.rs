//! MySQL instance connection test.
//!
//! Opens a TCP connection and reads the server's initial packet without
//! authenticating.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::ProbeError;
use crate::monitor::Status;

/// Largest greeting we bother reading.
const MAX_GREETING_LEN: usize = 1024;

/// First packet sent by a MySQL server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Greeting {
    /// Protocol 10 handshake.
    Handshake { server_version: String },
    /// Server refused the client before the handshake (e.g. host blocked).
    Refused { code: u16, message: String },
}

/// Test whether a MySQL server accepts connections at `host:port`.
///
/// Refused or silent servers are a `Refusing` status, not an error; only
/// name resolution failures are reported as errors.
pub async fn test_connection(host: &str, port: u16, timeout: Duration) -> Result<Status, ProbeError> {
    let deadline = Instant::now() + timeout;

    let addrs: Vec<_> = tokio::time::timeout(timeout, tokio::net::lookup_host((host, port)))
        .await
        .map_err(|_| ProbeError::Timeout(timeout))?
        .map_err(|e| ProbeError::Network(format!("DNS resolution failed for {}: {}", host, e)))?
        .collect();
    if addrs.is_empty() {
        return Err(ProbeError::Network(format!("No addresses found for {}", host)));
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    let mut stream = match tokio::time::timeout(remaining, TcpStream::connect(&addrs[..])).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::debug!("Connection to {}:{} failed: {}", host, port, e);
            return Ok(Status::Refusing);
        }
        Err(_) => {
            tracing::debug!("Connection to {}:{} timed out", host, port);
            return Ok(Status::Refusing);
        }
    };

    let mut buf = Vec::with_capacity(128);
    let mut chunk = [0u8; 256];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let n = match tokio::time::timeout(remaining, stream.read(&mut chunk)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::debug!("Reading greeting from {}:{} failed: {}", host, port, e);
                return Ok(Status::Refusing);
            }
            Err(_) => return Ok(Status::Refusing),
        };
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if packet_complete(&buf) || buf.len() >= MAX_GREETING_LEN {
            break;
        }
    }

    match parse_greeting(&buf) {
        Ok(Greeting::Handshake { server_version }) => {
            tracing::debug!("{}:{} accepting connections (MySQL {})", host, port, server_version);
            Ok(Status::Accepting)
        }
        Ok(Greeting::Refused { code, message }) => {
            tracing::debug!("{}:{} refused connection: {} {}", host, port, code, message);
            Ok(Status::Refusing)
        }
        Err(e) => {
            tracing::debug!("{}:{} did not greet like a MySQL server: {}", host, port, e);
            Ok(Status::Refusing)
        }
    }
}

fn packet_complete(buf: &[u8]) -> bool {
    buf.len() >= 4 && buf.len() >= 4 + payload_len(buf)
}

fn payload_len(buf: &[u8]) -> usize {
    u32::from_le_bytes([buf[0], buf[1], buf[2], 0]) as usize
}

/// Parse the first packet sent by a MySQL server.
pub fn parse_greeting(packet: &[u8]) -> Result<Greeting, ProbeError> {
    if packet.len() < 5 {
        return Err(ProbeError::Network(format!(
            "greeting too short: {} bytes",
            packet.len()
        )));
    }

    let end = (4 + payload_len(packet)).min(packet.len());
    let payload = &packet[4..end];

    match payload.first() {
        Some(0x0a) => {
            let version = payload[1..]
                .split(|b| *b == 0)
                .next()
                .unwrap_or_default();
            Ok(Greeting::Handshake {
                server_version: String::from_utf8_lossy(version).into_owned(),
            })
        }
        Some(0xff) if payload.len() >= 3 => Ok(Greeting::Refused {
            code: u16::from_le_bytes([payload[1], payload[2]]),
            message: String::from_utf8_lossy(&payload[3..]).into_owned(),
        }),
        Some(other) => Err(ProbeError::Network(format!(
            "unexpected protocol marker 0x{:02x}",
            other
        ))),
        None => Err(ProbeError::Network("empty greeting payload".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn handshake_packet(version: &str) -> Vec<u8> {
        let mut payload = vec![0x0a];
        payload.extend_from_slice(version.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&[1, 0, 0, 0]); // connection id
        let len = payload.len() as u32;
        let mut packet = len.to_le_bytes()[..3].to_vec();
        packet.push(0);
        packet.extend(payload);
        packet
    }

    #[test]
    fn test_parse_handshake() {
        let greeting = parse_greeting(&handshake_packet("8.0.36")).unwrap();
        assert_eq!(
            greeting,
            Greeting::Handshake {
                server_version: "8.0.36".to_string()
            }
        );
    }

    #[test]
    fn test_parse_error_packet() {
        let message = b"Host 'x' is not allowed to connect";
        let mut payload = vec![0xff, 0x6a, 0x04];
        payload.extend_from_slice(message);
        let mut packet = vec![payload.len() as u8, 0, 0, 0];
        packet.extend(payload);

        match parse_greeting(&packet).unwrap() {
            Greeting::Refused { code, message } => {
                assert_eq!(code, 1130);
                assert!(message.contains("not allowed"));
            }
            other => panic!("unexpected greeting: {:?}", other),
        }
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_greeting(b"HTTP/1.1 400").is_err());
        assert!(parse_greeting(&[1, 0]).is_err());
    }

    #[tokio::test]
    async fn test_connection_accepting() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(&handshake_packet("5.7.44-log")).await.unwrap();
        });

        let status = test_connection("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(status, Status::Accepting);
    }

    #[tokio::test]
    async fn test_connection_refused_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let status = test_connection("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(status, Status::Refusing);
    }
}
