//! Outbound one-shot TCP transport.
//!
//! The [`Transport`] trait is the seam between the gossip fabric and the
//! network: real deployments use [`TcpTransport`]; cluster unit tests use
//! mocks.

use crate::message::Message;
use gossipkv_common::NodeId;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("dial timeout to {0}")]
    DialTimeout(String),
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One-shot message delivery.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Dial `addr`, send a single message, close. Errors mean the peer is
    /// unreachable.
    async fn send(&self, addr: &str, msg: &Message) -> Result<(), WireError>;

    /// Dial `addr`, send an ELECTION challenge, and wait for an `OK` reply.
    /// Returns `false` when no `OK` arrives in time.
    async fn send_election(&self, addr: &str, from: &NodeId) -> Result<bool, WireError>;
}

/// The production TCP transport.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    dial_timeout: Duration,
    reply_timeout: Duration,
}

impl TcpTransport {
    pub fn new(dial_timeout: Duration, reply_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            reply_timeout,
        }
    }

    async fn dial(&self, addr: &str) -> Result<TcpStream, WireError> {
        match timeout(self.dial_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(WireError::Connect {
                addr: addr.to_string(),
                source: e,
            }),
            Err(_) => Err(WireError::DialTimeout(addr.to_string())),
        }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send(&self, addr: &str, msg: &Message) -> Result<(), WireError> {
        let mut stream = self.dial(addr).await?;
        stream.write_all(msg.encode().as_bytes()).await?;
        stream.shutdown().await?;
        Ok(())
    }

    async fn send_election(&self, addr: &str, from: &NodeId) -> Result<bool, WireError> {
        let stream = self.dial(addr).await?;
        let (read_half, mut write_half) = stream.into_split();

        let challenge = Message::Election { from: from.clone() }.encode();
        write_half.write_all(challenge.as_bytes()).await?;

        let mut line = String::new();
        let mut reader = BufReader::new(read_half);
        match timeout(self.reply_timeout, reader.read_line(&mut line)).await {
            Ok(Ok(n)) if n > 0 => Ok(matches!(Message::parse(&line), Ok(Message::ElectionOk))),
            Ok(Ok(_)) => Ok(false),  // peer closed without replying
            Ok(Err(e)) => Err(WireError::Io(e)),
            Err(_) => Ok(false), // treat a silent peer as "no response"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    fn transport() -> TcpTransport {
        TcpTransport::new(Duration::from_millis(500), Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_send_delivers_one_line() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = String::new();
            stream.read_to_string(&mut buf).await.unwrap();
            buf
        });

        transport()
            .send(
                &addr,
                &Message::Ping {
                    from: NodeId::new("node1"),
                },
            )
            .await
            .unwrap();

        assert_eq!(server.await.unwrap(), "PING from node1\n");
    }

    #[tokio::test]
    async fn test_send_to_closed_port_errors() {
        // Bind and immediately drop to get a port nothing listens on.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let result = transport()
            .send(
                &addr,
                &Message::Ping {
                    from: NodeId::new("node1"),
                },
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_election_gets_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut line = String::new();
            BufReader::new(read_half).read_line(&mut line).await.unwrap();
            assert_eq!(line, "ELECTION from node1\n");
            write_half.write_all(b"OK\n").await.unwrap();
        });

        let answered = transport()
            .send_election(&addr, &NodeId::new("node1"))
            .await
            .unwrap();
        assert!(answered);
    }

    #[tokio::test]
    async fn test_election_silent_peer_is_no_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            // Accept, read, never reply.
            let (stream, _) = listener.accept().await.unwrap();
            let mut line = String::new();
            let (read_half, _write_half) = stream.into_split();
            let _ = BufReader::new(read_half).read_line(&mut line).await;
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let answered = transport()
            .send_election(&addr, &NodeId::new("node1"))
            .await
            .unwrap();
        assert!(!answered);
    }
}
