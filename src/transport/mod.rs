//! Transport module - network-name classification and socket binding.
//!
//! Network names follow the conventional table:
//!
//! - `tcp`, `tcp4`, `tcp6`, `unix`, `unixpacket` → stream transport
//! - `udp`, `udp4`, `udp6`, `unixgram`, `ip*` → datagram transport
//!
//! Of those, `unixpacket` (SOCK_SEQPACKET), `unixgram` and raw `ip*`
//! sockets are recognized but rejected at bind time: tokio exposes neither,
//! and a reply path to unnamed datagram Unix peers is not reliable.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, UdpSocket};

#[cfg(unix)]
use std::path::PathBuf;
#[cfg(unix)]
use tokio::net::UnixListener;

use crate::error::{MuxwireError, Result};

/// Dispatch family of a network name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    /// Connection-oriented: accept loop plus per-connection read loop.
    Stream,
    /// Connectionless: single reader, per-datagram dispatch.
    Datagram,
}

/// Classify a network name into its dispatch family.
pub fn classify(network: &str) -> Result<NetworkKind> {
    match network {
        "tcp" | "tcp4" | "tcp6" | "unix" | "unixpacket" => Ok(NetworkKind::Stream),
        "udp" | "udp4" | "udp6" | "unixgram" => Ok(NetworkKind::Datagram),
        n if n == "ip" || n.starts_with("ip:") || n.starts_with("ip4") || n.starts_with("ip6") => {
            Ok(NetworkKind::Datagram)
        }
        other => Err(MuxwireError::Unsupported(format!(
            "network '{}' is not recognized",
            other
        ))),
    }
}

/// Boxed read half of an accepted stream.
pub(crate) type StreamReader = Box<dyn AsyncRead + Send + Unpin>;
/// Boxed write half of an accepted stream.
pub(crate) type StreamWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A bound stream listener, TCP or Unix.
#[derive(Debug)]
pub(crate) enum StreamListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: UnixListener,
        path: PathBuf,
    },
}

#[cfg(unix)]
impl Drop for StreamListener {
    fn drop(&mut self) {
        if let StreamListener::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}

impl StreamListener {
    /// Bind a stream listener for the given network name.
    pub(crate) async fn bind(network: &str, addr: &str) -> Result<Self> {
        match network {
            "tcp" | "tcp4" | "tcp6" => {
                let listener = TcpListener::bind(addr).await.map_err(MuxwireError::Listen)?;
                Ok(StreamListener::Tcp(listener))
            }
            #[cfg(unix)]
            "unix" => {
                let path = PathBuf::from(addr);
                if path.exists() {
                    std::fs::remove_file(&path).map_err(MuxwireError::Listen)?;
                }
                let listener = UnixListener::bind(&path).map_err(MuxwireError::Listen)?;
                Ok(StreamListener::Unix { listener, path })
            }
            #[cfg(not(unix))]
            "unix" => Err(MuxwireError::Unsupported(
                "unix sockets require a unix platform".to_string(),
            )),
            "unixpacket" => Err(MuxwireError::Unsupported(
                "unixpacket (SOCK_SEQPACKET) is not supported".to_string(),
            )),
            other => Err(MuxwireError::Unsupported(format!(
                "network '{}' is not a stream network",
                other
            ))),
        }
    }

    /// Accept one connection, split into boxed halves.
    ///
    /// The remote address is reported when the transport has one (TCP).
    pub(crate) async fn accept(
        &self,
    ) -> std::io::Result<(StreamReader, StreamWriter, Option<SocketAddr>)> {
        match self {
            StreamListener::Tcp(listener) => {
                let (stream, peer) = listener.accept().await?;
                let (read, write) = stream.into_split();
                Ok((Box::new(read), Box::new(write), Some(peer)))
            }
            #[cfg(unix)]
            StreamListener::Unix { listener, .. } => {
                let (stream, _addr) = listener.accept().await?;
                let (read, write) = stream.into_split();
                Ok((Box::new(read), Box::new(write), None))
            }
        }
    }

    /// Local address, for TCP listeners bound to port 0.
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            StreamListener::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            StreamListener::Unix { .. } => None,
        }
    }
}

/// Bind the packet socket for a datagram network name.
pub(crate) async fn bind_datagram(network: &str, addr: &str) -> Result<UdpSocket> {
    match network {
        "udp" | "udp4" | "udp6" => UdpSocket::bind(addr).await.map_err(MuxwireError::Listen),
        "unixgram" => Err(MuxwireError::Unsupported(
            "unixgram sockets are not supported".to_string(),
        )),
        other => Err(MuxwireError::Unsupported(format!(
            "network '{}' is not a datagram network",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_stream_names() {
        for name in ["tcp", "tcp4", "tcp6", "unix", "unixpacket"] {
            assert_eq!(classify(name).unwrap(), NetworkKind::Stream);
        }
    }

    #[test]
    fn test_classify_datagram_names() {
        for name in ["udp", "udp4", "udp6", "unixgram", "ip4:icmp", "ip6:58", "ip"] {
            assert_eq!(classify(name).unwrap(), NetworkKind::Datagram);
        }
    }

    #[test]
    fn test_classify_rejects_unknown() {
        assert!(matches!(
            classify("carrier-pigeon").unwrap_err(),
            MuxwireError::Unsupported(_)
        ));
    }

    #[tokio::test]
    async fn test_tcp_bind_and_local_addr() {
        let listener = StreamListener::bind("tcp", "127.0.0.1:0").await.unwrap();
        assert!(listener.local_addr().is_some());
    }

    #[tokio::test]
    async fn test_unixpacket_rejected_at_bind() {
        assert!(matches!(
            StreamListener::bind("unixpacket", "/tmp/x.sock").await.unwrap_err(),
            MuxwireError::Unsupported(_)
        ));
    }

    #[tokio::test]
    async fn test_unixgram_rejected_at_bind() {
        assert!(matches!(
            bind_datagram("unixgram", "/tmp/x.sock").await.unwrap_err(),
            MuxwireError::Unsupported(_)
        ));
    }

    #[tokio::test]
    async fn test_udp_bind() {
        assert!(bind_datagram("udp", "127.0.0.1:0").await.is_ok());
    }
}
