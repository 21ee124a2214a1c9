//! Transport abstraction for byte-level I/O
//!
//! Separates I/O concerns from protocol logic: a transport turns an
//! [`Endpoint`] description into a pair of blocking halves the connection
//! layer drives from its own threads.
//!
//! - **Reader half**: blocking reads with a bounded deadline
//!   ([`crate::constants::READ_TIMEOUT_MS`]) so a close request is noticed
//!   promptly even with no traffic.
//! - **Writer half**: blocking writes, one buffer at a time.
//! - **Shutdown handle**: best-effort wake of a read blocked in the OS
//!   (TCP shutdown, UDP self-datagram); transports without one fall back
//!   to the read deadline.
//!
//! Each transport owns exactly one OS-level handle; the writer half is a
//! clone of it where the OS supports that (`try_clone`), never a second
//! endpoint.

pub mod serial;
pub mod tcp;
pub mod udp;

use crate::error::{LinkError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

/// Concrete transport kind of an open connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    Udp,
    #[serde(rename = "tcp")]
    TcpClient,
    #[serde(rename = "tcp-l")]
    TcpServer,
    Serial,
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Udp => "udp",
            Self::TcpClient => "tcp",
            Self::TcpServer => "tcp-l",
            Self::Serial => "serial",
        };
        f.write_str(name)
    }
}

/// Description of one endpoint, sufficient to open it
///
/// This is both the construction parameter set and the config-file
/// representation (tagged by `transport`, tag values matching the URL
/// schemes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "lowercase")]
pub enum Endpoint {
    /// Bound UDP socket; without a fixed remote, sends target the source
    /// of the most recently received datagram
    Udp {
        bind_host: String,
        bind_port: u16,
        #[serde(default)]
        remote_host: Option<String>,
        #[serde(default)]
        remote_port: Option<u16>,
    },
    /// Outgoing TCP connection
    #[serde(rename = "tcp")]
    TcpClient { host: String, port: u16 },
    /// Listening TCP socket paired with its first accepted peer
    #[serde(rename = "tcp-l")]
    TcpServer { bind_host: String, bind_port: u16 },
    /// Serial device
    Serial { path: String, baud: u32 },
}

impl Endpoint {
    pub fn kind(&self) -> LinkKind {
        match self {
            Self::Udp { .. } => LinkKind::Udp,
            Self::TcpClient { .. } => LinkKind::TcpClient,
            Self::TcpServer { .. } => LinkKind::TcpServer,
            Self::Serial { .. } => LinkKind::Serial,
        }
    }
}

/// Reader half of one transport
///
/// `read_chunk` blocks for at most the read deadline. `Ok(0)` means the
/// transport is gone (TCP peer closed the stream, serial device
/// disconnected); `ErrorKind::TimedOut`/`WouldBlock` mean the deadline
/// passed without data and the caller should check its stop flag and retry.
pub(crate) trait LinkRead: Send {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Writer half of one transport
///
/// Writes the whole buffer or fails. Implementations swallow conditions
/// that are routine for their transport (no UDP peer yet, stray ICMP
/// refusals) and only surface faults that make the link unusable.
pub(crate) trait LinkWrite: Send {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;
}

/// Best-effort wake of a reader blocked in the OS
pub(crate) trait LinkShutdown: Send {
    fn shutdown(&self);
}

/// One opened transport, split for the connection's two threads
pub(crate) struct IoHalves {
    pub reader: Box<dyn LinkRead>,
    pub writer: Box<dyn LinkWrite>,
    pub closer: Box<dyn LinkShutdown>,
    pub kind: LinkKind,
    pub local_addr: Option<SocketAddr>,
}

/// Open the OS resource an endpoint describes
pub(crate) fn open_endpoint(endpoint: &Endpoint) -> Result<IoHalves> {
    match endpoint {
        Endpoint::Udp {
            bind_host,
            bind_port,
            remote_host,
            remote_port,
        } => {
            let remote = match (remote_host, remote_port) {
                (Some(host), Some(port)) => Some(resolve(host, *port)?),
                (None, None) => None,
                // Config-level mismatch the URL parser can never produce
                (Some(host), None) => {
                    return Err(LinkError::ConfigValidation {
                        field: "remote_port",
                        reason: format!("remote host '{}' given without a port", host),
                    })
                }
                (None, Some(port)) => {
                    return Err(LinkError::ConfigValidation {
                        field: "remote_host",
                        reason: format!("remote port {} given without a host", port),
                    })
                }
            };
            udp::open(bind_host, *bind_port, remote)
        }
        Endpoint::TcpClient { host, port } => tcp::connect(host, *port),
        Endpoint::TcpServer {
            bind_host,
            bind_port,
        } => tcp::listen(bind_host, *bind_port),
        Endpoint::Serial { path, baud } => serial::open(path, *baud),
    }
}

/// Resolve `host:port`, preferring IPv4 so both ends of a loopback link
/// see the same address family
pub(crate) fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| LinkError::Resolve {
            host: host.to_string(),
            source: e,
        })?
        .collect();

    addrs
        .iter()
        .find(|a| a.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| LinkError::Resolve {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses returned"),
        })
}

/// Timeout-class errors that mean "deadline passed, nothing happened"
pub(crate) fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
