//! UDP transport
//!
//! One bound socket per connection. Two peer modes:
//! - **Fixed remote**: every send targets the configured address.
//! - **Dynamic peer**: sends target the source of the most recently
//!   received datagram, so an anonymous peer (or an echo test) can talk
//!   first and be answered.
//!
//! The socket is built through `socket2` and left blocking with a read
//! deadline. `SO_REUSEADDR` is not set: a second bind to the same address
//! must fail.

use super::{IoHalves, LinkKind, LinkRead, LinkShutdown, LinkWrite};
use crate::constants::READ_TIMEOUT_MS;
use crate::error::{LinkError, Result};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Bind a UDP socket and split it into transport halves
pub(crate) fn open(
    bind_host: &str,
    bind_port: u16,
    remote: Option<SocketAddr>,
) -> Result<IoHalves> {
    let bind_addr = super::resolve(bind_host, bind_port)?;

    let domain = Domain::for_address(bind_addr);
    let map_bind = |e: io::Error| LinkError::UdpBind {
        addr: bind_addr,
        source: e,
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(map_bind)?;
    socket.bind(&bind_addr.into()).map_err(map_bind)?;
    let socket: UdpSocket = socket.into();
    socket
        .set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)))
        .map_err(map_bind)?;

    let local_addr = socket.local_addr().map_err(map_bind)?;
    let socket = Arc::new(socket);

    // Fixed mode pre-seeds the slot and never updates it; dynamic mode
    // starts empty and tracks the last sender.
    let track_peer = remote.is_none();
    let peer = Arc::new(Mutex::new(remote));

    Ok(IoHalves {
        reader: Box::new(UdpReader {
            socket: socket.clone(),
            peer: peer.clone(),
            track_peer,
        }),
        writer: Box::new(UdpWriter {
            socket: socket.clone(),
            peer,
        }),
        closer: Box::new(UdpCloser { socket, local_addr }),
        kind: LinkKind::Udp,
        local_addr: Some(local_addr),
    })
}

struct UdpReader {
    socket: Arc<UdpSocket>,
    peer: Arc<Mutex<Option<SocketAddr>>>,
    track_peer: bool,
}

impl LinkRead for UdpReader {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.socket.recv_from(buf) {
            Ok((0, _)) => {
                // Empty datagram (including the close wake-up); nothing to
                // decode, report it as an expired deadline.
                Err(io::ErrorKind::TimedOut.into())
            }
            Ok((n, from)) => {
                if self.track_peer {
                    *self.peer.lock() = Some(from);
                }
                Ok(n)
            }
            // Stray ICMP unreachable reports must not kill the link
            Err(e) if e.kind() == io::ErrorKind::ConnectionReset => {
                trace!("ignoring ICMP-induced receive error");
                Err(io::ErrorKind::TimedOut.into())
            }
            Err(e) => Err(e),
        }
    }
}

struct UdpWriter {
    socket: Arc<UdpSocket>,
    peer: Arc<Mutex<Option<SocketAddr>>>,
}

impl LinkWrite for UdpWriter {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        let peer = *self.peer.lock();
        match peer {
            Some(addr) => match self.socket.send_to(data, addr) {
                Ok(_) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    trace!(peer = %addr, "ignoring ICMP-induced send error");
                    Ok(())
                }
                Err(e) => Err(e),
            },
            None => {
                trace!("no remote endpoint yet, dropping outgoing datagram");
                Ok(())
            }
        }
    }
}

struct UdpCloser {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
}

impl LinkShutdown for UdpCloser {
    fn shutdown(&self) {
        // UDP has no stream to shut down; poke our own port with an empty
        // datagram so a blocked recv_from returns without waiting out its
        // deadline.
        let ip = match self.local_addr.ip() {
            IpAddr::V4(ip) if ip.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) if ip.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
            ip => ip,
        };
        let wake = SocketAddr::new(ip, self.local_addr.port());
        let _ = self.socket.send_to(&[], wake);
    }
}
