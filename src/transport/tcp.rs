//! TCP transports
//!
//! Two flavours share this file:
//! - **Client**: a bounded-time connect to a configured server.
//! - **Server**: a listener that accepts exactly one peer and then keeps
//!   the port bound for the lifetime of the connection.
//!
//! Both sides run blocking sockets with read deadlines so the receive
//! thread can poll its shutdown flag. On the server the deadline is set on
//! the listening socket too; `accept()` honours it, which keeps the
//! pre-accept phase interruptible.

use super::{is_timeout, IoHalves, LinkKind, LinkRead, LinkShutdown, LinkWrite};
use crate::constants::{READ_TIMEOUT_MS, TCP_CONNECT_TIMEOUT_MS, WRITE_TIMEOUT_MS};
use crate::error::{LinkError, Result};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, trace};

/// Connect to a remote TCP server and split the stream into halves
pub(crate) fn connect(host: &str, port: u16) -> Result<IoHalves> {
    let addr = super::resolve(host, port)?;
    let map_connect = |e: io::Error| LinkError::TcpConnect { addr, source: e };

    let stream = TcpStream::connect_timeout(&addr, Duration::from_millis(TCP_CONNECT_TIMEOUT_MS))
        .map_err(map_connect)?;
    stream
        .set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)))
        .map_err(map_connect)?;
    stream
        .set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)))
        .map_err(map_connect)?;

    let local_addr = stream.local_addr().ok();
    let read_half = stream.try_clone().map_err(map_connect)?;
    let write_half = stream.try_clone().map_err(map_connect)?;

    Ok(IoHalves {
        reader: Box::new(ClientReader { stream: read_half }),
        writer: Box::new(ClientWriter { stream: write_half }),
        closer: Box::new(ClientCloser { stream }),
        kind: LinkKind::TcpClient,
        local_addr,
    })
}

/// Bind a listening socket that will serve a single peer
pub(crate) fn listen(bind_host: &str, bind_port: u16) -> Result<IoHalves> {
    let bind_addr = super::resolve(bind_host, bind_port)?;
    let map_bind = |e: io::Error| LinkError::TcpBind {
        addr: bind_addr,
        source: e,
    };

    let domain = Domain::for_address(bind_addr);
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP)).map_err(map_bind)?;
    socket.set_reuse_address(true).map_err(map_bind)?;
    // The deadline applies to accept() as well, so the pre-accept loop can
    // observe a shutdown request.
    socket
        .set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)))
        .map_err(map_bind)?;
    socket.bind(&bind_addr.into()).map_err(map_bind)?;
    socket.listen(1).map_err(map_bind)?;

    let listener: TcpListener = socket.into();
    let local_addr = listener.local_addr().map_err(map_bind)?;

    // The accepted write half lands here once a peer shows up.
    let slot = Arc::new(Mutex::new(None));

    Ok(IoHalves {
        reader: Box::new(ServerReader {
            listener,
            stream: None,
            slot: slot.clone(),
        }),
        writer: Box::new(ServerWriter { slot: slot.clone() }),
        closer: Box::new(ServerCloser { slot }),
        kind: LinkKind::TcpServer,
        local_addr: Some(local_addr),
    })
}

struct ClientReader {
    stream: TcpStream,
}

impl LinkRead for ClientReader {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

struct ClientWriter {
    stream: TcpStream,
}

impl LinkWrite for ClientWriter {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.stream.write_all(data)
    }
}

struct ClientCloser {
    stream: TcpStream,
}

impl LinkShutdown for ClientCloser {
    fn shutdown(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Pre-accept: poll the listener. Post-accept: read from the one peer.
///
/// The listener stays alive after the accept so the port remains held and
/// later binds keep failing; no second peer is ever accepted.
struct ServerReader {
    listener: TcpListener,
    stream: Option<TcpStream>,
    slot: Arc<Mutex<Option<TcpStream>>>,
}

impl LinkRead for ServerReader {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => stream.read(buf),
            None => {
                let (stream, peer) = match self.listener.accept() {
                    Ok(pair) => pair,
                    Err(e) if is_timeout(&e) => return Err(io::ErrorKind::TimedOut.into()),
                    Err(e) => return Err(e),
                };
                stream.set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MS)))?;
                stream.set_write_timeout(Some(Duration::from_millis(WRITE_TIMEOUT_MS)))?;
                *self.slot.lock() = Some(stream.try_clone()?);
                info!(%peer, "TCP peer connected");
                self.stream = Some(stream);
                // Report a deadline so the caller re-checks its shutdown
                // flag before the first read.
                Err(io::ErrorKind::TimedOut.into())
            }
        }
    }
}

struct ServerWriter {
    slot: Arc<Mutex<Option<TcpStream>>>,
}

impl LinkWrite for ServerWriter {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        let mut slot = self.slot.lock();
        match slot.as_mut() {
            Some(stream) => stream.write_all(data),
            None => {
                trace!("no TCP peer accepted yet, dropping outgoing data");
                Ok(())
            }
        }
    }
}

struct ServerCloser {
    slot: Arc<Mutex<Option<TcpStream>>>,
}

impl LinkShutdown for ServerCloser {
    fn shutdown(&self) {
        // shutdown() acts on the socket, not the fd, so the reader's clone
        // of the accepted stream unblocks too. A still-pending accept wakes
        // on its own deadline.
        if let Some(stream) = self.slot.lock().as_ref() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
