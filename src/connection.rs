//! Connection lifecycle and frame dispatch
//!
//! Each connection owns two blocking threads:
//! - Receive thread: reads transport chunks, feeds the stream decoder and
//!   runs subscriber callbacks in registration order.
//! - Writer thread: drains the outgoing queue and writes encoded frames,
//!   polling a shutdown flag between queue deadlines.
//!
//! `close()` is idempotent, joins both threads (unless called from a
//! subscriber callback on the receive thread itself) and frees the
//! connection's channel id. Dropping the last handle closes implicitly.

use crate::channel::{self, ChannelId};
use crate::codec::{encode_frame, Decoder, Frame};
use crate::constants::{
    DEFAULT_COMPONENT_ID, DEFAULT_SYSTEM_ID, READ_BUFFER_SIZE, WRITE_POLL_MS,
};
use crate::error::{LinkError, Result};
use crate::stats::{LinkStats, StatsSnapshot};
use crate::transport::{self, Endpoint, IoHalves, LinkKind, LinkRead, LinkShutdown, LinkWrite};
use crate::url;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Callback invoked on the receive thread for every decoded frame
pub type MessageHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Handle to an open link
///
/// Cheap to clone; all clones refer to the same connection. The link
/// closes when [`Connection::close`] is called or the last handle drops.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    channel: ChannelId,
    kind: LinkKind,
    local_addr: Option<SocketAddr>,
    closed: Arc<AtomicBool>,
    subscribers: Arc<Mutex<Vec<MessageHandler>>>,
    stats: Arc<LinkStats>,
    sender: LinkSender,
    closer: Mutex<Option<Box<dyn LinkShutdown>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

/// Sending half of a connection, detached from its lifetime
///
/// Useful inside subscriber callbacks: a callback holding a full
/// [`Connection`] clone would keep the connection alive through its own
/// subscriber list, while a sender does not.
#[derive(Clone)]
pub struct LinkSender {
    channel: ChannelId,
    system_id: u8,
    component_id: u8,
    closed: Arc<AtomicBool>,
    sequence: Arc<AtomicU8>,
    tx: mpsc::Sender<Bytes>,
    stats: Arc<LinkStats>,
}

impl Connection {
    /// Open a connection for the given endpoint
    ///
    /// Allocates a channel id, opens the OS resource and starts the
    /// receive and writer threads. The id is returned to the registry if
    /// the transport cannot be opened.
    pub fn open(endpoint: &Endpoint, system_id: u8, component_id: u8) -> Result<Connection> {
        let channel = channel::global().allocate()?;

        let halves = match transport::open_endpoint(endpoint) {
            Ok(halves) => halves,
            Err(e) => {
                channel::global().release(channel);
                return Err(e);
            }
        };

        Ok(Self::start(channel, halves, system_id, component_id))
    }

    /// Open a connection described by a URL
    ///
    /// The `?ids=SYS,COMP` query selects sender identifiers; without it
    /// the crate defaults apply.
    pub fn open_url(url: &str) -> Result<Connection> {
        let parsed = url::parse_url(url)?;
        let (system_id, component_id) = parsed
            .ids
            .unwrap_or((DEFAULT_SYSTEM_ID, DEFAULT_COMPONENT_ID));
        Self::open(&parsed.endpoint, system_id, component_id)
    }

    /// Open a UDP link bound to `bind_host:bind_port`
    ///
    /// With `remote` the link always sends there; without it the link
    /// answers whoever sent the most recent datagram.
    pub fn open_udp(
        bind_host: &str,
        bind_port: u16,
        remote: Option<(&str, u16)>,
        system_id: u8,
        component_id: u8,
    ) -> Result<Connection> {
        let (remote_host, remote_port) = match remote {
            Some((host, port)) => (Some(host.to_string()), Some(port)),
            None => (None, None),
        };
        Self::open(
            &Endpoint::Udp {
                bind_host: bind_host.to_string(),
                bind_port,
                remote_host,
                remote_port,
            },
            system_id,
            component_id,
        )
    }

    /// Open a TCP client link to `host:port`
    pub fn open_tcp_client(
        host: &str,
        port: u16,
        system_id: u8,
        component_id: u8,
    ) -> Result<Connection> {
        Self::open(
            &Endpoint::TcpClient {
                host: host.to_string(),
                port,
            },
            system_id,
            component_id,
        )
    }

    /// Open a single-peer TCP server link on `bind_host:bind_port`
    pub fn open_tcp_server(
        bind_host: &str,
        bind_port: u16,
        system_id: u8,
        component_id: u8,
    ) -> Result<Connection> {
        Self::open(
            &Endpoint::TcpServer {
                bind_host: bind_host.to_string(),
                bind_port,
            },
            system_id,
            component_id,
        )
    }

    /// Open a serial link on `path` at `baud`
    pub fn open_serial(
        path: &str,
        baud: u32,
        system_id: u8,
        component_id: u8,
    ) -> Result<Connection> {
        Self::open(
            &Endpoint::Serial {
                path: path.to_string(),
                baud,
            },
            system_id,
            component_id,
        )
    }

    fn start(
        channel: ChannelId,
        halves: IoHalves,
        system_id: u8,
        component_id: u8,
    ) -> Connection {
        let IoHalves {
            reader,
            writer,
            closer,
            kind,
            local_addr,
        } = halves;

        let closed = Arc::new(AtomicBool::new(false));
        let subscribers: Arc<Mutex<Vec<MessageHandler>>> = Arc::new(Mutex::new(Vec::new()));
        let stats = Arc::new(LinkStats::new());
        let (tx, rx) = mpsc::channel::<Bytes>();

        let sender = LinkSender {
            channel,
            system_id,
            component_id,
            closed: closed.clone(),
            sequence: Arc::new(AtomicU8::new(0)),
            tx,
            stats: stats.clone(),
        };

        // The loops capture only the pieces they touch, never the inner
        // itself, so the last handle dropping can actually run Drop.
        let rx_closed = closed.clone();
        let rx_subscribers = subscribers.clone();
        let rx_stats = stats.clone();
        let rx_thread = thread::spawn(move || {
            receive_loop(reader, rx_closed, rx_subscribers, rx_stats, channel);
        });

        let wr_closed = closed.clone();
        let wr_stats = stats.clone();
        let wr_thread = thread::spawn(move || {
            write_loop(writer, rx, wr_closed, wr_stats, channel);
        });

        info!(channel, kind = %kind, local_addr = ?local_addr, "link opened");

        Connection {
            inner: Arc::new(ConnectionInner {
                channel,
                kind,
                local_addr,
                closed,
                subscribers,
                stats,
                sender,
                closer: Mutex::new(Some(closer)),
                threads: Mutex::new(vec![rx_thread, wr_thread]),
            }),
        }
    }

    /// Queue one frame for transmission
    ///
    /// Fails with [`LinkError::ChannelClosed`] after [`Connection::close`]
    /// and with [`LinkError::PayloadTooLarge`] for oversized payloads.
    /// Transport-level write faults are counted and logged by the writer
    /// thread instead of surfacing here.
    pub fn send(&self, frame: &Frame) -> Result<()> {
        self.inner.sender.send(frame)
    }

    /// Queue one frame stamped with an explicit sender identity
    ///
    /// Overrides the connection's own system/component id for this frame
    /// only; the transmit sequence counter is shared with
    /// [`Connection::send`].
    pub fn send_message(&self, frame: &Frame, system_id: u8, component_id: u8) -> Result<()> {
        self.inner.sender.send_message(frame, system_id, component_id)
    }

    /// Register a callback for every decoded frame
    ///
    /// Handlers run on the receive thread in registration order; a slow
    /// handler stalls decoding for the whole connection.
    pub fn subscribe(&self, handler: impl Fn(&Frame) + Send + Sync + 'static) {
        self.inner.subscribers.lock().push(Arc::new(handler));
    }

    /// Channel id allocated to this connection
    pub fn channel(&self) -> ChannelId {
        self.inner.channel
    }

    /// System id stamped into outgoing frames
    pub fn system_id(&self) -> u8 {
        self.inner.sender.system_id
    }

    /// Component id stamped into outgoing frames
    pub fn component_id(&self) -> u8 {
        self.inner.sender.component_id
    }

    /// Transport flavour of this link
    pub fn kind(&self) -> LinkKind {
        self.inner.kind
    }

    /// Locally bound socket address, for network transports
    ///
    /// Reports the OS-assigned port when the link was opened on port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr
    }

    /// Whether the connection is still open
    ///
    /// Only [`Connection::close`] (or dropping the last handle) flips
    /// this; a dead transport stops the receive thread but leaves the
    /// handle open.
    pub fn is_open(&self) -> bool {
        !self.inner.closed.load(Ordering::SeqCst)
    }

    /// Point-in-time copy of the traffic counters
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Detached sending handle
    pub fn sender(&self) -> LinkSender {
        self.inner.sender.clone()
    }

    /// Close the connection
    ///
    /// Wakes and joins both worker threads, drops all subscribers and
    /// frees the channel id. Safe to call more than once and safe to call
    /// from inside a subscriber callback.
    pub fn close(&self) {
        close_inner(&self.inner);
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("channel", &self.inner.channel)
            .field("kind", &self.inner.kind)
            .field("open", &self.is_open())
            .finish()
    }
}

impl LinkSender {
    /// Sequence-stamp, encode and queue one frame
    ///
    /// Same fault contract as [`Connection::send`].
    pub fn send(&self, frame: &Frame) -> Result<()> {
        self.send_message(frame, self.system_id, self.component_id)
    }

    /// Queue one frame stamped with an explicit sender identity
    pub fn send_message(&self, frame: &Frame, system_id: u8, component_id: u8) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError::ChannelClosed {
                channel: self.channel,
            });
        }

        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let wire = encode_frame(frame, system_id, component_id, seq)?;

        if self.tx.send(wire).is_err() {
            // Writer thread already gone; nothing drains the queue.
            self.stats.add_tx_error();
            debug!(channel = self.channel, "send queue detached, frame dropped");
        }
        Ok(())
    }

    /// Channel id of the connection this sender belongs to
    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    /// System id stamped into outgoing frames
    pub fn system_id(&self) -> u8 {
        self.system_id
    }

    /// Component id stamped into outgoing frames
    pub fn component_id(&self) -> u8 {
        self.component_id
    }
}

impl fmt::Debug for LinkSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkSender")
            .field("channel", &self.channel)
            .field("system_id", &self.system_id)
            .field("component_id", &self.component_id)
            .finish()
    }
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        close_inner(self);
    }
}

fn close_inner(inner: &ConnectionInner) {
    if inner.closed.swap(true, Ordering::SeqCst) {
        return;
    }

    if let Some(closer) = inner.closer.lock().take() {
        closer.shutdown();
    }

    // Callbacks may hold connection clones; dropping them here breaks the
    // reference cycle so those clones can be freed.
    inner.subscribers.lock().clear();

    let threads = std::mem::take(&mut *inner.threads.lock());
    let current = thread::current().id();
    for handle in threads {
        if handle.thread().id() == current {
            // close() from inside a subscriber callback: the receive
            // thread cannot join itself, it unwinds once the callback
            // returns and sees the closed flag.
            continue;
        }
        let _ = handle.join();
    }

    channel::global().release(inner.channel);
    info!(channel = inner.channel, "link closed");
}

fn receive_loop(
    mut reader: Box<dyn LinkRead>,
    closed: Arc<AtomicBool>,
    subscribers: Arc<Mutex<Vec<MessageHandler>>>,
    stats: Arc<LinkStats>,
    channel: ChannelId,
) {
    let mut decoder = Decoder::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];

    while !closed.load(Ordering::SeqCst) {
        match reader.read_chunk(&mut buf) {
            Ok(0) => {
                warn!(channel, "link endpoint gone, receiver stopping");
                break;
            }
            Ok(n) => {
                stats.add_rx(n);
                decoder.feed(&buf[..n], |frame| {
                    stats.add_rx_frame();
                    trace!(
                        channel,
                        message_id = frame.message_id,
                        sequence = frame.sequence,
                        "frame received"
                    );
                    // Snapshot under the lock, run callbacks outside it so
                    // they may subscribe or close without deadlocking.
                    let handlers: Vec<MessageHandler> = subscribers.lock().clone();
                    for handler in &handlers {
                        handler(&frame);
                    }
                });
            }
            Err(e) if transport::is_timeout(&e) => {}
            Err(e) => {
                if !closed.load(Ordering::SeqCst) {
                    warn!(channel, error = %e, "link read failed, receiver stopping");
                }
                break;
            }
        }
    }
}

fn write_loop(
    mut writer: Box<dyn LinkWrite>,
    rx: mpsc::Receiver<Bytes>,
    closed: Arc<AtomicBool>,
    stats: Arc<LinkStats>,
    channel: ChannelId,
) {
    loop {
        if closed.load(Ordering::SeqCst) {
            break;
        }

        match rx.recv_timeout(Duration::from_millis(WRITE_POLL_MS)) {
            Ok(data) => {
                if let Err(e) = writer.write_chunk(&data) {
                    stats.add_tx_error();
                    warn!(channel, error = %e, "link write failed, writer stopping");
                    break;
                }
                stats.add_tx(data.len());
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
