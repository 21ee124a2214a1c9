//! Transport-agnostic connection layer for MAVLink-style vehicle links
//!
//! One [`Connection`] owns a transport (UDP, TCP client/server or serial),
//! a streaming frame decoder and a pair of worker threads. Incoming frames
//! reach subscriber callbacks on the receive thread; outgoing frames are
//! sequence-stamped, encoded and queued without blocking the caller.
//!
//! Links are addressed by explicit parameters, by an [`Endpoint`] value or
//! by a URL string:
//!
//! ```no_run
//! use groundlink::{Connection, Frame};
//!
//! fn main() -> groundlink::Result<()> {
//!     let link = Connection::open_url("udp://@127.0.0.1:14550/?ids=1,240")?;
//!     link.subscribe(|frame| {
//!         println!("msg {} from {}/{}", frame.message_id, frame.system_id, frame.component_id);
//!     });
//!     link.send(&Frame::heartbeat())?;
//!     link.close();
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod codec;
pub mod config;
mod connection;
pub mod constants;
pub mod error;
pub mod stats;
pub mod transport;
pub mod url;

pub use channel::{ChannelId, ChannelRegistry};
pub use codec::Frame;
pub use config::LinkConfig;
pub use connection::{Connection, LinkSender, MessageHandler};
pub use error::{LinkError, Result};
pub use stats::StatsSnapshot;
pub use transport::{Endpoint, LinkKind};
pub use url::{parse_url, LinkUrl};
