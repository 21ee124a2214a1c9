//! Centralized error types for the link layer
//!
//! All link errors are represented by the `LinkError` enum.
//! Use `Result<T>` as shorthand for `std::result::Result<T, LinkError>`.

use std::fmt;
use std::net::SocketAddr;

/// All link errors
#[derive(Debug)]
pub enum LinkError {
    // === URL ===
    /// Malformed connection URL
    UrlParse { url: String, reason: String },

    // === Construction ===
    /// Failed to bind local UDP socket
    UdpBind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// Failed to bind TCP listener
    TcpBind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// Failed to connect to TCP server
    TcpConnect {
        addr: SocketAddr,
        source: std::io::Error,
    },
    /// Failed to open serial device
    SerialOpen {
        path: String,
        source: std::io::Error,
    },
    /// Host name did not resolve to a usable address
    Resolve {
        host: String,
        source: std::io::Error,
    },

    // === Registry ===
    /// All channel ids are in use
    ChannelsExhausted { capacity: usize },

    // === Runtime ===
    /// Operation on a closed connection
    ChannelClosed { channel: usize },
    /// Outgoing payload exceeds the wire format limit
    PayloadTooLarge { len: usize },

    // === Config ===
    /// Invalid config value
    ConfigValidation { field: &'static str, reason: String },
    /// Failed to parse config text
    ConfigParse { reason: String },
}

impl std::error::Error for LinkError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UdpBind { source, .. }
            | Self::TcpBind { source, .. }
            | Self::TcpConnect { source, .. }
            | Self::SerialOpen { source, .. }
            | Self::Resolve { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UrlParse { url, reason } => {
                write!(f, "Invalid link URL '{}': {}", url, reason)
            }
            Self::UdpBind { addr, .. } => write!(f, "Cannot bind UDP socket {}", addr),
            Self::TcpBind { addr, .. } => write!(f, "Cannot bind TCP listener {}", addr),
            Self::TcpConnect { addr, .. } => write!(f, "Cannot connect to {}", addr),
            Self::SerialOpen { path, .. } => write!(f, "Cannot open serial port: {}", path),
            Self::Resolve { host, .. } => write!(f, "Cannot resolve host: {}", host),
            Self::ChannelsExhausted { capacity } => {
                write!(f, "All {} channel ids are in use", capacity)
            }
            Self::ChannelClosed { channel } => write!(f, "Channel {} is closed", channel),
            Self::PayloadTooLarge { len } => {
                write!(f, "Payload too large: {} bytes", len)
            }
            Self::ConfigValidation { field, reason } => {
                write!(f, "Invalid {}: {}", field, reason)
            }
            Self::ConfigParse { reason } => write!(f, "Cannot parse config: {}", reason),
        }
    }
}

/// Alias for Result with LinkError
pub type Result<T> = std::result::Result<T, LinkError>;

impl LinkError {
    /// True for failures raised while opening the OS-level resource
    /// (bind conflict, refused connect, unresolvable host, missing device).
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::UdpBind { .. }
                | Self::TcpBind { .. }
                | Self::TcpConnect { .. }
                | Self::SerialOpen { .. }
                | Self::Resolve { .. }
        )
    }
}
