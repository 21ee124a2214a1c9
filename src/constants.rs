//! Crate-wide constants
//!
//! Centralized constants to avoid duplication and ensure consistency.

// =============================================================================
// Identity
// =============================================================================

/// Default system id for outgoing frames when none is configured
pub const DEFAULT_SYSTEM_ID: u8 = 1;

/// Default component id for outgoing frames when none is configured
pub const DEFAULT_COMPONENT_ID: u8 = 240;

// =============================================================================
// Channels
// =============================================================================

/// Capacity of the process-global channel registry
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

// =============================================================================
// Timing
// =============================================================================

/// Deadline for blocking reads, so `close()` takes effect promptly (milliseconds)
pub const READ_TIMEOUT_MS: u64 = 100;

/// Poll interval of the writer thread while idle (milliseconds)
pub const WRITE_POLL_MS: u64 = 100;

/// Upper bound for one blocking OS write (milliseconds)
pub const WRITE_TIMEOUT_MS: u64 = 1_000;

/// Timeout for a synchronous TCP connect (milliseconds)
pub const TCP_CONNECT_TIMEOUT_MS: u64 = 5_000;

// =============================================================================
// Buffers
// =============================================================================

/// Receive buffer size for one read from any transport
pub const READ_BUFFER_SIZE: usize = 4096;

// =============================================================================
// Serial
// =============================================================================

/// Default baud rate when a serial URL omits one
pub const DEFAULT_SERIAL_BAUD: u32 = 57_600;

/// Consecutive zero-byte reads before assuming the device disconnected
pub const SERIAL_DISCONNECT_THRESHOLD: u32 = 10;
