//! Serial transport
//!
//! Opens a device through `serialport` with a read deadline and splits it
//! into cloned read/write halves. Serial lines have no connection state,
//! so device loss is inferred: a healthy port reports an expired deadline
//! when idle, while an unplugged one tends to return zero-length reads
//! back to back.

use super::{is_timeout, IoHalves, LinkKind, LinkRead, LinkShutdown, LinkWrite};
use crate::constants::{READ_TIMEOUT_MS, SERIAL_DISCONNECT_THRESHOLD};
use crate::error::{LinkError, Result};
use serialport::SerialPort;
use std::io::{self, Read, Write};
use std::time::Duration;
use tracing::debug;

/// Open a serial device and split it into transport halves
pub(crate) fn open(path: &str, baud: u32) -> Result<IoHalves> {
    let map_open = |e: serialport::Error| LinkError::SerialOpen {
        path: path.to_string(),
        source: io::Error::other(e.to_string()),
    };

    let port = serialport::new(path, baud)
        .timeout(Duration::from_millis(READ_TIMEOUT_MS))
        .open()
        .map_err(map_open)?;
    let write_half = port.try_clone().map_err(map_open)?;

    debug!(path, baud, "serial port opened");

    Ok(IoHalves {
        reader: Box::new(SerialReader {
            port,
            consecutive_zeros: 0,
        }),
        writer: Box::new(SerialWriter { port: write_half }),
        closer: Box::new(SerialCloser),
        kind: LinkKind::Serial,
        local_addr: None,
    })
}

struct SerialReader {
    port: Box<dyn SerialPort>,
    consecutive_zeros: u32,
}

impl LinkRead for SerialReader {
    fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.port.read(buf) {
            Ok(0) => {
                // A single zero-length read can be a glitch; a run of them
                // means the device dropped off the bus.
                self.consecutive_zeros += 1;
                if self.consecutive_zeros > SERIAL_DISCONNECT_THRESHOLD {
                    Ok(0)
                } else {
                    Err(io::ErrorKind::TimedOut.into())
                }
            }
            Ok(n) => {
                self.consecutive_zeros = 0;
                Ok(n)
            }
            Err(e) if is_timeout(&e) => {
                self.consecutive_zeros = 0;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

struct SerialWriter {
    port: Box<dyn SerialPort>,
}

impl LinkWrite for SerialWriter {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)
    }
}

struct SerialCloser;

impl LinkShutdown for SerialCloser {
    fn shutdown(&self) {
        // Nothing to interrupt: serial reads already run a deadline.
    }
}
