//! Wire codec: framing, checksum, streaming decode
//!
//! One frame on the wire:
//!
//! ```text
//! +------+-----+-----+-----+------+-------+---------+--------+
//! | 0xFE | LEN | SEQ | SYS | COMP | MSGID | payload | CRC-LE |
//! +------+-----+-----+-----+------+-------+---------+--------+
//! ```
//!
//! The 16-bit checksum (X.25/MCRF4XX) covers everything after the start
//! marker up to the end of the payload. The `Decoder` accumulates bytes
//! across arbitrary chunk boundaries and resynchronizes silently at the
//! next start marker when it meets garbage or a checksum mismatch.

use crate::error::{LinkError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::trace;

/// Frame start marker
pub const STX: u8 = 0xFE;

/// Largest payload one frame can carry
pub const MAX_PAYLOAD_LEN: usize = 255;

/// Bytes added around the payload: marker, length, sequence, system id,
/// component id, message id, two checksum bytes
pub const FRAME_OVERHEAD: usize = 8;

/// Message id of the periodic liveness frame
pub const MSG_HEARTBEAT: u8 = 0;

/// One decoded protocol message
///
/// `system_id`/`component_id`/`sequence` describe the sender as declared in
/// the frame header. On the send path they are informational only: identity
/// and sequence are stamped at encode time from the sending connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message id (kind)
    pub message_id: u8,
    /// System id of the sender
    pub system_id: u8,
    /// Component id of the sender
    pub component_id: u8,
    /// Sender's transmit sequence number
    pub sequence: u8,
    /// Raw payload bytes
    pub payload: Bytes,
}

impl Frame {
    /// Build an outbound frame; sender fields are filled in at encode time
    pub fn new(message_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            message_id,
            system_id: 0,
            component_id: 0,
            sequence: 0,
            payload: payload.into(),
        }
    }

    /// The canonical liveness frame
    pub fn heartbeat() -> Self {
        Self::new(MSG_HEARTBEAT, Bytes::from_static(&[0u8; 9]))
    }
}

/// X.25 checksum accumulation (MCRF4XX variant: init 0xFFFF, no final xor)
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFFu16, |crc, &byte| {
        let mut tmp = byte ^ (crc as u8);
        tmp ^= tmp << 4;
        let tmp = tmp as u16;
        (crc >> 8) ^ (tmp << 8) ^ (tmp << 3) ^ (tmp >> 4)
    })
}

/// Serialize a frame, stamping the given sender identity and sequence
///
/// # Errors
///
/// `PayloadTooLarge` when the payload exceeds [`MAX_PAYLOAD_LEN`].
pub fn encode_frame(
    frame: &Frame,
    system_id: u8,
    component_id: u8,
    sequence: u8,
) -> Result<Bytes> {
    let len = frame.payload.len();
    if len > MAX_PAYLOAD_LEN {
        return Err(LinkError::PayloadTooLarge { len });
    }

    let mut out = BytesMut::with_capacity(len + FRAME_OVERHEAD);
    out.put_u8(STX);
    out.put_u8(len as u8);
    out.put_u8(sequence);
    out.put_u8(system_id);
    out.put_u8(component_id);
    out.put_u8(frame.message_id);
    out.put_slice(&frame.payload);
    let crc = crc16(&out[1..]);
    out.put_u16_le(crc);
    Ok(out.freeze())
}

/// Streaming frame decoder
///
/// Feed raw chunks in any sizes; complete frames come out through the
/// callback in stream order. Malformed input is counted, never reported:
/// bytes before a start marker are skipped, and a frame failing its
/// checksum is abandoned one byte in so the scan can lock onto the next
/// marker.
#[derive(Debug, Default)]
pub struct Decoder {
    buf: BytesMut,
    dropped_bytes: u64,
    bad_frames: u64,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
            dropped_bytes: 0,
            bad_frames: 0,
        }
    }

    /// Feed new data and emit every complete frame it finishes
    pub fn feed(&mut self, data: &[u8], mut on_frame: impl FnMut(Frame)) {
        self.buf.extend_from_slice(data);

        loop {
            // Lock onto the next start marker
            if self.buf.first() != Some(&STX) {
                match self.buf.iter().position(|&b| b == STX) {
                    Some(pos) => {
                        trace!(skipped = pos, "resync to frame start");
                        self.dropped_bytes += pos as u64;
                        self.buf.advance(pos);
                    }
                    None => {
                        self.dropped_bytes += self.buf.len() as u64;
                        self.buf.clear();
                        return;
                    }
                }
            }

            if self.buf.len() < 2 {
                return;
            }
            let payload_len = self.buf[1] as usize;
            let total = payload_len + FRAME_OVERHEAD;
            if self.buf.len() < total {
                // Partial frame, wait for more data
                return;
            }

            let crc_offset = total - 2;
            let expected =
                u16::from_le_bytes([self.buf[crc_offset], self.buf[crc_offset + 1]]);
            if crc16(&self.buf[1..crc_offset]) != expected {
                trace!("frame checksum mismatch, dropping start marker");
                self.bad_frames += 1;
                self.dropped_bytes += 1;
                self.buf.advance(1);
                continue;
            }

            let frame = Frame {
                sequence: self.buf[2],
                system_id: self.buf[3],
                component_id: self.buf[4],
                message_id: self.buf[5],
                payload: Bytes::copy_from_slice(&self.buf[6..6 + payload_len]),
            };
            self.buf.advance(total);
            on_frame(frame);
        }
    }

    /// Bytes discarded while hunting for a start marker
    pub fn dropped_bytes(&self) -> u64 {
        self.dropped_bytes
    }

    /// Frames abandoned on checksum mismatch
    pub fn bad_frames(&self) -> u64 {
        self.bad_frames
    }
}
