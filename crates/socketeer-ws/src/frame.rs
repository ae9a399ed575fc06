//! Pure frame encoding and decoding.
//!
//! ```text
//! byte 0:  FIN(1) RSV(3) OPCODE(4)
//! byte 1:  MASK(1) LEN7(7)
//! [LEN7 == 126]  2-byte big-endian length
//! [LEN7 == 127]  8-byte big-endian length (high 32 bits must be zero)
//! [MASK == 1]    4-byte mask key
//! payload
//! ```
//!
//! Nothing in this module keeps state between calls; reassembly of
//! fragmented messages lives in [`session`](crate::session).

use bytes::Bytes;

use crate::error::{WsError, WsResult};

const FIN_BIT: u8 = 0b1000_0000;
const MASK_BIT: u8 = 0b1000_0000;
const OPCODE_BITS: u8 = 0b0000_1111;
const LEN7_BITS: u8 = 0b0111_1111;

/// Largest payload that fits the single-byte length form.
const MAX_SHORT_LEN: usize = 125;
const EXTENDED_16: u8 = 126;
const EXTENDED_64: u8 = 127;

/// Frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    /// Continuation of a fragmented message (0x0).
    Continuation,
    /// UTF-8 text data (0x1).
    Text,
    /// Binary data (0x2).
    Binary,
    /// Connection close (0x8).
    Close,
    /// Ping (0x9).
    Ping,
    /// Pong (0xA).
    Pong,
    /// Reserved opcodes 0x3-0x7 and 0xB-0xF.
    Reserved(u8),
}

impl Opcode {
    /// Decode the low four bits of a frame's first byte.
    pub fn from_u8(value: u8) -> Self {
        match value & OPCODE_BITS {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => Self::Reserved(other),
        }
    }

    /// Get the wire value.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
            Self::Reserved(value) => value & OPCODE_BITS,
        }
    }

    /// Check if this opcode starts a data message.
    pub fn is_data(self) -> bool {
        matches!(self, Self::Text | Self::Binary)
    }

    /// Check if this is a control opcode (close, ping, pong).
    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// The fixed part of a frame, parsed before the payload has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Mask key, if the mask bit is set.
    pub mask: Option<[u8; 4]>,
    /// Declared payload length.
    pub payload_len: u64,
    /// Offset of the first payload byte.
    pub header_len: usize,
}

impl FrameHeader {
    /// Total frame size on the wire.
    pub fn frame_len(&self) -> u64 {
        self.header_len as u64 + self.payload_len
    }
}

/// A decoded frame with its payload already unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// The mask key the payload was sent with.
    pub mask: Option<[u8; 4]>,
    /// Unmasked payload.
    pub payload: Bytes,
}

/// Parse a frame header.
///
/// Returns `Ok(None)` while `buf` is too short to hold the full header.
pub fn parse_header(buf: &[u8]) -> WsResult<Option<FrameHeader>> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let fin = buf[0] & FIN_BIT != 0;
    let opcode = Opcode::from_u8(buf[0]);
    let masked = buf[1] & MASK_BIT != 0;
    let len7 = buf[1] & LEN7_BITS;

    let (payload_len, mut offset) = match len7 {
        EXTENDED_16 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
        }
        EXTENDED_64 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[2..10]);
            let len = u64::from_be_bytes(raw);
            if len > u64::from(u32::MAX) {
                return Err(WsError::TooLarge {
                    size: len,
                    limit: u64::from(u32::MAX),
                });
            }
            (len, 10)
        }
        short => (u64::from(short), 2),
    };

    let mask = if masked {
        if buf.len() < offset + 4 {
            return Ok(None);
        }
        let mut key = [0u8; 4];
        key.copy_from_slice(&buf[offset..offset + 4]);
        offset += 4;
        Some(key)
    } else {
        None
    };

    Ok(Some(FrameHeader {
        fin,
        opcode,
        mask,
        payload_len,
        header_len: offset,
    }))
}

/// Decode one complete frame from the front of `buf`.
///
/// Returns the frame and the number of bytes it occupied, or `Ok(None)`
/// if `buf` does not yet hold a complete frame.
pub fn decode_frame(buf: &[u8]) -> WsResult<Option<(Frame, usize)>> {
    let Some(header) = parse_header(buf)? else {
        return Ok(None);
    };

    let total = header.frame_len();
    if (buf.len() as u64) < total {
        return Ok(None);
    }
    let total = total as usize;

    let mut payload = buf[header.header_len..total].to_vec();
    if let Some(mask) = header.mask {
        apply_mask(&mut payload, mask);
    }

    let frame = Frame {
        fin: header.fin,
        opcode: header.opcode,
        mask: header.mask,
        payload: Bytes::from(payload),
    };
    Ok(Some((frame, total)))
}

/// XOR every payload byte with `mask[i % 4]`.
///
/// Masking and unmasking are the same operation.
pub fn apply_mask(payload: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

/// Encode a single frame.
///
/// Payloads up to 125 bytes use the one-byte length, up to 65535 the
/// 16-bit form, and larger ones the 64-bit form with the high 32 bits
/// zero. Payloads above 4 GiB are rejected.
pub fn encode_frame(
    opcode: Opcode,
    payload: &[u8],
    fin: bool,
    mask: Option<[u8; 4]>,
) -> WsResult<Vec<u8>> {
    let len = payload.len();
    if len as u64 > u64::from(u32::MAX) {
        return Err(WsError::TooLarge {
            size: len as u64,
            limit: u64::from(u32::MAX),
        });
    }

    let mut out = Vec::with_capacity(len + 14);
    let first = (if fin { FIN_BIT } else { 0 }) | opcode.as_u8();
    out.push(first);

    let mask_flag = if mask.is_some() { MASK_BIT } else { 0 };
    if len <= MAX_SHORT_LEN {
        out.push(mask_flag | len as u8);
    } else if len <= usize::from(u16::MAX) {
        out.push(mask_flag | EXTENDED_16);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(mask_flag | EXTENDED_64);
        out.extend_from_slice(&0u32.to_be_bytes());
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }

    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            let start = out.len();
            out.extend_from_slice(payload);
            apply_mask(&mut out[start..], key);
        }
        None => out.extend_from_slice(payload),
    }

    Ok(out)
}

/// Encode a server message: final, unmasked, text opcode.
pub fn encode(payload: &[u8]) -> WsResult<Vec<u8>> {
    encode_frame(Opcode::Text, payload, true, None)
}
