//! WebSocket frame codec (RFC 6455 §5).
//!
//! Decoding is incremental: `decode` returns `Ok(None)` until a whole frame
//! is buffered. Client frames must be masked; server frames are written
//! unmasked.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("client frame is not masked")]
    UnmaskedClientFrame,
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),
    #[error("reserved bits set")]
    ReservedBits,
    #[error("control frame payload exceeds 125 bytes")]
    ControlTooLong,
    #[error("control frame is fragmented")]
    FragmentedControl,
    #[error("frame payload exceeds limit")]
    TooLarge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(Opcode::Continuation),
            0x1 => Some(Opcode::Text),
            0x2 => Some(Opcode::Binary),
            0x8 => Some(Opcode::Close),
            0x9 => Some(Opcode::Ping),
            0xA => Some(Opcode::Pong),
            _ => None,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Opcode::Continuation => 0x0,
            Opcode::Text => 0x1,
            Opcode::Binary => 0x2,
            Opcode::Close => 0x8,
            Opcode::Ping => 0x9,
            Opcode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn text(payload: impl Into<String>) -> Self {
        Frame {
            fin: true,
            opcode: Opcode::Text,
            payload: payload.into().into_bytes(),
        }
    }

    pub fn binary(payload: Vec<u8>) -> Self {
        Frame {
            fin: true,
            opcode: Opcode::Binary,
            payload,
        }
    }

    pub fn pong(payload: Vec<u8>) -> Self {
        Frame {
            fin: true,
            opcode: Opcode::Pong,
            payload,
        }
    }

    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = code.to_be_bytes().to_vec();
        payload.extend_from_slice(reason.as_bytes());
        Frame {
            fin: true,
            opcode: Opcode::Close,
            payload,
        }
    }
}

/// Try to decode one client frame from the front of `buf`.
///
/// Returns the frame (payload unmasked) and the bytes consumed, or `None`
/// when the buffer does not yet hold a complete frame.
pub fn decode(buf: &[u8], max_payload: usize) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let b0 = buf[0];
    let fin = b0 & 0x80 != 0;
    if b0 & 0x70 != 0 {
        return Err(FrameError::ReservedBits);
    }
    let opcode = Opcode::from_u8(b0 & 0x0F).ok_or(FrameError::ReservedOpcode(b0 & 0x0F))?;

    let b1 = buf[1];
    let masked = b1 & 0x80 != 0;
    if !masked {
        // Clients must mask every frame (RFC 6455 §5.1).
        return Err(FrameError::UnmaskedClientFrame);
    }

    let mut offset = 2;
    let payload_len = match b1 & 0x7F {
        126 => {
            if buf.len() < 4 {
                return Ok(None);
            }
            offset += 2;
            u16::from_be_bytes([buf[2], buf[3]]) as u64
        }
        127 => {
            if buf.len() < 10 {
                return Ok(None);
            }
            offset += 8;
            u64::from_be_bytes(buf[2..10].try_into().expect("length slice"))
        }
        n => n as u64,
    };

    if opcode.is_control() {
        if !fin {
            return Err(FrameError::FragmentedControl);
        }
        if payload_len > 125 {
            return Err(FrameError::ControlTooLong);
        }
    }
    if payload_len > max_payload as u64 {
        return Err(FrameError::TooLarge);
    }
    let payload_len = payload_len as usize;

    if buf.len() < offset + 4 + payload_len {
        return Ok(None);
    }

    let mut key = [0u8; 4];
    key.copy_from_slice(&buf[offset..offset + 4]);
    offset += 4;

    let mut payload = buf[offset..offset + payload_len].to_vec();
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }

    Ok(Some((
        Frame {
            fin,
            opcode,
            payload,
        },
        offset + payload_len,
    )))
}

/// Encode a server frame (no mask) to wire form.
pub fn encode(frame: &Frame) -> Vec<u8> {
    let len = frame.payload.len();
    let mut buf = Vec::with_capacity(len + 10);

    buf.push((if frame.fin { 0x80 } else { 0x00 }) | frame.opcode.as_u8());

    if len <= 125 {
        buf.push(len as u8);
    } else if len <= u16::MAX as usize {
        buf.push(126);
        buf.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        buf.push(127);
        buf.extend_from_slice(&(len as u64).to_be_bytes());
    }

    buf.extend_from_slice(&frame.payload);
    buf
}
