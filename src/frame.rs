//! WebSocket frame header codec and handshake helper.
//!
//! For more info:
//!
//! * <https://www.rfc-editor.org/rfc/rfc6455#section-5.2>
//! * <https://developer.mozilla.org/en-US/docs/Web/API/WebSockets_API/Writing_WebSocket_servers>

use base64ct::{Base64, Encoding};
use sha1::{Digest, Sha1};

const SEC_WEBSOCKET_ACCEPT_MAGIC: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Longest frame header: 2 bytes, 8 byte length, 4 byte mask.
pub const MAX_HEADER_LEN: usize = 14;

/// `Sec-WebSocket-Accept` value for a `Sec-WebSocket-Key`.
pub(crate) fn sec_websocket_accept_val(key: &str) -> Result<[u8; 28], &'static str> {
    let mut key_hasher = Sha1::new();
    key_hasher.update(key.as_bytes());
    key_hasher.update(SEC_WEBSOCKET_ACCEPT_MAGIC.as_bytes());
    let key_hash = key_hasher.finalize();

    let mut key_b64_buff = [0u8; 28];
    if Base64::encode(&key_hash, &mut key_b64_buff).is_err() {
        return Err("error enoding key hash due to invalid length");
    }

    Ok(key_b64_buff)
}

/// FrameError contains the errors returned while decoding or encoding frame headers.
#[derive(Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameError {
    /// More header bytes are needed: the value is how many
    InsufficientData(usize),
    /// The peer broke the framing rules
    ProtocolError(&'static str),
}

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    /// Follow-up fragment of a message
    Continuation = 0x0,
    /// UTF-8 text
    Text = 0x1,
    /// Binary data
    Binary = 0x2,
    /// Close handshake
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl Opcode {
    /// Close, ping and pong.
    pub fn is_control(self) -> bool {
        (self as u8) & 0x8 != 0
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            _ => Err(FrameError::ProtocolError("reserved opcode")),
        }
    }
}

/// FrameHeader encodes/decodes the header of a frame on the websocket wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Last frame of a message
    pub fin: bool,
    /// The websocket OP code value
    pub opcode: Opcode,
    /// The length of the payload
    pub len: usize,
    /// The masking key, present on every frame a client sends
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Decode a header from the start of `value`.  When `value` is too short the error says
    /// how many more bytes to supply.
    pub fn decode(value: &[u8]) -> Result<Self, FrameError> {
        let mut required_bytes = 2usize;

        if value.len() < required_bytes {
            return Err(FrameError::InsufficientData(required_bytes - value.len()));
        }

        let fin: bool = (value[0] & 128) == 128;
        if value[0] & 0b0111_0000 != 0 {
            return Err(FrameError::ProtocolError("reserved bits set"));
        }
        let opcode = Opcode::try_from(value[0] & 0x0F)?;

        let masked: bool = (value[1] & 128) == 128;

        let mut len: u64 = (value[1] & 0x7F) as u64;
        let mut mask_offset = 2;
        if len == 126 {
            // 16 bit length field
            required_bytes += 2;
            if value.len() < required_bytes {
                return Err(FrameError::InsufficientData(required_bytes - value.len()));
            }
            len = (value[2] as u64) << 8 | value[3] as u64;
            mask_offset = 4;
        } else if len == 127 {
            // 64bit length field
            required_bytes += 8;
            if value.len() < required_bytes {
                return Err(FrameError::InsufficientData(required_bytes - value.len()));
            }
            let mut be = [0u8; 8];
            be.copy_from_slice(&value[2..10]);
            len = u64::from_be_bytes(be);
            mask_offset = 10;
        }

        if opcode.is_control() && (!fin || len > 125) {
            return Err(FrameError::ProtocolError("fragmented or oversized control frame"));
        }

        let len: usize = usize::try_from(len)
            .map_err(|_| FrameError::ProtocolError("payload length exceeds usize"))?;

        let mut mask: Option<[u8; 4]> = None;
        if masked {
            required_bytes += 4;
            if value.len() < required_bytes {
                return Err(FrameError::InsufficientData(required_bytes - value.len()));
            }
            let mut m = [0u8; 4];
            m.copy_from_slice(&value[mask_offset..mask_offset + 4]);
            mask = Some(m);
        }

        Ok(FrameHeader {
            fin,
            opcode,
            len,
            mask,
        })
    }

    /// Bytes the encoded header takes.
    pub fn header_len(&self) -> usize {
        let base = if self.len <= 125 {
            2
        } else if self.len <= u16::MAX.into() {
            4
        } else {
            10
        };
        base + if self.mask.is_some() { 4 } else { 0 }
    }

    /// Encode into `dest`, returning the header length.
    pub fn encode(&self, dest: &mut [u8]) -> Result<usize, FrameError> {
        let header_len = self.header_len();
        if dest.len() < header_len {
            return Err(FrameError::InsufficientData(header_len - dest.len()));
        }

        // fin 1 MSB byte 1, opcode 4 LSB bits byte 1
        dest[0] = (if self.fin { 0b1000_0000 } else { 0 }) | (self.opcode as u8 & 0b000_1111);
        // masked 1 MSB byte 2
        dest[1] = if self.mask.is_some() { 0b1000_0000 } else { 0 };

        let mut mask_offset = 2;
        if self.len <= 125 {
            // 7 LSB byte 2
            dest[1] |= self.len as u8;
        } else if self.len <= u16::MAX.into() {
            // indicate 16 bit length with byte 2 7LSB bits = 126
            dest[1] |= 126u8;
            [dest[2], dest[3]] = (self.len as u16).to_be_bytes();
            mask_offset = 4;
        } else {
            // indicate 64 bit length with byte 2 7LSB bits = 127
            dest[1] |= 127u8;
            dest[2..10].copy_from_slice(&(self.len as u64).to_be_bytes());
            mask_offset = 10;
        }

        if let Some(mask) = self.mask {
            dest[mask_offset..mask_offset + 4].copy_from_slice(&mask);
        }

        Ok(header_len)
    }

    /// Unmask `data`, which starts `offset` bytes into the payload.
    pub fn apply_mask(&self, data: &mut [u8], offset: usize) {
        if let Some(mask) = self.mask {
            for (i, b) in data.iter_mut().enumerate() {
                *b ^= mask[(offset + i) % 4];
            }
        }
    }
}
