//! MQTT 3.1.1 packet codec
//!
//! Only the packets a QoS 0 telemetry publisher and its broker exchange are
//! supported. Every packet is framed as:
//! ```text
//! [ 1 byte: type | flags ][ 1-4 bytes: remaining length (varint) ][ N bytes: body ]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Largest packet accepted by this codec (256 KiB)
pub const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Protocol name carried in CONNECT
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol level for MQTT 3.1.1
pub const PROTOCOL_LEVEL: u8 = 4;

const CONNECT: u8 = 1;
const CONNACK: u8 = 2;
const PUBLISH: u8 = 3;
const PINGREQ: u8 = 12;
const PINGRESP: u8 = 13;
const DISCONNECT: u8 = 14;

const CLEAN_SESSION: u8 = 0x02;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug, PartialEq)]
pub enum CodecError {
    #[error("Packet too large: {0} bytes (max: {MAX_PACKET_SIZE})")]
    PacketTooLarge(usize),

    #[error("Malformed remaining length")]
    MalformedRemainingLength,

    #[error("Packet body truncated")]
    Truncated,

    #[error("String field is not valid UTF-8")]
    InvalidUtf8,

    #[error("String field too long: {0} bytes")]
    StringTooLong(usize),

    #[error("Unknown packet type: {0}")]
    UnknownPacketType(u8),

    #[error("Unsupported protocol {name} level {level}")]
    UnsupportedProtocol { name: String, level: u8 },

    #[error("Unsupported QoS level: {0}")]
    UnsupportedQos(u8),

    #[error("Invalid CONNACK return code: {0}")]
    InvalidReturnCode(u8),
}

/// CONNACK return codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocol = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadCredentials = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Accepted),
            1 => Ok(Self::UnacceptableProtocol),
            2 => Ok(Self::IdentifierRejected),
            3 => Ok(Self::ServerUnavailable),
            4 => Ok(Self::BadCredentials),
            5 => Ok(Self::NotAuthorized),
            other => Err(CodecError::InvalidReturnCode(other)),
        }
    }
}

/// MQTT control packets understood by the codec
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_id: String,
        keep_alive_secs: u16,
        clean_session: bool,
    },
    ConnAck {
        session_present: bool,
        code: ConnectReturnCode,
    },
    Publish {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    PingReq,
    PingResp,
    Disconnect,
}

/// Encode a packet into a new buffer
pub fn encode(packet: &Packet) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(packet, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a packet directly into a provided buffer
pub fn encode_into(packet: &Packet, buf: &mut BytesMut) -> Result<(), CodecError> {
    let mut body = BytesMut::new();

    let first_byte = match packet {
        Packet::Connect {
            client_id,
            keep_alive_secs,
            clean_session,
        } => {
            put_string(&mut body, PROTOCOL_NAME)?;
            body.put_u8(PROTOCOL_LEVEL);
            body.put_u8(if *clean_session { CLEAN_SESSION } else { 0 });
            body.put_u16(*keep_alive_secs);
            put_string(&mut body, client_id)?;
            CONNECT << 4
        }
        Packet::ConnAck {
            session_present,
            code,
        } => {
            body.put_u8(u8::from(*session_present));
            body.put_u8(*code as u8);
            CONNACK << 4
        }
        Packet::Publish {
            topic,
            payload,
            retain,
        } => {
            put_string(&mut body, topic)?;
            body.put_slice(payload);
            (PUBLISH << 4) | u8::from(*retain)
        }
        Packet::PingReq => PINGREQ << 4,
        Packet::PingResp => PINGRESP << 4,
        Packet::Disconnect => DISCONNECT << 4,
    };

    if body.len() > MAX_PACKET_SIZE {
        return Err(CodecError::PacketTooLarge(body.len()));
    }

    buf.reserve(1 + 4 + body.len());
    buf.put_u8(first_byte);
    put_remaining_length(buf, body.len());
    buf.put_slice(&body);

    Ok(())
}

/// Try to decode one packet from a buffer
///
/// Returns:
/// - `Ok(Some(packet))` if a complete packet was decoded and consumed
/// - `Ok(None)` if more data is needed (nothing is consumed)
/// - `Err(...)` if the data is invalid
pub fn decode(buf: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
    if buf.len() < 2 {
        return Ok(None);
    }

    let (remaining, len_bytes) = match peek_remaining_length(&buf[1..])? {
        Some(parsed) => parsed,
        None => return Ok(None),
    };

    if remaining > MAX_PACKET_SIZE {
        return Err(CodecError::PacketTooLarge(remaining));
    }

    let total_len = 1 + len_bytes + remaining;
    if buf.len() < total_len {
        return Ok(None);
    }

    let first_byte = buf[0];
    buf.advance(1 + len_bytes);
    let mut body = buf.split_to(remaining).freeze();

    let packet = match first_byte >> 4 {
        CONNECT => {
            let name = get_string(&mut body)?;
            let level = get_u8(&mut body)?;
            if name != PROTOCOL_NAME || level != PROTOCOL_LEVEL {
                return Err(CodecError::UnsupportedProtocol { name, level });
            }
            let flags = get_u8(&mut body)?;
            let keep_alive_secs = get_u16(&mut body)?;
            let client_id = get_string(&mut body)?;
            Packet::Connect {
                client_id,
                keep_alive_secs,
                clean_session: flags & CLEAN_SESSION != 0,
            }
        }
        CONNACK => {
            let flags = get_u8(&mut body)?;
            let code = ConnectReturnCode::try_from(get_u8(&mut body)?)?;
            Packet::ConnAck {
                session_present: flags & 0x01 != 0,
                code,
            }
        }
        PUBLISH => {
            let qos = (first_byte >> 1) & 0x03;
            if qos != 0 {
                return Err(CodecError::UnsupportedQos(qos));
            }
            let topic = get_string(&mut body)?;
            Packet::Publish {
                topic,
                payload: body,
                retain: first_byte & 0x01 != 0,
            }
        }
        PINGREQ => Packet::PingReq,
        PINGRESP => Packet::PingResp,
        DISCONNECT => Packet::Disconnect,
        other => return Err(CodecError::UnknownPacketType(other)),
    };

    Ok(Some(packet))
}

fn put_remaining_length(buf: &mut BytesMut, mut len: usize) {
    loop {
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        buf.put_u8(byte);
        if len == 0 {
            break;
        }
    }
}

/// Parse the varint after the first byte without consuming anything
fn peek_remaining_length(data: &[u8]) -> Result<Option<(usize, usize)>, CodecError> {
    let mut value = 0usize;
    let mut multiplier = 1usize;

    for (i, byte) in data.iter().take(4).enumerate() {
        value += (*byte & 0x7f) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }

    if data.len() >= 4 {
        Err(CodecError::MalformedRemainingLength)
    } else {
        Ok(None)
    }
}

fn put_string(buf: &mut BytesMut, s: &str) -> Result<(), CodecError> {
    let len = u16::try_from(s.len()).map_err(|_| CodecError::StringTooLong(s.len()))?;
    buf.put_u16(len);
    buf.put_slice(s.as_bytes());
    Ok(())
}

fn get_u8(body: &mut Bytes) -> Result<u8, CodecError> {
    if body.remaining() < 1 {
        return Err(CodecError::Truncated);
    }
    Ok(body.get_u8())
}

fn get_u16(body: &mut Bytes) -> Result<u16, CodecError> {
    if body.remaining() < 2 {
        return Err(CodecError::Truncated);
    }
    Ok(body.get_u16())
}

fn get_string(body: &mut Bytes) -> Result<String, CodecError> {
    let len = get_u16(body)? as usize;
    if body.remaining() < len {
        return Err(CodecError::Truncated);
    }
    let raw = body.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

/// Decoder state machine for streaming decoding
#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Partial packet data being accumulated
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Create a new frame decoder
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the decoder buffer
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to decode the next packet from the buffer
    ///
    /// Call this repeatedly until it returns `Ok(None)` to drain all complete packets
    pub fn decode_next(&mut self) -> Result<Option<Packet>, CodecError> {
        decode(&mut self.buffer)
    }

    /// Get the current buffer length (for debugging)
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial data, e.g. after a reconnect
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
