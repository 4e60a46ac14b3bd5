//! MQTT framing
//!
//! Every control packet starts with a one byte fixed header (packet type in
//! the high nibble, flags in the low nibble) followed by the "remaining
//! length": a base-128 varint of at most four bytes, each byte carrying seven
//! value bits and a continuation bit. This module reads and writes that
//! framing and leaves the body interpretation to `packet`.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::utils::error::ProtocolError;

/// Largest value four remaining-length bytes can express.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

const MAX_LENGTH_BYTES: usize = 4;

/// One framed packet: the fixed header byte plus exactly `remaining length`
/// body bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    pub header: u8,
    pub body: Vec<u8>,
}

impl RawPacket {
    pub fn new(header: u8, body: Vec<u8>) -> Self {
        Self { header, body }
    }

    pub fn packet_type(&self) -> u8 {
        self.header >> 4
    }

    /// Serialize header, remaining length and body into one buffer.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(1 + MAX_LENGTH_BYTES + self.body.len());
        out.push(self.header);
        encode_remaining_length(self.body.len(), &mut out)?;
        out.extend_from_slice(&self.body);
        Ok(out)
    }
}

/// Append the varint encoding of `length` to `buf`.
pub fn encode_remaining_length(mut length: usize, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    if length > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::RemainingLengthTooLarge(length));
    }
    loop {
        let mut digit = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            digit |= 0x80;
        }
        buf.push(digit);
        if length == 0 {
            return Ok(());
        }
    }
}

/// Decode a remaining length from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed and `(value, consumed)`
/// otherwise.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let mut multiplier = 1usize;
    let mut value = 0usize;
    for (i, &digit) in buf.iter().enumerate() {
        if i == MAX_LENGTH_BYTES {
            return Err(ProtocolError::MalformedRemainingLength);
        }
        value += (digit & 0x7F) as usize * multiplier;
        if digit & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= MAX_LENGTH_BYTES {
        return Err(ProtocolError::MalformedRemainingLength);
    }
    Ok(None)
}

/// Read a remaining length from a stream, one byte at a time, using the same
/// rules as `decode_remaining_length`.
pub async fn read_remaining_length<R>(reader: &mut R) -> Result<usize, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; MAX_LENGTH_BYTES];
    for len in 1..=MAX_LENGTH_BYTES {
        buf[len - 1] = reader.read_u8().await?;
        if let Some((value, _)) = decode_remaining_length(&buf[..len])? {
            return Ok(value);
        }
    }
    Err(ProtocolError::MalformedRemainingLength)
}

/// Read one framed packet.
///
/// Returns `Ok(None)` if the stream ends cleanly before a header byte; a
/// stream ending mid-packet is an error. Frames announcing more than
/// `max_size` body bytes are rejected before any body is buffered.
pub async fn read_packet<R>(reader: &mut R, max_size: usize) -> Result<Option<RawPacket>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let header = match reader.read_u8().await {
        Ok(byte) => byte,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let remaining = read_remaining_length(reader).await?;
    if remaining > max_size {
        return Err(ProtocolError::PacketTooLarge {
            size: remaining,
            limit: max_size,
        });
    }

    let mut body = vec![0u8; remaining];
    reader.read_exact(&mut body).await?;
    Ok(Some(RawPacket::new(header, body)))
}

/// Cursor over a packet body. All multi-byte integers are big-endian and all
/// strings carry a two byte length prefix.
#[derive(Debug)]
pub struct BodyReader<'a> {
    buf: &'a [u8],
}

impl<'a> BodyReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, ProtocolError> {
        let (&first, rest) = self
            .buf
            .split_first()
            .ok_or(ProtocolError::Truncated(field))?;
        self.buf = rest;
        Ok(first)
    }

    pub fn read_u16(&mut self, field: &'static str) -> Result<u16, ProtocolError> {
        if self.buf.len() < 2 {
            return Err(ProtocolError::Truncated(field));
        }
        let value = u16::from_be_bytes([self.buf[0], self.buf[1]]);
        self.buf = &self.buf[2..];
        Ok(value)
    }

    pub fn read_string(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let len = self.read_u16(field)? as usize;
        if self.buf.len() < len {
            return Err(ProtocolError::Truncated(field));
        }
        let (raw, rest) = self.buf.split_at(len);
        self.buf = rest;
        String::from_utf8(raw.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(field))
    }

    /// Consume everything left.
    pub fn read_rest(&mut self) -> Vec<u8> {
        let rest = self.buf.to_vec();
        self.buf = &[];
        rest
    }
}

/// Append a length-prefixed UTF-8 string.
pub fn write_string(buf: &mut Vec<u8>, value: &str, field: &'static str) -> Result<(), ProtocolError> {
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::StringTooLong(field))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}
