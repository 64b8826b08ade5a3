//! Minimal ZMTP 3.0 framing with the NULL security mechanism.
//!
//! Only what PUB and SUB sockets need is implemented: the greeting, the
//! `READY` handshake, message and command frames, and subscription messages
//! in both the 3.0 (`0x01` + prefix) and 3.1 (`SUBSCRIBE` command) forms.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use std::io;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};
use tokio_util::codec::{Decoder, Encoder, Framed};

pub const GREETING_SIZE: usize = 64;

/// Raw blocks on BCH-family chains can reach 32 MB.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const FLAG_MORE: u8 = 0x01;
const FLAG_LONG: u8 = 0x02;
const FLAG_COMMAND: u8 = 0x04;
const MECHANISM_NULL: &[u8] = b"NULL";
const SOCKET_TYPE_PROPERTY: &str = "Socket-Type";

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ZmtpError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid greeting signature")]
    InvalidSignature,

    #[error("unsupported ZMTP version {0}.{1}")]
    UnsupportedVersion(u8, u8),

    #[error("unsupported security mechanism: {0}")]
    UnsupportedMechanism(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(u64),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("connection closed")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Pub,
    Sub,
}

impl SocketType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pub => "PUB",
            Self::Sub => "SUB",
        }
    }

    fn accepts_peer(&self, peer: &[u8]) -> bool {
        match self {
            Self::Pub => matches!(peer, b"SUB" | b"XSUB"),
            Self::Sub => matches!(peer, b"PUB" | b"XPUB"),
        }
    }
}

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZmtpFrame {
    pub more: bool,
    pub command: bool,
    pub body: Bytes,
}

impl ZmtpFrame {
    #[must_use]
    pub fn message(body: impl Into<Bytes>, more: bool) -> Self {
        Self { more, command: false, body: body.into() }
    }

    #[must_use]
    pub fn command(name: &str, data: &[u8]) -> Self {
        let mut body = BytesMut::with_capacity(1 + name.len() + data.len());
        body.put_u8(name.len() as u8);
        body.put_slice(name.as_bytes());
        body.put_slice(data);
        Self { more: false, command: true, body: body.freeze() }
    }

    #[must_use]
    pub fn ready(socket_type: SocketType) -> Self {
        let value = socket_type.as_str().as_bytes();
        let mut data = BytesMut::new();
        data.put_u8(SOCKET_TYPE_PROPERTY.len() as u8);
        data.put_slice(SOCKET_TYPE_PROPERTY.as_bytes());
        data.put_u32(value.len() as u32);
        data.put_slice(value);
        Self::command("READY", &data)
    }

    /// ZMTP 3.0 subscription message for `prefix`.
    #[must_use]
    pub fn subscription(prefix: &[u8], subscribe: bool) -> Self {
        let mut body = BytesMut::with_capacity(1 + prefix.len());
        body.put_u8(u8::from(subscribe));
        body.put_slice(prefix);
        Self::message(body.freeze(), false)
    }

    #[must_use]
    pub fn command_name(&self) -> Option<&[u8]> {
        if !self.command {
            return None;
        }
        let len = usize::from(*self.body.first()?);
        self.body.get(1..1 + len)
    }

    #[must_use]
    pub fn command_data(&self) -> &[u8] {
        match self.command_name() {
            Some(name) => &self.body[1 + name.len()..],
            None => &[],
        }
    }
}

/// Parses the property list carried by `READY`.
pub fn parse_properties(mut data: &[u8]) -> Result<Vec<(String, Bytes)>, ZmtpError> {
    let mut properties = Vec::new();
    while !data.is_empty() {
        let name_len = usize::from(data[0]);
        if data.len() < 1 + name_len + 4 {
            return Err(ZmtpError::Malformed("truncated property name".into()));
        }
        let name = String::from_utf8_lossy(&data[1..1 + name_len]).into_owned();
        data = &data[1 + name_len..];

        let value_len = data.get_u32() as usize;
        if data.len() < value_len {
            return Err(ZmtpError::Malformed("truncated property value".into()));
        }
        properties.push((name, Bytes::copy_from_slice(&data[..value_len])));
        data = &data[value_len..];
    }
    Ok(properties)
}

#[must_use]
pub fn greeting(as_server: bool) -> [u8; GREETING_SIZE] {
    let mut greeting = [0u8; GREETING_SIZE];
    greeting[0] = 0xff;
    greeting[9] = 0x7f;
    greeting[10] = 3;
    greeting[11] = 0;
    greeting[12..12 + MECHANISM_NULL.len()].copy_from_slice(MECHANISM_NULL);
    greeting[32] = u8::from(as_server);
    greeting
}

pub fn check_greeting(greeting: &[u8; GREETING_SIZE]) -> Result<(), ZmtpError> {
    if greeting[0] != 0xff || greeting[9] & 0x01 != 0x01 {
        return Err(ZmtpError::InvalidSignature);
    }
    if greeting[10] < 3 {
        return Err(ZmtpError::UnsupportedVersion(greeting[10], greeting[11]));
    }

    let mechanism = &greeting[12..32];
    let end = mechanism.iter().position(|b| *b == 0).unwrap_or(mechanism.len());
    if &mechanism[..end] != MECHANISM_NULL {
        return Err(ZmtpError::UnsupportedMechanism(String::from_utf8_lossy(&mechanism[..end]).into_owned()));
    }
    Ok(())
}

/// Frame codec for an established connection (after the greeting).
#[derive(Debug, Clone)]
pub struct ZmtpCodec {
    max_frame_size: usize,
}

impl Default for ZmtpCodec {
    fn default() -> Self {
        Self { max_frame_size: DEFAULT_MAX_FRAME_SIZE }
    }
}

impl ZmtpCodec {
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for ZmtpCodec {
    type Item = ZmtpFrame;
    type Error = ZmtpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 2 {
            return Ok(None);
        }

        let flags = src[0];
        if flags & !(FLAG_MORE | FLAG_LONG | FLAG_COMMAND) != 0 {
            return Err(ZmtpError::Malformed(format!("reserved flag bits set: {flags:#04x}")));
        }

        let (header_len, size) = if flags & FLAG_LONG != 0 {
            if src.len() < 9 {
                return Ok(None);
            }
            let mut len = [0u8; 8];
            len.copy_from_slice(&src[1..9]);
            (9, u64::from_be_bytes(len))
        } else {
            (2, u64::from(src[1]))
        };

        if size > self.max_frame_size as u64 {
            return Err(ZmtpError::FrameTooLarge(size));
        }
        let size = size as usize;

        if src.len() < header_len + size {
            src.reserve(header_len + size - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let body = src.split_to(size).freeze();
        Ok(Some(ZmtpFrame {
            more: flags & FLAG_MORE != 0,
            command: flags & FLAG_COMMAND != 0,
            body,
        }))
    }
}

impl Encoder<ZmtpFrame> for ZmtpCodec {
    type Error = ZmtpError;

    fn encode(&mut self, frame: ZmtpFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut flags = 0;
        if frame.more {
            flags |= FLAG_MORE;
        }
        if frame.command {
            flags |= FLAG_COMMAND;
        }

        let len = frame.body.len();
        if len > usize::from(u8::MAX) {
            dst.reserve(9 + len);
            dst.put_u8(flags | FLAG_LONG);
            dst.put_u64(len as u64);
        } else {
            dst.reserve(2 + len);
            dst.put_u8(flags);
            dst.put_u8(len as u8);
        }
        dst.put_slice(&frame.body);
        Ok(())
    }
}

pub type ZmtpStream = Framed<TcpStream, ZmtpCodec>;

/// What arrived on a connection: a complete multipart message or a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Message(Vec<Bytes>),
    Command(ZmtpFrame),
}

/// Exchanges greetings and `READY` commands, rejecting incompatible peers.
pub async fn handshake(
    mut stream: TcpStream,
    socket_type: SocketType,
    as_server: bool,
) -> Result<ZmtpStream, ZmtpError> {
    stream.write_all(&greeting(as_server)).await?;

    let mut peer = [0u8; GREETING_SIZE];
    stream.read_exact(&mut peer).await?;
    check_greeting(&peer)?;

    let mut framed = Framed::new(stream, ZmtpCodec::default());
    framed.send(ZmtpFrame::ready(socket_type)).await?;

    let frame = framed.next().await.ok_or(ZmtpError::Closed)??;
    match frame.command_name() {
        Some(b"READY") => {
            let properties = parse_properties(frame.command_data())?;
            let peer_type = properties
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(SOCKET_TYPE_PROPERTY))
                .map(|(_, value)| value.clone())
                .ok_or_else(|| ZmtpError::Handshake("peer did not send Socket-Type".into()))?;
            if !socket_type.accepts_peer(&peer_type) {
                return Err(ZmtpError::Handshake(format!(
                    "{} cannot talk to {}",
                    socket_type.as_str(),
                    String::from_utf8_lossy(&peer_type)
                )));
            }
            Ok(framed)
        }
        Some(b"ERROR") => {
            let data = frame.command_data();
            let reason = data.get(1..).map(String::from_utf8_lossy).unwrap_or_default();
            Err(ZmtpError::Handshake(format!("peer sent ERROR: {reason}")))
        }
        _ => Err(ZmtpError::Handshake("expected READY command".into())),
    }
}

/// Reads the next complete message or command. `None` on clean close.
pub async fn read_next(stream: &mut ZmtpStream) -> Result<Option<Incoming>, ZmtpError> {
    let mut parts = Vec::new();
    while let Some(frame) = stream.next().await {
        let frame = frame?;
        if frame.command {
            if !parts.is_empty() {
                return Err(ZmtpError::Malformed("command inside multipart message".into()));
            }
            return Ok(Some(Incoming::Command(frame)));
        }

        let more = frame.more;
        parts.push(frame.body);
        if !more {
            return Ok(Some(Incoming::Message(parts)));
        }
    }

    if parts.is_empty() {
        Ok(None)
    } else {
        Err(ZmtpError::Closed)
    }
}

/// Sends `parts` as one multipart message.
pub async fn write_message(stream: &mut ZmtpStream, parts: &[Bytes]) -> Result<(), ZmtpError> {
    let last = parts.len().saturating_sub(1);
    for (index, part) in parts.iter().enumerate() {
        stream.feed(ZmtpFrame::message(part.clone(), index < last)).await?;
    }
    stream.flush().await
}
