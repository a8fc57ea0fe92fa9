//! Weft wire format — framing for every hop in the fabric.
//!
//! A frame is an 8-byte header followed by a JSON body. Every hop exchange
//! (RC→RS, RS→RS, RS→RC) is one pack frame answered by one receipt frame
//! on its own connection, so concurrent sends can never interleave and a
//! pack round-trips byte-for-byte.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::pack::Pack;

// ── Framing ──────────────────────────────────────────────────────────────────

/// Current frame format version.
pub const WIRE_VERSION: u8 = 0x01;

/// Hard cap on a frame body. Larger transfers must be batched by the
/// sender across sibling packs.
pub const MAX_FRAME: usize = 64 << 20;

/// Fixed-size prefix of every frame.
///
/// Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct FrameHeader {
    /// FrameKind discriminant.
    pub kind: u8,

    /// Wire format version. A receiver seeing an unknown version rejects
    /// the frame and drops the connection.
    pub version: u8,

    /// Reserved, must be zero.
    pub reserved: [u8; 2],

    /// Body length in bytes, not including this header.
    pub length: u32,
}

assert_eq_size!(FrameHeader, [u8; 8]);

/// What a frame body contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    /// A routed pack.
    Pack = 0x01,

    /// The receiving hop's answer for one pack.
    Receipt = 0x02,
}

impl TryFrom<u8> for FrameKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameKind::Pack),
            0x02 => Ok(FrameKind::Receipt),
            other => Err(WireError::UnknownKind(other)),
        }
    }
}

// ── Receipts ─────────────────────────────────────────────────────────────────

/// Per-hop answer for one transmitted pack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Receipt {
    /// The hop accepted the pack for relay or delivery.
    Accepted,

    /// The hop refused the pack. Earlier accepted packs are unaffected.
    Rejected { reason: RejectReason, detail: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The pending buffer for the destination is full. Earlier packs are
    /// preserved; the newest is the one refused.
    Backpressure,

    /// No route to the target from this hop.
    Unreachable,

    /// The target id is missing from this hop's registry.
    UnknownNode,

    /// The pack reached a node other than its target.
    WrongNode,

    /// The frame body did not decode.
    Malformed,
}

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors arising on the wire.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownKind(u8),

    #[error("unknown wire version: 0x{0:02x}")]
    UnknownVersion(u8),

    #[error("frame body of {0} bytes exceeds maximum {}", MAX_FRAME)]
    FrameTooLarge(usize),

    #[error("expected a {expected:?} frame, got {got:?}")]
    UnexpectedFrame {
        expected: FrameKind,
        got: FrameKind,
    },

    #[error("connection closed before a reply arrived")]
    NoReply,

    #[error("failed to decode frame body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("failed to dial {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ── Frame I/O ────────────────────────────────────────────────────────────────

/// Write one frame: header, then body.
pub async fn write_frame<W>(writer: &mut W, kind: FrameKind, body: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    if body.len() > MAX_FRAME {
        return Err(WireError::FrameTooLarge(body.len()));
    }
    let header = FrameHeader {
        kind: kind as u8,
        version: WIRE_VERSION,
        reserved: [0; 2],
        length: body.len() as u32,
    };
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns None on a clean end of stream at a frame
/// boundary; mid-frame EOF is an error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<(FrameKind, Bytes)>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 8];
    match reader.read_exact(&mut head).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = match FrameHeader::read_from(&head[..]) {
        Some(h) => h,
        None => {
            return Err(WireError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "unparseable frame header",
            )))
        }
    };
    if header.version != WIRE_VERSION {
        return Err(WireError::UnknownVersion(header.version));
    }
    let kind = FrameKind::try_from(header.kind)?;
    let length = header.length as usize;
    if length > MAX_FRAME {
        return Err(WireError::FrameTooLarge(length));
    }
    let mut body = BytesMut::zeroed(length);
    reader.read_exact(&mut body).await?;
    Ok(Some((kind, body.freeze())))
}

pub fn encode_pack(pack: &Pack) -> Result<Vec<u8>, WireError> {
    Ok(serde_json::to_vec(pack)?)
}

pub fn decode_pack(body: &[u8]) -> Result<Pack, WireError> {
    Ok(serde_json::from_slice(body)?)
}

/// Answer the pack just read on this connection.
pub async fn write_receipt<W>(writer: &mut W, receipt: &Receipt) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(receipt)?;
    write_frame(writer, FrameKind::Receipt, &body).await
}

/// Dial `addr`, transmit one pack, and wait for the hop's receipt.
pub async fn post(addr: &str, pack: &Pack) -> Result<Receipt, WireError> {
    let mut stream = TcpStream::connect(addr).await.map_err(|source| {
        WireError::Connect {
            addr: addr.to_string(),
            source,
        }
    })?;
    let body = encode_pack(pack)?;
    write_frame(&mut stream, FrameKind::Pack, &body).await?;
    match read_frame(&mut stream).await? {
        Some((FrameKind::Receipt, body)) => Ok(serde_json::from_slice(&body)?),
        Some((kind, _)) => Err(WireError::UnexpectedFrame {
            expected: FrameKind::Receipt,
            got: kind,
        }),
        None => Err(WireError::NoReply),
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
