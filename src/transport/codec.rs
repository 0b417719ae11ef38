//! Wire format of a frame.
//!
//! ```text
//! +-------+------+---------+-------+--------+---------+--------------------------+
//! | magic | kind | version | round | source | entries | bincode [(gid, payload)] |
//! |  2 B  | 1 B  |   1 B   | u32le | u32le  |  u32le  |  rest of the frame       |
//! +-------+------+---------+-------+--------+---------+--------------------------+
//! ```
//!
//! The body is bincode so every payload, non-finite floats included, decodes
//! to exactly what was encoded.

use serde::de::DeserializeOwned;
use serde::Serialize;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

use crate::error::{PieError, Result};
use crate::fragment::{GlobalId, WorkerId};

const MAGIC: [u8; 2] = *b"PE";
const VERSION: u8 = 2;

/// Size of the fixed header in bytes.
pub const HEADER_LEN: usize = core::mem::size_of::<RawHeader>();

/// What a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameKind {
    /// Inner vertex values for the receiver's mirrors.
    MirrorSync = 1,
    /// Messages for the receiver's inner vertices.
    Messages = 2,
}

impl FrameKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(FrameKind::MirrorSync),
            2 => Some(FrameKind::Messages),
            _ => None,
        }
    }
}

#[derive(FromZeroes, FromBytes, AsBytes, Clone, Copy)]
#[repr(C)]
struct RawHeader {
    magic: [u8; 2],
    kind: u8,
    version: u8,
    round: U32<LittleEndian>,
    source: U32<LittleEndian>,
    entries: U32<LittleEndian>,
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload kind.
    pub kind: FrameKind,
    /// Round of the sender when the frame was produced.
    pub round: u32,
    /// Sending worker.
    pub source: WorkerId,
    /// Number of `(gid, payload)` entries in the body.
    pub entries: usize,
}

fn narrow(value: usize, what: &str) -> Result<U32<LittleEndian>> {
    u32::try_from(value)
        .map(U32::new)
        .map_err(|_| PieError::MalformedFrame(format!("{what} {value} does not fit in 32 bits")))
}

/// Encodes one frame.
///
/// # Errors
/// [`PieError::Codec`] if the payload cannot be serialized,
/// [`PieError::MalformedFrame`] if a header field overflows.
pub fn encode<T: Serialize>(
    kind: FrameKind,
    round: u32,
    source: WorkerId,
    entries: &[(GlobalId, T)],
) -> Result<Vec<u8>> {
    let header = RawHeader {
        magic: MAGIC,
        kind: kind as u8,
        version: VERSION,
        round: U32::new(round),
        source: narrow(source, "source worker")?,
        entries: narrow(entries.len(), "entry count")?,
    };
    let mut out = Vec::with_capacity(HEADER_LEN + entries.len() * 16);
    out.extend_from_slice(header.as_bytes());
    bincode::serialize_into(&mut out, entries)?;
    Ok(out)
}

/// Parses the fixed header of `frame`.
///
/// # Errors
/// [`PieError::MalformedFrame`] on a short frame, bad magic, unknown version or kind.
pub fn decode_header(frame: &[u8]) -> Result<FrameHeader> {
    let raw = RawHeader::read_from_prefix(frame)
        .ok_or_else(|| PieError::MalformedFrame(format!("frame of {} bytes has no header", frame.len())))?;
    if raw.magic != MAGIC {
        return Err(PieError::MalformedFrame("bad magic".into()));
    }
    if raw.version != VERSION {
        return Err(PieError::MalformedFrame(format!("unsupported version {}", raw.version)));
    }
    let kind = FrameKind::from_byte(raw.kind)
        .ok_or_else(|| PieError::MalformedFrame(format!("unknown frame kind {}", raw.kind)))?;
    Ok(FrameHeader {
        kind,
        round: raw.round.get(),
        source: raw.source.get() as WorkerId,
        entries: raw.entries.get() as usize,
    })
}

/// Decodes the body of `frame` whose header is `header`.
///
/// # Errors
/// [`PieError::Codec`] on a bad body, [`PieError::MalformedFrame`] if the
/// entry count disagrees with the header.
pub fn decode_entries<T: DeserializeOwned>(
    frame: &[u8],
    header: &FrameHeader,
) -> Result<Vec<(GlobalId, T)>> {
    let body = frame
        .get(HEADER_LEN..)
        .ok_or_else(|| PieError::MalformedFrame("frame shorter than its header".into()))?;
    let entries: Vec<(GlobalId, T)> = bincode::deserialize(body)?;
    if entries.len() != header.entries {
        return Err(PieError::MalformedFrame(format!(
            "header announces {} entries, body holds {}",
            header.entries,
            entries.len()
        )));
    }
    Ok(entries)
}
