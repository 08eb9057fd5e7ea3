//! Sync protocol frame codec.
//!
//! Wire format: every frame starts with a 4-byte ASCII tag.
//! All multi-byte integers are little-endian.
//!
//! Two outbound shapes:
//! - command + argument: tag | len:u32 | UTF-8 argument
//! - command + length:   tag | value:u32 (byte count, or mtime for DONE)

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum payload of a single DATA frame
pub const DATA_MAX_LENGTH: usize = 65536;

/// Permission bits used when a push does not specify a mode
pub const DEFAULT_CHMOD: u32 = 0o644;

/// Device directory for temporary files
pub const TEMP_PATH: &str = "/data/local/tmp";

/// Regular file type bit, always set on the mode sent with SEND
pub const S_IFREG: u32 = 0o100000;

/// File type mask
pub const S_IFMT: u32 = 0o170000;

/// Directory type bit
pub const S_IFDIR: u32 = 0o040000;

/// Symbolic link type bit
pub const S_IFLNK: u32 = 0o120000;

/// Size of a STAT reply body (mode, size, mtime)
pub const STAT_BODY_LEN: usize = 12;

/// Size of a DENT reply header (mode, size, mtime, name length)
pub const DENT_HEADER_LEN: usize = 16;

/// Reserved bytes after a DONE reply to LIST
pub const LIST_DONE_PADDING: usize = 16;

/// Longest entry name accepted from a DENT frame
pub const MAX_NAME_LENGTH: usize = 65536;

/// Longest message accepted from a FAIL frame
pub const MAX_MESSAGE_LENGTH: usize = 65536;

/// Reserved bytes after OKAY and after a DONE reply to RECV
pub const REPLY_PADDING: usize = 4;

// =============================================================================
// Frame tags
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Stat,
    List,
    Send,
    Recv,
    Data,
    Done,
    Okay,
    Fail,
    Dent,
}

impl Tag {
    pub const fn as_bytes(self) -> &'static [u8; 4] {
        match self {
            Self::Stat => b"STAT",
            Self::List => b"LIST",
            Self::Send => b"SEND",
            Self::Recv => b"RECV",
            Self::Data => b"DATA",
            Self::Done => b"DONE",
            Self::Okay => b"OKAY",
            Self::Fail => b"FAIL",
            Self::Dent => b"DENT",
        }
    }

    pub fn from_bytes(b: &[u8]) -> Option<Self> {
        match b {
            b"STAT" => Some(Self::Stat),
            b"LIST" => Some(Self::List),
            b"SEND" => Some(Self::Send),
            b"RECV" => Some(Self::Recv),
            b"DATA" => Some(Self::Data),
            b"DONE" => Some(Self::Done),
            b"OKAY" => Some(Self::Okay),
            b"FAIL" => Some(Self::Fail),
            b"DENT" => Some(Self::Dent),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        // Tags are ASCII literals
        std::str::from_utf8(self.as_bytes()).unwrap_or("????")
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tag as read off the wire; unknown tags are kept for error reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawTag {
    Known(Tag),
    Unknown(String),
}

impl RawTag {
    pub fn parse(b: &[u8]) -> Self {
        match Tag::from_bytes(b) {
            Some(tag) => RawTag::Known(tag),
            None => RawTag::Unknown(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

impl std::fmt::Display for RawTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawTag::Known(tag) => tag.fmt(f),
            RawTag::Unknown(s) => f.write_str(s),
        }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a command + argument frame: tag | len:u32 | argument.
pub fn encode_command(tag: Tag, arg: &str) -> Bytes {
    let arg = arg.as_bytes();
    let mut buf = BytesMut::with_capacity(8 + arg.len());
    buf.put_slice(tag.as_bytes());
    buf.put_u32_le(arg.len() as u32);
    buf.put_slice(arg);
    buf.freeze()
}

/// Encode a command + length frame: tag | value:u32.
pub fn encode_length(tag: Tag, value: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_slice(tag.as_bytes());
    buf.put_u32_le(value);
    buf.freeze()
}

/// Argument of a SEND command: `path,mode` with the regular file bit set.
pub fn send_argument(path: &str, mode: u32) -> String {
    format!("{},{}", path, mode | S_IFREG)
}

// =============================================================================
// Reply bodies
// =============================================================================

/// Body of a STAT reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatBody {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

impl StatBody {
    pub fn decode(mut payload: Bytes) -> Self {
        debug_assert!(payload.remaining() >= STAT_BODY_LEN);
        Self {
            mode: payload.get_u32_le(),
            size: payload.get_u32_le(),
            mtime: payload.get_u32_le(),
        }
    }
}

/// Fixed header of a DENT reply; the name follows on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DentHeader {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
    pub name_len: u32,
}

impl DentHeader {
    pub fn decode(mut payload: Bytes) -> Self {
        debug_assert!(payload.remaining() >= DENT_HEADER_LEN);
        Self {
            mode: payload.get_u32_le(),
            size: payload.get_u32_le(),
            mtime: payload.get_u32_le(),
            name_len: payload.get_u32_le(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
