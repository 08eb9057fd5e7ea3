//! Metadata exchanges: STAT and LIST.
//!
//! Both are plain request/response sequences on the shared connection; the
//! caller holds the connection for the whole exchange.

use crate::error::{Result, SyncError};
use crate::sync::connection::{Connection, DeviceStream};
use crate::sync::protocol::{
    DentHeader, RawTag, StatBody, Tag, DENT_HEADER_LEN, LIST_DONE_PADDING, MAX_NAME_LENGTH,
    STAT_BODY_LEN,
};
use crate::sync::stats::{Entry, Stats};

/// Query metadata for `path`.
///
/// A zero mode is the device's way of saying the path does not exist.
pub async fn stat<S: DeviceStream>(conn: &mut Connection<S>, path: &str) -> Result<Stats> {
    conn.send_command(Tag::Stat, path).await?;

    let parser = conn.parser();
    match parser.read_tag().await? {
        RawTag::Known(Tag::Stat) => {
            let body = StatBody::decode(parser.read_bytes(STAT_BODY_LEN).await?);
            conn.complete_exchange();
            if body.mode == 0 {
                tracing::debug!(path, "stat reported zero mode");
                return Err(SyncError::not_found(path));
            }
            Ok(Stats::new(body.mode, body.size, body.mtime))
        }
        RawTag::Known(Tag::Fail) => Err(parser.read_error().await),
        other => Err(parser.unexpected(&other, "STAT or FAIL")),
    }
}

/// List the members of directory `path`, in device order, without `.` and `..`.
pub async fn readdir<S: DeviceStream>(conn: &mut Connection<S>, path: &str) -> Result<Vec<Entry>> {
    conn.send_command(Tag::List, path).await?;

    let parser = conn.parser();
    let mut entries = Vec::new();
    loop {
        match parser.read_tag().await? {
            RawTag::Known(Tag::Dent) => {
                let header = DentHeader::decode(parser.read_bytes(DENT_HEADER_LEN).await?);
                if header.name_len as usize > MAX_NAME_LENGTH {
                    parser.end();
                    return Err(SyncError::FrameTooLarge {
                        what: "entry name",
                        len: header.name_len as usize,
                        max: MAX_NAME_LENGTH,
                    });
                }
                let name = parser.read_bytes(header.name_len as usize).await?;
                let name = String::from_utf8_lossy(&name);
                if Entry::is_dot_entry(&name) {
                    continue;
                }
                entries.push(Entry::new(name, header.mode, header.size, header.mtime));
            }
            RawTag::Known(Tag::Done) => {
                parser.read_bytes(LIST_DONE_PADDING).await?;
                conn.complete_exchange();
                tracing::debug!(path, count = entries.len(), "listed directory");
                return Ok(entries);
            }
            RawTag::Known(Tag::Fail) => return Err(parser.read_error().await),
            other => return Err(parser.unexpected(&other, "DENT, DONE or FAIL")),
        }
    }
}
