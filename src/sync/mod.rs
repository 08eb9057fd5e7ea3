//! Device sync protocol client.
//!
//! Request/response and request/stream exchanges over one established
//! connection. Commands are strictly sequential; a transfer owns the
//! connection until its terminal frame (or cancel) has been handled.
//!
//! # Architecture
//!
//! ```text
//!                     +-------------+
//!                     | SyncClient  |
//!                     +------+------+
//!          stat/readdir      |       push / pull
//!        +-------------------+-------------------+
//!        v                                       v
//! +--------------+                 +---------------------------+
//! |   metadata   |                 | PushTransfer/PullTransfer |
//! +------+-------+                 +-------------+-------------+
//!        |                                       |
//!        v                                       v
//! +---------------------------------------------------------+
//! |  Connection: Parser (inbound) | writer (outbound)       |
//! +---------------------------------------------------------+
//! ```
//!
//! # Wire exchanges
//!
//! | Exchange | Request            | Success reply                          |
//! |----------|--------------------|----------------------------------------|
//! | stat     | `STAT` len path    | `STAT` mode size mtime                 |
//! | list     | `LIST` len path    | `DENT`... then `DONE` + 16 bytes       |
//! | push     | `SEND` len "p,m"   | (we send `DATA`... `DONE` mtime) `OKAY`|
//! | pull     | `RECV` len path    | `DATA`... then `DONE` + 4 bytes        |
//!
//! Any exchange may be answered with `FAIL` len message instead.

pub mod client;
pub mod connection;
pub mod metadata;
pub mod parser;
pub mod protocol;
pub mod pull;
pub mod push;
pub mod stats;
pub mod transfer;

pub use client::{temp_path, PushSource, SyncClient};
pub use connection::{Connection, DeviceStream};
pub use parser::{ChunkSink, Parser};
pub use protocol::{RawTag, Tag, DATA_MAX_LENGTH, DEFAULT_CHMOD, S_IFREG, TEMP_PATH};
pub use pull::PullTransfer;
pub use push::{PushReader, PushTransfer};
pub use stats::{Entry, Stats};
pub use transfer::{Progress, TransferStatus};
