//! Test doubles for the device side of a sync connection.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};

pub const FILE_MTIME: u32 = 1_600_000_000;

/// What the fake device saw and stores.
#[derive(Debug, Default)]
pub struct DeviceState {
    pub files: BTreeMap<String, Vec<u8>>,
    /// Directory path -> member names, in listing order
    pub dirs: BTreeMap<String, Vec<String>>,
    /// Paths whose SEND is answered with FAIL after DONE
    pub read_only: Vec<String>,
    /// Paths whose STAT reply is held back
    pub stat_delays: BTreeMap<String, Duration>,
    pub commands: Vec<String>,
    pub send_args: Vec<String>,
    pub data_frames: Vec<usize>,
    pub done_mtimes: Vec<u32>,
}

impl DeviceState {
    pub fn with_file(mut self, path: &str, data: &[u8]) -> Self {
        self.files.insert(path.to_string(), data.to_vec());
        self
    }

    pub fn with_stat_delay(mut self, path: &str, delay: Duration) -> Self {
        self.stat_delays.insert(path.to_string(), delay);
        self
    }

    pub fn with_dir(mut self, path: &str, names: &[&str]) -> Self {
        self.dirs
            .insert(path.to_string(), names.iter().map(|s| s.to_string()).collect());
        self
    }
}

/// Start an in-memory device serving sync requests over a duplex pipe.
pub fn spawn_device(state: DeviceState) -> (DuplexStream, Arc<Mutex<DeviceState>>) {
    let (client, device) = tokio::io::duplex(64 * 1024);
    let state = Arc::new(Mutex::new(state));
    let shared = Arc::clone(&state);
    tokio::spawn(async move {
        let _ = serve(device, shared).await;
    });
    (client, state)
}

async fn write_fail(io: &mut DuplexStream, message: &str) -> io::Result<()> {
    io.write_all(b"FAIL").await?;
    io.write_u32_le(message.len() as u32).await?;
    io.write_all(message.as_bytes()).await
}

async fn serve(mut io: DuplexStream, state: Arc<Mutex<DeviceState>>) -> io::Result<()> {
    loop {
        let mut tag = [0u8; 4];
        if io.read_exact(&mut tag).await.is_err() {
            return Ok(());
        }
        let len = io.read_u32_le().await? as usize;
        let mut arg = vec![0u8; len];
        io.read_exact(&mut arg).await?;
        let arg = String::from_utf8(arg).expect("utf-8 argument");
        state
            .lock()
            .unwrap()
            .commands
            .push(format!("{} {}", String::from_utf8_lossy(&tag), arg));

        match &tag {
            b"STAT" => {
                let delay = state.lock().unwrap().stat_delays.get(&arg).copied();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let reply = {
                    let s = state.lock().unwrap();
                    if arg == "/fail" {
                        None
                    } else if let Some(data) = s.files.get(&arg) {
                        Some((0o100644, data.len() as u32, FILE_MTIME))
                    } else if s.dirs.contains_key(&arg) {
                        Some((0o040755, 4096, FILE_MTIME))
                    } else {
                        Some((0, 0, 0))
                    }
                };
                match reply {
                    Some((mode, size, mtime)) => {
                        io.write_all(b"STAT").await?;
                        io.write_u32_le(mode).await?;
                        io.write_u32_le(size).await?;
                        io.write_u32_le(mtime).await?;
                    }
                    None => write_fail(&mut io, "Permission denied").await?,
                }
            }
            b"LIST" => {
                let listing = {
                    let s = state.lock().unwrap();
                    s.dirs.get(&arg).map(|names| {
                        names
                            .iter()
                            .map(|name| {
                                let full = format!("{}/{}", arg.trim_end_matches('/'), name);
                                match s.files.get(&full) {
                                    Some(data) => (name.clone(), 0o100644, data.len() as u32),
                                    None => (name.clone(), 0o040755, 4096),
                                }
                            })
                            .collect::<Vec<_>>()
                    })
                };
                match listing {
                    Some(entries) => {
                        for (name, mode, size) in entries {
                            io.write_all(b"DENT").await?;
                            io.write_u32_le(mode).await?;
                            io.write_u32_le(size).await?;
                            io.write_u32_le(FILE_MTIME).await?;
                            io.write_u32_le(name.len() as u32).await?;
                            io.write_all(name.as_bytes()).await?;
                        }
                        io.write_all(b"DONE").await?;
                        io.write_all(&[0u8; 16]).await?;
                    }
                    None => write_fail(&mut io, "No such file or directory").await?,
                }
            }
            b"SEND" => {
                state.lock().unwrap().send_args.push(arg.clone());
                let (path, _mode) = arg.rsplit_once(',').expect("path,mode");
                let mut content = Vec::new();
                loop {
                    let mut tag = [0u8; 4];
                    io.read_exact(&mut tag).await?;
                    let value = io.read_u32_le().await?;
                    match &tag {
                        b"DATA" => {
                            let mut chunk = vec![0u8; value as usize];
                            io.read_exact(&mut chunk).await?;
                            content.extend_from_slice(&chunk);
                            state.lock().unwrap().data_frames.push(value as usize);
                        }
                        b"DONE" => {
                            state.lock().unwrap().done_mtimes.push(value);
                            break;
                        }
                        other => panic!("unexpected tag during SEND: {:?}", other),
                    }
                }
                let rejected = state.lock().unwrap().read_only.iter().any(|p| p == path);
                if rejected {
                    write_fail(&mut io, "couldn't create file: Read-only file system").await?;
                } else {
                    state
                        .lock()
                        .unwrap()
                        .files
                        .insert(path.to_string(), content);
                    io.write_all(b"OKAY").await?;
                    io.write_u32_le(0).await?;
                }
            }
            b"RECV" => {
                let data = state.lock().unwrap().files.get(&arg).cloned();
                match data {
                    Some(data) => {
                        for chunk in data.chunks(65536) {
                            io.write_all(b"DATA").await?;
                            io.write_u32_le(chunk.len() as u32).await?;
                            io.write_all(chunk).await?;
                        }
                        io.write_all(b"DONE").await?;
                        io.write_u32_le(0).await?;
                    }
                    None => write_fail(&mut io, "No such file or directory").await?,
                }
            }
            other => panic!("unexpected command {:?}", other),
        }
        io.flush().await?;
    }
}

/// Stream with a canned inbound script and a bounded outbound side.
///
/// Once `write_limit` bytes have been accepted every write stays pending
/// forever: a transport that never drains. Reads past the script either
/// stay pending or report end of stream.
pub struct ScriptedStream {
    inbound: Vec<u8>,
    pos: usize,
    eof_after_script: bool,
    write_limit: usize,
    pub written: Arc<Mutex<Vec<u8>>>,
    pub shutdowns: Arc<AtomicUsize>,
}

#[derive(Clone)]
pub struct ScriptProbe {
    pub written: Arc<Mutex<Vec<u8>>>,
    pub shutdowns: Arc<AtomicUsize>,
}

impl ScriptProbe {
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn written_len(&self) -> usize {
        self.written.lock().unwrap().len()
    }
}

impl ScriptedStream {
    pub fn new(inbound: &[u8], write_limit: usize, eof_after_script: bool) -> (Self, ScriptProbe) {
        let written = Arc::new(Mutex::new(Vec::new()));
        let shutdowns = Arc::new(AtomicUsize::new(0));
        let probe = ScriptProbe {
            written: Arc::clone(&written),
            shutdowns: Arc::clone(&shutdowns),
        };
        (
            Self {
                inbound: inbound.to_vec(),
                pos: 0,
                eof_after_script,
                write_limit,
                written,
                shutdowns,
            },
            probe,
        )
    }
}

impl AsyncRead for ScriptedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos < self.inbound.len() {
            let n = buf.remaining().min(self.inbound.len() - self.pos);
            let start = self.pos;
            buf.put_slice(&self.inbound[start..start + n]);
            self.pos += n;
            Poll::Ready(Ok(()))
        } else if self.eof_after_script {
            Poll::Ready(Ok(()))
        } else {
            Poll::Pending
        }
    }
}

impl AsyncWrite for ScriptedStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut written = self.written.lock().unwrap();
        let room = self.write_limit.saturating_sub(written.len());
        if room == 0 {
            return Poll::Pending;
        }
        let n = room.min(buf.len());
        written.extend_from_slice(&buf[..n]);
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// Tags and values of the frames written after the leading command frame.
pub fn outbound_frames(buf: &[u8]) -> Vec<(String, u32)> {
    let mut frames = Vec::new();
    let mut pos = 0;
    let mut first = true;
    while pos + 8 <= buf.len() {
        let tag = String::from_utf8_lossy(&buf[pos..pos + 4]).into_owned();
        let value = u32::from_le_bytes(buf[pos + 4..pos + 8].try_into().unwrap());
        pos += 8;
        if first || tag == "DATA" {
            // Command argument or DATA payload follows
            pos += value as usize;
        }
        first = false;
        frames.push((tag, value));
    }
    frames.remove(0);
    frames
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
