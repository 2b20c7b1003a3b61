// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Where log lines come from.
//!
//! The pipeline reads through [`LineSource`], which hides whether input is
//! stdin, a test buffer, or a file being followed as dnscache appends to it.

use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::constants::FOLLOW_POLL_INTERVAL;

#[async_trait]
pub trait LineSource: Send {
    /// Returns the next line exactly as read, terminator included (a final
    /// line may have none), or `None` at end of input.
    async fn next_raw_line(&mut self) -> std::io::Result<Option<Vec<u8>>>;

    /// Returns the next line without its terminator, or `None` at end of
    /// input. Invalid UTF-8 is replaced rather than rejected.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        Ok(self.next_raw_line().await?.map(|raw| decode_line(&raw)))
    }
}

/// Reads lines from any buffered reader until end of file.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: AsyncBufRead + Unpin + Send> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> LineSource for ReaderSource<R> {
    async fn next_raw_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let mut raw = Vec::with_capacity(256);
        if self.reader.read_until(b'\n', &mut raw).await? == 0 {
            return Ok(None);
        }
        Ok(Some(raw))
    }
}

/// Device and inode of a file, where the platform has them.
type FileId = Option<(u64, u64)>;

#[cfg(unix)]
fn file_id(meta: &std::fs::Metadata) -> FileId {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_id(_meta: &std::fs::Metadata) -> FileId {
    None
}

/// What happened to the followed path since the last read.
#[derive(Debug, PartialEq, Eq)]
enum PathState {
    Unchanged,
    /// Same file, now shorter than what was read.
    Truncated,
    /// The path names a different file (rotation by rename).
    Replaced,
    /// Nothing at the path yet.
    Missing,
}

/// Follows a file the way `tail -F` does: at end of file it waits for more
/// data instead of stopping. Restarts from the top if the file is
/// truncated, and moves on to the new file when the path is rotated.
pub struct FollowFile {
    path: PathBuf,
    reader: BufReader<File>,
    id: FileId,
    position: u64,
    pending: Vec<u8>,
    rotated: bool,
    poll_interval: Duration,
}

impl FollowFile {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let id = file_id(&file.metadata().await?);
        debug!("Following file {}", path.display());
        Ok(Self {
            path,
            reader: BufReader::new(file),
            id,
            position: 0,
            pending: Vec::with_capacity(256),
            rotated: false,
            poll_interval: FOLLOW_POLL_INTERVAL,
        })
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    async fn path_state(&self) -> std::io::Result<PathState> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(PathState::Missing),
            Err(e) => return Err(e),
        };
        if file_id(&meta) != self.id {
            Ok(PathState::Replaced)
        } else if meta.len() < self.position {
            Ok(PathState::Truncated)
        } else {
            Ok(PathState::Unchanged)
        }
    }

    async fn rewind(&mut self) -> std::io::Result<()> {
        warn!(
            "{} shrank below {} bytes, reading from the start",
            self.path.display(),
            self.position
        );
        self.reader.seek(SeekFrom::Start(0)).await?;
        self.position = 0;
        self.pending.clear();
        Ok(())
    }

    /// Switches to the file now at the path. Returns `false` if it vanished
    /// again in the meantime.
    async fn reopen(&mut self) -> std::io::Result<bool> {
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        self.id = file_id(&file.metadata().await?);
        self.reader = BufReader::new(file);
        self.position = 0;
        self.rotated = false;
        info!("{} was rotated, following the new file", self.path.display());
        Ok(true)
    }
}

#[async_trait]
impl LineSource for FollowFile {
    async fn next_raw_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        loop {
            let read = self.reader.read_until(b'\n', &mut self.pending).await?;
            self.position += read as u64;

            if self.pending.last() == Some(&b'\n') {
                return Ok(Some(std::mem::take(&mut self.pending)));
            }

            // At end of file, possibly holding a partial line.
            if self.rotated {
                // The old file has been read to its end.
                let tail = std::mem::take(&mut self.pending);
                if self.reopen().await? {
                    if !tail.is_empty() {
                        return Ok(Some(tail));
                    }
                    continue;
                }
                self.pending = tail;
                tokio::time::sleep(self.poll_interval).await;
                continue;
            }

            match self.path_state().await? {
                PathState::Truncated => self.rewind().await?,
                // Drain what was appended to the old file before switching.
                PathState::Replaced => self.rotated = true,
                PathState::Unchanged | PathState::Missing => {
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }
}

/// Copies every line read from `inner` to `out`, byte for byte, before
/// handing it on, so the process can sit in a daemontools log pipeline.
pub struct Echo<S, W> {
    inner: S,
    out: W,
}

impl<S: LineSource, W: AsyncWrite + Unpin + Send> Echo<S, W> {
    pub fn new(inner: S, out: W) -> Self {
        Self { inner, out }
    }
}

#[async_trait]
impl<S: LineSource, W: AsyncWrite + Unpin + Send> LineSource for Echo<S, W> {
    async fn next_raw_line(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let raw = self.inner.next_raw_line().await?;
        if let Some(raw) = &raw {
            // A closed stdout must not stop metric collection.
            let written = async {
                self.out.write_all(raw).await?;
                self.out.flush().await
            };
            if let Err(e) = written.await {
                debug!("Failed to echo input line: {e}");
            }
        }
        Ok(raw)
    }
}

fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}
