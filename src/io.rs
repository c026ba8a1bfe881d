// Copyright 2024 TAKKT Industrial & Packaging GmbH
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

//! Sources to upload from and destinations to download to.

use async_trait::async_trait;
use std::{
    io::{
        Cursor,
        ErrorKind,
        SeekFrom,
    },
    path::{
        Path,
        PathBuf,
    },
    pin::Pin,
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::io::{
    AsyncRead,
    AsyncReadExt,
    AsyncSeekExt,
    AsyncWriteExt,
};
use tokio_util::bytes::{
    Bytes,
    BytesMut,
};
use tracing::debug;

/// A stream of exactly the bytes of one part.
pub type PartReader = Pin<Box<dyn AsyncRead + Send + Sync>>;

/// The body of a response, as handed out by a transport.
pub type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

/// Where the bytes of an upload come from.
#[async_trait]
pub trait Source: Send + Sync + 'static {
    async fn size(&self) -> std::io::Result<u64>;

    /// Whether multiple range readers may be open at the same time. Sources that can only be
    /// consumed sequentially are uploaded one part at a time.
    fn supports_concurrent_reads(&self) -> bool {
        true
    }

    async fn open_range_reader(&self, offset: u64, length: u64) -> std::io::Result<PartReader>;
}

/// Where the bytes of a download go to.
#[async_trait]
pub trait Destination: Send + Sync + 'static {
    /// Called once before any part is written, with the size of the whole object.
    async fn set_len(&self, _size: u64) -> std::io::Result<()> {
        Ok(())
    }

    /// Writes `bytes` at `offset`. Concurrent calls always target disjoint ranges.
    async fn write_at(&self, offset: u64, bytes: Bytes) -> std::io::Result<()>;
}

/// Reads parts from a local file, opening an independent handle for every part.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Source for FileSource {
    async fn size(&self) -> std::io::Result<u64> {
        Ok(tokio::fs::metadata(&self.path).await?.len())
    }

    async fn open_range_reader(&self, offset: u64, length: u64) -> std::io::Result<PartReader> {
        debug!("Opening file for reading: {}", self.path.display());
        let mut file = tokio::fs::File::open(&self.path).await?;
        debug!("Seeking to the start of the part: {}", offset);
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(Box::pin(file.take(length)))
    }
}

/// An object that is already in memory.
#[derive(Debug, Clone)]
pub struct BytesSource {
    bytes: Bytes,
}

impl BytesSource {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }
}

#[async_trait]
impl Source for BytesSource {
    async fn size(&self) -> std::io::Result<u64> {
        Ok(self.bytes.len() as u64)
    }

    async fn open_range_reader(&self, offset: u64, length: u64) -> std::io::Result<PartReader> {
        let end = offset
            .checked_add(length)
            .filter(|end| *end <= self.bytes.len() as u64)
            .ok_or_else(|| {
                std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    format!(
                        "range {}..{} is outside of a buffer of {} bytes",
                        offset,
                        offset.saturating_add(length),
                        self.bytes.len(),
                    ),
                )
            })?;
        Ok(Box::pin(Cursor::new(
            self.bytes.slice(offset as usize..end as usize),
        )))
    }
}

/// A range whose read was interrupted, e.g. by a part timeout.
struct PendingRead {
    offset: u64,
    buffer: BytesMut,
}

struct StreamState {
    reader: BodyReader,
    /// Bytes consumed from the reader so far, including those of a pending read.
    position: u64,
    pending: Option<PendingRead>,
    last_range: Option<(u64, Bytes)>,
}

/// Size of the scratch buffer used to skip over parts that are already done.
const SKIP_CHUNK_SIZE: usize = 64 * 1024;

/// A source that can only be read front to back, such as a pipe.
///
/// Parts are read in order, so the engine uploads from it with a concurrency of one. The most
/// recently read part is kept in memory, so that a failed part can be retried. Every byte taken
/// from the stream is accounted for before the next await, so a read that is dropped halfway,
/// e.g. because the part timed out, picks up where it left off on the retry.
pub struct StreamSource {
    size: u64,
    state: tokio::sync::Mutex<StreamState>,
}

impl StreamSource {
    /// `size` is the number of bytes the stream will yield; it has to be known up front.
    pub fn new<R>(reader: R, size: u64) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self {
            size,
            state: tokio::sync::Mutex::new(StreamState {
                reader: Box::pin(reader),
                position: 0,
                pending: None,
                last_range: None,
            }),
        }
    }
}

impl std::fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSource")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Source for StreamSource {
    async fn size(&self) -> std::io::Result<u64> {
        Ok(self.size)
    }

    fn supports_concurrent_reads(&self) -> bool {
        false
    }

    async fn open_range_reader(&self, offset: u64, length: u64) -> std::io::Result<PartReader> {
        let mut guard = self.state.lock().await;
        let StreamState {
            reader,
            position,
            pending,
            last_range,
        } = &mut *guard;

        if let Some((last_offset, bytes)) = last_range {
            if *last_offset == offset && bytes.len() as u64 == length {
                debug!("Replaying the last read range at offset {}", offset);
                return Ok(Box::pin(Cursor::new(bytes.clone())));
            }
        }

        let resumable = pending
            .as_ref()
            .is_some_and(|read| read.offset == offset && read.buffer.len() as u64 <= length);
        if !resumable {
            if let Some(read) = pending.take() {
                debug!(
                    "Discarding {} bytes of an interrupted read at offset {}",
                    read.buffer.len(),
                    read.offset,
                );
            }
        }

        if pending.is_none() {
            if offset < *position {
                return Err(std::io::Error::new(
                    ErrorKind::InvalidInput,
                    format!(
                        "stream is at offset {} and can't go back to offset {}",
                        position, offset,
                    ),
                ));
            }

            let skip = offset - *position;
            if skip > 0 {
                // Parts that were already acknowledged in an earlier run are read and thrown away.
                debug!("Skipping {} bytes of the stream", skip);
                let mut scratch = vec![0; SKIP_CHUNK_SIZE];
                while *position < offset {
                    let want = (offset - *position).min(SKIP_CHUNK_SIZE as u64) as usize;
                    let read = reader.read(&mut scratch[..want]).await?;
                    if read == 0 {
                        return Err(ErrorKind::UnexpectedEof.into());
                    }
                    *position += read as u64;
                }
            }
        } else {
            debug!("Resuming an interrupted read at offset {}", offset);
        }

        let capacity = usize::try_from(length)
            .map_err(|err| std::io::Error::new(ErrorKind::InvalidInput, err))?;
        let read = pending.get_or_insert_with(|| PendingRead {
            offset,
            buffer: BytesMut::with_capacity(capacity),
        });
        while (read.buffer.len() as u64) < length {
            let remaining = length - read.buffer.len() as u64;
            let count = (&mut *reader).take(remaining).read_buf(&mut read.buffer).await?;
            if count == 0 {
                return Err(ErrorKind::UnexpectedEof.into());
            }
            *position += count as u64;
        }

        let bytes = std::mem::take(&mut read.buffer).freeze();
        *pending = None;
        *last_range = Some((offset, bytes.clone()));
        Ok(Box::pin(Cursor::new(bytes)))
    }
}

/// Writes parts into a local file, opening an independent handle for every write.
#[derive(Debug, Clone)]
pub struct FileDestination {
    path: PathBuf,
}

impl FileDestination {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Destination for FileDestination {
    async fn set_len(&self, size: u64) -> std::io::Result<()> {
        debug!("Sizing local file to be of object's size");
        tokio::fs::File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)
            .await?
            .set_len(size)
            .await
    }

    async fn write_at(&self, offset: u64, bytes: Bytes) -> std::io::Result<()> {
        let mut file = tokio::fs::File::options()
            .write(true)
            .open(&self.path)
            .await?;
        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&bytes).await?;
        file.flush().await
    }
}

/// Collects a download in memory.
#[derive(Debug, Clone, Default)]
pub struct BufferDestination {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl BufferDestination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .map(|buffer| buffer.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl Destination for BufferDestination {
    async fn set_len(&self, size: u64) -> std::io::Result<()> {
        let size = usize::try_from(size).map_err(|err| std::io::Error::new(ErrorKind::InvalidInput, err))?;
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::other("download buffer is poisoned"))?;
        buffer.resize(size, 0);
        Ok(())
    }

    async fn write_at(&self, offset: u64, bytes: Bytes) -> std::io::Result<()> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| std::io::Error::other("download buffer is poisoned"))?;
        let start = offset as usize;
        let end = start + bytes.len();
        if buffer.len() < end {
            buffer.resize(end, 0);
        }
        buffer[start..end].copy_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read_all(mut reader: PartReader) -> Vec<u8> {
        let mut buffer = vec![];
        reader.read_to_end(&mut buffer).await.unwrap();
        buffer
    }

    #[tokio::test]
    async fn file_source_reads_exact_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("object.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let source = FileSource::new(&path);
        assert_eq!(source.size().await.unwrap(), 10);
        let reader = source.open_range_reader(3, 4).await.unwrap();
        assert_eq!(read_all(reader).await, b"3456");
        let reader = source.open_range_reader(8, 2).await.unwrap();
        assert_eq!(read_all(reader).await, b"89");
    }

    #[tokio::test]
    async fn bytes_source_rejects_out_of_bounds_ranges() {
        let source = BytesSource::new(&b"abcdef"[..]);
        assert_eq!(read_all(source.open_range_reader(2, 3).await.unwrap()).await, b"cde");
        assert!(source.open_range_reader(4, 3).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_source_keeps_bytes_of_an_interrupted_read() {
        let (mut writer, reader) = tokio::io::duplex(64);
        let source = StreamSource::new(reader, 15);
        writer.write_all(b"01234").await.unwrap();

        let interrupted = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            source.open_range_reader(0, 10),
        )
        .await;
        assert!(interrupted.is_err());

        writer.write_all(b"56789abcde").await.unwrap();
        let retried = source.open_range_reader(0, 10).await.unwrap();
        assert_eq!(read_all(retried).await, b"0123456789");
        let next = source.open_range_reader(10, 5).await.unwrap();
        assert_eq!(read_all(next).await, b"abcde");
    }

    #[tokio::test]
    async fn stream_source_reads_forward_and_replays_last_range() {
        let source = StreamSource::new(Cursor::new(b"aaabbbccc".to_vec()), 9);
        assert!(!source.supports_concurrent_reads());

        assert_eq!(read_all(source.open_range_reader(0, 3).await.unwrap()).await, b"aaa");
        assert_eq!(read_all(source.open_range_reader(0, 3).await.unwrap()).await, b"aaa");
        // skipping ahead, as when resuming with part 2 already acknowledged
        assert_eq!(read_all(source.open_range_reader(6, 3).await.unwrap()).await, b"ccc");
        assert!(source.open_range_reader(3, 3).await.is_err());
    }

    #[tokio::test]
    async fn file_destination_writes_at_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("download.bin");

        let destination = FileDestination::new(&path);
        destination.set_len(6).await.unwrap();
        destination.write_at(3, Bytes::from_static(b"def")).await.unwrap();
        destination.write_at(0, Bytes::from_static(b"abc")).await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[tokio::test]
    async fn buffer_destination_writes_at_offsets() {
        let destination = BufferDestination::new();
        destination.set_len(4).await.unwrap();
        destination.write_at(2, Bytes::from_static(b"cd")).await.unwrap();
        destination.write_at(0, Bytes::from_static(b"ab")).await.unwrap();
        assert_eq!(destination.contents(), b"abcd");
    }
}
