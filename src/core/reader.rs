/*!
 * Chunked byte-range reader over a remote object
 *
 * The remote source only serves chunk-aligned requests of a fixed size. The
 * reader aligns the first request down to a chunk boundary, trims the first
 * and last chunk to the requested range, and exposes the result as a
 * sequential byte stream with throttled progress callbacks.
 */

use crate::core::progress::{ProgressCallback, ProgressThrottle};
use crate::core::retry::fetch_with_retry;
use crate::error::{CourierError, Result};
use bytes::Bytes;
use courier_core_interface::{FileLocation, InterfaceError, RemoteFile, RemoteSource};
use courier_core_resilience::RetryPolicy;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Size of one remote chunk request
pub const CHUNK_SIZE: u64 = 1024 * 1024;

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Generator of trimmed chunks covering `[start, end]`
#[derive(Debug, Clone)]
struct PartStream {
    offset: u64,
    first_cut: usize,
    last_cut: usize,
    part_count: u64,
    current_part: u64,
}

impl PartStream {
    fn new(start: u64, end: u64, chunk_size: u64) -> Self {
        let offset = start - (start % chunk_size);

        Self {
            offset,
            first_cut: (start - offset) as usize,
            last_cut: ((end % chunk_size) + 1) as usize,
            part_count: (end - offset + chunk_size) / chunk_size,
            current_part: 1,
        }
    }

    /// Chunk-aligned offset of the next fetch, or `None` once every part is out
    fn pending_offset(&self) -> Option<u64> {
        (self.current_part <= self.part_count).then_some(self.offset)
    }

    /// Trim a fetched chunk to the range and advance; empty chunks do not advance
    fn take(&mut self, chunk: Bytes, chunk_size: u64) -> Bytes {
        if chunk.is_empty() {
            return chunk;
        }

        let len = chunk.len();
        let part = if self.part_count == 1 {
            let hi = self.last_cut.min(len);
            chunk.slice(self.first_cut.min(hi)..hi)
        } else if self.current_part == 1 {
            chunk.slice(self.first_cut.min(len)..)
        } else if self.current_part == self.part_count {
            chunk.slice(..self.last_cut.min(len))
        } else {
            chunk
        };

        self.current_part += 1;
        self.offset += chunk_size;
        part
    }
}

/// Sequential reader over `[start, end]` of a remote object
pub struct ChunkedRangeReader {
    source: Arc<dyn RemoteSource>,
    location: FileLocation,
    start: u64,
    end: u64,
    content_length: u64,
    chunk_size: u64,
    parts: PartStream,
    buffer: Bytes,
    cursor: usize,
    bytes_read: u64,
    progress: Option<(ProgressThrottle, ProgressCallback)>,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl ChunkedRangeReader {
    /// Reader over the inclusive range `[start, end]`
    ///
    /// `content_length` is the number of bytes the caller expects, normally
    /// `end - start + 1`.
    pub fn new(
        source: Arc<dyn RemoteSource>,
        location: FileLocation,
        start: u64,
        end: u64,
        content_length: u64,
    ) -> Self {
        Self {
            source,
            location,
            start,
            end,
            content_length,
            chunk_size: CHUNK_SIZE,
            parts: PartStream::new(start, end, CHUNK_SIZE),
            buffer: Bytes::new(),
            cursor: 0,
            bytes_read: 0,
            progress: None,
            policy: RetryPolicy::none(),
            cancel: CancellationToken::new(),
        }
    }

    /// Reader over the whole of `file`
    pub fn whole(source: Arc<dyn RemoteSource>, file: &RemoteFile) -> Self {
        Self::new(
            source,
            file.location.clone(),
            0,
            file.size.saturating_sub(1),
            file.size,
        )
    }

    /// Override the chunk size (must be non-zero)
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.parts = PartStream::new(self.start, self.end, self.chunk_size);
        self
    }

    /// Report cumulative progress every `interval` bytes and on the final byte
    pub fn with_progress(mut self, interval: u64, callback: ProgressCallback) -> Self {
        self.progress = Some((ProgressThrottle::new(interval, self.content_length), callback));
        self
    }

    /// Retry each failed chunk fetch up to `policy`
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Abort pending chunk fetches when `token` fires
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Read up to `buf.len()` bytes; `Ok(0)` marks the end of the range
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.bytes_read >= self.content_length || buf.is_empty() {
            return Ok(0);
        }

        if self.cursor >= self.buffer.len() {
            self.buffer = self.fetch_next().await?;
            if self.buffer.is_empty() {
                // Restart from the original range start, not the current position.
                debug!(
                    location = %self.location,
                    bytes_read = self.bytes_read,
                    "empty chunk before end of range, restarting part stream"
                );
                self.parts = PartStream::new(self.start, self.end, self.chunk_size);
                self.buffer = self.fetch_next().await?;
                if self.buffer.is_empty() {
                    warn!(location = %self.location, "source returned no data after restart");
                    return Err(CourierError::ShortRead {
                        expected: self.content_length,
                        actual: self.bytes_read,
                    });
                }
            }
            self.cursor = 0;
        }

        let mut n = (self.buffer.len() - self.cursor)
            .min(buf.len())
            .min((self.content_length - self.bytes_read) as usize);
        if let Some((throttle, _)) = &self.progress {
            let until_next = throttle.until_next(self.bytes_read);
            if until_next > 0 {
                n = n.min(until_next as usize);
            }
        }

        buf[..n].copy_from_slice(&self.buffer[self.cursor..self.cursor + n]);
        self.cursor += n;
        self.bytes_read += n as u64;

        if let Some((throttle, callback)) = &mut self.progress {
            if throttle.observe(self.bytes_read) {
                callback(self.bytes_read, self.content_length);
            }
        }

        Ok(n)
    }

    /// Stream the remaining range into `writer`, returning the bytes written
    pub async fn copy_to<W>(&mut self, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut written = 0u64;

        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .await
                .map_err(|e| CourierError::Interface(InterfaceError::Io(e)))?;
            written += n as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| CourierError::Interface(InterfaceError::Io(e)))?;
        Ok(written)
    }

    async fn fetch_next(&mut self) -> Result<Bytes> {
        let Some(offset) = self.parts.pending_offset() else {
            return Ok(Bytes::new());
        };

        let source = self.source.as_ref();
        let location = &self.location;
        let chunk_size = self.chunk_size;
        let chunk = fetch_with_retry(&self.policy, &self.cancel, || {
            source.fetch_chunk(location, offset, chunk_size)
        })
        .await?;
        Ok(self.parts.take(chunk, chunk_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::mock::MemorySource;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn read_all(reader: &mut ChunkedRangeReader) -> Result<Vec<u8>> {
        let mut out: Vec<u8> = Vec::new();
        reader.copy_to(&mut out).await?;
        Ok(out)
    }

    #[test]
    fn test_part_stream_layout() {
        let parts = PartStream::new(5, 25, 10);
        assert_eq!(parts.offset, 0);
        assert_eq!(parts.first_cut, 5);
        assert_eq!(parts.last_cut, 6);
        assert_eq!(parts.part_count, 3);

        let parts = PartStream::new(12, 17, 10);
        assert_eq!(parts.offset, 10);
        assert_eq!(parts.first_cut, 2);
        assert_eq!(parts.last_cut, 8);
        assert_eq!(parts.part_count, 1);
    }

    #[tokio::test]
    async fn test_sub_range_within_one_chunk() {
        let data = pattern(100);
        let source = Arc::new(MemorySource::new());
        source.insert("doc", data.clone());

        let mut reader =
            ChunkedRangeReader::new(source, FileLocation::new("doc"), 12, 17, 6).with_chunk_size(10);
        assert_eq!(read_all(&mut reader).await.unwrap(), data[12..=17].to_vec());
    }

    #[tokio::test]
    async fn test_sub_range_across_chunks() {
        let data = pattern(100);
        let source = Arc::new(MemorySource::new());
        source.insert("doc", data.clone());

        let mut reader =
            ChunkedRangeReader::new(source, FileLocation::new("doc"), 5, 25, 21).with_chunk_size(10);
        assert_eq!(read_all(&mut reader).await.unwrap(), data[5..=25].to_vec());
        assert_eq!(reader.bytes_read(), 21);
    }

    #[tokio::test]
    async fn test_fetches_are_chunk_aligned() {
        let source = Arc::new(MemorySource::new());
        source.insert("doc", pattern(100));

        let mut reader = ChunkedRangeReader::new(source.clone(), FileLocation::new("doc"), 0, 99, 100)
            .with_chunk_size(32);
        read_all(&mut reader).await.unwrap();

        let offsets: Vec<u64> = source.fetch_log().iter().map(|(offset, _)| *offset).collect();
        assert_eq!(offsets, vec![0, 32, 64, 96]);
        assert!(source.fetch_log().iter().all(|(_, limit)| *limit == 32));
    }

    #[tokio::test]
    async fn test_fetch_error_without_retry_propagates() {
        let source = Arc::new(MemorySource::new());
        source.insert("doc", pattern(100));
        source.fail_next(1);

        let mut reader =
            ChunkedRangeReader::new(source, FileLocation::new("doc"), 0, 99, 100).with_chunk_size(10);
        let err = read_all(&mut reader).await.unwrap_err();
        assert!(matches!(err, CourierError::Fetch(_)));
    }

    #[tokio::test]
    async fn test_failed_fetch_is_retried_at_same_offset() {
        let data = pattern(30);
        let source = Arc::new(MemorySource::new());
        source.insert("doc", data.clone());

        let mut reader = ChunkedRangeReader::new(source.clone(), FileLocation::new("doc"), 0, 29, 30)
            .with_chunk_size(10)
            .with_retry_policy(RetryPolicy::new(2));
        let mut buf = [0u8; 10];
        assert_eq!(reader.read(&mut buf).await.unwrap(), 10);

        source.fail_next(2);
        let rest = read_all(&mut reader).await.unwrap();

        assert_eq!(rest, data[10..].to_vec());
        let offsets: Vec<u64> = source.fetch_log().iter().map(|(offset, _)| *offset).collect();
        assert_eq!(offsets, vec![0, 10, 10, 10, 20]);
    }

    #[tokio::test]
    async fn test_fetch_retries_are_bounded() {
        let source = Arc::new(MemorySource::new());
        source.insert("doc", pattern(30));
        source.fail_next(3);

        let mut reader = ChunkedRangeReader::new(source.clone(), FileLocation::new("doc"), 0, 29, 30)
            .with_chunk_size(10)
            .with_retry_policy(RetryPolicy::new(2));
        let err = read_all(&mut reader).await.unwrap_err();

        assert!(err.to_string().contains("chunk fetch at 0 failed"), "{}", err);
        assert_eq!(source.fetch_log().len(), 3);
    }

    #[tokio::test]
    async fn test_persistent_empty_chunk_is_short_read() {
        let source = Arc::new(MemorySource::new());
        source.insert("doc", Vec::<u8>::new());

        let mut reader =
            ChunkedRangeReader::new(source, FileLocation::new("doc"), 0, 29, 30).with_chunk_size(10);
        let err = read_all(&mut reader).await.unwrap_err();
        assert!(matches!(
            err,
            CourierError::ShortRead {
                expected: 30,
                actual: 0
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_aborts_fetch() {
        let source = Arc::new(MemorySource::new().with_delay(std::time::Duration::from_secs(5)));
        source.insert("doc", pattern(10));
        let token = CancellationToken::new();
        token.cancel();

        let mut reader = ChunkedRangeReader::new(source, FileLocation::new("doc"), 0, 9, 10)
            .with_cancel(token);
        let err = read_all(&mut reader).await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn test_progress_lands_on_interval_multiples() {
        let source = Arc::new(MemorySource::new());
        source.insert("doc", pattern(1000));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let recorder = seen.clone();
        let mut reader = ChunkedRangeReader::new(source, FileLocation::new("doc"), 0, 999, 1000)
            .with_chunk_size(64)
            .with_progress(
                300,
                Box::new(move |read, total| recorder.lock().unwrap().push((read, total))),
            );
        read_all(&mut reader).await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec![(300, 1000), (600, 1000), (900, 1000), (1000, 1000)]);
    }
}
