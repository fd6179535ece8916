//! Byte-range reads over a blob handle
//!
//! [`ByteRange`] is what a client asked for, [`ResolvedRange`] is that
//! request checked against an object length, and [`RangeReader`] turns a
//! seekable handle into a lazy [`RangeStream`] of chunks plus the response
//! metadata a protocol adapter needs.

use crate::{CoreError, Result};
use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, ReadBuf};

/// Maximum size of a chunk yielded by [`RangeStream`]
pub const DEFAULT_READ_CHUNK: usize = 8 * 1024;

/// A single requested range, inclusive, with optional bounds
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ByteRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: Option<u64>, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Parse a `Range` header value of the form `bytes=<start>-<end>`.
    ///
    /// Either bound may be omitted; an omitted start means offset 0, so
    /// `bytes=-500` covers bytes 0 through 500. Multiple ranges are rejected.
    pub fn parse(header: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidRange { length: None };

        let (unit, spec) = header.trim().split_once('=').ok_or_else(invalid)?;
        if !unit.trim().eq_ignore_ascii_case("bytes") || spec.contains(',') {
            return Err(invalid());
        }

        let (start, end) = spec.split_once('-').ok_or_else(invalid)?;
        let bound = |s: &str| -> Result<Option<u64>> {
            let s = s.trim();
            if s.is_empty() {
                Ok(None)
            } else {
                s.parse().map(Some).map_err(|_| invalid())
            }
        };

        Ok(Self {
            start: bound(start)?,
            end: bound(end)?,
        })
    }

    /// Check this range against an object of `length` bytes
    pub fn resolve(&self, length: u64) -> Result<ResolvedRange> {
        let unsatisfiable = CoreError::InvalidRange {
            length: Some(length),
        };
        if length == 0 {
            return Err(unsatisfiable);
        }

        let start = self.start.unwrap_or(0);
        let end = self.end.map_or(length - 1, |end| end.min(length - 1));
        if start >= length || start > end {
            return Err(unsatisfiable);
        }

        Ok(ResolvedRange { start, end, length })
    }
}

/// A satisfiable range within an object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedRange {
    /// First byte, inclusive
    pub start: u64,
    /// Last byte, inclusive
    pub end: u64,
    /// Total object length
    pub length: u64,
}

impl ResolvedRange {
    /// Number of bytes covered
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `Content-Range` header value
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, self.length)
    }
}

/// Whether a read returns the whole object or a slice of it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RangeStatus {
    /// Full content (200)
    Complete,
    /// Requested slice (206)
    Partial,
}

impl RangeStatus {
    /// HTTP status code for this outcome
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Complete => 200,
            Self::Partial => 206,
        }
    }
}

/// Prepared read of a blob, possibly restricted to a range
pub struct RangeReader<R> {
    stream: RangeStream<R>,
    status: RangeStatus,
    total_length: u64,
    range: Option<ResolvedRange>,
}

impl<R> std::fmt::Debug for RangeReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeReader")
            .field("status", &self.status)
            .field("total_length", &self.total_length)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

impl<R> RangeReader<R>
where
    R: AsyncRead + AsyncSeek + Unpin,
{
    /// Position `handle` for the requested range.
    ///
    /// Fails with `InvalidRange` (carrying `total_length`) when the range
    /// cannot be satisfied. No bytes are read until the stream is polled.
    pub async fn new(mut handle: R, total_length: u64, requested: Option<ByteRange>) -> Result<Self> {
        let Some(requested) = requested else {
            return Ok(Self {
                stream: RangeStream::new(handle, total_length),
                status: RangeStatus::Complete,
                total_length,
                range: None,
            });
        };

        let range = requested.resolve(total_length)?;
        if range.start > 0 {
            handle.seek(SeekFrom::Start(range.start)).await?;
        }

        Ok(Self {
            stream: RangeStream::new(handle, range.content_length()),
            status: RangeStatus::Partial,
            total_length,
            range: Some(range),
        })
    }
}

impl<R> RangeReader<R> {
    /// Use chunks of at most `chunk_size` bytes
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.stream.chunk_size = chunk_size.max(1);
        self
    }

    pub fn status(&self) -> RangeStatus {
        self.status
    }

    /// Bytes the stream will yield
    pub fn content_length(&self) -> u64 {
        self.range.map_or(self.total_length, |range| range.content_length())
    }

    /// Size of the whole object
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// The satisfied range, for partial reads
    pub fn range(&self) -> Option<ResolvedRange> {
        self.range
    }

    /// `Content-Range` header value, for partial reads
    pub fn content_range(&self) -> Option<String> {
        self.range.map(|range| range.content_range())
    }

    /// `Accept-Ranges` header value
    pub fn accept_ranges(&self) -> &'static str {
        "bytes"
    }

    /// Take the chunk stream
    pub fn into_stream(self) -> RangeStream<R> {
        self.stream
    }
}

pin_project! {
    /// Lazy, finite stream of chunks read from a blob handle.
    ///
    /// The handle is dropped as soon as the stream is exhausted or fails,
    /// and with the stream itself if the consumer goes away early.
    pub struct RangeStream<R> {
        #[pin]
        handle: Option<R>,
        remaining: u64,
        chunk_size: usize,
        buf: Vec<u8>,
    }
}

impl<R> RangeStream<R> {
    fn new(handle: R, remaining: u64) -> Self {
        Self {
            handle: Some(handle),
            remaining,
            chunk_size: DEFAULT_READ_CHUNK,
            buf: Vec::new(),
        }
    }

    /// Bytes not yet yielded
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Whether the underlying handle has been released
    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }
}

impl<R: AsyncRead> Stream for RangeStream<R> {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        if *this.remaining == 0 {
            this.handle.set(None);
            return Poll::Ready(None);
        }

        let want = (*this.remaining).min(*this.chunk_size as u64) as usize;
        if this.buf.len() < want {
            this.buf.resize(want, 0);
        }

        let read = {
            let Some(handle) = this.handle.as_mut().as_pin_mut() else {
                return Poll::Ready(None);
            };
            let mut read_buf = ReadBuf::new(&mut this.buf[..want]);
            match handle.poll_read(cx, &mut read_buf) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(result) => result.map(|()| read_buf.filled().len()),
            }
        };

        match read {
            Ok(0) => {
                this.handle.set(None);
                Poll::Ready(Some(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("blob ended with {} bytes still expected", this.remaining),
                ))))
            }
            Ok(n) => {
                *this.remaining -= n as u64;
                let chunk = Bytes::copy_from_slice(&this.buf[..n]);
                if *this.remaining == 0 {
                    this.handle.set(None);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Err(err) => {
                this.handle.set(None);
                Poll::Ready(Some(Err(err)))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.handle.is_none() || self.remaining == 0 {
            return (0, Some(0));
        }
        let chunks = self.remaining.div_ceil(self.chunk_size as u64) as usize;
        (0, Some(chunks))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use rstest::rstest;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Cursor that flags when it is dropped and can fail after some bytes
    struct TrackedHandle {
        inner: Cursor<Vec<u8>>,
        dropped: Arc<AtomicBool>,
        fail_at: Option<u64>,
    }

    impl TrackedHandle {
        fn new(data: &[u8]) -> (Self, Arc<AtomicBool>) {
            let dropped = Arc::new(AtomicBool::new(false));
            (
                Self {
                    inner: Cursor::new(data.to_vec()),
                    dropped: Arc::clone(&dropped),
                    fail_at: None,
                },
                dropped,
            )
        }
    }

    impl Drop for TrackedHandle {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    impl AsyncRead for TrackedHandle {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if let Some(at) = self.fail_at {
                if self.inner.position() >= at {
                    return Poll::Ready(Err(io::Error::other("disk gone")));
                }
            }
            Pin::new(&mut self.inner).poll_read(cx, buf)
        }
    }

    impl AsyncSeek for TrackedHandle {
        fn start_seek(mut self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
            Pin::new(&mut self.inner).start_seek(position)
        }

        fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
            Pin::new(&mut self.inner).poll_complete(cx)
        }
    }

    async fn collect<R: AsyncRead>(stream: RangeStream<R>) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut stream = Box::pin(stream);
        while let Some(chunk) = stream.next().await {
            out.extend_from_slice(&chunk?);
        }
        Ok(out)
    }

    #[rstest]
    #[case("bytes=1-3", Some(1), Some(3))]
    #[case("bytes=1-", Some(1), None)]
    #[case("bytes=-3", None, Some(3))]
    #[case("bytes=-", None, None)]
    #[case("  Bytes = 10 - 20 ", Some(10), Some(20))]
    #[case("BYTES=0-0", Some(0), Some(0))]
    fn test_parse_valid(#[case] header: &str, #[case] start: Option<u64>, #[case] end: Option<u64>) {
        assert_eq!(ByteRange::parse(header).unwrap(), ByteRange::new(start, end));
    }

    #[rstest]
    #[case("bytes=1-2,4-5")]
    #[case("items=1-2")]
    #[case("bytes 1-2")]
    #[case("bytes=a-b")]
    #[case("bytes=12")]
    #[case("bytes=-1-2")]
    #[case("")]
    fn test_parse_invalid(#[case] header: &str) {
        assert!(matches!(
            ByteRange::parse(header),
            Err(CoreError::InvalidRange { length: None })
        ));
    }

    #[rstest]
    #[case(ByteRange::new(Some(1), Some(3)), 1, 3)]
    #[case(ByteRange::new(Some(2), None), 2, 4)]
    #[case(ByteRange::new(None, Some(2)), 0, 2)]
    #[case(ByteRange::new(Some(3), Some(100)), 3, 4)]
    #[case(ByteRange::new(Some(4), Some(4)), 4, 4)]
    fn test_resolve(#[case] range: ByteRange, #[case] start: u64, #[case] end: u64) {
        let resolved = range.resolve(5).unwrap();
        assert_eq!((resolved.start, resolved.end), (start, end));
        assert_eq!(resolved.content_length(), end - start + 1);
    }

    #[rstest]
    #[case(ByteRange::new(Some(5), None), 5)]
    #[case(ByteRange::new(Some(3), Some(1)), 5)]
    #[case(ByteRange::new(Some(0), Some(0)), 0)]
    fn test_resolve_unsatisfiable(#[case] range: ByteRange, #[case] length: u64) {
        let err = range.resolve(length).unwrap_err();
        assert!(matches!(err, CoreError::InvalidRange { length: Some(l) } if l == length));
    }

    #[tokio::test]
    async fn test_full_read() {
        let (handle, dropped) = TrackedHandle::new(b"hello");
        let reader = RangeReader::new(handle, 5, None).await.unwrap();

        assert_eq!(reader.status(), RangeStatus::Complete);
        assert_eq!(reader.status().http_status(), 200);
        assert_eq!(reader.content_length(), 5);
        assert_eq!(reader.content_range(), None);
        assert_eq!(reader.accept_ranges(), "bytes");

        assert_eq!(collect(reader.into_stream()).await.unwrap(), b"hello");
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_partial_read() {
        let (handle, _) = TrackedHandle::new(b"hello");
        let reader = RangeReader::new(handle, 5, Some(ByteRange::parse("bytes=1-3").unwrap()))
            .await
            .unwrap();

        assert_eq!(reader.status(), RangeStatus::Partial);
        assert_eq!(reader.content_length(), 3);
        assert_eq!(reader.content_range().as_deref(), Some("bytes 1-3/5"));
        assert_eq!(collect(reader.into_stream()).await.unwrap(), b"ell");
    }

    #[tokio::test]
    async fn test_unsatisfiable_reports_length() {
        let (handle, _) = TrackedHandle::new(b"hello");
        let err = RangeReader::new(handle, 5, Some(ByteRange::new(Some(9), None)))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRange { length: Some(5) }));
    }

    #[tokio::test]
    async fn test_chunks_are_bounded() {
        let data: Vec<u8> = (0..20_000u32).map(|i| (i % 251) as u8).collect();
        let (handle, dropped) = TrackedHandle::new(&data);
        let stream = RangeReader::new(handle, data.len() as u64, None)
            .await
            .unwrap()
            .into_stream();

        let chunks: Vec<Bytes> = stream.map(|chunk| chunk.unwrap()).collect().await;
        assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= DEFAULT_READ_CHUNK));
        assert_eq!(chunks.concat(), data);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_handle_released_on_exhaustion_before_drop() {
        let (handle, dropped) = TrackedHandle::new(b"abc");
        let mut stream = Box::pin(RangeReader::new(handle, 3, None).await.unwrap().into_stream());

        assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"abc");
        assert!(stream.is_released());
        assert!(dropped.load(Ordering::SeqCst));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_handle_released_on_error() {
        let (mut handle, dropped) = TrackedHandle::new(&[7u8; 100]);
        handle.fail_at = Some(10);
        let mut stream = Box::pin(
            RangeReader::new(handle, 100, None)
                .await
                .unwrap()
                .with_chunk_size(10)
                .into_stream(),
        );

        assert_eq!(stream.next().await.unwrap().unwrap().len(), 10);
        assert!(stream.next().await.unwrap().is_err());
        assert!(dropped.load(Ordering::SeqCst));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_handle_released_on_cancel() {
        let (handle, dropped) = TrackedHandle::new(&[1u8; 64]);
        let mut stream = Box::pin(
            RangeReader::new(handle, 64, None)
                .await
                .unwrap()
                .with_chunk_size(16)
                .into_stream(),
        );

        stream.next().await.unwrap().unwrap();
        assert!(!dropped.load(Ordering::SeqCst));
        drop(stream);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_short_blob_is_an_error() {
        let (handle, _) = TrackedHandle::new(b"abc");
        let result = collect(RangeReader::new(handle, 10, None).await.unwrap().into_stream()).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::UnexpectedEof);
    }

    proptest::proptest! {
        #[test]
        fn prop_range_matches_slice(
            data in proptest::collection::vec(proptest::prelude::any::<u8>(), 1..4096),
            start in 0u64..5000,
            span in 0u64..5000,
            chunk in 1usize..1024,
        ) {
            let length = data.len() as u64;
            let requested = ByteRange::new(Some(start), Some(start + span));
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();

            let result = rt.block_on(async {
                let reader = RangeReader::new(Cursor::new(data.clone()), length, Some(requested)).await?;
                let stream = reader.with_chunk_size(chunk).into_stream();
                Ok::<_, CoreError>(collect(stream).await?)
            });

            if start >= length {
                let is_invalid = matches!(result, Err(CoreError::InvalidRange { .. }));
                proptest::prop_assert!(is_invalid);
            } else {
                let end = (start + span).min(length - 1) as usize;
                proptest::prop_assert_eq!(result.unwrap(), data[start as usize..=end].to_vec());
            }
        }
    }
}
