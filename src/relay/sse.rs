//! Pull-based decoding of the agent's `data: ` framed response stream.

use bytes::Bytes;
use futures::stream::{ self, BoxStream };
use futures::{ Stream, StreamExt, TryStreamExt };
use log::debug;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{ Context, Poll };
use tokio::io::{ AsyncBufRead, AsyncBufReadExt };
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// Meaning of one line of the upstream body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    Skip,
    Done,
    Data(String),
}

/// Blank lines are skipped, `data: [DONE]` ends the stream, `data: ` is stripped,
/// and anything else passes through verbatim.
pub fn decode_sse_line(line: &str) -> SseLine {
    if line.trim().is_empty() {
        return SseLine::Skip;
    }
    match line.strip_prefix(DATA_PREFIX) {
        Some(data) if data.trim() == DONE_SENTINEL => SseLine::Done,
        Some(data) => SseLine::Data(data.to_string()),
        None => SseLine::Data(line.to_string()),
    }
}

enum Read {
    Cancelled,
    Line(io::Result<Option<String>>),
}

/// One line without its terminator. Invalid UTF-8 is replaced rather than rejected.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    if reader.read_until(b'\n', &mut buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

struct Decoder<R> {
    reader: Option<R>,
    cancel: CancellationToken,
}

impl<R: AsyncBufRead + Unpin> Decoder<R> {
    /// Dropping the reader releases the upstream body.
    fn close(&mut self) {
        self.reader = None;
    }

    async fn next_chunk(&mut self) -> Option<Result<String, RelayError>> {
        loop {
            let reader = self.reader.as_mut()?;
            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Read::Cancelled,
                line = read_line(reader) => Read::Line(line),
            };

            match read {
                Read::Cancelled => {
                    debug!("Stream cancelled by caller, releasing upstream body");
                    self.close();
                    return None;
                }
                Read::Line(Ok(Some(line))) =>
                    match decode_sse_line(&line) {
                        SseLine::Skip => {
                            continue;
                        }
                        SseLine::Done => {
                            debug!("Received end-of-stream marker");
                            self.close();
                            return None;
                        }
                        SseLine::Data(data) => {
                            return Some(Ok(data));
                        }
                    }
                Read::Line(Ok(None)) => {
                    self.close();
                    return None;
                }
                Read::Line(Err(e)) => {
                    self.close();
                    return Some(Err(RelayError::StreamRead(e)));
                }
            }
        }
    }
}

/// Lazy, single-pass sequence of decoded chunks. Ends on `[DONE]`, end of body,
/// cancellation, or right after yielding a read error.
pub struct ChunkStream {
    inner: BoxStream<'static, Result<String, RelayError>>,
}

impl ChunkStream {
    pub fn from_response(response: reqwest::Response, cancel: CancellationToken) -> Self {
        Self::from_bytes(response.bytes_stream().map_err(io::Error::other), cancel)
    }

    pub fn from_bytes<S>(bytes: S, cancel: CancellationToken) -> Self
        where S: Stream<Item = io::Result<Bytes>> + Send + 'static
    {
        let decoder = Decoder {
            reader: Some(StreamReader::new(Box::pin(bytes))),
            cancel,
        };
        let inner = stream
            ::unfold(decoder, |mut decoder| async move {
                let chunk = decoder.next_chunk().await?;
                Some((chunk, decoder))
            })
            .fuse()
            .boxed();
        Self { inner }
    }

    /// Already-decoded chunks, for clients that do not stream.
    pub fn from_chunks(chunks: Vec<String>) -> Self {
        Self { inner: stream::iter(chunks.into_iter().map(Ok)).boxed() }
    }
}

impl Stream for ChunkStream {
    type Item = Result<String, RelayError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

impl fmt::Debug for ChunkStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChunkStream")
    }
}
