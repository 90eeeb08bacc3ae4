//! # SSE decoding
//!
//! Chat completion streams arrive as Server-Sent Events. [`SseDecoder`]
//! buffers raw bytes, splits complete lines, and yields the `data:` payloads
//! plus the `[DONE]` terminator. Comments and empty data lines are dropped.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio_stream::StreamExt;
use tracing::warn;

use crate::provider::{ProviderError, ProviderResult};

/// One decoded SSE item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SseData {
    /// A `data:` payload.
    Data(String),
    /// The `data: [DONE]` terminator.
    Done,
}

/// Incremental line decoder. Pure: no I/O, fed chunk by chunk.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
}

impl SseDecoder {
    /// Empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every complete item it finished.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseData> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(pos + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            // Invalid UTF-8 lines are skipped.
            if let Ok(text) = std::str::from_utf8(&line) {
                if let Some(data) = extract_data(text) {
                    out.push(data);
                }
            }
        }
        out
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<SseData> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = self.buffer.split();
        std::str::from_utf8(&rest).ok().and_then(extract_data)
    }
}

/// Turn a byte stream into a stream of SSE items.
///
/// A transport error is yielded as an `Err` item and ends the stream.
pub fn data_stream<S>(bytes: S) -> impl Stream<Item = ProviderResult<SseData>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    futures::stream::unfold(
        (bytes, SseDecoder::new(), std::collections::VecDeque::new(), false),
        |(mut bytes, mut decoder, mut pending, mut ended)| async move {
            loop {
                if let Some(item) = pending.pop_front() {
                    return Some((item, (bytes, decoder, pending, ended)));
                }
                if ended {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(&chunk).into_iter().map(Ok)),
                    Some(Err(e)) => {
                        warn!(error = %e, "SSE stream read error");
                        pending.push_back(Err(ProviderError::Http(e)));
                        ended = true;
                    }
                    None => {
                        pending.extend(decoder.finish().map(Ok));
                        ended = true;
                    }
                }
            }
        },
    )
}

/// Decode a `data:` line.
///
/// Returns `None` for comments, blank lines, and non-data fields.
fn extract_data(line: &str) -> Option<SseData> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with(':') {
        return None;
    }
    let data = trimmed
        .strip_prefix("data:")
        .map(str::trim)
        .filter(|d| !d.is_empty())?;
    if data == "[DONE]" {
        return Some(SseData::Done);
    }
    Some(SseData::Data(data.to_owned()))
}
