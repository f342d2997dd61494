//! Streamed chat completions.
//!
//! The API delivers chunks as server-sent events: `data: <json>` lines
//! separated by blank lines, terminated by `data: [DONE]`.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};

use crate::error::Error;
use crate::types::ChunkBody;

/// A finite stream of text chunks from one completion call.
///
/// Yields each non-empty `delta.content` in arrival order. The stream is
/// not restartable; dropping it aborts the underlying request.
pub struct ChatStream {
    inner: Pin<Box<dyn Stream<Item = Result<String, Error>> + Send>>,
}

impl ChatStream {
    pub(crate) fn from_response(response: reqwest::Response) -> Self {
        let bytes = response.bytes_stream();
        let inner = futures::stream::unfold(SseState::new(bytes), |mut state| async move {
            loop {
                // Drain any chunks already decoded from the buffer.
                if let Some(text) = state.pending.pop() {
                    return Some((Ok(text), state));
                }
                if state.done {
                    return None;
                }
                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        if let Err(e) = state.feed(&chunk) {
                            state.done = true;
                            return Some((Err(e), state));
                        }
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(Error::Http(e)), state));
                    }
                    None => {
                        state.done = true;
                    }
                }
            }
        });
        Self {
            inner: Box::pin(inner),
        }
    }

    /// Collect the remaining chunks into the full response text.
    pub async fn collect_text(mut self) -> Result<String, Error> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }
}

impl Stream for ChatStream {
    type Item = Result<String, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

type BytesStream = Pin<Box<dyn Stream<Item = reqwest::Result<bytes::Bytes>> + Send>>;

/// Incremental SSE decoder state.
struct SseState {
    bytes: BytesStream,
    buffer: String,
    /// Decoded chunks not yet yielded, in reverse order (popped from the end).
    pending: Vec<String>,
    done: bool,
}

impl SseState {
    fn new(bytes: impl Stream<Item = reqwest::Result<bytes::Bytes>> + Send + 'static) -> Self {
        Self {
            bytes: Box::pin(bytes),
            buffer: String::new(),
            pending: Vec::new(),
            done: false,
        }
    }

    /// Append raw bytes and decode every complete SSE frame in the buffer.
    fn feed(&mut self, chunk: &[u8]) -> Result<(), Error> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut decoded = Vec::new();
        while let Some(pos) = self.buffer.find("\n\n") {
            let frame: String = self.buffer.drain(..pos + 2).collect();
            for line in frame.lines() {
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload == "[DONE]" {
                    self.done = true;
                    break;
                }
                let body: ChunkBody = serde_json::from_str(payload)
                    .map_err(|e| Error::Stream(format!("{e}: {payload}")))?;
                if let Some(text) = body.choices.first().and_then(|c| c.delta.content.clone()) {
                    if !text.is_empty() {
                        decoded.push(text);
                    }
                }
            }
            if self.done {
                break;
            }
        }

        // pending is popped from the end, so store in reverse arrival order
        decoded.reverse();
        let mut rest = std::mem::take(&mut self.pending);
        self.pending = decoded;
        self.pending.append(&mut rest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(state: &mut SseState, input: &str) -> Vec<String> {
        state.feed(input.as_bytes()).unwrap();
        let mut out = Vec::new();
        while let Some(text) = state.pending.pop() {
            out.push(text);
        }
        out
    }

    fn empty_state() -> SseState {
        SseState::new(futures::stream::empty())
    }

    #[test]
    fn test_decode_single_frame() {
        let mut state = empty_state();
        let out = feed_all(
            &mut state,
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\n",
        );
        assert_eq!(out, vec!["Hello"]);
    }

    #[test]
    fn test_decode_multiple_frames_in_order() {
        let mut state = empty_state();
        let out = feed_all(
            &mut state,
            "data: {\"choices\":[{\"delta\":{\"content\":\"A\"}}]}\n\n\
             data: {\"choices\":[{\"delta\":{\"content\":\"B\"}}]}\n\n",
        );
        assert_eq!(out, vec!["A", "B"]);
    }

    #[test]
    fn test_decode_split_across_feeds() {
        let mut state = empty_state();
        state
            .feed(b"data: {\"choices\":[{\"delta\":{\"con")
            .unwrap();
        assert!(state.pending.is_empty());
        state.feed(b"tent\":\"partial\"}}]}\n\n").unwrap();
        assert_eq!(state.pending.pop().unwrap(), "partial");
    }

    #[test]
    fn test_done_marker_stops_decoding() {
        let mut state = empty_state();
        let out = feed_all(
            &mut state,
            "data: {\"choices\":[{\"delta\":{\"content\":\"end\"}}]}\n\ndata: [DONE]\n\n",
        );
        assert_eq!(out, vec!["end"]);
        assert!(state.done);
    }

    #[test]
    fn test_empty_delta_skipped() {
        let mut state = empty_state();
        let out = feed_all(&mut state, "data: {\"choices\":[{\"delta\":{}}]}\n\n");
        assert!(out.is_empty());
    }

    #[test]
    fn test_malformed_payload_is_error() {
        let mut state = empty_state();
        let result = state.feed(b"data: {not json}\n\n");
        assert!(matches!(result, Err(Error::Stream(_))));
    }

    #[tokio::test]
    async fn test_collect_text_over_stream() {
        // Exercise ChatStream over an in-memory byte stream.
        let frames: Vec<reqwest::Result<bytes::Bytes>> = vec![
            Ok(bytes::Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"one \"}}]}\n\n",
            )),
            Ok(bytes::Bytes::from_static(
                b"data: {\"choices\":[{\"delta\":{\"content\":\"two\"}}]}\n\ndata: [DONE]\n\n",
            )),
        ];
        let inner = futures::stream::unfold(
            SseState::new(futures::stream::iter(frames)),
            |mut state| async move {
                loop {
                    if let Some(text) = state.pending.pop() {
                        return Some((Ok(text), state));
                    }
                    if state.done {
                        return None;
                    }
                    match state.bytes.next().await {
                        Some(Ok(chunk)) => {
                            if let Err(e) = state.feed(&chunk) {
                                state.done = true;
                                return Some((Err(e), state));
                            }
                        }
                        Some(Err(e)) => {
                            state.done = true;
                            return Some((Err(Error::Http(e)), state));
                        }
                        None => state.done = true,
                    }
                }
            },
        );
        let stream = ChatStream {
            inner: Box::pin(inner),
        };
        assert_eq!(stream.collect_text().await.unwrap(), "one two");
    }
}
