//! Server-sent-event decoding for streamed chat completions.
//!
//! The upstream body arrives as arbitrary byte chunks. `SseDecoder` reassembles
//! lines, and `fragments_from_sse` turns them into a lazy stream of non-empty
//! `delta.content` fragments, in arrival order. The stream ends at
//! `data: [DONE]` or at end of body, whichever comes first.
//!
//! Dropping the returned stream drops the upstream body, which closes the
//! outbound connection.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tracing::debug;

use super::{ApiErrorBody, LlmError};

/// A lazy, finite, non-restartable sequence of text fragments.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SseEvent {
    Fragment(String),
    Done,
}

#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

/// Incremental line decoder. Bytes of a multi-byte character may be split
/// across chunks, so lines are only decoded once complete.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<Result<SseEvent, LlmError>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes whatever is left once the body has ended without a newline.
    pub(crate) fn finish(&mut self) -> Vec<Result<SseEvent, LlmError>> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest).into_iter().collect()
    }
}

fn decode_line(line: &[u8]) -> Option<Result<SseEvent, LlmError>> {
    let line = match std::str::from_utf8(line) {
        Ok(line) => line.trim(),
        Err(e) => {
            return Some(Err(LlmError::Stream(format!(
                "invalid UTF-8 in event stream: {e}"
            ))))
        }
    };

    // Blank separators, comments (`: keep-alive`), `event:` and `id:` lines carry no text.
    let data = line.strip_prefix("data:")?.trim_start();
    if data == "[DONE]" {
        return Some(Ok(SseEvent::Done));
    }

    let chunk: ChatChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => return Some(Err(LlmError::Parse(e))),
    };
    if let Some(error) = chunk.error {
        return Some(Err(LlmError::Stream(error.message)));
    }

    let fragment: String = chunk
        .choices
        .into_iter()
        .filter_map(|c| c.delta.content)
        .collect();
    if fragment.is_empty() {
        None
    } else {
        Some(Ok(SseEvent::Fragment(fragment)))
    }
}

struct SseState<S> {
    body: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String, LlmError>>,
    upstream_done: bool,
    idle_timeout: Duration,
    forwarded: usize,
}

impl<S> SseState<S> {
    fn absorb(&mut self, events: Vec<Result<SseEvent, LlmError>>) {
        for event in events {
            match event {
                Ok(SseEvent::Fragment(fragment)) => self.pending.push_back(Ok(fragment)),
                Ok(SseEvent::Done) => {
                    self.upstream_done = true;
                    return;
                }
                Err(e) => {
                    self.pending.push_back(Err(e));
                    self.upstream_done = true;
                    return;
                }
            }
        }
    }
}

impl<S> Drop for SseState<S> {
    fn drop(&mut self) {
        if !self.upstream_done || !self.pending.is_empty() {
            debug!(
                "Completion stream closed by consumer after {} fragments; dropping upstream",
                self.forwarded
            );
        }
    }
}

/// Adapts a raw SSE byte stream into a [`FragmentStream`].
///
/// Each wait for the next upstream chunk is bounded by `idle_timeout`; expiry
/// yields `LlmError::Timeout` and ends the stream. After any error the stream ends.
pub fn fragments_from_sse<S, E>(body: S, idle_timeout: Duration) -> FragmentStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<LlmError> + Send + 'static,
{
    let state = SseState {
        body: Box::pin(body),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        upstream_done: false,
        idle_timeout,
        forwarded: 0,
    };

    let fragments = stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                if item.is_ok() {
                    st.forwarded += 1;
                } else {
                    st.pending.clear();
                }
                return Some((item, st));
            }
            if st.upstream_done {
                return None;
            }

            match tokio::time::timeout(st.idle_timeout, st.body.next()).await {
                Err(_) => {
                    let secs = st.idle_timeout.as_secs();
                    st.upstream_done = true;
                    st.pending.push_back(Err(LlmError::Timeout { secs }));
                }
                Ok(None) => {
                    let rest = st.decoder.finish();
                    st.absorb(rest);
                    st.upstream_done = true;
                }
                Ok(Some(Err(e))) => {
                    st.upstream_done = true;
                    st.pending.push_back(Err(e.into()));
                }
                Ok(Some(Ok(bytes))) => {
                    let events = st.decoder.push(&bytes);
                    st.absorb(events);
                }
            }
        }
    });

    Box::pin(fragments)
}

/// Builds a [`FragmentStream`] from already-known fragments.
#[cfg(test)]
pub(crate) fn from_fragments<I>(fragments: I) -> FragmentStream
where
    I: IntoIterator<Item = String>,
    I::IntoIter: Send + 'static,
{
    Box::pin(stream::iter(fragments.into_iter().map(Ok)))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::task::{Context, Poll};

    use super::*;

    fn sse(lines: &[&str]) -> String {
        lines.iter().map(|l| format!("{l}\n\n")).collect()
    }

    fn delta(content: &str) -> String {
        format!(
            "data: {}",
            serde_json::json!({"choices": [{"index": 0, "delta": {"content": content}}]})
        )
    }

    fn body_from_chunks(
        chunks: Vec<Vec<u8>>,
    ) -> impl Stream<Item = Result<Bytes, reqwest::Error>> + Send + 'static {
        stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c))))
    }

    async fn collect(stream: FragmentStream) -> Vec<Result<String, LlmError>> {
        stream.collect().await
    }

    #[test]
    fn test_decoder_ignores_comments_and_empty_deltas() {
        let mut decoder = SseDecoder::default();
        let input = sse(&[
            ": keep-alive",
            r#"data: {"choices": [{"delta": {"role": "assistant"}}]}"#,
            &delta("Hi"),
            "data: [DONE]",
        ]);

        let events: Vec<SseEvent> = decoder
            .push(input.as_bytes())
            .into_iter()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(
            events,
            vec![SseEvent::Fragment("Hi".to_string()), SseEvent::Done]
        );
    }

    #[test]
    fn test_decoder_reassembles_split_lines_and_utf8() {
        let mut decoder = SseDecoder::default();
        let line = format!("{}\n", delta("café"));
        let bytes = line.as_bytes();
        // Split inside the two-byte 'é'.
        let split = line.find('é').unwrap() + 1;

        assert!(decoder.push(&bytes[..split]).is_empty());
        let events = decoder.push(&bytes[split..]);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].as_ref().unwrap(),
            &SseEvent::Fragment("café".to_string())
        );
    }

    #[test]
    fn test_decoder_finish_flushes_unterminated_line() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push(delta("tail").as_bytes()).is_empty());
        let events = decoder.finish();
        assert_eq!(
            events[0].as_ref().unwrap(),
            &SseEvent::Fragment("tail".to_string())
        );
    }

    #[test]
    fn test_decoder_surfaces_inline_api_errors() {
        let mut decoder = SseDecoder::default();
        let events = decoder.push(b"data: {\"error\": {\"message\": \"overloaded\"}}\n");
        assert!(matches!(&events[0], Err(LlmError::Stream(m)) if m == "overloaded"));
    }

    #[tokio::test]
    async fn test_fragments_arrive_in_order_and_stop_at_done() {
        let text = sse(&[
            &delta("Hello"),
            &delta(" "),
            &delta("World"),
            "data: [DONE]",
            &delta("ignored"),
        ]);
        let bytes = text.into_bytes();
        let chunks: Vec<Vec<u8>> = bytes.chunks(7).map(|c| c.to_vec()).collect();

        let out = collect(fragments_from_sse(
            body_from_chunks(chunks),
            Duration::from_secs(5),
        ))
        .await;
        let fragments: Vec<String> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(fragments, vec!["Hello", " ", "World"]);
    }

    #[tokio::test]
    async fn test_stream_ends_at_body_end_without_done() {
        let text = format!("{}\n\n{}", delta("a"), delta("b"));
        let out = collect(fragments_from_sse(
            body_from_chunks(vec![text.into_bytes()]),
            Duration::from_secs(5),
        ))
        .await;
        let fragments: Vec<String> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(fragments, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_fragments_before_malformed_chunk_are_delivered_first() {
        let text = sse(&[&delta("ok"), "data: {not json", &delta("never")]);
        let out = collect(fragments_from_sse(
            body_from_chunks(vec![text.into_bytes()]),
            Duration::from_secs(5),
        ))
        .await;

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].as_ref().unwrap(), "ok");
        assert!(matches!(out[1], Err(LlmError::Parse(_))));
    }

    /// Upstream body that records when it is dropped.
    struct TrackedBody<S> {
        inner: S,
        dropped: Arc<AtomicBool>,
    }

    impl<S: Stream + Unpin> Stream for TrackedBody<S> {
        type Item = S::Item;

        fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
            Pin::new(&mut self.get_mut().inner).poll_next(cx)
        }
    }

    impl<S> Drop for TrackedBody<S> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_dropping_fragment_stream_closes_upstream() {
        let dropped = Arc::new(AtomicBool::new(false));
        let first = sse(&[&delta("Hello")]).into_bytes();
        // The upstream never finishes on its own.
        let inner = stream::iter(vec![Ok::<_, reqwest::Error>(Bytes::from(first))])
            .chain(stream::pending());
        let body = TrackedBody {
            inner,
            dropped: dropped.clone(),
        };

        let mut fragments = fragments_from_sse(body, Duration::from_secs(5));
        assert_eq!(fragments.next().await.unwrap().unwrap(), "Hello");
        assert!(!dropped.load(Ordering::SeqCst));

        drop(fragments);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_upstream_times_out() {
        let body = stream::pending::<Result<Bytes, reqwest::Error>>();
        let out = collect(fragments_from_sse(body, Duration::from_secs(3))).await;

        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Err(LlmError::Timeout { secs: 3 })));
    }
}
