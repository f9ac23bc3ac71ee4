//! Newline-delimited JSON decoding for streaming responses.
//!
//! Ollama streams one JSON object per line. HTTP chunk boundaries do not line
//! up with those lines, so bytes are buffered until a full line is available.

use bytes::Bytes;
use futures_util::Stream;
use serde::Deserialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::debug;

/// Splits a byte stream into complete, non-empty lines.
pub struct NdjsonDecoder<E> {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>,
    buffer: Vec<u8>,
    finished: bool,
}

impl<E> NdjsonDecoder<E> {
    pub fn new(stream: impl Stream<Item = Result<Bytes, E>> + Send + 'static) -> Self {
        Self {
            inner: Box::pin(stream),
            buffer: Vec::new(),
            finished: false,
        }
    }

    fn take_line(&mut self) -> Option<String> {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line).trim().to_string();
            if !line.is_empty() {
                return Some(line);
            }
        }
        None
    }
}

impl<E> Stream for NdjsonDecoder<E> {
    type Item = Result<String, E>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        // Every field is Unpin (the inner stream is boxed).
        let this = Pin::into_inner(self);
        loop {
            if let Some(line) = this.take_line() {
                return Poll::Ready(Some(Ok(line)));
            }

            if this.finished {
                // Flush a trailing line that had no newline
                if this.buffer.is_empty() {
                    return Poll::Ready(None);
                }
                let rest = std::mem::take(&mut this.buffer);
                let line = String::from_utf8_lossy(&rest).trim().to_string();
                if line.is_empty() {
                    return Poll::Ready(None);
                }
                return Poll::Ready(Some(Ok(line)));
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.buffer.extend_from_slice(&bytes);
                }
                Poll::Ready(Some(Err(err))) => return Poll::Ready(Some(Err(err))),
                Poll::Ready(None) => {
                    this.finished = true;
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// One line of an Ollama `/api/generate` stream.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GenerateLine {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
    #[serde(default)]
    pub eval_count: Option<u32>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Parse a generate line. Malformed lines yield `None` and are skipped.
pub fn parse_generate_line(line: &str) -> Option<GenerateLine> {
    match serde_json::from_str::<GenerateLine>(line) {
        Ok(parsed) => Some(parsed),
        Err(err) => {
            debug!(error = %err, line, "Skipping malformed stream line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{StreamExt, stream};

    fn chunks(
        parts: &'static [&'static str],
    ) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
        let owned: Vec<Result<Bytes, std::io::Error>> = parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect();
        stream::iter(owned)
    }

    #[tokio::test]
    async fn test_lines_split_across_chunks() {
        let decoder = NdjsonDecoder::new(chunks(&[
            "{\"response\":\"Hel",
            "lo\",\"done\":false}\n{\"resp",
            "onse\":\" world\",\"done\":false}\n",
            "{\"response\":\"\",\"done\":true}\n",
        ]));

        let lines: Vec<String> = decoder.map(|l| l.unwrap()).collect().await;
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "{\"response\":\"Hello\",\"done\":false}");
        assert_eq!(lines[1], "{\"response\":\" world\",\"done\":false}");
    }

    #[tokio::test]
    async fn test_blank_lines_and_trailing_line_without_newline() {
        let decoder = NdjsonDecoder::new(chunks(&["\n\r\n{\"a\":1}\n\n", "{\"b\":2}"]));

        let lines: Vec<String> = decoder.map(|l| l.unwrap()).collect().await;
        assert_eq!(lines, vec!["{\"a\":1}".to_string(), "{\"b\":2}".to_string()]);
    }

    #[tokio::test]
    async fn test_multibyte_text_split_mid_character() {
        // "नमस्ते" split inside a UTF-8 sequence
        let text = "{\"response\":\"नमस्ते\"}\n".as_bytes().to_vec();
        let (a, b) = text.split_at(17);
        let parts: Vec<Result<Bytes, std::io::Error>> =
            vec![Ok(Bytes::from(a.to_vec())), Ok(Bytes::from(b.to_vec()))];

        let decoder = NdjsonDecoder::new(stream::iter(parts));
        let lines: Vec<String> = decoder.map(|l| l.unwrap()).collect().await;
        let parsed = parse_generate_line(&lines[0]).unwrap();
        assert_eq!(parsed.response, "नमस्ते");
    }

    #[tokio::test]
    async fn test_stream_error_is_forwarded() {
        let parts: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from_static(b"{\"x\":1}\n")),
            Err(std::io::Error::other("connection reset")),
        ];
        let mut decoder = NdjsonDecoder::new(stream::iter(parts));

        assert!(decoder.next().await.unwrap().is_ok());
        assert!(decoder.next().await.unwrap().is_err());
    }

    #[test]
    fn test_parse_generate_line() {
        let line = parse_generate_line(
            r#"{"model":"llama3.2","response":"","done":true,"prompt_eval_count":812,"eval_count":64}"#,
        )
        .unwrap();
        assert!(line.done);
        assert_eq!(line.prompt_eval_count, Some(812));
        assert_eq!(line.eval_count, Some(64));

        assert!(parse_generate_line("not json").is_none());

        let err = parse_generate_line(r#"{"error":"model 'x' not found"}"#).unwrap();
        assert_eq!(err.error.as_deref(), Some("model 'x' not found"));
    }
}
