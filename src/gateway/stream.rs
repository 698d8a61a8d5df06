use std::fmt::Display;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::models::StreamChunk;
use super::types::StreamEvent;

/// Incremental decoder for the chat stream body.
///
/// Bytes arrive in arbitrary chunks. Multi-byte UTF-8 sequences and lines may
/// be split across chunk boundaries, so both are buffered until complete.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    byte_buf: Vec<u8>,
    line_buf: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the text fragments of every line it completed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.byte_buf.extend_from_slice(bytes);
        let decoded = self.decode_available();
        self.line_buf.push_str(&decoded);

        let mut fragments = Vec::new();
        while let Some(line_end) = self.line_buf.find('\n') {
            let line: String = self.line_buf.drain(..=line_end).collect();
            if let Some(text) = parse_line(&line[..line.len() - 1]) {
                fragments.push(text);
            }
        }
        fragments
    }

    /// Flush whatever is left once the body has ended.
    pub fn finish(&mut self) -> Vec<String> {
        if !self.byte_buf.is_empty() {
            let rest = String::from_utf8_lossy(&self.byte_buf).into_owned();
            self.byte_buf.clear();
            self.line_buf.push_str(&rest);
        }
        let line = std::mem::take(&mut self.line_buf);
        parse_line(&line).into_iter().collect()
    }

    fn decode_available(&mut self) -> String {
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.byte_buf) {
                Ok(s) => {
                    out.push_str(s);
                    self.byte_buf.clear();
                    return out;
                }
                Err(e) => {
                    let valid_up_to = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.byte_buf[..valid_up_to]));
                    match e.error_len() {
                        // Invalid sequence in the middle: replace it and keep going
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.byte_buf.drain(..valid_up_to + len);
                        }
                        // Incomplete sequence at the end: wait for more data
                        None => {
                            self.byte_buf.drain(..valid_up_to);
                            return out;
                        }
                    }
                }
            }
        }
    }
}

/// Extract the text fragment of a single `data:` line.
fn parse_line(line: &str) -> Option<String> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    let payload = line
        .strip_prefix("data: ")
        .or_else(|| line.strip_prefix("data:"))?;

    match serde_json::from_str::<StreamChunk>(payload) {
        Ok(chunk) => chunk.into_text().filter(|text| !text.is_empty()),
        Err(e) => {
            // Partial or malformed events are expected; skip them
            tracing::debug!("Skipping unparsable stream line: {}", e);
            None
        }
    }
}

/// Drive `stream` to completion, forwarding every fragment as a
/// `StreamEvent::Token` and finishing with `Done` (or `Error` if the body
/// could not be read).
pub async fn parse_sse_stream<S, B, E>(mut stream: S, tx: mpsc::Sender<StreamEvent>)
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut decoder = StreamDecoder::new();

    while let Some(chunk_result) = stream.next().await {
        let bytes = match chunk_result {
            Ok(b) => b,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error(format!("Stream error: {}", e)))
                    .await;
                return;
            }
        };

        for fragment in decoder.push(bytes.as_ref()) {
            if tx.send(StreamEvent::Token(fragment)).await.is_err() {
                return; // receiver dropped
            }
        }
    }

    for fragment in decoder.finish() {
        if tx.send(StreamEvent::Token(fragment)).await.is_err() {
            return;
        }
    }

    let _ = tx.send(StreamEvent::Done).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str) -> String {
        format!(
            "data: {{\"candidates\":[{{\"content\":{{\"parts\":[{{\"text\":{}}}]}}}}]}}\n",
            serde_json::to_string(text).unwrap()
        )
    }

    async fn collect(chunks: Vec<Result<Vec<u8>, String>>) -> Vec<StreamEvent> {
        let (tx, mut rx) = mpsc::channel(64);
        parse_sse_stream(futures::stream::iter(chunks), tx).await;
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    }

    #[test]
    fn test_fragments_in_order() {
        let mut decoder = StreamDecoder::new();
        let body = format!("{}{}", event("Hel"), event("lo"));
        assert_eq!(decoder.push(body.as_bytes()), vec!["Hel", "lo"]);
        assert!(decoder.finish().is_empty());
    }

    #[test]
    fn test_line_split_across_chunks() {
        let mut decoder = StreamDecoder::new();
        let line = event("Hello");
        let (a, b) = line.split_at(17);
        assert!(decoder.push(a.as_bytes()).is_empty());
        assert_eq!(decoder.push(b.as_bytes()), vec!["Hello"]);
    }

    #[test]
    fn test_multibyte_char_split_across_chunks() {
        let mut decoder = StreamDecoder::new();
        let line = event("héllo ✓");
        let bytes = line.as_bytes();
        // Split inside the three-byte check mark
        let check = line.find('✓').unwrap();
        assert!(decoder.push(&bytes[..check + 1]).is_empty());
        assert!(decoder.push(&bytes[check + 1..check + 2]).is_empty());
        assert_eq!(decoder.push(&bytes[check + 2..]), vec!["héllo ✓"]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let mut decoder = StreamDecoder::new();
        let body = format!(
            "{}data: {{not json\n: keep-alive\nevent: ping\n\n{}",
            event("a"),
            event("b")
        );
        assert_eq!(decoder.push(body.as_bytes()), vec!["a", "b"]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut decoder = StreamDecoder::new();
        let body = event("x").replace('\n', "\r\n");
        assert_eq!(decoder.push(body.as_bytes()), vec!["x"]);
    }

    #[test]
    fn test_unterminated_last_line_flushed_on_finish() {
        let mut decoder = StreamDecoder::new();
        let line = event("tail");
        assert!(decoder.push(line.trim_end().as_bytes()).is_empty());
        assert_eq!(decoder.finish(), vec!["tail"]);
    }

    #[test]
    fn test_events_without_text_yield_nothing() {
        let mut decoder = StreamDecoder::new();
        let body = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"\"}]}}]}\ndata: {\"usageMetadata\":{}}\n";
        assert!(decoder.push(body.as_bytes()).is_empty());
    }

    #[tokio::test]
    async fn test_stream_emits_tokens_then_done() {
        let events = collect(vec![
            Ok(event("Hel").into_bytes()),
            Ok(event("lo").into_bytes()),
        ])
        .await;
        assert_eq!(
            events,
            vec![
                StreamEvent::Token("Hel".to_string()),
                StreamEvent::Token("lo".to_string()),
                StreamEvent::Done,
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_read_error_reports_error() {
        let events = collect(vec![
            Ok(event("Hel").into_bytes()),
            Err("connection reset".to_string()),
        ])
        .await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::Token("Hel".to_string()));
        assert!(matches!(&events[1], StreamEvent::Error(msg) if msg.contains("connection reset")));
    }
}
