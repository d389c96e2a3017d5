use bytes::Bytes;
use futures::stream::{self, BoxStream, Stream, StreamExt};

/// Incremental parser for `text/event-stream` bodies.
///
/// Bytes are buffered until a blank line closes an event; each closed event
/// yields its joined `data:` lines. Events without data are skipped.
#[derive(Default)]
pub struct SseParser {
    buffer: String,
    pending: Vec<u8>,
    /// A `\r` that ended the previous chunk, possibly half of a `\r\n`.
    trailing_cr: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of text and extract the data of every complete event.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        let mut text = String::with_capacity(chunk.len() + 1);
        if std::mem::take(&mut self.trailing_cr) {
            text.push('\r');
        }
        text.push_str(chunk);
        if text.ends_with('\r') {
            text.pop();
            self.trailing_cr = true;
        }
        self.buffer.push_str(&text.replace("\r\n", "\n"));
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.find("\n\n") {
            let block: String = self.buffer.drain(..pos + 2).collect();

            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| {
                    line.strip_prefix("data: ")
                        .or_else(|| line.strip_prefix("data:"))
                })
                .collect();

            if !data.is_empty() {
                events.push(data.join("\n"));
            }
        }

        events
    }

    /// Feed raw bytes. A multi-byte character split across chunks is held
    /// back until the rest of it arrives.
    pub fn feed_bytes(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let valid = match std::str::from_utf8(&self.pending) {
            Ok(s) => s.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(_) => self.pending.len(),
        };
        let bytes: Vec<u8> = self.pending.drain(..valid).collect();
        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.feed(&text)
    }
}

/// Turn a raw byte stream into a stream of SSE event payloads.
///
/// A transport error ends the stream after yielding it.
pub fn sse_events<'a, S, E>(bytes: S) -> BoxStream<'a, Result<String, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'a,
    E: Send + 'a,
{
    let state = (bytes, SseParser::new(), false);
    stream::unfold(state, |(mut bytes, mut parser, done)| async move {
        if done {
            return None;
        }
        loop {
            match bytes.next().await {
                Some(Ok(chunk)) => {
                    let events = parser.feed_bytes(&chunk);
                    if !events.is_empty() {
                        let items: Vec<Result<String, E>> = events.into_iter().map(Ok).collect();
                        return Some((stream::iter(items), (bytes, parser, false)));
                    }
                }
                Some(Err(e)) => {
                    return Some((stream::iter(vec![Err(e)]), (bytes, parser, true)));
                }
                None => return None,
            }
        }
    })
    .flatten()
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_parser_basic() {
        let mut parser = SseParser::new();
        let events = parser.feed("data: {\"x\":1}\n\n");
        assert_eq!(events, vec!["{\"x\":1}".to_string()]);
    }

    #[test]
    fn test_sse_parser_chunked() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: {\"x\":").is_empty());
        let events = parser.feed("1}\n\ndata: [DONE]\n\n");
        assert_eq!(events, vec!["{\"x\":1}".to_string(), "[DONE]".to_string()]);
    }

    #[test]
    fn test_sse_parser_crlf_and_comments() {
        let mut parser = SseParser::new();
        let events = parser.feed(": keep-alive\r\n\r\nevent: delta\r\ndata:abc\r\n\r\n");
        assert_eq!(events, vec!["abc".to_string()]);
    }

    #[test]
    fn test_sse_parser_crlf_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed("data: a\r\n\r").is_empty());
        let events = parser.feed("\ndata: b\r\n\r\n");
        assert_eq!(events, vec!["a".to_string(), "b".to_string()]);

        assert!(parser.feed("data: c\r").is_empty());
        assert!(parser.feed("\n\r").is_empty());
        assert_eq!(parser.feed("\n"), vec!["c".to_string()]);
    }

    #[test]
    fn test_sse_parser_split_utf8() {
        let mut parser = SseParser::new();
        let bytes = "data: caf\u{e9}\n\n".as_bytes();
        let split = bytes.len() - 3;
        assert!(parser.feed_bytes(&bytes[..split]).is_empty());
        assert_eq!(parser.feed_bytes(&bytes[split..]), vec!["caf\u{e9}".to_string()]);
    }

    #[tokio::test]
    async fn test_sse_events_across_chunks() {
        let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
            Ok(Bytes::from("data: a\n")),
            Ok(Bytes::from("\ndata: b\n\n")),
        ];
        let events: Vec<String> = sse_events(stream::iter(chunks))
            .map(|e| e.unwrap())
            .collect()
            .await;
        assert_eq!(events, vec!["a".to_string(), "b".to_string()]);
    }
}
