//! Line-oriented server-sent-event parsing.
//!
//! Nanoleaf (`/events`) and the Hue bridge (`/eventstream/clip/v2`) push
//! `id:` / `data:` line pairs over a chunked HTTP response. Chunk
//! boundaries fall anywhere, so undelimited tail bytes are buffered and an
//! event is only emitted once its `data:` line is terminated by a newline.

use futures_util::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionTracker;
use crate::error::Error;
use crate::rest::check_status;

/// One parsed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub id: Option<String>,
    pub data: String,
}

/// Incremental parser holding the partial trailing line.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    pending: Vec<u8>,
    current_id: Option<String>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(event) = self.handle_line(line) {
                events.push(event);
            }
        }
        events
    }

    /// Bytes received but not yet terminated by a newline.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    fn handle_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            // Blank line closes the event block.
            self.current_id = None;
            return None;
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value);

        match field {
            "id" => {
                self.current_id = Some(value.to_owned());
                None
            }
            "data" => Some(SseEvent {
                id: self.current_id.clone(),
                data: value.to_owned(),
            }),
            other => {
                tracing::trace!(field = other, "ignoring SSE field");
                None
            }
        }
    }
}

/// Turn a streaming HTTP response into a stream of parsed events.
pub fn event_stream(resp: reqwest::Response) -> impl Stream<Item = Result<SseEvent, Error>> {
    async_stream::try_stream! {
        let mut buffer = SseLineBuffer::new();
        let mut bytes = resp.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(Error::Transport)?;
            for event in buffer.push(&chunk) {
                yield event;
            }
        }
    }
}

/// Open a long-lived SSE request and feed each event to `on_event`.
///
/// Connect and read failures (and the server ending the response) are
/// reported to `tracker` and returned. Cancellation returns `Ok(())`.
pub async fn pump<F>(
    request: reqwest::RequestBuilder,
    tracker: &ConnectionTracker,
    cancel: &CancellationToken,
    mut on_event: F,
) -> Result<(), Error>
where
    F: FnMut(SseEvent),
{
    let sent = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        sent = request.send() => sent,
    };
    let resp = match sent {
        Ok(resp) => check_status(resp).await,
        Err(e) => Err(Error::Transport(e)),
    };
    let resp = match resp {
        Ok(resp) => resp,
        Err(e) => {
            tracker.failed(&e);
            return Err(e);
        }
    };
    tracker.succeeded();
    tracing::info!("event stream connected");

    let mut events = std::pin::pin!(event_stream(resp));
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!("event stream cancelled");
                return Ok(());
            }
            item = events.next() => match item {
                Some(Ok(event)) => {
                    tracing::trace!(id = ?event.id, data = %event.data, "event stream frame");
                    on_event(event);
                }
                Some(Err(e)) => {
                    tracker.failed(&e);
                    return Err(e);
                }
                None => {
                    let e = Error::StreamClosed {
                        reason: "server ended the event stream".into(),
                    };
                    tracker.failed(&e);
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_data_line_yields_exactly_one_event() {
        let mut buffer = SseLineBuffer::new();

        let first = buffer.push(b"id: 1\ndat");
        assert!(first.is_empty());
        assert_eq!(buffer.buffered(), 3);

        let second = buffer.push(b"a: {\"events\":[]}\n");
        assert_eq!(
            second,
            vec![SseEvent {
                id: Some("1".into()),
                data: "{\"events\":[]}".into(),
            }]
        );
        assert_eq!(buffer.buffered(), 0);
    }

    #[test]
    fn several_events_in_one_chunk() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.push(b"id: 1\ndata: a\n\nid: 3\ndata: b\n\n");

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id.as_deref(), Some("1"));
        assert_eq!(events[1].id.as_deref(), Some("3"));
        assert_eq!(events[1].data, "b");
    }

    #[test]
    fn comments_and_crlf_are_handled() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.push(b": hi\r\n\r\nid: 17:0\r\ndata: [1]\r\n");

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id.as_deref(), Some("17:0"));
        assert_eq!(events[0].data, "[1]");
    }

    #[test]
    fn blank_line_resets_id() {
        let mut buffer = SseLineBuffer::new();
        let events = buffer.push(b"id: 2\n\ndata: x\n");
        assert_eq!(events[0].id, None);
    }

    #[test]
    fn multibyte_characters_split_across_chunks() {
        let mut buffer = SseLineBuffer::new();
        let text = "data: caf\u{e9}\n".as_bytes();
        let (a, b) = text.split_at(text.len() - 2);

        assert!(buffer.push(a).is_empty());
        let events = buffer.push(b);
        assert_eq!(events[0].data, "caf\u{e9}");
    }
}
