//! Server-Sent Events subscriber feeding the local cache.

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::ClientError;
use crate::client::local_cache::LocalCache;
use crate::domain::cache_event::CacheEvent;

/// Delay before reconnecting after the stream ends or fails.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// One dispatched SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field; `None` for the default `message` type.
    pub event: Option<String>,
    pub data: String,
}

/// Incremental `text/event-stream` parser.
///
/// Accepts arbitrary byte chunks; lines split across chunks are buffered.
/// Comment lines and `id:`/`retry:` fields are ignored.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk, returning every frame it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }

            if let Some(frame) = self.process_line(&String::from_utf8_lossy(&line)) {
                frames.push(frame);
            }
        }

        frames
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }

        Some(SseFrame {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
        })
    }
}

/// Keeps a [`LocalCache`] in sync with `GET /api/cache-events`.
pub struct EventSubscriber {
    http: reqwest::Client,
    url: String,
    reconnect_delay: Duration,
}

impl EventSubscriber {
    /// Subscriber for the service at `base_url`.
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            url: format!("{}/api/cache-events", base_url.trim_end_matches('/')),
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Runs the subscription until the task is aborted, reconnecting after
    /// every disconnect.
    pub fn spawn(self, cache: Arc<LocalCache>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match self.listen(&cache).await {
                    Ok(()) => info!("Cache event stream closed, reconnecting"),
                    Err(e) => warn!(error = %e, "Cache event stream failed, reconnecting"),
                }
                tokio::time::sleep(self.reconnect_delay).await;
            }
        })
    }

    /// Consumes one connection until the server closes it.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Http`] if the request fails or the body errors
    /// mid-stream.
    pub async fn listen(&self, cache: &LocalCache) -> Result<(), ClientError> {
        let response = self
            .http
            .get(&self.url)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .send()
            .await?
            .error_for_status()?;

        let mut parser = SseParser::new();
        let mut body = response.bytes_stream();

        while let Some(chunk) = body.next().await {
            for frame in parser.feed(&chunk?) {
                apply(cache, frame);
            }
        }

        Ok(())
    }
}

fn apply(cache: &LocalCache, frame: SseFrame) {
    match frame.event.as_deref() {
        Some("connected") => debug!(data = %frame.data, "Cache event stream connected"),
        None | Some("message") => match serde_json::from_str::<CacheEvent>(&frame.data) {
            Ok(event) => cache.handle_event(&event),
            Err(e) => warn!(error = %e, data = %frame.data, "Unreadable cache event"),
        },
        Some(other) => debug!(event = other, "Ignoring unknown event type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_named_and_default_events() {
        let mut parser = SseParser::new();
        let frames = parser.feed(
            b"event: connected\ndata: {\"type\":\"connected\"}\n\ndata: {\"type\":\"url_deleted\"}\n\n",
        );

        assert_eq!(
            frames,
            vec![
                SseFrame {
                    event: Some("connected".to_string()),
                    data: "{\"type\":\"connected\"}".to_string(),
                },
                SseFrame {
                    event: None,
                    data: "{\"type\":\"url_deleted\"}".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_buffers_across_chunks() {
        let mut parser = SseParser::new();

        assert!(parser.feed(b"data: hel").is_empty());
        assert!(parser.feed(b"lo\r\n").is_empty());
        let frames = parser.feed(b"\r\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "hello");
    }

    #[test]
    fn test_ignores_comments_and_joins_data_lines() {
        let mut parser = SseParser::new();
        let frames = parser.feed(b": keep-alive\n\ndata: a\ndata: b\nid: 7\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "a\nb");
    }

    #[test]
    fn test_multibyte_split_is_reassembled() {
        let mut parser = SseParser::new();
        let bytes = "data: héllo\n\n".as_bytes();
        let split = bytes.iter().position(|&b| b == 0xC3).unwrap() + 1;

        assert!(parser.feed(&bytes[..split]).is_empty());
        let frames = parser.feed(&bytes[split..]);
        assert_eq!(frames[0].data, "héllo");
    }
}
