// Server-sent events transport - live feed over a streaming HTTP response
use crate::application::live_transport::{
    ConnectionHandle, LiveTransport, TransportEvent, TransportSession,
};
use anyhow::Context;
use bytes::BytesMut;
use tokio::sync::{mpsc, watch};

/// Event names carrying readings. Anything else is ignored.
const DATA_EVENTS: [&str; 2] = ["update", "message"];

#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` decoder. Chunks may split lines anywhere.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw = self.buffer.split_to(newline + 1);
            let text = String::from_utf8_lossy(&raw[..newline]);
            let line = text.strip_suffix('\r').unwrap_or(&text);
            if let Some(event) = self.take_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn take_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            let event = self.event.take();
            if self.data.is_empty() {
                return None;
            }
            let data = self.data.join("\n");
            self.data.clear();
            return Some(SseEvent {
                event: event.unwrap_or_else(|| "message".to_string()),
                data,
            });
        }

        // comment / keep-alive
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
}

#[derive(Debug, Clone, Default)]
pub struct SseTransport {
    client: reqwest::Client,
}

impl SseTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl LiveTransport for SseTransport {
    fn open(&self, url: &str) -> anyhow::Result<TransportSession> {
        let url =
            reqwest::Url::parse(url).with_context(|| format!("Invalid live feed URL {}", url))?;

        let (events_tx, events) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = watch::channel(false);
        tokio::spawn(run_sse_stream(self.client.clone(), url, events_tx, close_rx));

        Ok(TransportSession {
            handle: Box::new(SseHandle { close: close_tx }),
            events,
        })
    }
}

struct SseHandle {
    close: watch::Sender<bool>,
}

impl ConnectionHandle for SseHandle {
    fn close(&mut self) {
        // the stream task may already be gone
        let _ = self.close.send(true);
    }
}

async fn run_sse_stream(
    client: reqwest::Client,
    url: reqwest::Url,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut close: watch::Receiver<bool>,
) {
    let request = client
        .get(url.clone())
        .header("Accept", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .send();

    let mut response = tokio::select! {
        result = request => match result {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                let _ = events.send(TransportEvent::Error(format!(
                    "live feed returned status {}",
                    response.status()
                )));
                return;
            }
            Err(e) => {
                let _ = events.send(TransportEvent::Error(format!("live feed request failed: {}", e)));
                return;
            }
        },
        _ = close.changed() => return,
    };

    tracing::debug!("SSE stream connected: {}", url);
    let _ = events.send(TransportEvent::Opened);

    let mut decoder = SseDecoder::default();
    loop {
        tokio::select! {
            chunk = response.chunk() => match chunk {
                Ok(Some(bytes)) => {
                    for event in decoder.feed(&bytes) {
                        if !DATA_EVENTS.contains(&event.event.as_str()) {
                            continue;
                        }
                        if events.send(TransportEvent::Message(event.data)).is_err() {
                            return;
                        }
                    }
                }
                Ok(None) => {
                    let _ = events.send(TransportEvent::Error("live feed ended".to_string()));
                    return;
                }
                Err(e) => {
                    tracing::warn!("SSE stream error on {}: {}", url, e);
                    let _ = events.send(TransportEvent::Error(format!("live feed error: {}", e)));
                    return;
                }
            },
            _ = close.changed() => {
                tracing::debug!("SSE stream closed: {}", url);
                return;
            }
        }
    }
}
