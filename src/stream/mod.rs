//! Streaming research session
//!
//! Opens the streaming POST, feeds the response body through the
//! [`EventCodec`] and hands out decoded events in arrival order. A terminal
//! event is the last item a stream ever yields; the response is dropped
//! right after it, which closes the connection.

use crate::api::ResearchRequest;
use crate::protocol::{Event, EventCodec};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("{0}")]
    Transport(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Stream cancelled")]
    Cancelled,
}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<Event, StreamError>> + Send>>;

/// Anything that can start a research run and produce its events.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn open(
        &self,
        request: &ResearchRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, StreamError>;
}

/// [`EventSource`] backed by the research service's streaming endpoint
pub struct StreamSession {
    client: Client,
    endpoint: String,
}

impl StreamSession {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EventSource for StreamSession {
    async fn open(
        &self,
        request: &ResearchRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, StreamError> {
        tracing::debug!(
            endpoint = %self.endpoint,
            query = %request.query,
            "Opening research stream"
        );

        let send = self.client.post(&self.endpoint).json(request).send();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StreamError::Cancelled),
            response = send => response?,
        };

        if !response.status().is_success() {
            let status = response.status();
            tracing::warn!(%status, "Research stream rejected");
            return Err(StreamError::Transport(format!("Server error: {}", status)));
        }

        Ok(decode_events(response.bytes_stream(), cancel))
    }
}

/// Turn a stream of body chunks into decoded events.
///
/// Ends after the first terminal event, when the body ends, after the first
/// read error (yielded as [`StreamError::Transport`]) or once `cancel` fires.
/// An incomplete trailing frame is discarded.
pub fn decode_events<S, B, E>(chunks: S, cancel: CancellationToken) -> EventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut chunks = Box::pin(chunks);
        let mut codec = EventCodec::new();

        'read: loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                chunk = chunks.next() => Some(chunk),
            };

            let chunk = match next {
                None => {
                    tracing::debug!("Research stream cancelled");
                    break;
                }
                Some(None) => break,
                Some(Some(Err(e))) => {
                    yield Err(StreamError::Transport(e.to_string()));
                    break;
                }
                Some(Some(Ok(chunk))) => chunk,
            };

            for event in codec.feed(chunk.as_ref()) {
                if cancel.is_cancelled() {
                    break 'read;
                }
                let terminal = event.is_terminal();
                yield Ok(event);
                if terminal {
                    break 'read;
                }
            }
        }

        let dropped = codec.discard_pending();
        if dropped > 0 {
            tracing::debug!(bytes = dropped, "Discarding incomplete trailing frame");
        }
    })
}
