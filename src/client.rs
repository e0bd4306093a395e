use anyhow::{Context, Result, anyhow};
use futures_util::StreamExt;
use reqwest::Client;
use serde::Serialize;

use crate::conversation::HistoryEntry;

/// Outgoing request for one turn. `history` is frozen before the new
/// user/assistant pair is appended, so it never contains the in-flight query.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub query: String,
    pub history: Vec<HistoryEntry>,
    /// Serialized as `image_data`, the field name the backend reads.
    #[serde(rename = "image_data", skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// What the stream task reports back to the event loop. Exactly one terminal
/// event (`Done` or `Failed`) is emitted per stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Fragment(String),
    Done,
    Failed(String),
}

#[derive(Clone)]
pub struct AgentClient {
    client: Client,
    base_url: String,
}

impl AgentClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Open the streaming request. A non-success status is a hard failure
    /// for this turn; there are no automatic retries.
    pub async fn open_stream(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        let url = format!("{}/chat/stream", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("failed to reach agent backend at {url}"))?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "agent request failed with status: {}",
                response.status()
            ));
        }
        Ok(response)
    }
}

/// Drive one request to completion, forwarding fragments through `emit` in
/// arrival order. `emit` returns false when the receiver is gone, which stops
/// the pump. Always ends by emitting exactly one terminal event.
pub async fn run_stream<F>(client: AgentClient, request: ChatRequest, mut emit: F)
where
    F: FnMut(StreamEvent) -> bool,
{
    let terminal = match stream_into(&client, &request, &mut emit).await {
        Ok(()) => StreamEvent::Done,
        Err(err) => {
            tracing::warn!(error = %err, "agent stream failed");
            StreamEvent::Failed(format!("{err:#}"))
        }
    };
    emit(terminal);
}

async fn stream_into<F>(
    client: &AgentClient,
    request: &ChatRequest,
    emit: &mut F,
) -> Result<()>
where
    F: FnMut(StreamEvent) -> bool,
{
    let response = client.open_stream(request).await?;
    let mut body = response.bytes_stream();
    let mut carry: Vec<u8> = Vec::new();

    // Strictly sequential: each chunk is awaited and applied before the next
    // read, so fragment order always matches network arrival order.
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("stream interrupted")?;
        carry.extend_from_slice(&chunk);
        let text = take_complete_utf8(&mut carry);
        if !text.is_empty() && !emit(StreamEvent::Fragment(text)) {
            return Ok(());
        }
    }

    // Trailing bytes that never completed a UTF-8 sequence.
    if !carry.is_empty() {
        let text = String::from_utf8_lossy(&carry).into_owned();
        carry.clear();
        emit(StreamEvent::Fragment(text));
    }
    Ok(())
}

/// Split off the decodable prefix of `buf`, leaving any incomplete trailing
/// UTF-8 sequence behind for the next chunk. Chunk boundaries are byte-level,
/// so a multi-byte character may arrive torn in half.
fn take_complete_utf8(buf: &mut Vec<u8>) -> String {
    match std::str::from_utf8(buf) {
        Ok(text) => {
            let text = text.to_string();
            buf.clear();
            text
        }
        Err(err) => {
            let valid = err.valid_up_to();
            match err.error_len() {
                // Genuinely invalid bytes: decode them lossily and keep going.
                Some(bad) => {
                    let mut text = String::from_utf8_lossy(&buf[..valid + bad]).into_owned();
                    buf.drain(..valid + bad);
                    text.push_str(&take_complete_utf8(buf));
                    text
                }
                // Truncated sequence at the end: hold it back.
                None => {
                    let text = String::from_utf8_lossy(&buf[..valid]).into_owned();
                    buf.drain(..valid);
                    text
                }
            }
        }
    }
}
