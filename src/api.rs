use anyhow::Result;
use futures::channel::mpsc;
use futures::SinkExt;
use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::store::{ChatMessage, ConversationSummary};

macro_rules! debug_println {
    ($($arg:tt)*) => {
        if std::env::var("CIPHER_DEBUG").is_ok() {
            eprintln!($($arg)*);
        }
    };
}

/// One transport-level event of an in-flight chat stream.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(String),
    Completed,
    Failed(String),
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    query: &'a str,
    conversation_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: String) -> Self {
        ApiClient {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn list_conversations(&self) -> Result<Vec<ConversationSummary>> {
        let response = self
            .client
            .get(format!("{}/conversations", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("conversation list request failed: {}", response.status());
        }
        Ok(response.json().await?)
    }

    pub async fn fetch_messages(&self, id: &str) -> Result<Vec<ChatMessage>> {
        let response = self
            .client
            .get(format!("{}/conversations/{}", self.base_url, id))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("history request failed: {}", response.status());
        }
        Ok(response.json().await?)
    }

    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/conversations/{}", self.base_url, id))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("delete request failed: {}", response.status());
        }
        Ok(())
    }

    /// Open the streaming chat request and forward transport events into
    /// `events` until end-of-stream, failure, or cancellation. Always
    /// terminates the event sequence with `Completed` or `Failed`.
    pub async fn stream_chat(
        &self,
        query: &str,
        conversation_id: &str,
        mut events: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let terminal = match self
            .drive_chat(query, conversation_id, &mut events, &cancel)
            .await
        {
            Ok(()) => StreamEvent::Completed,
            Err(e) => {
                debug_println!("chat stream failed: {e:#}");
                StreamEvent::Failed(e.to_string())
            }
        };
        let _ = events.send(terminal).await;
    }

    async fn drive_chat(
        &self,
        query: &str,
        conversation_id: &str,
        events: &mut mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let request = ChatRequest {
            query,
            conversation_id,
        };

        let response = tokio::select! {
            response = self
                .client
                .post(format!("{}/chat", self.base_url))
                .json(&request)
                .send() => response?,
            _ = cancel.cancelled() => anyhow::bail!("request cancelled"),
        };

        if !response.status().is_success() {
            anyhow::bail!("chat endpoint returned {}", response.status());
        }

        let mut stream = response.bytes_stream();
        let mut decoder = Utf8Accumulator::new();

        loop {
            let item = tokio::select! {
                item = stream.next() => item,
                _ = cancel.cancelled() => anyhow::bail!("request cancelled"),
            };
            let Some(item) = item else { break };

            let text = decoder.push(&item?);
            if !text.is_empty() {
                events
                    .send(StreamEvent::Chunk(text))
                    .await
                    .map_err(|_| anyhow::anyhow!("stream consumer dropped"))?;
            }
        }

        let tail = decoder.finish();
        if !tail.is_empty() {
            events
                .send(StreamEvent::Chunk(tail))
                .await
                .map_err(|_| anyhow::anyhow!("stream consumer dropped"))?;
        }
        Ok(())
    }
}

/// Incremental UTF-8 decoder: a multi-byte sequence split across two network
/// chunks is held back until its remaining bytes arrive instead of being
/// mangled into replacement characters.
struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    fn new() -> Self {
        Utf8Accumulator {
            pending: Vec::new(),
        }
    }

    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    out.push_str(valid);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(std::str::from_utf8(&self.pending[..valid]).unwrap_or_default());
                    match e.error_len() {
                        // Genuinely invalid bytes: replace and move on.
                        Some(len) => {
                            out.push('\u{FFFD}');
                            self.pending.drain(..valid + len);
                        }
                        // Incomplete sequence at the end: keep for next chunk.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flush whatever is left at end-of-stream.
    fn finish(&mut self) -> String {
        String::from_utf8_lossy(&std::mem::take(&mut self.pending)).into_owned()
    }
}
