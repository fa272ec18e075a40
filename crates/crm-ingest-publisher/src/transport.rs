//! ---
//! ingest_section: "06-publish-pipeline"
//! ingest_subsection: "module"
//! ingest_type: "source"
//! ingest_scope: "code"
//! ingest_description: "Queue transports, retry policy, and dead-letter routing."
//! ingest_version: "v0.0.0-prealpha"
//! ingest_owner: "tbd"
//! ---
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, Stdout};

/// Failures reported by a queue transport for a single send.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The broker could not be reached or did not acknowledge in time.
    #[error("queue unavailable: {0}")]
    Unavailable(String),
    /// The broker refused the message; retrying will not help.
    #[error("queue rejected message: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Whether the publisher should try the same message again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::Unavailable(_))
    }
}

/// Message queue send capability consumed by the publisher.
///
/// Implementations are shared by every producer and must be safe for concurrent use.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Send one serialized payload under `key` to `topic`, resolving once acknowledged.
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), TransportError>;
    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// A message accepted by the [`InMemoryQueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    /// Destination topic.
    pub topic: String,
    /// Partitioning key (the envelope id).
    pub key: String,
    /// Serialized envelope.
    pub payload: Vec<u8>,
}

impl QueuedMessage {
    /// Decode the payload as JSON.
    pub fn json(&self) -> serde_json::Result<JsonValue> {
        serde_json::from_slice(&self.payload)
    }
}

/// Process-local queue backed by a mutex protected vector.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    messages: Mutex<Vec<QueuedMessage>>,
}

impl InMemoryQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every accepted message, in acceptance order.
    pub fn messages(&self) -> Vec<QueuedMessage> {
        self.messages.lock().clone()
    }

    /// Messages accepted for one topic.
    pub fn messages_for(&self, topic: &str) -> Vec<QueuedMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|message| message.topic == topic)
            .cloned()
            .collect()
    }

    /// Number of accepted messages.
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Whether nothing has been accepted yet.
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), TransportError> {
        self.messages.lock().push(QueuedMessage {
            topic: topic.to_owned(),
            key: key.to_owned(),
            payload: payload.to_vec(),
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

/// Writes each message to stdout as one JSON line: `{"topic", "key", "payload"}`.
#[derive(Debug)]
pub struct StdoutQueue {
    out: tokio::sync::Mutex<Stdout>,
}

impl StdoutQueue {
    /// Create a transport writing to the process stdout.
    pub fn new() -> Self {
        Self {
            out: tokio::sync::Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdoutQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueTransport for StdoutQueue {
    async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(), TransportError> {
        let payload = serde_json::from_slice::<JsonValue>(payload)
            .map_err(|err| TransportError::Rejected(format!("payload is not json: {}", err)))?;
        let mut line = serde_json::to_vec(&serde_json::json!({
            "topic": topic,
            "key": key,
            "payload": payload,
        }))
        .map_err(|err| TransportError::Rejected(err.to_string()))?;
        line.push(b'\n');

        let mut out = self.out.lock().await;
        out.write_all(&line)
            .await
            .map_err(|err| TransportError::Unavailable(err.to_string()))?;
        out.flush()
            .await
            .map_err(|err| TransportError::Unavailable(err.to_string()))
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_queue_records_messages_in_order() {
        let queue = InMemoryQueue::new();
        queue.send("crm", "1", br#"{"id":"1"}"#).await.unwrap();
        queue.send("inventory", "2", br#"{"id":"2"}"#).await.unwrap();
        queue.send("crm", "3", br#"{"id":"3"}"#).await.unwrap();

        assert_eq!(queue.len(), 3);
        let keys: Vec<_> = queue
            .messages_for("crm")
            .into_iter()
            .map(|message| message.key)
            .collect();
        assert_eq!(keys, vec!["1", "3"]);
        assert_eq!(queue.messages()[1].json().unwrap()["id"], "2");
    }

    #[tokio::test]
    async fn stdout_queue_rejects_non_json_payloads() {
        let queue = StdoutQueue::new();
        let err = queue.send("crm", "1", b"not json").await.unwrap_err();
        assert!(!err.is_retryable());
        queue
            .send("crm", "1", br#"{"id":"1"}"#)
            .await
            .expect("json payload written");
    }

    #[test]
    fn only_unavailable_errors_are_retryable() {
        assert!(TransportError::Unavailable("down".into()).is_retryable());
        assert!(!TransportError::Rejected("too large".into()).is_retryable());
    }
}
