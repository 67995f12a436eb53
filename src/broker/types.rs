use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Message header carrying how many times a message has been sent back for retry
pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Where a message is published to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Straight to a queue through the default exchange
    Queue(String),
    /// To every queue bound to a fanout exchange
    Exchange(String),
}

impl Destination {
    pub fn queue(name: impl Into<String>) -> Self {
        Destination::Queue(name.into())
    }

    pub fn exchange(name: impl Into<String>) -> Self {
        Destination::Exchange(name.into())
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Queue(name) => write!(f, "queue {name}"),
            Destination::Exchange(name) => write!(f, "exchange {name}"),
        }
    }
}

/// A message body plus the broker-level metadata the pipeline relies on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub payload: Vec<u8>,
    pub retry_count: u32,
    pub message_id: Option<String>,
}

impl Envelope {
    pub fn new(payload: Vec<u8>) -> Self {
        Envelope {
            payload,
            retry_count: 0,
            message_id: None,
        }
    }

    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        let payload = serde_json::to_vec(value).context("Failed to serialize message body")?;
        Ok(Envelope::new(payload))
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    /// Same payload, one more retry on the counter
    pub fn retried(&self) -> Self {
        Envelope {
            payload: self.payload.clone(),
            retry_count: self.retry_count.saturating_add(1),
            message_id: self.message_id.clone(),
        }
    }

    pub fn payload_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// What the consume loop does with a delivery once its handler returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Consumed; remove from the queue
    Ack,
    /// Hand back to the broker for redelivery
    Retry,
    /// Drop, or dead-letter when the queue has a dead-letter target
    Reject,
}

#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes a persistent message. Returns once the broker has taken responsibility for it.
    async fn publish(&self, destination: &Destination, envelope: Envelope) -> Result<()>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Envelope) -> Outcome;
}
