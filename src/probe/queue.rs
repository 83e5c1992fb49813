//! Message queue probe: publish a correlated message and wait for a fresh
//! consumer group to see it.
//!
//! Ordering within one run:
//!
//! 1. Make sure the topic exists. Any administrative error is logged and
//!    deferred; an unprivileged client may still be able to use a topic that
//!    already exists, and a real outage surfaces in the next steps anyway.
//! 2. Connect the producer, then subscribe a consumer under a group id that is
//!    unique to this run, reading from the earliest retained offset.
//! 3. Publish `{key: token, value: {"hello": "world", "correlationId": token}}`.
//! 4. Consume until a message with our key shows up or the deadline passes.
//!    Messages with any other key are skipped, and recoverable consumer errors
//!    (unknown partition while metadata propagates, transport hiccups) are
//!    retried.
//! 5. Disconnect consumer and producer on every path.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::{random_suffix, ProbeOutcome};
use crate::error::ProbeError;

/// Pause between polls after a recoverable consumer error.
const CONSUME_RETRY_BACKOFF: Duration = Duration::from_millis(100);

/// What the probe asks for when it ensures the topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSpec {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i32,
}

/// Result of the topic readiness step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicStatus {
    Created,
    AlreadyExists,
    /// Creation failed for another reason; the probe carried on regardless.
    Skipped,
}

/// A message as seen by the consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceivedMessage {
    pub key: Option<String>,
    pub value: Option<String>,
    pub partition: i32,
    pub offset: i64,
}

/// The broker operations the probe needs.
#[async_trait]
pub trait QueueBroker: Send + Sync {
    /// Create the topic and wait for its partitions to have leaders.
    ///
    /// Returns `Ok(TopicStatus::AlreadyExists)` when the broker says so.
    async fn ensure_topic(&self, topic: &TopicSpec) -> Result<TopicStatus, ProbeError>;

    async fn producer(&self) -> Result<Box<dyn QueueProducer>, ProbeError>;

    /// Join `group_id` and subscribe to `topic` from the earliest offset.
    async fn subscribe(&self, group_id: &str, topic: &str)
        -> Result<Box<dyn QueueConsumer>, ProbeError>;
}

#[async_trait]
pub trait QueueProducer: Send {
    async fn send(&mut self, topic: &str, key: &str, value: &str) -> Result<(), ProbeError>;
    /// Best-effort; implementations log instead of failing.
    async fn disconnect(self: Box<Self>);
}

#[async_trait]
pub trait QueueConsumer: Send {
    /// Wait for the next message on the subscription.
    async fn next_message(&mut self) -> Result<ReceivedMessage, ProbeError>;
    /// Best-effort; implementations log instead of failing.
    async fn disconnect(self: Box<Self>);
}

/// Knobs for one queue probe.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub topic: TopicSpec,
    pub group_prefix: String,
    pub consume_timeout: Duration,
}

#[derive(Clone)]
pub struct QueueProbe {
    broker: Arc<dyn QueueBroker>,
    settings: QueueSettings,
}

impl QueueProbe {
    pub fn new(broker: Arc<dyn QueueBroker>, settings: QueueSettings) -> Self {
        Self { broker, settings }
    }

    #[tracing::instrument(name = "queue_probe", skip(self), fields(topic = %self.settings.topic.name))]
    pub async fn run(&self) -> ProbeOutcome {
        let topic = &self.settings.topic.name;
        let topic_status = self.ensure_topic().await;

        let group_id = format!("{}-{}", self.settings.group_prefix, random_suffix(8));
        let token = correlation_token();
        let produced = json!({ "hello": "world", "correlationId": token }).to_string();

        let mut producer = match self.broker.producer().await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "queue producer connect failed");
                return ProbeOutcome::fail(e);
            }
        };
        let mut consumer = match self.broker.subscribe(&group_id, topic).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, %group_id, "queue consumer subscribe failed");
                producer.disconnect().await;
                return ProbeOutcome::fail(e);
            }
        };

        let exchanged = exchange(
            producer.as_mut(),
            consumer.as_mut(),
            topic,
            &token,
            &produced,
            self.settings.consume_timeout,
        )
        .await;

        consumer.disconnect().await;
        producer.disconnect().await;

        let consumed = match exchanged {
            Ok(consumed) => consumed,
            Err(e) => {
                warn!(error = %e, "queue produce failed");
                return ProbeOutcome::fail(e);
            }
        };

        let mut details = json!({
            "topic": topic,
            "topicSetup": topic_status,
            "produced": produced,
        });
        match consumed {
            Wait::Matched(message) => {
                info!(partition = message.partition, offset = message.offset, "queue round-trip succeeded");
                details["consumed"] = json!(message);
                ProbeOutcome::success(details)
            }
            Wait::Unconfirmed(reason) => {
                warn!(%reason, "queue message produced but not observed");
                details["consumed"] = serde_json::Value::Null;
                details["note"] = json!(reason.to_string());
                ProbeOutcome::partial(details)
            }
        }
    }

    async fn ensure_topic(&self) -> TopicStatus {
        match self.broker.ensure_topic(&self.settings.topic).await {
            Ok(status) => {
                debug!(?status, "topic ready");
                status
            }
            Err(e) => {
                warn!(error = %e, "topic setup failed; continuing against existing topic");
                TopicStatus::Skipped
            }
        }
    }
}

/// How the consume wait ended, given that the produce succeeded.
enum Wait {
    Matched(ReceivedMessage),
    /// Deadline expired or the consumer lost its connection while waiting.
    Unconfirmed(ProbeError),
}

/// Produce the correlated message and race the consumer against the deadline.
///
/// `Err` means the produce itself failed; anything that goes wrong after that
/// is folded into [`Wait::Unconfirmed`].
async fn exchange(
    producer: &mut dyn QueueProducer,
    consumer: &mut dyn QueueConsumer,
    topic: &str,
    token: &str,
    payload: &str,
    deadline: Duration,
) -> Result<Wait, ProbeError> {
    producer.send(topic, token, payload).await?;

    // `timeout` drops whichever side loses, so the wait resolves exactly once
    // and no timer outlives it.
    let waited = tokio::time::timeout(deadline, wait_for_key(consumer, token)).await;
    Ok(match waited {
        Ok(Ok(message)) => Wait::Matched(message),
        Ok(Err(e)) => Wait::Unconfirmed(e),
        Err(_) => Wait::Unconfirmed(ProbeError::Timeout {
            what: "kafka consume",
            after: deadline,
        }),
    })
}

/// Read until our key shows up. Only a lost connection ends the wait early;
/// any other consumer error is retried until the caller's deadline.
async fn wait_for_key(
    consumer: &mut dyn QueueConsumer,
    token: &str,
) -> Result<ReceivedMessage, ProbeError> {
    loop {
        let message = match consumer.next_message().await {
            Ok(message) => message,
            Err(e @ ProbeError::Connection(_)) => return Err(e),
            Err(e) => {
                warn!(error = %e, "consumer error while waiting; retrying");
                tokio::time::sleep(CONSUME_RETRY_BACKOFF).await;
                continue;
            }
        };
        if message.key.as_deref() == Some(token) {
            return Ok(message);
        }
        debug!(key = ?message.key, offset = message.offset, "skipping uncorrelated message");
    }
}

/// `cid-<unix millis>-<random>`: unique per run, readable in broker tooling.
fn correlation_token() -> String {
    format!(
        "cid-{}-{}",
        chrono::Utc::now().timestamp_millis(),
        random_suffix(8)
    )
}
