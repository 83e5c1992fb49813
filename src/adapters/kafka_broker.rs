//! `QueueBroker` backed by librdkafka.
//!
//! librdkafka creates clients without touching the network, so the producer
//! fetches cluster metadata once up front: an unreachable cluster then shows up
//! as a connection failure instead of a produce timeout. Metadata calls and
//! consumer shutdown block, so they run on the blocking pool.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rdkafka::{
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    consumer::{Consumer, StreamConsumer},
    producer::{FutureProducer, FutureRecord, Producer},
    types::RDKafkaErrorCode,
    util::Timeout,
    ClientConfig, Message,
};
use tracing::{debug, warn};

use crate::{
    config::{KafkaConfig, PRODUCER_FLUSH},
    error::ProbeError,
    probe::queue::{
        QueueBroker, QueueConsumer, QueueProducer, ReceivedMessage, TopicSpec, TopicStatus,
    },
};

const METADATA_POLL: Duration = Duration::from_millis(100);

pub struct KafkaBroker {
    cfg: KafkaConfig,
}

impl KafkaBroker {
    pub fn new(cfg: &KafkaConfig) -> Self {
        Self { cfg: cfg.clone() }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", self.cfg.bootstrap_servers())
            .set("client.id", &self.cfg.client_id);
        config
    }
}

#[async_trait]
impl QueueBroker for KafkaBroker {
    async fn ensure_topic(&self, topic: &TopicSpec) -> Result<TopicStatus, ProbeError> {
        let admin: AdminClient<DefaultClientContext> =
            self.client_config().create().map_err(ProbeError::setup)?;
        let new_topic = NewTopic::new(
            &topic.name,
            topic.partitions,
            TopicReplication::Fixed(topic.replication_factor),
        );
        let opts = AdminOptions::new()
            .request_timeout(Some(self.cfg.admin_timeout()))
            .operation_timeout(Some(self.cfg.admin_timeout()));

        let results = admin
            .create_topics([&new_topic], &opts)
            .await
            .map_err(ProbeError::setup)?;
        let status = match results.into_iter().next() {
            Some(Ok(_)) => TopicStatus::Created,
            Some(Err((_, RDKafkaErrorCode::TopicAlreadyExists))) => {
                return Ok(TopicStatus::AlreadyExists)
            }
            Some(Err((name, code))) => {
                return Err(ProbeError::setup(format!("creating topic {name}: {code}")))
            }
            None => return Err(ProbeError::setup("broker returned no topic result")),
        };

        let name = topic.name.clone();
        let budget = self.cfg.admin_timeout();
        let waited = tokio::task::spawn_blocking(move || wait_for_leaders(&admin, &name, budget))
            .await
            .map_err(ProbeError::setup)
            .and_then(|r| r);
        if let Err(e) = waited {
            // The topic exists; a slow election only risks a partial result later.
            warn!(topic = %topic.name, error = %e, "topic created but leaders not confirmed");
        }
        Ok(status)
    }

    async fn producer(&self) -> Result<Box<dyn QueueProducer>, ProbeError> {
        let timeout = self.cfg.admin_timeout();
        let producer: FutureProducer = self
            .client_config()
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .create()
            .map_err(ProbeError::connection)?;

        let check = producer.clone();
        tokio::task::spawn_blocking(move || check.client().fetch_metadata(None, timeout).map(|_| ()))
            .await
            .map_err(ProbeError::connection)?
            .map_err(|e| ProbeError::connection(format!("kafka unreachable: {e}")))?;

        Ok(Box::new(KafkaProducer { producer, timeout }))
    }

    async fn subscribe(
        &self,
        group_id: &str,
        topic: &str,
    ) -> Result<Box<dyn QueueConsumer>, ProbeError> {
        let consumer: StreamConsumer = self
            .client_config()
            .set("group.id", group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .create()
            .map_err(ProbeError::connection)?;
        consumer.subscribe(&[topic])?;
        debug!(%group_id, %topic, "consumer subscribed");
        Ok(Box::new(KafkaConsumer { consumer }))
    }
}

/// Poll topic metadata until every partition reports a leader or `budget` runs out.
/// Each metadata request only gets what is left of `budget`.
fn wait_for_leaders(
    admin: &AdminClient<DefaultClientContext>,
    topic: &str,
    budget: Duration,
) -> Result<(), ProbeError> {
    let deadline = Instant::now() + budget;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ProbeError::Timeout {
                what: "kafka leader election",
                after: budget,
            });
        }
        let metadata = admin.inner().fetch_metadata(Some(topic), remaining)?;
        let ready = metadata
            .topics()
            .iter()
            .find(|t| t.name() == topic)
            .is_some_and(|t| {
                t.error().is_none()
                    && !t.partitions().is_empty()
                    && t.partitions()
                        .iter()
                        .all(|p| p.leader() >= 0 && p.error().is_none())
            });
        if ready {
            return Ok(());
        }
        std::thread::sleep(METADATA_POLL.min(deadline.saturating_duration_since(Instant::now())));
    }
}

struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

#[async_trait]
impl QueueProducer for KafkaProducer {
    async fn send(&mut self, topic: &str, key: &str, value: &str) -> Result<(), ProbeError> {
        let record = FutureRecord::to(topic).key(key).payload(value);
        self.producer
            .send(record, Timeout::After(self.timeout))
            .await
            .map_err(|(e, _)| ProbeError::operation(format!("produce failed: {e}")))?;
        Ok(())
    }

    async fn disconnect(self: Box<Self>) {
        let producer = self.producer;
        let flushed = tokio::task::spawn_blocking(move || producer.flush(PRODUCER_FLUSH)).await;
        match flushed {
            Ok(Ok(())) => debug!("kafka producer disconnected"),
            Ok(Err(e)) => warn!(error = %e, "kafka producer flush failed"),
            Err(e) => warn!(error = %e, "kafka producer shutdown task failed"),
        }
    }
}

struct KafkaConsumer {
    consumer: StreamConsumer,
}

#[async_trait]
impl QueueConsumer for KafkaConsumer {
    async fn next_message(&mut self) -> Result<ReceivedMessage, ProbeError> {
        let message = self.consumer.recv().await?;
        Ok(ReceivedMessage {
            key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
            value: message.payload().map(|v| String::from_utf8_lossy(v).into_owned()),
            partition: message.partition(),
            offset: message.offset(),
        })
    }

    async fn disconnect(self: Box<Self>) {
        let consumer = self.consumer;
        // Dropping the consumer leaves the group, which waits on the coordinator.
        let closed = tokio::task::spawn_blocking(move || {
            consumer.unsubscribe();
            drop(consumer);
        })
        .await;
        match closed {
            Ok(()) => debug!("kafka consumer disconnected"),
            Err(e) => warn!(error = %e, "kafka consumer shutdown task failed"),
        }
    }
}
