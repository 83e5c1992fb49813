//! Concrete clients for the probed dependencies.
//!
//! Each adapter is built once from [`Config`] at startup and opens its own
//! short-lived connections per probe run, so one run never shares sockets,
//! sessions, or consumer groups with another.

pub mod kafka_broker;
pub mod pg_store;
pub mod redis_cache;

use std::sync::Arc;

use anyhow::Context;

use crate::{
    config::Config,
    probe::{
        cache::CacheProbe,
        queue::{QueueProbe, QueueSettings, TopicSpec},
        relational::RelationalProbe,
        Prober,
    },
};

/// Wire the three probes to the real Postgres, Redis, and Kafka clients.
///
/// Only parses connection settings; nothing here touches the network.
pub fn build_prober(config: &Config) -> anyhow::Result<Prober> {
    let store = pg_store::PgTagStore::connect_lazy(&config.postgres)
        .context("configuring postgres pool")?;
    let cache = redis_cache::RedisCache::new(&config.redis).context("configuring redis client")?;
    let broker = kafka_broker::KafkaBroker::new(&config.kafka);

    let queue_settings = QueueSettings {
        topic: TopicSpec {
            name: config.kafka.topic.clone(),
            partitions: config.kafka.partitions,
            replication_factor: config.kafka.replication_factor,
        },
        group_prefix: config.kafka.group_prefix.clone(),
        consume_timeout: config.kafka.consume_timeout(),
    };

    Ok(Prober::new(
        RelationalProbe::new(Arc::new(store)),
        CacheProbe::new(Arc::new(cache), config.redis.key_prefix.clone(), config.redis.ttl()),
        QueueProbe::new(Arc::new(broker), queue_settings),
    )
    .with_budget(config.server.probe_budget()))
}
