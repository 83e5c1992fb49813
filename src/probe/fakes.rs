//! In-memory stand-ins for the three probe seams, shared by the probe tests.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI32, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::watch;

use super::{
    cache::{CacheClient, CacheSession},
    queue::{QueueBroker, QueueConsumer, QueueProducer, ReceivedMessage, TopicSpec, TopicStatus},
    relational::{Tag, TagStore},
};
use crate::error::ProbeError;

// ---------------------------------------------------------------------------
// Relational
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTagStore {
    next_id: AtomicI32,
    rows: Mutex<HashMap<i32, Tag>>,
}

impl MemoryTagStore {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl TagStore for MemoryTagStore {
    async fn create(&self, name: &str) -> Result<Tag, ProbeError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let tag = Tag { id, name: name.to_string() };
        self.rows.lock().unwrap().insert(id, tag.clone());
        Ok(tag)
    }

    async fn find(&self, id: i32) -> Result<Option<Tag>, ProbeError> {
        Ok(self.rows.lock().unwrap().get(&id).cloned())
    }

    async fn update(&self, id: i32, name: &str) -> Result<Tag, ProbeError> {
        let mut rows = self.rows.lock().unwrap();
        let tag = rows
            .get_mut(&id)
            .ok_or_else(|| ProbeError::operation(format!("no tag {id}")))?;
        tag.name = name.to_string();
        Ok(tag.clone())
    }

    async fn delete(&self, id: i32) -> Result<Tag, ProbeError> {
        self.rows
            .lock()
            .unwrap()
            .remove(&id)
            .ok_or_else(|| ProbeError::operation(format!("no tag {id}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagStep {
    Create,
    Find,
    Update,
    Delete,
}

/// Behaves like [`MemoryTagStore`] until `fail_at`, which returns the stored error.
pub struct FailingTagStore {
    inner: MemoryTagStore,
    fail_at: Option<TagStep>,
    error: Mutex<Option<ProbeError>>,
    missing_on_find: bool,
    calls: Mutex<Vec<TagStep>>,
}

impl FailingTagStore {
    pub fn at(step: TagStep, error: ProbeError) -> Self {
        Self {
            inner: MemoryTagStore::default(),
            fail_at: Some(step),
            error: Mutex::new(Some(error)),
            missing_on_find: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn missing_on_find() -> Self {
        Self {
            inner: MemoryTagStore::default(),
            fail_at: None,
            error: Mutex::new(None),
            missing_on_find: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<TagStep> {
        self.calls.lock().unwrap().clone()
    }

    fn enter(&self, step: TagStep) -> Result<(), ProbeError> {
        self.calls.lock().unwrap().push(step);
        if self.fail_at == Some(step) {
            let err = self.error.lock().unwrap().take();
            return Err(err.unwrap_or_else(|| ProbeError::operation("injected failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl TagStore for FailingTagStore {
    async fn create(&self, name: &str) -> Result<Tag, ProbeError> {
        self.enter(TagStep::Create)?;
        self.inner.create(name).await
    }

    async fn find(&self, id: i32) -> Result<Option<Tag>, ProbeError> {
        self.enter(TagStep::Find)?;
        if self.missing_on_find {
            return Ok(None);
        }
        self.inner.find(id).await
    }

    async fn update(&self, id: i32, name: &str) -> Result<Tag, ProbeError> {
        self.enter(TagStep::Update)?;
        self.inner.update(id, name).await
    }

    async fn delete(&self, id: i32) -> Result<Tag, ProbeError> {
        self.enter(TagStep::Delete)?;
        self.inner.delete(id).await
    }
}

/// Hangs for `delay` on create, as a store behind a stalled network would.
pub struct SlowTagStore {
    delay: Duration,
    inner: MemoryTagStore,
}

impl SlowTagStore {
    pub fn new(delay: Duration) -> Self {
        Self { delay, inner: MemoryTagStore::default() }
    }
}

#[async_trait]
impl TagStore for SlowTagStore {
    async fn create(&self, name: &str) -> Result<Tag, ProbeError> {
        tokio::time::sleep(self.delay).await;
        self.inner.create(name).await
    }

    async fn find(&self, id: i32) -> Result<Option<Tag>, ProbeError> {
        self.inner.find(id).await
    }

    async fn update(&self, id: i32, name: &str) -> Result<Tag, ProbeError> {
        self.inner.update(id, name).await
    }

    async fn delete(&self, id: i32) -> Result<Tag, ProbeError> {
        self.inner.delete(id).await
    }
}

/// Breaks the probe contract by panicking on the first call.
pub struct PanickingTagStore;

#[async_trait]
impl TagStore for PanickingTagStore {
    async fn create(&self, _name: &str) -> Result<Tag, ProbeError> {
        panic!("store exploded");
    }

    async fn find(&self, _id: i32) -> Result<Option<Tag>, ProbeError> {
        unreachable!()
    }

    async fn update(&self, _id: i32, _name: &str) -> Result<Tag, ProbeError> {
        unreachable!()
    }

    async fn delete(&self, _id: i32) -> Result<Tag, ProbeError> {
        unreachable!()
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum CacheBehaviour {
    Healthy,
    /// `get` always returns this value.
    Stale(String),
    /// `get` always returns nothing.
    Forgetful,
    Unreachable,
    WriteRejected,
}

pub struct FakeCache {
    behaviour: CacheBehaviour,
    data: Arc<Mutex<HashMap<String, String>>>,
    last_ttl: Arc<Mutex<Option<Duration>>>,
    closed: Arc<AtomicUsize>,
}

impl FakeCache {
    pub fn new(behaviour: CacheBehaviour) -> Self {
        Self {
            behaviour,
            data: Arc::default(),
            last_ttl: Arc::default(),
            closed: Arc::default(),
        }
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn last_ttl(&self) -> Option<Duration> {
        *self.last_ttl.lock().unwrap()
    }
}

#[async_trait]
impl CacheClient for FakeCache {
    async fn connect(&self) -> Result<Box<dyn CacheSession>, ProbeError> {
        if matches!(self.behaviour, CacheBehaviour::Unreachable) {
            return Err(ProbeError::connection("Connection refused (os error 111)"));
        }
        Ok(Box::new(FakeCacheSession {
            behaviour: self.behaviour.clone(),
            data: Arc::clone(&self.data),
            last_ttl: Arc::clone(&self.last_ttl),
            closed: Arc::clone(&self.closed),
        }))
    }
}

struct FakeCacheSession {
    behaviour: CacheBehaviour,
    data: Arc<Mutex<HashMap<String, String>>>,
    last_ttl: Arc<Mutex<Option<Duration>>>,
    closed: Arc<AtomicUsize>,
}

#[async_trait]
impl CacheSession for FakeCacheSession {
    async fn set_ex(&mut self, key: &str, value: &str, ttl: Duration) -> Result<(), ProbeError> {
        if matches!(self.behaviour, CacheBehaviour::WriteRejected) {
            return Err(ProbeError::operation("READONLY You can't write against a read only replica."));
        }
        *self.last_ttl.lock().unwrap() = Some(ttl);
        self.data.lock().unwrap().insert(key.into(), value.into());
        // Let a concurrent session run between the write and the read.
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn get(&mut self, key: &str) -> Result<Option<String>, ProbeError> {
        Ok(match &self.behaviour {
            CacheBehaviour::Stale(v) => Some(v.clone()),
            CacheBehaviour::Forgetful => None,
            _ => self.data.lock().unwrap().get(key).cloned(),
        })
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerFault {
    None,
    TopicExists,
    AdminDenied,
    Unreachable,
    SubscribeFails,
    SendFails,
    /// Sends report success but the message never reaches the log.
    DropSends,
    /// The first poll of each consumer fails with a recoverable broker error.
    FlakyConsume,
    /// Every poll fails because the consumer lost its connection.
    ConsumerLost,
}

/// Single-partition topic shared by every producer and consumer of the broker.
pub struct FakeBroker {
    fault: BrokerFault,
    log: Arc<watch::Sender<Vec<(String, String)>>>,
    events: Arc<Mutex<Vec<&'static str>>>,
    groups: Mutex<Vec<String>>,
    producer_disconnects: Arc<AtomicUsize>,
    consumer_disconnects: Arc<AtomicUsize>,
    consumer_polls: Arc<AtomicUsize>,
}

impl Default for FakeBroker {
    fn default() -> Self {
        Self::with_fault(BrokerFault::None)
    }
}

impl FakeBroker {
    pub fn with_fault(fault: BrokerFault) -> Self {
        let (tx, _rx) = watch::channel(Vec::new());
        Self {
            fault,
            log: Arc::new(tx),
            events: Arc::default(),
            groups: Mutex::new(Vec::new()),
            producer_disconnects: Arc::default(),
            consumer_disconnects: Arc::default(),
            consumer_polls: Arc::default(),
        }
    }

    /// Append a message as if another producer had published it earlier.
    pub fn preload(&self, key: &str, value: &str) {
        self.log
            .send_modify(|log| log.push((key.to_string(), value.to_string())));
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    pub fn groups(&self) -> Vec<String> {
        self.groups.lock().unwrap().clone()
    }

    pub fn producer_disconnects(&self) -> usize {
        self.producer_disconnects.load(Ordering::SeqCst)
    }

    pub fn consumer_disconnects(&self) -> usize {
        self.consumer_disconnects.load(Ordering::SeqCst)
    }

    /// Calls to `next_message` across every consumer of this broker.
    pub fn consumer_polls(&self) -> usize {
        self.consumer_polls.load(Ordering::SeqCst)
    }

    fn event(&self, name: &'static str) {
        self.events.lock().unwrap().push(name);
    }
}

#[async_trait]
impl QueueBroker for FakeBroker {
    async fn ensure_topic(&self, _topic: &TopicSpec) -> Result<TopicStatus, ProbeError> {
        self.event("ensure_topic");
        match self.fault {
            BrokerFault::TopicExists => Ok(TopicStatus::AlreadyExists),
            BrokerFault::AdminDenied => Err(ProbeError::setup("Broker: Topic authorization failed")),
            BrokerFault::Unreachable => Err(ProbeError::setup("all brokers down")),
            _ => Ok(TopicStatus::Created),
        }
    }

    async fn producer(&self) -> Result<Box<dyn QueueProducer>, ProbeError> {
        self.event("producer");
        if self.fault == BrokerFault::Unreachable {
            return Err(ProbeError::connection("all brokers down"));
        }
        Ok(Box::new(FakeProducer {
            fault: self.fault,
            log: Arc::clone(&self.log),
            events: Arc::clone(&self.events),
            disconnects: Arc::clone(&self.producer_disconnects),
        }))
    }

    async fn subscribe(
        &self,
        group_id: &str,
        _topic: &str,
    ) -> Result<Box<dyn QueueConsumer>, ProbeError> {
        self.event("subscribe");
        if self.fault == BrokerFault::SubscribeFails {
            return Err(ProbeError::connection("group coordinator not available"));
        }
        self.groups.lock().unwrap().push(group_id.to_string());
        Ok(Box::new(FakeConsumer {
            fault: self.fault,
            log: self.log.subscribe(),
            position: 0,
            failed_once: false,
            polls: Arc::clone(&self.consumer_polls),
            disconnects: Arc::clone(&self.consumer_disconnects),
        }))
    }
}

struct FakeProducer {
    fault: BrokerFault,
    log: Arc<watch::Sender<Vec<(String, String)>>>,
    events: Arc<Mutex<Vec<&'static str>>>,
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl QueueProducer for FakeProducer {
    async fn send(&mut self, _topic: &str, key: &str, value: &str) -> Result<(), ProbeError> {
        self.events.lock().unwrap().push("send");
        match self.fault {
            BrokerFault::SendFails => Err(ProbeError::operation("Message production error: MessageSizeTooLarge")),
            BrokerFault::DropSends => Ok(()),
            _ => {
                self.log
                    .send_modify(|log| log.push((key.to_string(), value.to_string())));
                Ok(())
            }
        }
    }

    async fn disconnect(self: Box<Self>) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

struct FakeConsumer {
    fault: BrokerFault,
    log: watch::Receiver<Vec<(String, String)>>,
    position: usize,
    failed_once: bool,
    polls: Arc<AtomicUsize>,
    disconnects: Arc<AtomicUsize>,
}

#[async_trait]
impl QueueConsumer for FakeConsumer {
    async fn next_message(&mut self) -> Result<ReceivedMessage, ProbeError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        match self.fault {
            BrokerFault::FlakyConsume if !self.failed_once => {
                self.failed_once = true;
                return Err(ProbeError::operation("Broker: Unknown topic or partition"));
            }
            BrokerFault::ConsumerLost => {
                return Err(ProbeError::connection("Local: Broker transport failure"));
            }
            _ => {}
        }
        loop {
            {
                let log = self.log.borrow_and_update();
                if let Some((key, value)) = log.get(self.position) {
                    let message = ReceivedMessage {
                        key: Some(key.clone()),
                        value: Some(value.clone()),
                        partition: 0,
                        offset: self.position as i64,
                    };
                    self.position += 1;
                    return Ok(message);
                }
            }
            self.log
                .changed()
                .await
                .map_err(|_| ProbeError::connection("broker gone"))?;
        }
    }

    async fn disconnect(self: Box<Self>) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}
