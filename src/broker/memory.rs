//! In-process broker.
//!
//! # Responsibilities
//! - Keep per-topic, per-partition message logs with monotonic offsets
//! - Serve `ConsumerClient` / `ProducerClient` for tests and the demo binary
//! - Send delivery reports asynchronously, like a real broker client
//! - Inject faults: synchronous produce failures, failed or lost deliveries,
//!   and broker-level consumer events

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, Notify};
use tokio::time::{timeout_at, Instant};

use crate::broker::{
    BrokerError, ConsumerClient, DeliveryReport, DeliverySender, Event, Message, ProducerClient,
};
use crate::config::OffsetReset;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Faults {
    produce: VecDeque<BrokerError>,
    delivery: VecDeque<BrokerError>,
    lost_deliveries: usize,
}

struct Shared {
    partitions: i32,
    auto_create_topics: bool,
    max_message_bytes: usize,
    delivery_delay: Mutex<Duration>,
    topics: DashMap<String, Vec<Vec<Message>>>,
    /// Wakes consumers blocked in `poll`.
    arrivals: Notify,
    consumer_events: Mutex<VecDeque<Event>>,
    faults: Mutex<Faults>,
    round_robin: AtomicUsize,
}

impl Shared {
    fn pick_partition(&self, message: &Message) -> i32 {
        if let Some(p) = message.partition {
            if (0..self.partitions).contains(&p) {
                return p;
            }
        }
        if message.key.is_empty() {
            let next = self.round_robin.fetch_add(1, Ordering::Relaxed);
            return (next % self.partitions as usize) as i32;
        }
        let mut hasher = DefaultHasher::new();
        message.key.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as i32
    }

    fn append(&self, mut message: Message) -> Result<Message, BrokerError> {
        let partitions = self.partitions as usize;
        let mut logs = if self.auto_create_topics {
            self.topics
                .entry(message.topic.clone())
                .or_insert_with(|| vec![Vec::new(); partitions])
        } else {
            match self.topics.get_mut(&message.topic) {
                Some(logs) => logs,
                None => return Err(BrokerError::UnknownTopic(message.topic)),
            }
        };

        let partition = self.pick_partition(&message);
        let log = &mut logs[partition as usize];
        message.partition = Some(partition);
        message.offset = Some(log.len() as i64);
        log.push(message.clone());
        drop(logs);

        self.arrivals.notify_waiters();
        Ok(message)
    }
}

/// In-process broker shared by any number of producers and consumers.
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    /// Create a broker with a single partition per topic.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> MemoryBrokerBuilder {
        MemoryBrokerBuilder::default()
    }

    /// Create `topic` with the configured partition count if it does not exist.
    pub fn create_topic(&self, topic: &str) {
        let partitions = self.shared.partitions as usize;
        self.shared
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); partitions]);
    }

    /// New producer with its own default events channel.
    pub fn producer(&self) -> MemoryProducer {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        MemoryProducer {
            shared: self.shared.clone(),
            state: Arc::new(ProducerState {
                in_flight: AtomicUsize::new(0),
                drained: Notify::new(),
            }),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            closed: AtomicBool::new(false),
        }
    }

    /// New consumer subscribed to `topics`.
    pub fn consumer(&self, topics: &[String], reset: OffsetReset) -> MemoryConsumer {
        let mut positions = HashMap::new();
        if reset == OffsetReset::Latest {
            for topic in topics {
                if let Some(logs) = self.shared.topics.get(topic) {
                    for (partition, log) in logs.iter().enumerate() {
                        positions.insert((topic.clone(), partition as i32), log.len() as i64);
                    }
                }
            }
        }
        MemoryConsumer {
            shared: self.shared.clone(),
            topics: topics.to_vec(),
            positions: Mutex::new(positions),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a broker-level event to be returned by the next consumer poll.
    pub fn inject_event(&self, event: Event) {
        lock(&self.shared.consumer_events).push_back(event);
        self.shared.arrivals.notify_waiters();
    }

    /// Make the next `produce` call fail synchronously with `error`.
    pub fn fail_next_produce(&self, error: BrokerError) {
        lock(&self.shared.faults).produce.push_back(error);
    }

    /// Make the next enqueued message fail delivery with `error`.
    pub fn fail_next_delivery(&self, error: BrokerError) {
        lock(&self.shared.faults).delivery.push_back(error);
    }

    /// Drop the next delivery channel without sending a report.
    pub fn lose_next_delivery(&self) {
        lock(&self.shared.faults).lost_deliveries += 1;
    }

    /// Delay every delivery report by `delay`.
    pub fn set_delivery_delay(&self, delay: Duration) {
        *lock(&self.shared.delivery_delay) = delay;
    }

    /// All messages stored for `topic`, partition by partition.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.shared
            .topics
            .get(topic)
            .map(|logs| logs.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`MemoryBroker`].
pub struct MemoryBrokerBuilder {
    partitions: i32,
    auto_create_topics: bool,
    max_message_bytes: usize,
}

impl Default for MemoryBrokerBuilder {
    fn default() -> Self {
        Self {
            partitions: 1,
            auto_create_topics: true,
            max_message_bytes: 1024 * 1024,
        }
    }
}

impl MemoryBrokerBuilder {
    pub fn partitions(mut self, partitions: i32) -> Self {
        self.partitions = partitions.max(1);
        self
    }

    pub fn auto_create_topics(mut self, enabled: bool) -> Self {
        self.auto_create_topics = enabled;
        self
    }

    pub fn max_message_bytes(mut self, max: usize) -> Self {
        self.max_message_bytes = max;
        self
    }

    pub fn build(self) -> MemoryBroker {
        MemoryBroker {
            shared: Arc::new(Shared {
                partitions: self.partitions,
                auto_create_topics: self.auto_create_topics,
                max_message_bytes: self.max_message_bytes,
                delivery_delay: Mutex::new(Duration::ZERO),
                topics: DashMap::new(),
                arrivals: Notify::new(),
                consumer_events: Mutex::new(VecDeque::new()),
                faults: Mutex::new(Faults::default()),
                round_robin: AtomicUsize::new(0),
            }),
        }
    }
}

struct ProducerState {
    in_flight: AtomicUsize,
    drained: Notify,
}

impl ProducerState {
    fn finish_one(&self) {
        if self.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }
}

enum Outcome {
    Report(DeliveryReport),
    Lost,
}

/// Producer handle for a [`MemoryBroker`].
pub struct MemoryProducer {
    shared: Arc<Shared>,
    state: Arc<ProducerState>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<Event>>>,
    closed: AtomicBool,
}

#[async_trait]
impl ProducerClient for MemoryProducer {
    async fn produce(
        &self,
        message: Message,
        delivery: Option<DeliverySender>,
    ) -> Result<(), BrokerError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let (sync_fault, delivery_fault, lost) = {
            let mut faults = lock(&self.shared.faults);
            match faults.produce.pop_front() {
                Some(err) => (Some(err), None, false),
                None => {
                    let lost = faults.lost_deliveries > 0;
                    if lost {
                        faults.lost_deliveries -= 1;
                    }
                    (None, faults.delivery.pop_front(), lost)
                }
            }
        };
        if let Some(err) = sync_fault {
            return Err(err);
        }

        let size = message.body_size();
        if size > self.shared.max_message_bytes {
            return Err(BrokerError::MessageTooLarge {
                size,
                max: self.shared.max_message_bytes,
            });
        }

        let outcome = if lost {
            Outcome::Lost
        } else if let Some(error) = delivery_fault {
            Outcome::Report(DeliveryReport::Failed { message, error })
        } else {
            Outcome::Report(DeliveryReport::Delivered(self.shared.append(message)?))
        };

        self.state.in_flight.fetch_add(1, Ordering::AcqRel);
        let delay = *lock(&self.shared.delivery_delay);
        let state = self.state.clone();
        let events_tx = self.events_tx.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match (outcome, delivery) {
                (Outcome::Lost, delivery) => drop(delivery),
                (Outcome::Report(report), Some(tx)) => {
                    let _ = tx.send(report);
                }
                (Outcome::Report(report), None) => {
                    let _ = events_tx.send(Event::Delivery(report));
                }
            }
            state.finish_one();
        });

        Ok(())
    }

    fn events(&self) -> Option<mpsc::UnboundedReceiver<Event>> {
        lock(&self.events_rx).take()
    }

    async fn flush(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let drained = self.state.drained.notified();
            let remaining = self.state.in_flight.load(Ordering::Acquire);
            if remaining == 0 {
                return 0;
            }
            if timeout_at(deadline, drained).await.is_err() {
                return self.state.in_flight.load(Ordering::Acquire);
            }
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Consumer handle for a [`MemoryBroker`].
pub struct MemoryConsumer {
    shared: Arc<Shared>,
    topics: Vec<String>,
    positions: Mutex<HashMap<(String, i32), i64>>,
    closed: AtomicBool,
}

impl MemoryConsumer {
    fn next_message(&self) -> Option<Message> {
        let mut positions = lock(&self.positions);
        for topic in &self.topics {
            let Some(logs) = self.shared.topics.get(topic) else {
                continue;
            };
            for (partition, log) in logs.iter().enumerate() {
                let position = positions
                    .entry((topic.clone(), partition as i32))
                    .or_insert(0);
                if let Some(message) = log.get(*position as usize) {
                    *position += 1;
                    return Some(message.clone());
                }
            }
        }
        None
    }
}

#[async_trait]
impl ConsumerClient for MemoryConsumer {
    async fn poll(&self, timeout: Duration) -> Option<Event> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return None;
            }
            let arrivals = self.shared.arrivals.notified();
            if let Some(event) = lock(&self.shared.consumer_events).pop_front() {
                return Some(event);
            }
            if let Some(message) = self.next_message() {
                return Some(Event::Message(message));
            }
            if timeout_at(deadline, arrivals).await.is_err() {
                return None;
            }
        }
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
