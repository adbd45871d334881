//! In-memory bus with the same durable/ack/redeliver semantics as the real
//! backend. Backs the test suite and single-process experiments.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::{Acker, Bus, Delivery, Subscription, DEFAULT_MAX_DELIVER};
use crate::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// In-memory durable bus.
///
/// Every published message is retained per subject; durable consumers track a
/// cursor into that log plus an in-flight set. A message whose ack deadline
/// expires is redelivered until the max-deliver budget runs out, then
/// dropped.
#[derive(Clone)]
pub struct MemoryBus {
    state: Arc<Mutex<State>>,
    ack_wait: Duration,
    max_deliver: u32,
}

#[derive(Default)]
struct State {
    logs: HashMap<String, Vec<Bytes>>,
    consumers: HashMap<(String, String), ConsumerState>,
    subscribers: HashMap<String, Vec<mpsc::UnboundedSender<Bytes>>>,
}

#[derive(Default)]
struct ConsumerState {
    cursor: usize,
    redelivery: VecDeque<(Bytes, u32)>,
    inflight: HashMap<u64, Inflight>,
    next_token: u64,
}

struct Inflight {
    payload: Bytes,
    deliveries: u32,
    deadline: Instant,
}

impl MemoryBus {
    pub fn new() -> MemoryBus {
        MemoryBus::with_limits(DEFAULT_MAX_DELIVER as u32, Duration::from_secs(30))
    }

    /// Tunable limits, mostly for redelivery tests.
    pub fn with_limits(max_deliver: u32, ack_wait: Duration) -> MemoryBus {
        MemoryBus {
            state: Arc::new(Mutex::new(State::default())),
            ack_wait,
            max_deliver,
        }
    }

    /// Everything published to `subject` so far, in order.
    pub fn published(&self, subject: &str) -> Vec<Bytes> {
        self.state
            .lock()
            .logs
            .get(subject)
            .cloned()
            .unwrap_or_default()
    }

    fn try_pull(&self, subject: &str, durable: &str) -> Option<(Bytes, u64)> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let log = state.logs.entry(subject.to_string()).or_default();
        let consumer = state
            .consumers
            .entry((subject.to_string(), durable.to_string()))
            .or_default();

        // Requeue expired in-flight messages; drop them once the redelivery
        // budget is exhausted.
        let now = Instant::now();
        let expired: Vec<u64> = consumer
            .inflight
            .iter()
            .filter(|(_, m)| m.deadline <= now)
            .map(|(t, _)| *t)
            .collect();
        for token in expired {
            let msg = consumer.inflight.remove(&token).unwrap();
            if msg.deliveries >= self.max_deliver {
                debug!(subject, durable, "redelivery budget exhausted, dropping message");
                continue;
            }
            consumer.redelivery.push_back((msg.payload, msg.deliveries));
        }

        let (payload, deliveries) = if let Some(entry) = consumer.redelivery.pop_front() {
            entry
        } else if consumer.cursor < log.len() {
            let payload = log[consumer.cursor].clone();
            consumer.cursor += 1;
            (payload, 0)
        } else {
            return None;
        };

        let token = consumer.next_token;
        consumer.next_token += 1;
        consumer.inflight.insert(
            token,
            Inflight {
                payload: payload.clone(),
                deliveries: deliveries + 1,
                deadline: Instant::now() + self.ack_wait,
            },
        );

        Some((payload, token))
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        MemoryBus::new()
    }
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        let mut state = self.state.lock();
        state
            .logs
            .entry(subject.to_string())
            .or_default()
            .push(payload.clone());
        if let Some(senders) = state.subscribers.get_mut(subject) {
            senders.retain(|tx| tx.send(payload.clone()).is_ok());
        }
        Ok(())
    }

    async fn pull(
        &self,
        subject: &str,
        durable: &str,
        max_wait: Duration,
    ) -> Result<Option<Delivery>> {
        let deadline = Instant::now() + max_wait;
        loop {
            if let Some((payload, token)) = self.try_pull(subject, durable) {
                let acker = MemoryAcker {
                    state: Arc::clone(&self.state),
                    subject: subject.to_string(),
                    durable: durable.to_string(),
                    token,
                };
                return Ok(Some(Delivery::new(payload, Box::new(acker))));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<Box<dyn Subscription>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .subscribers
            .entry(subject.to_string())
            .or_default()
            .push(tx);
        Ok(Box::new(MemorySubscription { rx }))
    }
}

struct MemoryAcker {
    state: Arc<Mutex<State>>,
    subject: String,
    durable: String,
    token: u64,
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        let mut state = self.state.lock();
        let consumer = state
            .consumers
            .get_mut(&(self.subject.clone(), self.durable.clone()))
            .ok_or_else(|| Error::Bus("unknown consumer".into()))?;
        consumer.inflight.remove(&self.token);
        Ok(())
    }
}

struct MemorySubscription {
    rx: mpsc::UnboundedReceiver<Bytes>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn next(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}
