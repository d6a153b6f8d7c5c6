//! Outbound transaction events.
//!
//! Every committed transaction can be announced to a downstream [`EventSink`].
//! Delivery is retried forever with randomized exponential backoff; callers
//! read [`EventPublisher::in_flight`] to apply backpressure.

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;

use crate::Transaction;

pub const TRANSACTION_CREATED: &str = "transaction.created";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub event_type: String,
    pub owner_id: String,
    pub created_date: DateTime<Utc>,
    pub transaction: Transaction,
}

impl TransactionEvent {
    pub fn created(owner_id: &str, transaction: Transaction) -> Self {
        Self {
            event_type: TRANSACTION_CREATED.to_string(),
            owner_id: owner_id.to_string(),
            created_date: Utc::now(),
            transaction,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("event delivery failed: {0}")]
pub struct SinkError(pub String);

#[async_trait]
pub trait EventSink: Send + Sync + Debug {
    async fn send(&self, event: &TransactionEvent) -> Result<(), SinkError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
    pub max_jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(15),
            max_jitter: Duration::from_millis(500),
        }
    }
}

impl Backoff {
    /// Delay before retry number `attempt` (1-based), jitter excluded.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.initial
            .checked_mul(1_u32 << exponent)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.base_delay(attempt) + Duration::from_millis(jitter)
    }
}

/// Publishes events, retrying each until the sink accepts it.
#[derive(Clone, Debug)]
pub struct EventPublisher {
    sink: Arc<dyn EventSink>,
    backoff: Backoff,
    in_flight: Arc<AtomicUsize>,
}

/// Holds `pending` events in the in-flight count until they are delivered or dropped.
struct InFlight {
    counter: Arc<AtomicUsize>,
    pending: usize,
}

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        Self::enter_many(counter, 1)
    }

    fn enter_many(counter: &Arc<AtomicUsize>, count: usize) -> Self {
        counter.fetch_add(count, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
            pending: count,
        }
    }

    fn delivered_one(&mut self) {
        if self.pending > 0 {
            self.pending -= 1;
            self.counter.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.counter.fetch_sub(self.pending, Ordering::SeqCst);
    }
}

impl EventPublisher {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            backoff: Backoff::default(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Events accepted for delivery but not yet delivered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Deliver one event. Only returns once the sink accepted it.
    pub async fn publish(&self, event: &TransactionEvent) {
        let _guard = InFlight::enter(&self.in_flight);
        self.deliver(event).await;
    }

    async fn deliver(&self, event: &TransactionEvent) {
        let mut attempt = 0_u32;
        loop {
            match self.sink.send(event).await {
                Ok(()) => {
                    tracing::debug!(
                        transaction_id = event.transaction.id.as_str(),
                        attempt,
                        "event delivered"
                    );
                    return;
                }
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    let delay = self.backoff.delay(attempt);
                    tracing::warn!(
                        transaction_id = event.transaction.id.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "{err}, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Deliver events one after another, in order. The whole batch counts
    /// as in flight from the start.
    pub async fn publish_ordered(&self, events: &[TransactionEvent]) {
        let mut guard = InFlight::enter_many(&self.in_flight, events.len());
        for event in events {
            self.deliver(event).await;
            guard.delivered_one();
        }
    }

    /// Deliver events concurrently, in no particular order.
    pub async fn publish_concurrent(&self, events: Vec<TransactionEvent>) {
        let mut tasks = JoinSet::new();
        for event in events {
            let guard = InFlight::enter(&self.in_flight);
            let publisher = self.clone();
            tasks.spawn(async move {
                let _guard = guard;
                publisher.deliver(&event).await;
            });
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                tracing::error!("event publisher task failed: {err}");
            }
        }
    }

    /// Deliver in the background; the returned handle completes on delivery.
    pub fn spawn(&self, event: TransactionEvent) -> tokio::task::JoinHandle<()> {
        let guard = InFlight::enter(&self.in_flight);
        let publisher = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            publisher.deliver(&event).await;
        })
    }
}
