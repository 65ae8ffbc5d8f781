// Event bus implementation
use crate::utils::{gen_id, now_ms};
use crate::{HeraldError, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

/// A message travelling on the bus.
///
/// `type` names the message (e.g. `speak`), `data` carries the JSON payload and
/// `context` the routing metadata that replies and forwards inherit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub r#type: String,
    pub timestamp_ms: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl Event {
    pub fn new(msg_type: impl Into<String>, data: Value) -> Self {
        Self {
            id: gen_id(),
            r#type: msg_type.into(),
            timestamp_ms: now_ms(),
            data,
            context: Map::new(),
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    /// Look up a field of the data object
    pub fn data_field(&self, key: &str) -> Option<&Value> {
        self.data.as_object().and_then(|m| m.get(key))
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data_field(key).and_then(Value::as_str)
    }
}

/// Delivery guarantee of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoSLevel {
    /// Drop events when the subscriber lags
    QosRealtime,
    /// Queue events, awaiting capacity when needed
    QosBatched,
    QosBackground,
}

/// Subscription information
#[derive(Debug, Clone)]
struct Subscription {
    id: String,
    event_types: Vec<String>,
    qos: QoSLevel,
    sender: mpsc::Sender<Event>,
}

/// Event bus statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventBusStats {
    pub total_published: u64,
    pub total_delivered: u64,
    pub active_subscriptions: usize,
    pub backlog_size: usize,
    pub dropped_events: u64,
}

/// Event bus core implementation
pub struct EventBus {
    // Topic -> Subscriber list
    subscriptions: Arc<DashMap<String, Vec<Subscription>>>,

    // Statistics
    stats: Arc<DashMap<String, EventBusStats>>,

    // Backpressure threshold
    backpressure_threshold: usize,
}

impl EventBus {
    pub async fn new() -> Result<Self> {
        Ok(Self {
            subscriptions: Arc::new(DashMap::new()),
            stats: Arc::new(DashMap::new()),
            backpressure_threshold: 10_000,
        })
    }

    pub async fn start(&self) -> Result<()> {
        info!("Event Bus started");
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Event Bus shutting down");
        self.subscriptions.clear();
        Ok(())
    }

    /// Publish an event on the topic named by its type
    pub async fn emit(&self, event: Event) -> Result<u64> {
        let topic = event.r#type.clone();
        self.publish(&topic, event).await
    }

    /// Publish event to topic
    pub async fn publish(&self, topic: &str, event: Event) -> Result<u64> {
        debug!("Publishing event {} to topic {}", event.id, topic);

        // Update stats: published and backlog increase
        let current_backlog = self.update_stats_and_get(topic, |stats| {
            stats.total_published += 1;
            stats.backlog_size = stats.backlog_size.saturating_add(1);
            stats.backlog_size
        });
        let over_threshold = current_backlog >= self.backpressure_threshold;

        // Snapshot subscribers so no map guard is held across an await
        let subs: Vec<Subscription> = match self.subscriptions.get(topic) {
            Some(subs) => subs.value().clone(),
            None => {
                debug!("No subscriptions for topic: {}", topic);
                self.update_stats(topic, |stats| {
                    stats.backlog_size = stats.backlog_size.saturating_sub(1);
                });
                return Ok(0);
            }
        };

        let mut delivered = 0;
        let mut dropped = 0;

        for sub in &subs {
            // Check event type filtering
            if !sub.event_types.is_empty() && !sub.event_types.contains(&event.r#type) {
                continue;
            }

            match sub.qos {
                QoSLevel::QosRealtime => {
                    // Realtime mode: drop aggressively when backpressured, and drop on full queue
                    if over_threshold {
                        dropped += 1;
                        continue;
                    }
                    if sub.sender.try_send(event.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        dropped += 1;
                        warn!("Dropped realtime event for subscription {}", sub.id);
                    }
                }
                QoSLevel::QosBatched | QoSLevel::QosBackground => {
                    match sub.sender.send(event.clone()).await {
                        Ok(_) => delivered += 1,
                        Err(_) => {
                            dropped += 1;
                            warn!("Failed to send event to subscription {}", sub.id);
                        }
                    }
                }
            }
        }

        self.update_stats(topic, |stats| {
            stats.total_delivered += delivered;
            stats.dropped_events += dropped;
            stats.backlog_size = stats.backlog_size.saturating_sub(1);
        });

        Ok(delivered)
    }

    /// Subscribe to topic
    pub async fn subscribe(
        &self,
        topic: String,
        event_types: Vec<String>,
        qos: QoSLevel,
    ) -> Result<(String, mpsc::Receiver<Event>)> {
        let subscription_id = format!("sub_{}_{}", topic, gen_id());
        let cap = match qos {
            QoSLevel::QosRealtime => 64,
            QoSLevel::QosBatched => 1024,
            QoSLevel::QosBackground => 4096,
        };
        let (tx, rx) = mpsc::channel(cap);

        let subscription = Subscription {
            id: subscription_id.clone(),
            event_types,
            qos,
            sender: tx,
        };

        self.subscriptions
            .entry(topic.clone())
            .or_default()
            .push(subscription);

        self.update_stats(&topic, |stats| {
            stats.active_subscriptions += 1;
        });

        debug!(
            "Created subscription {} for topic {}",
            subscription_id, topic
        );
        Ok((subscription_id, rx))
    }

    /// Unsubscribe from topic
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        for mut entry in self.subscriptions.iter_mut() {
            let topic = entry.key().clone();
            let before = entry.value().len();
            entry.value_mut().retain(|sub| sub.id != subscription_id);
            let removed = before - entry.value().len();

            if removed > 0 {
                self.update_stats(&topic, |stats| {
                    stats.active_subscriptions =
                        stats.active_subscriptions.saturating_sub(removed);
                });
            }
        }

        debug!("Unsubscribed {}", subscription_id);
        Ok(())
    }

    /// Wait for the next event on `topic`, giving up after `wait`.
    ///
    /// Returns `Ok(None)` when the wait expired.
    pub async fn wait_for(&self, topic: &str, wait: Duration) -> Result<Option<Event>> {
        let (sub_id, mut rx) = self
            .subscribe(topic.to_string(), vec![], QoSLevel::QosBatched)
            .await?;
        let got = match timeout(wait, rx.recv()).await {
            Ok(Some(ev)) => Some(ev),
            Ok(None) => {
                return Err(HeraldError::EventBusError(format!(
                    "subscription to {} closed while waiting",
                    topic
                )))
            }
            Err(_) => None,
        };
        self.unsubscribe(&sub_id).await?;
        Ok(got)
    }

    /// Get stats
    pub fn get_stats(&self, topic: &str) -> Option<EventBusStats> {
        self.stats.get(topic).map(|s| s.clone())
    }

    // Update stats helper function
    fn update_stats<F>(&self, topic: &str, f: F)
    where
        F: FnOnce(&mut EventBusStats),
    {
        let mut entry = self.stats.entry(topic.to_string()).or_default();
        f(entry.value_mut());
    }

    // Update stats and return a value from the closure
    fn update_stats_and_get<F>(&self, topic: &str, f: F) -> usize
    where
        F: FnOnce(&mut EventBusStats) -> usize,
    {
        let mut entry = self.stats.entry(topic.to_string()).or_default();
        f(entry.value_mut())
    }
}
