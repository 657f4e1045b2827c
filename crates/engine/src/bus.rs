//! In-process publish/subscribe dispatch.
//!
//! Producers publish a [`BusEvent`]; every handler subscribed to the event's
//! topic is awaited in subscription order. A failing handler is logged and does
//! not prevent delivery to the remaining handlers. If any of the failed handlers
//! is [required](EventHandler::required), `publish` returns an error so the
//! producer can retry the event.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use vault_common::types::{BusEvent, EventTopic};

/// A downstream consumer of published events.
///
/// Delivery is at-least-once: chain events from the cold-start rewind window
/// can be published again, so handlers must be idempotent or de-duplicate on
/// [`ChainEvent::dedup_key`](vault_common::types::ChainEvent::dedup_key).
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a failure must be reported back to the publisher. Durable sinks
    /// return `true` so the event is retried instead of dropped.
    fn required(&self) -> bool {
        false
    }

    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()>;
}

/// A required handler rejected an event.
#[derive(Debug, Error)]
#[error("required handler {handler} failed on {topic}: {source}")]
pub struct DeliveryError {
    pub topic: EventTopic,
    pub handler: &'static str,
    #[source]
    pub source: anyhow::Error,
}

/// Topic → handlers registry. Built before the pipeline starts, then shared read-only.
#[derive(Default)]
pub struct EventBus {
    subscribers: HashMap<EventTopic, Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, topic: EventTopic, handler: Arc<dyn EventHandler>) {
        tracing::debug!(topic = %topic, handler = handler.name(), "Handler subscribed");
        self.subscribers.entry(topic).or_default().push(handler);
    }

    pub fn subscribe_all(
        &mut self,
        topics: impl IntoIterator<Item = EventTopic>,
        handler: Arc<dyn EventHandler>,
    ) {
        for topic in topics {
            self.subscribe(topic, handler.clone());
        }
    }

    /// Deliver `event` to every subscriber of its topic.
    ///
    /// Returns the number of handlers that accepted it, or the first failure of
    /// a required handler. Later handlers still receive the event either way.
    pub async fn publish(&self, event: BusEvent) -> Result<usize, DeliveryError> {
        let topic = event.topic();
        let Some(handlers) = self.subscribers.get(&topic) else {
            tracing::trace!(topic = %topic, "No subscribers for topic");
            return Ok(0);
        };

        let mut delivered = 0;
        let mut failed = None;
        for handler in handlers {
            match handler.handle(&event).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        topic = %topic,
                        handler = handler.name(),
                        required = handler.required(),
                        error = %e,
                        "Event handler failed"
                    );
                    if handler.required() && failed.is_none() {
                        failed = Some(DeliveryError {
                            topic,
                            handler: handler.name(),
                            source: e,
                        });
                    }
                }
            }
        }

        match failed {
            Some(e) => Err(e),
            None => Ok(delivered),
        }
    }

    pub fn subscriber_count(&self, topic: EventTopic) -> usize {
        self.subscribers.get(&topic).map_or(0, Vec::len)
    }
}
