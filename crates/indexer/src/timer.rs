use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use vault_common::types::BusEvent;
use vault_engine::bus::EventBus;

use crate::scheduler::PollTask;

/// Publishes a periodic [`BusEvent::RiskUpdate`] so handlers can re-assess
/// market risk without waiting for chain activity.
pub struct RiskTicker {
    bus: Arc<EventBus>,
    interval: Duration,
}

impl RiskTicker {
    pub fn new(bus: Arc<EventBus>, interval: Duration) -> Self {
        Self { bus, interval }
    }
}

#[async_trait]
impl PollTask for RiskTicker {
    fn name(&self) -> &str {
        "risk-ticker"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        let delivered = self.bus.publish(BusEvent::RiskUpdate { at: Utc::now() }).await?;
        tracing::debug!(delivered, "Risk update published");
        Ok(())
    }
}
