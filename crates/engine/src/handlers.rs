use std::sync::Arc;

use async_trait::async_trait;

use vault_common::types::{BusEvent, ChainEvent, TrackedMarkets, activity_tag};

use crate::bus::EventHandler;

/// Reports every published event as a structured activity log line.
pub struct ActivityLogger {
    markets: Arc<TrackedMarkets>,
}

impl ActivityLogger {
    pub fn new(markets: Arc<TrackedMarkets>) -> Self {
        Self { markets }
    }

    /// Display name of the event's market, if it is tracked.
    pub fn market_label(&self, event: &ChainEvent) -> Option<String> {
        let id = event.market_id.as_ref()?;
        Some(
            self.markets
                .get(id)
                .map(|m| m.display_name())
                .unwrap_or_else(|| id.to_string()),
        )
    }
}

#[async_trait]
impl EventHandler for ActivityLogger {
    fn name(&self) -> &'static str {
        "activity-logger"
    }

    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
        match event {
            BusEvent::Chain(chain) => {
                tracing::info!(
                    activity = activity_tag(chain.source_contract, chain.event_kind),
                    market = self.market_label(chain).as_deref().unwrap_or("-"),
                    assets = %chain.asset_amount,
                    shares = %chain.share_amount,
                    tx_hash = %chain.transaction_hash,
                    block = chain.block_number,
                    "Chain event detected"
                );
            }
            BusEvent::UserMessage(message) => {
                tracing::info!(
                    activity = "message_received",
                    sender = %message.sender,
                    tx_hash = %message.transaction_hash,
                    chars = message.message.chars().count(),
                    "Inbound user message"
                );
            }
            BusEvent::RiskUpdate { at } => {
                tracing::info!(activity = "periodic_analysis_started", at = %at, "Risk update due");
            }
        }
        Ok(())
    }
}
