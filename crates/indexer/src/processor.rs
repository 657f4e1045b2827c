//! Event Processor: sweeps one contract's logs from a cursor to the chain head.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};
use alloy::rpc::types::Log;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use thiserror::Error;

use vault_common::types::{
    ActorRole, BusEvent, ChainEvent, EventKind, InboundUserMessage, TrackedMarkets,
};
use vault_decoders::calldata::deposit_message;
use vault_decoders::{DecodedLog, EventDecoder};
use vault_engine::bus::{DeliveryError, EventBus};

use crate::chain::{ChainReadError, ChainReader};
use crate::filter::{EventFilter, Rejection};
use crate::scheduler::PollTask;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub name: String,
    /// Contract whose logs are swept.
    pub address: Address,
    pub poll_interval: Duration,
    /// Blocks re-read behind the head on cold start.
    pub rewind_blocks: u64,
    pub min_notional: U256,
    /// Publish text appended to an admitted deposit's calldata as a user message.
    pub deposit_messages: bool,
    /// Sweeps a deposit's transaction fetch may fail before the deposit is
    /// published without its message.
    pub message_fetch_attempts: u32,
}

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("chain read failed: {0}")]
    Chain(#[from] ChainReadError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub from_block: u64,
    pub to_block: u64,
    pub logs: usize,
    pub published: usize,
    pub filtered: usize,
    pub undecodable: usize,
    pub messages: usize,
}

pub struct EventProcessor<R: ChainReader> {
    config: ProcessorConfig,
    reader: Arc<R>,
    decoder: Box<dyn EventDecoder>,
    bus: Arc<EventBus>,
    filter: EventFilter,
    /// Highest block fully processed. `None` until the first successful sweep.
    cursor: Option<u64>,
    /// Failed transaction fetches per deposit, cleared once the deposit is published.
    message_failures: HashMap<B256, u32>,
}

impl<R: ChainReader> EventProcessor<R> {
    pub fn new(
        config: ProcessorConfig,
        reader: Arc<R>,
        decoder: Box<dyn EventDecoder>,
        bus: Arc<EventBus>,
    ) -> Self {
        let filter = EventFilter::new(config.min_notional);
        Self {
            config,
            reader,
            decoder,
            bus,
            filter,
            cursor: None,
            message_failures: HashMap::new(),
        }
    }

    /// Restrict market-scoped events to `markets`.
    pub fn with_markets(mut self, markets: Arc<TrackedMarkets>) -> Self {
        self.filter = self.filter.with_markets(markets);
        self
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Process every block in `(cursor, latest]`.
    ///
    /// The cursor only advances once the whole range has been published, so a
    /// failed sweep is retried from the same position.
    pub async fn sweep(&mut self) -> Result<SweepReport, SweepError> {
        let latest = self.reader.latest_block_height().await?;

        let cursor = match self.cursor {
            Some(cursor) => cursor,
            None => {
                let baseline = latest.saturating_sub(self.config.rewind_blocks);
                tracing::info!(
                    processor = %self.config.name,
                    latest,
                    baseline,
                    "Cold start, rewinding from chain head"
                );
                self.cursor = Some(baseline);
                baseline
            }
        };

        if latest <= cursor {
            tracing::trace!(processor = %self.config.name, cursor, latest, "No new blocks");
            return Ok(SweepReport {
                from_block: cursor,
                to_block: cursor,
                ..Default::default()
            });
        }

        let from_block = cursor + 1;
        let logs = self
            .reader
            .get_logs(
                self.config.address,
                &self.decoder.event_signatures(),
                from_block,
                latest,
            )
            .await?;

        let mut report = SweepReport {
            from_block,
            to_block: latest,
            logs: logs.len(),
            ..Default::default()
        };

        for log in &logs {
            self.process_log(log, &mut report).await?;
        }

        self.cursor = Some(latest);

        if report.published > 0 || report.undecodable > 0 {
            tracing::info!(
                processor = %self.config.name,
                from_block,
                to_block = latest,
                logs = report.logs,
                published = report.published,
                filtered = report.filtered,
                undecodable = report.undecodable,
                messages = report.messages,
                "Sweep complete"
            );
        } else {
            tracing::debug!(
                processor = %self.config.name,
                from_block,
                to_block = latest,
                logs = report.logs,
                "Sweep complete"
            );
        }

        Ok(report)
    }

    async fn process_log(&mut self, log: &Log, report: &mut SweepReport) -> Result<(), SweepError> {
        let decoded = match self.decoder.decode(&log.inner) {
            Ok(Some(decoded)) => decoded,
            Ok(None) => {
                tracing::debug!(
                    processor = %self.config.name,
                    tx = ?log.transaction_hash,
                    "Skipping log with unrecognized topic"
                );
                return Ok(());
            }
            Err(e) => {
                report.undecodable += 1;
                tracing::warn!(
                    processor = %self.config.name,
                    tx = ?log.transaction_hash,
                    log_index = ?log.log_index,
                    error = %e,
                    "Failed to decode log"
                );
                return Ok(());
            }
        };

        if let Err(rejection) = self.filter.check(&decoded) {
            report.filtered += 1;
            match rejection {
                Rejection::BelowMinNotional => tracing::debug!(
                    processor = %self.config.name,
                    kind = %decoded.kind,
                    assets = %decoded.assets,
                    "Below minimum notional"
                ),
                Rejection::UntrackedMarket => tracing::debug!(
                    processor = %self.config.name,
                    kind = %decoded.kind,
                    market = ?decoded.market_id,
                    "Market not tracked"
                ),
            }
            return Ok(());
        }

        let event = self.chain_event(log, decoded);

        let message = if self.config.deposit_messages && event.event_kind == EventKind::Deposit {
            self.user_message(log, &event).await?
        } else {
            None
        };

        self.bus.publish(BusEvent::Chain(event)).await?;
        report.published += 1;

        if let Some(message) = message {
            self.bus.publish(BusEvent::UserMessage(message)).await?;
            report.messages += 1;
        }
        Ok(())
    }

    fn chain_event(&self, log: &Log, decoded: DecodedLog) -> ChainEvent {
        ChainEvent {
            event_kind: decoded.kind,
            source_contract: self.decoder.source(),
            market_id: decoded.market_id,
            transaction_hash: log
                .transaction_hash
                .map(|hash| format!("{hash:#x}"))
                .unwrap_or_default(),
            block_number: log.block_number.unwrap_or_default(),
            log_index: log.log_index,
            timestamp: block_time(log),
            actor_addresses: decoded.actors,
            asset_amount: decoded.assets.to_string(),
            share_amount: decoded.shares.to_string(),
        }
    }

    /// Message appended to the deposit's calldata.
    ///
    /// Missing transactions, foreign selectors and non-UTF-8 tails yield `None`.
    /// A failed fetch fails the sweep until `message_fetch_attempts` is used up,
    /// then the deposit goes out without its message.
    async fn user_message(
        &mut self,
        log: &Log,
        event: &ChainEvent,
    ) -> Result<Option<InboundUserMessage>, SweepError> {
        let Some(tx_hash) = log.transaction_hash else {
            return Ok(None);
        };
        let tx = match self.reader.get_transaction(tx_hash).await {
            Ok(tx) => {
                self.message_failures.remove(&tx_hash);
                tx
            }
            Err(e) => {
                let attempts = self.message_failures.entry(tx_hash).or_insert(0);
                *attempts += 1;
                if *attempts < self.config.message_fetch_attempts {
                    return Err(e.into());
                }
                self.message_failures.remove(&tx_hash);
                tracing::warn!(
                    processor = %self.config.name,
                    tx = %tx_hash,
                    error = %e,
                    "Giving up on deposit message, publishing deposit without it"
                );
                return Ok(None);
            }
        };
        let Some(tx) = tx else {
            tracing::debug!(tx = %tx_hash, "Deposit transaction not found");
            return Ok(None);
        };
        let Some(message) = deposit_message(&tx.input) else {
            return Ok(None);
        };

        let sender = event
            .actor(ActorRole::Sender)
            .or_else(|| event.actor(ActorRole::Owner))
            .unwrap_or_default()
            .to_string();

        tracing::info!(sender = %sender, tx = %event.transaction_hash, "User message received");

        Ok(Some(InboundUserMessage {
            sender,
            message,
            transaction_hash: event.transaction_hash.clone(),
            block_number: event.block_number,
            timestamp: event.timestamp,
        }))
    }
}

fn block_time(log: &Log) -> DateTime<Utc> {
    log.block_timestamp
        .and_then(|ts| Utc.timestamp_opt(ts as i64, 0).single())
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl<R: ChainReader + 'static> PollTask for EventProcessor<R> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn interval(&self) -> Duration {
        self.config.poll_interval
    }

    async fn tick(&mut self) -> anyhow::Result<()> {
        self.sweep().await?;
        Ok(())
    }
}
