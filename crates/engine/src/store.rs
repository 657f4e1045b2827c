use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use vault_common::error::AppError;
use vault_common::types::{BusEvent, ChainEvent, InboundUserMessage};

use crate::bus::EventHandler;

/// Durable event store backed by PostgreSQL.
///
/// Inserts are idempotent: replays of the cold-start rewind window hit the
/// unique keys and are ignored.
pub struct EventStore {
    pool: PgPool,
}

impl EventStore {
    /// Connect a pool of at most `max_connections`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(std::time::Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// Returns `false` when the event was already stored.
    pub async fn persist_chain_event(&self, event: &ChainEvent) -> Result<bool, AppError> {
        let actors = serde_json::to_value(&event.actor_addresses)
            .map_err(|e| AppError::Decode(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO chain_events (transaction_hash, event_kind, log_index, source_contract, market_id,
                                      block_number, block_timestamp, actor_addresses, asset_amount, share_amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9::numeric, $10::numeric)
            ON CONFLICT (transaction_hash, event_kind, log_index) DO NOTHING
            "#,
        )
        .bind(&event.transaction_hash)
        .bind(event.event_kind.to_string())
        .bind(event.log_index.map(|i| i as i64).unwrap_or(-1))
        .bind(event.source_contract.to_string())
        .bind(event.market_id.as_ref().map(|id| id.as_str()))
        .bind(event.block_number as i64)
        .bind(event.timestamp)
        .bind(actors)
        .bind(&event.asset_amount)
        .bind(&event.share_amount)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Returns `false` when a message for the transaction was already stored.
    pub async fn persist_user_message(&self, message: &InboundUserMessage) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_messages (transaction_hash, sender, message, block_number, block_timestamp)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (transaction_hash) DO NOTHING
            "#,
        )
        .bind(&message.transaction_hash)
        .bind(&message.sender)
        .bind(&message.message)
        .bind(message.block_number as i64)
        .bind(message.timestamp)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl EventHandler for EventStore {
    fn name(&self) -> &'static str {
        "event-store"
    }

    fn required(&self) -> bool {
        true
    }

    async fn handle(&self, event: &BusEvent) -> anyhow::Result<()> {
        let inserted = match event {
            BusEvent::Chain(chain) => self.persist_chain_event(chain).await?,
            BusEvent::UserMessage(message) => self.persist_user_message(message).await?,
            BusEvent::RiskUpdate { .. } => return Ok(()),
        };
        if !inserted {
            tracing::debug!(topic = %event.topic(), "Duplicate event ignored");
        }
        Ok(())
    }
}
