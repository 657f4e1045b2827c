use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, U256};

use vault_common::config::AppConfig;
use vault_common::types::{EventTopic, TrackedMarkets};
use vault_decoders::load_abi;
use vault_decoders::metamorpho::{METAMORPHO_ABI, VaultDecoder};
use vault_decoders::morpho_blue::{MORPHO_BLUE_ABI, MorphoBlueDecoder};
use vault_engine::bus::EventBus;
use vault_engine::handlers::ActivityLogger;
use vault_engine::markets::MorphoApiClient;
use vault_engine::store::EventStore;
use vault_indexer::chain::RpcChainReader;
use vault_indexer::market_state::MarketStateReader;
use vault_indexer::processor::{EventProcessor, ProcessorConfig};
use vault_indexer::retry::RetryPolicy;
use vault_indexer::scheduler::PollScheduler;
use vault_indexer::timer::RiskTicker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vault_indexer=info,vault_engine=info,vault_decoders=debug".into()
            }),
        )
        .json()
        .init();

    tracing::info!("Vault Sentinel indexer starting...");

    let config = AppConfig::from_env()?;
    let reader = Arc::new(RpcChainReader::connect(
        &config.rpc_url,
        config.rpc_timeout(),
    )?);

    let morpho_blue: Address = config.morpho_blue_address.parse()?;
    let vault: Address = config.vault_address.parse()?;

    // Without the allow-list every market's activity would pass, so this is fatal
    let api = MorphoApiClient::new(&config.morpho_api_url, config.chain_id);
    let markets = Arc::new(
        api.vault_allocations(&config.vault_address, &config.loan_asset_address)
            .await?,
    );
    log_market_states(&markets, morpho_blue, vault, &reader).await;

    let mut bus = EventBus::new();
    bus.subscribe_all(
        EventTopic::ALL,
        Arc::new(ActivityLogger::new(markets.clone())),
    );
    match &config.database_url {
        Some(url) => {
            let store = EventStore::connect(url, config.db_max_connections).await?;
            store.migrate().await?;
            bus.subscribe_all(EventTopic::ALL, Arc::new(store));
        }
        None => tracing::warn!("DATABASE_URL not set, events will not be persisted"),
    }
    let bus = Arc::new(bus);

    let morpho_decoder = MorphoBlueDecoder::from_abi_json(&load_abi(
        config.morpho_blue_abi_path.as_deref(),
        MORPHO_BLUE_ABI,
    )?)?;
    let vault_decoder = VaultDecoder::from_abi_json(&load_abi(
        config.vault_abi_path.as_deref(),
        METAMORPHO_ABI,
    )?)?;

    let rewind_blocks = config.effective_rewind_blocks();
    let min_notional = U256::from(config.min_notional);

    let lending_pool = EventProcessor::new(
        ProcessorConfig {
            name: "morpho-blue".to_string(),
            address: morpho_blue,
            poll_interval: Duration::from_secs(config.lending_pool_poll_interval_secs),
            rewind_blocks,
            min_notional,
            deposit_messages: false,
            message_fetch_attempts: config.message_fetch_attempts,
        },
        reader.clone(),
        Box::new(morpho_decoder),
        bus.clone(),
    )
    .with_markets(markets.clone());

    let vault_processor = EventProcessor::new(
        ProcessorConfig {
            name: "metamorpho-vault".to_string(),
            address: vault,
            poll_interval: Duration::from_secs(config.vault_poll_interval_secs),
            rewind_blocks,
            min_notional,
            deposit_messages: true,
            message_fetch_attempts: config.message_fetch_attempts,
        },
        reader.clone(),
        Box::new(vault_decoder),
        bus.clone(),
    );

    let mut scheduler = PollScheduler::new(RetryPolicy {
        max_backoff: config.max_backoff(),
        failure_threshold: config.failure_alert_threshold,
    });
    scheduler.register(Box::new(lending_pool));
    scheduler.register(Box::new(vault_processor));
    scheduler.register(Box::new(RiskTicker::new(
        bus.clone(),
        Duration::from_secs(config.risk_update_interval_secs),
    )));

    tracing::info!(
        markets = markets.len(),
        rewind_blocks,
        "Starting processors"
    );
    scheduler.start();

    let result = tokio::select! {
        result = scheduler.supervise() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
            Ok(())
        }
    };

    scheduler.stop().await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Scheduler exited with error");
    }

    tracing::info!("Vault Sentinel indexer stopped.");
    result
}

async fn log_market_states(
    markets: &TrackedMarkets,
    morpho_blue: Address,
    vault: Address,
    reader: &RpcChainReader,
) {
    let state_reader = MarketStateReader::new(morpho_blue, reader.provider(), reader.timeout());
    for market in markets.iter() {
        let state = match state_reader.market_state(&market.market_id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(
                    market = %market.display_name(),
                    error = %e,
                    "Failed to read market state"
                );
                continue;
            }
        };
        let vault_shares = match state_reader.supply_shares(&market.market_id, vault).await {
            Ok(shares) => shares,
            Err(e) => {
                tracing::warn!(market = %market.display_name(), error = %e, "Failed to read vault position");
                "unknown".to_string()
            }
        };

        tracing::info!(
            market = %market.display_name(),
            supply_assets = state.supply_assets,
            borrow_assets = state.borrow_assets,
            liquidity = state.liquidity,
            utilization_bps = state.utilization_bps(),
            vault_supply_shares = %vault_shares,
            "Tracked market"
        );
    }
}
