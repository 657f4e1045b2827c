//! Direct reads of Morpho Blue market and position state.

use std::time::Duration;

use alloy::primitives::{Address, B256};
use alloy::providers::DynProvider;
use alloy::sol;

use vault_common::types::MarketId;

use crate::chain::{ChainReadError, with_timeout};

// Only the view functions we need are defined.
sol! {
    #[sol(rpc)]
    interface IMorphoBlue {
        function market(bytes32 id) external view returns (
            uint128 totalSupplyAssets,
            uint128 totalSupplyShares,
            uint128 totalBorrowAssets,
            uint128 totalBorrowShares,
            uint128 lastUpdate,
            uint128 fee
        );

        function position(bytes32 id, address user) external view returns (
            uint256 supplyShares,
            uint128 borrowShares,
            uint128 collateral
        );
    }
}

/// Totals of one market, in loan-asset units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketState {
    pub supply_assets: u128,
    pub borrow_assets: u128,
    pub liquidity: u128,
}

impl MarketState {
    pub fn new(supply_assets: u128, borrow_assets: u128) -> Self {
        Self {
            supply_assets,
            borrow_assets,
            liquidity: supply_assets.saturating_sub(borrow_assets),
        }
    }

    /// Borrowed share of supply in basis points.
    pub fn utilization_bps(&self) -> u128 {
        if self.supply_assets == 0 {
            return 0;
        }
        self.borrow_assets.saturating_mul(10_000) / self.supply_assets
    }
}

/// Reader for the Morpho Blue singleton's market and position views.
///
/// Every call is bounded by the same timeout as the chain reader.
pub struct MarketStateReader {
    contract: IMorphoBlue::IMorphoBlueInstance<DynProvider>,
    timeout: Duration,
}

impl MarketStateReader {
    pub fn new(morpho_blue: Address, provider: DynProvider, timeout: Duration) -> Self {
        Self {
            contract: IMorphoBlue::new(morpho_blue, provider),
            timeout,
        }
    }

    pub async fn market_state(&self, id: &MarketId) -> Result<MarketState, ChainReadError> {
        let market =
            with_timeout(self.timeout, self.contract.market(market_key(id)?).call()).await?;

        Ok(MarketState::new(
            market.totalSupplyAssets,
            market.totalBorrowAssets,
        ))
    }

    /// Supply shares `holder` owns in the market.
    pub async fn supply_shares(
        &self,
        id: &MarketId,
        holder: Address,
    ) -> Result<String, ChainReadError> {
        let position = with_timeout(
            self.timeout,
            self.contract.position(market_key(id)?, holder).call(),
        )
        .await?;

        Ok(position.supplyShares.to_string())
    }
}

fn market_key(id: &MarketId) -> Result<B256, ChainReadError> {
    id.to_prefixed()
        .parse()
        .map_err(|_| ChainReadError::Rpc(format!("market id {id} is not 32 bytes of hex")))
}
