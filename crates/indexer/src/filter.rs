use std::sync::Arc;

use alloy::primitives::U256;
use vault_common::types::TrackedMarkets;
use vault_decoders::DecodedLog;

/// Why a decoded event was not published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    BelowMinNotional,
    UntrackedMarket,
}

/// Business filtering applied to decoded events before publication.
#[derive(Debug, Clone)]
pub struct EventFilter {
    min_notional: U256,
    markets: Option<Arc<TrackedMarkets>>,
}

impl EventFilter {
    pub fn new(min_notional: U256) -> Self {
        Self {
            min_notional,
            markets: None,
        }
    }

    /// Only admit events whose market is in `markets`. Events without a market id
    /// are unaffected.
    pub fn with_markets(mut self, markets: Arc<TrackedMarkets>) -> Self {
        self.markets = Some(markets);
        self
    }

    pub fn check(&self, decoded: &DecodedLog) -> Result<(), Rejection> {
        if decoded.assets < self.min_notional {
            return Err(Rejection::BelowMinNotional);
        }
        match (&self.markets, &decoded.market_id) {
            (Some(markets), Some(id)) if !markets.contains(id) => Err(Rejection::UntrackedMarket),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use vault_common::types::{EventKind, MarketId, TrackedMarket, WAD};

    use super::*;

    fn decoded(assets: u64, market: Option<&str>) -> DecodedLog {
        DecodedLog {
            kind: EventKind::Supply,
            market_id: market.map(MarketId::new),
            actors: BTreeMap::new(),
            assets: U256::from(assets),
            shares: U256::ZERO,
        }
    }

    #[test]
    fn test_min_notional_is_inclusive() {
        let filter = EventFilter::new(U256::from(10_000_000u64));
        assert_eq!(
            filter.check(&decoded(9_999_999, None)),
            Err(Rejection::BelowMinNotional)
        );
        assert_eq!(filter.check(&decoded(10_000_000, None)), Ok(()));
    }

    #[test]
    fn test_untracked_market_rejected() {
        let markets = Arc::new(TrackedMarkets::new([TrackedMarket {
            market_id: MarketId::new("0xAAAA"),
            loan_asset_symbol: "USDC".to_string(),
            collateral_asset_symbol: "WETH".to_string(),
            liquidation_ltv: WAD,
        }]));
        let filter = EventFilter::new(U256::ZERO).with_markets(markets);

        assert_eq!(filter.check(&decoded(1, Some("aaaa"))), Ok(()));
        assert_eq!(
            filter.check(&decoded(1, Some("0xbbbb"))),
            Err(Rejection::UntrackedMarket)
        );
        // Vault-level events carry no market id
        assert_eq!(filter.check(&decoded(1, None)), Ok(()));
    }
}
