//! Market-data API client used to discover the markets the vault allocates to.
//!
//! Queried once at startup; the resulting [`TrackedMarkets`] are shared
//! read-only with the processors and refreshed only on restart.

use std::collections::HashMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use vault_common::error::AppError;
use vault_common::types::{MarketId, TrackedMarket, TrackedMarkets};

const GET_VAULT: &str = r#"
query getVault($vaultId: String!, $chainId: Int!) {
    vaultByAddress(address: $vaultId, chainId: $chainId) {
        state {
            allocation {
                market {
                    id
                    uniqueKey
                }
            }
        }
    }
}
"#;

const GET_MARKETS: &str = r#"
query getMarkets($first: Int, $where: MarketFilters) {
    markets(first: $first, where: $where) {
        items {
            id
            uniqueKey
            lltv
            loanAsset {
                symbol
            }
            collateralAsset {
                symbol
            }
        }
    }
}
"#;

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultQuery {
    pub vault_by_address: ApiVault,
}

#[derive(Debug, Deserialize)]
pub struct ApiVault {
    pub state: ApiVaultState,
}

#[derive(Debug, Deserialize)]
pub struct ApiVaultState {
    pub allocation: Vec<ApiAllocation>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAllocation {
    pub market: ApiAllocationMarket,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiAllocationMarket {
    pub id: String,
    pub unique_key: String,
}

#[derive(Debug, Deserialize)]
pub struct MarketsQuery {
    pub markets: ApiMarketPage,
}

#[derive(Debug, Deserialize)]
pub struct ApiMarketPage {
    pub items: Vec<ApiMarket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMarket {
    pub id: String,
    pub unique_key: String,
    /// BigInt scalar; the API has served it both as a number and as a string.
    pub lltv: Value,
    pub loan_asset: ApiAsset,
    pub collateral_asset: Option<ApiAsset>,
}

#[derive(Debug, Deserialize)]
pub struct ApiAsset {
    pub symbol: String,
}

/// GraphQL client for the Morpho market-data API.
pub struct MorphoApiClient {
    http: reqwest::Client,
    url: String,
    chain_id: u64,
}

impl MorphoApiClient {
    pub fn new(url: impl Into<String>, chain_id: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            chain_id,
        }
    }

    async fn query<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, AppError> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AppError::MarketData(e.to_string()))?;

        let body: GraphQlResponse<T> = response
            .json()
            .await
            .map_err(|e| AppError::MarketData(format!("malformed response: {e}")))?;

        if let Some(errors) = body.errors {
            return Err(AppError::MarketData(format!("GraphQL errors: {errors}")));
        }
        body.data
            .ok_or_else(|| AppError::MarketData("response has no data".into()))
    }

    /// Whitelisted markets lending `loan_asset`.
    pub async fn markets(&self, loan_asset: &str) -> Result<Vec<ApiMarket>, AppError> {
        let page: MarketsQuery = self
            .query(
                GET_MARKETS,
                json!({
                    "first": 100,
                    "where": {
                        "loanAssetAddress_in": [loan_asset],
                        "whitelisted": true,
                    },
                }),
            )
            .await?;
        Ok(page.markets.items)
    }

    pub async fn vault(&self, vault_address: &str) -> Result<ApiVault, AppError> {
        let vault: VaultQuery = self
            .query(
                GET_VAULT,
                json!({ "vaultId": vault_address, "chainId": self.chain_id }),
            )
            .await?;
        Ok(vault.vault_by_address)
    }

    /// Markets the vault currently allocates to, keyed by their normalized unique key.
    pub async fn vault_allocations(
        &self,
        vault_address: &str,
        loan_asset: &str,
    ) -> Result<TrackedMarkets, AppError> {
        let vault = self.vault(vault_address).await?;
        let markets = self.markets(loan_asset).await?;
        let tracked = tracked_markets(&vault, &markets);

        tracing::info!(
            vault = vault_address,
            allocations = vault.state.allocation.len(),
            tracked = tracked.len(),
            "Loaded vault allocations"
        );
        Ok(tracked)
    }
}

/// Join the vault's allocations with market metadata.
///
/// Allocations whose market is unknown or has no collateral asset (idle markets)
/// are dropped.
pub fn tracked_markets(vault: &ApiVault, markets: &[ApiMarket]) -> TrackedMarkets {
    let by_id: HashMap<&str, &ApiMarket> = markets.iter().map(|m| (m.id.as_str(), m)).collect();

    TrackedMarkets::new(vault.state.allocation.iter().filter_map(|allocation| {
        let market = by_id.get(allocation.market.id.as_str())?;
        let collateral = market.collateral_asset.as_ref()?;
        let Some(lltv) = scaled_integer(&market.lltv) else {
            tracing::warn!(market = %allocation.market.unique_key, lltv = %market.lltv, "Unparseable LLTV");
            return None;
        };

        Some(TrackedMarket {
            market_id: MarketId::new(&allocation.market.unique_key),
            loan_asset_symbol: market.loan_asset.symbol.clone(),
            collateral_asset_symbol: collateral.symbol.clone(),
            liquidation_ltv: lltv,
        })
    }))
}

fn scaled_integer(value: &Value) -> Option<u128> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .map(u128::from)
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u128)),
        Value::String(s) => s.parse::<u128>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VAULT_JSON: &str = r#"{
        "vaultByAddress": {
            "state": {
                "allocation": [
                    { "market": { "id": "m-1", "uniqueKey": "0xAAAA" }, "supplyAssets": 1000, "supplyCap": 5000 },
                    { "market": { "id": "m-2", "uniqueKey": "0xBBBB" }, "supplyAssets": 0, "supplyCap": 0 },
                    { "market": { "id": "m-3", "uniqueKey": "0xCCCC" }, "supplyAssets": 0, "supplyCap": 0 }
                ]
            }
        }
    }"#;

    const MARKETS_JSON: &str = r#"{
        "markets": {
            "items": [
                {
                    "id": "m-1",
                    "uniqueKey": "0xAAAA",
                    "lltv": "860000000000000000",
                    "loanAsset": { "address": "0x8335", "symbol": "USDC", "decimals": 6 },
                    "collateralAsset": { "address": "0x4200", "symbol": "WETH", "decimals": 18 }
                },
                {
                    "id": "m-2",
                    "uniqueKey": "0xBBBB",
                    "lltv": 0,
                    "loanAsset": { "address": "0x8335", "symbol": "USDC", "decimals": 6 },
                    "collateralAsset": null
                }
            ]
        }
    }"#;

    #[test]
    fn test_tracked_markets_join() {
        let vault: VaultQuery = serde_json::from_str(VAULT_JSON).unwrap();
        let markets: MarketsQuery = serde_json::from_str(MARKETS_JSON).unwrap();

        let tracked = tracked_markets(&vault.vault_by_address, &markets.markets.items);

        // m-2 has no collateral, m-3 is not in the market list
        assert_eq!(tracked.len(), 1);
        let market = tracked.get(&MarketId::new("aaaa")).unwrap();
        assert_eq!(market.display_name(), "USDC-WETH (86%)");
    }

    #[test]
    fn test_scaled_integer_accepts_number_and_string() {
        assert_eq!(scaled_integer(&json!("945000000000000000")), Some(945_000_000_000_000_000));
        assert_eq!(scaled_integer(&json!(770000000000000000u64)), Some(770_000_000_000_000_000));
        assert_eq!(scaled_integer(&json!(null)), None);
        assert_eq!(scaled_integer(&json!("abc")), None);
    }

    #[test]
    fn test_graphql_errors_surface() {
        let body: GraphQlResponse<VaultQuery> =
            serde_json::from_str(r#"{ "data": null, "errors": [{ "message": "not found" }] }"#)
                .unwrap();
        assert!(body.errors.is_some());
        assert!(body.data.is_none());
    }
}
