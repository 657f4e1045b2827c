use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Semantic operation type of a chain event, independent of the emitting contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum EventKind {
    Supply,
    Withdraw,
    Borrow,
    Repay,
    Deposit,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Supply => write!(f, "supply"),
            EventKind::Withdraw => write!(f, "withdraw"),
            EventKind::Borrow => write!(f, "borrow"),
            EventKind::Repay => write!(f, "repay"),
            EventKind::Deposit => write!(f, "deposit"),
        }
    }
}

/// Which tracked contract emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceContract {
    /// The Morpho Blue singleton holding every isolated market.
    LendingPool,
    /// The MetaMorpho vault allocating depositor funds across markets.
    Vault,
}

impl std::fmt::Display for SourceContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceContract::LendingPool => write!(f, "lending-pool"),
            SourceContract::Vault => write!(f, "vault"),
        }
    }
}

/// Role an address plays in an event. Which roles are present depends on the event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Caller,
    OnBehalf,
    Receiver,
    Owner,
    Sender,
}

impl std::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorRole::Caller => write!(f, "caller"),
            ActorRole::OnBehalf => write!(f, "on_behalf"),
            ActorRole::Receiver => write!(f, "receiver"),
            ActorRole::Owner => write!(f, "owner"),
            ActorRole::Sender => write!(f, "sender"),
        }
    }
}

/// Canonical lookup form of a market id: lower-case hex with no `0x` prefix.
///
/// Strips every leading prefix and the whitespace around it, so the function is
/// a fixed point.
pub fn normalize_market_id(raw: &str) -> String {
    let mut id = raw.trim().to_ascii_lowercase();
    while let Some(rest) = id.strip_prefix("0x") {
        id = rest.trim_start().to_string();
    }
    id
}

/// Opaque 32-byte market identifier, always held in normalized form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct MarketId(String);

impl MarketId {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize_market_id(raw.as_ref()))
    }

    /// Normalized hex, without prefix.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `0x`-prefixed form, as expected by RPC calls.
    pub fn to_prefixed(&self) -> String {
        format!("0x{}", self.0)
    }
}

impl From<String> for MarketId {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<MarketId> for String {
    fn from(id: MarketId) -> Self {
        id.0
    }
}

impl std::fmt::Display for MarketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A normalized, protocol-agnostic record of one on-chain occurrence of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub event_kind: EventKind,
    pub source_contract: SourceContract,
    /// Absent for vault-level events.
    pub market_id: Option<MarketId>,
    pub transaction_hash: String,
    pub block_number: u64,
    pub log_index: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub actor_addresses: BTreeMap<ActorRole, String>,
    /// Base-10 integer in the asset's smallest unit.
    pub asset_amount: String,
    /// Base-10 integer share count.
    pub share_amount: String,
}

impl ChainEvent {
    /// Key under which handlers de-duplicate replays of the rewind window.
    pub fn dedup_key(&self) -> (&str, EventKind, Option<u64>) {
        (&self.transaction_hash, self.event_kind, self.log_index)
    }

    pub fn actor(&self, role: ActorRole) -> Option<&str> {
        self.actor_addresses.get(&role).map(String::as_str)
    }
}

/// Free-text message a depositor appended to the calldata of a vault deposit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundUserMessage {
    pub sender: String,
    pub message: String,
    pub transaction_hash: String,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// Publication tag under which bus handlers subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    Chain(EventKind),
    UserMessage,
    RiskUpdate,
}

impl EventTopic {
    /// Every topic the pipeline can publish.
    pub const ALL: [EventTopic; 7] = [
        EventTopic::Chain(EventKind::Supply),
        EventTopic::Chain(EventKind::Withdraw),
        EventTopic::Chain(EventKind::Borrow),
        EventTopic::Chain(EventKind::Repay),
        EventTopic::Chain(EventKind::Deposit),
        EventTopic::UserMessage,
        EventTopic::RiskUpdate,
    ];
}

impl std::fmt::Display for EventTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventTopic::Chain(kind) => write!(f, "{kind}"),
            EventTopic::UserMessage => write!(f, "user_message"),
            EventTopic::RiskUpdate => write!(f, "risk_update"),
        }
    }
}

/// Payload carried by the in-process event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    Chain(ChainEvent),
    UserMessage(InboundUserMessage),
    RiskUpdate { at: DateTime<Utc> },
}

impl BusEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            BusEvent::Chain(event) => EventTopic::Chain(event.event_kind),
            BusEvent::UserMessage(_) => EventTopic::UserMessage,
            BusEvent::RiskUpdate { .. } => EventTopic::RiskUpdate,
        }
    }
}

/// Activity label used when reporting a detected chain event.
pub fn activity_tag(source: SourceContract, kind: EventKind) -> &'static str {
    match (source, kind) {
        (SourceContract::LendingPool, EventKind::Supply) => "morpho_blue_supply_detected",
        (SourceContract::LendingPool, EventKind::Withdraw) => "morpho_blue_withdrawal_detected",
        (SourceContract::LendingPool, EventKind::Borrow) => "morpho_blue_borrow_detected",
        (SourceContract::LendingPool, EventKind::Repay) => "morpho_blue_repay_detected",
        (SourceContract::Vault, EventKind::Deposit) => "morpho_vault_deposit_detected",
        (SourceContract::Vault, EventKind::Withdraw) => "morpho_vault_withdrawal_detected",
        _ => "chain_event_detected",
    }
}

/// 1e18, the scale of liquidation LTV values.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// A market the vault has allocated capital to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedMarket {
    pub market_id: MarketId,
    pub loan_asset_symbol: String,
    pub collateral_asset_symbol: String,
    /// Scaled by 1e18 (1e18 = 100%).
    pub liquidation_ltv: u128,
}

impl TrackedMarket {
    /// LLTV as a whole percentage, rounded half up.
    pub fn ltv_percent(&self) -> u128 {
        self.liquidation_ltv.saturating_mul(100).saturating_add(WAD / 2) / WAD
    }

    pub fn display_name(&self) -> String {
        format!(
            "{}-{} ({}%)",
            self.loan_asset_symbol,
            self.collateral_asset_symbol,
            self.ltv_percent()
        )
    }
}

/// Immutable set of tracked markets, loaded once at startup.
///
/// There is no live invalidation: allocation changes are only picked up on restart.
#[derive(Debug, Clone, Default)]
pub struct TrackedMarkets {
    by_id: HashMap<MarketId, TrackedMarket>,
}

impl TrackedMarkets {
    pub fn new(markets: impl IntoIterator<Item = TrackedMarket>) -> Self {
        Self {
            by_id: markets
                .into_iter()
                .map(|m| (m.market_id.clone(), m))
                .collect(),
        }
    }

    pub fn contains(&self, id: &MarketId) -> bool {
        self.by_id.contains_key(id)
    }

    pub fn get(&self, id: &MarketId) -> Option<&TrackedMarket> {
        self.by_id.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedMarket> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
