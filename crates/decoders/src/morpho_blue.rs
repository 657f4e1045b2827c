use std::collections::BTreeMap;

use alloy::primitives::{B256, Log};
use vault_common::types::{ActorRole, EventKind, MarketId, SourceContract};

use crate::{
    AbiError, DecodeError, DecodedLog, EventDecoder, KnownEvent, SignatureTable, address_data,
    address_topic, topic_at, word_at,
};

/// Bundled Morpho Blue event ABI.
pub const MORPHO_BLUE_ABI: &str = include_str!("../abis/morpho-blue.json");

const SUPPLY: &str = "Supply";
const WITHDRAW: &str = "Withdraw";
const BORROW: &str = "Borrow";
const REPAY: &str = "Repay";

/// Morpho Blue (lending pool) event decoder.
///
/// Handles the loan-asset flows of every isolated market:
/// - `Supply(Id indexed id, address indexed caller, address indexed onBehalf, uint256 assets, uint256 shares)`
/// - `Withdraw(Id indexed id, address caller, address indexed onBehalf, address indexed receiver, uint256 assets, uint256 shares)`
/// - `Borrow(Id indexed id, address caller, address indexed onBehalf, address indexed receiver, uint256 assets, uint256 shares)`
/// - `Repay(Id indexed id, address indexed caller, address indexed onBehalf, uint256 assets, uint256 shares)`
pub struct MorphoBlueDecoder {
    table: SignatureTable,
}

impl MorphoBlueDecoder {
    pub fn new() -> Self {
        Self::from_abi_json(MORPHO_BLUE_ABI).expect("bundled Morpho Blue ABI declares all events")
    }

    pub fn from_abi_json(abi_json: &str) -> Result<Self, AbiError> {
        let known = [
            KnownEvent {
                name: SUPPLY,
                signature: "Supply(bytes32,address,address,uint256,uint256)",
                decode: decode_supply,
            },
            KnownEvent {
                name: WITHDRAW,
                signature: "Withdraw(bytes32,address,address,address,uint256,uint256)",
                decode: decode_withdraw,
            },
            KnownEvent {
                name: BORROW,
                signature: "Borrow(bytes32,address,address,address,uint256,uint256)",
                decode: decode_borrow,
            },
            KnownEvent {
                name: REPAY,
                signature: "Repay(bytes32,address,address,uint256,uint256)",
                decode: decode_repay,
            },
        ];

        Ok(Self {
            table: SignatureTable::from_abi_json("Morpho Blue", abi_json, &known)?,
        })
    }
}

impl Default for MorphoBlueDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder for MorphoBlueDecoder {
    fn source(&self) -> SourceContract {
        SourceContract::LendingPool
    }

    fn event_signatures(&self) -> Vec<B256> {
        self.table.topics()
    }

    fn decode(&self, log: &Log) -> Result<Option<DecodedLog>, DecodeError> {
        self.table.decode(log)
    }

    fn name(&self) -> &'static str {
        "Morpho Blue"
    }
}

fn market_id(log: &Log, event: &'static str) -> Result<MarketId, DecodeError> {
    topic_at(log, event, 1).map(|t| MarketId::new(alloy::hex::encode(t.as_slice())))
}

/// Supply and Repay share a layout: `caller` and `onBehalf` indexed, amounts in data.
fn decode_caller_indexed(
    log: &Log,
    event: &'static str,
    kind: EventKind,
) -> Result<DecodedLog, DecodeError> {
    let data = log.data.data.as_ref();
    Ok(DecodedLog {
        kind,
        market_id: Some(market_id(log, event)?),
        actors: BTreeMap::from([
            (ActorRole::Caller, address_topic(log, event, 2)?),
            (ActorRole::OnBehalf, address_topic(log, event, 3)?),
        ]),
        assets: word_at(data, event, 0)?,
        shares: word_at(data, event, 1)?,
    })
}

/// Withdraw and Borrow share a layout: `caller` sits in data ahead of the amounts.
fn decode_receiver_indexed(
    log: &Log,
    event: &'static str,
    kind: EventKind,
) -> Result<DecodedLog, DecodeError> {
    let data = log.data.data.as_ref();
    Ok(DecodedLog {
        kind,
        market_id: Some(market_id(log, event)?),
        actors: BTreeMap::from([
            (ActorRole::Caller, address_data(data, event, 0)?),
            (ActorRole::OnBehalf, address_topic(log, event, 2)?),
            (ActorRole::Receiver, address_topic(log, event, 3)?),
        ]),
        assets: word_at(data, event, 1)?,
        shares: word_at(data, event, 2)?,
    })
}

fn decode_supply(log: &Log) -> Result<DecodedLog, DecodeError> {
    decode_caller_indexed(log, SUPPLY, EventKind::Supply)
}

fn decode_repay(log: &Log) -> Result<DecodedLog, DecodeError> {
    decode_caller_indexed(log, REPAY, EventKind::Repay)
}

fn decode_withdraw(log: &Log) -> Result<DecodedLog, DecodeError> {
    decode_receiver_indexed(log, WITHDRAW, EventKind::Withdraw)
}

fn decode_borrow(log: &Log) -> Result<DecodedLog, DecodeError> {
    decode_receiver_indexed(log, BORROW, EventKind::Borrow)
}
