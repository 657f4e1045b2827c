use std::collections::BTreeMap;

use alloy::primitives::{B256, Log};
use vault_common::types::{ActorRole, EventKind, SourceContract};

use crate::{
    AbiError, DecodeError, DecodedLog, EventDecoder, KnownEvent, SignatureTable, address_topic,
    word_at,
};

/// Bundled MetaMorpho (ERC-4626) event ABI.
pub const METAMORPHO_ABI: &str = include_str!("../abis/metamorpho.json");

const DEPOSIT: &str = "Deposit";
const WITHDRAW: &str = "Withdraw";

/// MetaMorpho vault event decoder.
///
/// - `Deposit(address indexed sender, address indexed owner, uint256 assets, uint256 shares)`
/// - `Withdraw(address indexed sender, address indexed receiver, address indexed owner, uint256 assets, uint256 shares)`
pub struct VaultDecoder {
    table: SignatureTable,
}

impl VaultDecoder {
    pub fn new() -> Self {
        Self::from_abi_json(METAMORPHO_ABI).expect("bundled MetaMorpho ABI declares all events")
    }

    pub fn from_abi_json(abi_json: &str) -> Result<Self, AbiError> {
        let known = [
            KnownEvent {
                name: DEPOSIT,
                signature: "Deposit(address,address,uint256,uint256)",
                decode: decode_deposit,
            },
            KnownEvent {
                name: WITHDRAW,
                signature: "Withdraw(address,address,address,uint256,uint256)",
                decode: decode_withdraw,
            },
        ];

        Ok(Self {
            table: SignatureTable::from_abi_json("MetaMorpho", abi_json, &known)?,
        })
    }
}

impl Default for VaultDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDecoder for VaultDecoder {
    fn source(&self) -> SourceContract {
        SourceContract::Vault
    }

    fn event_signatures(&self) -> Vec<B256> {
        self.table.topics()
    }

    fn decode(&self, log: &Log) -> Result<Option<DecodedLog>, DecodeError> {
        self.table.decode(log)
    }

    fn name(&self) -> &'static str {
        "MetaMorpho"
    }
}

fn decode_deposit(log: &Log) -> Result<DecodedLog, DecodeError> {
    let data = log.data.data.as_ref();
    Ok(DecodedLog {
        kind: EventKind::Deposit,
        market_id: None,
        actors: BTreeMap::from([
            (ActorRole::Sender, address_topic(log, DEPOSIT, 1)?),
            (ActorRole::Owner, address_topic(log, DEPOSIT, 2)?),
        ]),
        assets: word_at(data, DEPOSIT, 0)?,
        shares: word_at(data, DEPOSIT, 1)?,
    })
}

fn decode_withdraw(log: &Log) -> Result<DecodedLog, DecodeError> {
    let data = log.data.data.as_ref();
    Ok(DecodedLog {
        kind: EventKind::Withdraw,
        market_id: None,
        actors: BTreeMap::from([
            (ActorRole::Sender, address_topic(log, WITHDRAW, 1)?),
            (ActorRole::Receiver, address_topic(log, WITHDRAW, 2)?),
            (ActorRole::Owner, address_topic(log, WITHDRAW, 3)?),
        ]),
        assets: word_at(data, WITHDRAW, 0)?,
        shares: word_at(data, WITHDRAW, 1)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_signatures() {
        let decoder = VaultDecoder::new();
        assert_eq!(decoder.event_signatures().len(), 2);
        assert_eq!(decoder.source(), SourceContract::Vault);
    }
}
