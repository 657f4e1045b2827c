pub mod calldata;
pub mod metamorpho;
pub mod morpho_blue;


use std::collections::{BTreeMap, HashMap};

use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, B256, Log, U256};
use thiserror::Error;
use vault_common::types::{ActorRole, EventKind, MarketId, SourceContract};

/// A log decoded into its typed fields, before provenance is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLog {
    pub kind: EventKind,
    pub market_id: Option<MarketId>,
    pub actors: BTreeMap<ActorRole, String>,
    pub assets: U256,
    pub shares: U256,
}

/// A log whose topic0 is known but whose layout does not match the ABI.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("{event}: missing topic {index}")]
    MissingTopic { event: &'static str, index: usize },

    #[error("{event}: data too short ({actual} bytes, need {expected})")]
    ShortData {
        event: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Failure to build a decoder from its ABI definition.
#[derive(Debug, Error)]
pub enum AbiError {
    #[error("invalid ABI JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("failed to read ABI file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("{contract} ABI has no event {signature}")]
    MissingEvent {
        contract: &'static str,
        signature: &'static str,
    },
}

pub type DecodeFn = fn(&Log) -> Result<DecodedLog, DecodeError>;

/// An event layout a decoder knows how to read.
#[derive(Clone, Copy)]
pub struct KnownEvent {
    pub name: &'static str,
    pub signature: &'static str,
    pub decode: DecodeFn,
}

/// topic0 → event lookup table, resolved once from a contract ABI.
pub struct SignatureTable {
    contract: &'static str,
    entries: HashMap<B256, KnownEvent>,
}

impl SignatureTable {
    /// Resolve every known event against the ABI.
    ///
    /// Fails if the ABI does not declare an event with exactly the signature the
    /// decode function expects.
    pub fn from_abi_json(
        contract: &'static str,
        abi_json: &str,
        known: &[KnownEvent],
    ) -> Result<Self, AbiError> {
        let abi: JsonAbi = serde_json::from_str(abi_json)?;
        let mut entries = HashMap::with_capacity(known.len());

        for event in known {
            let selector = abi
                .events
                .get(event.name)
                .into_iter()
                .flatten()
                .find(|e| e.signature() == event.signature)
                .map(|e| e.selector())
                .ok_or(AbiError::MissingEvent {
                    contract,
                    signature: event.signature,
                })?;
            entries.insert(selector, *event);
        }

        Ok(Self { contract, entries })
    }

    pub fn topics(&self) -> Vec<B256> {
        self.entries.keys().copied().collect()
    }

    /// `Ok(None)` for logs with no topics or an unknown topic0.
    pub fn decode(&self, log: &Log) -> Result<Option<DecodedLog>, DecodeError> {
        let Some(topic0) = log.topics().first() else {
            return Ok(None);
        };
        match self.entries.get(topic0) {
            Some(event) => (event.decode)(log).map(Some),
            None => {
                tracing::trace!(contract = self.contract, topic0 = %topic0, "Unrecognized topic");
                Ok(None)
            }
        }
    }
}

/// Trait implemented by each tracked contract's decoder.
pub trait EventDecoder: Send + Sync {
    /// Which contract this decoder reads.
    fn source(&self) -> SourceContract;

    /// Returns the event topic signatures this decoder handles.
    fn event_signatures(&self) -> Vec<B256>;

    /// Decode a raw log.
    ///
    /// Returns `Ok(None)` for logs this decoder doesn't handle, and an error only
    /// when a recognized event carries malformed data.
    fn decode(&self, log: &Log) -> Result<Option<DecodedLog>, DecodeError>;

    /// Human-readable name for this decoder (e.g., "Morpho Blue").
    fn name(&self) -> &'static str;
}

/// Read an ABI override from disk, falling back to the bundled definition.
pub fn load_abi(path: Option<&str>, bundled: &'static str) -> Result<String, AbiError> {
    match path {
        Some(path) => std::fs::read_to_string(path).map_err(|source| AbiError::Io {
            path: path.to_string(),
            source,
        }),
        None => Ok(bundled.to_string()),
    }
}

pub(crate) fn topic_at(log: &Log, event: &'static str, index: usize) -> Result<B256, DecodeError> {
    log.topics()
        .get(index)
        .copied()
        .ok_or(DecodeError::MissingTopic { event, index })
}

pub(crate) fn word_at(data: &[u8], event: &'static str, index: usize) -> Result<U256, DecodeError> {
    let start = index * 32;
    let bytes: [u8; 32] = data
        .get(start..start + 32)
        .and_then(|w| w.try_into().ok())
        .ok_or(DecodeError::ShortData {
            event,
            expected: start + 32,
            actual: data.len(),
        })?;
    Ok(U256::from_be_bytes(bytes))
}

/// Lower-case, `0x`-prefixed address from a left-padded 32-byte word.
pub(crate) fn address_from_word(word: &[u8]) -> String {
    format!("{:#x}", Address::from_slice(&word[12..32]))
}

pub(crate) fn address_topic(
    log: &Log,
    event: &'static str,
    index: usize,
) -> Result<String, DecodeError> {
    topic_at(log, event, index).map(|t| address_from_word(t.as_slice()))
}

pub(crate) fn address_data(
    data: &[u8],
    event: &'static str,
    index: usize,
) -> Result<String, DecodeError> {
    word_at(data, event, index).map(|w| address_from_word(&w.to_be_bytes::<32>()))
}
