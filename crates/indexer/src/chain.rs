//! Chain Reader: the narrow JSON-RPC surface the processors depend on.

use std::future::IntoFuture;
use std::time::Duration;

use alloy::consensus::Transaction as _;
use alloy::primitives::{Address, B256, Bytes};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use async_trait::async_trait;
use thiserror::Error;

/// A failed read against the node. Every variant is retryable; callers decide
/// the retry policy.
#[derive(Debug, Clone, Error)]
pub enum ChainReadError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC call timed out after {0:?}")]
    Timeout(Duration),
}

/// The parts of a transaction the pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInput {
    pub hash: B256,
    pub input: Bytes,
}

/// Read-only access to chain state. Implementations must tolerate concurrent
/// calls from several processors.
#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn latest_block_height(&self) -> Result<u64, ChainReadError>;

    /// Logs emitted by `address` in `[from_block, to_block]` whose topic0 is any of `topics`.
    async fn get_logs(
        &self,
        address: Address,
        topics: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainReadError>;

    /// `Ok(None)` when the node does not know the transaction.
    async fn get_transaction(&self, tx_hash: B256)
    -> Result<Option<TransactionInput>, ChainReadError>;
}

/// [`ChainReader`] over an alloy HTTP provider, with a timeout on every call.
///
/// The HTTP transport issues independent requests, so one reader is shared by
/// all processors.
#[derive(Clone)]
pub struct RpcChainReader {
    provider: DynProvider,
    timeout: Duration,
}

impl RpcChainReader {
    pub fn connect(rpc_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let provider = ProviderBuilder::new().connect_http(rpc_url.parse()?).erased();
        Ok(Self { provider, timeout })
    }

    pub fn provider(&self) -> DynProvider {
        self.provider.clone()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn timed<T, E: std::fmt::Display>(
        &self,
        call: impl IntoFuture<Output = Result<T, E>>,
    ) -> Result<T, ChainReadError> {
        with_timeout(self.timeout, call).await
    }
}

/// Await an RPC call for at most `timeout`.
pub async fn with_timeout<T, E: std::fmt::Display>(
    timeout: Duration,
    call: impl IntoFuture<Output = Result<T, E>>,
) -> Result<T, ChainReadError> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result.map_err(|e| ChainReadError::Rpc(e.to_string())),
        Err(_) => Err(ChainReadError::Timeout(timeout)),
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn latest_block_height(&self) -> Result<u64, ChainReadError> {
        self.timed(self.provider.get_block_number()).await
    }

    async fn get_logs(
        &self,
        address: Address,
        topics: &[B256],
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<Log>, ChainReadError> {
        let filter = Filter::new()
            .address(address)
            .event_signature(topics.to_vec())
            .from_block(from_block)
            .to_block(to_block);

        self.timed(self.provider.get_logs(&filter)).await
    }

    async fn get_transaction(
        &self,
        tx_hash: B256,
    ) -> Result<Option<TransactionInput>, ChainReadError> {
        let tx = self
            .timed(self.provider.get_transaction_by_hash(tx_hash))
            .await?;

        Ok(tx.map(|tx| TransactionInput {
            hash: tx_hash,
            input: tx.input().clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_stalled_call_times_out() {
        let stalled = std::future::pending::<Result<u64, String>>();
        let err = with_timeout(Duration::from_secs(30), stalled)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainReadError::Timeout(d) if d == Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_call_error_is_rpc_error() {
        let failed = async { Err::<u64, _>("execution reverted") };
        let err = with_timeout(Duration::from_secs(30), failed)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainReadError::Rpc(msg) if msg == "execution reverted"));
    }
}
