//! Contains the [`AlloyChainProvider`].

use crate::classify;
use alloy_consensus::Transaction as ConsensusTx;
use alloy_eips::BlockNumberOrTag;
use alloy_network::{Ethereum, TransactionResponse as _};
use alloy_provider::{Provider, RootProvider};
use async_trait::async_trait;
use std::{future::Future, time::Duration};
use tracing::trace;
use txsweep_core::{BlockTxHashes, ChainProvider, RpcError, TxHash, TxRecord};
use url::Url;

/// A [`ChainProvider`] that reads blocks and transactions over JSON-RPC.
///
/// Blocks are requested with transaction hashes only; transactions are requested one by one.
#[derive(Debug, Clone)]
pub struct AlloyChainProvider {
    inner: RootProvider<Ethereum>,
    request_timeout: Duration,
}

impl AlloyChainProvider {
    /// Default per request timeout.
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Creates a new [`AlloyChainProvider`] over an existing alloy provider.
    pub const fn new(inner: RootProvider<Ethereum>, request_timeout: Duration) -> Self {
        Self { inner, request_timeout }
    }

    /// Creates a new [`AlloyChainProvider`] talking HTTP to `url`.
    pub fn new_http(url: Url, request_timeout: Duration) -> Self {
        Self::new(RootProvider::new_http(url), request_timeout)
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, RpcError>
    where
        F: Future<Output = Result<T, RpcError>>,
    {
        tokio::time::timeout(self.request_timeout, call).await.map_err(|_| RpcError::Timeout)?
    }
}

#[async_trait]
impl ChainProvider for AlloyChainProvider {
    async fn fetch_block(&self, number: u64) -> Result<BlockTxHashes, RpcError> {
        let block = self
            .bounded(async {
                self.inner
                    .get_block_by_number(BlockNumberOrTag::Number(number))
                    .await
                    .map_err(classify)
            })
            .await?
            .ok_or(RpcError::NotFound)?;

        if block.header.number != number {
            return Err(RpcError::Malformed(format!(
                "requested block {number}, node returned {}",
                block.header.number
            )));
        }

        let hashes: Vec<TxHash> = block.transactions.hashes().collect();
        trace!(target: "providers::alloy", number, txs = hashes.len(), "Fetched block");
        Ok(BlockTxHashes::new(number, hashes))
    }

    async fn fetch_transaction(&self, hash: TxHash) -> Result<TxRecord, RpcError> {
        let tx = self
            .bounded(async { self.inner.get_transaction_by_hash(hash).await.map_err(classify) })
            .await?
            .ok_or(RpcError::NotFound)?;

        Ok(TxRecord {
            hash: tx.tx_hash(),
            value: tx.value(),
            data: tx.input().clone(),
            from: tx.from(),
            to: ConsensusTx::to(&tx),
            nonce: tx.nonce(),
        })
    }
}
