//! Node RPC client limited to the calls the send pipeline needs

use crate::error::{TxError, TxResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider, RpcError};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;
use tracing::debug;

/// RPC surface consumed by the builder and the submitter
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Fetch a transaction; `block_number` is `None` while it is pending
    async fn transaction_by_hash(&self, tx_hash: H256) -> TxResult<Option<Transaction>>;

    /// Fetch the receipt of a mined transaction
    async fn transaction_receipt(&self, tx_hash: H256) -> TxResult<Option<TransactionReceipt>>;

    /// Next nonce for an address, counting pending transactions
    async fn pending_nonce(&self, address: Address) -> TxResult<U256>;

    /// Gas price suggested by the node
    async fn suggested_gas_price(&self) -> TxResult<U256>;

    /// Broadcast a signed transaction, returning its hash
    async fn send_raw_transaction(&self, raw: Bytes) -> TxResult<H256>;
}

/// HTTP JSON-RPC client with a per-call timeout
pub struct ChainProvider {
    http: Provider<Http>,
    request_timeout: Duration,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(rpc_url: &str, chain_id: u64, request_timeout: Duration) -> TxResult<Self> {
        let http = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| TxError::Config(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;

        debug!("Added HTTP provider for chain {}: {}", chain_id, rpc_url);

        Ok(Self {
            http,
            request_timeout,
        })
    }

    async fn bounded<T, F>(&self, operation: &str, call: F) -> TxResult<T>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match timeout(self.request_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TxError::Network(format!("{} failed: {}", operation, e))),
            Err(_) => Err(TxError::Timeout {
                operation: operation.to_string(),
            }),
        }
    }
}

#[async_trait]
impl ChainClient for ChainProvider {
    async fn transaction_by_hash(&self, tx_hash: H256) -> TxResult<Option<Transaction>> {
        self.bounded("transaction lookup", self.http.get_transaction(tx_hash))
            .await
    }

    async fn transaction_receipt(&self, tx_hash: H256) -> TxResult<Option<TransactionReceipt>> {
        self.bounded("receipt lookup", self.http.get_transaction_receipt(tx_hash))
            .await
    }

    async fn pending_nonce(&self, address: Address) -> TxResult<U256> {
        let block = BlockId::Number(BlockNumber::Pending);
        self.bounded(
            "nonce lookup",
            self.http.get_transaction_count(address, Some(block)),
        )
        .await
    }

    async fn suggested_gas_price(&self) -> TxResult<U256> {
        self.bounded("gas price lookup", self.http.get_gas_price())
            .await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> TxResult<H256> {
        let result = timeout(self.request_timeout, async {
            self.http
                .send_raw_transaction(raw)
                .await
                .map(|pending| pending.tx_hash())
        })
        .await;

        match result {
            Ok(Ok(tx_hash)) => Ok(tx_hash),
            Ok(Err(e)) => Err(classify_send_error(&e)),
            Err(_) => Err(TxError::Timeout {
                operation: "broadcast".to_string(),
            }),
        }
    }
}

/// Node-side refusals (nonce conflicts, underpriced, ...) become `Rejected`;
/// transport failures stay `Network`
fn classify_send_error(e: &ProviderError) -> TxError {
    match RpcError::as_error_response(e) {
        Some(response) => TxError::Rejected(response.message.clone()),
        None => TxError::Network(format!("broadcast failed: {}", e)),
    }
}
