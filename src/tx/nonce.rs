//! Nonce selection
//!
//! One transaction per invocation, so there is no local nonce tracking:
//! the node's pending count is authoritative unless overridden.

use crate::chain::ChainClient;
use crate::error::TxResult;

use ethers::types::{Address, U256};
use tracing::debug;

/// Nonce for a new transaction from `address`
pub async fn resolve_nonce(
    client: &dyn ChainClient,
    address: Address,
    explicit: Option<U256>,
) -> TxResult<U256> {
    if let Some(nonce) = explicit {
        debug!("Using explicit nonce {} for {:?}", nonce, address);
        return Ok(nonce);
    }

    let nonce = client.pending_nonce(address).await?;
    debug!("Next pending nonce for {:?}: {}", address, nonce);
    Ok(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::provider::MockChainClient;
    use crate::error::TxError;
    use mockall::predicate::eq;

    #[tokio::test]
    async fn test_pending_nonce_from_node() {
        let from = Address::repeat_byte(1);
        let mut client = MockChainClient::new();
        client
            .expect_pending_nonce()
            .with(eq(from))
            .returning(|_| Ok(U256::from(7)));

        assert_eq!(resolve_nonce(&client, from, None).await.unwrap(), U256::from(7));
    }

    #[tokio::test]
    async fn test_explicit_nonce_wins() {
        let mut client = MockChainClient::new();
        client.expect_pending_nonce().never();

        let nonce = resolve_nonce(&client, Address::zero(), Some(U256::from(3)))
            .await
            .unwrap();
        assert_eq!(nonce, U256::from(3));
    }

    #[tokio::test]
    async fn test_node_failure_propagates() {
        let mut client = MockChainClient::new();
        client
            .expect_pending_nonce()
            .returning(|_| Err(TxError::Network("connection refused".into())));

        let result = resolve_nonce(&client, Address::zero(), None).await;
        assert!(matches!(result, Err(TxError::Network(_))));
    }
}
