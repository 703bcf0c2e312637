//! Transaction assembly: new transactions and fee-bump replacements

use super::gas::{replacement_gas_price, resolve_gas_price};
use super::nonce::resolve_nonce;
use crate::chain::ChainClient;
use crate::error::{TxError, TxResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, TransactionRequest, H256, U256};
use std::sync::Arc;
use tracing::{debug, info};

/// A fully specified legacy transaction, ready for signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub chain_id: u64,
    pub from: Address,
    /// `None` creates a contract
    pub to: Option<Address>,
    pub value: U256,
    pub gas_limit: U256,
    pub gas_price: U256,
    pub nonce: U256,
    pub data: Bytes,
}

impl UnsignedTransaction {
    /// EIP-155 legacy form used for signing and encoding
    pub fn to_typed(&self) -> TypedTransaction {
        let mut tx = TransactionRequest::new()
            .from(self.from)
            .value(self.value)
            .gas(self.gas_limit)
            .gas_price(self.gas_price)
            .nonce(self.nonce)
            .data(self.data.clone())
            .chain_id(self.chain_id);
        if let Some(to) = self.to {
            tx = tx.to(to);
        }
        TypedTransaction::Legacy(tx)
    }
}

/// Parameters of a brand-new transaction; `None` means "ask the node"
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub from: Address,
    pub to: Option<Address>,
    pub value: U256,
    pub gas_limit: U256,
    pub gas_price: Option<U256>,
    pub nonce: Option<U256>,
    pub data: Bytes,
}

impl NewTransaction {
    /// Reject malformed input before any node or wallet is touched
    pub fn validate(&self) -> TxResult<()> {
        if self.gas_limit.is_zero() {
            return Err(TxError::Validation("gas limit must be greater than zero".into()));
        }
        if self.to.is_none() && self.data.is_empty() {
            return Err(TxError::Validation("contract creation requires data".into()));
        }
        Ok(())
    }
}

/// Builds unsigned transactions against a node
pub struct TransactionBuilder {
    client: Arc<dyn ChainClient>,
    chain_id: u64,
}

impl TransactionBuilder {
    pub fn new(client: Arc<dyn ChainClient>, chain_id: u64) -> Self {
        Self { client, chain_id }
    }

    /// Assemble a new transaction, filling nonce and gas price from the node when unset
    pub async fn build_new(&self, request: NewTransaction) -> TxResult<UnsignedTransaction> {
        request.validate()?;

        let nonce = resolve_nonce(self.client.as_ref(), request.from, request.nonce).await?;
        let gas_price = resolve_gas_price(self.client.as_ref(), request.gas_price).await?;

        let tx = UnsignedTransaction {
            chain_id: self.chain_id,
            from: request.from,
            to: request.to,
            value: request.value,
            gas_limit: request.gas_limit,
            gas_price,
            nonce,
            data: request.data,
        };

        debug!("Built transaction {:?}", tx);
        Ok(tx)
    }

    /// Assemble a replacement for a pending transaction.
    ///
    /// Everything but the gas price is copied from the original, including
    /// its nonce; the sender is recovered from the original's signature.
    pub async fn build_replacement(
        &self,
        tx_hash: H256,
        explicit_gas_price: Option<U256>,
    ) -> TxResult<UnsignedTransaction> {
        let original = self
            .client
            .transaction_by_hash(tx_hash)
            .await?
            .ok_or(TxError::TransactionNotFound { tx_hash })?;

        if original.block_number.is_some() {
            return Err(TxError::AlreadyMined { tx_hash });
        }

        let old_price = original
            .gas_price
            .or(original.max_fee_per_gas)
            .ok_or_else(|| {
                TxError::Validation(format!("transaction {:?} carries no gas price", tx_hash))
            })?;
        let gas_price = replacement_gas_price(old_price, explicit_gas_price)?;

        let from = original.recover_from().map_err(|e| {
            TxError::Validation(format!("cannot recover sender of {:?}: {}", tx_hash, e))
        })?;

        info!(
            "Replacing {:?} (nonce {}): gas price {} -> {}",
            tx_hash, original.nonce, old_price, gas_price
        );

        Ok(UnsignedTransaction {
            chain_id: self.chain_id,
            from,
            to: original.to,
            value: original.value,
            gas_limit: original.gas,
            gas_price,
            nonce: original.nonce,
            data: original.input,
        })
    }
}
