//! Signing through the backend that owns the account

use super::builder::UnsignedTransaction;
use crate::error::{TxError, TxResult};
use crate::wallet::{Account, Passphrase};

use ethers::types::{Bytes, Signature, H256};
use ethers::utils::keccak256;
use tokio::time::Instant;
use tracing::info;

/// Signed transaction with its canonical encoding and hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    unsigned: UnsignedTransaction,
    signature: Signature,
    raw: Bytes,
    hash: H256,
}

impl SignedTransaction {
    pub fn unsigned(&self) -> &UnsignedTransaction {
        &self.unsigned
    }

    #[cfg(test)]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Canonical RLP encoding, as broadcast
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn hash(&self) -> H256 {
        self.hash
    }

    /// `0x`-prefixed hex of the canonical encoding
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.raw))
    }
}

/// Requests signatures from the account's backend
pub struct TransactionSigner {
    deadline: Instant,
}

impl TransactionSigner {
    /// Device confirmation and key decryption must finish before `deadline`
    pub fn new(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub async fn sign(
        &self,
        unsigned: &UnsignedTransaction,
        account: &Account<'_>,
        passphrase: Option<&Passphrase>,
    ) -> TxResult<SignedTransaction> {
        if account.address() != unsigned.from {
            return Err(TxError::Validation(format!(
                "account {:?} cannot sign for {:?}",
                account.address(),
                unsigned.from
            )));
        }

        let typed = unsigned.to_typed();
        let signature = account
            .backend()
            .sign_transaction(account.address(), &typed, passphrase, self.deadline)
            .await?;

        let raw = typed.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        info!("Signed transaction {:?}", hash);

        Ok(SignedTransaction {
            unsigned: unsigned.clone(),
            signature,
            raw,
            hash,
        })
    }
}
