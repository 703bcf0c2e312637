//! Error types for txsend

use ethers::types::{Address, H256, U256};
use thiserror::Error;

/// Main error type for the resolve/sign/submit pipeline
#[derive(Error, Debug)]
pub enum TxError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported operating system: {0}")]
    UnsupportedPlatform(String),

    #[error("No wallet found for {address:?}: {reason}")]
    WalletNotFound { address: Address, reason: String },

    #[error("Account {address:?} not found in {backend}")]
    AccountNotFound { address: Address, backend: String },

    #[error("Invalid passphrase for {address:?}")]
    InvalidPassphrase { address: Address },

    #[error("Signing denied on device for {address:?}")]
    SigningDenied { address: Address },

    #[error("Transaction {tx_hash:?} has already been mined")]
    AlreadyMined { tx_hash: H256 },

    #[error("Transaction {tx_hash:?} not found")]
    TransactionNotFound { tx_hash: H256 },

    #[error("Gas price must be more than {minimum} wei (supplied {supplied})")]
    GasPriceTooLow { minimum: U256, supplied: U256 },

    #[error("Keystore error: {0}")]
    Keystore(String),

    #[error("Hardware wallet error: {0}")]
    Hardware(String),

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Transaction rejected: {0}")]
    Rejected(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Interrupted")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TxError {
    /// Process exit code for a pipeline that terminated with this error
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// Check if error came from locating the key material
    pub fn is_resolution_failure(&self) -> bool {
        matches!(
            self,
            TxError::WalletNotFound { .. }
                | TxError::AccountNotFound { .. }
                | TxError::UnsupportedPlatform(_)
        )
    }
}

/// Result type for pipeline operations
pub type TxResult<T> = Result<T, TxError>;
