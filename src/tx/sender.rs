//! Broadcast of signed transactions and confirmation polling

use super::signer::SignedTransaction;
use crate::chain::ChainClient;
use crate::error::{TxError, TxResult};

use ethers::types::{TransactionReceipt, H256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

/// How a send or replacement ended
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Offline mode: the signed encoding, never broadcast
    Serialized(String),
    /// Broadcast and accepted into the node's pool; not awaited
    Submitted(H256),
    MinedSuccess(TransactionReceipt),
    /// Included in a block but reverted
    MinedFailure(TransactionReceipt),
    /// Broadcast, but no receipt before the deadline
    TimedOut(H256),
    /// The node refused the transaction
    Rejected(String),
}

impl SubmissionOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            SubmissionOutcome::Serialized(_)
            | SubmissionOutcome::Submitted(_)
            | SubmissionOutcome::MinedSuccess(_) => 0,
            SubmissionOutcome::MinedFailure(_) | SubmissionOutcome::Rejected(_) => 1,
            SubmissionOutcome::TimedOut(_) => 2,
        }
    }

    pub fn tx_hash(&self) -> Option<H256> {
        match self {
            SubmissionOutcome::Submitted(hash) | SubmissionOutcome::TimedOut(hash) => Some(*hash),
            SubmissionOutcome::MinedSuccess(receipt) | SubmissionOutcome::MinedFailure(receipt) => {
                Some(receipt.transaction_hash)
            }
            SubmissionOutcome::Serialized(_) | SubmissionOutcome::Rejected(_) => None,
        }
    }
}

/// Broadcasts signed transactions and waits for their receipts
pub struct Submitter {
    client: Arc<dyn ChainClient>,
    poll_interval: Duration,
}

impl Submitter {
    pub fn new(client: Arc<dyn ChainClient>, poll_interval: Duration) -> Self {
        Self {
            client,
            poll_interval,
        }
    }

    /// Emit `signed`, then optionally wait for it to be mined.
    ///
    /// `wait_until` is ignored offline, since nothing was broadcast.
    pub async fn submit(
        &self,
        signed: &SignedTransaction,
        offline: bool,
        wait_until: Option<Instant>,
    ) -> TxResult<SubmissionOutcome> {
        let emitted = match self.emit(signed, offline).await {
            Err(TxError::Rejected(message)) => {
                warn!("Node rejected {:?}: {}", signed.hash(), message);
                return Ok(SubmissionOutcome::Rejected(message));
            }
            other => other?,
        };

        match (emitted, wait_until) {
            (SubmissionOutcome::Submitted(hash), Some(deadline)) => {
                self.await_confirmation(hash, deadline).await
            }
            (outcome, _) => Ok(outcome),
        }
    }

    /// Broadcast `signed`, or only serialize it when `offline`
    pub async fn emit(
        &self,
        signed: &SignedTransaction,
        offline: bool,
    ) -> TxResult<SubmissionOutcome> {
        if offline {
            debug!("Offline mode, not broadcasting {:?}", signed.hash());
            return Ok(SubmissionOutcome::Serialized(signed.to_hex()));
        }

        let hash = self.client.send_raw_transaction(signed.raw().clone()).await?;
        if hash != signed.hash() {
            warn!(
                "Node reported hash {:?}, locally computed {:?}",
                hash,
                signed.hash()
            );
        }
        info!("Transaction submitted: {:?}", hash);
        Ok(SubmissionOutcome::Submitted(hash))
    }

    /// Poll for the receipt of `tx_hash` until it appears or `deadline` passes.
    ///
    /// Query failures are logged and polling continues; only the deadline
    /// ends an unanswered wait.
    pub async fn await_confirmation(
        &self,
        tx_hash: H256,
        deadline: Instant,
    ) -> TxResult<SubmissionOutcome> {
        loop {
            match timeout_at(deadline, self.client.transaction_receipt(tx_hash)).await {
                Ok(Ok(Some(receipt))) => return Ok(Self::classify(receipt)),
                Ok(Ok(None)) => debug!("Transaction {:?} pending", tx_hash),
                Ok(Err(e)) => warn!("Receipt query for {:?} failed: {}", tx_hash, e),
                Err(_) => break,
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep_until((now + self.poll_interval).min(deadline)).await;
        }

        warn!("Timed out waiting for {:?}", tx_hash);
        Ok(SubmissionOutcome::TimedOut(tx_hash))
    }

    fn classify(receipt: TransactionReceipt) -> SubmissionOutcome {
        // Pre-Byzantium receipts carry no status; inclusion counts as success
        match receipt.status {
            Some(status) if status.is_zero() => {
                warn!(
                    "Transaction {:?} reverted in block {:?}",
                    receipt.transaction_hash, receipt.block_number
                );
                SubmissionOutcome::MinedFailure(receipt)
            }
            _ => {
                info!(
                    "Transaction {:?} mined in block {:?}",
                    receipt.transaction_hash, receipt.block_number
                );
                SubmissionOutcome::MinedSuccess(receipt)
            }
        }
    }
}
