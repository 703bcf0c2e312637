//! Hardware wallet hub backend
//!
//! A hub is opened once per invocation: every reported device is unlocked
//! and a bounded number of addresses is derived below the configured path.
//! Signing waits for physical confirmation, bounded by the invocation
//! deadline; dropping the hub releases the device handles.

use crate::error::{TxError, TxResult};

use async_trait::async_trait;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// One derived account on an attached device
#[async_trait]
pub trait DeviceSigner: Send + Sync {
    fn address(&self) -> Address;

    fn derivation_path(&self) -> &str;

    /// Sign after on-device confirmation; a refusal is `SigningDenied`
    async fn sign_transaction(&self, tx: &TypedTransaction) -> TxResult<Signature>;
}

/// Opens attached devices and derives accounts on them
#[async_trait]
pub trait DeviceConnector: Send + Sync {
    async fn open(
        &self,
        chain_id: u64,
        derivation_prefix: &str,
        count: usize,
    ) -> TxResult<Vec<Arc<dyn DeviceSigner>>>;
}

/// Attached hardware wallets and their derived accounts
pub struct HardwareHub {
    devices: Vec<Arc<dyn DeviceSigner>>,
}

impl HardwareHub {
    pub fn new(devices: Vec<Arc<dyn DeviceSigner>>) -> Self {
        Self { devices }
    }

    /// Open the hub through `connector`, deriving `count` accounts
    pub async fn discover(
        connector: &dyn DeviceConnector,
        chain_id: u64,
        derivation_prefix: &str,
        count: usize,
    ) -> TxResult<Self> {
        let devices = connector.open(chain_id, derivation_prefix, count).await?;
        info!("Hardware hub opened with {} derived accounts", devices.len());
        Ok(Self::new(devices))
    }

    pub fn accounts(&self) -> Vec<Address> {
        self.devices.iter().map(|d| d.address()).collect()
    }

    /// Sign with the device holding `address`, waiting at most until `deadline`
    pub async fn sign_transaction(
        &self,
        address: Address,
        tx: &TypedTransaction,
        deadline: Instant,
    ) -> TxResult<Signature> {
        let device = self
            .devices
            .iter()
            .find(|d| d.address() == address)
            .cloned()
            .ok_or_else(|| TxError::AccountNotFound {
                address,
                backend: "hardware".to_string(),
            })?;

        info!(
            "Confirm the transaction on the device ({})",
            device.derivation_path()
        );

        // Device I/O may block its thread, so the wait runs on its own task
        let tx = tx.clone();
        let task = AbortOnDrop(tokio::spawn(async move {
            device.sign_transaction(&tx).await
        }));

        match timeout_at(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(TxError::Internal(format!("device task failed: {}", e))),
            Err(_) => {
                warn!("No device confirmation for {:?} before the deadline", address);
                Err(TxError::Timeout {
                    operation: "device confirmation".to_string(),
                })
            }
        }
    }
}

/// Aborts the signing task when the caller stops waiting for it
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl fmt::Debug for HardwareHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HardwareHub")
            .field("accounts", &self.accounts())
            .finish()
    }
}

impl Drop for HardwareHub {
    fn drop(&mut self) {
        if !self.devices.is_empty() {
            debug!("Releasing {} hardware wallet handles", self.devices.len());
        }
    }
}

/// Ledger devices reached over USB
#[derive(Debug, Default)]
pub struct LedgerConnector;

#[cfg(feature = "ledger")]
mod ledger {
    use super::*;
    use ethers::signers::{HDPath, Ledger, LedgerError, Signer};

    struct LedgerAccount {
        inner: Ledger,
        path: String,
    }

    #[async_trait]
    impl DeviceSigner for LedgerAccount {
        fn address(&self) -> Address {
            self.inner.address()
        }

        fn derivation_path(&self) -> &str {
            &self.path
        }

        async fn sign_transaction(&self, tx: &TypedTransaction) -> TxResult<Signature> {
            self.inner
                .sign_transaction(tx)
                .await
                .map_err(|e| classify(self.address(), e))
        }
    }

    fn classify(address: Address, e: LedgerError) -> TxError {
        let message = e.to_string();
        let lower = message.to_lowercase();
        if lower.contains("6985") || lower.contains("conditions of use") || lower.contains("denied")
        {
            TxError::SigningDenied { address }
        } else {
            TxError::Hardware(message)
        }
    }

    #[async_trait]
    impl DeviceConnector for LedgerConnector {
        async fn open(
            &self,
            chain_id: u64,
            derivation_prefix: &str,
            count: usize,
        ) -> TxResult<Vec<Arc<dyn DeviceSigner>>> {
            let mut accounts: Vec<Arc<dyn DeviceSigner>> = Vec::with_capacity(count);
            for index in 0..count {
                let path = format!("{}/{}", derivation_prefix.trim_end_matches('/'), index);
                match Ledger::new(HDPath::Other(path.clone()), chain_id).await {
                    Ok(inner) => {
                        debug!("Derived {:?} at {}", inner.address(), path);
                        accounts.push(Arc::new(LedgerAccount { inner, path }));
                    }
                    Err(e) if accounts.is_empty() => {
                        return Err(TxError::Hardware(format!("cannot open Ledger: {}", e)))
                    }
                    Err(e) => {
                        warn!("Stopped deriving Ledger accounts at {}: {}", path, e);
                        break;
                    }
                }
            }
            Ok(accounts)
        }
    }
}

#[cfg(not(feature = "ledger"))]
#[async_trait]
impl DeviceConnector for LedgerConnector {
    async fn open(
        &self,
        _chain_id: u64,
        _derivation_prefix: &str,
        _count: usize,
    ) -> TxResult<Vec<Arc<dyn DeviceSigner>>> {
        Err(TxError::Hardware(
            "built without Ledger support (enable the `ledger` feature)".to_string(),
        ))
    }
}
