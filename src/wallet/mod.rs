//! Wallet module - finds the backend holding an address's key material
//!
//! Backends are searched in a fixed order: local keystores (client
//! conventions first, then configured directories), then the hardware hub.

pub mod account;
pub mod hardware;
pub mod keystore;
pub mod layout;

pub use account::{resolve_account, Account};
pub use hardware::{DeviceConnector, HardwareHub, LedgerConnector};
pub use keystore::LocalKeystore;

use crate::chain::{ChainDescriptor, KeystoreSource};
use crate::config::WalletConfig;
use crate::error::{TxError, TxResult};

use ethers::signers::Signer;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature};
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Secret used to unlock a local keystore; never printed
#[derive(Clone)]
pub struct Passphrase(Zeroizing<String>);

impl Passphrase {
    /// `None` for an empty passphrase, which means "not supplied"
    pub fn new(secret: impl Into<String>) -> Option<Self> {
        let secret = Zeroizing::new(secret.into());
        if secret.is_empty() {
            None
        } else {
            Some(Self(secret))
        }
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// A source of key material that can list accounts and sign
#[derive(Debug)]
pub enum WalletBackend {
    LocalKeystore(LocalKeystore),
    HardwareHub(HardwareHub),
}

impl WalletBackend {
    pub fn name(&self) -> String {
        match self {
            WalletBackend::LocalKeystore(ks) => {
                format!("{} keystore ({})", ks.label(), ks.root().display())
            }
            WalletBackend::HardwareHub(_) => "hardware wallet".to_string(),
        }
    }

    pub fn is_hardware(&self) -> bool {
        matches!(self, WalletBackend::HardwareHub(_))
    }

    /// Addresses this backend reports
    pub fn addresses(&self) -> TxResult<Vec<Address>> {
        match self {
            WalletBackend::LocalKeystore(ks) => ks.accounts(),
            WalletBackend::HardwareHub(hub) => Ok(hub.accounts()),
        }
    }

    /// Sign a transaction for `address`.
    ///
    /// Local keystores need the passphrase and re-check it here; hardware
    /// wallets ignore it and block on device confirmation instead.
    pub async fn sign_transaction(
        &self,
        address: Address,
        tx: &TypedTransaction,
        passphrase: Option<&Passphrase>,
        deadline: Instant,
    ) -> TxResult<Signature> {
        match self {
            WalletBackend::LocalKeystore(ks) => {
                let passphrase = passphrase.ok_or(TxError::InvalidPassphrase { address })?;
                let wallet = ks.unlock(address, passphrase, deadline).await?;
                wallet
                    .sign_transaction_sync(tx)
                    .map_err(|e| TxError::Wallet(format!("signing failed: {}", e)))
            }
            WalletBackend::HardwareHub(hub) => hub.sign_transaction(address, tx, deadline).await,
        }
    }

    /// Sign an arbitrary payload with a local key, proving the passphrase
    pub(crate) async fn sign_payload(
        &self,
        address: Address,
        payload: &[u8],
        passphrase: &Passphrase,
        deadline: Instant,
    ) -> TxResult<Signature> {
        match self {
            WalletBackend::LocalKeystore(ks) => {
                let wallet = ks.unlock(address, passphrase, deadline).await?;
                wallet
                    .sign_message(payload)
                    .await
                    .map_err(|_| TxError::InvalidPassphrase { address })
            }
            WalletBackend::HardwareHub(_) => Err(TxError::Hardware(
                "hardware wallets do not sign with a passphrase".to_string(),
            )),
        }
    }
}

/// Backends found for a chain, plus the discovery failures that were reported
#[derive(Debug, Default)]
pub struct BackendSet {
    pub backends: Vec<WalletBackend>,
    pub errors: Vec<TxError>,
}

/// Enumerates key-storage backends for a chain
pub struct WalletLocator {
    config: WalletConfig,
    connector: Box<dyn DeviceConnector>,
}

impl WalletLocator {
    /// Create a locator that reaches hardware wallets over USB
    pub fn new(config: WalletConfig) -> Self {
        Self::with_connector(config, Box::new(LedgerConnector))
    }

    pub fn with_connector(config: WalletConfig, connector: Box<dyn DeviceConnector>) -> Self {
        Self { config, connector }
    }

    /// All backends for the chain, local keystores first.
    ///
    /// A hub that cannot be opened is recorded in `errors` and does not
    /// stop enumeration.
    pub async fn list_backends(&self, chain: &ChainDescriptor) -> BackendSet {
        let mut set = BackendSet {
            backends: self.keystore_backends(chain),
            errors: Vec::new(),
        };

        match self.hardware_backend(chain).await {
            Ok(Some(hub)) => set.backends.push(hub),
            Ok(None) => {}
            Err(e) => {
                warn!("Hardware wallet discovery failed: {}", e);
                set.errors.push(e);
            }
        }

        set
    }

    /// Accounts reported by one backend
    pub fn list_accounts(backend: &WalletBackend) -> TxResult<Vec<Account<'_>>> {
        Ok(backend
            .addresses()?
            .into_iter()
            .map(|address| Account::new(address, backend))
            .collect())
    }

    /// First backend, in search order, holding `address`.
    ///
    /// Every backend is consulted before giving up; a failing backend
    /// counts as "no match" and the first such failure is kept as the
    /// reason in `WalletNotFound`.
    pub async fn find_wallet(
        &self,
        chain: &ChainDescriptor,
        address: Address,
    ) -> TxResult<WalletBackend> {
        let mut first_error: Option<TxError> = None;

        for backend in self.keystore_backends(chain) {
            match backend.addresses() {
                Ok(addresses) if addresses.contains(&address) => {
                    info!("Found {:?} in {}", address, backend.name());
                    return Ok(backend);
                }
                Ok(_) => debug!("{:?} not in {}", address, backend.name()),
                Err(e) => {
                    warn!("Skipping {}: {}", backend.name(), e);
                    first_error.get_or_insert(e);
                }
            }
        }

        match self.hardware_backend(chain).await {
            Ok(Some(hub)) => {
                let holds = hub.addresses().map(|a| a.contains(&address));
                if holds.unwrap_or(false) {
                    info!("Found {:?} on {}", address, hub.name());
                    return Ok(hub);
                }
            }
            Ok(None) => {}
            Err(e) => {
                debug!("Hardware wallet unavailable: {}", e);
                first_error.get_or_insert(e);
            }
        }

        let reason = match first_error {
            Some(e) => e.to_string(),
            None => format!("no backend for {} holds it", chain.name()),
        };
        Err(TxError::WalletNotFound { address, reason })
    }

    fn keystore_backends(&self, chain: &ChainDescriptor) -> Vec<WalletBackend> {
        chain
            .keystores()
            .iter()
            .map(|location| {
                let label = match &location.source {
                    KeystoreSource::Client(client) => client.to_string(),
                    KeystoreSource::Configured => "configured".to_string(),
                };
                WalletBackend::LocalKeystore(LocalKeystore::new(label, location.path.clone()))
            })
            .collect()
    }

    async fn hardware_backend(&self, chain: &ChainDescriptor) -> TxResult<Option<WalletBackend>> {
        if !self.config.hardware_enabled || self.config.usb_wallets == 0 {
            return Ok(None);
        }

        let hub = HardwareHub::discover(
            self.connector.as_ref(),
            chain.chain_id(),
            &self.config.derivation_path,
            self.config.usb_wallets,
        )
        .await?;
        Ok(Some(WalletBackend::HardwareHub(hub)))
    }
}
