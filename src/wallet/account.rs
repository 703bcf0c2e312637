//! Account resolution and passphrase verification

use super::{Passphrase, WalletBackend};
use crate::error::{TxError, TxResult};

use ethers::types::Address;
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, info};

/// Fixed public payload signed to prove a passphrase; never transaction data
pub const VERIFICATION_PAYLOAD: [u8; 32] = [0u8; 32];

/// An address bound to the backend that holds its key
#[derive(Clone, Copy)]
pub struct Account<'a> {
    address: Address,
    backend: &'a WalletBackend,
}

impl<'a> Account<'a> {
    pub(crate) fn new(address: Address, backend: &'a WalletBackend) -> Self {
        Self { address, backend }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn backend(&self) -> &'a WalletBackend {
        self.backend
    }
}

impl fmt::Debug for Account<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .field("backend", &self.backend.name())
            .finish()
    }
}

/// Find `address` in `backend` and, when a passphrase is given, prove it unlocks the key.
///
/// Hardware backends skip the check; they confirm on the device at signing time.
pub async fn resolve_account<'a>(
    backend: &'a WalletBackend,
    address: Address,
    passphrase: Option<&Passphrase>,
    deadline: Instant,
) -> TxResult<Account<'a>> {
    // Address equality is on raw bytes, so hex case never matters
    if !backend.addresses()?.contains(&address) {
        return Err(TxError::AccountNotFound {
            address,
            backend: backend.name(),
        });
    }

    match passphrase {
        Some(passphrase) if !backend.is_hardware() => {
            debug!("Verifying passphrase for {:?}", address);
            // Only a failed decryption is a wrong passphrase; I/O and timeouts pass through
            backend
                .sign_payload(address, &VERIFICATION_PAYLOAD, passphrase, deadline)
                .await?;
            info!("Passphrase verified for {:?}", address);
        }
        _ => debug!("Skipping passphrase verification for {:?}", address),
    }

    Ok(Account::new(address, backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::hardware::tests::FakeDevice;
    use crate::wallet::hardware::HardwareHub;
    use crate::wallet::keystore::tests::write_key_file;
    use crate::wallet::LocalKeystore;
    use ethers::signers::{LocalWallet, Signer};
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn keystore_with_key(passphrase: &str) -> (TempDir, WalletBackend, Address) {
        let dir = TempDir::new().unwrap();
        let address = write_key_file(dir.path(), passphrase);
        let backend = WalletBackend::LocalKeystore(LocalKeystore::new("test", dir.path()));
        (dir, backend, address)
    }

    #[tokio::test]
    async fn test_correct_passphrase_resolves() {
        let (_dir, backend, address) = keystore_with_key("correct horse");
        let passphrase = Passphrase::new("correct horse");

        let account = resolve_account(&backend, address, passphrase.as_ref(), deadline())
            .await
            .unwrap();
        assert_eq!(account.address(), address);

        // Only the address and backend name are ever rendered
        let rendered = format!("{:?}", account);
        assert!(rendered.contains("Account"));
        assert!(!rendered.contains("correct horse"));
    }

    #[tokio::test]
    async fn test_wrong_passphrase_is_rejected() {
        let (_dir, backend, address) = keystore_with_key("correct horse");
        let passphrase = Passphrase::new("battery staple");

        let result = resolve_account(&backend, address, passphrase.as_ref(), deadline()).await;
        assert!(matches!(
            result,
            Err(TxError::InvalidPassphrase { address: a }) if a == address
        ));
    }

    #[tokio::test]
    async fn test_keystore_fault_is_not_a_wrong_passphrase() {
        let (dir, backend, _) = keystore_with_key("pw");

        // Header claims an address the encrypted key does not hold
        let claimed = Address::repeat_byte(0x42);
        let path = fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap().path();
        let mut json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        json["address"] = serde_json::Value::String(hex::encode(claimed.as_bytes()));
        fs::write(&path, json.to_string()).unwrap();

        let passphrase = Passphrase::new("pw");
        let result = resolve_account(&backend, claimed, passphrase.as_ref(), deadline()).await;
        assert!(matches!(result, Err(TxError::Keystore(_))));
    }

    #[tokio::test]
    async fn test_no_passphrase_skips_verification() {
        let (_dir, backend, address) = keystore_with_key("correct horse");

        let account = resolve_account(&backend, address, None, deadline())
            .await
            .unwrap();
        assert_eq!(account.address(), address);
    }

    #[tokio::test]
    async fn test_unknown_address() {
        let (_dir, backend, _) = keystore_with_key("pw");

        let result = resolve_account(&backend, Address::repeat_byte(7), None, deadline()).await;
        assert!(matches!(result, Err(TxError::AccountNotFound { .. })));
    }

    #[tokio::test]
    async fn test_hardware_skips_passphrase() {
        let wallet = LocalWallet::new(&mut ethers::core::rand::thread_rng());
        let address = wallet.address();
        let backend =
            WalletBackend::HardwareHub(HardwareHub::new(vec![Arc::new(FakeDevice::new(wallet))]));

        let passphrase = Passphrase::new("ignored");
        let account = resolve_account(&backend, address, passphrase.as_ref(), deadline())
            .await
            .unwrap();
        assert!(account.backend().is_hardware());
    }
}
