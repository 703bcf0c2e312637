//! Stage orchestration for one invocation
//!
//! locate wallet -> resolve account -> build -> sign -> emit/confirm.
//! Each stage either hands a value to the next or ends the run with a
//! `TxError`; only submission produces a `SubmissionOutcome`.

use crate::chain::{ChainClient, ChainDescriptor};
use crate::config::Settings;
use crate::error::{TxError, TxResult};
use crate::tx::{
    NewTransaction, SubmissionOutcome, Submitter, TransactionBuilder, TransactionSigner,
    UnsignedTransaction,
};
use crate::wallet::{resolve_account, Account, Passphrase, WalletLocator};

use ethers::types::{Address, Bytes, Transaction, TransactionReceipt, H256, U256};
use ethers::utils::rlp::{Decodable, Rlp};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Per-invocation request parameters, built once and never mutated
#[derive(Debug)]
pub struct Invocation {
    pub chain: ChainDescriptor,
    pub passphrase: Option<Passphrase>,
    pub offline: bool,
    pub wait: bool,
    /// Bound on signing (device or keystore) and, separately, on confirmation
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl Invocation {
    pub fn new(
        settings: &Settings,
        chain: ChainDescriptor,
        passphrase: Option<Passphrase>,
        offline: bool,
        wait: bool,
    ) -> Self {
        Self {
            chain,
            passphrase,
            offline,
            wait,
            timeout: settings.network.timeout(),
            poll_interval: settings.network.poll_interval(),
        }
    }
}

/// One row of the `accounts` listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountEntry {
    pub address: Address,
    pub backend: String,
}

/// Union of all backends' accounts, plus what could not be enumerated
#[derive(Debug, Default)]
pub struct AccountReport {
    pub accounts: Vec<AccountEntry>,
    pub errors: Vec<TxError>,
}

/// What `info` looks up: a hash on the node, or a raw signed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionRef {
    Hash(H256),
    Raw(Bytes),
}

impl TransactionRef {
    /// Anything longer than a `0x`-prefixed hash is treated as raw encoding
    pub fn parse(input: &str) -> TxResult<Self> {
        let input = input.trim();
        let digits = input.strip_prefix("0x").unwrap_or(input);
        let bytes = hex::decode(digits)
            .map_err(|e| TxError::Validation(format!("invalid hex '{}': {}", input, e)))?;

        if input.len() > 66 {
            Ok(TransactionRef::Raw(bytes.into()))
        } else if bytes.len() == 32 {
            Ok(TransactionRef::Hash(H256::from_slice(&bytes)))
        } else {
            Err(TxError::Validation(format!(
                "'{}' is neither a transaction hash nor a raw transaction",
                input
            )))
        }
    }
}

/// Transaction details printed by `info`
#[derive(Debug, Clone, Serialize)]
pub struct TransactionInfo {
    pub transaction: Transaction,
    /// Unknown for a locally decoded raw transaction
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt: Option<TransactionReceipt>,
}

/// Runs the send, replace, list and inspect flows against one node
pub struct Pipeline {
    client: Arc<dyn ChainClient>,
    locator: WalletLocator,
    invocation: Invocation,
}

impl Pipeline {
    pub fn new(
        client: Arc<dyn ChainClient>,
        locator: WalletLocator,
        invocation: Invocation,
    ) -> Self {
        Self {
            client,
            locator,
            invocation,
        }
    }

    pub fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    /// Send a new transaction
    pub async fn send(&self, request: NewTransaction) -> TxResult<SubmissionOutcome> {
        request.validate()?;
        let deadline = Instant::now() + self.invocation.timeout;
        let chain = &self.invocation.chain;

        info!("Sending from {:?} on {}", request.from, chain.name());
        let backend = self.locator.find_wallet(chain, request.from).await?;
        let account = resolve_account(
            &backend,
            request.from,
            self.invocation.passphrase.as_ref(),
            deadline,
        )
        .await?;

        let unsigned = self.builder().build_new(request).await?;
        self.sign_and_emit(&unsigned, &account, deadline).await
    }

    /// Replace the pending transaction `tx_hash` with a higher-priced copy
    pub async fn replace(
        &self,
        tx_hash: H256,
        gas_price: Option<U256>,
    ) -> TxResult<SubmissionOutcome> {
        let deadline = Instant::now() + self.invocation.timeout;
        let chain = &self.invocation.chain;

        let unsigned = self.builder().build_replacement(tx_hash, gas_price).await?;

        info!("Replacing {:?} from {:?} on {}", tx_hash, unsigned.from, chain.name());
        let backend = self.locator.find_wallet(chain, unsigned.from).await?;
        let account = resolve_account(
            &backend,
            unsigned.from,
            self.invocation.passphrase.as_ref(),
            deadline,
        )
        .await?;

        self.sign_and_emit(&unsigned, &account, deadline).await
    }

    /// Every account of every backend for the chain
    pub async fn list_accounts(&self) -> AccountReport {
        let set = self.locator.list_backends(&self.invocation.chain).await;
        let mut report = AccountReport {
            accounts: Vec::new(),
            errors: set.errors,
        };

        for backend in &set.backends {
            match WalletLocator::list_accounts(backend) {
                Ok(accounts) => report.accounts.extend(accounts.into_iter().map(|a| AccountEntry {
                    address: a.address(),
                    backend: backend.name(),
                })),
                Err(e) => {
                    warn!("Cannot list {}: {}", backend.name(), e);
                    report.errors.push(e);
                }
            }
        }

        report
    }

    /// Decode a raw transaction locally, or fetch one (and its receipt) by hash
    pub async fn inspect(&self, target: TransactionRef) -> TxResult<TransactionInfo> {
        match target {
            TransactionRef::Raw(raw) => {
                let transaction = Transaction::decode(&Rlp::new(raw.as_ref())).map_err(|e| {
                    TxError::Validation(format!("cannot decode raw transaction: {}", e))
                })?;
                Ok(TransactionInfo {
                    transaction,
                    pending: None,
                    receipt: None,
                })
            }
            TransactionRef::Hash(tx_hash) => {
                let transaction = self
                    .client
                    .transaction_by_hash(tx_hash)
                    .await?
                    .ok_or(TxError::TransactionNotFound { tx_hash })?;

                let pending = transaction.block_number.is_none();
                let receipt = if pending {
                    None
                } else {
                    self.client.transaction_receipt(tx_hash).await?
                };

                Ok(TransactionInfo {
                    transaction,
                    pending: Some(pending),
                    receipt,
                })
            }
        }
    }

    fn builder(&self) -> TransactionBuilder {
        TransactionBuilder::new(self.client.clone(), self.invocation.chain.chain_id())
    }

    async fn sign_and_emit(
        &self,
        unsigned: &UnsignedTransaction,
        account: &Account<'_>,
        deadline: Instant,
    ) -> TxResult<SubmissionOutcome> {
        let signed = TransactionSigner::new(deadline)
            .sign(unsigned, account, self.invocation.passphrase.as_ref())
            .await?;
        debug!(
            "Signed nonce {} from {:?}",
            signed.unsigned().nonce,
            signed.unsigned().from
        );

        // Confirmation gets its own full window, starting at broadcast
        let wait_until = self
            .invocation
            .wait
            .then(|| Instant::now() + self.invocation.timeout);

        Submitter::new(self.client.clone(), self.invocation.poll_interval)
            .submit(&signed, self.invocation.offline, wait_until)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::provider::MockChainClient;
    use crate::config::WalletConfig;
    use crate::tx::builder::tests::{pending_transaction, KEY};
    use crate::wallet::hardware::tests::FakeConnector;
    use crate::wallet::keystore::tests::write_key_file;
    use ethers::signers::{LocalWallet, Signer};
    use ethers::types::U64;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn invocation(dirs: &[PathBuf], passphrase: &str, offline: bool, wait: bool) -> Invocation {
        Invocation {
            chain: ChainDescriptor::with_keystores(1, dirs),
            passphrase: Passphrase::new(passphrase),
            offline,
            wait,
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn keystore_locator() -> WalletLocator {
        let config = WalletConfig {
            hardware_enabled: false,
            ..WalletConfig::default()
        };
        WalletLocator::with_connector(config, Box::new(FakeConnector { wallets: vec![] }))
    }

    fn hardware_locator(wallet: LocalWallet) -> WalletLocator {
        WalletLocator::with_connector(
            WalletConfig::default(),
            Box::new(FakeConnector {
                wallets: vec![wallet],
            }),
        )
    }

    fn transfer(from: Address) -> NewTransaction {
        NewTransaction {
            from,
            to: Some(Address::repeat_byte(0x44)),
            value: U256::from(1_000),
            gas_limit: U256::from(21_000),
            gas_price: Some(U256::from(3_000_000_000u64)),
            nonce: Some(U256::from(2)),
            data: Bytes::default(),
        }
    }

    #[tokio::test]
    async fn test_offline_send_uses_keystore_and_no_network() {
        let dir = TempDir::new().unwrap();
        let from = write_key_file(dir.path(), "pw");
        let mut client = MockChainClient::new();
        client.expect_send_raw_transaction().never();
        client.expect_pending_nonce().never();
        client.expect_suggested_gas_price().never();

        let pipeline = Pipeline::new(
            Arc::new(client),
            keystore_locator(),
            invocation(&[dir.path().to_path_buf()], "pw", true, true),
        );

        let outcome = pipeline.send(transfer(from)).await.unwrap();
        let hex = match outcome {
            SubmissionOutcome::Serialized(hex) => hex,
            other => panic!("expected serialized output, got {:?}", other),
        };

        let raw = hex::decode(hex.trim_start_matches("0x")).unwrap();
        let decoded = Transaction::decode(&Rlp::new(&raw)).unwrap();
        assert_eq!(decoded.recover_from().unwrap(), from);
        assert_eq!(decoded.nonce, U256::from(2));
        assert_eq!(decoded.gas_price, Some(U256::from(3_000_000_000u64)));
    }

    #[tokio::test]
    async fn test_wrong_passphrase_stops_before_build() {
        let dir = TempDir::new().unwrap();
        let from = write_key_file(dir.path(), "pw");
        let mut client = MockChainClient::new();
        client.expect_pending_nonce().never();
        client.expect_send_raw_transaction().never();

        let mut request = transfer(from);
        request.nonce = None;
        let pipeline = Pipeline::new(
            Arc::new(client),
            keystore_locator(),
            invocation(&[dir.path().to_path_buf()], "wrong", false, false),
        );

        let result = pipeline.send(request).await;
        assert!(matches!(result, Err(TxError::InvalidPassphrase { .. })));
    }

    #[tokio::test]
    async fn test_unknown_sender_is_wallet_not_found() {
        let dir = TempDir::new().unwrap();
        let client = MockChainClient::new();
        let pipeline = Pipeline::new(
            Arc::new(client),
            keystore_locator(),
            invocation(&[dir.path().to_path_buf()], "", false, false),
        );

        let result = pipeline.send(transfer(Address::repeat_byte(0x99))).await;
        assert!(matches!(result, Err(TxError::WalletNotFound { .. })));
    }

    #[tokio::test]
    async fn test_invalid_request_fails_first() {
        let client = MockChainClient::new();
        let pipeline = Pipeline::new(
            Arc::new(client),
            keystore_locator(),
            invocation(&[], "", false, false),
        );

        let mut request = transfer(Address::repeat_byte(1));
        request.gas_limit = U256::zero();
        let result = pipeline.send(request).await;
        assert!(matches!(result, Err(TxError::Validation(_))));
    }

    #[tokio::test]
    async fn test_replace_with_hardware_and_wait() {
        let wallet: LocalWallet = KEY.parse().unwrap();
        let original = pending_transaction(1_000_000_000, 12);
        let original_hash = original.hash;

        let mut client = MockChainClient::new();
        client
            .expect_transaction_by_hash()
            .returning(move |_| Ok(Some(original.clone())));
        client
            .expect_send_raw_transaction()
            .withf(|raw| {
                let tx = Transaction::decode(&Rlp::new(raw.as_ref())).unwrap();
                tx.nonce == U256::from(12) && tx.gas_price == Some(U256::from(1_100_000_001u64))
            })
            .times(1)
            .returning(|raw| Ok(H256::from(ethers::utils::keccak256(raw.as_ref()))));
        client.expect_transaction_receipt().returning(|h| {
            Ok(Some(TransactionReceipt {
                transaction_hash: h,
                block_number: Some(U64::from(77)),
                status: Some(U64::from(1)),
                ..Default::default()
            }))
        });

        let pipeline = Pipeline::new(
            Arc::new(client),
            hardware_locator(wallet),
            invocation(&[], "", false, true),
        );

        let outcome = pipeline.replace(original_hash, None).await.unwrap();
        assert!(matches!(outcome, SubmissionOutcome::MinedSuccess(_)));
        assert_eq!(outcome.exit_code(), 0);
        assert_ne!(outcome.tx_hash(), Some(original_hash));
    }

    #[tokio::test]
    async fn test_rejected_replacement() {
        let wallet: LocalWallet = KEY.parse().unwrap();
        let original = pending_transaction(1_000_000_000, 12);
        let original_hash = original.hash;

        let mut client = MockChainClient::new();
        client
            .expect_transaction_by_hash()
            .returning(move |_| Ok(Some(original.clone())));
        client
            .expect_send_raw_transaction()
            .returning(|_| Err(TxError::Rejected("replacement transaction underpriced".into())));
        client.expect_transaction_receipt().never();

        let pipeline = Pipeline::new(
            Arc::new(client),
            hardware_locator(wallet),
            invocation(&[], "", false, true),
        );

        let outcome = pipeline.replace(original_hash, None).await.unwrap();
        assert_eq!(
            outcome,
            SubmissionOutcome::Rejected("replacement transaction underpriced".into())
        );
        assert_eq!(outcome.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_list_accounts_unions_backends() {
        let dir = TempDir::new().unwrap();
        let local = write_key_file(dir.path(), "pw");
        let device = LocalWallet::new(&mut ethers::core::rand::thread_rng());

        let pipeline = Pipeline::new(
            Arc::new(MockChainClient::new()),
            hardware_locator(device.clone()),
            invocation(&[dir.path().to_path_buf()], "", false, false),
        );

        let report = pipeline.list_accounts().await;
        assert!(report.errors.is_empty());
        let addresses: Vec<Address> = report.accounts.iter().map(|a| a.address).collect();
        assert_eq!(addresses, vec![local, device.address()]);
        assert_eq!(report.accounts[1].backend, "hardware wallet");
    }

    #[test]
    fn test_transaction_ref_parsing() {
        let hash = format!("0x{}", "ab".repeat(32));
        assert_eq!(
            TransactionRef::parse(&hash).unwrap(),
            TransactionRef::Hash(H256::repeat_byte(0xab))
        );

        let raw = format!("0x{}", "cd".repeat(40));
        assert!(matches!(TransactionRef::parse(&raw).unwrap(), TransactionRef::Raw(_)));

        assert!(matches!(TransactionRef::parse("0x1234"), Err(TxError::Validation(_))));
        assert!(matches!(TransactionRef::parse("0xzz"), Err(TxError::Validation(_))));
    }

    #[tokio::test]
    async fn test_inspect_raw_is_local() {
        let original = pending_transaction(1_000_000_000, 5);
        let mut client = MockChainClient::new();
        client.expect_transaction_by_hash().never();

        let pipeline = Pipeline::new(
            Arc::new(client),
            keystore_locator(),
            invocation(&[], "", false, false),
        );
        let input = format!("0x{}", hex::encode(original.rlp()));
        let info = pipeline
            .inspect(TransactionRef::parse(&input).unwrap())
            .await
            .unwrap();

        assert_eq!(info.transaction.hash, original.hash);
        assert!(info.pending.is_none());
        let json = serde_json::to_value(&info).unwrap();
        assert!(json.get("pending").is_none());
    }

    #[tokio::test]
    async fn test_inspect_mined_fetches_receipt() {
        let mut mined = pending_transaction(1_000_000_000, 5);
        mined.block_number = Some(U64::from(10));
        let hash = mined.hash;

        let mut client = MockChainClient::new();
        client
            .expect_transaction_by_hash()
            .returning(move |_| Ok(Some(mined.clone())));
        client.expect_transaction_receipt().times(1).returning(|h| {
            Ok(Some(TransactionReceipt {
                transaction_hash: h,
                status: Some(U64::from(1)),
                ..Default::default()
            }))
        });

        let pipeline = Pipeline::new(
            Arc::new(client),
            keystore_locator(),
            invocation(&[], "", false, false),
        );
        let info = pipeline.inspect(TransactionRef::Hash(hash)).await.unwrap();
        assert_eq!(info.pending, Some(false));
        assert_eq!(info.receipt.unwrap().transaction_hash, hash);
    }

    #[tokio::test]
    async fn test_inspect_unknown_hash() {
        let mut client = MockChainClient::new();
        client.expect_transaction_by_hash().returning(|_| Ok(None));

        let pipeline = Pipeline::new(
            Arc::new(client),
            keystore_locator(),
            invocation(&[], "", false, false),
        );
        let result = pipeline.inspect(TransactionRef::Hash(H256::zero())).await;
        assert!(matches!(result, Err(TxError::TransactionNotFound { .. })));
    }
}
