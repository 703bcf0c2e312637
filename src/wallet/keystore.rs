//! Encrypted JSON keystore directory backend
//!
//! Accounts are listed from the key file metadata without decrypting
//! anything; the passphrase is only needed to unlock a key for signing.

use super::Passphrase;
use crate::error::{TxError, TxResult};

use ethers::signers::LocalWallet;
use ethers::types::Address;
use serde::Deserialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

/// Key file metadata; the crypto section is left to the decryptor
#[derive(Debug, Deserialize)]
struct KeyFileHeader {
    address: Option<String>,
}

/// One key file in a keystore directory
#[derive(Debug, Clone)]
struct KeyFile {
    address: Address,
    path: PathBuf,
}

/// A local keystore directory
#[derive(Debug, Clone)]
pub struct LocalKeystore {
    label: String,
    root: PathBuf,
}

impl LocalKeystore {
    pub fn new(label: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            label: label.into(),
            root: root.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Addresses held in this keystore; a missing directory holds none
    pub fn accounts(&self) -> TxResult<Vec<Address>> {
        Ok(self.key_files()?.into_iter().map(|k| k.address).collect())
    }

    /// Decrypt the key for `address`, bounded by `deadline`
    pub async fn unlock(
        &self,
        address: Address,
        passphrase: &Passphrase,
        deadline: Instant,
    ) -> TxResult<LocalWallet> {
        let key_file = self
            .key_files()?
            .into_iter()
            .find(|k| k.address == address)
            .ok_or_else(|| TxError::AccountNotFound {
                address,
                backend: self.label.clone(),
            })?;

        let path = key_file.path;
        let secret = passphrase.clone();
        let decrypt = tokio::task::spawn_blocking(move || {
            LocalWallet::decrypt_keystore(&path, secret.expose())
        });

        let wallet = match timeout_at(deadline, decrypt).await {
            Ok(Ok(Ok(wallet))) => wallet,
            Ok(Ok(Err(e))) => {
                debug!("Keystore decryption failed for {:?}: {}", address, e);
                return Err(TxError::InvalidPassphrase { address });
            }
            Ok(Err(e)) => return Err(TxError::Internal(format!("decrypt task failed: {}", e))),
            Err(_) => {
                return Err(TxError::Timeout {
                    operation: "keystore decryption".to_string(),
                })
            }
        };

        // The address in the file header is unauthenticated
        if ethers::signers::Signer::address(&wallet) != address {
            return Err(TxError::Keystore(format!(
                "key file for {:?} in {} holds a different key",
                address, self.label
            )));
        }

        Ok(wallet)
    }

    fn key_files(&self) -> TxResult<Vec<KeyFile>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Keystore {} does not exist", self.root.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(TxError::Keystore(format!(
                    "cannot read {}: {}",
                    self.root.display(),
                    e
                )))
            }
        };

        let mut files = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            match read_key_address(&path) {
                Some(address) => files.push(KeyFile { address, path }),
                None => debug!("Skipping non-key file {}", path.display()),
            }
        }

        // read_dir order is unspecified
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }
}

fn read_key_address(path: &Path) -> Option<Address> {
    let contents = fs::read_to_string(path).ok()?;
    let header: KeyFileHeader = serde_json::from_str(&contents).ok()?;

    header
        .address
        .as_deref()
        .and_then(parse_hex_address)
        .or_else(|| {
            // Geth names files UTC--<timestamp>--<address>
            let name = path.file_name()?.to_str()?;
            let (_, suffix) = name.rsplit_once("--")?;
            parse_hex_address(suffix)
        })
}

fn parse_hex_address(s: &str) -> Option<Address> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.len() != 40 {
        return None;
    }
    Address::from_str(s).ok()
}
