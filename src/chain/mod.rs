//! Chain module - chain identity, keystore locations and the node RPC surface
//!
//! This module provides:
//! - The per-invocation chain descriptor with its ordered keystore directories
//! - The narrow RPC client used by the builder and the submitter

pub mod provider;

pub use provider::{ChainClient, ChainProvider};

use crate::error::TxResult;
use crate::wallet::layout::{self, Client, Os};

use std::path::{Path, PathBuf};
use tracing::debug;

/// Where a local keystore directory came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeystoreSource {
    Client(Client),
    Configured,
}

/// A keystore directory to search, in search order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeystoreLocation {
    pub source: KeystoreSource,
    pub path: PathBuf,
}

/// Chain identity plus the backend conventions derived from it
#[derive(Debug, Clone)]
pub struct ChainDescriptor {
    chain_id: u64,
    keystores: Vec<KeystoreLocation>,
}

impl ChainDescriptor {
    /// Build a descriptor for an explicit OS and home directory
    pub fn resolve(chain_id: u64, os: Os, home: &Path, extra_dirs: &[PathBuf]) -> Self {
        let mut keystores = Vec::new();

        for client in Client::ALL {
            match layout::keystore_dir(client, os, chain_id, home) {
                Some(path) => keystores.push(KeystoreLocation {
                    source: KeystoreSource::Client(client),
                    path,
                }),
                None => debug!(
                    "No {} keystore convention for chain {}",
                    client,
                    chain_name(chain_id)
                ),
            }
        }

        keystores.extend(extra_dirs.iter().map(|path| KeystoreLocation {
            source: KeystoreSource::Configured,
            path: path.clone(),
        }));

        Self {
            chain_id,
            keystores,
        }
    }

    /// Build a descriptor for the host this process runs on
    pub fn for_host(chain_id: u64, extra_dirs: &[PathBuf]) -> TxResult<Self> {
        let os = Os::current()?;
        let home = layout::home_dir(os)?;
        Ok(Self::resolve(chain_id, os, &home, extra_dirs))
    }

    /// Descriptor with only explicitly listed keystore directories
    pub fn with_keystores(chain_id: u64, dirs: &[PathBuf]) -> Self {
        Self {
            chain_id,
            keystores: dirs
                .iter()
                .map(|path| KeystoreLocation {
                    source: KeystoreSource::Configured,
                    path: path.clone(),
                })
                .collect(),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn name(&self) -> String {
        chain_name(self.chain_id)
    }

    /// Local keystore directories in search order
    pub fn keystores(&self) -> &[KeystoreLocation] {
        &self.keystores
    }
}

/// Human readable network name for log output
pub fn chain_name(chain_id: u64) -> String {
    match chain_id {
        1 => "mainnet".to_string(),
        3 => "ropsten".to_string(),
        4 => "rinkeby".to_string(),
        5 => "goerli".to_string(),
        246 => "energyweb".to_string(),
        73799 => "volta".to_string(),
        11155111 => "sepolia".to_string(),
        other => format!("chain-{}", other),
    }
}
