//! Keystore directory layout for each client implementation
//!
//! Every (client, OS) root and every (client, chain) subdirectory is an
//! independent table entry, so adding a network or a client is one line.

use crate::error::{TxError, TxResult};

use std::fmt;
use std::path::{Path, PathBuf};

/// Client implementation whose on-disk keystore convention we understand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Client {
    Geth,
    Parity,
}

impl Client {
    /// Search order for local keystores
    pub const ALL: [Client; 2] = [Client::Geth, Client::Parity];
}

impl fmt::Display for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Client::Geth => write!(f, "geth"),
            Client::Parity => write!(f, "parity"),
        }
    }
}

/// Host operating systems with a known keystore layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Windows,
    MacOs,
    Linux,
}

impl Os {
    /// Operating system this binary is running on
    pub fn current() -> TxResult<Self> {
        Self::from_name(std::env::consts::OS)
    }

    pub fn from_name(name: &str) -> TxResult<Self> {
        match name {
            "windows" => Ok(Os::Windows),
            "macos" => Ok(Os::MacOs),
            "linux" => Ok(Os::Linux),
            other => Err(TxError::UnsupportedPlatform(other.to_string())),
        }
    }
}

/// Data root of each client, relative to the user's home directory
const DATA_ROOTS: &[(Os, Client, &[&str])] = &[
    (Os::Windows, Client::Geth, &["AppData", "Roaming", "Ethereum"]),
    (Os::MacOs, Client::Geth, &["Library", "Ethereum"]),
    (Os::Linux, Client::Geth, &[".ethereum"]),
    (
        Os::Windows,
        Client::Parity,
        &["AppData", "Roaming", "Parity", "Ethereum", "keys"],
    ),
    (
        Os::MacOs,
        Client::Parity,
        &["Library", "Application Support", "io.parity.ethereum", "keys"],
    ),
    (
        Os::Linux,
        Client::Parity,
        &[".local", "share", "io.parity.ethereum", "keys"],
    ),
];

/// Per-chain subdirectory below the data root; empty means the root itself
const CHAIN_SUBDIRS: &[(Client, u64, &str)] = &[
    (Client::Geth, 1, ""),
    (Client::Geth, 3, "testnet"),
    (Client::Geth, 4, "rinkeby"),
    (Client::Geth, 5, "goerli"),
    (Client::Geth, 73799, "volta"),
    (Client::Geth, 246, "energyweb"),
    (Client::Parity, 1, "ethereum"),
    (Client::Parity, 3, "test"),
];

/// Fixed leaf directory holding the key files
const KEYSTORE_LEAVES: &[(Client, &str)] = &[(Client::Geth, "keystore")];

/// Keystore directory for a client on a chain, if the client supports that chain
pub fn keystore_dir(client: Client, os: Os, chain_id: u64, home: &Path) -> Option<PathBuf> {
    let root = DATA_ROOTS
        .iter()
        .find(|(o, c, _)| *o == os && *c == client)
        .map(|(_, _, parts)| *parts)?;

    let subdir = CHAIN_SUBDIRS
        .iter()
        .find(|(c, id, _)| *c == client && *id == chain_id)
        .map(|(_, _, dir)| *dir)?;

    let mut path = home.to_path_buf();
    path.extend(root);
    if !subdir.is_empty() {
        path.push(subdir);
    }
    if let Some((_, leaf)) = KEYSTORE_LEAVES.iter().find(|(c, _)| *c == client) {
        path.push(leaf);
    }

    Some(path)
}

/// Home directory of the current user
pub fn home_dir(os: Os) -> TxResult<PathBuf> {
    let var = match os {
        Os::Windows => "USERPROFILE",
        Os::MacOs | Os::Linux => "HOME",
    };
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| TxError::Config(format!("{} is not set; cannot locate keystores", var)))
}
