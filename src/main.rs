//! txsend - locate a key, then build, sign and submit one transaction
//!
//! Keys are found in local keystores (per client and OS conventions) or on
//! an attached hardware wallet. Transactions can be sent, fee-bumped, or
//! signed offline for external broadcast.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use ethers::types::{Address, Bytes, H256, U256};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info, warn};

mod chain;
mod config;
mod error;
mod pipeline;
mod tx;
mod wallet;

use chain::{ChainDescriptor, ChainProvider};
use config::{LogFormat, LoggingConfig, Overrides, Settings};
use error::TxError;
use pipeline::{Invocation, Pipeline, TransactionRef};
use tx::{NewTransaction, SubmissionOutcome};
use wallet::{Passphrase, WalletLocator};

#[derive(Debug, Parser)]
#[command(name = "txsend", version, about = "Sign and submit Ethereum transactions")]
struct Cli {
    /// Configuration file (defaults to $TXSEND_CONFIG, then config/default.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// JSON-RPC endpoint of the node
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    #[arg(long, global = true)]
    chain_id: Option<u64>,

    /// Seconds to wait for device confirmation and for a receipt
    #[arg(long, global = true, value_name = "SECS")]
    timeout: Option<u64>,

    /// Only log errors and print nothing; the exit code carries the outcome
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List accounts of every keystore and hardware wallet for the chain
    Accounts,
    /// Send a new transaction
    Send(SendArgs),
    /// Replace a pending transaction with a higher gas price
    Up(UpArgs),
    /// Show a transaction by hash, or decode a raw signed transaction
    Info {
        #[arg(long)]
        transaction: String,
    },
}

#[derive(Debug, Args)]
struct SigningArgs {
    /// Keystore passphrase; not needed for hardware wallets
    #[arg(long, env = "TXSEND_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// Print the signed transaction instead of broadcasting it
    #[arg(long)]
    offline: bool,

    /// Wait for the transaction to be mined; ignored with --offline
    #[arg(long)]
    wait: bool,
}

#[derive(Debug, Args)]
struct SendArgs {
    #[arg(long, value_parser = parse_address)]
    from: Address,

    /// Recipient; omit to create a contract
    #[arg(long, value_parser = parse_address)]
    to: Option<Address>,

    /// Amount in wei, decimal or 0x-prefixed hex
    #[arg(long, value_parser = parse_u256, default_value = "0")]
    value: U256,

    #[arg(long, value_parser = parse_u256)]
    gas_limit: U256,

    /// Gas price in wei; the node's suggestion when omitted
    #[arg(long, value_parser = parse_u256)]
    gas_price: Option<U256>,

    /// Nonce; the sender's next pending nonce when omitted
    #[arg(long, value_parser = parse_u256)]
    nonce: Option<U256>,

    /// Call data or contract bytecode, hex
    #[arg(long, value_parser = parse_bytes)]
    data: Option<Bytes>,

    #[command(flatten)]
    signing: SigningArgs,
}

#[derive(Debug, Args)]
struct UpArgs {
    /// Hash of the pending transaction to replace
    #[arg(long, value_parser = parse_hash)]
    transaction: H256,

    /// New gas price in wei; must exceed the minimum bump
    #[arg(long, value_parser = parse_u256)]
    gas_price: Option<U256>,

    #[command(flatten)]
    signing: SigningArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // Malformed input is a validation failure, not a usage code
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let overrides = Overrides {
        rpc_url: cli.rpc_url.clone(),
        chain_id: cli.chain_id,
        timeout_secs: cli.timeout,
    };
    let settings = match Settings::load(cli.config.as_deref())
        .and_then(|s| s.with_overrides(&overrides))
    {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(1);
        }
    };

    init_logging(&settings.logging, cli.quiet);
    debug!("txsend v{}", env!("CARGO_PKG_VERSION"));

    let result = tokio::select! {
        result = run(cli, settings) => result,
        _ = shutdown_signal() => {
            warn!("Interrupted, abandoning the current operation");
            Err(TxError::Cancelled.into())
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            match e.downcast_ref::<TxError>() {
                Some(tx_error) => {
                    if tx_error.is_resolution_failure() {
                        info!("Run `txsend accounts` to see which addresses are available");
                    }
                    ExitCode::from(tx_error.exit_code())
                }
                None => ExitCode::from(1),
            }
        }
    }
}

/// Execute one command, returning the process exit code
async fn run(cli: Cli, settings: Settings) -> Result<u8> {
    let (passphrase, offline, wait) = match &cli.command {
        Command::Send(args) => signing_options(&args.signing),
        Command::Up(args) => signing_options(&args.signing),
        Command::Accounts | Command::Info { .. } => (None, false, false),
    };

    let network = &settings.network;
    let chain = chain_for(&cli.command, &settings)?;
    info!("Using {} via {}", chain.name(), network.rpc_url);

    let client = Arc::new(ChainProvider::new(
        &network.rpc_url,
        network.chain_id,
        network.request_timeout(),
    )?);
    let locator = WalletLocator::new(settings.wallet.clone());
    let invocation = Invocation::new(&settings, chain, passphrase, offline, wait);
    let pipeline = Pipeline::new(client, locator, invocation);
    let quiet = cli.quiet;

    match cli.command {
        Command::Accounts => {
            let report = pipeline.list_accounts().await;
            for entry in &report.accounts {
                output(quiet, &format!("{:?}\t{}", entry.address, entry.backend));
            }
            if report.accounts.is_empty() {
                warn!("No accounts found for {}", pipeline.invocation().chain.name());
            }
            Ok(0)
        }
        Command::Send(args) => {
            let request = NewTransaction {
                from: args.from,
                to: args.to,
                value: args.value,
                gas_limit: args.gas_limit,
                gas_price: args.gas_price,
                nonce: args.nonce,
                data: args.data.unwrap_or_default(),
            };
            let outcome = pipeline.send(request).await?;
            report_outcome(quiet, &outcome)
        }
        Command::Up(args) => {
            let outcome = pipeline.replace(args.transaction, args.gas_price).await?;
            report_outcome(quiet, &outcome)
        }
        Command::Info { transaction } => {
            let target = TransactionRef::parse(&transaction)?;
            let info = pipeline.inspect(target).await?;
            output(quiet, &serde_json::to_string_pretty(&info)?);
            Ok(0)
        }
    }
}

/// Only wallet commands search the host's keystore directories
fn chain_for(command: &Command, settings: &Settings) -> Result<ChainDescriptor> {
    let chain_id = settings.network.chain_id;
    match command {
        Command::Info { .. } => Ok(ChainDescriptor::with_keystores(chain_id, &[])),
        Command::Accounts | Command::Send(_) | Command::Up(_) => Ok(ChainDescriptor::for_host(
            chain_id,
            &settings.wallet.keystore_paths,
        )?),
    }
}

fn signing_options(args: &SigningArgs) -> (Option<Passphrase>, bool, bool) {
    let passphrase = args.passphrase.clone().and_then(Passphrase::new);
    (passphrase, args.offline, args.wait)
}

fn report_outcome(quiet: bool, outcome: &SubmissionOutcome) -> Result<u8> {
    match outcome {
        SubmissionOutcome::Serialized(hex) => output(quiet, hex),
        SubmissionOutcome::Submitted(hash) => output(quiet, &format!("{:?}", hash)),
        SubmissionOutcome::MinedSuccess(receipt) => {
            output(quiet, &serde_json::to_string_pretty(receipt)?)
        }
        SubmissionOutcome::MinedFailure(receipt) => {
            error!("Transaction {:?} failed", receipt.transaction_hash);
            output(quiet, &serde_json::to_string_pretty(receipt)?)
        }
        SubmissionOutcome::TimedOut(hash) => {
            warn!("{:?} was submitted but is not mined yet", hash);
            output(quiet, &format!("{:?}", hash))
        }
        SubmissionOutcome::Rejected(message) => error!("Transaction rejected: {}", message),
    }
    if let Some(hash) = outcome.tx_hash() {
        debug!("Finished with {:?} (exit {})", hash, outcome.exit_code());
    }
    Ok(outcome.exit_code())
}

fn output(quiet: bool, line: &str) {
    if !quiet {
        println!("{}", line);
    }
}

fn parse_address(s: &str) -> std::result::Result<Address, String> {
    s.parse::<Address>()
        .map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn parse_hash(s: &str) -> std::result::Result<H256, String> {
    s.parse::<H256>()
        .map_err(|e| format!("invalid transaction hash '{}': {}", s, e))
}

fn parse_u256(s: &str) -> std::result::Result<U256, String> {
    let parsed = match s.strip_prefix("0x") {
        Some(digits) => U256::from_str_radix(digits, 16).map_err(|e| e.to_string()),
        None => U256::from_dec_str(s).map_err(|e| e.to_string()),
    };
    parsed.map_err(|e| format!("invalid number '{}': {}", s, e))
}

fn parse_bytes(s: &str) -> std::result::Result<Bytes, String> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map(Bytes::from)
        .map_err(|e| format!("invalid hex data: {}", e))
}

fn init_logging(config: &LoggingConfig, quiet: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{},hyper=warn,reqwest=warn", config.level))
        })
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_amounts_decimal_and_hex() {
        assert_eq!(parse_u256("1000").unwrap(), U256::from(1000));
        assert_eq!(parse_u256("0x3e8").unwrap(), U256::from(1000));
        assert!(parse_u256("ten").is_err());
        assert!(parse_u256("0xzz").is_err());
    }

    #[test]
    fn test_send_arguments() {
        let cli = Cli::try_parse_from([
            "txsend",
            "--chain-id",
            "5",
            "send",
            "--from",
            "0x0000000000000000000000000000000000000001",
            "--gas-limit",
            "21000",
            "--data",
            "0x6080",
            "--offline",
        ])
        .unwrap();

        assert_eq!(cli.chain_id, Some(5));
        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.from, Address::from_low_u64_be(1));
                assert!(args.to.is_none());
                assert_eq!(args.value, U256::zero());
                assert_eq!(args.data, Some(Bytes::from(vec![0x60, 0x80])));
                assert!(args.signing.offline);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_malformed_input_rejected_by_parser() {
        assert!(
            Cli::try_parse_from(["txsend", "send", "--from", "nope", "--gas-limit", "1"]).is_err()
        );
        assert!(Cli::try_parse_from(["txsend", "up", "--transaction", "0x1234"]).is_err());
        assert!(Cli::try_parse_from(["txsend", "send", "--from", "0x01"]).is_err());
    }

    #[test]
    fn test_info_skips_keystore_discovery() {
        let mut settings = Settings::default();
        settings.network.chain_id = 5;
        settings.wallet.keystore_paths = vec![PathBuf::from("/srv/keys")];
        let cli = Cli::try_parse_from(["txsend", "info", "--transaction", "0xdeadbeef"]).unwrap();

        let chain = chain_for(&cli.command, &settings).unwrap();
        assert_eq!(chain.chain_id(), 5);
        assert!(chain.keystores().is_empty());
    }

    #[test]
    fn test_empty_passphrase_means_none() {
        let args = SigningArgs {
            passphrase: Some(String::new()),
            offline: false,
            wait: true,
        };
        let (passphrase, offline, wait) = signing_options(&args);
        assert!(passphrase.is_none());
        assert!(!offline);
        assert!(wait);
    }
}
