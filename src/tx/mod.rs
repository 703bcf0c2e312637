//! Transaction assembly, signing and submission

pub mod builder;
pub mod gas;
pub mod nonce;
pub mod sender;
pub mod signer;

pub use builder::{NewTransaction, TransactionBuilder, UnsignedTransaction};
pub use sender::{SubmissionOutcome, Submitter};
pub use signer::TransactionSigner;
