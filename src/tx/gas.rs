//! Gas price selection for new and replacement transactions

use crate::chain::ChainClient;
use crate::error::{TxError, TxResult};

use ethers::types::U256;
use tracing::debug;

/// Lowest gas price a node accepts for replacing a pending transaction:
/// `old + old / 10 + 1`, with truncating division so the result always
/// exceeds `old`
pub fn replacement_minimum(old: U256) -> TxResult<U256> {
    old.checked_add(old / 10)
        .and_then(|p| p.checked_add(U256::one()))
        .ok_or_else(|| TxError::Validation(format!("gas price {} cannot be increased", old)))
}

/// Gas price for a replacement transaction.
///
/// Without an explicit price the minimum bump is used; an explicit price
/// must be strictly above that minimum.
pub fn replacement_gas_price(old: U256, explicit: Option<U256>) -> TxResult<U256> {
    let minimum = replacement_minimum(old)?;
    match explicit {
        None => Ok(minimum),
        Some(supplied) if supplied > minimum => Ok(supplied),
        Some(supplied) => Err(TxError::GasPriceTooLow { minimum, supplied }),
    }
}

/// Gas price for a new transaction: explicit, or the node's suggestion
pub async fn resolve_gas_price(client: &dyn ChainClient, explicit: Option<U256>) -> TxResult<U256> {
    match explicit {
        Some(price) => Ok(price),
        None => {
            let price = client.suggested_gas_price().await?;
            debug!("Node suggested gas price {}", price);
            Ok(price)
        }
    }
}
