//! Clients to fetch data from the chain node.

use async_trait::async_trait;
use qsk_common::AddressBalance;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::Error;
use crate::model::{Block, Transaction, Unspent, Vout};

mod explorer;
mod rpc;

pub use explorer::ExplorerClient;
pub use rpc::RpcClient;

/// The capability set both node adapters implement. Every operation may
/// block on I/O; transport failures surface as [`Error::Unavailable`].
///
/// This is a fully `async` trait: implementations wrapping a blocking
/// transport should off-load to the runtime themselves.
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// The current best height reported by the node.
    async fn tip_height(&self) -> Result<u64, Error>;

    /// The hash of the block at `height`. Fails with
    /// [`Error::HeightNotFound`] when the chain has not reached it yet.
    async fn block_hash(&self, height: u64) -> Result<String, Error>;

    /// The block with the given hash: header plus ordered transaction ids.
    async fn block(&self, hash: &str) -> Result<Block, Error>;

    /// A transaction with populated vins and vouts. Vin addresses and
    /// values may be absent. Fails with [`Error::TxNotFound`] when the node
    /// cannot resolve the id.
    async fn transaction(&self, tx_id: &str) -> Result<Transaction, Error>;

    /// One output of a prior transaction, used to back-fill a vin.
    async fn tx_out(&self, tx_id: &str, vout: u64) -> Result<Vout, Error>;

    /// Unconfirmed transaction ids. The explorer adapter legitimately
    /// returns an empty list.
    async fn mempool_tx_ids(&self) -> Result<Vec<String>, Error>;

    /// Unspent outputs of the given addresses, stake spendability policy
    /// applied.
    async fn list_unspent(&self, addresses: &[String]) -> Result<Vec<Unspent>, Error>;

    /// Broadcast a raw transaction, returning its id. Fails with the
    /// node's error message verbatim.
    async fn broadcast(&self, raw_hex: &str) -> Result<String, Error>;

    /// The balance of one address.
    async fn address_balance(&self, address: &str) -> Result<AddressBalance, Error>;
}

/// Fold spendable unspent outputs into per-address balances, one entry per
/// requested address, zero balances included.
pub(crate) fn fold_unspent(
    symbol: &str,
    addresses: &[String],
    utxos: &[Unspent],
) -> Vec<AddressBalance> {
    let mut confirmed: std::collections::HashMap<&str, Decimal> = Default::default();
    let mut unconfirmed: std::collections::HashMap<&str, Decimal> = Default::default();
    for utxo in utxos {
        if !utxo.spendable {
            continue;
        }
        let amount = Decimal::from_str(&utxo.amount).unwrap_or_default();
        let bucket = if utxo.confirmations > 0 {
            &mut confirmed
        } else {
            &mut unconfirmed
        };
        *bucket.entry(utxo.address.as_str()).or_default() += amount;
    }
    addresses
        .iter()
        .map(|address| {
            let c = confirmed.get(address.as_str()).copied().unwrap_or_default();
            let u = unconfirmed
                .get(address.as_str())
                .copied()
                .unwrap_or_default();
            AddressBalance {
                symbol: symbol.to_string(),
                address: address.clone(),
                balance: (c + u).normalize().to_string(),
                unconfirm_balance: u.normalize().to_string(),
                confirm_balance: c.normalize().to_string(),
            }
        })
        .collect()
}

/// Render a wire value that may arrive as a JSON string or number.
pub(crate) fn wire_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Parse a wire value into a decimal, treating anything unparsable as zero.
pub(crate) fn wire_decimal(value: &serde_json::Value) -> Decimal {
    Decimal::from_str(&wire_string(value)).unwrap_or_default()
}

/// Normalize a wire value already expressed in native units into a decimal
/// string without trailing zeros.
pub(crate) fn normalized_value(value: &serde_json::Value) -> String {
    wire_decimal(value).normalize().to_string()
}
