use std::collections::BTreeMap;

use qsk_common::{BlockHeader, ExtractData, SourceKey};
use serde::{Deserialize, Serialize};

/// A block as reported by the node: header fields plus the ordered list of
/// its transaction ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub hash: String,
    pub confirmations: u64,
    pub merkle_root: String,
    /// Exactly what the node reports, no normalisation: the fork check
    /// compares it byte for byte.
    pub previous_hash: String,
    pub height: u64,
    pub version: u64,
    pub time: u64,
    /// Ordered transaction ids. The first is the coinbase; the second, when
    /// present, is treated as the coinstake candidate.
    pub tx: Vec<String>,
}

impl Block {
    pub fn header(&self, symbol: &str) -> BlockHeader {
        BlockHeader {
            hash: self.hash.clone(),
            merkle_root: self.merkle_root.clone(),
            previous_hash: self.previous_hash.clone(),
            height: self.height,
            time: self.time,
            symbol: symbol.to_string(),
            fork: false,
        }
    }
}

/// A transaction input. Address and value may be absent on first fetch and
/// are back-filled from the producing transaction's matching vout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vin {
    /// Producing transaction id; empty for coinbase inputs.
    pub tx_id: String,
    /// Output index inside the producing transaction.
    pub vout: u64,
    pub address: String,
    pub value: String,
    /// Position of this input inside the spending transaction.
    pub n: u64,
}

/// A transaction output. Value is always present; address may be empty for
/// non-standard scripts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vout {
    pub n: u64,
    pub address: String,
    pub value: String,
    pub script_pub_key: String,
    pub script_type: String,
}

/// A decoded token-transfer event attached to a transaction by the node or
/// explorer. Amounts are raw integer strings; the token decimals travel on
/// the contract descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenReceipt {
    pub from: String,
    pub to: String,
    pub amount: String,
    pub contract_address: String,
    pub tx_hash: String,
    pub block_hash: String,
    pub block_height: u64,
}

/// A transaction with native-unit-adjusted decimal string values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub tx_id: String,
    pub size: u64,
    pub version: u64,
    pub lock_time: i64,
    pub block_hash: String,
    pub block_height: u64,
    pub confirmations: u64,
    pub block_time: i64,
    pub is_coinbase: bool,
    /// Set from the node's flag when it reports one; the pipeline also
    /// applies the positional heuristic (second transaction of a block).
    pub is_coinstake: bool,
    pub is_token_transfer: bool,
    pub fees: String,
    pub vins: Vec<Vin>,
    pub vouts: Vec<Vout>,
    pub token_receipts: Vec<TokenReceipt>,
}

/// An unspent output as reported by the node, with the stake spendability
/// policy already applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unspent {
    pub tx_id: String,
    pub vout: u64,
    pub address: String,
    pub script_pub_key: String,
    pub amount: String,
    pub confirmations: u64,
    pub spendable: bool,
}

/// Token holdings of one address under one contract, as decoded by the
/// explorer. The balance is a raw integer string scaled by `decimals`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBalance {
    pub contract_address: String,
    pub name: String,
    pub symbol: String,
    pub decimals: u32,
    pub balance: String,
}

/// The outcome of extracting one transaction: the native-ledger records and
/// the contract-ledger records, both keyed by source key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractResult {
    pub tx_id: String,
    pub block_height: u64,
    pub success: bool,
    /// Failure reason, recorded in the unscanned log.
    pub reason: Option<String>,
    /// Native-ledger records. Ordered map so replaying a block yields
    /// bytewise identical output.
    pub extract_data: BTreeMap<SourceKey, ExtractData>,
    /// Contract-ledger records, the coin on each entry carries the
    /// contract id.
    pub extract_contract_data: BTreeMap<SourceKey, ExtractData>,
}

impl ExtractResult {
    pub(crate) fn failed(tx_id: &str, block_height: u64, reason: String) -> Self {
        ExtractResult {
            tx_id: tx_id.to_string(),
            block_height,
            success: false,
            reason: Some(reason),
            ..Default::default()
        }
    }
}
