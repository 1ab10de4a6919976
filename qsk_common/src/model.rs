use serde::{Deserialize, Serialize};

use crate::sid;
use crate::Error;

/// Delivery status of a transaction summary. The scanner only ever emits
/// successfully extracted transactions.
pub const TX_STATUS_SUCCESS: &str = "1";

/// Transaction classification carried on summaries and ledger entries.
pub const TX_TYPE_PLAIN: u64 = 0;
/// A token transfer decoded from contract receipts.
pub const TX_TYPE_CONTRACT: u64 = 1;
/// A proof-of-stake reward transaction.
pub const TX_TYPE_COINSTAKE: u64 = 100;

/// A scanned block header as persisted locally and notified to observers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub hash: String,
    pub merkle_root: String,
    pub previous_hash: String,
    pub height: u64,
    pub time: u64,
    pub symbol: String,
    /// True when this notification reports a header discarded by a chain
    /// reorganisation rather than a newly scanned one.
    pub fork: bool,
}

/// The ledger a record belongs to: the native chain or one smart contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub symbol: String,
    pub is_contract: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub contract_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract: Option<SmartContract>,
}

impl Coin {
    /// The native ledger of the chain identified by `symbol`.
    pub fn native(symbol: &str) -> Self {
        Coin {
            symbol: symbol.to_string(),
            is_contract: false,
            contract_id: String::new(),
            contract: None,
        }
    }

    /// The token ledger of the contract at `address`, with a deterministic
    /// contract id.
    pub fn contract(symbol: &str, address: &str, protocol: &str) -> Self {
        let contract_id = sid::gen_contract_id(symbol, address);
        Coin {
            symbol: symbol.to_string(),
            is_contract: true,
            contract_id: contract_id.clone(),
            contract: Some(SmartContract {
                contract_id,
                address: address.to_string(),
                protocol: protocol.to_string(),
                symbol: symbol.to_string(),
            }),
        }
    }
}

/// Descriptor of the contract a token ledger entry belongs to. Token
/// decimals travel here, not on the ledger entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartContract {
    pub contract_id: String,
    pub address: String,
    pub protocol: String,
    pub symbol: String,
}

/// A debit: a transaction input spending from a watched address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    /// Transaction that produced the spent output.
    pub source_tx_id: String,
    /// Output index inside the producing transaction.
    pub source_index: u64,
    /// Transaction this input belongs to.
    pub tx_id: String,
    pub address: String,
    pub amount: String,
    pub coin: Coin,
    /// Position of this input inside the transaction.
    pub index: u64,
    /// Stable ledger-entry identifier, see [`sid::gen_input_sid`].
    pub sid: String,
    pub created_at: i64,
    pub block_height: u64,
    pub block_hash: String,
    pub tx_type: u64,
}

/// A credit: a transaction output paying to a watched address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub tx_id: String,
    pub address: String,
    pub amount: String,
    pub coin: Coin,
    /// Position of this output inside the transaction.
    pub index: u64,
    /// Stable ledger-entry identifier, see [`sid::gen_output_sid`].
    pub sid: String,
    /// Locking script of the output, preserved even when the address is
    /// empty for non-standard scripts.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub script_pub_key: String,
    pub created_at: i64,
    pub block_height: u64,
    pub block_hash: String,
    /// Confirmation count at extraction time.
    pub confirm: i64,
    pub tx_type: u64,
}

/// Consolidated view of the transaction an [`ExtractData`] belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    /// Workspace-wide transaction identifier, see [`sid::gen_wtx_id`].
    pub wtx_id: String,
    pub tx_id: String,
    /// Every funding `"address:value"` pair of the transaction.
    pub from: Vec<String>,
    /// Every receiving `"address:value"` pair of the transaction.
    pub to: Vec<String>,
    pub fees: String,
    pub coin: Coin,
    pub block_hash: String,
    pub block_height: u64,
    pub decimal: u32,
    pub confirm_time: i64,
    pub status: String,
    pub tx_type: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tx_action: String,
}

/// Everything extracted from one transaction for one source key: the inputs
/// debited from it, the outputs credited to it, and the transaction summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractData {
    pub tx_inputs: Vec<TxInput>,
    pub tx_outputs: Vec<TxOutput>,
    pub transaction: Option<TransactionSummary>,
}

/// A persistent marker meaning "this block or this transaction at this
/// height still owes observer delivery".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnscanRecord {
    pub id: String,
    pub symbol: String,
    pub block_height: u64,
    /// Empty for whole-block records.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tx_id: String,
    pub reason: String,
}

impl UnscanRecord {
    pub fn new(symbol: &str, block_height: u64, tx_id: &str, reason: &str) -> Self {
        UnscanRecord {
            id: sid::gen_unscan_id(symbol, block_height, tx_id),
            symbol: symbol.to_string(),
            block_height,
            tx_id: tx_id.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Spendable balance of one address, folded from its unspent outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressBalance {
    pub symbol: String,
    pub address: String,
    pub balance: String,
    pub unconfirm_balance: String,
    pub confirm_balance: String,
}

impl AddressBalance {
    /// A zero balance for an address without unspent outputs.
    pub fn empty(symbol: &str, address: &str) -> Self {
        AddressBalance {
            symbol: symbol.to_string(),
            address: address.to_string(),
            balance: "0".to_string(),
            unconfirm_balance: "0".to_string(),
            confirm_balance: "0".to_string(),
        }
    }
}

/// What kind of entity a watch lookup refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanTargetKind {
    /// An address belonging to an account.
    AccountAddress,
    /// A contract address.
    ContractAddress,
}

/// One watch-predicate lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub target: String,
    pub symbol: String,
    pub kind: ScanTargetKind,
}

/// Opaque identifier grouping extract records belonging to the same logical
/// owner, typically an account id.
pub type SourceKey = String;

/// The watch predicate consulted for every address the scanner sees.
pub trait WatchList: Send + Sync {
    /// Returns the source key the target belongs to, or `None` when the
    /// target is not watched.
    fn source_key(&self, target: &ScanTarget) -> Option<SourceKey>;
}

/// Downstream consumer of scan results. Observers are registered before the
/// scanner starts and the set is fixed during a pass.
pub trait Observer: Send + Sync {
    /// A block was scanned (`fork == false`) or discarded by a rewind
    /// (`fork == true`).
    fn block_notify(&self, header: &BlockHeader);

    /// Deliver the extract data of one transaction for one source key. An
    /// error here is recorded by the scanner and the delivery is retried on
    /// a later pass.
    fn extract_notify(&self, source_key: &str, data: &ExtractData) -> Result<(), Error>;
}
