#![cfg_attr(not(test), deny(clippy::unwrap_used))]

//! # QSK Scanner
//!
//! A fork-aware block scanner for a UTXO chain carrying a QRC20-style token
//! layer. It follows the chain block by block over a persistent cursor,
//! extracts the transactions touching a set of watched addresses into
//! native-ledger and contract-ledger records, and pushes them to observers,
//! surviving node outages, reorganisations and delivery failures through a
//! persistent retry log.
//!
//! For an entry point see [`Scanner::new()`]; the upstream node is reached
//! through a [`NodeClient`], either [`RpcClient`] against a full node or
//! [`ExplorerClient`] against an insight-style explorer.

mod clients;
mod config;
mod error;
mod extract;
#[cfg(feature = "mempool")]
mod mempool;
mod model;
mod pipeline;
mod scanner;
mod store;
#[cfg(test)]
pub(crate) mod test_util;

pub use crate::clients::{ExplorerClient, NodeClient, RpcClient};
pub use crate::config::{
    Config, ServerType, DEFAULT_DECIMALS, STAKE_CONFIRMATIONS, TX_NOT_FOUND_REASON,
};
pub use crate::error::Error;
pub use crate::extract::Extractor;
pub use crate::model::{
    Block, ExtractResult, TokenBalance, TokenReceipt, Transaction, Unspent, Vin, Vout,
};
pub use crate::pipeline::{ExtractPipeline, MAX_EXTRACTING_SIZE};
pub use crate::scanner::Scanner;
pub use crate::store::{FsStore, MemoryStore, ScanStore};

#[cfg(feature = "mempool")]
pub use crate::mempool::MempoolSubscriber;

pub use qsk_common;
