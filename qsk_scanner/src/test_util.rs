//! Fixtures shared by the in-module tests: a scriptable in-memory node, a
//! recording observer and a static watch list.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use qsk_common::{
    AddressBalance, BlockHeader, Error as CommonError, ExtractData, Observer, ScanTarget,
    SourceKey, WatchList,
};

use crate::clients::{fold_unspent, NodeClient};
use crate::error::Error;
use crate::model::{Block, Transaction, Unspent, Vin, Vout};

/// Route test logs through the logger once per process.
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
struct MockChain {
    hashes: BTreeMap<u64, String>,
    blocks: HashMap<String, Block>,
    txs: HashMap<String, Transaction>,
    missing_txs: HashMap<String, String>,
    unavailable_txs: HashSet<String>,
    mempool: Vec<String>,
    unspent: Vec<Unspent>,
}

/// A node whose chain state tests mutate between scan passes.
#[derive(Default)]
pub(crate) struct MockNode {
    chain: Mutex<MockChain>,
}

impl MockNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_block(&self, block: Block) {
        let mut chain = self.chain.lock().expect("mock chain");
        chain.hashes.insert(block.height, block.hash.clone());
        chain.blocks.insert(block.hash.clone(), block);
    }

    pub fn add_tx(&self, tx: Transaction) {
        let mut chain = self.chain.lock().expect("mock chain");
        chain.unavailable_txs.remove(&tx.tx_id);
        chain.missing_txs.remove(&tx.tx_id);
        chain.txs.insert(tx.tx_id.clone(), tx);
    }

    /// The node answers a permanent "no information" for this id.
    pub fn set_missing(&self, tx_id: &str, reason: &str) {
        let mut chain = self.chain.lock().expect("mock chain");
        chain.missing_txs.insert(tx_id.to_string(), reason.to_string());
    }

    /// The node answers a transport error for this id.
    pub fn set_unavailable(&self, tx_id: &str) {
        let mut chain = self.chain.lock().expect("mock chain");
        chain.unavailable_txs.insert(tx_id.to_string());
    }

    pub fn set_mempool(&self, tx_ids: &[&str]) {
        let mut chain = self.chain.lock().expect("mock chain");
        chain.mempool = tx_ids.iter().map(|id| id.to_string()).collect();
    }

    pub fn set_unspent(&self, unspent: Vec<Unspent>) {
        self.chain.lock().expect("mock chain").unspent = unspent;
    }
}

#[async_trait]
impl NodeClient for MockNode {
    async fn tip_height(&self) -> Result<u64, Error> {
        let chain = self.chain.lock().expect("mock chain");
        chain
            .hashes
            .keys()
            .next_back()
            .copied()
            .ok_or_else(|| Error::Unavailable("empty mock chain".to_string()))
    }

    async fn block_hash(&self, height: u64) -> Result<String, Error> {
        let chain = self.chain.lock().expect("mock chain");
        chain
            .hashes
            .get(&height)
            .cloned()
            .ok_or(Error::HeightNotFound(height))
    }

    async fn block(&self, hash: &str) -> Result<Block, Error> {
        let chain = self.chain.lock().expect("mock chain");
        chain
            .blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::Generic(format!("mock has no block {hash}")))
    }

    async fn transaction(&self, tx_id: &str) -> Result<Transaction, Error> {
        let chain = self.chain.lock().expect("mock chain");
        if let Some(reason) = chain.missing_txs.get(tx_id) {
            return Err(Error::TxNotFound(reason.clone()));
        }
        if chain.unavailable_txs.contains(tx_id) {
            return Err(Error::Unavailable("connection refused".to_string()));
        }
        chain
            .txs
            .get(tx_id)
            .cloned()
            .ok_or_else(|| Error::Generic(format!("mock has no transaction {tx_id}")))
    }

    async fn tx_out(&self, tx_id: &str, vout: u64) -> Result<Vout, Error> {
        let tx = self.transaction(tx_id).await?;
        tx.vouts
            .into_iter()
            .find(|out| out.n == vout)
            .ok_or_else(|| Error::MissingVout {
                txid: tx_id.to_string(),
                vout,
            })
    }

    async fn mempool_tx_ids(&self) -> Result<Vec<String>, Error> {
        Ok(self.chain.lock().expect("mock chain").mempool.clone())
    }

    async fn list_unspent(&self, addresses: &[String]) -> Result<Vec<Unspent>, Error> {
        let chain = self.chain.lock().expect("mock chain");
        Ok(chain
            .unspent
            .iter()
            .filter(|utxo| addresses.contains(&utxo.address))
            .cloned()
            .collect())
    }

    async fn broadcast(&self, _raw_hex: &str) -> Result<String, Error> {
        Ok("broadcast-txid".to_string())
    }

    async fn address_balance(&self, address: &str) -> Result<AddressBalance, Error> {
        let addresses = [address.to_string()];
        let utxos = self.list_unspent(&addresses).await?;
        Ok(fold_unspent("QTUM", &addresses, &utxos)
            .pop()
            .unwrap_or_else(|| AddressBalance::empty("QTUM", address)))
    }
}

/// Watch list backed by a fixed address → source-key table.
pub(crate) struct StaticWatch {
    map: HashMap<String, String>,
}

impl StaticWatch {
    pub fn watching(pairs: &[(&str, &str)]) -> Self {
        StaticWatch {
            map: pairs
                .iter()
                .map(|(address, key)| (address.to_string(), key.to_string()))
                .collect(),
        }
    }
}

impl WatchList for StaticWatch {
    fn source_key(&self, target: &ScanTarget) -> Option<SourceKey> {
        self.map.get(&target.target).cloned()
    }
}

/// Observer that records everything it is notified of, and can be told to
/// refuse deliveries.
#[derive(Default)]
pub(crate) struct RecordingObserver {
    pub blocks: Mutex<Vec<BlockHeader>>,
    pub extracts: Mutex<Vec<(SourceKey, ExtractData)>>,
    pub reject: AtomicBool,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn extracted_keys(&self) -> Vec<SourceKey> {
        self.extracts
            .lock()
            .expect("observer extracts")
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn block_events(&self) -> Vec<BlockHeader> {
        self.blocks.lock().expect("observer blocks").clone()
    }

    pub fn refuse(&self, refuse: bool) {
        self.reject.store(refuse, Ordering::SeqCst);
    }
}

impl Observer for RecordingObserver {
    fn block_notify(&self, header: &BlockHeader) {
        self.blocks
            .lock()
            .expect("observer blocks")
            .push(header.clone());
    }

    fn extract_notify(&self, source_key: &str, data: &ExtractData) -> Result<(), CommonError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(CommonError::Rejected("observer refused".to_string()));
        }
        self.extracts
            .lock()
            .expect("observer extracts")
            .push((source_key.to_string(), data.clone()));
        Ok(())
    }
}

/// A coinbase transaction paying `value` to `address`.
pub(crate) fn coinbase_tx(
    tx_id: &str,
    height: u64,
    block_hash: &str,
    address: &str,
    value: &str,
) -> Transaction {
    Transaction {
        tx_id: tx_id.to_string(),
        block_hash: block_hash.to_string(),
        block_height: height,
        confirmations: 1,
        block_time: 1_539_000_000 + height as i64,
        is_coinbase: true,
        vins: vec![Vin {
            n: 0,
            ..Default::default()
        }],
        vouts: vec![Vout {
            n: 0,
            address: address.to_string(),
            value: value.to_string(),
            script_pub_key: "51".to_string(),
            script_type: "nonstandard".to_string(),
        }],
        ..Default::default()
    }
}

/// A plain transfer with fully described vins and vouts.
pub(crate) fn transfer_tx(
    tx_id: &str,
    height: u64,
    block_hash: &str,
    vins: &[(&str, u64, &str, &str)],
    vouts: &[(&str, &str)],
) -> Transaction {
    Transaction {
        tx_id: tx_id.to_string(),
        block_hash: block_hash.to_string(),
        block_height: height,
        confirmations: 1,
        block_time: 1_539_000_000 + height as i64,
        vins: vins
            .iter()
            .enumerate()
            .map(|(i, (source, vout, address, value))| Vin {
                tx_id: source.to_string(),
                vout: *vout,
                address: address.to_string(),
                value: value.to_string(),
                n: i as u64,
            })
            .collect(),
        vouts: vouts
            .iter()
            .enumerate()
            .map(|(i, (address, value))| Vout {
                n: i as u64,
                address: address.to_string(),
                value: value.to_string(),
                script_pub_key: "76a914dbb494".to_string(),
                script_type: "pubkeyhash".to_string(),
            })
            .collect(),
        ..Default::default()
    }
}

/// A block carrying the given transaction ids.
pub(crate) fn block_at(height: u64, hash: &str, previous: &str, tx: &[&str]) -> Block {
    Block {
        hash: hash.to_string(),
        previous_hash: previous.to_string(),
        merkle_root: format!("mr{height}"),
        height,
        time: 1_539_000_000 + height,
        tx: tx.iter().map(|id| id.to_string()).collect(),
        ..Default::default()
    }
}
