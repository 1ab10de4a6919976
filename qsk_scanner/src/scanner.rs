//! The block-by-block scan loop: ascent to the node tip, fork rewind,
//! mempool poll and the retry drain over the unscanned log.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use qsk_common::{AddressBalance, BlockHeader, ExtractData, Observer, SourceKey, UnscanRecord, WatchList};

use crate::clients::{fold_unspent, NodeClient};
use crate::config::Config;
use crate::error::Error;
use crate::model::Block;
use crate::pipeline::ExtractPipeline;
use crate::store::ScanStore;

/// Drives scan passes over the chain and owns the cursor and the retry log.
///
/// One pass per tick: the caller provides the cadence, either through
/// [`Scanner::run`] or by invoking [`Scanner::scan_pass`] from its own task
/// runner. [`Scanner::stop`] is honoured at every iteration boundary.
pub struct Scanner {
    config: Config,
    node: Arc<dyn NodeClient>,
    store: Arc<dyn ScanStore>,
    observers: Vec<Arc<dyn Observer>>,
    pipeline: ExtractPipeline,
    scanning: AtomicBool,
}

impl Scanner {
    pub fn new(
        config: Config,
        node: Arc<dyn NodeClient>,
        store: Arc<dyn ScanStore>,
        watch: Arc<dyn WatchList>,
        observers: Vec<Arc<dyn Observer>>,
    ) -> Result<Self, Error> {
        let pipeline = ExtractPipeline::new(
            &config.symbol,
            config.decimals,
            node.clone(),
            store.clone(),
            watch,
            observers.clone(),
        )?;
        Ok(Scanner {
            config,
            node,
            store,
            observers,
            pipeline,
            scanning: AtomicBool::new(true),
        })
    }

    /// The pipeline, for wiring auxiliary producers such as the mempool
    /// subscriber.
    pub fn pipeline(&self) -> ExtractPipeline {
        self.pipeline.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Interrupt the scan loop at the next iteration boundary.
    pub fn stop(&self) {
        self.scanning.store(false, Ordering::SeqCst);
    }

    /// Run scan passes until stopped, sleeping `period` between passes.
    /// Returns early when a pass reports the Persistence Port unreachable:
    /// there is no point ticking against a store that cannot record
    /// progress.
    pub async fn run(&self, period: Duration) -> Result<(), Error> {
        self.scanning.store(true, Ordering::SeqCst);
        while self.is_scanning() {
            self.scan_pass().await?;
            tokio::time::sleep(period).await;
        }
        Ok(())
    }

    /// One full pass: ascend from the cursor to the node tip, then the
    /// rescan margin, the mempool poll and the retry drain. Node and
    /// extraction failures are recorded and retried later; only an
    /// unreachable Persistence Port errs, as [`Error::Persist`].
    pub async fn scan_pass(&self) -> Result<(), Error> {
        let (mut current_height, mut current_hash) = match self.scanned_block_header().await {
            Ok(cursor) => cursor,
            Err(e @ Error::Persist(_)) => return Err(e),
            Err(e) => {
                log::info!("block scanner can not get scanned block header: {e}");
                return Ok(());
            }
        };

        loop {
            if !self.is_scanning() {
                return Ok(());
            }

            let max_height = match self.node.tip_height().await {
                Ok(height) => height,
                Err(e) => {
                    log::info!("block scanner can not get rpc-server block height: {e}");
                    break;
                }
            };
            if current_height >= max_height {
                log::info!(
                    "block scanner has scanned full chain data, current height: {max_height}"
                );
                break;
            }

            current_height += 1;
            log::info!("block scanner scanning height: {current_height} ...");

            let hash = match self.node.block_hash(current_height).await {
                Ok(hash) => hash,
                Err(e) => {
                    log::info!("block scanner can not get new block hash: {e}");
                    break;
                }
            };
            let block = match self.node.block(&hash).await {
                Ok(block) => block,
                Err(e) => {
                    log::info!("block scanner can not get new block data: {e}");
                    let record = UnscanRecord::new(
                        &self.config.symbol,
                        current_height,
                        "",
                        &e.to_string(),
                    );
                    self.store.save_unscan(&record).map_err(Error::persist)?;
                    log::info!("block height: {current_height} extract failed");
                    continue;
                }
            };

            if current_hash != block.previous_hash {
                match self.rewind_fork(current_height, &current_hash, &block).await {
                    Ok((height, hash)) => {
                        current_height = height;
                        current_hash = hash;
                    }
                    Err(e @ Error::Persist(_)) => return Err(e),
                    Err(e) => {
                        log::error!("block scanner can not rewind fork: {e}");
                        break;
                    }
                }
            } else {
                let extracted = if block.tx.is_empty() {
                    Ok(())
                } else {
                    self.pipeline
                        .extract_batch(block.height, &block.hash, &block.tx)
                        .await
                };
                match extracted {
                    Ok(()) => {
                        current_hash = hash;
                        self.store
                            .save_cursor(&self.config.symbol, current_height, &current_hash)
                            .map_err(Error::persist)?;
                        let header = block.header(&self.config.symbol);
                        self.store
                            .save_local_header(&header)
                            .map_err(Error::persist)?;
                        self.block_notify(&header);
                    }
                    Err(e) => {
                        // The cursor keeps pointing at the last fully
                        // emitted height; the unscan log owes this block.
                        log::info!(
                            "block scanner can not extract block {current_height}: {e}"
                        );
                        current_hash = hash;
                    }
                }
            }
        }

        let rescan = self.config.rescan_last_block_count;
        if rescan > 0 {
            for height in current_height.saturating_sub(rescan)..current_height {
                if height == 0 {
                    continue;
                }
                if let Err(e) = self.rescan_block(height).await {
                    if matches!(e, Error::Persist(_)) {
                        return Err(e);
                    }
                    log::info!("block scanner rescan height {height} failed: {e}");
                }
            }
        }

        if self.config.scan_mempool {
            self.scan_mempool().await;
        }

        self.rescan_failed_records().await
    }

    /// Fork rewind: ditch the local tip, move the cursor two blocks below
    /// it and notify the discarded header, best effort.
    async fn rewind_fork(
        &self,
        fork_height: u64,
        local_hash: &str,
        block: &Block,
    ) -> Result<(u64, String), Error> {
        let ditched = fork_height - 1;
        log::info!("block has been fork on height: {fork_height}");
        log::info!("block height: {ditched} local hash = {local_hash}");
        log::info!("block height: {ditched} mainnet hash = {}", block.previous_hash);

        let fork_header = self
            .store
            .local_header(&self.config.symbol, ditched)
            .ok()
            .flatten();

        log::info!("delete unscan records on block height: {ditched}");
        self.store
            .delete_unscan_by_height(&self.config.symbol, ditched)
            .map_err(Error::persist)?;

        let rewind_height = ditched.saturating_sub(2).max(1);
        let (height, hash) = match self
            .store
            .local_header(&self.config.symbol, rewind_height)
            .ok()
            .flatten()
        {
            Some(header) => (header.height, header.hash),
            None => {
                // Not cached locally anymore, ask the node.
                log::info!("block scanner prev block height: {rewind_height}");
                let prev_hash = self.node.block_hash(rewind_height).await?;
                let prev_block = self.node.block(&prev_hash).await?;
                (prev_block.height, prev_block.hash)
            }
        };

        log::info!("rescan block on height: {height}, hash: {hash} ...");
        self.store
            .save_cursor(&self.config.symbol, height, &hash)
            .map_err(Error::persist)?;

        if let Some(mut header) = fork_header {
            header.fork = true;
            self.block_notify(&header);
        }

        Ok((height, hash))
    }

    /// Scan one height without observer block notification, used by the
    /// rescan margin and the retry drain.
    async fn rescan_block(&self, height: u64) -> Result<Block, Error> {
        let hash = self.node.block_hash(height).await?;
        let block = match self.node.block(&hash).await {
            Ok(block) => block,
            Err(e) => {
                log::info!("block scanner can not get new block data: {e}");
                let record =
                    UnscanRecord::new(&self.config.symbol, height, "", &e.to_string());
                self.store.save_unscan(&record).map_err(Error::persist)?;
                return Err(e);
            }
        };
        log::info!("block scanner scanning height: {} ...", block.height);
        if !block.tx.is_empty() {
            if let Err(e) = self
                .pipeline
                .extract_batch(block.height, &block.hash, &block.tx)
                .await
            {
                log::info!("block scanner can not extract block {}: {e}", block.height);
            }
        }
        Ok(block)
    }

    /// Scan one height on demand and notify observers of its header.
    pub async fn scan_block(&self, height: u64) -> Result<(), Error> {
        let block = self.rescan_block(height).await?;
        self.block_notify(&block.header(&self.config.symbol));
        Ok(())
    }

    async fn scan_mempool(&self) {
        log::info!("block scanner scanning mempool ...");
        let tx_ids = match self.node.mempool_tx_ids().await {
            Ok(ids) => ids,
            Err(e) => {
                log::info!("block scanner can not get mempool data: {e}");
                return;
            }
        };
        if tx_ids.is_empty() {
            return;
        }
        if let Err(e) = self.pipeline.extract_batch(0, "", &tx_ids).await {
            log::info!("block scanner can not extract mempool transactions: {e}");
        }
    }

    /// Drain the unscanned log: replay single transactions and whole
    /// blocks, then purge entries the node permanently cannot serve.
    async fn rescan_failed_records(&self) -> Result<(), Error> {
        let records = self
            .store
            .unscan_records(&self.config.symbol)
            .map_err(Error::persist)?;

        for record in records {
            // Mempool extractions have no block to replay.
            if record.block_height == 0 {
                continue;
            }
            log::info!("block scanner rescanning height: {} ...", record.block_height);

            if !record.tx_id.is_empty() {
                if let Err(e) = self.node.transaction(&record.tx_id).await {
                    if e.is_permanent_tx_miss(&self.config.tx_not_found_reason) {
                        self.store
                            .delete_unscan_by_id(&self.config.symbol, &record.id)
                            .map_err(Error::persist)?;
                        continue;
                    }
                }
                let tx_ids = vec![record.tx_id.clone()];
                match self
                    .pipeline
                    .extract_batch(record.block_height, "", &tx_ids)
                    .await
                {
                    Ok(()) => {
                        self.store
                            .delete_unscan_by_id(&self.config.symbol, &record.id)
                            .map_err(Error::persist)?;
                    }
                    Err(e) => log::info!(
                        "block scanner can not replay transaction {}: {e}",
                        record.tx_id
                    ),
                }
            } else {
                let hash = match self.node.block_hash(record.block_height).await {
                    Ok(hash) => hash,
                    Err(e) => {
                        log::info!("block scanner can not get new block hash: {e}");
                        continue;
                    }
                };
                let block = match self.node.block(&hash).await {
                    Ok(block) => block,
                    Err(e) => {
                        log::info!("block scanner can not get new block data: {e}");
                        continue;
                    }
                };
                let replayed = if block.tx.is_empty() {
                    Ok(())
                } else {
                    self.pipeline
                        .extract_batch(block.height, &block.hash, &block.tx)
                        .await
                };
                match replayed {
                    Ok(()) => {
                        self.store
                            .delete_unscan_by_height(&self.config.symbol, record.block_height)
                            .map_err(Error::persist)?;
                    }
                    Err(e) => log::info!(
                        "block scanner can not replay block {}: {e}",
                        record.block_height
                    ),
                }
            }
        }

        let remaining = self
            .store
            .unscan_records(&self.config.symbol)
            .map_err(Error::persist)?;
        for record in remaining {
            if record.reason.starts_with(&self.config.tx_not_found_reason) {
                self.store
                    .delete_unscan_by_id(&self.config.symbol, &record.id)
                    .map_err(Error::persist)?;
            }
        }
        Ok(())
    }

    /// The cursor this scanner would resume from: the persisted one, or one
    /// block below the node tip on first start.
    async fn scanned_block_header(&self) -> Result<(u64, String), Error> {
        let (mut height, mut hash) = self
            .store
            .cursor(&self.config.symbol)
            .map_err(Error::persist)?;
        if height == 0 {
            let tip = self.node.tip_height().await?;
            height = tip.saturating_sub(1);
            hash = self.node.block_hash(height).await?;
        }
        Ok((height, hash))
    }

    /// The node's current tip.
    pub async fn current_block_header(&self) -> Result<(u64, String), Error> {
        let height = self.node.tip_height().await?;
        let hash = self.node.block_hash(height).await?;
        Ok((height, hash))
    }

    /// The persisted cursor height, 0 when never scanned.
    pub fn scanned_height(&self) -> u64 {
        self.store
            .cursor(&self.config.symbol)
            .map(|(height, _)| height)
            .unwrap_or(0)
    }

    /// Reset the cursor so the next pass re-scans from `height`.
    pub async fn set_rescan_height(&self, height: u64) -> Result<(), Error> {
        if height < 1 {
            return Err(Error::RescanHeightZero);
        }
        let target = height - 1;
        let hash = self.node.block_hash(target).await?;
        self.store
            .save_cursor(&self.config.symbol, target, &hash)
            .map_err(Error::persist)
    }

    /// On-demand extraction of a single transaction, native and contract
    /// records merged per source key. Mempool context: no block.
    pub async fn extract_transaction_data(
        &self,
        tx_id: &str,
    ) -> Result<BTreeMap<SourceKey, Vec<ExtractData>>, Error> {
        let result = self.pipeline.extract_transaction(0, "", tx_id, false).await;
        if !result.success {
            return Err(Error::Generic("extract transaction failed".to_string()));
        }
        let mut merged: BTreeMap<SourceKey, Vec<ExtractData>> = BTreeMap::new();
        for (key, data) in result.extract_data {
            merged.entry(key).or_default().push(data);
        }
        for (key, data) in result.extract_contract_data {
            merged.entry(key).or_default().push(data);
        }
        Ok(merged)
    }

    /// Spendable balances of the given addresses, folded from their
    /// unspent outputs; zero entries for addresses without any.
    pub async fn balances(&self, addresses: &[String]) -> Result<Vec<AddressBalance>, Error> {
        let utxos = self.node.list_unspent(addresses).await?;
        Ok(fold_unspent(&self.config.symbol, addresses, &utxos))
    }

    fn block_notify(&self, header: &BlockHeader) {
        for observer in &self.observers {
            observer.block_notify(header);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerType, TX_NOT_FOUND_REASON};
    use crate::model::{TokenReceipt, Unspent};
    use crate::store::MemoryStore;
    use crate::test_util::{block_at, coinbase_tx, transfer_tx, MockNode, RecordingObserver, StaticWatch};

    fn scanner(
        node: Arc<MockNode>,
        store: Arc<MemoryStore>,
        watch: StaticWatch,
        observer: Arc<RecordingObserver>,
    ) -> Scanner {
        let config = Config::new("QTUM", ServerType::Rpc, "http://localhost:3889");
        Scanner::new(config, node, store, Arc::new(watch), vec![observer]).expect("scanner")
    }

    /// Blocks `from..=to`, each holding one coinbase paying the miner.
    fn seed_chain(node: &MockNode, from: u64, to: u64) {
        for height in from..=to {
            let hash = format!("h{height}");
            let prev = format!("h{}", height - 1);
            let cb = format!("cb{height}");
            node.add_block(block_at(height, &hash, &prev, &[&cb]));
            node.add_tx(coinbase_tx(&cb, height, &hash, "miner", "4"));
        }
    }

    #[tokio::test]
    async fn ascends_to_tip_and_cursor_is_monotone() {
        crate::test_util::init_logging();
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        seed_chain(&node, 1, 4);
        store.save_cursor("QTUM", 1, "h1").expect("seed cursor");

        let scanner = scanner(
            node.clone(),
            store.clone(),
            StaticWatch::watching(&[]),
            observer.clone(),
        );
        scanner.scan_pass().await.expect("pass");
        assert_eq!(
            store.cursor("QTUM").expect("cursor"),
            (4, "h4".to_string())
        );
        let notified: Vec<u64> = observer.block_events().iter().map(|h| h.height).collect();
        assert_eq!(notified, vec![2, 3, 4]);

        // Cursor only grows while the chain extends without forks.
        seed_chain(&node, 5, 6);
        scanner.scan_pass().await.expect("pass");
        assert_eq!(
            store.cursor("QTUM").expect("cursor"),
            (6, "h6".to_string())
        );
    }

    #[tokio::test]
    async fn bootstraps_one_block_below_the_tip() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        seed_chain(&node, 1, 5);

        let scanner = scanner(
            node,
            store.clone(),
            StaticWatch::watching(&[]),
            observer.clone(),
        );
        scanner.scan_pass().await.expect("pass");
        assert_eq!(
            store.cursor("QTUM").expect("cursor"),
            (5, "h5".to_string())
        );
        let notified: Vec<u64> = observer.block_events().iter().map(|h| h.height).collect();
        assert_eq!(notified, vec![5]);
    }

    #[tokio::test]
    async fn emits_extract_records_for_watched_credit() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        seed_chain(&node, 1, 99);
        node.add_block(block_at(100, "h100", "h99", &["cb100", "cs100", "T"]));
        node.add_tx(coinbase_tx("cb100", 100, "h100", "miner", "4"));
        node.add_tx(transfer_tx(
            "cs100",
            100,
            "h100",
            &[("stake", 0, "staker", "100")],
            &[("staker", "100.4")],
        ));
        node.add_tx(transfer_tx(
            "T",
            100,
            "h100",
            &[("prev", 0, "Qsender", "0.0109")],
            &[("A", "0.01"), ("Qchange", "0.0008")],
        ));
        store.save_cursor("QTUM", 99, "h99").expect("seed cursor");

        let scanner = scanner(
            node,
            store.clone(),
            StaticWatch::watching(&[("A", "account-1")]),
            observer.clone(),
        );
        scanner.scan_pass().await.expect("pass");

        let extracts = observer.extracts.lock().expect("extracts");
        assert_eq!(extracts.len(), 1);
        let (key, data) = &extracts[0];
        assert_eq!(key, "account-1");
        assert_eq!(data.tx_outputs[0].amount, "0.01");
        assert_eq!(data.tx_outputs[0].block_height, 100);
    }

    #[tokio::test]
    async fn fork_rewinds_two_blocks_below_the_ditched_tip() {
        crate::test_util::init_logging();
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();

        // Local view: scanned up to (100, h100), recent headers cached.
        store.save_cursor("QTUM", 100, "h100").expect("seed cursor");
        for height in 95..=100 {
            let header = BlockHeader {
                hash: format!("h{height}"),
                height,
                symbol: "QTUM".to_string(),
                ..Default::default()
            };
            store.save_local_header(&header).expect("seed header");
        }
        store
            .save_unscan(&UnscanRecord::new("QTUM", 100, "", "stale"))
            .expect("seed unscan");

        // The node now reports a 101 whose parent is not our h100; the
        // replacement chain below it is not served, so the pass stops
        // right after the rewind.
        node.add_block(block_at(101, "h101b", "x100", &["cb101b"]));
        node.add_tx(coinbase_tx("cb101b", 101, "h101b", "miner", "4"));

        let scanner = scanner(
            node,
            store.clone(),
            StaticWatch::watching(&[]),
            observer.clone(),
        );
        scanner.scan_pass().await.expect("pass");

        assert_eq!(
            store.cursor("QTUM").expect("cursor"),
            (98, "h98".to_string())
        );
        assert!(store.unscan_records("QTUM").expect("list").is_empty());

        let events = observer.block_events();
        assert_eq!(events.len(), 1);
        assert!(events[0].fork);
        assert_eq!(events[0].hash, "h100");
        assert_eq!(events[0].height, 100);
    }

    #[tokio::test]
    async fn fork_rewind_clamps_to_height_one() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        seed_chain(&node, 1, 3);
        store.save_cursor("QTUM", 2, "wrong2").expect("seed cursor");
        let header = BlockHeader {
            hash: "h1".to_string(),
            height: 1,
            symbol: "QTUM".to_string(),
            ..Default::default()
        };
        store.save_local_header(&header).expect("seed header");

        let scanner = scanner(
            node,
            store.clone(),
            StaticWatch::watching(&[]),
            observer,
        );
        scanner.scan_pass().await.expect("pass");

        // Fork at 3 over local tip 2: rewind lands on max(1, 0) = 1, then
        // the pass re-ascends the healthy chain.
        let (height, hash) = store.cursor("QTUM").expect("cursor");
        assert_eq!((height, hash), (3, "h3".to_string()));
    }

    #[tokio::test]
    async fn partial_vin_leaves_unscan_record_then_recovers() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        seed_chain(&node, 1, 199);
        node.add_block(block_at(200, "h200", "h199", &["spend"]));
        node.add_tx(transfer_tx(
            "spend",
            200,
            "h200",
            &[("funding", 1, "", "")],
            &[("A", "0.5")],
        ));
        node.set_unavailable("funding");
        store.save_cursor("QTUM", 199, "h199").expect("seed cursor");

        let scanner = scanner(
            node.clone(),
            store.clone(),
            StaticWatch::watching(&[("A", "account-1")]),
            observer.clone(),
        );

        scanner.scan_pass().await.expect("pass");
        // No record emitted, the cursor did not advance past the broken
        // block, and the unscan log owes height 200.
        assert!(observer.extracted_keys().is_empty());
        assert_eq!(
            store.cursor("QTUM").expect("cursor"),
            (199, "h199".to_string())
        );
        let records = store.unscan_records("QTUM").expect("list");
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].block_height, 200);
        assert!(records[0].tx_id.is_empty());
        assert!(records[0].reason.contains("connection refused"));

        // The producing transaction becomes available: the next pass
        // emits the record and clears the log.
        node.add_tx(transfer_tx(
            "funding",
            190,
            "h190",
            &[("earlier", 0, "x", "1")],
            &[("ignored", "0.2"), ("A", "0.5009")],
        ));
        scanner.scan_pass().await.expect("pass");
        assert_eq!(
            store.cursor("QTUM").expect("cursor"),
            (200, "h200".to_string())
        );
        assert!(store.unscan_records("QTUM").expect("list").is_empty());
        assert!(!observer.extracted_keys().is_empty());
    }

    #[tokio::test]
    async fn permanent_miss_is_purged_without_notification() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        seed_chain(&node, 1, 10);
        store.save_cursor("QTUM", 10, "h10").expect("seed cursor");
        store
            .save_unscan(&UnscanRecord::new("QTUM", 5, "ghost", "transport error"))
            .expect("seed unscan");
        node.set_missing("ghost", TX_NOT_FOUND_REASON);

        let scanner = scanner(
            node,
            store.clone(),
            StaticWatch::watching(&[("A", "account-1")]),
            observer.clone(),
        );
        scanner.scan_pass().await.expect("pass");

        assert!(store.unscan_records("QTUM").expect("list").is_empty());
        assert!(observer.extracted_keys().is_empty());
    }

    #[tokio::test]
    async fn retry_replays_single_transactions() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        seed_chain(&node, 1, 10);
        store.save_cursor("QTUM", 10, "h10").expect("seed cursor");
        node.add_tx(transfer_tx(
            "owed",
            7,
            "h7",
            &[("p", 0, "x", "0.2")],
            &[("A", "0.1")],
        ));
        store
            .save_unscan(&UnscanRecord::new("QTUM", 7, "owed", "was unavailable"))
            .expect("seed unscan");

        let scanner = scanner(
            node,
            store.clone(),
            StaticWatch::watching(&[("A", "account-1")]),
            observer.clone(),
        );
        scanner.scan_pass().await.expect("pass");

        assert!(store.unscan_records("QTUM").expect("list").is_empty());
        assert_eq!(observer.extracted_keys(), vec!["account-1".to_string()]);
    }

    #[tokio::test]
    async fn mempool_poll_extracts_with_empty_block_context() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        seed_chain(&node, 1, 3);
        store.save_cursor("QTUM", 3, "h3").expect("seed cursor");
        node.add_tx(transfer_tx(
            "m1",
            0,
            "",
            &[("p", 0, "x", "0.2")],
            &[("A", "0.1")],
        ));
        node.set_mempool(&["m1"]);

        let config = Config::new("QTUM", ServerType::Rpc, "http://localhost:3889")
            .scan_mempool(true);
        let scanner = Scanner::new(
            config,
            node,
            store,
            Arc::new(StaticWatch::watching(&[("A", "account-1")])),
            vec![observer.clone()],
        )
        .expect("scanner");
        scanner.scan_pass().await.expect("pass");

        let extracts = observer.extracts.lock().expect("extracts");
        assert_eq!(extracts.len(), 1);
        assert_eq!(extracts[0].1.tx_outputs[0].block_height, 0);
        assert_eq!(extracts[0].1.tx_outputs[0].block_hash, "");
    }

    #[tokio::test]
    async fn stop_interrupts_the_ascent() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        seed_chain(&node, 1, 50);
        store.save_cursor("QTUM", 1, "h1").expect("seed cursor");

        let scanner = scanner(
            node,
            store.clone(),
            StaticWatch::watching(&[]),
            RecordingObserver::new(),
        );
        scanner.stop();
        scanner.scan_pass().await.expect("pass");
        // The interrupted pass never advanced.
        assert_eq!(
            store.cursor("QTUM").expect("cursor"),
            (1, "h1".to_string())
        );
    }

    /// Store whose writes fail, standing in for an unwritable directory.
    struct BrokenStore {
        inner: MemoryStore,
    }

    impl ScanStore for BrokenStore {
        fn cursor(&self, symbol: &str) -> Result<(u64, String), Error> {
            self.inner.cursor(symbol)
        }

        fn save_cursor(&self, _symbol: &str, _height: u64, _hash: &str) -> Result<(), Error> {
            Err(Error::Generic("read-only store".to_string()))
        }

        fn save_local_header(&self, header: &BlockHeader) -> Result<(), Error> {
            self.inner.save_local_header(header)
        }

        fn local_header(&self, symbol: &str, height: u64) -> Result<Option<BlockHeader>, Error> {
            self.inner.local_header(symbol, height)
        }

        fn unscan_records(&self, symbol: &str) -> Result<Vec<UnscanRecord>, Error> {
            self.inner.unscan_records(symbol)
        }

        fn save_unscan(&self, record: &UnscanRecord) -> Result<(), Error> {
            self.inner.save_unscan(record)
        }

        fn delete_unscan_by_height(&self, symbol: &str, height: u64) -> Result<(), Error> {
            self.inner.delete_unscan_by_height(symbol, height)
        }

        fn delete_unscan_by_id(&self, symbol: &str, id: &str) -> Result<(), Error> {
            self.inner.delete_unscan_by_id(symbol, id)
        }
    }

    #[tokio::test]
    async fn unreachable_store_is_fatal() {
        let node = MockNode::new();
        seed_chain(&node, 1, 3);
        let store = Arc::new(BrokenStore {
            inner: MemoryStore::new(),
        });
        store
            .inner
            .save_cursor("QTUM", 1, "h1")
            .expect("seed cursor");

        let config = Config::new("QTUM", ServerType::Rpc, "http://localhost:3889");
        let scanner = Scanner::new(
            config,
            node,
            store,
            Arc::new(StaticWatch::watching(&[])),
            vec![RecordingObserver::new()],
        )
        .expect("scanner");

        // The first cursor commit fails: the pass surfaces a fatal
        // persistence error instead of recording and moving on.
        let result = scanner.scan_pass().await;
        assert!(matches!(result, Err(Error::Persist(_))));
    }

    #[tokio::test]
    async fn set_rescan_height_moves_the_cursor_back() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        seed_chain(&node, 1, 10);
        store.save_cursor("QTUM", 10, "h10").expect("seed cursor");

        let scanner = scanner(
            node,
            store.clone(),
            StaticWatch::watching(&[]),
            RecordingObserver::new(),
        );
        scanner.set_rescan_height(5).await.expect("set rescan");
        assert_eq!(
            store.cursor("QTUM").expect("cursor"),
            (4, "h4".to_string())
        );
        assert!(matches!(
            scanner.set_rescan_height(0).await,
            Err(Error::RescanHeightZero)
        ));
    }

    #[tokio::test]
    async fn extract_transaction_data_merges_both_ledgers() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        let mut tx = transfer_tx(
            "T",
            100,
            "h100",
            &[("p", 0, "A", "0.2")],
            &[("B", "0.1")],
        );
        tx.is_token_transfer = true;
        tx.token_receipts = vec![TokenReceipt {
            from: "A".to_string(),
            to: "B".to_string(),
            amount: "100000000".to_string(),
            contract_address: "0xf397f39ce992b0f5bdc7ec1109d676d07f7af2f9".to_string(),
            tx_hash: "T".to_string(),
            block_hash: "h100".to_string(),
            block_height: 100,
        }];
        node.add_tx(tx);

        let scanner = scanner(
            node,
            store,
            StaticWatch::watching(&[("A", "account-a"), ("B", "account-b")]),
            RecordingObserver::new(),
        );
        let merged = scanner
            .extract_transaction_data("T")
            .await
            .expect("extract");

        // Each key collects its native record and its contract record.
        assert_eq!(merged["account-a"].len(), 2);
        assert_eq!(merged["account-b"].len(), 2);
    }

    #[tokio::test]
    async fn balances_fold_spendable_unspent() {
        let node = MockNode::new();
        let store = Arc::new(MemoryStore::new());
        node.set_unspent(vec![
            Unspent {
                tx_id: "u1".to_string(),
                vout: 0,
                address: "A".to_string(),
                amount: "1.5".to_string(),
                confirmations: 10,
                spendable: true,
                ..Default::default()
            },
            Unspent {
                tx_id: "u2".to_string(),
                vout: 0,
                address: "A".to_string(),
                amount: "0.5".to_string(),
                confirmations: 0,
                spendable: true,
                ..Default::default()
            },
            Unspent {
                tx_id: "u3".to_string(),
                vout: 0,
                address: "A".to_string(),
                amount: "9".to_string(),
                confirmations: 3,
                spendable: false,
                ..Default::default()
            },
        ]);

        let scanner = scanner(
            node,
            store,
            StaticWatch::watching(&[]),
            RecordingObserver::new(),
        );
        let addresses = vec!["A".to_string(), "B".to_string()];
        let balances = scanner.balances(&addresses).await.expect("balances");

        assert_eq!(balances.len(), 2);
        assert_eq!(balances[0].confirm_balance, "1.5");
        assert_eq!(balances[0].unconfirm_balance, "0.5");
        assert_eq!(balances[0].balance, "2");
        assert_eq!(balances[1].balance, "0");
    }
}
