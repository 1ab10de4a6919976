//! Bounded-concurrency batch extraction.
//!
//! One producer spawns an extraction task per transaction behind a counting
//! semaphore; a coordinator moves finished results into a single-consumer
//! channel; the consumer notifies observers sequentially. Results are
//! emitted in completion order, which the observer contract allows; across
//! blocks ordering is enforced by the scanner driving one batch at a time.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Semaphore};

use qsk_common::{ExtractData, Observer, SourceKey, UnscanRecord, WatchList};

use crate::clients::NodeClient;
use crate::error::Error;
use crate::extract::Extractor;
use crate::model::ExtractResult;
use crate::store::ScanStore;

/// Width of the extraction worker pool.
pub const MAX_EXTRACTING_SIZE: usize = 15;

/// Fans transaction extraction out across a bounded worker pool and feeds
/// the results to the observers. Cloning is cheap and shares the worker
/// semaphore, so auxiliary producers (mempool push, retry drain) throttle
/// against the same pool.
#[derive(Clone)]
pub struct ExtractPipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    node: Arc<dyn NodeClient>,
    store: Arc<dyn ScanStore>,
    watch: Arc<dyn WatchList>,
    observers: Vec<Arc<dyn Observer>>,
    extracting: Arc<Semaphore>,
    extractor: Extractor,
    symbol: String,
}

impl ExtractPipeline {
    pub fn new(
        symbol: &str,
        decimals: u32,
        node: Arc<dyn NodeClient>,
        store: Arc<dyn ScanStore>,
        watch: Arc<dyn WatchList>,
        observers: Vec<Arc<dyn Observer>>,
    ) -> Result<Self, Error> {
        Ok(ExtractPipeline {
            inner: Arc::new(PipelineInner {
                node,
                store,
                watch,
                observers,
                extracting: Arc::new(Semaphore::new(MAX_EXTRACTING_SIZE)),
                extractor: Extractor::new(symbol, decimals)?,
                symbol: symbol.to_string(),
            }),
        })
    }

    /// Fetch, back-fill and extract a single transaction. `height` and
    /// `hash` carry the batch context into transactions the node reports
    /// without one; both are zero/empty for mempool extractions.
    pub async fn extract_transaction(
        &self,
        height: u64,
        hash: &str,
        tx_id: &str,
        positional_coinstake: bool,
    ) -> ExtractResult {
        let mut tx = match self.inner.node.transaction(tx_id).await {
            Ok(tx) => tx,
            Err(e) => {
                log::info!("block scanner can not extract transaction data: {e}");
                return ExtractResult::failed(tx_id, height, e.to_string());
            }
        };
        if height > 0 && tx.block_height == 0 {
            tx.block_height = height;
            tx.block_hash = hash.to_string();
        }
        if !tx.is_coinbase {
            for i in 0..tx.vins.len() {
                if !tx.vins[i].address.is_empty() {
                    continue;
                }
                let (source, vout) = (tx.vins[i].tx_id.clone(), tx.vins[i].vout);
                match self.inner.node.tx_out(&source, vout).await {
                    Ok(prev_out) => {
                        tx.vins[i].address = prev_out.address;
                        tx.vins[i].value = prev_out.value;
                    }
                    Err(e) => {
                        log::info!(
                            "block scanner can not trace source of vin {i} in {tx_id}: {e}"
                        );
                        return ExtractResult::failed(tx_id, height, e.to_string());
                    }
                }
            }
        }
        self.inner
            .extractor
            .extract(&tx, positional_coinstake, self.inner.watch.as_ref())
    }

    fn notify_extract(&self, height: u64, records: &BTreeMap<SourceKey, ExtractData>) -> usize {
        let mut failed = 0;
        for observer in &self.inner.observers {
            for (source_key, data) in records {
                if let Err(e) = observer.extract_notify(source_key, data) {
                    let rejection = Error::ObserverRejected(e.to_string());
                    log::error!("extract data notify unexpected error: {rejection}");
                    let record =
                        UnscanRecord::new(&self.inner.symbol, height, "", &rejection.to_string());
                    if let Err(store_err) = self.inner.store.save_unscan(&record) {
                        log::error!(
                            "block height: {height}, save unscan record failed: {store_err}"
                        );
                    }
                    failed += 1;
                }
            }
        }
        failed
    }

    /// Extract a batch of transactions, usually one block's worth, and
    /// notify the observers. Every failed transaction or refused delivery
    /// leaves an unscan record; the batch errs when any were counted.
    pub async fn extract_batch(
        &self,
        height: u64,
        hash: &str,
        tx_ids: &[String],
    ) -> Result<(), Error> {
        if tx_ids.is_empty() {
            return Err(Error::EmptyBatch);
        }
        let should_done = tx_ids.len();
        let (producer_tx, mut producer_rx) = mpsc::channel::<ExtractResult>(MAX_EXTRACTING_SIZE);
        let (worker_tx, mut worker_rx) = mpsc::channel::<ExtractResult>(1);
        let (quit_tx, mut quit_rx) = oneshot::channel::<()>();

        // Consumer: single-threaded observer notification, closes the quit
        // channel exactly when every transaction was accounted for.
        let consumer = {
            let pipeline = self.clone();
            tokio::spawn(async move {
                let mut done = 0usize;
                let mut failed = 0usize;
                while let Some(result) = worker_rx.recv().await {
                    if result.success {
                        failed += pipeline.notify_extract(height, &result.extract_data);
                        failed += pipeline.notify_extract(height, &result.extract_contract_data);
                    } else {
                        let reason = result.reason.unwrap_or_default();
                        let record =
                            UnscanRecord::new(&pipeline.inner.symbol, height, "", &reason);
                        if let Err(e) = pipeline.inner.store.save_unscan(&record) {
                            log::error!(
                                "block height: {height}, save unscan record failed: {e}"
                            );
                        }
                        failed += 1;
                    }
                    done += 1;
                    if done == should_done {
                        break;
                    }
                }
                let _ = quit_tx.send(());
                failed
            })
        };

        // Producer: one extraction task per transaction, throttled by the
        // shared semaphore, posting results as they complete.
        {
            let pipeline = self.clone();
            let hash = hash.to_string();
            let tx_ids = tx_ids.to_vec();
            tokio::spawn(async move {
                for (i, tx_id) in tx_ids.into_iter().enumerate() {
                    let permit = match pipeline.inner.extracting.clone().acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let pipeline = pipeline.clone();
                    let hash = hash.clone();
                    let producer_tx = producer_tx.clone();
                    // The second transaction of a block is the coinstake
                    // candidate; mempool batches carry no block positions.
                    let positional_coinstake = height > 0 && i == 1;
                    tokio::spawn(async move {
                        let result = pipeline
                            .extract_transaction(height, &hash, &tx_id, positional_coinstake)
                            .await;
                        let _ = producer_tx.send(result).await;
                        drop(permit);
                    });
                }
            });
        }

        // Coordinator: queue between out-of-order completion and the
        // single consumer.
        let mut queue: VecDeque<ExtractResult> = VecDeque::new();
        let mut producer_open = true;
        loop {
            tokio::select! {
                received = producer_rx.recv(), if producer_open => match received {
                    Some(result) => queue.push_back(result),
                    None => producer_open = false,
                },
                reserved = worker_tx.reserve(), if !queue.is_empty() => match reserved {
                    Ok(permit) => {
                        if let Some(front) = queue.pop_front() {
                            permit.send(front);
                        }
                    }
                    Err(_) => break,
                },
                _ = &mut quit_rx => break,
            }
        }
        drop(worker_tx);

        let failed = consumer.await.unwrap_or(0);
        if failed > 0 {
            Err(Error::IncompleteScan {
                height,
                failed,
                total: should_done,
            })
        } else {
            Ok(())
        }
    }
}
