//! Pure extraction of ledger records from a transaction.
//!
//! The extractor never touches the node: it expects vins to be already
//! back-filled and, for the same transaction and watch list, produces
//! bytewise identical output on every run.

use rust_decimal::Decimal;

use qsk_common::precision::{parse_or_zero, Precision};
use qsk_common::{
    sid, Coin, ScanTarget, ScanTargetKind, SourceKey, TransactionSummary, TxInput, TxOutput,
    WatchList, TX_STATUS_SUCCESS, TX_TYPE_COINSTAKE, TX_TYPE_CONTRACT, TX_TYPE_PLAIN,
};

use crate::error::Error;
use crate::model::{ExtractResult, Transaction};

/// Protocol tag attached to contract-ledger coins.
const TOKEN_PROTOCOL: &str = "qrc20";

/// Turns one transaction into native-ledger and contract-ledger extract
/// records, keyed by the source keys of the matched watch entries.
#[derive(Debug)]
pub struct Extractor {
    symbol: String,
    decimals: u32,
    precision: Precision,
}

impl Extractor {
    pub fn new(symbol: &str, decimals: u32) -> Result<Self, Error> {
        Ok(Extractor {
            symbol: symbol.to_string(),
            decimals,
            precision: Precision::new(decimals).map_err(|e| Error::Generic(e.to_string()))?,
        })
    }

    /// Extract both ledgers of `tx`. `positional_coinstake` is true when
    /// the transaction sits at index 1 of its block; it is OR'd with the
    /// node's own coinstake flag.
    pub fn extract(
        &self,
        tx: &Transaction,
        positional_coinstake: bool,
        watch: &dyn WatchList,
    ) -> ExtractResult {
        let mut result = ExtractResult {
            tx_id: tx.tx_id.clone(),
            block_height: tx.block_height,
            success: true,
            ..Default::default()
        };
        let is_coinstake = tx.is_coinstake || positional_coinstake;
        self.extract_native(tx, is_coinstake, watch, &mut result);
        self.extract_token_transfers(tx, watch, &mut result);
        result
    }

    fn watch_key(&self, watch: &dyn WatchList, address: &str) -> Option<SourceKey> {
        watch.source_key(&ScanTarget {
            target: address.to_string(),
            symbol: self.symbol.clone(),
            kind: ScanTargetKind::AccountAddress,
        })
    }

    fn extract_native(
        &self,
        tx: &Transaction,
        is_coinstake: bool,
        watch: &dyn WatchList,
        result: &mut ExtractResult,
    ) {
        let mut tx_type = TX_TYPE_PLAIN;
        let mut tx_action = "";
        if tx.is_token_transfer {
            tx_type = TX_TYPE_CONTRACT;
            tx_action = "transfer";
        }
        if is_coinstake {
            tx_type = TX_TYPE_COINSTAKE;
            tx_action = "coinstake";
        }
        let entry_type = if is_coinstake {
            TX_TYPE_COINSTAKE
        } else {
            TX_TYPE_PLAIN
        };

        let (from, total_spent) = self.extract_inputs(tx, entry_type, watch, result);
        let (to, total_received) = self.extract_outputs(tx, entry_type, watch, result);

        // Block rewards make inputs and outputs diverge; only plain
        // transactions pay an actual fee.
        let fees = if tx.is_coinbase || is_coinstake {
            Decimal::ZERO
        } else {
            total_spent - total_received
        };

        let summary = TransactionSummary {
            wtx_id: sid::gen_wtx_id(&self.symbol, &tx.tx_id),
            tx_id: tx.tx_id.clone(),
            from,
            to,
            fees: self.precision.fixed_string(fees),
            coin: Coin::native(&self.symbol),
            block_hash: tx.block_hash.clone(),
            block_height: tx.block_height,
            decimal: self.decimals,
            confirm_time: tx.block_time,
            status: TX_STATUS_SUCCESS.to_string(),
            tx_type,
            tx_action: tx_action.to_string(),
        };
        for data in result.extract_data.values_mut() {
            data.transaction = Some(summary.clone());
        }
    }

    fn extract_inputs(
        &self,
        tx: &Transaction,
        entry_type: u64,
        watch: &dyn WatchList,
        result: &mut ExtractResult,
    ) -> (Vec<String>, Decimal) {
        let mut from = Vec::new();
        let mut total = Decimal::ZERO;
        for vin in &tx.vins {
            if let Some(source_key) = self.watch_key(watch, &vin.address) {
                let input = TxInput {
                    source_tx_id: vin.tx_id.clone(),
                    source_index: vin.vout,
                    tx_id: tx.tx_id.clone(),
                    address: vin.address.clone(),
                    amount: vin.value.clone(),
                    coin: Coin::native(&self.symbol),
                    index: vin.n,
                    sid: sid::gen_input_sid(&vin.tx_id, &self.symbol, "", vin.n),
                    created_at: tx.block_time,
                    block_height: tx.block_height,
                    block_hash: tx.block_hash.clone(),
                    tx_type: entry_type,
                };
                result
                    .extract_data
                    .entry(source_key)
                    .or_default()
                    .tx_inputs
                    .push(input);
            }
            from.push(format!("{}:{}", vin.address, vin.value));
            total += parse_or_zero(&vin.value);
        }
        (from, total)
    }

    fn extract_outputs(
        &self,
        tx: &Transaction,
        entry_type: u64,
        watch: &dyn WatchList,
        result: &mut ExtractResult,
    ) -> (Vec<String>, Decimal) {
        let mut to = Vec::new();
        let mut total = Decimal::ZERO;
        for vout in &tx.vouts {
            if let Some(source_key) = self.watch_key(watch, &vout.address) {
                let output = TxOutput {
                    tx_id: tx.tx_id.clone(),
                    address: vout.address.clone(),
                    amount: vout.value.clone(),
                    coin: Coin::native(&self.symbol),
                    index: vout.n,
                    sid: sid::gen_output_sid(&tx.tx_id, &self.symbol, "", vout.n),
                    script_pub_key: vout.script_pub_key.clone(),
                    created_at: tx.block_time,
                    block_height: tx.block_height,
                    block_hash: tx.block_hash.clone(),
                    confirm: tx.confirmations as i64,
                    tx_type: entry_type,
                };
                result
                    .extract_data
                    .entry(source_key)
                    .or_default()
                    .tx_outputs
                    .push(output);
            }
            to.push(format!("{}:{}", vout.address, vout.value));
            total += parse_or_zero(&vout.value);
        }
        (to, total)
    }

    fn extract_token_transfers(
        &self,
        tx: &Transaction,
        watch: &dyn WatchList,
        result: &mut ExtractResult,
    ) {
        if !tx.is_token_transfer {
            return;
        }
        for receipt in &tx.token_receipts {
            let coin = Coin::contract(&self.symbol, &receipt.contract_address, TOKEN_PROTOCOL);
            let contract_id = coin.contract_id.clone();

            if let Some(source_key) = self.watch_key(watch, &receipt.from) {
                let input = TxInput {
                    source_tx_id: String::new(),
                    source_index: 0,
                    tx_id: tx.tx_id.clone(),
                    address: receipt.from.clone(),
                    amount: receipt.amount.clone(),
                    coin: coin.clone(),
                    index: 0,
                    sid: sid::gen_input_sid(&receipt.tx_hash, &self.symbol, &contract_id, 0),
                    created_at: tx.block_time,
                    block_height: receipt.block_height,
                    block_hash: receipt.block_hash.clone(),
                    tx_type: TX_TYPE_CONTRACT,
                };
                result
                    .extract_contract_data
                    .entry(source_key)
                    .or_default()
                    .tx_inputs
                    .push(input);
            }

            if let Some(source_key) = self.watch_key(watch, &receipt.to) {
                let output = TxOutput {
                    tx_id: tx.tx_id.clone(),
                    address: receipt.to.clone(),
                    amount: receipt.amount.clone(),
                    coin: coin.clone(),
                    index: 0,
                    sid: sid::gen_output_sid(&receipt.tx_hash, &self.symbol, &contract_id, 0),
                    script_pub_key: String::new(),
                    created_at: tx.block_time,
                    block_height: receipt.block_height,
                    block_hash: receipt.block_hash.clone(),
                    confirm: tx.confirmations as i64,
                    tx_type: TX_TYPE_CONTRACT,
                };
                result
                    .extract_contract_data
                    .entry(source_key)
                    .or_default()
                    .tx_outputs
                    .push(output);
            }

            let summary = TransactionSummary {
                wtx_id: sid::gen_wtx_id(&self.symbol, &receipt.tx_hash),
                tx_id: receipt.tx_hash.clone(),
                from: vec![format!("{}:{}", receipt.from, receipt.amount)],
                to: vec![format!("{}:{}", receipt.to, receipt.amount)],
                fees: "0".to_string(),
                coin,
                block_hash: receipt.block_hash.clone(),
                block_height: receipt.block_height,
                // Token decimals travel on the contract descriptor.
                decimal: 0,
                confirm_time: tx.block_time,
                status: TX_STATUS_SUCCESS.to_string(),
                tx_type: TX_TYPE_CONTRACT,
                tx_action: "transfer".to_string(),
            };
            for data in result.extract_contract_data.values_mut() {
                data.transaction = Some(summary.clone());
            }
        }
    }
}
