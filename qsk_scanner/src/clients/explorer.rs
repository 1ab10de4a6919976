//! Client for insight-style block explorer REST APIs.
//!
//! Wire integer values are satoshi-like and get shifted by the chain's
//! declared decimal place before entering the model.

use serde::Deserialize;
use serde_json::{json, Value};

use super::{wire_decimal, wire_string, NodeClient};
use crate::config::Config;
use crate::error::Error;
use crate::model::{Block, TokenBalance, TokenReceipt, Transaction, Unspent, Vin, Vout};
use async_trait::async_trait;
use qsk_common::precision::Precision;
use qsk_common::AddressBalance;

/// A client for an insight-style explorer HTTP API.
#[derive(Debug)]
pub struct ExplorerClient {
    client: reqwest::Client,
    base_url: String,
    symbol: String,
    precision: Precision,
    stake_confirmations: u64,
}

impl ExplorerClient {
    /// Create a new explorer client using the given `url` as API base.
    pub fn new(url: &str, config: &Config) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(ExplorerClient {
            client: builder.build()?,
            base_url: url.trim_end_matches('/').to_string(),
            symbol: config.symbol.clone(),
            precision: Precision::new(config.decimals)
                .map_err(|e| Error::Generic(e.to_string()))?,
            stake_confirmations: config.stake_confirmations,
        })
    }

    async fn get(&self, path: &str) -> Result<Value, Error> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Generic(text));
        }
        Ok(serde_json::from_str(&text)?)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, Error> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::Generic(text));
        }
        Ok(serde_json::from_str(&text)?)
    }

    /// The fee rate suggested by the explorer, in native units per kilobyte.
    pub async fn estimate_fee_rate(&self) -> Result<String, Error> {
        let info: ExplorerInfo = serde_json::from_value(self.get("info").await?)?;
        Ok(wire_decimal(&info.fee_rate).normalize().to_string())
    }

    /// The token holdings the explorer decoded for an address, one entry
    /// per contract. Not on [`NodeClient`]: a bare node cannot answer this
    /// without executing the contract.
    pub async fn token_balances(&self, address: &str) -> Result<Vec<TokenBalance>, Error> {
        let result = self.get(&format!("address/{address}")).await?;
        let info: ExplorerAddress = serde_json::from_value(result)?;
        Ok(info
            .qrc20_balances
            .into_iter()
            .map(|entry| TokenBalance {
                contract_address: format!("0x{}", entry.address_hex),
                name: entry.name,
                symbol: entry.symbol,
                decimals: entry.decimals,
                balance: wire_string(&entry.balance),
            })
            .collect())
    }

    /// Paged transaction history over several addresses at once.
    pub async fn multi_address_transactions(
        &self,
        offset: usize,
        limit: usize,
        addresses: &[String],
    ) -> Result<Vec<Transaction>, Error> {
        let body = json!({
            "addrs": addresses.join(","),
            "from": offset,
            "to": offset + limit,
        });
        let result = self.post("addrs/txs", body).await?;
        let page: ExplorerTxPage = serde_json::from_value(result)?;
        Ok(page
            .items
            .into_iter()
            .map(|tx| tx.into_transaction(&self.precision))
            .collect())
    }
}

#[async_trait]
impl NodeClient for ExplorerClient {
    async fn tip_height(&self) -> Result<u64, Error> {
        let info: ExplorerInfo = serde_json::from_value(self.get("info").await?)?;
        Ok(info.height)
    }

    async fn block_hash(&self, height: u64) -> Result<String, Error> {
        match self.get(&format!("block/{height}")).await {
            Ok(result) => {
                let block: ExplorerBlockHash = serde_json::from_value(result)?;
                Ok(block.hash)
            }
            Err(Error::Generic(_)) => Err(Error::HeightNotFound(height)),
            Err(e) => Err(e),
        }
    }

    async fn block(&self, hash: &str) -> Result<Block, Error> {
        let result = self.get(&format!("block/{hash}")).await?;
        let block: ExplorerBlock = serde_json::from_value(result)?;
        Ok(block.into())
    }

    async fn transaction(&self, tx_id: &str) -> Result<Transaction, Error> {
        match self.get(&format!("tx/{tx_id}")).await {
            Ok(result) => {
                let tx: ExplorerTx = serde_json::from_value(result)?;
                Ok(tx.into_transaction(&self.precision))
            }
            Err(Error::Generic(reason)) => Err(Error::TxNotFound(reason)),
            Err(e) => Err(e),
        }
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
        // The explorer has no mempool endpoint; push notifications come in
        // over the websocket subscription instead.
        Ok(Vec::new())
    }

    async fn list_unspent(&self, addresses: &[String]) -> Result<Vec<Unspent>, Error> {
        let mut utxos = Vec::new();
        for address in addresses {
            let result = self.get(&format!("address/{address}/utxo")).await?;
            let entries: Vec<ExplorerUnspent> = serde_json::from_value(result)?;
            utxos.extend(
                entries
                    .into_iter()
                    .map(|entry| entry.into_unspent(&self.precision, self.stake_confirmations)),
            );
        }
        Ok(utxos)
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String, Error> {
        let result = self.post("tx/send", json!({ "rawtx": raw_hex })).await?;
        let sent: ExplorerSent = serde_json::from_value(result)?;
        Ok(sent.txid)
    }

    async fn address_balance(&self, address: &str) -> Result<AddressBalance, Error> {
        let result = self.get(&format!("address/{address}")).await?;
        let info: ExplorerAddress = serde_json::from_value(result)?;
        let balance = wire_decimal(&info.balance);
        let unconfirmed = wire_decimal(&info.unconfirmed);
        Ok(AddressBalance {
            symbol: self.symbol.clone(),
            address: address.to_string(),
            balance: self.precision.shift(balance).normalize().to_string(),
            unconfirm_balance: self.precision.shift(unconfirmed).normalize().to_string(),
            confirm_balance: self
                .precision
                .shift(balance - unconfirmed)
                .normalize()
                .to_string(),
        })
    }
}

#[derive(Deserialize)]
struct ExplorerInfo {
    #[serde(default)]
    height: u64,
    #[serde(rename = "feeRate", default)]
    fee_rate: Value,
}

#[derive(Deserialize)]
struct ExplorerBlockHash {
    hash: String,
}

#[derive(Deserialize)]
struct ExplorerBlock {
    hash: String,
    #[serde(default)]
    confirmations: u64,
    #[serde(rename = "merkleRoot", default)]
    merkle_root: String,
    #[serde(rename = "prevHash", default)]
    prev_hash: String,
    height: u64,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    timestamp: u64,
    #[serde(default)]
    transactions: Vec<String>,
}

impl From<ExplorerBlock> for Block {
    fn from(block: ExplorerBlock) -> Self {
        Block {
            hash: block.hash,
            confirmations: block.confirmations,
            merkle_root: block.merkle_root,
            previous_hash: block.prev_hash,
            height: block.height,
            version: block.version,
            time: block.timestamp,
            tx: block.transactions,
        }
    }
}

#[derive(Deserialize)]
struct ExplorerTxPage {
    #[serde(default)]
    items: Vec<ExplorerTx>,
}

#[derive(Deserialize)]
struct ExplorerTx {
    id: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    version: u64,
    #[serde(rename = "lockTime", default)]
    lock_time: i64,
    #[serde(rename = "blockHash", default)]
    block_hash: String,
    #[serde(rename = "blockHeight", default)]
    block_height: i64,
    #[serde(default)]
    confirmations: u64,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    fees: Value,
    #[serde(rename = "isCoinbase", default)]
    is_coinbase: bool,
    #[serde(rename = "isCoinstake", default)]
    is_coinstake: bool,
    #[serde(default)]
    inputs: Vec<ExplorerVin>,
    #[serde(default)]
    outputs: Vec<ExplorerVout>,
    #[serde(rename = "qrc20TokenTransfers", default)]
    qrc20_token_transfers: Vec<ExplorerTokenTransfer>,
}

impl ExplorerTx {
    fn into_transaction(self, precision: &Precision) -> Transaction {
        let block_height = self.block_height.max(0) as u64;
        let vins = self
            .inputs
            .iter()
            .enumerate()
            .map(|(i, input)| Vin {
                tx_id: input.prev_tx_id.clone(),
                vout: input.output_index,
                address: input.address.clone(),
                value: precision.shift(wire_decimal(&input.value)).normalize().to_string(),
                n: i as u64,
            })
            .collect();
        let vouts = self
            .outputs
            .iter()
            .enumerate()
            .map(|(i, output)| {
                let script = output.script_pub_key.clone().unwrap_or_default();
                Vout {
                    n: i as u64,
                    address: output.address.clone(),
                    value: precision
                        .shift(wire_decimal(&output.value))
                        .normalize()
                        .to_string(),
                    script_pub_key: script.hex,
                    script_type: script.script_type,
                }
            })
            .collect();
        let token_receipts: Vec<TokenReceipt> = self
            .qrc20_token_transfers
            .iter()
            .map(|receipt| TokenReceipt {
                from: receipt.from.clone(),
                to: receipt.to.clone(),
                // Raw integer amount; token decimals live on the contract.
                amount: wire_string(&receipt.value),
                contract_address: format!("0x{}", receipt.address_hex),
                tx_hash: self.id.clone(),
                block_hash: self.block_hash.clone(),
                block_height,
            })
            .collect();
        Transaction {
            tx_id: self.id,
            size: self.size,
            version: self.version,
            lock_time: self.lock_time,
            block_hash: self.block_hash,
            block_height,
            confirmations: self.confirmations,
            block_time: self.timestamp,
            is_coinbase: self.is_coinbase,
            is_coinstake: self.is_coinstake,
            is_token_transfer: !token_receipts.is_empty(),
            fees: precision.shift(wire_decimal(&self.fees)).normalize().to_string(),
            vins,
            vouts,
            token_receipts,
        }
    }
}

#[derive(Deserialize)]
struct ExplorerVin {
    #[serde(rename = "prevTxId", default)]
    prev_tx_id: String,
    #[serde(rename = "outputIndex", default)]
    output_index: u64,
    #[serde(default)]
    address: String,
    #[serde(default)]
    value: Value,
}

#[derive(Deserialize)]
struct ExplorerVout {
    #[serde(default)]
    value: Value,
    #[serde(default)]
    address: String,
    #[serde(rename = "scriptPubKey", default)]
    script_pub_key: Option<ExplorerScript>,
}

#[derive(Deserialize, Default, Clone)]
struct ExplorerScript {
    #[serde(default)]
    hex: String,
    #[serde(rename = "type", default)]
    script_type: String,
}

#[derive(Deserialize)]
struct ExplorerTokenTransfer {
    #[serde(default)]
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    value: Value,
    #[serde(rename = "addressHex", default)]
    address_hex: String,
}

#[derive(Deserialize)]
struct ExplorerUnspent {
    #[serde(rename = "transactionId", default)]
    transaction_id: String,
    #[serde(rename = "outputIndex", default)]
    output_index: u64,
    #[serde(default)]
    address: String,
    #[serde(rename = "scriptPubKey", default)]
    script_pub_key: String,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    confirmations: u64,
    #[serde(rename = "isStake", default)]
    is_stake: bool,
}

impl ExplorerUnspent {
    fn into_unspent(self, precision: &Precision, stake_confirmations: u64) -> Unspent {
        // Staked outputs stay locked until they mature.
        let spendable = !self.is_stake || self.confirmations >= stake_confirmations;
        Unspent {
            tx_id: self.transaction_id,
            vout: self.output_index,
            address: self.address,
            script_pub_key: self.script_pub_key,
            amount: precision.shift(wire_decimal(&self.value)).normalize().to_string(),
            confirmations: self.confirmations,
            spendable,
        }
    }
}

#[derive(Deserialize)]
struct ExplorerSent {
    txid: String,
}

#[derive(Deserialize)]
struct ExplorerAddress {
    #[serde(default)]
    balance: Value,
    #[serde(default)]
    unconfirmed: Value,
    #[serde(rename = "qrc20Balances", default)]
    qrc20_balances: Vec<ExplorerTokenBalance>,
}

#[derive(Deserialize)]
struct ExplorerTokenBalance {
    #[serde(rename = "addressHex", default)]
    address_hex: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    decimals: u32,
    #[serde(default)]
    balance: Value,
}
