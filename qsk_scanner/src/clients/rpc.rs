use serde::Deserialize;
use serde_json::{json, Value};

use super::{fold_unspent, normalized_value, NodeClient};
use crate::config::Config;
use crate::error::Error;
use crate::model::{Block, Transaction, Unspent, Vin, Vout};
use async_trait::async_trait;
use qsk_common::AddressBalance;

/// JSON-RPC error code for "No information available about transaction".
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

/// A client issuing JSON-RPC calls to a full node over HTTP.
///
/// One call per primitive; verbose variants are requested where the node
/// supports them (`getrawtransaction` with `true`).
#[derive(Debug)]
pub struct RpcClient {
    client: reqwest::Client,
    url: String,
    auth: Option<(String, String)>,
    symbol: String,
    stake_confirmations: u64,
}

impl RpcClient {
    /// Create a new JSON-RPC client for the node at `url`.
    pub fn new(url: &str, config: &Config) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(RpcClient {
            client: builder.build()?,
            url: url.to_string(),
            auth: None,
            symbol: config.symbol.clone(),
            stake_confirmations: config.stake_confirmations,
        })
    }

    /// Use HTTP basic auth on every call.
    pub fn with_credentials(mut self, user: &str, pass: &str) -> Self {
        self.auth = Some((user.to_string(), pass.to_string()));
        self
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "qsk",
            "method": method,
            "params": params,
        });
        let mut request = self.client.post(&self.url).json(&body);
        if let Some((user, pass)) = &self.auth {
            request = request.basic_auth(user, Some(pass));
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        let text = response
            .text()
            .await
            .map_err(|e| Error::Unavailable(e.to_string()))?;
        let parsed: RpcResponse = serde_json::from_str(&text)
            .map_err(|_| Error::Generic(format!("invalid rpc response: {text}")))?;
        if let Some(error) = parsed.error {
            return Err(Error::NodeRpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(parsed.result.unwrap_or(Value::Null))
    }

    /// Make the node watch an address so `listunspent` can report its
    /// outputs. Not part of [`NodeClient`]: the explorer adapter needs no
    /// import.
    pub async fn import_address(&self, address: &str, rescan: bool) -> Result<(), Error> {
        self.call("importaddress", json!([address, "", rescan]))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl NodeClient for RpcClient {
    async fn tip_height(&self) -> Result<u64, Error> {
        let result = self.call("getblockcount", json!([])).await?;
        result
            .as_u64()
            .ok_or_else(|| Error::Generic("getblockcount returned a non-integer".to_string()))
    }

    async fn block_hash(&self, height: u64) -> Result<String, Error> {
        match self.call("getblockhash", json!([height])).await {
            Ok(result) => result
                .as_str()
                .map(ToString::to_string)
                .ok_or_else(|| Error::Generic("getblockhash returned a non-string".to_string())),
            Err(Error::NodeRpc { .. }) => Err(Error::HeightNotFound(height)),
            Err(e) => Err(e),
        }
    }

    async fn block(&self, hash: &str) -> Result<Block, Error> {
        let result = self.call("getblock", json!([hash])).await?;
        let block: RpcBlock = serde_json::from_value(result)?;
        Ok(block.into())
    }

    async fn transaction(&self, tx_id: &str) -> Result<Transaction, Error> {
        match self.call("getrawtransaction", json!([tx_id, true])).await {
            Ok(result) => {
                let tx: RpcTx = serde_json::from_value(result)?;
                Ok(tx.into())
            }
            Err(Error::NodeRpc { code, message }) if code == RPC_INVALID_ADDRESS_OR_KEY => {
                Err(Error::TxNotFound(format!("[{code}]{message}")))
            }
            Err(e) => Err(e),
        }
    }

    async fn tx_out(&self, tx_id: &str, vout: u64) -> Result<Vout, Error> {
        // gettxout answers null once the output is spent, which is the
        // common case when back-filling a vin.
        let result = self.call("gettxout", json!([tx_id, vout])).await?;
        if !result.is_null() {
            let out: RpcTxOut = serde_json::from_value(result)?;
            return Ok(out.into_vout(vout));
        }
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
        let result = self.call("getrawmempool", json!([])).await?;
        let ids: Vec<String> = serde_json::from_value(result)?;
        Ok(ids)
    }

    async fn list_unspent(&self, addresses: &[String]) -> Result<Vec<Unspent>, Error> {
        let result = self
            .call("listunspent", json!([0, 99999999, addresses]))
            .await?;
        let entries: Vec<RpcUnspent> = serde_json::from_value(result)?;
        Ok(entries
            .into_iter()
            .map(|entry| entry.into_unspent(self.stake_confirmations))
            .collect())
    }

    async fn broadcast(&self, raw_hex: &str) -> Result<String, Error> {
        let result = self.call("sendrawtransaction", json!([raw_hex])).await?;
        result
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| Error::Generic("sendrawtransaction returned a non-string".to_string()))
    }

    async fn address_balance(&self, address: &str) -> Result<AddressBalance, Error> {
        let addresses = [address.to_string()];
        let utxos = self.list_unspent(&addresses).await?;
        Ok(fold_unspent(&self.symbol, &addresses, &utxos)
            .pop()
            .unwrap_or_else(|| AddressBalance::empty(&self.symbol, address)))
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct RpcBlock {
    hash: String,
    #[serde(default)]
    confirmations: u64,
    #[serde(default)]
    merkleroot: String,
    #[serde(default)]
    previousblockhash: String,
    height: u64,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    time: u64,
    #[serde(default)]
    tx: Vec<String>,
}

impl From<RpcBlock> for Block {
    fn from(block: RpcBlock) -> Self {
        Block {
            hash: block.hash,
            confirmations: block.confirmations,
            merkle_root: block.merkleroot,
            previous_hash: block.previousblockhash,
            height: block.height,
            version: block.version,
            time: block.time,
            tx: block.tx,
        }
    }
}

#[derive(Deserialize)]
struct RpcTx {
    txid: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    version: u64,
    #[serde(default)]
    locktime: i64,
    #[serde(default)]
    blockhash: String,
    #[serde(default)]
    confirmations: u64,
    #[serde(default)]
    blocktime: i64,
    #[serde(default)]
    vin: Vec<RpcVin>,
    #[serde(default)]
    vout: Vec<RpcVout>,
}

impl From<RpcTx> for Transaction {
    fn from(tx: RpcTx) -> Self {
        let is_coinbase = tx.vin.first().map(|v| v.coinbase.is_some()).unwrap_or(false);
        let vins = tx
            .vin
            .iter()
            .enumerate()
            .map(|(i, vin)| Vin {
                tx_id: vin.txid.clone().unwrap_or_default(),
                vout: vin.vout.unwrap_or(0),
                address: String::new(),
                value: String::new(),
                n: i as u64,
            })
            .collect();
        let vouts = tx
            .vout
            .iter()
            .map(|vout| Vout {
                n: vout.n,
                address: vout.script_pub_key.single_address(),
                value: normalized_value(&vout.value),
                script_pub_key: vout.script_pub_key.hex.clone(),
                script_type: vout.script_pub_key.script_type.clone(),
            })
            .collect();
        Transaction {
            tx_id: tx.txid,
            size: tx.size,
            version: tx.version,
            lock_time: tx.locktime,
            block_hash: tx.blockhash,
            // The verbose call reports no height; the pipeline fills it in
            // from the batch context.
            block_height: 0,
            confirmations: tx.confirmations,
            block_time: tx.blocktime,
            is_coinbase,
            is_coinstake: false,
            is_token_transfer: false,
            fees: String::new(),
            vins,
            vouts,
            token_receipts: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct RpcVin {
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    vout: Option<u64>,
    #[serde(default)]
    coinbase: Option<String>,
}

#[derive(Deserialize)]
struct RpcVout {
    #[serde(default)]
    value: Value,
    n: u64,
    #[serde(rename = "scriptPubKey", default)]
    script_pub_key: RpcScriptPubKey,
}

#[derive(Deserialize, Default)]
struct RpcScriptPubKey {
    #[serde(default)]
    hex: String,
    #[serde(rename = "type", default)]
    script_type: String,
    #[serde(default)]
    addresses: Vec<String>,
    #[serde(default)]
    address: Option<String>,
}

impl RpcScriptPubKey {
    fn single_address(&self) -> String {
        self.address
            .clone()
            .or_else(|| self.addresses.first().cloned())
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct RpcTxOut {
    #[serde(default)]
    value: Value,
    #[serde(rename = "scriptPubKey", default)]
    script_pub_key: RpcScriptPubKey,
}

impl RpcTxOut {
    fn into_vout(self, n: u64) -> Vout {
        Vout {
            n,
            address: self.script_pub_key.single_address(),
            value: normalized_value(&self.value),
            script_pub_key: self.script_pub_key.hex,
            script_type: self.script_pub_key.script_type,
        }
    }
}

#[derive(Deserialize)]
struct RpcUnspent {
    txid: String,
    vout: u64,
    #[serde(default)]
    address: String,
    #[serde(rename = "scriptPubKey", default)]
    script_pub_key: String,
    #[serde(default)]
    amount: Value,
    #[serde(default)]
    confirmations: u64,
    #[serde(default)]
    spendable: bool,
    /// Stake-created outputs, flagged by nodes that report them.
    #[serde(rename = "isStake", alias = "generated", default)]
    is_stake: bool,
}

impl RpcUnspent {
    fn into_unspent(self, stake_confirmations: u64) -> Unspent {
        let spendable = if self.is_stake {
            self.spendable && self.confirmations >= stake_confirmations
        } else {
            self.spendable
        };
        Unspent {
            tx_id: self.txid,
            vout: self.vout,
            address: self.address,
            script_pub_key: self.script_pub_key,
            amount: normalized_value(&self.amount),
            confirmations: self.confirmations,
            spendable,
        }
    }
}
