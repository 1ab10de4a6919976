use std::sync::Arc;
use std::time::Duration;

use crate::clients::{ExplorerClient, NodeClient, RpcClient};
use crate::error::Error;

/// Outputs created by staking are spendable only after this many
/// confirmations.
pub const STAKE_CONFIRMATIONS: u64 = 500;

/// Decimal places of the native unit.
pub const DEFAULT_DECIMALS: u32 = 8;

/// The node's verbatim answer for a transaction id it will never resolve.
/// Node-specific; override with [`Config::tx_not_found_reason`] when
/// pointing the scanner at a different implementation.
pub const TX_NOT_FOUND_REASON: &str = "[-5]No information available about transaction";

/// Which upstream the scanner talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerType {
    /// A full node JSON-RPC endpoint.
    Rpc,
    /// An insight-style REST block explorer.
    Explorer,
}

/// Scanner configuration.
///
/// ```
/// # use qsk_scanner::{Config, ServerType};
/// let config = Config::new("QTUM", ServerType::Explorer, "https://explorer.example/api")
///     .scan_mempool(true)
///     .rescan_last_block_count(2);
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) symbol: String,
    pub(crate) server_type: ServerType,
    pub(crate) server_url: String,
    pub(crate) rpc_user: Option<String>,
    pub(crate) rpc_pass: Option<String>,
    pub(crate) decimals: u32,
    pub(crate) stake_confirmations: u64,
    pub(crate) rescan_last_block_count: u64,
    pub(crate) scan_mempool: bool,
    pub(crate) tx_not_found_reason: String,
    pub(crate) timeout: Option<Duration>,
}

impl Config {
    pub fn new(symbol: &str, server_type: ServerType, server_url: &str) -> Self {
        Config {
            symbol: symbol.to_string(),
            server_type,
            server_url: server_url.trim_end_matches('/').to_string(),
            rpc_user: None,
            rpc_pass: None,
            decimals: DEFAULT_DECIMALS,
            stake_confirmations: STAKE_CONFIRMATIONS,
            rescan_last_block_count: 0,
            scan_mempool: false,
            tx_not_found_reason: TX_NOT_FOUND_REASON.to_string(),
            timeout: None,
        }
    }

    /// Basic-auth credentials for the JSON-RPC endpoint.
    pub fn rpc_credentials(mut self, user: &str, pass: &str) -> Self {
        self.rpc_user = Some(user.to_string());
        self.rpc_pass = Some(pass.to_string());
        self
    }

    /// Poll the mempool at the end of every scan pass.
    pub fn scan_mempool(mut self, scan_mempool: bool) -> Self {
        self.scan_mempool = scan_mempool;
        self
    }

    /// Re-scan this many blocks below the tip after every ascent, as a
    /// safety margin against records missed near the tip.
    pub fn rescan_last_block_count(mut self, count: u64) -> Self {
        self.rescan_last_block_count = count;
        self
    }

    /// Decimal places of the native unit, 8 unless the chain declares
    /// otherwise.
    pub fn decimals(mut self, decimals: u32) -> Self {
        self.decimals = decimals;
        self
    }

    /// Confirmations demanded of stake-created outputs before they count as
    /// spendable.
    pub fn stake_confirmations(mut self, confirmations: u64) -> Self {
        self.stake_confirmations = confirmations;
        self
    }

    /// The reason prefix classifying a transaction miss as permanent.
    pub fn tx_not_found_reason(mut self, reason: &str) -> Self {
        self.tx_not_found_reason = reason.to_string();
        self
    }

    /// Transport timeout for node requests.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Build the node client this configuration selects.
    pub fn node_client(&self) -> Result<Arc<dyn NodeClient>, Error> {
        Ok(match self.server_type {
            ServerType::Rpc => {
                let mut client = RpcClient::new(&self.server_url, self)?;
                if let (Some(user), Some(pass)) = (&self.rpc_user, &self.rpc_pass) {
                    client = client.with_credentials(user, pass);
                }
                Arc::new(client)
            }
            ServerType::Explorer => Arc::new(ExplorerClient::new(&self.server_url, self)?),
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn server_type(&self) -> ServerType {
        self.server_type
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }
}
