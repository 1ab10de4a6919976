#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Generic(String),

    /// The node did not answer: transport failure or timeout.
    #[error("node unavailable: {0}")]
    Unavailable(String),

    /// The chain has not reached the requested height yet.
    #[error("block height {0} not found")]
    HeightNotFound(u64),

    /// A JSON-RPC level error reported by the node, rendered the way the
    /// node phrased it.
    #[error("[{code}]{message}")]
    NodeRpc { code: i64, message: String },

    /// The node cannot resolve a transaction id. Carries the node's reason
    /// verbatim so the retry log can classify permanent misses by prefix.
    #[error("{0}")]
    TxNotFound(String),

    /// A vin back-fill found the producing transaction but not the
    /// referenced output.
    #[error("missing vout {vout} in transaction {txid}")]
    MissingVout { txid: String, vout: u64 },

    #[error("observer rejected extract data: {0}")]
    ObserverRejected(String),

    /// The Persistence Port is unreachable. Fatal: the scanner refuses to
    /// advance and surfaces this to its caller instead of retrying.
    #[error("persistence unavailable: {0}")]
    Persist(String),

    /// One or more transactions of a block failed extraction or delivery;
    /// the unscanned log owes them.
    #[error("{failed} of {total} transactions failed extraction in block {height}")]
    IncompleteScan {
        height: u64,
        failed: usize,
        total: usize,
    },

    #[error("batch extraction requires at least one transaction")]
    EmptyBatch,

    #[error("block height to rescan must be greater than 0")]
    RescanHeightZero,

    #[error(transparent)]
    JsonFrom(#[from] serde_json::Error),

    #[error(transparent)]
    StdIOError(#[from] std::io::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[cfg(feature = "mempool")]
    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Common(#[from] qsk_common::Error),
}

impl Error {
    /// True when this error means the node permanently does not know the
    /// transaction, judged by the configured reason prefix.
    pub fn is_permanent_tx_miss(&self, reason_prefix: &str) -> bool {
        matches!(self, Error::TxNotFound(reason) if reason.starts_with(reason_prefix))
    }

    /// Wrap a Persistence Port failure into the fatal [`Error::Persist`]
    /// class.
    pub(crate) fn persist(source: Error) -> Self {
        match source {
            Error::Persist(_) => source,
            other => Error::Persist(other.to_string()),
        }
    }
}
