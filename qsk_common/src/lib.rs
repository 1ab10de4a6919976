#![cfg_attr(not(test), deny(clippy::unwrap_used))]

//! A crate containing the downstream-facing data model of the scanner and the
//! deterministic identifier helpers shared with its consumers, such as:
//!
//!   * The extract model pushed to observers: [`ExtractData`], [`TxInput`],
//!     [`TxOutput`], [`TransactionSummary`] and the [`Observer`] trait.
//!   * The [`WatchList`] trait answering "is this address watched, and for
//!     which source key".
//!   * Stable identifier derivation in [`sid`] and amount formatting in
//!     [`precision`].
//!
//!  To avoid circular dependencies this crate must not depend on other crate of the workspace

mod error;
mod model;
pub mod precision;
pub mod sid;

pub use crate::error::Error;
pub use crate::model::*;
