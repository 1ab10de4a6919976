//! Stable, deterministic identifiers for ledger entries and contracts.
//!
//! Every identifier is the base64 of a SHA-256 over a domain-separated
//! preimage, so extracting the same transaction twice yields bytewise
//! identical records.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

fn hash_b64(preimage: &str) -> String {
    STANDARD.encode(Sha256::digest(preimage.as_bytes()))
}

/// Identifier grouping token-ledger records of one contract on one chain.
pub fn gen_contract_id(symbol: &str, contract_address: &str) -> String {
    hash_b64(&format!("contract_{symbol}_{contract_address}"))
}

/// Identifier of a single debit entry. `contract_id` is empty for the
/// native ledger.
pub fn gen_input_sid(tx_id: &str, symbol: &str, contract_id: &str, index: u64) -> String {
    hash_b64(&format!("input_{tx_id}_{symbol}_{contract_id}_{index}"))
}

/// Identifier of a single credit entry. `contract_id` is empty for the
/// native ledger.
pub fn gen_output_sid(tx_id: &str, symbol: &str, contract_id: &str, index: u64) -> String {
    hash_b64(&format!("output_{tx_id}_{symbol}_{contract_id}_{index}"))
}

/// Workspace-wide identifier of a transaction summary.
pub fn gen_wtx_id(symbol: &str, tx_id: &str) -> String {
    hash_b64(&format!("wtx_{symbol}_{tx_id}"))
}

/// Identifier of an unscan record; doubles as its upsert key.
pub fn gen_unscan_id(symbol: &str, block_height: u64, tx_id: &str) -> String {
    hash_b64(&format!("unscan_{symbol}_{block_height}_{tx_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sids_are_deterministic() {
        let a = gen_input_sid("aa", "QTUM", "", 0);
        let b = gen_input_sid("aa", "QTUM", "", 0);
        assert_eq!(a, b);
    }

    #[test]
    fn input_and_output_sids_differ() {
        let i = gen_input_sid("aa", "QTUM", "", 0);
        let o = gen_output_sid("aa", "QTUM", "", 0);
        assert_ne!(i, o);
    }

    #[test]
    fn sids_depend_on_every_component() {
        let base = gen_output_sid("aa", "QTUM", "", 0);
        assert_ne!(base, gen_output_sid("ab", "QTUM", "", 0));
        assert_ne!(base, gen_output_sid("aa", "BTC", "", 0));
        assert_ne!(base, gen_output_sid("aa", "QTUM", "cid", 0));
        assert_ne!(base, gen_output_sid("aa", "QTUM", "", 1));
    }

    #[test]
    fn contract_id_differs_per_chain() {
        let contract = "0xf397f39ce992b0f5bdc7ec1109d676d07f7af2f9";
        assert_ne!(
            gen_contract_id("QTUM", contract),
            gen_contract_id("BTC", contract)
        );
    }
}
