//! Key framing for the ordered KV namespaces.
//!
//! ASCII prefixes, hex-encoded identifiers, zero-padded numeric components
//! so lexicographic order matches numeric order under prefix scans.

use crate::types::{Address, Hash};

pub const META_LATEST_HEIGHT: &[u8] = b"meta/latest_height";
pub const META_LATEST_HASH: &[u8] = b"meta/latest_hash";
pub const CONSENSUS_VALIDATORS: &[u8] = b"consensus/validators";
pub const CONSENSUS_STAKERS: &[u8] = b"consensus/stakers";

pub const BLOCK_BY_HEIGHT_PREFIX: &str = "block_by_height/";
pub const UTXO_PREFIX: &str = "utxo/";

pub fn block(hash: &Hash) -> Vec<u8> {
    format!("block/{hash}").into_bytes()
}

pub fn block_by_height(height: u64) -> Vec<u8> {
    format!("{BLOCK_BY_HEIGHT_PREFIX}{height:016x}").into_bytes()
}

pub fn tx(id: &Hash) -> Vec<u8> {
    format!("tx/{id}").into_bytes()
}

pub fn tx_block(id: &Hash) -> Vec<u8> {
    format!("tx_block/{id}").into_bytes()
}

pub fn tx_in(id: &Hash, index: u32) -> Vec<u8> {
    format!("tx_in/{id}/{index:04x}").into_bytes()
}

pub fn tx_out(id: &Hash, index: u32) -> Vec<u8> {
    format!("tx_out/{id}/{index:04x}").into_bytes()
}

/// `utxo/<tx-id>:<output-index>`, which is also the member format of the
/// utxo sets, so a set entry is usable as a lookup key directly.
pub fn utxo(ref_tx: &Hash, ref_index: u32) -> Vec<u8> {
    format!("{UTXO_PREFIX}{ref_tx}:{ref_index:04x}").into_bytes()
}

pub fn utxo_addr(addr: &Address) -> Vec<u8> {
    format!("utxo_addr/{addr}").into_bytes()
}

pub fn addr(addr: &Address) -> Vec<u8> {
    format!("addr/{addr}").into_bytes()
}

pub fn addr_sent(addr: &Address) -> Vec<u8> {
    format!("addr_sent/{addr}").into_bytes()
}

pub fn addr_recv(addr: &Address) -> Vec<u8> {
    format!("addr_recv/{addr}").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_keys_sort_numerically() {
        assert!(block_by_height(9) < block_by_height(10));
        assert!(block_by_height(255) < block_by_height(256));
        assert!(block_by_height(65535) < block_by_height(65536));
    }

    #[test]
    fn utxo_key_matches_set_member_format() {
        let id = Hash([0xab; 32]);
        let key = utxo(&id, 3);
        let s = String::from_utf8(key).unwrap();
        assert!(s.starts_with(UTXO_PREFIX));
        assert!(s.ends_with(":0003"));
    }
}
