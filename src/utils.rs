//! Utility functions for hashing and serialization
use super::error::Result;
use super::movement::Movement;

// big-endian so sled iterates movements in id order
pub fn id_to_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

pub fn key_to_id(key: &[u8]) -> Option<u64> {
    let bytes: [u8; 8] = key.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// SHA-256 over the CBOR encoding of every movement, taken in id order.
pub fn ledger_digest(movements: &[Movement]) -> Result<String> {
    let mut ordered: Vec<&Movement> = movements.iter().collect();
    ordered.sort_by_key(|m| m.id);

    let contents = minicbor::to_vec(&ordered)?;
    Ok(sha256::digest(&contents))
}
