//! Proof-of-work: the hash predicate, the nonce search and the genesis block.

use quarry_codec::{block_hash_with_digest, transactions_digest};
use quarry_types::{Block, Hash32, GENESIS_PREV_HASH};

/// True if the hex rendering of `hash` starts with `difficulty` zeros.
pub fn is_pow_valid(hash: &Hash32, difficulty: u32) -> bool {
    let nibbles = difficulty as usize;
    if nibbles > hash.len() * 2 {
        return false;
    }
    hash.iter()
        .flat_map(|b| [b >> 4, b & 0x0f])
        .take(nibbles)
        .all(|nibble| nibble == 0)
}

/// Search nonces from 0 until the block hash meets `difficulty`, then store
/// the winning nonce and hash in `block`.
///
/// Blocking and CPU-bound. The transactions digest is computed once; only the
/// header is rehashed per attempt. Callers keep `difficulty` at or below
/// [`crate::MAX_DIFFICULTY`], above it no hash qualifies and this never returns.
pub fn mine(block: &mut Block, difficulty: u32) {
    let digest = transactions_digest(&block.transactions);
    block.nonce = 0;
    loop {
        let hash = block_hash_with_digest(block, &digest);
        if is_pow_valid(&hash, difficulty) {
            block.hash = hash;
            return;
        }
        block.nonce = block.nonce.wrapping_add(1);
    }
}

/// The deterministic genesis block for `difficulty`: index 0, timestamp 0,
/// no transactions, zero predecessor hash.
pub fn genesis_block(difficulty: u32) -> Block {
    let mut genesis = Block::new(0, 0, GENESIS_PREV_HASH, Vec::new());
    mine(&mut genesis, difficulty);
    genesis
}
