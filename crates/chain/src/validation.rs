//! Structural block and chain rules.
//!
//! Everything here is pure: no ledger state is read or written. Whether a
//! sender can afford a transfer, or carries the right nonce, is decided when
//! the block is applied, because that depends on which fork is being applied.

use quarry_codec::block_hash;
use quarry_crypto::verify_tx;
use quarry_types::{Block, GENESIS_PREV_HASH};

use crate::params::ConsensusParams;
use crate::pow::is_pow_valid;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("expected index {expected}, got {got}")]
    IndexGap { expected: u64, got: u64 },
    #[error("prev_hash does not match predecessor hash")]
    PrevHashMismatch,
    #[error("stored hash does not match block contents")]
    HashMismatch,
    #[error("hash does not meet difficulty {0}")]
    InsufficientWork(u32),
    #[error("genesis block must not carry transactions")]
    GenesisTransactions,
    #[error("first transaction must be a coinbase")]
    MissingCoinbase,
    #[error("coinbase pays {got}, block reward is {expected}")]
    WrongReward { expected: u64, got: u64 },
    #[error("transaction {0} is an extra coinbase")]
    ExtraCoinbase(usize),
    #[error("transaction {0} has zero amount")]
    ZeroAmount(usize),
    #[error("transaction {0} has an invalid signature")]
    InvalidSignature(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainValidationError {
    #[error("chain is empty")]
    Empty,
    #[error("block {height}: {source}")]
    Block {
        height: u64,
        #[source]
        source: BlockError,
    },
}

fn check_seal(block: &Block, difficulty: u32) -> Result<(), BlockError> {
    if block_hash(block) != block.hash {
        return Err(BlockError::HashMismatch);
    }
    if !is_pow_valid(&block.hash, difficulty) {
        return Err(BlockError::InsufficientWork(difficulty));
    }
    Ok(())
}

fn check_body(block: &Block, params: &ConsensusParams) -> Result<(), BlockError> {
    let Some(coinbase) = block.coinbase() else {
        return Err(BlockError::MissingCoinbase);
    };
    if coinbase.amount != params.block_reward {
        return Err(BlockError::WrongReward {
            expected: params.block_reward,
            got: coinbase.amount,
        });
    }

    for (i, tx) in block.transactions.iter().enumerate() {
        if i > 0 && tx.is_coinbase() {
            return Err(BlockError::ExtraCoinbase(i));
        }
        if tx.amount == 0 {
            return Err(BlockError::ZeroAmount(i));
        }
        if !matches!(verify_tx(tx), Ok(true)) {
            return Err(BlockError::InvalidSignature(i));
        }
    }
    Ok(())
}

/// Check `candidate` as the direct successor of `predecessor`.
pub fn validate_block(
    candidate: &Block,
    predecessor: &Block,
    params: &ConsensusParams,
) -> Result<(), BlockError> {
    let expected = predecessor.index.saturating_add(1);
    if candidate.index != expected {
        return Err(BlockError::IndexGap {
            expected,
            got: candidate.index,
        });
    }
    if candidate.prev_hash != predecessor.hash {
        return Err(BlockError::PrevHashMismatch);
    }
    check_seal(candidate, params.difficulty)?;
    check_body(candidate, params)
}

pub fn is_block_valid(candidate: &Block, predecessor: &Block, params: &ConsensusParams) -> bool {
    validate_block(candidate, predecessor, params).is_ok()
}

/// Genesis has index 0, the zero predecessor hash, no transactions, and a
/// hash that is both correct and sealed.
pub fn validate_genesis(block: &Block, params: &ConsensusParams) -> Result<(), BlockError> {
    if block.index != 0 {
        return Err(BlockError::IndexGap {
            expected: 0,
            got: block.index,
        });
    }
    if block.prev_hash != GENESIS_PREV_HASH {
        return Err(BlockError::PrevHashMismatch);
    }
    if !block.transactions.is_empty() {
        return Err(BlockError::GenesisTransactions);
    }
    check_seal(block, params.difficulty)
}

/// Validate a full block list, genesis first.
pub fn validate_chain(
    blocks: &[Block],
    params: &ConsensusParams,
) -> Result<(), ChainValidationError> {
    let Some(genesis) = blocks.first() else {
        return Err(ChainValidationError::Empty);
    };
    validate_genesis(genesis, params).map_err(|source| ChainValidationError::Block {
        height: 0,
        source,
    })?;

    for pair in blocks.windows(2) {
        validate_block(&pair[1], &pair[0], params).map_err(|source| {
            ChainValidationError::Block {
                height: pair[1].index,
                source,
            }
        })?;
    }
    Ok(())
}

pub fn is_chain_valid(blocks: &[Block], params: &ConsensusParams) -> bool {
    validate_chain(blocks, params).is_ok()
}
