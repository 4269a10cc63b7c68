//! Consensus core: proof-of-work, block and chain validation, and the
//! [`Chain`] that owns the accepted blocks, their ledger state and the
//! mempool.

mod chain;
pub mod error;
pub mod params;
pub mod pow;
pub mod store;
pub mod validation;

pub use chain::Chain;
pub use error::ChainError;
pub use params::{ConsensusParams, DEFAULT_BLOCK_REWARD, DEFAULT_DIFFICULTY, MAX_DIFFICULTY};
pub use pow::{genesis_block, is_pow_valid, mine};
pub use store::{ChainStore, JsonFileStore, StoreError};
pub use validation::{
    is_block_valid, is_chain_valid, validate_block, validate_chain, validate_genesis, BlockError,
    ChainValidationError,
};
