use quarry_mempool::MempoolError;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: u64, required: u64 },
    #[error("bad nonce: expected {expected}, got {got}")]
    BadNonce { expected: u64, got: u64 },
    #[error("invalid block: {0}")]
    InvalidBlock(String),
    #[error("invalid chain: {0}")]
    InvalidChain(String),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
