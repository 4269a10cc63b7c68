//! Peer-to-peer gossip for the chain: newline-delimited JSON envelopes over
//! TCP, one reader task and one writer task per peer.

pub mod message;
mod node;
mod session;

pub use message::{decode_line, encode_line, Message, MAX_MESSAGE_BYTES};
pub use node::{P2pNode, DEFAULT_DIAL_TIMEOUT};

use quarry_types::{Block, Transaction};

#[derive(Debug, thiserror::Error)]
pub enum P2pError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("message exceeds the 32 MiB line limit")]
    MessageTooLarge,
    #[error("timed out dialing {0}")]
    DialTimeout(String),
}

/// Outbound gossip as seen by the client-facing API.
pub trait Broadcaster: Send + Sync {
    fn broadcast_tx(&self, tx: &Transaction);

    fn broadcast_block(&self, block: &Block);
}
