//! Core data model shared by every crate in the workspace.

mod address;
mod block;
pub mod hex_serde;
mod transaction;

pub use address::{Address, AddressError, ADDRESS_LEN};
pub use block::{Block, GENESIS_PREV_HASH};
pub use transaction::{Transaction, COINBASE_SENDER};

pub type Hash32 = [u8; 32];
pub type TxId = Hash32;
pub type PublicKeyBytes = [u8; 32];
pub type SignatureBytes = [u8; 64];
