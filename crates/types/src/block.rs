use serde::{Deserialize, Serialize};

use crate::{Hash32, Transaction};

/// `prev_hash` carried by the genesis block.
pub const GENESIS_PREV_HASH: Hash32 = [0u8; 32];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: u64,
    pub transactions: Vec<Transaction>,
    #[serde(with = "crate::hex_serde::array")]
    pub prev_hash: Hash32,
    #[serde(with = "crate::hex_serde::array")]
    pub hash: Hash32,
    pub nonce: u64,
}

impl Block {
    /// Unmined block; `hash` stays zeroed until the miner fills it in.
    pub fn new(
        index: u64,
        timestamp: u64,
        prev_hash: Hash32,
        transactions: Vec<Transaction>,
    ) -> Self {
        Self {
            index,
            timestamp,
            transactions,
            prev_hash,
            hash: [0u8; 32],
            nonce: 0,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    /// The reward transaction, if the block leads with one.
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    pub fn total_fees(&self) -> Option<u64> {
        self.transactions
            .iter()
            .try_fold(0u64, |acc, tx| acc.checked_add(tx.fee))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Address, ADDRESS_LEN};

    #[test]
    fn hashes_serialize_as_hex() {
        let mut block = Block::new(3, 10, [0x11; 32], Vec::new());
        block.hash = [0x22; 32];
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["prev_hash"], "11".repeat(32));
        assert_eq!(json["hash"], "22".repeat(32));

        let back: Block = serde_json::from_value(json).unwrap();
        assert_eq!(back, block);
    }

    #[test]
    fn coinbase_only_when_first() {
        let miner = Address::from_bytes([1; ADDRESS_LEN]);
        let other = Address::from_bytes([2; ADDRESS_LEN]);
        let transfer = Transaction::transfer(other, miner, 1, 2, 1, 0);

        let led = Block::new(
            1,
            0,
            [0; 32],
            vec![Transaction::coinbase(miner, 50, 0), transfer.clone()],
        );
        assert_eq!(led.coinbase().map(|tx| tx.to), Some(miner));
        assert_eq!(led.total_fees(), Some(2));

        let trailing = Block::new(1, 0, [0; 32], vec![transfer]);
        assert!(trailing.coinbase().is_none());
    }
}
