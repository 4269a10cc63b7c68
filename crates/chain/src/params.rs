use serde::{Deserialize, Serialize};

pub const DEFAULT_DIFFICULTY: u32 = 4;
pub const DEFAULT_BLOCK_REWARD: u64 = 50;

/// Leading zero nibbles a 32-byte hash can carry at most.
pub const MAX_DIFFICULTY: u32 = 64;

/// Network-wide constants shared by the miner, the validator and the chain.
///
/// There is no retargeting: every node on a network must run with the same
/// values or they will reject each other's blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    /// Required leading zero hex nibbles of a block hash.
    pub difficulty: u32,
    /// Amount minted by each block's coinbase.
    pub block_reward: u64,
}

impl ConsensusParams {
    pub fn new(difficulty: u32, block_reward: u64) -> Self {
        Self {
            difficulty,
            block_reward,
        }
    }
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY, DEFAULT_BLOCK_REWARD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let params: ConsensusParams = serde_json::from_str(r#"{"difficulty":2}"#).unwrap();
        assert_eq!(params, ConsensusParams::new(2, DEFAULT_BLOCK_REWARD));

        let params: ConsensusParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params, ConsensusParams::default());
    }
}
