use serde::{Deserialize, Serialize};

use crate::{Address, PublicKeyBytes, SignatureBytes};

/// Wire sentinel written in place of a sender for coinbase transactions.
pub const COINBASE_SENDER: &str = "COINBASE";

/// A signed value transfer, or an unsigned coinbase reward when `from` is `None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(default, with = "sender")]
    pub from: Option<Address>,
    pub to: Address,
    pub amount: u64,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub nonce: u64,
    pub timestamp: u64,
    #[serde(default, with = "crate::hex_serde::opt_array")]
    pub public_key: Option<PublicKeyBytes>,
    #[serde(default, with = "crate::hex_serde::opt_array")]
    pub signature: Option<SignatureBytes>,
}

impl Transaction {
    /// Unsigned transfer; sign it with `quarry_crypto::sign_tx` before submitting.
    pub fn transfer(
        from: Address,
        to: Address,
        amount: u64,
        fee: u64,
        nonce: u64,
        timestamp: u64,
    ) -> Self {
        Self {
            from: Some(from),
            to,
            amount,
            fee,
            nonce,
            timestamp,
            public_key: None,
            signature: None,
        }
    }

    pub fn coinbase(to: Address, amount: u64, timestamp: u64) -> Self {
        Self {
            from: None,
            to,
            amount,
            fee: 0,
            nonce: 0,
            timestamp,
            public_key: None,
            signature: None,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.from.is_none()
    }

    /// What the sender is debited: `amount + fee`, `None` on overflow.
    pub fn total_debit(&self) -> Option<u64> {
        self.amount.checked_add(self.fee)
    }
}

mod sender {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::COINBASE_SENDER;
    use crate::Address;

    pub fn serialize<S: Serializer>(from: &Option<Address>, s: S) -> Result<S::Ok, S::Error> {
        match from {
            Some(addr) => s.serialize_str(&addr.to_hex()),
            None => s.serialize_str(COINBASE_SENDER),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Address>, D::Error> {
        let raw = Option::<String>::deserialize(d)?.unwrap_or_default();
        match raw.as_str() {
            "" | COINBASE_SENDER => Ok(None),
            other => other.parse().map(Some).map_err(serde::de::Error::custom),
        }
    }
}
