use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const ADDRESS_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("address is not valid hex")]
    InvalidHex,
    #[error("address must be 20 bytes, got {0}")]
    InvalidLength(usize),
}

/// Account identifier derived from a public key.
///
/// Opaque lookup key into ledger state; see `quarry_crypto::address_from_public_key`
/// for the derivation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; ADDRESS_LEN]);

impl Address {
    pub const fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self.to_hex())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AddressError::Empty);
        }
        let raw = hex::decode(s).map_err(|_| AddressError::InvalidHex)?;
        let bytes: [u8; ADDRESS_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| AddressError::InvalidLength(raw.len()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_roundtrip() {
        let addr = Address::from_bytes([0xab; ADDRESS_LEN]);
        let text = addr.to_string();
        assert_eq!(text.len(), 40);
        assert_eq!(text.parse::<Address>().unwrap(), addr);
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert_eq!("".parse::<Address>(), Err(AddressError::Empty));
        assert_eq!("  ".parse::<Address>(), Err(AddressError::Empty));
        assert_eq!("xyz".parse::<Address>(), Err(AddressError::InvalidHex));
        assert_eq!("abcd".parse::<Address>(), Err(AddressError::InvalidLength(2)));
    }
}
