//! Serde adapters that render fixed-size byte arrays as lowercase hex strings.
//!
//! Use with `#[serde(with = "quarry_types::hex_serde::array")]` or
//! `#[serde(with = "quarry_types::hex_serde::opt_array")]`.

use serde::{Deserialize, Deserializer, Serializer};

fn decode<E: serde::de::Error, const N: usize>(s: &str) -> Result<[u8; N], E> {
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).map_err(E::custom)?;
    Ok(out)
}

pub mod array {
    use super::*;

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &[u8; N],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(deserializer)?;
        decode(&s)
    }
}

/// `None` is written as JSON `null`; both `null` and `""` read back as `None`.
pub mod opt_array {
    use super::*;

    pub fn serialize<S: Serializer, const N: usize>(
        bytes: &Option<[u8; N]>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => serializer.serialize_some(&hex::encode(b)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(
        deserializer: D,
    ) -> Result<Option<[u8; N]>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(s) if s.is_empty() => Ok(None),
            Some(s) => decode(&s).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Holder {
        #[serde(with = "super::array")]
        fixed: [u8; 4],
        #[serde(default, with = "super::opt_array")]
        maybe: Option<[u8; 2]>,
    }

    #[test]
    fn renders_lowercase_hex() {
        let h = Holder {
            fixed: [0xde, 0xad, 0xbe, 0xef],
            maybe: Some([0x0a, 0xff]),
        };
        let json = serde_json::to_string(&h).unwrap();
        assert_eq!(json, r#"{"fixed":"deadbeef","maybe":"0aff"}"#);
        assert_eq!(serde_json::from_str::<Holder>(&json).unwrap(), h);
    }

    #[test]
    fn empty_and_missing_optional_are_none() {
        let a: Holder = serde_json::from_str(r#"{"fixed":"00000000","maybe":""}"#).unwrap();
        let b: Holder = serde_json::from_str(r#"{"fixed":"00000000"}"#).unwrap();
        assert_eq!(a.maybe, None);
        assert_eq!(b.maybe, None);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(serde_json::from_str::<Holder>(r#"{"fixed":"dead"}"#).is_err());
        assert!(serde_json::from_str::<Holder>(r#"{"fixed":"zzzzzzzz"}"#).is_err());
    }
}
