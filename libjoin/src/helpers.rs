use serde::{Deserialize, Deserializer, Serialize};

#[cfg(any(test, feature = "test-fixtures"))]
mod fixtures;
#[cfg(any(test, feature = "test-fixtures"))]
pub use fixtures::*;

pub fn to_hex<S>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    hex::encode(bytes).serialize(s)
}

pub fn option_to_hex<S>(opt: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    opt.as_ref().map(hex::encode).serialize(s)
}

pub fn from_hex<'de, D>(de: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let hex_str = String::deserialize(de)?;
    hex::decode(hex_str).map_err(|e| serde::de::Error::custom(format!("Invalid hex string: {e}")))
}

/// Accepts `null`, a missing field (with `#[serde(default)]`) or the empty string as `None`.
pub fn option_from_hex<'de, D>(de: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(de)? {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => {
            let bytes = hex::decode(s).map_err(|e| serde::de::Error::custom(format!("Invalid hex string: {e}")))?;
            Ok(Some(bytes))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Blob {
        #[serde(serialize_with = "to_hex", deserialize_with = "from_hex")]
        data: Vec<u8>,
        #[serde(default, serialize_with = "option_to_hex", deserialize_with = "option_from_hex")]
        maybe: Option<Vec<u8>>,
    }

    #[test]
    fn hex_fields() {
        let blob = Blob { data: vec![0xde, 0xad], maybe: None };
        let json = serde_json::to_string(&blob).unwrap();
        assert_eq!(json, r#"{"data":"dead","maybe":null}"#);
        let blob: Blob = serde_json::from_str(r#"{"data":"beef","maybe":"00ff"}"#).unwrap();
        assert_eq!(blob.data, vec![0xbe, 0xef]);
        assert_eq!(blob.maybe, Some(vec![0x00, 0xff]));
        let blob: Blob = serde_json::from_str(r#"{"data":"","maybe":""}"#).unwrap();
        assert!(blob.data.is_empty());
        assert!(blob.maybe.is_none());
        let blob: Blob = serde_json::from_str(r#"{"data":"00"}"#).unwrap();
        assert!(blob.maybe.is_none());
        assert!(serde_json::from_str::<Blob>(r#"{"data":"xyz"}"#).is_err());
    }

    #[test]
    fn fixtures_are_distinct() {
        assert_ne!(test_address(1), test_address(2));
        assert_eq!(test_address(7), test_address(7));
        assert_ne!(test_utxo(1, 10).outpoint, test_utxo(2, 10).outpoint);
        assert!(test_address(1).to_string().starts_with("bcrt1"));
    }
}
