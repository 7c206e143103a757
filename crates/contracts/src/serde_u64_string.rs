//! 64-bit identifiers serialized as JSON strings so web clients never hit
//! the 2^53 integer precision cliff.

use serde::de::Error;
use serde::{Deserialize, Deserializer, Serializer};

pub fn serialize<S>(value: &u64, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&value.to_string())
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum U64Input {
        String(String),
        Number(u64),
    }

    match U64Input::deserialize(deserializer)? {
        U64Input::String(raw) => raw.parse::<u64>().map_err(D::Error::custom),
        U64Input::Number(value) => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
    struct Wrapper {
        #[serde(with = "super")]
        id: u64,
    }

    #[test]
    fn deserialize_accepts_string() {
        let parsed: Wrapper =
            serde_json::from_str(r#"{"id":"9007199254740993"}"#).expect("string id");
        assert_eq!(parsed.id, 9007199254740993);
    }

    #[test]
    fn deserialize_accepts_number() {
        let parsed: Wrapper = serde_json::from_str(r#"{"id":1337}"#).expect("numeric id");
        assert_eq!(parsed.id, 1337);
    }

    #[test]
    fn serializes_as_string() {
        let raw = serde_json::to_string(&Wrapper { id: 42 }).expect("serialize");
        assert_eq!(raw, r#"{"id":"42"}"#);
    }
}
