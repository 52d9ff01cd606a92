//! Opaque pagination cursors
//!
//! A cursor is `base64(JSON(last-key))` of the store's native
//! last-evaluated key. Key attributes can only be strings, numbers, or
//! binary, so the JSON shape is `{"attr": {"S"|"N"|"B": "..."}}` with
//! binary payloads base64-encoded inside the JSON. Encoding round-trips
//! exactly; the empty string means "from the start".

use crate::error::{Result, StoreError};
use crate::store::Item;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Encode a native last-key into an opaque cursor
///
/// `None` (no further pages) encodes to the empty string.
pub fn encode_cursor(last_key: Option<&Item>) -> Result<String> {
    let Some(last_key) = last_key.filter(|k| !k.is_empty()) else {
        return Ok(String::new());
    };

    let mut object = Map::new();
    for (attr, value) in last_key {
        let tagged = match value {
            AttributeValue::S(s) => ("S", Value::String(s.clone())),
            AttributeValue::N(n) => ("N", Value::String(n.clone())),
            AttributeValue::B(b) => ("B", Value::String(STANDARD.encode(b.as_ref()))),
            other => {
                return Err(StoreError::validation(format!(
                    "last key attribute '{attr}' has non-key type {other:?}"
                )))
            }
        };
        let mut entry = Map::new();
        entry.insert(tagged.0.to_string(), tagged.1);
        object.insert(attr.clone(), Value::Object(entry));
    }

    let json = serde_json::to_vec(&Value::Object(object))
        .map_err(|e| StoreError::storage(format!("cursor encoding failed: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decode an opaque cursor back into the store's native last-key
///
/// The empty string decodes to `None` (first page).
pub fn decode_cursor(cursor: &str) -> Result<Option<Item>> {
    if cursor.is_empty() {
        return Ok(None);
    }

    let json = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| StoreError::validation(format!("malformed cursor: {e}")))?;
    let value: Value = serde_json::from_slice(&json)
        .map_err(|e| StoreError::validation(format!("malformed cursor payload: {e}")))?;
    let Value::Object(object) = value else {
        return Err(StoreError::validation("cursor payload is not a key map"));
    };

    let mut last_key = HashMap::with_capacity(object.len());
    for (attr, entry) in object {
        let Value::Object(entry) = entry else {
            return Err(StoreError::validation(format!(
                "cursor attribute '{attr}' is not a tagged value"
            )));
        };
        if entry.len() != 1 {
            return Err(StoreError::validation(format!(
                "cursor attribute '{attr}' must carry exactly one type tag"
            )));
        }
        let (tag, raw) = entry.into_iter().next().expect("len checked above");
        let Value::String(raw) = raw else {
            return Err(StoreError::validation(format!(
                "cursor attribute '{attr}' value is not a string"
            )));
        };
        let value = match tag.as_str() {
            "S" => AttributeValue::S(raw),
            "N" => AttributeValue::N(raw),
            "B" => {
                let bytes = STANDARD.decode(raw).map_err(|e| {
                    StoreError::validation(format!("cursor attribute '{attr}' binary: {e}"))
                })?;
                AttributeValue::B(Blob::new(bytes))
            }
            other => {
                return Err(StoreError::validation(format!(
                    "cursor attribute '{attr}' has unknown type tag '{other}'"
                )))
            }
        };
        last_key.insert(attr, value);
    }

    Ok(Some(last_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(entries: &[(&str, AttributeValue)]) -> Item {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_round_trip_string_and_number() {
        let last_key = key(&[
            ("PK", AttributeValue::S("ORG#1".to_string())),
            ("SK", AttributeValue::S("PROFILE#9".to_string())),
            ("rank", AttributeValue::N("42".to_string())),
        ]);
        let cursor = encode_cursor(Some(&last_key)).unwrap();
        assert!(!cursor.is_empty());
        assert_eq!(decode_cursor(&cursor).unwrap().unwrap(), last_key);
    }

    #[test]
    fn test_round_trip_binary() {
        let last_key = key(&[("PK", AttributeValue::B(Blob::new(vec![0u8, 159, 146, 150])))]);
        let cursor = encode_cursor(Some(&last_key)).unwrap();
        assert_eq!(decode_cursor(&cursor).unwrap().unwrap(), last_key);
    }

    #[test]
    fn test_empty_key_maps_to_empty_cursor() {
        assert_eq!(encode_cursor(None).unwrap(), "");
        assert_eq!(encode_cursor(Some(&Item::new())).unwrap(), "");
        assert_eq!(decode_cursor("").unwrap(), None);
    }

    #[test]
    fn test_non_key_type_rejected() {
        let last_key = key(&[("PK", AttributeValue::Bool(true))]);
        assert!(matches!(
            encode_cursor(Some(&last_key)),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn test_malformed_cursor_rejected() {
        assert!(decode_cursor("not-base64!!").is_err());
        let not_tagged = URL_SAFE_NO_PAD.encode(b"{\"PK\": \"plain\"}");
        assert!(decode_cursor(&not_tagged).is_err());
    }
}
