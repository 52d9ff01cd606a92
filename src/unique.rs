//! Unique index emulation
//!
//! The store has no native unique secondary indexes. Uniqueness is
//! emulated with sentinel records: for each unique field, a record whose
//! partition key encodes the claimed value and whose sort key is the
//! fixed `UniqueKey` marker is written under a "must not already exist"
//! condition, inside the same transaction as the owning record.
//!
//! The owning record carries a manifest attribute listing its current
//! descriptors as `attr;;;field;;;indexValue` triples. The manifest is the
//! durable source of truth: an update names only the attributes it
//! touches, so diffing against the persisted manifest is the only way to
//! know which sentinels to retire.

use crate::error::{Result, StoreError};
use crate::record::Record;
use crate::retry::{self, OpClass, RetryPolicy};
use crate::schema::{
    ATTR_PK, ATTR_SK, ATTR_UNIQUE_FIELDS, KEY_SEGMENT_SEPARATOR, MANIFEST_SEPARATOR, UNIQUE_SK,
    UNIQUE_TAG,
};
use crate::store::{Item, Key, StoreClient};
use aws_sdk_dynamodb::types::AttributeValue;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::BTreeMap;

/// One unique field of an owning record, resolved to its index value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UniqueFieldDescriptor {
    /// Stored attribute name
    pub attribute: String,
    /// Logical field name inside the index value
    pub field: String,
    /// Sentinel partition key claiming the current value
    pub index_value: String,
    /// Previous sentinel partition key, present when a reconcile detected
    /// a value change
    pub prior_index_value: Option<String>,
}

impl UniqueFieldDescriptor {
    /// True when this descriptor carries a retired prior value
    pub fn changed(&self) -> bool {
        self.prior_index_value.is_some()
    }
}

/// Descriptors keyed by attribute name
pub type DescriptorMap = BTreeMap<String, UniqueFieldDescriptor>;

/// Encode a unique field value for splicing into an index value
///
/// Strings pass through, numbers and booleans use their canonical text
/// form, binary is base64. Anything else cannot claim uniqueness.
fn encode_unique_value(value: &AttributeValue) -> Result<String> {
    match value {
        AttributeValue::S(s) => Ok(s.clone()),
        AttributeValue::N(n) => Ok(n.clone()),
        AttributeValue::Bool(b) => Ok(b.to_string()),
        AttributeValue::B(b) => Ok(STANDARD.encode(b.as_ref())),
        other => Err(StoreError::validation(format!(
            "unique field values must be string, number, boolean, or binary, got {other:?}"
        ))),
    }
}

/// Compute the sentinel partition key for one unique field
///
/// Shape: `<pkPrefix>#UniqueKey#<FIELD>#<VALUE>`, uppercased apart from
/// the fixed tag, where pkPrefix is the first `prefix_segments`
/// `#`-segments of the owning partition key.
pub fn index_value(
    pk: &str,
    prefix_segments: u32,
    field: &str,
    value: &AttributeValue,
) -> Result<String> {
    if prefix_segments == 0 {
        return Err(StoreError::validation(format!(
            "unique field '{field}' must declare a positive partition-key prefix length"
        )));
    }
    let segments: Vec<&str> = pk.split(KEY_SEGMENT_SEPARATOR).collect();
    if segments.len() < prefix_segments as usize {
        return Err(StoreError::validation(format!(
            "partition key '{pk}' has {} segments, unique field '{field}' needs {prefix_segments}",
            segments.len()
        )));
    }
    let prefix = segments[..prefix_segments as usize].join("#");
    let encoded = encode_unique_value(value)?;
    Ok(format!(
        "{}#{}#{}#{}",
        prefix.to_uppercase(),
        UNIQUE_TAG,
        field.to_uppercase(),
        encoded.to_uppercase()
    ))
}

/// Sentinel record claiming one index value
pub fn sentinel_item(index_value: &str) -> Item {
    let mut item = Item::with_capacity(2);
    item.insert(ATTR_PK.to_string(), AttributeValue::S(index_value.to_string()));
    item.insert(ATTR_SK.to_string(), AttributeValue::S(UNIQUE_SK.to_string()));
    item
}

/// Key of the sentinel record claiming one index value
pub fn sentinel_key(index_value: &str) -> Key {
    Key::new(index_value, UNIQUE_SK)
}

/// Resolve a domain record's unique-field declarations into descriptors
///
/// Returns an empty map for records with no unique fields. Fails when a
/// declared attribute is missing from the payload, a prefix length is
/// zero or exceeds the partition key's segment count, or the payload
/// claims an attribute this layer manages.
pub fn describe_unique(record: &dyn Record) -> Result<DescriptorMap> {
    let specs = record.unique_fields();
    let mut descriptors = DescriptorMap::new();
    if specs.is_empty() {
        return Ok(descriptors);
    }

    let pk = record.partition_key();
    let attributes = record.attributes();
    if attributes.contains_key(ATTR_UNIQUE_FIELDS) {
        return Err(StoreError::validation(format!(
            "record attributes must not claim the managed '{ATTR_UNIQUE_FIELDS}' attribute"
        )));
    }

    for spec in specs {
        let value = attributes.get(&spec.attribute).ok_or_else(|| {
            StoreError::validation(format!(
                "unique field '{}' is not present in the record attributes",
                spec.attribute
            ))
        })?;
        let index_value = index_value(&pk, spec.prefix_segments, &spec.field, value)?;
        if descriptors
            .insert(
                spec.attribute.clone(),
                UniqueFieldDescriptor {
                    attribute: spec.attribute.clone(),
                    field: spec.field,
                    index_value,
                    prior_index_value: None,
                },
            )
            .is_some()
        {
            return Err(StoreError::validation(format!(
                "unique field '{}' is declared more than once",
                spec.attribute
            )));
        }
    }

    Ok(descriptors)
}

/// Encode descriptors into the manifest attribute value
pub fn manifest_value<'a>(
    descriptors: impl IntoIterator<Item = &'a UniqueFieldDescriptor>,
) -> AttributeValue {
    let triples = descriptors
        .into_iter()
        .map(|d| {
            AttributeValue::S(format!(
                "{}{sep}{}{sep}{}",
                d.attribute,
                d.field,
                d.index_value,
                sep = MANIFEST_SEPARATOR
            ))
        })
        .collect();
    AttributeValue::L(triples)
}

/// Decode a manifest attribute back into descriptors
pub fn parse_manifest(value: &AttributeValue) -> Result<DescriptorMap> {
    let entries: Vec<&str> = match value {
        AttributeValue::L(list) => list
            .iter()
            .map(|v| {
                v.as_s().map(String::as_str).map_err(|_| {
                    StoreError::validation("unique manifest entries must be strings")
                })
            })
            .collect::<Result<_>>()?,
        AttributeValue::Ss(set) => set.iter().map(String::as_str).collect(),
        other => {
            return Err(StoreError::validation(format!(
                "unique manifest attribute has unexpected type {other:?}"
            )))
        }
    };

    let mut descriptors = DescriptorMap::new();
    for entry in entries {
        let mut parts = entry.split(MANIFEST_SEPARATOR);
        let (Some(attribute), Some(field), Some(index_value), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(StoreError::validation(format!(
                "malformed unique manifest entry '{entry}'"
            )));
        };
        descriptors.insert(
            attribute.to_string(),
            UniqueFieldDescriptor {
                attribute: attribute.to_string(),
                field: field.to_string(),
                index_value: index_value.to_string(),
                prior_index_value: None,
            },
        );
    }
    Ok(descriptors)
}

/// Load the persisted descriptors of one owning record
///
/// Reads only the manifest attribute. Absence of the record or of the
/// manifest is not an error; both mean "no unique fields".
pub async fn load_unique(
    client: &dyn StoreClient,
    table: &str,
    policy: &RetryPolicy,
    pk: &str,
    sk: &str,
) -> Result<Option<DescriptorMap>> {
    let key = Key::new(pk, sk);
    let projection = [ATTR_UNIQUE_FIELDS.to_string()];
    let item = retry::execute(policy, OpClass::Read, "load unique manifest", || {
        client.get(table, &key, true, Some(&projection))
    })
    .await
    .map_err(StoreError::from)?;

    match item.flatten() {
        Some(item) => match item.get(ATTR_UNIQUE_FIELDS) {
            Some(manifest) => Ok(Some(parse_manifest(manifest)?)),
            None => Ok(None),
        },
        None => Ok(None),
    }
}

/// Recompute descriptors against an incoming set of attribute changes
///
/// Every descriptor in `old` appears in the output: entries whose
/// attribute is touched by `changes` are recomputed (marked changed, with
/// the prior index value carried, only when the value actually differs);
/// everything else is carried forward unchanged. Returns whether any
/// descriptor changed alongside the full new manifest.
pub fn reconcile(
    old: &DescriptorMap,
    changes: &[(&str, &AttributeValue)],
) -> Result<(bool, DescriptorMap)> {
    let mut any_changed = false;
    let mut full = DescriptorMap::new();

    for (attribute, descriptor) in old {
        let incoming = changes.iter().find(|(a, _)| a == attribute);
        let Some((_, new_value)) = incoming else {
            full.insert(attribute.clone(), descriptor.clone());
            continue;
        };

        // The stored index value embeds the scoped prefix; recover it so
        // the new value lands in the same uniqueness domain.
        let tag = format!("#{UNIQUE_TAG}#");
        let Some((prefix, _)) = descriptor.index_value.split_once(&tag) else {
            return Err(StoreError::validation(format!(
                "manifest index value '{}' is missing the unique tag",
                descriptor.index_value
            )));
        };
        let encoded = encode_unique_value(new_value)?;
        let new_index_value = format!(
            "{prefix}#{UNIQUE_TAG}#{}#{}",
            descriptor.field.to_uppercase(),
            encoded.to_uppercase()
        );

        if new_index_value == descriptor.index_value {
            full.insert(attribute.clone(), descriptor.clone());
        } else {
            any_changed = true;
            full.insert(
                attribute.clone(),
                UniqueFieldDescriptor {
                    attribute: descriptor.attribute.clone(),
                    field: descriptor.field.clone(),
                    index_value: new_index_value,
                    prior_index_value: Some(descriptor.index_value.clone()),
                },
            );
        }
    }

    Ok((any_changed, full))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::UniqueFieldSpec;

    struct Profile {
        pk: String,
        email: String,
    }

    impl Record for Profile {
        fn partition_key(&self) -> String {
            self.pk.clone()
        }

        fn sort_key(&self) -> String {
            "PROFILE".to_string()
        }

        fn attributes(&self) -> Item {
            let mut attrs = Item::new();
            attrs.insert(
                "email".to_string(),
                AttributeValue::S(self.email.clone()),
            );
            attrs
        }

        fn unique_fields(&self) -> Vec<UniqueFieldSpec> {
            vec![UniqueFieldSpec::new("email", 2)]
        }
    }

    #[test]
    fn test_index_value_shape() {
        let value = AttributeValue::S("a@b.com".to_string());
        let iv = index_value("APP#SVC#TENANT#42", 2, "email", &value).unwrap();
        assert_eq!(iv, "APP#SVC#UniqueKey#EMAIL#A@B.COM");
    }

    #[test]
    fn test_index_value_prefix_too_long() {
        let value = AttributeValue::S("x".to_string());
        let err = index_value("APP#SVC", 3, "email", &value).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn test_index_value_zero_prefix_rejected() {
        let value = AttributeValue::S("x".to_string());
        assert!(index_value("APP#SVC", 0, "email", &value).is_err());
    }

    #[test]
    fn test_encode_value_kinds() {
        assert_eq!(
            encode_unique_value(&AttributeValue::N("42".to_string())).unwrap(),
            "42"
        );
        assert_eq!(
            encode_unique_value(&AttributeValue::Bool(true)).unwrap(),
            "true"
        );
        assert!(encode_unique_value(&AttributeValue::L(vec![])).is_err());
    }

    #[test]
    fn test_describe_unique() {
        let profile = Profile {
            pk: "APP#SVC#TENANT#42".to_string(),
            email: "a@b.com".to_string(),
        };
        let descriptors = describe_unique(&profile).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(
            descriptors["email"].index_value,
            "APP#SVC#UniqueKey#EMAIL#A@B.COM"
        );
        assert!(!descriptors["email"].changed());
    }

    #[test]
    fn test_describe_unique_missing_attribute() {
        struct Broken;
        impl Record for Broken {
            fn partition_key(&self) -> String {
                "APP#SVC".to_string()
            }
            fn sort_key(&self) -> String {
                "X".to_string()
            }
            fn attributes(&self) -> Item {
                Item::new()
            }
            fn unique_fields(&self) -> Vec<UniqueFieldSpec> {
                vec![UniqueFieldSpec::new("email", 1)]
            }
        }
        assert!(describe_unique(&Broken).is_err());
    }

    #[test]
    fn test_manifest_round_trip() {
        let profile = Profile {
            pk: "APP#SVC#TENANT#42".to_string(),
            email: "a@b.com".to_string(),
        };
        let descriptors = describe_unique(&profile).unwrap();
        let manifest = manifest_value(descriptors.values());
        let parsed = parse_manifest(&manifest).unwrap();
        assert_eq!(parsed, descriptors);
    }

    #[test]
    fn test_parse_manifest_rejects_malformed_entries() {
        let manifest = AttributeValue::L(vec![AttributeValue::S("only;;;two".to_string())]);
        assert!(parse_manifest(&manifest).is_err());
        let manifest = AttributeValue::L(vec![AttributeValue::S(
            "a;;;b;;;c;;;extra".to_string(),
        )]);
        assert!(parse_manifest(&manifest).is_err());
    }

    #[test]
    fn test_reconcile_changed_value() {
        let profile = Profile {
            pk: "APP#SVC#TENANT#42".to_string(),
            email: "a@b.com".to_string(),
        };
        let old = describe_unique(&profile).unwrap();
        let new_value = AttributeValue::S("new@b.com".to_string());
        let (changed, full) = reconcile(&old, &[("email", &new_value)]).unwrap();
        assert!(changed);
        let descriptor = &full["email"];
        assert_eq!(descriptor.index_value, "APP#SVC#UniqueKey#EMAIL#NEW@B.COM");
        assert_eq!(
            descriptor.prior_index_value.as_deref(),
            Some("APP#SVC#UniqueKey#EMAIL#A@B.COM")
        );
    }

    #[test]
    fn test_reconcile_same_value_is_unchanged() {
        let profile = Profile {
            pk: "APP#SVC#TENANT#42".to_string(),
            email: "a@b.com".to_string(),
        };
        let old = describe_unique(&profile).unwrap();
        // Same value, different case: index values are uppercased, so this
        // is not a change.
        let same = AttributeValue::S("A@B.COM".to_string());
        let (changed, full) = reconcile(&old, &[("email", &same)]).unwrap();
        assert!(!changed);
        assert_eq!(full, old);
    }

    #[test]
    fn test_reconcile_untouched_attributes_carry_forward() {
        let profile = Profile {
            pk: "APP#SVC#TENANT#42".to_string(),
            email: "a@b.com".to_string(),
        };
        let old = describe_unique(&profile).unwrap();
        let other = AttributeValue::S("ignored".to_string());
        let (changed, full) = reconcile(&old, &[("nickname", &other)]).unwrap();
        assert!(!changed);
        assert_eq!(full, old);
    }
}
