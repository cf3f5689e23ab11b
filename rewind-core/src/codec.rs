/*!
Storage codec for the snapshot `storage` column.

The stored blob is a JSON object keyed by attribute name, in collection order:

```json
{
  "title":  {"attribute": "title", "value": "Hello", "cast": null},
  "bio":    {"attribute": "bio", "value": "...", "cast": "stringable", "relationPath": ["author", "profile"]}
}
```

`relationPath` is only present for related attributes. This shape is a
persisted artifact, existing snapshots depend on it.

Values are encoded through their cast tag. Decoding leaves each value in its
stored form with the cast tag preserved; materializing the live value is left
to the restorer, which knows the target entity's current casting rules.
*/

use crate::attribute::{AttributeMap, PlainAttribute, RelatedAttribute, VirtualAttribute};
use crate::cast::CastRegistry;
use crate::value::AttributeValue;
use crate::{Result, SnapshotError};
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Serialization abstraction for the attribute mapping of a snapshot
pub trait StorageCodec {
    /// Encode attributes into a storage blob
    ///
    /// # Errors
    /// * `SnapshotError::UnknownCast` / `SnapshotError::Cast` - If a cast tag cannot encode its value
    fn encode(&self, attributes: &AttributeMap) -> Result<String>;

    /// Decode a storage blob, leaving values in stored form
    ///
    /// # Errors
    /// * `SnapshotError::MalformedStorage` - If the blob is not an object of attribute entries
    fn decode(&self, blob: &str) -> Result<AttributeMap>;

    /// Cast registry used to encode and materialize values
    fn casts(&self) -> &CastRegistry;

    /// Materialize a decoded attribute's live value using `cast`
    fn materialize(&self, attribute: &VirtualAttribute, cast: Option<&str>) -> Result<AttributeValue> {
        self.casts().decode(cast, &attribute.value().to_json())
    }
}

/// JSON codec for the storage column
#[derive(Debug, Clone)]
pub struct JsonStorageCodec {
    casts: Arc<CastRegistry>,
    pretty: bool,
}

impl JsonStorageCodec {
    /// Create a codec with the built-in casts
    pub fn new() -> Self {
        Self::with_casts(Arc::new(CastRegistry::default()))
    }

    pub fn with_casts(casts: Arc<CastRegistry>) -> Self {
        Self {
            casts,
            pretty: false,
        }
    }

    /// Pretty-print encoded blobs
    pub fn pretty(mut self, pretty: bool) -> Self {
        self.pretty = pretty;
        self
    }

    pub fn cast_registry(&self) -> Arc<CastRegistry> {
        Arc::clone(&self.casts)
    }
}

impl Default for JsonStorageCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageCodec for JsonStorageCodec {
    fn encode(&self, attributes: &AttributeMap) -> Result<String> {
        let entries = attributes
            .iter()
            .map(|attribute| {
                Ok(StoredAttribute {
                    attribute: attribute.name().to_string(),
                    value: self.casts.encode(attribute.cast(), attribute.value())?,
                    cast: attribute.cast().map(str::to_string),
                    relation_path: attribute.relation_path().map(<[String]>::to_vec),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let storage = StoredAttributes(entries);
        let blob = if self.pretty {
            serde_json::to_string_pretty(&storage)?
        } else {
            serde_json::to_string(&storage)?
        };
        Ok(blob)
    }

    fn decode(&self, blob: &str) -> Result<AttributeMap> {
        let StoredAttributes(entries) =
            serde_json::from_str(blob).map_err(|e| SnapshotError::malformed(e.to_string()))?;

        let mut attributes = AttributeMap::new();
        for entry in entries {
            if attributes.contains(&entry.attribute) {
                return Err(SnapshotError::malformed(format!(
                    "duplicate attribute '{}'",
                    entry.attribute
                )));
            }
            attributes.insert(entry.into_attribute());
        }
        Ok(attributes)
    }

    fn casts(&self) -> &CastRegistry {
        &self.casts
    }
}

/// One entry of the storage object
#[derive(Debug, Serialize, Deserialize)]
struct StoredAttribute {
    attribute: String,
    value: serde_json::Value,
    #[serde(default)]
    cast: Option<String>,
    #[serde(
        rename = "relationPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    relation_path: Option<Vec<String>>,
}

impl StoredAttribute {
    fn into_attribute(self) -> VirtualAttribute {
        let value = AttributeValue::from_json(self.value);
        match self.relation_path {
            None => VirtualAttribute::Plain(PlainAttribute {
                name: self.attribute,
                value,
                cast: self.cast,
            }),
            Some(relation_path) => VirtualAttribute::Related(RelatedAttribute {
                name: self.attribute,
                value,
                cast: self.cast,
                relation_path,
            }),
        }
    }
}

/// Storage object, serialized as a map keyed by attribute name in entry order
struct StoredAttributes(Vec<StoredAttribute>);

impl Serialize for StoredAttributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for entry in &self.0 {
            map.serialize_entry(&entry.attribute, entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StoredAttributes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = StoredAttributes;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an object of snapshot attribute entries")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((key, entry)) = access.next_entry::<String, StoredAttribute>()? {
                    if key != entry.attribute {
                        return Err(de::Error::custom(format!(
                            "entry key '{key}' does not match attribute '{}'",
                            entry.attribute
                        )));
                    }
                    entries.push(entry);
                }
                Ok(StoredAttributes(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
