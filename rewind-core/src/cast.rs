/*!
Cast adapters: named transforms between live attribute values and their stored form.

A cast tag recorded next to a captured attribute names the [`Cast`] used to
encode the value into snapshot storage and to materialize it again on restore.
The default [`CastRegistry`] knows the built-in casts below; callers can
register their own.

| tag          | live value               | stored form              |
|--------------|--------------------------|--------------------------|
| `datetime`   | `Timestamp`              | RFC 3339 string (UTC)    |
| `stringable` | `Text`                   | string                   |
| `integer`    | `Integer`                | number                   |
| `float`      | `Float`                  | number                   |
| `boolean`    | `Boolean`                | bool                     |
| `json`       | `Json`                   | structured JSON          |

Every built-in cast maps `null` to `null` in both directions.
*/

use crate::value::AttributeValue;
use crate::{Result, SnapshotError};
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Transform between a live attribute value and its stored JSON form
pub trait Cast: Send + Sync + fmt::Debug {
    /// Tag under which the cast is registered
    fn name(&self) -> &str;

    /// Convert a live value into its stored form
    fn encode(&self, value: &AttributeValue) -> Result<Value>;

    /// Convert a stored value back into a live value
    fn decode(&self, raw: &Value) -> Result<AttributeValue>;
}

/// Lookup table from cast tag to [`Cast`]
#[derive(Debug, Clone)]
pub struct CastRegistry {
    casts: HashMap<String, Arc<dyn Cast>>,
}

impl CastRegistry {
    /// Create a registry without any casts
    pub fn empty() -> Self {
        Self {
            casts: HashMap::new(),
        }
    }

    /// Register a cast under its own name, replacing any previous cast with that tag
    pub fn register<C: Cast + 'static>(&mut self, cast: C) -> &mut Self {
        self.casts.insert(cast.name().to_string(), Arc::new(cast));
        self
    }

    pub fn with<C: Cast + 'static>(mut self, cast: C) -> Self {
        self.register(cast);
        self
    }

    pub fn get(&self, tag: &str) -> Result<&Arc<dyn Cast>> {
        self.casts
            .get(tag)
            .ok_or_else(|| SnapshotError::UnknownCast(tag.to_string()))
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.casts.contains_key(tag)
    }

    /// Encode a live value, using the generic rules when `tag` is `None`
    pub fn encode(&self, tag: Option<&str>, value: &AttributeValue) -> Result<Value> {
        match tag {
            Some(tag) => self.get(tag)?.encode(value),
            None => Ok(value.to_json()),
        }
    }

    /// Materialize a stored value, using the generic rules when `tag` is `None`
    pub fn decode(&self, tag: Option<&str>, raw: &Value) -> Result<AttributeValue> {
        match tag {
            Some(tag) => self.get(tag)?.decode(raw),
            None => Ok(AttributeValue::from_json(raw.clone())),
        }
    }
}

impl Default for CastRegistry {
    fn default() -> Self {
        Self::empty()
            .with(DateTimeCast)
            .with(StringableCast)
            .with(IntegerCast)
            .with(FloatCast)
            .with(BooleanCast)
            .with(JsonCast)
    }
}

/// Built-in cast a value needs when its attribute declares none
///
/// Timestamps and JSON scalars come back from the generic rules as text or
/// numbers, so they must be recorded with a tag to restore as the same type.
pub fn implied_cast(value: &AttributeValue) -> Option<&'static str> {
    match value {
        AttributeValue::Timestamp(_) => Some(DateTimeCast::TAG),
        AttributeValue::Json(_) => Some(JsonCast::TAG),
        _ => None,
    }
}

/// `datetime`: UTC timestamps stored as RFC 3339 strings
#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeCast;

impl DateTimeCast {
    pub const TAG: &'static str = "datetime";

    fn parse(&self, text: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(text)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(|e| SnapshotError::cast(Self::TAG, format!("invalid timestamp '{text}': {e}")))
    }
}

impl Cast for DateTimeCast {
    fn name(&self) -> &str {
        Self::TAG
    }

    fn encode(&self, value: &AttributeValue) -> Result<Value> {
        let ts = match value {
            AttributeValue::Null => return Ok(Value::Null),
            AttributeValue::Timestamp(ts) => *ts,
            AttributeValue::Text(text) => self.parse(text)?,
            AttributeValue::Integer(secs) => unix_seconds(*secs)?,
            other => {
                return Err(SnapshotError::cast(
                    Self::TAG,
                    format!("cannot encode {} as a timestamp", other.type_name()),
                ))
            }
        };
        Ok(Value::String(ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
    }

    fn decode(&self, raw: &Value) -> Result<AttributeValue> {
        match raw {
            Value::Null => Ok(AttributeValue::Null),
            Value::String(text) => self.parse(text).map(AttributeValue::Timestamp),
            Value::Number(n) => match n.as_i64() {
                Some(secs) => unix_seconds(secs).map(AttributeValue::Timestamp),
                None => Err(SnapshotError::cast(Self::TAG, format!("invalid unix timestamp {n}"))),
            },
            other => Err(SnapshotError::cast(
                Self::TAG,
                format!("cannot decode {other} as a timestamp"),
            )),
        }
    }
}

fn unix_seconds(secs: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single().ok_or_else(|| {
        SnapshotError::cast(DateTimeCast::TAG, format!("unix timestamp {secs} out of range"))
    })
}

/// `stringable`: a wrapped string, stored as its underlying string
#[derive(Debug, Clone, Copy, Default)]
pub struct StringableCast;

impl StringableCast {
    pub const TAG: &'static str = "stringable";
}

impl Cast for StringableCast {
    fn name(&self) -> &str {
        Self::TAG
    }

    fn encode(&self, value: &AttributeValue) -> Result<Value> {
        match value {
            AttributeValue::Null => Ok(Value::Null),
            AttributeValue::Json(_) => Err(SnapshotError::cast(
                Self::TAG,
                "cannot encode structured json as a string",
            )),
            other => Ok(Value::String(other.to_string())),
        }
    }

    fn decode(&self, raw: &Value) -> Result<AttributeValue> {
        match raw {
            Value::Null => Ok(AttributeValue::Null),
            Value::String(s) => Ok(AttributeValue::Text(s.clone())),
            Value::Bool(_) | Value::Number(_) => Ok(AttributeValue::Text(raw.to_string())),
            other => Err(SnapshotError::cast(
                Self::TAG,
                format!("cannot decode {other} as a string"),
            )),
        }
    }
}

/// `integer`: 64-bit signed integers
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegerCast;

impl IntegerCast {
    pub const TAG: &'static str = "integer";
}

impl Cast for IntegerCast {
    fn name(&self) -> &str {
        Self::TAG
    }

    fn encode(&self, value: &AttributeValue) -> Result<Value> {
        match value {
            AttributeValue::Null => Ok(Value::Null),
            AttributeValue::Integer(i) => Ok(Value::from(*i)),
            AttributeValue::Boolean(b) => Ok(Value::from(i64::from(*b))),
            AttributeValue::Text(text) => text
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|e| SnapshotError::cast(Self::TAG, format!("'{text}': {e}"))),
            other => Err(SnapshotError::cast(
                Self::TAG,
                format!("cannot encode {} as an integer", other.type_name()),
            )),
        }
    }

    fn decode(&self, raw: &Value) -> Result<AttributeValue> {
        match raw {
            Value::Null => Ok(AttributeValue::Null),
            Value::Number(n) => n
                .as_i64()
                .map(AttributeValue::Integer)
                .ok_or_else(|| SnapshotError::cast(Self::TAG, format!("{n} is not an i64"))),
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .map(AttributeValue::Integer)
                .map_err(|e| SnapshotError::cast(Self::TAG, format!("'{text}': {e}"))),
            other => Err(SnapshotError::cast(
                Self::TAG,
                format!("cannot decode {other} as an integer"),
            )),
        }
    }
}

/// `float`: 64-bit floats
#[derive(Debug, Clone, Copy, Default)]
pub struct FloatCast;

impl FloatCast {
    pub const TAG: &'static str = "float";
}

impl Cast for FloatCast {
    fn name(&self) -> &str {
        Self::TAG
    }

    fn encode(&self, value: &AttributeValue) -> Result<Value> {
        match value {
            AttributeValue::Null => Ok(Value::Null),
            AttributeValue::Float(_) => Ok(value.to_json()),
            AttributeValue::Integer(i) => Ok(AttributeValue::Float(*i as f64).to_json()),
            other => Err(SnapshotError::cast(
                Self::TAG,
                format!("cannot encode {} as a float", other.type_name()),
            )),
        }
    }

    fn decode(&self, raw: &Value) -> Result<AttributeValue> {
        match raw {
            Value::Null => Ok(AttributeValue::Null),
            Value::Number(n) => n
                .as_f64()
                .map(AttributeValue::Float)
                .ok_or_else(|| SnapshotError::cast(Self::TAG, format!("{n} is not an f64"))),
            other => Err(SnapshotError::cast(
                Self::TAG,
                format!("cannot decode {other} as a float"),
            )),
        }
    }
}

/// `boolean`: booleans, also accepting 0/1 on decode
#[derive(Debug, Clone, Copy, Default)]
pub struct BooleanCast;

impl BooleanCast {
    pub const TAG: &'static str = "boolean";
}

impl Cast for BooleanCast {
    fn name(&self) -> &str {
        Self::TAG
    }

    fn encode(&self, value: &AttributeValue) -> Result<Value> {
        match value {
            AttributeValue::Null => Ok(Value::Null),
            AttributeValue::Boolean(b) => Ok(Value::Bool(*b)),
            AttributeValue::Integer(i) => Ok(Value::Bool(*i != 0)),
            other => Err(SnapshotError::cast(
                Self::TAG,
                format!("cannot encode {} as a boolean", other.type_name()),
            )),
        }
    }

    fn decode(&self, raw: &Value) -> Result<AttributeValue> {
        match raw {
            Value::Null => Ok(AttributeValue::Null),
            Value::Bool(b) => Ok(AttributeValue::Boolean(*b)),
            Value::Number(n) => Ok(AttributeValue::Boolean(n.as_i64() != Some(0))),
            other => Err(SnapshotError::cast(
                Self::TAG,
                format!("cannot decode {other} as a boolean"),
            )),
        }
    }
}

/// `json`: structured values stored as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCast;

impl JsonCast {
    pub const TAG: &'static str = "json";
}

impl Cast for JsonCast {
    fn name(&self) -> &str {
        Self::TAG
    }

    fn encode(&self, value: &AttributeValue) -> Result<Value> {
        Ok(value.to_json())
    }

    fn decode(&self, raw: &Value) -> Result<AttributeValue> {
        Ok(match raw {
            Value::Null => AttributeValue::Null,
            other => AttributeValue::Json(other.clone()),
        })
    }
}
