//! Structured payload serialization.
//!
//! The transcoder converts a domain event's payload (a tree of scalars,
//! sequences and string-keyed maps) to a UTF-8 JSON document and back.
//! Values the wire format cannot carry natively travel as two-field adapter
//! wrappers `{"_type_": tag, "_data_": representation}`; the transcoder keeps
//! a registry of [`Transcoding`] adapters keyed by tag and validates every
//! wrapper it meets on both paths.
//!
//! The [`with`] module provides serde adapters that produce and consume the
//! wrappers for the built-in tags (UUIDs, ISO-8601 timestamps, fixed-point
//! decimals, byte strings), so event types opt in per field:
//!
//! ```ignore
//! #[derive(Serialize, Deserialize)]
//! struct PriceQuoted {
//!     #[serde(with = "chronicle_core::transcoder::with::decimal_str")]
//!     price: rust_decimal::Decimal,
//! }
//! ```
//!
//! Tuples are not a first-class wire type: they serialize as JSON arrays and
//! decode as sequences.

use std::{collections::HashMap, str::FromStr, sync::Arc};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Reserved wrapper key naming the adapter tag.
pub const TYPE_KEY: &str = "_type_";
/// Reserved wrapper key carrying the adapter representation.
pub const DATA_KEY: &str = "_data_";

/// Error raised while encoding a payload tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    /// A subvalue's type has no registered adapter or built-in mapping.
    #[error("value of unsupported type: {0}")]
    UnsupportedType(String),
    /// A user map used `_type_`/`_data_` outside an adapter wrapper.
    #[error("reserved field name `{0}` used outside an adapter wrapper")]
    ReservedField(String),
}

/// Error raised while decoding a serialized payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodingError {
    /// The document was not valid UTF-8 JSON, or a wrapper was malformed.
    #[error("malformed document: {0}")]
    Malformed(String),
    /// A wrapper named a tag with no registered adapter.
    #[error("unknown adapter tag `{0}`")]
    UnknownTag(String),
}

/// A registered adapter already claimed the tag.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("adapter tag `{0}` is already registered")]
pub struct DuplicateTagError(pub String);

/// A type adapter: validates and normalises the wire representation carried
/// by wrappers tagged with [`Self::name`].
///
/// Adapters see only the `_data_` half of a wrapper. The representation must
/// itself be composed of encodable values; nested wrappers inside it are
/// walked by the transcoder after `encode_data` returns.
pub trait Transcoding: Send + Sync {
    /// The unique tag this adapter claims.
    fn name(&self) -> &'static str;

    /// Validate and normalise outgoing wrapper data.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::UnsupportedType`] when the data cannot be
    /// carried under this tag.
    fn encode_data(&self, data: Value) -> Result<Value, EncodingError>;

    /// Validate incoming wrapper data.
    ///
    /// # Errors
    ///
    /// Returns [`DecodingError::Malformed`] when the data is not a valid
    /// representation for this tag.
    fn decode_data(&self, data: Value) -> Result<Value, DecodingError>;
}

/// JSON transcoder with a tag-keyed adapter registry.
///
/// [`JsonTranscoder::default`] registers the built-in adapters
/// ([`UuidAsHex`], [`DateTimeAsIso`], [`DecimalAsStr`], [`BytesAsBase64`]).
/// Calendar dates and user value objects take user-supplied adapters.
#[derive(Clone)]
pub struct JsonTranscoder {
    transcodings: HashMap<&'static str, Arc<dyn Transcoding>>,
}

impl Default for JsonTranscoder {
    fn default() -> Self {
        let mut transcoder = Self::empty();
        transcoder
            .register(UuidAsHex)
            .expect("built-in tags are distinct");
        transcoder
            .register(DateTimeAsIso)
            .expect("built-in tags are distinct");
        transcoder
            .register(DecimalAsStr)
            .expect("built-in tags are distinct");
        transcoder
            .register(BytesAsBase64)
            .expect("built-in tags are distinct");
        transcoder
    }
}

impl JsonTranscoder {
    /// A transcoder with no adapters registered.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            transcodings: HashMap::new(),
        }
    }

    /// Register an adapter.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateTagError`] if the tag is already claimed.
    pub fn register<T>(&mut self, transcoding: T) -> Result<(), DuplicateTagError>
    where
        T: Transcoding + 'static,
    {
        let name = transcoding.name();
        if self.transcodings.contains_key(name) {
            return Err(DuplicateTagError(name.to_string()));
        }
        self.transcodings.insert(name, Arc::new(transcoding));
        Ok(())
    }

    /// Serialize a payload tree to bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EncodingError::UnsupportedType`] if any subvalue lacks a
    /// registered adapter or built-in mapping, or
    /// [`EncodingError::ReservedField`] if a user map uses the reserved
    /// wrapper keys.
    pub fn encode(&self, value: Value) -> Result<Vec<u8>, EncodingError> {
        let normalised = self.encode_value(value)?;
        serde_json::to_vec(&normalised)
            .map_err(|error| EncodingError::UnsupportedType(error.to_string()))
    }

    /// Deserialize a payload tree from bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodingError::Malformed`] for invalid documents and
    /// [`DecodingError::UnknownTag`] for wrappers naming unregistered tags.
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, DecodingError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|error| DecodingError::Malformed(error.to_string()))?;
        self.decode_value(value)
    }

    fn encode_value(&self, value: Value) -> Result<Value, EncodingError> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.encode_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                if map.contains_key(TYPE_KEY) || map.contains_key(DATA_KEY) {
                    let (tag, data) = split_wrapper(map)
                        .map_err(|key| EncodingError::ReservedField(key.to_string()))?;
                    let Some(transcoding) = self.transcodings.get(tag.as_str()) else {
                        return Err(EncodingError::UnsupportedType(format!(
                            "no adapter registered for tag `{tag}`"
                        )));
                    };
                    let data = transcoding.encode_data(data)?;
                    let data = self.encode_value(data)?;
                    Ok(wrap(&tag, data))
                } else {
                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (key, item) in map {
                        out.insert(key, self.encode_value(item)?);
                    }
                    Ok(Value::Object(out))
                }
            }
            scalar => Ok(scalar),
        }
    }

    fn decode_value(&self, value: Value) -> Result<Value, DecodingError> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.decode_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                if map.contains_key(TYPE_KEY) || map.contains_key(DATA_KEY) {
                    let (tag, data) = split_wrapper(map).map_err(|key| {
                        DecodingError::Malformed(format!(
                            "reserved key `{key}` in a non-wrapper object"
                        ))
                    })?;
                    let Some(transcoding) = self.transcodings.get(tag.as_str()) else {
                        return Err(DecodingError::UnknownTag(tag));
                    };
                    let data = self.decode_value(data)?;
                    let data = transcoding.decode_data(data)?;
                    Ok(wrap(&tag, data))
                } else {
                    let mut out = serde_json::Map::with_capacity(map.len());
                    for (key, item) in map {
                        out.insert(key, self.decode_value(item)?);
                    }
                    Ok(Value::Object(out))
                }
            }
            scalar => Ok(scalar),
        }
    }
}

/// Build an adapter wrapper value.
#[must_use]
pub fn wrap(tag: &str, data: Value) -> Value {
    let mut map = serde_json::Map::with_capacity(2);
    map.insert(TYPE_KEY.to_string(), Value::String(tag.to_string()));
    map.insert(DATA_KEY.to_string(), data);
    Value::Object(map)
}

/// Tear a wrapper apart, or report the offending reserved key when the
/// object is not exactly `{_type_: string, _data_: _}`.
fn split_wrapper(mut map: serde_json::Map<String, Value>) -> Result<(String, Value), &'static str> {
    let tag = match map.remove(TYPE_KEY) {
        Some(Value::String(tag)) => tag,
        Some(_) | None => return Err(TYPE_KEY),
    };
    let Some(data) = map.remove(DATA_KEY) else {
        return Err(DATA_KEY);
    };
    if !map.is_empty() {
        return Err(TYPE_KEY);
    }
    Ok((tag, data))
}

fn expect_str(data: &Value, tag: &str) -> Result<String, DecodingError> {
    data.as_str().map(ToOwned::to_owned).ok_or_else(|| {
        DecodingError::Malformed(format!("tag `{tag}` expects a string representation"))
    })
}

/// 128-bit UUIDs as 32-character lowercase hex strings.
pub struct UuidAsHex;

impl UuidAsHex {
    /// The tag this adapter claims.
    pub const NAME: &'static str = "uuid_hex";
}

impl Transcoding for UuidAsHex {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn encode_data(&self, data: Value) -> Result<Value, EncodingError> {
        let text = data
            .as_str()
            .ok_or_else(|| EncodingError::UnsupportedType("uuid_hex expects a string".into()))?;
        let uuid = Uuid::try_parse(text)
            .map_err(|error| EncodingError::UnsupportedType(format!("invalid UUID: {error}")))?;
        Ok(Value::String(uuid.simple().to_string()))
    }

    fn decode_data(&self, data: Value) -> Result<Value, DecodingError> {
        let text = expect_str(&data, Self::NAME)?;
        let uuid = Uuid::try_parse(&text)
            .map_err(|error| DecodingError::Malformed(format!("invalid UUID: {error}")))?;
        Ok(Value::String(uuid.simple().to_string()))
    }
}

/// ISO-8601 timestamps with microsecond precision, always UTC.
pub struct DateTimeAsIso;

impl DateTimeAsIso {
    /// The tag this adapter claims.
    pub const NAME: &'static str = "datetime_iso";
}

impl Transcoding for DateTimeAsIso {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn encode_data(&self, data: Value) -> Result<Value, EncodingError> {
        let text = data.as_str().ok_or_else(|| {
            EncodingError::UnsupportedType("datetime_iso expects a string".into())
        })?;
        let instant = DateTime::parse_from_rfc3339(text).map_err(|error| {
            EncodingError::UnsupportedType(format!("invalid timestamp: {error}"))
        })?;
        Ok(Value::String(format_iso(instant.with_timezone(&Utc))))
    }

    fn decode_data(&self, data: Value) -> Result<Value, DecodingError> {
        let text = expect_str(&data, Self::NAME)?;
        let instant = DateTime::parse_from_rfc3339(&text)
            .map_err(|error| DecodingError::Malformed(format!("invalid timestamp: {error}")))?;
        Ok(Value::String(format_iso(instant.with_timezone(&Utc))))
    }
}

fn format_iso(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Fixed-point decimals as their canonical string form.
pub struct DecimalAsStr;

impl DecimalAsStr {
    /// The tag this adapter claims.
    pub const NAME: &'static str = "decimal_str";
}

impl Transcoding for DecimalAsStr {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn encode_data(&self, data: Value) -> Result<Value, EncodingError> {
        let text = data
            .as_str()
            .ok_or_else(|| EncodingError::UnsupportedType("decimal_str expects a string".into()))?;
        let decimal = Decimal::from_str(text)
            .map_err(|error| EncodingError::UnsupportedType(format!("invalid decimal: {error}")))?;
        Ok(Value::String(decimal.to_string()))
    }

    fn decode_data(&self, data: Value) -> Result<Value, DecodingError> {
        let text = expect_str(&data, Self::NAME)?;
        let decimal = Decimal::from_str(&text)
            .map_err(|error| DecodingError::Malformed(format!("invalid decimal: {error}")))?;
        Ok(Value::String(decimal.to_string()))
    }
}

/// Byte strings as standard base64.
pub struct BytesAsBase64;

impl BytesAsBase64 {
    /// The tag this adapter claims.
    pub const NAME: &'static str = "bytes_b64";
}

impl Transcoding for BytesAsBase64 {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn encode_data(&self, data: Value) -> Result<Value, EncodingError> {
        let text = data
            .as_str()
            .ok_or_else(|| EncodingError::UnsupportedType("bytes_b64 expects a string".into()))?;
        BASE64
            .decode(text)
            .map_err(|error| EncodingError::UnsupportedType(format!("invalid base64: {error}")))?;
        Ok(Value::String(text.to_string()))
    }

    fn decode_data(&self, data: Value) -> Result<Value, DecodingError> {
        let text = expect_str(&data, Self::NAME)?;
        BASE64
            .decode(&text)
            .map_err(|error| DecodingError::Malformed(format!("invalid base64: {error}")))?;
        Ok(Value::String(text))
    }
}

/// Serde adapters emitting and consuming the built-in wrappers.
pub mod with {
    /// UUID fields as `{"_type_": "uuid_hex", "_data_": "<hex>"}`.
    pub mod uuid_hex {
        use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
        use uuid::Uuid;

        use crate::transcoder::UuidAsHex;

        #[derive(Serialize)]
        struct Wire<'a> {
            #[serde(rename = "_type_")]
            tag: &'a str,
            #[serde(rename = "_data_")]
            data: String,
        }

        #[derive(Deserialize)]
        struct Parsed {
            #[serde(rename = "_type_")]
            tag: String,
            #[serde(rename = "_data_")]
            data: String,
        }

        /// Serialize a [`Uuid`] as its adapter wrapper.
        ///
        /// # Errors
        ///
        /// Propagates serializer errors.
        pub fn serialize<S: Serializer>(value: &Uuid, serializer: S) -> Result<S::Ok, S::Error> {
            Wire {
                tag: UuidAsHex::NAME,
                data: value.simple().to_string(),
            }
            .serialize(serializer)
        }

        /// Deserialize a [`Uuid`] from its adapter wrapper.
        ///
        /// # Errors
        ///
        /// Fails on a wrong tag or unparsable representation.
        pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Uuid, D::Error> {
            let parsed = Parsed::deserialize(deserializer)?;
            if parsed.tag != UuidAsHex::NAME {
                return Err(D::Error::custom(format!(
                    "expected tag `{}`, got `{}`",
                    UuidAsHex::NAME,
                    parsed.tag
                )));
            }
            Uuid::try_parse(&parsed.data).map_err(D::Error::custom)
        }
    }

    /// Timestamp fields as `{"_type_": "datetime_iso", "_data_": "<iso>"}`.
    pub mod datetime_iso {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

        use crate::transcoder::{DateTimeAsIso, format_iso};

        #[derive(Serialize)]
        struct Wire<'a> {
            #[serde(rename = "_type_")]
            tag: &'a str,
            #[serde(rename = "_data_")]
            data: String,
        }

        #[derive(Deserialize)]
        struct Parsed {
            #[serde(rename = "_type_")]
            tag: String,
            #[serde(rename = "_data_")]
            data: String,
        }

        /// Serialize a timestamp as its adapter wrapper.
        ///
        /// # Errors
        ///
        /// Propagates serializer errors.
        pub fn serialize<S: Serializer>(
            value: &DateTime<Utc>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            Wire {
                tag: DateTimeAsIso::NAME,
                data: format_iso(*value),
            }
            .serialize(serializer)
        }

        /// Deserialize a timestamp from its adapter wrapper.
        ///
        /// # Errors
        ///
        /// Fails on a wrong tag or unparsable representation.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<DateTime<Utc>, D::Error> {
            let parsed = Parsed::deserialize(deserializer)?;
            if parsed.tag != DateTimeAsIso::NAME {
                return Err(D::Error::custom(format!(
                    "expected tag `{}`, got `{}`",
                    DateTimeAsIso::NAME,
                    parsed.tag
                )));
            }
            DateTime::parse_from_rfc3339(&parsed.data)
                .map(|instant| instant.with_timezone(&Utc))
                .map_err(D::Error::custom)
        }
    }

    /// Decimal fields as `{"_type_": "decimal_str", "_data_": "<digits>"}`.
    pub mod decimal_str {
        use std::str::FromStr;

        use rust_decimal::Decimal;
        use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

        use crate::transcoder::DecimalAsStr;

        #[derive(Serialize)]
        struct Wire<'a> {
            #[serde(rename = "_type_")]
            tag: &'a str,
            #[serde(rename = "_data_")]
            data: String,
        }

        #[derive(Deserialize)]
        struct Parsed {
            #[serde(rename = "_type_")]
            tag: String,
            #[serde(rename = "_data_")]
            data: String,
        }

        /// Serialize a [`Decimal`] as its adapter wrapper.
        ///
        /// # Errors
        ///
        /// Propagates serializer errors.
        pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
            Wire {
                tag: DecimalAsStr::NAME,
                data: value.to_string(),
            }
            .serialize(serializer)
        }

        /// Deserialize a [`Decimal`] from its adapter wrapper.
        ///
        /// # Errors
        ///
        /// Fails on a wrong tag or unparsable representation.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Decimal, D::Error> {
            let parsed = Parsed::deserialize(deserializer)?;
            if parsed.tag != DecimalAsStr::NAME {
                return Err(D::Error::custom(format!(
                    "expected tag `{}`, got `{}`",
                    DecimalAsStr::NAME,
                    parsed.tag
                )));
            }
            Decimal::from_str(&parsed.data).map_err(D::Error::custom)
        }
    }

    /// Byte-string fields as `{"_type_": "bytes_b64", "_data_": "<base64>"}`.
    pub mod bytes_b64 {
        use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
        use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};

        use crate::transcoder::BytesAsBase64;

        #[derive(Serialize)]
        struct Wire<'a> {
            #[serde(rename = "_type_")]
            tag: &'a str,
            #[serde(rename = "_data_")]
            data: String,
        }

        #[derive(Deserialize)]
        struct Parsed {
            #[serde(rename = "_type_")]
            tag: String,
            #[serde(rename = "_data_")]
            data: String,
        }

        /// Serialize bytes as their adapter wrapper.
        ///
        /// # Errors
        ///
        /// Propagates serializer errors.
        pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
            Wire {
                tag: BytesAsBase64::NAME,
                data: BASE64.encode(value),
            }
            .serialize(serializer)
        }

        /// Deserialize bytes from their adapter wrapper.
        ///
        /// # Errors
        ///
        /// Fails on a wrong tag or invalid base64.
        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Vec<u8>, D::Error> {
            let parsed = Parsed::deserialize(deserializer)?;
            if parsed.tag != BytesAsBase64::NAME {
                return Err(D::Error::custom(format!(
                    "expected tag `{}`, got `{}`",
                    BytesAsBase64::NAME,
                    parsed.tag
                )));
            }
            BASE64.decode(&parsed.data).map_err(D::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn plain_scalars_round_trip() {
        let transcoder = JsonTranscoder::default();
        let value = json!({
            "flag": true,
            "count": 42,
            "ratio": 0.5,
            "name": "widget",
            "tags": ["a", "b"],
            "nothing": null,
        });
        let bytes = transcoder.encode(value.clone()).unwrap();
        assert_eq!(transcoder.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn uuid_wrapper_is_normalised_to_simple_hex() {
        let transcoder = JsonTranscoder::default();
        let value = json!({
            "id": {"_type_": "uuid_hex", "_data_": "b2723fe2-c01a-40d2-875e-a3aac6a09ff5"},
        });
        let bytes = transcoder.encode(value).unwrap();
        let decoded = transcoder.decode(&bytes).unwrap();
        assert_eq!(
            decoded["id"][DATA_KEY],
            json!("b2723fe2c01a40d2875ea3aac6a09ff5")
        );
    }

    #[test]
    fn unknown_tag_fails_encode_and_decode() {
        let transcoder = JsonTranscoder::default();
        let value = json!({"when": {"_type_": "date_iso", "_data_": "2024-02-29"}});

        let err = transcoder.encode(value).unwrap_err();
        assert!(matches!(err, EncodingError::UnsupportedType(_)));

        let err = transcoder
            .decode(br#"{"when": {"_type_": "date_iso", "_data_": "2024-02-29"}}"#)
            .unwrap_err();
        assert_eq!(err, DecodingError::UnknownTag("date_iso".to_string()));
    }

    #[test]
    fn reserved_key_outside_wrapper_is_rejected() {
        let transcoder = JsonTranscoder::default();
        let value = json!({"_type_": "uuid_hex", "_data_": "00000000000000000000000000000000", "extra": 1});
        let err = transcoder.encode(value).unwrap_err();
        assert!(matches!(err, EncodingError::ReservedField(_)));

        let value = json!({"_data_": "stray"});
        let err = transcoder.encode(value).unwrap_err();
        assert_eq!(err, EncodingError::ReservedField(TYPE_KEY.to_string()));
    }

    #[test]
    fn malformed_document_is_rejected() {
        let transcoder = JsonTranscoder::default();
        let err = transcoder.decode(b"not json").unwrap_err();
        assert!(matches!(err, DecodingError::Malformed(_)));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut transcoder = JsonTranscoder::default();
        let err = transcoder.register(UuidAsHex).unwrap_err();
        assert_eq!(err, DuplicateTagError("uuid_hex".to_string()));
    }

    #[test]
    fn wrappers_nest_inside_sequences() {
        let transcoder = JsonTranscoder::default();
        let value = json!({
            "amounts": [
                {"_type_": "decimal_str", "_data_": "9.99"},
                {"_type_": "decimal_str", "_data_": "0.010"},
            ],
        });
        let bytes = transcoder.encode(value).unwrap();
        let decoded = transcoder.decode(&bytes).unwrap();
        assert_eq!(decoded["amounts"][0][DATA_KEY], json!("9.99"));
        assert_eq!(decoded["amounts"][1][DATA_KEY], json!("0.010"));
    }

    #[test]
    fn datetime_wrapper_validates_and_round_trips() {
        let transcoder = JsonTranscoder::default();
        let value = json!({"at": {"_type_": "datetime_iso", "_data_": "2024-06-01T12:30:00+02:00"}});
        let bytes = transcoder.encode(value).unwrap();
        let decoded = transcoder.decode(&bytes).unwrap();
        assert_eq!(
            decoded["at"][DATA_KEY],
            json!("2024-06-01T10:30:00.000000Z")
        );

        let bad = json!({"at": {"_type_": "datetime_iso", "_data_": "yesterday"}});
        assert!(transcoder.encode(bad).is_err());
    }

    #[test]
    fn bytes_wrapper_validates_base64() {
        let transcoder = JsonTranscoder::default();
        let err = transcoder
            .decode(br#"{"_type_": "bytes_b64", "_data_": "!!!"}"#)
            .unwrap_err();
        assert!(matches!(err, DecodingError::Malformed(_)));
    }

    #[test]
    fn serde_with_modules_produce_wrappers() {
        use serde::{Deserialize, Serialize};

        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Payload {
            #[serde(with = "with::uuid_hex")]
            id: Uuid,
            #[serde(with = "with::decimal_str")]
            amount: Decimal,
            #[serde(with = "with::bytes_b64")]
            blob: Vec<u8>,
        }

        let payload = Payload {
            id: Uuid::new_v4(),
            amount: Decimal::from_str("12.34").unwrap(),
            blob: vec![1, 2, 3],
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["id"][TYPE_KEY], json!("uuid_hex"));
        assert_eq!(value["amount"][TYPE_KEY], json!("decimal_str"));
        assert_eq!(value["blob"][TYPE_KEY], json!("bytes_b64"));

        let transcoder = JsonTranscoder::default();
        let bytes = transcoder.encode(value).unwrap();
        let decoded = transcoder.decode(&bytes).unwrap();
        let rebuilt: Payload = serde_json::from_value(decoded).unwrap();
        assert_eq!(rebuilt, payload);
    }
}
