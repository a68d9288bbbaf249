//! This module exports different types for JSON interactions.
//!
//! Every payload the library sends or receives passes through these helpers, so that error
//! conversion into [`crate::Error`] happens in one place.

use serde::de::{Deserialize, DeserializeOwned};
use serde::ser::Serialize;
pub use serde_json::value::RawValue;
pub use serde_json::{json, Error as JsonError};

use crate::Result;

pub type Value = serde_json::Value;
pub type JsonMap = serde_json::Map<String, Value>;

#[allow(clippy::missing_errors_doc)] // It's obvious
pub fn to_string<T>(v: &T) -> Result<String>
where
    T: Serialize + ?Sized,
{
    Ok(serde_json::to_string(v)?)
}

#[allow(clippy::missing_errors_doc)] // It's obvious
pub fn from_str<'a, T>(s: &'a str) -> Result<T>
where
    T: Deserialize<'a>,
{
    Ok(serde_json::from_str(s)?)
}

#[allow(clippy::missing_errors_doc)] // It's obvious
pub fn from_slice<'a, T>(v: &'a [u8]) -> Result<T>
where
    T: Deserialize<'a>,
{
    Ok(serde_json::from_slice(v)?)
}

pub(crate) fn from_value<T>(v: Value) -> Result<T>
where
    T: DeserializeOwned,
{
    Ok(serde_json::from_value(v)?)
}

/// Decodes the opaque `d` field of a payload into a concrete type.
pub(crate) fn from_raw<'a, T>(raw: &'a RawValue) -> Result<T>
where
    T: Deserialize<'a>,
{
    Ok(serde_json::from_str(raw.get())?)
}

/// Encodes a value into the opaque form carried by a payload's `d` field.
pub(crate) fn to_raw<T>(value: &T) -> Result<Box<RawValue>>
where
    T: Serialize + ?Sized,
{
    Ok(serde_json::value::to_raw_value(value)?)
}

#[cfg(test)]
pub(crate) fn to_value<T>(value: T) -> Result<Value>
where
    T: Serialize,
{
    Ok(serde_json::to_value(value)?)
}

#[cfg(test)]
#[track_caller]
pub(crate) fn assert_json<T>(data: &T, json: Value)
where
    T: Serialize + for<'de> Deserialize<'de> + PartialEq + std::fmt::Debug,
{
    // test serialization
    let serialized = to_value(data).unwrap();
    assert!(
        serialized == json,
        "data->JSON serialization failed\nexpected: {json:?}\n     got: {serialized:?}"
    );

    // test deserialization
    let deserialized = from_value::<T>(json).unwrap();
    assert!(
        &deserialized == data,
        "JSON->data deserialization failed\nexpected: {data:?}\n     got: {deserialized:?}"
    );
}
