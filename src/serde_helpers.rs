//! Serde helpers for flexible deserialization.
//!
//! When the `tracing` feature is enabled, this module also logs warnings for any
//! unknown fields encountered while deserializing REST responses.

#[cfg(feature = "http")]
use {serde::de::DeserializeOwned, serde_json::Value};

/// A `serde_as` type that deserializes a `u64` from either a JSON integer or a numeric string.
///
/// The streaming API sends `PriceRateID` as a number on regular ticks and as a string on
/// heartbeat ticks. Use with `#[serde_as(as = "U64FromAny")]`.
pub struct U64FromAny;

impl<'de> serde_with::DeserializeAs<'de, u64> for U64FromAny {
    fn deserialize_as<D>(deserializer: D) -> std::result::Result<u64, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use std::fmt;

        use serde::de::{self, Visitor};

        struct U64Visitor;

        impl Visitor<'_> for U64Visitor {
            type Value = u64;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("unsigned integer or numeric string")
            }

            fn visit_u64<E>(self, v: u64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(v)
            }

            fn visit_i64<E>(self, v: i64) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                u64::try_from(v).map_err(|_e| E::invalid_value(de::Unexpected::Signed(v), &self))
            }

            fn visit_str<E>(self, v: &str) -> std::result::Result<Self::Value, E>
            where
                E: de::Error,
            {
                v.trim()
                    .parse()
                    .map_err(|_e| E::invalid_value(de::Unexpected::Str(v), &self))
            }
        }

        deserializer.deserialize_any(U64Visitor)
    }
}

impl serde_with::SerializeAs<u64> for U64FromAny {
    fn serialize_as<S>(source: &u64, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(*source)
    }
}

/// Deserialize a REST response, logging fields the target type does not capture.
///
/// Unknown fields never fail deserialization; on failure the offending path is logged.
#[cfg(all(feature = "tracing", feature = "http"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    use std::any::type_name;

    let json = value.to_string();
    let mut unknown_paths: Vec<String> = Vec::new();

    let result: T = serde_ignored::deserialize(value, |path| {
        unknown_paths.push(path.to_string());
    })
    .inspect_err(|_| {
        let de = &mut serde_json::Deserializer::from_str(&json);
        if let Err(e) = serde_path_to_error::deserialize::<_, T>(de) {
            tracing::error!(
                type_name = %type_name::<T>(),
                path = %e.path(),
                error = %e.inner(),
                "deserialization failed"
            );
        }
    })?;

    for path in unknown_paths {
        tracing::warn!(
            type_name = %type_name::<T>(),
            field = %path,
            "unknown field in API response"
        );
    }

    Ok(result)
}

/// Pass-through deserialization when tracing is disabled.
#[cfg(all(not(feature = "tracing"), feature = "http"))]
pub fn deserialize_with_warnings<T: DeserializeOwned>(value: Value) -> crate::Result<T> {
    Ok(serde_json::from_value(value)?)
}
