// src/utils/serialization.rs
//! Serialization utilities for protocol messages.
//!
//! Provides serde adapters for:
//! - Big integers (nonce, context, client nonce) as decimal strings
//! - Binary payloads (proof material, signatures) as base64

use num_bigint::BigUint;
use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

/// Serde adapter writing a `BigUint` as a decimal string.
pub mod biguint_decimal {
    use super::*;

    pub fn serialize<S: Serializer>(value: &BigUint, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_str_radix(10))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigUint, D::Error> {
        let s = String::deserialize(deserializer)?;
        BigUint::parse_bytes(s.as_bytes(), 10)
            .ok_or_else(|| D::Error::custom(format!("invalid decimal integer: {}", s)))
    }
}

/// Same as [`biguint_decimal`] for optional values.
pub mod option_biguint_decimal {
    use super::*;

    pub fn serialize<S: Serializer>(
        value: &Option<BigUint>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_some(&v.to_str_radix(10)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<BigUint>, D::Error> {
        let s: Option<String> = Option::deserialize(deserializer)?;
        s.map(|s| {
            BigUint::parse_bytes(s.as_bytes(), 10)
                .ok_or_else(|| D::Error::custom(format!("invalid decimal integer: {}", s)))
        })
        .transpose()
    }
}

/// Serde adapter writing bytes as standard base64.
pub mod base64_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::encode(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        base64::decode(&s).map_err(|e| D::Error::custom(format!("Base64 decoding failed: {}", e)))
    }
}
