//! Secure string handling with redacted display and serialization.
//!
//! Provides `RedactedString` for storing passphrases while preventing
//! accidental exposure in logs, debug output, batch reports or serialized
//! job files.

use bon::Builder;
use derive_more::From;
use getset::Getters;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::result;
use validator::Validate;
use zeroize::Zeroize;

/// Placeholder text shown instead of the actual passphrase
pub static REDACTED_PASSPHRASE: &str = "###REDACTED_PASSPHRASE###";

/// A string that is redacted in debug output and serialization and zeroed
/// on drop.
#[derive(Validate, Clone, Zeroize, From, Builder, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RedactedString {
    #[validate(length(min = 8))]
    #[builder(into)]
    inner: String,
}

impl From<&str> for RedactedString {
    fn from(value: &str) -> Self {
        RedactedString::builder().inner(value).build()
    }
}

impl Debug for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", REDACTED_PASSPHRASE)
    }
}

impl Serialize for RedactedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED_PASSPHRASE)
    }
}

impl<'de> Deserialize<'de> for RedactedString {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(RedactedStringVisitor)
    }
}

impl Drop for RedactedString {
    fn drop(&mut self) {
        self.zeroize();
    }
}

struct RedactedStringVisitor;

impl Visitor<'_> for RedactedStringVisitor {
    type Value = RedactedString;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a string")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        Ok(RedactedString::from(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_string_validation() {
        assert!(RedactedString::from("valid_password").validate().is_ok());
        assert!(RedactedString::from("short").validate().is_err());
    }

    #[test]
    fn test_redacted_string_debug_and_serialize() {
        let redacted = RedactedString::from("secret_password");
        assert_eq!(format!("{:?}", redacted), REDACTED_PASSPHRASE);
        assert_eq!(
            serde_json::to_string(&redacted).unwrap(),
            format!("\"{}\"", REDACTED_PASSPHRASE)
        );
    }

    #[test]
    fn test_redacted_string_deserialize_keeps_secret() {
        let redacted: RedactedString = serde_json::from_str("\"actual_password_123\"").unwrap();
        assert_eq!(redacted.inner(), "actual_password_123");
    }
}
