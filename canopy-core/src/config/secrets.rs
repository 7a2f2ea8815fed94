//! Credential wrapper that never prints its value

use serde::{Deserialize, Serialize};
use std::fmt;

/// A wrapper type for sensitive strings like API keys
#[derive(Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SecretString {
    value: String,
}

impl SecretString {
    /// Create a new secret string
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// Get the actual value (use with caution)
    pub fn expose_secret(&self) -> &str {
        &self.value
    }

    /// Check if the secret is empty
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Get a partially redacted version for diagnostics
    pub fn partial_redact(&self) -> String {
        if self.value.is_empty() {
            return "[EMPTY]".to_string();
        }

        let len = self.value.len();
        if len <= 8 || !self.value.is_ascii() {
            "[REDACTED]".to_string()
        } else if self.value.starts_with("sk-") {
            format!("{}...{}", &self.value[..3], &self.value[len - 4..])
        } else {
            format!("{}...{}", &self.value[..2], &self.value[len - 2..])
        }
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl PartialEq for SecretString {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_string_redaction() {
        let secret = SecretString::new("sk-1234567890abcdef");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(secret.partial_redact(), "sk-...cdef");
    }

    #[test]
    fn test_short_and_empty_secrets() {
        assert_eq!(SecretString::new("abc").partial_redact(), "[REDACTED]");
        assert_eq!(SecretString::new("").partial_redact(), "[EMPTY]");
        assert_eq!(SecretString::new("ant-api-key-xyz").partial_redact(), "an...yz");
    }

    #[test]
    fn test_secret_string_expose() {
        let secret = SecretString::new("my-secret-value");
        assert_eq!(secret.expose_secret(), "my-secret-value");
    }

    #[test]
    fn test_serializes_transparently() {
        let secret: SecretString = serde_json::from_str("\"sk-live\"").unwrap();
        assert_eq!(secret.expose_secret(), "sk-live");
    }
}
