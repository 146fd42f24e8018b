//! Secret wrapper for API keys with automatic memory zeroization.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::Zeroizing;

/// A string that zeroizes its backing memory on drop.
///
/// Used for feed API keys. `Debug` and `Display` are redacted so a
/// config dump or log line can never leak the value; the only way out
/// is an explicit [`SecretString::expose_secret`] call.
#[derive(Clone)]
pub struct SecretString(Zeroizing<String>);

impl SecretString {
    pub fn new(s: String) -> Self {
        Self(Zeroizing::new(s))
    }

    /// Exposes the secret for use, e.g. as a header value. Avoid copying
    /// the returned slice; copies are not zeroized.
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for SecretString {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for SecretString {
    fn from(s: &str) -> Self {
        Self::new(s.to_string())
    }
}

impl Default for SecretString {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretString([REDACTED])")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl Serialize for SecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for SecretString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(SecretString::new(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expose_secret() {
        let secret = SecretString::new("my-api-key".to_string());
        assert_eq!(secret.expose_secret(), "my-api-key");
        assert_eq!(secret.len(), 10);
        assert!(!secret.is_empty());
    }

    #[test]
    fn test_debug_and_display_redacted() {
        let secret = SecretString::from("super-secret");
        assert!(!format!("{:?}", secret).contains("super-secret"));
        assert!(!format!("{}", secret).contains("super-secret"));
        assert!(format!("{:?}", secret).contains("REDACTED"));
    }

    #[test]
    fn test_serde_round_trip() {
        let original = SecretString::from("serializable");
        let serialized = serde_json::to_string(&original).unwrap();
        assert!(serialized.contains("serializable"));

        let back: SecretString = serde_json::from_str(&serialized).unwrap();
        assert_eq!(back.expose_secret(), "serializable");
    }

    #[test]
    fn test_default_is_empty() {
        assert!(SecretString::default().is_empty());
    }
}
