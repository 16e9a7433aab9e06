//! Redacting wrapper for the model API key.

use std::fmt;

/// An API key that never shows up in `Debug` or `Display` output.
///
/// Configuration structs are logged at startup, so the key is wrapped to keep
/// it out of the logs. Call [`SecretString::expose`] only when building the
/// `Authorization` header.
///
/// # Example
///
/// ```
/// use catalyst_search::config::SecretString;
///
/// let key = SecretString::new("sk-proj-abc123");
/// assert_eq!(format!("{key:?}"), "<REDACTED>");
/// assert_eq!(key.expose(), "sk-proj-abc123");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct SecretString(String);

impl SecretString {
    /// Wrap a key.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if the key is empty or whitespace.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<REDACTED>")
    }
}

impl fmt::Display for SecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<REDACTED>")
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
    fn test_secret_redacted_in_debug_and_display() {
        let key = SecretString::new("sk-proj-secret");
        assert_eq!(format!("{key:?}"), "<REDACTED>");
        assert_eq!(format!("{key}"), "<REDACTED>");
    }

    #[test]
    fn test_secret_expose() {
        let key: SecretString = "sk-proj-secret".into();
        assert_eq!(key.expose(), "sk-proj-secret");
    }

    #[test]
    fn test_secret_is_blank() {
        assert!(SecretString::new("").is_blank());
        assert!(SecretString::new("   ").is_blank());
        assert!(!SecretString::from(String::from("k")).is_blank());
    }
}
