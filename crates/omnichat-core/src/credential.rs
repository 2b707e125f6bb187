use std::fmt;

use crate::error::{ChatError, Result};

/// Environment variable holding the default key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Substring every OpenAI secret key carries.
pub const KEY_MARKER: &str = "sk-";

/// A key that passed the pre-flight check. Only emptiness and the marker
/// are checked; anything else wrong with it shows up at the network call.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(ChatError::MissingCredential);
        }
        if !raw.contains(KEY_MARKER) {
            return Err(ChatError::MalformedCredential);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// The default key from the environment, or an empty string.
pub fn env_api_key() -> String {
    std::env::var(API_KEY_ENV).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_is_missing() {
        assert!(matches!(ApiKey::parse(""), Err(ChatError::MissingCredential)));
    }

    #[test]
    fn test_key_without_marker_is_malformed() {
        assert!(matches!(
            ApiKey::parse("not-a-key"),
            Err(ChatError::MalformedCredential)
        ));
    }

    #[test]
    fn test_marker_anywhere_is_accepted() {
        assert!(ApiKey::parse("sk-proj-abc123").is_ok());
        assert!(ApiKey::parse("prefix sk-abc").is_ok());
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = ApiKey::parse("sk-secret").unwrap();
        assert_eq!(format!("{:?}", key), "ApiKey(***)");
        assert_eq!(key.expose(), "sk-secret");
    }
}
