//! Authentication module
//!
//! Resolves the library API key from the places a user may keep it.
//! The key is opaque: it is only checked for being non-empty and is sent
//! as HTTP Basic credentials (`api_key:`) on the init and finalize calls.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Environment variables checked for an API key, in order
pub const API_KEY_ENV_VARS: &[&str] = &["BF_API_KEY", "API_KEY"];

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("No API key. Use --api-key, --api-key-file, or set BF_API_KEY.")]
    MissingAuth,

    #[error("API key is empty")]
    EmptyKey,
}

/// Library API key
///
/// `Debug` and `Display` never print the key itself.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Create a key from a raw value, trimming surrounding whitespace
    pub fn new(raw: impl AsRef<str>) -> Result<Self, AuthError> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(AuthError::EmptyKey);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The raw key, for building request credentials
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Resolve the key from the first source that yields a non-empty value
    pub fn resolve(sources: &CredentialSources) -> Result<Self, AuthError> {
        if let Some(key) = sources.explicit.as_deref().and_then(|v| Self::new(v).ok()) {
            tracing::debug!(source = "flag", "Using API key");
            return Ok(key);
        }

        if let Some(path) = &sources.key_file {
            match std::fs::read_to_string(path) {
                Ok(content) => {
                    let first = content.lines().map(str::trim).find(|l| !l.is_empty());
                    if let Some(key) = first.and_then(|v| Self::new(v).ok()) {
                        tracing::debug!(source = "file", path = %path.display(), "Using API key");
                        return Ok(key);
                    }
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Cannot read API key file");
                }
            }
        }

        for var in API_KEY_ENV_VARS {
            if let Some(key) = std::env::var(var).ok().and_then(|v| Self::new(v).ok()) {
                tracing::debug!(source = "env", var = %var, "Using API key");
                return Ok(key);
            }
        }

        if let Some(key) = sources.config.as_deref().and_then(|v| Self::new(v).ok()) {
            tracing::debug!(source = "config", "Using API key");
            return Ok(key);
        }

        Err(AuthError::MissingAuth)
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

impl fmt::Display for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Places an API key may come from
#[derive(Debug, Clone, Default)]
pub struct CredentialSources {
    /// Value passed on the command line
    pub explicit: Option<String>,
    /// File whose first non-empty line is the key
    pub key_file: Option<PathBuf>,
    /// Value from the configuration file
    pub config: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        for var in API_KEY_ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(ApiKey::new("   "), Err(AuthError::EmptyKey)));
        assert_eq!(ApiKey::new(" abc \n").unwrap().expose(), "abc");
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = ApiKey::new("super-secret").unwrap();
        assert!(!format!("{:?}", key).contains("super-secret"));
        assert!(!key.to_string().contains("super-secret"));
    }

    #[test]
    #[serial]
    fn test_explicit_wins() {
        std::env::set_var("BF_API_KEY", "from-env");
        let sources = CredentialSources {
            explicit: Some("from-flag".into()),
            ..Default::default()
        };
        assert_eq!(ApiKey::resolve(&sources).unwrap().expose(), "from-flag");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_file_before_env() {
        std::env::set_var("BF_API_KEY", "from-env");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "\n  from-file  \nsecond-line").unwrap();

        let sources = CredentialSources {
            key_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert_eq!(ApiKey::resolve(&sources).unwrap().expose(), "from-file");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_fallback_order() {
        clear_env();
        std::env::set_var("API_KEY", "generic");
        let sources = CredentialSources {
            key_file: Some("/nonexistent/key".into()),
            config: Some("from-config".into()),
            ..Default::default()
        };
        assert_eq!(ApiKey::resolve(&sources).unwrap().expose(), "generic");

        std::env::set_var("BF_API_KEY", "specific");
        assert_eq!(ApiKey::resolve(&sources).unwrap().expose(), "specific");
        clear_env();
    }

    #[test]
    #[serial]
    fn test_config_fallback_and_missing() {
        clear_env();
        let sources = CredentialSources {
            config: Some("from-config".into()),
            ..Default::default()
        };
        assert_eq!(ApiKey::resolve(&sources).unwrap().expose(), "from-config");

        let result = ApiKey::resolve(&CredentialSources::default());
        assert!(matches!(result, Err(AuthError::MissingAuth)));
    }
}
