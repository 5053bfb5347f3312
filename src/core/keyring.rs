//! API key lookup: explicit option, then the system keyring, then environment.

use crate::core::logger::Logger;
use thiserror::Error;

pub const KEYRING_SERVICE: &str = "confab";

/// Failures when attempting to access the system keyring.
///
/// Unavailable errors mean the credential backend itself could not be reached
/// (for example a locked keychain); they are reported but never fatal.
#[derive(Debug, Error)]
pub enum KeyringAccessError {
    #[error("keyring unavailable: {0}")]
    Unavailable(keyring::Error),
    #[error("keyring lookup failed: {0}")]
    Failed(keyring::Error),
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Unavailable(err)
            }
            other => KeyringAccessError::Failed(other),
        }
    }
}

/// The key stored for `provider` under [`KEYRING_SERVICE`], if any.
pub fn stored_api_key(provider: &str) -> Result<Option<String>, KeyringAccessError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, provider)?;
    match entry.get_password() {
        Ok(token) => Ok(Some(token)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Resolve the key to use for `provider`. Keyring failures are logged and
/// treated as a missing entry.
pub fn resolve_api_key<F>(
    explicit: Option<&str>,
    provider: &str,
    env: Option<String>,
    lookup: F,
    logger: &Logger,
) -> Option<String>
where
    F: FnOnce(&str) -> Result<Option<String>, KeyringAccessError>,
{
    if let Some(key) = explicit.map(str::trim).filter(|k| !k.is_empty()) {
        return Some(key.to_string());
    }
    match lookup(provider) {
        Ok(Some(key)) => {
            logger.dbg(format!("Using the keyring entry for '{provider}'"));
            return Some(key);
        }
        Ok(None) => {}
        Err(err) => logger.warn(err),
    }
    env.filter(|k| !k.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn none(_: &str) -> Result<Option<String>, KeyringAccessError> {
        Ok(None)
    }

    #[test]
    fn explicit_key_wins() {
        let key = resolve_api_key(
            Some(" sk-opt \n"),
            "openai",
            Some("sk-env".into()),
            |_| Ok(Some("sk-ring".into())),
            &Logger::default(),
        );
        assert_eq!(key.as_deref(), Some("sk-opt"));
    }

    #[test]
    fn keyring_comes_before_environment() {
        let key = resolve_api_key(
            None,
            "openai",
            Some("sk-env".into()),
            |provider| Ok(Some(format!("sk-{provider}"))),
            &Logger::default(),
        );
        assert_eq!(key.as_deref(), Some("sk-openai"));
    }

    #[test]
    fn keyring_failures_fall_back_to_environment() {
        let key = resolve_api_key(
            Some(""),
            "openai",
            Some("sk-env".into()),
            |_| Err(keyring::Error::NoStorageAccess("locked".into()).into()),
            &Logger::default(),
        );
        assert_eq!(key.as_deref(), Some("sk-env"));
        assert_eq!(
            resolve_api_key(None, "openai", None, none, &Logger::default()),
            None
        );
    }
}
