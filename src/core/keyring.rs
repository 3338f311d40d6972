//! API key storage in the platform keyring, with environment overrides.

use std::error::Error;
use std::fmt;

use tracing::debug;

use crate::core::constants::{API_KEY_ENV_VARS, KEYRING_ACCOUNT, KEYRING_SERVICE};

/// Describes failures when attempting to access the system keyring.
///
/// Recoverable errors indicate that the credential backend was
/// temporarily unavailable (for example when the keychain service is
/// locked or inaccessible). Permanent errors surface the underlying
/// cause directly so callers can report them to the user.
#[derive(Debug)]
pub enum KeyringAccessError {
    Recoverable(keyring::Error),
    Permanent(keyring::Error),
}

impl KeyringAccessError {
    fn inner(&self) -> &keyring::Error {
        match self {
            KeyringAccessError::Recoverable(err) | KeyringAccessError::Permanent(err) => err,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self, KeyringAccessError::Recoverable(_))
    }
}

impl From<keyring::Error> for KeyringAccessError {
    fn from(err: keyring::Error) -> Self {
        match err {
            keyring::Error::PlatformFailure(_) | keyring::Error::NoStorageAccess(_) => {
                KeyringAccessError::Recoverable(err)
            }
            other => KeyringAccessError::Permanent(other),
        }
    }
}

impl fmt::Display for KeyringAccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner())
    }
}

impl Error for KeyringAccessError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.inner())
    }
}

/// Where a resolved key came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Env(&'static str),
    Keyring,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    pub key: String,
    pub source: KeySource,
}

fn entry() -> Result<keyring::Entry, KeyringAccessError> {
    Ok(keyring::Entry::new(KEYRING_SERVICE, KEYRING_ACCOUNT)?)
}

pub fn store_api_key(key: &str) -> Result<(), KeyringAccessError> {
    entry()?.set_password(key)?;
    Ok(())
}

pub fn load_api_key() -> Result<Option<String>, KeyringAccessError> {
    match entry()?.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Returns false when nothing was stored.
pub fn delete_api_key() -> Result<bool, KeyringAccessError> {
    match entry()?.delete_credential() {
        Ok(()) => Ok(true),
        Err(keyring::Error::NoEntry) => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Environment variables first, then the keyring.
pub fn resolve_api_key() -> Result<Option<ResolvedKey>, KeyringAccessError> {
    resolve_with(|name| std::env::var(name).ok(), load_api_key)
}

fn resolve_with<E, K>(env: E, keyring: K) -> Result<Option<ResolvedKey>, KeyringAccessError>
where
    E: Fn(&str) -> Option<String>,
    K: FnOnce() -> Result<Option<String>, KeyringAccessError>,
{
    for name in API_KEY_ENV_VARS {
        if let Some(value) = env(name) {
            let value = value.trim();
            if !value.is_empty() {
                debug!(var = name, "api key taken from environment");
                return Ok(Some(ResolvedKey {
                    key: value.to_string(),
                    source: KeySource::Env(name),
                }));
            }
        }
    }

    Ok(keyring()?
        .filter(|key| !key.trim().is_empty())
        .map(|key| ResolvedKey {
            key,
            source: KeySource::Keyring,
        }))
}
