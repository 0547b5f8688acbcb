// Per-client credential storage.
//
// A token survives reconnects and transient failures; it is only replaced
// by a successful pairing or dropped by an explicit re-auth.

use std::sync::RwLock;

use reqwest::header::HeaderValue;
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;
use crate::transport::secret_header;

/// The access token (or app key) of one vendor client.
#[derive(Default)]
pub struct TokenSlot {
    token: RwLock<Option<SecretString>>,
}

impl TokenSlot {
    pub fn new(token: Option<SecretString>) -> Self {
        Self {
            token: RwLock::new(token),
        }
    }

    pub fn set(&self, token: SecretString) {
        *self.write() = Some(token);
    }

    /// Forget the token ahead of a fresh pairing.
    pub fn clear(&self) {
        *self.write() = None;
    }

    pub fn get(&self) -> Option<SecretString> {
        self.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.read().is_some()
    }

    /// The token, or [`Error::NotPaired`].
    pub fn require(&self) -> Result<SecretString, Error> {
        self.get().ok_or(Error::NotPaired)
    }

    /// `Authorization: Bearer <token>` value.
    pub fn bearer(&self) -> Result<HeaderValue, Error> {
        let token = self.require()?;
        secret_header(&format!("Bearer {}", token.expose_secret()))
    }

    /// Raw token as a header value (Hue `hue-application-key`).
    pub fn raw_header(&self) -> Result<HeaderValue, Error> {
        let token = self.require()?;
        secret_header(token.expose_secret())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<SecretString>> {
        self.token
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<SecretString>> {
        self.token
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl std::fmt::Debug for TokenSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSlot")
            .field("set", &self.is_set())
            .finish()
    }
}
