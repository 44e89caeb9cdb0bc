//! Key material for one invocation context

use std::fmt;

use tracing::debug;

use crate::credentials::Credentials;
use crate::engine::CryptoEngine;
use crate::error::{ErrorCategory, ErrorKind, KeyRole, PgpflowError, Result};

/// Loaded, ready-to-use key handles.
///
/// Built once per invocation from armored key text and never mutated
/// afterwards. The private handle is always in its unlocked form.
pub struct KeyMaterial<E: CryptoEngine> {
    private_key: E::PrivateKey,
    public_key: E::PublicKey,
}

impl<E: CryptoEngine> KeyMaterial<E> {
    /// Parse both keys and unlock the private key with `passphrase`.
    ///
    /// Without a passphrase the private key must be stored unprotected; a
    /// protected key is rejected here rather than on first use. Each side
    /// fails with its own [`ErrorKind::KeyInvalid`] role so callers can tell
    /// which key is broken.
    pub fn load(
        engine: &E,
        armored_private_key: &str,
        armored_public_key: &str,
        passphrase: Option<&str>,
    ) -> Result<Self> {
        let private_key = engine
            .read_private_key(armored_private_key.trim())
            .map_err(|e| key_error(KeyRole::Private, "failed to read private key", e))?;

        let private_key = match passphrase {
            Some(passphrase) => engine
                .decrypt_key(private_key, passphrase)
                .map_err(|e| key_error(KeyRole::Private, "failed to unlock private key", e))?,
            None => private_key,
        };
        if engine.is_locked(&private_key) {
            return Err(PgpflowError::with_kind(
                ErrorCategory::User,
                ErrorKind::KeyInvalid(KeyRole::Private),
                "private key is passphrase protected but no passphrase was given",
            ));
        }

        let public_key = engine
            .read_public_key(armored_public_key.trim())
            .map_err(|e| key_error(KeyRole::Public, "failed to read public key", e))?;

        debug!(had_passphrase = passphrase.is_some(), "loaded key material");
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Load from credentials supplied by a [`crate::credentials::CredentialSource`].
    pub fn from_credentials(engine: &E, credentials: &Credentials) -> Result<Self> {
        Self::load(
            engine,
            credentials.private_key(),
            credentials.public_key(),
            credentials.passphrase(),
        )
    }

    /// Key used to sign and to decrypt.
    pub fn signing_key(&self) -> &E::PrivateKey {
        &self.private_key
    }

    /// Key used to verify and to encrypt.
    pub fn verification_key(&self) -> &E::PublicKey {
        &self.public_key
    }
}

impl<E: CryptoEngine> fmt::Debug for KeyMaterial<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial").finish_non_exhaustive()
    }
}

fn key_error(role: KeyRole, msg: &str, source: crate::engine::EngineError) -> PgpflowError {
    PgpflowError::with_kind_and_source(
        ErrorCategory::User,
        ErrorKind::KeyInvalid(role),
        msg,
        source,
    )
}
