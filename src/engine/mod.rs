//! Boundary to the OpenPGP primitive engine
//!
//! Orchestration code never touches cryptography directly; it calls a
//! [`CryptoEngine`] that is injected by the caller. The `rpgp` feature
//! provides a real implementation on top of the `pgp` crate.

use std::error::Error as StdError;

use thiserror::Error;

#[cfg(test)]
pub(crate) mod fake;
#[cfg(feature = "rpgp")]
pub mod rpgp;

#[cfg(feature = "rpgp")]
pub use self::rpgp::RpgpEngine;

/// Data handed to the engine for encryption, signing, or verification.
///
/// The variant selects between text and binary literal data on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

impl<'a> Payload<'a> {
    pub fn as_bytes(&self) -> &'a [u8] {
        match *self {
            Payload::Text(text) => text.as_bytes(),
            Payload::Binary(bytes) => bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }
}

/// Outcome of checking one signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureCheck {
    Valid,
    Invalid { reason: String },
}

impl SignatureCheck {
    pub fn invalid(reason: impl Into<String>) -> Self {
        SignatureCheck::Invalid {
            reason: reason.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, SignatureCheck::Valid)
    }
}

/// Result of [`CryptoEngine::decrypt`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decrypted {
    pub data: Vec<u8>,
    /// One entry per signature found in the envelope. Empty when no
    /// verification key was supplied or the envelope carries no signature.
    pub signatures: Vec<SignatureCheck>,
}

/// Error reported by an engine primitive.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Narrow interface to the OpenPGP primitives.
///
/// Key handles are opaque to callers. A private key handle returned by
/// [`decrypt_key`](CryptoEngine::decrypt_key) is unlocked; one returned by
/// [`read_private_key`](CryptoEngine::read_private_key) is only usable if the
/// key was stored without protection, which [`is_locked`](CryptoEngine::is_locked)
/// reports.
pub trait CryptoEngine: Send + Sync {
    type PrivateKey: Send + Sync;
    type PublicKey: Send + Sync;

    fn read_private_key(&self, armored: &str) -> Result<Self::PrivateKey, EngineError>;

    fn decrypt_key(
        &self,
        key: Self::PrivateKey,
        passphrase: &str,
    ) -> Result<Self::PrivateKey, EngineError>;

    /// True while any secret part of `key` is still passphrase protected.
    fn is_locked(&self, key: &Self::PrivateKey) -> bool;

    fn read_public_key(&self, armored: &str) -> Result<Self::PublicKey, EngineError>;

    /// Encrypt to `recipient`, optionally signing inside the envelope.
    /// Returns the armored envelope.
    fn encrypt(
        &self,
        payload: Payload<'_>,
        recipient: &Self::PublicKey,
        signer: Option<&Self::PrivateKey>,
    ) -> Result<String, EngineError>;

    /// Decrypt an armored envelope. When `verifier` is given, every
    /// signature inside the envelope is checked against it.
    fn decrypt(
        &self,
        envelope: &str,
        key: &Self::PrivateKey,
        verifier: Option<&Self::PublicKey>,
    ) -> Result<Decrypted, EngineError>;

    /// Produce an armored detached signature over `payload`.
    fn sign_detached(
        &self,
        payload: Payload<'_>,
        key: &Self::PrivateKey,
    ) -> Result<String, EngineError>;

    /// Check an armored detached signature. An error means the signature
    /// could not be read at all.
    fn verify_detached(
        &self,
        payload: Payload<'_>,
        signature: &str,
        key: &Self::PublicKey,
    ) -> Result<Vec<SignatureCheck>, EngineError>;
}
