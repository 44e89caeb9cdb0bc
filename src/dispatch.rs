//! Operation dispatch: the primitive call sequence for every request shape
//!
//! Each combination of operation, content kind and signature mode maps to
//! exactly one arm of [`OperationDispatcher::dispatch`]. Ordering matters in
//! the binary pipelines:
//!
//! - compression runs on plaintext before encryption and after decryption,
//!   never on ciphertext;
//! - a detached signature made during encrypt-and-sign covers the bytes as
//!   they were *before* compression, so it verifies against what the
//!   recipient recovers after decompressing;
//! - a decompression failure ends the item before any verification.

use tracing::debug;

use crate::compression::{self, CompressionAlgorithm};
use crate::engine::{CryptoEngine, EngineError, Payload, SignatureCheck};
use crate::error::{ErrorCategory, ErrorKind, PgpflowError, Result};
use crate::keys::KeyMaterial;
use crate::request::{Operation, SignatureMode};

/// Input payload of one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Content<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

impl<'a> Content<'a> {
    fn payload(&self) -> Payload<'a> {
        match *self {
            Content::Text(text) => Payload::Text(text),
            Content::Binary(bytes) => Payload::Binary(bytes),
        }
    }

    fn len(&self) -> usize {
        self.payload().len()
    }

    fn kind(&self) -> &'static str {
        match self {
            Content::Text(_) => "text",
            Content::Binary(_) => "binary",
        }
    }
}

/// What to do with the content, with everything each action needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action<'a> {
    Encrypt,
    Decrypt,
    Sign,
    Verify { signature: &'a str },
    EncryptAndSign { mode: SignatureMode },
    DecryptAndVerify { check: Verification<'a> },
}

impl Action<'_> {
    pub fn operation(&self) -> Operation {
        match self {
            Action::Encrypt => Operation::Encrypt,
            Action::Decrypt => Operation::Decrypt,
            Action::Sign => Operation::Sign,
            Action::Verify { .. } => Operation::Verify,
            Action::EncryptAndSign { .. } => Operation::EncryptAndSign,
            Action::DecryptAndVerify { .. } => Operation::DecryptAndVerify,
        }
    }
}

/// How decrypt-and-verify obtains its signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification<'a> {
    /// Checked by the engine while decrypting.
    Embedded,
    /// Checked separately against the recovered plaintext.
    Detached { signature: &'a str },
}

/// Recovered plaintext, in the representation the content came in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plaintext {
    Text(String),
    Binary(Vec<u8>),
}

impl Plaintext {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Plaintext::Text(text) => text.as_bytes(),
            Plaintext::Binary(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationResult {
    Encrypted {
        envelope: String,
    },
    Signed {
        signature: String,
    },
    /// `signature` is `None` when it is embedded in `envelope`.
    EncryptedAndSigned {
        envelope: String,
        signature: Option<String>,
    },
    Decrypted {
        plaintext: Plaintext,
    },
    DecryptedAndVerified {
        plaintext: Plaintext,
        verified: bool,
    },
    Verified {
        verified: bool,
    },
}

/// Runs requests against an injected [`CryptoEngine`].
pub struct OperationDispatcher<'a, E: CryptoEngine> {
    engine: &'a E,
}

impl<'a, E: CryptoEngine> OperationDispatcher<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// Execute `action` on `content`.
    ///
    /// `compression` only applies to binary content and is ignored for text.
    pub fn dispatch(
        &self,
        keys: &KeyMaterial<E>,
        action: Action<'_>,
        content: Content<'_>,
        compression: CompressionAlgorithm,
    ) -> Result<OperationResult> {
        let compression = match content {
            Content::Binary(_) => compression,
            Content::Text(_) => CompressionAlgorithm::None,
        };
        debug!(
            operation = %action.operation(),
            content = content.kind(),
            %compression,
            len = content.len(),
            "dispatching"
        );

        match action {
            Action::Encrypt => {
                let envelope = self.encrypt(keys, content, compression, false)?;
                Ok(OperationResult::Encrypted { envelope })
            }
            Action::Sign => {
                let signature = self.sign(keys, content.payload())?;
                Ok(OperationResult::Signed { signature })
            }
            Action::Decrypt => {
                let (plaintext, _) = self.decrypt(keys, content, compression, false)?;
                Ok(OperationResult::Decrypted { plaintext })
            }
            Action::Verify { signature } => {
                let verified = self.verify(keys, content.payload(), signature);
                Ok(OperationResult::Verified { verified })
            }
            Action::EncryptAndSign {
                mode: SignatureMode::Embedded,
            } => {
                let envelope = self.encrypt(keys, content, compression, true)?;
                Ok(OperationResult::EncryptedAndSigned {
                    envelope,
                    signature: None,
                })
            }
            Action::EncryptAndSign {
                mode: SignatureMode::Detached,
            } => {
                let envelope = self.encrypt(keys, content, compression, false)?;
                // Uncompressed input: the recipient verifies after decompressing.
                let signature = self.sign(keys, content.payload())?;
                Ok(OperationResult::EncryptedAndSigned {
                    envelope,
                    signature: Some(signature),
                })
            }
            Action::DecryptAndVerify {
                check: Verification::Embedded,
            } => {
                let (plaintext, checks) = self.decrypt(keys, content, compression, true)?;
                let verified = first_is_valid(&checks);
                Ok(OperationResult::DecryptedAndVerified {
                    plaintext,
                    verified,
                })
            }
            Action::DecryptAndVerify {
                check: Verification::Detached { signature },
            } => {
                let (plaintext, _) = self.decrypt(keys, content, compression, false)?;
                let payload = match &plaintext {
                    Plaintext::Text(text) => Payload::Text(text),
                    Plaintext::Binary(bytes) => Payload::Binary(bytes),
                };
                let verified = self.verify(keys, payload, signature);
                Ok(OperationResult::DecryptedAndVerified {
                    plaintext,
                    verified,
                })
            }
        }
    }

    fn encrypt(
        &self,
        keys: &KeyMaterial<E>,
        content: Content<'_>,
        compression: CompressionAlgorithm,
        embed_signature: bool,
    ) -> Result<String> {
        let signer = embed_signature.then(|| keys.signing_key());
        let envelope = match content {
            Content::Text(text) => self
                .engine
                .encrypt(Payload::Text(text), keys.verification_key(), signer),
            Content::Binary(bytes) => {
                let compressed = compression::compress(bytes, compression)?;
                debug!(
                    before = bytes.len(),
                    after = compressed.len(),
                    "compressed payload"
                );
                self.engine
                    .encrypt(Payload::Binary(&compressed), keys.verification_key(), signer)
            }
        }
        .map_err(|e| engine_failure("failed to encrypt", e))?;
        debug!(len = envelope.len(), signed = embed_signature, "encrypted");
        Ok(envelope)
    }

    fn sign(&self, keys: &KeyMaterial<E>, payload: Payload<'_>) -> Result<String> {
        let signature = self
            .engine
            .sign_detached(payload, keys.signing_key())
            .map_err(|e| engine_failure("failed to sign", e))?;
        debug!(len = payload.len(), "signed");
        Ok(signature)
    }

    /// Decrypt, then decompress. Signature checks are only requested from
    /// the engine when `verify_embedded` is set.
    fn decrypt(
        &self,
        keys: &KeyMaterial<E>,
        content: Content<'_>,
        compression: CompressionAlgorithm,
        verify_embedded: bool,
    ) -> Result<(Plaintext, Vec<SignatureCheck>)> {
        let envelope = match content {
            Content::Text(text) => text,
            Content::Binary(bytes) => std::str::from_utf8(bytes).map_err(|e| {
                PgpflowError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::DecryptionFailed,
                    "encrypted attachment is not an armored message",
                    e,
                )
            })?,
        };
        let verifier = verify_embedded.then(|| keys.verification_key());
        let decrypted = self
            .engine
            .decrypt(envelope, keys.signing_key(), verifier)
            .map_err(|e| {
                PgpflowError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::DecryptionFailed,
                    "failed to decrypt",
                    e,
                )
            })?;
        debug!(
            len = decrypted.data.len(),
            signatures = decrypted.signatures.len(),
            "decrypted"
        );

        let plaintext = match content {
            Content::Text(_) => Plaintext::Text(String::from_utf8(decrypted.data).map_err(|e| {
                PgpflowError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::DecryptionFailed,
                    "decrypted message is not valid UTF-8 text",
                    e,
                )
            })?),
            Content::Binary(_) => {
                Plaintext::Binary(compression::decompress(&decrypted.data, compression)?)
            }
        };
        Ok((plaintext, decrypted.signatures))
    }

    /// Never fails: anything short of a valid first signature is `false`.
    fn verify(&self, keys: &KeyMaterial<E>, payload: Payload<'_>, signature: &str) -> bool {
        match self
            .engine
            .verify_detached(payload, signature, keys.verification_key())
        {
            Ok(checks) => first_is_valid(&checks),
            Err(e) => {
                debug!(error = %e, "unreadable signature");
                false
            }
        }
    }
}

fn first_is_valid(checks: &[SignatureCheck]) -> bool {
    match checks.first() {
        Some(SignatureCheck::Valid) => true,
        Some(SignatureCheck::Invalid { reason }) => {
            debug!(%reason, "signature did not verify");
            false
        }
        None => {
            debug!("no signature present");
            false
        }
    }
}

fn engine_failure(msg: &str, source: EngineError) -> PgpflowError {
    PgpflowError::with_kind_and_source(ErrorCategory::Internal, ErrorKind::EngineFailure, msg, source)
}
