//! [`CryptoEngine`] backed by rPGP
//!
//! Unlocking a private key strips the passphrase protection from the primary
//! key and every subkey, so the handle holds plain secret material (zeroized
//! by rPGP on drop) and no passphrase.

use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::types::{PublicKeyTrait, SecretKeyTrait};
use pgp::{
    Deserializable, Message, SignedPublicKey, SignedPublicSubKey, SignedSecretKey,
    StandaloneSignature,
};
use rand::thread_rng;

use super::{CryptoEngine, Decrypted, EngineError, Payload, SignatureCheck};

const HASH: HashAlgorithm = HashAlgorithm::SHA2_256;
const CIPHER: SymmetricKeyAlgorithm = SymmetricKeyAlgorithm::AES256;

/// Parsed transferable secret key.
pub struct RpgpPrivateKey {
    key: SignedSecretKey,
}

impl RpgpPrivateKey {
    /// Password callback for rPGP primitives. Unlocked material ignores it.
    fn password() -> impl FnOnce() -> String + Clone {
        String::new
    }

    fn is_locked(&self) -> bool {
        self.key.primary_key.secret_params().is_encrypted()
            || self
                .key
                .secret_subkeys
                .iter()
                .any(|sub| sub.key.secret_params().is_encrypted())
    }
}

pub struct RpgpPublicKey {
    key: SignedPublicKey,
}

impl RpgpPublicKey {
    fn encryption_subkey(&self) -> Option<&SignedPublicSubKey> {
        self.key
            .public_subkeys
            .iter()
            .find(|sub| sub.is_encryption_key())
    }

    /// Collapse a primary key check and, failing that, per-subkey checks.
    fn check_any<F>(&self, primary: pgp::errors::Result<()>, subkey: F) -> SignatureCheck
    where
        F: Fn(&SignedPublicSubKey) -> pgp::errors::Result<()>,
    {
        let mut last = match primary {
            Ok(()) => return SignatureCheck::Valid,
            Err(e) => e.to_string(),
        };
        for sub in &self.key.public_subkeys {
            match subkey(sub) {
                Ok(()) => return SignatureCheck::Valid,
                Err(e) => last = e.to_string(),
            }
        }
        SignatureCheck::invalid(last)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RpgpEngine;

impl RpgpEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Text goes out as binary literal data too: rPGP rewrites line endings of
/// text-mode literals to CRLF, and the text must come back byte for byte.
fn literal(payload: Payload<'_>) -> Message {
    Message::new_literal_bytes("", payload.as_bytes())
}

/// Text-mode literal data from other implementations carries CRLF line
/// endings on the wire; hand it back with LF.
fn literal_content(message: &Message) -> Result<Vec<u8>, EngineError> {
    if let Some(literal) = message.get_literal() {
        if !literal.is_binary() {
            return Ok(crlf_to_lf(literal.data()));
        }
    }
    message
        .get_content()
        .map_err(engine_err("failed to read literal data"))?
        .ok_or_else(|| EngineError::new("message carries no literal data"))
}

fn crlf_to_lf(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut iter = data.iter().peekable();
    while let Some(&byte) = iter.next() {
        if byte == b'\r' && iter.peek() == Some(&&b'\n') {
            continue;
        }
        out.push(byte);
    }
    out
}

fn engine_err(context: &'static str) -> impl FnOnce(pgp::errors::Error) -> EngineError {
    move |e| EngineError::with_source(format!("{context}: {e}"), e)
}

impl CryptoEngine for RpgpEngine {
    type PrivateKey = RpgpPrivateKey;
    type PublicKey = RpgpPublicKey;

    fn read_private_key(&self, armored: &str) -> Result<RpgpPrivateKey, EngineError> {
        let (key, _headers) =
            SignedSecretKey::from_string(armored).map_err(engine_err("misformed private key"))?;
        key.verify().map_err(engine_err("private key self-signature invalid"))?;
        Ok(RpgpPrivateKey { key })
    }

    fn decrypt_key(
        &self,
        mut key: RpgpPrivateKey,
        passphrase: &str,
    ) -> Result<RpgpPrivateKey, EngineError> {
        key.key
            .primary_key
            .remove_password(|| passphrase.to_owned())
            .map_err(engine_err("failed to unlock primary key"))?;
        for sub in &mut key.key.secret_subkeys {
            sub.key
                .remove_password(|| passphrase.to_owned())
                .map_err(engine_err("failed to unlock subkey"))?;
        }
        Ok(key)
    }

    fn is_locked(&self, key: &RpgpPrivateKey) -> bool {
        key.is_locked()
    }

    fn read_public_key(&self, armored: &str) -> Result<RpgpPublicKey, EngineError> {
        let (key, _headers) =
            SignedPublicKey::from_string(armored).map_err(engine_err("misformed public key"))?;
        key.verify().map_err(engine_err("public key self-signature invalid"))?;
        Ok(RpgpPublicKey { key })
    }

    fn encrypt(
        &self,
        payload: Payload<'_>,
        recipient: &RpgpPublicKey,
        signer: Option<&RpgpPrivateKey>,
    ) -> Result<String, EngineError> {
        let mut rng = thread_rng();
        let mut message = literal(payload);
        if let Some(signer) = signer {
            message = message
                .sign(&mut rng, &signer.key, RpgpPrivateKey::password(), HASH)
                .map_err(engine_err("failed to sign message"))?;
        }
        let encrypted = match recipient.encryption_subkey() {
            Some(sub) => message.encrypt_to_keys_seipdv1(&mut rng, CIPHER, &[sub]),
            None => message.encrypt_to_keys_seipdv1(&mut rng, CIPHER, &[&recipient.key]),
        }
        .map_err(engine_err("failed to encrypt message"))?;
        encrypted
            .to_armored_string(None.into())
            .map_err(engine_err("failed to armor message"))
    }

    fn decrypt(
        &self,
        envelope: &str,
        key: &RpgpPrivateKey,
        verifier: Option<&RpgpPublicKey>,
    ) -> Result<Decrypted, EngineError> {
        let (message, _headers) =
            Message::from_string(envelope).map_err(engine_err("misformed message"))?;
        let (mut message, _key_ids) = message
            .decrypt(RpgpPrivateKey::password(), &[&key.key])
            .map_err(engine_err("failed to decrypt message"))?;
        if let Message::Compressed(_) = message {
            message = message
                .decompress()
                .map_err(engine_err("failed to decompress message"))?;
        }

        let signatures = match verifier {
            Some(verifier) if matches!(message, Message::Signed { .. }) => {
                vec![verifier.check_any(message.verify(&verifier.key), |sub| message.verify(sub))]
            }
            _ => Vec::new(),
        };

        let data = literal_content(&message)?;
        Ok(Decrypted { data, signatures })
    }

    fn sign_detached(
        &self,
        payload: Payload<'_>,
        key: &RpgpPrivateKey,
    ) -> Result<String, EngineError> {
        let mut rng = thread_rng();
        let signed = literal(payload)
            .sign(&mut rng, &key.key, RpgpPrivateKey::password(), HASH)
            .map_err(engine_err("failed to sign payload"))?;
        match signed {
            Message::Signed { signature, .. } => StandaloneSignature::new(signature)
                .to_armored_string(None.into())
                .map_err(engine_err("failed to armor signature")),
            _ => Err(EngineError::new("signing produced no signature packet")),
        }
    }

    fn verify_detached(
        &self,
        payload: Payload<'_>,
        signature: &str,
        key: &RpgpPublicKey,
    ) -> Result<Vec<SignatureCheck>, EngineError> {
        let (signature, _headers) =
            StandaloneSignature::from_string(signature).map_err(engine_err("misformed signature"))?;
        let data = payload.as_bytes();
        Ok(vec![key.check_any(
            signature.verify(&key.key, data),
            |sub| signature.verify(sub, data),
        )])
    }
}
