//! Deterministic engine double for tests
//!
//! Produces OpenPGP-style armor around JSON bodies. "Signatures" are a keyed
//! FNV-1a digest, which is enough to tell keys and payloads apart but is of
//! course not cryptography.

use std::sync::Mutex;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use super::{CryptoEngine, Decrypted, EngineError, Payload, SignatureCheck};

const MESSAGE: &str = "PGP MESSAGE";
const SIGNATURE: &str = "PGP SIGNATURE";
const PRIVATE_KEY: &str = "PGP PRIVATE KEY BLOCK";
const PUBLIC_KEY: &str = "PGP PUBLIC KEY BLOCK";

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FakePrivateKey {
    pub id: String,
    passphrase: Option<String>,
    pub unlocked: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FakePublicKey {
    pub id: String,
}

/// One recorded engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub op: &'static str,
    pub payload: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct FakeEngine {
    calls: Mutex<Vec<Call>>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    to: String,
    binary: bool,
    data: String,
    #[serde(default)]
    signer: Option<String>,
    #[serde(default)]
    tag: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct DetachedSignature {
    signer: String,
    binary: bool,
    tag: String,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Armored (private, public) key texts for `id`.
    pub fn keypair(id: &str, passphrase: Option<&str>) -> (String, String) {
        let private = match passphrase {
            Some(pw) => format!("secret:{id}:{pw}"),
            None => format!("secret:{id}"),
        };
        (
            armor(PRIVATE_KEY, private.as_bytes()),
            armor(PUBLIC_KEY, format!("public:{id}").as_bytes()),
        )
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn ops(&self) -> Vec<&'static str> {
        self.calls().into_iter().map(|c| c.op).collect()
    }

    fn record(&self, op: &'static str, payload: &[u8]) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Call {
                op,
                payload: payload.to_vec(),
            });
        }
    }
}

/// Armor `body` the way OpenPGP does: header, blank line, base64 in 64
/// column lines, footer.
pub(crate) fn armor(label: &str, body: &[u8]) -> String {
    let encoded = STANDARD.encode(body);
    let mut out = format!("-----BEGIN {label}-----\n\n");
    for chunk in encoded.as_bytes().chunks(64) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

fn dearmor(label: &str, text: &str) -> Result<Vec<u8>, EngineError> {
    let text = text.trim();
    let header = format!("-----BEGIN {label}-----");
    let footer = format!("-----END {label}-----");
    let inner = text
        .strip_prefix(&header)
        .and_then(|rest| rest.strip_suffix(&footer))
        .ok_or_else(|| EngineError::new(format!("misformed armored text, expected {label}")))?;
    let joined: String = inner.split_whitespace().collect();
    STANDARD
        .decode(joined)
        .map_err(|e| EngineError::with_source("armor body is not base64", e))
}

fn mac(key_id: &str, binary: bool, data: &[u8]) -> String {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    let mode = if binary { b"b" } else { b"t" };
    for byte in key_id.as_bytes().iter().chain(mode).chain(data) {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    format!("{hash:016x}")
}

fn is_binary(payload: &Payload<'_>) -> bool {
    matches!(payload, Payload::Binary(_))
}

fn require_unlocked(key: &FakePrivateKey) -> Result<(), EngineError> {
    if key.unlocked {
        Ok(())
    } else {
        Err(EngineError::new("private key is not decrypted"))
    }
}

impl CryptoEngine for FakeEngine {
    type PrivateKey = FakePrivateKey;
    type PublicKey = FakePublicKey;

    fn read_private_key(&self, armored: &str) -> Result<FakePrivateKey, EngineError> {
        self.record("read_private_key", &[]);
        let body = dearmor(PRIVATE_KEY, armored)?;
        let body = String::from_utf8(body).map_err(|e| EngineError::with_source("bad key", e))?;
        let mut parts = body.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("secret"), Some(id), passphrase) if !id.is_empty() => Ok(FakePrivateKey {
                id: id.to_string(),
                passphrase: passphrase.map(str::to_string),
                unlocked: passphrase.is_none(),
            }),
            _ => Err(EngineError::new("not a private key")),
        }
    }

    fn decrypt_key(
        &self,
        mut key: FakePrivateKey,
        passphrase: &str,
    ) -> Result<FakePrivateKey, EngineError> {
        self.record("decrypt_key", &[]);
        match &key.passphrase {
            Some(expected) if expected != passphrase => {
                Err(EngineError::new("incorrect key passphrase"))
            }
            _ => {
                key.unlocked = true;
                Ok(key)
            }
        }
    }

    fn is_locked(&self, key: &FakePrivateKey) -> bool {
        !key.unlocked
    }

    fn read_public_key(&self, armored: &str) -> Result<FakePublicKey, EngineError> {
        self.record("read_public_key", &[]);
        let body = dearmor(PUBLIC_KEY, armored)?;
        match std::str::from_utf8(&body).ok().and_then(|b| b.strip_prefix("public:")) {
            Some(id) if !id.is_empty() => Ok(FakePublicKey { id: id.to_string() }),
            _ => Err(EngineError::new("not a public key")),
        }
    }

    fn encrypt(
        &self,
        payload: Payload<'_>,
        recipient: &FakePublicKey,
        signer: Option<&FakePrivateKey>,
    ) -> Result<String, EngineError> {
        self.record(
            if signer.is_some() { "encrypt_signed" } else { "encrypt" },
            payload.as_bytes(),
        );
        let binary = is_binary(&payload);
        let (signer_id, tag) = match signer {
            Some(key) => {
                require_unlocked(key)?;
                (
                    Some(key.id.clone()),
                    Some(mac(&key.id, binary, payload.as_bytes())),
                )
            }
            None => (None, None),
        };
        let envelope = Envelope {
            to: recipient.id.clone(),
            binary,
            data: STANDARD.encode(payload.as_bytes()),
            signer: signer_id,
            tag,
        };
        let body = serde_json::to_vec(&envelope)
            .map_err(|e| EngineError::with_source("serialize envelope", e))?;
        Ok(armor(MESSAGE, &body))
    }

    fn decrypt(
        &self,
        envelope: &str,
        key: &FakePrivateKey,
        verifier: Option<&FakePublicKey>,
    ) -> Result<Decrypted, EngineError> {
        self.record(
            if verifier.is_some() { "decrypt_verify" } else { "decrypt" },
            envelope.as_bytes(),
        );
        let body = dearmor(MESSAGE, envelope)?;
        let envelope: Envelope = serde_json::from_slice(&body)
            .map_err(|e| EngineError::with_source("not an encrypted message", e))?;
        require_unlocked(key)?;
        if envelope.to != key.id {
            return Err(EngineError::new("session key decryption failed"));
        }
        let data = STANDARD
            .decode(&envelope.data)
            .map_err(|e| EngineError::with_source("corrupt literal data", e))?;

        let signatures = match (verifier, &envelope.signer, &envelope.tag) {
            (Some(verifier), Some(signer), Some(tag)) => {
                if *signer == verifier.id && *tag == mac(&verifier.id, envelope.binary, &data) {
                    vec![SignatureCheck::Valid]
                } else {
                    vec![SignatureCheck::invalid("could not find signing key")]
                }
            }
            _ => Vec::new(),
        };
        Ok(Decrypted { data, signatures })
    }

    fn sign_detached(
        &self,
        payload: Payload<'_>,
        key: &FakePrivateKey,
    ) -> Result<String, EngineError> {
        self.record("sign", payload.as_bytes());
        require_unlocked(key)?;
        let binary = is_binary(&payload);
        let signature = DetachedSignature {
            signer: key.id.clone(),
            binary,
            tag: mac(&key.id, binary, payload.as_bytes()),
        };
        let body = serde_json::to_vec(&signature)
            .map_err(|e| EngineError::with_source("serialize signature", e))?;
        Ok(armor(SIGNATURE, &body))
    }

    fn verify_detached(
        &self,
        payload: Payload<'_>,
        signature: &str,
        key: &FakePublicKey,
    ) -> Result<Vec<SignatureCheck>, EngineError> {
        self.record("verify", payload.as_bytes());
        let body = dearmor(SIGNATURE, signature)?;
        let signature: DetachedSignature = serde_json::from_slice(&body)
            .map_err(|e| EngineError::with_source("not a signature", e))?;
        if signature.signer != key.id {
            return Ok(vec![SignatureCheck::invalid("could not find signing key")]);
        }
        if signature.tag != mac(&key.id, signature.binary, payload.as_bytes()) {
            return Ok(vec![SignatureCheck::invalid("signed digest did not match")]);
        }
        Ok(vec![SignatureCheck::Valid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypair_parses() {
        let engine = FakeEngine::new();
        let (private, public) = FakeEngine::keypair("alice", Some("pw"));

        let key = engine.read_private_key(&private).unwrap();
        assert_eq!(key.id, "alice");
        assert!(engine.is_locked(&key));
        assert!(engine.decrypt_key(key.clone(), "nope").is_err());
        assert!(!engine.is_locked(&engine.decrypt_key(key, "pw").unwrap()));

        assert_eq!(engine.read_public_key(&public).unwrap().id, "alice");
        assert!(engine.read_public_key(&private).is_err());
    }

    #[test]
    fn test_armor_shape() {
        let armored = armor(MESSAGE, &[0u8; 100]);
        assert!(armored.starts_with("-----BEGIN PGP MESSAGE-----\n\n"));
        assert!(armored.lines().all(|l| l.len() <= 64 || l.starts_with("-----")));
        assert_eq!(dearmor(MESSAGE, &armored).unwrap(), vec![0u8; 100]);
    }
}
