//! Operation requests and signature mode resolution
//!
//! The batch document carries loosely typed parameters ([`RequestParams`]).
//! [`OperationRequest::resolve`] turns them into a fully typed request,
//! rejecting unknown names up front so the dispatcher only ever sees
//! combinations it knows how to run.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::compression::CompressionAlgorithm;
use crate::error::{ErrorCategory, ErrorKind, PgpflowError, Result};

/// Attachment consulted for binary input when none is named.
pub const DEFAULT_BINARY_PROPERTY: &str = "data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Encrypt,
    Decrypt,
    Sign,
    Verify,
    EncryptAndSign,
    DecryptAndVerify,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Encrypt => "encrypt",
            Operation::Decrypt => "decrypt",
            Operation::Sign => "sign",
            Operation::Verify => "verify",
            Operation::EncryptAndSign => "encrypt-and-sign",
            Operation::DecryptAndVerify => "decrypt-and-verify",
        }
    }

    /// Whether this operation both (en|de)crypts and signs/verifies.
    pub fn is_combined(&self) -> bool {
        matches!(self, Operation::EncryptAndSign | Operation::DecryptAndVerify)
    }

    /// Whether this operation consumes a signature.
    pub fn verifies(&self) -> bool {
        matches!(self, Operation::Verify | Operation::DecryptAndVerify)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = PgpflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "encrypt" => Ok(Operation::Encrypt),
            "decrypt" => Ok(Operation::Decrypt),
            "sign" => Ok(Operation::Sign),
            "verify" => Ok(Operation::Verify),
            "encrypt-and-sign" | "encryptAndSign" => Ok(Operation::EncryptAndSign),
            "decrypt-and-verify" | "decryptAndVerify" => Ok(Operation::DecryptAndVerify),
            other => Err(invalid_request(format!("unknown operation: {other:?}"))),
        }
    }
}

/// Which representation of the payload an item uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentKind {
    #[default]
    Text,
    Binary,
}

impl FromStr for ContentKind {
    type Err = PgpflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "text" => Ok(ContentKind::Text),
            "binary" => Ok(ContentKind::Binary),
            other => Err(invalid_request(format!("unknown content kind: {other:?}"))),
        }
    }
}

/// Where the signature of a combined operation lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureMode {
    /// Separate signature artifact next to the envelope.
    #[default]
    Detached,
    /// Signature carried inside the envelope and checked during decryption.
    Embedded,
}

impl FromStr for SignatureMode {
    type Err = PgpflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "detached" => Ok(SignatureMode::Detached),
            "embedded" => Ok(SignatureMode::Embedded),
            other => Err(invalid_request(format!("unknown signature mode: {other:?}"))),
        }
    }
}

/// Request parameters exactly as they appear in a batch document.
///
/// Everything is optional so that a per-item block can override only the
/// fields it names; see [`RequestParams::overridden_by`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_property: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature_property: Option<String>,
}

impl RequestParams {
    /// Field-wise merge where every field set in `item` wins.
    pub fn overridden_by(&self, item: &RequestParams) -> RequestParams {
        fn pick(base: &Option<String>, over: &Option<String>) -> Option<String> {
            over.clone().or_else(|| base.clone())
        }
        RequestParams {
            operation: pick(&self.operation, &item.operation),
            content: pick(&self.content, &item.content),
            message: pick(&self.message, &item.message),
            binary_property: pick(&self.binary_property, &item.binary_property),
            compression: pick(&self.compression, &item.compression),
            signature_mode: pick(&self.signature_mode, &item.signature_mode),
            signature: pick(&self.signature, &item.signature),
            signature_property: pick(&self.signature_property, &item.signature_property),
        }
    }
}

/// A typed, internally consistent request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRequest {
    pub operation: Operation,
    pub content: ContentKind,
    /// Always [`CompressionAlgorithm::None`] for text content.
    pub compression: CompressionAlgorithm,
    /// `Some` exactly when the operation is combined.
    pub signature_mode: Option<SignatureMode>,
    /// Attachment holding binary input.
    pub binary_property: String,
}

impl OperationRequest {
    pub fn resolve(params: &RequestParams) -> Result<Self> {
        let operation: Operation = params
            .operation
            .as_deref()
            .ok_or_else(|| invalid_request("no operation given"))?
            .parse()?;
        let content: ContentKind = params.content.as_deref().unwrap_or_default().parse()?;

        // The tag is checked even for text so a typo never goes unnoticed.
        let compression: CompressionAlgorithm =
            params.compression.as_deref().unwrap_or_default().parse()?;
        let compression = match content {
            ContentKind::Binary => compression,
            ContentKind::Text => CompressionAlgorithm::None,
        };

        let signature_mode = resolve_signature_mode(operation, params.signature_mode.as_deref())?;

        Ok(Self {
            operation,
            content,
            compression,
            signature_mode,
            binary_property: params
                .binary_property
                .clone()
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_BINARY_PROPERTY.to_string()),
        })
    }

    /// Whether a caller-supplied detached signature is needed.
    pub fn needs_detached_signature(&self) -> bool {
        match self.operation {
            Operation::Verify => true,
            Operation::DecryptAndVerify => self.signature_mode == Some(SignatureMode::Detached),
            _ => false,
        }
    }
}

/// Decide the signature mode for `operation`.
///
/// Only combined operations have a mode; plain sign and verify always work
/// on detached signatures, so a requested mode is ignored for them.
pub fn resolve_signature_mode(
    operation: Operation,
    requested: Option<&str>,
) -> Result<Option<SignatureMode>> {
    let mode: SignatureMode = requested.unwrap_or_default().parse()?;
    Ok(operation.is_combined().then_some(mode))
}

fn invalid_request(msg: impl Into<String>) -> PgpflowError {
    PgpflowError::with_kind(ErrorCategory::User, ErrorKind::InvalidRequest, msg)
}
