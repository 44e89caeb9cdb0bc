//! Per-item processing: input validation and output channel mapping

use std::borrow::Cow;

use serde_json::{Map, Value};
use tracing::debug;

use crate::dispatch::{Action, Content, OperationDispatcher, OperationResult, Plaintext, Verification};
use crate::engine::CryptoEngine;
use crate::error::{ErrorCategory, ErrorKind, PgpflowError, Result};
use crate::item::{
    Attachment, MIME_PGP_ENCRYPTED, MIME_PGP_SIGNATURE, WorkItem, decrypted_file_name,
    encrypted_file_name, signature_file_name,
};
use crate::keys::KeyMaterial;
use crate::request::{ContentKind, Operation, OperationRequest, RequestParams, SignatureMode};

/// Output field and attachment names.
pub mod fields {
    pub const ENCRYPTED: &str = "encrypted";
    pub const DECRYPTED: &str = "decrypted";
    pub const SIGNATURE: &str = "signature";
    pub const VERIFIED: &str = "verified";
}

/// The payload of one item in exactly one representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentUnit<'a> {
    Text(&'a str),
    Binary {
        data: &'a [u8],
        /// Display name used to derive output file names.
        name: Option<&'a str>,
    },
}

impl<'a> ContentUnit<'a> {
    /// Pick the input the request asks for out of `params` and `item`.
    ///
    /// Text input must be present but may be empty; binary input must be an
    /// existing attachment.
    pub fn from_item(
        request: &OperationRequest,
        params: &'a RequestParams,
        item: &'a WorkItem,
    ) -> Result<Self> {
        match request.content {
            ContentKind::Text => params
                .message
                .as_deref()
                .map(ContentUnit::Text)
                .ok_or_else(|| missing_input("no message given")),
            ContentKind::Binary => item
                .binary
                .get(&request.binary_property)
                .map(|a| ContentUnit::Binary {
                    data: &a.data,
                    name: a.file_name.as_deref(),
                })
                .ok_or_else(|| {
                    missing_input(format!(
                        "item has no binary attachment named {:?}",
                        request.binary_property
                    ))
                }),
        }
    }

    fn content(&self) -> Content<'a> {
        match *self {
            ContentUnit::Text(text) => Content::Text(text),
            ContentUnit::Binary { data, .. } => Content::Binary(data),
        }
    }

    fn name(&self) -> Option<&'a str> {
        match *self {
            ContentUnit::Text(_) => None,
            ContentUnit::Binary { name, .. } => name,
        }
    }

    fn is_binary(&self) -> bool {
        matches!(self, ContentUnit::Binary { .. })
    }
}

/// Applies the dispatcher to single work items with fixed key material.
pub struct ItemProcessor<'a, E: CryptoEngine> {
    dispatcher: OperationDispatcher<'a, E>,
    keys: &'a KeyMaterial<E>,
}

impl<'a, E: CryptoEngine> ItemProcessor<'a, E> {
    pub fn new(engine: &'a E, keys: &'a KeyMaterial<E>) -> Self {
        Self {
            dispatcher: OperationDispatcher::new(engine),
            keys,
        }
    }

    /// Run one resolved request on `unit`.
    ///
    /// `signature` is the caller-supplied detached signature, required when
    /// the request verifies in detached mode.
    pub fn process(
        &self,
        request: &OperationRequest,
        unit: &ContentUnit<'_>,
        signature: Option<&str>,
    ) -> Result<OperationResult> {
        if request.needs_detached_signature() && signature.is_none() {
            return Err(missing_input(format!(
                "{} needs a detached signature",
                request.operation
            )));
        }
        let signature = signature.unwrap_or_default();
        let mode = request.signature_mode.unwrap_or_default();

        let action = match request.operation {
            Operation::Encrypt => Action::Encrypt,
            Operation::Decrypt => Action::Decrypt,
            Operation::Sign => Action::Sign,
            Operation::Verify => Action::Verify { signature },
            Operation::EncryptAndSign => Action::EncryptAndSign { mode },
            Operation::DecryptAndVerify => Action::DecryptAndVerify {
                check: match mode {
                    SignatureMode::Embedded => Verification::Embedded,
                    SignatureMode::Detached => Verification::Detached { signature },
                },
            },
        };
        self.dispatcher
            .dispatch(self.keys, action, unit.content(), request.compression)
    }

    /// Resolve, validate, dispatch and map one work item to its output.
    pub fn process_item(&self, params: &RequestParams, item: &WorkItem) -> Result<WorkItem> {
        let request = OperationRequest::resolve(params)?;
        let unit = ContentUnit::from_item(&request, params, item)?;
        let signature = if request.needs_detached_signature() {
            detached_signature(params, item)?
        } else {
            None
        };
        debug!(
            operation = %request.operation,
            binary = unit.is_binary(),
            "processing item"
        );
        let result = self.process(&request, &unit, signature.as_deref())?;
        Ok(into_item(result, &unit))
    }
}

/// The detached signature for an item: inline text first, then the named
/// attachment.
fn detached_signature<'a>(
    params: &'a RequestParams,
    item: &'a WorkItem,
) -> Result<Option<Cow<'a, str>>> {
    if let Some(signature) = params.signature.as_deref() {
        return Ok(Some(Cow::Borrowed(signature)));
    }
    match params.signature_property.as_deref() {
        Some(property) => item
            .binary
            .get(property)
            // Bytes that are not text cannot be a valid signature, which
            // verification reports as `false`.
            .map(|a| Some(String::from_utf8_lossy(&a.data)))
            .ok_or_else(|| {
                missing_input(format!("item has no signature attachment named {property:?}"))
            }),
        None => Ok(None),
    }
}

/// Place every part of `result` in exactly one output channel.
pub fn into_item(result: OperationResult, unit: &ContentUnit<'_>) -> WorkItem {
    let mut out = Output {
        item: WorkItem::from_json(Map::new()),
        unit,
    };
    match result {
        OperationResult::Encrypted { envelope } => out.envelope(envelope),
        OperationResult::Signed { signature } => out.signature(signature),
        OperationResult::EncryptedAndSigned {
            envelope,
            signature,
        } => {
            out.envelope(envelope);
            if let Some(signature) = signature {
                out.signature(signature);
            }
        }
        OperationResult::Decrypted { plaintext } => out.plaintext(plaintext),
        OperationResult::DecryptedAndVerified {
            plaintext,
            verified,
        } => {
            out.plaintext(plaintext);
            out.verified(verified);
        }
        OperationResult::Verified { verified } => out.verified(verified),
    }
    out.item
}

struct Output<'u, 'a> {
    item: WorkItem,
    unit: &'u ContentUnit<'a>,
}

impl Output<'_, '_> {
    fn envelope(&mut self, envelope: String) {
        if self.unit.is_binary() {
            let attachment = Attachment::new(envelope.into_bytes())
                .named(encrypted_file_name(self.unit.name()))
                .with_mime_type(MIME_PGP_ENCRYPTED);
            self.item.binary.insert(fields::ENCRYPTED.into(), attachment);
        } else {
            self.item
                .json
                .insert(fields::ENCRYPTED.into(), Value::String(envelope));
        }
    }

    fn signature(&mut self, signature: String) {
        if self.unit.is_binary() {
            let attachment = Attachment::new(signature.into_bytes())
                .named(signature_file_name(self.unit.name()))
                .with_mime_type(MIME_PGP_SIGNATURE);
            self.item.binary.insert(fields::SIGNATURE.into(), attachment);
        } else {
            self.item
                .json
                .insert(fields::SIGNATURE.into(), Value::String(signature));
        }
    }

    fn plaintext(&mut self, plaintext: Plaintext) {
        match plaintext {
            Plaintext::Text(text) => {
                self.item
                    .json
                    .insert(fields::DECRYPTED.into(), Value::String(text));
            }
            Plaintext::Binary(data) => {
                let attachment =
                    Attachment::new(data).named(decrypted_file_name(self.unit.name()));
                self.item.binary.insert(fields::DECRYPTED.into(), attachment);
            }
        }
    }

    fn verified(&mut self, verified: bool) {
        self.item
            .json
            .insert(fields::VERIFIED.into(), Value::Bool(verified));
    }
}

fn missing_input(msg: impl Into<String>) -> PgpflowError {
    PgpflowError::with_kind(ErrorCategory::User, ErrorKind::MissingInput, msg)
}
