//! Work items and their two output channels
//!
//! A work item has structured JSON fields and named binary attachments.
//! Attachment bytes travel as standard base64 in the batch document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const MIME_PGP_ENCRYPTED: &str = "application/pgp-encrypted";
pub const MIME_PGP_SIGNATURE: &str = "application/pgp-signature";

const ENCRYPTED_SUFFIX: &str = ".pgp";
const SIGNATURE_SUFFIX: &str = ".sig";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    #[serde(default)]
    pub json: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub binary: BTreeMap<String, Attachment>,
}

impl WorkItem {
    pub fn from_json(json: Map<String, Value>) -> Self {
        Self {
            json,
            binary: BTreeMap::new(),
        }
    }

    pub fn with_attachment(mut self, name: impl Into<String>, attachment: Attachment) -> Self {
        self.binary.insert(name.into(), attachment);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(with = "base64_data")]
    pub data: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Attachment {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            file_name: None,
            mime_type: None,
        }
    }

    pub fn named(mut self, file_name: Option<String>) -> Self {
        self.file_name = file_name;
        self
    }

    pub fn with_mime_type(mut self, mime_type: &str) -> Self {
        self.mime_type = Some(mime_type.to_string());
        self
    }
}

/// `report.pdf` becomes `report.pdf.pgp`.
pub fn encrypted_file_name(name: Option<&str>) -> Option<String> {
    name.map(|n| format!("{n}{ENCRYPTED_SUFFIX}"))
}

/// `report.pdf.pgp` becomes `report.pdf`; anything without the suffix has
/// no derivable name.
pub fn decrypted_file_name(name: Option<&str>) -> Option<String> {
    name.and_then(|n| n.strip_suffix(ENCRYPTED_SUFFIX))
        .filter(|n| !n.is_empty())
        .map(str::to_string)
}

pub fn signature_file_name(name: Option<&str>) -> Option<String> {
    name.map(|n| format!("{n}{SIGNATURE_SUFFIX}"))
}

mod base64_data {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(serde::de::Error::custom)
    }
}
