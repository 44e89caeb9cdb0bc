//! Compression applied to binary plaintext around encryption
//!
//! Two container formats are supported and they are NOT interchangeable:
//! - `zip`: raw DEFLATE stream, no header or checksum
//! - `zlib`: gzip framing (header, DEFLATE body, CRC32 trailer)
//!
//! The tag names follow the historical request vocabulary, which is why the
//! gzip container is selected by `zlib`.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use flate2::Compression;
use flate2::read::{DeflateDecoder, DeflateEncoder, GzDecoder, GzEncoder};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCategory, ErrorKind, PgpflowError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    None,
    Zip,
    Zlib,
}

impl CompressionAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionAlgorithm::None => "none",
            CompressionAlgorithm::Zip => "zip",
            CompressionAlgorithm::Zlib => "zlib",
        }
    }
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionAlgorithm {
    type Err = PgpflowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "none" => Ok(CompressionAlgorithm::None),
            "zip" => Ok(CompressionAlgorithm::Zip),
            "zlib" => Ok(CompressionAlgorithm::Zlib),
            other => Err(unsupported(other)),
        }
    }
}

fn unsupported(tag: &str) -> PgpflowError {
    PgpflowError::with_kind(
        ErrorCategory::User,
        ErrorKind::UnsupportedCompressionAlgorithm,
        format!("unsupported compression algorithm: {tag:?}"),
    )
}

/// Compress `data` with `algorithm`. `None` returns the input unchanged.
pub fn compress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let read = match algorithm {
        CompressionAlgorithm::None => return Ok(data.to_vec()),
        CompressionAlgorithm::Zip => {
            DeflateEncoder::new(data, Compression::default()).read_to_end(&mut out)
        }
        CompressionAlgorithm::Zlib => {
            GzEncoder::new(data, Compression::default()).read_to_end(&mut out)
        }
    };
    read.map_err(|e| {
        PgpflowError::with_source(
            ErrorCategory::Internal,
            format!("{algorithm} compression failed"),
            e,
        )
    })?;
    Ok(out)
}

/// Decompress `data` that was produced with the same `algorithm`.
///
/// A container that does not match the algorithm (including data that was
/// compressed with the other algorithm) fails with
/// [`ErrorKind::DecompressionFailed`].
pub fn decompress(data: &[u8], algorithm: CompressionAlgorithm) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let read = match algorithm {
        CompressionAlgorithm::None => return Ok(data.to_vec()),
        CompressionAlgorithm::Zip => DeflateDecoder::new(data).read_to_end(&mut out),
        CompressionAlgorithm::Zlib => GzDecoder::new(data).read_to_end(&mut out),
    };
    read.map_err(|e| {
        PgpflowError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::DecompressionFailed,
            format!("{algorithm} decompression failed; data is corrupt or was not compressed with {algorithm}"),
            e,
        )
    })?;
    Ok(out)
}
