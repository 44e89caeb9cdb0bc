//! File and stdio operations
//!
//! Reading key files and batch documents, and writing the output document.
//! A path of `-` means stdin for input and stdout for output.

use crate::error::{ErrorCategory, ErrorKind, PgpflowError, Result};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use zeroize::Zeroizing;

const STDIO: &str = "-";

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == STDIO
}

/// Read a whole input, from stdin when `path` is `-`.
pub fn read_input(path: &Path) -> Result<Vec<u8>> {
    if is_stdio(path) {
        let mut data = Vec::new();
        io::stdin().read_to_end(&mut data).map_err(|e| {
            PgpflowError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                "failed to read from stdin",
                e,
            )
        })?;
        return Ok(data);
    }
    fs::read(path).map_err(|e| read_error(path, e))
}

/// Read a UTF-8 text file, such as an armored public key.
pub fn read_text(path: &Path) -> Result<String> {
    let data = fs::read(path).map_err(|e| read_error(path, e))?;
    String::from_utf8(data).map_err(|e| utf8_error(path, e))
}

/// Read a UTF-8 text file holding secret material. Every buffer the contents
/// pass through is wiped on drop.
pub fn read_secret_text(path: &Path) -> Result<Zeroizing<String>> {
    let data = Zeroizing::new(fs::read(path).map_err(|e| read_error(path, e))?);
    let text = std::str::from_utf8(&data).map_err(|e| utf8_error(path, e))?;
    Ok(Zeroizing::new(text.to_owned()))
}

/// Write the output, to stdout when `path` is `-`.
///
/// Files are replaced atomically (tempfile + fsync + rename), so a reader
/// sees either the previous file or the complete new one, and are created
/// with mode 0o600 on Unix.
pub fn write_output(path: &Path, contents: &[u8]) -> Result<()> {
    if is_stdio(path) {
        let mut stdout = io::stdout().lock();
        return stdout
            .write_all(contents)
            .and_then(|()| stdout.flush())
            .map_err(|e| {
                PgpflowError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    "failed to write to stdout",
                    e,
                )
            });
    }
    write_file_atomic(path, contents)
        .map_err(|e| e.with_context(format!("failed to write to {}", path.display())))
}

fn write_file_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp_file = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
        PgpflowError::with_kind_and_source(
            ErrorCategory::User,
            ErrorKind::Io,
            "failed to create tempfile",
            e,
        )
    })?;

    temp_file.write_all(contents).map_err(|e| {
        PgpflowError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to write to tempfile",
            e,
        )
    })?;
    // Flush and fsync() such that the rename later, if it succeeds, will
    // always point to a valid file.
    temp_file.flush().map_err(|e| {
        PgpflowError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to flush tempfile",
            e,
        )
    })?;
    temp_file.as_file().sync_all().map_err(|e| {
        PgpflowError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            "failed to sync file prior to rename",
            e,
        )
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        temp_file
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| {
                PgpflowError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    "failed to set tempfile permissions",
                    e,
                )
            })?;
    }
    temp_file.persist(path).map_err(|e| {
        PgpflowError::with_kind_and_source(
            ErrorCategory::Internal,
            ErrorKind::Io,
            format!("failed to rename to target file {}", path.display()),
            e,
        )
    })?;
    Ok(())
}

fn utf8_error<E>(path: &Path, err: E) -> PgpflowError
where
    E: std::error::Error + Send + Sync + 'static,
{
    PgpflowError::with_kind_and_source(
        ErrorCategory::User,
        ErrorKind::Io,
        format!("{} is not valid UTF-8", path.display()),
        err,
    )
}

fn read_error(path: &Path, err: io::Error) -> PgpflowError {
    let category = if err.kind() == io::ErrorKind::NotFound {
        ErrorCategory::User
    } else {
        ErrorCategory::Internal
    };
    PgpflowError::with_kind_and_source(
        category,
        ErrorKind::Io,
        format!("failed to read from {}", path.display()),
        err,
    )
}
