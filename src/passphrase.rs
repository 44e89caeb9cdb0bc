//! Passphrase reading functionality

use crate::error::{ErrorCategory, ErrorKind, PgpflowError, Result};
use std::io::{self, IsTerminal, Read, Write};
use zeroize::Zeroizing;

/// Trait for reading the private key passphrase from various sources
pub trait PassphraseReader {
    /// Read the passphrase, or `None` if the key is not protected.
    ///
    /// Returns the passphrase wrapped in `Zeroizing` to ensure it is securely
    /// wiped from memory when dropped.
    fn read_passphrase(&mut self) -> Result<Option<Zeroizing<String>>>;
}

/// For keys stored without a passphrase.
pub struct NoPassphrase;

impl PassphraseReader for NoPassphrase {
    fn read_passphrase(&mut self) -> Result<Option<Zeroizing<String>>> {
        Ok(None)
    }
}

/// Returns a fixed passphrase
pub struct ConstantPassphraseReader {
    passphrase: Zeroizing<String>,
}

impl ConstantPassphraseReader {
    pub fn new(passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Zeroizing::new(passphrase.into()),
        }
    }
}

impl PassphraseReader for ConstantPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Option<Zeroizing<String>>> {
        Ok(Some(self.passphrase.clone()))
    }
}

/// Reads passphrase from any io::Read source
///
/// A single trailing newline (`\n` or `\r\n`) is removed, so that
/// `echo secret | pgpflow --passphrase-stdin ...` works as expected.
pub struct ReaderPassphraseReader {
    reader: Box<dyn Read>,
}

impl ReaderPassphraseReader {
    pub fn new(reader: Box<dyn Read>) -> Self {
        Self { reader }
    }
}

impl PassphraseReader for ReaderPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Option<Zeroizing<String>>> {
        let mut data = Zeroizing::new(Vec::new());
        self.reader.read_to_end(&mut data).map_err(|e| {
            PgpflowError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("error reading passphrase: {}", e),
                e,
            )
        })?;
        if data.ends_with(b"\n") {
            data.pop();
            if data.ends_with(b"\r") {
                data.pop();
            }
        }
        let text = std::str::from_utf8(&data).map_err(|e| {
            PgpflowError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "passphrase is not valid UTF-8",
                e,
            )
        })?;
        Ok(Some(Zeroizing::new(text.to_owned())))
    }
}

/// Reads passphrase from an environment variable
pub struct EnvPassphraseReader {
    var: String,
}

impl EnvPassphraseReader {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl PassphraseReader for EnvPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Option<Zeroizing<String>>> {
        match std::env::var(&self.var) {
            Ok(value) => Ok(Some(Zeroizing::new(value))),
            Err(e) => Err(PgpflowError::with_kind_and_source(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                format!("cannot read passphrase from ${}", self.var),
                e,
            )),
        }
    }
}

/// Reads passphrase from terminal with no echo
pub struct TerminalPassphraseReader;

impl TerminalPassphraseReader {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TerminalPassphraseReader {
    fn default() -> Self {
        Self::new()
    }
}

impl PassphraseReader for TerminalPassphraseReader {
    fn read_passphrase(&mut self) -> Result<Option<Zeroizing<String>>> {
        if !io::stdin().is_terminal() {
            return Err(PgpflowError::with_kind(
                ErrorCategory::User,
                ErrorKind::PassphraseUnavailable,
                "cannot read passphrase from terminal - stdin is not a terminal",
            ));
        }

        io::stderr()
            .write_all(b"Passphrase (pgpflow private key): ")
            .map_err(|e| {
                PgpflowError::with_kind_and_source(
                    ErrorCategory::Internal,
                    ErrorKind::Io,
                    format!("failed to write prompt: {}", e),
                    e,
                )
            })?;
        io::stderr().flush().map_err(|e| {
            PgpflowError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::Io,
                format!("failed to flush prompt: {}", e),
                e,
            )
        })?;

        // Read password *without echo*
        let passphrase = rpassword::read_password().map_err(|e| {
            PgpflowError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::PassphraseUnavailable,
                format!("failure reading passphrase: {}", e),
                e,
            )
        })?;

        // An empty answer at the prompt means "no passphrase".
        if passphrase.is_empty() {
            return Ok(None);
        }
        Ok(Some(Zeroizing::new(passphrase)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(reader: &mut dyn PassphraseReader) -> Option<String> {
        reader
            .read_passphrase()
            .unwrap()
            .map(|p| p.as_str().to_owned())
    }

    #[test]
    fn test_constant_reader() {
        let mut reader = ConstantPassphraseReader::new("test123");
        assert_eq!(read(&mut reader).as_deref(), Some("test123"));
        assert_eq!(read(&mut reader).as_deref(), Some("test123"));
    }

    #[test]
    fn test_no_passphrase() {
        assert_eq!(read(&mut NoPassphrase), None);
    }

    /// Tests the terminal reader. This is ignored by default and must be run
    /// explicitly and with human input:
    ///
    /// cargo test test_terminal_reader_interactive -- --ignored --nocapture
    #[test]
    #[ignore]
    fn test_terminal_reader_interactive() {
        let mut reader = TerminalPassphraseReader::new();
        println!("\nPlease enter a test passphrase:");
        let passphrase = reader.read_passphrase().unwrap();
        println!("You entered: {:?}", passphrase.as_deref().map(String::as_str));
    }

    #[test]
    fn test_reader_passphrase_reader() {
        let data = b"mypassword";
        let mut reader = ReaderPassphraseReader::new(Box::new(&data[..]));
        assert_eq!(read(&mut reader).as_deref(), Some("mypassword"));
    }

    #[test]
    fn test_reader_strips_one_newline() {
        let mut reader = ReaderPassphraseReader::new(Box::new(&b"secret\r\n"[..]));
        assert_eq!(read(&mut reader).as_deref(), Some("secret"));

        let mut reader = ReaderPassphraseReader::new(Box::new(&b"secret\n\n"[..]));
        assert_eq!(read(&mut reader).as_deref(), Some("secret\n"));
    }

    #[test]
    fn test_reader_passphrase_reader_empty() {
        let mut reader = ReaderPassphraseReader::new(Box::new(&b""[..]));
        assert_eq!(read(&mut reader).as_deref(), Some(""));
    }

    #[test]
    fn test_reader_rejects_non_utf8() {
        let data: &[u8] = &[0xff, 0xfe, 0x00, 0x01];
        let mut reader = ReaderPassphraseReader::new(Box::new(data));
        let err = reader.read_passphrase().expect_err("expected UTF-8 error");
        assert_eq!(err.kind, Some(ErrorKind::PassphraseUnavailable));
    }

    #[test]
    fn test_env_reader_missing_var() {
        let mut reader = EnvPassphraseReader::new("PGPFLOW_TEST_SURELY_UNSET_VARIABLE");
        let err = reader.read_passphrase().expect_err("expected missing variable");
        assert_eq!(err.kind, Some(ErrorKind::PassphraseUnavailable));
    }
}
