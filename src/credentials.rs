//! Credential collaborator: where armored keys and the passphrase come from

use std::fmt;
use std::path::PathBuf;

use tracing::debug;
use zeroize::Zeroizing;

use crate::error::Result;
use crate::file_ops;
use crate::passphrase::PassphraseReader;

/// Armored key text plus optional passphrase, as opaque strings.
pub struct Credentials {
    private_key: Zeroizing<String>,
    public_key: String,
    passphrase: Option<Zeroizing<String>>,
}

impl Credentials {
    pub fn new(
        private_key: impl Into<String>,
        public_key: impl Into<String>,
        passphrase: Option<Zeroizing<String>>,
    ) -> Self {
        Self {
            private_key: Zeroizing::new(private_key.into()),
            public_key: public_key.into(),
            passphrase,
        }
    }

    pub fn private_key(&self) -> &str {
        &self.private_key
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    pub fn passphrase(&self) -> Option<&str> {
        self.passphrase.as_deref().map(String::as_str)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("private_key", &"<redacted>")
            .field("public_key", &format_args!("<{} bytes>", self.public_key.len()))
            .field(
                "passphrase",
                &self.passphrase.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Anything that can hand out [`Credentials`].
pub trait CredentialSource {
    fn credentials(&mut self) -> Result<Credentials>;
}

/// Credentials held in memory by the caller.
pub struct StaticCredentials {
    private_key: Zeroizing<String>,
    public_key: String,
    passphrase: Option<Zeroizing<String>>,
}

impl StaticCredentials {
    pub fn new(
        private_key: impl Into<String>,
        public_key: impl Into<String>,
        passphrase: Option<&str>,
    ) -> Self {
        Self {
            private_key: Zeroizing::new(private_key.into()),
            public_key: public_key.into(),
            passphrase: passphrase.map(|p| Zeroizing::new(p.to_owned())),
        }
    }
}

impl CredentialSource for StaticCredentials {
    fn credentials(&mut self) -> Result<Credentials> {
        Ok(Credentials {
            private_key: self.private_key.clone(),
            public_key: self.public_key.clone(),
            passphrase: self.passphrase.clone(),
        })
    }
}

/// Armored key files on disk, with the passphrase from a [`PassphraseReader`].
pub struct FileCredentials {
    private_key_path: PathBuf,
    public_key_path: PathBuf,
    passphrase_reader: Box<dyn PassphraseReader>,
}

impl FileCredentials {
    pub fn new(
        private_key_path: impl Into<PathBuf>,
        public_key_path: impl Into<PathBuf>,
        passphrase_reader: Box<dyn PassphraseReader>,
    ) -> Self {
        Self {
            private_key_path: private_key_path.into(),
            public_key_path: public_key_path.into(),
            passphrase_reader,
        }
    }
}

impl CredentialSource for FileCredentials {
    fn credentials(&mut self) -> Result<Credentials> {
        let private_key = file_ops::read_secret_text(&self.private_key_path)?;
        let public_key = file_ops::read_text(&self.public_key_path)?;
        let passphrase = self.passphrase_reader.read_passphrase()?;
        debug!(
            private_key = %self.private_key_path.display(),
            public_key = %self.public_key_path.display(),
            has_passphrase = passphrase.is_some(),
            "read credentials from files"
        );
        Ok(Credentials {
            private_key,
            public_key,
            passphrase,
        })
    }
}
