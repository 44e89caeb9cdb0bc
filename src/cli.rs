//! Command-line interface
//!
//! Parsing lives here rather than in the binary so the whole flow can be
//! driven with any [`CryptoEngine`], including in tests.

use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::batch::{BatchDocument, BatchOutput, BatchRunner, FailurePolicy};
use crate::credentials::{CredentialSource, FileCredentials};
use crate::engine::CryptoEngine;
use crate::error::{ErrorCategory, ErrorKind, PgpflowError, Result};
use crate::file_ops;
use crate::keys::KeyMaterial;
use crate::passphrase::{
    EnvPassphraseReader, NoPassphrase, PassphraseReader, ReaderPassphraseReader,
    TerminalPassphraseReader,
};
use crate::processor::ItemProcessor;

#[derive(Parser, Debug)]
#[command(name = "pgpflow")]
#[command(version)]
#[command(about = "OpenPGP encrypt, decrypt, sign and verify over batches of work items.", long_about = None)]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every item of a batch document through its requested operation
    #[command(alias = "r")]
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Batch document to process, `-` for stdin
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Where to write the output document, `-` for stdout
    #[arg(short, long, value_name = "FILE", default_value = "-")]
    pub output: PathBuf,

    /// Armored private key used to sign and decrypt
    #[arg(long, value_name = "FILE", env = "PGPFLOW_PRIVATE_KEY")]
    pub private_key: PathBuf,

    /// Armored public key used to encrypt and verify
    #[arg(long, value_name = "FILE", env = "PGPFLOW_PUBLIC_KEY")]
    pub public_key: PathBuf,

    #[command(flatten)]
    pub passphrase: PassphraseArgs,

    /// Record failing items in the output instead of aborting
    #[arg(long)]
    pub continue_on_fail: bool,
}

#[derive(Args, Debug, Default)]
#[group(multiple = false)]
pub struct PassphraseArgs {
    /// Read the private key passphrase from stdin instead of from terminal
    #[arg(long)]
    pub passphrase_stdin: bool,

    /// Read the private key passphrase from this environment variable
    #[arg(long, value_name = "VAR")]
    pub passphrase_env: Option<String>,

    /// The private key is not passphrase protected
    #[arg(long)]
    pub no_passphrase: bool,
}

impl PassphraseArgs {
    /// Pick the reader. Without an explicit choice the terminal is asked,
    /// and without one no passphrase is read, so a protected key fails to load.
    pub fn reader(&self) -> Box<dyn PassphraseReader> {
        if self.passphrase_stdin {
            Box::new(ReaderPassphraseReader::new(Box::new(io::stdin())))
        } else if let Some(var) = &self.passphrase_env {
            Box::new(EnvPassphraseReader::new(var.clone()))
        } else if self.no_passphrase || !io::stdin().is_terminal() {
            Box::new(NoPassphrase)
        } else {
            Box::new(TerminalPassphraseReader::new())
        }
    }
}

/// Install the stderr log subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(filter);
    // A subscriber may already be installed, e.g. by an embedding host.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

pub fn execute<E: CryptoEngine>(cli: &Cli, engine: &E) -> Result<()> {
    match &cli.command {
        Commands::Run(args) => {
            let output = run_batch(args, engine)?;
            let json = serde_json::to_vec_pretty(&output).map_err(|e| {
                PgpflowError::with_source(ErrorCategory::Internal, "failed to serialize output", e)
            })?;
            file_ops::write_output(&args.output, &json)
        }
    }
}

/// Load keys once, then run the batch read from `args.input`.
pub fn run_batch<E: CryptoEngine>(args: &RunArgs, engine: &E) -> Result<BatchOutput> {
    if args.passphrase.passphrase_stdin && args.input.as_os_str() == "-" {
        return Err(PgpflowError::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidRequest,
            "--passphrase-stdin cannot be combined with reading the batch from stdin",
        ));
    }

    let mut source = FileCredentials::new(
        &args.private_key,
        &args.public_key,
        args.passphrase.reader(),
    );
    let keys = {
        let credentials = source.credentials()?;
        KeyMaterial::from_credentials(engine, &credentials)?
    };

    let data = file_ops::read_input(&args.input)?;
    let document = BatchDocument::from_json(&data)?;

    let policy = if args.continue_on_fail {
        FailurePolicy::ContinueOnFail
    } else {
        FailurePolicy::Abort
    };
    let runner = BatchRunner::new(ItemProcessor::new(engine, &keys), policy);
    let output = runner.run(&document)?;
    info!(input = %args.input.display(), "batch processed");
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fake::FakeEngine;
    use crate::error::KeyRole;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn write_keys(dir: &Path, passphrase: Option<&str>) -> (PathBuf, PathBuf) {
        let (private, public) = FakeEngine::keypair("alice", passphrase);
        let private_path = dir.join("alice.sec.asc");
        let public_path = dir.join("alice.pub.asc");
        fs::write(&private_path, private).unwrap();
        fs::write(&public_path, public).unwrap();
        (private_path, public_path)
    }

    fn run_args(cli: Cli) -> RunArgs {
        match cli.command {
            Commands::Run(args) => args,
        }
    }

    #[test]
    fn test_parse_run() {
        let cli = parse(&[
            "pgpflow",
            "run",
            "-i",
            "in.json",
            "--private-key",
            "a.sec",
            "--public-key",
            "a.pub",
            "--continue-on-fail",
            "--no-passphrase",
        ]);
        assert_eq!(cli.log_level, "warn");
        let args = run_args(cli);
        assert_eq!(args.input, PathBuf::from("in.json"));
        assert_eq!(args.output, PathBuf::from("-"));
        assert!(args.continue_on_fail);
        assert!(args.passphrase.no_passphrase);
    }

    #[test]
    fn test_passphrase_sources_are_exclusive() {
        let result = Cli::try_parse_from([
            "pgpflow",
            "run",
            "-i",
            "in.json",
            "--private-key",
            "a.sec",
            "--public-key",
            "a.pub",
            "--no-passphrase",
            "--passphrase-env",
            "PW",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_stdin_cannot_serve_twice() {
        let engine = FakeEngine::new();
        let args = run_args(parse(&[
            "pgpflow",
            "run",
            "-i",
            "-",
            "--private-key",
            "a.sec",
            "--public-key",
            "a.pub",
            "--passphrase-stdin",
        ]));
        let err = run_batch(&args, &engine).expect_err("expected conflict");
        assert_eq!(err.kind, Some(ErrorKind::InvalidRequest));
    }

    #[test]
    fn test_execute_writes_output() {
        let temp_dir = TempDir::new().unwrap();
        let (private, public) = write_keys(temp_dir.path(), None);
        let input = temp_dir.path().join("batch.json");
        let output = temp_dir.path().join("out.json");
        fs::write(
            &input,
            serde_json::to_vec(&json!({
                "request": {"operation": "encrypt"},
                "items": [
                    {"json": {}, "request": {"message": "hello"}},
                    {"json": {}, "request": {"message": "world"}}
                ]
            }))
            .unwrap(),
        )
        .unwrap();

        let cli = parse(&[
            "pgpflow",
            "run",
            "-i",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--private-key",
            private.to_str().unwrap(),
            "--public-key",
            public.to_str().unwrap(),
            "--no-passphrase",
        ]);
        execute(&cli, &FakeEngine::new()).unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&fs::read(&output).unwrap()).unwrap();
        let items = written["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        for item in items {
            assert!(item["json"]["encrypted"]
                .as_str()
                .unwrap()
                .starts_with("-----BEGIN PGP MESSAGE-----"));
        }
    }

    #[test]
    fn test_env_passphrase_missing_fails_before_batch() {
        let temp_dir = TempDir::new().unwrap();
        let (private, public) = write_keys(temp_dir.path(), Some("pw"));
        let args = run_args(parse(&[
            "pgpflow",
            "run",
            "-i",
            "does-not-matter.json",
            "--private-key",
            private.to_str().unwrap(),
            "--public-key",
            public.to_str().unwrap(),
            "--passphrase-env",
            "PGPFLOW_TEST_SURELY_UNSET_VARIABLE",
        ]));
        let err = run_batch(&args, &FakeEngine::new()).expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::PassphraseUnavailable));
    }

    #[test]
    fn test_locked_key_without_passphrase_fails_before_batch() {
        let temp_dir = TempDir::new().unwrap();
        let (private, public) = write_keys(temp_dir.path(), Some("pw"));
        let input = temp_dir.path().join("batch.json");
        fs::write(
            &input,
            br#"{"request": {"operation": "sign", "message": "m"}, "items": [{"json": {"k": 1}}]}"#,
        )
        .unwrap();

        let args = run_args(parse(&[
            "pgpflow",
            "run",
            "-i",
            input.to_str().unwrap(),
            "--private-key",
            private.to_str().unwrap(),
            "--public-key",
            public.to_str().unwrap(),
            "--no-passphrase",
            "--continue-on-fail",
        ]));
        let engine = FakeEngine::new();
        let err = run_batch(&args, &engine).expect_err("expected locked key failure");
        assert_eq!(err.kind, Some(ErrorKind::KeyInvalid(KeyRole::Private)));
        assert!(!engine.ops().contains(&"sign"));
    }

    #[test]
    fn test_broken_public_key_fails_before_batch() {
        let temp_dir = TempDir::new().unwrap();
        let (private, public) = write_keys(temp_dir.path(), None);
        fs::write(&public, "garbage").unwrap();
        let args = run_args(parse(&[
            "pgpflow",
            "run",
            "-i",
            "does-not-matter.json",
            "--private-key",
            private.to_str().unwrap(),
            "--public-key",
            public.to_str().unwrap(),
            "--no-passphrase",
        ]));
        let err = run_batch(&args, &FakeEngine::new()).expect_err("expected failure");
        assert_eq!(err.kind, Some(ErrorKind::KeyInvalid(KeyRole::Public)));
    }
}
