//! pgpflow - OpenPGP operations over batches of text and binary work items
//!
//! The library orchestrates encrypt, decrypt, sign, verify and their
//! combinations on top of an injected [`engine::CryptoEngine`]. Enable the
//! `rpgp` feature for a real engine.

#![forbid(unsafe_code)]

pub mod batch;
pub mod cli;
pub mod compression;
pub mod credentials;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod file_ops;
pub mod item;
pub mod keys;
pub mod passphrase;
pub mod processor;
pub mod request;

pub use error::{ErrorCategory, ErrorKind, KeyRole, PgpflowError, Result};
