//! pgpflow CLI - OpenPGP operations over batch documents

use clap::Parser;
use std::process;

use pgpflow::cli::{self, Cli};
use pgpflow::engine::RpgpEngine;

fn main() {
    let cli = Cli::parse();
    cli::init_logging(&cli.log_level, cli.log_json);

    if let Err(e) = cli::execute(&cli, &RpgpEngine::new()) {
        eprintln!("Error: {}", e.chain());
        process::exit(1);
    }
}
