//! # sbsh — sandshell CLI
//!
//! Syscall and sandbox-construction commands for shells: fd operations,
//! SCM_RIGHTS passing, namespaces, mounts, capabilities, and seccomp.

#![allow(clippy::print_stdout, clippy::print_stderr)]

mod commands;
mod output;

use clap::Parser;

use crate::commands::Cli;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    std::process::exit(commands::execute(cli));
}
