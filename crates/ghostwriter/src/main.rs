//! `ghostwriter`: launcher, worker roles, and control shell in one binary.

mod cli;
mod ctl;
mod error;
mod roles;

use clap::Parser;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> error::Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.logs.spec());
    match cli.command {
        Command::Run(args) => roles::launch(args).await,
        Command::Role(args) => roles::role(args).await,
        Command::Ctl(args) => ctl::ctl(args).await,
        Command::Inspect(args) => ctl::inspect(args).await,
    }
}
