//! CLI entry point for rendezvous-rs.

use clap::Parser;
use cli::CliConfig;

fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();
    let result = config.run()?;
    std::process::exit(result.exit_code)
}
