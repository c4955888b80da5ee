//! Discover CLI entry point.

use discover_lib::cli::{self, Cli};
use discover_lib::core::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();
    cli::execute(cli).await
}
