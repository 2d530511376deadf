//! kbingest CLI: crawl documentation sources into a local knowledge base.
//!
//! Detects how a URL should be crawled (web page, sitemap, llms.txt-style
//! link collection), stores chunked documents and code examples in libSQL,
//! and reports one unified progress bar while it runs.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
