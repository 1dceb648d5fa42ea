//! Command-line entry point.
//!
//! `appimage-thumbnailer <archive> <output> [size]`, as invoked by desktop
//! thumbnailer specifications. Exits non-zero with a diagnostic on stderr
//! whenever no PNG was written.

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use appimage_thumbnailer::{ArchiveHandle, Cli, CommandRunner, Toolbox, thumbnail};

/// Environment variable holding a `tracing` filter directive.
const LOG_ENV: &str = "APPIMAGE_THUMBNAILER_LOG";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let size = cli.size();
    let archive_path = cli
        .archive
        .canonicalize()
        .with_context(|| format!("cannot access {}", cli.archive.display()))?;

    let archive = ArchiveHandle::open(&archive_path)
        .await
        .with_context(|| format!("failed to read {}", archive_path.display()))?;
    let tools = Toolbox::new(&cli.tools_dir);
    let runner = CommandRunner::new(cli.timeout());

    let icon = thumbnail(&archive, &tools, runner, size)
        .await
        .with_context(|| format!("no thumbnail for {}", archive_path.display()))?;

    icon.write_to(&cli.output)
        .with_context(|| format!("failed to write {}", cli.output.display()))?;

    Ok(())
}

/// Log to stderr, filtered by `APPIMAGE_THUMBNAILER_LOG` or `-v`.
fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(cli.default_log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
