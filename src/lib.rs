pub mod cli;
pub mod cmd;
pub mod config;
pub mod disk;
pub mod error;
pub mod fs;
pub mod install;
pub mod types;

use std::path::Path;

use anyhow::{bail, Context, Result};
use clap::Parser as _;
use cmd::{Globals, IntoCommand as _};
use config::source::{fs::FileSystemConfigSource, ConfigSource};
use shadow_rs::shadow;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _};

shadow!(build);

pub async fn run() -> Result<()> {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let (filter, reload_handle) = tracing_subscriber::reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = cli::Cli::parse();

    if args.verbose {
        reload_handle
            .modify(|filter| {
                *filter = tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "debug".into())
            })
            .context("Failed to update log level to DEBUG")?;
        tracing::debug!("Log level set to DEBUG");
    }

    tracing::debug!(
        "diskpilot version: v{}  commit: {}  buildtime: {}",
        build::PKG_VERSION,
        build::COMMIT_HASH,
        build::BUILD_TIME
    );

    // Handle config dir
    let config_source: Box<dyn ConfigSource> = match &args.config_dir {
        Some(config_dir) => {
            if !Path::new(config_dir).is_dir() {
                bail!("Config dir {config_dir} does not exist or not a directory")
            }
            Box::new(FileSystemConfigSource::new(config_dir))
        }
        None => Box::new(FileSystemConfigSource::new_with_default_config_dir()),
    };
    tracing::debug!(
        "Using config source from {:?}",
        config_source.source_debug_string()
    );

    let globals = Globals {
        config_source,
        verbose: args.verbose,
    };

    // Handle the command
    args.command.into_command(globals).run().await?;

    Ok(())
}
