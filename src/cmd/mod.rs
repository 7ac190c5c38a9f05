use anyhow::Result;
use async_trait::async_trait;

use crate::config::source::ConfigSource;

pub mod dump_config;
pub mod install;
pub mod show_table;

#[async_trait]
pub trait Command {
    async fn run(&self) -> Result<()>;
}

/// Options shared by all subcommands.
pub struct Globals {
    pub config_source: Box<dyn ConfigSource>,
    pub verbose: bool,
}

pub trait IntoCommand {
    fn into_command(self, globals: Globals) -> Box<dyn Command>;
}

impl IntoCommand for crate::cli::Command {
    fn into_command(self, globals: Globals) -> Box<dyn Command> {
        match self {
            crate::cli::Command::Install(install_options) => Box::new(install::InstallCommand {
                install_options,
                globals,
            }),
            crate::cli::Command::ShowTable(show_table_options) => {
                Box::new(show_table::ShowTableCommand { show_table_options })
            }
            crate::cli::Command::DumpConfig => {
                Box::new(dump_config::DumpConfigCommand { globals })
            }
        }
    }
}
