use anyhow::Result;
use async_trait::async_trait;

use super::Globals;

pub struct DumpConfigCommand {
    pub globals: Globals,
}

#[async_trait]
impl super::Command for DumpConfigCommand {
    async fn run(&self) -> Result<()> {
        let config = self.globals.config_source.get_config().await?;

        println!(
            "# Loaded from {}\n\n{}",
            self.globals.config_source.source_debug_string(),
            toml::to_string_pretty(&config)?
        );
        Ok(())
    }
}
