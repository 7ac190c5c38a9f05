pub mod fs;

use anyhow::Result;
use async_trait::async_trait;

use super::ConfigBundle;

#[async_trait]
pub trait ConfigSource: Send + Sync {
    fn source_debug_string(&self) -> String;

    async fn get_config(&self) -> Result<ConfigBundle>;
}
