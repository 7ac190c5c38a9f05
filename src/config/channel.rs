use serde::{Deserialize, Serialize};

/// Capabilities of the release channel being installed. This is the same as the
/// `/etc/diskpilot/channel.toml` file.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Root filesystems the channel's initramfs and kernel are able to boot from.
    #[serde(default = "default_supported_root_filesystems")]
    pub supported_root_filesystems: Vec<String>,
}

fn default_supported_root_filesystems() -> Vec<String> {
    vec!["ext4".to_string()]
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            supported_root_filesystems: default_supported_root_filesystems(),
        }
    }
}
