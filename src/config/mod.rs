pub mod channel;
pub mod device;
pub mod install;
pub mod partition_map;
pub mod source;

use channel::ChannelConfig;
use device::DeviceInfo;
use install::InstallOptions;
use partition_map::PartitionMap;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ConfigBundle {
    /// Options of the install. This is the same as the `/etc/diskpilot/install.toml` file.
    #[serde(default)]
    pub install: InstallOptions,

    /// Properties of the target device. This is the same as the `/etc/diskpilot/deviceinfo.toml` file.
    #[serde(default)]
    pub device: DeviceInfo,

    /// Capabilities of the release channel. This is the same as the `/etc/diskpilot/channel.toml` file.
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Partitions of the OTA layout. This is the same as the `/etc/diskpilot/partition_map.toml` file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_map: Option<PartitionMap>,
}

#[cfg(test)]
pub mod tests {

    #[allow(unused_imports)]
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_bundle_round_trip_keeps_map_order() -> Result<()> {
        let bundle = ConfigBundle {
            partition_map: Some(toml::from_str(partition_map::tests::AB_MAP)?),
            ..Default::default()
        };

        let dumped = toml::to_string_pretty(&bundle)?;
        let boot = dumped.find("[partition_map.boot]").unwrap();
        let home_a = dumped.find("[partition_map.home_a]").unwrap();
        let home_b = dumped.find("[partition_map.home_b]").unwrap();
        assert!(boot < home_a && home_a < home_b);

        assert_eq!(toml::from_str::<ConfigBundle>(&dumped)?, bundle);
        Ok(())
    }
}
