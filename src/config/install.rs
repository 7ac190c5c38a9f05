use serde::{Deserialize, Serialize};

/// Which partition layout to install.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    /// Boot, optional reserve and root partitions.
    #[default]
    Legacy,
    /// Arbitrary partitions described by `partition_map.toml`, with A/B slots.
    Ota,
}

/// Options of one install. This is the same as the `/etc/diskpilot/install.toml` file, the
/// command line can override some of them.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct InstallOptions {
    #[serde(default)]
    pub layout: LayoutKind,

    /// Size of the boot partition in MiB.
    #[serde(default = "default_boot_size_mib")]
    pub boot_size_mib: u64,

    /// Size of the empty partition between boot and root in MiB. No partition is created
    /// when zero.
    #[serde(default)]
    pub reserve_size_mib: u64,

    #[serde(default)]
    pub full_disk_encryption: bool,

    /// Partition of the OTA layout which gets encrypted.
    #[serde(default = "default_encrypted_partition")]
    pub encrypted_partition: String,

    /// Root filesystem, overrides the one of the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<String>,

    #[serde(default = "default_boot_label")]
    pub boot_label: String,

    #[serde(default = "default_root_label")]
    pub root_label: String,

    /// Prefix of the command installing the `mkfs.*` tools inside the execution context.
    /// Empty means they are already installed.
    #[serde(default = "default_package_install_command")]
    pub package_install_command: Vec<String>,
}

fn default_boot_size_mib() -> u64 {
    256
}

fn default_encrypted_partition() -> String {
    "home".to_string()
}

fn default_boot_label() -> String {
    "pmOS_boot".to_string()
}

fn default_root_label() -> String {
    "pmOS_root".to_string()
}

fn default_package_install_command() -> Vec<String> {
    vec!["apk".to_string(), "add".to_string()]
}

impl Default for InstallOptions {
    fn default() -> Self {
        Self {
            layout: LayoutKind::default(),
            boot_size_mib: default_boot_size_mib(),
            reserve_size_mib: 0,
            full_disk_encryption: false,
            encrypted_partition: default_encrypted_partition(),
            filesystem: None,
            boot_label: default_boot_label(),
            root_label: default_root_label(),
            package_install_command: default_package_install_command(),
        }
    }
}
