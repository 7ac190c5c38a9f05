use serde::{Deserialize, Serialize};

use crate::types::{FilesystemKind, PartitionTableType};

/// Properties of the target device which matter for partitioning and formatting. This is the
/// same as the `/etc/diskpilot/deviceinfo.toml` file.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct DeviceInfo {
    /// Filesystem of the boot partition.
    #[serde(default = "default_boot_filesystem")]
    pub boot_filesystem: FilesystemKind,

    /// Root filesystem preferred by the device. It is checked against the filesystems the
    /// channel supports, so it is kept as written here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_filesystem: Option<String>,

    /// Type of the partition table written when the existing one is not preserved.
    #[serde(default)]
    pub partition_type: PartitionTableType,

    /// First sector of the boot partition.
    #[serde(default = "default_boot_part_start")]
    pub boot_part_start: u64,

    /// Keep the partition table and the first partition, which belongs to the bootloader.
    #[serde(default)]
    pub preserve_partition_table: bool,

    /// Start sector of the ChromeOS kernel partition. Together with `cgpt_kpart_size` this
    /// switches partitioning to `cgpt`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgpt_kpart_start: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgpt_kpart_size: Option<u64>,

    /// Cipher for `cryptsetup luksFormat`.
    #[serde(default = "default_cipher")]
    pub cipher: String,

    /// PBKDF iteration time for `cryptsetup luksFormat`, in milliseconds.
    #[serde(default = "default_iter_time_ms")]
    pub iter_time_ms: u64,
}

fn default_boot_filesystem() -> FilesystemKind {
    FilesystemKind::Ext2
}

fn default_boot_part_start() -> u64 {
    2048
}

fn default_cipher() -> String {
    "aes-xts-plain64".to_string()
}

fn default_iter_time_ms() -> u64 {
    200
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            boot_filesystem: default_boot_filesystem(),
            root_filesystem: None,
            partition_type: PartitionTableType::default(),
            boot_part_start: default_boot_part_start(),
            preserve_partition_table: false,
            cgpt_kpart_start: None,
            cgpt_kpart_size: None,
            cipher: default_cipher(),
            iter_time_ms: default_iter_time_ms(),
        }
    }
}

impl DeviceInfo {
    /// Kernel partition start and size, if this is a ChromeOS device.
    pub fn cgpt_kpart(&self) -> Option<(u64, u64)> {
        self.cgpt_kpart_start.zip(self.cgpt_kpart_size)
    }
}
