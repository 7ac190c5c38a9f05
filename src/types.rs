use std::{
    fmt::{Debug, Display},
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::ProvisionError;

#[derive(Zeroize, ZeroizeOnDrop, Clone)]
pub struct Passphrase(Vec<u8>);

impl Passphrase {
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Passphrase {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl Debug for Passphrase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Passphrase(<redacted>)")
    }
}

/// Filesystems we know how to create on a partition.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Hash, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum FilesystemKind {
    Fat16,
    Fat32,
    Ext2,
    Ext4,
    F2fs,
    Btrfs,
}

impl FilesystemKind {
    pub const ALL: [FilesystemKind; 6] = [
        FilesystemKind::Fat16,
        FilesystemKind::Fat32,
        FilesystemKind::Ext2,
        FilesystemKind::Ext4,
        FilesystemKind::F2fs,
        FilesystemKind::Btrfs,
    ];

    /// Package which provides the `mkfs.*` tool for this filesystem.
    pub fn fsprogs_package(&self) -> &'static str {
        match self {
            FilesystemKind::Fat16 | FilesystemKind::Fat32 => "dosfstools",
            FilesystemKind::Ext2 | FilesystemKind::Ext4 => "e2fsprogs",
            FilesystemKind::F2fs => "f2fs-tools",
            FilesystemKind::Btrfs => "btrfs-progs",
        }
    }
}

impl Display for FilesystemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(serde_variant::to_variant_name(self).unwrap_or("<unknown>"))
    }
}

impl FromStr for FilesystemKind {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilesystemKind::ALL
            .into_iter()
            .find(|kind| kind.to_string() == s)
            .ok_or_else(|| ProvisionError::config(format!("Unsupported filesystem: {s}")))
    }
}

/// Partition table type, spelled the way `parted mktable` expects it.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Default)]
#[serde(rename_all = "lowercase")]
pub enum PartitionTableType {
    #[default]
    Msdos,
    Gpt,
}

impl Display for PartitionTableType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(serde_variant::to_variant_name(self).unwrap_or("<unknown>"))
    }
}

/// What kind of thing backs the install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// A real block device such as an SD card. Its size is known up front.
    BlockDevice,
    /// An image file attached through a loop device.
    Image,
}
