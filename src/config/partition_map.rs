use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::types::FilesystemKind;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(deny_unknown_fields)]
pub struct PartitionMapEntry {
    /// GPT partition name and filesystem label.
    pub partlabel: String,

    /// Member of an A/B slot pair. Of a pair only the `_a` partition is mounted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<bool>,

    /// Size in MiB. Only the last partition may leave it out, it then fills the disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_mib: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filesystem: Option<FilesystemKind>,
}

/// Partitions of the OTA layout by logical name, in on-disk order. This is the same as the
/// `/etc/diskpilot/partition_map.toml` file.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
#[serde(transparent)]
pub struct PartitionMap(pub IndexMap<String, PartitionMapEntry>);

impl PartitionMap {
    /// 1-based physical index of a logical partition.
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.0.get_index_of(name).map(|i| i as u32 + 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PartitionMapEntry)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
