use crate::types::{FilesystemKind, PartitionTableType};

/// How the legacy layout gets its partition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableMode {
    /// Write a new table of the given type. The boot partition starts at `boot_part_start`
    /// (in sectors).
    Fresh {
        table_type: PartitionTableType,
        boot_part_start: u64,
    },
    /// Keep the table and partition 1 which belongs to the bootloader, append after it.
    PreserveExisting,
    /// ChromeOS devices: GPT managed with `cgpt`, with a kernel partition in front.
    ChromeOs {
        kpart_start: u64,
        kpart_size: u64,
    },
}

/// 1-based partition indexes of the legacy layout, in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLayout {
    pub kernel: Option<u32>,
    pub boot: u32,
    /// Placeholder between boot and root. Never formatted nor mounted.
    pub reserve: Option<u32>,
    pub root: u32,
}

impl PartitionLayout {
    pub fn new(mode: &TableMode, with_reserve: bool) -> Self {
        match mode {
            TableMode::Fresh { .. } => Self::sequential(1, with_reserve),
            TableMode::PreserveExisting => Self::sequential(2, with_reserve),
            // The reserved space is left as a gap, cgpt does not get a partition for it
            TableMode::ChromeOs { .. } => Self {
                kernel: Some(1),
                boot: 2,
                reserve: None,
                root: 3,
            },
        }
    }

    fn sequential(boot: u32, with_reserve: bool) -> Self {
        let reserve = with_reserve.then_some(boot + 1);
        Self {
            kernel: None,
            boot,
            reserve,
            root: reserve.unwrap_or(boot) + 1,
        }
    }

    /// Partitions whose device nodes are needed inside the execution context.
    pub fn used_partitions(&self) -> Vec<u32> {
        let mut partitions = vec![self.boot, self.root];
        partitions.extend(self.kernel);
        partitions
    }
}

/// One entry of an OTA partition map, resolved against the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaPartition {
    /// 1-based physical index, from the position in the map.
    pub index: u32,
    pub name: String,
    pub partlabel: String,
    /// Member of an A/B pair.
    pub slot: bool,
    /// `None` extends the partition to the end of the disk.
    pub size_mib: Option<u64>,
    pub filesystem: FilesystemKind,
}

impl OtaPartition {
    pub fn is_boot(&self) -> bool {
        self.name == "boot"
    }

    /// Directory name below the install root this partition is mounted at, `None` for the
    /// inactive member of a slot pair.
    pub fn mount_name(&self) -> Option<&str> {
        if !self.slot {
            return Some(&self.name);
        }
        self.name.strip_suffix("_a")
    }
}
