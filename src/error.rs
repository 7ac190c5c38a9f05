use std::path::PathBuf;

/// Fatal conditions of the provisioning pipeline which the caller may want to tell apart.
///
/// They travel inside [`anyhow::Error`] and can be recovered with `downcast_ref`.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// Wrong or unsupported configuration. Raised before anything was written to the device,
    /// so it is safe to retry after fixing the configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Some partition nodes never showed up after partitioning. `probed` holds the nodes which
    /// were still missing.
    #[error("Unable to find the partitions of {device:?}, still missing: {probed:?}")]
    PartitionNodeMissing {
        device: PathBuf,
        probed: Vec<PathBuf>,
    },

    /// `cryptsetup luksOpen` returned but the mapped device does not exist.
    #[error("Failed to open encrypted device, {mapped:?} does not exist")]
    CryptOpen { mapped: PathBuf },

    /// Preserving the partition table was requested but there is nothing to preserve.
    #[error("Expected an existing partition (e.g. of the bootloader) on {device:?} to preserve, but the partition table is empty")]
    PreservedTableEmpty { device: PathBuf },
}

impl ProvisionError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether destructive work may already have happened when this error is raised.
    pub fn after_point_of_no_return(&self) -> bool {
        matches!(
            self,
            ProvisionError::PartitionNodeMissing { .. } | ProvisionError::CryptOpen { .. }
        )
    }
}
