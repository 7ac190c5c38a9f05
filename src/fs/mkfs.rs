use std::path::Path;

use anyhow::{Context as _, Result};

use crate::{
    argv,
    error::ProvisionError,
    fs::exec::Executor,
    types::{FilesystemKind, TargetKind},
};

/// Inode count used for ext4 when the final size of the filesystem is not known in advance.
pub const FIXED_INODE_COUNT: u64 = 100_000;

/// Filesystem to create on a single partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemSpec {
    pub kind: FilesystemKind,
    pub label: String,
}

impl FilesystemSpec {
    pub fn new(kind: FilesystemKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
        }
    }
}

/// Checks the requested root filesystem against the set the active channel supports.
pub fn resolve_root_filesystem(requested: &str, supported: &[String]) -> Result<FilesystemKind> {
    if !supported.iter().any(|s| s == requested) {
        return Err(ProvisionError::config(format!(
            "Root filesystem {requested} is not supported by the currently configured channel. \
             Update or change the channel, or select one of these filesystems: {}",
            supported.join(", ")
        ))
        .into());
    }
    Ok(requested.parse::<FilesystemKind>()?)
}

/// The `mkfs.*` invocation for `spec` on `device`.
pub fn mkfs_command(spec: &FilesystemSpec, device: &Path, target: TargetKind) -> Vec<String> {
    let label = spec.label.as_str();
    let mut cmd = match spec.kind {
        FilesystemKind::Fat16 => argv!["mkfs.fat", "-F", "16", "-n", label],
        FilesystemKind::Fat32 => argv!["mkfs.fat", "-F", "32", "-n", label],
        FilesystemKind::Ext2 => argv!["mkfs.ext2", "-F", "-q", "-L", label],
        FilesystemKind::Ext4 => {
            // Some downstream kernels don't support metadata_csum
            let mut cmd = argv!["mkfs.ext4", "-O", "^metadata_csum", "-F", "-q", "-L", label];
            // The filesystem grows with the image later on, so the auto-sized inode count
            // would be far too small.
            if target != TargetKind::BlockDevice {
                cmd.extend(argv!["-N", FIXED_INODE_COUNT]);
            }
            cmd
        }
        FilesystemKind::F2fs => argv!["mkfs.f2fs", "-f", "-l", label],
        FilesystemKind::Btrfs => argv!["mkfs.btrfs", "-f", "-q", "-L", label],
    };
    cmd.push(device.display().to_string());
    cmd
}

/// Formats partitions inside the execution context.
pub struct Formatter<'a> {
    executor: &'a dyn Executor,
    package_install_command: &'a [String],
    target: TargetKind,
}

impl<'a> Formatter<'a> {
    pub fn new(
        executor: &'a dyn Executor,
        package_install_command: &'a [String],
        target: TargetKind,
    ) -> Self {
        Self {
            executor,
            package_install_command,
            target,
        }
    }

    pub async fn install_packages(&self, packages: &[&str]) -> Result<()> {
        if self.package_install_command.is_empty() {
            tracing::debug!("No package install command configured, assuming {packages:?} are present");
            return Ok(());
        }
        let mut cmd = self.package_install_command.to_vec();
        cmd.extend(packages.iter().map(|p| p.to_string()));
        self.executor
            .run_checked(&cmd)
            .await
            .with_context(|| format!("Failed to install {packages:?}"))
    }

    pub async fn format(&self, device: &Path, spec: &FilesystemSpec) -> Result<()> {
        self.install_packages(&[spec.kind.fsprogs_package()]).await?;

        tracing::info!("Formatting {device:?} as {} (label: {})", spec.kind, spec.label);
        self.executor
            .run_checked(&mkfs_command(spec, device, self.target))
            .await
            .with_context(|| format!("Failed to format {device:?} as {}", spec.kind))
    }
}
