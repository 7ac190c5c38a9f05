use std::time::Duration;

use anyhow::Result;

use crate::{
    config::{install::LayoutKind, partition_map::PartitionMap, ConfigBundle},
    disk::{
        layout::{OtaPartition, TableMode},
        partition::{ota_boundaries, LegacyRequest, OtaRequest},
    },
    error::ProvisionError,
    fs::{luks2::EncryptionRequest, mkfs::resolve_root_filesystem, mkfs::FilesystemSpec},
    types::{FilesystemKind, TargetKind},
};

/// Everything the pipeline needs, checked once against the configuration before anything is
/// written to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallPlan {
    pub target: TargetKind,
    pub layout: LayoutPlan,
    /// Filesystem and label of the legacy boot partition.
    pub boot: FilesystemSpec,
    /// Filesystem and label of the legacy root partition.
    pub root: FilesystemSpec,
    /// Set when full disk encryption is enabled.
    pub encryption: Option<EncryptionRequest>,
    pub package_install_command: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutPlan {
    Legacy(LegacyRequest),
    Ota {
        request: OtaRequest,
        /// Logical name of the partition to encrypt, when encryption is enabled.
        encrypted: Option<String>,
    },
}

impl InstallPlan {
    pub fn from_config(config: &ConfigBundle, target: TargetKind) -> Result<Self> {
        let install = &config.install;
        let device = &config.device;

        let requested = install
            .filesystem
            .as_deref()
            .or(device.root_filesystem.as_deref())
            .unwrap_or("ext4");
        let root_kind =
            resolve_root_filesystem(requested, &config.channel.supported_root_filesystems)?;

        let encryption = install.full_disk_encryption.then(|| EncryptionRequest {
            cipher: device.cipher.clone(),
            iter_time: Duration::from_millis(device.iter_time_ms),
        });

        let layout = match install.layout {
            LayoutKind::Legacy => {
                let mode = match device.cgpt_kpart() {
                    Some((kpart_start, kpart_size)) => TableMode::ChromeOs {
                        kpart_start,
                        kpart_size,
                    },
                    None if device.preserve_partition_table => TableMode::PreserveExisting,
                    None => TableMode::Fresh {
                        table_type: device.partition_type,
                        boot_part_start: device.boot_part_start,
                    },
                };
                LayoutPlan::Legacy(LegacyRequest {
                    boot_size_mib: install.boot_size_mib,
                    reserve_size_mib: install.reserve_size_mib,
                    boot_filesystem: device.boot_filesystem,
                    mode,
                })
            }
            LayoutKind::Ota => {
                let map = config.partition_map.as_ref().ok_or_else(|| {
                    ProvisionError::config("The OTA layout needs a partition_map.toml")
                })?;
                let partitions = resolve_partition_map(map, config, root_kind)?;

                let encrypted = match install.full_disk_encryption {
                    true if map.index_of(&install.encrypted_partition).is_none() => {
                        return Err(ProvisionError::config(format!(
                            "Partition {} to encrypt is not part of the partition map",
                            install.encrypted_partition
                        ))
                        .into())
                    }
                    true => Some(install.encrypted_partition.clone()),
                    false => None,
                };

                let request = OtaRequest {
                    table_type: device.partition_type,
                    boot_part_start: device.boot_part_start,
                    partitions,
                };
                // Reject maps which cannot be laid out before touching the device
                ota_boundaries(&request)?;
                LayoutPlan::Ota { request, encrypted }
            }
        };

        Ok(Self {
            target,
            layout,
            boot: FilesystemSpec::new(device.boot_filesystem, &install.boot_label),
            root: FilesystemSpec::new(root_kind, &install.root_label),
            encryption,
            package_install_command: install.package_install_command.clone(),
        })
    }
}

fn resolve_partition_map(
    map: &PartitionMap,
    config: &ConfigBundle,
    root_kind: FilesystemKind,
) -> Result<Vec<OtaPartition>> {
    if map.is_empty() {
        return Err(ProvisionError::config("The partition map is empty").into());
    }
    if map.index_of("boot").is_none() {
        return Err(ProvisionError::config("The partition map has no boot partition").into());
    }

    map.iter()
        .enumerate()
        .map(|(i, (name, entry))| -> Result<OtaPartition> {
            let filesystem = if name == "boot" {
                // The device decides what its bootloader can read
                let boot = config.device.boot_filesystem;
                if entry.filesystem.is_some_and(|kind| kind != boot) {
                    tracing::warn!(
                        "Ignoring filesystem of the boot partition in the partition map, \
                         the device requires {boot}"
                    );
                }
                boot
            } else {
                match entry.filesystem {
                    Some(kind) => resolve_root_filesystem(
                        &kind.to_string(),
                        &config.channel.supported_root_filesystems,
                    )?,
                    None => root_kind,
                }
            };
            Ok(OtaPartition {
                index: i as u32 + 1,
                name: name.clone(),
                partlabel: entry.partlabel.clone(),
                slot: entry.slot.unwrap_or(false),
                size_mib: entry.size_mib,
                filesystem,
            })
        })
        .collect()
}

#[cfg(test)]
pub mod tests {

    #[allow(unused_imports)]
    use super::*;
    use crate::{config::partition_map::tests::AB_MAP, types::PartitionTableType};
    use anyhow::Result;

    #[test]
    fn test_default_plan() -> Result<()> {
        let plan = InstallPlan::from_config(&ConfigBundle::default(), TargetKind::BlockDevice)?;
        assert_eq!(
            plan.layout,
            LayoutPlan::Legacy(LegacyRequest {
                boot_size_mib: 256,
                reserve_size_mib: 0,
                boot_filesystem: FilesystemKind::Ext2,
                mode: TableMode::Fresh {
                    table_type: PartitionTableType::Msdos,
                    boot_part_start: 2048,
                },
            })
        );
        assert_eq!(plan.root, FilesystemSpec::new(FilesystemKind::Ext4, "pmOS_root"));
        assert_eq!(plan.boot, FilesystemSpec::new(FilesystemKind::Ext2, "pmOS_boot"));
        assert_eq!(plan.encryption, None);
        Ok(())
    }

    #[test]
    fn test_unsupported_root_filesystem() {
        let mut config = ConfigBundle::default();
        config.install.filesystem = Some("zfs".into());
        config.channel.supported_root_filesystems =
            vec!["ext4".into(), "f2fs".into(), "btrfs".into()];

        let err = InstallPlan::from_config(&config, TargetKind::Image).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Config(_))
        ));
        assert!(err.to_string().contains("ext4, f2fs, btrfs"));
    }

    #[test]
    fn test_filesystem_override_precedence() -> Result<()> {
        let mut config = ConfigBundle::default();
        config.channel.supported_root_filesystems = vec!["ext4".into(), "f2fs".into()];
        config.device.root_filesystem = Some("f2fs".into());
        let plan = InstallPlan::from_config(&config, TargetKind::Image)?;
        assert_eq!(plan.root.kind, FilesystemKind::F2fs);

        config.install.filesystem = Some("ext4".into());
        let plan = InstallPlan::from_config(&config, TargetKind::Image)?;
        assert_eq!(plan.root.kind, FilesystemKind::Ext4);
        Ok(())
    }

    #[test]
    fn test_table_mode_selection() -> Result<()> {
        let mut config = ConfigBundle::default();
        config.device.preserve_partition_table = true;
        let LayoutPlan::Legacy(request) =
            InstallPlan::from_config(&config, TargetKind::BlockDevice)?.layout
        else {
            panic!("expected legacy layout")
        };
        assert_eq!(request.mode, TableMode::PreserveExisting);

        config.device.cgpt_kpart_start = Some(8192);
        config.device.cgpt_kpart_size = Some(32768);
        let LayoutPlan::Legacy(request) =
            InstallPlan::from_config(&config, TargetKind::BlockDevice)?.layout
        else {
            panic!("expected legacy layout")
        };
        assert_eq!(
            request.mode,
            TableMode::ChromeOs {
                kpart_start: 8192,
                kpart_size: 32768
            }
        );
        Ok(())
    }

    fn ota_config() -> Result<ConfigBundle> {
        let mut config = ConfigBundle::default();
        config.install.layout = LayoutKind::Ota;
        config.partition_map = Some(toml::from_str(AB_MAP)?);
        Ok(config)
    }

    #[test]
    fn test_ota_plan() -> Result<()> {
        let plan = InstallPlan::from_config(&ota_config()?, TargetKind::Image)?;
        let LayoutPlan::Ota { request, encrypted } = plan.layout else {
            panic!("expected OTA layout")
        };
        assert_eq!(encrypted, None);

        let summary: Vec<_> = request
            .partitions
            .iter()
            .map(|p| (p.index, p.name.as_str(), p.slot, p.filesystem))
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, "boot", false, FilesystemKind::Ext2),
                (2, "home_a", true, FilesystemKind::Ext4),
                (3, "home_b", true, FilesystemKind::Ext4),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_ota_filesystem_overrides() -> Result<()> {
        let mut config = ota_config()?;
        config.channel.supported_root_filesystems = vec!["ext4".into(), "f2fs".into()];
        config.partition_map = Some(toml::from_str(
            r#"
[boot]
partlabel = "pmOS_boot"
size_mib = 256
filesystem = "fat32"

[home]
partlabel = "pmOS_home"
filesystem = "f2fs"
"#,
        )?);
        let LayoutPlan::Ota { request, .. } =
            InstallPlan::from_config(&config, TargetKind::Image)?.layout
        else {
            panic!("expected OTA layout")
        };
        assert_eq!(request.partitions[0].filesystem, FilesystemKind::Ext2);
        assert_eq!(request.partitions[1].filesystem, FilesystemKind::F2fs);

        config.channel.supported_root_filesystems = vec!["ext4".into()];
        let err = InstallPlan::from_config(&config, TargetKind::Image).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Config(_))
        ));
        Ok(())
    }

    #[test]
    fn test_ota_plan_errors() -> Result<()> {
        let mut config = ota_config()?;
        config.partition_map = None;
        assert!(InstallPlan::from_config(&config, TargetKind::Image).is_err());

        // home does not exist, only home_a and home_b
        let mut config = ota_config()?;
        config.install.full_disk_encryption = true;
        let err = InstallPlan::from_config(&config, TargetKind::Image).unwrap_err();
        assert!(err.to_string().contains("home"));

        config.install.encrypted_partition = "home_a".into();
        let plan = InstallPlan::from_config(&config, TargetKind::Image)?;
        assert!(matches!(
            plan.layout,
            LayoutPlan::Ota { encrypted: Some(ref name), .. } if name == "home_a"
        ));

        let mut config = ota_config()?;
        config.partition_map = Some(toml::from_str("[home]\npartlabel = \"pmOS_home\"\n")?);
        let err = InstallPlan::from_config(&config, TargetKind::Image).unwrap_err();
        assert!(err.to_string().contains("no boot partition"));
        Ok(())
    }
}
