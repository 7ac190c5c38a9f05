use std::{fmt::Display, path::Path};

use anyhow::{bail, Context as _, Result};

use crate::{
    argv,
    disk::{
        layout::{OtaPartition, PartitionLayout, TableMode},
        table::{read_partition_table, PartitionTableEntry},
    },
    error::ProvisionError,
    fs::exec::{ExitPolicy, Executor, RunOptions},
    types::{FilesystemKind, PartitionTableType},
};

/// Sector size assumed for all sector arithmetic.
pub const SECTOR_SIZE: u64 = 512;
pub const SECTORS_PER_MIB: u64 = 1024 * 1024 / SECTOR_SIZE;

/// A partition boundary in the notation `parted` understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boundary {
    Sector(u64),
    MiB(u64),
    /// End of the disk.
    End,
}

impl Display for Boundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Boundary::Sector(s) => write!(f, "{s}s"),
            Boundary::MiB(m) => write!(f, "{m}M"),
            Boundary::End => write!(f, "100%"),
        }
    }
}

pub type Span = (Boundary, Boundary);

/// Where the partitions of the legacy layout begin and end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyBoundaries {
    pub boot: Span,
    pub reserve: Option<Span>,
    pub root: Span,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyRequest {
    pub boot_size_mib: u64,
    /// Size of the empty partition between boot and root, may be zero.
    pub reserve_size_mib: u64,
    pub boot_filesystem: FilesystemKind,
    pub mode: TableMode,
}

impl LegacyRequest {
    pub fn layout(&self) -> PartitionLayout {
        PartitionLayout::new(&self.mode, self.reserve_size_mib > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtaRequest {
    pub table_type: PartitionTableType,
    pub boot_part_start: u64,
    pub partitions: Vec<OtaPartition>,
}

fn size_out_of_range() -> anyhow::Error {
    ProvisionError::config("The requested partition sizes exceed the addressable range").into()
}

fn add(a: u64, b: u64) -> Result<u64> {
    a.checked_add(b).ok_or_else(size_out_of_range)
}

fn mib_to_sectors(mib: u64) -> Result<u64> {
    mib.checked_mul(SECTORS_PER_MIB).ok_or_else(size_out_of_range)
}

/// Computes the boundaries of boot, reserve and root.
///
/// With a preserved table, `existing` must hold the bootloader partition as its first entry;
/// the boot partition starts right after it.
pub fn legacy_boundaries(
    request: &LegacyRequest,
    existing: &[PartitionTableEntry],
) -> Result<LegacyBoundaries> {
    let boot = request.boot_size_mib;
    let reserve = request.reserve_size_mib;
    let root_offset_mib = add(boot, reserve)?;

    let boundaries = match request.mode {
        TableMode::Fresh {
            boot_part_start, ..
        } => LegacyBoundaries {
            boot: (Boundary::Sector(boot_part_start), Boundary::MiB(boot)),
            reserve: (reserve > 0)
                .then_some((Boundary::MiB(boot), Boundary::MiB(root_offset_mib))),
            root: (Boundary::MiB(root_offset_mib), Boundary::End),
        },
        TableMode::PreserveExisting => {
            let Some(kept) = existing.first() else {
                return Err(ProvisionError::config("No existing partition to preserve").into());
            };
            let start = add(kept.end_sector, 1)?;
            let reserve_start = add(start, mib_to_sectors(boot)?)?;
            let root_start = add(start, mib_to_sectors(root_offset_mib)?)?;
            LegacyBoundaries {
                boot: (Boundary::Sector(start), Boundary::Sector(reserve_start - 1)),
                reserve: (reserve > 0).then_some((
                    Boundary::Sector(reserve_start),
                    Boundary::Sector(root_start - 1),
                )),
                root: (Boundary::Sector(root_start), Boundary::End),
            }
        }
        TableMode::ChromeOs { .. } => bail!("ChromeOS layouts are partitioned with cgpt"),
    };
    Ok(boundaries)
}

fn parted(device: &Path, subcommand: Vec<String>) -> Vec<String> {
    let mut cmd = argv!["parted", "-s", device.display()];
    cmd.extend(subcommand);
    cmd
}

/// The commands writing the legacy layout with `parted`.
pub fn legacy_commands(
    device: &Path,
    request: &LegacyRequest,
    existing: &[PartitionTableEntry],
) -> Result<Vec<Vec<String>>> {
    let bounds = legacy_boundaries(request, existing)?;
    let layout = request.layout();
    let mut commands = vec![];

    match request.mode {
        TableMode::Fresh { table_type, .. } => {
            commands.push(parted(device, argv!["mktable", table_type]));
        }
        TableMode::PreserveExisting => {
            // Remove what a previous install left behind, keep the bootloader
            let mut stale: Vec<u32> = existing.iter().skip(1).map(|e| e.number).collect();
            stale.sort_unstable_by(|a, b| b.cmp(a));
            for number in stale {
                commands.push(parted(device, argv!["rm", number]));
            }
        }
        TableMode::ChromeOs { .. } => bail!("ChromeOS layouts are partitioned with cgpt"),
    }

    commands.push(parted(
        device,
        argv![
            "mkpart",
            "primary",
            request.boot_filesystem,
            bounds.boot.0,
            bounds.boot.1
        ],
    ));
    if let Some((start, end)) = bounds.reserve {
        commands.push(parted(device, argv!["mkpart", "primary", start, end]));
    }
    commands.push(parted(
        device,
        argv!["mkpart", "primary", bounds.root.0, bounds.root.1],
    ));
    commands.push(parted(device, argv!["set", layout.boot, "boot", "on"]));

    Ok(commands)
}

/// The commands writing the ChromeOS layout with `cgpt`. `device_sectors` is the size of the
/// whole device as reported by `blockdev --getsz`.
pub fn chromeos_commands(
    device: &Path,
    request: &LegacyRequest,
    device_sectors: u64,
) -> Result<Vec<Vec<String>>> {
    let TableMode::ChromeOs {
        kpart_start,
        kpart_size,
    } = request.mode
    else {
        bail!("Not a ChromeOS layout")
    };
    let layout = request.layout();
    let kernel = layout.kernel.context("ChromeOS layout without kernel partition")?;

    let boot_start = add(kpart_start, kpart_size)?;
    let boot_sectors = mib_to_sectors(request.boot_size_mib)?;
    let root_start = add(
        add(boot_start, boot_sectors)?,
        mib_to_sectors(request.reserve_size_mib)?,
    )?;
    let root_sectors = device_sectors
        .checked_sub(add(root_start, 1024)?)
        .filter(|s| *s > 0)
        .ok_or_else(|| {
            ProvisionError::config(format!(
                "Device with {device_sectors} sectors is too small for the requested layout"
            ))
        })?;

    let dev = device.display().to_string();
    Ok(vec![
        parted(device, argv!["mktable", "gpt"]),
        argv!["cgpt", "create", dev],
        argv![
            "cgpt", "add", "-i", layout.boot, "-t", "data", "-b", boot_start, "-s", boot_sectors,
            "-l", "pmOS_boot", dev
        ],
        // Mark this partition as bootable for u-boot
        parted(device, argv!["set", layout.boot, "boot", "on"]),
        // cgpt resets all flags once a partition is marked bootable, so the kernel partition
        // has to come after the boot flag
        argv![
            "cgpt", "add", "-i", kernel, "-t", "kernel", "-b", kpart_start, "-s", kpart_size,
            "-l", "pmOS_kernel", "-S", 1, "-T", 5, "-P", 10, dev
        ],
        argv![
            "cgpt", "add", "-i", layout.root, "-t", "data", "-b", root_start, "-s", root_sectors,
            "-l", "pmOS_root", dev
        ],
        argv!["partx", "-a", dev],
    ])
}

/// Start and end of each entry of an OTA partition map, laid out one after another.
pub fn ota_boundaries(request: &OtaRequest) -> Result<Vec<Span>> {
    let mut spans = vec![];
    let mut offset_mib = 0;
    let count = request.partitions.len();

    for (i, partition) in request.partitions.iter().enumerate() {
        let start = if i == 0 {
            Boundary::Sector(request.boot_part_start)
        } else {
            Boundary::MiB(offset_mib)
        };
        let end = match partition.size_mib {
            Some(size) => {
                offset_mib = add(offset_mib, size)?;
                Boundary::MiB(offset_mib)
            }
            None if i + 1 == count => Boundary::End,
            None => {
                return Err(ProvisionError::config(format!(
                    "Partition {} has no size, only the last partition may fill the rest of the disk",
                    partition.name
                ))
                .into())
            }
        };
        spans.push((start, end));
    }
    Ok(spans)
}

/// The commands writing an OTA partition map with `parted`.
pub fn ota_commands(device: &Path, request: &OtaRequest) -> Result<Vec<Vec<String>>> {
    let spans = ota_boundaries(request)?;
    let mut commands = vec![parted(device, argv!["mktable", request.table_type])];

    for (partition, (start, end)) in request.partitions.iter().zip(spans) {
        let mut mkpart = argv!["mkpart", "primary"];
        if partition.is_boot() {
            mkpart.push(partition.filesystem.to_string());
        }
        mkpart.extend(argv![start, end]);
        commands.push(parted(device, mkpart));

        if request.table_type == PartitionTableType::Gpt {
            commands.push(parted(
                device,
                argv!["name", partition.index, partition.partlabel],
            ));
        }
    }

    let boot = request
        .partitions
        .iter()
        .find(|p| p.is_boot())
        .ok_or_else(|| ProvisionError::config("The partition map has no boot partition"))?;
    commands.push(parted(device, argv!["set", boot.index, "boot", "on"]));

    Ok(commands)
}

/// Writes partition tables on the install device inside the execution context.
pub struct Partitioner<'a> {
    executor: &'a dyn Executor,
    device: &'a Path,
}

impl<'a> Partitioner<'a> {
    pub fn new(executor: &'a dyn Executor, device: &'a Path) -> Self {
        Self { executor, device }
    }

    /// Partitions with the legacy layout and returns the partition indexes.
    pub async fn partition_legacy(&self, request: &LegacyRequest) -> Result<PartitionLayout> {
        let layout = request.layout();
        tracing::info!(
            "Partitioning {:?} (boot: {}M, reserved: {}M, root: the rest)",
            self.device,
            request.boot_size_mib,
            request.reserve_size_mib
        );

        let commands = match request.mode {
            TableMode::Fresh { .. } => legacy_commands(self.device, request, &[])?,
            TableMode::PreserveExisting => {
                // The device may have been resized, move the backup GPT header to its end
                self.executor
                    .run_with_policy(
                        &argv![
                            "sfdisk",
                            "--relocate",
                            "gpt-bak-std",
                            self.device.display()
                        ],
                        RunOptions::default(),
                        ExitPolicy::FireAndVerify,
                    )
                    .await?;

                let existing = read_partition_table(self.executor, self.device).await?;
                if existing.is_empty() {
                    return Err(ProvisionError::PreservedTableEmpty {
                        device: self.device.to_owned(),
                    }
                    .into());
                }
                tracing::info!(
                    "Preserving partition {} ending at sector {}",
                    existing[0].number,
                    existing[0].end_sector
                );
                legacy_commands(self.device, request, &existing)?
            }
            TableMode::ChromeOs { .. } => {
                let sectors = self
                    .executor
                    .run_output(&argv!["blockdev", "--getsz", self.device.display()])
                    .await?;
                let sectors = sectors
                    .trim()
                    .parse::<u64>()
                    .with_context(|| format!("Unexpected output of blockdev: {sectors:?}"))?;
                chromeos_commands(self.device, request, sectors)?
            }
        };

        self.issue(commands).await?;
        Ok(layout)
    }

    pub async fn partition_ota(&self, request: &OtaRequest) -> Result<()> {
        tracing::info!(
            "Partitioning {:?} with partition map: {:?}",
            self.device,
            request
                .partitions
                .iter()
                .map(|p| p.name.as_str())
                .collect::<Vec<_>>()
        );
        let commands = ota_commands(self.device, request)?;
        self.issue(commands).await
    }

    /// Runs each command on its own. `parted` sometimes fails to inform the kernel about the
    /// new table while having written it just fine, so the outcome is checked by looking for
    /// the partition nodes afterwards.
    async fn issue(&self, commands: Vec<Vec<String>>) -> Result<()> {
        tracing::warn!(
            "Writing partition table to {:?}, existing data on it will be lost",
            self.device
        );
        for command in commands {
            self.executor
                .run_with_policy(&command, RunOptions::default(), ExitPolicy::FireAndVerify)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod tests {

    #[allow(unused_imports)]
    use super::*;
    use crate::fs::exec::tests::RecordingExecutor;
    use anyhow::Result;
    use rstest::rstest;

    const DEV: &str = "/dev/install";

    fn fresh(boot: u64, reserve: u64) -> LegacyRequest {
        LegacyRequest {
            boot_size_mib: boot,
            reserve_size_mib: reserve,
            boot_filesystem: FilesystemKind::Ext2,
            mode: TableMode::Fresh {
                table_type: PartitionTableType::Msdos,
                boot_part_start: 2048,
            },
        }
    }

    fn preserve(boot: u64, reserve: u64) -> LegacyRequest {
        LegacyRequest {
            mode: TableMode::PreserveExisting,
            ..fresh(boot, reserve)
        }
    }

    fn entry(number: u32, start_sector: u64, end_sector: u64) -> PartitionTableEntry {
        PartitionTableEntry {
            number,
            start_sector,
            end_sector,
        }
    }

    #[rstest]
    #[case(256, 0)]
    #[case(128, 0)]
    #[case(256, 1)]
    #[case(100, 1024)]
    #[case(1, 1)]
    fn test_root_starts_after_boot_and_reserve(#[case] boot: u64, #[case] reserve: u64) -> Result<()> {
        let bounds = legacy_boundaries(&fresh(boot, reserve), &[])?;
        assert_eq!(bounds.root, (Boundary::MiB(boot + reserve), Boundary::End));
        assert_eq!(bounds.reserve.is_some(), reserve > 0);

        let existing = [entry(1, 2048, 411647)];
        let bounds = legacy_boundaries(&preserve(boot, reserve), &existing)?;
        assert_eq!(
            bounds.root,
            (
                Boundary::Sector(411648 + (boot + reserve) * SECTORS_PER_MIB),
                Boundary::End
            )
        );
        Ok(())
    }

    #[test]
    fn test_preserved_boot_start() -> Result<()> {
        let bounds = legacy_boundaries(&preserve(256, 0), &[entry(1, 2048, 411647)])?;
        assert_eq!(bounds.boot.0, Boundary::Sector(411648));
        assert_eq!(bounds.boot.1, Boundary::Sector(411648 + 256 * 2048 - 1));

        let Boundary::Sector(start) = bounds.boot.0 else {
            panic!("boot should start at a sector boundary")
        };
        assert!(start > 411647);
        Ok(())
    }

    #[test]
    fn test_fresh_commands() -> Result<()> {
        let commands: Vec<String> = legacy_commands(Path::new(DEV), &fresh(256, 64), &[])?
            .into_iter()
            .map(|c| c.join(" "))
            .collect();
        assert_eq!(
            commands,
            vec![
                "parted -s /dev/install mktable msdos",
                "parted -s /dev/install mkpart primary ext2 2048s 256M",
                "parted -s /dev/install mkpart primary 256M 320M",
                "parted -s /dev/install mkpart primary 320M 100%",
                "parted -s /dev/install set 1 boot on",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_preserve_commands_remove_stale_partitions() -> Result<()> {
        let existing = [
            entry(1, 2048, 411647),
            entry(2, 411648, 935935),
            entry(3, 935936, 62333951),
        ];
        let commands: Vec<String> = legacy_commands(Path::new(DEV), &preserve(256, 0), &existing)?
            .into_iter()
            .map(|c| c.join(" "))
            .collect();
        assert_eq!(
            commands,
            vec![
                "parted -s /dev/install rm 3",
                "parted -s /dev/install rm 2",
                "parted -s /dev/install mkpart primary ext2 411648s 935935s",
                "parted -s /dev/install mkpart primary 935936s 100%",
                "parted -s /dev/install set 2 boot on",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_chromeos_commands() -> Result<()> {
        let request = LegacyRequest {
            mode: TableMode::ChromeOs {
                kpart_start: 8192,
                kpart_size: 32768,
            },
            ..fresh(256, 0)
        };
        let commands = chromeos_commands(Path::new(DEV), &request, 4_000_000)?;
        let joined: Vec<String> = commands.iter().map(|c| c.join(" ")).collect();
        assert_eq!(joined[0], "parted -s /dev/install mktable gpt");
        assert_eq!(
            joined[2],
            "cgpt add -i 2 -t data -b 40960 -s 524288 -l pmOS_boot /dev/install"
        );
        assert_eq!(joined[3], "parted -s /dev/install set 2 boot on");
        assert!(joined[4].starts_with("cgpt add -i 1 -t kernel -b 8192 -s 32768"));
        // 4_000_000 - (40960 + 524288) - 1024
        assert_eq!(
            joined[5],
            "cgpt add -i 3 -t data -b 565248 -s 3433728 -l pmOS_root /dev/install"
        );
        assert_eq!(joined[6], "partx -a /dev/install");

        assert!(chromeos_commands(Path::new(DEV), &request, 500_000).is_err());
        Ok(())
    }

    fn ota_partition(index: u32, name: &str, size_mib: Option<u64>) -> OtaPartition {
        OtaPartition {
            index,
            name: name.into(),
            partlabel: format!("pmOS_{name}"),
            slot: name.ends_with("_a") || name.ends_with("_b"),
            size_mib,
            filesystem: if name == "boot" {
                FilesystemKind::Ext2
            } else {
                FilesystemKind::Ext4
            },
        }
    }

    #[test]
    fn test_ota_commands() -> Result<()> {
        let request = OtaRequest {
            table_type: PartitionTableType::Gpt,
            boot_part_start: 2048,
            partitions: vec![
                ota_partition(1, "boot", Some(256)),
                ota_partition(2, "system_a", Some(2048)),
                ota_partition(3, "system_b", Some(2048)),
                ota_partition(4, "home", None),
            ],
        };
        let commands: Vec<String> = ota_commands(Path::new(DEV), &request)?
            .into_iter()
            .map(|c| c.join(" "))
            .collect();
        assert_eq!(
            commands,
            vec![
                "parted -s /dev/install mktable gpt",
                "parted -s /dev/install mkpart primary ext2 2048s 256M",
                "parted -s /dev/install name 1 pmOS_boot",
                "parted -s /dev/install mkpart primary 256M 2304M",
                "parted -s /dev/install name 2 pmOS_system_a",
                "parted -s /dev/install mkpart primary 2304M 4352M",
                "parted -s /dev/install name 3 pmOS_system_b",
                "parted -s /dev/install mkpart primary 4352M 100%",
                "parted -s /dev/install name 4 pmOS_home",
                "parted -s /dev/install set 1 boot on",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_ota_unsized_partition_must_be_last() {
        let request = OtaRequest {
            table_type: PartitionTableType::Msdos,
            boot_part_start: 2048,
            partitions: vec![
                ota_partition(1, "boot", Some(256)),
                ota_partition(2, "home", None),
                ota_partition(3, "system", Some(1024)),
            ],
        };
        let err = ota_boundaries(&request).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Config(_))
        ));
    }

    #[test]
    fn test_huge_sizes_are_config_errors() {
        let is_config_error = |err: anyhow::Error| {
            matches!(
                err.downcast_ref::<ProvisionError>(),
                Some(ProvisionError::Config(_))
            )
        };

        assert!(is_config_error(
            legacy_boundaries(&fresh(u64::MAX, 1), &[]).unwrap_err()
        ));
        assert!(is_config_error(
            legacy_boundaries(&preserve(u64::MAX / 1024, 0), &[entry(1, 2048, 411647)])
                .unwrap_err()
        ));

        let request = LegacyRequest {
            mode: TableMode::ChromeOs {
                kpart_start: u64::MAX,
                kpart_size: 32768,
            },
            ..fresh(256, 0)
        };
        assert!(is_config_error(
            chromeos_commands(Path::new(DEV), &request, 4_000_000).unwrap_err()
        ));

        let request = OtaRequest {
            table_type: PartitionTableType::Gpt,
            boot_part_start: 2048,
            partitions: vec![
                ota_partition(1, "boot", Some(u64::MAX)),
                ota_partition(2, "home", Some(1)),
            ],
        };
        assert!(is_config_error(ota_boundaries(&request).unwrap_err()));
    }

    #[tokio::test]
    async fn test_preserve_with_empty_table_is_fatal_before_writing() -> Result<()> {
        let executor = RecordingExecutor::new("/nonexistent");

        let err = Partitioner::new(&executor, Path::new(DEV))
            .partition_legacy(&preserve(256, 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::PreservedTableEmpty { .. })
        ));
        assert_eq!(
            executor.joined(),
            vec![
                "sfdisk --relocate gpt-bak-std /dev/install",
                "parted -s -m /dev/install unit s print",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_partition_failures_are_not_fatal() -> Result<()> {
        // parted complains about not being able to inform the kernel
        let executor = RecordingExecutor::new("/nonexistent")
            .respond(|argv, _| (argv[0] == "parted").then(|| (1, String::new())));

        let layout = Partitioner::new(&executor, Path::new(DEV))
            .partition_legacy(&fresh(256, 0))
            .await?;
        assert_eq!(layout.boot, 1);
        assert_eq!(layout.root, 2);
        assert_eq!(executor.argvs().len(), 4);
        Ok(())
    }

    #[tokio::test]
    async fn test_preserve_reads_table_before_partitioning() -> Result<()> {
        let executor = RecordingExecutor::new("/nonexistent").respond(|argv, _| {
            argv.contains(&"print".to_string()).then(|| {
                (
                    0,
                    "BYT;\n/dev/install:62333952s:sd/mmc:512:512:msdos:SD:;\n1:2048s:411647s:409600s:fat32::;\n"
                        .to_string(),
                )
            })
        });

        let layout = Partitioner::new(&executor, Path::new(DEV))
            .partition_legacy(&preserve(256, 0))
            .await?;
        assert_eq!(layout.boot, 2);
        assert_eq!(layout.root, 3);
        assert_eq!(
            executor.joined()[2],
            "parted -s /dev/install mkpart primary ext2 411648s 935935s"
        );
        Ok(())
    }
}
