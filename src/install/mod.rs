pub mod legacy;
pub mod ota;
pub mod plan;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::{
    disk::{
        layout::TableMode,
        partition::Partitioner,
        resolver::{
            bind_partition_nodes, install_partition, resolve_partition_prefix, PollPolicy,
            INSTALL_DEVICE,
        },
    },
    fs::{
        exec::Executor,
        luks2::{LuksFormatter, PassphrasePrompt},
        mkfs::Formatter,
        mount::{MountRecord, Mounter},
    },
};

pub use plan::{InstallPlan, LayoutPlan};

/// Where the new system gets mounted inside the execution context.
pub const INSTALL_ROOT: &str = "/mnt/install";

/// The collaborators of one pipeline run.
pub struct InstallContext<'a> {
    pub executor: &'a dyn Executor,
    pub prompt: &'a dyn PassphrasePrompt,
    pub poll: PollPolicy,
    /// Let the tools print debug output where they support it.
    pub verbose: bool,
}

impl<'a> InstallContext<'a> {
    pub fn formatter<'b>(&'b self, plan: &'b InstallPlan) -> Formatter<'b> {
        Formatter::new(self.executor, &plan.package_install_command, plan.target)
    }

    pub fn luks(&self) -> LuksFormatter<'_> {
        LuksFormatter {
            executor: self.executor,
            prompt: self.prompt,
            verbose: self.verbose,
        }
    }

    pub fn mounter(&self) -> Mounter<'_> {
        Mounter::new(self.executor)
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProvisionReport {
    /// Put between the device path and the partition number on the host, `"p"` or `""`.
    pub prefix: String,
    /// Partition nodes bound into the execution context.
    pub nodes: Vec<PathBuf>,
    /// Mounts in the order they were made.
    pub mounts: Vec<MountRecord>,
    /// Formatted but left unmounted, e.g. inactive slots.
    pub unmounted: Vec<PathBuf>,
}

/// Partitions `device`, formats the partitions and mounts them below [`INSTALL_ROOT`].
///
/// `device` is the block device on the host, a loop device for image installs. Running this
/// twice repartitions and reformats the device again; there is no check for previous runs.
pub async fn provision(
    plan: &InstallPlan,
    ctx: &InstallContext<'_>,
    device: &Path,
) -> Result<ProvisionReport> {
    let mounter = ctx.mounter();
    let install_device = Path::new(INSTALL_DEVICE);
    mounter
        .bind_file_from_host(device, install_device)
        .await
        .with_context(|| format!("Failed to make {device:?} available at {INSTALL_DEVICE}"))?;

    let partitioner = Partitioner::new(ctx.executor, install_device);
    let mut report = ProvisionReport::default();

    match &plan.layout {
        LayoutPlan::Legacy(request) => {
            if let TableMode::ChromeOs { .. } = request.mode {
                ctx.formatter(plan).install_packages(&["cgpt"]).await?;
            }
            let layout = partitioner.partition_legacy(request).await?;
            let used = layout.used_partitions();
            report.prefix = resolve_partition_prefix(device, &used, ctx.poll).await?;

            bind_partition_nodes(&mounter, device, &report.prefix, &used).await?;
            report.nodes = used.into_iter().map(install_partition).collect();

            legacy::format_and_mount(plan, ctx, &layout, &mut report).await?;
        }
        LayoutPlan::Ota { request, encrypted } => {
            partitioner.partition_ota(request).await?;
            let indexes: Vec<u32> = request.partitions.iter().map(|p| p.index).collect();
            report.prefix = resolve_partition_prefix(device, &indexes, ctx.poll).await?;

            bind_partition_nodes(&mounter, device, &report.prefix, &indexes).await?;
            report.nodes = indexes.into_iter().map(install_partition).collect();

            ota::format_and_mount(plan, ctx, request, encrypted.as_deref(), &mut report).await?;
        }
    }

    tracing::info!(
        "Provisioned {device:?}, {} mounts below {INSTALL_ROOT}",
        report.mounts.len()
    );
    Ok(report)
}
