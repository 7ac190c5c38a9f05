use std::path::Path;

use anyhow::Result;

use crate::disk::{layout::PartitionLayout, resolver::install_partition};

use super::{InstallContext, InstallPlan, ProvisionReport, INSTALL_ROOT};

/// Formats and mounts root, then boot on top of it.
pub async fn format_and_mount(
    plan: &InstallPlan,
    ctx: &InstallContext<'_>,
    layout: &PartitionLayout,
    report: &mut ProvisionReport,
) -> Result<()> {
    let formatter = ctx.formatter(plan);
    let mounter = ctx.mounter();

    let mut root_dev = install_partition(layout.root);
    if let Some(request) = &plan.encryption {
        root_dev = ctx.luks().format_and_open(&root_dev, request).await?;
    }
    formatter.format(&root_dev, &plan.root).await?;
    report
        .mounts
        .push(mounter.mount(&root_dev, Path::new(INSTALL_ROOT)).await?);

    let boot_dev = install_partition(layout.boot);
    formatter.format(&boot_dev, &plan.boot).await?;
    report.mounts.push(
        mounter
            .mount(&boot_dev, &Path::new(INSTALL_ROOT).join("boot"))
            .await?,
    );
    Ok(())
}
