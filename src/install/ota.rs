use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::{
    disk::{partition::OtaRequest, resolver::install_partition},
    fs::mkfs::FilesystemSpec,
};

use super::{InstallContext, InstallPlan, ProvisionReport, INSTALL_ROOT};

/// Directories below `/home/.pmos/var` which replace their counterparts in `/var`, so they
/// survive switching slots.
const PERSISTENT_VAR_DIRS: [&str; 3] = ["log", "lib/flatpak", "cache/apk"];

fn install_root() -> &'static Path {
    Path::new(INSTALL_ROOT)
}

/// Formats every partition of the map, mounts the active ones and sets up the writable `/etc`
/// overlay plus the persistent `/var` directories.
pub async fn format_and_mount(
    plan: &InstallPlan,
    ctx: &InstallContext<'_>,
    request: &OtaRequest,
    encrypted: Option<&str>,
    report: &mut ProvisionReport,
) -> Result<()> {
    let formatter = ctx.formatter(plan);
    let mounter = ctx.mounter();

    for partition in &request.partitions {
        let mut dev = install_partition(partition.index);
        if encrypted == Some(partition.name.as_str()) {
            if let Some(encryption) = &plan.encryption {
                dev = ctx.luks().format_and_open(&dev, encryption).await?;
            }
        }

        let spec = FilesystemSpec::new(partition.filesystem, &partition.partlabel);
        formatter.format(&dev, &spec).await?;

        match partition.mount_name() {
            Some(name) => {
                let record = mounter.mount(&dev, &install_root().join(name)).await?;
                report.mounts.push(record);
            }
            None => {
                tracing::info!("Not mounting {} (inactive slot)", partition.name);
                report.unmounted.push(dev);
            }
        }
    }

    let etc = install_root().join("etc");
    let overlay_state = install_root().join("var/lib/overlays/etc");
    report.mounts.push(mounter.overlay(&etc, &overlay_state).await?);

    let persistent = install_root().join("home/.pmos/var");
    for dir in PERSISTENT_VAR_DIRS {
        let target: PathBuf = install_root().join("var").join(dir);
        report
            .mounts
            .push(mounter.bind(&persistent.join(dir), &target).await?);
    }
    Ok(())
}
