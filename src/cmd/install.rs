use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use async_trait::async_trait;
use dialoguer::{console::Term, Confirm};

use crate::{
    cli::InstallOptions,
    config::ConfigBundle,
    disk::resolver::PollPolicy,
    error::ProvisionError,
    fs::{
        exec::ChrootExecutor,
        loopback::{create_sparse_image, LoopBacking},
        luks2::TerminalPrompt,
    },
    install::{provision, InstallContext, InstallPlan, ProvisionReport},
    types::TargetKind,
};

use super::Globals;

pub struct InstallCommand {
    pub install_options: InstallOptions,
    pub globals: Globals,
}

impl InstallCommand {
    /// Folds the command line options into the loaded configuration.
    fn apply_overrides(&self, config: &mut ConfigBundle) {
        let options = &self.install_options;
        config.install.full_disk_encryption |= options.fde;
        if let Some(filesystem) = &options.filesystem {
            config.install.filesystem = Some(filesystem.clone());
        }
        if let Some(cipher) = &options.cipher {
            config.device.cipher = cipher.clone();
        }
        if let Some(iter_time) = options.iter_time {
            config.device.iter_time_ms = iter_time;
        }
    }

    fn target(&self) -> Result<(PathBuf, TargetKind)> {
        match (
            &self.install_options.target.device,
            &self.install_options.target.image,
        ) {
            (Some(device), None) => Ok((device.clone(), TargetKind::BlockDevice)),
            (None, Some(image)) => Ok((image.clone(), TargetKind::Image)),
            _ => bail!("Exactly one of `--device` and `--image` is required"),
        }
    }

    fn confirm(&self, target: &Path) -> Result<()> {
        if self.install_options.yes {
            return Ok(());
        }
        if !Term::stderr().is_term() {
            bail!("Standard error is not a terminal. Please use '--yes' to confirm the operation in non-interactive mode.");
        }
        if !Confirm::new()
            .with_prompt(format!(
                "All of the data on {} will be lost. Do you want to continue?",
                target.display()
            ))
            .default(false)
            .interact()?
        {
            bail!("Operation canceled");
        }
        Ok(())
    }
}

#[async_trait]
impl super::Command for InstallCommand {
    async fn run(&self) -> Result<()> {
        let mut config = self.globals.config_source.get_config().await?;
        self.apply_overrides(&mut config);

        let (target, kind) = self.target()?;
        let plan = InstallPlan::from_config(&config, kind)?;
        tracing::debug!("Install plan: {plan:?}");

        self.confirm(&target)?;

        let executor = ChrootExecutor::new(&self.install_options.chroot)?;
        let ctx = InstallContext {
            executor: &executor,
            prompt: &TerminalPrompt,
            poll: PollPolicy::default(),
            verbose: self.globals.verbose,
        };

        let report = self.provision_target(&plan, &ctx, &target, kind).await.inspect_err(|error| {
            if let Some(error) = error.downcast_ref::<ProvisionError>() {
                if error.after_point_of_no_return() {
                    tracing::warn!("{target:?} was partially written and needs to be installed again");
                }
            }
        })?;

        print_report(&report);
        Ok(())
    }
}

impl InstallCommand {
    /// Attaches image targets to a loop device first.
    async fn provision_target(
        &self,
        plan: &InstallPlan,
        ctx: &InstallContext<'_>,
        target: &Path,
        kind: TargetKind,
    ) -> Result<ProvisionReport> {
        let report = match kind {
            TargetKind::BlockDevice => provision(plan, ctx, target).await?,
            TargetKind::Image => {
                let size_mib = match self.install_options.image_size_mib {
                    Some(size) => size,
                    None if target.exists() => 0,
                    None => bail!("Image {target:?} does not exist, `--image-size-mib` is required to create it"),
                };
                let size_bytes = image_size_bytes(size_mib)?;
                create_sparse_image(target, size_bytes).await?;

                let backing = LoopBacking::attach(target).await?;
                let loop_device = backing.path()?;
                match provision(plan, ctx, &loop_device).await {
                    Ok(report) => report,
                    Err(error) => {
                        // The loop device is released once nothing uses it anymore
                        if let Err(detach_error) = backing.detach() {
                            tracing::warn!("{detach_error:#}");
                        }
                        return Err(error.context(format!(
                            "Failed to install to {target:?} ({loop_device:?})"
                        )));
                    }
                }
            }
        };
        Ok(report)
    }
}

fn image_size_bytes(size_mib: u64) -> Result<u64> {
    size_mib.checked_mul(1024 * 1024).ok_or_else(|| {
        ProvisionError::config(format!("Image size of {size_mib} MiB is too large")).into()
    })
}

fn print_report(report: &ProvisionReport) {
    for mount in &report.mounts {
        tracing::info!("Mounted {:?} on {:?}", mount.source, mount.target);
    }
    for node in &report.unmounted {
        tracing::info!("Formatted {node:?}, not mounted");
    }
}

#[cfg(test)]
pub mod tests {

    #[allow(unused_imports)]
    use super::*;

    #[test]
    fn test_image_size_bytes() {
        assert_eq!(image_size_bytes(512).ok(), Some(512 * 1024 * 1024));

        let err = image_size_bytes(u64::MAX).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProvisionError>(),
            Some(ProvisionError::Config(_))
        ));
    }
}
