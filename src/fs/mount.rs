use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};

use crate::{
    argv,
    fs::exec::{Executor, RunOptions},
};

/// A mount made inside the execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    pub source: PathBuf,
    pub target: PathBuf,
}

/// Mount helpers operating through an [`Executor`].
pub struct Mounter<'a> {
    executor: &'a dyn Executor,
}

impl<'a> Mounter<'a> {
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self { executor }
    }

    /// Mounts a device at `mountpoint` inside the execution context, creating the mountpoint.
    pub async fn mount(&self, device: &Path, mountpoint: &Path) -> Result<MountRecord> {
        tracing::info!("Mounting {device:?} to {mountpoint:?}");
        self.executor
            .run_checked(&argv!["mkdir", "-p", mountpoint.display()])
            .await?;
        self.executor
            .run_checked(&argv!["mount", device.display(), mountpoint.display()])
            .await
            .with_context(|| format!("Failed to mount {device:?} to {mountpoint:?}"))?;
        Ok(MountRecord {
            source: device.to_owned(),
            target: mountpoint.to_owned(),
        })
    }

    /// Bind mounts a directory inside the execution context onto another one.
    pub async fn bind(&self, source: &Path, target: &Path) -> Result<MountRecord> {
        tracing::info!("Bind mounting {source:?} to {target:?}");
        self.executor
            .run_checked(&argv!["mkdir", "-p", source.display(), target.display()])
            .await?;
        self.executor
            .run_checked(&argv!["mount", "--bind", source.display(), target.display()])
            .await
            .with_context(|| format!("Failed to bind mount {source:?} to {target:?}"))?;
        Ok(MountRecord {
            source: source.to_owned(),
            target: target.to_owned(),
        })
    }

    /// Makes a host file (usually a device node) visible at `target` inside the execution
    /// context. Whatever an earlier run bound at `target` is unmounted first, it may belong to
    /// another device.
    pub async fn bind_file_from_host(&self, source: &Path, target: &Path) -> Result<()> {
        let host_target = self.executor.host_path(target);

        let already_mounted = self
            .executor
            .run(
                &argv!["mountpoint", "-q", host_target.display()],
                RunOptions::host(),
            )
            .await?
            .success();
        if already_mounted {
            tracing::debug!(
                "{host_target:?} is still mounted, unmounting it before binding {source:?}"
            );
            self.executor
                .run_host_checked(&argv!["umount", host_target.display()])
                .await
                .with_context(|| format!("Failed to release the previous bind at {target:?}"))?;
        }

        tracing::debug!("Binding {source:?} to {host_target:?}");
        if let Some(parent) = host_target.parent() {
            self.executor
                .run_host_checked(&argv!["mkdir", "-p", parent.display()])
                .await?;
        }
        self.executor
            .run_host_checked(&argv!["touch", host_target.display()])
            .await?;
        self.executor
            .run_host_checked(&argv!["mount", "--bind", source.display(), host_target.display()])
            .await
            .with_context(|| format!("Failed to bind {source:?} into the chroot at {target:?}"))
    }

    /// Mounts an overlay at `target` whose upper and work directories live below `state_dir`.
    /// `upper`, `lower` and `work` are created below `state_dir`.
    pub async fn overlay(&self, target: &Path, state_dir: &Path) -> Result<MountRecord> {
        let upper = state_dir.join("upper");
        let lower = state_dir.join("lower");
        let work = state_dir.join("work");

        tracing::info!("Setting up overlay on {target:?} backed by {state_dir:?}");
        self.executor
            .run_checked(&argv![
                "mkdir",
                "-p",
                upper.display(),
                lower.display(),
                work.display(),
                target.display()
            ])
            .await?;
        self.executor
            .run_checked(&argv![
                "mount",
                "-t",
                "overlay",
                "overlay",
                "-o",
                format!(
                    "lowerdir={},upperdir={},workdir={}",
                    target.display(),
                    upper.display(),
                    work.display()
                ),
                target.display()
            ])
            .await
            .with_context(|| format!("Failed to mount overlay on {target:?}"))?;

        Ok(MountRecord {
            source: PathBuf::from("overlay"),
            target: target.to_owned(),
        })
    }
}
