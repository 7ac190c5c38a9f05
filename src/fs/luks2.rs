use std::{path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use dialoguer::{console::Term, Password};

use crate::{
    argv,
    error::ProvisionError,
    fs::exec::{ExitPolicy, Executor, RunOptions},
    types::Passphrase,
};

/// Name of the mapping set up below `/dev/mapper/` for the encrypted partition.
pub const MAPPED_NAME: &str = "pm_crypt";

pub fn mapped_device_path() -> std::path::PathBuf {
    Path::new("/dev/mapper").join(MAPPED_NAME)
}

/// Parameters for `cryptsetup luksFormat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionRequest {
    pub cipher: String,
    pub iter_time: Duration,
}

/// Source of the passphrase for the encrypted partition.
#[async_trait]
pub trait PassphrasePrompt: Send + Sync {
    async fn passphrase(&self) -> Result<Passphrase>;
}

/// Asks on the terminal, twice.
pub struct TerminalPrompt;

#[async_trait]
impl PassphrasePrompt for TerminalPrompt {
    async fn passphrase(&self) -> Result<Passphrase> {
        if !Term::stderr().is_term() {
            bail!("Standard error is not a terminal, cannot ask for the full disk encryption passphrase");
        }

        tracing::info!(" *** TYPE IN THE FULL DISK ENCRYPTION PASSWORD (TWICE!) ***");
        let passphrase = Password::new()
            .with_prompt("Full disk encryption passphrase")
            .with_confirmation("Repeat passphrase", "The passphrases don't match")
            .interact()
            .context("Failed to read passphrase")?;
        Ok(Passphrase::from(passphrase.into_bytes()))
    }
}

/// Sets up the LUKS container on a partition and opens it at [`MAPPED_NAME`].
pub struct LuksFormatter<'a> {
    pub executor: &'a dyn Executor,
    pub prompt: &'a dyn PassphrasePrompt,
    pub verbose: bool,
}

impl LuksFormatter<'_> {
    pub fn format_command(&self, dev: &Path, request: &EncryptionRequest) -> Vec<String> {
        let mut cmd = argv!["cryptsetup"];
        if self.verbose {
            cmd.push("--debug".into());
        }
        cmd.extend(argv![
            "luksFormat",
            "-q",
            "--cipher",
            request.cipher,
            "--iter-time",
            request.iter_time.as_millis(),
            "--use-random",
            "--key-file=-",
            dev.display()
        ]);
        cmd
    }

    pub fn open_command(&self, dev: &Path) -> Vec<String> {
        let mut cmd = argv!["cryptsetup"];
        if self.verbose {
            cmd.push("--debug".into());
        }
        cmd.extend(argv!["luksOpen", "--key-file=-", dev.display(), MAPPED_NAME]);
        cmd
    }

    /// Formats `dev` as LUKS, opens it and returns the path of the mapped device as seen from
    /// inside the execution context.
    pub async fn format_and_open(
        &self,
        dev: &Path,
        request: &EncryptionRequest,
    ) -> Result<std::path::PathBuf> {
        tracing::info!("Formatting {dev:?} as LUKS volume (cipher: {})", request.cipher);

        // Avoid cryptsetup warning about missing locking directory
        self.executor
            .run_checked(&argv!["mkdir", "-p", "/run/cryptsetup"])
            .await?;

        let passphrase = self.prompt.passphrase().await?;
        if passphrase.is_empty() {
            return Err(ProvisionError::config("The encryption passphrase must not be empty").into());
        }

        self.executor
            .run_with_policy(
                &self.format_command(dev, request),
                RunOptions::default().with_input(passphrase.as_bytes()),
                ExitPolicy::Check,
            )
            .await
            .with_context(|| format!("Failed to format {dev:?} as LUKS volume"))?;

        self.executor
            .run_with_policy(
                &self.open_command(dev),
                RunOptions::default().with_input(passphrase.as_bytes()),
                ExitPolicy::Check,
            )
            .await
            .with_context(|| format!("Failed to open LUKS volume on {dev:?}"))?;

        let mapped = mapped_device_path();
        if !self.executor.host_path(&mapped).exists() {
            return Err(ProvisionError::CryptOpen { mapped }.into());
        }

        tracing::info!("Opened {dev:?} at {mapped:?}");
        Ok(mapped)
    }
}
