use std::path::PathBuf;

use clap::{Args, Parser};

use crate::build::CLAP_LONG_VERSION;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[clap(long_version = CLAP_LONG_VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[clap(long, short = 'c')]
    /// Path to the directory where to load configuration files. Default value is /etc/diskpilot.
    pub config_dir: Option<String>,

    /// Print debug logs and let the tools print theirs.
    #[clap(long, short = 'v', default_value = "false")]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
pub enum Command {
    /// Partition, format and mount a device or image for a new install.
    #[command(name = "install")]
    Install(InstallOptions),

    /// Show the partition table of a device.
    #[command(name = "show-table")]
    ShowTable(ShowTableOptions),

    /// Dump all the config to a config bundle.
    #[command(name = "dump-config")]
    DumpConfig,
}

#[derive(Parser, Debug)]
pub struct InstallOptions {
    #[command(flatten)]
    pub target: TargetOptions,

    /// Root directory of the chroot in which the tools are run.
    #[clap(long)]
    pub chroot: PathBuf,

    /// Size of the image file in MiB, only used when it has to be created.
    #[clap(long, requires = "image")]
    pub image_size_mib: Option<u64>,

    /// Encrypt the root partition (or the configured partition of an OTA layout).
    #[clap(long, default_value = "false")]
    pub fde: bool,

    /// Root filesystem, overrides the one in the config files.
    #[clap(long)]
    pub filesystem: Option<String>,

    /// Cipher of the encrypted partition.
    #[clap(long)]
    pub cipher: Option<String>,

    /// PBKDF iteration time of the encrypted partition in milliseconds.
    #[clap(long)]
    pub iter_time: Option<u64>,

    /// Skip confirmation prompts.
    #[clap(long, short = 'y', default_value = "false")]
    pub yes: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct TargetOptions {
    /// Block device to install to, e.g. /dev/mmcblk0.
    #[clap(long)]
    pub device: Option<PathBuf>,

    /// Image file to install to. It is attached as a loop device.
    #[clap(long)]
    pub image: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct ShowTableOptions {
    /// The device to read the partition table from.
    pub device: PathBuf,
}
