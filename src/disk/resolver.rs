use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Result;

use crate::{error::ProvisionError, fs::mount::Mounter};

/// Where the install target is bound inside the execution context.
pub const INSTALL_DEVICE: &str = "/dev/install";

/// How long to wait for partition nodes to show up after partitioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            attempts: 20,
            interval: Duration::from_millis(100),
        }
    }
}

/// Node of partition `index` inside the execution context.
pub fn install_partition(index: u32) -> PathBuf {
    PathBuf::from(format!("{INSTALL_DEVICE}p{index}"))
}

fn partition_node(device: &Path, prefix: &str, index: u32) -> PathBuf {
    PathBuf::from(format!("{}{prefix}{index}", device.display()))
}

/// `/dev/mmcblk0` names its partitions `/dev/mmcblk0p1`, `/dev/sda` uses `/dev/sda1`. Probe the
/// likely one first.
fn candidate_prefixes(device: &Path) -> [&'static str; 2] {
    let ends_with_digit = device
        .to_string_lossy()
        .chars()
        .last()
        .is_some_and(|c| c.is_ascii_digit());
    if ends_with_digit {
        ["p", ""]
    } else {
        ["", "p"]
    }
}

/// Waits until every partition in `partitions` appears on the host and returns the prefix put
/// between the device path and the partition number.
pub async fn resolve_partition_prefix(
    device: &Path,
    partitions: &[u32],
    policy: PollPolicy,
) -> Result<String> {
    let prefixes = candidate_prefixes(device);
    let missing = |prefix: &str| -> Vec<PathBuf> {
        partitions
            .iter()
            .map(|&index| partition_node(device, prefix, index))
            .filter(|node| !node.exists())
            .collect()
    };

    for attempt in 0..policy.attempts {
        for prefix in prefixes {
            if missing(prefix).is_empty() {
                tracing::debug!(
                    "Found partitions {partitions:?} of {device:?} after {attempt} retries"
                );
                return Ok(prefix.to_string());
            }
        }
        tokio::time::sleep(policy.interval).await;
    }

    // Only name the scheme the device uses once some of its nodes showed up
    let mut probed: Vec<PathBuf> = prefixes
        .iter()
        .map(|prefix| missing(*prefix))
        .filter(|nodes| nodes.len() < partitions.len())
        .flatten()
        .collect();
    if probed.is_empty() {
        probed = prefixes.iter().flat_map(|prefix| missing(*prefix)).collect();
    }

    Err(ProvisionError::PartitionNodeMissing {
        device: device.to_owned(),
        probed,
    }
    .into())
}

/// Makes the partitions of `device` available as `/dev/installp<N>` inside the execution
/// context.
pub async fn bind_partition_nodes(
    mounter: &Mounter<'_>,
    device: &Path,
    prefix: &str,
    partitions: &[u32],
) -> Result<()> {
    for &index in partitions {
        mounter
            .bind_file_from_host(
                &partition_node(device, prefix, index),
                &install_partition(index),
            )
            .await?;
    }
    Ok(())
}
