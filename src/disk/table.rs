use std::path::Path;

use anyhow::Result;

use crate::{
    argv,
    fs::exec::{ExitPolicy, Executor, RunOptions},
};

/// One partition as listed in the live partition table, positions in sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionTableEntry {
    pub number: u32,
    pub start_sector: u64,
    pub end_sector: u64,
}

/// Reads the partition table of `device` inside the execution context.
///
/// A device without a (readable) partition table yields an empty list. It is up to the
/// caller to decide whether that is acceptable.
pub async fn read_partition_table(
    executor: &dyn Executor,
    device: &Path,
) -> Result<Vec<PartitionTableEntry>> {
    let output = executor
        .run_with_policy(
            &argv!["parted", "-s", "-m", device.display(), "unit", "s", "print"],
            RunOptions::default().captured(),
            ExitPolicy::FireAndVerify,
        )
        .await?;

    let entries = parse_partition_table(output.output.as_deref().unwrap_or_default());
    tracing::debug!("Partition table of {device:?}: {entries:?}");
    Ok(entries)
}

/// Parses `parted ... unit s print` output, either the human readable or the `-m` form.
pub fn parse_partition_table(output: &str) -> Vec<PartitionTableEntry> {
    let mut entries = vec![];
    let mut in_body = false;
    let mut skip_disk_line = false;

    for line in output.lines() {
        let trimmed = line.trim();
        if !in_body {
            if trimmed.starts_with("Number") {
                in_body = true;
            } else if trimmed == "BYT;" || trimmed == "CHS;" || trimmed == "CYL;" {
                // the next line describes the disk itself
                skip_disk_line = true;
            } else if skip_disk_line {
                in_body = true;
            }
            continue;
        }

        if let Some(entry) = parse_entry(trimmed) {
            entries.push(entry);
        }
    }

    entries
}

fn parse_entry(line: &str) -> Option<PartitionTableEntry> {
    let fields: Vec<&str> = if line.contains(':') {
        line.trim_end_matches(';').split(':').collect()
    } else {
        line.split_whitespace().collect()
    };
    if fields.len() < 4 {
        return None;
    }

    let sectors = |s: &str| s.trim().trim_end_matches('s').parse::<u64>().ok();
    Some(PartitionTableEntry {
        number: fields[0].trim().parse().ok()?,
        start_sector: sectors(fields[1])?,
        end_sector: sectors(fields[2])?,
    })
}
