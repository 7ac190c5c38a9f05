use anyhow::Result;
use async_trait::async_trait;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::*;

use crate::{
    cli::ShowTableOptions,
    disk::{
        partition::SECTORS_PER_MIB,
        table::{read_partition_table, PartitionTableEntry},
    },
    fs::exec::HostExecutor,
};

pub struct ShowTableCommand {
    pub show_table_options: ShowTableOptions,
}

#[async_trait]
impl super::Command for ShowTableCommand {
    async fn run(&self) -> Result<()> {
        let device = &self.show_table_options.device;
        let entries = read_partition_table(&HostExecutor, device).await?;

        if entries.is_empty() {
            tracing::info!("No partitions found on {device:?}");
            return Ok(());
        }
        println!("{}", partition_table(&entries));
        Ok(())
    }
}

fn partition_table(entries: &[PartitionTableEntry]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Number", "Start", "End", "Size"]);

    for entry in entries {
        let sectors = entry.end_sector + 1 - entry.start_sector;
        table.add_row(vec![
            Cell::new(entry.number),
            Cell::new(format!("{}s", entry.start_sector)),
            Cell::new(format!("{}s", entry.end_sector)),
            if sectors % SECTORS_PER_MIB == 0 {
                Cell::new(format!("{} MiB", sectors / SECTORS_PER_MIB))
            } else {
                Cell::new(format!("{sectors}s")).fg(Color::Yellow)
            },
        ]);
    }
    table
}
