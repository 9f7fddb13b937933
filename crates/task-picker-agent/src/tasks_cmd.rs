use anyhow::Result;

use tpa_config::TaskPickerConfig;
use tpa_core::{OutputFormat, TaskRecord, TaskState};
use tpa_extract::TaskStore;

fn visible(records: Vec<TaskRecord>, all: bool) -> Vec<TaskRecord> {
    records
        .into_iter()
        .filter(|r| all || r.state != TaskState::Archived)
        .collect()
}

pub(crate) fn handle_list(all: bool, config: &TaskPickerConfig, format: OutputFormat) -> Result<()> {
    let store = TaskStore::from_config(config);
    let records = visible(store.snapshot()?, all);

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        eprintln!("No tasks in {}.", store.path().display());
        return Ok(());
    }

    println!("{:<10}  {:<11}  {:<44}  SOURCE", "STATE", "FIRST SEEN", "TASK");
    for record in &records {
        println!(
            "{:<10}  {:<11}  {:<44}  {}",
            record.state.to_string(),
            record.first_seen.format("%Y-%m-%d").to_string(),
            record.display_text,
            record.source_ref,
        );
    }
    Ok(())
}

pub(crate) fn handle_archive(config: &TaskPickerConfig, format: OutputFormat) -> Result<()> {
    let store = TaskStore::from_config(config);
    let moved = store.lock("archive")?.archive_completed()?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "archived": moved })),
        OutputFormat::Text => eprintln!(
            "Archived {moved} completed entr{} under '{}'.",
            if moved == 1 { "y" } else { "ies" },
            config.archive_section
        ),
    }
    Ok(())
}
