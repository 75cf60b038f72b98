//! CSV export of the entry log.
//!
//! Flattens entries into one row per dose pair for spreadsheets or
//! hand-off to other tooling. The export is a reporting artifact; the
//! JSONL log stays the source of truth.

use crate::store::MedicineStore;
use crate::{MedicineEntry, Result};
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    entry_id: String,
    taken_at: String,
    drug_id: String,
    drug_name: Option<String>,
    quantity: f64,
    redose_hours: Option<f64>,
}

fn rows_for(entry: &MedicineEntry) -> Vec<CsvRow> {
    entry
        .doses
        .iter()
        .map(|dose| CsvRow {
            entry_id: entry.id.to_string(),
            taken_at: entry.taken_at.to_rfc3339(),
            drug_id: dose.drug_id.to_string(),
            drug_name: dose.drug.as_ref().map(|d| d.name.clone()),
            quantity: dose.quantity,
            redose_hours: dose.drug.as_ref().map(|d| d.redose_hours),
        })
        .collect()
}

/// Export the full entry log to `csv_path`, overwriting any prior export
///
/// Returns the number of dose rows written.
pub fn entries_to_csv(store: &dyn MedicineStore, csv_path: &Path) -> Result<usize> {
    let entries = store.load_entries(None)?;

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = csv::Writer::from_path(csv_path)?;
    let mut count = 0;
    for entry in &entries {
        for row in rows_for(entry) {
            writer.serialize(row)?;
            count += 1;
        }
    }
    writer.flush()?;

    tracing::info!("Exported {} dose rows to {:?}", count, csv_path);
    Ok(count)
}
