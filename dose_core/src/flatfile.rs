//! Flat-file store: JSONL entry log plus a JSON catalog file.
//!
//! Entries are appended to a JSON Lines file with file locking so
//! concurrent processes stay safe; updates and removals rewrite the log
//! atomically (temp file, sync, rename). The drug catalog is a single
//! JSON document written the same way.

use crate::store::{ChangeListener, ListenerSet, MedicineStore, StoreChange};
use crate::{Drug, Error, MedicineEntry, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

/// Durable [`MedicineStore`] over a data directory
pub struct FlatFileStore {
    entries_path: PathBuf,
    drugs_path: PathBuf,
    listeners: ListenerSet,
}

impl FlatFileStore {
    /// Open a store rooted at `data_dir` (created lazily on first write)
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            entries_path: data_dir.join("entries.jsonl"),
            drugs_path: data_dir.join("drugs.json"),
            listeners: ListenerSet::new(),
        }
    }

    pub fn entries_path(&self) -> &Path {
        &self.entries_path
    }

    pub fn drugs_path(&self) -> &Path {
        &self.drugs_path
    }

    fn ensure_parent_dir(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Read every parsable entry; corrupt lines are skipped with a warning
    fn read_all_entries(&self) -> Result<Vec<MedicineEntry>> {
        if !self.entries_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.entries_path)?;
        file.lock_shared()?;

        let reader = BufReader::new(&file);
        let mut entries = Vec::new();

        for (line_num, line_result) in reader.lines().enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<MedicineEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Failed to parse entry at line {}: {}", line_num + 1, e);
                    // Continue reading, don't fail completely
                }
            }
        }

        file.unlock()?;
        tracing::debug!("Read {} entries from {:?}", entries.len(), self.entries_path);
        Ok(entries)
    }

    /// Rewrite the whole entry log atomically
    fn write_all_entries(&self, entries: &[MedicineEntry]) -> Result<()> {
        let mut contents = String::new();
        for entry in entries {
            contents.push_str(&serde_json::to_string(entry)?);
            contents.push('\n');
        }
        write_atomic(&self.entries_path, contents.as_bytes())
    }

    fn read_all_drugs(&self) -> Result<Vec<Drug>> {
        if !self.drugs_path.exists() {
            return Ok(Vec::new());
        }

        let file = match File::open(&self.drugs_path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(
                    "Unable to open catalog file {:?}: {}. Treating as empty.",
                    self.drugs_path,
                    e
                );
                return Ok(Vec::new());
            }
        };

        file.lock_shared()?;
        let mut contents = String::new();
        let mut reader = BufReader::new(&file);
        let read_result = reader.read_to_string(&mut contents);
        file.unlock()?;
        read_result?;

        match serde_json::from_str::<Vec<Drug>>(&contents) {
            Ok(drugs) => Ok(drugs),
            Err(e) => {
                tracing::warn!(
                    "Failed to parse catalog file {:?}: {}. Treating as empty.",
                    self.drugs_path,
                    e
                );
                Ok(Vec::new())
            }
        }
    }

    fn write_all_drugs(&self, drugs: &[Drug]) -> Result<()> {
        let contents = serde_json::to_string(drugs)?;
        write_atomic(&self.drugs_path, contents.as_bytes())
    }
}

/// Write bytes to `path` via a locked temp file and an atomic rename
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    FlatFileStore::ensure_parent_dir(path)?;

    let parent = path
        .parent()
        .ok_or_else(|| Error::Store(format!("{:?} has no parent directory", path)))?;
    let temp = NamedTempFile::new_in(parent)?;

    temp.as_file().lock_exclusive()?;
    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        writer.write_all(bytes)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

impl MedicineStore for FlatFileStore {
    fn load_entries(&self, cutoff: Option<DateTime<Utc>>) -> Result<Vec<MedicineEntry>> {
        let entries = self.read_all_entries()?;
        Ok(entries
            .into_iter()
            .filter(|e| cutoff.map_or(true, |c| e.taken_at >= c))
            .collect())
    }

    fn load_drugs(&self) -> Result<Vec<Drug>> {
        self.read_all_drugs()
    }

    fn add_entry(&self, entry: MedicineEntry) -> Result<()> {
        Self::ensure_parent_dir(&self.entries_path)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.entries_path)?;
        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(&entry)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        file.unlock()?;

        tracing::debug!("Appended entry {} to log", entry.id);
        self.listeners.notify(StoreChange::Entries);
        Ok(())
    }

    fn update_entry(&self, entry: MedicineEntry) -> Result<()> {
        let mut entries = self.read_all_entries()?;
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        self.write_all_entries(&entries)?;
        self.listeners.notify(StoreChange::Entries);
        Ok(())
    }

    fn remove_entry(&self, id: Uuid) -> Result<()> {
        let mut entries = self.read_all_entries()?;
        entries.retain(|e| e.id != id);
        self.write_all_entries(&entries)?;
        self.listeners.notify(StoreChange::Entries);
        Ok(())
    }

    fn add_drug(&self, drug: Drug) -> Result<()> {
        let mut drugs = self.read_all_drugs()?;
        drugs.push(drug);
        self.write_all_drugs(&drugs)?;
        self.listeners.notify(StoreChange::Drugs);
        Ok(())
    }

    fn update_drug(&self, drug: Drug) -> Result<()> {
        let mut drugs = self.read_all_drugs()?;
        match drugs.iter_mut().find(|d| d.id == drug.id) {
            Some(existing) => *existing = drug,
            None => drugs.push(drug),
        }
        self.write_all_drugs(&drugs)?;
        self.listeners.notify(StoreChange::Drugs);
        Ok(())
    }

    fn remove_drug(&self, id: Uuid) -> Result<()> {
        let mut drugs = self.read_all_drugs()?;
        drugs.retain(|d| d.id != id);
        self.write_all_drugs(&drugs)?;
        self.listeners.notify(StoreChange::Drugs);
        Ok(())
    }

    fn subscribe_changes(&self) -> ChangeListener {
        self.listeners.attach()
    }
}
