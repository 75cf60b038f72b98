//! Persistence adapter interface consumed by the availability engine.
//!
//! The engine never owns storage. It reads windowed snapshots of the entry
//! log and the drug catalog through [`MedicineStore`] and relies on change
//! notifications to know when to recompute. Any backend that upholds the
//! notify-on-successful-mutation contract can sit behind the trait; the
//! in-process [`MemoryStore`] here is the reference implementation and the
//! backend the pipeline tests run against.

use crate::{MedicineEntry, Drug, Result};
use chrono::{DateTime, Utc};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;
use uuid::Uuid;

/// What part of the store changed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreChange {
    Entries,
    Drugs,
}

/// Receiving end of a store's change notifications
///
/// Dropping the listener detaches it; the store prunes dead listeners on
/// the next notification.
pub struct ChangeListener {
    rx: Receiver<StoreChange>,
}

impl ChangeListener {
    pub fn new(rx: Receiver<StoreChange>) -> Self {
        Self { rx }
    }

    /// Block until the next change, a timeout, or store shutdown
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<StoreChange, std::sync::mpsc::RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Non-blocking poll
    pub fn try_recv(&self) -> std::result::Result<StoreChange, std::sync::mpsc::TryRecvError> {
        self.rx.try_recv()
    }
}

/// Durable entry-log + drug-catalog storage with change notifications
///
/// Contract:
/// - `load_entries(Some(cutoff))` returns only entries with
///   `taken_at >= cutoff`; `None` returns everything.
/// - Every successful mutation notifies every registered listener with the
///   matching [`StoreChange`] before returning. Liveness of downstream
///   recomputation depends on this.
/// - Reads return consistent snapshots; callers never observe a half
///   applied mutation.
pub trait MedicineStore: Send + Sync {
    fn load_entries(&self, cutoff: Option<DateTime<Utc>>) -> Result<Vec<MedicineEntry>>;
    fn load_drugs(&self) -> Result<Vec<Drug>>;

    fn add_entry(&self, entry: MedicineEntry) -> Result<()>;
    fn update_entry(&self, entry: MedicineEntry) -> Result<()>;
    fn remove_entry(&self, id: Uuid) -> Result<()>;

    fn add_drug(&self, drug: Drug) -> Result<()>;
    fn update_drug(&self, drug: Drug) -> Result<()>;
    fn remove_drug(&self, id: Uuid) -> Result<()>;

    /// Register a change listener; fires for every subsequent mutation
    fn subscribe_changes(&self) -> ChangeListener;
}

/// Shared listener registry used by store implementations
///
/// Send failures mean the receiving side was dropped, so senders are
/// pruned as they fail.
pub(crate) struct ListenerSet {
    senders: Mutex<Vec<Sender<StoreChange>>>,
}

impl ListenerSet {
    pub(crate) fn new() -> Self {
        Self {
            senders: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn attach(&self) -> ChangeListener {
        let (tx, rx) = channel();
        self.senders.lock().unwrap().push(tx);
        ChangeListener::new(rx)
    }

    pub(crate) fn notify(&self, change: StoreChange) {
        let mut senders = self.senders.lock().unwrap();
        senders.retain(|tx| tx.send(change).is_ok());
    }

    /// Count of registered senders; dead ones linger until the next notify
    pub(crate) fn len(&self) -> usize {
        self.senders.lock().unwrap().len()
    }
}

/// In-memory store, primarily for tests and as the pluggability reference
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<Vec<MedicineEntry>>,
    drugs: Mutex<Vec<Drug>>,
    listeners: ListenerSet,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            drugs: Mutex::new(Vec::new()),
            listeners: ListenerSet::new(),
        }
    }

    /// Number of live change listeners; used to assert teardown in tests
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for ListenerSet {
    fn default() -> Self {
        Self::new()
    }
}

impl MedicineStore for MemoryStore {
    fn load_entries(&self, cutoff: Option<DateTime<Utc>>) -> Result<Vec<MedicineEntry>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|e| cutoff.map_or(true, |c| e.taken_at >= c))
            .cloned()
            .collect())
    }

    fn load_drugs(&self) -> Result<Vec<Drug>> {
        Ok(self.drugs.lock().unwrap().clone())
    }

    fn add_entry(&self, entry: MedicineEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry);
        self.listeners.notify(StoreChange::Entries);
        Ok(())
    }

    fn update_entry(&self, entry: MedicineEntry) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        match entries.iter_mut().find(|e| e.id == entry.id) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
        drop(entries);
        self.listeners.notify(StoreChange::Entries);
        Ok(())
    }

    fn remove_entry(&self, id: Uuid) -> Result<()> {
        self.entries.lock().unwrap().retain(|e| e.id != id);
        self.listeners.notify(StoreChange::Entries);
        Ok(())
    }

    fn add_drug(&self, drug: Drug) -> Result<()> {
        self.drugs.lock().unwrap().push(drug);
        self.listeners.notify(StoreChange::Drugs);
        Ok(())
    }

    fn update_drug(&self, drug: Drug) -> Result<()> {
        let mut drugs = self.drugs.lock().unwrap();
        match drugs.iter_mut().find(|d| d.id == drug.id) {
            Some(existing) => *existing = drug,
            None => drugs.push(drug),
        }
        drop(drugs);
        self.listeners.notify(StoreChange::Drugs);
        Ok(())
    }

    fn remove_drug(&self, id: Uuid) -> Result<()> {
        self.drugs.lock().unwrap().retain(|d| d.id != id);
        self.listeners.notify(StoreChange::Drugs);
        Ok(())
    }

    fn subscribe_changes(&self) -> ChangeListener {
        self.listeners.attach()
    }
}
