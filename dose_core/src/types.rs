//! Core domain types for the Dosewatch system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Drugs and their re-dose intervals
//! - Medicine entries (logged dose-taking events)
//! - Derived availability records

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// Drug Types
// ============================================================================

/// A drug known to the catalog, with its minimum re-dose interval
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Drug {
    pub id: Uuid,
    pub name: String,
    /// Ingredient names; owned by this drug, no independent lifecycle
    #[serde(default)]
    pub ingredients: Vec<String>,
    /// Minimum hours that must elapse after a dose before the next one
    pub redose_hours: f64,
}

impl Drug {
    /// The re-dose interval as a chrono duration (second precision)
    pub fn redose_interval(&self) -> Duration {
        Duration::seconds((self.redose_hours * 3600.0) as i64)
    }
}

// ============================================================================
// Entry Types
// ============================================================================

/// One (drug, quantity) pair inside a logged entry
///
/// `drug` is a snapshot of the catalog record at logging time. When the
/// catalog entry has since been renamed or removed, the snapshot is what
/// keeps the historical dose resolvable. Legacy rows may lack it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DoseTaken {
    pub drug_id: Uuid,
    #[serde(default)]
    pub drug: Option<Drug>,
    pub quantity: f64,
}

/// A logged event of taking one or more drugs at a point in time
///
/// `taken_at` is the instant the dose was logged as taken, not necessarily
/// the instant the record was created; edits may move it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MedicineEntry {
    pub id: Uuid,
    pub taken_at: DateTime<Utc>,
    pub doses: Vec<DoseTaken>,
}

impl MedicineEntry {
    /// Build an entry taking `quantity` of `drug` at `taken_at`
    pub fn single(drug: &Drug, quantity: f64, taken_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            taken_at,
            doses: vec![DoseTaken {
                drug_id: drug.id,
                drug: Some(drug.clone()),
                quantity,
            }],
        }
    }
}

// ============================================================================
// Availability Types
// ============================================================================

/// Derived eligibility state for one drug
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DrugAvailability {
    pub drug: Drug,
    pub can_take: bool,
    /// Earliest instant the drug may be taken again; `<= computed_at`
    /// when it is currently available
    pub when: DateTime<Utc>,
}

/// Per-drug availability snapshot, recomputed wholesale on every change
///
/// This is a projection over the entry log and the catalog. It is never
/// persisted and carries no identity across computation epochs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct AvailabilityInfo {
    pub computed_at: Option<DateTime<Utc>>,
    pub by_drug: HashMap<Uuid, DrugAvailability>,
}

impl AvailabilityInfo {
    /// An empty snapshot stamped at `now`, used for the degraded path
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            computed_at: Some(now),
            by_drug: HashMap::new(),
        }
    }

    /// Drugs that may be taken right now
    pub fn available(&self) -> impl Iterator<Item = &DrugAvailability> {
        self.by_drug.values().filter(|a| a.can_take)
    }

    /// Drugs still inside their re-dose window
    pub fn pending(&self) -> impl Iterator<Item = &DrugAvailability> {
        self.by_drug.values().filter(|a| !a.can_take)
    }

    /// All records sorted by drug name, for display
    ///
    /// Ordering is a consumer concern; the computation itself keys records
    /// by drug id with no defined order.
    pub fn sorted_by_name(&self) -> Vec<&DrugAvailability> {
        let mut records: Vec<_> = self.by_drug.values().collect();
        records.sort_by(|a, b| a.drug.name.cmp(&b.drug.name).then(a.drug.id.cmp(&b.drug.id)));
        records
    }
}
