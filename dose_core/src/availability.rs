//! Availability calculator.
//!
//! The pure core of the system: fold a window of logged entries and the
//! drug catalog into a per-drug `{can_take, when}` projection relative to
//! an injected reference instant.

use crate::{AvailabilityInfo, Drug, DrugAvailability, MedicineEntry};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

/// Compute per-drug availability from an entry window and the catalog
///
/// ## Contract
///
/// - Every catalog drug gets a record, seeded available at `now`.
/// - Each dose pair with `quantity > 0` proposes a candidate re-dose time
///   of `entry.taken_at + interval`; the latest candidate wins, so an old
///   entry can never shorten a window a newer one extended. `max` is
///   commutative, which makes the fold independent of entry order.
/// - Drugs no longer in the catalog still get a record, resolved from the
///   snapshot embedded in the historical entry. A pair with no catalog
///   match and no snapshot is logged and skipped; one bad record must not
///   invalidate availability for every other drug.
/// - No I/O, no mutation of inputs. Identical inputs and `now` produce an
///   identical result.
///
/// Callers own windowing policy: entries excluded from the input never
/// affect the result, even if their re-dose window would still be open.
pub fn compute(
    entries: &[MedicineEntry],
    drugs: &[Drug],
    now: DateTime<Utc>,
) -> AvailabilityInfo {
    let catalog: HashMap<Uuid, &Drug> = drugs.iter().map(|d| (d.id, d)).collect();

    // Longest re-dose window proposed per drug across all qualifying
    // doses, kept separate from the catalog seeds: a drug whose window
    // has already lapsed reports the historical `when`, never `now`
    let mut folded: HashMap<Uuid, (Drug, DateTime<Utc>)> = HashMap::new();

    for entry in entries {
        for dose in &entry.doses {
            // Upstream filters zero/negative quantities before save, but
            // tolerate them here when encountered
            if dose.quantity <= 0.0 {
                continue;
            }

            // The catalog is authoritative; the embedded snapshot covers
            // renamed or removed drugs
            let authoritative: &Drug = match catalog.get(&dose.drug_id) {
                Some(d) => d,
                None => match &dose.drug {
                    Some(snapshot) => snapshot,
                    None => {
                        tracing::warn!(
                            "Entry {} references unknown drug {} with no snapshot, skipping dose",
                            entry.id,
                            dose.drug_id
                        );
                        continue;
                    }
                },
            };

            let candidate = entry.taken_at + authoritative.redose_interval();

            folded
                .entry(dose.drug_id)
                .and_modify(|(_, when)| {
                    if candidate > *when {
                        *when = candidate;
                    }
                })
                .or_insert_with(|| (authoritative.clone(), candidate));
        }
    }

    let mut by_drug: HashMap<Uuid, DrugAvailability> = HashMap::with_capacity(
        drugs.len() + folded.len(),
    );

    // Catalog drugs: folded window when one exists, else available now
    for drug in drugs {
        let when = folded.remove(&drug.id).map_or(now, |(_, when)| when);
        by_drug.insert(
            drug.id,
            DrugAvailability {
                drug: drug.clone(),
                can_take: when <= now,
                when,
            },
        );
    }

    // Leftovers are drugs known only to the history; keep them visible
    // through their embedded snapshots
    for (id, (snapshot, when)) in folded {
        by_drug.insert(
            id,
            DrugAvailability {
                drug: snapshot,
                can_take: when <= now,
                when,
            },
        );
    }

    AvailabilityInfo {
        computed_at: Some(now),
        by_drug,
    }
}
