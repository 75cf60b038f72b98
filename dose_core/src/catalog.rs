//! Built-in drug catalog and catalog validation.
//!
//! A fresh install has an empty catalog; the first pipeline subscription
//! (or the CLI) seeds it with the common over-the-counter drugs below.

use crate::store::MedicineStore;
use crate::{Drug, Result};
use once_cell::sync::Lazy;
use std::collections::HashSet;
use uuid::Uuid;

/// Cached default drug list - built once and reused across all operations
static DEFAULT_DRUGS: Lazy<Vec<Drug>> = Lazy::new(build_default_drug_list);

/// Get a reference to the cached default drug list
pub fn get_default_drug_list() -> &'static [Drug] {
    &DEFAULT_DRUGS
}

/// Builds the default list of over-the-counter drugs
///
/// **Note**: For production use, prefer `get_default_drug_list()` which
/// returns a cached reference. This function is retained for testing and
/// custom catalog creation.
pub fn build_default_drug_list() -> Vec<Drug> {
    // Fixed ids keep seeding deterministic: re-seeding a wiped catalog
    // produces records that still match historical entry snapshots.
    vec![
        Drug {
            id: Uuid::from_u128(0x0001),
            name: "Paracetamol".into(),
            ingredients: vec!["Paracetamol".into()],
            redose_hours: 6.0,
        },
        Drug {
            id: Uuid::from_u128(0x0002),
            name: "Ibuprofen".into(),
            ingredients: vec!["Ibuprofen".into()],
            redose_hours: 6.0,
        },
        Drug {
            id: Uuid::from_u128(0x0003),
            name: "Aspirin".into(),
            ingredients: vec!["Acetylsalicylic Acid".into()],
            redose_hours: 4.0,
        },
        Drug {
            id: Uuid::from_u128(0x0004),
            name: "Loratadine".into(),
            ingredients: vec!["Loratadine".into()],
            redose_hours: 24.0,
        },
        Drug {
            id: Uuid::from_u128(0x0005),
            name: "Melatonin".into(),
            ingredients: vec!["Melatonin".into()],
            redose_hours: 12.0,
        },
    ]
}

/// Validate a drug catalog for consistency
///
/// Returns a list of validation errors, or empty Vec if valid.
pub fn validate(drugs: &[Drug]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen_ids = HashSet::new();

    for drug in drugs {
        if drug.name.is_empty() {
            errors.push(format!("Drug {} has empty name", drug.id));
        }
        if !seen_ids.insert(drug.id) {
            errors.push(format!("Duplicate drug id {}", drug.id));
        }
        if !drug.redose_hours.is_finite() {
            errors.push(format!(
                "Drug '{}' has non-finite re-dose interval",
                drug.name
            ));
        } else if drug.redose_hours < 0.0 {
            errors.push(format!(
                "Drug '{}' has negative re-dose interval ({} h)",
                drug.name, drug.redose_hours
            ));
        }
        for ingredient in &drug.ingredients {
            if ingredient.is_empty() {
                errors.push(format!("Drug '{}' has empty ingredient name", drug.name));
            }
        }
    }

    errors
}

/// Seed an empty catalog with the built-in default drug list
///
/// Idempotent: a catalog with any drugs at all is left untouched. Returns
/// whether seeding wrote anything.
pub fn seed_default_drugs(store: &dyn MedicineStore) -> Result<bool> {
    let existing = store.load_drugs()?;
    if !existing.is_empty() {
        tracing::debug!("Catalog already has {} drugs, skipping seed", existing.len());
        return Ok(false);
    }

    for drug in get_default_drug_list() {
        store.add_drug(drug.clone())?;
    }

    tracing::info!("Seeded catalog with {} default drugs", DEFAULT_DRUGS.len());
    Ok(true)
}
