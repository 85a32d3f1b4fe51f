//! Collection reconciliation for Publish.
//!
//! Pure set computation: no I/O, no side effects.

use std::collections::BTreeMap;

use crate::verify::Fingerprint;

/// One item that should be published, with its rating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredEntry {
    pub fingerprint: Fingerprint,
    pub rating: u8,
}

/// Why an item is being added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddReason {
    /// Not at the target yet
    New,
    /// At the target with different content
    Changed,
}

/// What one Publish run has to do.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconciliationPlan {
    pub to_add: Vec<(String, AddReason)>,
    pub to_remove: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ReconciliationPlan {
    pub fn is_noop(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Diff the desired collection against what the target holds.
///
/// Items rated `min_rating` or higher are added when missing or when their
/// fingerprint differs. Observed items that are not eligible (or no longer
/// exist) are removed. Everything else is unchanged. All lists are sorted by
/// base name.
pub fn plan(
    desired: &BTreeMap<String, DesiredEntry>,
    observed: &BTreeMap<String, Fingerprint>,
    min_rating: u8,
) -> ReconciliationPlan {
    let mut result = ReconciliationPlan::default();

    for (name, entry) in desired {
        if entry.rating < min_rating {
            continue;
        }
        match observed.get(name) {
            None => result.to_add.push((name.clone(), AddReason::New)),
            Some(present) if !present.matches(&entry.fingerprint) => {
                result.to_add.push((name.clone(), AddReason::Changed))
            }
            Some(_) => result.unchanged.push(name.clone()),
        }
    }

    for name in observed.keys() {
        let eligible = desired
            .get(name)
            .map(|entry| entry.rating >= min_rating)
            .unwrap_or(false);
        if !eligible {
            result.to_remove.push(name.clone());
        }
    }

    result
}
