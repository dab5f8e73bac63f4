//! Planning for registry and grant mutations.
//!
//! Both store implementations load a snapshot inside their transaction, ask
//! these functions what to change, and apply the answer. Nothing here
//! touches storage, so the subset rules live in exactly one place.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::ServiceError;
use crate::models::{GrantRequest, ModulePermission};

/// Changes needed to make a module's available set equal a requested set.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AvailabilityPlan {
    /// Kinds with no row at all.
    pub insert: Vec<i64>,
    /// Kinds whose row exists but is soft-deleted.
    pub reactivate: Vec<i64>,
    /// Live kinds not in the request; their grants are withdrawn too.
    pub withdraw: Vec<i64>,
}

impl AvailabilityPlan {
    pub fn is_noop(&self) -> bool {
        self.insert.is_empty() && self.reactivate.is_empty() && self.withdraw.is_empty()
    }
}

/// Compare every registry row of a module (live or not) against the requested
/// kinds. `known_kinds` is the catalog; an unknown id is `NotFound`.
pub fn plan_availability(
    current: &[ModulePermission],
    requested: &[i64],
    known_kinds: &HashSet<i64>,
) -> Result<AvailabilityPlan, ServiceError> {
    let requested: BTreeSet<i64> = requested.iter().copied().collect();
    if let Some(unknown) = requested.iter().find(|id| !known_kinds.contains(id)) {
        return Err(ServiceError::not_found(format!("Permission kind {}", unknown)));
    }

    let rows: HashMap<i64, &ModulePermission> = current
        .iter()
        .map(|row| (row.permission_kind_id, row))
        .collect();

    let mut plan = AvailabilityPlan::default();
    for kind_id in &requested {
        match rows.get(kind_id) {
            None => plan.insert.push(*kind_id),
            Some(row) if !row.is_active() => plan.reactivate.push(*kind_id),
            Some(_) => {}
        }
    }

    let mut withdraw: Vec<i64> = current
        .iter()
        .filter(|row| row.is_active() && !requested.contains(&row.permission_kind_id))
        .map(|row| row.permission_kind_id)
        .collect();
    withdraw.sort_unstable();
    plan.withdraw = withdraw;

    Ok(plan)
}

/// Validate a grant request against the live registry and flatten it into
/// distinct (module_id, permission_kind_id) pairs.
///
/// `available` maps each live module to its live permission kinds. A module
/// missing from the map is `NotFound`; a kind the module does not offer is
/// `InvalidGrant`. The first failure aborts the whole request.
pub fn plan_grants(
    requests: &[GrantRequest],
    available: &HashMap<i64, HashSet<i64>>,
) -> Result<Vec<(i64, i64)>, ServiceError> {
    let mut pairs = BTreeSet::new();
    for request in requests {
        let offered = available
            .get(&request.module_id)
            .ok_or_else(|| ServiceError::not_found(format!("Module {}", request.module_id)))?;

        for kind_id in &request.permission_kind_ids {
            if !offered.contains(kind_id) {
                return Err(ServiceError::InvalidGrant {
                    module_id: request.module_id,
                    permission_kind_id: *kind_id,
                });
            }
            pairs.insert((request.module_id, *kind_id));
        }
    }
    Ok(pairs.into_iter().collect())
}

/// Module ids referenced by a grant request, deduplicated.
pub fn requested_modules(requests: &[GrantRequest]) -> Vec<i64> {
    let ids: BTreeSet<i64> = requests.iter().map(|r| r.module_id).collect();
    ids.into_iter().collect()
}

/// Reject duplicate names inside one creation batch (case-insensitive).
pub fn check_batch_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<(), ServiceError> {
    let mut seen = HashSet::new();
    for name in names {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::conflict("Module name must not be empty"));
        }
        if !seen.insert(trimmed.to_lowercase()) {
            return Err(ServiceError::conflict(format!(
                "Module '{}' appears more than once",
                trimmed
            )));
        }
    }
    Ok(())
}
