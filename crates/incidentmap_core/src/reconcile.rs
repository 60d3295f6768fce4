use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::csv_input::IncidentRow;
use crate::geocode::{self, GeocodeApi, LocationQuery, Pacer};
use crate::identity::assign_id;
use crate::prompt::Resolver;
use crate::record::{Coordinates, IncidentRecord, RecordStore, TotalMismatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileMode {
    /// Ignore whatever is stored and build the store from scratch.
    Create,
    /// Merge incoming rows against the stored records.
    Refresh,
}

impl ReconcileMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Refresh => "refresh",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    /// Matched a stored record with the same street; coordinates copied forward.
    Reused,
    /// Matched a stored record but the location had to be geocoded again.
    Refreshed,
    Created,
}

impl RowAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reused => "reused",
            Self::Refreshed => "refreshed",
            Self::Created => "created",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowOutcome {
    pub row: usize,
    pub id: String,
    pub action: RowAction,
    pub coordinates_resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountChange {
    pub id: String,
    pub previous_killed: u32,
    pub previous_injured: u32,
    pub killed: u32,
    pub injured: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileOptions {
    pub mode: ReconcileMode,
    pub interactive: bool,
    pub drop_unmatched: bool,
}

#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub store: RecordStore,
    /// Stored ids no incoming row matched, in key order.
    pub unmatched: Vec<String>,
    pub outcomes: Vec<RowOutcome>,
    pub count_changes: Vec<CountChange>,
    pub total_mismatches: Vec<TotalMismatch>,
    pub lookups: usize,
}

impl ReconcileReport {
    pub fn count(&self, action: RowAction) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.action == action)
            .count()
    }

    pub fn unresolved(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.coordinates_resolved)
            .count()
    }
}

/// Merge `rows` against `existing` and build the next store.
///
/// Ids are assigned against the store being built, so repeated date and location
/// pairs within one input get increasing ordinals. In refresh mode an id that also
/// exists in `existing` is a match: if its street is unchanged and it has
/// coordinates they are reused without a lookup, otherwise the row is geocoded
/// again. Every lookup goes through `pacer`. Stored ids left unmatched are
/// reported and carried into the new store unless `drop_unmatched` is set.
pub fn reconcile(
    existing: &RecordStore,
    rows: &[IncidentRow],
    options: ReconcileOptions,
    api: &mut dyn GeocodeApi,
    pacer: &mut Pacer,
    resolver: &mut dyn Resolver,
) -> Result<ReconcileReport> {
    let baseline = match options.mode {
        ReconcileMode::Create => None,
        ReconcileMode::Refresh => Some(existing),
    };
    let mut unmatched = baseline
        .map(|store| store.keys().cloned().collect::<BTreeSet<_>>())
        .unwrap_or_default();
    let lookups_before = api.request_count();

    let mut store = RecordStore::new();
    let mut outcomes = Vec::with_capacity(rows.len());
    let mut count_changes = Vec::new();
    let mut total_mismatches = Vec::new();

    for row in rows {
        let id = assign_id(row.date, &row.city, &row.state, &store);
        let mut record = IncidentRecord::new(
            row.date,
            &row.city,
            &row.state,
            Some(&row.street),
            row.killed,
            row.injured,
        );

        let previous = baseline.and_then(|stored| stored.get(&id));
        let action = match previous {
            Some(previous) => {
                unmatched.remove(&id);
                if !previous.total_is_consistent() {
                    warn!(
                        id = %id,
                        killed = previous.killed,
                        injured = previous.injured,
                        total = previous.total,
                        "stored total does not equal killed + injured"
                    );
                    total_mismatches.push(TotalMismatch::of(&id, previous));
                }
                if (previous.killed, previous.injured) != (row.killed, row.injured) {
                    count_changes.push(CountChange {
                        id: id.clone(),
                        previous_killed: previous.killed,
                        previous_injured: previous.injured,
                        killed: row.killed,
                        injured: row.injured,
                    });
                }
                record.description = previous.description.clone();
                record.refs = previous.refs.clone();
                record.wikilink_target = previous.wikilink_target.clone();

                match previous.coordinates() {
                    Some(coordinates) if previous.street_or_empty() == record.street_or_empty() => {
                        record.set_coordinates(Some(coordinates));
                        RowAction::Reused
                    }
                    _ => {
                        let coordinates =
                            locate(row, &id, options.interactive, api, pacer, resolver)?;
                        record.set_coordinates(coordinates);
                        RowAction::Refreshed
                    }
                }
            }
            None => {
                let coordinates = locate(row, &id, options.interactive, api, pacer, resolver)?;
                record.set_coordinates(coordinates);
                RowAction::Created
            }
        };

        let coordinates_resolved = record.coordinates().is_some();
        if coordinates_resolved {
            info!(id = %id, action = action.as_str(), "reconciled record");
        } else {
            warn!(
                id = %id,
                action = action.as_str(),
                "reconciled record without coordinates"
            );
        }
        outcomes.push(RowOutcome {
            row: row.row,
            id: id.clone(),
            action,
            coordinates_resolved,
        });
        store.insert(id, record);
    }

    if let Some(stored) = baseline {
        for id in &unmatched {
            warn!(id = %id, "stored record not present in incoming rows");
            if options.drop_unmatched {
                continue;
            }
            let Some(record) = stored.get(id) else {
                continue;
            };
            let mut carried = record.clone();
            if !carried.total_is_consistent() {
                warn!(
                    id = %id,
                    killed = carried.killed,
                    injured = carried.injured,
                    total = carried.total,
                    "stored total does not equal killed + injured"
                );
                total_mismatches.push(TotalMismatch::of(id, &carried));
                carried.set_counts(carried.killed, carried.injured);
            }
            store.insert(id.clone(), carried);
        }
    }

    Ok(ReconcileReport {
        store,
        unmatched: unmatched.into_iter().collect(),
        outcomes,
        count_changes,
        total_mismatches,
        lookups: api.request_count().saturating_sub(lookups_before),
    })
}

fn locate(
    row: &IncidentRow,
    id: &str,
    interactive: bool,
    api: &mut dyn GeocodeApi,
    pacer: &mut Pacer,
    resolver: &mut dyn Resolver,
) -> Result<Option<Coordinates>> {
    let query = LocationQuery::new(Some(&row.street), &row.city, &row.state);
    geocode::resolve(api, pacer, &query, interactive, resolver)
        .with_context(|| format!("failed to geocode row {} ({id})", row.row))
}
