use std::collections::BTreeSet;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::geocode::{self, GeocodeApi, LocationQuery, Pacer};
use crate::identity::{assign_id, format_id, id_prefix, parse_id};
use crate::prompt::{Resolver, ask_count, confirm};
use crate::record::{IncidentRecord, RecordStore, STORE_DATE_FORMAT, TotalMismatch};
use crate::wikitext::{MarkupEntry, split_location};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReverseOptions {
    /// Ask for coordinates when a new entry cannot be geocoded.
    pub interactive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryAction {
    Matched,
    Created,
}

impl EntryAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::Created => "created",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOutcome {
    pub index: usize,
    pub id: String,
    pub action: EntryAction,
}

#[derive(Debug, Clone, Default)]
pub struct ReverseReport {
    pub outcomes: Vec<EntryOutcome>,
    /// Markup rows whose bold total disagreed with killed + injured.
    pub markup_total_mismatches: Vec<TotalMismatch>,
    /// Stored records whose total disagreed before they were updated.
    pub stored_total_mismatches: Vec<TotalMismatch>,
    pub lookups: usize,
}

impl ReverseReport {
    pub fn count(&self, action: EntryAction) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.action == action)
            .count()
    }
}

/// Fold parsed markup entries back into `store`.
///
/// Matching walks `{prefix}_0`, `{prefix}_1`, ... while those ids exist. An id whose
/// counts equal the entry's is taken directly; otherwise the resolver confirms
/// whether it is the same incident. With no exact match, every stored record on the
/// same date in the same state is offered for confirmation. Matched records get
/// their counts confirmed and their link target, description and refs replaced.
/// Unmatched entries become new records geocoded by city and state.
pub fn reconcile_markup(
    store: &mut RecordStore,
    entries: &[MarkupEntry],
    options: ReverseOptions,
    api: &mut dyn GeocodeApi,
    pacer: &mut Pacer,
    resolver: &mut dyn Resolver,
) -> Result<ReverseReport> {
    let lookups_before = api.request_count();
    let mut report = ReverseReport::default();
    let mut claimed = BTreeSet::new();

    for entry in entries {
        let (city, state) = entry_location(entry, resolver)?;
        if !entry.total_is_consistent() {
            warn!(
                entry = entry.index,
                killed = entry.killed,
                injured = entry.injured,
                total = entry.total,
                "markup total does not equal killed + injured"
            );
            report.markup_total_mismatches.push(TotalMismatch {
                id: format!("markup entry {}", entry.index),
                killed: entry.killed,
                injured: entry.injured,
                total: entry.total,
            });
        }

        let found = find_match(store, entry, &city, &state, &claimed, resolver)?;
        let (id, action) = match found {
            Some(id) => {
                if let Some(record) = store.get_mut(&id) {
                    if !record.total_is_consistent() {
                        report
                            .stored_total_mismatches
                            .push(TotalMismatch::of(&id, record));
                    }
                    update_record(&id, record, entry, resolver)?;
                }
                (id, EntryAction::Matched)
            }
            None => {
                let id = assign_id(entry.date, &city, &state, store);
                let record = new_record(entry, &city, &state, options, api, pacer, resolver)
                    .with_context(|| {
                        format!("failed to add markup entry {} as {id}", entry.index)
                    })?;
                store.insert(id.clone(), record);
                (id, EntryAction::Created)
            }
        };

        info!(
            entry = entry.index,
            id = %id,
            action = action.as_str(),
            "imported markup entry"
        );
        claimed.insert(id.clone());
        report.outcomes.push(EntryOutcome {
            index: entry.index,
            id,
            action,
        });
    }

    report.lookups = api.request_count().saturating_sub(lookups_before);
    Ok(report)
}

fn entry_location(entry: &MarkupEntry, resolver: &mut dyn Resolver) -> Result<(String, String)> {
    if let Some(location) = split_location(&entry.location) {
        return Ok(location);
    }
    let mut question = format!(
        "Couldn't split location '{}' of markup entry {} into city and state. Please enter City, State:",
        entry.location, entry.index
    );
    loop {
        let answer = resolver.ask(&question)?;
        if let Some(location) = split_location(&answer) {
            return Ok(location);
        }
        question = format!("'{answer}' is not of the form City, State. Please enter City, State:");
    }
}

fn find_match(
    store: &RecordStore,
    entry: &MarkupEntry,
    city: &str,
    state: &str,
    claimed: &BTreeSet<String>,
    resolver: &mut dyn Resolver,
) -> Result<Option<String>> {
    let prefix = id_prefix(entry.date, city, state);
    let mut ordinal = 0u32;
    loop {
        let id = format_id(&prefix, ordinal);
        let Some(record) = store.get(&id) else {
            break;
        };
        ordinal += 1;
        if claimed.contains(&id) {
            continue;
        }
        if (record.killed, record.injured) == (entry.killed, entry.injured) {
            return Ok(Some(id));
        }
        let question = format!(
            "ID {id} found, but killed/injured values don't match (store: {} killed, {} injured; markup: {} killed, {} injured). Is this the same incident?",
            record.killed, record.injured, entry.killed, entry.injured
        );
        if confirm(resolver, &question)? {
            return Ok(Some(id));
        }
    }

    let date = entry.date.format(STORE_DATE_FORMAT).to_string();
    for (id, record) in store {
        if record.date != entry.date
            || record.state.trim() != state
            || claimed.contains(id)
            || parse_id(id).is_some_and(|(stored_prefix, _)| stored_prefix == prefix)
        {
            continue;
        }
        let question = format!(
            "Found an incident in {state} on {date}. City in the store is '{}'; city in the markup is '{city}'. Is this the same incident? (You can fix the values later)",
            record.city
        );
        if confirm(resolver, &question)? {
            return Ok(Some(id.clone()));
        }
    }
    Ok(None)
}

fn update_record(
    id: &str,
    record: &mut IncidentRecord,
    entry: &MarkupEntry,
    resolver: &mut dyn Resolver,
) -> Result<()> {
    let mut killed = record.killed;
    let mut injured = record.injured;
    if entry.killed != killed {
        killed = ask_count(
            resolver,
            &format!(
                "Number of people killed for ID {id} doesn't match (store: {killed}, markup: {}). Enter number of people killed:",
                entry.killed
            ),
        )?;
    }
    if entry.injured != injured {
        injured = ask_count(
            resolver,
            &format!(
                "Number of people injured for ID {id} doesn't match (store: {injured}, markup: {}). Enter number of people injured:",
                entry.injured
            ),
        )?;
    }
    record.set_counts(killed, injured);

    if let Some(target) = &entry.wikilink_target {
        record.wikilink_target = Some(target.clone());
    }
    record.description = entry.description.clone();
    record.refs = entry.refs.clone();
    Ok(())
}

fn new_record(
    entry: &MarkupEntry,
    city: &str,
    state: &str,
    options: ReverseOptions,
    api: &mut dyn GeocodeApi,
    pacer: &mut Pacer,
    resolver: &mut dyn Resolver,
) -> Result<IncidentRecord> {
    let mut record = IncidentRecord::new(entry.date, city, state, None, entry.killed, entry.injured);
    let query = LocationQuery::new(None, city, state);
    let coordinates = geocode::resolve(api, pacer, &query, options.interactive, resolver)?;
    if coordinates.is_none() {
        warn!(entry = entry.index, location = %query.describe(), "no coordinates for new record");
    }
    record.set_coordinates(coordinates);
    record.wikilink_target = entry.wikilink_target.clone();
    record.description = entry.description.clone();
    record.refs = entry.refs.clone();
    Ok(record)
}
