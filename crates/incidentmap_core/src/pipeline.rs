use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::csv_input::read_incident_rows;
use crate::geocode::{GeocodeApi, Pacer};
use crate::prompt::{Resolver, confirm};
use crate::reconcile::{ReconcileMode, ReconcileOptions, ReconcileReport, reconcile};
use crate::render::{OutputFormat, render_map, render_table};
use crate::reverse::{ReverseOptions, ReverseReport, reconcile_markup};
use crate::runtime::ResolvedPaths;
use crate::store::{
    load_existing_store, parse_store, read_existing_store_text, read_store_text, render_store,
    store_diff, write_store_text,
};
use crate::wikitext::read_entries;

#[derive(Debug, Clone, Copy)]
pub struct IngestOptions {
    pub mode: ReconcileMode,
    pub interactive: bool,
    pub drop_unmatched: bool,
    pub dry_run: bool,
    /// Replace an existing store in create mode without asking.
    pub force: bool,
}

/// How a run left the store file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreWrite {
    Written,
    Unchanged,
    /// Dry run: the unified diff that a real run would have applied.
    DryRun(String),
}

#[derive(Debug)]
pub struct IngestOutcome {
    pub rows: usize,
    pub report: ReconcileReport,
    pub store_write: StoreWrite,
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub entries: usize,
    pub records: usize,
    pub report: ReverseReport,
    pub store_write: StoreWrite,
}

#[derive(Debug, Clone, Default)]
pub struct RenderOutcome {
    pub records: usize,
    pub map_path: Option<PathBuf>,
    pub table_path: Option<PathBuf>,
    pub unresolved: usize,
}

/// Read the yearly CSV, reconcile it against the store and write the store once at the end.
///
/// Returns `None` when the operator declines to overwrite an existing store in create mode.
/// The CSV is fully parsed before anything else happens, so a malformed row never
/// touches the store, and a failed lookup aborts before the write.
pub fn ingest(
    paths: &ResolvedPaths,
    options: IngestOptions,
    api: &mut dyn GeocodeApi,
    pacer: &mut Pacer,
    resolver: &mut dyn Resolver,
) -> Result<Option<IngestOutcome>> {
    let rows = read_incident_rows(&paths.csv_path)?;
    let before = read_store_text(&paths.store_path)?;

    if options.mode == ReconcileMode::Create
        && before.is_some()
        && !options.force
        && !options.dry_run
        && !confirm(
            resolver,
            &format!(
                "Record store {} already exists. Overwrite it with a fresh store built from {}?",
                paths.store_path.display(),
                paths.csv_path.display()
            ),
        )?
    {
        info!(store = %paths.store_path.display(), "create cancelled");
        return Ok(None);
    }

    let existing = match (options.mode, before.as_deref()) {
        (ReconcileMode::Refresh, Some(content)) => parse_store(content).with_context(|| {
            format!("failed to parse record store {}", paths.store_path.display())
        })?,
        _ => Default::default(),
    };
    info!(
        mode = options.mode.as_str(),
        rows = rows.len(),
        stored = existing.len(),
        "reconciling incident rows"
    );

    let report = reconcile(
        &existing,
        &rows,
        ReconcileOptions {
            mode: options.mode,
            interactive: options.interactive,
            drop_unmatched: options.drop_unmatched,
        },
        api,
        pacer,
        resolver,
    )?;
    let rendered = render_store(&report.store)?;
    let store_write = finish_store(
        &paths.store_path,
        before.as_deref(),
        &rendered,
        options.dry_run,
    )?;

    Ok(Some(IngestOutcome {
        rows: rows.len(),
        report,
        store_write,
    }))
}

pub fn render_outputs(
    paths: &ResolvedPaths,
    format: OutputFormat,
    api_url: &str,
) -> Result<RenderOutcome> {
    let store = load_existing_store(&paths.store_path)?;

    let mut outcome = RenderOutcome {
        records: store.len(),
        unresolved: store
            .values()
            .filter(|record| record.coordinates().is_none())
            .count(),
        ..RenderOutcome::default()
    };
    if format.includes_map() {
        write_output(&paths.map_path, &render_map(&store, api_url))?;
        outcome.map_path = Some(paths.map_path.clone());
    }
    if format.includes_table() {
        write_output(&paths.table_path, &render_table(&store))?;
        outcome.table_path = Some(paths.table_path.clone());
    }
    info!(
        format = format.as_str(),
        records = outcome.records,
        "rendered markup"
    );
    Ok(outcome)
}

/// Fold the article markup back into an existing store.
pub fn import_wikitext(
    paths: &ResolvedPaths,
    options: ReverseOptions,
    dry_run: bool,
    api: &mut dyn GeocodeApi,
    pacer: &mut Pacer,
    resolver: &mut dyn Resolver,
) -> Result<ImportOutcome> {
    let before = read_existing_store_text(&paths.store_path)?;
    let mut store = parse_store(&before)
        .with_context(|| format!("failed to parse record store {}", paths.store_path.display()))?;
    let entries = read_entries(&paths.wikitext_path)?;
    info!(
        entries = entries.len(),
        stored = store.len(),
        "importing wiki markup"
    );

    let report = reconcile_markup(&mut store, &entries, options, api, pacer, resolver)?;
    let rendered = render_store(&store)?;
    let store_write = finish_store(&paths.store_path, Some(&before), &rendered, dry_run)?;

    Ok(ImportOutcome {
        entries: entries.len(),
        records: store.len(),
        report,
        store_write,
    })
}

fn finish_store(
    path: &Path,
    before: Option<&str>,
    rendered: &str,
    dry_run: bool,
) -> Result<StoreWrite> {
    let previous = before.unwrap_or("");
    if dry_run {
        return Ok(StoreWrite::DryRun(store_diff(path, previous, rendered)));
    }
    if before == Some(rendered) {
        return Ok(StoreWrite::Unchanged);
    }
    write_store_text(path, rendered)?;
    info!(store = %path.display(), "wrote record store");
    Ok(StoreWrite::Written)
}

fn write_output(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}
