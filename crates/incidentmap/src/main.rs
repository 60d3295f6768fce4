use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use incidentmap_core::geocode::NominatimClient;
use incidentmap_core::pipeline::{
    ImportOutcome, IngestOptions, IngestOutcome, StoreWrite, import_wikitext, ingest,
    render_outputs,
};
use incidentmap_core::prompt::ConsoleResolver;
use incidentmap_core::reconcile::{ReconcileMode, RowAction};
use incidentmap_core::render::OutputFormat;
use incidentmap_core::reverse::{EntryAction, ReverseOptions};
use incidentmap_core::runtime::{
    PathOverrides, ResolutionContext, Runtime, inspect_runtime, normalize_for_display,
    resolve_runtime,
};
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "incidentmap",
    version,
    about = "Maintain a yearly incident store and the wiki map and table built from it"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "YYYY", help = "Reporting year")]
    year: Option<String>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    year: Option<String>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            year: cli.year.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Build the store from scratch from the yearly CSV")]
    Create(CreateArgs),
    #[command(about = "Merge the yearly CSV into the existing store")]
    Refresh(RefreshArgs),
    #[command(about = "Write map and/or table markup from the store")]
    Render(RenderArgs),
    #[command(
        name = "import-wikitext",
        about = "Fold article table markup back into the store"
    )]
    ImportWikitext(ImportWikitextArgs),
}

#[derive(Debug, Args)]
struct CreateArgs {
    #[arg(short, long, help = "Ask for coordinates the lookup service cannot find")]
    interactive: bool,
    #[arg(long, value_name = "PATH", help = "Incident CSV (default: <year>.csv)")]
    csv: Option<PathBuf>,
    #[arg(long, help = "Overwrite an existing store without asking")]
    force: bool,
    #[arg(long, value_name = "FORMAT", value_parser = parse_output_format, help = "Render table, map, or both after writing")]
    render: Option<OutputFormat>,
    #[arg(long, help = "Print the store diff instead of writing it")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct RefreshArgs {
    #[arg(short, long, help = "Ask for coordinates the lookup service cannot find")]
    interactive: bool,
    #[arg(long, value_name = "PATH", help = "Incident CSV (default: <year>.csv)")]
    csv: Option<PathBuf>,
    #[arg(long, help = "Remove stored records the CSV no longer contains")]
    drop_unmatched: bool,
    #[arg(long, value_name = "FORMAT", value_parser = parse_output_format, help = "Render table, map, or both after writing")]
    render: Option<OutputFormat>,
    #[arg(long, help = "Print the store diff instead of writing it")]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct RenderArgs {
    #[arg(long, value_name = "FORMAT", default_value = "both", value_parser = parse_output_format, help = "table, map, or both")]
    format: OutputFormat,
}

#[derive(Debug, Args)]
struct ImportWikitextArgs {
    #[arg(long, value_name = "PATH", help = "Article markup (default: wikitext.txt)")]
    input: Option<PathBuf>,
    #[arg(short, long, help = "Ask for coordinates of new entries the lookup service cannot find")]
    interactive: bool,
    #[arg(long, help = "Print the store diff instead of writing it")]
    dry_run: bool,
}

struct IngestRequest {
    csv: Option<PathBuf>,
    options: IngestOptions,
    render: Option<OutputFormat>,
}

impl IngestRequest {
    fn create(args: CreateArgs) -> Self {
        Self {
            csv: args.csv,
            options: IngestOptions {
                mode: ReconcileMode::Create,
                interactive: args.interactive,
                drop_unmatched: false,
                dry_run: args.dry_run,
                force: args.force,
            },
            render: args.render,
        }
    }

    fn refresh(args: RefreshArgs) -> Self {
        Self {
            csv: args.csv,
            options: IngestOptions {
                mode: ReconcileMode::Refresh,
                interactive: args.interactive,
                drop_unmatched: args.drop_unmatched,
                dry_run: args.dry_run,
                force: false,
            },
            render: args.render,
        }
    }
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Commands::Create(args) => run_ingest(&runtime, IngestRequest::create(args)),
        Commands::Refresh(args) => run_ingest(&runtime, IngestRequest::refresh(args)),
        Commands::Render(args) => run_render(&runtime, args.format),
        Commands::ImportWikitext(args) => run_import_wikitext(&runtime, args),
    }
}

fn run_ingest(runtime: &RuntimeOptions, request: IngestRequest) -> Result<()> {
    let resolved = resolve_runtime_for(
        runtime,
        PathOverrides {
            csv: request.csv,
            ..PathOverrides::default()
        },
    )?;
    let paths = &resolved.paths;
    let mut api = NominatimClient::new(resolved.geocoder.clone())?;
    let mut pacer = resolved.geocoder.pacer();
    let mut resolver = ConsoleResolver::stdio();

    let Some(outcome) = ingest(paths, request.options, &mut api, &mut pacer, &mut resolver)? else {
        println!("{}: cancelled", request.options.mode.as_str());
        println!("store: {} (untouched)", normalize_for_display(&paths.store_path));
        return Ok(());
    };
    print_ingest(request.options.mode, &resolved, &outcome);

    if let Some(format) = request.render
        && !request.options.dry_run
    {
        let rendered = render_outputs(paths, format, &resolved.geocoder.api_url)?;
        print_rendered_paths(rendered.map_path.as_deref(), rendered.table_path.as_deref());
    }
    print_diagnostics(runtime, &resolved);
    Ok(())
}

fn run_render(runtime: &RuntimeOptions, format: OutputFormat) -> Result<()> {
    let resolved = resolve_runtime_for(runtime, PathOverrides::default())?;
    let outcome = render_outputs(&resolved.paths, format, &resolved.geocoder.api_url)?;

    println!("render {}", resolved.paths.year);
    println!("format: {}", format.as_str());
    println!("records: {}", outcome.records);
    println!("missing_coordinates: {}", outcome.unresolved);
    print_rendered_paths(outcome.map_path.as_deref(), outcome.table_path.as_deref());
    print_diagnostics(runtime, &resolved);
    Ok(())
}

fn run_import_wikitext(runtime: &RuntimeOptions, args: ImportWikitextArgs) -> Result<()> {
    let resolved = resolve_runtime_for(
        runtime,
        PathOverrides {
            wikitext: args.input,
            ..PathOverrides::default()
        },
    )?;
    let mut api = NominatimClient::new(resolved.geocoder.clone())?;
    let mut pacer = resolved.geocoder.pacer();
    let mut resolver = ConsoleResolver::stdio();

    let outcome = import_wikitext(
        &resolved.paths,
        ReverseOptions {
            interactive: args.interactive,
        },
        args.dry_run,
        &mut api,
        &mut pacer,
        &mut resolver,
    )?;
    print_import(&resolved, &outcome);
    print_diagnostics(runtime, &resolved);
    Ok(())
}

fn print_ingest(mode: ReconcileMode, resolved: &Runtime, outcome: &IngestOutcome) {
    let report = &outcome.report;
    println!("{} {}", mode.as_str(), resolved.paths.year);
    println!("csv: {}", normalize_for_display(&resolved.paths.csv_path));
    println!("rows: {}", outcome.rows);
    println!("created: {}", report.count(RowAction::Created));
    println!("refreshed: {}", report.count(RowAction::Refreshed));
    println!("reused: {}", report.count(RowAction::Reused));
    println!("lookups: {}", report.lookups);
    println!("missing_coordinates: {}", report.unresolved());
    for row in report
        .outcomes
        .iter()
        .filter(|row| !row.coordinates_resolved)
    {
        println!("  - {} (row {})", row.id, row.row);
    }
    println!("unmatched: {}", report.unmatched.len());
    for id in &report.unmatched {
        println!("  - {id}");
    }
    println!("count_changes: {}", report.count_changes.len());
    for change in &report.count_changes {
        println!(
            "  - {}: killed {} -> {}, injured {} -> {}",
            change.id, change.previous_killed, change.killed, change.previous_injured, change.injured
        );
    }
    print_total_mismatches("total_mismatches", &report.total_mismatches);
    print_store_write(&resolved.paths.store_path, &outcome.store_write);
}

fn print_import(resolved: &Runtime, outcome: &ImportOutcome) {
    let report = &outcome.report;
    println!("import-wikitext {}", resolved.paths.year);
    println!(
        "input: {}",
        normalize_for_display(&resolved.paths.wikitext_path)
    );
    println!("entries: {}", outcome.entries);
    println!("matched: {}", report.count(EntryAction::Matched));
    println!("created: {}", report.count(EntryAction::Created));
    println!("lookups: {}", report.lookups);
    println!("records: {}", outcome.records);
    print_total_mismatches("markup_total_mismatches", &report.markup_total_mismatches);
    print_total_mismatches("stored_total_mismatches", &report.stored_total_mismatches);
    print_store_write(&resolved.paths.store_path, &outcome.store_write);
}

fn print_total_mismatches(label: &str, mismatches: &[incidentmap_core::record::TotalMismatch]) {
    println!("{label}: {}", mismatches.len());
    for mismatch in mismatches {
        println!(
            "  - {}: {} killed + {} injured != {} total",
            mismatch.id, mismatch.killed, mismatch.injured, mismatch.total
        );
    }
}

fn print_store_write(store_path: &Path, store_write: &StoreWrite) {
    let store = normalize_for_display(store_path);
    match store_write {
        StoreWrite::Written => println!("store: {store} (written)"),
        StoreWrite::Unchanged => println!("store: {store} (unchanged)"),
        StoreWrite::DryRun(diff) => {
            println!("store: {store} (dry run, not written)");
            if diff.is_empty() {
                println!("diff: none");
            } else {
                print!("{diff}");
            }
        }
    }
}

fn print_rendered_paths(map_path: Option<&Path>, table_path: Option<&Path>) {
    if let Some(path) = map_path {
        println!("map: {}", normalize_for_display(path));
    }
    if let Some(path) = table_path {
        println!("table: {}", normalize_for_display(path));
    }
}

fn print_diagnostics(runtime: &RuntimeOptions, resolved: &Runtime) {
    if !runtime.diagnostics {
        return;
    }
    let status = inspect_runtime(&resolved.paths);
    println!("\n[diagnostics]\n{}", resolved.paths.diagnostics());
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("csv_exists: {}", format_flag(status.csv_exists));
    println!("store_exists: {}", format_flag(status.store_exists));
    println!("wikitext_exists: {}", format_flag(status.wikitext_exists));
    println!("geocoder_url: {}", resolved.geocoder.api_url);
    println!("min_interval_ms: {}", resolved.geocoder.min_interval_ms);
    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
}

fn resolve_runtime_for(runtime: &RuntimeOptions, overrides: PathOverrides) -> Result<Runtime> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        project_root: runtime.project_root.clone(),
        config: runtime.config.clone(),
        year: runtime.year.clone(),
        ..overrides
    };

    let initial = resolve_runtime(&context, &overrides)?;
    if !load_project_env(&initial.paths.project_root) {
        return Ok(initial);
    }
    resolve_runtime(&context, &overrides)
}

/// Apply `<project_root>/.env` over the process environment. Returns whether it was applied.
fn load_project_env(project_root: &Path) -> bool {
    let project_env = project_root.join(".env");
    if !project_env.exists() {
        return false;
    }
    match dotenvy::from_path_override(&project_env) {
        Ok(()) => true,
        Err(err) => {
            warn!(path = %project_env.display(), error = %err, "failed to load project .env");
            false
        }
    }
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse::<OutputFormat>().map_err(|err| err.to_string())
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
