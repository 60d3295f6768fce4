use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{Datelike, Local};

use crate::config::load_config;
use crate::geocode::GeocoderConfig;

pub const CONFIG_FILENAME: &str = "incidentmap.toml";
pub const WIKITEXT_FILENAME: &str = "wikitext.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub project_root: Option<PathBuf>,
    pub config: Option<PathBuf>,
    pub year: Option<String>,
    pub csv: Option<PathBuf>,
    pub wikitext: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
    pub executable_dir: Option<PathBuf>,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        let executable_dir = env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(Path::to_path_buf));
        Ok(Self {
            cwd,
            executable_dir,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub project_root: PathBuf,
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    pub year: String,
    pub csv_path: PathBuf,
    pub store_path: PathBuf,
    pub map_path: PathBuf,
    pub table_path: PathBuf,
    pub wikitext_path: PathBuf,
    pub root_source: ValueSource,
    pub config_source: ValueSource,
    pub year_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "project_root={} ({})\nconfig_path={} ({})\nyear={} ({})\ndata_dir={}\ncsv_path={}\nstore_path={}\nmap_path={}\ntable_path={}\nwikitext_path={}",
            normalize_for_display(&self.project_root),
            self.root_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            self.year,
            self.year_source.as_str(),
            normalize_for_display(&self.data_dir),
            normalize_for_display(&self.csv_path),
            normalize_for_display(&self.store_path),
            normalize_for_display(&self.map_path),
            normalize_for_display(&self.table_path),
            normalize_for_display(&self.wikitext_path),
        )
    }
}

/// Everything a command needs: where the files are and how to reach the lookup service.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub paths: ResolvedPaths,
    pub geocoder: GeocoderConfig,
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub config_exists: bool,
    pub csv_exists: bool,
    pub store_exists: bool,
    pub wikitext_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths) -> RuntimeStatus {
    let config_exists = paths.config_path.exists();
    let csv_exists = paths.csv_path.exists();
    let store_exists = paths.store_path.exists();
    let wikitext_exists = paths.wikitext_path.exists();

    let mut warnings = Vec::new();
    if !csv_exists {
        warnings.push(format!(
            "{} is missing; create and refresh need the yearly incident CSV",
            normalize_for_display(&paths.csv_path)
        ));
    }
    if !store_exists {
        warnings.push(format!(
            "{} is missing; run `incidentmap create` before render or import-wikitext",
            normalize_for_display(&paths.store_path)
        ));
    }

    RuntimeStatus {
        config_exists,
        csv_exists,
        store_exists,
        wikitext_exists,
        warnings,
    }
}

pub fn resolve_runtime(context: &ResolutionContext, overrides: &PathOverrides) -> Result<Runtime> {
    resolve_runtime_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_runtime_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<Runtime>
where
    F: Fn(&str) -> Option<String>,
{
    let (project_root, root_source) = resolve_project_root(context, overrides, &lookup_env);

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &project_root), ValueSource::Flag)
    } else if let Some(value) = env_value(&lookup_env, "INCIDENTMAP_CONFIG") {
        (absolutize(Path::new(&value), &project_root), ValueSource::Env)
    } else {
        (project_root.join(CONFIG_FILENAME), ValueSource::Default)
    };
    let config = load_config(&config_path)?;

    let (year, year_source) = if let Some(year) = overrides.year.as_deref() {
        (year.trim().to_string(), ValueSource::Flag)
    } else if let Some(year) = env_value(&lookup_env, "INCIDENTMAP_YEAR") {
        (year, ValueSource::Env)
    } else if let Some(year) = config.year() {
        (year.to_string(), ValueSource::Config)
    } else {
        (Local::now().year().to_string(), ValueSource::Default)
    };
    validate_year(&year)
        .with_context(|| format!("invalid year from {}", year_source.as_str()))?;

    let data_dir = if let Some(value) = env_value(&lookup_env, "INCIDENTMAP_DATA_DIR") {
        absolutize(Path::new(&value), &project_root)
    } else if let Some(value) = config.data.data_dir.as_deref() {
        absolutize(Path::new(value.trim()), &project_root)
    } else {
        project_root.clone()
    };

    let csv_path = match overrides.csv.as_deref() {
        Some(path) => absolutize(path, &context.cwd),
        None => data_dir.join(format!("{year}.csv")),
    };
    let wikitext_path = match overrides.wikitext.as_deref() {
        Some(path) => absolutize(path, &context.cwd),
        None => data_dir.join(WIKITEXT_FILENAME),
    };
    let geocoder = config.geocoder_config_with_lookup(&lookup_env)?;

    Ok(Runtime {
        paths: ResolvedPaths {
            store_path: data_dir.join(format!("{year}.json")),
            map_path: data_dir.join(format!("{year}_map.txt")),
            table_path: data_dir.join(format!("{year}_table.txt")),
            csv_path,
            wikitext_path,
            project_root,
            config_path,
            data_dir,
            year,
            root_source,
            config_source,
            year_source,
        },
        geocoder,
    })
}

fn validate_year(year: &str) -> Result<()> {
    if year.len() != 4 || !year.bytes().all(|byte| byte.is_ascii_digit()) {
        bail!("year must be four digits, got '{year}'");
    }
    Ok(())
}

fn resolve_project_root<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.project_root.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = env_value(lookup_env, "INCIDENTMAP_PROJECT_ROOT") {
        return (absolutize(Path::new(&value), &context.cwd), ValueSource::Env);
    }

    let root = detect_project_root_heuristic(&context.cwd, context.executable_dir.as_deref());
    (root, ValueSource::Heuristic)
}

fn detect_project_root_heuristic(cwd: &Path, executable_dir: Option<&Path>) -> PathBuf {
    let mut seen = HashSet::new();
    for candidate in candidate_roots(cwd, executable_dir) {
        let key = normalize_for_display(&candidate);
        if !seen.insert(key) {
            continue;
        }
        if candidate.join(CONFIG_FILENAME).exists() {
            return candidate;
        }
    }
    cwd.to_path_buf()
}

fn candidate_roots(cwd: &Path, executable_dir: Option<&Path>) -> Vec<PathBuf> {
    let mut out = cwd.ancestors().map(Path::to_path_buf).collect::<Vec<_>>();
    if let Some(exe_dir) = executable_dir {
        out.extend(exe_dir.ancestors().map(Path::to_path_buf));
    }
    out
}

fn env_value<F>(lookup_env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_env(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
