use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use similar::TextDiff;

use crate::record::RecordStore;

/// Load a store that must already exist.
pub fn load_existing_store(path: &Path) -> Result<RecordStore> {
    let content = read_existing_store_text(path)?;
    parse_store(&content)
        .with_context(|| format!("failed to parse record store {}", path.display()))
}

/// Raw store text; `None` when the file is missing (first run of a year).
pub fn read_store_text(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => {
            Err(error).with_context(|| format!("failed to read record store {}", path.display()))
        }
    }
}

pub fn read_existing_store_text(path: &Path) -> Result<String> {
    match read_store_text(path)? {
        Some(content) => Ok(content),
        None => bail!(
            "record store {} does not exist; run `incidentmap create` first",
            path.display()
        ),
    }
}

pub fn parse_store(content: &str) -> Result<RecordStore> {
    if content.trim().is_empty() {
        return Ok(RecordStore::new());
    }
    serde_json::from_str(content).context("record store is not a valid JSON object of records")
}

/// Serialize with sorted keys, two-space indentation and a trailing newline.
pub fn render_store(store: &RecordStore) -> Result<String> {
    let mut rendered =
        serde_json::to_string_pretty(store).context("failed to serialize record store")?;
    rendered.push('\n');
    Ok(rendered)
}

/// Replace the store file in one step: write a sibling temp file, then rename over it.
pub fn write_store_text(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let staging = staging_path(path);
    fs::write(&staging, content)
        .with_context(|| format!("failed to write {}", staging.display()))?;
    fs::rename(&staging, path).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            staging.display(),
            path.display()
        )
    })
}

/// Unified diff between two renderings of a store, empty when they match.
pub fn store_diff(path: &Path, before: &str, after: &str) -> String {
    if before == after {
        return String::new();
    }
    let label = path.display().to_string();
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{label}"), &format!("b/{label}"))
        .to_string()
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|value| value.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use tempfile::tempdir;

    use super::{
        load_existing_store, parse_store, read_store_text, render_store, store_diff,
        write_store_text,
    };
    use crate::record::RecordStore;
    use crate::test_support::{record, ymd};

    fn sample() -> RecordStore {
        let mut store = RecordStore::new();
        store.insert(
            "20190804_Dayton_Ohio_0".to_string(),
            record(ymd(2019, 8, 4), "Dayton", "Ohio", "E 5th St"),
        );
        store.insert(
            "20190101_Springfield_IL_0".to_string(),
            record(ymd(2019, 1, 1), "Springfield", "IL", ""),
        );
        store
    }

    #[test]
    fn missing_store_reads_as_none() {
        let temp = tempdir().expect("tempdir");
        assert_eq!(read_store_text(&temp.path().join("2019.json")).expect("read"), None);
    }

    #[test]
    fn load_existing_store_requires_file() {
        let temp = tempdir().expect("tempdir");
        let error = load_existing_store(&temp.path().join("2019.json")).expect_err("must fail");
        assert!(error.to_string().contains("does not exist"));
    }

    #[test]
    fn write_then_load_preserves_records() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("data").join("2019.json");
        write_store_text(&path, &render_store(&sample()).expect("render")).expect("write");
        assert!(!temp.path().join("data").join("2019.json.tmp").exists());
        assert_eq!(load_existing_store(&path).expect("load"), sample());
    }

    #[test]
    fn rendered_store_is_sorted_and_indented() {
        let rendered = render_store(&sample()).expect("render");
        let springfield = rendered.find("20190101_Springfield_IL_0").expect("springfield");
        let dayton = rendered.find("20190804_Dayton_Ohio_0").expect("dayton");
        assert!(springfield < dayton);
        assert!(rendered.starts_with("{\n  \"20190101_Springfield_IL_0\": {\n    \"city\""));
        assert!(rendered.ends_with("}\n"));
    }

    #[test]
    fn invalid_store_reports_path() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("2019.json");
        fs::write(&path, "[1, 2]").expect("write");
        let error = load_existing_store(&path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse record store"));
        assert!(parse_store("  \n").expect("blank").is_empty());
    }

    #[test]
    fn store_diff_is_empty_for_identical_text() {
        let path = Path::new("2019.json");
        assert!(store_diff(path, "{}\n", "{}\n").is_empty());
        let diff = store_diff(path, "{\n}\n", "{\n  \"a\": 1\n}\n");
        assert!(diff.contains("+  \"a\": 1"));
        assert!(diff.contains("a/2019.json"));
    }
}
