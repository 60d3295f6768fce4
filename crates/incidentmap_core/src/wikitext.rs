use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use regex::Regex;

use crate::csv_input::CSV_DATE_FORMAT;

const ENTRY_SEPARATOR: &str = "|-";

const ENTRY_PATTERN: &str = concat!(
    r"(?i)\n*\|(?:\{\{dts\|)?",
    r"(?P<date>(?:January|February|March|April|May|June|July|August|September|October|November|December) \d{1,2}, \d{4})",
    r"(?:\}\})?[ \t]*\n+",
    r"\|\[\[(?P<target>[^\]\n]*\|)?(?P<location>[^\]\n]*)\]\][^\n]*\n+",
    r"\|[ \t]*(?P<killed>\d+)[^\n]*\n+",
    r"\|[ \t]*(?P<injured>\d+)[^\n]*\n+",
    r"\|[ \t]*'''(?P<total>\d+)'''[^\n]*\n+",
    r"\|(?P<description>[^\n]*?)(?P<refs><ref[^\n]*(?:</ref>|/>))?[ \t]*(?:\n|\z)",
);

// A paired ref's opening tag must not end in `/`, or a self-closing ref would swallow the next one.
const REF_PATTERN: &str = r"(?i)<ref[^>]*/>|<ref(?:\s[^>]*[^/>])?>.*?</ref>";

/// One table row scraped from article markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupEntry {
    /// 1-based position among the `|-` separated chunks.
    pub index: usize,
    pub date: NaiveDate,
    pub wikilink_target: Option<String>,
    pub location: String,
    pub killed: u32,
    pub injured: u32,
    pub total: u32,
    pub description: Option<String>,
    pub refs: Vec<String>,
}

impl MarkupEntry {
    pub fn total_is_consistent(&self) -> bool {
        self.killed.checked_add(self.injured) == Some(self.total)
    }
}

pub struct MarkupParser {
    entry: Regex,
    reference: Regex,
}

impl MarkupParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            entry: Regex::new(ENTRY_PATTERN).context("failed to compile markup entry pattern")?,
            reference: Regex::new(REF_PATTERN).context("failed to compile reference pattern")?,
        })
    }

    /// Split on row separators and parse each chunk. Table headers, the closing
    /// `|}` and blank chunks are skipped; anything else that does not parse is an error.
    pub fn parse_entries(&self, text: &str) -> Result<Vec<MarkupEntry>> {
        let normalized = text.replace("\r\n", "\n");
        let mut entries = Vec::new();
        for (position, chunk) in normalized.split(ENTRY_SEPARATOR).enumerate() {
            let index = position + 1;
            let trimmed = chunk.trim();
            if trimmed.is_empty() || trimmed == "|}" {
                continue;
            }
            match self.parse_entry(index, chunk)? {
                Some(entry) => entries.push(entry),
                None if trimmed.starts_with("{|") => continue,
                None => bail!(
                    "unable to parse markup entry {index}: {}",
                    first_line(trimmed)
                ),
            }
        }
        Ok(entries)
    }

    fn parse_entry(&self, index: usize, chunk: &str) -> Result<Option<MarkupEntry>> {
        let Some(captures) = self.entry.captures(chunk) else {
            return Ok(None);
        };
        let group = |name: &str| captures.name(name).map_or("", |value| value.as_str());

        let date = NaiveDate::parse_from_str(group("date"), CSV_DATE_FORMAT)
            .with_context(|| format!("markup entry {index}: invalid date '{}'", group("date")))?;
        let count = |name: &str| {
            group(name)
                .parse::<u32>()
                .with_context(|| format!("markup entry {index}: {name} '{}' is out of range", group(name)))
        };
        let wikilink_target = Some(group("target").trim_end_matches('|').trim())
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);
        let description = Some(group("description").trim())
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);

        Ok(Some(MarkupEntry {
            index,
            date,
            wikilink_target,
            location: group("location").trim().to_string(),
            killed: count("killed")?,
            injured: count("injured")?,
            total: count("total")?,
            description,
            refs: self.split_refs(group("refs")),
        }))
    }

    pub fn split_refs(&self, refs: &str) -> Vec<String> {
        self.reference
            .find_iter(refs)
            .map(|found| found.as_str().to_string())
            .collect()
    }
}

pub fn parse_entries(text: &str) -> Result<Vec<MarkupEntry>> {
    MarkupParser::new()?.parse_entries(text)
}

pub fn read_entries(path: &Path) -> Result<Vec<MarkupEntry>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read wiki markup {}", path.display()))?;
    parse_entries(&text).with_context(|| format!("failed to parse wiki markup {}", path.display()))
}

/// Split "City, State" on the last comma.
pub fn split_location(location: &str) -> Option<(String, String)> {
    let (city, state) = location.rsplit_once(',')?;
    let (city, state) = (city.trim(), state.trim());
    if city.is_empty() || state.is_empty() {
        return None;
    }
    Some((city.to_string(), state.to_string()))
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::{MarkupParser, parse_entries, split_location};
    use crate::test_support::ymd;

    const TABLE: &str = "{| class=\"wikitable sortable\"\n! Date !! Location !! Dead !! Injured !! Total !! Description\n|-\n|{{Dts|August 4, 2019}}\n|[[2019 Dayton shooting|Dayton, Ohio]]\n|9\n|17\n|'''26'''\n|A gunman opened fire in the Oregon District.<ref name=\"nyt\">NYT</ref><ref>AP</ref>\n|-\n|{{dts|July 28, 2019}}\n|[[Gilroy, California]]\n|3\n|13\n|'''16'''\n|Festival shooting.\n|-\n|}\n";

    #[test]
    fn parses_table_rows() {
        let entries = parse_entries(TABLE).expect("parse");
        assert_eq!(entries.len(), 2);

        let dayton = &entries[0];
        assert_eq!(dayton.date, ymd(2019, 8, 4));
        assert_eq!(dayton.wikilink_target.as_deref(), Some("2019 Dayton shooting"));
        assert_eq!(dayton.location, "Dayton, Ohio");
        assert_eq!((dayton.killed, dayton.injured, dayton.total), (9, 17, 26));
        assert_eq!(
            dayton.description.as_deref(),
            Some("A gunman opened fire in the Oregon District.")
        );
        assert_eq!(
            dayton.refs,
            vec!["<ref name=\"nyt\">NYT</ref>".to_string(), "<ref>AP</ref>".to_string()]
        );

        let gilroy = &entries[1];
        assert_eq!(gilroy.wikilink_target, None);
        assert_eq!(gilroy.description.as_deref(), Some("Festival shooting."));
        assert!(gilroy.refs.is_empty());
    }

    #[test]
    fn plain_dates_and_self_closing_refs_parse() {
        let text = "|March 3, 2019\n|[[Chicago, Illinois]]\n|0\n|4\n|'''4'''\n|Drive-by.<ref name=\"trib\" />\n";
        let entries = parse_entries(text).expect("parse");
        assert_eq!(entries[0].date, ymd(2019, 3, 3));
        assert_eq!(entries[0].refs, vec!["<ref name=\"trib\" />".to_string()]);
        assert_eq!(entries[0].description.as_deref(), Some("Drive-by."));
    }

    #[test]
    fn unparseable_chunk_is_an_error() {
        let text = "|{{Dts|August 4, 2019}}\n|[[Dayton, Ohio]]\n|nine\n|17\n|'''26'''\n|x\n";
        let error = parse_entries(text).expect_err("must fail");
        assert!(error.to_string().contains("unable to parse markup entry 1"));
    }

    #[test]
    fn markup_total_mismatch_is_visible() {
        let text = "|{{Dts|May 1, 2019}}\n|[[Reno, Nevada]]\n|1\n|3\n|'''5'''\n|\n";
        let entries = parse_entries(text).expect("parse");
        assert!(!entries[0].total_is_consistent());
        assert_eq!(entries[0].description, None);
    }

    #[test]
    fn split_refs_keeps_order() {
        let parser = MarkupParser::new().expect("parser");
        assert_eq!(
            parser.split_refs("<ref>a</ref><ref name=b/><ref>c</ref>"),
            vec!["<ref>a</ref>", "<ref name=b/>", "<ref>c</ref>"]
        );
    }

    #[test]
    fn self_closing_ref_before_paired_ref_stays_separate() {
        let text = "|{{Dts|May 2, 2019}}\n|[[Reno, Nevada]]\n|1\n|3\n|'''4'''\n|Desc.<ref name=\"a\" /><ref>b</ref>\n";
        let entries = parse_entries(text).expect("parse");
        assert_eq!(
            entries[0].refs,
            vec!["<ref name=\"a\" />".to_string(), "<ref>b</ref>".to_string()]
        );
        assert_eq!(entries[0].description.as_deref(), Some("Desc."));
    }

    #[test]
    fn split_location_uses_last_comma() {
        assert_eq!(
            split_location("Washington, D.C., District of Columbia"),
            Some(("Washington, D.C.".to_string(), "District of Columbia".to_string()))
        );
        assert_eq!(split_location("Nowhere"), None);
        assert_eq!(split_location(", Ohio"), None);
    }
}
