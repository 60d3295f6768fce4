use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::NaiveDate;

pub const CSV_DATE_FORMAT: &str = "%B %d, %Y";
const REQUIRED_COLUMNS: usize = 6;

/// One data row: `date, state, city, street, killed, injured, ...`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentRow {
    pub row: usize,
    pub date: NaiveDate,
    pub state: String,
    pub city: String,
    pub street: String,
    pub killed: u32,
    pub injured: u32,
}

pub fn read_incident_rows(path: &Path) -> Result<Vec<IncidentRow>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read incident CSV {}", path.display()))?;
    parse_incident_rows(&content)
        .with_context(|| format!("failed to parse incident CSV {}", path.display()))
}

/// Parse every data row. The header row is skipped; any malformed row fails the whole file.
pub fn parse_incident_rows(content: &str) -> Result<Vec<IncidentRow>> {
    let rows = parse_csv_rows(strip_bom(content), ',');
    let mut output = Vec::new();
    for (index, fields) in rows.iter().enumerate().skip(1) {
        if fields.iter().all(|value| value.trim().is_empty()) {
            continue;
        }
        output.push(parse_row(index, fields)?);
    }
    Ok(output)
}

fn parse_row(row: usize, fields: &[String]) -> Result<IncidentRow> {
    if fields.len() < REQUIRED_COLUMNS {
        bail!(
            "row {row}: expected at least {REQUIRED_COLUMNS} columns (date, state, city, street, killed, injured), found {}",
            fields.len()
        );
    }
    let field = |index: usize| fields[index].trim();

    let date = NaiveDate::parse_from_str(field(0), CSV_DATE_FORMAT)
        .with_context(|| format!("row {row}: invalid date '{}'", field(0)))?;
    let killed = field(4)
        .parse::<u32>()
        .with_context(|| format!("row {row}: killed '{}' is not a whole number", field(4)))?;
    let injured = field(5)
        .parse::<u32>()
        .with_context(|| format!("row {row}: injured '{}' is not a whole number", field(5)))?;

    Ok(IncidentRow {
        row,
        date,
        state: field(1).to_string(),
        city: field(2).to_string(),
        street: field(3).to_string(),
        killed,
        injured,
    })
}

fn parse_csv_rows(content: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            if ch == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(ch);
            }
            continue;
        }

        match ch {
            '"' => in_quotes = true,
            '\n' | '\r' => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            _ if ch == delimiter => row.push(std::mem::take(&mut field)),
            _ => field.push(ch),
        }
    }

    row.push(field);
    if row.len() > 1 || row.first().is_some_and(|value| !value.trim().is_empty()) {
        rows.push(row);
    }
    rows
}

fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{parse_csv_rows, parse_incident_rows, read_incident_rows};
    use crate::test_support::ymd;

    const HEADER: &str = "Incident Date,State,City Or County,Address,# Killed,# Injured,Operations\n";

    #[test]
    fn parses_rows_and_ignores_trailing_columns() {
        let content = format!(
            "{HEADER}\"August 4, 2019\",Ohio,Dayton,\"400 block of E 5th St\",9,17,N/A\n\"July 28, 2019\",California,Gilroy,7050 Miller Ave,3,13,N/A\n"
        );
        let rows = parse_incident_rows(&content).expect("parse");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].row, 1);
        assert_eq!(rows[0].date, ymd(2019, 8, 4));
        assert_eq!(rows[0].state, "Ohio");
        assert_eq!(rows[0].city, "Dayton");
        assert_eq!(rows[0].street, "400 block of E 5th St");
        assert_eq!((rows[0].killed, rows[0].injured), (9, 17));
        assert_eq!(rows[1].city, "Gilroy");
    }

    #[test]
    fn accepts_bom_crlf_and_blank_lines() {
        let content = format!(
            "\u{feff}{}\r\n\r\n\"January 5, 2019\",Illinois,Chicago,,0,4\r\n",
            HEADER.trim_end()
        );
        let rows = parse_incident_rows(&content).expect("parse");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].date, ymd(2019, 1, 5));
        assert_eq!(rows[0].street, "");
    }

    #[test]
    fn header_only_file_has_no_rows() {
        assert!(parse_incident_rows(HEADER).expect("parse").is_empty());
        assert!(parse_incident_rows("").expect("parse").is_empty());
    }

    #[test]
    fn malformed_date_aborts_with_row_number() {
        let content = format!("{HEADER}\"Aug 4 2019\",Ohio,Dayton,,9,17\n");
        let error = parse_incident_rows(&content).expect_err("must fail");
        assert!(error.to_string().contains("row 1: invalid date"));
    }

    #[test]
    fn non_numeric_counts_abort() {
        let content = format!(
            "{HEADER}\"August 4, 2019\",Ohio,Dayton,,9,17\n\"August 5, 2019\",Ohio,Dayton,,nine,1\n"
        );
        let error = parse_incident_rows(&content).expect_err("must fail");
        assert!(error.to_string().contains("row 2: killed 'nine'"));
    }

    #[test]
    fn short_rows_abort() {
        let content = format!("{HEADER}\"August 4, 2019\",Ohio,Dayton\n");
        let error = parse_incident_rows(&content).expect_err("must fail");
        assert!(error.to_string().contains("expected at least 6 columns"));
    }

    #[test]
    fn quoted_fields_keep_commas_quotes_and_newlines() {
        let rows = parse_csv_rows("a,\"b, c\",\"say \"\"hi\"\"\",\"x\ny\"", ',');
        assert_eq!(rows, vec![vec!["a", "b, c", "say \"hi\"", "x\ny"]]);
    }

    #[test]
    fn read_incident_rows_reports_path_on_failure() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("2019.csv");
        fs::write(&path, format!("{HEADER}bad,Ohio,Dayton,,1,1\n")).expect("write");
        let error = read_incident_rows(&path).expect_err("must fail");
        assert!(error.to_string().contains("2019.csv"));

        let missing = read_incident_rows(&temp.path().join("missing.csv")).expect_err("missing");
        assert!(missing.to_string().contains("failed to read incident CSV"));
    }
}
