use std::str::FromStr;

use anyhow::bail;

use crate::geocode::{LocationQuery, ResponseFormat, lookup_url};
use crate::record::{IncidentRecord, RecordStore};

const MAP_MARKER: &str =
    "{{Location map~|United States|mark=Location dot red.svg|marksize=4|lat_deg=";
const TABLE_DATE_FORMAT: &str = "%B %-d, %Y";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Map,
    Both,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Map => "map",
            Self::Both => "both",
        }
    }

    pub fn includes_map(self) -> bool {
        matches!(self, Self::Map | Self::Both)
    }

    pub fn includes_table(self) -> bool {
        matches!(self, Self::Table | Self::Both)
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "map" => Ok(Self::Map),
            "both" => Ok(Self::Both),
            other => bail!("unrecognized output format '{other}'; expected table, map, or both"),
        }
    }
}

/// One `{{Location map~}}` marker. Records without coordinates get an empty marker
/// and a trailing note with the search URL a human can follow.
pub fn map_line(record: &IncidentRecord, api_url: &str) -> String {
    let comment = format!(
        "<!--{}: {}, {}-->",
        record.date_key(),
        record.city,
        record.state
    );
    match record.coordinates() {
        Some(coordinates) => format!(
            "{MAP_MARKER}{}|lon_deg={}}}}}{comment}\n",
            coordinates.lat, coordinates.lon
        ),
        None => {
            let query = LocationQuery::new(record.street.as_deref(), &record.city, &record.state);
            format!(
                "{MAP_MARKER}|lon_deg=}}}}{comment} # COULD NOT FIND COORDINATES FOR {}: {}\n",
                query.describe(),
                lookup_url(api_url, &query, ResponseFormat::Html)
            )
        }
    }
}

pub fn table_row(record: &IncidentRecord) -> String {
    let location = match &record.wikilink_target {
        Some(target) => format!("[[{target}|{}]]", record.location()),
        None => format!("[[{}]]", record.location()),
    };
    format!(
        "|{{{{Dts|{}}}}}\n|{location}\n|{}\n|{}\n|'''{}'''\n|{}{}\n|-\n",
        record.date.format(TABLE_DATE_FORMAT),
        record.killed,
        record.injured,
        record.total,
        record.description.as_deref().unwrap_or(""),
        record.refs.concat()
    )
}

/// Newest first. The sort is stable, so records sharing a date stay in key order.
pub fn ordered_records(store: &RecordStore) -> Vec<(&String, &IncidentRecord)> {
    let mut records = store.iter().collect::<Vec<_>>();
    records.sort_by(|left, right| right.1.date.cmp(&left.1.date));
    records
}

pub fn render_map(store: &RecordStore, api_url: &str) -> String {
    ordered_records(store)
        .into_iter()
        .map(|(_, record)| map_line(record, api_url))
        .collect()
}

pub fn render_table(store: &RecordStore) -> String {
    ordered_records(store)
        .into_iter()
        .map(|(_, record)| table_row(record))
        .collect()
}
