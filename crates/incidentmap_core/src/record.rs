use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Incident records keyed by id. A `BTreeMap` keeps the store file sorted.
pub type RecordStore = BTreeMap<String, IncidentRecord>;

pub const STORE_DATE_FORMAT: &str = "%Y%m%d";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    /// Build coordinates rounded to the precision kept in the store.
    pub fn rounded(lat: f64, lon: f64) -> Self {
        Self {
            lat: round_coordinate(lat),
            lon: round_coordinate(lon),
        }
    }
}

/// Round to 4 decimal places; the lookup service returns artificially precise values.
pub fn round_coordinate(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

// Fields are declared in key order so serialized records come out sorted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRecord {
    pub city: String,
    #[serde(with = "store_date")]
    pub date: NaiveDate,
    #[serde(default)]
    pub description: Option<String>,
    pub injured: u32,
    pub killed: u32,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub refs: Vec<String>,
    pub state: String,
    #[serde(default)]
    pub street: Option<String>,
    pub total: u32,
    #[serde(default)]
    pub wikilink_target: Option<String>,
}

impl IncidentRecord {
    pub fn new(
        date: NaiveDate,
        city: &str,
        state: &str,
        street: Option<&str>,
        killed: u32,
        injured: u32,
    ) -> Self {
        Self {
            city: city.to_string(),
            date,
            description: None,
            injured,
            killed,
            lat: None,
            lon: None,
            refs: Vec::new(),
            state: state.to_string(),
            street: street
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string),
            total: killed.saturating_add(injured),
            wikilink_target: None,
        }
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(Coordinates { lat, lon }),
            _ => None,
        }
    }

    pub fn set_coordinates(&mut self, coordinates: Option<Coordinates>) {
        self.lat = coordinates.map(|value| value.lat);
        self.lon = coordinates.map(|value| value.lon);
    }

    /// Replace both counts and recompute `total`.
    pub fn set_counts(&mut self, killed: u32, injured: u32) {
        self.killed = killed;
        self.injured = injured;
        self.total = killed.saturating_add(injured);
    }

    pub fn total_is_consistent(&self) -> bool {
        self.killed.checked_add(self.injured) == Some(self.total)
    }

    pub fn street_or_empty(&self) -> &str {
        self.street.as_deref().unwrap_or("")
    }

    pub fn location(&self) -> String {
        format!("{}, {}", self.city, self.state)
    }

    pub fn date_key(&self) -> String {
        self.date.format(STORE_DATE_FORMAT).to_string()
    }
}

/// A stored or parsed record whose `total` disagreed with `killed + injured`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotalMismatch {
    pub id: String,
    pub killed: u32,
    pub injured: u32,
    pub total: u32,
}

impl TotalMismatch {
    pub fn of(id: &str, record: &IncidentRecord) -> Self {
        Self {
            id: id.to_string(),
            killed: record.killed,
            injured: record.injured,
            total: record.total,
        }
    }
}

mod store_date {
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer, de};

    use super::STORE_DATE_FORMAT;

    pub fn serialize<S>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&date.format(STORE_DATE_FORMAT).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDate, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(raw.trim(), STORE_DATE_FORMAT)
            .map_err(|error| de::Error::custom(format!("invalid record date {raw:?}: {error}")))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{Coordinates, IncidentRecord, round_coordinate};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 1, 1).expect("date")
    }

    #[test]
    fn rounding_keeps_four_decimals() {
        assert_eq!(round_coordinate(41.87811), 41.8781);
        assert_eq!(round_coordinate(-87.62979), -87.6298);
        assert_eq!(
            Coordinates::rounded(39.758949, -84.191605),
            Coordinates {
                lat: 39.7589,
                lon: -84.1916
            }
        );
    }

    #[test]
    fn set_counts_recomputes_total() {
        let mut record = IncidentRecord::new(date(), "Springfield", "Illinois", None, 1, 3);
        assert_eq!(record.total, 4);
        record.set_counts(2, 5);
        assert_eq!(record.total, 7);
        assert!(record.total_is_consistent());

        record.total = 9;
        assert!(!record.total_is_consistent());
    }

    #[test]
    fn blank_street_is_stored_as_unknown() {
        let record = IncidentRecord::new(date(), "Springfield", "Illinois", Some("  "), 0, 4);
        assert_eq!(record.street, None);
        assert_eq!(record.street_or_empty(), "");
    }

    #[test]
    fn coordinates_require_both_axes() {
        let mut record = IncidentRecord::new(date(), "Springfield", "Illinois", None, 0, 4);
        assert_eq!(record.coordinates(), None);
        record.lat = Some(39.8);
        assert_eq!(record.coordinates(), None);
        record.set_coordinates(Some(Coordinates {
            lat: 39.8,
            lon: -89.6,
        }));
        assert_eq!(
            record.coordinates(),
            Some(Coordinates {
                lat: 39.8,
                lon: -89.6
            })
        );
    }

    #[test]
    fn serialized_record_uses_compact_date_and_sorted_fields() {
        let record = IncidentRecord::new(date(), "Springfield", "Illinois", Some("Main St"), 1, 3);
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.starts_with(r#"{"city":"Springfield","date":"20190101","#));
        assert!(json.ends_with(r#""total":4,"wikilink_target":null}"#));

        let parsed: IncidentRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, record);
    }

    #[test]
    fn deserialize_tolerates_missing_optional_fields() {
        let parsed: IncidentRecord = serde_json::from_str(
            r#"{"city":"Dayton","date":"20190804","injured":17,"killed":9,"state":"Ohio","total":26}"#,
        )
        .expect("deserialize");
        assert_eq!(parsed.street, None);
        assert!(parsed.refs.is_empty());
        assert_eq!(parsed.coordinates(), None);
    }
}
