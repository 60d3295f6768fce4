use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::record::STORE_DATE_FORMAT;

/// Date plus whitespace-free city and state. Every id for the same place and day shares it.
pub fn id_prefix(date: NaiveDate, city: &str, state: &str) -> String {
    format!(
        "{}_{}_{}",
        date.format(STORE_DATE_FORMAT),
        strip_whitespace(city),
        strip_whitespace(state)
    )
}

pub fn format_id(prefix: &str, ordinal: u32) -> String {
    format!("{prefix}_{ordinal}")
}

/// Assign the lowest free ordinal for this date and location among `existing` keys.
pub fn assign_id<V>(
    date: NaiveDate,
    city: &str,
    state: &str,
    existing: &BTreeMap<String, V>,
) -> String {
    next_free_id(&id_prefix(date, city, state), |candidate| {
        existing.contains_key(candidate)
    })
}

pub fn next_free_id<F>(prefix: &str, is_taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let mut ordinal = 0u32;
    loop {
        let candidate = format_id(prefix, ordinal);
        if !is_taken(&candidate) {
            return candidate;
        }
        ordinal += 1;
    }
}

/// Split `{yyyymmdd}_{city}_{state}_{ordinal}` into its prefix and ordinal.
pub fn parse_id(id: &str) -> Option<(&str, u32)> {
    let (prefix, ordinal) = id.rsplit_once('_')?;
    let ordinal = ordinal.parse::<u32>().ok()?;
    let date = prefix.get(..8)?;
    if !date.bytes().all(|byte| byte.is_ascii_digit()) || prefix.as_bytes().get(8) != Some(&b'_')
    {
        return None;
    }
    Some((prefix, ordinal))
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|ch| !ch.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use chrono::NaiveDate;

    use super::{assign_id, format_id, id_prefix, next_free_id, parse_id};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 1, 1).expect("date")
    }

    #[test]
    fn prefix_strips_whitespace_from_location() {
        assert_eq!(
            id_prefix(date(), "Port St. Lucie", "New York"),
            "20190101_PortSt.Lucie_NewYork"
        );
    }

    #[test]
    fn first_id_uses_ordinal_zero() {
        let empty = BTreeMap::<String, ()>::new();
        assert_eq!(
            assign_id(date(), "Springfield", "IL", &empty),
            "20190101_Springfield_IL_0"
        );
    }

    #[test]
    fn duplicates_differ_only_by_ordinal() {
        let mut store = BTreeMap::new();
        let first = assign_id(date(), "Springfield", "IL", &store);
        store.insert(first.clone(), ());
        let second = assign_id(date(), "Springfield", "IL", &store);
        store.insert(second.clone(), ());

        assert_eq!(first, "20190101_Springfield_IL_0");
        assert_eq!(second, "20190101_Springfield_IL_1");
        assert_eq!(
            parse_id(&first).map(|(prefix, _)| prefix),
            parse_id(&second).map(|(prefix, _)| prefix)
        );
    }

    #[test]
    fn assignment_fills_lowest_gap() {
        let taken = BTreeSet::from([
            "20190101_Springfield_IL_0".to_string(),
            "20190101_Springfield_IL_2".to_string(),
        ]);
        let id = next_free_id("20190101_Springfield_IL", |candidate| {
            taken.contains(candidate)
        });
        assert_eq!(id, "20190101_Springfield_IL_1");
    }

    #[test]
    fn assignment_is_deterministic_across_runs() {
        let rows = [
            ("Springfield", "IL"),
            ("Chicago", "IL"),
            ("Springfield", "IL"),
            ("Springfield", "MO"),
            ("Chicago", "IL"),
        ];
        let run = || {
            let mut store = BTreeMap::new();
            let mut ids = Vec::new();
            for (city, state) in rows {
                let id = assign_id(date(), city, state, &store);
                store.insert(id.clone(), ());
                ids.push(id);
            }
            ids
        };
        assert_eq!(run(), run());
        assert_eq!(run()[4], "20190101_Chicago_IL_1");
    }

    #[test]
    fn parse_id_splits_components() {
        let (prefix, ordinal) = parse_id("20190804_Dayton_Ohio_3").expect("parse");
        assert_eq!(prefix, "20190804_Dayton_Ohio");
        assert_eq!(ordinal, 3);
        assert_eq!(format_id(prefix, ordinal), "20190804_Dayton_Ohio_3");

        assert!(parse_id("Dayton_Ohio_0").is_none());
        assert!(parse_id("20190804_Dayton_Ohio_x").is_none());
    }
}
