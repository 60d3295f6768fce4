use std::collections::VecDeque;

use anyhow::{Result, bail};
use chrono::NaiveDate;

use crate::csv_input::IncidentRow;
use crate::geocode::{Candidate, GeocodeApi, LocationQuery};
use crate::prompt::Resolver;
use crate::record::IncidentRecord;

pub const MOCK_API_URL: &str = "https://geocoder.test/search";

/// Answers questions from a fixed script and records what was asked.
#[derive(Default)]
pub struct ScriptedResolver {
    answers: VecDeque<String>,
    pub questions: Vec<String>,
}

impl ScriptedResolver {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            questions: Vec::new(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Resolver for ScriptedResolver {
    fn ask(&mut self, question: &str) -> Result<String> {
        self.questions.push(question.to_string());
        match self.answers.pop_front() {
            Some(answer) => Ok(answer),
            None => bail!("unexpected prompt: {question}"),
        }
    }
}

pub enum MockResponse {
    Candidates(Vec<Candidate>),
    Throttled,
}

/// Replays queued responses; any lookup beyond the queue is an error.
#[derive(Default)]
pub struct MockGeocoder {
    responses: VecDeque<MockResponse>,
    pub queries: Vec<LocationQuery>,
}

impl MockGeocoder {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = MockResponse>,
    {
        Self {
            responses: responses.into_iter().collect(),
            queries: Vec::new(),
        }
    }

    /// A geocoder that fails the test run if it is ever asked anything.
    pub fn unused() -> Self {
        Self::default()
    }
}

impl GeocodeApi for MockGeocoder {
    fn search(&mut self, query: &LocationQuery) -> Result<Vec<Candidate>> {
        self.queries.push(query.clone());
        match self.responses.pop_front() {
            Some(MockResponse::Candidates(candidates)) => Ok(candidates),
            Some(MockResponse::Throttled) => {
                bail!("geocoding service throttled this client (HTTP 429 Too Many Requests)")
            }
            None => bail!("unexpected geocoding lookup for {}", query.describe()),
        }
    }

    fn api_url(&self) -> &str {
        MOCK_API_URL
    }

    fn request_count(&self) -> usize {
        self.queries.len()
    }
}

pub fn one(lat: f64, lon: f64) -> MockResponse {
    MockResponse::Candidates(vec![Candidate { lat, lon }])
}

pub fn none() -> MockResponse {
    MockResponse::Candidates(Vec::new())
}

pub fn many() -> MockResponse {
    MockResponse::Candidates(vec![
        Candidate { lat: 1.0, lon: 1.0 },
        Candidate { lat: 2.0, lon: 2.0 },
    ])
}

pub fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub fn record(date: NaiveDate, city: &str, state: &str, street: &str) -> IncidentRecord {
    IncidentRecord::new(date, city, state, Some(street), 1, 3)
}

pub fn incident_row(
    row: usize,
    date: NaiveDate,
    city: &str,
    state: &str,
    street: &str,
    killed: u32,
    injured: u32,
) -> IncidentRow {
    IncidentRow {
        row,
        date,
        state: state.to_string(),
        city: city.to_string(),
        street: street.to_string(),
        killed,
        injured,
    }
}
