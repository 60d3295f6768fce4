use std::sync::OnceLock;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use regex::Regex;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::prompt::{Resolver, ask_coordinates};
use crate::record::Coordinates;

pub const DEFAULT_API_URL: &str = "https://nominatim.openstreetmap.org/search";
pub const DEFAULT_USER_AGENT: &str =
    "incidentmap/0.1 (wiki incident map maintenance; structured location lookups)";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 1_000;

// "5000 block of X St." confuses the lookup service; "5000 X St." is precise enough.
const BLOCK_QUALIFIER: &str = r"(?i)\s+block\s+of\b";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFormat {
    Json,
    Html,
}

impl ResponseFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Html => "html",
        }
    }
}

/// A structured lookup. `street` is already normalized; `None` means city and state only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationQuery {
    pub street: Option<String>,
    pub city: String,
    pub state: String,
}

impl LocationQuery {
    pub fn new(street: Option<&str>, city: &str, state: &str) -> Self {
        Self {
            street: street
                .map(normalize_street)
                .filter(|value| !value.is_empty()),
            city: city.trim().to_string(),
            state: state.trim().to_string(),
        }
    }

    pub fn without_street(&self) -> Self {
        Self {
            street: None,
            ..self.clone()
        }
    }

    pub fn describe(&self) -> String {
        match &self.street {
            Some(street) => format!("{street}, {}, {}", self.city, self.state),
            None => format!("{}, {}", self.city, self.state),
        }
    }

    fn query_pairs(&self, format: ResponseFormat) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);
        if let Some(street) = &self.street {
            pairs.push(("street", street.clone()));
        }
        pairs.push(("city", self.city.clone()));
        pairs.push(("state", self.state.clone()));
        pairs.push(("format", format.as_str().to_string()));
        pairs
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub lat: f64,
    pub lon: f64,
}

/// Lookup service seam. One call is one HTTP request; pacing is the caller's job.
pub trait GeocodeApi {
    fn search(&mut self, query: &LocationQuery) -> Result<Vec<Candidate>>;
    fn api_url(&self) -> &str;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeocoderConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub min_interval_ms: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            min_interval_ms: DEFAULT_MIN_INTERVAL_MS,
        }
    }
}

impl GeocoderConfig {
    pub fn pacer(&self) -> Pacer {
        Pacer::new(Duration::from_millis(self.min_interval_ms))
    }
}

/// Spaces lookups at least `min_interval` apart. Owned by whoever drives a run.
#[derive(Debug)]
pub struct Pacer {
    min_interval: Duration,
    last_request_at: Option<Instant>,
}

impl Pacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_request_at: None,
        }
    }

    pub fn unpaced() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Block until the next lookup may be issued, then mark it as issued.
    pub fn wait(&mut self) {
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
    }
}

pub struct NominatimClient {
    client: Client,
    config: GeocoderConfig,
    request_count: usize,
}

impl NominatimClient {
    pub fn new(config: GeocoderConfig) -> Result<Self> {
        Url::parse(&config.api_url)
            .with_context(|| format!("invalid geocoder api_url: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build geocoding HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }
}

impl GeocodeApi for NominatimClient {
    fn search(&mut self, query: &LocationQuery) -> Result<Vec<Candidate>> {
        self.request_count += 1;
        let response = self
            .client
            .get(&self.config.api_url)
            .header("User-Agent", self.config.user_agent.clone())
            .query(&query.query_pairs(ResponseFormat::Json))
            .send()
            .with_context(|| format!("failed to query geocoding service for {}", query.describe()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            bail!(
                "geocoding service throttled this client (HTTP 429 Too Many Requests); aborting without writing the store. Wait before re-running."
            );
        }
        if !status.is_success() {
            bail!(
                "geocoding service returned HTTP {status} for {}",
                query.describe()
            );
        }

        let payload: Vec<RawCandidate> = response
            .json()
            .context("failed to decode geocoding JSON response")?;
        payload
            .into_iter()
            .map(RawCandidate::into_candidate)
            .collect()
    }

    fn api_url(&self) -> &str {
        &self.config.api_url
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    lat: Value,
    lon: Value,
}

impl RawCandidate {
    fn into_candidate(self) -> Result<Candidate> {
        Ok(Candidate {
            lat: coordinate_value(&self.lat).context("invalid candidate latitude")?,
            lon: coordinate_value(&self.lon).context("invalid candidate longitude")?,
        })
    }
}

fn coordinate_value(value: &Value) -> Result<f64> {
    match value {
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| anyhow::anyhow!("{number} is not representable as f64")),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .with_context(|| format!("'{text}' is not a number")),
        other => bail!("unexpected coordinate value {other}"),
    }
}

pub fn normalize_street(street: &str) -> String {
    let trimmed = street.trim();
    match block_qualifier() {
        Some(pattern) => pattern.replace_all(trimmed, "").trim().to_string(),
        None => trimmed.to_string(),
    }
}

fn block_qualifier() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(BLOCK_QUALIFIER).ok())
        .as_ref()
}

/// Search URL for a human to open, embedded in prompts and unresolved markers.
pub fn lookup_url(api_url: &str, query: &LocationQuery, format: ResponseFormat) -> String {
    let pairs = query.query_pairs(format);
    match Url::parse_with_params(api_url, &pairs) {
        Ok(url) => url.to_string(),
        Err(_) => {
            let joined = pairs
                .iter()
                .map(|(key, value)| format!("{key}={value}"))
                .collect::<Vec<_>>()
                .join("&");
            format!("{api_url}?{joined}")
        }
    }
}

/// Resolve a location to rounded coordinates.
///
/// Tries street + city + state first, then city + state alone. Only a single
/// candidate counts as a match. When both fail and `interactive` is set, the
/// resolver is asked for coordinates; otherwise the result is `None`. Errors
/// from the lookup service, including throttling, are returned unchanged.
pub fn resolve(
    api: &mut dyn GeocodeApi,
    pacer: &mut Pacer,
    location: &LocationQuery,
    interactive: bool,
    resolver: &mut dyn Resolver,
) -> Result<Option<Coordinates>> {
    if location.street.is_some()
        && let Some(coordinates) = lookup_single(api, pacer, location)?
    {
        return Ok(Some(coordinates));
    }

    if let Some(coordinates) = lookup_single(api, pacer, &location.without_street())? {
        return Ok(Some(coordinates));
    }

    if !interactive {
        return Ok(None);
    }
    let url = lookup_url(api.api_url(), location, ResponseFormat::Html);
    let coordinates = ask_coordinates(
        resolver,
        &format!(
            "Find coordinates for {}: {url}. Rounding will be done automatically.",
            location.describe()
        ),
    )?;
    Ok(Some(coordinates))
}

fn lookup_single(
    api: &mut dyn GeocodeApi,
    pacer: &mut Pacer,
    query: &LocationQuery,
) -> Result<Option<Coordinates>> {
    pacer.wait();
    let candidates = api.search(query)?;
    debug!(
        query = %query.describe(),
        candidates = candidates.len(),
        "geocoding lookup"
    );
    match candidates.as_slice() {
        [only] => Ok(Some(Coordinates::rounded(only.lat, only.lon))),
        _ => Ok(None),
    }
}
