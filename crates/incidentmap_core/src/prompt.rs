use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};

use anyhow::{Context, Result, bail};

use crate::record::Coordinates;

/// Source of human decisions during a run. The console implementation blocks on
/// stdin; tests supply scripted answers.
pub trait Resolver {
    /// Show `question` and return the trimmed answer.
    fn ask(&mut self, question: &str) -> Result<String>;
}

pub struct ConsoleResolver<R, W> {
    input: R,
    output: W,
}

impl ConsoleResolver<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R, W> ConsoleResolver<R, W>
where
    R: BufRead,
    W: Write,
{
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl<R, W> Resolver for ConsoleResolver<R, W>
where
    R: BufRead,
    W: Write,
{
    fn ask(&mut self, question: &str) -> Result<String> {
        write!(self.output, "{question} ").context("failed to write prompt")?;
        self.output.flush().context("failed to flush prompt")?;

        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("failed to read answer from input")?;
        if read == 0 {
            bail!("input closed while waiting for an answer to: {question}");
        }
        Ok(line.trim().to_string())
    }
}

pub fn confirm(resolver: &mut dyn Resolver, question: &str) -> Result<bool> {
    let answer = resolver.ask(&format!(
        "{question}\n['y' to confirm, any other input if not]:"
    ))?;
    Ok(matches!(answer.as_str(), "y" | "Y"))
}

/// Ask for "lat,lon" until the answer parses. The result is rounded.
pub fn ask_coordinates(resolver: &mut dyn Resolver, context: &str) -> Result<Coordinates> {
    let mut question = format!("{context}\nlat,lon:");
    loop {
        let answer = resolver.ask(&question)?;
        match parse_coordinates(&answer) {
            Ok(coordinates) => return Ok(coordinates),
            Err(error) => {
                question = format!(
                    "Invalid input ({error}). Please enter comma-separated latitude and longitude.\nlat,lon:"
                );
            }
        }
    }
}

pub fn ask_count(resolver: &mut dyn Resolver, question: &str) -> Result<u32> {
    let mut prompt = question.to_string();
    loop {
        let answer = resolver.ask(&prompt)?;
        match answer.parse::<u32>() {
            Ok(value) => return Ok(value),
            Err(_) => {
                prompt = format!("'{answer}' is not a non-negative whole number. {question}");
            }
        }
    }
}

pub fn parse_coordinates(input: &str) -> Result<Coordinates> {
    let parts = input.split(',').map(str::trim).collect::<Vec<_>>();
    let [lat, lon] = parts.as_slice() else {
        bail!("expected exactly two comma-separated values");
    };
    let lat = lat
        .parse::<f64>()
        .with_context(|| format!("latitude '{lat}' is not a number"))?;
    let lon = lon
        .parse::<f64>()
        .with_context(|| format!("longitude '{lon}' is not a number"))?;
    if !(-90.0..=90.0).contains(&lat) {
        bail!("latitude {lat} is out of range");
    }
    if !(-180.0..=180.0).contains(&lon) {
        bail!("longitude {lon} is out of range");
    }
    Ok(Coordinates::rounded(lat, lon))
}
