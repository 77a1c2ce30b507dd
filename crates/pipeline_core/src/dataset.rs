//! Parsers for the two stored datasets.
//!
//! The price-relative file is the BLS tab-separated time series layout; the
//! population document is the World Bank indicator response. Both parsers are
//! strict about shape (missing columns are malformed data) and lenient about
//! individual rows (non-numeric cells drop the row).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PipelineError;

const REQUIRED_SERIES_COLUMNS: [&str; 4] = ["series_id", "year", "period", "value"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesObservation {
    pub series_id: String,
    pub year: i32,
    pub period: String,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PopulationRecord {
    pub year: i32,
    pub population: f64,
}

/// Parses the price-relative series, keeping quarterly observations only.
pub fn parse_price_relative_series(bytes: &[u8]) -> Result<Vec<SeriesObservation>, PipelineError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|error| PipelineError::malformed("price-relative series", error.to_string()))?;

    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    let header = lines
        .next()
        .ok_or_else(|| PipelineError::malformed("price-relative series", "file is empty"))?;
    let columns: Vec<String> = header
        .split('\t')
        .map(|column| column.trim().to_lowercase())
        .collect();

    let missing: BTreeSet<&str> = REQUIRED_SERIES_COLUMNS
        .iter()
        .copied()
        .filter(|required| !columns.iter().any(|column| column == required))
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::malformed(
            "price-relative series",
            format!("missing columns {missing:?}"),
        ));
    }

    let index_of = |name: &str| columns.iter().position(|column| column == name);
    let (Some(series_idx), Some(year_idx), Some(period_idx), Some(value_idx)) = (
        index_of("series_id"),
        index_of("year"),
        index_of("period"),
        index_of("value"),
    ) else {
        return Err(PipelineError::malformed(
            "price-relative series",
            "required column lookup failed",
        ));
    };

    let mut observations = Vec::new();
    for line in lines {
        let cells: Vec<&str> = line.split('\t').map(str::trim).collect();
        let cell = |idx: usize| cells.get(idx).copied().unwrap_or("");

        let period = cell(period_idx);
        if !is_quarter(period) {
            continue;
        }
        let (Some(year), Some(value)) = (parse_year(cell(year_idx)), parse_number(cell(value_idx)))
        else {
            continue;
        };

        observations.push(SeriesObservation {
            series_id: cell(series_idx).to_string(),
            year,
            period: period.to_string(),
            value,
        });
    }

    Ok(observations)
}

/// Parses a population document.
///
/// Accepts `[metadata, rows]` and `{ "data": rows }`; each row needs a
/// `year` (or `date`) and a `population` (or `value`) field.
pub fn parse_population(bytes: &[u8]) -> Result<Vec<PopulationRecord>, PipelineError> {
    let document: Value = serde_json::from_slice(bytes)
        .map_err(|error| PipelineError::malformed("population", error.to_string()))?;

    let rows: Vec<Map<String, Value>> = population_rows(&document)
        .iter()
        .filter_map(Value::as_object)
        .map(normalize_row)
        .collect();

    let has_column = |name: &str| rows.iter().any(|row| row.contains_key(name));
    let year_field = if has_column("year") {
        "year"
    } else if has_column("date") {
        "date"
    } else {
        return Err(PipelineError::malformed(
            "population",
            "rows carry neither 'year' nor 'date'",
        ));
    };
    let population_field = if has_column("population") {
        "population"
    } else if has_column("value") {
        "value"
    } else {
        return Err(PipelineError::malformed(
            "population",
            "rows carry neither 'population' nor 'value'",
        ));
    };

    Ok(rows
        .iter()
        .filter_map(|row| {
            let year = row.get(year_field).and_then(numeric).map(|y| y as i32)?;
            let population = row.get(population_field).and_then(numeric)?;
            Some(PopulationRecord { year, population })
        })
        .collect())
}

fn population_rows(document: &Value) -> &[Value] {
    match document {
        Value::Array(items) if items.len() > 1 => items[1].as_array().map(Vec::as_slice).unwrap_or(&[]),
        Value::Object(object) => object
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    }
}

fn normalize_row(row: &Map<String, Value>) -> Map<String, Value> {
    row.iter()
        .map(|(key, value)| (key.trim().to_lowercase(), value.clone()))
        .collect()
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => parse_number(text),
        _ => None,
    }
    .filter(|number| number.is_finite())
}

fn parse_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|number| number.is_finite())
}

fn parse_year(raw: &str) -> Option<i32> {
    parse_number(raw).map(|year| year as i32)
}

fn is_quarter(period: &str) -> bool {
    matches!(period.as_bytes(), [b'Q', b'0', b'1'..=b'4'])
}
