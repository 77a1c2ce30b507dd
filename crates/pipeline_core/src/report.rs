//! Report computation over the population and price-relative datasets.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dataset::{PopulationRecord, SeriesObservation};

pub const SUMMARY_START_YEAR: i32 = 2013;
pub const SUMMARY_END_YEAR: i32 = 2018;
pub const BEST_YEAR_LIMIT: usize = 10;

/// Population mean and sample standard deviation over a year window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSummary {
    pub start_year: i32,
    pub end_year: i32,
    pub sample_count: usize,
    pub mean: Option<f64>,
    pub std_dev: Option<f64>,
}

/// The year with the largest annual sum for one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesBestYear {
    pub series_id: String,
    pub year: i32,
    pub value: f64,
}

/// One observation of the configured series joined with that year's population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPopulationRow {
    pub series_id: String,
    pub year: i32,
    pub period: String,
    pub value: f64,
    pub population: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportBody {
    pub population_summary: PopulationSummary,
    pub best_years: Vec<SeriesBestYear>,
    pub series_population: Vec<SeriesPopulationRow>,
}

pub fn build_report(
    observations: &[SeriesObservation],
    population: &[PopulationRecord],
    series_id: &str,
    period: &str,
) -> ReportBody {
    ReportBody {
        population_summary: summarize_population(population, SUMMARY_START_YEAR, SUMMARY_END_YEAR),
        best_years: best_year_per_series(observations, BEST_YEAR_LIMIT),
        series_population: join_series_with_population(observations, population, series_id, period),
    }
}

pub fn summarize_population(
    population: &[PopulationRecord],
    start_year: i32,
    end_year: i32,
) -> PopulationSummary {
    let samples: Vec<f64> = population
        .iter()
        .filter(|record| (start_year..=end_year).contains(&record.year))
        .map(|record| record.population)
        .collect();

    let count = samples.len();
    let mean = (count > 0).then(|| samples.iter().sum::<f64>() / count as f64);
    let std_dev = match mean {
        Some(mean) if count > 1 => {
            let squared: f64 = samples.iter().map(|sample| (sample - mean).powi(2)).sum();
            Some((squared / (count - 1) as f64).sqrt())
        }
        _ => None,
    };

    PopulationSummary {
        start_year,
        end_year,
        sample_count: count,
        mean,
        std_dev,
    }
}

/// Sums each series per year and keeps the best year of every series.
///
/// Equal sums resolve to the later year; the result is ordered by value,
/// then year (both descending), then series id.
pub fn best_year_per_series(observations: &[SeriesObservation], limit: usize) -> Vec<SeriesBestYear> {
    let mut annual: BTreeMap<(&str, i32), f64> = BTreeMap::new();
    for observation in observations {
        *annual
            .entry((observation.series_id.as_str(), observation.year))
            .or_insert(0.0) += observation.value;
    }

    let mut best: BTreeMap<&str, (i32, f64)> = BTreeMap::new();
    for ((series_id, year), value) in annual {
        best.entry(series_id)
            .and_modify(|current| {
                if value > current.1 || (value == current.1 && year > current.0) {
                    *current = (year, value);
                }
            })
            .or_insert((year, value));
    }

    let mut ranked: Vec<SeriesBestYear> = best
        .into_iter()
        .map(|(series_id, (year, value))| SeriesBestYear {
            series_id: series_id.to_string(),
            year,
            value,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.value
            .partial_cmp(&a.value)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.year.cmp(&a.year))
            .then_with(|| a.series_id.cmp(&b.series_id))
    });
    ranked.truncate(limit);
    ranked
}

/// Left join of one series/period with population by year, in file order.
pub fn join_series_with_population(
    observations: &[SeriesObservation],
    population: &[PopulationRecord],
    series_id: &str,
    period: &str,
) -> Vec<SeriesPopulationRow> {
    let by_year: BTreeMap<i32, f64> = population
        .iter()
        .map(|record| (record.year, record.population))
        .collect();

    observations
        .iter()
        .filter(|observation| observation.series_id == series_id && observation.period == period)
        .map(|observation| SeriesPopulationRow {
            series_id: observation.series_id.clone(),
            year: observation.year,
            period: observation.period.clone(),
            value: observation.value,
            population: by_year.get(&observation.year).copied(),
        })
        .collect()
}
