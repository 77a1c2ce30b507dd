pub const DEFAULT_POPULATION_KEY: &str = "bls/api/population.json";
pub const DEFAULT_PRICE_RELATIVE_KEY: &str = "bls/pr/pr.data.0.Current";
pub const DEFAULT_RESULTS_PREFIX: &str = "reports";
pub const UNVERSIONED: &str = "unversioned";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetKind {
    SeriesPopulationReport,
}

impl DatasetKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::SeriesPopulationReport => "series_population_report",
        }
    }
}

pub fn partition_prefix(
    base_prefix: &str,
    dataset: DatasetKind,
    series_id: &str,
    period: &str,
) -> String {
    let trimmed = base_prefix.trim_matches('/');
    format!(
        "{trimmed}/dataset={}/series_id={}/period={}",
        dataset.as_str(),
        partition_value(series_id),
        partition_value(period),
    )
}

/// Key of the report computed from one population object version.
///
/// Redelivery of the same notification lands on the same key.
pub fn report_object_key(
    base_prefix: &str,
    series_id: &str,
    period: &str,
    source_version: Option<&str>,
) -> String {
    format!(
        "{}/source_version={}/report.json",
        partition_prefix(
            base_prefix,
            DatasetKind::SeriesPopulationReport,
            series_id,
            period,
        ),
        partition_value(source_version.unwrap_or(UNVERSIONED)),
    )
}

fn partition_value(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c == '/' || c == '=' { '_' } else { c })
        .collect()
}
