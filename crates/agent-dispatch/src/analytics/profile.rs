//! Dataset profile shown to the code synthesizer: a small row sample plus
//! describe-style statistics and a dtype/null/unique table.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;

use super::dataset::{ColumnKind, Dataset};
use super::error::AnalyticsError;

pub const SAMPLE_ROWS: usize = 10;
pub const SAMPLE_SEED: u64 = 42;

#[derive(Debug, Clone, PartialEq)]
pub struct NumericSummary {
    pub mean: f64,
    pub std: Option<f64>,
    pub min: f64,
    pub q25: f64,
    pub median: f64,
    pub q75: f64,
    pub max: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnProfile {
    pub name: String,
    pub kind: ColumnKind,
    pub count: usize,
    pub nulls: usize,
    pub unique: usize,
    pub numeric: Option<NumericSummary>,
    /// Most frequent value and its frequency, for non-numeric columns.
    pub top: Option<(String, usize)>,
}

#[derive(Debug, Clone)]
pub struct DatasetProfile {
    pub sample_csv: String,
    pub columns: Vec<ColumnProfile>,
}

impl DatasetProfile {
    pub fn build(dataset: &Dataset) -> Result<Self, AnalyticsError> {
        let sample = sample_indices(dataset.row_count(), SAMPLE_ROWS, SAMPLE_SEED);
        let sample_csv = dataset.rows_to_csv(&sample)?;

        let columns = (0..dataset.column_count())
            .into_par_iter()
            .map(|i| profile_column(dataset, i))
            .collect();

        Ok(Self { sample_csv, columns })
    }

    /// Statistics block: describe table, blank line, dtype/null/unique table.
    pub fn statistics(&self) -> String {
        format!("{}\n\n{}", self.describe_table(), self.column_info_table())
    }

    pub fn describe_table(&self) -> String {
        let mut lines = vec![format!(
            "{:<20} {:>8} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>8} {:>16} {:>6}",
            "column", "count", "mean", "std", "min", "25%", "50%", "75%", "max", "unique", "top", "freq"
        )];

        for column in &self.columns {
            let numeric = column.numeric.as_ref();
            let num = |f: fn(&NumericSummary) -> f64| {
                numeric.map(|n| format_number(f(n))).unwrap_or_else(|| "NaN".to_string())
            };
            let std = numeric
                .and_then(|n| n.std)
                .map(format_number)
                .unwrap_or_else(|| "NaN".to_string());
            let (unique, top, freq) = match &column.top {
                Some((value, freq)) => (column.unique.to_string(), truncate(value, 16), freq.to_string()),
                None => ("NaN".to_string(), "NaN".to_string(), "NaN".to_string()),
            };

            lines.push(format!(
                "{:<20} {:>8} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>12} {:>8} {:>16} {:>6}",
                truncate(&column.name, 20),
                column.count,
                num(|n| n.mean),
                std,
                num(|n| n.min),
                num(|n| n.q25),
                num(|n| n.median),
                num(|n| n.q75),
                num(|n| n.max),
                unique,
                top,
                freq
            ));
        }
        lines.join("\n")
    }

    pub fn column_info_table(&self) -> String {
        let mut lines = vec![format!("{:<20} {:>8} {:>6} {:>7}", "", "dtype", "nulls", "unique")];
        for column in &self.columns {
            lines.push(format!(
                "{:<20} {:>8} {:>6} {:>7}",
                truncate(&column.name, 20),
                column.kind.dtype(),
                column.nulls,
                column.unique
            ));
        }
        lines.join("\n")
    }
}

/// Deterministic sample of up to `n` row indices.
pub fn sample_indices(len: usize, n: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    rand::seq::index::sample(&mut rng, len, n.min(len)).into_vec()
}

fn profile_column(dataset: &Dataset, index: usize) -> ColumnProfile {
    let kind = dataset.kinds()[index];
    let present: Vec<&str> = dataset.column(index).flatten().collect();

    let mut frequencies: HashMap<&str, usize> = HashMap::new();
    for value in &present {
        *frequencies.entry(*value).or_insert(0) += 1;
    }

    let numeric = if kind.is_numeric() {
        let values: Vec<f64> = present
            .iter()
            .filter_map(|v| v.trim().parse::<f64>().ok())
            .collect();
        summarize_numeric(values)
    } else {
        None
    };

    let top = if kind.is_numeric() {
        None
    } else {
        // Ties resolve to the lexically smallest value so profiles are reproducible.
        frequencies
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(value, freq)| (value.to_string(), *freq))
    };

    ColumnProfile {
        name: dataset.headers()[index].clone(),
        kind,
        count: present.len(),
        nulls: dataset.row_count() - present.len(),
        unique: frequencies.len(),
        numeric,
        top,
    }
}

fn summarize_numeric(mut values: Vec<f64>) -> Option<NumericSummary> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = if values.len() > 1 {
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Some(variance.sqrt())
    } else {
        None
    };

    Some(NumericSummary {
        mean,
        std,
        min: values[0],
        q25: quantile(&values, 0.25),
        median: quantile(&values, 0.5),
        q75: quantile(&values, 0.75),
        max: values[values.len() - 1],
    })
}

/// Linear interpolation between closest ranks over sorted input.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        format!("{:.6}", value)
    }
}

fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        value.to_string()
    } else {
        let kept: String = value.chars().take(width.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
