//! In-memory tabular dataset loaded from an uploaded file.
//!
//! Cells are kept as text with nulls made explicit; each column carries an
//! inferred kind so the profiler can compute the right statistics.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use calamine::{Data, Reader};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::error::AnalyticsError;

/// Extensions the loader accepts, lower-cased and without the dot.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "tsv", "json", "xlsx"];

const NULL_MARKERS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Text,
}

impl ColumnKind {
    /// Name used when describing the column to the code synthesizer.
    pub fn dtype(&self) -> &'static str {
        match self {
            ColumnKind::Integer => "int64",
            ColumnKind::Float => "float64",
            ColumnKind::Boolean => "bool",
            ColumnKind::Text => "object",
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnKind::Integer | ColumnKind::Float)
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    source: PathBuf,
    headers: Vec<String>,
    kinds: Vec<ColumnKind>,
    rows: Vec<Vec<Option<String>>>,
}

impl Dataset {
    /// Load a file from disk, dispatching on its extension.
    pub fn load(path: &Path) -> Result<Self, AnalyticsError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(AnalyticsError::UnsupportedFormat { extension });
        }

        let open = || {
            File::open(path)
                .map_err(|e| AnalyticsError::DatasetParse(format!("{}: {}", path.display(), e)))
        };

        let mut dataset = match extension.as_str() {
            "csv" => Self::from_delimited(open()?, b',')?,
            "tsv" => Self::from_delimited(open()?, b'\t')?,
            "xlsx" => Self::from_xlsx(path)?,
            _ => Self::from_json_records(open()?)?,
        };
        dataset.source = path.to_path_buf();

        if dataset.row_count() == 0 {
            return Err(AnalyticsError::EmptyDataset);
        }

        info!(
            "📥 Loaded dataset {} with shape ({}, {})",
            path.display(),
            dataset.row_count(),
            dataset.column_count()
        );
        debug!("Columns: {:?}", dataset.headers);
        Ok(dataset)
    }

    pub fn from_delimited<R: Read>(reader: R, delimiter: u8) -> Result<Self, AnalyticsError> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|e| AnalyticsError::DatasetParse(e.to_string()))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for (line, record) in csv_reader.records().enumerate() {
            let record = record.map_err(|e| AnalyticsError::DatasetParse(e.to_string()))?;
            if record.len() > headers.len() {
                warn!(
                    "Record {} has {} fields but the header has {}, extra fields ignored",
                    line + 1,
                    record.len(),
                    headers.len()
                );
            }
            let row = (0..headers.len())
                .map(|i| record.get(i).and_then(normalize_cell))
                .collect();
            rows.push(row);
        }

        Ok(Self::from_parts(headers, rows))
    }

    /// JSON input must be an array of flat objects. Keys missing from a record are nulls.
    pub fn from_json_records<R: Read>(reader: R) -> Result<Self, AnalyticsError> {
        let value: Value = serde_json::from_reader(reader)
            .map_err(|e| AnalyticsError::DatasetParse(e.to_string()))?;

        let records = value.as_array().ok_or_else(|| {
            AnalyticsError::DatasetParse("expected a JSON array of records".to_string())
        })?;

        let mut headers: Vec<String> = Vec::new();
        for record in records {
            let object = record.as_object().ok_or_else(|| {
                AnalyticsError::DatasetParse("every JSON record must be an object".to_string())
            })?;
            for key in object.keys() {
                if !headers.iter().any(|h| h == key) {
                    headers.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .filter_map(Value::as_object)
            .map(|object| {
                headers
                    .iter()
                    .map(|h| match object.get(h) {
                        None | Some(Value::Null) => None,
                        Some(Value::String(s)) => normalize_cell(s),
                        Some(other) => Some(other.to_string()),
                    })
                    .collect()
            })
            .collect();

        Ok(Self::from_parts(headers, rows))
    }

    /// First worksheet of a workbook, first row as the header.
    pub fn from_xlsx(path: &Path) -> Result<Self, AnalyticsError> {
        let to_parse_err =
            |e: calamine::Error| AnalyticsError::DatasetParse(format!("{}: {}", path.display(), e));

        let mut workbook = calamine::open_workbook_auto(path).map_err(to_parse_err)?;
        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| {
                AnalyticsError::DatasetParse(format!("{}: workbook has no sheets", path.display()))
            })?
            .map_err(to_parse_err)?;

        let mut sheet_rows = range.rows();
        let headers: Vec<String> = match sheet_rows.next() {
            Some(header) => header.iter().map(|c| c.to_string().trim().to_string()).collect(),
            None => return Err(AnalyticsError::EmptyDataset),
        };

        let rows = sheet_rows
            .map(|row| {
                (0..headers.len())
                    .map(|i| row.get(i).and_then(spreadsheet_cell))
                    .collect()
            })
            .collect();

        Ok(Self::from_parts(headers, rows))
    }

    fn from_parts(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        let kinds = (0..headers.len())
            .map(|i| infer_kind(rows.iter().filter_map(|r| r[i].as_deref())))
            .collect();
        Self {
            source: PathBuf::new(),
            headers,
            kinds,
            rows,
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn kinds(&self) -> &[ColumnKind] {
        &self.kinds
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.headers.len()
    }

    /// Cells of one column, top to bottom.
    pub fn column(&self, index: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows.iter().map(move |r| r[index].as_deref())
    }

    /// Serialize the full dataset as CSV. Nulls become empty fields.
    pub fn to_csv(&self) -> Result<String, AnalyticsError> {
        self.rows_to_csv((0..self.rows.len()).collect::<Vec<_>>().as_slice())
    }

    /// Serialize the selected rows, in the given order, as CSV with a header line.
    pub fn rows_to_csv(&self, indices: &[usize]) -> Result<String, AnalyticsError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let to_parse_err = |e: csv::Error| AnalyticsError::DatasetParse(e.to_string());

        writer.write_record(&self.headers).map_err(to_parse_err)?;
        for &i in indices {
            writer
                .write_record(self.rows[i].iter().map(|c| c.as_deref().unwrap_or("")))
                .map_err(to_parse_err)?;
        }

        let bytes = writer
            .into_inner()
            .map_err(|e| AnalyticsError::DatasetParse(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| AnalyticsError::DatasetParse(e.to_string()))
    }
}

fn normalize_cell(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if NULL_MARKERS.contains(&trimmed) {
        None
    } else {
        Some(raw.to_string())
    }
}

fn spreadsheet_cell(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => normalize_cell(s),
        other => normalize_cell(&other.to_string()),
    }
}

fn is_bool(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "false")
}

fn infer_kind<'a>(values: impl Iterator<Item = &'a str> + Clone) -> ColumnKind {
    if values.clone().next().is_none() {
        return ColumnKind::Text;
    }
    if values.clone().all(|v| v.trim().parse::<i64>().is_ok()) {
        ColumnKind::Integer
    } else if values.clone().all(|v| v.trim().parse::<f64>().is_ok()) {
        ColumnKind::Float
    } else if values.clone().all(is_bool) {
        ColumnKind::Boolean
    } else {
        ColumnKind::Text
    }
}
