//! Tabular I/O for the raw panel and the processed interval dataset.
//!
//! This is the only module that touches files during preprocessing. It
//! reads TSV/CSV/Parquet by extension, enforces the fixed panel schema
//! (`country`, `year`, `scarcity_level`, case-insensitive), sweeps every
//! remaining numeric column up as a covariate, and persists/reloads the
//! one-row-per-country-interval processed dataset.

use crate::error::SurvError;
use crate::intervals::IntervalRow;
use crate::panel::{PanelRecord, ScarcityLevel};
use polars::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Columns of the raw panel that are never treated as covariates.
const PANEL_RESERVED: [&str; 3] = ["country", "year", "scarcity_level"];
/// Fixed columns of the processed interval dataset.
const PROCESSED_RESERVED: [&str; 8] = [
    "country",
    "t_start",
    "t_stop",
    "interval_event_status",
    "year",
    "overall_time",
    "overall_event_status",
    "region",
];

/// Errors surfaced while reading or validating tabular datasets.
#[derive(Debug, Error)]
pub enum PanelDataError {
    #[error("Error from the underlying Polars library: {0}")]
    Polars(#[from] PolarsError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("The required column '{0}' was not found in the input file.")]
    ColumnNotFound(String),
    #[error(
        "Column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error("Missing or null values were found in the column '{0}'.")]
    MissingValues(String),
    #[error("Unrecognized scarcity level '{raw}' at row {row} (expected Low/Moderate/High or 0/1/2).")]
    BadScarcityLabel { raw: String, row: usize },
    #[error("Covariate column '{0}' clashes with a reserved output column name.")]
    ReservedCovariateName(String),
    #[error("Validation error: {0}")]
    Validation(#[from] SurvError),
}

/// A validated raw panel: per-country row groups in file order, plus the
/// shared covariate column names.
#[derive(Debug)]
pub struct PanelDataset {
    pub covariate_names: Vec<String>,
    /// One entry per country, in first-appearance order; rows in file order.
    pub groups: Vec<(String, Vec<PanelRecord>)>,
}

impl PanelDataset {
    pub fn n_rows(&self) -> usize {
        self.groups.iter().map(|(_, rows)| rows.len()).sum()
    }
}

/// Load the raw per-country-per-year panel.
///
/// Rows are grouped by country but otherwise left in file order; the
/// year-sequence contract is enforced later by the outcome deriver, not
/// silently repaired here.
pub fn load_panel(path: &str) -> Result<PanelDataset, PanelDataError> {
    let df = read_tabular(path)?;
    let name_map = case_insensitive_map(&df);

    let country = extract_str_column(&df, &name_map, "country")?;
    let year = extract_i32_column(&df, &name_map, "year")?;
    let scarcity_raw = extract_str_column(&df, &name_map, "scarcity_level")?;

    let n = country.len();
    let mut scarcity = Vec::with_capacity(n);
    for (row, raw) in scarcity_raw.iter().enumerate() {
        let level = ScarcityLevel::parse(raw).ok_or_else(|| PanelDataError::BadScarcityLabel {
            raw: raw.clone(),
            row,
        })?;
        scarcity.push(level);
    }

    let (covariate_names, covariate_columns) =
        sweep_covariate_columns(&df, &name_map, &PANEL_RESERVED, n)?;

    let mut groups: Vec<(String, Vec<PanelRecord>)> = Vec::new();
    let mut group_index: HashMap<String, usize> = HashMap::new();
    for i in 0..n {
        let covariates: Vec<f64> = covariate_columns.iter().map(|col| col[i]).collect();
        let record = PanelRecord {
            country: country[i].clone(),
            year: year[i],
            scarcity: scarcity[i],
            covariates,
        };
        let ix = *group_index.entry(country[i].clone()).or_insert_with(|| {
            groups.push((country[i].clone(), Vec::new()));
            groups.len() - 1
        });
        groups[ix].1.push(record);
    }

    log::info!(
        "loaded panel: {} rows, {} countries, {} covariates",
        n,
        groups.len(),
        covariate_names.len()
    );
    Ok(PanelDataset {
        covariate_names,
        groups,
    })
}

/// Persist the processed interval dataset (one row per country-interval)
/// as a tab-separated file.
pub fn write_processed(
    rows: &[IntervalRow],
    covariate_names: &[String],
    path: &str,
) -> Result<(), PanelDataError> {
    for name in covariate_names {
        if PROCESSED_RESERVED.contains(&name.as_str()) {
            return Err(PanelDataError::ReservedCovariateName(name.clone()));
        }
    }

    let mut columns: Vec<Column> = vec![
        Series::new(
            "country".into(),
            rows.iter().map(|r| r.country.clone()).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "t_start".into(),
            rows.iter().map(|r| r.t_start).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "t_stop".into(),
            rows.iter().map(|r| r.t_stop).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "interval_event_status".into(),
            rows.iter().map(|r| u32::from(r.event)).collect::<Vec<_>>(),
        )
        .into(),
    ];
    for (j, name) in covariate_names.iter().enumerate() {
        columns.push(
            Series::new(
                name.as_str().into(),
                rows.iter().map(|r| r.covariates[j]).collect::<Vec<_>>(),
            )
            .into(),
        );
    }
    columns.extend([
        Series::new(
            "year".into(),
            rows.iter().map(|r| r.year).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "overall_time".into(),
            rows.iter().map(|r| r.overall_time).collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "overall_event_status".into(),
            rows.iter()
                .map(|r| u32::from(r.overall_event_status))
                .collect::<Vec<_>>(),
        )
        .into(),
        Series::new(
            "region".into(),
            rows.iter().map(|r| r.region.clone()).collect::<Vec<_>>(),
        )
        .into(),
    ]);

    let mut df = DataFrame::new(columns)?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .with_separator(b'\t')
        .finish(&mut df)?;
    Ok(())
}

/// Reload a processed interval dataset, recovering the covariate column
/// names as everything outside the fixed schema.
pub fn read_processed(path: &str) -> Result<(Vec<IntervalRow>, Vec<String>), PanelDataError> {
    let df = read_tabular(path)?;
    let name_map = case_insensitive_map(&df);

    let country = extract_str_column(&df, &name_map, "country")?;
    let t_start = extract_f64_column(&df, &name_map, "t_start")?;
    let t_stop = extract_f64_column(&df, &name_map, "t_stop")?;
    let event = extract_flag_column(&df, &name_map, "interval_event_status")?;
    let year = extract_i32_column(&df, &name_map, "year")?;
    let overall_time = extract_f64_column(&df, &name_map, "overall_time")?;
    let overall_event = extract_flag_column(&df, &name_map, "overall_event_status")?;
    let region = extract_str_column(&df, &name_map, "region")?;

    let n = country.len();
    let (covariate_names, covariate_columns) =
        sweep_covariate_columns(&df, &name_map, &PROCESSED_RESERVED, n)?;

    let mut rows = Vec::with_capacity(n);
    for i in 0..n {
        rows.push(IntervalRow {
            country: country[i].clone(),
            t_start: t_start[i],
            t_stop: t_stop[i],
            event: event[i],
            covariates: covariate_columns.iter().map(|col| col[i]).collect(),
            year: year[i],
            overall_time: overall_time[i],
            overall_event_status: overall_event[i],
            region: region[i].clone(),
        });
    }
    Ok((rows, covariate_names))
}

fn read_tabular(path: &str) -> Result<DataFrame, PanelDataError> {
    let path_ref = Path::new(path);
    let extension = path_ref
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("parquet") | Some("pq") => {
            let file = File::open(path_ref)?;
            ParquetReader::new(file).finish().map_err(PanelDataError::from)
        }
        Some("csv") => read_delimited(path_ref, b','),
        _ => read_delimited(path_ref, b'\t'),
    }
}

fn read_delimited(path: &Path, separator: u8) -> Result<DataFrame, PanelDataError> {
    let file = File::open(path)?;
    CsvReadOptions::default()
        .with_has_header(true)
        .map_parse_options(|options| options.with_separator(separator))
        .into_reader_with_file_handle(file)
        .finish()
        .map_err(PanelDataError::from)
}

fn case_insensitive_map(df: &DataFrame) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for name in df.get_column_names() {
        let original = name.as_str().to_string();
        map.insert(original.to_ascii_lowercase(), original);
    }
    map
}

/// Collect every column outside `reserved` that casts cleanly to f64, in
/// file order. Non-numeric columns (free-text notes and the like) are
/// skipped; nulls in a numeric column are an error, not a default.
fn sweep_covariate_columns(
    df: &DataFrame,
    name_map: &HashMap<String, String>,
    reserved: &[&str],
    n: usize,
) -> Result<(Vec<String>, Vec<Vec<f64>>), PanelDataError> {
    let reserved_actual: Vec<&String> = reserved
        .iter()
        .filter_map(|key| name_map.get(*key))
        .collect();

    let mut names = Vec::new();
    let mut columns = Vec::new();
    for original in df.get_column_names() {
        let original = original.as_str();
        if reserved_actual.iter().any(|r| r.as_str() == original) {
            continue;
        }
        let series = df
            .column(original)
            .map_err(|_| PanelDataError::ColumnNotFound(original.to_string()))?;
        // Free-text columns are not covariates; a lossy String→f64 cast
        // would only manufacture nulls.
        if matches!(series.dtype(), DataType::String) {
            continue;
        }
        let casted = match series.cast(&DataType::Float64) {
            Ok(values) => values,
            Err(_) => continue,
        };
        let values = casted.f64()?;
        if values.null_count() > 0 {
            return Err(PanelDataError::MissingValues(original.to_string()));
        }
        debug_assert_eq!(values.len(), n);
        names.push(original.to_string());
        columns.push(values.into_no_null_iter().collect());
    }
    Ok((names, columns))
}

fn extract_f64_column(
    df: &DataFrame,
    map: &HashMap<String, String>,
    key: &str,
) -> Result<Vec<f64>, PanelDataError> {
    let actual = map
        .get(&key.to_ascii_lowercase())
        .ok_or_else(|| PanelDataError::ColumnNotFound(key.to_string()))?;
    let series = df
        .column(actual)
        .map_err(|_| PanelDataError::ColumnNotFound(actual.clone()))?;
    let dtype = series.dtype().clone();
    let casted = series
        .cast(&DataType::Float64)
        .map_err(|_| PanelDataError::ColumnWrongType {
            column_name: actual.clone(),
            expected_type: "float",
            found_type: dtype.to_string(),
        })?;
    let values = casted.f64()?;
    if values.null_count() > 0 {
        return Err(PanelDataError::MissingValues(actual.clone()));
    }
    Ok(values.into_no_null_iter().collect())
}

fn extract_i32_column(
    df: &DataFrame,
    map: &HashMap<String, String>,
    key: &str,
) -> Result<Vec<i32>, PanelDataError> {
    let actual = map
        .get(&key.to_ascii_lowercase())
        .ok_or_else(|| PanelDataError::ColumnNotFound(key.to_string()))?;
    let series = df
        .column(actual)
        .map_err(|_| PanelDataError::ColumnNotFound(actual.clone()))?;
    let dtype = series.dtype().clone();
    let casted = series
        .cast(&DataType::Int32)
        .map_err(|_| PanelDataError::ColumnWrongType {
            column_name: actual.clone(),
            expected_type: "integer",
            found_type: dtype.to_string(),
        })?;
    let values = casted.i32()?;
    if values.null_count() > 0 {
        return Err(PanelDataError::MissingValues(actual.clone()));
    }
    Ok(values.into_no_null_iter().collect())
}

fn extract_flag_column(
    df: &DataFrame,
    map: &HashMap<String, String>,
    key: &str,
) -> Result<Vec<u8>, PanelDataError> {
    let actual = map
        .get(&key.to_ascii_lowercase())
        .ok_or_else(|| PanelDataError::ColumnNotFound(key.to_string()))?;
    let values = extract_i32_column(df, map, key)?;
    let mut flags = Vec::with_capacity(values.len());
    for value in values {
        if !(0..=1).contains(&value) {
            return Err(PanelDataError::ColumnWrongType {
                column_name: actual.clone(),
                expected_type: "0/1 flag",
                found_type: format!("value {value}"),
            });
        }
        flags.push(value as u8);
    }
    Ok(flags)
}

fn extract_str_column(
    df: &DataFrame,
    map: &HashMap<String, String>,
    key: &str,
) -> Result<Vec<String>, PanelDataError> {
    let actual = map
        .get(&key.to_ascii_lowercase())
        .ok_or_else(|| PanelDataError::ColumnNotFound(key.to_string()))?;
    let series = df
        .column(actual)
        .map_err(|_| PanelDataError::ColumnNotFound(actual.clone()))?;
    let dtype = series.dtype().clone();
    let casted = series
        .cast(&DataType::String)
        .map_err(|_| PanelDataError::ColumnWrongType {
            column_name: actual.clone(),
            expected_type: "string",
            found_type: dtype.to_string(),
        })?;
    let values = casted.str()?;
    if values.null_count() > 0 {
        return Err(PanelDataError::MissingValues(actual.clone()));
    }
    Ok(values.into_no_null_iter().map(|s| s.to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::ScarcityLevel;
    use tempfile::{Builder, NamedTempFile};

    fn sample_panel() -> DataFrame {
        DataFrame::new(vec![
            Series::new(
                "country".into(),
                vec!["Brazil", "Brazil", "Brazil", "Kenya", "Kenya"],
            )
            .into(),
            Series::new("year".into(), vec![2000i32, 2001, 2002, 2000, 2001]).into(),
            Series::new(
                "scarcity_level".into(),
                vec!["Low", "Moderate", "High", "Low", "Low"],
            )
            .into(),
            Series::new("withdrawal".into(), vec![1.0, 1.5, 2.0, 0.5, 0.6]).into(),
            Series::new("stress_index".into(), vec![10.0, 11.0, 14.0, 5.0, 5.5]).into(),
            Series::new("notes".into(), vec!["a", "b", "c", "d", "e"]).into(),
        ])
        .expect("construct sample panel")
    }

    fn write_tsv(df: &DataFrame) -> NamedTempFile {
        let mut file = Builder::new().suffix(".tsv").tempfile().expect("tempfile");
        let mut clone = df.clone();
        CsvWriter::new(file.as_file_mut())
            .with_separator(b'\t')
            .finish(&mut clone)
            .expect("write tsv");
        file
    }

    #[test]
    fn panel_loader_groups_by_country_and_sweeps_covariates() {
        let file = write_tsv(&sample_panel());
        let panel = load_panel(file.path().to_str().unwrap()).expect("load panel");

        assert_eq!(panel.n_rows(), 5);
        assert_eq!(panel.groups.len(), 2);
        assert_eq!(panel.groups[0].0, "Brazil");
        assert_eq!(panel.groups[1].0, "Kenya");
        // "notes" is free text and is skipped, not an error.
        assert_eq!(panel.covariate_names, vec!["withdrawal", "stress_index"]);
        let brazil = &panel.groups[0].1;
        assert_eq!(brazil.len(), 3);
        assert_eq!(brazil[2].scarcity, ScarcityLevel::High);
        assert_eq!(brazil[1].covariates, vec![1.5, 11.0]);
    }

    #[test]
    fn panel_loader_rejects_bad_scarcity_labels() {
        let mut df = sample_panel();
        df.with_column(Series::new(
            "scarcity_level".into(),
            vec!["Low", "Extreme", "High", "Low", "Low"],
        ))
        .unwrap();
        let file = write_tsv(&df);
        let err = load_panel(file.path().to_str().unwrap()).expect_err("bad label");
        assert!(matches!(
            err,
            PanelDataError::BadScarcityLabel { row: 1, .. }
        ));
    }

    #[test]
    fn panel_loader_requires_country_column() {
        let mut df = sample_panel();
        df.drop_in_place("country").unwrap();
        let file = write_tsv(&df);
        let err = load_panel(file.path().to_str().unwrap()).expect_err("no country");
        assert!(matches!(err, PanelDataError::ColumnNotFound(name) if name == "country"));
    }

    #[test]
    fn processed_dataset_round_trips() {
        let rows = vec![
            IntervalRow {
                country: "Brazil".to_string(),
                t_start: 0.0,
                t_stop: 1.0,
                event: 0,
                covariates: vec![1.0, 10.0],
                year: 2000,
                overall_time: 2.0,
                overall_event_status: 1,
                region: "Americas".to_string(),
            },
            IntervalRow {
                country: "Brazil".to_string(),
                t_start: 1.0,
                t_stop: 2.0,
                event: 1,
                covariates: vec![1.5, 11.0],
                year: 2001,
                overall_time: 2.0,
                overall_event_status: 1,
                region: "Americas".to_string(),
            },
        ];
        let names = vec!["withdrawal".to_string(), "stress_index".to_string()];
        let file = Builder::new().suffix(".tsv").tempfile().expect("tempfile");
        let path = file.path().to_str().unwrap().to_string();

        write_processed(&rows, &names, &path).expect("write");
        let (loaded, loaded_names) = read_processed(&path).expect("read");

        assert_eq!(loaded_names, names);
        assert_eq!(loaded, rows);
    }

    #[test]
    fn reserved_covariate_name_is_rejected_on_write() {
        let rows = vec![IntervalRow {
            country: "Brazil".to_string(),
            t_start: 0.0,
            t_stop: 1.0,
            event: 0,
            covariates: vec![1.0],
            year: 2000,
            overall_time: 1.0,
            overall_event_status: 0,
            region: "Americas".to_string(),
        }];
        let err = write_processed(&rows, &["region".to_string()], "/tmp/unused.tsv")
            .expect_err("reserved");
        assert!(matches!(err, PanelDataError::ReservedCovariateName(_)));
    }
}
