use crate::error::SurvError;
use crate::intervals::IntervalRow;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Standardization constants for one covariate, stored so downstream
/// analysis can map standardized coefficients back to raw units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateScale {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
}

/// The read-only hand-off contract between preprocessing and the sampler.
///
/// `country_id` and `region_id` are 1-based dense indices, matching the
/// contract's `country_id ∈ [1, N_countries]`. Row `i` of `x` belongs to
/// interval `i`; the row order of `x` is exactly the interval row order.
/// Once constructed this struct is never mutated — chains read it
/// concurrently during sampling.
#[derive(Debug, Clone)]
pub struct ModelInputs {
    pub n_intervals: usize,
    pub n_countries: usize,
    pub n_regions: usize,
    pub k: usize,
    pub t_start: Array1<f64>,
    pub t_stop: Array1<f64>,
    pub event: Array1<u8>,
    /// Per-interval country index, 1-based, length `n_intervals`.
    pub country_id: Array1<usize>,
    /// Per-country region index, 1-based, length `n_countries`.
    pub region_id: Array1<usize>,
    /// Standardized covariate matrix, `n_intervals × k`.
    pub x: Array2<f64>,
    pub country_names: Vec<String>,
    pub region_names: Vec<String>,
    pub scaling: Vec<CovariateScale>,
}

/// Build dense model inputs from persisted interval rows.
///
/// Countries and regions are enumerated in first-appearance order over the
/// interval rows. Covariates are z-standardized with moments computed once
/// over all interval rows (population variance); a zero-variance covariate
/// is a hard error because its standardized column would be a division by
/// zero dressed up as data.
pub fn assemble(
    rows: &[IntervalRow],
    covariate_names: &[String],
) -> Result<ModelInputs, SurvError> {
    let n = rows.len();
    let k = covariate_names.len();

    let mut country_names = Vec::new();
    let mut country_index = HashMap::new();
    let mut region_names = Vec::new();
    let mut region_index = HashMap::new();
    let mut country_region: Vec<usize> = Vec::new();

    let mut t_start = Array1::<f64>::zeros(n);
    let mut t_stop = Array1::<f64>::zeros(n);
    let mut event = Array1::<u8>::zeros(n);
    let mut country_id = Array1::<usize>::zeros(n);
    let mut x = Array2::<f64>::zeros((n, k));

    for (i, row) in rows.iter().enumerate() {
        if !(row.t_start.is_finite() && row.t_stop.is_finite()) {
            return Err(SurvError::NumericSingularity {
                context: format!("interval bounds for '{}'", row.country),
            });
        }
        if row.t_start < 0.0 || row.t_stop <= row.t_start {
            return Err(SurvError::DataContractViolation {
                country: row.country.clone(),
                detail: format!(
                    "invalid interval [{}, {}) at row {i}",
                    row.t_start, row.t_stop
                ),
            });
        }
        if row.covariates.len() != k {
            return Err(SurvError::DataContractViolation {
                country: row.country.clone(),
                detail: format!(
                    "row {i} carries {} covariates, expected {k}",
                    row.covariates.len()
                ),
            });
        }

        let region_ix = *region_index.entry(row.region.clone()).or_insert_with(|| {
            region_names.push(row.region.clone());
            region_names.len() - 1
        });
        let country_ix = *country_index.entry(row.country.clone()).or_insert_with(|| {
            country_names.push(row.country.clone());
            country_region.push(region_ix);
            country_names.len() - 1
        });
        if country_region[country_ix] != region_ix {
            return Err(SurvError::DataContractViolation {
                country: row.country.clone(),
                detail: format!(
                    "mapped to both '{}' and '{}'",
                    region_names[country_region[country_ix]], row.region
                ),
            });
        }

        t_start[i] = row.t_start;
        t_stop[i] = row.t_stop;
        event[i] = row.event;
        country_id[i] = country_ix + 1;
        for (j, &value) in row.covariates.iter().enumerate() {
            if !value.is_finite() {
                return Err(SurvError::NumericSingularity {
                    context: format!("covariate '{}' at row {i}", covariate_names[j]),
                });
            }
            x[[i, j]] = value;
        }
    }

    let scaling = standardize(&mut x, covariate_names)?;
    let region_id = Array1::from_iter(country_region.iter().map(|&r| r + 1));

    Ok(ModelInputs {
        n_intervals: n,
        n_countries: country_names.len(),
        n_regions: region_names.len(),
        k,
        t_start,
        t_stop,
        event,
        country_id,
        region_id,
        x,
        country_names,
        region_names,
        scaling,
    })
}

/// Standardize each column of `x` in place to zero mean and unit variance,
/// returning the constants used.
fn standardize(
    x: &mut Array2<f64>,
    covariate_names: &[String],
) -> Result<Vec<CovariateScale>, SurvError> {
    let n = x.nrows() as f64;
    let mut scaling = Vec::with_capacity(covariate_names.len());
    for (j, name) in covariate_names.iter().enumerate() {
        let mut column = x.column_mut(j);
        let mean = column.sum() / n;
        let var = column.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        let sd = var.sqrt();
        if sd == 0.0 || !sd.is_finite() {
            return Err(SurvError::DegenerateCovariate(name.clone()));
        }
        column.mapv_inplace(|v| (v - mean) / sd);
        scaling.push(CovariateScale {
            name: name.clone(),
            mean,
            sd,
        });
    }
    Ok(scaling)
}
