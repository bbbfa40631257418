use crate::error::SurvError;
use serde::{Deserialize, Serialize};

/// Ordered scarcity classification of a country-year.
///
/// The ordering matters: an event is the first year a country reaches
/// `High`, and comparisons rely on `Low < Moderate < High`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ScarcityLevel {
    Low,
    Moderate,
    High,
}

impl ScarcityLevel {
    /// Parse a panel cell. Accepts the canonical labels (case-insensitive)
    /// and the integer codes 0/1/2 used by some upstream exports.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" | "0" => Some(ScarcityLevel::Low),
            "moderate" | "medium" | "1" => Some(ScarcityLevel::Moderate),
            "high" | "2" => Some(ScarcityLevel::High),
            _ => None,
        }
    }
}

/// One raw panel row: a single country-year observation.
///
/// `covariates` is positionally aligned with the dataset-level covariate
/// name list; rows never carry their own header.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelRecord {
    pub country: String,
    pub year: i32,
    pub scarcity: ScarcityLevel,
    pub covariates: Vec<f64>,
}

/// Check the year-sequence contract for one country's rows: strictly
/// ascending, no duplicates, no gaps. The interval splitter's tiling
/// invariant cannot hold across a missing year, so a gap is an error here
/// rather than a silent hole in the risk set downstream.
pub fn validate_year_sequence(country: &str, rows: &[PanelRecord]) -> Result<(), SurvError> {
    if rows.is_empty() {
        return Err(SurvError::EmptyGroup(country.to_string()));
    }
    for pair in rows.windows(2) {
        let (prev, next) = (pair[0].year, pair[1].year);
        if next == prev {
            return Err(SurvError::DataContractViolation {
                country: country.to_string(),
                detail: format!("duplicate year {next}"),
            });
        }
        if next < prev {
            return Err(SurvError::DataContractViolation {
                country: country.to_string(),
                detail: format!("years not ascending: {prev} followed by {next}"),
            });
        }
        if next != prev + 1 {
            return Err(SurvError::DataContractViolation {
                country: country.to_string(),
                detail: format!("missing year(s) between {prev} and {next}"),
            });
        }
    }
    Ok(())
}
