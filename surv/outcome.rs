use crate::error::SurvError;
use crate::panel::{PanelRecord, ScarcityLevel, validate_year_sequence};
use serde::{Deserialize, Serialize};

/// Time-to-event summary for one country.
///
/// `time` is measured in years since `start_year`. `event_status` is 1 when
/// the country was observed reaching `High` scarcity within its follow-up
/// window and 0 when the series ends right-censored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurvivalOutcome {
    pub country: String,
    pub start_year: i32,
    pub last_observation_year: i32,
    pub event_year: Option<i32>,
    pub event_status: u8,
    pub time: f64,
}

/// Derive the survival outcome for one country from its sorted yearly rows.
///
/// The event is the first year at `High` scarcity. A country whose first
/// observed year is already `High` gets `time = 0` with `event_status = 1`;
/// a single-year censored country gets `time = 0` with `event_status = 0`.
/// Negative computed times are clamped to zero rather than rejected, which
/// is deliberately lenient: an event in the first observed year and a data
/// anomaly are indistinguishable at this point.
pub fn derive_outcome(country: &str, rows: &[PanelRecord]) -> Result<SurvivalOutcome, SurvError> {
    validate_year_sequence(country, rows)?;

    let start_year = rows[0].year;
    let last_observation_year = rows[rows.len() - 1].year;
    let event_year = rows
        .iter()
        .find(|r| r.scarcity == ScarcityLevel::High)
        .map(|r| r.year);

    let event_status = match event_year {
        Some(year) if year <= last_observation_year => 1u8,
        _ => 0u8,
    };
    let event_time_point = if event_status == 1 {
        event_year.unwrap_or(last_observation_year)
    } else {
        last_observation_year
    };
    let time = f64::from(event_time_point - start_year).max(0.0);

    Ok(SurvivalOutcome {
        country: country.to_string(),
        start_year,
        last_observation_year,
        event_year,
        event_status,
        time,
    })
}
