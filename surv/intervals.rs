use crate::outcome::SurvivalOutcome;
use crate::panel::PanelRecord;
use serde::{Deserialize, Serialize};

/// One counting-process episode: a half-open risk interval
/// `[t_start, t_stop)` on the years-since-entry axis, carrying the
/// covariate values observed in the calendar year it was cut from.
///
/// This is also the persisted processed-dataset row, one per
/// country-interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalRow {
    pub country: String,
    pub t_start: f64,
    pub t_stop: f64,
    pub event: u8,
    pub covariates: Vec<f64>,
    pub year: i32,
    pub overall_time: f64,
    pub overall_event_status: u8,
    pub region: String,
}

/// Expand one country's yearly rows into start–stop risk intervals.
///
/// Each year contributes the candidate interval
/// `[year - start_year, year - start_year + 1)`. Rows starting at or past
/// the country's overall survival time are discarded (the subject has
/// already left the risk set), the last retained interval is clipped to
/// the overall time, and zero-width intervals are dropped. The event flag
/// is set on exactly the interval whose stop equals the overall time, and
/// only for countries whose outcome is an observed event.
///
/// Covariates are passed through untouched: each interval carries the raw
/// values of its own calendar year, never an interpolation.
///
/// Miscounted risk intervals corrupt the likelihood without any runtime
/// error, so the tiling invariants here are the most heavily tested in the
/// crate.
pub fn split_intervals(
    rows: &[PanelRecord],
    outcome: &SurvivalOutcome,
    region: &str,
) -> Vec<IntervalRow> {
    let mut intervals = Vec::with_capacity(rows.len());
    for row in rows {
        let elapsed = f64::from(row.year - outcome.start_year);
        if elapsed >= outcome.time {
            continue;
        }
        let t_stop = (elapsed + 1.0).min(outcome.time);
        if t_stop <= elapsed {
            continue;
        }
        let event = u8::from(t_stop == outcome.time && outcome.event_status == 1);
        intervals.push(IntervalRow {
            country: outcome.country.clone(),
            t_start: elapsed,
            t_stop,
            event,
            covariates: row.covariates.clone(),
            year: row.year,
            overall_time: outcome.time,
            overall_event_status: outcome.event_status,
            region: region.to_string(),
        });
    }
    intervals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::derive_outcome;
    use crate::panel::{PanelRecord, ScarcityLevel};
    use approx::assert_abs_diff_eq;

    use ScarcityLevel::{High, Low, Moderate};

    fn series(country: &str, start: i32, levels: &[ScarcityLevel]) -> Vec<PanelRecord> {
        levels
            .iter()
            .enumerate()
            .map(|(offset, &scarcity)| PanelRecord {
                country: country.to_string(),
                year: start + offset as i32,
                scarcity,
                covariates: vec![offset as f64, 10.0 + offset as f64],
            })
            .collect()
    }

    fn split(country: &str, start: i32, levels: &[ScarcityLevel]) -> Vec<IntervalRow> {
        let rows = series(country, start, levels);
        let outcome = derive_outcome(country, &rows).unwrap();
        split_intervals(&rows, &outcome, "Americas")
    }

    fn assert_tiles(intervals: &[IntervalRow], overall_time: f64) {
        let mut expected_start = 0.0;
        for interval in intervals {
            assert_abs_diff_eq!(interval.t_start, expected_start);
            assert!(interval.t_stop > interval.t_start);
            expected_start = interval.t_stop;
        }
        assert_abs_diff_eq!(expected_start, overall_time);
    }

    #[test]
    fn event_country_tiles_and_flags_terminal_interval() {
        // Event in the 14th observed year: overall_time = 13.
        let mut levels = vec![Low; 13];
        levels.push(High);
        levels.extend_from_slice(&[High, Moderate]);
        let intervals = split("Brazil", 2000, &levels);

        assert_eq!(intervals.len(), 13);
        assert_tiles(&intervals, 13.0);
        let flagged: Vec<_> = intervals.iter().filter(|i| i.event == 1).collect();
        assert_eq!(flagged.len(), 1);
        assert_abs_diff_eq!(flagged[0].t_start, 12.0);
        assert_abs_diff_eq!(flagged[0].t_stop, 13.0);
        assert!(intervals.iter().all(|i| i.overall_event_status == 1));
    }

    #[test]
    fn censored_country_has_no_flagged_interval() {
        let levels = vec![Low; 25]; // 2000..=2024, censored at 24 years
        let intervals = split("Argentina", 2000, &levels);

        assert_eq!(intervals.len(), 24);
        assert_tiles(&intervals, 24.0);
        assert!(intervals.iter().all(|i| i.event == 0));
        assert!(intervals.iter().all(|i| i.overall_event_status == 0));
    }

    #[test]
    fn interval_widths_sum_to_overall_time() {
        let levels = vec![Low, Moderate, Low, High, High];
        let intervals = split("Mexico", 1990, &levels);
        let total: f64 = intervals.iter().map(|i| i.t_stop - i.t_start).sum();
        assert_abs_diff_eq!(total, 3.0);
    }

    #[test]
    fn rows_past_the_event_are_discarded() {
        // Event in year index 2; years 3 and 4 are after exit.
        let levels = vec![Low, Low, High, Low, Low];
        let intervals = split("Peru", 2005, &levels);
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals.last().unwrap().event, 1);
        assert_eq!(intervals.iter().map(|i| i.year).collect::<Vec<_>>(), vec![
            2005, 2006
        ]);
    }

    #[test]
    fn zero_time_country_yields_no_intervals() {
        let intervals = split("Yemen", 2010, &[High, High, High]);
        assert!(intervals.is_empty());
    }

    #[test]
    fn covariates_are_passed_through_unchanged() {
        let levels = vec![Low, Moderate, High];
        let intervals = split("Chile", 2000, &levels);
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].covariates, vec![0.0, 10.0]);
        assert_eq!(intervals[1].covariates, vec![1.0, 11.0]);
        assert_eq!(intervals[1].year, 2001);
    }

    #[test]
    fn region_tag_is_attached_to_every_interval() {
        let intervals = split("Bolivia", 2000, &[Low, Low, Low]);
        assert!(intervals.iter().all(|i| i.region == "Americas"));
    }
}
