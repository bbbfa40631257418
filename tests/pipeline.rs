//! End-to-end properties of the preprocessing and inference pipeline:
//! raw panel → outcomes → intervals → regions → model inputs → fit.

use approx::assert_abs_diff_eq;
use drawdown::assemble::assemble;
use drawdown::data::{load_panel, read_processed, write_processed};
use drawdown::driver;
use drawdown::hmc::HmcConfig;
use drawdown::intervals::IntervalRow;
use drawdown::model::{HierarchicalSurvivalModel, ModelParameters, Priors};
use drawdown::panel::{PanelRecord, ScarcityLevel};
use ndarray::Array1;
use polars::prelude::*;
use tempfile::Builder;

fn panel_df() -> DataFrame {
    let mut countries = Vec::new();
    let mut years = Vec::new();
    let mut levels = Vec::new();
    let mut withdrawal = Vec::new();
    let mut agri_share = Vec::new();

    // Brazil: observed 2000..=2015, first High in 2013.
    for year in 2000..=2015 {
        countries.push("Brazil");
        years.push(year);
        levels.push(if year >= 2013 { "High" } else { "Low" });
        withdrawal.push(300.0 + f64::from(year - 2000) * 4.0);
        agri_share.push(60.0 + f64::from(year - 2000) * 0.5);
    }
    // Argentina: observed 2000..=2024, never High.
    for year in 2000..=2024 {
        countries.push("Argentina");
        years.push(year);
        levels.push(if year % 5 == 0 { "Moderate" } else { "Low" });
        withdrawal.push(250.0 + f64::from(year - 2000) * 2.0);
        agri_share.push(70.0 - f64::from(year - 2000) * 0.3);
    }
    // Jordan: observed 2005..=2012, first High in 2009.
    for year in 2005..=2012 {
        countries.push("Jordan");
        years.push(year);
        levels.push(if year >= 2009 { "High" } else { "Moderate" });
        withdrawal.push(120.0 + f64::from(year - 2005) * 6.0);
        agri_share.push(45.0 + f64::from(year - 2005) * 1.1);
    }

    DataFrame::new(vec![
        Series::new("country".into(), countries).into(),
        Series::new("year".into(), years).into(),
        Series::new("scarcity_level".into(), levels).into(),
        Series::new("withdrawal".into(), withdrawal).into(),
        Series::new("agri_share".into(), agri_share).into(),
    ])
    .expect("panel dataframe")
}

fn write_panel_tsv(df: &DataFrame) -> tempfile::NamedTempFile {
    let mut file = Builder::new().suffix(".tsv").tempfile().expect("tempfile");
    let mut clone = df.clone();
    CsvWriter::new(file.as_file_mut())
        .with_separator(b'\t')
        .finish(&mut clone)
        .expect("write panel");
    file
}

fn prepared_intervals() -> (Vec<IntervalRow>, Vec<String>) {
    let file = write_panel_tsv(&panel_df());
    let panel = load_panel(file.path().to_str().unwrap()).expect("load panel");
    let intervals = driver::prepare(&panel).expect("prepare");
    (intervals, panel.covariate_names)
}

fn country_intervals<'a>(rows: &'a [IntervalRow], country: &str) -> Vec<&'a IntervalRow> {
    rows.iter().filter(|r| r.country == country).collect()
}

#[test]
fn brazil_example_matches_the_expected_counting_process() {
    let (intervals, _) = prepared_intervals();
    let brazil = country_intervals(&intervals, "Brazil");

    assert_eq!(brazil.len(), 13);
    assert_abs_diff_eq!(brazil[0].t_start, 0.0);
    assert_abs_diff_eq!(brazil[12].t_stop, 13.0);
    assert!(brazil.iter().all(|i| i.overall_time == 13.0));
    assert!(brazil.iter().all(|i| i.overall_event_status == 1));

    let flagged: Vec<_> = brazil.iter().filter(|i| i.event == 1).collect();
    assert_eq!(flagged.len(), 1);
    assert_abs_diff_eq!(flagged[0].t_start, 12.0);
    assert_abs_diff_eq!(flagged[0].t_stop, 13.0);
}

#[test]
fn argentina_example_is_censored_with_24_unflagged_intervals() {
    let (intervals, _) = prepared_intervals();
    let argentina = country_intervals(&intervals, "Argentina");

    assert_eq!(argentina.len(), 24);
    assert!(argentina.iter().all(|i| i.event == 0));
    assert!(argentina.iter().all(|i| i.overall_event_status == 0));
    assert_abs_diff_eq!(argentina[23].t_stop, 24.0);
}

#[test]
fn intervals_tile_follow_up_exactly_for_every_country() {
    let (intervals, _) = prepared_intervals();
    for country in ["Brazil", "Argentina", "Jordan"] {
        let rows = country_intervals(&intervals, country);
        let mut cursor = 0.0;
        for row in &rows {
            assert_abs_diff_eq!(row.t_start, cursor, epsilon = 1e-12);
            assert!(row.t_stop > row.t_start);
            cursor = row.t_stop;
        }
        assert_abs_diff_eq!(cursor, rows[0].overall_time, epsilon = 1e-12);

        let width_sum: f64 = rows.iter().map(|r| r.t_stop - r.t_start).sum();
        assert_abs_diff_eq!(width_sum, rows[0].overall_time, epsilon = 1e-12);
    }
}

#[test]
fn event_countries_have_exactly_one_flagged_interval() {
    let (intervals, _) = prepared_intervals();
    for (country, expected_flags) in [("Brazil", 1usize), ("Argentina", 0), ("Jordan", 1)] {
        let flags = country_intervals(&intervals, country)
            .iter()
            .filter(|i| i.event == 1)
            .count();
        assert_eq!(flags, expected_flags, "{country}");
    }
}

#[test]
fn region_assignment_is_total_over_the_processed_dataset() {
    let (intervals, _) = prepared_intervals();
    assert!(intervals.iter().all(|i| !i.region.is_empty()));
    for row in &intervals {
        let expected = match row.country.as_str() {
            "Brazil" | "Argentina" => "Americas",
            "Jordan" => "Middle East",
            other => panic!("unexpected country {other}"),
        };
        assert_eq!(row.region, expected);
    }
}

#[test]
fn processed_dataset_survives_a_disk_round_trip() {
    let (intervals, covariate_names) = prepared_intervals();
    let file = Builder::new().suffix(".tsv").tempfile().expect("tempfile");
    let path = file.path().to_str().unwrap().to_string();

    write_processed(&intervals, &covariate_names, &path).expect("write");
    let (reloaded, reloaded_names) = read_processed(&path).expect("read");

    assert_eq!(reloaded_names, covariate_names);
    assert_eq!(reloaded, intervals);
}

#[test]
fn assembled_covariates_are_standardized_and_ids_in_bounds() {
    let (intervals, covariate_names) = prepared_intervals();
    let inputs = assemble(&intervals, &covariate_names).expect("assemble");

    assert_eq!(inputs.n_intervals, intervals.len());
    assert_eq!(inputs.n_countries, 3);
    assert_eq!(inputs.n_regions, 2);
    assert_eq!(inputs.region_id.len(), inputs.n_countries);
    assert!(inputs.country_id.iter().all(|&c| (1..=3).contains(&c)));
    assert!(inputs.region_id.iter().all(|&r| (1..=2).contains(&r)));

    for j in 0..inputs.k {
        let column = inputs.x.column(j);
        let n = column.len() as f64;
        let mean = column.sum() / n;
        let var = column.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-10);
        assert_abs_diff_eq!(var, 1.0, epsilon = 1e-10);
    }
}

#[test]
fn homogeneous_exponential_predictive_matches_closed_form() {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    let (intervals, covariate_names) = prepared_intervals();
    let inputs = assemble(&intervals, &covariate_names).expect("assemble");
    let model = HierarchicalSurvivalModel::new(&inputs, Priors::default()).expect("model");

    // α = 1, β = 0, single uniform rate λ across regions.
    let lambda = 0.08f64;
    let params = ModelParameters {
        alpha: 1.0,
        beta: Array1::zeros(inputs.k),
        mu_lambda: lambda.ln(),
        sigma_lambda: 1.0,
        eta: Array1::zeros(inputs.n_regions),
    };

    let expected: f64 = inputs
        .t_start
        .iter()
        .zip(inputs.t_stop.iter())
        .map(|(&a, &b)| 1.0 - (-lambda * (b - a)).exp())
        .sum();

    let mut rng = StdRng::seed_from_u64(99);
    let replicates = 20_000;
    let mut total = 0.0;
    for _ in 0..replicates {
        let rep = model.simulate_events(&params, &mut rng);
        total += rep.iter().map(|&e| f64::from(e)).sum::<f64>();
    }
    assert_abs_diff_eq!(total / replicates as f64, expected, epsilon = 0.1);
}

#[test]
fn censored_log_likelihood_matches_negative_hazard_sum() {
    let (intervals, covariate_names) = prepared_intervals();
    let censored: Vec<IntervalRow> = intervals
        .iter()
        .filter(|i| i.country == "Argentina")
        .cloned()
        .collect();
    let inputs = assemble(&censored, &covariate_names).expect("assemble");
    let model = HierarchicalSurvivalModel::new(&inputs, Priors::default()).expect("model");

    let params = ModelParameters {
        alpha: 1.4,
        beta: Array1::from_elem(inputs.k, 0.2),
        mu_lambda: -2.0,
        sigma_lambda: 0.5,
        eta: Array1::zeros(inputs.n_regions),
    };
    let h = model.cumulative_hazards(&params);
    assert_abs_diff_eq!(model.log_likelihood(&params), -h.sum(), epsilon = 1e-10);
}

#[test]
fn unmapped_country_fails_preparation() {
    let rows: Vec<PanelRecord> = (0..3)
        .map(|offset| PanelRecord {
            country: "Atlantis".to_string(),
            year: 2000 + offset,
            scarcity: ScarcityLevel::Low,
            covariates: vec![1.0 + f64::from(offset)],
        })
        .collect();
    let panel = drawdown::data::PanelDataset {
        covariate_names: vec!["withdrawal".to_string()],
        groups: vec![("Atlantis".to_string(), rows)],
    };
    let err = driver::prepare(&panel).expect_err("unmapped country");
    assert!(matches!(err, drawdown::error::SurvError::UnmappedCountry(_)));
}

#[test]
fn end_to_end_fit_produces_a_persistable_artifact() {
    let (intervals, covariate_names) = prepared_intervals();
    let inputs = assemble(&intervals, &covariate_names).expect("assemble");
    let config = HmcConfig {
        n_samples: 80,
        n_warmup: 80,
        n_chains: 2,
        target_accept: 0.8,
        seed: 17,
    };
    let artifact = driver::fit(&inputs, &config, Priors::default()).expect("fit");

    assert_eq!(artifact.n_draws(), 160);
    assert_eq!(artifact.event_rep.ncols(), inputs.n_intervals);
    assert_eq!(artifact.region_scale.ncols(), inputs.n_regions);
    assert!(artifact.alpha.iter().all(|v| v.is_finite() && *v > 0.0));
    assert!(artifact.diagnostics.rhat.is_finite());

    let file = Builder::new().suffix(".toml").tempfile().expect("tempfile");
    let path = file.path().to_str().unwrap().to_string();
    artifact.save(&path).expect("save artifact");
    let reloaded = drawdown::artifact::FitArtifact::load(&path).expect("load artifact");
    assert_eq!(reloaded.n_draws(), artifact.n_draws());
    assert_eq!(reloaded.alpha, artifact.alpha);
    assert_eq!(reloaded.country_names, artifact.country_names);
}
