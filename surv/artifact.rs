use crate::assemble::CovariateScale;
use crate::hmc::HmcConfig;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use thiserror::Error;

/// Errors surfaced while persisting or reloading a fit artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse the fit artifact file: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize the fit artifact: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Sampler-side diagnostics attached to a fit.
///
/// These are reported, never raised: a fit artifact is produced even when
/// the chains disagree, and `converged` tells the reader how much to trust
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    /// Max split-R̂ over all sampled parameters.
    pub rhat: f64,
    /// Min bulk effective sample size over all sampled parameters.
    pub ess: f64,
    /// Divergent trajectories across chains (post-warmup).
    pub divergences: usize,
    /// Mean post-warmup acceptance probability.
    pub accept_rate: f64,
    pub converged: bool,
}

/// The persisted product of one inference run: named parameter draws plus
/// everything needed to interpret them (labels, scaling constants, config).
///
/// Draw matrices are chain-major with `n_draws = n_chains · n_samples`
/// rows. Column `r` of `region_scale` corresponds to `region_names[r]`,
/// column `j` of `beta` to `covariate_names[j]`, and column `i` of
/// `event_rep` to interval row `i` of the processed dataset the fit was
/// built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitArtifact {
    // Plain values first: TOML wants key-value pairs ahead of sub-tables.
    pub n_intervals: usize,
    pub n_countries: usize,
    pub n_regions: usize,
    pub k: usize,
    pub country_names: Vec<String>,
    pub region_names: Vec<String>,
    pub covariate_names: Vec<String>,
    pub config: HmcConfig,
    pub scaling: Vec<CovariateScale>,
    /// Weibull shape draws, length `n_draws`.
    pub alpha: Array1<f64>,
    /// Coefficient draws, `n_draws × k` (standardized-covariate scale).
    pub beta: Array2<f64>,
    pub mu_lambda: Array1<f64>,
    pub sigma_lambda: Array1<f64>,
    /// Standardized region deviations, `n_draws × n_regions`.
    pub eta: Array2<f64>,
    /// Derived `exp(μ_λ + σ_λ·η_r)` draws, `n_draws × n_regions`.
    pub region_scale: Array2<f64>,
    /// Derived hazard-ratio draws `exp(β)`, `n_draws × k`.
    pub hazard_ratio: Array2<f64>,
    /// Posterior-predictive event replicates, `n_draws × n_intervals`.
    pub event_rep: Array2<u8>,
    pub diagnostics: FitDiagnostics,
}

impl FitArtifact {
    pub fn n_draws(&self) -> usize {
        self.alpha.len()
    }

    /// Posterior mean of the total simulated event count, the headline
    /// posterior-predictive-check statistic.
    pub fn mean_simulated_events(&self) -> f64 {
        if self.event_rep.nrows() == 0 {
            return 0.0;
        }
        let total: f64 = self.event_rep.iter().map(|&e| f64::from(e)).sum();
        total / self.event_rep.nrows() as f64
    }

    pub fn save(&self, path: &str) -> Result<(), ArtifactError> {
        let rendered = toml::to_string(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(rendered.as_bytes())?;
        Ok(())
    }

    pub fn load(path: &str) -> Result<Self, ArtifactError> {
        let raw = fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}
