use clap::{Parser, Subcommand};
use drawdown::assemble::assemble;
use drawdown::data::{load_panel, read_processed, write_processed};
use drawdown::driver;
use drawdown::hmc::HmcConfig;
use drawdown::model::Priors;
use std::error::Error;
use std::process;

#[derive(Parser)]
#[command(
    name = "drawdown",
    about = "Bayesian hierarchical time-to-event analysis of water-scarcity onset",
    long_about = "Turns a per-country, per-year panel of water-use indicators into \
                  counting-process survival data, then fits a hierarchical \
                  piecewise-exponential Weibull model with region-varying baseline rates."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Derive survival outcomes and expand the panel into risk intervals
    #[command(about = "Preprocess a raw panel into the interval dataset")]
    Prepare {
        /// Path to the raw panel (TSV/CSV/Parquet) with country, year,
        /// scarcity_level and covariate columns
        panel: String,

        /// Where to write the processed interval dataset
        #[arg(long, default_value = "processed.tsv")]
        output: String,
    },

    /// Fit the hierarchical survival model to a processed interval dataset
    #[command(about = "Fit the model and persist the fit artifact (TOML)")]
    Fit {
        /// Path to a processed interval dataset written by `prepare`
        processed: String,

        /// Where to write the fit artifact
        #[arg(long, default_value = "fit.toml")]
        output: String,

        /// Number of independent parallel chains
        #[arg(long, default_value = "4")]
        chains: usize,

        /// Warmup iterations per chain (adapted, discarded)
        #[arg(long, default_value = "500")]
        warmup: usize,

        /// Kept sampling iterations per chain
        #[arg(long, default_value = "1000")]
        samples: usize,

        /// Target acceptance rate for step-size adaptation
        #[arg(long, default_value = "0.8")]
        target_accept: f64,

        /// Base RNG seed (chain c uses seed + c)
        #[arg(long, default_value = "42")]
        seed: u64,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        log::error!("{error}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    match cli.command {
        Commands::Prepare { panel, output } => {
            let dataset = load_panel(&panel)?;
            let intervals = driver::prepare(&dataset)?;
            let events = intervals.iter().filter(|i| i.event == 1).count();
            write_processed(&intervals, &dataset.covariate_names, &output)?;
            log::info!(
                "wrote {} interval rows ({} events) to {output}",
                intervals.len(),
                events
            );
        }
        Commands::Fit {
            processed,
            output,
            chains,
            warmup,
            samples,
            target_accept,
            seed,
        } => {
            let (rows, covariate_names) = read_processed(&processed)?;
            let inputs = assemble(&rows, &covariate_names)?;
            let config = HmcConfig {
                n_samples: samples,
                n_warmup: warmup,
                n_chains: chains,
                target_accept,
                seed,
            };
            let artifact = driver::fit(&inputs, &config, Priors::default())?;
            artifact.save(&output)?;

            let d = &artifact.diagnostics;
            log::info!(
                "fit saved to {output}: {} draws, max R-hat {:.3}, min ESS {:.0}, {} divergences{}",
                artifact.n_draws(),
                d.rhat,
                d.ess,
                d.divergences,
                if d.converged { "" } else { " (NOT CONVERGED)" }
            );
            for (j, name) in artifact.covariate_names.iter().enumerate() {
                let mean = artifact.hazard_ratio.column(j).mean().unwrap_or(f64::NAN);
                log::info!("hazard ratio [{name}]: posterior mean {mean:.3}");
            }
            for (r, name) in artifact.region_names.iter().enumerate() {
                let mean = artifact.region_scale.column(r).mean().unwrap_or(f64::NAN);
                log::info!("region scale [{name}]: posterior mean {mean:.4}");
            }
        }
    }
    Ok(())
}
