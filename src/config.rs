use crate::model::{State, Theta};
use crate::utils::{check_num, check_theta, check_times};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Inference configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Seed for every random stream; drawn from the OS when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Synthetic observation settings (only needed by `generate`).
    #[serde(default)]
    pub data: Option<DataConfig>,

    #[serde(default)]
    pub sim: SimConfig,

    pub rejection: RejectionConfig,
    pub mcmc: McmcConfig,
    pub smc: SmcConfig,
}

/// Settings used to simulate an observed dataset.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// Generating parameters.
    pub theta: Theta,
    /// Initial coral and starfish counts.
    pub init: State,
    /// Observation times (strictly increasing).
    pub obs_times: Vec<f64>,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimConfig {
    /// Maximum number of events per simulated trajectory.
    #[serde(default = "default_max_events")]
    pub max_events: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            max_events: default_max_events(),
        }
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RejectionConfig {
    /// Number of prior draws.
    pub n_draws: usize,
    /// Fraction of closest draws that is retained.
    #[serde(default = "default_quantile")]
    pub quantile: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct McmcConfig {
    /// Iterations per chain.
    pub n_iter: usize,
    /// Number of independent chains.
    #[serde(default = "default_one")]
    pub n_chains: usize,
    /// Fixed acceptance tolerance.
    pub tolerance: f64,
    /// Starting point; defaults to the rejection posterior mean.
    #[serde(default)]
    pub theta_init: Option<Theta>,
    /// Multiplier on the estimated proposal covariance.
    #[serde(default = "default_cov_scale")]
    pub cov_scale: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SmcConfig {
    pub n_particles: usize,
    pub n_generations: usize,
    /// Upper bound for every tolerance of the schedule.
    pub tol_init: f64,
    /// Multiplier on the distance quantile proposing the next tolerance.
    #[serde(default = "default_scaling_factor")]
    pub scaling_factor: f64,
    /// Resample when the effective sample size falls below this value.
    pub ess_threshold: f64,
    /// Reference point of the first generation; defaults to the rejection posterior mean.
    #[serde(default)]
    pub theta_init: Option<Theta>,
    #[serde(default = "default_cov_scale")]
    pub cov_scale: f64,
}

fn default_max_events() -> u64 {
    1_000_000
}

fn default_quantile() -> f64 {
    0.05
}

fn default_one() -> usize {
    1
}

fn default_cov_scale() -> f64 {
    1.0
}

fn default_scaling_factor() -> f64 {
    1.0
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("failed to deserialize config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(data) = &self.data {
            check_theta(&data.theta).context("invalid generating parameters")?;
            check_times(&data.obs_times).context("invalid observation times")?;
        }

        check_num(self.sim.max_events, 1..=1_000_000_000).context("invalid event budget")?;

        let rej = &self.rejection;
        check_num(rej.n_draws, 1..=100_000_000).context("invalid number of draws")?;
        check_num(rej.quantile, f64::MIN_POSITIVE..1.0).context("invalid rejection quantile")?;

        let mcmc = &self.mcmc;
        check_num(mcmc.n_iter, 1..=100_000_000).context("invalid number of iterations")?;
        check_num(mcmc.n_chains, 1..=1024).context("invalid number of chains")?;
        check_num(mcmc.tolerance, 0.0..f64::INFINITY).context("invalid MCMC tolerance")?;
        if let Some(theta) = &mcmc.theta_init {
            check_theta(theta).context("invalid MCMC initial parameters")?;
        }
        check_num(mcmc.cov_scale, f64::MIN_POSITIVE..f64::INFINITY)
            .context("invalid MCMC covariance scale")?;

        let smc = &self.smc;
        check_num(smc.n_particles, 1..=10_000_000).context("invalid number of particles")?;
        check_num(smc.n_generations, 1..=10_000).context("invalid number of generations")?;
        check_num(smc.tol_init, f64::MIN_POSITIVE..f64::INFINITY)
            .context("invalid initial tolerance")?;
        check_num(smc.scaling_factor, f64::MIN_POSITIVE..f64::INFINITY)
            .context("invalid scaling factor")?;
        check_num(smc.ess_threshold, 0.0..=smc.n_particles as f64)
            .context("invalid ESS threshold")?;
        if let Some(theta) = &smc.theta_init {
            check_theta(theta).context("invalid SMC initial parameters")?;
        }
        check_num(smc.cov_scale, f64::MIN_POSITIVE..f64::INFINITY)
            .context("invalid SMC covariance scale")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
seed = 7

[data]
theta = { mu = 0.6, delta = 0.01, nu = 0.4 }
init = { coral = 34, starfish = 16 }
obs_times = [0.0, 2.0, 4.0, 6.0]

[rejection]
n_draws = 1000

[mcmc]
n_iter = 500
tolerance = 60.0

[smc]
n_particles = 100
n_generations = 3
tol_init = 100.0
ess_threshold = 50.0
"#;

    #[test]
    fn valid_config_uses_defaults() {
        let cfg = Config::from_toml(VALID).unwrap();
        assert_eq!(cfg.seed, Some(7));
        assert_eq!(cfg.sim.max_events, 1_000_000);
        assert_eq!(cfg.rejection.quantile, 0.05);
        assert_eq!(cfg.mcmc.n_chains, 1);
        assert_eq!(cfg.mcmc.theta_init, None);
        assert_eq!(cfg.smc.scaling_factor, 1.0);
        assert_eq!(cfg.data.unwrap().init, State::new(34, 16));
    }

    #[test]
    fn non_increasing_times_are_rejected() {
        let contents = VALID.replace("[0.0, 2.0, 4.0, 6.0]", "[0.0, 4.0, 2.0]");
        assert!(Config::from_toml(&contents).is_err());
    }

    #[test]
    fn zero_counts_are_rejected() {
        let contents = VALID.replace("n_draws = 1000", "n_draws = 0");
        assert!(Config::from_toml(&contents).is_err());

        let contents = VALID.replace("n_generations = 3", "n_generations = 0");
        assert!(Config::from_toml(&contents).is_err());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let contents = VALID.replace("ess_threshold = 50.0", "ess_threshold = 500.0");
        assert!(Config::from_toml(&contents).is_err());

        let contents = VALID.replace("mu = 0.6", "mu = 1.5");
        assert!(Config::from_toml(&contents).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let contents = VALID.replace("n_iter = 500", "n_iter = 500\nburn_in = 10");
        assert!(Config::from_toml(&contents).is_err());
    }
}
