use crate::config::Config;
use crate::data::{read_msgpack, read_observed, write_msgpack, write_observed};
use crate::engine::Engine;
use crate::mcmc::{McmcOutput, McmcSettings, run_chains};
use crate::model::{Theta, Trajectory};
use crate::rejection::{RejectionOutput, run_rejection};
use crate::smc::{SmcOutput, SmcSettings, run_smc};
use crate::stats::{
    AccumulatorReport, effective_sample_size, logit_covariance, summarize, summarize_weighted,
};
use crate::streams::command_rng;
use crate::transform::Kernel;
use anyhow::{Context, Result, bail};
use glob::glob;
use std::{
    fs,
    path::{Path, PathBuf},
};

// Stream ids keep the commands' random sequences apart under a shared seed.
const STREAM_GENERATE: u64 = 0;
const STREAM_REJECTION: u64 = 1;
const STREAM_MCMC: u64 = 2;
const STREAM_SMC: u64 = 3;

pub struct Manager {
    sim_dir: PathBuf,
    cfg: Config,
}

impl Manager {
    pub fn new<P: AsRef<Path>>(sim_dir: P) -> Result<Self> {
        let sim_dir = sim_dir.as_ref().to_path_buf();

        let cfg =
            Config::from_file(sim_dir.join("config.toml")).context("failed to construct cfg")?;
        log::info!("{cfg:#?}");

        Ok(Self { sim_dir, cfg })
    }

    pub fn generate_observed(&self) -> Result<()> {
        let data = self
            .cfg
            .data
            .as_ref()
            .context("config has no [data] section")?;

        let engine = Engine::new(data.init, data.obs_times.clone(), self.cfg.sim.max_events)
            .context("failed to construct engine")?;
        let mut rng = command_rng(self.cfg.seed, STREAM_GENERATE)?;

        let obs = engine.simulate(&data.theta, &mut rng);
        if obs.len() != engine.n_obs() {
            bail!("event budget exhausted while generating the observation");
        }

        let file = self.observed_file();
        write_observed(&obs, &file).with_context(|| format!("failed to write {file:?}"))?;
        log::info!("wrote {file:?}");

        Ok(())
    }

    pub fn run_rejection(&self) -> Result<()> {
        let (obs, engine) = self.load_observed()?;
        let mut rng = command_rng(self.cfg.seed, STREAM_REJECTION)?;

        let rej = &self.cfg.rejection;
        let output = run_rejection(&engine, &obs, rej.n_draws, rej.quantile, &mut rng)
            .context("failed to run rejection sampler")?;

        self.save(&output, self.rejection_file())
    }

    pub fn run_mcmc(&self) -> Result<()> {
        let (obs, engine) = self.load_observed()?;
        let mcmc = &self.cfg.mcmc;
        let (kernel, post_mean) = self.proposal_kernel(mcmc.cov_scale)?;
        let mut rng = command_rng(self.cfg.seed, STREAM_MCMC)?;

        let settings = McmcSettings {
            n_iter: mcmc.n_iter,
            tolerance: mcmc.tolerance,
            theta_init: mcmc.theta_init.unwrap_or(post_mean),
        };
        let output = run_chains(&engine, &obs, &kernel, &settings, mcmc.n_chains, &mut rng)
            .context("failed to run MCMC sampler")?;

        self.save(&output, self.mcmc_file())
    }

    pub fn run_smc(&self) -> Result<()> {
        let (obs, engine) = self.load_observed()?;
        let smc = &self.cfg.smc;
        let (kernel, post_mean) = self.proposal_kernel(smc.cov_scale)?;
        let mut rng = command_rng(self.cfg.seed, STREAM_SMC)?;

        let settings = SmcSettings {
            n_particles: smc.n_particles,
            n_generations: smc.n_generations,
            tol_init: smc.tol_init,
            scaling_factor: smc.scaling_factor,
            ess_threshold: smc.ess_threshold,
            theta_init: smc.theta_init.unwrap_or(post_mean),
        };
        let output = run_smc(&engine, &obs, &kernel, &settings, &mut rng)
            .context("failed to run SMC sampler")?;

        self.save(&output, self.smc_file())
    }

    pub fn analyze(&self) -> Result<()> {
        let mut n_found = 0;

        let file = self.rejection_file();
        if file.exists() {
            let output: RejectionOutput = read_msgpack(&file)?;
            log::info!("rejection: tolerance {:.4}", output.tolerance);
            log::info!("rejection: {} samples", output.accepted.len());
            log_summary("rejection", &summarize(&output.accepted));
            n_found += 1;
        }

        let file = self.mcmc_file();
        if file.exists() {
            let output: McmcOutput = read_msgpack(&file)?;
            for (i_chain, chain) in output.chains.iter().enumerate() {
                log::info!(
                    "mcmc chain {i_chain}: acceptance rate {:.4}",
                    chain.acceptance_rate()
                );
            }
            let samples: Vec<Theta> = output
                .chains
                .iter()
                .flat_map(|chain| chain.samples.iter().copied())
                .collect();
            log::info!("mcmc: {} samples", samples.len());
            log_summary("mcmc", &summarize(&samples));
            n_found += 1;
        }

        let file = self.smc_file();
        if file.exists() {
            let output: SmcOutput = read_msgpack(&file)?;
            log::info!("smc: tolerances {:?}", output.tolerances);
            log::info!("smc: ESS {:?}", output.ess);
            let reports = summarize_weighted(&output.particles, &output.weights)
                .with_context(|| format!("malformed SMC output in {file:?}"))?;
            log::info!(
                "smc: {} particles, final ESS {:.1}",
                output.particles.len(),
                effective_sample_size(&output.weights)
            );
            log_summary("smc", &reports);
            n_found += 1;
        }

        if n_found == 0 {
            log::warn!("no sampler output found in {:?}", self.sim_dir);
        }

        Ok(())
    }

    /// Remove sampler outputs. The config and observed dataset are kept.
    pub fn clean(&self) -> Result<()> {
        let pattern = self.sim_dir.join("*.msgpack");
        let pattern = pattern.to_str().context("pattern is not valid UTF-8")?;
        for path in glob(pattern)
            .context("failed to glob output files")?
            .filter_map(Result::ok)
        {
            fs::remove_file(&path).with_context(|| format!("failed to remove {path:?}"))?;
            log::info!("removed {path:?}");
        }
        Ok(())
    }

    fn load_observed(&self) -> Result<(Trajectory, Engine)> {
        let file = self.observed_file();
        let obs = read_observed(&file).with_context(|| format!("failed to load {file:?}"))?;
        log::info!("loaded {} observations from {file:?}", obs.len());

        // The first row is the initial state and the time column is the grid.
        let engine = Engine::new(obs.rows[0].state(), obs.times(), self.cfg.sim.max_events)
            .context("failed to construct engine")?;

        Ok((obs, engine))
    }

    /// Proposal kernel from the logit-scale covariance of the rejection
    /// sample, together with that sample's mean.
    fn proposal_kernel(&self, cov_scale: f64) -> Result<(Kernel, Theta)> {
        let file = self.rejection_file();
        let output: RejectionOutput = read_msgpack(&file)
            .with_context(|| format!("failed to load {file:?}; run the rejection sampler first"))?;

        let cov = logit_covariance(&output.accepted)
            .context("failed to estimate proposal covariance")?;
        log::info!("proposal covariance (logit scale): {cov}");
        let kernel = Kernel::new(cov * cov_scale).context("failed to construct kernel")?;

        let [mu, delta, nu] = summarize(&output.accepted);
        Ok((kernel, Theta::new(mu.mean, delta.mean, nu.mean)))
    }

    fn save<T: serde::Serialize>(&self, output: &T, file: PathBuf) -> Result<()> {
        write_msgpack(output, &file).with_context(|| format!("failed to write {file:?}"))?;
        log::info!("wrote {file:?}");
        Ok(())
    }

    fn observed_file(&self) -> PathBuf {
        self.sim_dir.join("observed.toml")
    }

    fn rejection_file(&self) -> PathBuf {
        self.sim_dir.join("rejection.msgpack")
    }

    fn mcmc_file(&self) -> PathBuf {
        self.sim_dir.join("mcmc.msgpack")
    }

    fn smc_file(&self) -> PathBuf {
        self.sim_dir.join("smc.msgpack")
    }
}

fn log_summary(label: &str, reports: &[AccumulatorReport; 3]) {
    let [mu, delta, nu] = reports;
    log::info!("{label}: mu    {:.5} +- {:.5}", mu.mean, mu.std_dev);
    log::info!("{label}: delta {:.5} +- {:.5}", delta.mean, delta.std_dev);
    log::info!("{label}: nu    {:.5} +- {:.5}", nu.mean, nu.std_dev);
}
