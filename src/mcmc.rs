//! ABC-MCMC on the logit scale.

use crate::distance::distance;
use crate::engine::Engine;
use crate::model::{Theta, Trajectory};
use crate::streams::StreamSeed;
use crate::transform::{Kernel, log_prior_phi};
use crate::utils::{check_num, check_theta};
use anyhow::{Context, Result};
use rand::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct McmcSettings {
    pub n_iter: usize,
    pub tolerance: f64,
    pub theta_init: Theta,
}

impl McmcSettings {
    fn validate(&self) -> Result<()> {
        check_num(self.n_iter, 1..).context("invalid number of iterations")?;
        check_num(self.tolerance, 0.0..f64::INFINITY).context("invalid tolerance")?;
        check_theta(&self.theta_init).context("invalid initial parameters")?;
        Ok(())
    }
}

/// One Markov chain.
///
/// `samples` holds exactly one entry per iteration; rejected iterations
/// repeat the previous entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chain {
    pub samples: Vec<Theta>,
    pub n_accepted: usize,
    pub n_prior_rejected: usize,
    pub n_tol_rejected: usize,
}

impl Chain {
    pub fn acceptance_rate(&self) -> f64 {
        self.n_accepted as f64 / self.samples.len() as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McmcOutput {
    pub tolerance: f64,
    pub chains: Vec<Chain>,
}

enum Step {
    Accepted(Theta),
    PriorRejected,
    TolRejected,
}

struct Sampler<'a> {
    engine: &'a Engine,
    obs: &'a Trajectory,
    kernel: &'a Kernel,
    tolerance: f64,
}

impl Sampler<'_> {
    fn step<R: Rng + ?Sized>(&self, theta_cur: &Theta, rng: &mut R) -> Step {
        let (phi_cur, phi_prop, theta_prop) = self.kernel.propose(theta_cur, rng);

        // Early rejection on the prior alone, before paying for a simulation.
        let log_ratio = log_prior_phi(&phi_prop) - log_prior_phi(&phi_cur);
        let u: f64 = rng.random();
        if u.ln() > log_ratio {
            return Step::PriorRejected;
        }

        let traj = self.engine.simulate(&theta_prop, rng);
        match distance(self.obs, &traj) {
            Some(dist) if dist <= self.tolerance => Step::Accepted(theta_prop),
            _ => Step::TolRejected,
        }
    }

    fn run<R: Rng + ?Sized>(&self, theta_init: Theta, n_iter: usize, rng: &mut R) -> Chain {
        let mut chain = Chain {
            samples: Vec::with_capacity(n_iter),
            n_accepted: 0,
            n_prior_rejected: 0,
            n_tol_rejected: 0,
        };
        let mut theta_cur = theta_init;

        let report_every = (n_iter / 10).max(1);
        for i_iter in 0..n_iter {
            match self.step(&theta_cur, rng) {
                Step::Accepted(theta_prop) => {
                    theta_cur = theta_prop;
                    chain.n_accepted += 1;
                }
                Step::PriorRejected => chain.n_prior_rejected += 1,
                Step::TolRejected => chain.n_tol_rejected += 1,
            }
            chain.samples.push(theta_cur);

            if (i_iter + 1) % report_every == 0 {
                let progress = 100.0 * (i_iter + 1) as f64 / n_iter as f64;
                log::info!("completed {progress:06.2}%");
            }
        }

        chain
    }
}

/// Run a single ABC-MCMC chain from `settings.theta_init`.
pub fn run_chain<R: Rng + ?Sized>(
    engine: &Engine,
    obs: &Trajectory,
    kernel: &Kernel,
    settings: &McmcSettings,
    rng: &mut R,
) -> Result<Chain> {
    settings.validate().context("invalid MCMC settings")?;

    let sampler = Sampler {
        engine,
        obs,
        kernel,
        tolerance: settings.tolerance,
    };
    Ok(sampler.run(settings.theta_init, settings.n_iter, rng))
}

/// Run `n_chains` independent chains in parallel.
pub fn run_chains<R: Rng + ?Sized>(
    engine: &Engine,
    obs: &Trajectory,
    kernel: &Kernel,
    settings: &McmcSettings,
    n_chains: usize,
    rng: &mut R,
) -> Result<McmcOutput> {
    check_num(n_chains, 1..).context("invalid number of chains")?;
    let seed = StreamSeed::draw(rng);
    let chains: Vec<Chain> = (0..n_chains)
        .into_par_iter()
        .map(|i_chain| {
            let mut rng = seed.stream(i_chain);
            run_chain(engine, obs, kernel, settings, &mut rng)
        })
        .collect::<Result<_>>()?;

    for (i_chain, chain) in chains.iter().enumerate() {
        log::info!(
            "chain {i_chain}: accepted {} of {} ({} prior rejections, {} tolerance rejections)",
            chain.n_accepted,
            settings.n_iter,
            chain.n_prior_rejected,
            chain.n_tol_rejected
        );
        if chain.n_accepted == 0 {
            log::warn!("chain {i_chain} never moved from its initial value");
        }
    }

    Ok(McmcOutput {
        tolerance: settings.tolerance,
        chains,
    })
}
