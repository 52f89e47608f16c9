use crate::model::{Row, State, Theta, Trajectory};
use crate::utils::check_times;
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_distr::Exp1;

/// Exact stochastic simulation engine.
///
/// Simulates the birth/predation/death jump process and records the state
/// at a fixed grid of observation times. The engine holds no random state;
/// every call draws from the stream it is given.
#[derive(Debug, Clone)]
pub struct Engine {
    init: State,
    obs_times: Vec<f64>,
    max_events: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    Birth,
    Predation,
    Death,
}

impl Engine {
    /// Create a new `Engine` for the given initial state and observation times.
    ///
    /// # Errors
    /// Returns an error if the observation times are not strictly increasing
    /// or the event budget is zero.
    pub fn new(init: State, obs_times: Vec<f64>, max_events: u64) -> Result<Self> {
        check_times(&obs_times).context("invalid observation times")?;
        if max_events == 0 {
            bail!("event budget must be positive");
        }
        Ok(Self {
            init,
            obs_times,
            max_events,
        })
    }

    pub fn n_obs(&self) -> usize {
        self.obs_times.len()
    }

    /// Simulate one trajectory for the parameters `theta`.
    ///
    /// The first row is always `(t_0, C_0, S_0)`. If the event budget runs
    /// out, the trajectory is returned truncated at the last completed
    /// observation time.
    pub fn simulate<R: Rng + ?Sized>(&self, theta: &Theta, rng: &mut R) -> Trajectory {
        let mut traj = Trajectory::with_capacity(self.obs_times.len());
        let mut state = self.init;
        let mut time = self.obs_times[0];
        let mut n_events = 0;

        traj.rows.push(Row::new(time, state));

        for &next_time in &self.obs_times[1..] {
            loop {
                let rates = event_rates(theta, state);
                let total_rate: f64 = rates.iter().sum();

                // Absorbing state: nothing can happen until the next observation.
                if total_rate <= 0.0 {
                    break;
                }

                let wait: f64 = rng.sample::<f64, _>(Exp1) / total_rate;
                if time + wait > next_time {
                    break;
                }

                if n_events == self.max_events {
                    log::debug!("event budget of {} exhausted at t = {time}", self.max_events);
                    return traj;
                }

                time += wait;
                apply_event(&mut state, choose_event(&rates, total_rate, rng));
                n_events += 1;
            }

            time = next_time;
            traj.rows.push(Row::new(time, state));
        }

        traj
    }
}

fn event_rates(theta: &Theta, state: State) -> [f64; 3] {
    let coral = state.coral as f64;
    let starfish = state.starfish as f64;
    [
        theta.mu * coral,
        theta.delta * coral * starfish,
        theta.nu * starfish,
    ]
}

fn choose_event<R: Rng + ?Sized>(rates: &[f64; 3], total_rate: f64, rng: &mut R) -> Event {
    let u = rng.random::<f64>() * total_rate;
    if u < rates[0] {
        Event::Birth
    } else if u < rates[0] + rates[1] || rates[2] <= 0.0 {
        Event::Predation
    } else {
        Event::Death
    }
}

fn apply_event(state: &mut State, event: Event) {
    // Predation and death have zero rate when their population is empty,
    // so the subtractions below never underflow.
    match event {
        Event::Birth => state.coral += 1,
        Event::Predation => {
            state.coral -= 1;
            state.starfish += 1;
        }
        Event::Death => state.starfish -= 1,
    }
}
