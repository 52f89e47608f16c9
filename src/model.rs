//! Data types of the coral/starfish model.

use serde::{Deserialize, Serialize};

/// Model parameters.
///
/// All three rates live in the open interval `(0, 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Theta {
    /// Coral birth rate.
    pub mu: f64,
    /// Predation rate.
    pub delta: f64,
    /// Starfish death rate.
    pub nu: f64,
}

impl Theta {
    pub fn new(mu: f64, delta: f64, nu: f64) -> Self {
        Self { mu, delta, nu }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.mu, self.delta, self.nu]
    }
}

/// Population state at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Number of coral (prey).
    pub coral: u64,
    /// Number of starfish (predators).
    pub starfish: u64,
}

impl State {
    pub fn new(coral: u64, starfish: u64) -> Self {
        Self { coral, starfish }
    }
}

/// Population state recorded at one observation time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub time: f64,
    pub coral: u64,
    pub starfish: u64,
}

impl Row {
    pub fn new(time: f64, state: State) -> Self {
        Self {
            time,
            coral: state.coral,
            starfish: state.starfish,
        }
    }

    pub fn state(&self) -> State {
        State::new(self.coral, self.starfish)
    }
}

/// Population states sampled at a fixed grid of observation times.
///
/// Both simulated and observed data use this shape.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trajectory {
    pub rows: Vec<Row>,
}

impl Trajectory {
    pub fn with_capacity(n_rows: usize) -> Self {
        Self {
            rows: Vec::with_capacity(n_rows),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.rows.iter().map(|row| row.time).collect()
    }
}
