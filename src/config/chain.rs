use serde::{Deserialize, Serialize};

/// Settings of the MBP chain.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChainSettings {
    /// Number of chain updates, each proposing a change to every parameter once.
    #[serde(default = "default_updates")]
    pub updates: usize,

    /// Number of initial updates during which the jump sizes adapt.
    #[serde(default = "default_burnin")]
    pub burnin: usize,

    /// Store every n-th update as a sample.
    #[serde(default = "default_thinning")]
    pub thinning: usize,

    /// Inverse temperature applied to the observation likelihood.
    #[serde(default = "default_inverse_temperature")]
    pub inverse_temperature: f64,

    /// Initial jump size relative to the prior width.
    #[serde(default = "default_jump")]
    pub jump: f64,

    /// Verify the coupling invariants after every step.
    #[serde(default)]
    pub consistency_checks: bool,
}

fn default_updates() -> usize {
    1000
}

fn default_burnin() -> usize {
    200
}

fn default_thinning() -> usize {
    1
}

fn default_inverse_temperature() -> f64 {
    1.
}

fn default_jump() -> f64 {
    0.1
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            updates: default_updates(),
            burnin: default_burnin(),
            thinning: default_thinning(),
            inverse_temperature: default_inverse_temperature(),
            jump: default_jump(),
            consistency_checks: false,
        }
    }
}
