//! Model-based proposal chain
//!
//! Every update proposes a random-walk change to each free parameter in turn. A proposal is
//! evaluated by coupling the current trajectory into the proposed parameters instead of
//! simulating from scratch, so that accepted and rejected states stay correlated.

use derive_more::{Deref, DerefMut};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::sync::Arc;

use crate::config::ChainSettings;
use crate::core::{Coupler, Model, Population, Trajectory};
use crate::errors::{EpiError, Result};
use crate::observation::ObservationModel;

/// Number of prior draws tried when searching for an initial state.
const INITIAL_TRIES: usize = 100;

const JUMP_GROWTH: f64 = 1.1;
const JUMP_SHRINK: f64 = 0.95;

/// State of a chain after an update.
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    pub update: usize,
    pub parameters: Vec<f64>,
    pub likelihood: f64,
    pub infections: usize,
}

/// Samples collected from a chain.
#[derive(Clone, Debug, Default, Deref, DerefMut)]
pub struct Samples(Vec<Sample>);

impl Samples {
    pub fn new() -> Self {
        Self(Vec::new())
    }
}

pub struct Chain<O: ObservationModel> {
    model: Arc<Model>,
    population: Arc<Population>,
    observation: O,
    settings: ChainSettings,
    coupler: Coupler,
    initial: Trajectory,
    proposed: Trajectory,
    likelihood: f64,
    jumps: Vec<f64>,
    trials: Vec<usize>,
    accepted: Vec<usize>,
    updates: usize,
    rng: ChaCha8Rng,
}

impl<O: ObservationModel> Chain<O> {
    /// Create a chain from a prior draw that stays under the infection ceiling.
    pub fn new(
        model: Arc<Model>,
        population: Arc<Population>,
        observation: O,
        settings: ChainSettings,
        seed: u64,
    ) -> Result<Self> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut coupler = Coupler::new(
            model.clone(),
            population.clone(),
            settings.consistency_checks,
        );

        let mut initial = None;
        for attempt in 0..INITIAL_TRIES {
            let parameters = Self::draw_prior(&model, &mut rng);
            match coupler.simulate(&parameters, &mut rng) {
                Ok(trajectory) => {
                    log::debug!("Initial state found after {} draws", attempt + 1);
                    initial = Some(trajectory);
                    break;
                }
                Err(error) if error.is_rejection() => {
                    log::debug!("Initial draw {attempt} rejected: {error}");
                }
                Err(error) => return Err(error),
            }
        }
        let initial = initial.ok_or_else(|| {
            EpiError::InitializationError(format!(
                "No initial state within {INITIAL_TRIES} prior draws"
            ))
        })?;

        let likelihood = observation.likelihood(&initial);
        let jumps = model
            .parameters
            .iter()
            .map(|parameter| settings.jump * (parameter.max - parameter.min))
            .collect();
        let n_parameters = model.parameters.len();

        Ok(Self {
            model,
            population,
            observation,
            settings,
            coupler,
            proposed: initial.clone(),
            initial,
            likelihood,
            jumps,
            trials: vec![0; n_parameters],
            accepted: vec![0; n_parameters],
            updates: 0,
            rng,
        })
    }

    fn draw_prior<R: Rng + ?Sized>(model: &Model, rng: &mut R) -> Vec<f64> {
        model
            .parameters
            .iter()
            .map(|parameter| match parameter.max > parameter.min {
                true => rng.random_range(parameter.min..=parameter.max),
                false => parameter.value,
            })
            .collect()
    }

    /// Propose a change to every free parameter once.
    pub fn update(&mut self) -> Result<()> {
        let burnin = self.updates < self.settings.burnin;
        for parameter in 0..self.model.parameters.len() {
            let definition = &self.model.parameters[parameter];
            if definition.max <= definition.min {
                continue;
            }

            self.trials[parameter] += 1;
            let accepted = self.propose(parameter)?;
            if accepted {
                self.accepted[parameter] += 1;
            }
            if burnin {
                self.jumps[parameter] *= match accepted {
                    true => JUMP_GROWTH,
                    false => JUMP_SHRINK,
                };
            }
        }
        self.updates += 1;
        Ok(())
    }

    fn propose(&mut self, parameter: usize) -> Result<bool> {
        let mut candidate = self.initial.parameters().to_vec();
        let step: f64 = self.rng.sample(StandardNormal);
        candidate[parameter] += self.jumps[parameter] * step;

        let likelihood = match self.evaluate(&candidate) {
            Ok(likelihood) => likelihood,
            Err(error) if error.is_rejection() => {
                log::trace!("Proposal rejected: {error}");
                return Ok(false);
            }
            Err(error) => return Err(error),
        };

        let log_ratio = self.settings.inverse_temperature * (likelihood - self.likelihood);
        let accept = log_ratio >= 0. || self.rng.random::<f64>() < log_ratio.exp();
        if accept {
            std::mem::swap(&mut self.initial, &mut self.proposed);
            self.likelihood = likelihood;
        }
        log::trace!(
            "Parameter {} proposal {:.6} accepted={accept}",
            self.model.parameters[parameter].name,
            candidate[parameter]
        );
        Ok(accept)
    }

    fn evaluate(&mut self, candidate: &[f64]) -> Result<f64> {
        self.model.check_bounds(candidate)?;
        self.proposed
            .set_parameters(&self.model, &self.population, candidate)?;
        self.coupler
            .run(&self.initial, &mut self.proposed, &mut self.rng)?;
        Ok(self.observation.likelihood(&self.proposed))
    }

    /// Whether the current update is kept as a sample.
    pub fn is_sampled(&self) -> bool {
        self.updates > self.settings.burnin
            && (self.updates - self.settings.burnin) % self.settings.thinning.max(1) == 0
    }

    pub fn sample(&self) -> Sample {
        Sample {
            update: self.updates,
            parameters: self.initial.parameters().to_vec(),
            likelihood: self.likelihood,
            infections: self.initial.n_infections(),
        }
    }

    /// Run the configured number of updates and collect the thinned samples.
    pub fn run(&mut self, mut progress: impl FnMut(&Self)) -> Result<Samples> {
        let mut samples = Samples::new();
        for _ in 0..self.settings.updates {
            self.update()?;
            if self.is_sampled() {
                samples.push(self.sample());
            }
            progress(self);
        }
        Ok(samples)
    }

    pub fn trajectory(&self) -> &Trajectory {
        &self.initial
    }

    pub fn parameters(&self) -> &[f64] {
        self.initial.parameters()
    }

    pub fn likelihood(&self) -> f64 {
        self.likelihood
    }

    pub fn jumps(&self) -> &[f64] {
        &self.jumps
    }

    pub fn trials(&self) -> &[usize] {
        &self.trials
    }

    pub fn accepted(&self) -> &[usize] {
        &self.accepted
    }

    pub fn updates(&self) -> usize {
        self.updates
    }

    /// Fraction of accepted proposals per parameter.
    pub fn acceptance_rates(&self) -> Vec<f64> {
        self.trials
            .iter()
            .zip(self.accepted.iter())
            .map(|(&trials, &accepted)| match trials {
                0 => 0.,
                _ => accepted as f64 / trials as f64,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ObservationRecord, Observations, Settings};
    use crate::core::testing::{build, sir_settings};
    use crate::observation::TransitionCounts;

    fn small_settings() -> Settings {
        let mut settings = sir_settings(2, 50, 1);
        settings.model.steps = 20;
        settings.model.parameters[2].min = 0.005;
        settings.chain.burnin = 2;
        settings.chain.updates = 4;
        settings
    }

    fn chain(settings: &Settings, seed: u64) -> Result<Chain<TransitionCounts>> {
        let (model, population) = build(settings);
        let observations = Observations::from_vec(vec![
            ObservationRecord::new("S->I", 0., 30., 20.),
            ObservationRecord::new("I->R", 0., 60., 15.),
        ])
        .unwrap();
        let observation = TransitionCounts::new(&observations, &model).unwrap();
        Chain::new(
            Arc::new(model),
            Arc::new(population),
            observation,
            settings.chain.clone(),
            seed,
        )
    }

    #[test]
    fn initial_state_within_prior() {
        let chain = chain(&small_settings(), 1).unwrap();
        let model = &chain.model;
        model.check_bounds(chain.parameters()).unwrap();
        assert_eq!(
            chain.likelihood(),
            chain.observation.likelihood(chain.trajectory())
        );
        assert_eq!(chain.updates(), 0);
    }

    #[test]
    fn updates_track_proposals() {
        let settings = small_settings();
        let mut chain = chain(&settings, 2).unwrap();
        let initial_jumps = chain.jumps().to_vec();
        chain.update().unwrap();

        assert_eq!(chain.trials(), &[1, 1, 1]);
        for (parameter, (&jump, &initial)) in
            chain.jumps().iter().zip(initial_jumps.iter()).enumerate()
        {
            let expected = match chain.accepted()[parameter] {
                1 => initial * JUMP_GROWTH,
                _ => initial * JUMP_SHRINK,
            };
            assert!((jump - expected).abs() < 1e-12);
        }
        chain.model.check_bounds(chain.parameters()).unwrap();
        assert_eq!(
            chain.likelihood(),
            chain.observation.likelihood(chain.trajectory())
        );
    }

    #[test]
    fn fixed_parameters_are_not_proposed() {
        let mut settings = small_settings();
        settings.model.parameters[1].min = 5.;
        settings.model.parameters[1].max = 5.;
        let mut chain = chain(&settings, 3).unwrap();
        chain.update().unwrap();
        assert_eq!(chain.trials()[1], 0);
        assert_eq!(chain.parameters()[1], 5.);
    }

    #[test]
    fn run_collects_thinned_samples() {
        let mut settings = small_settings();
        settings.chain.updates = 6;
        settings.chain.thinning = 2;
        let mut chain = chain(&settings, 4).unwrap();
        let mut calls = 0;
        let samples = chain.run(|_| calls += 1).unwrap();
        assert_eq!(calls, 6);
        let updates: Vec<usize> = samples.iter().map(|sample| sample.update).collect();
        assert_eq!(updates, vec![4, 6]);
        assert!(chain.jumps().iter().all(|&jump| jump > 0.));
    }

    #[test]
    fn chains_are_reproducible() {
        let settings = small_settings();
        let mut first = chain(&settings, 5).unwrap();
        let mut second = chain(&settings, 5).unwrap();
        for _ in 0..3 {
            first.update().unwrap();
            second.update().unwrap();
        }
        assert_eq!(first.parameters(), second.parameters());
        assert_eq!(first.trajectory(), second.trajectory());
    }

    #[test]
    fn initialization_fails_without_admissible_draw() {
        let mut settings = small_settings();
        settings.model.infection_ceiling = 0;
        assert!(matches!(
            chain(&settings, 6),
            Err(EpiError::InitializationError(_))
        ));
    }
}
