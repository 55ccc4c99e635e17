//! Compartmental paths
//!
//! After infection an individual follows a path through the compartments until it reaches a
//! compartment without outgoing transitions. Paths are either simulated from scratch or coupled
//! to a path realized under other parameters: branches are kept where possible and sojourn
//! times are mapped through their quantiles, such that equal parameters reproduce the path
//! exactly.

use rand::prelude::*;
use rand_distr::{Exp1, StandardNormal};

use super::derived::DerivedQuantities;
use super::model::{INFECTION, Model, SUSCEPTIBLE, Sojourn, TINY, TransitionKind};

/// A transition of an individual.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event {
    pub transition: usize,
    pub time: f64,
    pub period: usize,
}

/// The parameters a path is realized under.
#[derive(Clone, Copy, Debug)]
pub struct Regime<'a> {
    pub parameters: &'a [f64],
    pub derived: &'a DerivedQuantities,
}

/// Location and scale of the log of a log-normal distribution with given mean and cv.
fn log_normal(mean: f64, cv: f64) -> (f64, f64) {
    let sd = (1. + cv * cv).ln().sqrt();
    (mean.ln() - 0.5 * sd * sd, sd)
}

fn sample_sojourn<R: Rng + ?Sized>(sojourn: Sojourn, parameters: &[f64], rng: &mut R) -> f64 {
    match sojourn {
        Sojourn::Exponential { mean } => {
            let waiting: f64 = Exp1.sample(rng);
            waiting * parameters[mean]
        }
        Sojourn::LogNormal { mean, cv } => {
            let (location, scale) = log_normal(parameters[mean], parameters[cv]);
            let normal: f64 = StandardNormal.sample(rng);
            (location + scale * normal).exp()
        }
    }
}

/// Map a sojourn realized under one regime to the same quantile under another.
fn rescale_sojourn(sojourn: Sojourn, initial: &[f64], proposed: &[f64], dt: f64) -> f64 {
    match sojourn {
        Sojourn::Exponential { mean } => dt * proposed[mean] / initial[mean],
        Sojourn::LogNormal { mean, cv } => {
            if initial[mean] == proposed[mean] && initial[cv] == proposed[cv] {
                return dt;
            }
            let (location_i, scale_i) = log_normal(initial[mean], initial[cv]);
            let (location_p, scale_p) = log_normal(proposed[mean], proposed[cv]);
            (location_p + (dt.ln() - location_i) * scale_p / scale_i).exp()
        }
    }
}

fn sojourn_of(model: &Model, transition: usize) -> Sojourn {
    match model.transitions[transition].kind {
        TransitionKind::Sojourn(sojourn) => sojourn,
        kind => unreachable!("transition {transition} of kind {kind:?} has no sojourn"),
    }
}

/// Append a transition at time `time`, preceded by markers of every period boundary crossed
/// since `period`.
fn push_event(
    model: &Model,
    events: &mut Vec<Event>,
    compartment: usize,
    transition: usize,
    time: f64,
    period: &mut usize,
) {
    while *period + 1 < model.periods.len() && model.periods[*period].end < time {
        events.push(Event {
            transition: model.compartments[compartment].marker,
            time: model.periods[*period].end,
            period: *period,
        });
        *period += 1;
    }
    events.push(Event {
        transition,
        time,
        period: *period,
    });
}

/// Simulate the path of an individual from a compartment onwards, appending to `events`.
///
/// Starting in the susceptible compartment replaces `events` by an infection at `time`.
pub fn simulate_path<R: Rng + ?Sized>(
    model: &Model,
    regime: Regime,
    age: usize,
    compartment: usize,
    time: f64,
    events: &mut Vec<Event>,
    rng: &mut R,
) {
    let mut period = model.period_of(time);
    let mut compartment = compartment;
    let mut time = time;

    if compartment == SUSCEPTIBLE {
        events.clear();
        events.push(Event {
            transition: INFECTION,
            time,
            period,
        });
        compartment = model.transitions[INFECTION].to;
    }

    loop {
        let outgoing = &model.compartments[compartment].transitions;
        let transition = match outgoing.len() {
            0 => break,
            1 => outgoing[0],
            _ => {
                let draw = rng.random::<f64>();
                let mut sum = 0.;
                let mut chosen = outgoing[outgoing.len() - 1];
                for &t in outgoing {
                    sum += regime.derived.branch[t][age];
                    if draw < sum {
                        chosen = t;
                        break;
                    }
                }
                chosen
            }
        };

        let dt = sample_sojourn(sojourn_of(model, transition), regime.parameters, rng).max(TINY);
        time += dt;
        push_event(model, events, compartment, transition, time, &mut period);
        compartment = model.transitions[transition].to;
    }
}

/// Draw the infection path of a newly infected individual.
pub fn simulate_infection<R: Rng + ?Sized>(
    model: &Model,
    regime: Regime,
    age: usize,
    time: f64,
    rng: &mut R,
) -> Vec<Event> {
    let mut events = Vec::new();
    simulate_path(model, regime, age, SUSCEPTIBLE, time, &mut events, rng);
    events
}

/// Branch taken under the proposed regime given the branch taken under the initial one.
///
/// A branch that lost probability is left with probability `1 - p_proposed / p_initial`, in
/// which case the new branch is drawn proportional to the probability gained by the others.
fn couple_branch<R: Rng + ?Sized>(
    outgoing: &[usize],
    taken: usize,
    age: usize,
    initial: &DerivedQuantities,
    proposed: &DerivedQuantities,
    rng: &mut R,
) -> usize {
    let p_initial = initial.branch[taken][age];
    let p_proposed = proposed.branch[taken][age];
    if p_proposed >= p_initial || rng.random::<f64>() >= 1. - p_proposed / p_initial {
        return taken;
    }

    let gains: Vec<f64> = outgoing
        .iter()
        .map(|&t| (proposed.branch[t][age] - initial.branch[t][age]).max(0.))
        .collect();
    let total: f64 = gains.iter().sum();
    if total <= 0. {
        return taken;
    }

    let draw = rng.random::<f64>() * total;
    let mut sum = 0.;
    for (&t, gain) in outgoing.iter().zip(gains.iter()) {
        sum += gain;
        if draw < sum {
            return t;
        }
    }
    outgoing
        .iter()
        .zip(gains.iter())
        .rev()
        .find(|(_, gain)| **gain > 0.)
        .map(|(&t, _)| t)
        .unwrap_or(taken)
}

/// Re-derive an infection path realized under the initial regime for the proposed regime.
pub fn couple_path<R: Rng + ?Sized>(
    model: &Model,
    initial: Regime,
    proposed: Regime,
    age: usize,
    initial_events: &[Event],
    rng: &mut R,
) -> Vec<Event> {
    let mut events = Vec::with_capacity(initial_events.len());
    let infection = initial_events[0];
    events.push(infection);

    let mut compartment = model.transitions[infection.transition].to;
    let mut period = infection.period;
    let mut time_initial = infection.time;
    let mut time = infection.time;

    for event in initial_events[1..].iter() {
        if model.transitions[event.transition].is_marker() {
            continue;
        }
        let dt = event.time - time_initial;
        time_initial = event.time;

        let outgoing = &model.compartments[compartment].transitions;
        if outgoing.is_empty() {
            break;
        }
        let transition = match outgoing.len() {
            1 => event.transition,
            _ => couple_branch(
                outgoing,
                event.transition,
                age,
                initial.derived,
                proposed.derived,
                rng,
            ),
        };

        let dt = rescale_sojourn(
            sojourn_of(model, transition),
            initial.parameters,
            proposed.parameters,
            dt,
        )
        .max(TINY);
        time += dt;
        push_event(model, &mut events, compartment, transition, time, &mut period);
        compartment = model.transitions[transition].to;

        if transition != event.transition {
            break;
        }
    }

    if !model.compartments[compartment].transitions.is_empty() {
        simulate_path(model, proposed, age, compartment, time, &mut events, rng);
    }
    events
}
