//! Composable descriptions of DP mechanisms.
//!
//! A `DpEvent` is evaluated by replaying it into an [`RdpAccountant`].

use dp_mnist_core::{DpError, Result};

use crate::rdp::{validate_delta, EpsilonConversion, RdpAccountant};

/// A composable description of a DP mechanism.
#[derive(Clone, Debug, PartialEq)]
pub enum DpEvent {
    /// A Gaussian mechanism with the given noise multiplier.
    Gaussian {
        /// Noise multiplier (standard deviation divided by sensitivity).
        noise_multiplier: f64,
    },
    /// Poisson subsampling applied to an inner event.
    PoissonSampled {
        /// Poisson sampling probability.
        sampling_prob: f64,
        /// The inner event.
        event: Box<DpEvent>,
    },
    /// An event composed with itself multiple times.
    SelfComposed {
        /// The inner event.
        event: Box<DpEvent>,
        /// Number of compositions.
        count: u64,
    },
    /// Sequential composition of heterogeneous events.
    Composed(Vec<DpEvent>),
}

impl DpEvent {
    /// Compute epsilon at the provided delta using the RDP accountant.
    pub fn epsilon(&self, delta: f64) -> Result<f64> {
        self.epsilon_with(delta, EpsilonConversion::Classic)
    }

    /// Compute epsilon with an explicit RDP conversion.
    pub fn epsilon_with(&self, delta: f64, conversion: EpsilonConversion) -> Result<f64> {
        validate_delta(delta)?;
        let mut acct = RdpAccountant::new().with_conversion(conversion);
        self.apply(&mut acct, 1.0, 1)?;
        acct.get_epsilon(delta)
    }

    /// Replay this event into `acct`, `count` times at sampling rate `q`.
    pub fn apply(&self, acct: &mut RdpAccountant, q: f64, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        match self {
            DpEvent::Gaussian { noise_multiplier } => acct.compose(*noise_multiplier, q, count),
            DpEvent::PoissonSampled {
                sampling_prob,
                event,
            } => match event.as_ref() {
                // Poisson sampling of a Poisson sample is a Poisson sample at
                // the product rate.
                DpEvent::Gaussian { .. } | DpEvent::PoissonSampled { .. } => {
                    event.apply(acct, q * sampling_prob, count)
                }
                _ => Err(DpError::unsupported(
                    "Poisson sampling is only analyzed over a Gaussian mechanism",
                )),
            },
            DpEvent::SelfComposed { event, count: inner } => {
                event.apply(acct, q, count.saturating_mul(*inner))
            }
            DpEvent::Composed(events) => {
                for _ in 0..count {
                    for event in events {
                        event.apply(acct, q, 1)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// DP-SGD event: Poisson sampled Gaussian repeated `iterations` times.
pub fn dpsgd_event(noise_multiplier: f64, iterations: u64, sampling_prob: f64) -> DpEvent {
    let gaussian = DpEvent::Gaussian { noise_multiplier };
    let sampled = DpEvent::PoissonSampled {
        sampling_prob,
        event: Box::new(gaussian),
    };
    DpEvent::SelfComposed {
        event: Box::new(sampled),
        count: iterations,
    }
}
