//! Privacy accounting for differentially private training.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod calibrate;
pub mod event;
pub mod params;
pub mod rdp;

pub use calibrate::{calibrate_dp_mechanism, calibrate_noise_multiplier, calibrate_num_updates};
pub use event::{dpsgd_event, DpEvent};
pub use params::{DpParams, Sampler};
pub use rdp::{
    compute_dpsgd_epsilon, compute_rdp, default_orders, epsilon_from_rdp, gaussian_rdp_epsilon,
    EpsilonConversion, RdpAccountant,
};

/// Common imports for privacy accounting.
pub mod prelude {
    pub use crate::{
        calibrate_dp_mechanism, calibrate_noise_multiplier, calibrate_num_updates,
        compute_dpsgd_epsilon, compute_rdp, default_orders, dpsgd_event, epsilon_from_rdp,
        gaussian_rdp_epsilon, DpEvent, DpParams, EpsilonConversion, RdpAccountant, Sampler,
    };
}
