//! Calibration utilities for DP hyper-parameters.

use dp_mnist_core::{DpError, Result};

use crate::event::{dpsgd_event, DpEvent};
use crate::rdp::{validate_delta, validate_noise_multiplier, validate_sampling_rate};

fn validate_target(target_epsilon: f64, target_delta: f64) -> Result<()> {
    if !target_epsilon.is_finite() || target_epsilon <= 0.0 {
        return Err(DpError::invalid("target_epsilon must be finite and > 0"));
    }
    validate_delta(target_delta)
}

/// Calibrate a monotone DP mechanism parameter using `DpEvent`.
///
/// Assumes that increasing the parameter reduces epsilon (e.g. a noise
/// multiplier) and returns the smallest value within `tol` whose epsilon is
/// at most `target_epsilon`. `lower` and `upper` only seed the bracket: it
/// grows upward by doubling and shrinks downward by halving, never below
/// `tol`.
pub fn calibrate_dp_mechanism(
    make_event: impl Fn(f64) -> DpEvent,
    target_epsilon: f64,
    target_delta: f64,
    lower: f64,
    upper: f64,
    tol: f64,
    max_iters: usize,
) -> Result<f64> {
    validate_target(target_epsilon, target_delta)?;
    if !lower.is_finite() || lower <= 0.0 {
        return Err(DpError::invalid("lower bound must be positive"));
    }

    let tol = tol.max(1e-6);
    let mut lo = lower;
    let mut hi = upper.max(lo + tol);

    if make_event(lo).epsilon(target_delta)? <= target_epsilon {
        // Halve until the budget breaks; `tol` is the floor.
        hi = lo;
        lo = 0.5 * hi;
        while make_event(lo).epsilon(target_delta)? <= target_epsilon {
            if lo <= tol {
                return Ok(lo);
            }
            hi = lo;
            lo *= 0.5;
        }
    } else {
        let mut eps_hi = make_event(hi).epsilon(target_delta)?;
        let mut expansions = 0usize;
        while eps_hi > target_epsilon && hi < 1e6 && expansions < 60 {
            lo = hi;
            hi *= 2.0;
            eps_hi = make_event(hi).epsilon(target_delta)?;
            expansions += 1;
        }

        if eps_hi > target_epsilon {
            return Err(DpError::invalid(
                "failed to bracket a parameter achieving the target epsilon",
            ));
        }
    }

    let iters = max_iters.max(1);
    for _ in 0..iters {
        if (hi - lo).abs() <= tol {
            break;
        }
        let mid = 0.5 * (lo + hi);
        let eps_mid = make_event(mid).epsilon(target_delta)?;
        tracing::debug!(param = mid, epsilon = eps_mid, "calibration step");
        if eps_mid <= target_epsilon {
            hi = mid;
        } else {
            lo = mid;
        }
    }

    Ok(hi)
}

/// Calibrate the DP-SGD noise multiplier to meet a target epsilon.
pub fn calibrate_noise_multiplier(
    target_epsilon: f64,
    sampling_rate: f64,
    num_updates: u64,
    target_delta: f64,
    tol: f64,
) -> Result<f64> {
    validate_sampling_rate(sampling_rate)?;
    if num_updates == 0 {
        return Err(DpError::invalid("num_updates must be positive"));
    }

    let sigma = calibrate_dp_mechanism(
        |s| dpsgd_event(s, num_updates, sampling_rate),
        target_epsilon,
        target_delta,
        0.1,
        10.0,
        tol,
        80,
    )?;
    tracing::info!(
        target_epsilon,
        noise_multiplier = sigma,
        sampling_rate,
        num_updates,
        "calibrated noise multiplier"
    );
    Ok(sigma)
}

/// Calibrate the number of updates to stay within a target epsilon.
///
/// Returns the largest step count whose epsilon does not exceed the target.
pub fn calibrate_num_updates(
    target_epsilon: f64,
    noise_multiplier: f64,
    sampling_rate: f64,
    target_delta: f64,
    initial_max_updates: u64,
) -> Result<u64> {
    validate_target(target_epsilon, target_delta)?;
    validate_noise_multiplier(noise_multiplier)?;
    validate_sampling_rate(sampling_rate)?;

    let epsilon_for = |num_updates: u64| -> Result<f64> {
        dpsgd_event(noise_multiplier, num_updates, sampling_rate).epsilon(target_delta)
    };

    let min_updates = 1u64;
    if epsilon_for(min_updates)? > target_epsilon {
        return Err(DpError::invalid(
            "epsilon at a single update already exceeds the target",
        ));
    }

    let mut max_updates = initial_max_updates.max(min_updates + 1);
    while epsilon_for(max_updates)? <= target_epsilon {
        max_updates = max_updates.saturating_mul(2);
        if max_updates > (1 << 40) {
            return Err(DpError::invalid(
                "target epsilon is not reached within 2^40 updates",
            ));
        }
    }

    // Binary search on discrete steps.
    let mut lo = min_updates;
    let mut hi = max_updates;
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if epsilon_for(mid)? <= target_epsilon {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    Ok(lo)
}
