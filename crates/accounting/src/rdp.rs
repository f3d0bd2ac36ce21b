//! Rényi Differential Privacy accounting for the subsampled Gaussian mechanism.
//!
//! Per-step RDP is evaluated in log-space for every order in a discretized
//! range, composed linearly over steps, and converted to `(epsilon, delta)` by
//! minimizing over the orders.

use std::f64::consts::SQRT_2;

use dp_mnist_core::{DpError, Result};
use statrs::function::erf::erfc;

/// Terms of the fractional-order series below `exp(-30)` are dropped.
const SERIES_CUTOFF: f64 = -30.0;

/// Hard cap on fractional series terms.
const MAX_SERIES_TERMS: usize = 1_000_000;

/// How accumulated RDP is converted to an `(epsilon, delta)` guarantee.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EpsilonConversion {
    /// Moments-accountant conversion: `rdp - ln(delta) / (alpha - 1)`.
    #[default]
    Classic,
    /// Tighter conversion of Balle et al. (2020).
    Tight,
}

/// RDP accountant for privacy composition.
#[derive(Clone, Debug)]
pub struct RdpAccountant {
    orders: Vec<f64>,
    rdp: Vec<f64>,
    log_factorials: Vec<f64>,
    conversion: EpsilonConversion,
}

impl Default for RdpAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl RdpAccountant {
    /// Create an accountant with default Rényi orders.
    pub fn new() -> Self {
        Self::with_orders(default_orders())
    }

    /// Create an accountant with custom orders.
    ///
    /// Orders that are not finite or not above 1 are dropped; if nothing is
    /// left the default orders are used.
    pub fn with_orders(orders: Vec<f64>) -> Self {
        let orders = sanitize_orders(orders);
        let log_factorials = precompute_log_factorials(max_order_ceil(&orders));
        let rdp = vec![0.0; orders.len()];
        Self {
            orders,
            rdp,
            log_factorials,
            conversion: EpsilonConversion::Classic,
        }
    }

    /// Select the RDP to `(epsilon, delta)` conversion.
    pub fn with_conversion(mut self, conversion: EpsilonConversion) -> Self {
        self.conversion = conversion;
        self
    }

    /// Rényi orders evaluated by this accountant.
    pub fn orders(&self) -> &[f64] {
        &self.orders
    }

    /// Accumulated RDP per order.
    pub fn rdp(&self) -> &[f64] {
        &self.rdp
    }

    /// Compose `steps` DP-SGD steps with noise multiplier `noise_multiplier`
    /// and Poisson sampling rate `q`.
    pub fn compose(&mut self, noise_multiplier: f64, q: f64, steps: u64) -> Result<()> {
        validate_noise_multiplier(noise_multiplier)?;
        validate_sampling_rate(q)?;
        validate_steps(steps)?;

        let steps_f = steps as f64;
        for (i, &alpha) in self.orders.iter().enumerate() {
            let per_step =
                rdp_subsampled_gaussian(q, noise_multiplier, alpha, &self.log_factorials)?;
            self.rdp[i] += per_step * steps_f;
        }
        Ok(())
    }

    /// Record one DP-SGD step.
    pub fn step(&mut self, noise_multiplier: f64, q: f64) -> Result<()> {
        self.compose(noise_multiplier, q, 1)
    }

    /// Convert to (epsilon, delta)-DP.
    pub fn get_epsilon(&self, delta: f64) -> Result<f64> {
        self.get_epsilon_and_order(delta).map(|(eps, _)| eps)
    }

    /// Convert to (epsilon, delta)-DP and report the optimal order.
    pub fn get_epsilon_and_order(&self, delta: f64) -> Result<(f64, f64)> {
        epsilon_from_rdp(&self.orders, &self.rdp, delta, self.conversion)
    }

    /// Reset the accountant.
    pub fn reset(&mut self) {
        self.rdp.fill(0.0);
    }
}

/// Default Rényi orders: `linspace(1.01, 8, 50)`, the integers `8..64`, and
/// `round(linspace(65, 512, 10))`.
pub fn default_orders() -> Vec<f64> {
    let mut orders = Vec::new();

    orders.extend(linspace(1.01, 8.0, 50));
    for a in 8..64 {
        orders.push(a as f64);
    }
    for a in linspace(65.0, 512.0, 10) {
        orders.push(a.round());
    }

    orders
}

/// Compose the RDP of `steps` subsampled Gaussian steps at each order.
pub fn compute_rdp(q: f64, noise_multiplier: f64, steps: u64, orders: &[f64]) -> Result<Vec<f64>> {
    validate_noise_multiplier(noise_multiplier)?;
    validate_sampling_rate(q)?;
    validate_steps(steps)?;
    if orders.iter().any(|&a| !a.is_finite() || a <= 1.0) {
        return Err(DpError::invalid("Rényi orders must be finite and > 1"));
    }

    let log_fact = precompute_log_factorials(max_order_ceil(orders));
    orders
        .iter()
        .map(|&alpha| {
            rdp_subsampled_gaussian(q, noise_multiplier, alpha, &log_fact)
                .map(|r| r * steps as f64)
        })
        .collect()
}

/// Convert accumulated RDP values to `(epsilon, optimal_order)`.
///
/// Orders with infinite RDP are skipped; if none is finite the result is
/// `(f64::INFINITY, f64::NAN)`.
pub fn epsilon_from_rdp(
    orders: &[f64],
    rdp: &[f64],
    delta: f64,
    conversion: EpsilonConversion,
) -> Result<(f64, f64)> {
    validate_delta(delta)?;
    if orders.len() != rdp.len() {
        return Err(DpError::invalid("orders and rdp must have the same length"));
    }
    if orders.iter().any(|&a| !a.is_finite() || a <= 1.0) {
        return Err(DpError::invalid("Rényi orders must be finite and > 1"));
    }

    let log_delta = delta.ln();
    let mut best = f64::INFINITY;
    let mut best_order = f64::NAN;
    let mut best_idx = None;

    for (idx, (&alpha, &r)) in orders.iter().zip(rdp.iter()).enumerate() {
        if !r.is_finite() {
            continue;
        }
        let eps = match conversion {
            EpsilonConversion::Classic => r - log_delta / (alpha - 1.0),
            EpsilonConversion::Tight => {
                r + (-1.0 / alpha).ln_1p() - (log_delta + alpha.ln()) / (alpha - 1.0)
            }
        };
        if eps < best {
            best = eps;
            best_order = alpha;
            best_idx = Some(idx);
        }
    }

    if let Some(idx) = best_idx {
        if orders.len() > 1 && (idx == 0 || idx == orders.len() - 1) {
            tracing::warn!(
                order = best_order,
                epsilon = best,
                "optimal Rényi order is at the edge of the evaluated range; epsilon may be loose"
            );
        }
    }

    Ok((best.max(0.0), best_order))
}

/// Epsilon of DP-SGD with Poisson rate `q`, noise multiplier, `steps`
/// compositions and target `delta`, over the default orders.
pub fn compute_dpsgd_epsilon(q: f64, noise_multiplier: f64, steps: u64, delta: f64) -> Result<f64> {
    validate_delta(delta)?;
    let mut acct = RdpAccountant::new();
    acct.compose(noise_multiplier, q, steps)?;
    acct.get_epsilon(delta)
}

/// Classic RDP epsilon of the composed, non-subsampled Gaussian mechanism,
/// optimized over continuous orders.
///
/// With `rho = steps / (2 sigma^2)`, `eps(alpha) = alpha rho + ln(1/delta) / (alpha - 1)`
/// is minimized at `alpha = 1 + sqrt(ln(1/delta) / rho)`.
pub fn gaussian_rdp_epsilon(noise_multiplier: f64, steps: u64, delta: f64) -> Result<f64> {
    validate_noise_multiplier(noise_multiplier)?;
    validate_steps(steps)?;
    validate_delta(delta)?;
    let rho = steps as f64 / (2.0 * noise_multiplier * noise_multiplier);
    let log_inv_delta = -delta.ln();
    Ok(rho + 2.0 * (rho * log_inv_delta).sqrt())
}

pub(crate) fn validate_noise_multiplier(noise_multiplier: f64) -> Result<()> {
    if !noise_multiplier.is_finite() || noise_multiplier <= 0.0 {
        return Err(DpError::invalid(
            "noise multiplier must be positive and finite",
        ));
    }
    Ok(())
}

pub(crate) fn validate_sampling_rate(q: f64) -> Result<()> {
    if !q.is_finite() || q <= 0.0 || q > 1.0 {
        return Err(DpError::invalid("sampling rate must be in (0, 1]"));
    }
    Ok(())
}

pub(crate) fn validate_delta(delta: f64) -> Result<()> {
    if !delta.is_finite() || delta <= 0.0 || delta >= 1.0 {
        return Err(DpError::invalid("delta must be in (0, 1)"));
    }
    Ok(())
}

pub(crate) fn validate_steps(steps: u64) -> Result<()> {
    if steps == 0 {
        return Err(DpError::invalid("number of steps must be positive"));
    }
    Ok(())
}

fn sanitize_orders(orders: Vec<f64>) -> Vec<f64> {
    let mut orders: Vec<f64> = orders
        .into_iter()
        .filter(|&a| a.is_finite() && a > 1.0)
        .collect();
    orders.sort_by(|a, b| a.total_cmp(b));
    orders.dedup_by(|a, b| (*a - *b).abs() < 1e-12);

    if orders.is_empty() {
        orders = default_orders();
    }
    orders
}

fn linspace(start: f64, end: f64, num: usize) -> Vec<f64> {
    if num == 0 {
        return Vec::new();
    }
    if num == 1 {
        return vec![start];
    }
    let step = (end - start) / (num as f64 - 1.0);
    (0..num).map(|i| start + step * i as f64).collect()
}

fn max_order_ceil(orders: &[f64]) -> usize {
    orders
        .iter()
        .copied()
        .filter(|&a| a.is_finite() && a > 1.0)
        .map(|a| a.ceil() as usize)
        .max()
        .unwrap_or(0)
}

fn precompute_log_factorials(max_alpha: usize) -> Vec<f64> {
    let mut log_fact = vec![0.0; max_alpha.saturating_add(1)];
    for i in 1..log_fact.len() {
        log_fact[i] = log_fact[i - 1] + (i as f64).ln();
    }
    log_fact
}

/// Per-step RDP of the Poisson-subsampled Gaussian mechanism at order `alpha`.
fn rdp_subsampled_gaussian(q: f64, sigma: f64, alpha: f64, log_fact: &[f64]) -> Result<f64> {
    if q == 1.0 {
        return Ok(alpha / (2.0 * sigma * sigma));
    }

    let log_a = if is_integer(alpha) {
        log_a_int(q, sigma, alpha.round() as usize, log_fact)
    } else {
        log_a_frac(q, sigma, alpha)?
    };

    if log_a.is_nan() {
        return Err(DpError::numerical(format!(
            "RDP evaluation failed at order {alpha} (q={q}, sigma={sigma})"
        )));
    }
    if !log_a.is_finite() {
        return Ok(f64::INFINITY);
    }
    // Rounding can push tiny values slightly below zero.
    Ok((log_a / (alpha - 1.0)).max(0.0))
}

fn is_integer(x: f64) -> bool {
    (x - x.round()).abs() < 1e-12
}

/// `log(A_alpha)` for integer alpha: a binomial expansion summed in log-space.
fn log_a_int(q: f64, sigma: f64, alpha: usize, log_fact: &[f64]) -> f64 {
    let log_q = q.ln();
    let log_1mq = (-q).ln_1p();
    let sigma_sq = sigma * sigma;
    let alpha_f = alpha as f64;

    let mut log_sum = f64::NEG_INFINITY;
    for j in 0..=alpha {
        let j_f = j as f64;
        let log_binom = log_fact[alpha] - log_fact[j] - log_fact[alpha - j];
        let log_prob = j_f * log_q + (alpha_f - j_f) * log_1mq;
        let log_exp = j_f * (j_f - 1.0) / (2.0 * sigma_sq);
        log_sum = log_add_exp(log_sum, log_binom + log_prob + log_exp);
    }
    log_sum
}

/// `log(A_alpha)` for fractional alpha: the two-sided series split at `z0`,
/// with generalized binomial coefficients whose sign alternates past `alpha`.
fn log_a_frac(q: f64, sigma: f64, alpha: f64) -> Result<f64> {
    log_a_frac_within(q, sigma, alpha, MAX_SERIES_TERMS)
}

fn log_a_frac_within(q: f64, sigma: f64, alpha: f64, max_terms: usize) -> Result<f64> {
    let log_q = q.ln();
    let log_1mq = (-q).ln_1p();
    let sigma_sq = sigma * sigma;
    let z0 = sigma_sq * (1.0 / q - 1.0).ln() + 0.5;
    let log_half = 0.5f64.ln();

    let mut log_a0 = f64::NEG_INFINITY;
    let mut log_a1 = f64::NEG_INFINITY;
    // |binom(alpha, i)| in log-space and its sign.
    let mut log_coef = 0.0;
    let mut coef_positive = true;

    for i in 0..max_terms {
        let i_f = i as f64;
        let j = alpha - i_f;

        let log_t0 = log_coef + i_f * log_q + j * log_1mq;
        let log_t1 = log_coef + j * log_q + i_f * log_1mq;

        let log_e0 = log_half + log_erfc((i_f - z0) / (SQRT_2 * sigma));
        let log_e1 = log_half + log_erfc((z0 - j) / (SQRT_2 * sigma));

        let log_s0 = log_t0 + (i_f * i_f - i_f) / (2.0 * sigma_sq) + log_e0;
        let log_s1 = log_t1 + (j * j - j) / (2.0 * sigma_sq) + log_e1;

        if coef_positive {
            log_a0 = log_add_exp(log_a0, log_s0);
            log_a1 = log_add_exp(log_a1, log_s1);
        } else {
            log_a0 = log_sub_exp(log_a0, log_s0)?;
            log_a1 = log_sub_exp(log_a1, log_s1)?;
        }

        if log_s0.max(log_s1) < SERIES_CUTOFF {
            return Ok(log_add_exp(log_a0, log_a1));
        }

        let factor = alpha - i_f;
        log_coef += factor.abs().ln() - (i_f + 1.0).ln();
        if factor < 0.0 {
            coef_positive = !coef_positive;
        }
    }

    Err(DpError::numerical(format!(
        "fractional RDP series at alpha = {alpha} did not converge in {max_terms} terms"
    )))
}

/// `log(erfc(x))`, switching to an asymptotic expansion once `erfc` underflows.
fn log_erfc(x: f64) -> f64 {
    let r = erfc(x);
    if r > 0.0 {
        return r.ln();
    }
    let x2 = x * x;
    -0.5 * std::f64::consts::PI.ln() - x.ln() - x2 - 0.5 / x2 + 0.625 / (x2 * x2)
        - 37.0 / (24.0 * x2 * x2 * x2)
        + 353.0 / (64.0 * x2 * x2 * x2 * x2)
}

/// Numerically stable log(exp(a) + exp(b)).
fn log_add_exp(a: f64, b: f64) -> f64 {
    if a == f64::NEG_INFINITY {
        return b;
    }
    if b == f64::NEG_INFINITY {
        return a;
    }
    if a > b {
        a + (b - a).exp().ln_1p()
    } else {
        b + (a - b).exp().ln_1p()
    }
}

/// Numerically stable log(exp(a) - exp(b)) for `a >= b`.
fn log_sub_exp(a: f64, b: f64) -> Result<f64> {
    if b == f64::NEG_INFINITY {
        return Ok(a);
    }
    if a == b {
        return Ok(f64::NEG_INFINITY);
    }
    if b > a {
        return Err(DpError::numerical(
            "log-space subtraction produced a negative value",
        ));
    }
    Ok(a + (-(b - a).exp()).ln_1p())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_step() {
        let mut acc = RdpAccountant::new();
        acc.step(1.0, 0.01).expect("step");
        let eps = acc.get_epsilon(1e-5).expect("epsilon");
        assert!(eps.is_finite());
        assert!(eps > 0.0);
    }

    #[test]
    fn test_epsilon_increases() {
        let mut acc = RdpAccountant::new();
        acc.step(1.0, 0.01).expect("step");
        let eps1 = acc.get_epsilon(1e-5).expect("epsilon");
        acc.step(1.0, 0.01).expect("step");
        let eps2 = acc.get_epsilon(1e-5).expect("epsilon");
        assert!(eps2 > eps1);
    }

    #[test]
    fn default_orders_cover_large_alphas() {
        let orders = default_orders();
        let max = orders
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, |a, b| a.max(b));
        assert!(max >= 512.0);
        assert!(orders.iter().any(|&a| (a - 1.01).abs() < 1e-9));
        assert_eq!(orders.len(), 116);
    }

    #[test]
    fn compose_matches_repeated_step() {
        let mut a = RdpAccountant::new();
        let mut b = RdpAccountant::new();

        for _ in 0..5 {
            a.step(1.3, 0.02).expect("step");
        }
        b.compose(1.3, 0.02, 5).expect("compose");

        let eps_a = a.get_epsilon(1e-6).expect("epsilon");
        let eps_b = b.get_epsilon(1e-6).expect("epsilon");
        assert!((eps_a - eps_b).abs() < 1e-9);
    }

    #[test]
    fn truncated_fractional_series_is_an_error() {
        let full = log_a_frac(0.01, 1.0, 2.5).expect("converges");
        assert!(full.is_finite());
        let err = log_a_frac_within(0.01, 1.0, 2.5, 1).unwrap_err();
        assert!(matches!(err, DpError::NumericalError { .. }));
    }

    #[test]
    fn reference_configuration_gives_single_digit_epsilon() {
        // batch 128 of 10_000 examples, 20 epochs of 63 steps.
        let eps = compute_dpsgd_epsilon(0.0128, 1.1, 1260, 1e-4).expect("epsilon");
        assert!(eps.is_finite());
        assert!(eps > 0.5 && eps < 10.0, "eps = {eps}");

        let again = compute_dpsgd_epsilon(0.0128, 1.1, 1260, 1e-4).expect("epsilon");
        assert_eq!(eps.to_bits(), again.to_bits());
    }

    #[test]
    fn full_batch_matches_closed_form_gaussian() {
        for &(sigma, steps, delta) in &[(2.0, 10u64, 1e-5), (4.0, 50, 1e-6), (1.5, 3, 1e-3)] {
            let eps = compute_dpsgd_epsilon(1.0, sigma, steps, delta).expect("epsilon");
            let closed = gaussian_rdp_epsilon(sigma, steps, delta).expect("closed form");
            assert!(eps >= closed - 1e-9, "discrete optimum below continuous one");
            assert!(
                (eps - closed) / closed < 0.01,
                "sigma={sigma} steps={steps}: {eps} vs {closed}"
            );
        }
    }

    #[test]
    fn integer_order_full_batch_is_alpha_over_two_sigma_squared() {
        let rdp = compute_rdp(1.0, 2.0, 3, &[2.0, 10.0]).expect("rdp");
        assert!((rdp[0] - 3.0 * 2.0 / 8.0).abs() < 1e-12);
        assert!((rdp[1] - 3.0 * 10.0 / 8.0).abs() < 1e-12);
    }

    #[test]
    fn fractional_order_lies_between_integer_neighbours() {
        let rdp = compute_rdp(0.05, 1.0, 1, &[2.0, 2.5, 3.0]).expect("rdp");
        assert!(rdp[0] <= rdp[1] + 1e-12);
        assert!(rdp[1] <= rdp[2] + 1e-12);
    }

    #[test]
    fn huge_noise_drives_epsilon_to_zero() {
        let eps = compute_dpsgd_epsilon(0.01, 1e6, 1000, 1e-5).expect("epsilon");
        assert!(eps < 0.05, "eps = {eps}");
    }

    #[test]
    fn tiny_noise_is_infinite_or_huge() {
        let eps = compute_dpsgd_epsilon(0.5, 1e-3, 10, 1e-5).expect("epsilon");
        assert!(eps > 1e3);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(compute_dpsgd_epsilon(0.01, 1.0, 10, 0.0).is_err());
        assert!(compute_dpsgd_epsilon(0.01, 1.0, 10, 1.0).is_err());
        assert!(compute_dpsgd_epsilon(0.01, 0.0, 10, 1e-5).is_err());
        assert!(compute_dpsgd_epsilon(0.01, -1.0, 10, 1e-5).is_err());
        assert!(compute_dpsgd_epsilon(1.5, 1.0, 10, 1e-5).is_err());
        assert!(compute_dpsgd_epsilon(0.0, 1.0, 10, 1e-5).is_err());
        assert!(compute_dpsgd_epsilon(0.01, 1.0, 0, 1e-5).is_err());

        let mut acct = RdpAccountant::new();
        let err = acct.compose(f64::NAN, 0.1, 1).unwrap_err();
        assert!(matches!(err, DpError::InvalidParameters { .. }));
        assert!(acct.rdp().iter().all(|&r| r == 0.0));
    }

    #[test]
    fn tight_conversion_is_never_looser() {
        let mut classic = RdpAccountant::new();
        classic.compose(1.1, 0.0128, 1260).expect("compose");
        let tight = classic
            .clone()
            .with_conversion(EpsilonConversion::Tight)
            .get_epsilon(1e-4)
            .expect("epsilon");
        let classic = classic.get_epsilon(1e-4).expect("epsilon");
        assert!(tight <= classic + 1e-12);
    }

    #[test]
    fn reset_clears_state() {
        let mut acct = RdpAccountant::new();
        acct.compose(1.0, 0.1, 10).expect("compose");
        acct.reset();
        assert!(acct.rdp().iter().all(|&r| r == 0.0));
    }

    #[test]
    fn custom_orders_are_sanitized() {
        let acct = RdpAccountant::with_orders(vec![4.0, 0.5, f64::NAN, 2.0, 2.0]);
        assert_eq!(acct.orders(), &[2.0, 4.0]);
        let fallback = RdpAccountant::with_orders(vec![1.0]);
        assert_eq!(fallback.orders().len(), default_orders().len());
    }

    #[test]
    fn optimal_order_is_reported() {
        let mut acct = RdpAccountant::new();
        acct.compose(2.0, 1.0, 10).expect("compose");
        let (_, order) = acct.get_epsilon_and_order(1e-5).expect("epsilon");
        // Continuous optimum is 1 + sqrt(ln(1e5) / 1.25), about 4.03.
        assert!(order > 3.5 && order < 4.6, "order = {order}");
    }

    #[test]
    fn log_helpers_are_consistent() {
        let a = 3.0f64.ln();
        let b = 1.0f64.ln();
        assert!((log_add_exp(a, b) - 4.0f64.ln()).abs() < 1e-12);
        assert!((log_sub_exp(a, b).expect("sub") - 2.0f64.ln()).abs() < 1e-12);
        assert!(log_sub_exp(b, a).is_err());
        assert!((log_erfc(0.5) - erfc(0.5).ln()).abs() < 1e-12);
        // Asymptotic branch stays finite and decreasing.
        assert!(log_erfc(40.0).is_finite());
        assert!(log_erfc(40.0) < log_erfc(30.0));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 16, .. ProptestConfig::default() })]

        #[test]
        fn more_noise_never_increases_epsilon(
            sigma_a in 0.6f64..6.0,
            sigma_b in 0.6f64..6.0,
            steps in 1u64..500,
            q in 0.001f64..0.5,
        ) {
            let low = sigma_a.min(sigma_b);
            let high = sigma_a.max(sigma_b);
            let eps_low = compute_dpsgd_epsilon(q, low, steps, 1e-5).expect("epsilon");
            let eps_high = compute_dpsgd_epsilon(q, high, steps, 1e-5).expect("epsilon");
            prop_assert!(eps_high <= eps_low + 1e-9 * eps_low.max(1.0));
        }

        #[test]
        fn more_steps_never_decrease_epsilon(
            sigma in 0.6f64..6.0,
            steps_a in 1u64..2000,
            steps_b in 1u64..2000,
            q in 0.001f64..0.5,
        ) {
            let few = steps_a.min(steps_b);
            let many = steps_a.max(steps_b);
            let eps_few = compute_dpsgd_epsilon(q, sigma, few, 1e-5).expect("epsilon");
            let eps_many = compute_dpsgd_epsilon(q, sigma, many, 1e-5).expect("epsilon");
            prop_assert!(eps_many >= eps_few - 1e-9 * eps_few.max(1.0));
        }
    }
}
