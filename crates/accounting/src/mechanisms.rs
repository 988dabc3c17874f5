//! RDP of individual mechanisms.
//!
//! Each function returns one RDP value per requested order. Values can be
//! `f64::INFINITY` but are never negative.

use std::f64::consts::{LN_2, SQRT_2};

use dp_accounting_core::{DpError, Result};

use crate::forward_diff::forward_diffs;
use crate::log_math::{log_add, log_sub};
use crate::special::{log_comb, log_erfc};

/// Series terms below `exp(LOG_A_FRAC_TOLERANCE)` end the fractional-order sum.
const LOG_A_FRAC_TOLERANCE: f64 = -30.0;

/// Largest integer order for which the without-replacement bound is
/// evaluated exactly; above it the O(alpha^2) forward differences are
/// replaced by the direct CGF bound.
pub const WOR_EXACT_MAX_ORDER: u64 = 256;

fn is_integer(x: f64) -> bool {
    x.is_finite() && x.fract() == 0.0
}

fn check_sampling_probability(q: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&q) {
        return Err(DpError::invalid(format!(
            "sampling probability must be in [0, 1], got {q}"
        )));
    }
    Ok(())
}

fn check_noise_multiplier(noise_multiplier: f64) -> Result<()> {
    if noise_multiplier.is_nan() || noise_multiplier < 0.0 {
        return Err(DpError::invalid(format!(
            "noise_multiplier must be non-negative, got {noise_multiplier}"
        )));
    }
    Ok(())
}

fn check_order(alpha: f64) -> Result<()> {
    if alpha.is_nan() || alpha < 1.0 {
        return Err(DpError::invalid(format!(
            "Renyi divergence order must be at least 1, got {alpha}"
        )));
    }
    Ok(())
}

fn order_above_one(alpha: f64) -> Result<()> {
    if alpha == 1.0 {
        return Err(DpError::invalid(
            "subsampled Gaussian RDP is only defined here for orders above 1",
        ));
    }
    Ok(())
}

/// RDP of the Poisson-subsampled Gaussian mechanism.
///
/// `q` is the sampling rate and `noise_multiplier` the ratio of the noise
/// standard deviation to the l2-sensitivity.
pub fn rdp_poisson_subsampled_gaussian(
    q: f64,
    noise_multiplier: f64,
    orders: &[f64],
) -> Result<Vec<f64>> {
    check_sampling_probability(q)?;
    check_noise_multiplier(noise_multiplier)?;
    orders
        .iter()
        .map(|&alpha| poisson_subsampled_gaussian_at(q, noise_multiplier, alpha))
        .collect()
}

/// RDP of the Poisson-subsampled Gaussian mechanism at a single order.
pub fn poisson_subsampled_gaussian_at(q: f64, sigma: f64, alpha: f64) -> Result<f64> {
    check_order(alpha)?;
    if alpha.is_infinite() || sigma == 0.0 {
        return Ok(f64::INFINITY);
    }
    if q == 0.0 || sigma.is_infinite() {
        return Ok(0.0);
    }
    if q == 1.0 {
        return Ok(alpha / (2.0 * sigma * sigma));
    }
    order_above_one(alpha)?;

    let log_a = if is_integer(alpha) {
        log_a_int(q, sigma, alpha as u64)
    } else {
        log_a_frac(q, sigma, alpha)?
    };
    // Rounding can leave log(A) a hair below zero for very large sigma.
    Ok((log_a / (alpha - 1.0)).max(0.0))
}

/// `log(A_alpha)` for integer `alpha`, `0 < q < 1`.
fn log_a_int(q: f64, sigma: f64, alpha: u64) -> f64 {
    let log_q = q.ln();
    let log_1mq = (-q).ln_1p();
    let two_sigma_sq = 2.0 * sigma * sigma;
    let alpha_f = alpha as f64;

    (0..=alpha).fold(f64::NEG_INFINITY, |log_a, i| {
        let i_f = i as f64;
        let log_coef = log_comb(alpha_f, i_f) + i_f * log_q + (alpha_f - i_f) * log_1mq;
        log_add(log_a, log_coef + (i_f * i_f - i_f) / two_sigma_sq)
    })
}

/// `log(A_alpha)` for fractional `alpha`, `0 < q < 1`.
///
/// A_alpha is split into integrals over `(-inf, z0]` and `[z0, inf)`, each
/// expanded as a series whose generalized binomial coefficients alternate in
/// sign once `i` exceeds `alpha`.
fn log_a_frac(q: f64, sigma: f64, alpha: f64) -> Result<f64> {
    let log_q = q.ln();
    let log_1mq = (-q).ln_1p();
    let two_sigma_sq = 2.0 * sigma * sigma;
    let erfc_scale = SQRT_2 * sigma;
    let z0 = sigma * sigma * (1.0 / q - 1.0).ln() + 0.5;

    let mut log_a0 = f64::NEG_INFINITY;
    let mut log_a1 = f64::NEG_INFINITY;
    // log|C(alpha, i)| and its sign, updated by the ratio (alpha - i + 1) / i.
    let mut log_coef = 0.0;
    let mut coef_positive = true;
    let mut i: u64 = 0;

    loop {
        let i_f = i as f64;
        if i > 0 {
            let factor = alpha - i_f + 1.0;
            log_coef += factor.abs().ln() - i_f.ln();
            if factor < 0.0 {
                coef_positive = !coef_positive;
            }
        }
        let j = alpha - i_f;

        let log_t0 = log_coef + i_f * log_q + j * log_1mq;
        let log_t1 = log_coef + j * log_q + i_f * log_1mq;

        let log_e0 = (0.5f64).ln() + log_erfc((i_f - z0) / erfc_scale);
        let log_e1 = (0.5f64).ln() + log_erfc((z0 - j) / erfc_scale);

        let log_s0 = log_t0 + (i_f * i_f - i_f) / two_sigma_sq + log_e0;
        let log_s1 = log_t1 + (j * j - j) / two_sigma_sq + log_e1;

        if coef_positive {
            log_a0 = log_add(log_a0, log_s0);
            log_a1 = log_add(log_a1, log_s1);
        } else {
            log_a0 = log_sub(log_a0, log_s0)?;
            log_a1 = log_sub(log_a1, log_s1)?;
        }

        i += 1;
        if log_s0.max(log_s1) < LOG_A_FRAC_TOLERANCE {
            break;
        }
    }
    log::trace!("fractional log(A) at order {alpha} converged after {i} terms");

    Ok(log_add(log_a0, log_a1))
}

/// RDP of the Gaussian mechanism under sampling without replacement.
///
/// Covers a uniformly random subset of size `m = q * n` under the
/// replace-one relation, where `n` is public. Reference: Theorem 27 of Wang,
/// Balle and Kasiviswanathan, "Subsampled Renyi Differential Privacy and
/// Analytical Moments Accountant" (AISTATS 2019).
pub fn rdp_sample_wor_gaussian(q: f64, noise_multiplier: f64, orders: &[f64]) -> Result<Vec<f64>> {
    check_sampling_probability(q)?;
    check_noise_multiplier(noise_multiplier)?;
    orders
        .iter()
        .map(|&alpha| sample_wor_gaussian_at(q, noise_multiplier, alpha))
        .collect()
}

/// RDP of the without-replacement sampled Gaussian at a single order.
pub fn sample_wor_gaussian_at(q: f64, sigma: f64, alpha: f64) -> Result<f64> {
    check_order(alpha)?;
    if q == 0.0 {
        return Ok(0.0);
    }
    if q == 1.0 {
        return Ok(alpha / (2.0 * sigma * sigma));
    }
    if alpha.is_infinite() || sigma == 0.0 {
        return Ok(f64::INFINITY);
    }
    if sigma.is_infinite() {
        return Ok(0.0);
    }
    order_above_one(alpha)?;

    let rdp = if is_integer(alpha) {
        log_a_wor_int(q, sigma, alpha as u64) / (alpha - 1.0)
    } else {
        // Interpolating the CGF between neighbouring integer orders gives an
        // upper bound by convexity (Corollary 10 of the same reference).
        let alpha_f = alpha.floor();
        let x = log_a_wor_int(q, sigma, alpha_f as u64);
        let y = log_a_wor_int(q, sigma, alpha.ceil() as u64);
        let t = alpha - alpha_f;
        ((1.0 - t) * x + t * y) / (alpha - 1.0)
    };
    Ok(rdp.max(0.0))
}

/// `log(A_alpha)` for integer `alpha` under sampling without replacement.
///
/// Exact up to [`WOR_EXACT_MAX_ORDER`], Stirling-style bound beyond.
fn log_a_wor_int(q: f64, sigma: f64, alpha: u64) -> f64 {
    if alpha == 1 {
        return 0.0;
    }

    let two_sigma_sq = 2.0 * sigma * sigma;
    // rdp(x + 1) * x of the Gaussian mechanism.
    let cgf = |x: f64| x * (x + 1.0) / two_sigma_sq;
    let func = |x: f64| x / two_sigma_sq;

    let log_q = q.ln();
    let alpha_f = alpha as f64;
    let log_4 = 2.0 * LN_2;

    let f2 = func(2.0);
    let log_f2m1 = f2 + (-(-f2).exp_m1()).ln();
    let term_2 =
        2.0 * log_q + log_comb(alpha_f, 2.0) + (log_4 + log_f2m1).min(f2 + LN_2);
    let mut log_a = log_add(0.0, term_2);

    if alpha <= WOR_EXACT_MAX_ORDER {
        let deltas = forward_diffs(cgf, alpha as usize);
        for i in 3..=alpha {
            let delta_lo = deltas.log_magnitudes[(2 * (i / 2) - 1) as usize];
            let delta_hi = deltas.log_magnitudes[(2 * ((i + 1) / 2) - 1) as usize];
            let i_f = i as f64;
            let s = (log_4 + 0.5 * (delta_lo + delta_hi)).min(LN_2 + cgf(i_f - 1.0))
                + i_f * log_q
                + log_comb(alpha_f, i_f);
            log_a = log_add(log_a, s);
        }
    } else {
        for i in 3..=alpha {
            let i_f = i as f64;
            let s = LN_2 + cgf(i_f - 1.0) + i_f * log_q + log_comb(alpha_f, i_f);
            log_a = log_add(log_a, s);
        }
    }
    log_a
}

/// RDP of single-epoch tree aggregation of Gaussian noise.
///
/// The tree is restarted every epoch and no record occurs twice across
/// trees; `step_counts` holds the number of steps of each epoch. See
/// appendix D of Kairouz et al., "Practical and Private (Deep) Learning
/// without Sampling or Shuffling" (ICML 2021).
pub fn rdp_single_epoch_tree_aggregation(
    noise_multiplier: f64,
    step_counts: &[i64],
    orders: &[f64],
) -> Result<Vec<f64>> {
    check_noise_multiplier(noise_multiplier)?;
    if noise_multiplier == 0.0 {
        return Ok(vec![f64::INFINITY; orders.len()]);
    }
    if step_counts.is_empty() {
        return Err(DpError::invalid("step_counts must be a non-empty list"));
    }
    if let Some(steps) = step_counts.iter().find(|&&s| s < 0) {
        return Err(DpError::invalid(format!(
            "steps must be non-negative, got {steps} in {step_counts:?}"
        )));
    }

    let max_depth = step_counts
        .iter()
        .map(|&steps| ((steps as f64) + 1.0).log2().ceil())
        .fold(0.0, f64::max);
    if max_depth == 0.0 {
        return Ok(vec![0.0; orders.len()]);
    }
    Ok(orders
        .iter()
        .map(|&alpha| alpha * max_depth / (2.0 * noise_multiplier * noise_multiplier))
        .collect())
}
