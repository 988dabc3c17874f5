//! Conversion of RDP curves into (epsilon, delta) guarantees.
//!
//! Uses the improved bound of Proposition 12 of Canonne, Kamath and Steinke,
//! "The Discrete Gaussian for Differential Privacy" (arXiv:2004.00010v4),
//! together with the KL-divergence bound `delta <= sqrt(1 - exp(-KL))` for
//! orders close to 1.

use dp_accounting_core::{DpError, Result};

/// Below this order the RDP-to-DP bound is numerically unstable and no
/// tighter than the KL bound.
const MIN_ORDER_FOR_RDP_BOUND: f64 = 1.01;

fn check_curve(orders: &[f64], rdp: &[f64]) -> Result<()> {
    if orders.len() != rdp.len() {
        return Err(DpError::invalid(format!(
            "orders and rdp must have the same length, got {} and {}",
            orders.len(),
            rdp.len()
        )));
    }
    Ok(())
}

fn check_point(alpha: f64, r: f64) -> Result<()> {
    if alpha.is_nan() || alpha < 1.0 {
        return Err(DpError::invalid(format!(
            "Renyi divergence order must be at least 1, got {alpha}"
        )));
    }
    if r.is_nan() || r < 0.0 {
        return Err(DpError::invalid(format!(
            "Renyi divergence cannot be negative, got {r}"
        )));
    }
    Ok(())
}

/// Smallest value and the order it is attained at.
fn min_with_order(orders: &[f64], values: &[f64]) -> (f64, Option<f64>) {
    orders
        .iter()
        .zip(values)
        .fold((f64::INFINITY, None), |(best, best_order), (&alpha, &v)| {
            if v < best {
                (v, Some(alpha))
            } else {
                (best, best_order)
            }
        })
}

/// Optimal delta for `epsilon` given an RDP curve.
pub fn compute_delta(orders: &[f64], rdp: &[f64], epsilon: f64) -> Result<f64> {
    compute_delta_and_optimal_order(orders, rdp, epsilon).map(|(delta, _)| delta)
}

/// Optimal delta for `epsilon` and the order attaining it.
pub fn compute_delta_and_optimal_order(
    orders: &[f64],
    rdp: &[f64],
    epsilon: f64,
) -> Result<(f64, Option<f64>)> {
    if epsilon.is_nan() || epsilon < 0.0 {
        return Err(DpError::invalid(format!(
            "epsilon cannot be negative, got {epsilon}"
        )));
    }
    check_curve(orders, rdp)?;

    // Work in log space to avoid overflows.
    let mut log_deltas = Vec::with_capacity(orders.len());
    for (&a, &r) in orders.iter().zip(rdp) {
        check_point(a, r)?;
        let mut log_delta = if r == 0.0 {
            f64::NEG_INFINITY
        } else {
            0.5 * (-(-r).exp()).ln_1p()
        };
        if a > MIN_ORDER_FOR_RDP_BOUND {
            let rdp_bound = (a - 1.0) * (r - epsilon + (-1.0 / a).ln_1p()) - a.ln();
            log_delta = log_delta.min(rdp_bound);
        }
        log_deltas.push(log_delta);
    }

    let (log_delta, order) = min_with_order(orders, &log_deltas);
    Ok((log_delta.exp().min(1.0), order))
}

/// Optimal epsilon for `delta` given an RDP curve.
pub fn compute_epsilon(orders: &[f64], rdp: &[f64], delta: f64) -> Result<f64> {
    compute_epsilon_and_optimal_order(orders, rdp, delta).map(|(epsilon, _)| epsilon)
}

/// Optimal epsilon for `delta` and the order attaining it.
///
/// The order is `None` when `delta` is zero, where only a curve that is
/// identically zero certifies a finite epsilon.
pub fn compute_epsilon_and_optimal_order(
    orders: &[f64],
    rdp: &[f64],
    delta: f64,
) -> Result<(f64, Option<f64>)> {
    if delta.is_nan() || delta < 0.0 {
        return Err(DpError::invalid(format!(
            "delta cannot be negative, got {delta}"
        )));
    }
    check_curve(orders, rdp)?;

    if delta == 0.0 {
        let epsilon = if rdp.iter().all(|&r| r == 0.0) {
            0.0
        } else {
            f64::INFINITY
        };
        return Ok((epsilon, None));
    }

    let mut eps = Vec::with_capacity(orders.len());
    for (&a, &r) in orders.iter().zip(rdp) {
        check_point(a, r)?;
        let epsilon = if delta * delta + (-r).exp_m1() > 0.0 {
            // The KL bound already certifies epsilon = 0.
            0.0
        } else if a > MIN_ORDER_FOR_RDP_BOUND {
            r + (-1.0 / a).ln_1p() - (delta * a).ln() / (a - 1.0)
        } else {
            f64::INFINITY
        };
        eps.push(epsilon);
    }

    let (epsilon, order) = min_with_order(orders, &eps);
    Ok((epsilon.max(0.0), order))
}
