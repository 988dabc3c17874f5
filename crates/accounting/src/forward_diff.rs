//! Forward finite differences kept in log-magnitude/sign form.
//!
//! The values differenced here span many orders of magnitude, so every
//! entry is stored as `(log|v|, sign)` and combined with log-space
//! arithmetic instead of being subtracted directly.

use crate::log_math::{log_add, log_sub_sign};

/// Log-magnitudes and signs of successive forward differences.
#[derive(Clone, Debug, PartialEq)]
pub struct ForwardDiffs {
    /// `log|Δ^(i+1)|` at position `i`.
    pub log_magnitudes: Vec<f64>,
    /// `true` where the difference is non-negative.
    pub signs: Vec<bool>,
}

impl ForwardDiffs {
    /// Number of differences held.
    pub fn len(&self) -> usize {
        self.log_magnitudes.len()
    }

    /// Whether no differences are held.
    pub fn is_empty(&self) -> bool {
        self.log_magnitudes.is_empty()
    }
}

/// Replaces the first `n` entries of `vec` with the adjacent differences
/// `vec[j + 1] - vec[j]`, in log-magnitude/sign form.
pub(crate) fn stable_inplace_diff_in_log(vec: &mut [f64], signs: &mut [bool], n: usize) {
    debug_assert_eq!(vec.len(), signs.len());
    debug_assert!(vec.len() > n);
    for j in 0..n {
        if signs[j] == signs[j + 1] {
            let (sign, mag) = log_sub_sign(vec[j + 1], vec[j]);
            vec[j] = mag;
            // Both negative: |b| - |a| has the opposite sign of b - a.
            signs[j] = if signs[j + 1] { sign } else { !sign };
        } else {
            vec[j] = log_add(vec[j], vec[j + 1]);
            signs[j] = signs[j + 1];
        }
    }
}

/// Computes the first `n + 2` forward differences of `exp(fun)` at zero.
///
/// `fun` returns log-values; the sequence differenced is
/// `1, exp(fun(0)), exp(fun(1)), ..., exp(fun(n + 1))`.
/// See Theorem 27 of Wang, Balle and Kasiviswanathan, "Subsampled Renyi
/// Differential Privacy and Analytical Moments Accountant" (AISTATS 2019).
pub fn forward_diffs<F>(fun: F, n: usize) -> ForwardDiffs
where
    F: Fn(f64) -> f64,
{
    let mut func_vec = vec![0.0; n + 3];
    let mut func_signs = vec![true; n + 3];
    for (i, value) in func_vec.iter_mut().enumerate().skip(1) {
        *value = fun((i - 1) as f64);
    }

    let mut log_magnitudes = Vec::with_capacity(n + 2);
    let mut signs = Vec::with_capacity(n + 2);
    for i in 0..n + 2 {
        stable_inplace_diff_in_log(&mut func_vec, &mut func_signs, n + 2 - i);
        log_magnitudes.push(func_vec[0]);
        signs.push(func_signs[0]);
    }

    ForwardDiffs {
        log_magnitudes,
        signs,
    }
}
