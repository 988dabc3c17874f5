//! Arithmetic on non-negative reals stored as natural logarithms.
//!
//! Zero is represented by `f64::NEG_INFINITY`.

use dp_accounting_core::{DpError, Result};

/// Numerically stable `log(exp(a) + exp(b))`.
pub fn log_add(a: f64, b: f64) -> f64 {
    let (lo, hi) = if a < b { (a, b) } else { (b, a) };
    if lo == f64::NEG_INFINITY {
        return hi;
    }
    // exp(lo) + exp(hi) = (exp(lo - hi) + 1) * exp(hi)
    (lo - hi).exp().ln_1p() + hi
}

/// Numerically stable `log(exp(a) - exp(b))`.
///
/// The difference must be non-negative; `a < b` is a domain error.
pub fn log_sub(a: f64, b: f64) -> Result<f64> {
    if a < b {
        return Err(DpError::numerical(format!(
            "log-space subtraction must be non-negative, got log_sub({a}, {b})"
        )));
    }
    if b == f64::NEG_INFINITY {
        return Ok(a);
    }
    if a == b {
        return Ok(f64::NEG_INFINITY);
    }

    // exp(a) - exp(b) = (exp(a - b) - 1) * exp(b)
    let scaled = (a - b).exp_m1();
    if scaled.is_infinite() {
        log::warn!("log_sub({a}, {b}) overflowed, approximating by the minuend");
        return Ok(a);
    }
    Ok(scaled.ln() + b)
}

/// Returns the sign and log-magnitude of `exp(a) - exp(b)`.
///
/// The sign is `true` for a non-negative difference. Equal inputs yield
/// `(true, -inf)`.
pub fn log_sub_sign(a: f64, b: f64) -> (bool, f64) {
    if a > b {
        (true, a + (-(b - a).exp()).ln_1p())
    } else if a < b {
        (false, b + (-(a - b).exp()).ln_1p())
    } else {
        (true, f64::NEG_INFINITY)
    }
}
