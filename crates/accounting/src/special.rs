//! Special functions evaluated in log space.

use std::f64::consts::PI;

use statrs::function::erf::erfc;
use statrs::function::gamma::ln_gamma;

/// Log of the binomial coefficient `C(n, k)` via log-gamma.
pub fn log_comb(n: f64, k: f64) -> f64 {
    ln_gamma(n + 1.0) - ln_gamma(k + 1.0) - ln_gamma(n - k + 1.0)
}

/// Log of the complementary error function, accurate for large `x`.
///
/// `erfc(x)` equals twice the standard normal upper tail at `x * sqrt(2)`;
/// once that tail drops into the subnormal range the Laurent series at infinity
/// `erfc(x) ~ exp(-x^2 - .5/x^2 + .625/x^4 - ...) / (x * sqrt(pi))` takes
/// over.
pub fn log_erfc(x: f64) -> f64 {
    let r = erfc(x);
    // Subnormal results have lost precision.
    if r < f64::MIN_POSITIVE {
        -PI.ln() / 2.0 - x.ln() - x * x - 0.5 * x.powi(-2) + 0.625 * x.powi(-4)
            - 37.0 / 24.0 * x.powi(-6)
            + 353.0 / 64.0 * x.powi(-8)
    } else {
        r.ln()
    }
}
