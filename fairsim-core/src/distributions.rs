//! Distribution samplers
//!
//! Every sampler draws one value from an injected RNG so callers control
//! seeding and can give each worker an independent stream.
//!
//! Global invariants enforced:
//! - Samplers never panic, whatever the inputs
//! - Non-finite inputs are replaced by a sibling parameter before sampling
//! - Triangular and PERT draws stay inside `[min, max]`
//! - Log-normal draws are strictly positive

use crate::params::{FairParameter, LogNormalSpec};
use rand::Rng;
use rand_distr::{Beta, Distribution, LogNormal};

/// PERT shape parameter (weight given to the mode).
const PERT_LAMBDA: f64 = 4.0;

/// Replace non-finite bounds with a sibling (min -> 0, mode -> min,
/// max -> mode) and clamp into order.
fn sanitize(min: f64, mode: f64, max: f64) -> (f64, f64, f64) {
    let min = if min.is_finite() { min } else { 0.0 };
    let mode = if mode.is_finite() { mode } else { min };
    let max = if max.is_finite() { max } else { mode };
    let max = max.max(min);
    (min, mode.clamp(min, max), max)
}

/// Draw from a triangular distribution by inverse CDF.
///
/// Consumes exactly one uniform draw, degenerate ranges included.
pub fn triangular<R: Rng + ?Sized>(rng: &mut R, min: f64, mode: f64, max: f64) -> f64 {
    let (min, mode, max) = sanitize(min, mode, max);
    // One draw per call, degenerate or not, so trial streams stay aligned
    let u: f64 = rng.gen();
    if min == max {
        return min;
    }

    let range = max - min;
    let c = (mode - min) / range;

    let value = if u < c {
        min + (u * range * (mode - min)).sqrt()
    } else {
        max - ((1.0 - u) * range * (max - mode)).sqrt()
    };
    // Rounding at the extremes can step a hair outside the support; spans
    // too wide for f64 arithmetic fall back to the mode
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        mode
    }
}

/// Draw from a beta-PERT distribution with the standard shape `lambda = 4`.
///
/// The long-run mean is `(min + 4 * mode + max) / 6`.
pub fn beta_pert<R: Rng + ?Sized>(rng: &mut R, min: f64, mode: f64, max: f64) -> f64 {
    let (min, mode, max) = sanitize(min, mode, max);
    let range = max - min;
    if range <= 0.0 {
        return min;
    }

    let alpha = 1.0 + PERT_LAMBDA * (mode - min) / range;
    let beta = 1.0 + PERT_LAMBDA * (max - mode) / range;

    match Beta::new(alpha, beta) {
        Ok(dist) => {
            let value = min + dist.sample(rng) * range;
            if value.is_finite() {
                value.clamp(min, max)
            } else {
                mode
            }
        }
        Err(_) => mode,
    }
}

/// Draw from a log-normal distribution; the geometric mean of many draws
/// approaches `exp(mu)`.
pub fn log_normal<R: Rng + ?Sized>(rng: &mut R, mu: f64, sigma: f64) -> f64 {
    let mu = if mu.is_finite() { mu } else { 0.0 };
    let value = if sigma.is_finite() && sigma > 0.0 {
        match LogNormal::new(mu, sigma) {
            Ok(dist) => dist.sample(rng),
            Err(_) => mu.exp(),
        }
    } else {
        mu.exp()
    };
    value.clamp(f64::MIN_POSITIVE, f64::MAX)
}

/// Triangular draw over a [`FairParameter`].
pub fn sample_triangular<R: Rng + ?Sized>(rng: &mut R, p: &FairParameter) -> f64 {
    triangular(rng, p.min, p.mode, p.max)
}

/// Beta-PERT draw over a [`FairParameter`].
pub fn sample_pert<R: Rng + ?Sized>(rng: &mut R, p: &FairParameter) -> f64 {
    beta_pert(rng, p.min, p.mode, p.max)
}

/// Log-normal draw for a [`LogNormalSpec`].
pub fn sample_log_normal<R: Rng + ?Sized>(rng: &mut R, spec: &LogNormalSpec) -> f64 {
    log_normal(rng, spec.mu, spec.sigma)
}
