//! Susceptibility (vulnerability) model
//!
//! Probability that a threat event becomes a loss event, from threat
//! capability (TC) against resistance strength (RS):
//!
//! `susceptibility = 1 / (1 + exp(-(TC - RS) / 2))`
//!
//! Global invariants enforced:
//! - Exactly 0.5 when TC == RS
//! - Monotonically increasing in TC, decreasing in RS
//! - Always within (0, 1), 0.5 for non-finite inputs

use crate::params::FairParameter;

/// Logistic slope divisor; one capability point shifts the log-odds by 0.5.
const SLOPE: f64 = 2.0;

/// Sigmoid susceptibility for one (TC, RS) pair.
pub fn susceptibility(threat_capability: f64, resistance_strength: f64) -> f64 {
    let diff = threat_capability - resistance_strength;
    if !diff.is_finite() {
        return 0.5;
    }
    1.0 / (1.0 + (-diff / SLOPE).exp())
}

/// Susceptibility evaluated on the triangular means of both ranges, used for
/// reporting and the deterministic fallback estimate.
pub fn mean_susceptibility(threat_capability: &FairParameter, resistance: &FairParameter) -> f64 {
    susceptibility(
        threat_capability.triangular_mean(),
        resistance.triangular_mean(),
    )
}
