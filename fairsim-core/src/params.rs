//! Canonical FAIR input parameters
//!
//! Global invariants enforced:
//! - Every `FairParameter` satisfies `min <= mode <= max`
//! - Every component is a finite number
//! - Ordering violations are clamped, never rejected

use serde::{Deserialize, Serialize};

/// A `{min, mode, max}` range estimate for one FAIR factor.
///
/// Construct through [`FairParameter::new`] to get the ordering invariant; the
/// fields are public for reading and for struct literals in tests.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FairParameter {
    pub min: f64,
    #[serde(alias = "avg")]
    pub mode: f64,
    pub max: f64,
}

impl FairParameter {
    /// Build a parameter, replacing non-finite values with 0 and clamping
    /// `max` up to `min` and `mode` into `[min, max]`.
    pub fn new(min: f64, mode: f64, max: f64) -> Self {
        FairParameter { min, mode, max }.clamped()
    }

    /// Degenerate range where all three estimates are `value`.
    pub fn point(value: f64) -> Self {
        Self::new(value, value, value)
    }

    pub fn zero() -> Self {
        FairParameter::default()
    }

    /// Return a copy satisfying the ordering invariant.
    pub fn clamped(self) -> Self {
        let min = finite_or_zero(self.min);
        let max = finite_or_zero(self.max).max(min);
        let mode = finite_or_zero(self.mode).clamp(min, max);
        FairParameter { min, mode, max }
    }

    /// Mean of the triangular distribution over this range.
    pub fn triangular_mean(&self) -> f64 {
        (self.min + self.mode + self.max) / 3.0
    }

    /// Mean of the beta-PERT distribution over this range.
    pub fn pert_mean(&self) -> f64 {
        (self.min + 4.0 * self.mode + self.max) / 6.0
    }

    /// Multiply all three estimates by `factor`.
    pub fn scale(&self, factor: f64) -> Self {
        Self::new(self.min * factor, self.mode * factor, self.max * factor)
    }

    /// Component-wise product, used for derived ranges such as CF x POA.
    pub fn product(&self, other: &FairParameter) -> Self {
        Self::new(
            self.min * other.min,
            self.mode * other.mode,
            self.max * other.max,
        )
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Log-normal loss magnitude calibration (IRIS baseline).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogNormalSpec {
    pub mu: f64,
    pub sigma: f64,
}

impl LogNormalSpec {
    /// Calibrate from a median loss amount rather than a log-space location.
    pub fn from_median(median: f64, sigma: f64) -> Self {
        LogNormalSpec {
            mu: median.ln(),
            sigma,
        }
    }

    /// Usable only when both parameters are finite and sigma is non-negative.
    pub fn is_valid(&self) -> bool {
        self.mu.is_finite() && self.sigma.is_finite() && self.sigma >= 0.0
    }
}

/// Canonical inputs for one risk scenario.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskCalculationParams {
    pub contact_frequency: FairParameter,
    pub probability_of_action: FairParameter,
    pub threat_capability: FairParameter,
    pub resistance_strength: FairParameter,
    pub primary_loss_magnitude: FairParameter,
    pub secondary_loss_event_frequency: FairParameter,
    pub secondary_loss_magnitude: FairParameter,
    /// Log-normal primary loss; replaces the triangular primary loss when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_magnitude_lognormal: Option<LogNormalSpec>,
    /// Calibrated frequency baseline; replaces CF x POA x susceptibility when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tef_override: Option<FairParameter>,
}

impl RiskCalculationParams {
    /// Re-establish the ordering invariant on every group.
    pub fn clamped(mut self) -> Self {
        self.contact_frequency = self.contact_frequency.clamped();
        self.probability_of_action = self.probability_of_action.clamped();
        self.threat_capability = self.threat_capability.clamped();
        self.resistance_strength = self.resistance_strength.clamped();
        self.primary_loss_magnitude = self.primary_loss_magnitude.clamped();
        self.secondary_loss_event_frequency = self.secondary_loss_event_frequency.clamped();
        self.secondary_loss_magnitude = self.secondary_loss_magnitude.clamped();
        self.tef_override = self.tef_override.map(FairParameter::clamped);
        self.loss_magnitude_lognormal = self.loss_magnitude_lognormal.filter(LogNormalSpec::is_valid);
        self
    }
}

/// Valuation of an asset exposed by the scenario.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetValue {
    #[serde(deserialize_with = "crate::normalize::deserialize_safe_number")]
    pub value: f64,
}

/// Total of the finite, positive asset values.
pub fn total_asset_value(assets: &[AssetValue]) -> f64 {
    assets
        .iter()
        .map(|a| a.value)
        .filter(|v| v.is_finite() && *v > 0.0)
        .sum()
}

/// `{min, avg, max}` summary used in reporting breakdowns.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

impl From<FairParameter> for ValueRange {
    fn from(p: FairParameter) -> Self {
        ValueRange {
            min: p.min,
            avg: p.mode,
            max: p.max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_mode_into_range() {
        let p = FairParameter::new(1.0, 5.0, 3.0);
        assert_eq!(p, FairParameter { min: 1.0, mode: 3.0, max: 3.0 });

        let p = FairParameter::new(2.0, 1.0, 3.0);
        assert_eq!(p.mode, 2.0);
    }

    #[test]
    fn test_new_raises_max_to_min() {
        let p = FairParameter::new(5.0, 3.0, 1.0);
        assert_eq!(p, FairParameter::point(5.0));
    }

    #[test]
    fn test_non_finite_components_become_zero() {
        let p = FairParameter::new(f64::NAN, f64::INFINITY, 4.0);
        assert_eq!(p, FairParameter { min: 0.0, mode: 0.0, max: 4.0 });
    }

    #[test]
    fn test_means() {
        let p = FairParameter::new(0.025, 0.093, 0.12);
        assert!((p.pert_mean() - 0.517 / 6.0).abs() < 1e-12);
        assert!((FairParameter::new(1.0, 2.0, 3.0).triangular_mean() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_avg_alias_deserializes_as_mode() {
        let p: FairParameter = serde_json::from_str(r#"{"min": 1, "avg": 2, "max": 3}"#).unwrap();
        assert_eq!(p.mode, 2.0);
    }

    #[test]
    fn test_total_asset_value_skips_invalid() {
        let assets = [
            AssetValue { value: 100.0 },
            AssetValue { value: -5.0 },
            AssetValue { value: f64::NAN },
            AssetValue { value: 50.0 },
        ];
        assert_eq!(total_asset_value(&assets), 150.0);
    }
}
