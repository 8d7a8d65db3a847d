//! FAIR-CAM adjustment of frequency and magnitude
//!
//! Formulas:
//! - TEF factor = 1 - (avoid + deter * (1 - avoid))
//! - LM factor  = 1 - (resist + respond * (1 - resist)
//!                      + recover * (1 - resist) * (1 - respond))
//! - reliability = clamp((1 - var_freq / 365) ^ var_duration, 0, 1)
//!
//! Global invariants enforced:
//! - Both factors lie in `[0, 1]`; zero coefficients give factors of exactly 1
//! - Reliability decay only ever weakens controls

use crate::controls::ControlEffectiveness;
use crate::params::{LogNormalSpec, RiskCalculationParams};
use serde::{Deserialize, Serialize};

const DAYS_PER_YEAR: f64 = 365.0;

/// Control variance metrics: how often (days per year) a control lapses and
/// for how long each lapse lasts.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VarianceMetrics {
    pub var_freq: f64,
    pub var_duration: f64,
}

/// Reliability decay factor from variance metrics.
///
/// Non-finite inputs count as "no variance"; `var_freq` beyond a year gives 0.
pub fn reliability(var_freq: f64, var_duration: f64) -> f64 {
    let freq = if var_freq.is_finite() { var_freq.max(0.0) } else { 0.0 };
    let duration = if var_duration.is_finite() {
        var_duration.max(0.0)
    } else {
        0.0
    };
    let base = 1.0 - freq / DAYS_PER_YEAR;
    if base <= 0.0 {
        return if duration == 0.0 { 1.0 } else { 0.0 };
    }
    let r = base.powf(duration);
    if r.is_finite() {
        r.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Full FAIR-CAM capability set
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CamCoefficients {
    pub avoid: f64,
    pub deter: f64,
    pub resist: f64,
    pub respond: f64,
    pub recover: f64,
}

impl From<ControlEffectiveness> for CamCoefficients {
    /// Detection drives response; recovery is not modeled by the mapper.
    fn from(e: ControlEffectiveness) -> Self {
        CamCoefficients {
            avoid: e.e_avoid,
            deter: e.e_deter,
            resist: e.e_resist,
            respond: e.e_detect,
            recover: 0.0,
        }
    }
}

/// Multipliers applied to threat event frequency and loss magnitude
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustmentFactors {
    pub tef: f64,
    pub lm: f64,
}

impl AdjustmentFactors {
    /// No adjustment
    pub fn identity() -> Self {
        AdjustmentFactors { tef: 1.0, lm: 1.0 }
    }

    pub fn from_coefficients(c: &CamCoefficients) -> Self {
        let avoid = unit(c.avoid);
        let deter = unit(c.deter);
        let resist = unit(c.resist);
        let respond = unit(c.respond);
        let recover = unit(c.recover);

        let tef = 1.0 - (avoid + deter * (1.0 - avoid));
        let lm = 1.0
            - (resist
                + respond * (1.0 - resist)
                + recover * (1.0 - resist) * (1.0 - respond));

        AdjustmentFactors {
            tef: tef.clamp(0.0, 1.0),
            lm: lm.clamp(0.0, 1.0),
        }
    }
}

fn unit(v: f64) -> f64 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Compute adjustment factors, decaying the coefficients by reliability when
/// variance metrics are supplied.
pub fn adjustment_factors(
    effectiveness: &ControlEffectiveness,
    variance: Option<&VarianceMetrics>,
) -> AdjustmentFactors {
    let effective = match variance {
        Some(v) => effectiveness.scaled(reliability(v.var_freq, v.var_duration)),
        None => *effectiveness,
    };
    AdjustmentFactors::from_coefficients(&CamCoefficients::from(effective))
}

/// Scale the TEF group by the TEF factor and the loss magnitude groups by
/// the LM factor.
///
/// The TEF group is the override when one is configured, otherwise contact
/// frequency. A log-normal primary loss is shifted in log space so its scale
/// moves by the same factor.
pub fn adjust_params(
    params: &RiskCalculationParams,
    factors: &AdjustmentFactors,
) -> RiskCalculationParams {
    let mut adjusted = params.clone();

    match params.tef_override {
        Some(tef) => adjusted.tef_override = Some(tef.scale(factors.tef)),
        None => adjusted.contact_frequency = params.contact_frequency.scale(factors.tef),
    }

    adjusted.primary_loss_magnitude = params.primary_loss_magnitude.scale(factors.lm);
    adjusted.secondary_loss_magnitude = params.secondary_loss_magnitude.scale(factors.lm);
    adjusted.loss_magnitude_lognormal = params.loss_magnitude_lognormal.map(|spec| {
        if factors.lm > 0.0 {
            LogNormalSpec {
                mu: spec.mu + factors.lm.ln(),
                sigma: spec.sigma,
            }
        } else {
            spec
        }
    });

    adjusted
}
