//! Secondary loss and cost module evaluation
//!
//! Secondary loss is either the classic FAIR product `SLEF x SLM`, or, when
//! cost modules are supplied, a triangular distribution built from the summed
//! per-event module costs at each SLM bound multiplied by the matching SLEF
//! bound.
//!
//! Global invariants enforced:
//! - Unknown module types and non-finite values contribute 0
//! - Secondary loss is never negative

use crate::distributions::sample_triangular;
use crate::normalize::deserialize_safe_number;
use crate::params::{FairParameter, RiskCalculationParams};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Default duration of a loss event for hourly cost modules
pub const DEFAULT_HOURS_PER_EVENT: f64 = 8.0;

/// How a cost module's value turns into a per-event cost
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CostModuleType {
    Fixed,
    PerEvent,
    PerHour,
    Percent,
    #[serde(other)]
    Unknown,
}

/// A typed secondary cost (legal fees, notification, downtime, fines)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostModule {
    #[serde(rename = "type", alias = "costType")]
    pub cost_type: CostModuleType,
    #[serde(deserialize_with = "deserialize_safe_number")]
    pub value: f64,
}

impl CostModule {
    pub fn new(cost_type: CostModuleType, value: f64) -> Self {
        CostModule { cost_type, value }
    }

    /// Cost of one loss event with the given loss magnitude.
    ///
    /// `Percent` values are fractions of the loss magnitude (0.1 = 10%).
    pub fn per_event_cost(&self, loss_magnitude: f64, hours_per_event: f64) -> f64 {
        let value = if self.value.is_finite() { self.value } else { 0.0 };
        let cost = match self.cost_type {
            CostModuleType::Fixed | CostModuleType::PerEvent => value,
            CostModuleType::PerHour => value * hours_per_event,
            CostModuleType::Percent => value * loss_magnitude,
            CostModuleType::Unknown => 0.0,
        };
        if cost.is_finite() {
            cost
        } else {
            0.0
        }
    }
}

/// Sum of per-event costs across modules for one loss magnitude
pub fn total_per_event_cost(
    modules: &[CostModule],
    loss_magnitude: f64,
    hours_per_event: f64,
) -> f64 {
    modules
        .iter()
        .map(|m| m.per_event_cost(loss_magnitude, hours_per_event))
        .sum()
}

/// Secondary loss range implied by cost modules: per-event cost at each SLM
/// bound times the matching SLEF bound.
pub fn cost_module_distribution(
    slef: &FairParameter,
    slm: &FairParameter,
    modules: &[CostModule],
    hours_per_event: f64,
) -> FairParameter {
    let at = |frequency: f64, magnitude: f64| {
        (total_per_event_cost(modules, magnitude, hours_per_event) * frequency).max(0.0)
    };
    FairParameter::new(
        at(slef.min, slm.min),
        at(slef.mode, slm.mode),
        at(slef.max, slm.max),
    )
}

/// One secondary loss draw
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SecondaryDraw {
    pub slef: f64,
    pub slm: f64,
    pub loss: f64,
}

/// Per-scenario secondary loss evaluator
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryLossModel {
    slef: FairParameter,
    slm: FairParameter,
    /// Present when cost modules drive the secondary loss
    module_distribution: Option<FairParameter>,
}

impl SecondaryLossModel {
    pub fn new(
        params: &RiskCalculationParams,
        modules: &[CostModule],
        hours_per_event: f64,
    ) -> Self {
        let slef = params.secondary_loss_event_frequency;
        let slm = params.secondary_loss_magnitude;
        let module_distribution = if modules.is_empty() {
            None
        } else {
            Some(cost_module_distribution(&slef, &slm, modules, hours_per_event))
        };
        SecondaryLossModel {
            slef,
            slm,
            module_distribution,
        }
    }

    /// Draw SLEF, SLM and the resulting secondary loss
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> SecondaryDraw {
        let slef = sample_triangular(rng, &self.slef);
        let slm = sample_triangular(rng, &self.slm);
        let loss = match &self.module_distribution {
            Some(dist) => sample_triangular(rng, dist),
            None => slef * slm,
        };
        SecondaryDraw {
            slef,
            slm,
            loss: if loss.is_finite() { loss.max(0.0) } else { 0.0 },
        }
    }

    /// Secondary loss range for reporting
    pub fn range(&self) -> FairParameter {
        match self.module_distribution {
            Some(dist) => dist,
            None => self.slef.product(&self.slm),
        }
    }

    /// Expected secondary loss per loss event
    pub fn expected(&self) -> f64 {
        match &self.module_distribution {
            Some(dist) => dist.triangular_mean(),
            None => self.slef.triangular_mean() * self.slm.triangular_mean(),
        }
    }
}
