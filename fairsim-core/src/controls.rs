//! Control effectiveness mapping
//!
//! Aggregates a set of control records into the four FAIR-CAM efficacy
//! coefficients consumed by the adjuster.
//!
//! Global invariants enforced:
//! - Every coefficient lies in `[0, 0.95]`
//! - An empty (or fully unimplemented) control set yields the baseline
//! - A non-empty processed set yields coefficients in `[0.1, 0.95]`
//! - Controls are read-only; no state is kept between calls

use crate::normalize::{deserialize_optional_safe_number, deserialize_safe_number};
use serde::{Deserialize, Serialize};

/// Functional category of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlType {
    Preventive,
    Detective,
    Corrective,
}

impl ControlType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlType::Preventive => "preventive",
            ControlType::Detective => "detective",
            ControlType::Corrective => "corrective",
        }
    }
}

/// Deployment state of a control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplementationStatus {
    #[serde(alias = "not-implemented", alias = "planned")]
    NotImplemented,
    #[serde(alias = "in-progress", alias = "partial")]
    InProgress,
    #[serde(alias = "fully-implemented", alias = "implemented")]
    FullyImplemented,
}

/// A security control attached to a risk scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Control {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Effectiveness rating on a 0-10 scale
    #[serde(deserialize_with = "deserialize_safe_number")]
    pub effectiveness: f64,
    #[serde(rename = "type", alias = "controlType")]
    pub control_type: ControlType,
    pub implementation_status: ImplementationStatus,
    /// Annual cost of operating the control, for cost-benefit reporting
    #[serde(
        default,
        deserialize_with = "deserialize_optional_safe_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub annual_cost: Option<f64>,
}

impl Control {
    pub fn new(
        id: impl Into<String>,
        effectiveness: f64,
        control_type: ControlType,
        implementation_status: ImplementationStatus,
    ) -> Self {
        Control {
            id: id.into(),
            name: None,
            effectiveness,
            control_type,
            implementation_status,
            annual_cost: None,
        }
    }

    /// Effectiveness on the `[0, 1]` scale; out-of-range ratings are clamped
    /// and non-finite ratings count as 0.
    pub fn normalized_effectiveness(&self) -> f64 {
        if self.effectiveness.is_finite() {
            (self.effectiveness / 10.0).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }
}

/// FAIR-CAM efficacy coefficients
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlEffectiveness {
    pub e_avoid: f64,
    pub e_deter: f64,
    pub e_resist: f64,
    pub e_detect: f64,
}

impl ControlEffectiveness {
    /// All coefficients zero: no defenses at all.
    pub fn none() -> Self {
        ControlEffectiveness::default()
    }

    pub fn uniform(value: f64) -> Self {
        ControlEffectiveness {
            e_avoid: value,
            e_deter: value,
            e_resist: value,
            e_detect: value,
        }
    }

    /// Multiply every coefficient by `factor` (reliability decay).
    pub fn scaled(&self, factor: f64) -> Self {
        let f = if factor.is_finite() {
            factor.clamp(0.0, 1.0)
        } else {
            0.0
        };
        ControlEffectiveness {
            e_avoid: self.e_avoid * f,
            e_deter: self.e_deter * f,
            e_resist: self.e_resist * f,
            e_detect: self.e_detect * f,
        }
    }
}

/// Tunables for control aggregation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapperWeights {
    pub fully_implemented: f64,
    pub in_progress: f64,
    pub baseline: f64,
    pub floor: f64,
    pub cap: f64,
}

impl Default for MapperWeights {
    fn default() -> Self {
        MapperWeights {
            fully_implemented: 1.0,
            in_progress: 0.5,
            baseline: 0.05,
            floor: 0.1,
            cap: 0.95,
        }
    }
}

impl MapperWeights {
    /// Weight of a control by deployment state; `None` means it is ignored
    fn status_weight(&self, status: ImplementationStatus) -> Option<f64> {
        match status {
            ImplementationStatus::FullyImplemented => Some(self.fully_implemented),
            ImplementationStatus::InProgress => Some(self.in_progress),
            ImplementationStatus::NotImplemented => None,
        }
    }
}

/// Running sum and contributor count for one coefficient
#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    sum: f64,
    count: usize,
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn average_or(&self, fallback: f64) -> f64 {
        if self.count == 0 {
            fallback
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Map controls to FAIR-CAM coefficients with default weights
pub fn map_control_effectiveness(controls: &[Control]) -> ControlEffectiveness {
    map_control_effectiveness_with_weights(controls, &MapperWeights::default())
}

/// Map controls to FAIR-CAM coefficients
///
/// Routing of `effectiveness / 10 * status_weight`:
/// - preventive -> half to avoid, half to deter
/// - detective  -> detect
/// - corrective -> resist
///
/// Each coefficient is the mean over its own contributors, capped at
/// `weights.cap`, then floored at `weights.floor` once any control counted.
pub fn map_control_effectiveness_with_weights(
    controls: &[Control],
    weights: &MapperWeights,
) -> ControlEffectiveness {
    let mut avoid = Accumulator::default();
    let mut deter = Accumulator::default();
    let mut resist = Accumulator::default();
    let mut detect = Accumulator::default();
    let mut processed = 0usize;

    for control in controls {
        let Some(weight) = weights.status_weight(control.implementation_status) else {
            continue;
        };
        processed += 1;

        let value = control.normalized_effectiveness() * weight;
        match control.control_type {
            ControlType::Preventive => {
                avoid.add(value * 0.5);
                deter.add(value * 0.5);
            }
            ControlType::Detective => detect.add(value),
            ControlType::Corrective => resist.add(value),
        }
    }

    let finish = |acc: &Accumulator| {
        let v = acc.average_or(weights.baseline).min(weights.cap);
        if processed > 0 {
            v.max(weights.floor)
        } else {
            v
        }
    };

    ControlEffectiveness {
        e_avoid: finish(&avoid),
        e_deter: finish(&deter),
        e_resist: finish(&resist),
        e_detect: finish(&detect),
    }
}

/// Number of controls that take part in aggregation
pub fn active_control_count(controls: &[Control]) -> usize {
    controls
        .iter()
        .filter(|c| c.implementation_status != ImplementationStatus::NotImplemented)
        .count()
}
