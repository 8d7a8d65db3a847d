//! Scenario files
//!
//! A scenario bundles one risk record (in any of the accepted input shapes)
//! with its controls, cost modules, asset valuations and optional control
//! variance metrics.

use crate::controls::Control;
use crate::engine::{RiskAssessment, RiskEngine, RiskOptions};
use crate::fair_cam::VarianceMetrics;
use crate::normalize::{normalize_with_sources, Normalized};
use crate::params::{AssetValue, RiskCalculationParams};
use crate::secondary::CostModule;
use crate::simulation::SimulationError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    /// Raw risk record; normalized on use
    pub risk: serde_json::Value,
    #[serde(default)]
    pub controls: Vec<Control>,
    #[serde(default)]
    pub cost_modules: Vec<CostModule>,
    #[serde(default)]
    pub assets: Vec<AssetValue>,
    /// Overrides the configured reliability defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance: Option<VarianceMetrics>,
}

impl Scenario {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("failed to parse scenario JSON")
    }

    pub fn params(&self) -> RiskCalculationParams {
        self.normalized().params
    }

    /// Canonical parameters plus where each group came from
    pub fn normalized(&self) -> Normalized {
        normalize_with_sources(&self.risk)
    }

    /// Run the scenario; scenario variance wins over `options.variance`
    pub fn assess(
        &self,
        engine: &RiskEngine,
        options: &RiskOptions<'_>,
    ) -> Result<RiskAssessment, SimulationError> {
        let mut options = options.clone();
        if self.variance.is_some() {
            options.variance = self.variance;
        }
        engine.calculate_risk(
            &self.params(),
            &self.controls,
            &self.cost_modules,
            &self.assets,
            &options,
        )
    }
}

/// Load a scenario file
pub fn load_scenario(path: &Path) -> Result<Scenario> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario file: {}", path.display()))?;
    Scenario::from_json(&content)
        .with_context(|| format!("invalid scenario in: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::ControlType;
    use crate::normalize::GroupSource;
    use crate::params::FairParameter;
    use crate::secondary::CostModuleType;
    use crate::simulation::SimulationConfig;

    const SCENARIO: &str = r#"{
        "risk": {
            "contactFrequency": {"min": 1, "avg": 2, "max": 4},
            "probabilityOfActionMin": "0.1",
            "probabilityOfActionAvg": "0.2",
            "probabilityOfActionMax": "0.3",
            "threatCapability": 6,
            "resistanceStrength": {"min": 3, "mode": 4, "max": 5},
            "primaryLossMagnitude": {"min": 10000, "avg": 50000, "max": 90000}
        },
        "controls": [
            {"id": "mfa", "effectiveness": 8, "type": "preventive",
             "implementationStatus": "fully_implemented", "annualCost": 2000}
        ],
        "costModules": [{"type": "fixed", "value": 500}],
        "assets": [{"value": 250000}]
    }"#;

    #[test]
    fn test_parse_scenario() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        assert_eq!(scenario.controls.len(), 1);
        assert_eq!(scenario.controls[0].control_type, ControlType::Preventive);
        assert_eq!(scenario.cost_modules[0].cost_type, CostModuleType::Fixed);
        assert_eq!(scenario.assets[0].value, 250_000.0);
        assert!(scenario.variance.is_none());

        let normalized = scenario.normalized();
        assert_eq!(normalized.params.contact_frequency, FairParameter::new(1.0, 2.0, 4.0));
        assert_eq!(normalized.params.threat_capability, FairParameter::point(6.0));
        assert!(normalized
            .sources
            .contains(&("probabilityOfAction", GroupSource::Flat)));
    }

    #[test]
    fn test_minimal_scenario() {
        let scenario = Scenario::from_json(r#"{"risk": {}}"#).unwrap();
        assert!(scenario.controls.is_empty());
        assert_eq!(scenario.params(), RiskCalculationParams::default());
    }

    #[test]
    fn test_numeric_strings_in_records() {
        let scenario = Scenario::from_json(
            r#"{
                "risk": {},
                "controls": [{"id": "waf", "effectiveness": "7", "type": "preventive",
                              "implementationStatus": "in_progress", "annualCost": "$1,500"}],
                "costModules": [{"type": "perEvent", "value": "2,500"}],
                "assets": [{"value": "$1,000,000"}]
            }"#,
        )
        .unwrap();
        assert_eq!(scenario.controls[0].effectiveness, 7.0);
        assert_eq!(scenario.controls[0].annual_cost, Some(1_500.0));
        assert_eq!(scenario.cost_modules[0].value, 2_500.0);
        assert_eq!(scenario.assets[0].value, 1_000_000.0);
    }

    #[test]
    fn test_missing_risk_is_an_error() {
        assert!(Scenario::from_json(r#"{"controls": []}"#).is_err());
    }

    #[test]
    fn test_assess_scenario() {
        let scenario = Scenario::from_json(SCENARIO).unwrap();
        let options = RiskOptions::new(SimulationConfig::default().with_iterations(2_000).with_seed(4));
        let assessment = scenario.assess(&RiskEngine::new(), &options).unwrap();
        assert!(assessment.residual_risk <= assessment.inherent_risk);
        assert_eq!(assessment.control_cost, 2_000.0);
        // asset-value bounds replace the configured primary loss
        let expected = 200_000.0 * assessment.adjustment_factors.lm;
        assert!((assessment.loss_magnitude.max - expected).abs() < 1e-6);
    }

    #[test]
    fn test_load_scenario_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(&path, SCENARIO).unwrap();
        assert!(load_scenario(&path).is_ok());
        assert!(load_scenario(&dir.path().join("missing.json")).is_err());
    }
}
