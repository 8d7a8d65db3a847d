//! Inherent/residual risk orchestration
//!
//! Runs the scenario twice: once with no defenses (resistance forced to 0,
//! no control adjustment) and once as deployed (actual resistance, mapped
//! control effectiveness, reliability decay). Both runs share one resolved
//! seed, so each residual trial replays the inherent trial's draws.
//!
//! Global invariants enforced:
//! - Inherent risk is positive whenever the scenario can produce loss
//! - Residual risk never exceeds inherent risk
//! - Without active controls the residual result is the inherent result
//! - ROI is 0 when controls cost nothing

use crate::cache::{fingerprint, ResultCache, RunInputs, RunKind};
use crate::controls::{
    active_control_count, map_control_effectiveness_with_weights, Control, ControlEffectiveness,
    ImplementationStatus, MapperWeights,
};
use crate::fair_cam::{adjust_params, adjustment_factors, AdjustmentFactors, VarianceMetrics};
use crate::params::{
    total_asset_value, AssetValue, FairParameter, RiskCalculationParams, ValueRange,
};
use crate::secondary::CostModule;
use crate::simulation::{
    run_model, CancellationToken, ProgressFn, SimulationConfig, SimulationError, SimulationResult,
    SimulationStats, TrialModel,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-call settings for [`RiskEngine::calculate_risk`]
#[derive(Clone, Default)]
pub struct RiskOptions<'a> {
    pub simulation: SimulationConfig,
    /// Control variance metrics; decays control effectiveness when present
    pub variance: Option<VarianceMetrics>,
    pub weights: MapperWeights,
    pub cancel: Option<&'a CancellationToken>,
    /// Receives completed trials across both runs (up to twice the
    /// iteration count)
    pub progress: Option<ProgressFn<'a>>,
}

impl<'a> RiskOptions<'a> {
    pub fn new(simulation: SimulationConfig) -> Self {
        RiskOptions {
            simulation,
            ..Default::default()
        }
    }
}

/// Full result of one risk calculation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    /// Mean annual loss with no defenses
    pub inherent_risk: f64,
    /// Mean annual loss with controls applied
    pub residual_risk: f64,
    /// Susceptibility on mean capability and resistance
    pub susceptibility: f64,
    /// Residual run statistics
    pub monte_carlo_results: SimulationStats,
    /// Primary loss range after control adjustment
    pub loss_magnitude: ValueRange,
    pub secondary_loss_magnitude: ValueRange,
    pub threat_event_frequency: ValueRange,
    pub loss_event_frequency: ValueRange,
    pub control_effectiveness: ControlEffectiveness,
    pub adjustment_factors: AdjustmentFactors,
    /// Scenario parameters with the control adjustment folded in
    pub adjusted_params: RiskCalculationParams,
    pub inherent: SimulationResult,
    pub residual: SimulationResult,
    pub risk_reduction: f64,
    pub control_cost: f64,
    pub control_roi: f64,
}

impl RiskAssessment {
    /// Inherent risk in its persisted string form
    pub fn inherent_risk_string(&self) -> String {
        format_amount(self.inherent_risk)
    }

    /// Residual risk in its persisted string form
    pub fn residual_risk_string(&self) -> String {
        format_amount(self.residual_risk)
    }
}

fn format_amount(v: f64) -> String {
    format!("{:.2}", v)
}

/// Annual cost of controls that are deployed or being deployed
pub fn control_cost(controls: &[Control]) -> f64 {
    controls
        .iter()
        .filter(|c| c.implementation_status != ImplementationStatus::NotImplemented)
        .filter_map(|c| c.annual_cost)
        .filter(|cost| cost.is_finite() && *cost > 0.0)
        .sum()
}

/// Return on control spend; 0 when nothing is spent
pub fn control_roi(risk_reduction: f64, cost: f64) -> f64 {
    if cost > 0.0 {
        (risk_reduction - cost) / cost
    } else {
        0.0
    }
}

/// Orchestrates inherent and residual runs, optionally memoized
#[derive(Debug, Default, Clone)]
pub struct RiskEngine {
    cache: Option<Arc<ResultCache>>,
}

impl RiskEngine {
    pub fn new() -> Self {
        RiskEngine::default()
    }

    /// Memoize run results in `cache`; the cache may be shared with other
    /// engines.
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    /// Quantify inherent and residual risk for a scenario
    pub fn calculate_risk(
        &self,
        params: &RiskCalculationParams,
        controls: &[Control],
        cost_modules: &[CostModule],
        assets: &[AssetValue],
        options: &RiskOptions<'_>,
    ) -> Result<RiskAssessment, SimulationError> {
        self.assess(params, controls, cost_modules, assets, options, false)
    }

    /// Like [`RiskEngine::calculate_risk`] but always simulates, replacing
    /// any cached results for this scenario
    pub fn recalculate(
        &self,
        params: &RiskCalculationParams,
        controls: &[Control],
        cost_modules: &[CostModule],
        assets: &[AssetValue],
        options: &RiskOptions<'_>,
    ) -> Result<RiskAssessment, SimulationError> {
        self.assess(params, controls, cost_modules, assets, options, true)
    }

    fn assess(
        &self,
        params: &RiskCalculationParams,
        controls: &[Control],
        cost_modules: &[CostModule],
        assets: &[AssetValue],
        options: &RiskOptions<'_>,
        refresh: bool,
    ) -> Result<RiskAssessment, SimulationError> {
        let params = params.clone().clamped();
        let asset_total = total_asset_value(assets);

        // one seed for both runs
        let mut config = options.simulation.clone();
        config.seed = Some(config.seed.unwrap_or_else(rand::random));

        let runner = Runner {
            cache: if refresh { None } else { self.cache.as_deref() },
            store: self.cache.as_deref(),
            controls,
            weights: options.weights,
            cost_modules,
            asset_total,
            variance: options.variance.as_ref(),
            keyed_config: &options.simulation,
            config: &config,
            cancel: options.cancel,
        };

        let inherent_params = RiskCalculationParams {
            resistance_strength: FairParameter::zero(),
            ..params.clone()
        };
        let inherent_model = TrialModel::new(
            &inherent_params,
            AdjustmentFactors::identity(),
            cost_modules,
            assets,
            &config,
        );
        let inherent = runner.run(
            RunKind::Inherent,
            &inherent_params,
            &inherent_model,
            options.progress,
        )?;

        let effectiveness = map_control_effectiveness_with_weights(controls, &options.weights);
        let has_controls = active_control_count(controls) > 0;
        let factors = if has_controls {
            adjustment_factors(&effectiveness, options.variance.as_ref())
        } else {
            AdjustmentFactors::identity()
        };
        let residual_model = TrialModel::new(&params, factors, cost_modules, assets, &config);

        let residual = if has_controls {
            let iterations = config.iterations.max(1);
            let offset = options
                .progress
                .map(|progress| move |done: usize| progress(iterations + done));
            runner.run(
                RunKind::Residual,
                &params,
                &residual_model,
                offset.as_ref().map(|f| f as ProgressFn<'_>),
            )?
        } else {
            Arc::clone(&inherent)
        };

        // NaN, all-zero trials, or a sum past f64::MAX
        let mut inherent_risk = inherent.stats.mean;
        if !inherent_risk.is_finite() || inherent_risk <= 0.0 {
            let fallback = inherent_model.deterministic_estimate();
            tracing::warn!(
                simulated = inherent_risk,
                fallback,
                "inherent risk not positive; using deterministic estimate"
            );
            inherent_risk = fallback;
        }

        let mut residual_risk = if has_controls {
            residual.stats.mean
        } else {
            inherent_risk
        };
        if residual_risk > inherent_risk {
            tracing::warn!(
                residual = residual_risk,
                inherent = inherent_risk,
                "residual risk above inherent risk; clamping"
            );
            residual_risk = inherent_risk;
        }

        let risk_reduction = inherent_risk - residual_risk;
        let cost = control_cost(controls);

        Ok(RiskAssessment {
            inherent_risk,
            residual_risk,
            susceptibility: residual_model.mean_susceptibility(),
            monte_carlo_results: residual.stats,
            loss_magnitude: residual_model.primary_loss_range().scale(factors.lm).into(),
            secondary_loss_magnitude: residual_model
                .secondary_loss_range()
                .scale(factors.lm)
                .into(),
            threat_event_frequency: residual_model.tef_range().scale(factors.tef).into(),
            loss_event_frequency: residual_model.lef_range().scale(factors.tef).into(),
            control_effectiveness: effectiveness,
            adjustment_factors: factors,
            adjusted_params: adjust_params(&params, &factors),
            inherent: inherent.as_ref().clone(),
            residual: residual.as_ref().clone(),
            risk_reduction,
            control_cost: cost,
            control_roi: control_roi(risk_reduction, cost),
        })
    }
}

/// Shared state for the two runs of one assessment
struct Runner<'a> {
    /// Lookup side; `None` when refreshing
    cache: Option<&'a ResultCache>,
    store: Option<&'a ResultCache>,
    controls: &'a [Control],
    weights: MapperWeights,
    cost_modules: &'a [CostModule],
    asset_total: f64,
    variance: Option<&'a VarianceMetrics>,
    /// Settings as requested, before seed resolution
    keyed_config: &'a SimulationConfig,
    config: &'a SimulationConfig,
    cancel: Option<&'a CancellationToken>,
}

impl Runner<'_> {
    fn run(
        &self,
        kind: RunKind,
        params: &RiskCalculationParams,
        model: &TrialModel,
        progress: Option<ProgressFn<'_>>,
    ) -> Result<Arc<SimulationResult>, SimulationError> {
        let key = self.store.map(|_| {
            fingerprint(&RunInputs {
                params,
                controls: self.controls,
                weights: self.weights,
                cost_modules: self.cost_modules,
                asset_total: self.asset_total,
                variance: self.variance,
                kind,
                config: self.keyed_config,
            })
        });

        if let (Some(cache), Some(key)) = (self.cache, key.as_ref()) {
            if let Some(hit) = cache.get(key) {
                tracing::debug!(kind = kind.as_str(), %key, "result cache hit");
                return Ok(hit);
            }
            tracing::debug!(kind = kind.as_str(), %key, "result cache miss");
        }

        let result = run_model(model, self.config, self.cancel, progress)?;
        Ok(match (self.store, key) {
            (Some(store), Some(key)) => store.insert(key, result),
            _ => Arc::new(result),
        })
    }
}

/// Quantify a scenario with default settings and no caching
pub fn calculate_risk(
    params: &RiskCalculationParams,
    controls: &[Control],
    cost_modules: &[CostModule],
    iterations: usize,
) -> RiskAssessment {
    let options = RiskOptions::new(SimulationConfig::default().with_iterations(iterations));
    match RiskEngine::new().calculate_risk(params, controls, cost_modules, &[], &options) {
        Ok(assessment) => assessment,
        Err(SimulationError::Cancelled { .. }) => {
            unreachable!("no cancellation token was supplied")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controls::ControlType;

    fn scenario() -> RiskCalculationParams {
        RiskCalculationParams {
            contact_frequency: FairParameter::new(2.0, 4.0, 8.0),
            probability_of_action: FairParameter::new(0.2, 0.3, 0.5),
            threat_capability: FairParameter::new(4.0, 6.0, 8.0),
            resistance_strength: FairParameter::new(3.0, 5.0, 7.0),
            primary_loss_magnitude: FairParameter::new(5e4, 1e5, 3e5),
            secondary_loss_event_frequency: FairParameter::new(0.1, 0.2, 0.3),
            secondary_loss_magnitude: FairParameter::new(1e4, 2e4, 5e4),
            ..Default::default()
        }
    }

    fn options(seed: u64) -> RiskOptions<'static> {
        RiskOptions::new(
            SimulationConfig::default()
                .with_iterations(4_000)
                .with_seed(seed),
        )
    }

    fn controls() -> Vec<Control> {
        let mut mfa = Control::new(
            "mfa",
            8.0,
            ControlType::Preventive,
            ImplementationStatus::FullyImplemented,
        );
        mfa.annual_cost = Some(10_000.0);
        let mut edr = Control::new(
            "edr",
            6.0,
            ControlType::Detective,
            ImplementationStatus::InProgress,
        );
        edr.annual_cost = Some(5_000.0);
        let mut planned = Control::new(
            "dlp",
            9.0,
            ControlType::Corrective,
            ImplementationStatus::NotImplemented,
        );
        planned.annual_cost = Some(1e6);
        vec![mfa, edr, planned]
    }

    #[test]
    fn test_residual_not_above_inherent() {
        let engine = RiskEngine::new();
        let a = engine
            .calculate_risk(&scenario(), &controls(), &[], &[], &options(1))
            .unwrap();
        assert!(a.inherent_risk > 0.0);
        assert!(a.residual_risk <= a.inherent_risk);
        assert!(a.risk_reduction >= 0.0);
        assert!(a.adjustment_factors.tef < 1.0);
    }

    #[test]
    fn test_no_controls_residual_equals_inherent() {
        let a = RiskEngine::new()
            .calculate_risk(&scenario(), &[], &[], &[], &options(2))
            .unwrap();
        assert_eq!(a.residual_risk, a.inherent_risk);
        assert_eq!(a.residual, a.inherent);
        assert_eq!(a.risk_reduction, 0.0);
        assert_eq!(a.control_roi, 0.0);
    }

    #[test]
    fn test_only_planned_controls_count_as_none() {
        let planned = vec![Control::new(
            "later",
            9.0,
            ControlType::Preventive,
            ImplementationStatus::NotImplemented,
        )];
        let a = RiskEngine::new()
            .calculate_risk(&scenario(), &planned, &[], &[], &options(3))
            .unwrap();
        assert_eq!(a.residual_risk, a.inherent_risk);
    }

    #[test]
    fn test_control_cost_and_roi() {
        assert_eq!(control_cost(&controls()), 15_000.0);
        assert_eq!(control_roi(45_000.0, 15_000.0), 2.0);
        assert_eq!(control_roi(45_000.0, 0.0), 0.0);
        assert_eq!(control_roi(5_000.0, 10_000.0), -0.5);

        let a = RiskEngine::new()
            .calculate_risk(&scenario(), &controls(), &[], &[], &options(4))
            .unwrap();
        assert_eq!(a.control_cost, 15_000.0);
        let expected = (a.risk_reduction - 15_000.0) / 15_000.0;
        assert!((a.control_roi - expected).abs() < 1e-12);
    }

    #[test]
    fn test_zero_scenario_falls_back_to_deterministic_estimate() {
        let a = RiskEngine::new()
            .calculate_risk(
                &RiskCalculationParams::default(),
                &controls(),
                &[],
                &[],
                &options(5),
            )
            .unwrap();
        assert_eq!(a.inherent_risk, 0.0);
        assert_eq!(a.residual_risk, 0.0);
    }

    #[test]
    fn test_overflowing_mean_uses_deterministic_estimate() {
        // every trial loses 0.5 x 1e307; their sum is past f64::MAX
        let params = RiskCalculationParams {
            contact_frequency: FairParameter::point(1.0),
            probability_of_action: FairParameter::point(1.0),
            primary_loss_magnitude: FairParameter::point(1e307),
            ..Default::default()
        };
        let a = RiskEngine::new()
            .calculate_risk(&params, &controls(), &[], &[], &options(5))
            .unwrap();
        assert!(a.inherent.stats.mean.is_infinite());
        assert!(((a.inherent_risk - 5e306) / 5e306).abs() < 1e-9);
        assert!(a.residual_risk.is_finite());
        assert!(a.residual_risk <= a.inherent_risk);
    }

    #[test]
    fn test_same_seed_same_assessment() {
        let engine = RiskEngine::new();
        let a = engine
            .calculate_risk(&scenario(), &controls(), &[], &[], &options(6))
            .unwrap();
        let b = engine
            .calculate_risk(&scenario(), &controls(), &[], &[], &options(6))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_hits_and_recalculate() {
        let cache = Arc::new(ResultCache::new(10));
        let engine = RiskEngine::new().with_cache(Arc::clone(&cache));
        let first = engine
            .calculate_risk(&scenario(), &controls(), &[], &[], &options(7))
            .unwrap();
        assert_eq!(cache.len(), 2);

        let second = engine
            .calculate_risk(&scenario(), &controls(), &[], &[], &options(7))
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(cache.len(), 2);

        let fresh = engine
            .recalculate(&scenario(), &controls(), &[], &[], &options(7))
            .unwrap();
        assert_eq!(fresh.inherent, first.inherent);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_cache_keys_on_mapper_weights() {
        let cache = Arc::new(ResultCache::new(10));
        let engine = RiskEngine::new().with_cache(Arc::clone(&cache));
        engine
            .calculate_risk(&scenario(), &controls(), &[], &[], &options(10))
            .unwrap();

        let mut reweighted = options(10);
        reweighted.weights.in_progress = 1.0;
        let cached = engine
            .calculate_risk(&scenario(), &controls(), &[], &[], &reweighted)
            .unwrap();
        let fresh = RiskEngine::new()
            .calculate_risk(&scenario(), &controls(), &[], &[], &reweighted)
            .unwrap();

        assert_eq!(cached.residual, fresh.residual);
        assert_eq!(cached.residual_risk, fresh.residual_risk);
        assert_eq!(cached.control_effectiveness, fresh.control_effectiveness);
    }

    #[test]
    fn test_cancelled_assessment() {
        let token = CancellationToken::new();
        token.cancel();
        let mut opts = options(8);
        opts.cancel = Some(&token);
        let err = RiskEngine::new()
            .calculate_risk(&scenario(), &controls(), &[], &[], &opts)
            .unwrap_err();
        assert!(matches!(err, SimulationError::Cancelled { .. }));
    }

    #[test]
    fn test_breakdown_ranges_are_adjusted() {
        let a = RiskEngine::new()
            .calculate_risk(&scenario(), &controls(), &[], &[], &options(9))
            .unwrap();
        let f = a.adjustment_factors;
        assert!((a.threat_event_frequency.avg - 4.0 * 0.3 * f.tef).abs() < 1e-9);
        assert!((a.loss_magnitude.max - 3e5 * f.lm).abs() < 1e-6);
        assert_eq!(
            a.adjusted_params.primary_loss_magnitude,
            scenario().primary_loss_magnitude.scale(f.lm)
        );
        assert!(a.susceptibility > 0.5);
    }

    #[test]
    fn test_persisted_strings() {
        let a = calculate_risk(&scenario(), &controls(), &[], 2_000);
        assert_eq!(a.inherent_risk_string(), format!("{:.2}", a.inherent_risk));
        assert!(a.residual_risk_string().contains('.'));
    }

    #[test]
    fn test_assessment_serializes_camel_case() {
        let a = calculate_risk(&scenario(), &[], &[], 100);
        let json = serde_json::to_value(&a).unwrap();
        assert!(json.get("inherentRisk").is_some());
        assert!(json.get("monteCarloResults").is_some());
        assert!(json.get("lossEventFrequency").is_some());
        assert!(json["controlEffectiveness"].get("eAvoid").is_some());
    }
}
