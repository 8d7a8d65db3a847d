//! Monte Carlo simulation of annualized loss
//!
//! Each trial samples the FAIR factors, derives loss event frequency and loss
//! magnitude, applies the FAIR-CAM adjustment factors and records the annual
//! loss. Trials run in fixed-size batches on the rayon pool; every batch owns
//! an independent ChaCha stream derived from one base seed, so a run is
//! reproducible for a given seed and batch size whatever the thread count.
//!
//! Global invariants enforced:
//! - Reduction starts only after every batch has completed
//! - Trial losses are finite and non-negative
//! - Percentiles index the ascending loss vector at `floor(q * (N - 1))`
//! - The exceedance curve is non-increasing in probability as loss grows
//! - A cancelled run returns no partial result

use crate::distributions::{sample_log_normal, sample_pert, sample_triangular};
use crate::controls::ControlEffectiveness;
use crate::fair_cam::{adjustment_factors, AdjustmentFactors};
use crate::params::{total_asset_value, AssetValue, FairParameter, LogNormalSpec, RiskCalculationParams};
use crate::secondary::{CostModule, SecondaryLossModel, DEFAULT_HOURS_PER_EVENT};
use crate::susceptibility::{mean_susceptibility, susceptibility};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Default number of trials per run
pub const DEFAULT_ITERATIONS: usize = 10_000;

/// Trials per batch; cancellation is checked between batches
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Asset valuations above this are capped before deriving loss bounds
pub const DEFAULT_ASSET_VALUE_CAP: f64 = 1e9;

/// IRIS frequencies are monthly incident rates
pub const DEFAULT_TEF_PERIODS_PER_YEAR: f64 = 12.0;

/// z-score of the 5th/95th percentile, used for log-normal reporting ranges
const Z_95: f64 = 1.644_853_626_951_472_2;

/// Share of total asset value lost at the low / most likely / high end
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AssetLossFactors {
    pub low: f64,
    pub mid: f64,
    pub high: f64,
}

impl Default for AssetLossFactors {
    fn default() -> Self {
        AssetLossFactors {
            low: 0.2,
            mid: 0.5,
            high: 0.8,
        }
    }
}

/// Settings for one Monte Carlo run
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    pub iterations: usize,
    /// Base seed; `None` draws one from the thread RNG
    pub seed: Option<u64>,
    pub batch_size: usize,
    /// Keep every trial in the result (memory grows with iterations)
    pub keep_trials: bool,
    pub hours_per_event: f64,
    pub asset_loss_factors: AssetLossFactors,
    pub asset_value_cap: f64,
    pub tef_periods_per_year: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            iterations: DEFAULT_ITERATIONS,
            seed: None,
            batch_size: DEFAULT_BATCH_SIZE,
            keep_trials: false,
            hours_per_event: DEFAULT_HOURS_PER_EVENT,
            asset_loss_factors: AssetLossFactors::default(),
            asset_value_cap: DEFAULT_ASSET_VALUE_CAP,
            tef_periods_per_year: DEFAULT_TEF_PERIODS_PER_YEAR,
        }
    }
}

impl SimulationConfig {
    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Cooperative cancellation flag shared between a caller and a running
/// simulation
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Simulation errors
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("simulation cancelled after {completed} of {requested} trials")]
    Cancelled { completed: usize, requested: usize },
}

/// Progress observer; receives the running count of completed trials
pub type ProgressFn<'a> = &'a (dyn Fn(usize) + Sync);

/// Sampled and derived values of one trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialResult {
    pub cf: f64,
    pub poa: f64,
    pub threat_capability: f64,
    pub resistance: f64,
    pub susceptibility: f64,
    pub lef_unadjusted: f64,
    pub lef_adjusted: f64,
    pub primary_loss: f64,
    pub slef: f64,
    pub slm: f64,
    pub secondary_loss: f64,
    pub lm_unadjusted: f64,
    pub lm_adjusted: f64,
    pub loss: f64,
}

/// Summary statistics of the annual loss distribution
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    pub mean: f64,
    pub p05: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
    pub max: f64,
}

/// One point of the loss exceedance curve
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceedancePoint {
    pub loss: f64,
    pub prob_exceed: f64,
}

/// Output of one Monte Carlo run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub stats: SimulationStats,
    pub exceedance: Vec<ExceedancePoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trials: Option<Vec<TrialResult>>,
    pub iterations: usize,
    pub seed: u64,
}

impl SimulationResult {
    /// Reduce raw trial losses (any order) to statistics and an exceedance
    /// curve.
    pub fn from_losses(
        mut losses: Vec<f64>,
        trials: Option<Vec<TrialResult>>,
        seed: u64,
    ) -> Self {
        for loss in losses.iter_mut() {
            *loss = clean_loss(*loss);
        }
        losses.sort_by(|a, b| a.total_cmp(b));

        let n = losses.len();
        let stats = if n == 0 {
            SimulationStats::default()
        } else {
            let percentile = |q: f64| losses[(q * (n - 1) as f64).floor() as usize];
            SimulationStats {
                mean: losses.iter().sum::<f64>() / n as f64,
                p05: percentile(0.05),
                p25: percentile(0.25),
                p50: percentile(0.50),
                p75: percentile(0.75),
                p95: percentile(0.95),
                max: losses[n - 1],
            }
        };

        let exceedance = losses
            .iter()
            .enumerate()
            .map(|(i, &loss)| ExceedancePoint {
                loss,
                prob_exceed: if n <= 1 {
                    1.0
                } else {
                    1.0 - i as f64 / (n - 1) as f64
                },
            })
            .collect();

        SimulationResult {
            stats,
            exceedance,
            trials,
            iterations: n,
            seed,
        }
    }

    /// Drop per-trial detail to bound memory
    pub fn discard_trials(&mut self) {
        self.trials = None;
    }
}

fn clean_loss(loss: f64) -> f64 {
    if loss.is_finite() && loss > 0.0 {
        loss
    } else {
        0.0
    }
}

/// Primary loss source for a run
#[derive(Debug, Clone, Copy, PartialEq)]
enum PrimaryLoss {
    LogNormal(LogNormalSpec),
    Triangular(FairParameter),
}

/// Frequency source for a run
#[derive(Debug, Clone, Copy, PartialEq)]
enum FrequencyModel {
    /// LEF = CF x POA x susceptibility
    Derived,
    /// LEF = PERT(calibrated rate) x periods per year
    Calibrated { tef: FairParameter, periods_per_year: f64 },
}

/// Everything a trial samples from, resolved once per run
#[derive(Debug, Clone, PartialEq)]
pub struct TrialModel {
    params: RiskCalculationParams,
    primary: PrimaryLoss,
    frequency: FrequencyModel,
    secondary: SecondaryLossModel,
    factors: AdjustmentFactors,
}

impl TrialModel {
    /// Resolve sampling sources.
    ///
    /// Primary loss precedence: log-normal calibration, then asset-value
    /// bounds (`low/mid/high` share of the capped asset total), then the
    /// configured triangular range.
    pub fn new(
        params: &RiskCalculationParams,
        factors: AdjustmentFactors,
        cost_modules: &[CostModule],
        assets: &[AssetValue],
        config: &SimulationConfig,
    ) -> Self {
        let params = params.clone().clamped();

        let asset_total = total_asset_value(assets);
        let primary = match params.loss_magnitude_lognormal {
            Some(spec) => PrimaryLoss::LogNormal(spec),
            None if asset_total > 0.0 => {
                let value = asset_total.min(config.asset_value_cap);
                let f = config.asset_loss_factors;
                PrimaryLoss::Triangular(FairParameter::new(
                    value * f.low,
                    value * f.mid,
                    value * f.high,
                ))
            }
            None => PrimaryLoss::Triangular(params.primary_loss_magnitude),
        };

        let frequency = match params.tef_override {
            Some(tef) => FrequencyModel::Calibrated {
                tef,
                periods_per_year: config.tef_periods_per_year,
            },
            None => FrequencyModel::Derived,
        };

        let secondary = SecondaryLossModel::new(&params, cost_modules, config.hours_per_event);

        TrialModel {
            params,
            primary,
            frequency,
            secondary,
            factors,
        }
    }

    /// Draw one trial
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> TrialResult {
        let p = &self.params;
        let cf = sample_triangular(rng, &p.contact_frequency);
        let poa = sample_triangular(rng, &p.probability_of_action);
        let threat_capability = sample_triangular(rng, &p.threat_capability);
        let resistance = sample_triangular(rng, &p.resistance_strength);
        let susceptibility = susceptibility(threat_capability, resistance);

        let primary_loss = match &self.primary {
            PrimaryLoss::LogNormal(spec) => sample_log_normal(rng, spec),
            PrimaryLoss::Triangular(range) => sample_triangular(rng, range),
        };
        let secondary = self.secondary.sample(rng);

        let lef_unadjusted = match &self.frequency {
            FrequencyModel::Derived => cf * poa * susceptibility,
            FrequencyModel::Calibrated {
                tef,
                periods_per_year,
            } => sample_pert(rng, tef) * periods_per_year,
        };
        let lm_unadjusted = primary_loss + secondary.loss;

        let lef_adjusted = lef_unadjusted * self.factors.tef;
        let lm_adjusted = lm_unadjusted * self.factors.lm;

        TrialResult {
            cf,
            poa,
            threat_capability,
            resistance,
            susceptibility,
            lef_unadjusted,
            lef_adjusted,
            primary_loss,
            slef: secondary.slef,
            slm: secondary.slm,
            secondary_loss: secondary.loss,
            lm_unadjusted,
            lm_adjusted,
            loss: clean_loss(lef_adjusted * lm_adjusted),
        }
    }

    /// Susceptibility on mean capability and resistance
    pub fn mean_susceptibility(&self) -> f64 {
        mean_susceptibility(&self.params.threat_capability, &self.params.resistance_strength)
    }

    /// Threat event frequency range (before adjustment)
    pub fn tef_range(&self) -> FairParameter {
        match &self.frequency {
            FrequencyModel::Derived => self
                .params
                .contact_frequency
                .product(&self.params.probability_of_action),
            FrequencyModel::Calibrated {
                tef,
                periods_per_year,
            } => tef.scale(*periods_per_year),
        }
    }

    /// Loss event frequency range (before adjustment)
    pub fn lef_range(&self) -> FairParameter {
        match &self.frequency {
            FrequencyModel::Derived => self.tef_range().scale(self.mean_susceptibility()),
            FrequencyModel::Calibrated { .. } => self.tef_range(),
        }
    }

    /// Primary loss range; a log-normal reports its 5th percentile, median
    /// and 95th percentile
    pub fn primary_loss_range(&self) -> FairParameter {
        match &self.primary {
            PrimaryLoss::LogNormal(spec) => FairParameter::new(
                (spec.mu - Z_95 * spec.sigma).exp(),
                spec.mu.exp(),
                (spec.mu + Z_95 * spec.sigma).exp(),
            ),
            PrimaryLoss::Triangular(range) => *range,
        }
    }

    pub fn secondary_loss_range(&self) -> FairParameter {
        self.secondary.range()
    }

    /// Point estimate `LEF(mean) x LM(mean)` with adjustments applied
    pub fn deterministic_estimate(&self) -> f64 {
        let lef = match &self.frequency {
            FrequencyModel::Derived => {
                self.params.contact_frequency.triangular_mean()
                    * self.params.probability_of_action.triangular_mean()
                    * self.mean_susceptibility()
            }
            FrequencyModel::Calibrated {
                tef,
                periods_per_year,
            } => tef.pert_mean() * periods_per_year,
        };
        let primary = match &self.primary {
            PrimaryLoss::LogNormal(spec) => (spec.mu + spec.sigma * spec.sigma / 2.0).exp(),
            PrimaryLoss::Triangular(range) => range.triangular_mean(),
        };
        let lm = primary + self.secondary.expected();
        clean_loss(lef * self.factors.tef * lm * self.factors.lm)
    }
}

/// Losses (and optionally trials) from one batch
struct BatchOutput {
    losses: Vec<f64>,
    trials: Option<Vec<TrialResult>>,
}

/// Run all batches; `None` when the token fired before every batch finished
fn run_batches(
    model: &TrialModel,
    config: &SimulationConfig,
    seed: u64,
    cancel: Option<&CancellationToken>,
    progress: Option<ProgressFn<'_>>,
) -> (Option<Vec<BatchOutput>>, usize) {
    let iterations = config.iterations.max(1);
    let batch_size = config.batch_size.max(1);
    let batch_count = iterations.div_ceil(batch_size);
    let completed = AtomicUsize::new(0);

    let outputs = (0..batch_count)
        .into_par_iter()
        .map(|batch| {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                return None;
            }

            let start = batch * batch_size;
            let len = batch_size.min(iterations - start);

            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            rng.set_stream(batch as u64);

            let mut losses = Vec::with_capacity(len);
            let mut trials = config.keep_trials.then(|| Vec::with_capacity(len));
            for _ in 0..len {
                let trial = model.sample(&mut rng);
                losses.push(trial.loss);
                if let Some(trials) = trials.as_mut() {
                    trials.push(trial);
                }
            }

            let done = completed.fetch_add(len, Ordering::Relaxed) + len;
            if let Some(progress) = progress {
                progress(done);
            }

            Some(BatchOutput { losses, trials })
        })
        .collect::<Option<Vec<_>>>();

    (outputs, completed.load(Ordering::Relaxed))
}

fn resolve_seed(config: &SimulationConfig) -> u64 {
    config.seed.unwrap_or_else(rand::random)
}

fn assemble(outputs: Vec<BatchOutput>, keep_trials: bool, seed: u64) -> SimulationResult {
    let total: usize = outputs.iter().map(|b| b.losses.len()).sum();
    let mut losses = Vec::with_capacity(total);
    let mut trials = keep_trials.then(|| Vec::with_capacity(total));
    for batch in outputs {
        losses.extend(batch.losses);
        if let (Some(all), Some(batch_trials)) = (trials.as_mut(), batch.trials) {
            all.extend(batch_trials);
        }
    }
    SimulationResult::from_losses(losses, trials, seed)
}

/// Run a simulation that can be cancelled between batches
pub fn run_model(
    model: &TrialModel,
    config: &SimulationConfig,
    cancel: Option<&CancellationToken>,
    progress: Option<ProgressFn<'_>>,
) -> Result<SimulationResult, SimulationError> {
    let seed = resolve_seed(config);
    match run_batches(model, config, seed, cancel, progress) {
        (Some(outputs), _) => {
            let result = assemble(outputs, config.keep_trials, seed);
            tracing::debug!(
                iterations = result.iterations,
                seed,
                mean = result.stats.mean,
                p95 = result.stats.p95,
                "monte carlo run complete"
            );
            Ok(result)
        }
        (None, completed) => {
            tracing::debug!(completed, "monte carlo run cancelled");
            Err(SimulationError::Cancelled {
                completed,
                requested: config.iterations.max(1),
            })
        }
    }
}

/// Simulate annual loss for a scenario under the given control
/// effectiveness.
///
/// Asset valuations are not considered here; build a [`TrialModel`] directly
/// for that.
pub fn run_simulation(
    params: &RiskCalculationParams,
    effectiveness: &ControlEffectiveness,
    cost_modules: &[CostModule],
    config: &SimulationConfig,
    cancel: Option<&CancellationToken>,
    progress: Option<ProgressFn<'_>>,
) -> Result<SimulationResult, SimulationError> {
    let factors = adjustment_factors(effectiveness, None);
    let model = TrialModel::new(params, factors, cost_modules, &[], config);
    run_model(&model, config, cancel, progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn scenario() -> RiskCalculationParams {
        RiskCalculationParams {
            contact_frequency: FairParameter::new(1.0, 2.0, 4.0),
            probability_of_action: FairParameter::new(0.1, 0.2, 0.3),
            threat_capability: FairParameter::new(4.0, 5.0, 6.0),
            resistance_strength: FairParameter::new(2.0, 3.0, 4.0),
            primary_loss_magnitude: FairParameter::new(1e5, 2e5, 4e5),
            secondary_loss_event_frequency: FairParameter::new(0.1, 0.2, 0.3),
            secondary_loss_magnitude: FairParameter::new(1e4, 2e4, 3e4),
            ..Default::default()
        }
    }

    fn config(iterations: usize, seed: u64) -> SimulationConfig {
        SimulationConfig::default().with_iterations(iterations).with_seed(seed)
    }

    #[test]
    fn test_from_losses_percentiles() {
        let losses: Vec<f64> = (0..101).rev().map(|v| v as f64).collect();
        let result = SimulationResult::from_losses(losses, None, 0);
        assert_eq!(result.stats.p05, 5.0);
        assert_eq!(result.stats.p25, 25.0);
        assert_eq!(result.stats.p50, 50.0);
        assert_eq!(result.stats.p75, 75.0);
        assert_eq!(result.stats.p95, 95.0);
        assert_eq!(result.stats.max, 100.0);
        assert_eq!(result.stats.mean, 50.0);
    }

    #[test]
    fn test_from_losses_exceedance() {
        let result = SimulationResult::from_losses(vec![3.0, 1.0, 2.0], None, 0);
        let probs: Vec<f64> = result.exceedance.iter().map(|p| p.prob_exceed).collect();
        let losses: Vec<f64> = result.exceedance.iter().map(|p| p.loss).collect();
        assert_eq!(losses, vec![1.0, 2.0, 3.0]);
        assert_eq!(probs, vec![1.0, 0.5, 0.0]);
    }

    #[test]
    fn test_from_losses_single_and_empty() {
        let one = SimulationResult::from_losses(vec![7.0], None, 0);
        assert_eq!(one.stats.p05, 7.0);
        assert_eq!(one.exceedance[0].prob_exceed, 1.0);

        let none = SimulationResult::from_losses(Vec::new(), None, 0);
        assert_eq!(none.stats, SimulationStats::default());
        assert!(none.exceedance.is_empty());
    }

    #[test]
    fn test_from_losses_cleans_invalid_values() {
        let result = SimulationResult::from_losses(vec![f64::NAN, -5.0, 10.0], None, 0);
        assert_eq!(result.exceedance[0].loss, 0.0);
        assert_eq!(result.exceedance[1].loss, 0.0);
        assert_eq!(result.stats.max, 10.0);
    }

    #[test]
    fn test_same_seed_is_reproducible() {
        let cfg = config(5_000, 99);
        let model = TrialModel::new(&scenario(), AdjustmentFactors::identity(), &[], &[], &cfg);
        let a = run_model(&model, &cfg, None, None).unwrap();
        let b = run_model(&model, &cfg, None, None).unwrap();
        assert_eq!(a.stats, b.stats);
        assert_eq!(a.seed, 99);
    }

    #[test]
    fn test_iteration_count_and_trials() {
        let mut cfg = config(2_500, 3);
        cfg.keep_trials = true;
        let model = TrialModel::new(&scenario(), AdjustmentFactors::identity(), &[], &[], &cfg);
        let mut result = run_model(&model, &cfg, None, None).unwrap();
        assert_eq!(result.iterations, 2_500);
        assert_eq!(result.exceedance.len(), 2_500);
        let trials = result.trials.as_ref().unwrap();
        assert_eq!(trials.len(), 2_500);
        for t in trials {
            assert!((t.loss - t.lef_adjusted * t.lm_adjusted).abs() <= 1e-9 * t.loss.max(1.0));
            assert!((t.lm_unadjusted - (t.primary_loss + t.secondary_loss)).abs() < 1e-6);
        }
        result.discard_trials();
        assert!(result.trials.is_none());
    }

    #[test]
    fn test_zero_iterations_runs_one_trial() {
        let cfg = config(0, 1);
        let model = TrialModel::new(&scenario(), AdjustmentFactors::identity(), &[], &[], &cfg);
        assert_eq!(run_model(&model, &cfg, None, None).unwrap().iterations, 1);
    }

    #[test]
    fn test_adjustment_factors_scale_losses() {
        let cfg = config(5_000, 11);
        let base = TrialModel::new(&scenario(), AdjustmentFactors::identity(), &[], &[], &cfg);
        let halved = TrialModel::new(
            &scenario(),
            AdjustmentFactors { tef: 0.5, lm: 1.0 },
            &[],
            &[],
            &cfg,
        );
        let a = run_model(&base, &cfg, None, None).unwrap();
        let b = run_model(&halved, &cfg, None, None).unwrap();
        // same streams, every trial scaled by exactly one half
        assert!((b.stats.mean - a.stats.mean * 0.5).abs() < 1e-6 * a.stats.mean);
    }

    #[test]
    fn test_asset_values_override_primary_loss() {
        let cfg = SimulationConfig::default();
        let assets = [AssetValue { value: 6e8 }, AssetValue { value: 6e8 }];
        let model = TrialModel::new(&scenario(), AdjustmentFactors::identity(), &[], &assets, &cfg);
        // total capped at 1e9
        assert_eq!(
            model.primary,
            PrimaryLoss::Triangular(FairParameter::new(2e8, 5e8, 8e8))
        );
    }

    #[test]
    fn test_lognormal_takes_precedence_over_assets() {
        let mut params = scenario();
        params.loss_magnitude_lognormal = Some(LogNormalSpec { mu: 10.0, sigma: 1.0 });
        let cfg = SimulationConfig::default();
        let model = TrialModel::new(
            &params,
            AdjustmentFactors::identity(),
            &[],
            &[AssetValue { value: 1e6 }],
            &cfg,
        );
        assert!(matches!(model.primary, PrimaryLoss::LogNormal(_)));
    }

    #[test]
    fn test_calibrated_frequency_ranges() {
        let mut params = scenario();
        params.tef_override = Some(FairParameter::new(0.01, 0.02, 0.04));
        let cfg = SimulationConfig::default();
        let model = TrialModel::new(&params, AdjustmentFactors::identity(), &[], &[], &cfg);
        let lef = model.lef_range();
        assert!((lef.mode - 0.24).abs() < 1e-12);
        assert_eq!(lef, model.tef_range());
    }

    #[test]
    fn test_cancelled_run_returns_error() {
        let cfg = config(50_000, 5);
        let model = TrialModel::new(&scenario(), AdjustmentFactors::identity(), &[], &[], &cfg);
        let token = CancellationToken::new();
        token.cancel();
        let err = run_model(&model, &cfg, Some(&token), None).unwrap_err();
        assert!(matches!(err, SimulationError::Cancelled { requested: 50_000, .. }));
    }

    #[test]
    fn test_cancel_from_progress_observer() {
        let mut cfg = config(200_000, 5);
        cfg.batch_size = 1_000;
        let model = TrialModel::new(&scenario(), AdjustmentFactors::identity(), &[], &[], &cfg);
        let token = CancellationToken::new();
        let observer_token = token.clone();
        let cancel_after_first = move |_done: usize| observer_token.cancel();
        let result = run_model(&model, &cfg, Some(&token), Some(&cancel_after_first));
        assert!(result.is_err());
    }

    #[test]
    fn test_progress_reaches_iteration_count() {
        let cfg = config(4_500, 8);
        let model = TrialModel::new(&scenario(), AdjustmentFactors::identity(), &[], &[], &cfg);
        let seen = Mutex::new(Vec::new());
        let observer = |done: usize| seen.lock().unwrap().push(done);
        let token = CancellationToken::new();
        run_model(&model, &cfg, Some(&token), Some(&observer)).unwrap();
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 5);
        assert_eq!(seen.iter().copied().max(), Some(4_500));
    }

    #[test]
    fn test_deterministic_estimate_close_to_simulated_mean() {
        let cfg = config(50_000, 21);
        let model = TrialModel::new(&scenario(), AdjustmentFactors::identity(), &[], &[], &cfg);
        let simulated = run_model(&model, &cfg, None, None).unwrap().stats.mean;
        let estimate = model.deterministic_estimate();
        assert!(
            (simulated - estimate).abs() / estimate < 0.15,
            "simulated {} vs estimate {}",
            simulated,
            estimate
        );
    }
}
