//! Configuration file support for fairsim
//!
//! Loads simulation settings from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.fairsimrc.json` in the working directory
//! 3. `fairsim.config.json` in the working directory
//!
//! All fields are optional. CLI flags take precedence over config file values.

use crate::cache::{ResultCache, DEFAULT_MAX_ENTRIES};
use crate::engine::{RiskEngine, RiskOptions};
use crate::fair_cam::VarianceMetrics;
use crate::secondary::DEFAULT_HOURS_PER_EVENT;
use crate::simulation::{
    AssetLossFactors, SimulationConfig, DEFAULT_ASSET_VALUE_CAP, DEFAULT_BATCH_SIZE,
    DEFAULT_ITERATIONS, DEFAULT_TEF_PERIODS_PER_YEAR,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// fairsim configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FairsimConfig {
    /// Monte Carlo trials per run (default: 10000)
    #[serde(default)]
    pub iterations: Option<usize>,

    /// Base RNG seed; unseeded runs draw a fresh seed
    #[serde(default)]
    pub seed: Option<u64>,

    /// Trials per parallel batch (default: 1000)
    #[serde(default)]
    pub batch_size: Option<usize>,

    /// Keep per-trial detail in results
    #[serde(default)]
    pub keep_trials: Option<bool>,

    /// Event duration for hourly cost modules (default: 8)
    #[serde(default)]
    pub hours_per_event: Option<f64>,

    /// Share of asset value lost at low/mid/high (default: 0.2/0.5/0.8)
    #[serde(default)]
    pub asset_loss_factors: Option<AssetLossFactorConfig>,

    /// Cap on total asset value (default: 1e9)
    #[serde(default)]
    pub asset_value_cap: Option<f64>,

    /// Periods per year for calibrated frequencies (default: 12)
    #[serde(default)]
    pub tef_periods_per_year: Option<f64>,

    /// Default control variance metrics
    #[serde(default)]
    pub reliability: Option<ReliabilityConfig>,

    /// Result cache settings (default: disabled)
    #[serde(default)]
    pub cache: Option<CacheConfig>,
}

/// Asset loss factor overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetLossFactorConfig {
    pub low: Option<f64>,
    pub mid: Option<f64>,
    pub high: Option<f64>,
}

/// Control variance defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReliabilityConfig {
    /// Days per year a control is out of effect
    pub var_freq: Option<f64>,
    /// Length of each lapse
    pub var_duration: Option<f64>,
}

/// Result cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    pub enabled: Option<bool>,
    pub max_entries: Option<usize>,
}

/// Resolved configuration with defaults filled in
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub simulation: SimulationConfig,
    pub variance: Option<VarianceMetrics>,
    pub cache_enabled: bool,
    pub cache_max_entries: usize,

    /// Path the config was loaded from (None if using defaults)
    pub config_path: Option<PathBuf>,
}

fn require_finite(name: &str, v: f64) -> Result<()> {
    if !v.is_finite() {
        anyhow::bail!("{} must be a finite number (got {})", name, v);
    }
    Ok(())
}

impl FairsimConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.iterations == Some(0) {
            anyhow::bail!("iterations must be at least 1");
        }
        if self.batch_size == Some(0) {
            anyhow::bail!("batch_size must be at least 1");
        }

        if let Some(hours) = self.hours_per_event {
            require_finite("hours_per_event", hours)?;
            if hours < 0.0 {
                anyhow::bail!("hours_per_event must be non-negative (got {})", hours);
            }
        }

        if let Some(ref f) = self.asset_loss_factors {
            let (low, mid, high) = self.resolved_asset_factors(f);
            for (name, v) in [("low", low), ("mid", mid), ("high", high)] {
                require_finite(&format!("asset_loss_factors.{}", name), v)?;
                if !(0.0..=1.0).contains(&v) {
                    anyhow::bail!("asset_loss_factors.{} must be within 0..=1 (got {})", name, v);
                }
            }
            if low > mid || mid > high {
                anyhow::bail!(
                    "asset_loss_factors must satisfy low <= mid <= high (got {}, {}, {})",
                    low,
                    mid,
                    high
                );
            }
        }

        if let Some(cap) = self.asset_value_cap {
            require_finite("asset_value_cap", cap)?;
            if cap <= 0.0 {
                anyhow::bail!("asset_value_cap must be positive (got {})", cap);
            }
        }

        if let Some(periods) = self.tef_periods_per_year {
            require_finite("tef_periods_per_year", periods)?;
            if periods <= 0.0 {
                anyhow::bail!("tef_periods_per_year must be positive (got {})", periods);
            }
        }

        if let Some(ref r) = self.reliability {
            if let Some(freq) = r.var_freq {
                require_finite("reliability.var_freq", freq)?;
                if !(0.0..=365.0).contains(&freq) {
                    anyhow::bail!("reliability.var_freq must be within 0..=365 (got {})", freq);
                }
            }
            if let Some(duration) = r.var_duration {
                require_finite("reliability.var_duration", duration)?;
                if duration < 0.0 {
                    anyhow::bail!(
                        "reliability.var_duration must be non-negative (got {})",
                        duration
                    );
                }
            }
        }

        if let Some(ref c) = self.cache {
            if c.max_entries == Some(0) {
                anyhow::bail!("cache.max_entries must be at least 1");
            }
        }

        Ok(())
    }

    fn resolved_asset_factors(&self, f: &AssetLossFactorConfig) -> (f64, f64, f64) {
        let d = AssetLossFactors::default();
        (
            f.low.unwrap_or(d.low),
            f.mid.unwrap_or(d.mid),
            f.high.unwrap_or(d.high),
        )
    }

    /// Resolve config into the form the engine consumes
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let asset_loss_factors = match &self.asset_loss_factors {
            Some(f) => {
                let (low, mid, high) = self.resolved_asset_factors(f);
                AssetLossFactors { low, mid, high }
            }
            None => AssetLossFactors::default(),
        };

        let simulation = SimulationConfig {
            iterations: self.iterations.unwrap_or(DEFAULT_ITERATIONS),
            seed: self.seed,
            batch_size: self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            keep_trials: self.keep_trials.unwrap_or(false),
            hours_per_event: self.hours_per_event.unwrap_or(DEFAULT_HOURS_PER_EVENT),
            asset_loss_factors,
            asset_value_cap: self.asset_value_cap.unwrap_or(DEFAULT_ASSET_VALUE_CAP),
            tef_periods_per_year: self
                .tef_periods_per_year
                .unwrap_or(DEFAULT_TEF_PERIODS_PER_YEAR),
        };

        // a partially specified reliability block counts the missing half as 0
        let variance = self.reliability.as_ref().map(|r| VarianceMetrics {
            var_freq: r.var_freq.unwrap_or(0.0),
            var_duration: r.var_duration.unwrap_or(0.0),
        });

        let (cache_enabled, cache_max_entries) = match &self.cache {
            Some(c) => (
                c.enabled.unwrap_or(false),
                c.max_entries.unwrap_or(DEFAULT_MAX_ENTRIES),
            ),
            None => (false, DEFAULT_MAX_ENTRIES),
        };

        Ok(ResolvedConfig {
            simulation,
            variance,
            cache_enabled,
            cache_max_entries,
            config_path: None,
        })
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        FairsimConfig::default().resolve()
    }

    /// Engine with a fresh result cache when caching is enabled
    pub fn engine(&self) -> RiskEngine {
        let engine = RiskEngine::new();
        if self.cache_enabled {
            engine.with_cache(Arc::new(ResultCache::new(self.cache_max_entries)))
        } else {
            engine
        }
    }

    /// Per-call options carrying these settings
    pub fn risk_options(&self) -> RiskOptions<'static> {
        RiskOptions {
            variance: self.variance,
            ..RiskOptions::new(self.simulation.clone())
        }
    }
}

/// Discover and load a config file from a directory
///
/// Search order:
/// 1. `.fairsimrc.json`
/// 2. `fairsim.config.json`
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(dir: &Path) -> Result<Option<(FairsimConfig, PathBuf)>> {
    for name in [".fairsimrc.json", "fairsim.config.json"] {
        let path = dir.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<FairsimConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: FairsimConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve config
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config in `dir`.
/// Returns default config if nothing is found.
pub fn load_and_resolve(dir: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(dir)? {
            Some((config, path)) => (config, Some(path)),
            None => (FairsimConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config_is_valid() {
        let config = FairsimConfig::default();
        config.validate().expect("default config should be valid");
        let resolved = config.resolve().expect("default config should resolve");
        assert_eq!(resolved.simulation, SimulationConfig::default());
        assert!(resolved.variance.is_none());
        assert!(!resolved.cache_enabled);
        assert_eq!(resolved.cache_max_entries, 100);
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "iterations": 50000,
            "seed": 42,
            "batch_size": 500,
            "keep_trials": true,
            "hours_per_event": 12,
            "asset_loss_factors": {"low": 0.1, "mid": 0.4, "high": 0.9},
            "asset_value_cap": 5e8,
            "tef_periods_per_year": 1,
            "reliability": {"var_freq": 36.5, "var_duration": 2},
            "cache": {"enabled": true, "max_entries": 10}
        }"#;
        let config: FairsimConfig = serde_json::from_str(json).unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.simulation.iterations, 50_000);
        assert_eq!(resolved.simulation.seed, Some(42));
        assert_eq!(resolved.simulation.batch_size, 500);
        assert!(resolved.simulation.keep_trials);
        assert_eq!(resolved.simulation.hours_per_event, 12.0);
        assert_eq!(resolved.simulation.asset_loss_factors.high, 0.9);
        assert_eq!(resolved.simulation.asset_value_cap, 5e8);
        assert_eq!(resolved.simulation.tef_periods_per_year, 1.0);
        assert_eq!(
            resolved.variance,
            Some(VarianceMetrics {
                var_freq: 36.5,
                var_duration: 2.0
            })
        );
        assert!(resolved.cache_enabled);
        assert_eq!(resolved.cache_max_entries, 10);
        assert!(resolved.engine().cache().is_some());
    }

    #[test]
    fn test_reject_unknown_fields() {
        let result: Result<FairsimConfig, _> = serde_json::from_str(r#"{"iteratons": 5}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_reject_zero_iterations() {
        let config: FairsimConfig = serde_json::from_str(r#"{"iterations": 0}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_unordered_asset_factors() {
        let config: FairsimConfig =
            serde_json::from_str(r#"{"asset_loss_factors": {"low": 0.6}}"#).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("low <= mid <= high"));
    }

    #[test]
    fn test_reject_negative_hours() {
        let config: FairsimConfig = serde_json::from_str(r#"{"hours_per_event": -1}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_var_freq_out_of_range() {
        let config: FairsimConfig =
            serde_json::from_str(r#"{"reliability": {"var_freq": 400}}"#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_asset_factors_use_defaults_for_rest() {
        let config: FairsimConfig =
            serde_json::from_str(r#"{"asset_loss_factors": {"high": 0.95}}"#).unwrap();
        let f = config.resolve().unwrap().simulation.asset_loss_factors;
        assert_eq!(f.low, 0.2);
        assert_eq!(f.mid, 0.5);
        assert_eq!(f.high, 0.95);
    }

    #[test]
    fn test_risk_options_carry_settings() {
        let config: FairsimConfig = serde_json::from_str(
            r#"{"iterations": 123, "reliability": {"var_freq": 10}}"#,
        )
        .unwrap();
        let options = config.resolve().unwrap().risk_options();
        assert_eq!(options.simulation.iterations, 123);
        assert_eq!(options.variance.map(|v| v.var_duration), Some(0.0));
        assert!(options.cancel.is_none());
    }

    #[test]
    fn test_discover_fairsimrc() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(".fairsimrc.json");
        fs::write(&config_path, r#"{"iterations": 500}"#).unwrap();

        let (config, path) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.iterations, Some(500));
        assert_eq!(path, config_path);
    }

    #[test]
    fn test_discover_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".fairsimrc.json"), r#"{"seed": 1}"#).unwrap();
        fs::write(dir.path().join("fairsim.config.json"), r#"{"seed": 2}"#).unwrap();

        let (config, _) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.seed, Some(1));
    }

    #[test]
    fn test_discover_config_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("fairsim.config.json"), r#"{"seed": 2}"#).unwrap();
        let (config, _) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.seed, Some(2));
    }

    #[test]
    fn test_no_config_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_config(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_invalid_discovered_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".fairsimrc.json"), r#"{"batch_size": 0}"#).unwrap();
        let err = discover_config(dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("batch_size"));
    }

    #[test]
    fn test_load_and_resolve_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = load_and_resolve(dir.path(), None).unwrap();
        assert!(resolved.config_path.is_none());
        assert_eq!(resolved.simulation.iterations, 10_000);
    }

    #[test]
    fn test_load_and_resolve_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("custom.json");
        fs::write(&config_path, r#"{"iterations": 2000}"#).unwrap();

        let resolved = load_and_resolve(dir.path(), Some(&config_path)).unwrap();
        assert_eq!(resolved.simulation.iterations, 2_000);
        assert_eq!(resolved.config_path, Some(config_path));
    }
}
