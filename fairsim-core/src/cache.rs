//! In-memory memo of simulation results.
//!
//! Key: blake3 fingerprint over the normalized parameters, the controls
//! (sorted by id), mapper weights, cost modules, asset total, run kind and
//! simulation settings. Value: the shared `SimulationResult` of that run.
//!
//! **Eviction:** bounded; when full, the oldest insertion is dropped first.
//! Re-inserting an existing key counts as a fresh insertion.
//!
//! **Concurrency:** the map sits behind a `Mutex`. Lookups and inserts are
//! atomic, but two threads missing on the same key both simulate and the
//! second insert wins. Results for one key are identical when the seed is
//! fixed, so the duplicate work is the only cost.

use crate::controls::{Control, ImplementationStatus, MapperWeights};
use crate::fair_cam::VarianceMetrics;
use crate::params::{FairParameter, RiskCalculationParams};
use crate::secondary::{CostModule, CostModuleType};
use crate::simulation::{SimulationConfig, SimulationResult};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Default number of retained results
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Which of the two orchestrated runs a result belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunKind {
    Inherent,
    Residual,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Inherent => "inherent",
            RunKind::Residual => "residual",
        }
    }
}

/// Hex-encoded blake3 fingerprint of a run's inputs
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything that determines the outcome of one run
#[derive(Debug, Clone, Copy)]
pub struct RunInputs<'a> {
    pub params: &'a RiskCalculationParams,
    pub controls: &'a [Control],
    pub weights: MapperWeights,
    pub cost_modules: &'a [CostModule],
    pub asset_total: f64,
    pub variance: Option<&'a VarianceMetrics>,
    pub kind: RunKind,
    pub config: &'a SimulationConfig,
}

struct Fingerprint(blake3::Hasher);

impl Fingerprint {
    fn new() -> Self {
        Fingerprint(blake3::Hasher::new())
    }

    fn tag(&mut self, tag: &str) -> &mut Self {
        self.bytes(tag.as_bytes())
    }

    /// Length-prefixed so adjacent fields cannot run together
    fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.0.update(&(bytes.len() as u64).to_le_bytes());
        self.0.update(bytes);
        self
    }

    fn num(&mut self, v: f64) -> &mut Self {
        self.0.update(&v.to_bits().to_le_bytes());
        self
    }

    fn count(&mut self, v: u64) -> &mut Self {
        self.0.update(&v.to_le_bytes());
        self
    }

    fn param(&mut self, p: &FairParameter) -> &mut Self {
        self.num(p.min).num(p.mode).num(p.max)
    }

    fn finish(&self) -> CacheKey {
        CacheKey(self.0.finalize().to_hex().to_string())
    }
}

fn status_tag(s: ImplementationStatus) -> &'static str {
    match s {
        ImplementationStatus::NotImplemented => "not_implemented",
        ImplementationStatus::InProgress => "in_progress",
        ImplementationStatus::FullyImplemented => "fully_implemented",
    }
}

fn cost_type_tag(t: CostModuleType) -> &'static str {
    match t {
        CostModuleType::Fixed => "fixed",
        CostModuleType::PerEvent => "perEvent",
        CostModuleType::PerHour => "perHour",
        CostModuleType::Percent => "percent",
        CostModuleType::Unknown => "unknown",
    }
}

/// Fingerprint a run. Control order does not matter; cost module order
/// does not change the result either but is kept as given.
pub fn fingerprint(inputs: &RunInputs<'_>) -> CacheKey {
    let mut fp = Fingerprint::new();
    let p = inputs.params;

    fp.tag("params")
        .param(&p.contact_frequency)
        .param(&p.probability_of_action)
        .param(&p.threat_capability)
        .param(&p.resistance_strength)
        .param(&p.primary_loss_magnitude)
        .param(&p.secondary_loss_event_frequency)
        .param(&p.secondary_loss_magnitude);
    match &p.loss_magnitude_lognormal {
        Some(spec) => fp.tag("lognormal").num(spec.mu).num(spec.sigma),
        None => fp.tag("no-lognormal"),
    };
    match &p.tef_override {
        Some(tef) => fp.tag("tef").param(tef),
        None => fp.tag("no-tef"),
    };

    let mut controls: Vec<&Control> = inputs.controls.iter().collect();
    controls.sort_by(|a, b| a.id.cmp(&b.id));
    fp.tag("controls").count(controls.len() as u64);
    for c in controls {
        fp.tag(&c.id)
            .num(c.effectiveness)
            .tag(c.control_type.as_str())
            .tag(status_tag(c.implementation_status));
    }
    let w = &inputs.weights;
    fp.tag("weights")
        .num(w.fully_implemented)
        .num(w.in_progress)
        .num(w.baseline)
        .num(w.floor)
        .num(w.cap);

    fp.tag("cost-modules").count(inputs.cost_modules.len() as u64);
    for m in inputs.cost_modules {
        fp.tag(cost_type_tag(m.cost_type)).num(m.value);
    }

    fp.tag("assets").num(inputs.asset_total);
    match inputs.variance {
        Some(v) => fp.tag("variance").num(v.var_freq).num(v.var_duration),
        None => fp.tag("no-variance"),
    };
    fp.tag(inputs.kind.as_str());

    let c = inputs.config;
    fp.tag("config")
        .count(c.iterations as u64)
        .count(c.batch_size as u64)
        .count(u64::from(c.keep_trials))
        .num(c.hours_per_event)
        .num(c.asset_loss_factors.low)
        .num(c.asset_loss_factors.mid)
        .num(c.asset_loss_factors.high)
        .num(c.asset_value_cap)
        .num(c.tef_periods_per_year);
    match c.seed {
        Some(seed) => fp.tag("seed").count(seed),
        None => fp.tag("unseeded"),
    };

    fp.finish()
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<CacheKey, Arc<SimulationResult>>,
    order: VecDeque<CacheKey>,
}

/// Bounded, thread-safe result memo
#[derive(Debug)]
pub struct ResultCache {
    state: Mutex<CacheState>,
    max_entries: usize,
}

impl Default for ResultCache {
    fn default() -> Self {
        ResultCache::new(DEFAULT_MAX_ENTRIES)
    }
}

impl ResultCache {
    /// A capacity of 0 is raised to 1.
    pub fn new(max_entries: usize) -> Self {
        ResultCache {
            state: Mutex::new(CacheState::default()),
            max_entries: max_entries.max(1),
        }
    }

    // Every critical section leaves the map consistent; poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<SimulationResult>> {
        self.lock().entries.get(key).cloned()
    }

    /// Store a result, evicting the oldest entries past capacity.
    pub fn insert(&self, key: CacheKey, result: SimulationResult) -> Arc<SimulationResult> {
        let result = Arc::new(result);
        let mut state = self.lock();
        if state.entries.insert(key.clone(), Arc::clone(&result)).is_some() {
            state.order.retain(|k| k != &key);
        }
        state.order.push_back(key);
        while state.order.len() > self.max_entries {
            if let Some(oldest) = state.order.pop_front() {
                state.entries.remove(&oldest);
            }
        }
        result
    }

    /// Drop one entry; returns whether it was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut state = self.lock();
        let removed = state.entries.remove(key).is_some();
        if removed {
            state.order.retain(|k| k != key);
        }
        removed
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}
