//! fairsim core library - FAIR cyber risk quantification by Monte Carlo simulation

#![deny(warnings)]

// Global invariants enforced in this crate:
// - No global mutable state; caching is an explicit object
// - Malformed numeric input never fails a calculation
// - Randomness flows from one base seed per run
// - Identical input and seed yield identical results regardless of thread count
// - Residual risk never exceeds inherent risk

pub mod cache;
pub mod config;
pub mod controls;
pub mod distributions;
pub mod engine;
pub mod fair_cam;
pub mod normalize;
pub mod params;
pub mod report;
pub mod scenario;
pub mod secondary;
pub mod simulation;
pub mod susceptibility;

pub use cache::ResultCache;
pub use config::ResolvedConfig;
pub use controls::{map_control_effectiveness, Control, ControlEffectiveness};
pub use engine::{calculate_risk, RiskAssessment, RiskEngine, RiskOptions};
pub use normalize::normalize_params;
pub use params::{FairParameter, RiskCalculationParams};
pub use report::{render_json, render_text};
pub use scenario::{load_scenario, Scenario};
pub use secondary::CostModule;
pub use simulation::{
    run_simulation, CancellationToken, SimulationConfig, SimulationError, SimulationResult,
};
