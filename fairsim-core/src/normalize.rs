//! Parameter normalization
//!
//! Adapts the risk record shapes produced upstream into the canonical
//! [`RiskCalculationParams`]. Each of the seven FAIR groups is resolved from
//! the first shape present:
//!
//! 1. Nested object: `"contactFrequency": {"min": 1, "avg": 2, "max": 3}`
//! 2. Flat fields: `"contactFrequencyMin"`, `"contactFrequencyAvg"` (or
//!    `...Mode`), `"contactFrequencyMax"`
//! 3. Legacy single value: `"contactFrequency": 2` or an older field name
//! 4. Default `{0, 0, 0}`
//!
//! snake_case spellings of every key are accepted as well.
//!
//! Missing parts of a nested or flat group are filled from siblings: a
//! missing min is 0, a missing mode is the midpoint of min and max (or min
//! when max is also missing), a missing max is the mode.
//!
//! Global invariants enforced:
//! - Normalization never fails; malformed values degrade to 0
//! - Output parameters always satisfy `min <= mode <= max`

use crate::params::{FairParameter, LogNormalSpec, RiskCalculationParams};
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

/// Which input shape a group was resolved from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupSource {
    Nested,
    Flat,
    Legacy,
    Default,
}

impl GroupSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupSource::Nested => "nested",
            GroupSource::Flat => "flat",
            GroupSource::Legacy => "legacy",
            GroupSource::Default => "default",
        }
    }
}

/// Input key layout for one FAIR group
struct GroupSpec {
    key: &'static str,
    legacy: &'static [&'static str],
}

const CONTACT_FREQUENCY: GroupSpec = GroupSpec {
    key: "contactFrequency",
    legacy: &["threatEventFrequency"],
};
const PROBABILITY_OF_ACTION: GroupSpec = GroupSpec {
    key: "probabilityOfAction",
    legacy: &[],
};
const THREAT_CAPABILITY: GroupSpec = GroupSpec {
    key: "threatCapability",
    legacy: &[],
};
const RESISTANCE_STRENGTH: GroupSpec = GroupSpec {
    key: "resistanceStrength",
    legacy: &["controlStrength"],
};
const PRIMARY_LOSS_MAGNITUDE: GroupSpec = GroupSpec {
    key: "primaryLossMagnitude",
    legacy: &["lossMagnitude", "impact"],
};
const SECONDARY_LOSS_EVENT_FREQUENCY: GroupSpec = GroupSpec {
    key: "secondaryLossEventFrequency",
    legacy: &[],
};
const SECONDARY_LOSS_MAGNITUDE: GroupSpec = GroupSpec {
    key: "secondaryLossMagnitude",
    legacy: &[],
};

/// Result of normalization with the shape each group came from
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub params: RiskCalculationParams,
    pub sources: Vec<(&'static str, GroupSource)>,
}

/// Normalize a risk record into canonical parameters
pub fn normalize_params(input: &Value) -> RiskCalculationParams {
    normalize_with_sources(input).params
}

/// Normalize a risk record and report which shape each group used
pub fn normalize_with_sources(input: &Value) -> Normalized {
    let empty = Map::new();
    let obj = input.as_object().unwrap_or(&empty);

    let mut sources = Vec::with_capacity(7);
    let mut resolve = |spec: &GroupSpec| {
        let (param, source) = resolve_group(obj, spec);
        sources.push((spec.key, source));
        param
    };

    let params = RiskCalculationParams {
        contact_frequency: resolve(&CONTACT_FREQUENCY),
        probability_of_action: resolve(&PROBABILITY_OF_ACTION),
        threat_capability: resolve(&THREAT_CAPABILITY),
        resistance_strength: resolve(&RESISTANCE_STRENGTH),
        primary_loss_magnitude: resolve(&PRIMARY_LOSS_MAGNITUDE),
        secondary_loss_event_frequency: resolve(&SECONDARY_LOSS_EVENT_FREQUENCY),
        secondary_loss_magnitude: resolve(&SECONDARY_LOSS_MAGNITUDE),
        loss_magnitude_lognormal: resolve_lognormal(obj),
        tef_override: resolve_tef_override(obj),
    };

    Normalized { params, sources }
}

/// Resolve one group: nested -> flat -> legacy -> default
fn resolve_group(obj: &Map<String, Value>, spec: &GroupSpec) -> (FairParameter, GroupSource) {
    if let Some(nested) = field(obj, spec.key).and_then(Value::as_object) {
        if let Some(param) = range_from_object(nested) {
            return (param, GroupSource::Nested);
        }
    }

    if let Some(param) = range_from_flat(obj, spec.key) {
        return (param, GroupSource::Flat);
    }

    let legacy_value = std::iter::once(spec.key)
        .chain(spec.legacy.iter().copied())
        .filter_map(|key| field(obj, key))
        .find(|v| is_scalar(v));
    if let Some(value) = legacy_value {
        return (FairParameter::point(safe_number(value)), GroupSource::Legacy);
    }

    (FairParameter::zero(), GroupSource::Default)
}

/// Range from a `{min, avg|mode, max}` object; `None` when no part is present
fn range_from_object(obj: &Map<String, Value>) -> Option<FairParameter> {
    let min = present(obj, "min");
    let mode = present(obj, "avg")
        .or_else(|| present(obj, "mode"))
        .or_else(|| present(obj, "likely"));
    let max = present(obj, "max");
    fill_range(min, mode, max)
}

/// Range from `{prefix}Min` / `{prefix}Avg` / `{prefix}Mode` / `{prefix}Max`
fn range_from_flat(obj: &Map<String, Value>, prefix: &str) -> Option<FairParameter> {
    let min = present(obj, &format!("{}Min", prefix));
    let mode = present(obj, &format!("{}Avg", prefix))
        .or_else(|| present(obj, &format!("{}Mode", prefix)));
    let max = present(obj, &format!("{}Max", prefix));
    fill_range(min, mode, max)
}

fn fill_range(
    min: Option<&Value>,
    mode: Option<&Value>,
    max: Option<&Value>,
) -> Option<FairParameter> {
    if min.is_none() && mode.is_none() && max.is_none() {
        return None;
    }
    let min_v = min.map(safe_number).unwrap_or(0.0);
    let max_v = max.map(safe_number);
    let mode_v = match (mode, max_v) {
        (Some(m), _) => safe_number(m),
        (None, Some(max_v)) => (min_v + max_v) / 2.0,
        (None, None) => min_v,
    };
    Some(FairParameter::new(min_v, mode_v, max_v.unwrap_or(mode_v)))
}

/// IRIS threat event frequency baseline
fn resolve_tef_override(obj: &Map<String, Value>) -> Option<FairParameter> {
    let iris = field(obj, "irisBaseline").and_then(Value::as_object);

    iris.and_then(|i| field(i, "tef"))
        .or_else(|| field(obj, "tefOverride"))
        .and_then(Value::as_object)
        .and_then(range_from_object)
        .or_else(|| range_from_flat(obj, "tef"))
}

/// IRIS log-normal loss magnitude: `{mu, sigma}` or `{median, sigma}`
fn resolve_lognormal(obj: &Map<String, Value>) -> Option<LogNormalSpec> {
    let iris = field(obj, "irisBaseline").and_then(Value::as_object);
    let nested = iris
        .and_then(|i| field(i, "lossMagnitude"))
        .or_else(|| field(obj, "lossMagnitudeLognormal"))
        .and_then(Value::as_object);

    let spec = match nested {
        Some(n) => lognormal_from(present(n, "mu"), present(n, "median"), present(n, "sigma")),
        None => lognormal_from(
            present(obj, "lossMagnitudeMu"),
            present(obj, "lossMagnitudeMedian"),
            present(obj, "lossMagnitudeSigma"),
        ),
    };
    spec.filter(LogNormalSpec::is_valid)
}

fn lognormal_from(
    mu: Option<&Value>,
    median: Option<&Value>,
    sigma: Option<&Value>,
) -> Option<LogNormalSpec> {
    let sigma = safe_number(sigma?);
    match (mu, median) {
        (Some(mu), _) => Some(LogNormalSpec {
            mu: safe_number(mu),
            sigma,
        }),
        (None, Some(median)) => {
            let median = safe_number(median);
            (median > 0.0).then(|| LogNormalSpec::from_median(median, sigma))
        }
        (None, None) => None,
    }
}

/// Look up a camelCase key, falling back to its snake_case spelling
fn field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    obj.get(key).or_else(|| obj.get(&to_snake_case(key)))
}

/// Like [`field`] but treats `null` as absent
fn present<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    field(obj, key).filter(|v| !v.is_null())
}

fn is_scalar(v: &Value) -> bool {
    matches!(v, Value::Number(_) | Value::String(_))
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Coerce any JSON value to a finite number.
///
/// Numbers pass through when finite. Strings are parsed directly, then again
/// with every character other than digits, `.` and `-` removed
/// (`"$1,200,000"` -> 1200000). Everything else is 0.
pub fn safe_number(value: &Value) -> f64 {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_numeric_string(s),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

/// `deserialize_with` adapter: any JSON value through [`safe_number`]
pub fn deserialize_safe_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<f64, D::Error> {
    Value::deserialize(deserializer).map(|v| safe_number(&v))
}

/// Like [`deserialize_safe_number`]; `null` stays `None`
pub fn deserialize_optional_safe_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<f64>, D::Error> {
    Option::<Value>::deserialize(deserializer).map(|v| v.as_ref().map(safe_number))
}

fn parse_numeric_string(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if let Ok(v) = trimmed.parse::<f64>() {
        return Some(v);
    }

    static STRIP_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let strip_re = STRIP_RE.get_or_init(|| Regex::new(r"[^0-9.\-]").unwrap());
    let stripped = strip_re.replace_all(trimmed, "");
    if let Ok(v) = stripped.parse::<f64>() {
        return Some(v);
    }

    // Stray separators left behind ("1.2.3", "5-10"): take the leading number
    static NUMBER_RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let number_re = NUMBER_RE.get_or_init(|| Regex::new(r"-?\d+(?:\.\d+)?").unwrap());
    number_re
        .find(&stripped)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}
