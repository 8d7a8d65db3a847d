//! Reporting and output generation
//!
//! Global invariants enforced:
//! - Deterministic output for a given assessment
//! - Byte-for-byte identical output across runs

use crate::engine::RiskAssessment;
use crate::params::ValueRange;
use crate::simulation::SimulationStats;

/// Render an assessment as text output
pub fn render_text(a: &RiskAssessment) -> String {
    let mut output = String::new();

    output.push_str("RISK SUMMARY\n");
    let summary = [
        ("Inherent risk", format_currency(a.inherent_risk)),
        ("Residual risk", format_currency(a.residual_risk)),
        ("Risk reduction", format_currency(a.risk_reduction)),
        ("Control cost", format_currency(a.control_cost)),
        ("Control ROI", format!("{:.1}%", a.control_roi * 100.0)),
        ("Susceptibility", format!("{:.3}", a.susceptibility)),
    ];
    for (label, value) in summary {
        output.push_str(&format!("  {:<18} {}\n", label, value));
    }

    output.push_str("\nFACTORS (after controls)\n");
    output.push_str(&format!(
        "  {:<6} {:>16} {:>16} {:>16}\n",
        "", "MIN", "AVG", "MAX"
    ));
    output.push_str(&range_row("TEF", &a.threat_event_frequency, format_rate));
    output.push_str(&range_row("LEF", &a.loss_event_frequency, format_rate));
    output.push_str(&range_row("PLM", &a.loss_magnitude, format_currency));
    output.push_str(&range_row("SLM", &a.secondary_loss_magnitude, format_currency));

    let e = &a.control_effectiveness;
    output.push_str("\nCONTROL EFFECTIVENESS\n");
    output.push_str(&format!(
        "  avoid {:.2}  deter {:.2}  resist {:.2}  detect {:.2}\n",
        e.e_avoid, e.e_deter, e.e_resist, e.e_detect
    ));
    output.push_str(&format!(
        "  TEF factor {:.3}  LM factor {:.3}\n",
        a.adjustment_factors.tef, a.adjustment_factors.lm
    ));

    output.push_str("\nANNUAL LOSS DISTRIBUTION\n");
    output.push_str(&format!(
        "  {:<9} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14}\n",
        "", "MEAN", "P05", "P25", "P50", "P75", "P95", "MAX"
    ));
    output.push_str(&stats_row("inherent", &a.inherent.stats));
    output.push_str(&stats_row("residual", &a.residual.stats));
    output.push_str(&format!(
        "  {} trials, seed {}\n",
        a.residual.iterations, a.residual.seed
    ));

    output
}

/// Render an assessment as JSON output
pub fn render_json(a: &RiskAssessment) -> String {
    serde_json::to_string_pretty(a).unwrap_or_else(|_| "{}".to_string())
}

fn range_row(label: &str, r: &ValueRange, fmt: fn(f64) -> String) -> String {
    format!(
        "  {:<6} {:>16} {:>16} {:>16}\n",
        label,
        fmt(r.min),
        fmt(r.avg),
        fmt(r.max)
    )
}

fn stats_row(label: &str, s: &SimulationStats) -> String {
    format!(
        "  {:<9} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14} {:>14}\n",
        label,
        format_currency(s.mean),
        format_currency(s.p05),
        format_currency(s.p25),
        format_currency(s.p50),
        format_currency(s.p75),
        format_currency(s.p95),
        format_currency(s.max),
    )
}

fn format_rate(v: f64) -> String {
    format!("{:.4}", v)
}

/// Whole dollars with thousands separators: `$1,234,568`
pub fn format_currency(v: f64) -> String {
    if !v.is_finite() {
        return "-".to_string();
    }
    let rounded = v.abs().round();
    let digits = format!("{:.0}", rounded);
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    if v < 0.0 && rounded > 0.0 {
        format!("-${}", grouped)
    } else {
        format!("${}", grouped)
    }
}
