//! The two pluggable module solvers: iterative debt sizing and
//! reserve-facility (DSRF) sizing, including the binary-search bounds,
//! period-end detection, and the `0.9` infeasibility tolerance ratio.

use rustc_hash::FxHashMap;
use serde_json::Value;

use periodix_common::Series;

use crate::docs::{ModuleInputs, RefinancingEntry};
use crate::refmap::ReferenceMap;
use crate::timeline::Timeline;

/// The per-template output ordering `M<mid>.<out>` addresses into. Adding
/// a new solver means adding one entry here and one match arm in
/// [`run_module`], no scheduler changes.
pub fn output_keys(template_id: &str) -> Option<&'static [&'static str]> {
    match template_id {
        "iterative_debt_sizing" => Some(&["sized_debt"]),
        "dsrf" => Some(&["facility_limit", "refi_fees", "effective_margin"]),
        _ => None,
    }
}

/// Dispatch a module's `templateId` to its solver. Returns an ordered set
/// of named output arrays matching [`output_keys`] for that template, or
/// an empty map for an unrecognized template (silently produces no
/// outputs).
pub fn run_module(
    template_id: &str,
    inputs: &ModuleInputs,
    refmap: &ReferenceMap,
    timeline: &Timeline,
) -> FxHashMap<&'static str, Series> {
    match template_id {
        "iterative_debt_sizing" => iterative_debt_sizing(inputs, refmap, timeline),
        "dsrf" => dsrf(inputs, refmap, timeline),
        _ => FxHashMap::default(),
    }
}

/// Resolve a module input: a literal scalar, a reference-name string
/// (the first non-zero value in that array, or its first value if the
/// whole array is zero), or absent (the caller's default).
fn resolve_scalar(value: Option<&Value>, refmap: &ReferenceMap, default: f64) -> f64 {
    match value {
        None => default,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => {
            if let Some(arr) = refmap.get(s) {
                arr.iter().copied().find(|&v| v != 0.0).unwrap_or_else(|| arr.get(0))
            } else {
                s.parse::<f64>().unwrap_or(default)
            }
        }
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        _ => default,
    }
}

/// Resolve a module input to a full period-length array: a reference name
/// resolves to that array verbatim, anything else broadcasts
/// [`resolve_scalar`] across every period.
fn resolve_array(value: Option<&Value>, refmap: &ReferenceMap, periods: usize, default: f64) -> Series {
    if let Some(Value::String(s)) = value {
        if let Some(arr) = refmap.get(s) {
            return arr.clone();
        }
    }
    Series::broadcast(resolve_scalar(value, refmap, default), periods)
}

/// A reference-name input resolves to that array (zeros if absent);
/// anything else (including absence) is a flat zero array. Used for the
/// flag/CFADS inputs, which are always meant to be reference names, never
/// literal scalars.
fn resolve_named_array(value: Option<&Value>, refmap: &ReferenceMap, periods: usize) -> Series {
    match value.and_then(Value::as_str) {
        Some(name) => refmap.get_or_zero(name),
        None => Series::zeros(periods),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DebtPeriod {
    Monthly,
    Quarterly,
    Yearly,
}

impl DebtPeriod {
    fn parse(s: Option<&str>) -> Self {
        match s {
            Some("M") => DebtPeriod::Monthly,
            Some("Y") => DebtPeriod::Yearly,
            _ => DebtPeriod::Quarterly,
        }
    }

    fn is_period_end(self, month: u32) -> bool {
        match self {
            DebtPeriod::Monthly => true,
            DebtPeriod::Quarterly => matches!(month, 3 | 6 | 9 | 12),
            DebtPeriod::Yearly => month == 12,
        }
    }
}

/// Binary-search debt sizing.
fn iterative_debt_sizing(inputs: &ModuleInputs, refmap: &ReferenceMap, timeline: &Timeline) -> FxHashMap<&'static str, Series> {
    let periods = timeline.periods();
    let mut out = FxHashMap::default();

    let contracted_cfads_ref = inputs.get("contractedCfadsRef").and_then(Value::as_str);
    let merchant_cfads_ref = inputs.get("merchantCfadsRef").and_then(Value::as_str);
    let legacy_cfads_ref = inputs.get("cfadsRef").and_then(Value::as_str);

    let contracted_dscr = resolve_scalar(inputs.get("contractedDSCR"), refmap, 0.0);
    let merchant_dscr = resolve_scalar(inputs.get("merchantDSCR"), refmap, 0.0);
    let target_dscr = resolve_scalar(inputs.get("targetDSCR"), refmap, 0.0);

    let contracted_cfads = resolve_named_array(inputs.get("contractedCfadsRef"), refmap, periods);
    let merchant_cfads = resolve_named_array(inputs.get("merchantCfadsRef"), refmap, periods);
    let legacy_cfads = legacy_cfads_ref.and_then(|name| refmap.get(name));

    let use_new = contracted_cfads_ref.is_some() || merchant_cfads_ref.is_some();

    let mut ds_capacity = Series::zeros(periods);
    let mut total_cfads = Series::zeros(periods);
    for t in 0..periods {
        if use_new {
            let cc = if contracted_dscr > 0.0 { contracted_cfads.get(t) / contracted_dscr } else { 0.0 };
            let mc = if merchant_dscr > 0.0 { merchant_cfads.get(t) / merchant_dscr } else { 0.0 };
            ds_capacity.set(t, cc + mc);
            total_cfads.set(t, contracted_cfads.get(t) + merchant_cfads.get(t));
        } else if let Some(legacy) = legacy_cfads {
            if t < legacy.len() {
                let v = if target_dscr > 0.0 { legacy.get(t) / target_dscr } else { 0.0 };
                ds_capacity.set(t, v);
                total_cfads.set(t, legacy.get(t));
            }
        }
    }

    let debt_flag = resolve_named_array(inputs.get("debtFlagRef"), refmap, periods);
    let Some(debt_start) = (0..periods).find(|&t| debt_flag.get(t) == 1.0) else {
        out.insert("sized_debt", Series::zeros(periods));
        return out;
    };

    let total_funding = match inputs.get("totalFundingRef") {
        Some(Value::String(name)) => match refmap.get(name) {
            Some(arr) if debt_start > 0 => arr.get(debt_start - 1),
            Some(arr) => arr.get(0),
            None => 0.0,
        },
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        _ => 0.0,
    };

    let debt_flag_end = (debt_start..periods)
        .rev()
        .find(|&t| debt_flag.get(t) == 1.0)
        .unwrap_or(debt_start);
    let tenor_years = resolve_scalar(inputs.get("tenorYears"), refmap, 18.0);
    let tenor_months = (tenor_years * 12.0) as usize;
    let debt_end = (debt_start + tenor_months).saturating_sub(1).min(debt_flag_end).min(periods - 1);

    let debt_period = DebtPeriod::parse(inputs.get("debtPeriod").and_then(Value::as_str));
    let interest_rate = resolve_array(inputs.get("interestRatePct"), refmap, periods, 5.0);
    let max_gearing_pct = resolve_scalar(inputs.get("maxGearingPct"), refmap, 65.0);
    let tolerance = resolve_scalar(inputs.get("tolerance"), refmap, 0.1);
    let max_iterations = resolve_scalar(inputs.get("maxIterations"), refmap, 50.0) as u32;

    let mut lower = 0.0f64;
    let mut upper = total_funding * (max_gearing_pct / 100.0);
    let mut best_debt = 0.0f64;

    for _ in 0..max_iterations {
        if upper - lower <= tolerance {
            break;
        }
        let test = (lower + upper) / 2.0;

        let mut balance = test;
        let mut accrued_interest = 0.0;
        let mut accrued_capacity = 0.0;
        let mut ok = true;

        for t in debt_start..=debt_end.min(periods - 1) {
            let monthly_rate = interest_rate.get(t) / 100.0 / 12.0;
            accrued_interest += balance * monthly_rate;
            accrued_capacity += ds_capacity.get(t);

            let is_pay = debt_period.is_period_end(timeline.month_at(t)) || t == debt_end;
            if is_pay {
                let remaining = (t..=debt_end)
                    .filter(|&j| debt_period.is_period_end(timeline.month_at(j)) || j == debt_end)
                    .count();

                let interest = accrued_interest;
                let min_principal = if remaining > 0 { balance / remaining as f64 } else { balance };
                let max_principal = (accrued_capacity - interest).max(0.0);

                let principal = if t == debt_end {
                    balance
                } else if max_principal >= min_principal {
                    min_principal
                } else {
                    if max_principal < min_principal * 0.9 {
                        ok = false;
                    }
                    max_principal
                };

                let principal = principal.min(balance);
                balance -= principal;
                accrued_interest = 0.0;
                accrued_capacity = 0.0;
            }
        }

        if balance < 0.001 && ok {
            lower = test;
            best_debt = test;
        } else {
            upper = test;
        }
    }

    out.insert("sized_debt", Series::broadcast(best_debt, periods));
    out
}

/// Reserve-facility (DSRF) sizing.
fn dsrf(inputs: &ModuleInputs, refmap: &ReferenceMap, timeline: &Timeline) -> FxHashMap<&'static str, Series> {
    let periods = timeline.periods();

    let dsrf_active = resolve_scalar(inputs.get("dsrfActiveRef"), refmap, 1.0);
    if dsrf_active == 0.0 {
        let mut out = FxHashMap::default();
        out.insert("facility_limit", Series::zeros(periods));
        out.insert("refi_fees", Series::zeros(periods));
        out.insert("effective_margin", Series::zeros(periods));
        return out;
    }

    let debt_service = resolve_named_array(inputs.get("debtServiceRef"), refmap, periods);
    let ops_flag = resolve_named_array(inputs.get("operationsFlagRef"), refmap, periods);
    let base_margin = resolve_scalar(inputs.get("baseMarginPctRef"), refmap, 1.75);
    let facility_months = resolve_scalar(inputs.get("facilityMonthsRef"), refmap, 6.0) as usize;

    let refi_schedule: Vec<RefinancingEntry> = inputs
        .get("refinancingSchedule")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    let mut out = FxHashMap::default();
    let Some(ops_start) = (0..periods).find(|&t| ops_flag.get(t) == 1.0) else {
        out.insert("facility_limit", Series::zeros(periods));
        out.insert("refi_fees", Series::zeros(periods));
        out.insert("effective_margin", Series::zeros(periods));
        return out;
    };

    let mut active_refis: Vec<&RefinancingEntry> = refi_schedule.iter().filter(|r| r.active && r.month_index > 0).collect();
    active_refis.sort_by_key(|r| r.month_index);

    let mut eff_margin = Series::zeros(periods);
    let mut current_margin = base_margin;
    let mut next_refi = 0usize;
    for t in 0..periods {
        while next_refi < active_refis.len() && t as i64 >= active_refis[next_refi].month_index {
            current_margin = active_refis[next_refi].margin_pct;
            next_refi += 1;
        }
        eff_margin.set(t, current_margin);
    }

    let mut recalc_points: Vec<usize> = vec![ops_start];
    recalc_points.extend(
        active_refis
            .iter()
            .map(|r| r.month_index)
            .filter(|&m| m as usize > ops_start && (m as usize) < periods)
            .map(|m| m as usize),
    );

    let mut fac_limit = Series::zeros(periods);
    let mut current_limit = 0.0;
    let mut next_recalc = 0usize;
    for t in 0..periods {
        if ops_flag.get(t) != 1.0 {
            continue;
        }
        if next_recalc < recalc_points.len() && t >= recalc_points[next_recalc] {
            let window_end = (t + facility_months).min(periods);
            current_limit = (t..window_end).map(|j| debt_service.get(j).abs()).sum();
            while next_recalc < recalc_points.len() && recalc_points[next_recalc] <= t {
                next_recalc += 1;
            }
        }
        fac_limit.set(t, current_limit);
    }

    let mut refi_fees = Series::zeros(periods);
    for r in &active_refis {
        let idx = r.month_index as usize;
        if idx < periods && ops_flag.get(idx) == 1.0 {
            refi_fees.set(idx, fac_limit.get(idx) * (r.fee_pct / 100.0));
        }
    }

    out.insert("facility_limit", fac_limit);
    out.insert("refi_fees", refi_fees);
    out.insert("effective_margin", eff_margin);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::YearMonth;

    fn timeline_2025() -> Timeline {
        Timeline::build(YearMonth::new(2025, 1), YearMonth::new(2025, 12))
    }

    #[test]
    fn debt_sizing_converges_to_expected_value() {
        let tl = timeline_2025();
        let mut refmap = ReferenceMap::new(tl.periods());
        refmap.insert("R1", Series::broadcast(100.0, 12)); // contracted CFADS
        refmap.insert("R2", Series::ones(12)); // debt active flag

        let mut inputs: ModuleInputs = ModuleInputs::default();
        inputs.insert("contractedCfadsRef".into(), Value::String("R1".into()));
        inputs.insert("contractedDSCR".into(), serde_json::json!(1.25));
        inputs.insert("debtFlagRef".into(), Value::String("R2".into()));
        inputs.insert("totalFundingRef".into(), serde_json::json!(10000.0));
        inputs.insert("maxGearingPct".into(), serde_json::json!(100.0));
        inputs.insert("interestRatePct".into(), serde_json::json!(0.0));
        inputs.insert("tenorYears".into(), serde_json::json!(1.0));
        inputs.insert("debtPeriod".into(), Value::String("M".into()));

        let out = iterative_debt_sizing(&inputs, &refmap, &tl);
        let sized = &out["sized_debt"];
        // contracted capacity = 100/1.25 = 80/period over 12 periods = 960 at 0% interest.
        assert!((sized.get(0) - 960.0).abs() < 0.5, "got {}", sized.get(0));
    }

    #[test]
    fn dsrf_all_zero_when_inactive() {
        let tl = timeline_2025();
        let refmap = ReferenceMap::new(tl.periods());
        let mut inputs: ModuleInputs = ModuleInputs::default();
        inputs.insert("dsrfActiveRef".into(), serde_json::json!(0.0));
        let out = dsrf(&inputs, &refmap, &tl);
        assert!(out["facility_limit"].iter().all(|&v| v == 0.0));
        assert!(out["refi_fees"].iter().all(|&v| v == 0.0));
        assert!(out["effective_margin"].iter().all(|&v| v == 0.0));
    }
}
