//! Evaluates a parsed [`AstNode`] into a period-length [`Series`].
//!
//! Two entry points share the same scalar semantics:
//!
//! - [`eval_series`]: the ordinary, vectorized path. Array operators are
//!   evaluated bottom-up by fully materializing their inner expression
//!   once and then applying the time-aware transform over the whole
//!   array. Used for every formula outside a soft-cycle cluster.
//! - [`eval_at_period`]: the period-by-period path used by the cluster
//!   evaluator, where array operators re-derive their inner expression at
//!   every period `j ≤ t` against whatever prefix of a cluster member's
//!   array has been filled so far.

use periodix_common::{EngineError, Series};
use periodix_parse::ast::{AstNode, BinaryOp, Func, UnaryOp};

use crate::refmap::ReferenceMap;
use crate::timeline::Timeline;

/// Anything that can answer "what's the value of this reference at period
/// `t`". The ordinary reference map implements it directly; the cluster
/// evaluator layers a partially-filled overlay on top of one.
pub trait Resolver {
    fn at(&self, name: &str, t: usize) -> f64;
}

impl Resolver for ReferenceMap {
    fn at(&self, name: &str, t: usize) -> f64 {
        self.get(name).map(|a| a.get(t)).unwrap_or(0.0)
    }
}

fn is_truthy(v: f64) -> bool {
    v != 0.0 && v.is_finite()
}

fn apply_binary(op: BinaryOp, l: f64, r: f64) -> f64 {
    match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Mod => l % r,
        BinaryOp::Div => {
            let v = l / r;
            if v.is_finite() {
                v
            } else {
                0.0
            }
        }
        BinaryOp::Pow => {
            let v = l.powf(r);
            if v.is_finite() {
                v
            } else {
                0.0
            }
        }
        BinaryOp::Eq => bool_to_f64(l == r),
        BinaryOp::Ne => bool_to_f64(l != r),
        BinaryOp::Lt => bool_to_f64(l < r),
        BinaryOp::Le => bool_to_f64(l <= r),
        BinaryOp::Gt => bool_to_f64(l > r),
        BinaryOp::Ge => bool_to_f64(l >= r),
        BinaryOp::And => bool_to_f64(is_truthy(l) && is_truthy(r)),
        BinaryOp::Or => bool_to_f64(is_truthy(l) || is_truthy(r)),
    }
}

fn apply_unary(op: UnaryOp, v: f64) -> f64 {
    match op {
        UnaryOp::Neg => -v,
        UnaryOp::Not => bool_to_f64(!is_truthy(v)),
    }
}

fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Half-away-from-zero rounding, per the formula language's documented
/// convention (the alternative, banker's rounding, is explicitly not
/// what's intended here).
pub fn round_half_away_from_zero(x: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let y = x * factor;
    let rounded = if y >= 0.0 { (y + 0.5).floor() } else { (y - 0.5).ceil() };
    rounded / factor
}

fn eval_scalar_call(func: Func, args: &[f64]) -> f64 {
    match func {
        Func::If => {
            if is_truthy(args[0]) {
                args[1]
            } else {
                args[2]
            }
        }
        Func::And => bool_to_f64(is_truthy(args[0]) && is_truthy(args[1])),
        Func::Or => bool_to_f64(is_truthy(args[0]) || is_truthy(args[1])),
        Func::Not => bool_to_f64(!is_truthy(args[0])),
        Func::Min => args[0].min(args[1]),
        Func::Max => args[0].max(args[1]),
        Func::Abs => args[0].abs(),
        Func::Round => {
            let decimals = args.get(1).copied().unwrap_or(0.0) as i32;
            round_half_away_from_zero(args[0], decimals)
        }
        _ => unreachable!("array operators are handled by their own evaluation path"),
    }
}

/// Fully evaluate `ast` into a period-length array, using only a
/// completed reference map (no partial/live overlay). Array operators
/// materialize their inner expression once, bottom-up.
pub fn eval_series(ast: &AstNode, refmap: &ReferenceMap, timeline: &Timeline) -> Result<Series, EngineError> {
    let periods = timeline.periods();
    match ast {
        AstNode::Number(n) => Ok(Series::broadcast(*n, periods)),
        AstNode::Reference(name) => Ok(resolve_reference_series(name, refmap, periods)),
        AstNode::Unary { op, expr } => {
            let inner = eval_series(expr, refmap, timeline)?;
            Ok(inner.map(|v| apply_unary(*op, v)))
        }
        AstNode::Binary { op, lhs, rhs } => {
            let l = eval_series(lhs, refmap, timeline)?;
            let r = eval_series(rhs, refmap, timeline)?;
            let mut out = Series::zeros(periods);
            for t in 0..periods {
                out.set(t, apply_binary(*op, l.get(t), r.get(t)));
            }
            Ok(out)
        }
        AstNode::Call { func, args } if func.is_array_op() => eval_array_op_series(*func, args, refmap, timeline),
        AstNode::Call { func, args } => {
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(eval_series(a, refmap, timeline)?);
            }
            let mut out = Series::zeros(periods);
            for t in 0..periods {
                let at_t: Vec<f64> = values.iter().map(|v| v.get(t)).collect();
                out.set(t, eval_scalar_call(*func, &at_t));
            }
            Ok(out)
        }
    }
}

fn resolve_reference_series(name: &str, refmap: &ReferenceMap, periods: usize) -> Series {
    refmap
        .get(name)
        .cloned()
        .unwrap_or_else(|| Series::zeros(periods))
}

fn eval_array_op_series(
    func: Func,
    args: &[AstNode],
    refmap: &ReferenceMap,
    timeline: &Timeline,
) -> Result<Series, EngineError> {
    let periods = timeline.periods();
    let inner = eval_series(&args[0], refmap, timeline)?;

    Ok(match func {
        Func::CumSum => {
            let mut out = Series::zeros(periods);
            let mut total = 0.0;
            for t in 0..periods {
                total += inner.get(t);
                out.set(t, total);
            }
            out
        }
        Func::CumProd => {
            let mut out = Series::zeros(periods);
            let mut product = 1.0;
            for t in 0..periods {
                product *= inner.get(t);
                out.set(t, product);
            }
            out
        }
        Func::PrevSum => {
            let mut out = Series::zeros(periods);
            let mut total = 0.0;
            for t in 0..periods {
                out.set(t, total);
                total += inner.get(t);
            }
            out
        }
        Func::PrevVal => {
            let mut out = Series::zeros(periods);
            for t in 1..periods {
                out.set(t, inner.get(t - 1));
            }
            out
        }
        Func::Count => {
            let mut out = Series::zeros(periods);
            let mut count = 0.0;
            for t in 0..periods {
                if inner.get(t) != 0.0 {
                    count += 1.0;
                }
                out.set(t, count);
            }
            out
        }
        Func::Shift => {
            let n = match &args[1] {
                AstNode::Number(n) => *n as usize,
                _ => 0,
            };
            let mut out = Series::zeros(periods);
            for t in n..periods {
                out.set(t, inner.get(t - n));
            }
            out
        }
        Func::CumSumY => cumulative_yearly(&inner, timeline, true),
        Func::CumProdY => cumulative_yearly(&inner, timeline, false),
        other => unreachable!("{other:?} is not an array operator"),
    })
}

/// `CUMSUM_Y`/`CUMPROD_Y`: the accumulator only absorbs a new term when the
/// calendar year changes, and the term it absorbs is the inner array's
/// value at the *first* period of the year that just completed, not a
/// sum/product over that year. This opening-balance quirk is specified
/// (and preserved) exactly as observed in the system being modeled.
fn cumulative_yearly(inner: &Series, timeline: &Timeline, is_sum: bool) -> Series {
    let periods = timeline.periods();
    let mut out = Series::zeros(periods);
    let mut accumulator = if is_sum { 0.0 } else { 1.0 };
    let mut last_year: Option<i32> = None;
    let mut last_year_value: Option<f64> = None;

    for t in 0..periods {
        let year = timeline.year_at(t);
        let year_changed = last_year.is_some_and(|y| y != year);
        if year_changed {
            if let Some(v) = last_year_value {
                if is_sum {
                    accumulator += v;
                } else {
                    accumulator *= v;
                }
            }
        }
        out.set(t, accumulator);
        if last_year != Some(year) {
            last_year_value = Some(inner.get(t));
        }
        last_year = Some(year);
    }
    out
}

/// Evaluate `ast` at a single period `t` against a (possibly partially
/// filled) resolver. Used exclusively by the cluster evaluator: array
/// operators re-derive every period `j` they need by recursing into this
/// same function rather than reading a precomputed array, since a
/// cluster's member arrays are still being filled in as evaluation
/// proceeds.
pub fn eval_at_period(ast: &AstNode, resolver: &dyn Resolver, timeline: &Timeline, t: usize) -> f64 {
    match ast {
        AstNode::Number(n) => *n,
        AstNode::Reference(name) => resolver.at(name, t),
        AstNode::Unary { op, expr } => apply_unary(*op, eval_at_period(expr, resolver, timeline, t)),
        AstNode::Binary { op, lhs, rhs } => {
            let l = eval_at_period(lhs, resolver, timeline, t);
            let r = eval_at_period(rhs, resolver, timeline, t);
            apply_binary(*op, l, r)
        }
        AstNode::Call { func, args } if func.is_array_op() => eval_array_op_at_period(*func, args, resolver, timeline, t),
        AstNode::Call { func, args } => {
            let values: Vec<f64> = args.iter().map(|a| eval_at_period(a, resolver, timeline, t)).collect();
            eval_scalar_call(*func, &values)
        }
    }
}

fn eval_array_op_at_period(func: Func, args: &[AstNode], resolver: &dyn Resolver, timeline: &Timeline, t: usize) -> f64 {
    let inner = &args[0];
    match func {
        Func::CumSum => (0..=t).map(|j| eval_at_period(inner, resolver, timeline, j)).sum(),
        Func::CumProd => (0..=t).map(|j| eval_at_period(inner, resolver, timeline, j)).product(),
        Func::PrevSum => (0..t).map(|j| eval_at_period(inner, resolver, timeline, j)).sum(),
        Func::PrevVal => {
            if t == 0 {
                0.0
            } else {
                eval_at_period(inner, resolver, timeline, t - 1)
            }
        }
        Func::Count => (0..=t)
            .filter(|&j| eval_at_period(inner, resolver, timeline, j) != 0.0)
            .count() as f64,
        Func::Shift => {
            let n = match &args[1] {
                AstNode::Number(n) => *n as usize,
                _ => 0,
            };
            if t < n {
                0.0
            } else {
                eval_at_period(inner, resolver, timeline, t - n)
            }
        }
        Func::CumSumY | Func::CumProdY => {
            let is_sum = func == Func::CumSumY;
            let mut accumulator = if is_sum { 0.0 } else { 1.0 };
            let mut last_year: Option<i32> = None;
            let mut last_year_value: Option<f64> = None;
            for j in 0..=t {
                let year = timeline.year_at(j);
                let year_changed = last_year.is_some_and(|y| y != year);
                if year_changed {
                    if let Some(v) = last_year_value {
                        if is_sum {
                            accumulator += v;
                        } else {
                            accumulator *= v;
                        }
                    }
                }
                if j == t {
                    return accumulator;
                }
                if last_year != Some(year) {
                    last_year_value = Some(eval_at_period(inner, resolver, timeline, j));
                }
                last_year = Some(year);
            }
            accumulator
        }
        other => unreachable!("{other:?} is not an array operator"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::YearMonth;
    use periodix_parse::Parser;

    fn timeline_2025() -> Timeline {
        Timeline::build(YearMonth::new(2025, 1), YearMonth::new(2025, 12))
    }

    fn eval(formula: &str, refmap: &ReferenceMap, timeline: &Timeline) -> Series {
        let ast = Parser::parse(formula).unwrap();
        eval_series(&ast, refmap, timeline).unwrap()
    }

    #[test]
    fn cumsum_matches_running_total() {
        let tl = timeline_2025();
        let mut map = ReferenceMap::new(tl.periods());
        map.insert("C1", Series::broadcast(100.0, tl.periods()));
        let r = eval("CUMSUM(C1)", &map, &tl);
        assert_eq!(r.get(0), 100.0);
        assert_eq!(r.get(11), 1200.0);
    }

    #[test]
    fn shift_pulls_back_n_periods() {
        let tl = timeline_2025();
        let mut map = ReferenceMap::new(tl.periods());
        map.insert("C1", Series::broadcast(100.0, tl.periods()));
        let cumulated = eval("CUMSUM(C1)", &map, &tl);
        map.insert("R1", cumulated);
        let shifted = eval("SHIFT(R1, 3)", &map, &tl);
        assert_eq!(shifted.get(0), 0.0);
        assert_eq!(shifted.get(3), 100.0);
        assert_eq!(shifted.get(11), 900.0);
    }

    #[test]
    fn if_selects_on_truthy_condition() {
        let tl = timeline_2025();
        let mut map = ReferenceMap::new(tl.periods());
        map.insert("C1", Series::broadcast(100.0, tl.periods()));
        let cumulated = eval("CUMSUM(C1)", &map, &tl);
        map.insert("R1", cumulated);
        for (name, arr) in tl.calendar_constants() {
            map.insert(name, arr);
        }
        let r3 = eval("IF(T.QE, R1, 0)", &map, &tl);
        assert_eq!(r3.get(0), 0.0);
        assert_eq!(r3.get(2), 300.0);
        assert_eq!(r3.get(11), 1200.0);
    }

    #[test]
    fn division_by_zero_rescues_to_zero() {
        let tl = timeline_2025();
        let map = ReferenceMap::new(tl.periods());
        let r = eval("1 / 0", &map, &tl);
        assert!(r.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn round_half_away_from_zero_at_half() {
        assert_eq!(round_half_away_from_zero(0.5, 0), 1.0);
        assert_eq!(round_half_away_from_zero(-0.5, 0), -1.0);
        assert_eq!(round_half_away_from_zero(2.345, 2), 2.35);
    }

    #[test]
    fn unresolved_reference_is_zero() {
        let tl = timeline_2025();
        let map = ReferenceMap::new(tl.periods());
        let r = eval("R999 + 1", &map, &tl);
        assert!(r.iter().all(|&v| v == 1.0));
    }
}
