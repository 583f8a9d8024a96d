//! The parsed formula tree and its function table.

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Almost every call in the formula grammar takes one to three arguments
/// (`IF` is the widest, at three); inlining that many before spilling to
/// the heap avoids an allocation per parsed call node.
pub type CallArgs = SmallVec<[AstNode; 3]>;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// The scalar and time-aware functions the formula language recognizes.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    If,
    And,
    Or,
    Not,
    Min,
    Max,
    Abs,
    Round,
    CumSum,
    CumSumY,
    CumProd,
    CumProdY,
    PrevSum,
    PrevVal,
    Shift,
    Count,
}

impl Func {
    pub fn parse(name: &str) -> Option<Func> {
        Some(match name.to_ascii_uppercase().as_str() {
            "IF" => Func::If,
            "AND" => Func::And,
            "OR" => Func::Or,
            "NOT" => Func::Not,
            "MIN" => Func::Min,
            "MAX" => Func::Max,
            "ABS" => Func::Abs,
            "ROUND" => Func::Round,
            "CUMSUM" => Func::CumSum,
            "CUMSUM_Y" => Func::CumSumY,
            "CUMPROD" => Func::CumProd,
            "CUMPROD_Y" => Func::CumProdY,
            "PREVSUM" => Func::PrevSum,
            "PREVVAL" => Func::PrevVal,
            "SHIFT" => Func::Shift,
            "COUNT" => Func::Count,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Func::If => "IF",
            Func::And => "AND",
            Func::Or => "OR",
            Func::Not => "NOT",
            Func::Min => "MIN",
            Func::Max => "MAX",
            Func::Abs => "ABS",
            Func::Round => "ROUND",
            Func::CumSum => "CUMSUM",
            Func::CumSumY => "CUMSUM_Y",
            Func::CumProd => "CUMPROD",
            Func::CumProdY => "CUMPROD_Y",
            Func::PrevSum => "PREVSUM",
            Func::PrevVal => "PREVVAL",
            Func::Shift => "SHIFT",
            Func::Count => "COUNT",
        }
    }

    /// One of the eight time-aware array operators, which need per-period
    /// evaluation rather than a single elementwise pass.
    pub fn is_array_op(self) -> bool {
        matches!(
            self,
            Func::CumSum
                | Func::CumSumY
                | Func::CumProd
                | Func::CumProdY
                | Func::PrevSum
                | Func::PrevVal
                | Func::Shift
                | Func::Count
        )
    }

    /// `SHIFT`/`PREVSUM`/`PREVVAL` read an earlier period of their argument.
    /// References inside their argument are soft dependencies: they need
    /// not be fully evaluated before this formula runs, only far enough
    /// back in time. See the scheduler for how this relaxes hard cycles.
    pub fn is_lag_scope(self) -> bool {
        matches!(self, Func::Shift | Func::PrevSum | Func::PrevVal)
    }

    /// Fixed arity, or a `Range` for `ROUND`'s optional decimal-places
    /// argument. `AND`/`OR` are strictly binary in this grammar, matching
    /// the literal call syntax rather than the n-ary spreadsheet convention.
    pub fn arity(self) -> Arity {
        match self {
            Func::If => Arity::Exact(3),
            Func::And | Func::Or => Arity::Exact(2),
            Func::Not | Func::Abs => Arity::Exact(1),
            Func::Min | Func::Max => Arity::Exact(2),
            Func::Round => Arity::Range(1, 2),
            Func::CumSum | Func::CumSumY | Func::CumProd | Func::CumProdY => Arity::Exact(1),
            Func::PrevSum | Func::PrevVal | Func::Count => Arity::Exact(1),
            Func::Shift => Arity::Exact(2),
        }
    }

    pub fn check_arity(self, got: usize) -> Result<(), String> {
        let ok = match self.arity() {
            Arity::Exact(n) => got == n,
            Arity::Range(lo, hi) => (lo..=hi).contains(&got),
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "{} expects {}, got {got}",
                self.name(),
                self.arity()
            ))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Range(usize, usize),
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n} argument(s)"),
            Arity::Range(lo, hi) => write!(f, "{lo} to {hi} argument(s)"),
        }
    }
}

/// A parsed formula expression. Reference names are kept as raw strings at
/// this layer; the evaluator resolves them against the reference map, so
/// the parser stays free of any notion of periods, timelines or modules.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
    Number(f64),
    Reference(String),
    Unary {
        op: UnaryOp,
        expr: Box<AstNode>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<AstNode>,
        rhs: Box<AstNode>,
    },
    Call {
        func: Func,
        args: CallArgs,
    },
}

impl AstNode {
    /// References that appear inside the lag scope of a `SHIFT`/`PREVSUM`/
    /// `PREVVAL` call are collected separately from ordinary ("hard")
    /// references. `hard` and `soft` are disjoint: a reference is hard
    /// unless every path to it from the root passes through a lag scope.
    pub fn collect_refs(&self, hard: &mut Vec<String>, soft: &mut Vec<String>) {
        self.collect_refs_inner(false, hard, soft);
    }

    fn collect_refs_inner(&self, in_lag_scope: bool, hard: &mut Vec<String>, soft: &mut Vec<String>) {
        match self {
            AstNode::Number(_) => {}
            AstNode::Reference(name) => {
                if in_lag_scope {
                    soft.push(name.clone());
                } else {
                    hard.push(name.clone());
                }
            }
            AstNode::Unary { expr, .. } => expr.collect_refs_inner(in_lag_scope, hard, soft),
            AstNode::Binary { lhs, rhs, .. } => {
                lhs.collect_refs_inner(in_lag_scope, hard, soft);
                rhs.collect_refs_inner(in_lag_scope, hard, soft);
            }
            AstNode::Call { func, args } => {
                let nested = in_lag_scope || func.is_lag_scope();
                for (i, arg) in args.iter().enumerate() {
                    // SHIFT's second argument is the lag count, a literal,
                    // never a reference scope in practice, but treat it
                    // uniformly: only the first argument carries the array.
                    let scope = if *func == Func::Shift && i > 0 {
                        in_lag_scope
                    } else {
                        nested
                    };
                    arg.collect_refs_inner(scope, hard, soft);
                }
            }
        }
    }
}
