//! Reference map builder, interpreter, dependency scheduler, cluster
//! evaluator, module solvers and the top-level [`Engine`] for the
//! Periodix time-series formula engine.

pub mod cluster;
#[cfg(feature = "serde")]
pub mod docs;
#[cfg(feature = "serde")]
pub mod engine;
pub mod interpreter;
#[cfg(feature = "serde")]
pub mod modules;
pub mod refmap;
pub mod scheduler;
pub mod timeline;

#[cfg(feature = "serde")]
pub use engine::{Engine, OverrideValue};
pub use interpreter::{eval_at_period, eval_series, round_half_away_from_zero, Resolver};
pub use refmap::{build_reference_map, ReferenceMap};
pub use scheduler::{build_schedule, CalcNode, Cluster, NodeId, Schedule};
pub use timeline::{Timeline, YearMonth};
