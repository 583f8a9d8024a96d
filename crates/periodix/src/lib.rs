//! Meta crate that re-exports the Periodix time-series formula engine's
//! building blocks with sensible defaults. Most downstream callers only
//! need [`Engine`], the two document types it is built from, and
//! [`Series`] for reading results back out; the `common`, `parse` and
//! `eval` modules give access to the underlying crates directly for
//! deeper integration (writing a custom module solver, inspecting the
//! parsed AST, driving the scheduler by hand).

pub use periodix_common as common;
pub use periodix_eval as eval;
pub use periodix_parse as parse;

pub use periodix_common::{EngineError, ErrorContext, ErrorKind, RefKind, Series};
#[cfg(feature = "serde")]
pub use periodix_eval::engine::{Engine, OverrideValue};
#[cfg(feature = "serde")]
pub use periodix_eval::docs::{CalculationsDocument, InputsDocument, Module, ModuleInputs};
pub use periodix_eval::{Timeline, YearMonth};
pub use periodix_parse::{AstNode, Parser};
