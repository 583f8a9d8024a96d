//! Error representation for formula parsing and evaluation.
//!
//! - **`ErrorKind`**   : the canonical set of engine error codes
//! - **`ErrorContext`**: lightweight location info (which reference, which period)
//! - **`EngineError`** : one struct that glues the two together
//!
//! Formula errors never abort a run (see the scheduler): a failing node's
//! array becomes zeros and the message is recorded in `Engine::errors`.
//! `EngineError` is the value that ends up in that map.

use std::{error::Error, fmt};

/// The canonical error codes this engine can surface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Tokenizer/parser rejected a formula string.
    Parse,
    /// A parsed formula failed during evaluation (bad arity, non-finite rescue, etc).
    Eval,
    /// A hard dependency cycle that cluster contraction could not resolve.
    Cycle,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Parse => "#PARSE!",
            Self::Eval => "#EVAL!",
            Self::Cycle => "#CYCLE!",
        })
    }
}

/// Where an error occurred, when known.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ErrorContext {
    /// The reference (e.g. `R12`) whose formula produced the error.
    pub reference: Option<String>,
    /// Character offset into the formula string, for parse errors.
    pub position: Option<usize>,
}

/// The single struct passed around for any engine failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
    pub context: ErrorContext,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn eval(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Eval, message)
    }

    pub fn cycle(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cycle, message)
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.context.reference = Some(reference.into());
        self
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.context.position = Some(position);
        self
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(ref r) = self.context.reference {
            write!(f, " [{r}]")?;
        }
        if let Some(p) = self.context.position {
            write!(f, " (at {p})")?;
        }
        Ok(())
    }
}

impl Error for EngineError {}
