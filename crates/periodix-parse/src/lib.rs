//! Tokenizer, AST and recursive-descent parser for the formula language
//! evaluated by `periodix-eval`. This crate has no notion of periods,
//! timelines or reference resolution: it only turns a formula string into
//! an [`ast::AstNode`] tree, validating function names and arities along
//! the way.

pub mod ast;
pub mod parser;
pub mod tokenizer;

pub use ast::{Arity, AstNode, BinaryOp, CallArgs, Func, UnaryOp};
pub use parser::{Parser, ParserError};
pub use tokenizer::{Token, TokenizerError, Tokenizer};
