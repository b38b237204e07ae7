//! Formulator procedure language
//!
//! Derived concepts are computed by short, user- or model-authored
//! *procedures*: one callable expression mapping the parent values of a row to
//! a single output value, e.g.
//!
//! ```text
//! row => row.price * row.qty
//! (first, last) => `${first} ${last}`.trim()
//! function (score) { if (score >= 90) return "A"; return "B"; }
//! ```
//!
//! This crate provides:
//! - a tokenizer (`lexer`, nom-based) and parser (`parser`) producing a typed
//!   AST (`ast`),
//! - a sandboxed interpreter (`eval`) that sees only the row tuple, has no I/O,
//!   and runs under a step budget,
//! - stable FNV-1a digests (`digest`) used for candidate de-duplication and
//!   preview fingerprints.
//!
//! The language deliberately has no loops and no recursion: a procedure is a
//! field-to-field row mapping, nothing more.

pub mod ast;
pub mod digest;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod value;

pub use ast::{Binding, Procedure};
pub use digest::{procedure_digest, Fingerprint};
pub use eval::{EvalError, DEFAULT_STEP_BUDGET, MAX_STRING_LEN};
pub use parser::{parse_procedure, ParseError};
pub use value::{parse_date, Value};
