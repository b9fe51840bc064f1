// src/lib.rs
//! Whole-program type tightening for the marten IR.
//!
//! Facade over the workspace crates: [`ir`] defines the program
//! representation, [`opt`] the type oracle and the tightening pass itself.
//! The single entry point is [`opt::run`], which mutates the program in
//! place and reports whether anything changed.

pub use marten_identity as identity;
pub use marten_ir as ir;
pub use marten_opt as opt;
