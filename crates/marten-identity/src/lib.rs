//! First-class identity types for marten IR entities.
//!
//! Every IR entity lives in a `Vec`-backed table owned by the program and is
//! addressed by one of these `u32` handles. All cross-referencing in the
//! optimizer is done through these IDs, so "identity" means table index, not
//! structural equality: two syntactically identical expressions have distinct
//! `ExprId`s and are distinct flow values.

mod entities;

pub use entities::{ExprId, FieldId, LocalId, MethodId, ParamId, TypeDefId};
