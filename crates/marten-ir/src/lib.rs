//! Program IR for the marten whole-program optimizer.
//!
//! A fully-linked, post-resolution representation of a class-based,
//! nominally-typed, single-inheritance object language with interfaces,
//! null, and primitives. Definitions live in `Vec`-indexed tables on
//! [`Program`]; expressions live in an arena addressed by stable
//! [`ExprId`]s, which is what makes identity-keyed flow relations cheap and
//! rewrite-proof.

pub mod errors;
pub mod expr;
pub mod program;
pub mod stmt;
pub mod types;
pub mod walk;

pub use errors::IrError;
pub use expr::{BinaryOp, CallExpr, Expr};
pub use program::{FieldDef, LocalDef, MethodDef, ParamDef, Program, TypeDef, TypeDefKind};
pub use stmt::{Block, CatchClause, ForeignBody, ForeignFieldRef, MethodBody, Stmt};
pub use types::{PrimType, RefType, Type};

pub use marten_identity::{ExprId, FieldId, LocalId, MethodId, ParamId, TypeDefId};
