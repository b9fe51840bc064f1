//! Expression nodes.
//!
//! Expressions live in the program's arena and reference each other by
//! [`ExprId`]. A node's derived type is never stored on the node; it is
//! computed on demand by [`Program::expr_type`] from whatever the node
//! currently targets, so a reference expression always reflects the current
//! (possibly tightened) declared type of its slot.
//!
//! [`Program::expr_type`]: crate::Program::expr_type

use marten_identity::{ExprId, FieldId, LocalId, MethodId, ParamId, TypeDefId};
use smallvec::SmallVec;

use crate::types::Type;

/// Binary operators. Only the ones the optimizer can observe or produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Simple assignment; the left operand must be a variable, parameter, or
    /// field reference.
    Assign,
    Eq,
    Neq,
    And,
    Or,
    Add,
}

impl BinaryOp {
    #[must_use]
    pub fn is_assignment(self) -> bool {
        matches!(self, BinaryOp::Assign)
    }
}

/// A method call. `instance` is the receiver for instance calls, `None` for
/// static calls (a static forwarder receives its receiver as `args[0]`
/// instead). `polymorphic` marks calls whose dispatch depends on the runtime
/// type of the receiver; the tightener clears it when only one target can be
/// reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallExpr {
    pub instance: Option<ExprId>,
    pub target: MethodId,
    pub args: Vec<ExprId>,
    pub polymorphic: bool,
}

/// An expression node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    NullLit,
    BoolLit(bool),
    IntLit(i64),
    LocalRef(LocalId),
    ParamRef(ParamId),
    FieldRef {
        instance: Option<ExprId>,
        field: FieldId,
    },
    Call(CallExpr),
    New {
        class: TypeDefId,
        args: Vec<ExprId>,
    },
    Cast {
        target: Type,
        expr: ExprId,
    },
    InstanceOf {
        target: TypeDefId,
        expr: ExprId,
    },
    Binary {
        op: BinaryOp,
        lhs: ExprId,
        rhs: ExprId,
    },
}

impl Expr {
    /// Direct child expression IDs, in evaluation order. Drives the
    /// post-order walkers.
    pub fn child_ids(&self) -> SmallVec<[ExprId; 4]> {
        let mut out = SmallVec::new();
        match self {
            Expr::NullLit
            | Expr::BoolLit(_)
            | Expr::IntLit(_)
            | Expr::LocalRef(_)
            | Expr::ParamRef(_) => {}
            Expr::FieldRef { instance, .. } => out.extend(*instance),
            Expr::Call(call) => {
                out.extend(call.instance);
                out.extend_from_slice(&call.args);
            }
            Expr::New { args, .. } => out.extend_from_slice(args),
            Expr::Cast { expr, .. } | Expr::InstanceOf { expr, .. } => out.push(*expr),
            Expr::Binary { lhs, rhs, .. } => {
                out.push(*lhs);
                out.push(*rhs);
            }
        }
        out
    }
}
