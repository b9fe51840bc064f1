//! Post-order traversal over method bodies.
//!
//! Expressions are delivered children-first, so a handler always observes
//! operand types that already reflect any rewrite made below it. The mutable
//! walker hands the handler `&mut Program` together with the current node's
//! ID; replacing the current node is `program.replace_expr(id, ...)`.
//! Statement structure is never rewritten by handlers, so bodies are moved
//! out with `mem::take` for the duration of a mutable walk and restored
//! afterwards.

use marten_identity::{ExprId, MethodId};

use crate::program::Program;
use crate::stmt::{Block, MethodBody, Stmt};

/// Read-only handler. Statements are delivered after the expressions they
/// contain, matching the expression post-order.
pub trait Visit {
    fn expr(&mut self, _program: &Program, _id: ExprId) {}
    fn stmt(&mut self, _program: &Program, _stmt: &Stmt) {}
}

/// Mutating handler.
pub trait VisitMut {
    fn expr(&mut self, _program: &mut Program, _id: ExprId) {}
}

pub fn walk_expr<V: Visit>(program: &Program, id: ExprId, v: &mut V) {
    for child in program.expr(id).child_ids() {
        walk_expr(program, child, v);
    }
    v.expr(program, id);
}

pub fn walk_block<V: Visit>(program: &Program, block: &Block, v: &mut V) {
    for stmt in &block.stmts {
        walk_stmt(program, stmt, v);
    }
}

pub fn walk_stmt<V: Visit>(program: &Program, stmt: &Stmt, v: &mut V) {
    match stmt {
        Stmt::Expr(e) => walk_expr(program, *e, v),
        Stmt::Decl { init, .. } => {
            if let Some(init) = init {
                walk_expr(program, *init, v);
            }
        }
        Stmt::Return(expr) => {
            if let Some(expr) = expr {
                walk_expr(program, *expr, v);
            }
        }
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            walk_expr(program, *cond, v);
            walk_block(program, then, v);
            if let Some(otherwise) = otherwise {
                walk_block(program, otherwise, v);
            }
        }
        Stmt::While { cond, body } => {
            walk_expr(program, *cond, v);
            walk_block(program, body, v);
        }
        Stmt::Try {
            body,
            catches,
            finally,
        } => {
            walk_block(program, body, v);
            for clause in catches {
                walk_block(program, &clause.body, v);
            }
            if let Some(finally) = finally {
                walk_block(program, finally, v);
            }
        }
        Stmt::Block(block) => walk_block(program, block, v),
    }
    v.stmt(program, stmt);
}

/// Walk a method's block body, if it has one. Foreign bodies are opaque and
/// are not walked; callers that care about them inspect
/// [`MethodBody::Foreign`] directly.
pub fn walk_method<V: Visit>(program: &Program, method: MethodId, v: &mut V) {
    if let MethodBody::Block(block) = &program.method(method).body {
        walk_block(program, block, v);
    }
}

pub fn walk_expr_mut<V: VisitMut>(program: &mut Program, id: ExprId, v: &mut V) {
    for child in program.expr(id).child_ids() {
        walk_expr_mut(program, child, v);
    }
    v.expr(program, id);
}

pub fn walk_block_mut<V: VisitMut>(program: &mut Program, block: &Block, v: &mut V) {
    for stmt in &block.stmts {
        walk_stmt_mut(program, stmt, v);
    }
}

pub fn walk_stmt_mut<V: VisitMut>(program: &mut Program, stmt: &Stmt, v: &mut V) {
    match stmt {
        Stmt::Expr(e) => walk_expr_mut(program, *e, v),
        Stmt::Decl { init, .. } => {
            if let Some(init) = init {
                walk_expr_mut(program, *init, v);
            }
        }
        Stmt::Return(expr) => {
            if let Some(expr) = expr {
                walk_expr_mut(program, *expr, v);
            }
        }
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            walk_expr_mut(program, *cond, v);
            walk_block_mut(program, then, v);
            if let Some(otherwise) = otherwise {
                walk_block_mut(program, otherwise, v);
            }
        }
        Stmt::While { cond, body } => {
            walk_expr_mut(program, *cond, v);
            walk_block_mut(program, body, v);
        }
        Stmt::Try {
            body,
            catches,
            finally,
        } => {
            walk_block_mut(program, body, v);
            for clause in catches {
                walk_block_mut(program, &clause.body, v);
            }
            if let Some(finally) = finally {
                walk_block_mut(program, finally, v);
            }
        }
        Stmt::Block(block) => walk_block_mut(program, block, v),
    }
}

/// Walk a method's block body mutably. The body is taken out of the method
/// for the duration of the walk; handlers rewrite expression contents by ID,
/// never statement structure, so it goes back unchanged.
pub fn walk_method_mut<V: VisitMut>(program: &mut Program, method: MethodId, v: &mut V) {
    let body = std::mem::take(&mut program.method_mut(method).body);
    if let MethodBody::Block(block) = &body {
        walk_block_mut(program, block, v);
    }
    program.method_mut(method).body = body;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{BinaryOp, Expr};
    use crate::types::{PrimType, Type};

    struct Collector {
        order: Vec<ExprId>,
    }

    impl Visit for Collector {
        fn expr(&mut self, _program: &Program, id: ExprId) {
            self.order.push(id);
        }
    }

    #[test]
    fn expressions_are_post_order() {
        let mut program = Program::new();
        let class = program.add_class("Widget", None, false);
        let method = program.add_method(class, "run", Type::Prim(PrimType::Void));
        let local = program.add_local(method, "x", Type::instance(class));

        let lhs = program.alloc_expr(Expr::LocalRef(local));
        let rhs = program.null_literal();
        let assign = program.alloc_expr(Expr::Binary {
            op: BinaryOp::Assign,
            lhs,
            rhs,
        });
        program.method_mut(method).body = MethodBody::Block(Block::new(vec![
            Stmt::Decl {
                local,
                init: None,
            },
            Stmt::Expr(assign),
        ]));

        let mut collector = Collector { order: Vec::new() };
        walk_method(&program, method, &mut collector);
        assert_eq!(collector.order, vec![lhs, rhs, assign]);
    }

    struct Rewriter;

    impl VisitMut for Rewriter {
        fn expr(&mut self, program: &mut Program, id: ExprId) {
            if matches!(program.expr(id), Expr::NullLit) {
                program.replace_expr(id, Expr::BoolLit(true));
            }
        }
    }

    #[test]
    fn mutable_walk_restores_body() {
        let mut program = Program::new();
        let class = program.add_class("Widget", None, false);
        let method = program.add_method(class, "run", Type::Prim(PrimType::Void));
        let lit = program.null_literal();
        program.method_mut(method).body =
            MethodBody::Block(Block::new(vec![Stmt::Expr(lit)]));

        walk_method_mut(&mut program, method, &mut Rewriter);

        assert_eq!(program.expr(lit), &Expr::BoolLit(true));
        assert!(matches!(program.method(method).body, MethodBody::Block(_)));
    }
}
