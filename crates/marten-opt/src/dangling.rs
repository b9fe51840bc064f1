//! Dangling-reference repair.
//!
//! Tightening a qualifier to the null type leaves field and method
//! references that can only ever dereference null. This traversal runs after
//! each tightening round and normalizes them onto the program's null-field
//! and null-method sentinels, which downstream passes lower into explicit
//! faults. While it is here it also strips side-effect-free instance
//! qualifiers from references to static members.

use marten_identity::ExprId;
use marten_ir::walk::{self, VisitMut};
use marten_ir::{CallExpr, Expr, Program, RefType};

/// Repair every dangling reference in the program.
pub fn fix_dangling_refs(program: &mut Program) {
    let mut fixer = FixDanglingRefs;
    for field in program.field_ids() {
        if let Some(init) = program.field(field).initializer {
            walk::walk_expr_mut(program, init, &mut fixer);
        }
    }
    for method in program.method_ids() {
        walk::walk_method_mut(program, method, &mut fixer);
    }
}

struct FixDanglingRefs;

impl FixDanglingRefs {
    fn fix_field_ref(&mut self, program: &mut Program, id: ExprId) {
        let Expr::FieldRef { instance, field } = program.expr(id).clone() else {
            return;
        };
        let is_static = program.field(field).is_static;
        if is_static {
            // A static reference needs no qualifier; keep one only for its
            // effects.
            if let Some(inst) = instance
                && !program.has_side_effects(inst)
            {
                program.replace_expr(id, Expr::FieldRef {
                    instance: None,
                    field,
                });
            }
        } else if let Some(inst) = instance
            && program.expr_type(inst).as_ref_type() == Some(RefType::Null)
        {
            let qualifier = if program.has_side_effects(inst) {
                inst
            } else {
                program.null_literal()
            };
            let null_field = program.null_field();
            program.replace_expr(id, Expr::FieldRef {
                instance: Some(qualifier),
                field: null_field,
            });
        }
    }

    fn fix_call(&mut self, program: &mut Program, id: ExprId) {
        let Expr::Call(call) = program.expr(id).clone() else {
            return;
        };
        let is_static = program.method(call.target).is_static;
        let is_forwarder = program.is_static_forwarder(call.target);

        if is_static && !is_forwarder {
            if let Some(inst) = call.instance
                && !program.has_side_effects(inst)
            {
                program.replace_expr(
                    id,
                    Expr::Call(CallExpr {
                        instance: None,
                        target: call.target,
                        args: call.args,
                        polymorphic: false,
                    }),
                );
            }
        } else if !is_static {
            if let Some(inst) = call.instance
                && program.expr_type(inst).as_ref_type() == Some(RefType::Null)
            {
                self.retarget_to_null_method(program, id, inst);
            }
        } else if let Some(&receiver) = call.args.first()
            && program
                .method(call.target)
                .params
                .first()
                .is_some_and(|&p| program.param(p).is_this)
            && program.expr_type(receiver).as_ref_type() == Some(RefType::Null)
        {
            // A forwarder call through a null receiver argument.
            self.retarget_to_null_method(program, id, receiver);
        }
    }

    /// Bind a null-receiver invocation to the null-method sentinel. The
    /// receiver survives only for its effects; arguments are dropped.
    fn retarget_to_null_method(&mut self, program: &mut Program, id: ExprId, receiver: ExprId) {
        let receiver = if program.has_side_effects(receiver) {
            receiver
        } else {
            program.null_literal()
        };
        let null_method = program.null_method();
        program.replace_expr(
            id,
            Expr::Call(CallExpr {
                instance: Some(receiver),
                target: null_method,
                args: vec![],
                polymorphic: false,
            }),
        );
    }
}

impl VisitMut for FixDanglingRefs {
    fn expr(&mut self, program: &mut Program, id: ExprId) {
        if matches!(program.expr(id), Expr::FieldRef { .. }) {
            self.fix_field_ref(program, id);
        } else if matches!(program.expr(id), Expr::Call(_)) {
            self.fix_call(program, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marten_ir::{Block, MethodBody, PrimType, Stmt, Type};

    #[test]
    fn pure_qualifier_on_static_field_is_dropped() {
        let mut program = Program::new();
        let class = program.add_class("Config", None, false);
        let field = program.add_field(class, "instance_count", Type::Prim(PrimType::I32));
        program.field_mut(field).is_static = true;
        let method = program.add_method(class, "read", Type::Prim(PrimType::I32));
        let local = program.add_local(method, "c", Type::instance(class));

        let qualifier = program.alloc_expr(Expr::LocalRef(local));
        let field_ref = program.alloc_expr(Expr::FieldRef {
            instance: Some(qualifier),
            field,
        });
        program.method_mut(method).body =
            MethodBody::Block(Block::new(vec![Stmt::Return(Some(field_ref))]));

        fix_dangling_refs(&mut program);
        assert_eq!(
            program.expr(field_ref),
            &Expr::FieldRef {
                instance: None,
                field
            }
        );
    }

    #[test]
    fn effectful_qualifier_on_static_field_is_kept() {
        let mut program = Program::new();
        let class = program.add_class("Config", None, false);
        let field = program.add_field(class, "instance_count", Type::Prim(PrimType::I32));
        program.field_mut(field).is_static = true;
        let factory = program.add_method(class, "get", Type::instance(class));
        let method = program.add_method(class, "read", Type::Prim(PrimType::I32));

        let qualifier = program.alloc_expr(Expr::Call(CallExpr {
            instance: None,
            target: factory,
            args: vec![],
            polymorphic: false,
        }));
        let field_ref = program.alloc_expr(Expr::FieldRef {
            instance: Some(qualifier),
            field,
        });
        program.method_mut(method).body =
            MethodBody::Block(Block::new(vec![Stmt::Return(Some(field_ref))]));

        fix_dangling_refs(&mut program);
        assert_eq!(
            program.expr(field_ref),
            &Expr::FieldRef {
                instance: Some(qualifier),
                field
            }
        );
    }

    #[test]
    fn null_qualified_field_read_binds_to_null_field() {
        let mut program = Program::new();
        let class = program.add_class("Node", None, false);
        let field = program.add_field(class, "next", Type::instance(class));
        let method = program.add_method(class, "peek", Type::instance(class));
        let local = program.add_local(method, "n", Type::NULL);

        let qualifier = program.alloc_expr(Expr::LocalRef(local));
        let field_ref = program.alloc_expr(Expr::FieldRef {
            instance: Some(qualifier),
            field,
        });
        program.method_mut(method).body =
            MethodBody::Block(Block::new(vec![Stmt::Return(Some(field_ref))]));

        fix_dangling_refs(&mut program);
        let Expr::FieldRef { instance, field } = program.expr(field_ref) else {
            panic!("field ref replaced with non-field-ref");
        };
        assert_eq!(*field, program.null_field());
        assert_eq!(program.expr(instance.unwrap()), &Expr::NullLit);
    }

    #[test]
    fn null_receiver_call_binds_to_null_method() {
        let mut program = Program::new();
        let class = program.add_class("Widget", None, false);
        let target = program.add_method(class, "refresh", Type::Prim(PrimType::Void));
        program.add_param(target, "force", Type::Prim(PrimType::Bool));
        let method = program.add_method(class, "drive", Type::Prim(PrimType::Void));
        let local = program.add_local(method, "w", Type::NULL);

        let receiver = program.alloc_expr(Expr::LocalRef(local));
        let arg = program.bool_literal(true);
        let call = program.alloc_expr(Expr::Call(CallExpr {
            instance: Some(receiver),
            target,
            args: vec![arg],
            polymorphic: true,
        }));
        program.method_mut(method).body =
            MethodBody::Block(Block::new(vec![Stmt::Expr(call)]));

        fix_dangling_refs(&mut program);
        let Expr::Call(fixed) = program.expr(call) else {
            panic!("call replaced with non-call");
        };
        assert_eq!(fixed.target, program.null_method());
        assert!(fixed.args.is_empty());
        assert!(!fixed.polymorphic);
        assert_eq!(program.expr(fixed.instance.unwrap()), &Expr::NullLit);
    }

    #[test]
    fn forwarder_call_with_null_receiver_argument_binds_to_null_method() {
        let mut program = Program::new();
        let class = program.add_class("Widget", None, false);
        let instance_method = program.add_method(class, "refresh", Type::Prim(PrimType::Void));
        let forwarder = program.add_method(class, "refresh$", Type::Prim(PrimType::Void));
        program.method_mut(forwarder).is_static = true;
        program.method_mut(forwarder).forwards_for = Some(instance_method);
        program.add_this_param(forwarder, Type::instance(class));

        let method = program.add_method(class, "drive", Type::Prim(PrimType::Void));
        let null_receiver = program.null_literal();
        let call = program.alloc_expr(Expr::Call(CallExpr {
            instance: None,
            target: forwarder,
            args: vec![null_receiver],
            polymorphic: false,
        }));
        program.method_mut(method).body =
            MethodBody::Block(Block::new(vec![Stmt::Expr(call)]));

        fix_dangling_refs(&mut program);
        let Expr::Call(fixed) = program.expr(call) else {
            panic!("call replaced with non-call");
        };
        assert_eq!(fixed.target, program.null_method());
        assert!(fixed.args.is_empty());
    }

    #[test]
    fn healthy_references_are_untouched() {
        let mut program = Program::new();
        let class = program.add_class("Widget", None, false);
        let field = program.add_field(class, "next", Type::instance(class));
        let target = program.add_method(class, "refresh", Type::Prim(PrimType::Void));
        let method = program.add_method(class, "drive", Type::Prim(PrimType::Void));
        let local = program.add_local(method, "w", Type::instance(class));

        let q1 = program.alloc_expr(Expr::LocalRef(local));
        let field_ref = program.alloc_expr(Expr::FieldRef {
            instance: Some(q1),
            field,
        });
        let q2 = program.alloc_expr(Expr::LocalRef(local));
        let call = program.alloc_expr(Expr::Call(CallExpr {
            instance: Some(q2),
            target,
            args: vec![],
            polymorphic: true,
        }));
        program.method_mut(method).body = MethodBody::Block(Block::new(vec![
            Stmt::Expr(field_ref),
            Stmt::Expr(call),
        ]));

        let before_field = program.expr(field_ref).clone();
        let before_call = program.expr(call).clone();
        fix_dangling_refs(&mut program);
        assert_eq!(program.expr(field_ref), &before_field);
        assert_eq!(program.expr(call), &before_call);
    }
}
