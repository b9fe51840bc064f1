//! The tightening traversal.
//!
//! Uses the recorded type flow to shrink the declared type of every field,
//! local, parameter, and method return slot to the most specific supertype
//! of everything that can actually flow into it, and simplifies casts,
//! instance-of tests, and calls whose outcome that determines. One round
//! visits everything once; the driver re-runs rounds until nothing changes,
//! because each tightened slot can unlock its dependents.

use marten_identity::{ExprId, MethodId, TypeDefId};
use marten_ir::walk::{self, VisitMut};
use marten_ir::{BinaryOp, Expr, Program, RefType, Type};
use smallvec::SmallVec;

use crate::flow::{Slot, TypeFlow};
use crate::oracle::TypeOracle;

/// Run one tightening round over the whole program. Returns whether
/// anything changed.
pub fn tighten_round(program: &mut Program, oracle: &TypeOracle, flow: &TypeFlow) -> bool {
    let mut tightener = Tightener {
        oracle,
        flow,
        did_change: false,
    };
    tightener.run(program);
    tightener.did_change
}

struct Tightener<'a> {
    oracle: &'a TypeOracle,
    flow: &'a TypeFlow,
    did_change: bool,
}

impl Tightener<'_> {
    fn run(&mut self, program: &mut Program) {
        for ty in program.type_ids() {
            // Types reserved by the code generator are off limits.
            if program.codegen_types.contains(&ty) {
                continue;
            }
            for field in program.type_def(ty).fields.clone() {
                if let Some(init) = program.field(field).initializer {
                    walk::walk_expr_mut(program, init, self);
                }
                if !program.field(field).is_volatile {
                    self.tighten_slot(program, Slot::Field(field));
                }
            }
            for method in program.type_def(ty).methods.clone() {
                if program.method(method).is_native {
                    // No inference inside a native method; its return slot
                    // still tightens on instantiability and domination.
                    self.tighten_method_return(program, method);
                    continue;
                }
                walk::walk_method_mut(program, method, self);
                for param in program.method(method).params.clone() {
                    self.tighten_slot(program, Slot::Param(param));
                }
                for local in program.method(method).locals.clone() {
                    self.tighten_slot(program, Slot::Local(local));
                }
                self.tighten_method_return(program, method);
            }
        }
    }

    /// For an abstract type, the unique instantiated concrete implementor,
    /// if there is exactly one.
    fn single_concrete_type(&self, program: &Program, ty: TypeDefId) -> Option<TypeDefId> {
        if !program.type_def(ty).is_abstract {
            return None;
        }
        let mut found = None;
        for &class in self.flow.implementors(ty)? {
            if program.type_def(class).is_abstract {
                continue;
            }
            if found.is_some() {
                return None;
            }
            found = Some(class);
        }
        found
    }

    /// The unique concrete override of `method`, when its enclosing type is
    /// dominated by a single concrete implementor.
    fn single_concrete_method(&self, program: &Program, method: MethodId) -> Option<MethodId> {
        self.single_concrete_type(program, program.method(method).owner)?;
        let mut found = None;
        for &overrider in self.flow.overriders(method)? {
            if program.method(overrider).is_abstract {
                continue;
            }
            if found.is_some() {
                return None;
            }
            found = Some(overrider);
        }
        found
    }

    fn slot_type(program: &Program, slot: Slot) -> Type {
        match slot {
            Slot::Field(f) => program.field(f).ty,
            Slot::Local(l) => program.local(l).ty,
            Slot::Param(p) => program.param(p).ty,
        }
    }

    fn set_slot_type(&mut self, program: &mut Program, slot: Slot, ty: Type) {
        tracing::trace!(?slot, to = %program.display_type(ty), "tighten");
        match slot {
            Slot::Field(f) => program.field_mut(f).ty = ty,
            Slot::Local(l) => program.local_mut(l).ty = ty,
            Slot::Param(p) => program.param_mut(p).ty = ty,
        }
        self.did_change = true;
    }

    /// Tighten one variable slot from its recorded flow.
    fn tighten_slot(&mut self, program: &mut Program, slot: Slot) {
        let Some(declared) = Self::slot_type(program, slot).as_ref_type() else {
            return;
        };
        let RefType::Instance(declared_def) = declared else {
            return; // already at the bottom
        };

        // Nothing can ever inhabit the slot.
        if !self.oracle.is_instantiated(declared) {
            self.set_slot_type(program, slot, Type::NULL);
            return;
        }

        // An abstract declaration dominated by one concrete class is that
        // class.
        if let Some(class) = self.single_concrete_type(program, declared_def) {
            self.set_slot_type(program, slot, Type::instance(class));
            return;
        }

        let is_param = matches!(slot, Slot::Param(_));
        let mut candidates: SmallVec<[RefType; 8]> = SmallVec::new();

        // Assume one null assignment for non-parameters: if nothing else
        // flows in, the slot degenerates to null, and otherwise null always
        // loses the join. A parameter with no recorded flow is dead and is
        // left for pruning instead.
        if !is_param {
            candidates.push(RefType::Null);
        }

        if let Some(assignments) = self.flow.assignments(slot) {
            for &expr in assignments {
                let Some(r) = program.expr_type(expr).as_ref_type() else {
                    return; // something fishy flowed in, leave the slot alone
                };
                candidates.push(r);
            }
        }

        if self.flow.is_pinned(slot) {
            // A pinned slot can never generalize below its own declaration.
            candidates.push(declared);
        }

        if let Slot::Param(param) = slot
            && let Some(up_refs) = self.flow.param_up_refs(param)
        {
            for &up in up_refs {
                let Some(r) = program.param(up).ty.as_ref_type() else {
                    return;
                };
                candidates.push(r);
            }
        }

        if candidates.is_empty() {
            return;
        }
        let Some(general) = self.oracle.generalize(candidates.iter().copied()) else {
            return;
        };
        let result = self.oracle.stronger(declared, general);
        if result != declared {
            self.set_slot_type(program, slot, Type::Ref(result));
        }
    }

    /// Tighten a method's return slot from recorded returns and overriders.
    fn tighten_method_return(&mut self, program: &mut Program, method: MethodId) {
        let def = program.method(method);
        let is_native = def.is_native;
        let Some(declared) = def.return_type.as_ref_type() else {
            return;
        };
        let RefType::Instance(declared_def) = declared else {
            return;
        };

        if !self.oracle.is_instantiated(declared) {
            program.method_mut(method).return_type = Type::NULL;
            self.did_change = true;
            return;
        }

        if let Some(class) = self.single_concrete_type(program, declared_def) {
            program.method_mut(method).return_type = Type::instance(class);
            self.did_change = true;
        }

        // A native return type only benefits from the two checks above.
        if is_native {
            return;
        }

        let mut candidates: SmallVec<[RefType; 8]> = SmallVec::new();
        candidates.push(RefType::Null);
        if let Some(returns) = self.flow.returns(method) {
            for &expr in returns {
                let Some(r) = program.expr_type(expr).as_ref_type() else {
                    return;
                };
                candidates.push(r);
            }
        }
        if let Some(overriders) = self.flow.overriders(method) {
            for &overrider in overriders {
                let Some(r) = program.method(overrider).return_type.as_ref_type() else {
                    return;
                };
                candidates.push(r);
            }
        }

        let Some(general) = self.oracle.generalize(candidates.iter().copied()) else {
            return;
        };
        let result = self.oracle.stronger(declared, general);
        if result != declared {
            program.method_mut(method).return_type = Type::Ref(result);
            self.did_change = true;
        }
    }

    /// Simplify a cast whose outcome the hierarchy already decides.
    fn visit_cast(&mut self, program: &mut Program, id: ExprId) {
        let Expr::Cast {
            target,
            expr: inner,
        } = program.expr(id).clone()
        else {
            return;
        };
        let Some(to) = target.as_ref_type() else {
            return;
        };
        let Some(from) = program.expr_type(inner).as_ref_type() else {
            return;
        };

        if self.oracle.can_trivially_cast(from, to) {
            // The check can never fail; the cast is the operand.
            let replacement = program.expr(inner).clone();
            program.replace_expr(id, replacement);
            self.did_change = true;
        } else if !self.oracle.is_instantiated(to)
            || !self.oracle.can_theoretically_cast(from, to)
        {
            // The check can never succeed; downstream lowers a cast to the
            // null type into a guaranteed-null value.
            program.replace_expr(
                id,
                Expr::Cast {
                    target: Type::NULL,
                    expr: inner,
                },
            );
            self.did_change = true;
        } else if let RefType::Instance(to_def) = to
            && let Some(class) = self.single_concrete_type(program, to_def)
        {
            program.replace_expr(
                id,
                Expr::Cast {
                    target: Type::instance(class),
                    expr: inner,
                },
            );
            self.did_change = true;
        }
    }

    /// Simplify an instance-of test whose outcome the hierarchy already
    /// decides.
    fn visit_instance_of(&mut self, program: &mut Program, id: ExprId) {
        let Expr::InstanceOf {
            target,
            expr: inner,
        } = program.expr(id).clone()
        else {
            return;
        };
        let Some(from) = program.expr_type(inner).as_ref_type() else {
            return;
        };
        let to = RefType::Instance(target);

        if from == RefType::Null {
            // null is never an instance of anything
            program.replace_expr(id, Expr::BoolLit(false));
            self.did_change = true;
        } else if self.oracle.can_trivially_cast(from, to) {
            // Only nullness remains to be tested.
            let null = program.null_literal();
            program.replace_expr(
                id,
                Expr::Binary {
                    op: BinaryOp::Neq,
                    lhs: inner,
                    rhs: null,
                },
            );
            self.did_change = true;
        } else if !self.oracle.is_instantiated(to)
            || !self.oracle.can_theoretically_cast(from, to)
        {
            program.replace_expr(id, Expr::BoolLit(false));
            self.did_change = true;
        } else if let Some(class) = self.single_concrete_type(program, target) {
            program.replace_expr(
                id,
                Expr::InstanceOf {
                    target: class,
                    expr: inner,
                },
            );
            self.did_change = true;
        }
    }

    /// Devirtualize a call through a dominated type and strip the
    /// polymorphic flag when dispatch cannot actually vary.
    fn visit_call(&mut self, program: &mut Program, id: ExprId) {
        let Expr::Call(mut call) = program.expr(id).clone() else {
            return;
        };

        if let Some(concrete) = self.single_concrete_method(program, call.target) {
            call.target = concrete;
            program.replace_expr(id, Expr::Call(call.clone()));
            self.did_change = true;
        }

        if !call.polymorphic {
            return;
        }
        let Some(instance) = call.instance else {
            return;
        };
        let Some(instance_ty) = program.expr_type(instance).as_ref_type() else {
            return;
        };
        let truly_polymorphic = self.flow.overriders(call.target).is_some_and(|overriders| {
            overriders.iter().any(|&overrider| {
                let owner = program.method(overrider).owner;
                self.oracle
                    .can_theoretically_cast(instance_ty, RefType::Instance(owner))
            })
        });
        if !truly_polymorphic {
            call.polymorphic = false;
            program.replace_expr(id, Expr::Call(call));
            self.did_change = true;
        }
    }
}

impl VisitMut for Tightener<'_> {
    fn expr(&mut self, program: &mut Program, id: ExprId) {
        if matches!(program.expr(id), Expr::Cast { .. }) {
            self.visit_cast(program, id);
        } else if matches!(program.expr(id), Expr::InstanceOf { .. }) {
            self.visit_instance_of(program, id);
        } else if matches!(program.expr(id), Expr::Call(_)) {
            self.visit_call(program, id);
        }
    }
}
