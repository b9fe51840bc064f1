//! Type-flow recording.
//!
//! A single read-only traversal builds the five global relations the
//! tightener consumes. Variables receive type flow via assignment;
//! parameters additionally via call arguments and via the matching
//! parameters of overridden methods; method returns via their return
//! statements and their overriders. Recording runs ONCE: tightening changes
//! the types of the things related, never which things are related, so the
//! relations stay valid across every round.
//!
//! Slots the pass must never narrow below their declared type (catch
//! parameters, anything written or referenced through a foreign boundary,
//! the receiver of a static forwarder) go into `pinned` instead of the
//! original's fake self-assignment trick: a pinned slot contributes its own
//! current declared type to the candidate set during generalization, which
//! has exactly the same effect.

use marten_identity::{ExprId, FieldId, LocalId, MethodId, ParamId, TypeDefId};
use marten_ir::walk::{self, Visit};
use marten_ir::{Expr, MethodBody, Program, RefType, Stmt, TypeDefKind};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::oracle::TypeOracle;

/// A typed storage location the pass can tighten. Method return slots are
/// keyed by [`MethodId`] in their own relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Field(FieldId),
    Local(LocalId),
    Param(ParamId),
}

/// The recorded relations. Identity-keyed: arena IDs, never structural
/// equality, so two identical literals are distinct flow values.
#[derive(Default)]
pub struct TypeFlow {
    assignments: FxHashMap<Slot, FxHashSet<ExprId>>,
    returns: FxHashMap<MethodId, FxHashSet<ExprId>>,
    overriders: FxHashMap<MethodId, FxHashSet<MethodId>>,
    implementors: FxHashMap<TypeDefId, FxHashSet<TypeDefId>>,
    param_up_refs: FxHashMap<ParamId, FxHashSet<ParamId>>,
    pinned: FxHashSet<Slot>,
}

impl TypeFlow {
    /// Record type flow for the whole program.
    pub fn record(program: &Program, oracle: &TypeOracle) -> TypeFlow {
        let mut recorder = Recorder {
            program,
            oracle,
            flow: TypeFlow::default(),
            current_method: None,
        };
        recorder.record();
        recorder.flow
    }

    #[must_use]
    pub fn assignments(&self, slot: Slot) -> Option<&FxHashSet<ExprId>> {
        self.assignments.get(&slot)
    }

    #[must_use]
    pub fn returns(&self, method: MethodId) -> Option<&FxHashSet<ExprId>> {
        self.returns.get(&method)
    }

    /// Overriding methods declared in instantiated types.
    #[must_use]
    pub fn overriders(&self, method: MethodId) -> Option<&FxHashSet<MethodId>> {
        self.overriders.get(&method)
    }

    /// Instantiated classes assignable to the given class or interface.
    #[must_use]
    pub fn implementors(&self, ty: TypeDefId) -> Option<&FxHashSet<TypeDefId>> {
        self.implementors.get(&ty)
    }

    #[must_use]
    pub fn param_up_refs(&self, param: ParamId) -> Option<&FxHashSet<ParamId>> {
        self.param_up_refs.get(&param)
    }

    #[must_use]
    pub fn is_pinned(&self, slot: Slot) -> bool {
        self.pinned.contains(&slot)
    }

    fn add_assignment(&mut self, slot: Slot, expr: ExprId) {
        self.assignments.entry(slot).or_default().insert(expr);
    }

    fn add_return(&mut self, method: MethodId, expr: ExprId) {
        self.returns.entry(method).or_default().insert(expr);
    }

    fn add_overrider(&mut self, base: MethodId, overrider: MethodId) {
        self.overriders.entry(base).or_default().insert(overrider);
    }

    fn add_implementor(&mut self, target: TypeDefId, implementor: TypeDefId) {
        self.implementors
            .entry(target)
            .or_default()
            .insert(implementor);
    }

    fn add_param_up_ref(&mut self, param: ParamId, base: ParamId) {
        self.param_up_refs.entry(param).or_default().insert(base);
    }

    fn pin(&mut self, slot: Slot) {
        self.pinned.insert(slot);
    }
}

struct Recorder<'a> {
    program: &'a Program,
    oracle: &'a TypeOracle,
    flow: TypeFlow,
    current_method: Option<MethodId>,
}

impl Recorder<'_> {
    fn record(&mut self) {
        for ty in self.program.type_ids() {
            self.record_type(ty);
        }
        for field in self.program.field_ids() {
            if let Some(init) = self.program.field(field).initializer {
                walk::walk_expr(self.program, init, self);
                self.flow.add_assignment(Slot::Field(field), init);
            }
        }
        for method in self.program.method_ids() {
            self.record_method(method);
        }
    }

    /// Instantiated classes implement every type on their trivial-supertype
    /// walk: the superclass chain plus every interface reachable from it.
    fn record_type(&mut self, ty: TypeDefId) {
        let def = self.program.type_def(ty);
        if def.kind != TypeDefKind::Class || !self.oracle.is_instantiated(RefType::Instance(ty)) {
            return;
        }
        for &ancestor in self.oracle.trivial_supertypes(ty) {
            self.flow.add_implementor(ancestor, ty);
        }
    }

    fn record_method(&mut self, method: MethodId) {
        self.record_param_up_refs(method);

        self.current_method = Some(method);
        match &self.program.method(method).body {
            MethodBody::Block(block) => walk::walk_block(self.program, block, self),
            MethodBody::Foreign(foreign) => self.record_foreign(foreign),
            MethodBody::None => {}
        }
        self.current_method = None;

        // Overriders are only interesting when the overriding type can
        // actually produce instances.
        let owner = self.program.method(method).owner;
        if self.oracle.is_instantiated(RefType::Instance(owner)) {
            for &base in self.oracle.all_overrides(method) {
                self.flow.add_overrider(base, method);
            }
        }
    }

    /// A parameter cannot be tightened below the matching parameter of any
    /// method its method overrides, or instance calls through the looser
    /// declaration would break.
    fn record_param_up_refs(&mut self, method: MethodId) {
        let def = self.program.method(method);
        if !def.is_static {
            for (j, &param) in def.params.iter().enumerate() {
                for &base in self.oracle.all_overrides(method) {
                    // A count mismatch is an upstream bug; record what lines up.
                    if let Some(&base_param) = self.program.method(base).params.get(j) {
                        self.flow.add_param_up_ref(param, base_param);
                    }
                }
            }
        } else if let Some(instance) = def.forwards_for {
            // If the instance method was pruned there is nothing to couple to.
            let instance_owner = self.program.method(instance).owner;
            if !self
                .program
                .type_def(instance_owner)
                .methods
                .contains(&instance)
            {
                return;
            }
            let instance_params = &self.program.method(instance).params;
            let shape_ok = def.params.first().is_some_and(|&p| self.program.param(p).is_this)
                && def.params.len() == instance_params.len() + 1;
            if !shape_ok {
                return;
            }
            // The receiver is an implicit assignment from a `this` of the
            // looser instance type; pin it at its declaration.
            self.flow.pin(Slot::Param(def.params[0]));
            self.flow.add_param_up_ref(def.params[0], def.params[0]);
            for j in 1..def.params.len() {
                self.flow
                    .add_param_up_ref(def.params[j], instance_params[j - 1]);
            }
        }
    }

    /// Foreign code is an opaque sink: anything it can write or call keeps
    /// its declared type.
    fn record_foreign(&mut self, foreign: &marten_ir::ForeignBody) {
        for field_ref in &foreign.field_refs {
            if field_ref.is_lvalue
                && let Expr::FieldRef { field, .. } = self.program.expr(field_ref.expr)
            {
                self.flow.pin(Slot::Field(*field));
            }
        }
        for &target in &foreign.method_refs {
            for &param in &self.program.method(target).params {
                self.flow.pin(Slot::Param(param));
            }
        }
    }

    fn slot_of(&self, expr: ExprId) -> Option<Slot> {
        match self.program.expr(expr) {
            Expr::LocalRef(l) => Some(Slot::Local(*l)),
            Expr::ParamRef(p) => Some(Slot::Param(*p)),
            Expr::FieldRef { field, .. } => Some(Slot::Field(*field)),
            _ => None,
        }
    }
}

impl Visit for Recorder<'_> {
    fn expr(&mut self, program: &Program, id: ExprId) {
        match program.expr(id) {
            Expr::Binary { op, lhs, rhs } if op.is_assignment() => {
                if program.expr_type(id).is_reference()
                    && let Some(slot) = self.slot_of(*lhs)
                {
                    self.flow.add_assignment(slot, *rhs);
                }
            }
            Expr::Call(call) => {
                // Every argument is an assignment to the matching parameter
                // of the target.
                let params = &program.method(call.target).params;
                for (&param, &arg) in params.iter().zip(call.args.iter()) {
                    if program.param(param).ty.is_reference() {
                        self.flow.add_assignment(Slot::Param(param), arg);
                    }
                }
            }
            _ => {}
        }
    }

    fn stmt(&mut self, program: &Program, stmt: &Stmt) {
        match stmt {
            Stmt::Decl {
                local,
                init: Some(init),
            } => {
                if program.local(*local).ty.is_reference() {
                    self.flow.add_assignment(Slot::Local(*local), *init);
                }
            }
            Stmt::Return(Some(expr)) => {
                if let Some(method) = self.current_method
                    && program.method(method).return_type.is_reference()
                {
                    self.flow.add_return(method, *expr);
                }
            }
            Stmt::Try { catches, .. } => {
                // Thrown values escape local control flow; never tighten a
                // catch parameter.
                for clause in catches {
                    self.flow.pin(Slot::Local(clause.param));
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marten_ir::{
        Block, BinaryOp, CallExpr, CatchClause, ForeignBody, ForeignFieldRef, PrimType, Type,
    };

    fn record(program: &Program) -> TypeFlow {
        let oracle = TypeOracle::build(program);
        TypeFlow::record(program, &oracle)
    }

    #[test]
    fn assignments_and_declarations_are_recorded() {
        let mut program = Program::new();
        let class = program.add_class("Node", None, false);
        let method = program.add_method(class, "link", Type::Prim(PrimType::Void));
        let a = program.add_local(method, "a", Type::instance(class));
        let b = program.add_local(method, "b", Type::instance(class));

        let init = program.alloc_expr(Expr::New {
            class,
            args: vec![],
        });
        let a_ref = program.alloc_expr(Expr::LocalRef(a));
        let b_ref = program.alloc_expr(Expr::LocalRef(b));
        let assign = program.alloc_expr(Expr::Binary {
            op: BinaryOp::Assign,
            lhs: b_ref,
            rhs: a_ref,
        });
        program.method_mut(method).body = MethodBody::Block(Block::new(vec![
            Stmt::Decl {
                local: a,
                init: Some(init),
            },
            Stmt::Decl { local: b, init: None },
            Stmt::Expr(assign),
        ]));

        let flow = record(&program);
        assert_eq!(
            flow.assignments(Slot::Local(a)),
            Some(&FxHashSet::from_iter([init]))
        );
        assert_eq!(
            flow.assignments(Slot::Local(b)),
            Some(&FxHashSet::from_iter([a_ref]))
        );
    }

    #[test]
    fn call_arguments_flow_into_parameters() {
        let mut program = Program::new();
        let class = program.add_class("Sink", None, false);
        let callee = program.add_method(class, "accept", Type::Prim(PrimType::Void));
        let param = program.add_param(callee, "value", Type::instance(class));
        let count = program.add_param(callee, "count", Type::Prim(PrimType::I32));

        let caller = program.add_method(class, "go", Type::Prim(PrimType::Void));
        let receiver = program.alloc_expr(Expr::New {
            class,
            args: vec![],
        });
        let arg = program.alloc_expr(Expr::New {
            class,
            args: vec![],
        });
        let count_arg = program.int_literal(3);
        let call = program.alloc_expr(Expr::Call(CallExpr {
            instance: Some(receiver),
            target: callee,
            args: vec![arg, count_arg],
            polymorphic: true,
        }));
        program.method_mut(caller).body =
            MethodBody::Block(Block::new(vec![Stmt::Expr(call)]));

        let flow = record(&program);
        assert_eq!(
            flow.assignments(Slot::Param(param)),
            Some(&FxHashSet::from_iter([arg]))
        );
        // Primitive parameters carry no flow.
        assert_eq!(flow.assignments(Slot::Param(count)), None);
    }

    #[test]
    fn returns_are_recorded_for_reference_methods_only() {
        let mut program = Program::new();
        let class = program.add_class("Node", None, false);
        let get = program.add_method(class, "get", Type::instance(class));
        let size = program.add_method(class, "size", Type::Prim(PrimType::I32));

        let null = program.null_literal();
        program.method_mut(get).body =
            MethodBody::Block(Block::new(vec![Stmt::Return(Some(null))]));
        let three = program.int_literal(3);
        program.method_mut(size).body =
            MethodBody::Block(Block::new(vec![Stmt::Return(Some(three))]));

        let flow = record(&program);
        assert_eq!(flow.returns(get), Some(&FxHashSet::from_iter([null])));
        assert_eq!(flow.returns(size), None);
    }

    #[test]
    fn implementors_walk_chain_and_interfaces() {
        let mut program = Program::new();
        let drawable = program.add_interface("Drawable");
        let shape = program.add_class("Shape", None, true);
        program.add_implements(shape, drawable);
        let circle = program.add_class("Circle", Some(shape), false);
        let square = program.add_class("Square", Some(shape), false);
        program.alloc_expr(Expr::New {
            class: circle,
            args: vec![],
        });

        let flow = record(&program);
        // Abstract Shape counts as instantiated through Circle, so both land
        // in the interface's implementor set; domination filters on
        // abstractness later.
        assert_eq!(
            flow.implementors(drawable),
            Some(&FxHashSet::from_iter([circle, shape]))
        );
        assert!(flow.implementors(shape).unwrap().contains(&circle));
        assert_eq!(flow.implementors(square), None);
    }

    #[test]
    fn overriders_require_instantiated_owner() {
        let mut program = Program::new();
        let iface = program.add_interface("Runnable");
        let run_i = program.add_method(iface, "run", Type::Prim(PrimType::Void));
        program.method_mut(run_i).is_abstract = true;
        let live = program.add_class("Live", None, false);
        program.add_implements(live, iface);
        let run_live = program.add_method(live, "run", Type::Prim(PrimType::Void));
        let dead = program.add_class("Dead", None, false);
        program.add_implements(dead, iface);
        program.add_method(dead, "run", Type::Prim(PrimType::Void));
        program.alloc_expr(Expr::New {
            class: live,
            args: vec![],
        });

        let flow = record(&program);
        assert_eq!(
            flow.overriders(run_i),
            Some(&FxHashSet::from_iter([run_live]))
        );
    }

    #[test]
    fn up_refs_couple_overriding_parameters() {
        let mut program = Program::new();
        let base = program.add_class("Base", None, false);
        let m_base = program.add_method(base, "m", Type::Prim(PrimType::Void));
        let p_base = program.add_param(m_base, "o", Type::instance(base));
        let derived = program.add_class("Derived", Some(base), false);
        let m_derived = program.add_method(derived, "m", Type::Prim(PrimType::Void));
        let p_derived = program.add_param(m_derived, "o", Type::instance(base));

        let flow = record(&program);
        assert_eq!(
            flow.param_up_refs(p_derived),
            Some(&FxHashSet::from_iter([p_base]))
        );
        assert_eq!(flow.param_up_refs(p_base), None);
    }

    #[test]
    fn forwarder_receiver_is_pinned_and_params_couple() {
        let mut program = Program::new();
        let class = program.add_class("Widget", None, false);
        let instance = program.add_method(class, "resize", Type::Prim(PrimType::Void));
        let q = program.add_param(instance, "size", Type::instance(class));

        let forwarder = program.add_method(class, "resize$", Type::Prim(PrimType::Void));
        program.method_mut(forwarder).is_static = true;
        program.method_mut(forwarder).forwards_for = Some(instance);
        let this = program.add_this_param(forwarder, Type::instance(class));
        let p = program.add_param(forwarder, "size", Type::instance(class));

        let flow = record(&program);
        assert!(flow.is_pinned(Slot::Param(this)));
        assert_eq!(
            flow.param_up_refs(this),
            Some(&FxHashSet::from_iter([this]))
        );
        assert_eq!(flow.param_up_refs(p), Some(&FxHashSet::from_iter([q])));
    }

    #[test]
    fn foreign_writes_and_method_refs_pin() {
        let mut program = Program::new();
        let class = program.add_class("Host", None, false);
        let written = program.add_field(class, "written", Type::instance(class));
        let read = program.add_field(class, "read", Type::instance(class));
        let callee = program.add_method(class, "callback", Type::Prim(PrimType::Void));
        let callee_param = program.add_param(callee, "arg", Type::instance(class));

        let native = program.add_method(class, "bridge", Type::Prim(PrimType::Void));
        program.method_mut(native).is_native = true;
        let write_ref = program.alloc_expr(Expr::FieldRef {
            instance: None,
            field: written,
        });
        let read_ref = program.alloc_expr(Expr::FieldRef {
            instance: None,
            field: read,
        });
        program.method_mut(native).body = MethodBody::Foreign(ForeignBody {
            field_refs: vec![
                ForeignFieldRef {
                    expr: write_ref,
                    is_lvalue: true,
                },
                ForeignFieldRef {
                    expr: read_ref,
                    is_lvalue: false,
                },
            ],
            method_refs: vec![callee],
        });

        let flow = record(&program);
        assert!(flow.is_pinned(Slot::Field(written)));
        assert!(!flow.is_pinned(Slot::Field(read)));
        assert!(flow.is_pinned(Slot::Param(callee_param)));
    }

    #[test]
    fn catch_parameters_are_pinned() {
        let mut program = Program::new();
        let class = program.add_class("Err", None, false);
        let method = program.add_method(class, "guard", Type::Prim(PrimType::Void));
        let caught = program.add_local(method, "e", Type::instance(class));
        program.method_mut(method).body = MethodBody::Block(Block::new(vec![Stmt::Try {
            body: Block::default(),
            catches: vec![CatchClause {
                param: caught,
                body: Block::default(),
            }],
            finally: None,
        }]));

        let flow = record(&program);
        assert!(flow.is_pinned(Slot::Local(caught)));
    }
}
