//! Definition tables and the program itself.
//!
//! `Program` owns every IR entity in `Vec`-indexed tables addressed by the
//! identity handles from `marten-identity`, plus the expression arena. It is
//! also the node factory and the mutation surface for optimizer passes:
//! [`Program::replace_expr`] swaps a node's contents at a stable [`ExprId`],
//! which is what lets relations recorded before a rewrite survive it.

use marten_identity::{ExprId, FieldId, LocalId, MethodId, ParamId, TypeDefId};
use rustc_hash::FxHashSet;

use crate::errors::IrError;
use crate::expr::{BinaryOp, Expr};
use crate::stmt::MethodBody;
use crate::types::{PrimType, RefType, Type};

/// What kind of reference type definition this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeDefKind {
    Class,
    Interface,
}

/// A class or interface definition.
#[derive(Debug, Clone)]
pub struct TypeDef {
    pub id: TypeDefId,
    pub name: String,
    pub kind: TypeDefKind,
    /// Interfaces are always abstract; classes may be.
    pub is_abstract: bool,
    /// Classes only. `None` for root classes and all interfaces.
    pub superclass: Option<TypeDefId>,
    /// Directly implemented interfaces (classes) or directly extended
    /// interfaces (interfaces).
    pub interfaces: Vec<TypeDefId>,
    pub methods: Vec<MethodId>,
    pub fields: Vec<FieldId>,
}

/// A field definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub id: FieldId,
    pub name: String,
    pub owner: TypeDefId,
    pub ty: Type,
    pub is_static: bool,
    /// Volatile fields are never tightened.
    pub is_volatile: bool,
    pub initializer: Option<ExprId>,
}

/// A method definition.
#[derive(Debug, Clone)]
pub struct MethodDef {
    pub id: MethodId,
    pub name: String,
    pub owner: TypeDefId,
    pub return_type: Type,
    pub params: Vec<ParamId>,
    pub locals: Vec<LocalId>,
    pub is_static: bool,
    pub is_abstract: bool,
    pub is_native: bool,
    /// For a static forwarder, the instance method it implements. The
    /// forwarder takes the receiver as an explicit first parameter marked
    /// [`ParamDef::is_this`].
    pub forwards_for: Option<MethodId>,
    pub body: MethodBody,
}

/// A method parameter.
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub id: ParamId,
    pub name: String,
    pub ty: Type,
    /// Marks the explicit receiver parameter of a static forwarder.
    pub is_this: bool,
    pub owner: MethodId,
}

/// A method-body local variable.
#[derive(Debug, Clone)]
pub struct LocalDef {
    pub id: LocalId,
    pub name: String,
    pub ty: Type,
    pub owner: MethodId,
}

/// A fully-linked program: definition tables, the expression arena, the set
/// of host-reserved codegen types, and the receiver-normalization sentinels.
pub struct Program {
    types: Vec<TypeDef>,
    methods: Vec<MethodDef>,
    fields: Vec<FieldDef>,
    params: Vec<ParamDef>,
    locals: Vec<LocalDef>,
    exprs: Vec<Expr>,
    /// Types reserved by the code generator. The tightener must not touch
    /// these or anything they declare.
    pub codegen_types: FxHashSet<TypeDefId>,
    null_field: FieldId,
    null_method: MethodId,
}

impl Program {
    /// Create an empty program. The null-field and null-method sentinels are
    /// created up front on a hidden codegen-reserved holder type; dangling
    /// references acquired during tightening are normalized onto them.
    pub fn new() -> Self {
        let mut program = Self {
            types: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            params: Vec::new(),
            locals: Vec::new(),
            exprs: Vec::new(),
            codegen_types: FxHashSet::default(),
            null_field: FieldId::new(0),
            null_method: MethodId::new(0),
        };
        let holder = program.add_class("<null>", None, false);
        program.codegen_types.insert(holder);
        program.null_field = program.add_field(holder, "nullField", Type::NULL);
        let null_method = program.add_method(holder, "nullMethod", Type::NULL);
        program.method_mut(null_method).is_native = true;
        program.null_method = null_method;
        program
    }

    /// Sentinel field standing for "read through null".
    #[must_use]
    pub fn null_field(&self) -> FieldId {
        self.null_field
    }

    /// Sentinel method standing for "invoke through null".
    #[must_use]
    pub fn null_method(&self) -> MethodId {
        self.null_method
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a class.
    pub fn add_class(
        &mut self,
        name: &str,
        superclass: Option<TypeDefId>,
        is_abstract: bool,
    ) -> TypeDefId {
        let id = TypeDefId::new(self.types.len() as u32);
        self.types.push(TypeDef {
            id,
            name: name.to_string(),
            kind: TypeDefKind::Class,
            is_abstract,
            superclass,
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        });
        id
    }

    /// Register an interface. Interfaces are abstract and have no superclass.
    pub fn add_interface(&mut self, name: &str) -> TypeDefId {
        let id = TypeDefId::new(self.types.len() as u32);
        self.types.push(TypeDef {
            id,
            name: name.to_string(),
            kind: TypeDefKind::Interface,
            is_abstract: true,
            superclass: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
        });
        id
    }

    /// Record that `ty` directly implements (or, for an interface, extends)
    /// `interface`.
    pub fn add_implements(&mut self, ty: TypeDefId, interface: TypeDefId) {
        self.type_def_mut(ty).interfaces.push(interface);
    }

    /// Register a field on `owner`. Non-static, non-volatile, uninitialized;
    /// adjust through [`Program::field_mut`].
    pub fn add_field(&mut self, owner: TypeDefId, name: &str, ty: Type) -> FieldId {
        let id = FieldId::new(self.fields.len() as u32);
        self.fields.push(FieldDef {
            id,
            name: name.to_string(),
            owner,
            ty,
            is_static: false,
            is_volatile: false,
            initializer: None,
        });
        self.type_def_mut(owner).fields.push(id);
        id
    }

    /// Register a method on `owner`. Instance, concrete, bodiless; adjust
    /// through [`Program::method_mut`].
    pub fn add_method(&mut self, owner: TypeDefId, name: &str, return_type: Type) -> MethodId {
        let id = MethodId::new(self.methods.len() as u32);
        self.methods.push(MethodDef {
            id,
            name: name.to_string(),
            owner,
            return_type,
            params: Vec::new(),
            locals: Vec::new(),
            is_static: false,
            is_abstract: false,
            is_native: false,
            forwards_for: None,
            body: MethodBody::None,
        });
        self.type_def_mut(owner).methods.push(id);
        id
    }

    /// Register a parameter on `method`.
    pub fn add_param(&mut self, method: MethodId, name: &str, ty: Type) -> ParamId {
        let id = ParamId::new(self.params.len() as u32);
        self.params.push(ParamDef {
            id,
            name: name.to_string(),
            ty,
            is_this: false,
            owner: method,
        });
        self.method_mut(method).params.push(id);
        id
    }

    /// Register the explicit receiver parameter of a static forwarder.
    pub fn add_this_param(&mut self, method: MethodId, ty: Type) -> ParamId {
        let id = self.add_param(method, "this", ty);
        self.param_mut(id).is_this = true;
        id
    }

    /// Register a local variable on `method`. Catch-clause parameters are
    /// locals too.
    pub fn add_local(&mut self, method: MethodId, name: &str, ty: Type) -> LocalId {
        let id = LocalId::new(self.locals.len() as u32);
        self.locals.push(LocalDef {
            id,
            name: name.to_string(),
            ty,
            owner: method,
        });
        self.method_mut(method).locals.push(id);
        id
    }

    // =========================================================================
    // Expression factory
    // =========================================================================

    /// Allocate an expression node.
    pub fn alloc_expr(&mut self, expr: Expr) -> ExprId {
        let id = ExprId::new(self.exprs.len() as u32);
        self.exprs.push(expr);
        id
    }

    /// A fresh null literal.
    pub fn null_literal(&mut self) -> ExprId {
        self.alloc_expr(Expr::NullLit)
    }

    /// A fresh boolean literal.
    pub fn bool_literal(&mut self, value: bool) -> ExprId {
        self.alloc_expr(Expr::BoolLit(value))
    }

    /// A fresh integer literal.
    pub fn int_literal(&mut self, value: i64) -> ExprId {
        self.alloc_expr(Expr::IntLit(value))
    }

    /// Overwrite the node contents at `id`. The ID (and therefore every
    /// recorded relation mentioning it) stays valid.
    pub fn replace_expr(&mut self, id: ExprId, expr: Expr) {
        self.exprs[id.index() as usize] = expr;
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[must_use]
    pub fn type_def(&self, id: TypeDefId) -> &TypeDef {
        &self.types[id.index() as usize]
    }

    pub fn type_def_mut(&mut self, id: TypeDefId) -> &mut TypeDef {
        &mut self.types[id.index() as usize]
    }

    #[must_use]
    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.methods[id.index() as usize]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut MethodDef {
        &mut self.methods[id.index() as usize]
    }

    #[must_use]
    pub fn field(&self, id: FieldId) -> &FieldDef {
        &self.fields[id.index() as usize]
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut FieldDef {
        &mut self.fields[id.index() as usize]
    }

    #[must_use]
    pub fn param(&self, id: ParamId) -> &ParamDef {
        &self.params[id.index() as usize]
    }

    pub fn param_mut(&mut self, id: ParamId) -> &mut ParamDef {
        &mut self.params[id.index() as usize]
    }

    #[must_use]
    pub fn local(&self, id: LocalId) -> &LocalDef {
        &self.locals[id.index() as usize]
    }

    pub fn local_mut(&mut self, id: LocalId) -> &mut LocalDef {
        &mut self.locals[id.index() as usize]
    }

    #[must_use]
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index() as usize]
    }

    pub fn type_ids(&self) -> impl Iterator<Item = TypeDefId> + use<> {
        (0..self.types.len() as u32).map(TypeDefId::new)
    }

    pub fn method_ids(&self) -> impl Iterator<Item = MethodId> + use<> {
        (0..self.methods.len() as u32).map(MethodId::new)
    }

    pub fn field_ids(&self) -> impl Iterator<Item = FieldId> + use<> {
        (0..self.fields.len() as u32).map(FieldId::new)
    }

    pub fn expr_ids(&self) -> impl Iterator<Item = ExprId> + use<> {
        (0..self.exprs.len() as u32).map(ExprId::new)
    }

    /// Whether `method` is a static forwarder: a static method implementing
    /// an instance method, receiver as explicit first parameter.
    #[must_use]
    pub fn is_static_forwarder(&self, method: MethodId) -> bool {
        let def = self.method(method);
        def.is_static && def.forwards_for.is_some()
    }

    // =========================================================================
    // Derived queries
    // =========================================================================

    /// Derive an expression's type from whatever it currently targets.
    ///
    /// Never cached: a reference expression's type must track the current
    /// declared type of its slot across tightening rounds, and post-order
    /// visiting relies on operand types being up to date.
    #[must_use]
    pub fn expr_type(&self, id: ExprId) -> Type {
        match self.expr(id) {
            Expr::NullLit => Type::NULL,
            Expr::BoolLit(_) => Type::Prim(PrimType::Bool),
            Expr::IntLit(_) => Type::Prim(PrimType::I32),
            Expr::LocalRef(l) => self.local(*l).ty,
            Expr::ParamRef(p) => self.param(*p).ty,
            Expr::FieldRef { field, .. } => self.field(*field).ty,
            Expr::Call(call) => self.method(call.target).return_type,
            Expr::New { class, .. } => Type::instance(*class),
            Expr::Cast { target, .. } => *target,
            Expr::InstanceOf { .. } => Type::Prim(PrimType::Bool),
            Expr::Binary { op, lhs, .. } => match op {
                BinaryOp::Assign | BinaryOp::Add => self.expr_type(*lhs),
                BinaryOp::Eq | BinaryOp::Neq | BinaryOp::And | BinaryOp::Or => {
                    Type::Prim(PrimType::Bool)
                }
            },
        }
    }

    /// Whether evaluating the expression can have an observable effect.
    /// Dropping a side-effect-free expression is always safe.
    #[must_use]
    pub fn has_side_effects(&self, id: ExprId) -> bool {
        match self.expr(id) {
            Expr::NullLit
            | Expr::BoolLit(_)
            | Expr::IntLit(_)
            | Expr::LocalRef(_)
            | Expr::ParamRef(_) => false,
            Expr::FieldRef { instance, .. } => {
                instance.is_some_and(|inst| self.has_side_effects(inst))
            }
            Expr::Call(_) | Expr::New { .. } => true,
            Expr::Cast { expr, .. } | Expr::InstanceOf { expr, .. } => self.has_side_effects(*expr),
            Expr::Binary { op, lhs, rhs } => {
                op.is_assignment() || self.has_side_effects(*lhs) || self.has_side_effects(*rhs)
            }
        }
    }

    /// Render a type for diagnostics.
    #[must_use]
    pub fn display_type(&self, ty: Type) -> String {
        match ty {
            Type::Ref(RefType::Instance(def)) => self.type_def(def).name.clone(),
            other => other.name().to_string(),
        }
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Check IR well-formedness, collecting every breach. The optimizer
    /// tolerates all of these by aborting the affected slot; upstream
    /// drivers and tests call this to surface them instead.
    pub fn validate(&self) -> Result<(), Vec<IrError>> {
        let mut errors = Vec::new();

        for def in &self.types {
            if def.kind == TypeDefKind::Interface && def.superclass.is_some() {
                errors.push(IrError::InterfaceWithSuperclass {
                    ty: def.name.clone(),
                });
            }
        }

        for method in &self.methods {
            if let Some(target) = method.forwards_for {
                if self.method(target).is_static {
                    errors.push(IrError::ForwarderTargetsStatic {
                        method: method.name.clone(),
                        target: self.method(target).name.clone(),
                    });
                }
                let has_receiver = method
                    .params
                    .first()
                    .is_some_and(|&p| self.param(p).is_this);
                if !has_receiver {
                    errors.push(IrError::ForwarderMissingReceiver {
                        method: method.name.clone(),
                    });
                }
            } else {
                for &p in &method.params {
                    if self.param(p).is_this {
                        errors.push(IrError::StrayReceiverParam {
                            method: method.name.clone(),
                            param: self.param(p).name.clone(),
                        });
                    }
                }
            }
            if let MethodBody::Foreign(foreign) = &method.body {
                for field_ref in &foreign.field_refs {
                    if !matches!(self.expr(field_ref.expr), Expr::FieldRef { .. }) {
                        errors.push(IrError::ForeignRefShape {
                            method: method.name.clone(),
                        });
                    }
                }
            }
        }

        for id in self.expr_ids() {
            match self.expr(id) {
                Expr::Call(call) => {
                    let target = self.method(call.target);
                    if call.args.len() != target.params.len() {
                        errors.push(IrError::CallArity {
                            method: target.name.clone(),
                            expected: target.params.len(),
                            found: call.args.len(),
                        });
                    }
                }
                Expr::New { class, .. } => {
                    if self.type_def(*class).is_abstract {
                        errors.push(IrError::AbstractAllocation {
                            ty: self.type_def(*class).name.clone(),
                        });
                    }
                }
                _ => {}
            }
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}
