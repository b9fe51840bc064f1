//! The type oracle: pure hierarchy and instantiability queries.
//!
//! Built once from the program before the pass runs, then query-stable for
//! its whole lifetime. The pass only rewrites slot declarations and
//! expression contents, never the class hierarchy and never allocation
//! sites, so nothing the oracle precomputes can go stale.

use marten_identity::{MethodId, TypeDefId};
use marten_ir::{Expr, Program, RefType, TypeDefKind};
use rustc_hash::FxHashSet;

/// Precomputed hierarchy, instantiability, and override information.
pub struct TypeOracle {
    /// Per type def: every type it trivially casts to, in deterministic
    /// order (self first, then the superclass chain, then transitively
    /// reachable interfaces in BFS order). The ordering is what makes
    /// [`TypeOracle::generalize`] prefer superclass joins over interface
    /// joins.
    supertypes: Vec<Vec<TypeDefId>>,
    /// Classes with a direct allocation site anywhere in the program.
    allocated: FxHashSet<TypeDefId>,
    /// Per type def: some allocated class is trivially castable to it.
    instantiable: Vec<bool>,
    /// Per method: everything it directly or transitively overrides.
    overrides: Vec<Vec<MethodId>>,
    /// All class definitions, for hierarchy-intersection queries.
    classes: Vec<TypeDefId>,
}

impl TypeOracle {
    /// Precompute all tables from a fully-linked program. The program is
    /// closed: every allocation site counts as reachable.
    pub fn build(program: &Program) -> Self {
        let supertypes: Vec<Vec<TypeDefId>> = program
            .type_ids()
            .map(|t| compute_supertypes(program, t))
            .collect();

        let mut allocated = FxHashSet::default();
        for id in program.expr_ids() {
            if let Expr::New { class, .. } = program.expr(id) {
                allocated.insert(*class);
            }
        }

        let instantiable = program
            .type_ids()
            .map(|t| {
                allocated
                    .iter()
                    .any(|c| supertypes[c.index() as usize].contains(&t))
            })
            .collect();

        let classes = program
            .type_ids()
            .filter(|&t| program.type_def(t).kind == TypeDefKind::Class)
            .collect();

        let mut oracle = Self {
            supertypes,
            allocated,
            instantiable,
            overrides: Vec::new(),
            classes,
        };
        oracle.overrides = program
            .method_ids()
            .map(|m| oracle.compute_overrides(program, m))
            .collect();
        oracle
    }

    /// Methods overridden, directly or transitively, by `method`: same name
    /// and arity declared by a proper supertype of its owner. The IR is
    /// post-resolution, so name plus arity identifies the signature.
    fn compute_overrides(&self, program: &Program, method: MethodId) -> Vec<MethodId> {
        let def = program.method(method);
        if def.is_static {
            return Vec::new();
        }
        let mut out = Vec::new();
        for &ancestor in self.trivial_supertypes(def.owner).iter().skip(1) {
            for &candidate in &program.type_def(ancestor).methods {
                let cand = program.method(candidate);
                if !cand.is_static
                    && cand.name == def.name
                    && cand.params.len() == def.params.len()
                {
                    out.push(candidate);
                }
            }
        }
        out
    }

    /// Every type `t` trivially casts to, self included, in deterministic
    /// order.
    #[must_use]
    pub fn trivial_supertypes(&self, t: TypeDefId) -> &[TypeDefId] {
        &self.supertypes[t.index() as usize]
    }

    fn contains(&self, f: TypeDefId, t: TypeDefId) -> bool {
        self.supertypes[f.index() as usize].contains(&t)
    }

    /// Whether some reachable allocation produces an instance of `t`,
    /// directly or via a subclass. The null type is the type of the null
    /// literal and always counts as instantiated; this is what keeps the
    /// cast-to-null rewrite stable across rounds.
    #[must_use]
    pub fn is_instantiated(&self, t: RefType) -> bool {
        match t {
            RefType::Null => true,
            RefType::Instance(def) => self.instantiable[def.index() as usize],
        }
    }

    /// Every instance of `from` is-a `to`, statically, with no runtime
    /// check needed. Null casts trivially to everything; nothing else casts
    /// trivially to null.
    #[must_use]
    pub fn can_trivially_cast(&self, from: RefType, to: RefType) -> bool {
        match (from, to) {
            (RefType::Null, _) => true,
            (_, RefType::Null) => false,
            (RefType::Instance(f), RefType::Instance(t)) => self.contains(f, t),
        }
    }

    /// The hierarchies of `from` and `to` intersect: a runtime check might
    /// succeed.
    #[must_use]
    pub fn can_theoretically_cast(&self, from: RefType, to: RefType) -> bool {
        if self.can_trivially_cast(from, to) || self.can_trivially_cast(to, from) {
            return true;
        }
        let (RefType::Instance(f), RefType::Instance(t)) = (from, to) else {
            return false;
        };
        self.classes
            .iter()
            .any(|&c| self.contains(c, f) && self.contains(c, t))
    }

    /// Methods `method` directly or transitively overrides.
    #[must_use]
    pub fn all_overrides(&self, method: MethodId) -> &[MethodId] {
        &self.overrides[method.index() as usize]
    }

    /// Least common supertype of a non-empty set. The null type is the
    /// identity element. Returns `None` for an empty set or when two
    /// members share no supertype at all (the IR has no universal root);
    /// callers keep the declared type in that case, which upper-bounds all
    /// real flow.
    #[must_use]
    pub fn generalize(&self, types: impl IntoIterator<Item = RefType>) -> Option<RefType> {
        let mut iter = types.into_iter();
        let mut acc = iter.next()?;
        for ty in iter {
            acc = self.join(acc, ty)?;
        }
        Some(acc)
    }

    fn join(&self, a: RefType, b: RefType) -> Option<RefType> {
        if a == b {
            return Some(a);
        }
        match (a, b) {
            (RefType::Null, other) | (other, RefType::Null) => Some(other),
            (RefType::Instance(fa), RefType::Instance(fb)) => {
                if self.contains(fa, fb) {
                    return Some(b);
                }
                if self.contains(fb, fa) {
                    return Some(a);
                }
                self.trivial_supertypes(fa)
                    .iter()
                    .find(|&&s| self.contains(fb, s))
                    .map(|&s| RefType::Instance(s))
            }
        }
    }

    /// The strict subtype of the two if one dominates, else `a`.
    #[must_use]
    pub fn stronger(&self, a: RefType, b: RefType) -> RefType {
        if self.can_trivially_cast(a, b) {
            a
        } else if self.can_trivially_cast(b, a) {
            b
        } else {
            a
        }
    }
}

/// Self, the superclass chain, then transitively implemented interfaces in
/// BFS order.
fn compute_supertypes(program: &Program, t: TypeDefId) -> Vec<TypeDefId> {
    let mut out = Vec::new();
    let mut cursor = Some(t);
    while let Some(cur) = cursor {
        out.push(cur);
        cursor = program.type_def(cur).superclass;
    }

    let mut queue: std::collections::VecDeque<TypeDefId> = out
        .iter()
        .flat_map(|&c| program.type_def(c).interfaces.iter().copied())
        .collect();
    let mut seen: FxHashSet<TypeDefId> = out.iter().copied().collect();
    while let Some(iface) = queue.pop_front() {
        if seen.insert(iface) {
            out.push(iface);
            queue.extend(program.type_def(iface).interfaces.iter().copied());
        }
    }
    out
}
