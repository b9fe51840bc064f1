//! Whole-program type tightening over the marten IR.
//!
//! Records "type flow" once (which expressions reach which declared slots),
//! then repeatedly narrows slot declarations to the most specific supertype
//! of their actual flow, simplifying casts, instance-of tests, and calls
//! whose outcome that determines, until a fixed point. Variables, fields,
//! parameters, and method returns are the way points where type information
//! is pinned to a declaration; everything between them flows freely.
//!
//! Tightening a slot to the null type is normal and useful: it means the
//! slot was never assigned anything but null, it stops influencing its
//! dependents, and later passes can exploit the statically-known value. The
//! fixer that runs between rounds normalizes references left dangling by
//! such slots onto the program's null-field/null-method sentinels.
//!
//! The pass mutates the program in place and reports only whether it changed
//! anything; it never fails on well-formed IR, and malformed corners are
//! abandoned slot-by-slot rather than propagated.

pub mod dangling;
pub mod flow;
pub mod oracle;
pub mod tightener;

pub use dangling::fix_dangling_refs;
pub use flow::{Slot, TypeFlow};
pub use oracle::TypeOracle;
pub use tightener::tighten_round;

use marten_ir::Program;

/// Run the pass to its fixed point. Returns whether the program changed.
pub fn run(program: &mut Program) -> bool {
    let oracle = TypeOracle::build(program);
    run_with_oracle(program, &oracle)
}

/// Run the pass with a caller-built oracle. The oracle must describe this
/// program and must stay query-stable for the duration of the pass; the
/// pass itself never invalidates it (it rewrites declarations and
/// expressions, never the hierarchy or allocation sites).
pub fn run_with_oracle(program: &mut Program, oracle: &TypeOracle) -> bool {
    let flow = {
        let _span = tracing::info_span!("record_type_flow").entered();
        TypeFlow::record(program, oracle)
    };

    // Each tightened way point creates opportunities for everything flowing
    // out of it, so iterate until a whole round finds nothing.
    let mut changed = false;
    let mut rounds = 0usize;
    loop {
        let round_changed = {
            let _span = tracing::info_span!("tighten", round = rounds).entered();
            tighten_round(program, oracle, &flow)
        };
        if !round_changed {
            break;
        }
        changed = true;
        rounds += 1;
        let _span = tracing::info_span!("fix_dangling_refs", round = rounds).entered();
        fix_dangling_refs(program);
    }
    tracing::debug!(rounds, changed, "type tightening complete");
    changed
}
