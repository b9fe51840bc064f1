//! IR well-formedness diagnostics (E01xx).
//!
//! The optimizer itself never fails on malformed input; it aborts the
//! affected slot locally. These diagnostics exist for upstream drivers and
//! tests that want malformed IR surfaced loudly instead; see
//! [`Program::validate`].
//!
//! [`Program::validate`]: crate::Program::validate

use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum IrError {
    #[error("call to '{method}' passes {found} arguments, expected {expected}")]
    #[diagnostic(code(E0101))]
    CallArity {
        method: String,
        expected: usize,
        found: usize,
    },

    #[error("static forwarder '{method}' has no leading receiver parameter")]
    #[diagnostic(
        code(E0102),
        help("the first parameter of a static forwarder must carry the receiver marker")
    )]
    ForwarderMissingReceiver { method: String },

    #[error("static forwarder '{method}' forwards for static method '{target}'")]
    #[diagnostic(code(E0103))]
    ForwarderTargetsStatic { method: String, target: String },

    #[error("receiver-marked parameter '{param}' in non-forwarder method '{method}'")]
    #[diagnostic(
        code(E0104),
        help("instance methods receive their receiver implicitly; only static forwarders declare it")
    )]
    StrayReceiverParam { method: String, param: String },

    #[error("interface '{ty}' declares a superclass")]
    #[diagnostic(code(E0105))]
    InterfaceWithSuperclass { ty: String },

    #[error("allocation of non-concrete type '{ty}'")]
    #[diagnostic(code(E0106))]
    AbstractAllocation { ty: String },

    #[error("foreign field reference in '{method}' is not a field reference expression")]
    #[diagnostic(code(E0107))]
    ForeignRefShape { method: String },
}
