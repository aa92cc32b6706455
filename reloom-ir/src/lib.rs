//! Instruction-level data model of the Reloom decompiler.
//!
//! This crate owns everything a single machine instruction lowers into and
//! everything the analyses rewrite: the expression algebra, the type
//! lattice, the statement set and the RTL (register transfer list)
//! container. Control flow, procedures and the passes that drive them live
//! in `reloom-core`.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod collector;
pub mod exp;
pub mod op;
pub mod rtl;
pub mod stmt;
pub mod ty;

pub use collector::{DefCollector, UseCollector};
pub use exp::visitor::{modify_exp, walk_exp, ExpModifier, ExpVisitor, PreModify};
pub use exp::{Const, Exp};
pub use op::{BinaryOp, Terminal, TernaryOp, UnaryOp};
pub use rtl::Rtl;
pub use stmt::{
    Assign, BoolAssign, BranchKind, BranchStatement, CallStatement, CaseStatement,
    GotoStatement, ImplicitAssign, ImpRefStatement, PhiArg, PhiAssign, ReturnStatement,
    Statement, StmtKind, SwitchInfo, SwitchKind,
};
pub use ty::{Field, Signedness, Type};
