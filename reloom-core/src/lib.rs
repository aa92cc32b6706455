//! Reloom decompiler core.
//!
//! Starting from per-procedure control-flow graphs of RTLs, the core
//! rewrites each procedure into SSA form, propagates and simplifies
//! expressions, infers types by a fixed-point meet, discovers parameters
//! and return values across the call graph (including mutually recursive
//! cycles), removes dead code, and lowers back out of SSA for emission.
//!
//! Binary loaders, instruction decoders and the final code emitter are
//! external collaborators behind the traits in [`image`], [`decode`] and
//! [`emit`].

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod cfg;
pub mod dataflow;
pub mod decode;
pub mod driver;
pub mod emit;
pub mod error;
pub mod image;
pub mod proc;
pub mod prog;
pub mod propagate;
pub mod session;
pub mod ssa_out;
pub mod typing;
pub mod util;

#[cfg(test)]
mod tests;

pub mod prelude {
    //! Everything a front end or driver embedding the core needs.
    #[doc(no_inline)]
    pub use reloom_ir::{
        Assign, BranchKind, CallStatement, Exp, Rtl, Statement, StmtKind, Type,
    };
    #[doc(no_inline)]
    pub use reloom_types::{Address, BbId, ProcId, RegNum, StmtId, Word};

    pub use crate::{
        cfg::{BasicBlock, BbKind, Cfg},
        decode::{DecodedInstruction, InstructionDecoder},
        driver::Decompiler,
        emit::CodeEmitter,
        error::{DecompileError, Result},
        image::{Endian, Image, Machine, MemoryImage, Platform, Section},
        proc::{LibProc, Proc, ProcStatus, Signature, UserProc},
        prog::{Global, Module, Prog},
        session::{DebugFlags, Session},
    };
}
