//! Atomic types shared by every layer of the Reloom decompiler.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

mod address;
mod ids;

pub use address::Address;
pub use ids::{BbId, ProcId, StmtId};

/// Machine word of the analysed target. All targets in scope are 64 bits or
/// narrower; narrower words are held zero-extended.
pub type Word = u64;

/// Register number in a target's SSL register space.
pub type RegNum = u16;

/// Bit width of a value or type.
pub type BitWidth = u16;
