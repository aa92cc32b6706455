//! Decompilation error variants.

use reloom_types::Address;
use thiserror::Error;

/// Convenience alias for core results.
pub type Result<T> = core::result::Result<T, DecompileError>;

/// Errors the core reports to its driver. Invariant violations are
/// programming errors and assert instead.
#[derive(Debug, Error)]
pub enum DecompileError {
    /// The binary could not be loaded or read; fatal.
    #[error("load failure: {0}")]
    Load(String),

    /// The bytes at `pc` match no instruction pattern. The enclosing basic
    /// block is marked invalid and decoding continues elsewhere.
    #[error("undecodable instruction at {pc}")]
    Decode {
        /// Address of the offending instruction.
        pc: Address,
    },

    /// A read outside every section.
    #[error("address {addr} is outside the image")]
    OutOfImage {
        /// The out-of-range address.
        addr: Address,
    },

    /// The procedure's CFG still has incomplete blocks at analysis time.
    /// Analyses skip the procedure; the rest of the program is unaffected.
    #[error("incomplete control flow graph in {proc}")]
    IncompleteCfg {
        /// Name of the affected procedure.
        proc: String,
    },

    /// A fixed-point pass hit its iteration cap; the procedure is left
    /// partially analysed.
    #[error("{pass} cap reached in {proc}")]
    PassCap {
        /// Which pass gave up.
        pass: &'static str,
        /// Name of the affected procedure.
        proc: String,
    },
}

/// Signal returned by [`Cfg::new_bb`](crate::cfg::Cfg::new_bb) when a
/// complete basic block already starts at the requested address, so the
/// decoder stops following a branch instead of creating duplicates. Not an
/// error at the user level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BbAlreadyExists(pub reloom_types::BbId);
