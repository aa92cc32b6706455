//! Per-run configuration.
//!
//! One [`Session`] value is passed to every pass; there is no global
//! mutable state besides the read-only named-type registry.

use std::path::PathBuf;

use bitflags::bitflags;
use reloom_types::{Address, RegNum};

bitflags! {
    /// Per-pass debug switches; each enables verbose tracing for one area.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct DebugFlags: u32 {
        /// Decoding and CFG construction.
        const DECODE = 1 << 0;
        /// Dominators, phi placement, renaming.
        const SSA = 1 << 1;
        /// Propagation and simplification.
        const PROPAGATE = 1 << 2;
        /// Type analysis.
        const TYPES = 1 << 3;
        /// Interprocedural driver decisions.
        const DRIVER = 1 << 4;
        /// Control-flow structuring.
        const STRUCTURE = 1 << 5;
        /// Unused-return elimination.
        const RETURNS = 1 << 6;
    }
}

/// Settings for one decompilation run.
#[derive(Debug, Clone)]
pub struct Session {
    /// Entry point override; the image's entry is used when absent.
    pub entry: Option<Address>,
    /// Where emitted output goes; the emitter's concern, carried here.
    pub output_dir: PathBuf,
    /// Maximum operator nesting of a propagated right-hand side.
    pub prop_max_depth: usize,
    /// Cap on full propagation passes per procedure.
    pub max_prop_passes: usize,
    /// Cap on type-analysis fixed-point iterations per procedure.
    pub max_dfa_iters: usize,
    /// Cap on recursion-group fixed-point passes per cycle.
    pub max_recursion_passes: usize,
    /// Cap on the unused-return worklist.
    pub max_ret_worklist: usize,
    /// Register number of the stack pointer in the target's register space.
    pub sp_reg: RegNum,
    /// Debug switches.
    pub debug: DebugFlags,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            entry: None,
            output_dir: PathBuf::from("output"),
            prop_max_depth: 3,
            max_prop_passes: 10,
            max_dfa_iters: 10,
            max_recursion_passes: 10,
            max_ret_worklist: 1000,
            sp_reg: 28,
            debug: DebugFlags::empty(),
        }
    }
}

impl Session {
    /// Whether a debug area is enabled.
    pub fn debugging(&self, flag: DebugFlags) -> bool {
        self.debug.contains(flag)
    }
}
