//! Basic blocks.

use reloom_ir::{Rtl, Statement};
use reloom_types::{Address, BbId};
use strum::Display;

/// Kind of a basic block, decided by its final statement.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum BbKind {
    /// Falls through to the next block.
    Fall,
    /// Ends in an unconditional jump.
    OneWay,
    /// Ends in a conditional branch; out[0] taken, out[1] fall-through.
    TwoWay,
    /// Ends in a jump-table dispatch.
    Nway,
    /// Ends in a call and falls through.
    Call,
    /// Ends in a return.
    Ret,
    /// Ends in a computed jump.
    CompJump,
    /// Ends in a computed call.
    CompCall,
    /// Could not be decoded.
    Invalid,
    /// Forward-reference placeholder awaiting decode.
    Incomplete,
}

/// Structured-control classification of a block.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
pub enum StructType {
    /// Straight-line member of its enclosing construct.
    #[default]
    Seq,
    /// Conditional header.
    Cond,
    /// Loop header.
    Loop,
    /// Loop header that is also a conditional header.
    LoopCond,
}

/// Loop classification attached to a loop header.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum LoopType {
    /// Condition tested before the body (`while`).
    PreTested,
    /// Condition tested after the body (`do while`).
    PostTested,
    /// No exit condition in the header or latch.
    Endless,
}

/// Conditional classification attached to a conditional header.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum CondType {
    /// Only the taken branch has a body.
    IfThen,
    /// Only the fall-through branch has a body.
    IfElse,
    /// Both branches have bodies.
    IfThenElse,
    /// N-way dispatch.
    Case,
}

/// How a conditional relates to the surrounding structure.
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnstructType {
    /// Fits a structured template.
    #[default]
    Structured,
    /// Jumps into or out of a loop; emitted as an explicit goto.
    JumpInOutLoop,
    /// Jumps into a case body; emitted as an explicit goto.
    JumpIntoCase,
}

/// A basic block: an ordered list of RTLs plus edges and the structuring
/// state the control-flow analysis attaches to it. Blocks are owned by
/// their CFG; all cross-block references are ids.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Index in the owning CFG.
    pub id: BbId,
    /// Block kind.
    pub kind: BbKind,
    /// Native address of the first instruction.
    pub low_addr: Address,
    /// Instructions, in address order.
    pub rtls: Vec<Rtl>,
    /// Predecessors.
    pub in_edges: Vec<BbId>,
    /// Successors; for two-way blocks out[0] is taken, out[1] fall-through.
    pub out_edges: Vec<BbId>,
    /// Tombstone left by block removal.
    pub removed: bool,

    /// Index in the forward post-order `ordering`.
    pub ord: usize,
    /// Index in the reverse post-order `rev_ordering`.
    pub rev_ord: usize,
    /// DFS parenthesisation over out-edges.
    pub loop_stamps: [usize; 2],
    /// DFS parenthesisation over out-edges visited in reverse.
    pub rev_loop_stamps: [usize; 2],
    /// Immediate post-dominator.
    pub imm_pdom: Option<BbId>,
    /// Structured classification.
    pub struct_type: StructType,
    /// Loop classification, for loop headers.
    pub loop_type: Option<LoopType>,
    /// Conditional classification, for conditional headers.
    pub cond_type: Option<CondType>,
    /// Unstructured-jump tag.
    pub unstruct_type: UnstructType,
    /// Follow of a conditional header.
    pub cond_follow: Option<BbId>,
    /// Header of the most nested enclosing loop.
    pub loop_head: Option<BbId>,
    /// Header of the enclosing case body.
    pub case_head: Option<BbId>,
    /// Latching node, for loop headers.
    pub latch: Option<BbId>,
    /// Follow of the loop, for loop headers.
    pub loop_follow: Option<BbId>,
}

impl BasicBlock {
    /// New block of `kind` starting at `low_addr`.
    pub fn new(id: BbId, kind: BbKind, low_addr: Address) -> Self {
        Self {
            id,
            kind,
            low_addr,
            rtls: Vec::new(),
            in_edges: Vec::new(),
            out_edges: Vec::new(),
            removed: false,
            ord: 0,
            rev_ord: 0,
            loop_stamps: [0, 0],
            rev_loop_stamps: [0, 0],
            imm_pdom: None,
            struct_type: StructType::Seq,
            loop_type: None,
            cond_type: None,
            unstruct_type: UnstructType::Structured,
            cond_follow: None,
            loop_head: None,
            case_head: None,
            latch: None,
            loop_follow: None,
        }
    }

    /// Whether the block has been decoded.
    pub fn is_complete(&self) -> bool {
        !matches!(self.kind, BbKind::Incomplete) && !self.removed
    }

    /// Address of the last RTL, or the block start when empty.
    pub fn hi_addr(&self) -> Address {
        self.rtls.last().map(|r| r.addr).unwrap_or(self.low_addr)
    }

    /// First statement, if any.
    pub fn first_stmt(&self) -> Option<&Statement> {
        self.rtls.iter().flat_map(|r| r.stmts.iter()).next()
    }

    /// Last statement, if any.
    pub fn last_stmt(&self) -> Option<&Statement> {
        self.rtls.iter().rev().flat_map(|r| r.stmts.iter().rev()).next()
    }

    /// Whether `self` is an ancestor of `other` in the structuring DFS
    /// (either parenthesisation).
    pub fn is_ancestor_of(&self, other: &BasicBlock) -> bool {
        (self.loop_stamps[0] < other.loop_stamps[0]
            && self.loop_stamps[1] > other.loop_stamps[1])
            || (self.rev_loop_stamps[0] < other.rev_loop_stamps[0]
                && self.rev_loop_stamps[1] > other.rev_loop_stamps[1])
    }

    /// Whether the edge `self -> dest` is a back edge.
    pub fn has_back_edge_to(&self, dest: &BasicBlock) -> bool {
        dest.id == self.id || dest.is_ancestor_of(self)
    }

    /// Whether this node lies in the loop induced by `header` and `latch`.
    pub fn in_loop(&self, header: &BasicBlock, latch: &BasicBlock) -> bool {
        self.id == latch.id
            || (header.loop_stamps[0] < self.loop_stamps[0]
                && self.loop_stamps[1] < header.loop_stamps[1]
                && self.loop_stamps[0] < latch.loop_stamps[0]
                && latch.loop_stamps[1] < self.loop_stamps[1])
            || (latch.rev_loop_stamps[0] < self.rev_loop_stamps[0]
                && self.rev_loop_stamps[1] < latch.rev_loop_stamps[1]
                && self.rev_loop_stamps[0] < header.rev_loop_stamps[0]
                && header.rev_loop_stamps[1] < self.rev_loop_stamps[1])
    }
}
