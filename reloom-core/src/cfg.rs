//! The per-procedure control-flow graph.
//!
//! Blocks live in an arena owned by the CFG and reference each other by
//! [`BbId`]; statements live in their RTLs and are addressed through a
//! statement index rebuilt after structural edits. Construction happens
//! incrementally during decoding through [`Cfg::label`] and
//! [`Cfg::new_bb`]; everything downstream requires a well-formed graph.

mod basic_block;
pub mod structure;

pub use basic_block::{BasicBlock, BbKind, CondType, LoopType, StructType, UnstructType};

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound::{Excluded, Unbounded};

use itertools::Itertools;
use reloom_ir::{Exp, ImplicitAssign, Rtl, Statement, StmtKind, Type};
use reloom_types::{Address, BbId, StmtId};
use tracing::trace;

use crate::error::BbAlreadyExists;

/// Where a statement lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtLoc {
    /// Owning block.
    pub bb: BbId,
    /// RTL index within the block.
    pub rtl: u32,
    /// Statement index within the RTL.
    pub idx: u32,
}

/// Control-flow graph of one procedure.
#[derive(Debug, Default)]
pub struct Cfg {
    bbs: Vec<BasicBlock>,
    addr_map: BTreeMap<Address, BbId>,
    entry: Option<BbId>,
    next_stmt: u32,
    index: Vec<Option<StmtLoc>>,
    index_dirty: bool,
    implicit_map: BTreeMap<Exp, StmtId>,
    /// Forward post-order, filled by structuring.
    pub ordering: Vec<BbId>,
    /// Reverse-graph post-order, filled by structuring.
    pub rev_ordering: Vec<BbId>,
    structured: bool,
}

impl Cfg {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks, tombstones included.
    pub fn num_bbs(&self) -> usize {
        self.bbs.len()
    }

    /// A block by id.
    pub fn bb(&self, id: BbId) -> &BasicBlock {
        &self.bbs[id.index()]
    }

    /// A block by id, mutably.
    pub fn bb_mut(&mut self, id: BbId) -> &mut BasicBlock {
        &mut self.bbs[id.index()]
    }

    /// Ids of live (non-tombstone) blocks in arena order.
    pub fn bb_ids(&self) -> impl Iterator<Item = BbId> + '_ {
        self.bbs
            .iter()
            .filter(|b| !b.removed)
            .map(|b| b.id)
    }

    /// Ids of complete blocks sorted by low address; the deterministic
    /// iteration order of every pass.
    pub fn bb_order(&self) -> Vec<BbId> {
        self.bbs
            .iter()
            .filter(|b| b.is_complete())
            .map(|b| b.id)
            .sorted_by_key(|id| (self.bb(*id).low_addr, *id))
            .collect()
    }

    /// The block starting exactly at `addr`, complete or placeholder.
    pub fn bb_starting_at(&self, addr: Address) -> Option<BbId> {
        self.addr_map.get(&addr).copied()
    }

    /// Whether a complete block starts at `addr`, or `addr` lies strictly
    /// inside one.
    pub fn is_complete_at(&self, addr: Address) -> bool {
        if let Some(id) = self.bb_starting_at(addr) {
            return self.bb(id).is_complete();
        }
        self.enclosing_bb(addr).is_some()
    }

    /// The complete block whose address range strictly contains `addr`.
    fn enclosing_bb(&self, addr: Address) -> Option<BbId> {
        let (_, id) = self
            .addr_map
            .range((Unbounded, Excluded(addr)))
            .next_back()?;
        let bb = self.bb(*id);
        (bb.is_complete() && addr <= bb.hi_addr()).then_some(*id)
    }

    /// Ensure a block boundary at `addr`.
    ///
    /// Returns `true` when a block already starts there or an existing
    /// block was split at `addr`; in the split case, if `*cur` was the
    /// split block, `*cur` is updated to the bottom half. Returns `false`
    /// after recording a forward-reference placeholder.
    pub fn label(&mut self, addr: Address, cur: &mut BbId) -> bool {
        if self.addr_map.contains_key(&addr) {
            return true;
        }
        if let Some(owner) = self.enclosing_bb(addr) {
            if let Some(bottom) = self.split_bb(owner, addr) {
                if *cur == owner {
                    *cur = bottom;
                }
                return true;
            }
        }
        let id = self.alloc_bb(BbKind::Incomplete, addr);
        self.addr_map.insert(addr, id);
        false
    }

    /// Complete a placeholder or create a new block from `rtls`.
    ///
    /// If a complete block already starts at the first RTL's address, the
    /// [`BbAlreadyExists`] signal carries it and nothing changes. If the
    /// new block's range overlaps a higher block, the new block is
    /// truncated at the overlap and becomes a fall-through into it. The
    /// returned block is the one that should receive out-edges; callers
    /// check its kind first, since truncation already set the fall edge.
    pub fn new_bb(
        &mut self,
        rtls: Vec<Rtl>,
        kind: BbKind,
        num_out: usize,
    ) -> Result<BbId, BbAlreadyExists> {
        debug_assert!(!rtls.is_empty());
        let addr = rtls.first().map(|r| r.addr).unwrap_or(Address::INVALID);

        let id = match self.bb_starting_at(addr) {
            Some(existing) if self.bb(existing).is_complete() => {
                return Err(BbAlreadyExists(existing));
            }
            Some(placeholder) => placeholder,
            None => {
                let id = self.alloc_bb(BbKind::Incomplete, addr);
                self.addr_map.insert(addr, id);
                id
            }
        };

        {
            let bb = self.bb_mut(id);
            bb.kind = kind;
            bb.rtls = rtls;
        }
        self.index_dirty = true;

        // Truncate at an overlap with the next block start.
        let hi = self.bb(id).hi_addr();
        let next_start = self
            .addr_map
            .range((Excluded(addr), Unbounded))
            .next()
            .map(|(a, i)| (*a, *i));
        if let Some((start, next_id)) = next_start {
            if start <= hi {
                trace!(%addr, %start, "truncating overlapping block");
                let bb = self.bb_mut(id);
                bb.rtls.retain(|r| r.addr < start);
                bb.kind = BbKind::Fall;
                self.add_out_edge(id, next_id);
                return Ok(id);
            }
        }

        let _ = num_out;
        Ok(id)
    }

    fn alloc_bb(&mut self, kind: BbKind, addr: Address) -> BbId {
        let id = BbId::new(self.bbs.len() as u32);
        self.bbs.push(BasicBlock::new(id, kind, addr));
        id
    }

    /// Split `owner` at `addr`; the bottom half inherits kind and
    /// out-edges. Returns the bottom half, or `None` when `addr` is not on
    /// an instruction boundary.
    fn split_bb(&mut self, owner: BbId, addr: Address) -> Option<BbId> {
        let split_at = self
            .bb(owner)
            .rtls
            .iter()
            .position(|r| r.addr == addr)?;

        let bottom = self.alloc_bb(self.bb(owner).kind, addr);
        self.addr_map.insert(addr, bottom);

        let (tail, old_out) = {
            let top = self.bb_mut(owner);
            let tail: Vec<Rtl> = top.rtls.split_off(split_at);
            let old_out = core::mem::take(&mut top.out_edges);
            top.kind = BbKind::Fall;
            (tail, old_out)
        };

        {
            let bot = self.bb_mut(bottom);
            bot.rtls = tail;
            bot.out_edges = old_out.clone();
        }
        for succ in old_out {
            let edges = &mut self.bb_mut(succ).in_edges;
            for e in edges.iter_mut() {
                if *e == owner {
                    *e = bottom;
                }
            }
        }
        self.add_out_edge(owner, bottom);
        self.index_dirty = true;
        bottom.into()
    }

    /// Link `src -> dst`, keeping both edge lists consistent.
    pub fn add_out_edge(&mut self, src: BbId, dst: BbId) {
        self.bb_mut(src).out_edges.push(dst);
        self.bb_mut(dst).in_edges.push(src);
    }

    /// Link `src` to the block starting at `addr`, splitting or recording a
    /// placeholder as needed. Returns the effective source, which differs
    /// from `src` when the destination lay inside `src` itself.
    pub fn add_out_edge_addr(&mut self, src: BbId, addr: Address) -> BbId {
        let mut cur = src;
        let _ = self.label(addr, &mut cur);
        if let Some(dst) = self.bb_starting_at(addr) {
            self.add_out_edge(cur, dst);
        }
        cur
    }

    /// Record the entry block.
    pub fn set_entry_at(&mut self, addr: Address) {
        self.entry = self.bb_starting_at(addr);
    }

    /// The entry block.
    pub fn entry(&self) -> Option<BbId> {
        self.entry
    }

    /// The canonical return block: the lowest-address complete return
    /// block, or any block calling a non-returning procedure when the
    /// procedure never returns.
    pub fn find_ret_node(&self) -> Option<BbId> {
        let mut ret = None;
        for id in self.bb_order() {
            if self.bb(id).kind == BbKind::Ret {
                ret = Some(id);
                break;
            }
        }
        ret.or_else(|| {
            self.bb_order()
                .into_iter()
                .find(|id| self.bb(*id).out_edges.is_empty())
        })
    }

    /// Whether every block is complete and the edge lists are mutually
    /// consistent.
    pub fn is_well_formed(&self) -> bool {
        for bb in self.bbs.iter().filter(|b| !b.removed) {
            if !bb.is_complete() {
                return false;
            }
            for out in &bb.out_edges {
                let dst = self.bb(*out);
                if !dst.is_complete() || !dst.in_edges.contains(&bb.id) {
                    return false;
                }
            }
            for inp in &bb.in_edges {
                if !self.bb(*inp).out_edges.contains(&bb.id) {
                    return false;
                }
            }
        }
        true
    }

    /// Whether a block holds nothing but an unconditional jump.
    fn is_jump_only(&self, id: BbId) -> bool {
        let bb = self.bb(id);
        bb.kind == BbKind::OneWay
            && bb.out_edges.len() == 1
            && bb
                .rtls
                .iter()
                .flat_map(|r| r.stmts.iter())
                .all(|s| matches!(s.kind, StmtKind::Goto(_)))
    }

    /// Fold chains of jump-only blocks out of the graph.
    pub fn compress(&mut self) {
        let ids: Vec<BbId> = self.bb_ids().collect();
        for id in &ids {
            if self.bb(*id).removed {
                continue;
            }
            for i in 0..self.bb(*id).out_edges.len() {
                // walk the chain of jump-only blocks, guarding on cycles
                let mut seen = BTreeSet::new();
                let mut dst = self.bb(*id).out_edges[i];
                while self.is_jump_only(dst) && dst != *id && seen.insert(dst) {
                    dst = self.bb(dst).out_edges[0];
                }
                let old = self.bb(*id).out_edges[i];
                if dst != old {
                    self.bb_mut(*id).out_edges[i] = dst;
                    self.bb_mut(old).in_edges.retain(|e| e != id);
                    self.bb_mut(dst).in_edges.push(*id);
                }
            }
        }
        // drop jump-only blocks nothing reaches any more
        for id in ids {
            if !self.bb(id).removed
                && self.is_jump_only(id)
                && self.bb(id).in_edges.is_empty()
                && Some(id) != self.entry
            {
                self.remove_bb(id);
            }
        }
    }

    /// Tombstone a block, unlinking its remaining edges.
    pub fn remove_bb(&mut self, id: BbId) {
        let outs = core::mem::take(&mut self.bb_mut(id).out_edges);
        for dst in outs {
            self.bb_mut(dst).in_edges.retain(|e| *e != id);
        }
        let ins = core::mem::take(&mut self.bb_mut(id).in_edges);
        for src in ins {
            self.bb_mut(src).out_edges.retain(|e| *e != id);
        }
        let low = self.bb(id).low_addr;
        if self.addr_map.get(&low) == Some(&id) {
            self.addr_map.remove(&low);
        }
        let bb = self.bb_mut(id);
        bb.rtls.clear();
        bb.removed = true;
        self.index_dirty = true;
    }

    /// Assign stable numbers to unnumbered statements, set block
    /// back-references, and rebuild the statement index.
    pub fn number_statements(&mut self) {
        for id in self.bb_order() {
            let bb = &mut self.bbs[id.index()];
            for rtl in &mut bb.rtls {
                for stmt in &mut rtl.stmts {
                    if !stmt.id.is_valid() {
                        stmt.id = StmtId::new(self.next_stmt);
                        self.next_stmt += 1;
                    }
                    stmt.bb = id;
                }
            }
        }
        self.reindex();
    }

    /// Rebuild the statement index after structural edits.
    pub fn reindex(&mut self) {
        self.index = vec![None; self.next_stmt as usize];
        for bb in self.bbs.iter_mut().filter(|b| !b.removed) {
            for (ri, rtl) in bb.rtls.iter_mut().enumerate() {
                for (si, stmt) in rtl.stmts.iter_mut().enumerate() {
                    stmt.bb = bb.id;
                    if stmt.id.is_valid() {
                        self.index[stmt.id.index()] = Some(StmtLoc {
                            bb: bb.id,
                            rtl: ri as u32,
                            idx: si as u32,
                        });
                    }
                }
            }
        }
        self.index_dirty = false;
    }

    /// A statement by number.
    pub fn stmt(&self, id: StmtId) -> Option<&Statement> {
        debug_assert!(!self.index_dirty, "statement index is stale");
        let loc = (*self.index.get(id.index())?)?;
        self.bbs[loc.bb.index()]
            .rtls
            .get(loc.rtl as usize)?
            .stmts
            .get(loc.idx as usize)
    }

    /// A statement by number, mutably.
    pub fn stmt_mut(&mut self, id: StmtId) -> Option<&mut Statement> {
        debug_assert!(!self.index_dirty, "statement index is stale");
        let loc = (*self.index.get(id.index())?)?;
        self.bbs[loc.bb.index()]
            .rtls
            .get_mut(loc.rtl as usize)?
            .stmts
            .get_mut(loc.idx as usize)
    }

    /// Statement numbers in program order.
    pub fn stmt_ids(&self) -> Vec<StmtId> {
        let mut out = Vec::new();
        for id in self.bb_order() {
            for rtl in &self.bb(id).rtls {
                for stmt in &rtl.stmts {
                    out.push(stmt.id);
                }
            }
        }
        out
    }

    /// Visit every statement in program order.
    pub fn for_each_stmt(&self, f: &mut dyn FnMut(&Statement)) {
        for id in self.bb_order() {
            for rtl in &self.bb(id).rtls {
                for stmt in &rtl.stmts {
                    f(stmt);
                }
            }
        }
    }

    /// Visit every statement in program order, mutably.
    pub fn for_each_stmt_mut(&mut self, f: &mut dyn FnMut(&mut Statement)) {
        for id in self.bb_order() {
            let bb = &mut self.bbs[id.index()];
            for rtl in &mut bb.rtls {
                for stmt in &mut rtl.stmts {
                    f(stmt);
                }
            }
        }
    }

    /// Remove the given statements from their RTLs.
    pub fn remove_stmts(&mut self, ids: &BTreeSet<StmtId>) {
        if ids.is_empty() {
            return;
        }
        for bb in self.bbs.iter_mut().filter(|b| !b.removed) {
            for rtl in &mut bb.rtls {
                rtl.stmts.retain(|s| !ids.contains(&s.id));
            }
        }
        self.implicit_map.retain(|_, id| !ids.contains(id));
        self.reindex();
    }

    /// Insert a phi-assignment for `lhs` at the top of `bb`, one operand
    /// slot per in-edge. The caller reindexes after the batch.
    pub fn insert_phi(&mut self, bb: BbId, lhs: Exp) -> StmtId {
        let id = StmtId::new(self.next_stmt);
        self.next_stmt += 1;
        let args = self
            .bb(bb)
            .in_edges
            .iter()
            .map(|pred| reloom_ir::PhiArg {
                pred: *pred,
                def: None,
            })
            .collect();
        let mut stmt = Statement::new(StmtKind::Phi(reloom_ir::PhiAssign {
            ty: Type::Void,
            lhs,
            args,
        }));
        stmt.id = id;
        stmt.bb = bb;
        let block = self.bb_mut(bb);
        if block.rtls.is_empty() {
            let addr = block.low_addr;
            block.rtls.push(Rtl::new(addr));
        }
        if let Some(first) = block.rtls.first_mut() {
            first.prepend(stmt);
        }
        self.index_dirty = true;
        id
    }

    /// The implicit assignment materialising the entry value of `loc`,
    /// created at the entry block on first request.
    pub fn find_or_create_implicit(&mut self, loc: &Exp) -> StmtId {
        if let Some(id) = self.implicit_map.get(loc) {
            return *id;
        }
        let entry = self.entry.unwrap_or(BbId::new(0));
        let id = StmtId::new(self.next_stmt);
        self.next_stmt += 1;
        let mut stmt = Statement::new(StmtKind::Implicit(ImplicitAssign {
            ty: Type::Void,
            lhs: loc.clone(),
        }));
        stmt.id = id;
        stmt.bb = entry;
        let block = self.bb_mut(entry);
        if block.rtls.is_empty() {
            let addr = block.low_addr;
            block.rtls.push(Rtl::new(addr));
        }
        if let Some(first) = block.rtls.first_mut() {
            first.prepend(stmt);
        }
        self.implicit_map.insert(loc.clone(), id);
        self.index_dirty = true;
        id
    }

    /// The implicit assignment for `loc`, if one was materialised.
    pub fn implicit_of(&self, loc: &Exp) -> Option<StmtId> {
        self.implicit_map.get(loc).copied()
    }

    /// Insert a junction marker at the top of every confluence block.
    pub fn add_junctions(&mut self) {
        for id in self.bb_order() {
            let needs = self.bb(id).in_edges.len() > 1
                && !self
                    .bb(id)
                    .first_stmt()
                    .is_some_and(|s| s.is_junction());
            if needs {
                let sid = StmtId::new(self.next_stmt);
                self.next_stmt += 1;
                let mut stmt = Statement::new(StmtKind::Junction);
                stmt.id = sid;
                stmt.bb = id;
                let block = self.bb_mut(id);
                if block.rtls.is_empty() {
                    let addr = block.low_addr;
                    block.rtls.push(Rtl::new(addr));
                }
                if let Some(first) = block.rtls.first_mut() {
                    first.prepend(stmt);
                }
            }
        }
        self.index_dirty = true;
        self.reindex();
    }

    /// Remove every junction marker.
    pub fn remove_junctions(&mut self) {
        for bb in self.bbs.iter_mut().filter(|b| !b.removed) {
            for rtl in &mut bb.rtls {
                rtl.stmts.retain(|s| !s.is_junction());
            }
        }
        self.reindex();
    }

    /// Simplify every statement.
    pub fn simplify_all(&mut self) {
        self.for_each_stmt_mut(&mut |s| s.simplify());
    }

    /// Whether structuring has run.
    pub fn is_structured(&self) -> bool {
        self.structured
    }

    pub(crate) fn set_structured(&mut self, v: bool) {
        self.structured = v;
    }
}
