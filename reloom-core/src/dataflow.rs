//! Dominators, dominance frontiers, phi placement and SSA renaming.
//!
//! Dominators come from the classic Lengauer–Tarjan semidominator
//! formulation with union-find path compression; frontiers and phi
//! placement follow Cytron et al.; renaming is the stack-based walk over
//! the dominator tree. What may be renamed is decided by [`RenamePolicy`]:
//! registers and temporaries always, memory locations only while their
//! address is primitive and not blacklisted as address-escaped.

use std::collections::{BTreeMap, BTreeSet};

use reloom_ir::exp::visitor::{ExpModifier, PreModify};
use reloom_ir::{Exp, StmtKind, Terminal};
use reloom_types::{BbId, StmtId};
use tracing::{debug, trace};

use crate::cfg::Cfg;

/// Dominator tree and dominance frontiers of one CFG.
#[derive(Debug, Default)]
pub struct DataFlow {
    /// DFS preorder of reachable blocks.
    pub order: Vec<BbId>,
    idom: Vec<Option<BbId>>,
    dom_children: Vec<Vec<BbId>>,
    df: Vec<BTreeSet<BbId>>,
}

impl DataFlow {
    /// Compute dominators and frontiers for `cfg`.
    pub fn build(cfg: &Cfg) -> Self {
        let mut df = Self {
            idom: vec![None; cfg.num_bbs()],
            dom_children: vec![Vec::new(); cfg.num_bbs()],
            df: vec![BTreeSet::new(); cfg.num_bbs()],
            order: Vec::new(),
        };
        df.calculate_dominators(cfg);
        df.compute_df(cfg);
        df
    }

    /// Immediate dominator of `n`; `None` for the entry and unreachable
    /// blocks.
    pub fn idom(&self, n: BbId) -> Option<BbId> {
        self.idom.get(n.index()).copied().flatten()
    }

    /// Children of `n` in the dominator tree.
    pub fn dom_children(&self, n: BbId) -> &[BbId] {
        &self.dom_children[n.index()]
    }

    /// Dominance frontier of `n`.
    pub fn frontier(&self, n: BbId) -> &BTreeSet<BbId> {
        &self.df[n.index()]
    }

    /// Whether `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: BbId, b: BbId) -> bool {
        let mut cur = Some(b);
        while let Some(n) = cur {
            if n == a {
                return true;
            }
            cur = self.idom(n);
        }
        false
    }

    /// Lengauer–Tarjan: depth-first numbering, semidominators via the
    /// union-find eval/link structure, then immediate dominators.
    fn calculate_dominators(&mut self, cfg: &Cfg) {
        let Some(entry) = cfg.entry() else { return };

        // depth-first spanning tree
        let mut dfnum: Vec<Option<usize>> = vec![None; cfg.num_bbs()];
        let mut vertex: Vec<BbId> = Vec::new();
        let mut parent: Vec<usize> = Vec::new();
        let mut stack = vec![(entry, usize::MAX)];
        while let Some((n, p)) = stack.pop() {
            if dfnum[n.index()].is_some() {
                continue;
            }
            let num = vertex.len();
            dfnum[n.index()] = Some(num);
            vertex.push(n);
            parent.push(p);
            for s in cfg.bb(n).out_edges.iter().rev() {
                if dfnum[s.index()].is_none() {
                    stack.push((*s, num));
                }
            }
        }
        let n = vertex.len();
        if n == 0 {
            return;
        }
        self.order = vertex.clone();

        let mut semi: Vec<usize> = (0..n).collect();
        let mut ancestor: Vec<Option<usize>> = vec![None; n];
        let mut label: Vec<usize> = (0..n).collect();
        let mut bucket: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut idom_n: Vec<usize> = vec![0; n];

        fn compress(
            v: usize,
            ancestor: &mut [Option<usize>],
            label: &mut [usize],
            semi: &[usize],
        ) {
            let mut path = Vec::new();
            let mut u = v;
            while let Some(a) = ancestor[u] {
                if ancestor[a].is_some() {
                    path.push(u);
                    u = a;
                } else {
                    break;
                }
            }
            while let Some(x) = path.pop() {
                let a = match ancestor[x] {
                    Some(a) => a,
                    None => continue,
                };
                if semi[label[a]] < semi[label[x]] {
                    label[x] = label[a];
                }
                ancestor[x] = ancestor[a];
            }
        }

        fn eval(
            v: usize,
            ancestor: &mut [Option<usize>],
            label: &mut [usize],
            semi: &[usize],
        ) -> usize {
            if ancestor[v].is_none() {
                v
            } else {
                compress(v, ancestor, label, semi);
                label[v]
            }
        }

        for w in (1..n).rev() {
            let p = parent[w];
            for pred in &cfg.bb(vertex[w]).in_edges {
                let Some(v) = dfnum[pred.index()] else { continue };
                let u = eval(v, &mut ancestor, &mut label, &semi);
                if semi[u] < semi[w] {
                    semi[w] = semi[u];
                }
            }
            bucket[semi[w]].push(w);
            ancestor[w] = Some(p);
            for v in core::mem::take(&mut bucket[p]) {
                let u = eval(v, &mut ancestor, &mut label, &semi);
                idom_n[v] = if semi[u] < semi[v] { u } else { p };
            }
        }
        for w in 1..n {
            if idom_n[w] != semi[w] {
                idom_n[w] = idom_n[idom_n[w]];
            }
        }

        for w in 1..n {
            let b = vertex[w];
            let d = vertex[idom_n[w]];
            self.idom[b.index()] = Some(d);
            self.dom_children[d.index()].push(b);
        }
    }

    /// Dominance frontiers, bottom-up over the dominator tree: the local
    /// part from successors not strictly dominated, the up part passed on
    /// from dominator-tree children.
    fn compute_df(&mut self, cfg: &Cfg) {
        let order = self.order.clone();
        for n in order.iter().rev() {
            let mut set: BTreeSet<BbId> = BTreeSet::new();
            for y in &cfg.bb(*n).out_edges {
                if self.idom(*y) != Some(*n) {
                    set.insert(*y);
                }
            }
            for c in self.dom_children(*n).to_vec() {
                for y in self.frontier(c).clone() {
                    if self.idom(y) != Some(*n) {
                        set.insert(y);
                    }
                }
            }
            self.df[n.index()] = set;
        }
    }

    /// Insert phi-assignments at the iterated dominance frontier of every
    /// renameable location's definition sites. Returns how many were
    /// placed.
    pub fn place_phi_functions(&self, cfg: &mut Cfg, policy: &RenamePolicy) -> usize {
        let mut defsites: BTreeMap<Exp, BTreeSet<BbId>> = BTreeMap::new();
        cfg.for_each_stmt(&mut |s| {
            let mut defs = Vec::new();
            s.definitions(&mut defs);
            for d in defs {
                let base = d.unsubscripted();
                if policy.can_rename(&base) {
                    defsites.entry(base).or_default().insert(s.bb);
                }
            }
        });

        let mut placed = 0;
        for (loc, sites) in defsites {
            let mut worklist: Vec<BbId> = sites.iter().copied().collect();
            let mut has_phi: BTreeSet<BbId> = BTreeSet::new();
            while let Some(x) = worklist.pop() {
                for y in self.frontier(x).clone() {
                    if has_phi.insert(y) {
                        cfg.insert_phi(y, loc.clone());
                        placed += 1;
                        worklist.push(y);
                    }
                }
            }
        }
        cfg.reindex();
        debug!(placed, "phi placement done");
        placed
    }

    /// Rename into SSA: the depth-first walk over the dominator tree with
    /// one definition stack per location, then materialisation of the
    /// entry-value implicit assignments for uses that reached an empty
    /// stack.
    pub fn rename(&self, cfg: &mut Cfg, policy: &RenamePolicy) {
        let Some(entry) = cfg.entry() else { return };
        let mut stacks: BTreeMap<Exp, Vec<StmtId>> = BTreeMap::new();
        self.rename_block(entry, cfg, &mut stacks, policy);
        self.materialise_implicits(cfg);
    }

    fn rename_block(
        &self,
        n: BbId,
        cfg: &mut Cfg,
        stacks: &mut BTreeMap<Exp, Vec<StmtId>>,
        policy: &RenamePolicy,
    ) {
        let mut pushes: Vec<Exp> = Vec::new();

        let nr = cfg.bb(n).rtls.len();
        for ri in 0..nr {
            let ns = cfg.bb(n).rtls[ri].stmts.len();
            for si in 0..ns {
                let (sid, is_phi) = {
                    let s = &cfg.bb(n).rtls[ri].stmts[si];
                    (s.id, s.is_phi())
                };
                if !is_phi {
                    let mut renamer = Renamer { stacks, policy };
                    let stmt = &mut cfg.bb_mut(n).rtls[ri].stmts[si];
                    stmt.map_use_exps(&mut renamer);
                }
                // calls cache the caller-side reaching definitions for
                // later bypass; returns record every reaching definition
                // as a candidate modified
                {
                    let stmt = &mut cfg.bb_mut(n).rtls[ri].stmts[si];
                    match &mut stmt.kind {
                        StmtKind::Call(call) => {
                            for (base, st) in stacks.iter() {
                                if let Some(top) = st.last() {
                                    call.use_col
                                        .insert(Exp::subscript(base.clone(), Some(*top)));
                                }
                            }
                        }
                        StmtKind::Ret(ret) => {
                            for (base, st) in stacks.iter() {
                                if let Some(top) = st.last() {
                                    let reaching =
                                        Exp::subscript(base.clone(), Some(*top));
                                    ret.col.update(reloom_ir::Assign::new(
                                        base.clone(),
                                        reaching.clone(),
                                    ));
                                    if !ret.modifieds.iter().any(|m| m.lhs == *base) {
                                        ret.modifieds
                                            .push(reloom_ir::Assign::new(base.clone(), reaching));
                                    }
                                }
                            }
                        }
                        _ => {}
                    }
                }
                let mut defs = Vec::new();
                cfg.bb(n).rtls[ri].stmts[si].definitions(&mut defs);
                for d in defs {
                    let base = d.unsubscripted();
                    if policy.can_rename(&base) {
                        stacks.entry(base.clone()).or_default().push(sid);
                        pushes.push(base);
                    }
                }
            }
        }

        // fill our slot of every successor phi
        for s in cfg.bb(n).out_edges.clone() {
            let bb = cfg.bb_mut(s);
            for rtl in &mut bb.rtls {
                for stmt in &mut rtl.stmts {
                    if let StmtKind::Phi(phi) = &mut stmt.kind {
                        let top = stacks
                            .get(&phi.lhs.unsubscripted())
                            .and_then(|st| st.last())
                            .copied();
                        for arg in phi.args.iter_mut().filter(|a| a.pred == n) {
                            arg.def = top;
                        }
                    }
                }
            }
        }

        for c in self.dom_children(n).to_vec() {
            self.rename_block(c, cfg, stacks, policy);
        }

        for base in pushes {
            if let Some(st) = stacks.get_mut(&base) {
                st.pop();
            }
        }
    }

    /// Turn every `l{None}` into a reference to an implicit assignment at
    /// the entry block, and point empty phi slots at them too.
    fn materialise_implicits(&self, cfg: &mut Cfg) {
        let mut bases: BTreeSet<Exp> = BTreeSet::new();
        cfg.for_each_stmt(&mut |s| {
            let mut refs = Vec::new();
            s.collect_refs(&mut refs);
            for (base, def) in refs {
                if def.is_none() {
                    bases.insert(base);
                }
            }
        });
        let mut map: BTreeMap<Exp, StmtId> = BTreeMap::new();
        for base in bases {
            let id = cfg.find_or_create_implicit(&base);
            map.insert(base, id);
        }
        cfg.reindex();

        let mut binder = ImplicitBinder { map: &map };
        cfg.for_each_stmt_mut(&mut |s| {
            s.map_use_exps(&mut binder);
            if let StmtKind::Phi(phi) = &mut s.kind {
                let base = phi.lhs.unsubscripted();
                for arg in phi.args.iter_mut().filter(|a| a.def.is_none()) {
                    arg.def = map.get(&base).copied();
                }
            }
        });
        trace!("implicit entry assignments materialised");
    }
}

/// Decides what may be renamed into SSA.
#[derive(Debug, Default)]
pub struct RenamePolicy {
    /// Locations proven address-escaped; never renamed.
    pub blacklist: BTreeSet<Exp>,
}

impl RenamePolicy {
    /// Policy with an empty blacklist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `loc` may be renamed. `loc` may still carry subscripts on
    /// sub-expressions; those count as resolved.
    pub fn can_rename(&self, loc: &Exp) -> bool {
        if self.blacklist.contains(&loc.unsubscripted()) {
            return false;
        }
        match loc {
            Exp::RegOf(idx) => idx.int_value().is_some(),
            Exp::Temp(_) | Exp::Local(_) | Exp::Param(_) => true,
            Exp::Terminal(Terminal::Flags) | Exp::Terminal(Terminal::CarryFlag) => true,
            // memory only behind a primitive address: nothing unresolved
            // (an unsubscripted memory-of) may appear below it
            Exp::MemOf(addr) => !has_unresolved_mem(addr),
            _ => false,
        }
    }
}

/// Whether an unsubscripted memory-of occurs anywhere in `e`. Subscripted
/// sub-trees are resolved and do not count.
fn has_unresolved_mem(e: &Exp) -> bool {
    match e {
        Exp::Ref(_, _) => false,
        Exp::MemOf(_) => true,
        other => {
            let mut found = false;
            other.for_children(&mut |c| found |= has_unresolved_mem(c));
            found
        }
    }
}

struct Renamer<'a> {
    stacks: &'a BTreeMap<Exp, Vec<StmtId>>,
    policy: &'a RenamePolicy,
}

impl ExpModifier for Renamer<'_> {
    fn pre_modify(&mut self, e: Exp) -> PreModify {
        // already-subscripted trees are left alone
        if e.is_ref() {
            return PreModify {
                exp: e,
                recurse: false,
                changed: false,
            };
        }
        PreModify::recurse(e)
    }

    fn post_modify(&mut self, e: Exp) -> (Exp, bool) {
        let base = e.unsubscripted();
        if e.is_location() && self.policy.can_rename(&base) {
            let def = self.stacks.get(&base).and_then(|st| st.last()).copied();
            (Exp::subscript(e, def), true)
        } else {
            (e, false)
        }
    }
}

struct ImplicitBinder<'a> {
    map: &'a BTreeMap<Exp, StmtId>,
}

impl ExpModifier for ImplicitBinder<'_> {
    fn post_modify(&mut self, e: Exp) -> (Exp, bool) {
        match e {
            Exp::Ref(base, None) => {
                let id = self.map.get(&base.unsubscripted()).copied();
                let changed = id.is_some();
                (Exp::Ref(base, id), changed)
            }
            other => (other, false),
        }
    }
}

/// Strip every SSA subscript in the procedure, remove phis and implicit
/// assignments, and forget the statement index entries for them. Used when
/// the rename blacklist grows and renaming restarts from scratch.
pub fn unsubscript_all(cfg: &mut Cfg) {
    let mut dead: BTreeSet<StmtId> = BTreeSet::new();
    cfg.for_each_stmt(&mut |s| {
        if s.is_phi() || s.is_implicit() {
            dead.insert(s.id);
        }
    });
    cfg.remove_stmts(&dead);

    struct Strip;
    impl ExpModifier for Strip {
        fn post_modify(&mut self, e: Exp) -> (Exp, bool) {
            match e {
                Exp::Ref(base, _) => (*base, true),
                other => (other, false),
            }
        }
    }
    cfg.for_each_stmt_mut(&mut |s| {
        let mut strip = Strip;
        s.map_all_exps(&mut strip);
        // collectors hold subscripted forms; they are rebuilt by the next
        // rename and the middle phase
        match &mut s.kind {
            StmtKind::Call(call) => {
                call.use_col.clear();
                call.def_col.clear();
                call.defines.clear();
            }
            StmtKind::Ret(ret) => {
                ret.col.clear();
                ret.modifieds.clear();
                ret.returns.clear();
            }
            _ => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::BbKind;
    use reloom_types::Address;

    // diamond: 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3
    fn diamond() -> Cfg {
        let mut cfg = Cfg::new();
        let mut ids = Vec::new();
        for i in 0..4u64 {
            let addr = Address::new(0x1000 + i * 0x10);
            let rtls = vec![reloom_ir::Rtl::new(addr)];
            let kind = if i == 0 { BbKind::TwoWay } else { BbKind::Fall };
            ids.push(cfg.new_bb(rtls, kind, 0).unwrap());
        }
        cfg.add_out_edge(ids[0], ids[1]);
        cfg.add_out_edge(ids[0], ids[2]);
        cfg.add_out_edge(ids[1], ids[3]);
        cfg.add_out_edge(ids[2], ids[3]);
        cfg.set_entry_at(Address::new(0x1000));
        cfg
    }

    #[test]
    fn diamond_dominators_and_frontier() {
        let cfg = diamond();
        let df = DataFlow::build(&cfg);
        let b = |i: u32| BbId::new(i);
        assert_eq!(df.idom(b(1)), Some(b(0)));
        assert_eq!(df.idom(b(2)), Some(b(0)));
        assert_eq!(df.idom(b(3)), Some(b(0)));
        assert!(df.frontier(b(1)).contains(&b(3)));
        assert!(df.frontier(b(2)).contains(&b(3)));
        assert!(df.frontier(b(0)).is_empty());
        assert!(df.dominates(b(0), b(3)));
        assert!(!df.dominates(b(1), b(3)));
    }
}
