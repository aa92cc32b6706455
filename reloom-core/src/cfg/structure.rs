//! Control-flow structuring: loop, conditional and case recovery.
//!
//! Runs after decompilation proper, on a well-formed graph. The passes, in
//! order: DFS time stamps and orderings, immediate post-dominators by an
//! intersect walk, conditional follows, loop discovery by latch node, and a
//! final check that rewrites jumps into or out of loops and case bodies as
//! explicit gotos. The graph must be reducible; irreducible graphs are
//! detected up front and structuring is skipped for them.

use reloom_types::BbId;
use tracing::{debug, warn};

use super::basic_block::{BbKind, CondType, LoopType, StructType, UnstructType};
use crate::cfg::Cfg;
use crate::dataflow::DataFlow;

const BTHEN: usize = 0;
const BELSE: usize = 1;
const PDOM_GIVEUP: usize = 10_000;

impl Cfg {
    /// Structure the graph. No-op when already structured or when there is
    /// no return node to anchor the reverse ordering.
    pub fn structure(&mut self) {
        if self.is_structured() {
            return;
        }
        let Some(ret) = self.find_ret_node() else {
            return;
        };
        self.set_time_stamps(ret);
        if !self.is_reducible() {
            warn!("irreducible control flow; structuring skipped");
            return;
        }
        self.find_immed_pdom();
        self.struct_conds();
        self.struct_loops();
        self.check_conds();
        self.set_structured(true);
    }

    /// DFS parenthesisations and the forward/reverse ordering vectors.
    fn set_time_stamps(&mut self, ret: BbId) {
        let Some(entry) = self.entry() else { return };

        // forward stamps and post-order over out-edges
        let mut time = 1;
        let mut ordering = Vec::new();
        let mut visited = vec![false; self.num_bbs()];
        self.loop_dfs(entry, &mut time, &mut ordering, &mut visited, false);
        for (i, id) in ordering.iter().enumerate() {
            self.bb_mut(*id).ord = i;
        }
        self.ordering = ordering;

        // the same DFS with out-edges visited in reverse order
        let mut time = 1;
        let mut sink = Vec::new();
        let mut visited = vec![false; self.num_bbs()];
        self.loop_dfs(entry, &mut time, &mut sink, &mut visited, true);

        // reverse-graph post-order from the return node
        let mut rev_ordering = Vec::new();
        let mut visited = vec![false; self.num_bbs()];
        self.rev_order_dfs(ret, &mut rev_ordering, &mut visited);
        for (i, id) in rev_ordering.iter().enumerate() {
            self.bb_mut(*id).rev_ord = i;
        }
        self.rev_ordering = rev_ordering;
    }

    fn loop_dfs(
        &mut self,
        n: BbId,
        time: &mut usize,
        post: &mut Vec<BbId>,
        visited: &mut [bool],
        reverse: bool,
    ) {
        visited[n.index()] = true;
        let stamp_in = *time;
        *time += 1;

        let mut succs = self.bb(n).out_edges.clone();
        if reverse {
            succs.reverse();
        }
        for s in succs {
            if !visited[s.index()] {
                self.loop_dfs(s, time, post, visited, reverse);
            }
        }

        let stamps = if reverse {
            &mut self.bb_mut(n).rev_loop_stamps
        } else {
            &mut self.bb_mut(n).loop_stamps
        };
        stamps[0] = stamp_in;
        stamps[1] = *time;
        *time += 1;
        post.push(n);
    }

    fn rev_order_dfs(&mut self, n: BbId, post: &mut Vec<BbId>, visited: &mut [bool]) {
        visited[n.index()] = true;
        let preds = self.bb(n).in_edges.clone();
        for p in preds {
            if !visited[p.index()] {
                self.rev_order_dfs(p, post, visited);
            }
        }
        post.push(n);
    }

    /// Reducibility: every retreating edge must have its head dominate its
    /// tail. Retreating means the head is a forward-DFS ancestor of the
    /// tail (or the edge is a self loop).
    fn is_reducible(&self) -> bool {
        let df = DataFlow::build(self);
        for u in self.bb_order() {
            for v in self.bb(u).out_edges.clone() {
                let vu = (self.bb(v).loop_stamps, self.bb(u).loop_stamps);
                let retreating = v == u || (vu.0[0] < vu.1[0] && vu.0[1] > vu.1[1]);
                if retreating && !df.dominates(v, u) {
                    return false;
                }
            }
        }
        true
    }

    /// Common post-dominator of two candidates: the intersect walk up the
    /// immediate post-dominator chains, bounded in case of damage.
    fn common_pdom(&self, cur: Option<BbId>, succ: Option<BbId>) -> Option<BbId> {
        let mut cur = match (cur, succ) {
            (None, s) => return s,
            (c, None) => return c,
            (Some(c), Some(s)) if self.bb(c).rev_ord == self.bb(s).rev_ord => return Some(c),
            (Some(c), _) => c,
        };
        let mut succ = succ?;
        let orig = cur;

        let mut giveup = 0;
        while giveup < PDOM_GIVEUP && cur != succ {
            if self.bb(cur).rev_ord > self.bb(succ).rev_ord {
                succ = match self.bb(succ).imm_pdom {
                    Some(p) => p,
                    None => return Some(cur),
                };
            } else {
                cur = match self.bb(cur).imm_pdom {
                    Some(p) => p,
                    None => return Some(succ),
                };
            }
            giveup += 1;
        }
        if giveup >= PDOM_GIVEUP {
            debug!("post-dominator intersect walk gave up");
            return Some(orig);
        }
        Some(cur)
    }

    /// Immediate post-dominators, by the adapted Hecht–Ullman scheme: one
    /// bottom-up pass over the reverse ordering, then two refining passes
    /// over the forward ordering for branch nodes and loop members.
    fn find_immed_pdom(&mut self) {
        let rev: Vec<BbId> = self.rev_ordering.clone();
        for cur in rev.iter().rev() {
            for succ in self.bb(*cur).out_edges.clone() {
                if self.bb(succ).rev_ord > self.bb(*cur).rev_ord {
                    let pdom = self.common_pdom(self.bb(*cur).imm_pdom, Some(succ));
                    self.bb_mut(*cur).imm_pdom = pdom;
                }
            }
        }

        let ordering = self.ordering.clone();
        for cur in &ordering {
            if self.bb(*cur).out_edges.len() > 1 {
                for succ in self.bb(*cur).out_edges.clone() {
                    let pdom = self.common_pdom(self.bb(*cur).imm_pdom, Some(succ));
                    self.bb_mut(*cur).imm_pdom = pdom;
                }
            }
        }

        for cur in &ordering {
            if self.bb(*cur).out_edges.len() > 1 {
                for succ in self.bb(*cur).out_edges.clone() {
                    let loop_fix = self.bb(*cur).has_back_edge_to(self.bb(succ))
                        && self.bb(*cur).out_edges.len() > 1
                        && self.bb(succ).imm_pdom.is_some()
                        && self
                            .bb(succ)
                            .imm_pdom
                            .zip(self.bb(*cur).imm_pdom)
                            .is_some_and(|(sp, cp)| self.bb(sp).ord < self.bb(cp).ord);
                    let pdom = if loop_fix {
                        self.common_pdom(self.bb(succ).imm_pdom, self.bb(*cur).imm_pdom)
                    } else {
                        self.common_pdom(self.bb(*cur).imm_pdom, Some(succ))
                    };
                    self.bb_mut(*cur).imm_pdom = pdom;
                }
            }
        }
    }

    /// Tag conditional headers with their follow.
    fn struct_conds(&mut self) {
        let ordering = self.ordering.clone();
        for cur in ordering {
            if self.bb(cur).out_edges.len() <= 1 {
                continue;
            }
            // a two-way header with a back edge gets no follow
            let has_back = self
                .bb(cur)
                .out_edges
                .clone()
                .into_iter()
                .any(|s| self.bb(cur).has_back_edge_to(self.bb(s)));
            if has_back && self.bb(cur).kind == BbKind::TwoWay {
                self.bb_mut(cur).struct_type = StructType::Cond;
                continue;
            }

            let follow = self.bb(cur).imm_pdom;
            let bb = self.bb_mut(cur);
            bb.cond_follow = follow;
            bb.struct_type = StructType::Cond;
            bb.cond_type = Some(if bb.kind == BbKind::Nway {
                CondType::Case
            } else {
                CondType::IfThenElse
            });
            if self.bb(cur).cond_type == Some(CondType::Case) {
                self.set_case_head(cur, follow);
            }
        }
    }

    /// Tag every node in a case body with its head.
    fn set_case_head(&mut self, head: BbId, follow: Option<BbId>) {
        let mut stack = vec![head];
        let mut visited = vec![false; self.num_bbs()];
        while let Some(n) = stack.pop() {
            if visited[n.index()] || Some(n) == follow {
                continue;
            }
            visited[n.index()] = true;
            if self.bb(n).case_head.is_none() {
                self.bb_mut(n).case_head = Some(head);
            }
            for s in self.bb(n).out_edges.clone() {
                if !self.bb(n).has_back_edge_to(self.bb(s)) {
                    stack.push(s);
                }
            }
        }
    }

    /// Identify loops by their latching node, outermost first; tag
    /// members, classify the loop and find its follow.
    fn struct_loops(&mut self) {
        let ordering = self.ordering.clone();
        for cur in ordering.iter().rev().copied() {
            // the proper latching node for cur, per the six criteria
            let mut latch: Option<BbId> = None;
            for pred in self.bb(cur).in_edges.clone() {
                let cand = self.bb(pred);
                let header = self.bb(cur);
                let enclosing_latch = cand
                    .loop_head
                    .map(|h| self.bb(h).latch == Some(pred))
                    .unwrap_or(false);
                if cand.case_head == header.case_head                      // ii
                    && cand.loop_head == header.loop_head                  // iii
                    && cand.kind != BbKind::Nway                           // iv
                    && !enclosing_latch                                    // v
                    && latch.map(|l| self.bb(l).ord > cand.ord).unwrap_or(true) // vi
                    && cand.has_back_edge_to(header)
                // i
                {
                    latch = Some(pred);
                }
            }
            let Some(latch) = latch else { continue };

            self.bb_mut(cur).latch = Some(latch);
            // a latch already structured as a conditional reverts to
            // sequential unless it is the header itself
            if latch != cur && self.bb(latch).struct_type == StructType::Cond {
                self.bb_mut(latch).struct_type = StructType::Seq;
            }
            self.bb_mut(cur).struct_type = StructType::Loop;

            let loop_nodes = self.tag_nodes_in_loop(cur, latch);
            self.determine_loop_type(cur, latch, &loop_nodes);
            self.find_loop_follow(cur, latch, &loop_nodes);
        }
    }

    /// Members of the loop induced by (header, latch), by the stamp pairs.
    fn tag_nodes_in_loop(&mut self, header: BbId, latch: BbId) -> Vec<bool> {
        let mut loop_nodes = vec![false; self.ordering.len()];
        let h_ord = self.bb(header).ord;
        let l_ord = self.bb(latch).ord;
        for i in (l_ord..h_ord).rev() {
            let node = self.ordering[i];
            if self.bb(node).in_loop(self.bb(header), self.bb(latch)) {
                loop_nodes[i] = true;
                self.bb_mut(node).loop_head = Some(header);
            }
        }
        loop_nodes
    }

    fn determine_loop_type(&mut self, header: BbId, latch: BbId, loop_nodes: &[bool]) {
        if self.bb(latch).kind == BbKind::TwoWay {
            self.bb_mut(header).loop_type = Some(LoopType::PostTested);
            if self.bb(header).kind == BbKind::TwoWay && header != latch {
                self.bb_mut(header).struct_type = StructType::LoopCond;
            }
        } else if self.bb(header).kind == BbKind::TwoWay {
            // a two-way header whose follow is inside the loop never exits
            let follow_inside = self
                .bb(header)
                .cond_follow
                .map(|f| loop_nodes[self.bb(f).ord])
                .unwrap_or(false);
            if follow_inside {
                self.bb_mut(header).loop_type = Some(LoopType::Endless);
                self.bb_mut(header).struct_type = StructType::LoopCond;
            } else {
                self.bb_mut(header).loop_type = Some(LoopType::PreTested);
            }
        } else {
            self.bb_mut(header).loop_type = Some(LoopType::Endless);
        }
    }

    fn find_loop_follow(&mut self, header: BbId, latch: BbId, loop_nodes: &[bool]) {
        match self.bb(header).loop_type {
            Some(LoopType::PreTested) => {
                let out = self.bb(header).out_edges.clone();
                let follow = if loop_nodes[self.bb(out[BTHEN]).ord] {
                    out[BELSE]
                } else {
                    out[BTHEN]
                };
                self.bb_mut(header).loop_follow = Some(follow);
            }
            Some(LoopType::PostTested) => {
                let out = self.bb(latch).out_edges.clone();
                let follow = if out[BTHEN] == header { out[BELSE] } else { out[BTHEN] };
                self.bb_mut(header).loop_follow = Some(follow);
            }
            _ => {
                // endless: the highest conditional inside the loop whose own
                // follow lies outside it
                let mut follow: Option<BbId> = None;
                let l_ord = self.bb(latch).ord;
                let mut i = self.bb(header).ord.wrapping_sub(1);
                while i != usize::MAX && i > l_ord {
                    let desc = self.ordering[i];
                    let is_cond = self.bb(desc).struct_type == StructType::Cond
                        && self.bb(desc).cond_follow.is_some()
                        && self.bb(desc).loop_head == Some(header);
                    if !is_cond {
                        i -= 1;
                        continue;
                    }
                    let cond_follow = self.bb(desc).cond_follow.unwrap_or(desc);
                    if loop_nodes[self.bb(cond_follow).ord] {
                        if self.bb(desc).ord > self.bb(cond_follow).ord {
                            i = self.bb(cond_follow).ord.wrapping_sub(1);
                        } else {
                            break;
                        }
                    } else {
                        let out = self.bb(desc).out_edges.clone();
                        let mut succ = Some(out[BTHEN]);
                        if loop_nodes[self.bb(out[BTHEN]).ord] {
                            succ = if loop_nodes[self.bb(out[BELSE]).ord] {
                                None
                            } else {
                                Some(out[BELSE])
                            };
                        }
                        if let Some(s) = succ {
                            let better = follow
                                .map(|f| self.bb(s).ord > self.bb(f).ord)
                                .unwrap_or(true);
                            if better {
                                follow = Some(s);
                            }
                        }
                        i -= 1;
                    }
                }
                if let Some(f) = follow {
                    self.bb_mut(header).loop_follow = Some(f);
                }
            }
        }
    }

    /// Rewrite forward jumps into or out of loops and case bodies as
    /// unstructured conditionals; give follow-less back-edge conditionals
    /// their non-back child as follow.
    fn check_conds(&mut self) {
        let ordering = self.ordering.clone();
        for cur in ordering {
            let is_cond_header = matches!(
                self.bb(cur).struct_type,
                StructType::Cond | StructType::LoopCond
            );
            if is_cond_header
                && self.bb(cur).cond_follow.is_some()
                && self.bb(cur).cond_type != Some(CondType::Case)
            {
                let out = self.bb(cur).out_edges.clone();
                let my_loop_head = if self.bb(cur).struct_type == StructType::LoopCond {
                    Some(cur)
                } else {
                    self.bb(cur).loop_head
                };
                let foll_loop_head = self
                    .bb(cur)
                    .cond_follow
                    .and_then(|f| self.bb(f).loop_head);

                if my_loop_head != foll_loop_head {
                    if let Some(latch) = my_loop_head.and_then(|h| self.bb(h).latch) {
                        // the branch reaching the latch is the loop exit path
                        if self.reaches(out[BTHEN], latch) {
                            self.bb_mut(cur).unstruct_type = UnstructType::JumpInOutLoop;
                            self.bb_mut(cur).cond_type = Some(CondType::IfElse);
                        } else if self.reaches(out[BELSE], latch) {
                            self.bb_mut(cur).unstruct_type = UnstructType::JumpInOutLoop;
                            self.bb_mut(cur).cond_type = Some(CondType::IfThen);
                        }
                    }
                    if self.bb(cur).unstruct_type == UnstructType::Structured {
                        if let Some(head) = foll_loop_head {
                            if self.reaches(out[BTHEN], head) {
                                self.bb_mut(cur).unstruct_type = UnstructType::JumpInOutLoop;
                                self.bb_mut(cur).cond_type = Some(CondType::IfElse);
                            } else if self.reaches(out[BELSE], head) {
                                self.bb_mut(cur).unstruct_type = UnstructType::JumpInOutLoop;
                                self.bb_mut(cur).cond_type = Some(CondType::IfThen);
                            }
                        }
                    }
                }

                // a jump into a case body: a child with a different case head
                if self.bb(cur).unstruct_type == UnstructType::Structured {
                    let my_case = self.bb(cur).case_head;
                    let then_case = self.bb(out[BTHEN]).case_head;
                    let else_case = self.bb(out[BELSE]).case_head;
                    if then_case != my_case || else_case != my_case {
                        let my_follow = my_case.and_then(|h| self.bb(h).cond_follow);
                        if then_case == my_case
                            && (my_case.is_none() || Some(out[BELSE]) != my_follow)
                        {
                            self.bb_mut(cur).unstruct_type = UnstructType::JumpIntoCase;
                            self.bb_mut(cur).cond_type = Some(CondType::IfElse);
                        } else if else_case == my_case
                            && (my_case.is_none() || Some(out[BTHEN]) != my_follow)
                        {
                            self.bb_mut(cur).unstruct_type = UnstructType::JumpIntoCase;
                            self.bb_mut(cur).cond_type = Some(CondType::IfThen);
                        }
                    }
                }
            }

            // follow-less two-way conditionals that are back-edge sources
            if self.bb(cur).struct_type == StructType::Cond
                && self.bb(cur).cond_follow.is_none()
                && self.bb(cur).cond_type != Some(CondType::Case)
                && self.bb(cur).unstruct_type == UnstructType::Structured
            {
                let out = self.bb(cur).out_edges.clone();
                if out.len() > 1 {
                    if self.bb(cur).has_back_edge_to(self.bb(out[BTHEN])) {
                        self.bb_mut(cur).cond_type = Some(CondType::IfThen);
                        self.bb_mut(cur).cond_follow = Some(out[BELSE]);
                    } else if self.bb(cur).has_back_edge_to(self.bb(out[BELSE])) {
                        self.bb_mut(cur).cond_type = Some(CondType::IfElse);
                        self.bb_mut(cur).cond_follow = Some(out[BTHEN]);
                    }
                }
            }
        }
    }

    /// Whether `from` is `to` or an ancestor of it in the structuring DFS.
    fn reaches(&self, from: BbId, to: BbId) -> bool {
        from == to || self.bb(from).is_ancestor_of(self.bb(to))
    }
}
