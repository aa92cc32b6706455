//! The interprocedural decompilation driver.
//!
//! Walks the call graph depth-first from the entry procedure, carrying the
//! current path to detect recursion. Each procedure goes through decode,
//! initialise, early (SSA), a descent into its callees, and a middle phase
//! (propagation, preserveds, parameters); strongly-connected components
//! are driven to a fixed point as one group. Whole-program post-passes
//! remove unused returns, run type analysis, lower out of SSA and emit.

use std::collections::{BTreeMap, BTreeSet};

use reloom_ir::{Assign, Exp, StmtKind, Type};
use reloom_types::{Address, ProcId, StmtId};
use tracing::{debug, info, warn};

use crate::dataflow::{unsubscript_all, DataFlow, RenamePolicy};
use crate::decode::{decode_proc, InstructionDecoder};
use crate::emit::{generate_prog, CodeEmitter};
use crate::error::{DecompileError, Result};
use crate::proc::{ProcStatus, Signature};
use crate::prog::Prog;
use crate::propagate::{propagate_statements, remove_dead_code};
use crate::session::{DebugFlags, Session};
use crate::ssa_out::from_ssa;
use crate::typing::dfa_type_analysis;

/// Drives a whole decompilation over a program.
pub struct Decompiler<'a, D: InstructionDecoder> {
    session: &'a Session,
    decoder: &'a D,
}

impl<'a, D: InstructionDecoder> Decompiler<'a, D> {
    /// New driver over `session` and the target's `decoder`.
    pub fn new(session: &'a Session, decoder: &'a D) -> Self {
        Self { session, decoder }
    }

    /// Decompile the program from its entry point (or the session
    /// override), then run the whole-program post-passes.
    pub fn decompile(&self, prog: &mut Prog) -> Result<()> {
        let entry = self
            .session
            .entry
            .unwrap_or_else(|| prog.image().entry_point());
        if !entry.is_valid() {
            return Err(DecompileError::Load("no entry point".into()));
        }
        let root = prog
            .ensure_user_proc(entry)
            .ok_or_else(|| DecompileError::Load(format!("entry {entry} was deleted")))?;

        let mut path = Vec::new();
        let leftover = self.decompile_proc(prog, root, &mut path)?;
        // a cycle through the entry procedure has no outer caller to close
        // it; close it here
        if !leftover.is_empty() {
            self.recursion_group_analysis(prog, &leftover);
        }

        self.remove_unused_returns(prog);
        self.discover_globals(prog);
        self.final_phase(prog);
        info!(name = %prog.name, "decompilation finished");
        Ok(())
    }

    /// Emit the analysed program through `em`.
    pub fn generate_code(&self, prog: &mut Prog, em: &mut dyn CodeEmitter) {
        generate_prog(prog, em);
    }

    /// The recursive decompile state machine. Returns the cycle group this
    /// procedure belongs to, empty for non-recursive procedures.
    fn decompile_proc(
        &self,
        prog: &mut Prog,
        id: ProcId,
        path: &mut Vec<ProcId>,
    ) -> Result<BTreeSet<ProcId>> {
        if prog.proc(id).is_lib() {
            return Ok(BTreeSet::new());
        }
        let status = match prog.user(id) {
            Some(u) => u.status,
            None => return Ok(BTreeSet::new()),
        };
        if status >= ProcStatus::Preserveds {
            return Ok(BTreeSet::new());
        }

        // a procedure already on the path closes a recursion cycle
        // spanning everything from its first occurrence to the top
        if let Some(pos) = path.iter().position(|p| *p == id) {
            let cycle: BTreeSet<ProcId> = path[pos..].iter().copied().collect();
            for m in &cycle {
                if let Some(u) = prog.user_mut(*m) {
                    u.status = ProcStatus::InCycle;
                    u.cycle_grp.extend(cycle.iter().copied());
                }
            }
            debug!(?cycle, "recursion cycle detected");
            return Ok(cycle);
        }
        if status == ProcStatus::InCycle {
            // reached again from a sibling branch: hand back its group
            return Ok(prog
                .user(id)
                .map(|u| u.cycle_grp.clone())
                .unwrap_or_default());
        }
        if status == ProcStatus::Visited {
            return Ok(BTreeSet::new());
        }

        if let Err(err) = self.ensure_decoded(prog, id) {
            warn!(proc = prog.proc(id).name(), %err, "skipping procedure");
            if let Some(u) = prog.user_mut(id) {
                u.status = ProcStatus::Undecoded;
            }
            return Ok(BTreeSet::new());
        }

        path.push(id);
        if let Some(u) = prog.user_mut(id) {
            u.status = ProcStatus::Visited;
        }

        if let Err(err) = self.initialise_decompile(prog, id) {
            warn!(proc = prog.proc(id).name(), %err, "skipping procedure");
            if let Some(u) = prog.user_mut(id) {
                u.status = ProcStatus::Undecoded;
            }
            path.pop();
            return Ok(BTreeSet::new());
        }
        self.early_decompile(prog, id);

        let mut cycle_grp: BTreeSet<ProcId> = BTreeSet::new();
        let callees = prog.user(id).map(|u| u.callees.clone()).unwrap_or_default();
        for c in callees {
            let child = self.decompile_proc(prog, c, path)?;
            cycle_grp.extend(child);
        }

        self.middle_decompile(prog, id);

        if cycle_grp.contains(&id) {
            if let Some(u) = prog.user_mut(id) {
                u.status = ProcStatus::InCycle;
                u.cycle_grp.extend(cycle_grp.iter().copied());
            }
            path.pop();
            return Ok(cycle_grp);
        }

        if !cycle_grp.is_empty() {
            let mut group = cycle_grp.clone();
            group.insert(id);
            self.recursion_group_analysis(prog, &group);
        }
        if let Some(u) = prog.user_mut(id) {
            u.status = ProcStatus::EarlyDone;
        }
        path.pop();
        Ok(BTreeSet::new())
    }

    /// Undecoded → Decoded → Sorted: drive the decoder, link callees.
    fn ensure_decoded(&self, prog: &mut Prog, id: ProcId) -> Result<()> {
        let (addr, status) = match prog.user(id) {
            Some(u) => (u.addr, u.status),
            None => return Ok(()),
        };
        if status != ProcStatus::Undecoded {
            return Ok(());
        }

        let outcome = {
            let (user, image) = prog.user_and_image(id);
            let user = user.ok_or_else(|| DecompileError::Load("not a user proc".into()))?;
            decode_proc(&mut user.cfg, image, self.decoder, addr, self.session)?
        };
        if let Some(u) = prog.user_mut(id) {
            u.status = ProcStatus::Decoded;
        }

        // create callees in static call order
        for target in &outcome.call_targets {
            if prog.is_deleted(*target) {
                continue;
            }
            if let Some(callee) = prog.ensure_user_proc(*target) {
                if let Some(u) = prog.user_mut(id) {
                    if !u.callees.contains(&callee) {
                        u.callees.push(callee);
                    }
                }
                if let Some(c) = prog.user_mut(callee) {
                    c.callers.insert(id);
                }
            }
        }
        self.resolve_call_destinations(prog, id);

        if let Some(u) = prog.user_mut(id) {
            // block order is (re)derived by address; mark it done
            u.status = ProcStatus::Sorted;
        }
        Ok(())
    }

    /// Point each direct call at the procedure its destination names.
    fn resolve_call_destinations(&self, prog: &mut Prog, id: ProcId) {
        let mut dests: Vec<(StmtId, Address)> = Vec::new();
        if let Some(u) = prog.user(id) {
            u.cfg.for_each_stmt(&mut |s| {
                if let StmtKind::Call(c) = &s.kind {
                    if let Some(d) = c.fixed_dest() {
                        dests.push((s.id, d));
                    }
                }
            });
        }
        let resolved: Vec<(StmtId, Option<ProcId>)> = dests
            .into_iter()
            .map(|(sid, d)| (sid, prog.proc_at(d)))
            .collect();
        if let Some(u) = prog.user_mut(id) {
            for (sid, callee) in resolved {
                if let Some(call) = u.cfg.stmt_mut(sid).and_then(|s| s.as_call_mut()) {
                    call.callee = callee;
                }
            }
        }
    }

    /// Make the CFG analysable: well-formedness gate and statement
    /// numbering.
    fn initialise_decompile(&self, prog: &mut Prog, id: ProcId) -> Result<()> {
        let Some(u) = prog.user_mut(id) else {
            return Ok(());
        };
        if !u.cfg.is_well_formed() {
            return Err(DecompileError::IncompleteCfg {
                proc: u.name.clone(),
            });
        }
        u.cfg.number_statements();
        u.cfg.simplify_all();
        Ok(())
    }

    /// Early phase: conservative call defines, phi placement, renaming
    /// into SSA, initial parameters.
    fn early_decompile(&self, prog: &mut Prog, id: ProcId) {
        let Some(u) = prog.user_mut(id) else { return };

        seed_call_defines(u);

        let policy = RenamePolicy {
            blacklist: u.blacklist.clone(),
        };
        let df = DataFlow::build(&u.cfg);
        df.place_phi_functions(&mut u.cfg, &policy);
        df.rename(&mut u.cfg, &policy);

        self.find_parameters(u);
        if self.session.debugging(DebugFlags::DRIVER) {
            debug!(proc = %u.name, "early phase done");
        }
    }

    /// Middle phase: call metadata from callee signatures, propagation to
    /// fixed point, preserved locations, refined parameters and returns.
    fn middle_decompile(&self, prog: &mut Prog, id: ProcId) {
        for _round in 0..2 {
            self.update_call_metadata(prog, id);

            let converted = {
                let Some(u) = prog.user_mut(id) else { return };
                let blacklist = u.blacklist.clone();
                let result = propagate_statements(&mut u.cfg, self.session, &blacklist);
                u.cfg.simplify_all();
                result.converted
            };
            if !converted {
                break;
            }
            // a new direct call changes names; redo resolution and repeat
            self.resolve_call_destinations(prog, id);
            self.link_new_callees(prog, id);
        }

        let Some(u) = prog.user_mut(id) else { return };
        find_preserveds(u);
        self.find_parameters(u);
        if self.session.debugging(DebugFlags::DRIVER) {
            debug!(proc = %u.name, "middle phase done");
        }
    }

    /// Calls converted from indirect to direct bring new callee edges.
    fn link_new_callees(&self, prog: &mut Prog, id: ProcId) {
        let mut found: Vec<ProcId> = Vec::new();
        if let Some(u) = prog.user(id) {
            u.cfg.for_each_stmt(&mut |s| {
                if let StmtKind::Call(c) = &s.kind {
                    if let Some(callee) = c.callee {
                        found.push(callee);
                    }
                }
            });
        }
        for callee in found {
            if let Some(u) = prog.user_mut(id) {
                if !u.callees.contains(&callee) {
                    u.callees.push(callee);
                }
            }
            if let Some(c) = prog.user_mut(callee) {
                c.callers.insert(id);
            }
        }
    }

    /// Narrow each call's defines to the callee's observable writes and
    /// fill the definition collector the bypass reads: defined locations
    /// map to the call itself, everything else to the caller-side reaching
    /// definition.
    fn update_call_metadata(&self, prog: &mut Prog, id: ProcId) {
        let mut signatures: BTreeMap<ProcId, Signature> = BTreeMap::new();
        let callees = prog.user(id).map(|u| u.callees.clone()).unwrap_or_default();
        for c in callees {
            signatures.insert(c, prog.proc(c).signature().clone());
        }

        let Some(u) = prog.user_mut(id) else { return };
        let call_ids: Vec<StmtId> = {
            let mut ids = Vec::new();
            u.cfg.for_each_stmt(&mut |s| {
                if s.is_call() {
                    ids.push(s.id);
                }
            });
            ids
        };

        for cid in call_ids {
            let (callee, old_defines, use_col) = {
                let Some(call) = u.cfg.stmt(cid).and_then(|s| s.as_call()) else {
                    continue;
                };
                (call.callee, call.defines.clone(), call.use_col.clone())
            };
            // an unanalysed or cyclic callee keeps the conservative set
            let callee_sig = callee.and_then(|c| signatures.get(&c));
            let narrow = callee_sig
                .map(|sig| {
                    !sig.returns.is_empty() || !sig.preserveds.is_empty() || sig.forced
                })
                .unwrap_or(false);

            let mut defines = Vec::new();
            let mut bypass: Vec<Assign> = Vec::new();
            let mut need_implicit: Vec<Exp> = Vec::new();
            for d in &old_defines {
                let keep = match callee_sig {
                    Some(sig) if narrow => sig.returns.iter().any(|r| r.exp == d.lhs),
                    _ => true,
                };
                if keep {
                    defines.push(d.clone());
                    bypass.push(Assign::new(
                        d.lhs.clone(),
                        Exp::subscript(d.lhs.clone(), Some(cid)),
                    ));
                } else {
                    // not written by the callee: the value crossing the
                    // call is the caller's reaching definition
                    match use_col.reaching(&d.lhs) {
                        Some(r) => bypass.push(Assign::new(d.lhs.clone(), r.clone())),
                        None => need_implicit.push(d.lhs.clone()),
                    }
                }
            }
            if !need_implicit.is_empty() {
                for loc in &need_implicit {
                    let imp = u.cfg.find_or_create_implicit(loc);
                    bypass.push(Assign::new(
                        loc.clone(),
                        Exp::subscript(loc.clone(), Some(imp)),
                    ));
                }
                u.cfg.reindex();
            }
            if let Some(call) = u.cfg.stmt_mut(cid).and_then(|s| s.as_call_mut()) {
                call.defines = defines;
                call.def_col.clear();
                for b in bypass {
                    call.def_col.update(b);
                }
            }

            // arguments from the callee's parameter list, localised
            if let Some(sig) = callee_sig {
                let args: Vec<Assign> = sig
                    .params
                    .iter()
                    .map(|p| {
                        let actual = use_col
                            .reaching(&p.exp)
                            .cloned()
                            .unwrap_or_else(|| p.exp.clone());
                        Assign::typed(p.ty.clone(), p.exp.clone(), actual)
                    })
                    .collect();
                if let Some(call) = u.cfg.stmt_mut(cid).and_then(|s| s.as_call_mut()) {
                    call.args = args;
                }
            }
        }
    }

    /// Parameters: every register whose entry value is used, except the
    /// stack pointer.
    fn find_parameters(&self, u: &mut crate::proc::UserProc) {
        let mut implicit_defs: BTreeSet<StmtId> = BTreeSet::new();
        u.cfg.for_each_stmt(&mut |s| {
            if s.is_implicit() {
                implicit_defs.insert(s.id);
            }
        });
        let mut params: Vec<Exp> = Vec::new();
        u.cfg.for_each_stmt(&mut |s| {
            if s.is_implicit() {
                return;
            }
            let mut refs = Vec::new();
            s.collect_refs(&mut refs);
            for (base, def) in refs {
                let entry_use = def.map(|d| implicit_defs.contains(&d)).unwrap_or(false);
                if !entry_use {
                    continue;
                }
                match &base {
                    Exp::RegOf(_) => {
                        if base.reg_num() != Some(self.session.sp_reg)
                            && !params.contains(&base)
                        {
                            params.push(base.clone());
                        }
                    }
                    _ => {}
                }
            }
        });
        for p in params {
            u.signature.ensure_param(p, Type::int(32));
        }
    }

    /// Run the middle phase over every member of a recursion group until a
    /// full pass changes no signature, or the cap is hit.
    fn recursion_group_analysis(&self, prog: &mut Prog, group: &BTreeSet<ProcId>) {
        debug!(?group, "recursion group analysis");
        for pass in 0..self.session.max_recursion_passes {
            let before: BTreeMap<ProcId, Signature> = group
                .iter()
                .map(|m| (*m, prog.proc(*m).signature().clone()))
                .collect();

            for m in group {
                self.middle_decompile(prog, *m);
            }

            let stable = group
                .iter()
                .all(|m| prog.proc(*m).signature() == &before[m]);
            if stable {
                debug!(pass, "recursion group converged");
                break;
            }
            if pass + 1 == self.session.max_recursion_passes {
                warn!("recursion group cap reached; emitting as-is");
            }
        }
        for m in group {
            if let Some(u) = prog.user_mut(*m) {
                u.status = ProcStatus::EarlyDone;
            }
        }
    }

    /// Whole-program unused-return elimination: a return location stays
    /// only while some caller mentions the call's definition of it.
    /// Shrinking a return can kill defining statements, which can shrink
    /// the liveness this procedure grants its own callees, so those are
    /// rescheduled. The pair set only shrinks, so this terminates.
    fn remove_unused_returns(&self, prog: &mut Prog) {
        let mut worklist: Vec<ProcId> = prog
            .proc_ids()
            .filter(|id| {
                prog.user(*id)
                    .map(|u| u.status >= ProcStatus::Preserveds)
                    .unwrap_or(false)
            })
            .collect();

        let mut steps = 0;
        while let Some(id) = worklist.pop() {
            steps += 1;
            if steps > self.session.max_ret_worklist {
                warn!("unused-return worklist cap reached");
                break;
            }

            let callers: BTreeSet<ProcId> = match prog.user(id) {
                Some(u) => u.callers.clone(),
                None => continue,
            };
            // the entry procedure's returns are the program's interface
            if callers.is_empty() {
                continue;
            }

            let live = live_returns_at_callers(prog, id, &callers);
            let current: Vec<Exp> = prog
                .user(id)
                .map(|u| u.signature.returns.iter().map(|r| r.exp.clone()).collect())
                .unwrap_or_default();
            let dead: Vec<Exp> = current
                .into_iter()
                .filter(|e| !live.contains(e))
                .collect();
            if dead.is_empty() {
                continue;
            }

            if self.session.debugging(DebugFlags::RETURNS) {
                debug!(proc = prog.proc(id).name(), count = dead.len(), "dropping returns");
            }
            let callees = {
                let Some(u) = prog.user_mut(id) else { continue };
                for e in &dead {
                    u.signature.remove_return(e);
                }
                if let Some(rid) = u.ret_stmt_id() {
                    if let Some(ret) = u.cfg.stmt_mut(rid).and_then(|s| s.as_return_mut()) {
                        ret.returns.retain(|a| !dead.contains(&a.lhs));
                    }
                }
                // the defining statements may now be dead
                remove_dead_code(&mut u.cfg);
                u.callees.clone()
            };
            // narrow this procedure's call defines to the new signature
            self.update_call_metadata(prog, id);
            for c in callees {
                if !worklist.contains(&c) {
                    worklist.push(c);
                }
            }
        }
    }

    /// Memory accessed through a constant address in a data section is a
    /// global; name it and rewrite the accesses.
    fn discover_globals(&self, prog: &mut Prog) {
        fn collect(e: &Exp, out: &mut Vec<Address>) {
            if let Exp::MemOf(a) = e {
                if let Some(addr) = a.unsubscripted().addr_value() {
                    out.push(addr);
                }
            }
            e.for_children(&mut |c| collect(c, out));
        }

        let ids: Vec<ProcId> = prog.proc_ids().collect();
        for id in ids {
            let mut addrs: Vec<Address> = Vec::new();
            if let Some(u) = prog.user(id) {
                u.cfg.for_each_stmt(&mut |s| {
                    s.for_each_use(&mut |e| collect(e, &mut addrs));
                    let mut defs = Vec::new();
                    s.definitions(&mut defs);
                    for d in defs {
                        collect(&d, &mut addrs);
                    }
                });
            }
            addrs.sort();
            addrs.dedup();

            let mut renames: Vec<(Address, String)> = Vec::new();
            for addr in addrs {
                let in_data = prog
                    .image()
                    .section_at(addr)
                    .map(|s| s.is_data || s.is_bss)
                    .unwrap_or(false);
                if in_data {
                    let name = prog.ensure_global(addr, Type::Void).name.clone();
                    renames.push((addr, name));
                }
            }
            if renames.is_empty() {
                continue;
            }
            if let Some(u) = prog.user_mut(id) {
                for (addr, name) in renames {
                    let pattern = Exp::mem(Exp::addr(addr));
                    let global = Exp::global(name);
                    u.cfg.for_each_stmt_mut(&mut |s| {
                        s.search_and_replace(&pattern, &global);
                    });
                }
            }
        }
    }

    /// Type analysis, blacklist-driven rename restarts, de-SSA, and final
    /// cleanup for every analysed procedure.
    fn final_phase(&self, prog: &mut Prog) {
        let ids: Vec<ProcId> = prog.proc_ids().collect();
        for id in ids {
            let Some(u) = prog.user_mut(id) else { continue };
            if u.status < ProcStatus::Preserveds {
                continue;
            }

            let black_before = u.blacklist.len();
            dfa_type_analysis(u, self.session);

            // address-escaped locals discovered by typing invalidate the
            // renaming; restart it from scratch
            if u.blacklist.len() > black_before {
                debug!(proc = %u.name, "blacklist grew; restarting rename");
                unsubscript_all(&mut u.cfg);
                seed_call_defines(u);
                let policy = RenamePolicy {
                    blacklist: u.blacklist.clone(),
                };
                let df = DataFlow::build(&u.cfg);
                df.place_phi_functions(&mut u.cfg, &policy);
                df.rename(&mut u.cfg, &policy);
                let blacklist = u.blacklist.clone();
                propagate_statements(&mut u.cfg, self.session, &blacklist);
                find_preserveds(u);
            }

            remove_dead_code(&mut u.cfg);
            from_ssa(u);
            u.cfg.simplify_all();
            u.cfg.compress();
            u.cfg.structure();
            u.status = ProcStatus::Final;
        }
    }
}

/// Before renaming, a call conservatively defines every register or
/// temporary the caller mentions anywhere, read or written; the middle
/// phase narrows the set once the callee's signature exists.
fn seed_call_defines(u: &mut crate::proc::UserProc) {
    fn collect_reg_locs(e: &Exp, out: &mut BTreeSet<Exp>) {
        let base = e.unsubscripted();
        match &base {
            Exp::RegOf(_) if base.reg_num().is_some() => {
                out.insert(base);
            }
            Exp::Temp(_) => {
                out.insert(base);
            }
            _ => {}
        }
        e.for_children(&mut |c| collect_reg_locs(c, out));
    }

    let mut locs: BTreeSet<Exp> = BTreeSet::new();
    u.cfg.for_each_stmt(&mut |s| {
        if !s.is_call() {
            let mut defs = Vec::new();
            s.definitions(&mut defs);
            for d in defs {
                let base = d.unsubscripted();
                if matches!(base, Exp::RegOf(_) | Exp::Temp(_)) {
                    locs.insert(base);
                }
            }
        }
        s.for_each_use(&mut |e| collect_reg_locs(e, &mut locs));
    });
    // callee return locations already known from resolved signatures are
    // not available pre-analysis; the conservative set suffices
    u.cfg.for_each_stmt_mut(&mut |s| {
        let id = s.id;
        if let StmtKind::Call(call) = &mut s.kind {
            if call.defines.is_empty() {
                call.defines = locs
                    .iter()
                    .map(|l| Assign::new(l.clone(), Exp::subscript(l.clone(), Some(id))))
                    .collect();
            }
        }
    });
}

/// Mark preserved locations on the return statement: a modified whose
/// value at the return is still the entry value is preserved and leaves
/// the modifieds; everything else becomes a return candidate.
fn find_preserveds(u: &mut crate::proc::UserProc) {
    let Some(rid) = u.ret_stmt_id() else { return };

    let mut implicit_defs: BTreeSet<StmtId> = BTreeSet::new();
    u.cfg.for_each_stmt(&mut |s| {
        if s.is_implicit() {
            implicit_defs.insert(s.id);
        }
    });

    let modifieds = match u.cfg.stmt(rid).and_then(|s| s.as_return()) {
        Some(r) => r.modifieds.clone(),
        None => return,
    };

    let mut preserved: Vec<Exp> = Vec::new();
    let mut observable: Vec<Assign> = Vec::new();
    for m in modifieds {
        let entry_value = match &m.rhs {
            Exp::Ref(base, Some(d)) => {
                **base == m.lhs && implicit_defs.contains(d)
            }
            Exp::Ref(base, None) => **base == m.lhs,
            other => *other == m.lhs,
        };
        if entry_value {
            preserved.push(m.lhs.clone());
        } else {
            observable.push(m);
        }
    }

    for p in &preserved {
        if !u.signature.preserveds.contains(p) {
            u.signature.preserveds.push(p.clone());
        }
        u.signature.remove_return(p);
    }
    for o in &observable {
        u.signature.ensure_return(o.lhs.clone(), o.ty.clone());
    }
    if let Some(ret) = u.cfg.stmt_mut(rid).and_then(|s| s.as_return_mut()) {
        ret.modifieds = observable.clone();
        ret.returns = observable;
    }
    u.status = u.status.max(ProcStatus::Preserveds);
}

/// Locations of `callee`'s returns that some caller actually mentions:
/// the bases of references subscripted by a call to `callee`.
fn live_returns_at_callers(
    prog: &Prog,
    callee: ProcId,
    callers: &BTreeSet<ProcId>,
) -> BTreeSet<Exp> {
    let mut live: BTreeSet<Exp> = BTreeSet::new();
    for caller in callers {
        let Some(u) = prog.user(*caller) else { continue };
        let mut call_sites: BTreeSet<StmtId> = BTreeSet::new();
        u.cfg.for_each_stmt(&mut |s| {
            if let StmtKind::Call(c) = &s.kind {
                if c.callee == Some(callee) {
                    call_sites.insert(s.id);
                }
            }
        });
        if call_sites.is_empty() {
            continue;
        }
        u.cfg.for_each_stmt(&mut |s| {
            let mut refs = Vec::new();
            s.collect_refs(&mut refs);
            for (base, def) in refs {
                if def.is_some_and(|d| call_sites.contains(&d)) {
                    live.insert(base.clone());
                }
            }
        });
    }
    live
}
