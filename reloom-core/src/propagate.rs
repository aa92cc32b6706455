//! Copy and constant propagation under SSA, with call bypass.
//!
//! A definition is propagated into its uses when its right-hand side is a
//! constant or a plain renamed location, or when it has exactly one use;
//! never when it would erase an address-escaped location, and never beyond
//! the configured operator-nesting depth. References subscripted by a call
//! are rewritten through the call's definition collector, which is what
//! lets values flow across call sites without inlining.

use std::collections::{BTreeMap, BTreeSet};

use reloom_ir::exp::visitor::{ExpModifier, PreModify};
use reloom_ir::{Exp, StmtKind};
use reloom_types::StmtId;
use tracing::{debug, warn};

use crate::cfg::Cfg;
use crate::session::Session;

/// Outcome of a propagation run.
#[derive(Debug, Default, Clone, Copy)]
pub struct PropResult {
    /// Whether anything changed at all.
    pub changed: bool,
    /// Whether an indirect call became direct; name-dependent passes must
    /// rerun when set.
    pub converted: bool,
    /// Full passes performed.
    pub passes: usize,
}

/// Number of uses of each definition, phi operands included.
pub fn count_uses(cfg: &Cfg) -> BTreeMap<StmtId, usize> {
    let mut counts: BTreeMap<StmtId, usize> = BTreeMap::new();
    cfg.for_each_stmt(&mut |s| {
        let mut refs = Vec::new();
        s.collect_refs(&mut refs);
        for (_, def) in refs {
            if let Some(d) = def {
                *counts.entry(d).or_default() += 1;
            }
        }
    });
    counts
}

/// Operator nesting of an expression; locations and constants are depth
/// zero, so a bare renamed register always propagates.
fn op_depth(e: &Exp) -> usize {
    match e {
        Exp::Const(_)
        | Exp::Terminal(_)
        | Exp::Param(_)
        | Exp::Local(_)
        | Exp::Global(_)
        | Exp::Temp(_)
        | Exp::TypeVal(_)
        | Exp::RegOf(_) => 0,
        Exp::Ref(base, _) => op_depth(base),
        Exp::Typed(_, inner) => op_depth(inner),
        Exp::MemOf(a) | Exp::AddrOf(a) | Exp::Unary(_, a) => 1 + op_depth(a),
        Exp::Binary(_, a, b) => 1 + op_depth(a).max(op_depth(b)),
        Exp::Ternary(_, a, b, c) => 1 + op_depth(a).max(op_depth(b)).max(op_depth(c)),
    }
}

/// Whether `e` is a plain renamed location or constant, always worth
/// propagating regardless of use counts.
fn is_trivial_rhs(e: &Exp) -> bool {
    match e {
        Exp::Const(_) => true,
        Exp::Ref(base, _) => base.is_location(),
        _ => false,
    }
}

/// Propagate to fixed point. `blacklist` holds address-escaped locations
/// whose definitions must survive.
pub fn propagate_statements(
    cfg: &mut Cfg,
    session: &Session,
    blacklist: &BTreeSet<Exp>,
) -> PropResult {
    let mut result = PropResult::default();

    loop {
        if result.passes >= session.max_prop_passes {
            warn!(passes = result.passes, "propagation cap reached");
            break;
        }
        result.passes += 1;

        let counts = count_uses(cfg);
        let mut map: BTreeMap<StmtId, Exp> = BTreeMap::new();
        cfg.for_each_stmt(&mut |s| {
            let StmtKind::Assign(a) = &s.kind else { return };
            if a.guard.is_some() {
                return;
            }
            let lhs_base = a.lhs.unsubscripted();
            if matches!(lhs_base, Exp::MemOf(_)) || blacklist.contains(&lhs_base) {
                return;
            }
            let uses = counts.get(&s.id).copied().unwrap_or(0);
            if !is_trivial_rhs(&a.rhs) && uses != 1 {
                return;
            }
            if op_depth(&a.rhs) > session.prop_max_depth {
                return;
            }
            // self-referential definitions never shrink
            let self_ref = Exp::subscript(lhs_base, Some(s.id));
            if a.rhs.search(&self_ref).is_some() {
                return;
            }
            map.insert(s.id, a.rhs.clone());
        });

        // call bypass: resolve references subscripted by a call through
        // the call's definition collector
        let mut bypass: BTreeMap<(Exp, StmtId), Exp> = BTreeMap::new();
        cfg.for_each_stmt(&mut |s| {
            let StmtKind::Call(call) = &s.kind else { return };
            for d in call.def_col.iter() {
                let key = (d.lhs.unsubscripted(), s.id);
                let opaque = Exp::subscript(d.lhs.unsubscripted(), Some(s.id));
                if d.rhs != opaque {
                    bypass.insert(key, d.rhs.clone());
                }
            }
        });

        let mut prop = Propagator {
            map: &map,
            bypass: &bypass,
            applied: 0,
        };
        let ids = cfg.stmt_ids();
        let mut touched: Vec<StmtId> = Vec::new();
        for id in ids {
            let Some(stmt) = cfg.stmt_mut(id) else { continue };
            // a definition is not rewritten into itself
            if map.contains_key(&id) && !is_trivial_rhs(&map[&id]) {
                continue;
            }
            if stmt.map_use_exps(&mut prop) {
                touched.push(id);
            }
        }
        for id in &touched {
            if let Some(stmt) = cfg.stmt_mut(*id) {
                stmt.simplify();
            }
        }

        // a phi whose operands all carry the same definition is a copy
        let mut collapsed = 0;
        cfg.for_each_stmt_mut(&mut |s| {
            let id = s.id;
            if let StmtKind::Phi(phi) = &s.kind {
                if let Some(def) = phi.uniform_def() {
                    if def != Some(id) {
                        let lhs = phi.lhs.clone();
                        let ty = phi.ty.clone();
                        let rhs = Exp::subscript(lhs.clone(), def);
                        s.kind = StmtKind::Assign(reloom_ir::Assign::typed(ty, lhs, rhs));
                        collapsed += 1;
                    }
                }
            }
        });
        if collapsed > 0 {
            debug!(collapsed, "phis collapsed to copies");
        }

        // an indirect call whose destination became a constant address is
        // now a direct call
        cfg.for_each_stmt_mut(&mut |s| {
            if let StmtKind::Call(call) = &mut s.kind {
                if call.is_computed && call.dest.addr_value().is_some() {
                    call.is_computed = false;
                    result.converted = true;
                }
            }
        });

        if touched.is_empty() && collapsed == 0 {
            break;
        }
        result.changed = true;
        debug!(pass = result.passes, touched = touched.len(), "propagated");
    }

    result
}

struct Propagator<'a> {
    map: &'a BTreeMap<StmtId, Exp>,
    bypass: &'a BTreeMap<(Exp, StmtId), Exp>,
    applied: usize,
}

impl ExpModifier for Propagator<'_> {
    fn pre_modify(&mut self, e: Exp) -> PreModify {
        if let Exp::Ref(base, Some(d)) = &e {
            if let Some(rhs) = self.map.get(d) {
                self.applied += 1;
                return PreModify::replace(rhs.clone());
            }
            if let Some(local) = self.bypass.get(&(base.unsubscripted(), *d)) {
                self.applied += 1;
                return PreModify::replace(local.clone());
            }
        }
        PreModify::recurse(e)
    }
}

/// Remove definitions nothing uses. Stores, calls, returns and everything
/// with observable effect stay; implicit assignments stay while anything
/// references them. Iterates until no statement dies.
pub fn remove_dead_code(cfg: &mut Cfg) -> bool {
    let mut removed_any = false;
    loop {
        let counts = count_uses(cfg);
        let mut dead: BTreeSet<StmtId> = BTreeSet::new();
        cfg.for_each_stmt(&mut |s| {
            let lhs = match &s.kind {
                StmtKind::Assign(a) => &a.lhs,
                StmtKind::Bool(b) => &b.lhs,
                StmtKind::Phi(p) => &p.lhs,
                _ => return,
            };
            let base = lhs.unsubscripted();
            // stores and globals are observable
            if matches!(base, Exp::MemOf(_) | Exp::Global(_)) {
                return;
            }
            if counts.get(&s.id).copied().unwrap_or(0) == 0 {
                dead.insert(s.id);
            }
        });
        if dead.is_empty() {
            break;
        }
        debug!(count = dead.len(), "removing dead definitions");
        cfg.remove_stmts(&dead);
        removed_any = true;
    }
    removed_any
}
