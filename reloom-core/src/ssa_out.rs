//! Lowering out of SSA: phi unites and symbol mapping.
//!
//! The operands of one phi all carry the same value, so they belong to one
//! storage unit: the equivalence closure of that relation over all phis
//! yields the renaming classes. Every class gets one representative name
//! (an existing symbol when there is one, a fresh local otherwise), every
//! subscripted reference is replaced by its class representative, and the
//! phis and implicit assignments disappear.

use std::collections::{BTreeMap, BTreeSet};

use reloom_ir::exp::visitor::ExpModifier;
use reloom_ir::{Exp, StmtKind, Type};
use reloom_types::StmtId;
use tracing::debug;

use crate::proc::UserProc;
use crate::util::UnionFind;

type SsaName = (Exp, Option<StmtId>);

/// Replace SSA names by representative symbols and delete the phis. After
/// this pass no subscripted reference and no phi-assignment remains.
pub fn from_ssa(proc: &mut UserProc) {
    let mut keys: BTreeMap<SsaName, usize> = BTreeMap::new();
    let mut uf = UnionFind::new();
    let mut intern = |keys: &mut BTreeMap<SsaName, usize>, uf: &mut UnionFind, k: SsaName| {
        *keys.entry(k).or_insert_with(|| uf.push())
    };

    // every SSA name: uses, definitions, phi operands
    let mut implicit_defs: BTreeSet<StmtId> = BTreeSet::new();
    proc.cfg.for_each_stmt(&mut |s| {
        if s.is_implicit() {
            implicit_defs.insert(s.id);
        }
        let mut refs = Vec::new();
        s.collect_refs(&mut refs);
        for (base, def) in refs {
            intern(&mut keys, &mut uf, (base.unsubscripted(), def));
        }
        let mut defs = Vec::new();
        s.definitions(&mut defs);
        for d in defs {
            intern(&mut keys, &mut uf, (d.unsubscripted(), Some(s.id)));
        }
    });

    // phi unites
    proc.cfg.for_each_stmt(&mut |s| {
        if let StmtKind::Phi(phi) = &s.kind {
            let base = phi.lhs.unsubscripted();
            let lhs_key = intern(&mut keys, &mut uf, (base.clone(), Some(s.id)));
            for arg in &phi.args {
                let arg_key = intern(&mut keys, &mut uf, (base.clone(), arg.def));
                uf.union(lhs_key, arg_key);
            }
        }
    });

    // choose a representative expression per class
    let mut class_members: BTreeMap<usize, Vec<SsaName>> = BTreeMap::new();
    let key_list: Vec<(SsaName, usize)> = keys.iter().map(|(k, v)| (k.clone(), *v)).collect();
    for (k, idx) in key_list {
        class_members.entry(uf.find(idx)).or_default().push(k);
    }

    let mut tymap: BTreeMap<StmtId, Type> = BTreeMap::new();
    proc.cfg.for_each_stmt(&mut |s| {
        if let Some(ty) = s.assigned_type() {
            tymap.insert(s.id, ty.clone());
        }
    });

    let mut replacements: BTreeMap<SsaName, Exp> = BTreeMap::new();
    for members in class_members.values() {
        let rep = representative(proc, members, &implicit_defs, &tymap);
        for m in members {
            replacements.insert(m.clone(), rep.clone());
        }
    }

    // rewrite references and defined locations
    let mut lower = RefLower {
        map: &replacements,
    };
    proc.cfg.for_each_stmt_mut(&mut |s| {
        s.map_all_exps(&mut lower);
        let id = s.id;
        let relabel = |lhs: &mut Exp| {
            let key = (lhs.unsubscripted(), Some(id));
            if let Some(rep) = replacements.get(&key) {
                *lhs = rep.clone();
            }
        };
        match &mut s.kind {
            StmtKind::Assign(a) => relabel(&mut a.lhs),
            StmtKind::Bool(b) => relabel(&mut b.lhs),
            StmtKind::Call(c) => {
                for d in &mut c.defines {
                    relabel(&mut d.lhs);
                }
            }
            _ => {}
        }
    });

    // drop phis, implicit assignments and trivial copies
    let mut dead: BTreeSet<StmtId> = BTreeSet::new();
    proc.cfg.for_each_stmt(&mut |s| {
        let trivial = match &s.kind {
            StmtKind::Assign(a) => a.lhs == a.rhs,
            _ => false,
        };
        if s.is_phi() || s.is_implicit() || trivial {
            dead.insert(s.id);
        }
    });
    proc.cfg.remove_stmts(&dead);

    prune_unused_locals(proc);
    debug!(proc = %proc.name, classes = class_members.len(), "out of SSA");
}

/// Pick the name a renaming class collapses to: an existing mapped symbol
/// first, the bare location for entry values, a fresh typed local
/// otherwise.
fn representative(
    proc: &mut UserProc,
    members: &[SsaName],
    implicit_defs: &BTreeSet<StmtId>,
    tymap: &BTreeMap<StmtId, Type>,
) -> Exp {
    let base = &members[0].0;

    if let Some(sym) = proc.symbol_map.get(base) {
        return sym.clone();
    }
    if let Exp::Local(_) | Exp::Param(_) | Exp::Global(_) = base {
        return base.clone();
    }

    // a class holding the entry value keeps the machine location itself;
    // parameter discovery already named it in the signature
    let is_entry = members
        .iter()
        .any(|(_, def)| def.map(|d| implicit_defs.contains(&d)).unwrap_or(true));
    if is_entry {
        return base.clone();
    }

    let ty = members
        .iter()
        .filter_map(|(_, def)| def.and_then(|d| tymap.get(&d)))
        .fold(Type::Void, |acc, t| acc.meet(t).0);
    let name = proc.new_local(ty);
    Exp::local(name)
}

struct RefLower<'a> {
    map: &'a BTreeMap<SsaName, Exp>,
}

impl ExpModifier for RefLower<'_> {
    fn post_modify(&mut self, e: Exp) -> (Exp, bool) {
        match e {
            Exp::Ref(base, def) => {
                let key = (base.unsubscripted(), def);
                match self.map.get(&key) {
                    Some(rep) => (rep.clone(), true),
                    None => (*base, true),
                }
            }
            other => (other, false),
        }
    }
}

/// Forget locals no statement mentions any more.
fn prune_unused_locals(proc: &mut UserProc) {
    let mut used: BTreeSet<String> = BTreeSet::new();
    proc.cfg.for_each_stmt(&mut |s| {
        s.for_each_use(&mut |e| collect_locals(e, &mut used));
        let mut defs = Vec::new();
        s.definitions(&mut defs);
        for d in defs {
            collect_locals(&d, &mut used);
        }
    });
    proc.locals.retain(|name, _| used.contains(name));
    proc.symbol_map.retain(|_, sym| match sym {
        Exp::Local(name) => used.contains(name),
        _ => true,
    });
}

fn collect_locals(e: &Exp, out: &mut BTreeSet<String>) {
    if let Exp::Local(name) = e {
        out.insert(name.clone());
    }
    e.for_children(&mut |c| collect_locals(c, out));
}
