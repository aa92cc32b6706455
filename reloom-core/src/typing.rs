//! Data-flow based type analysis.
//!
//! Every iteration meets the type of each defining statement with what its
//! right-hand side suggests; types flow both ways through SSA subscripts,
//! since a reference has the type of its definition's left-hand side and an
//! address-like use of a reference pushes pointerness back into the
//! definition. Iterates to a fixed point under a cap. Each iteration also
//! maps naked `sp ± K` memory accesses to named locals, the exception
//! being stack slots whose address escapes: those keep their address form
//! and are blacklisted from renaming.

use std::collections::BTreeMap;

use reloom_ir::exp::visitor::{ExpModifier, PreModify};
use reloom_ir::{BinaryOp, Const, Exp, Signedness, StmtKind, Type};
use reloom_types::{RegNum, StmtId};
use tracing::{debug, warn};

use crate::proc::UserProc;
use crate::session::{DebugFlags, Session};

/// Run type analysis on one procedure. Returns whether any type changed in
/// the final state relative to the start.
pub fn dfa_type_analysis(proc: &mut UserProc, session: &Session) -> bool {
    let mut changed_any = false;

    for iter in 0..session.max_dfa_iters {
        let mut tymap: BTreeMap<StmtId, Type> = BTreeMap::new();
        proc.cfg.for_each_stmt(&mut |s| {
            if let Some(ty) = s.assigned_type() {
                tymap.insert(s.id, ty.clone());
            }
        });

        let mut updates: BTreeMap<StmtId, Type> = BTreeMap::new();
        proc.cfg.for_each_stmt(&mut |s| {
            // forward flow: rhs type meets the assigned type
            let suggestion = match &s.kind {
                StmtKind::Assign(a) => Some(type_of(&a.rhs, &tymap)),
                StmtKind::Bool(_) => Some(Type::Bool),
                StmtKind::Phi(p) => {
                    let mut ty = Type::Void;
                    for arg in &p.args {
                        if let Some(d) = arg.def {
                            let at = tymap.get(&d).cloned().unwrap_or(Type::Void);
                            ty = ty.meet(&at).0;
                        }
                    }
                    Some(ty)
                }
                _ => None,
            };
            if let Some(sug) = suggestion {
                let cur = tymap.get(&s.id).cloned().unwrap_or(Type::Void);
                let (met, ch) = cur.meet(&sug);
                if ch {
                    updates.insert(s.id, met);
                }
            }

            // backward flow: a reference used as an address is a pointer
            s.for_each_use(&mut |e| {
                collect_pointer_evidence(e, &tymap, &mut updates);
            });
            // an implicit reference's operand is an address by definition
            if let StmtKind::ImpRef(i) = &s.kind {
                for d in address_base_defs(&i.addr) {
                    let cur = updates
                        .get(&d)
                        .cloned()
                        .or_else(|| tymap.get(&d).cloned())
                        .unwrap_or(Type::Void);
                    let (met, ch) = cur.meet(&Type::ptr(i.ty.clone()));
                    if ch {
                        updates.insert(d, met);
                    }
                }
            }
        });

        let iteration_changed = !updates.is_empty();
        for (id, ty) in updates {
            if let Some(stmt) = proc.cfg.stmt_mut(id) {
                stmt.set_assigned_type(ty);
            }
        }

        map_stack_locals(proc, session.sp_reg);

        if session.debugging(DebugFlags::TYPES) {
            debug!(iter, changed = iteration_changed, "type analysis iteration");
        }
        if !iteration_changed {
            break;
        }
        changed_any = true;
        if iter + 1 == session.max_dfa_iters {
            warn!(proc = %proc.name, "type analysis cap reached");
        }
    }

    changed_any
}

/// The type an expression evaluates to, given the current definition types.
pub fn type_of(e: &Exp, tymap: &BTreeMap<StmtId, Type>) -> Type {
    match e {
        Exp::Const(Const::Int(v)) => {
            let bits = if i32::try_from(*v).is_ok() { 32 } else { 64 };
            Type::Integer {
                bits,
                sign: Signedness::Unknown,
            }
        }
        Exp::Const(Const::Flt(_)) => Type::Float(64),
        Exp::Const(Const::Str(_)) => Type::ptr(Type::Char),
        Exp::Const(Const::Addr(_)) => Type::ptr(Type::Void),
        Exp::Terminal(_) => Type::Void,
        Exp::Ref(_, Some(d)) => tymap.get(d).cloned().unwrap_or(Type::Void),
        Exp::Ref(_, None) => Type::Void,
        Exp::Typed(ty, _) => ty.clone(),
        Exp::TypeVal(ty) => ty.clone(),
        Exp::Unary(_, a) => type_of(a, tymap),
        Exp::Binary(op, a, b) => {
            use BinaryOp::*;
            match op {
                Eq | Ne | Lt | Gt | Le | Ge | LtU | GtU | LeU | GeU | LogAnd | LogOr => Type::Bool,
                FPlus | FMinus | FMult | FDiv => Type::Float(64),
                Plus | Minus => {
                    let ta = type_of(a, tymap);
                    let tb = type_of(b, tymap);
                    if ta.is_pointer() {
                        ta
                    } else if tb.is_pointer() && *op == Plus {
                        tb
                    } else {
                        ta.meet(&tb).0
                    }
                }
                _ => {
                    let ta = type_of(a, tymap);
                    let tb = type_of(b, tymap);
                    ta.meet(&tb).0
                }
            }
        }
        Exp::Ternary(_, _, b, c) => type_of(b, tymap).meet(&type_of(c, tymap)).0,
        // reading a location gives no information by itself
        _ => Type::Void,
    }
}

/// An address expression built on a reference marks that reference's
/// definition as holding a pointer.
fn collect_pointer_evidence(
    e: &Exp,
    tymap: &BTreeMap<StmtId, Type>,
    updates: &mut BTreeMap<StmtId, Type>,
) {
    if let Exp::MemOf(addr) = e {
        for d in address_base_defs(addr) {
            let cur = updates
                .get(&d)
                .cloned()
                .or_else(|| tymap.get(&d).cloned())
                .unwrap_or(Type::Void);
            let (met, ch) = cur.meet(&Type::ptr(Type::Void));
            if ch {
                updates.insert(d, met);
            }
        }
    }
    e.for_children(&mut |c| collect_pointer_evidence(c, tymap, updates));
}

/// The definitions of references used as the base of an address: the `r`
/// in `m[r{d}]` and `m[r{d} + K]`.
fn address_base_defs(addr: &Exp) -> Vec<StmtId> {
    match addr {
        Exp::Ref(_, Some(d)) => vec![*d],
        Exp::Binary(BinaryOp::Plus, a, b) => {
            let mut out = Vec::new();
            if let Exp::Ref(_, Some(d)) = a.as_ref() {
                if b.is_const() {
                    out.push(*d);
                }
            }
            out
        }
        _ => Vec::new(),
    }
}

/// Rewrite `m[sp{entry} ± K]` into named locals and record their types;
/// blacklist slots whose bare address escapes.
fn map_stack_locals(proc: &mut UserProc, sp: RegNum) {
    // existing name assignments survive across iterations
    let mut mapper = StackMapper {
        sp,
        slots: BTreeMap::new(),
        escaped: Vec::new(),
        fresh: Vec::new(),
    };
    for (exp, sym) in &proc.symbol_map {
        if let (Some(k), Exp::Local(name)) = (sp_slot_offset(exp, sp), sym) {
            mapper.slots.insert(k, name.clone());
        }
    }

    proc.cfg.for_each_stmt_mut(&mut |s| {
        s.map_all_exps(&mut mapper);
    });

    for (k, name) in mapper.fresh.drain(..) {
        let slot = stack_slot_exp(sp, k);
        proc.symbol_map.insert(slot, Exp::local(name.clone()));
        proc.locals.entry(name).or_insert(Type::Void);
    }
    // both the slot form and its local name are now address-escaped
    for (slot, name) in mapper.escaped.drain(..) {
        proc.blacklist.insert(slot);
        proc.blacklist.insert(Exp::local(name));
    }
}

/// The canonical unsubscripted form of the stack slot at offset `k`.
fn stack_slot_exp(sp: RegNum, k: i64) -> Exp {
    if k == 0 {
        Exp::mem(Exp::reg(sp))
    } else {
        Exp::mem(Exp::binary(BinaryOp::Plus, Exp::reg(sp), Exp::int(k)))
    }
}

/// Offset of a stack-slot expression `m[sp ± K]`, subscripts ignored.
fn sp_slot_offset(e: &Exp, sp: RegNum) -> Option<i64> {
    let Exp::MemOf(addr) = e else { return None };
    sp_addr_offset(&addr.unsubscripted(), sp)
}

fn sp_addr_offset(addr: &Exp, sp: RegNum) -> Option<i64> {
    match addr {
        Exp::RegOf(_) if addr.reg_num() == Some(sp) => Some(0),
        Exp::Binary(BinaryOp::Plus, a, b) => {
            (a.reg_num() == Some(sp)).then(|| b.int_value()).flatten()
        }
        Exp::Binary(BinaryOp::Minus, a, b) => (a.reg_num() == Some(sp))
            .then(|| b.int_value().map(|v| -v))
            .flatten(),
        _ => None,
    }
}

struct StackMapper {
    sp: RegNum,
    slots: BTreeMap<i64, String>,
    escaped: Vec<(Exp, String)>,
    fresh: Vec<(i64, String)>,
}

impl StackMapper {
    fn name_for(&mut self, k: i64) -> String {
        if let Some(name) = self.slots.get(&k) {
            return name.clone();
        }
        let name = format!("local{}", self.slots.len());
        self.slots.insert(k, name.clone());
        self.fresh.push((k, name.clone()));
        name
    }
}

impl ExpModifier for StackMapper {
    fn pre_modify(&mut self, e: Exp) -> PreModify {
        if let Exp::MemOf(addr) = &e {
            if let Some(k) = sp_addr_offset(&addr.unsubscripted(), self.sp) {
                let name = self.name_for(k);
                return PreModify::replace(Exp::local(name));
            }
        }
        PreModify::recurse(e)
    }

    fn post_modify(&mut self, e: Exp) -> (Exp, bool) {
        // a bare sp ± K surviving outside a memory-of is an escaping slot
        // address; retain the address-of form and blacklist the slot
        if !matches!(e, Exp::MemOf(_)) {
            if let Some(k) = sp_addr_offset(&e.unsubscripted(), self.sp) {
                if let Some(name) = self.slots.get(&k).cloned() {
                    self.escaped
                        .push((stack_slot_exp(self.sp, k), name.clone()));
                    return (Exp::addr_of(Exp::local(name)), true);
                }
            }
        }
        (e, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reloom_types::Address;

    #[test]
    fn constants_type_as_integers() {
        let tymap = BTreeMap::new();
        assert_eq!(
            type_of(&Exp::int(5), &tymap),
            Type::Integer {
                bits: 32,
                sign: Signedness::Unknown
            }
        );
        assert_eq!(
            type_of(&Exp::addr(Address::new(0x1000)), &tymap),
            Type::ptr(Type::Void)
        );
    }

    #[test]
    fn pointer_wins_in_addition() {
        let mut tymap = BTreeMap::new();
        tymap.insert(StmtId::new(1), Type::ptr(Type::Char));
        let e = Exp::binary(
            BinaryOp::Plus,
            Exp::subscript(Exp::reg(24), Some(StmtId::new(1))),
            Exp::int(4),
        );
        assert_eq!(type_of(&e, &tymap), Type::ptr(Type::Char));
    }

    #[test]
    fn sp_offsets_parse() {
        assert_eq!(sp_addr_offset(&Exp::reg(28), 28), Some(0));
        assert_eq!(
            sp_addr_offset(
                &Exp::binary(BinaryOp::Plus, Exp::reg(28), Exp::int(8)),
                28
            ),
            Some(8)
        );
        assert_eq!(
            sp_addr_offset(
                &Exp::binary(BinaryOp::Minus, Exp::reg(28), Exp::int(8)),
                28
            ),
            Some(-8)
        );
        assert_eq!(sp_addr_offset(&Exp::reg(24), 28), None);
    }
}
