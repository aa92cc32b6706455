//! Procedures: library stubs and user (decompiled) procedures.

use std::collections::{BTreeMap, BTreeSet};

use reloom_ir::{Exp, Type};
use reloom_types::{Address, ProcId, StmtId};
use strum::Display;

use crate::cfg::Cfg;

/// Decompilation state of a user procedure. States only advance.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcStatus {
    /// Known address, no body yet.
    Undecoded,
    /// Body decoded into a CFG.
    Decoded,
    /// Blocks sorted by address.
    Sorted,
    /// On the decompilation path.
    Visited,
    /// Member of a recursion cycle still being analysed.
    InCycle,
    /// Preserved locations computed.
    Preserveds,
    /// Early analysis done.
    EarlyDone,
    /// Analysis complete.
    Final,
    /// High-level code emitted.
    CodeGenerated,
}

/// One parameter or return of a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigParam {
    /// Source-level name.
    pub name: String,
    /// Machine location holding it.
    pub exp: Exp,
    /// Its type.
    pub ty: Type,
}

/// A procedure's interface: parameters, returns, preserved locations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature {
    /// Procedure name.
    pub name: String,
    /// Parameters, in call order.
    pub params: Vec<SigParam>,
    /// Return locations some caller uses.
    pub returns: Vec<SigParam>,
    /// Locations whose value on return equals the value on entry.
    pub preserveds: Vec<Exp>,
    /// Whether the signature came from a header and must not be refined.
    pub forced: bool,
}

impl Signature {
    /// Empty signature named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Add a parameter in `exp` unless one is already there.
    pub fn ensure_param(&mut self, exp: Exp, ty: Type) {
        if !self.params.iter().any(|p| p.exp == exp) {
            let name = format!("param{}", self.params.len() + 1);
            self.params.push(SigParam { name, exp, ty });
        }
    }

    /// Add a return in `exp` unless one is already there.
    pub fn ensure_return(&mut self, exp: Exp, ty: Type) {
        if !self.returns.iter().any(|r| r.exp == exp) {
            let name = format!("ret{}", self.returns.len() + 1);
            self.returns.push(SigParam { name, exp, ty });
        }
    }

    /// Drop the return held in `exp`.
    pub fn remove_return(&mut self, exp: &Exp) {
        self.returns.retain(|r| &r.exp != exp);
    }

    /// Whether `exp` is a preserved location.
    pub fn is_preserved(&self, exp: &Exp) -> bool {
        self.preserveds.contains(exp)
    }
}

/// A procedure with a known signature and no body: dynamically linked or
/// otherwise external.
#[derive(Debug, Clone)]
pub struct LibProc {
    /// Name, from the symbol table.
    pub name: String,
    /// Address of the stub or import slot.
    pub addr: Address,
    /// Known interface.
    pub signature: Signature,
}

/// A procedure being decompiled.
#[derive(Debug)]
pub struct UserProc {
    /// Name, from a symbol or synthesised from the address.
    pub name: String,
    /// Entry address.
    pub addr: Address,
    /// Decompilation state.
    pub status: ProcStatus,
    /// The control-flow graph; owned exclusively.
    pub cfg: Cfg,
    /// Discovered interface.
    pub signature: Signature,
    /// Named locals and their types.
    pub locals: BTreeMap<String, Type>,
    /// Mapping from machine locations to named symbols.
    pub symbol_map: BTreeMap<Exp, Exp>,
    /// Procedures this one calls, in static call order.
    pub callees: Vec<ProcId>,
    /// Procedures calling this one.
    pub callers: BTreeSet<ProcId>,
    /// The recursion group this procedure belongs to, when any.
    pub cycle_grp: BTreeSet<ProcId>,
    /// Address-escaped locations, excluded from SSA renaming.
    pub blacklist: BTreeSet<Exp>,
    next_local: u32,
}

impl UserProc {
    /// New undecoded procedure.
    pub fn new(name: impl Into<String>, addr: Address) -> Self {
        let name = name.into();
        Self {
            signature: Signature::new(name.clone()),
            name,
            addr,
            status: ProcStatus::Undecoded,
            cfg: Cfg::new(),
            locals: BTreeMap::new(),
            symbol_map: BTreeMap::new(),
            callees: Vec::new(),
            callers: BTreeSet::new(),
            cycle_grp: BTreeSet::new(),
            blacklist: BTreeSet::new(),
            next_local: 0,
        }
    }

    /// Fresh `localN` name, registered with type `ty`.
    pub fn new_local(&mut self, ty: Type) -> String {
        let name = loop {
            let cand = format!("local{}", self.next_local);
            self.next_local += 1;
            if !self.locals.contains_key(&cand) {
                break cand;
            }
        };
        self.locals.insert(name.clone(), ty);
        name
    }

    /// Record or widen the type of a named local.
    pub fn meet_local_type(&mut self, name: &str, ty: &Type) {
        let entry = self.locals.entry(name.to_owned()).or_insert(Type::Void);
        let (met, _) = entry.meet(ty);
        *entry = met;
    }

    /// The return statement, when the procedure has one.
    pub fn ret_stmt_id(&self) -> Option<StmtId> {
        let mut found = None;
        self.cfg.for_each_stmt(&mut |s| {
            if found.is_none() && s.is_return() {
                found = Some(s.id);
            }
        });
        found
    }
}

/// Either kind of procedure, as stored in the program's arena.
#[derive(Debug)]
pub enum Proc {
    /// Known signature, no body.
    Lib(LibProc),
    /// Owned CFG under decompilation.
    User(Box<UserProc>),
}

impl Proc {
    /// Procedure name.
    pub fn name(&self) -> &str {
        match self {
            Proc::Lib(p) => &p.name,
            Proc::User(p) => &p.name,
        }
    }

    /// Entry address.
    pub fn addr(&self) -> Address {
        match self {
            Proc::Lib(p) => p.addr,
            Proc::User(p) => p.addr,
        }
    }

    /// The signature.
    pub fn signature(&self) -> &Signature {
        match self {
            Proc::Lib(p) => &p.signature,
            Proc::User(p) => &p.signature,
        }
    }

    /// Whether this is a library procedure.
    pub fn is_lib(&self) -> bool {
        matches!(self, Proc::Lib(_))
    }

    /// The user procedure, when it is one.
    pub fn as_user(&self) -> Option<&UserProc> {
        match self {
            Proc::User(p) => Some(p),
            Proc::Lib(_) => None,
        }
    }

    /// The user procedure, mutably.
    pub fn as_user_mut(&mut self) -> Option<&mut UserProc> {
        match self {
            Proc::User(p) => Some(p),
            Proc::Lib(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_chain_is_ordered() {
        assert!(ProcStatus::Undecoded < ProcStatus::Decoded);
        assert!(ProcStatus::Visited < ProcStatus::InCycle);
        assert!(ProcStatus::Final < ProcStatus::CodeGenerated);
    }

    #[test]
    fn fresh_locals_do_not_collide() {
        let mut p = UserProc::new("f", Address::new(0x1000));
        p.locals.insert("local0".into(), Type::int(32));
        let a = p.new_local(Type::int(32));
        let b = p.new_local(Type::Char);
        assert_ne!(a, "local0");
        assert_ne!(a, b);
    }

    #[test]
    fn signature_params_dedupe() {
        let mut sig = Signature::new("f");
        sig.ensure_param(Exp::reg(24), Type::int(32));
        sig.ensure_param(Exp::reg(24), Type::int(32));
        sig.ensure_param(Exp::reg(25), Type::int(32));
        assert_eq!(sig.params.len(), 2);
        sig.ensure_return(Exp::reg(24), Type::int(32));
        sig.remove_return(&Exp::reg(24));
        assert!(sig.returns.is_empty());
    }
}
