//! The statement set.
//!
//! Statements are what RTLs contain and what every pass rewrites. Each
//! carries its stable number (the index into the owning procedure's
//! statement table) and a back-reference to its enclosing basic block;
//! both are non-owning, per the ownership rules of the data model.

use core::fmt;

use reloom_types::{Address, BbId, ProcId, StmtId};
use strum::Display;

use crate::collector::{DefCollector, UseCollector};
use crate::exp::visitor::{modify_exp, ExpModifier};
use crate::exp::Exp;
use crate::op::{BinaryOp, Terminal};
use crate::ty::Type;

/// A typed, optionally guarded assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Assign {
    /// Assigned type.
    pub ty: Type,
    /// Destination location.
    pub lhs: Exp,
    /// Source expression.
    pub rhs: Exp,
    /// Optional guard; the assignment happens only when it holds.
    pub guard: Option<Exp>,
}

impl Assign {
    /// Untyped, unguarded assignment.
    pub fn new(lhs: Exp, rhs: Exp) -> Self {
        Self {
            ty: Type::Void,
            lhs,
            rhs,
            guard: None,
        }
    }

    /// Typed assignment.
    pub fn typed(ty: Type, lhs: Exp, rhs: Exp) -> Self {
        Self {
            ty,
            lhs,
            rhs,
            guard: None,
        }
    }
}

impl fmt::Display for Assign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(g) = &self.guard {
            write!(f, "{g} => ")?;
        }
        if self.ty.is_void() {
            write!(f, "{} := {}", self.lhs, self.rhs)
        } else {
            write!(f, "*{}* {} := {}", self.ty, self.lhs, self.rhs)
        }
    }
}

/// One operand slot of a phi-assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhiArg {
    /// Predecessor block this operand flows in from.
    pub pred: BbId,
    /// Statement defining the location on that path; `None` before the
    /// renamer fills the slot, or for the value on entry.
    pub def: Option<StmtId>,
}

/// A phi-assignment at a control-flow join.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PhiAssign {
    /// Assigned type.
    pub ty: Type,
    /// The joined location.
    pub lhs: Exp,
    /// One slot per predecessor, parallel to the block's in-edges.
    pub args: Vec<PhiArg>,
}

impl PhiAssign {
    /// When every filled operand refers to the same definition, that
    /// definition; the phi then collapses to a copy.
    pub fn uniform_def(&self) -> Option<Option<StmtId>> {
        let mut iter = self.args.iter().map(|a| a.def);
        let first = iter.next()?;
        iter.all(|d| d == first).then_some(first)
    }
}

/// The value of a location on entry to the procedure.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImplicitAssign {
    /// Assigned type.
    pub ty: Type,
    /// The location whose entry value this stands for.
    pub lhs: Exp,
}

/// High-level branch conditions, recovered from condition-code uses.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BranchKind {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Signed less.
    SLt,
    /// Signed less-or-equal.
    SLe,
    /// Signed greater-or-equal.
    SGe,
    /// Signed greater.
    SGt,
    /// Unsigned less.
    ULt,
    /// Unsigned less-or-equal.
    ULe,
    /// Unsigned greater-or-equal.
    UGe,
    /// Unsigned greater.
    UGt,
    /// Negative result.
    Minus,
    /// Non-negative result.
    Pos,
    /// Overflow.
    Overflow,
    /// No overflow.
    NoOverflow,
}

impl BranchKind {
    /// The comparison operator this condition stands for, where one exists.
    pub const fn comparison(self) -> Option<BinaryOp> {
        Some(match self {
            Self::Eq => BinaryOp::Eq,
            Self::Ne => BinaryOp::Ne,
            Self::SLt => BinaryOp::Lt,
            Self::SLe => BinaryOp::Le,
            Self::SGe => BinaryOp::Ge,
            Self::SGt => BinaryOp::Gt,
            Self::ULt => BinaryOp::LtU,
            Self::ULe => BinaryOp::LeU,
            Self::UGe => BinaryOp::GeU,
            Self::UGt => BinaryOp::GtU,
            Self::Minus => BinaryOp::Lt,
            Self::Pos => BinaryOp::Ge,
            Self::Overflow | Self::NoOverflow => return None,
        })
    }
}

/// Set a boolean on a condition code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BoolAssign {
    /// Assigned type.
    pub ty: Type,
    /// Destination location.
    pub lhs: Exp,
    /// Condition kind.
    pub kind: BranchKind,
    /// Condition expression, `%flags` until a flag call is folded in.
    pub cond: Exp,
}

/// Unconditional jump; computed when `dest` is not an address constant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GotoStatement {
    /// Destination expression.
    pub dest: Exp,
    /// Whether the destination is computed at run time.
    pub is_computed: bool,
}

/// Conditional branch. Out-edge 0 of the enclosing two-way block is the
/// taken edge, out-edge 1 the fall-through.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BranchStatement {
    /// Condition kind.
    pub kind: BranchKind,
    /// Whether the condition is a floating-point compare.
    pub is_float: bool,
    /// Condition expression, `%flags` until a flag call is folded in.
    pub cond: Exp,
    /// Fixed destination address.
    pub dest: Address,
}

/// Jump-table dispatch form.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SwitchKind {
    /// Table of absolute addresses.
    Absolute,
    /// Table of offsets from the table base.
    Offset,
    /// Table of offsets relative to the instruction.
    Relative,
    /// Hashed dispatch.
    Hashed,
}

/// Decoded jump-table descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SwitchInfo {
    /// Dispatch form.
    pub kind: SwitchKind,
    /// The scrutinised expression.
    pub switch_exp: Exp,
    /// Lowest case value.
    pub lower: i64,
    /// Highest case value.
    pub upper: i64,
    /// Native address of the table.
    pub table: Address,
    /// Number of table entries.
    pub num_cases: u64,
}

/// N-way dispatch through a jump table.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CaseStatement {
    /// Destination expression.
    pub dest: Exp,
    /// Table descriptor, once the front end has decoded it.
    pub info: Option<SwitchInfo>,
}

/// A call site.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CallStatement {
    /// Destination expression; an address constant for direct calls.
    pub dest: Exp,
    /// Resolved callee, when known.
    pub callee: Option<ProcId>,
    /// Argument assignments, parameter := actual.
    pub args: Vec<Assign>,
    /// Locations this call defines in the caller.
    pub defines: Vec<Assign>,
    /// Caller locations live across the call.
    pub use_col: UseCollector,
    /// Callee modifieds localised to this site.
    pub def_col: DefCollector,
    /// Whether the destination is computed at run time.
    pub is_computed: bool,
}

impl CallStatement {
    /// Direct call to a fixed address.
    pub fn direct(dest: Address) -> Self {
        Self {
            dest: Exp::addr(dest),
            callee: None,
            args: Vec::new(),
            defines: Vec::new(),
            use_col: UseCollector::new(),
            def_col: DefCollector::new(),
            is_computed: false,
        }
    }

    /// Computed call through `dest`.
    pub fn computed(dest: Exp) -> Self {
        Self {
            dest,
            callee: None,
            args: Vec::new(),
            defines: Vec::new(),
            use_col: UseCollector::new(),
            def_col: DefCollector::new(),
            is_computed: true,
        }
    }

    /// Fixed destination address, for direct calls.
    pub fn fixed_dest(&self) -> Option<Address> {
        self.dest.addr_value()
    }
}

/// Procedure return.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReturnStatement {
    /// Locations modified by the procedure, observable by callers; rhs is
    /// the reaching value at the return.
    pub modifieds: Vec<Assign>,
    /// The returned expressions proper, a subset of the modifieds that some
    /// caller uses.
    pub returns: Vec<Assign>,
    /// Reaching definitions at the return point.
    pub col: DefCollector,
}

/// An implicit reference to memory, carrying a type hint for the address.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ImpRefStatement {
    /// The referenced address expression.
    pub addr: Exp,
    /// Type observed for the referenced value.
    pub ty: Type,
}

/// Statement kind and per-kind payload.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StmtKind {
    /// Ordinary assignment.
    Assign(Assign),
    /// Phi-assignment at a join.
    Phi(PhiAssign),
    /// Value on entry.
    Implicit(ImplicitAssign),
    /// Set on condition code.
    Bool(BoolAssign),
    /// Unconditional or computed jump.
    Goto(GotoStatement),
    /// Conditional branch.
    Branch(BranchStatement),
    /// Jump-table dispatch.
    Case(CaseStatement),
    /// Call site.
    Call(CallStatement),
    /// Procedure return.
    Ret(ReturnStatement),
    /// Confluence marker anchoring analyses at a join.
    Junction,
    /// Implicit memory reference with a type hint.
    ImpRef(ImpRefStatement),
}

/// A statement: stable number, enclosing block, kind.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Statement {
    /// Stable number within the owning procedure.
    pub id: StmtId,
    /// Enclosing basic block.
    pub bb: BbId,
    /// Kind and payload.
    pub kind: StmtKind,
}

impl Statement {
    /// New unnumbered statement; the owning procedure numbers it later.
    pub fn new(kind: StmtKind) -> Self {
        Self {
            id: StmtId::INVALID,
            bb: BbId::INVALID,
            kind,
        }
    }

    /// Plain assignment statement.
    pub fn assign(lhs: Exp, rhs: Exp) -> Self {
        Self::new(StmtKind::Assign(Assign::new(lhs, rhs)))
    }

    /// Whether this is a phi-assignment.
    pub const fn is_phi(&self) -> bool {
        matches!(self.kind, StmtKind::Phi(_))
    }

    /// Whether this is an implicit assignment.
    pub const fn is_implicit(&self) -> bool {
        matches!(self.kind, StmtKind::Implicit(_))
    }

    /// Whether this is a call.
    pub const fn is_call(&self) -> bool {
        matches!(self.kind, StmtKind::Call(_))
    }

    /// Whether this is a return.
    pub const fn is_return(&self) -> bool {
        matches!(self.kind, StmtKind::Ret(_))
    }

    /// Whether this is a junction marker.
    pub const fn is_junction(&self) -> bool {
        matches!(self.kind, StmtKind::Junction)
    }

    /// Whether this statement ends a basic block.
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self.kind,
            StmtKind::Goto(_) | StmtKind::Branch(_) | StmtKind::Case(_) | StmtKind::Ret(_)
        )
    }

    /// The assignment payload, when this is a plain assign.
    pub fn as_assign(&self) -> Option<&Assign> {
        match &self.kind {
            StmtKind::Assign(a) => Some(a),
            _ => None,
        }
    }

    /// The call payload.
    pub fn as_call(&self) -> Option<&CallStatement> {
        match &self.kind {
            StmtKind::Call(c) => Some(c),
            _ => None,
        }
    }

    /// The call payload, mutably.
    pub fn as_call_mut(&mut self) -> Option<&mut CallStatement> {
        match &mut self.kind {
            StmtKind::Call(c) => Some(c),
            _ => None,
        }
    }

    /// The return payload.
    pub fn as_return(&self) -> Option<&ReturnStatement> {
        match &self.kind {
            StmtKind::Ret(r) => Some(r),
            _ => None,
        }
    }

    /// The return payload, mutably.
    pub fn as_return_mut(&mut self) -> Option<&mut ReturnStatement> {
        match &mut self.kind {
            StmtKind::Ret(r) => Some(r),
            _ => None,
        }
    }

    /// The phi payload.
    pub fn as_phi(&self) -> Option<&PhiAssign> {
        match &self.kind {
            StmtKind::Phi(p) => Some(p),
            _ => None,
        }
    }

    /// The phi payload, mutably.
    pub fn as_phi_mut(&mut self) -> Option<&mut PhiAssign> {
        match &mut self.kind {
            StmtKind::Phi(p) => Some(p),
            _ => None,
        }
    }

    /// Locations this statement defines.
    pub fn definitions(&self, out: &mut Vec<Exp>) {
        match &self.kind {
            StmtKind::Assign(a) => out.push(a.lhs.clone()),
            StmtKind::Phi(p) => out.push(p.lhs.clone()),
            StmtKind::Implicit(i) => out.push(i.lhs.clone()),
            StmtKind::Bool(b) => out.push(b.lhs.clone()),
            StmtKind::Call(c) => out.extend(c.defines.iter().map(|d| d.lhs.clone())),
            _ => {}
        }
    }

    /// Whether this statement defines `loc` (subscripts ignored).
    pub fn defines(&self, loc: &Exp) -> bool {
        let mut defs = Vec::new();
        self.definitions(&mut defs);
        let want = loc.unsubscripted();
        defs.iter().any(|d| d.unsubscripted() == want)
    }

    /// The type assigned by this statement, for defining kinds.
    pub fn assigned_type(&self) -> Option<&Type> {
        match &self.kind {
            StmtKind::Assign(a) => Some(&a.ty),
            StmtKind::Phi(p) => Some(&p.ty),
            StmtKind::Implicit(i) => Some(&i.ty),
            StmtKind::Bool(b) => Some(&b.ty),
            _ => None,
        }
    }

    /// Set the assigned type, for defining kinds.
    pub fn set_assigned_type(&mut self, ty: Type) {
        match &mut self.kind {
            StmtKind::Assign(a) => a.ty = ty,
            StmtKind::Phi(p) => p.ty = ty,
            StmtKind::Implicit(i) => i.ty = ty,
            StmtKind::Bool(b) => b.ty = ty,
            _ => {}
        }
    }

    /// Apply `f` to every expression in use position. The outermost
    /// operator of a defined location is not a use, its address
    /// sub-expression is.
    pub fn for_each_use(&self, f: &mut dyn FnMut(&Exp)) {
        match &self.kind {
            StmtKind::Assign(a) => {
                f(&a.rhs);
                for_lhs_address(&a.lhs, &mut |e| f(e));
                if let Some(g) = &a.guard {
                    f(g);
                }
            }
            StmtKind::Phi(_) => {}
            StmtKind::Implicit(_) | StmtKind::Junction => {}
            StmtKind::Bool(b) => {
                f(&b.cond);
                for_lhs_address(&b.lhs, &mut |e| f(e));
            }
            StmtKind::Goto(g) => {
                if g.is_computed {
                    f(&g.dest);
                }
            }
            StmtKind::Branch(b) => f(&b.cond),
            StmtKind::Case(c) => {
                f(&c.dest);
                if let Some(info) = &c.info {
                    f(&info.switch_exp);
                }
            }
            StmtKind::Call(c) => {
                f(&c.dest);
                for a in &c.args {
                    f(&a.rhs);
                }
                for d in &c.defines {
                    for_lhs_address(&d.lhs, &mut |e| f(e));
                }
            }
            StmtKind::Ret(r) => {
                for a in r.modifieds.iter().chain(r.returns.iter()) {
                    f(&a.rhs);
                }
            }
            StmtKind::ImpRef(i) => f(&i.addr),
        }
    }

    /// Whether `loc` occurs in use position.
    pub fn uses(&self, loc: &Exp) -> bool {
        let mut found = false;
        self.for_each_use(&mut |e| {
            if !found && e.search(loc).is_some() {
                found = true;
            }
        });
        found
    }

    /// Rewrite every use-position expression with `m`. Returns whether
    /// anything changed. Phi operands are not touched; they are maintained
    /// by the renamer directly.
    pub fn map_use_exps(&mut self, m: &mut dyn ExpModifier) -> bool {
        let mut changed = false;
        let mut apply = |e: &mut Exp| {
            let (new, ch) = modify_exp(core::mem::replace(e, Exp::int(0)), m);
            *e = new;
            changed |= ch;
        };
        match &mut self.kind {
            StmtKind::Assign(a) => {
                apply(&mut a.rhs);
                map_lhs_address(&mut a.lhs, &mut apply);
                if let Some(g) = &mut a.guard {
                    apply(g);
                }
            }
            StmtKind::Phi(_) | StmtKind::Implicit(_) | StmtKind::Junction => {}
            StmtKind::Bool(b) => {
                apply(&mut b.cond);
                map_lhs_address(&mut b.lhs, &mut apply);
            }
            StmtKind::Goto(g) => {
                if g.is_computed {
                    apply(&mut g.dest);
                }
            }
            StmtKind::Branch(b) => apply(&mut b.cond),
            StmtKind::Case(c) => {
                apply(&mut c.dest);
                if let Some(info) = &mut c.info {
                    apply(&mut info.switch_exp);
                }
            }
            StmtKind::Call(c) => {
                apply(&mut c.dest);
                for a in &mut c.args {
                    apply(&mut a.rhs);
                }
                for d in &mut c.defines {
                    map_lhs_address(&mut d.lhs, &mut apply);
                }
            }
            StmtKind::Ret(r) => {
                for a in r.modifieds.iter_mut().chain(r.returns.iter_mut()) {
                    apply(&mut a.rhs);
                }
            }
            StmtKind::ImpRef(i) => apply(&mut i.addr),
        }
        changed
    }

    /// Rewrite every expression in the statement, including defined
    /// locations and phi left-hand sides. Used when lowering out of SSA.
    pub fn map_all_exps(&mut self, m: &mut dyn ExpModifier) -> bool {
        let mut changed = self.map_use_exps(m);
        let mut apply = |e: &mut Exp| {
            let (new, ch) = modify_exp(core::mem::replace(e, Exp::int(0)), m);
            *e = new;
            changed |= ch;
        };
        match &mut self.kind {
            StmtKind::Assign(a) => apply(&mut a.lhs),
            StmtKind::Phi(p) => apply(&mut p.lhs),
            StmtKind::Implicit(i) => apply(&mut i.lhs),
            StmtKind::Bool(b) => apply(&mut b.lhs),
            StmtKind::Call(c) => {
                for d in &mut c.defines {
                    apply(&mut d.lhs);
                }
                for a in &mut c.args {
                    apply(&mut a.lhs);
                }
            }
            StmtKind::Ret(r) => {
                for a in r.modifieds.iter_mut().chain(r.returns.iter_mut()) {
                    apply(&mut a.lhs);
                }
            }
            _ => {}
        }
        changed
    }

    /// Whether `pattern` matches any expression in the statement.
    pub fn search(&self, pattern: &Exp) -> bool {
        let mut found = false;
        self.for_each_use(&mut |e| found |= e.search(pattern).is_some());
        if found {
            return true;
        }
        let mut defs = Vec::new();
        self.definitions(&mut defs);
        defs.iter().any(|d| d.search(pattern).is_some())
    }

    /// Replace every occurrence of `pattern` in the statement, defined
    /// locations included. Returns whether anything changed.
    pub fn search_and_replace(&mut self, pattern: &Exp, replacement: &Exp) -> bool {
        struct Replacer<'a> {
            pattern: &'a Exp,
            replacement: &'a Exp,
        }
        impl ExpModifier for Replacer<'_> {
            fn pre_modify(&mut self, e: Exp) -> crate::exp::visitor::PreModify {
                if e.matches(self.pattern) {
                    crate::exp::visitor::PreModify::replace(self.replacement.clone())
                } else {
                    crate::exp::visitor::PreModify::recurse(e)
                }
            }
        }
        let mut replacer = Replacer {
            pattern,
            replacement,
        };
        self.map_all_exps(&mut replacer)
    }

    /// Collect every subscripted use as (base, defining statement). Phi
    /// operands count as uses of their slot's definition.
    pub fn collect_refs(&self, out: &mut Vec<(Exp, Option<StmtId>)>) {
        self.for_each_use(&mut |e| {
            let mut refs = Vec::new();
            e.refs(&mut refs);
            for r in refs {
                if let Exp::Ref(base, def) = r {
                    out.push(((**base).clone(), *def));
                }
            }
        });
        if let StmtKind::Phi(p) = &self.kind {
            for arg in &p.args {
                out.push((p.lhs.unsubscripted(), arg.def));
            }
        }
    }

    /// Simplify every expression in the statement, folding flag calls into
    /// relational conditions where a branch or set consumes them.
    pub fn simplify(&mut self) {
        let mut simp = |e: &mut Exp| {
            let cur = core::mem::replace(e, Exp::int(0));
            *e = cur.simplify();
        };
        match &mut self.kind {
            StmtKind::Assign(a) => {
                simp(&mut a.lhs);
                simp(&mut a.rhs);
                if let Some(g) = &mut a.guard {
                    simp(g);
                }
            }
            StmtKind::Phi(_) | StmtKind::Implicit(_) | StmtKind::Junction => {}
            StmtKind::Bool(b) => {
                simp(&mut b.cond);
                if let Some(folded) = fold_flag_call(b.kind, &b.cond) {
                    b.cond = folded;
                }
            }
            StmtKind::Goto(g) => simp(&mut g.dest),
            StmtKind::Branch(b) => {
                simp(&mut b.cond);
                if let Some(folded) = fold_flag_call(b.kind, &b.cond) {
                    b.cond = folded.simplify();
                }
            }
            StmtKind::Case(c) => {
                simp(&mut c.dest);
                if let Some(info) = &mut c.info {
                    simp(&mut info.switch_exp);
                }
            }
            StmtKind::Call(c) => {
                simp(&mut c.dest);
                for a in &mut c.args {
                    simp(&mut a.rhs);
                }
            }
            StmtKind::Ret(r) => {
                for a in r.modifieds.iter_mut().chain(r.returns.iter_mut()) {
                    simp(&mut a.rhs);
                }
            }
            StmtKind::ImpRef(i) => simp(&mut i.addr),
        }
    }
}

/// Convert a flag-call condition into the relational form the branch kind
/// describes. `None` when the condition is not a flag call or the kind has
/// no relational equivalent (overflow tests).
fn fold_flag_call(kind: BranchKind, cond: &Exp) -> Option<Exp> {
    let (_, args) = match cond {
        Exp::Binary(BinaryOp::FlagCall, name, args) => (name, args),
        _ => return None,
    };
    let op = kind.comparison()?;
    let mut operands = Vec::new();
    flatten_list(args, &mut operands);
    match (operands.first(), operands.get(1), kind) {
        (Some(a), _, BranchKind::Minus | BranchKind::Pos) => {
            Some(Exp::binary(op, (*a).clone(), Exp::int(0)))
        }
        (Some(a), Some(b), _) => Some(Exp::binary(op, (*a).clone(), (*b).clone())),
        (Some(a), None, _) => Some(Exp::binary(op, (*a).clone(), Exp::int(0))),
        _ => None,
    }
}

fn flatten_list<'a>(e: &'a Exp, out: &mut Vec<&'a Exp>) {
    match e {
        Exp::Binary(BinaryOp::ListCons, a, b) => {
            flatten_list(a, out);
            flatten_list(b, out);
        }
        Exp::Terminal(Terminal::Flags) => {}
        other => out.push(other),
    }
}

/// Visit the address sub-expression of a defined location: the inner
/// expression of a memory-of or non-constant register-of left-hand side.
fn for_lhs_address(lhs: &Exp, f: &mut dyn FnMut(&Exp)) {
    match lhs {
        Exp::MemOf(addr) => f(addr),
        Exp::RegOf(idx) if idx.int_value().is_none() => f(idx),
        Exp::Ref(base, _) => for_lhs_address(base, f),
        _ => {}
    }
}

fn map_lhs_address(lhs: &mut Exp, apply: &mut dyn FnMut(&mut Exp)) {
    match lhs {
        Exp::MemOf(addr) => apply(addr),
        Exp::RegOf(idx) if idx.int_value().is_none() => apply(idx),
        Exp::Ref(base, _) => map_lhs_address(base, apply),
        _ => {}
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_valid() {
            write!(f, "{:4} ", self.id.value())?;
        } else {
            f.write_str("   ? ")?;
        }
        match &self.kind {
            StmtKind::Assign(a) => write!(f, "{a}"),
            StmtKind::Phi(p) => {
                write!(f, "{} := phi(", p.lhs)?;
                for (i, arg) in p.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    match arg.def {
                        Some(d) => write!(f, "{d}")?,
                        None => f.write_str("-")?,
                    }
                }
                f.write_str(")")
            }
            StmtKind::Implicit(i) => write!(f, "*{}* {} := -", i.ty, i.lhs),
            StmtKind::Bool(b) => write!(f, "{} := CC({}, {})", b.lhs, b.kind, b.cond),
            StmtKind::Goto(g) if g.is_computed => write!(f, "GOTO [{}]", g.dest),
            StmtKind::Goto(g) => write!(f, "GOTO {}", g.dest),
            StmtKind::Branch(b) => {
                write!(f, "BRANCH {}, condition {} ({})", b.dest, b.kind, b.cond)
            }
            StmtKind::Case(c) => write!(f, "CASE [{}]", c.dest),
            StmtKind::Call(c) => {
                write!(f, "CALL {}(", c.dest)?;
                for (i, a) in c.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", a.rhs)?;
                }
                f.write_str(")")
            }
            StmtKind::Ret(r) => {
                f.write_str("RET ")?;
                for (i, a) in r.returns.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} := {}", a.lhs, a.rhs)?;
                }
                Ok(())
            }
            StmtKind::Junction => f.write_str("JUNCTION"),
            StmtKind::ImpRef(i) => write!(f, "IMPREF *{}* {}", i.ty, i.addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assign_uses_rhs_and_lhs_address_only() {
        // m[r28 + 4] := r24 uses r28 + 4 and r24, not m[...]
        let s = Statement::assign(
            Exp::mem(Exp::binary(BinaryOp::Plus, Exp::reg(28), Exp::int(4))),
            Exp::reg(24),
        );
        assert!(s.uses(&Exp::reg(28)));
        assert!(s.uses(&Exp::reg(24)));
        assert!(s.defines(&Exp::mem(Exp::binary(
            BinaryOp::Plus,
            Exp::reg(28),
            Exp::int(4)
        ))));
        assert!(!s.defines(&Exp::reg(24)));
    }

    #[test]
    fn phi_collapses_when_operands_agree() {
        let phi = PhiAssign {
            ty: Type::Void,
            lhs: Exp::reg(24),
            args: vec![
                PhiArg {
                    pred: BbId::new(0),
                    def: Some(StmtId::new(5)),
                },
                PhiArg {
                    pred: BbId::new(1),
                    def: Some(StmtId::new(5)),
                },
            ],
        };
        assert_eq!(phi.uniform_def(), Some(Some(StmtId::new(5))));
    }

    #[test]
    fn flag_call_folds_into_comparison() {
        let mut b = Statement::new(StmtKind::Branch(BranchStatement {
            kind: BranchKind::SLe,
            is_float: false,
            cond: Exp::binary(
                BinaryOp::FlagCall,
                Exp::string("SUBFLAGS"),
                Exp::binary(BinaryOp::ListCons, Exp::reg(24), Exp::reg(25)),
            ),
            dest: Address::new(0x1000),
        }));
        b.simplify();
        match &b.kind {
            StmtKind::Branch(br) => {
                assert_eq!(br.cond, Exp::binary(BinaryOp::Le, Exp::reg(24), Exp::reg(25)));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn call_defines_its_define_list() {
        let mut call = CallStatement::direct(Address::new(0x2000));
        call.defines.push(Assign::new(Exp::reg(24), Exp::int(0)));
        let s = Statement::new(StmtKind::Call(call));
        assert!(s.defines(&Exp::reg(24)));
        assert!(!s.defines(&Exp::reg(25)));
    }

    #[test]
    fn collect_refs_sees_phi_operands() {
        let s = Statement::new(StmtKind::Phi(PhiAssign {
            ty: Type::Void,
            lhs: Exp::reg(24),
            args: vec![
                PhiArg {
                    pred: BbId::new(0),
                    def: Some(StmtId::new(1)),
                },
                PhiArg {
                    pred: BbId::new(1),
                    def: None,
                },
            ],
        }));
        let mut refs = Vec::new();
        s.collect_refs(&mut refs);
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0], (Exp::reg(24), Some(StmtId::new(1))));
    }
}
