//! The expression algebra.
//!
//! An [`Exp`] is a tree of operators over machine locations and constants.
//! Trees are plain owned values: every rewrite produces a new tree, so the
//! "no mutation through an alias" rule holds by construction. Structural
//! equality and the derived total order (operator tag, then children,
//! lexicographically) are what the analyses sort and deduplicate with; the
//! wildcard-tolerant [`Exp::matches`] is used only by the pattern library.

mod simplify;
pub mod visitor;

use core::fmt;
use core::hash::{Hash, Hasher};

use reloom_types::{Address, RegNum, StmtId};

use crate::op::{BinaryOp, Terminal, TernaryOp, UnaryOp};
use crate::ty::Type;

/// A constant payload.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Const {
    /// Integer constant, stored sign-extended.
    Int(i64),
    /// Floating-point constant.
    Flt(f64),
    /// String constant.
    Str(String),
    /// Address constant.
    Addr(Address),
}

impl Const {
    fn rank(&self) -> u8 {
        match self {
            Const::Int(_) => 0,
            Const::Flt(_) => 1,
            Const::Str(_) => 2,
            Const::Addr(_) => 3,
        }
    }
}

// Floats take part in equality and ordering by their bit pattern; the tree
// must be totally ordered for canonical sorting to be stable.
impl PartialEq for Const {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Const::Int(a), Const::Int(b)) => a == b,
            (Const::Flt(a), Const::Flt(b)) => a.to_bits() == b.to_bits(),
            (Const::Str(a), Const::Str(b)) => a == b,
            (Const::Addr(a), Const::Addr(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Const {}

impl PartialOrd for Const {
    fn partial_cmp(&self, other: &Self) -> Option<core::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Const {
    fn cmp(&self, other: &Self) -> core::cmp::Ordering {
        match (self, other) {
            (Const::Int(a), Const::Int(b)) => a.cmp(b),
            (Const::Flt(a), Const::Flt(b)) => a.to_bits().cmp(&b.to_bits()),
            (Const::Str(a), Const::Str(b)) => a.cmp(b),
            (Const::Addr(a), Const::Addr(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Const {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Const::Int(v) => v.hash(state),
            Const::Flt(v) => v.to_bits().hash(state),
            Const::Str(v) => v.hash(state),
            Const::Addr(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Const::Int(v) => write!(f, "{v}"),
            Const::Flt(v) => write!(f, "{v}"),
            Const::Str(v) => write!(f, "\"{v}\""),
            Const::Addr(v) => write!(f, "{v}"),
        }
    }
}

/// An expression tree node.
///
/// The variant order matters: the derived `Ord` sorts first on the operator
/// tag and then lexicographically on children, which is the total order the
/// simplifier's canonical form relies on.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Exp {
    /// Constant.
    Const(Const),
    /// Terminal (no children).
    Terminal(Terminal),
    /// Register addressed by the child expression, usually a constant.
    RegOf(Box<Exp>),
    /// Memory addressed by the child expression.
    MemOf(Box<Exp>),
    /// Address of the child location.
    AddrOf(Box<Exp>),
    /// Named parameter.
    Param(String),
    /// Named local.
    Local(String),
    /// Named global.
    Global(String),
    /// Named temporary introduced by the decoder.
    Temp(String),
    /// Unary operator application.
    Unary(UnaryOp, Box<Exp>),
    /// Binary operator application.
    Binary(BinaryOp, Box<Exp>, Box<Exp>),
    /// Ternary operator application.
    Ternary(TernaryOp, Box<Exp>, Box<Exp>, Box<Exp>),
    /// Subscripted reference `loc{def}`: the SSA annotation attaching a
    /// location to the statement that defines it. `None` marks a use of the
    /// value on entry before the implicit assign is materialised.
    Ref(Box<Exp>, Option<StmtId>),
    /// Type-cast of the child expression.
    Typed(Type, Box<Exp>),
    /// A type used as a value, for type hints in machine features.
    TypeVal(Type),
}

impl Exp {
    /// Integer constant.
    pub const fn int(value: i64) -> Self {
        Self::Const(Const::Int(value))
    }

    /// Floating-point constant.
    pub const fn flt(value: f64) -> Self {
        Self::Const(Const::Flt(value))
    }

    /// String constant.
    pub fn string(value: impl Into<String>) -> Self {
        Self::Const(Const::Str(value.into()))
    }

    /// Address constant.
    pub const fn addr(value: Address) -> Self {
        Self::Const(Const::Addr(value))
    }

    /// Register location `r<num>`.
    pub fn reg(num: RegNum) -> Self {
        Self::RegOf(Box::new(Self::int(num as i64)))
    }

    /// Memory location `m[addr]`.
    pub fn mem(addr: Exp) -> Self {
        Self::MemOf(Box::new(addr))
    }

    /// Address-of `a[loc]`.
    pub fn addr_of(loc: Exp) -> Self {
        Self::AddrOf(Box::new(loc))
    }

    /// Unary application.
    pub fn unary(op: UnaryOp, e: Exp) -> Self {
        Self::Unary(op, Box::new(e))
    }

    /// Binary application.
    pub fn binary(op: BinaryOp, lhs: Exp, rhs: Exp) -> Self {
        Self::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Ternary application.
    pub fn ternary(op: TernaryOp, a: Exp, b: Exp, c: Exp) -> Self {
        Self::Ternary(op, Box::new(a), Box::new(b), Box::new(c))
    }

    /// Subscripted reference `base{def}`.
    pub fn subscript(base: Exp, def: Option<StmtId>) -> Self {
        Self::Ref(Box::new(base), def)
    }

    /// Named local.
    pub fn local(name: impl Into<String>) -> Self {
        Self::Local(name.into())
    }

    /// Named parameter.
    pub fn param(name: impl Into<String>) -> Self {
        Self::Param(name.into())
    }

    /// Named global.
    pub fn global(name: impl Into<String>) -> Self {
        Self::Global(name.into())
    }

    /// Named temporary.
    pub fn temp(name: impl Into<String>) -> Self {
        Self::Temp(name.into())
    }

    /// Whether this is any constant.
    pub const fn is_const(&self) -> bool {
        matches!(self, Self::Const(_))
    }

    /// The integer payload, when this is an integer constant.
    pub fn int_value(&self) -> Option<i64> {
        match self {
            Self::Const(Const::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// The address payload, when this is an address constant.
    pub fn addr_value(&self) -> Option<Address> {
        match self {
            Self::Const(Const::Addr(a)) => Some(*a),
            _ => None,
        }
    }

    /// The register number, when this is `r<num>` with a constant index.
    pub fn reg_num(&self) -> Option<RegNum> {
        match self {
            Self::RegOf(idx) => idx.int_value().map(|v| v as RegNum),
            _ => None,
        }
    }

    /// Whether this expression is a machine location or named symbol: the
    /// kind of expression that can appear on the left of an assignment and
    /// be renamed into SSA.
    pub fn is_location(&self) -> bool {
        matches!(
            self,
            Self::RegOf(_)
                | Self::MemOf(_)
                | Self::Param(_)
                | Self::Local(_)
                | Self::Global(_)
                | Self::Temp(_)
                | Self::Terminal(Terminal::Pc)
                | Self::Terminal(Terminal::Flags)
                | Self::Terminal(Terminal::CarryFlag)
        )
    }

    /// Whether this is a subscripted reference.
    pub const fn is_ref(&self) -> bool {
        matches!(self, Self::Ref(_, _))
    }

    /// Base location of a reference, or the expression itself.
    pub fn base(&self) -> &Exp {
        match self {
            Self::Ref(base, _) => base,
            other => other,
        }
    }

    /// Defining statement of a reference.
    pub fn def(&self) -> Option<StmtId> {
        match self {
            Self::Ref(_, def) => *def,
            _ => None,
        }
    }

    /// Strip every subscript in the tree, returning the unsubscripted form.
    pub fn unsubscripted(&self) -> Exp {
        match self {
            Self::Ref(base, _) => base.unsubscripted(),
            other => {
                let mut out = other.clone();
                out.for_children_mut(&mut |c| *c = c.unsubscripted());
                out
            }
        }
    }

    /// Number of direct children.
    pub fn arity(&self) -> usize {
        match self {
            Self::Const(_) | Self::Terminal(_) | Self::Param(_) | Self::Local(_)
            | Self::Global(_) | Self::Temp(_) | Self::TypeVal(_) => 0,
            Self::RegOf(_) | Self::MemOf(_) | Self::AddrOf(_) | Self::Unary(_, _)
            | Self::Ref(_, _) | Self::Typed(_, _) => 1,
            Self::Binary(_, _, _) => 2,
            Self::Ternary(_, _, _, _) => 3,
        }
    }

    /// Apply `f` to each direct child, left to right.
    pub fn for_children<'a>(&'a self, f: &mut dyn FnMut(&'a Exp)) {
        match self {
            Self::RegOf(a) | Self::MemOf(a) | Self::AddrOf(a) | Self::Unary(_, a)
            | Self::Ref(a, _) | Self::Typed(_, a) => f(a),
            Self::Binary(_, a, b) => {
                f(a);
                f(b);
            }
            Self::Ternary(_, a, b, c) => {
                f(a);
                f(b);
                f(c);
            }
            _ => {}
        }
    }

    /// Apply `f` to each direct child, left to right, mutably.
    pub fn for_children_mut(&mut self, f: &mut dyn FnMut(&mut Exp)) {
        match self {
            Self::RegOf(a) | Self::MemOf(a) | Self::AddrOf(a) | Self::Unary(_, a)
            | Self::Ref(a, _) | Self::Typed(_, a) => f(a),
            Self::Binary(_, a, b) => {
                f(a);
                f(b);
            }
            Self::Ternary(_, a, b, c) => {
                f(a);
                f(b);
                f(c);
            }
            _ => {}
        }
    }

    /// Wildcard-tolerant match of `self` against `pattern`. Wildcards may
    /// appear only in the pattern.
    pub fn matches(&self, pattern: &Exp) -> bool {
        if let Exp::Terminal(t) = pattern {
            if t.is_wildcard() {
                return match t {
                    Terminal::Wild => true,
                    Terminal::WildIntConst => matches!(self, Exp::Const(Const::Int(_))),
                    Terminal::WildStrConst => matches!(self, Exp::Const(Const::Str(_))),
                    Terminal::WildMemOf => matches!(self, Exp::MemOf(_)),
                    Terminal::WildRegOf => matches!(self, Exp::RegOf(_)),
                    Terminal::WildAddrOf => matches!(self, Exp::AddrOf(_)),
                    _ => false,
                };
            }
        }
        match (self, pattern) {
            (Exp::Const(a), Exp::Const(b)) => a == b,
            (Exp::Terminal(a), Exp::Terminal(b)) => a == b,
            (Exp::RegOf(a), Exp::RegOf(b))
            | (Exp::MemOf(a), Exp::MemOf(b))
            | (Exp::AddrOf(a), Exp::AddrOf(b)) => a.matches(b),
            (Exp::Param(a), Exp::Param(b))
            | (Exp::Local(a), Exp::Local(b))
            | (Exp::Global(a), Exp::Global(b))
            | (Exp::Temp(a), Exp::Temp(b)) => a == b,
            (Exp::Unary(oa, a), Exp::Unary(ob, b)) => oa == ob && a.matches(b),
            (Exp::Binary(oa, a1, a2), Exp::Binary(ob, b1, b2)) => {
                oa == ob && a1.matches(b1) && a2.matches(b2)
            }
            (Exp::Ternary(oa, a1, a2, a3), Exp::Ternary(ob, b1, b2, b3)) => {
                oa == ob && a1.matches(b1) && a2.matches(b2) && a3.matches(b3)
            }
            (Exp::Ref(a, da), Exp::Ref(b, db)) => da == db && a.matches(b),
            (Exp::Typed(ta, a), Exp::Typed(tb, b)) => ta == tb && a.matches(b),
            (Exp::TypeVal(a), Exp::TypeVal(b)) => a == b,
            _ => false,
        }
    }

    /// Find the first sub-expression matching `pattern`, pre-order.
    pub fn search<'a>(&'a self, pattern: &Exp) -> Option<&'a Exp> {
        if self.matches(pattern) {
            return Some(self);
        }
        let mut found = None;
        self.for_children(&mut |c| {
            if found.is_none() {
                found = c.search(pattern);
            }
        });
        found
    }

    /// Collect every sub-expression matching `pattern`, pre-order.
    pub fn search_all<'a>(&'a self, pattern: &Exp, out: &mut Vec<&'a Exp>) {
        if self.matches(pattern) {
            out.push(self);
        }
        self.for_children(&mut |c| c.search_all(pattern, out));
    }

    /// Replace every sub-expression matching `pattern` by `replacement`,
    /// without descending into replacements. Returns the new tree and
    /// whether anything changed.
    pub fn search_and_replace(self, pattern: &Exp, replacement: &Exp) -> (Exp, bool) {
        if self.matches(pattern) {
            return (replacement.clone(), true);
        }
        let mut changed = false;
        let mut out = self;
        out.for_children_mut(&mut |c| {
            let (new, ch) = core::mem::replace(c, Exp::int(0)).search_and_replace(pattern, replacement);
            *c = new;
            changed |= ch;
        });
        (out, changed)
    }

    /// Collect every subscripted reference in the tree.
    pub fn refs<'a>(&'a self, out: &mut Vec<&'a Exp>) {
        if self.is_ref() {
            out.push(self);
        }
        self.for_children(&mut |c| c.refs(out));
    }

    /// Depth of operator nesting; locations and constants are depth one.
    pub fn depth(&self) -> usize {
        let mut max = 0;
        self.for_children(&mut |c| max = max.max(c.depth()));
        max + 1
    }
}

impl fmt::Display for Exp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exp::Const(c) => write!(f, "{c}"),
            Exp::Terminal(t) => write!(f, "{t}"),
            Exp::RegOf(idx) => match idx.int_value() {
                Some(n) => write!(f, "r{n}"),
                None => write!(f, "r[{idx}]"),
            },
            Exp::MemOf(addr) => write!(f, "m[{addr}]"),
            Exp::AddrOf(loc) => write!(f, "a[{loc}]"),
            Exp::Param(n) | Exp::Local(n) | Exp::Global(n) | Exp::Temp(n) => write!(f, "{n}"),
            Exp::Unary(UnaryOp::MachFtr, e) => write!(f, "machftr({e})"),
            Exp::Unary(op, e) => write!(f, "{op}{e}"),
            Exp::Binary(BinaryOp::FlagCall, name, args) => match name.as_ref() {
                Exp::Const(Const::Str(s)) => write!(f, "{s}({args})"),
                other => write!(f, "flagcall({other}, {args})"),
            },
            Exp::Binary(BinaryOp::SizeCast, bits, e) => write!(f, "size({bits}, {e})"),
            Exp::Binary(BinaryOp::ListCons, a, b) => write!(f, "{a}, {b}"),
            Exp::Binary(op, a, b) => write!(f, "({a} {op} {b})"),
            Exp::Ternary(TernaryOp::Cond, c, t, e) => write!(f, "({c} ? {t} : {e})"),
            Exp::Ternary(TernaryOp::BitExtract, e, lo, hi) => write!(f, "{e}@[{lo}:{hi}]"),
            Exp::Ternary(op, a, b, c) => write!(f, "{op}({a}, {b}, {c})"),
            Exp::Ref(base, Some(def)) => write!(f, "{base}{{{def}}}"),
            Exp::Ref(base, None) => write!(f, "{base}{{-}}"),
            Exp::Typed(ty, e) => write!(f, "({ty}){e}"),
            Exp::TypeVal(ty) => write!(f, "<{ty}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::BinaryOp::*;

    #[test]
    fn clone_is_deep_and_independent() {
        let e = Exp::binary(Plus, Exp::reg(24), Exp::mem(Exp::reg(28)));
        let mut c = e.clone();
        assert_eq!(c, e);
        c.for_children_mut(&mut |child| *child = Exp::int(0));
        assert_ne!(c, e);
        assert_eq!(e, Exp::binary(Plus, Exp::reg(24), Exp::mem(Exp::reg(28))));
    }

    #[test]
    fn total_order_sorts_by_operator_then_children() {
        let a = Exp::int(1);
        let b = Exp::int(2);
        let r = Exp::reg(24);
        assert!(a < b);
        assert!(a < r); // constants sort before locations
        assert!(Exp::reg(24) < Exp::reg(25));
    }

    #[test]
    fn wildcards_match_only_their_shape() {
        let e = Exp::binary(Plus, Exp::reg(24), Exp::int(5));
        let pat = Exp::binary(
            Plus,
            Exp::Terminal(Terminal::WildRegOf),
            Exp::Terminal(Terminal::WildIntConst),
        );
        assert!(e.matches(&pat));
        let pat2 = Exp::binary(
            Plus,
            Exp::Terminal(Terminal::WildMemOf),
            Exp::Terminal(Terminal::WildIntConst),
        );
        assert!(!e.matches(&pat2));
    }

    #[test]
    fn search_finds_nested_occurrences() {
        let e = Exp::mem(Exp::binary(Plus, Exp::reg(28), Exp::int(8)));
        assert!(e.search(&Exp::reg(28)).is_some());
        assert!(e.search(&Exp::reg(29)).is_none());

        let mut all = Vec::new();
        e.search_all(&Exp::Terminal(Terminal::WildIntConst), &mut all);
        // r28's index constant and the literal 8
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn replace_hits_everything_the_search_saw() {
        let e = Exp::binary(Plus, Exp::reg(24), Exp::binary(Mult, Exp::reg(24), Exp::int(2)));
        let (out, changed) = e.search_and_replace(&Exp::reg(24), &Exp::local("x"));
        assert!(changed);
        assert!(out.search(&Exp::local("x")).is_some());
        assert!(out.search(&Exp::reg(24)).is_none());
    }

    #[test]
    fn unsubscripted_strips_all_refs() {
        let e = Exp::binary(
            Plus,
            Exp::subscript(Exp::reg(24), Some(StmtId::new(3))),
            Exp::mem(Exp::subscript(Exp::reg(28), None)),
        );
        let bare = e.unsubscripted();
        let mut refs = Vec::new();
        bare.refs(&mut refs);
        assert!(refs.is_empty());
    }

    #[test]
    fn display_is_readable() {
        let e = Exp::binary(Plus, Exp::reg(24), Exp::int(4));
        assert_eq!(e.to_string(), "(r24 + 4)");
        let r = Exp::subscript(Exp::reg(24), Some(StmtId::new(7)));
        assert_eq!(r.to_string(), "r24{7}");
        assert_eq!(Exp::mem(Exp::reg(28)).to_string(), "m[r28]");
    }

    #[test]
    fn depth_counts_operator_nesting() {
        assert_eq!(Exp::reg(24).depth(), 2); // RegOf over Const
        assert_eq!(Exp::int(1).depth(), 1);
        assert_eq!(Exp::binary(Plus, Exp::int(1), Exp::int(2)).depth(), 2);
    }
}
