//! Canonicalisation of expression trees.
//!
//! `simplify` is idempotent and never loses information. Canonical form:
//! constants folded, identities gone, commutative-associative chains
//! flattened into a sorted left-spine with any constant term last. Sorting
//! is what makes structural equality useful to the analyses.

use crate::exp::{Const, Exp};
use crate::op::{BinaryOp, Terminal, TernaryOp, UnaryOp};

impl Exp {
    /// Simplify the whole tree. The `x - K` to `x + (-K)` normalisation is
    /// applied at the top level only.
    pub fn simplify(self) -> Exp {
        let e = self.simplify_rec();
        match e {
            Exp::Binary(BinaryOp::Minus, a, b) => match b.int_value() {
                Some(k) => {
                    Exp::binary(BinaryOp::Plus, *a, Exp::int(k.wrapping_neg())).simplify_rec()
                }
                None => Exp::Binary(BinaryOp::Minus, a, b),
            },
            other => other,
        }
    }

    fn simplify_rec(mut self) -> Exp {
        self.for_children_mut(&mut |c| {
            let child = core::mem::replace(c, Exp::int(0));
            *c = child.simplify_rec();
        });
        self.simplify_node()
    }

    /// Apply node-local rules until nothing changes. Children are assumed
    /// already simplified; rules are confluent so this terminates.
    pub(crate) fn simplify_node(self) -> Exp {
        let mut e = self;
        loop {
            let (next, changed) = simplify_once(e);
            e = next;
            if !changed {
                return e;
            }
        }
    }
}

fn bool_exp(v: bool) -> Exp {
    Exp::Terminal(if v { Terminal::True } else { Terminal::False })
}

fn as_bool(e: &Exp) -> Option<bool> {
    match e {
        Exp::Terminal(Terminal::True) => Some(true),
        Exp::Terminal(Terminal::False) => Some(false),
        Exp::Const(Const::Int(v)) => Some(*v != 0),
        _ => None,
    }
}

fn simplify_once(e: Exp) -> (Exp, bool) {
    match e {
        Exp::Unary(op, a) => simplify_unary(op, *a),
        Exp::Binary(op, a, b) => simplify_binary(op, *a, *b),
        Exp::Ternary(op, a, b, c) => simplify_ternary(op, *a, *b, *c),
        Exp::AddrOf(inner) => match *inner {
            Exp::MemOf(addr) => (*addr, true),
            other => (Exp::AddrOf(Box::new(other)), false),
        },
        Exp::MemOf(inner) => match *inner {
            Exp::AddrOf(loc) => (*loc, true),
            other => (Exp::MemOf(Box::new(other)), false),
        },
        Exp::Typed(ty, inner) => match *inner {
            Exp::Typed(_, e2) => (Exp::Typed(ty, e2), true),
            other => (Exp::Typed(ty, Box::new(other)), false),
        },
        other => (other, false),
    }
}

fn simplify_unary(op: UnaryOp, a: Exp) -> (Exp, bool) {
    match (op, a) {
        (UnaryOp::Neg, Exp::Const(Const::Int(v))) => (Exp::int(v.wrapping_neg()), true),
        (UnaryOp::Neg, Exp::Unary(UnaryOp::Neg, inner)) => (*inner, true),
        (UnaryOp::BitNot, Exp::Const(Const::Int(v))) => (Exp::int(!v), true),
        (UnaryOp::BitNot, Exp::Unary(UnaryOp::BitNot, inner)) => (*inner, true),
        (UnaryOp::LogNot, Exp::Unary(UnaryOp::LogNot, inner)) => (*inner, true),
        (UnaryOp::LogNot, Exp::Terminal(Terminal::True)) => (bool_exp(false), true),
        (UnaryOp::LogNot, Exp::Terminal(Terminal::False)) => (bool_exp(true), true),
        // A logical not distributes into a comparison by inverting it.
        (UnaryOp::LogNot, Exp::Binary(cmp, lhs, rhs)) if cmp.inverted().is_some() => {
            let inv = cmp.inverted().unwrap_or(cmp);
            (Exp::Binary(inv, lhs, rhs), true)
        }
        (op, a) => (Exp::Unary(op, Box::new(a)), false),
    }
}

fn simplify_binary(op: BinaryOp, a: Exp, b: Exp) -> (Exp, bool) {
    use BinaryOp::*;

    // Comparisons of equal trees and constant comparisons fold to booleans.
    if op.is_comparison() {
        if let (Some(x), Some(y)) = (a.int_value(), b.int_value()) {
            return (bool_exp(fold_comparison(op, x, y)), true);
        }
        if a == b {
            let v = matches!(op, Eq | Le | Ge | LeU | GeU);
            return (bool_exp(v), true);
        }
        return (Exp::Binary(op, Box::new(a), Box::new(b)), false);
    }

    match op {
        Minus => {
            if a == b {
                return (Exp::int(0), true);
            }
            if b.int_value() == Some(0) {
                return (a, true);
            }
            if let (Some(x), Some(y)) = (a.int_value(), b.int_value()) {
                return (Exp::int(x.wrapping_sub(y)), true);
            }
            (Exp::Binary(Minus, Box::new(a), Box::new(b)), false)
        }
        Div | DivS => match (a.int_value(), b.int_value()) {
            (_, Some(1)) => (a, true),
            (Some(x), Some(y)) if y != 0 => (
                Exp::int(if op == Div {
                    ((x as u64) / (y as u64)) as i64
                } else {
                    x.wrapping_div(y)
                }),
                true,
            ),
            _ => (Exp::Binary(op, Box::new(a), Box::new(b)), false),
        },
        Mod | ModS => match (a.int_value(), b.int_value()) {
            (_, Some(1)) => (Exp::int(0), true),
            (Some(x), Some(y)) if y != 0 => (
                Exp::int(if op == Mod {
                    ((x as u64) % (y as u64)) as i64
                } else {
                    x.wrapping_rem(y)
                }),
                true,
            ),
            _ => (Exp::Binary(op, Box::new(a), Box::new(b)), false),
        },
        Shl | Shr | Sar => simplify_shift(op, a, b),
        BitXor if a == b => (Exp::int(0), true),
        SizeCast => match b {
            // Size casts of constants carry no information.
            Exp::Const(c) => (Exp::Const(c), true),
            other => (Exp::Binary(SizeCast, Box::new(a), Box::new(other)), false),
        },
        _ if op.is_commutative() => simplify_commutative(op, a, b),
        _ => (Exp::Binary(op, Box::new(a), Box::new(b)), false),
    }
}

fn simplify_shift(op: BinaryOp, a: Exp, b: Exp) -> (Exp, bool) {
    use BinaryOp::*;
    if b.int_value() == Some(0) {
        return (a, true);
    }
    if let (Some(x), Some(sh)) = (a.int_value(), b.int_value()) {
        if (0..64).contains(&sh) {
            let v = match op {
                Shl => x.wrapping_shl(sh as u32),
                Shr => ((x as u64) >> sh) as i64,
                _ => x >> sh,
            };
            return (Exp::int(v), true);
        }
    }
    // (x << c1) << c2 collapses to x << (c1 + c2); same for the right shifts.
    if let Exp::Binary(inner_op, x, c1) = &a {
        if *inner_op == op {
            if let (Some(c1v), Some(c2v)) = (c1.int_value(), b.int_value()) {
                let total = c1v.saturating_add(c2v);
                return (
                    Exp::Binary(*inner_op, x.clone(), Box::new(Exp::int(total))),
                    true,
                );
            }
        }
    }
    (Exp::Binary(op, Box::new(a), Box::new(b)), false)
}

/// Flatten a commutative-associative chain, fold its constants, drop
/// identities, cancel xor pairs, and rebuild as a sorted left spine with the
/// constant term last.
fn simplify_commutative(op: BinaryOp, a: Exp, b: Exp) -> (Exp, bool) {
    use BinaryOp::*;

    if matches!(op, LogAnd | LogOr) {
        return simplify_logical(op, a, b);
    }

    let identity: i64 = match op {
        Plus | BitOr | BitXor => 0,
        Mult | MultS => 1,
        BitAnd => -1,
        _ => 0,
    };
    let absorber: Option<i64> = match op {
        Mult | MultS | BitAnd => Some(0),
        BitOr => Some(-1),
        _ => None,
    };

    let original = Exp::Binary(op, Box::new(a), Box::new(b));
    let mut terms = Vec::new();
    flatten_chain(op, original.clone(), &mut terms);

    let mut acc = identity;
    let mut rest: Vec<Exp> = Vec::new();
    for t in terms {
        match t.int_value() {
            Some(v) => {
                acc = match op {
                    Plus => acc.wrapping_add(v),
                    Mult | MultS => acc.wrapping_mul(v),
                    BitAnd => acc & v,
                    BitOr => acc | v,
                    BitXor => acc ^ v,
                    _ => acc,
                }
            }
            None => rest.push(t),
        }
    }

    if absorber == Some(acc) {
        let out = Exp::int(acc);
        let changed = out != original;
        return (out, changed);
    }

    rest.sort();
    if op == BitXor {
        cancel_pairs(&mut rest);
    }

    let mut iter = rest.into_iter();
    let spine = match iter.next() {
        None => Exp::int(acc),
        Some(first) => {
            let mut spine = iter.fold(first, |acc_e, t| Exp::binary(op, acc_e, t));
            if acc != identity {
                spine = Exp::binary(op, spine, Exp::int(acc));
            }
            spine
        }
    };
    let changed = spine != original;
    (spine, changed)
}

fn simplify_logical(op: BinaryOp, a: Exp, b: Exp) -> (Exp, bool) {
    use BinaryOp::*;
    match (as_bool(&a), as_bool(&b)) {
        (Some(x), Some(y)) => {
            let v = if op == LogAnd { x && y } else { x || y };
            (bool_exp(v), true)
        }
        (Some(x), None) | (None, Some(x)) => {
            let keep = if as_bool(&a).is_some() { b } else { a };
            match (op, x) {
                (LogAnd, true) | (LogOr, false) => (keep, true),
                (LogAnd, false) => (bool_exp(false), true),
                _ => (bool_exp(true), true),
            }
        }
        (None, None) => {
            if a == b {
                return (a, true);
            }
            (Exp::Binary(op, Box::new(a), Box::new(b)), false)
        }
    }
}

fn simplify_ternary(op: TernaryOp, a: Exp, b: Exp, c: Exp) -> (Exp, bool) {
    match op {
        TernaryOp::Cond => {
            if let Some(v) = as_bool(&a) {
                return (if v { b } else { c }, true);
            }
            if b == c {
                return (b, true);
            }
            (Exp::ternary(op, a, b, c), false)
        }
        _ => (Exp::ternary(op, a, b, c), false),
    }
}

fn flatten_chain(op: BinaryOp, e: Exp, out: &mut Vec<Exp>) {
    match e {
        Exp::Binary(o, a, b) if o == op => {
            flatten_chain(op, *a, out);
            flatten_chain(op, *b, out);
        }
        other => out.push(other),
    }
}

/// Remove equal adjacent pairs from a sorted term list (xor cancellation).
fn cancel_pairs(terms: &mut Vec<Exp>) {
    let mut out: Vec<Exp> = Vec::with_capacity(terms.len());
    {
        let mut iter = terms.drain(..).peekable();
        while let Some(t) = iter.next() {
            if iter.peek() == Some(&t) {
                iter.next();
            } else {
                out.push(t);
            }
        }
    }
    *terms = out;
}

fn fold_comparison(op: BinaryOp, x: i64, y: i64) -> bool {
    use BinaryOp::*;
    match op {
        Eq => x == y,
        Ne => x != y,
        Lt => x < y,
        Gt => x > y,
        Le => x <= y,
        Ge => x >= y,
        LtU => (x as u64) < (y as u64),
        GtU => (x as u64) > (y as u64),
        LeU => (x as u64) <= (y as u64),
        GeU => (x as u64) >= (y as u64),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::BinaryOp::*;

    fn reg(n: u16) -> Exp {
        Exp::reg(n)
    }

    #[test]
    fn difference_of_equal_sums_is_zero() {
        let sum = |a: u16, b: u16| Exp::binary(Plus, reg(a), reg(b));
        let e = Exp::binary(Minus, sum(25, 26), sum(25, 26));
        assert_eq!(e.simplify(), Exp::int(0));
        // also when the operand order differs
        let e = Exp::binary(Minus, sum(25, 26), sum(26, 25));
        assert_eq!(e.simplify(), Exp::int(0));
    }

    #[test]
    fn constants_fold() {
        let e = Exp::binary(Plus, Exp::int(3), Exp::binary(Mult, Exp::int(4), Exp::int(5)));
        assert_eq!(e.simplify(), Exp::int(23));
        let e = Exp::binary(Lt, Exp::int(1), Exp::int(2));
        assert_eq!(e.simplify(), Exp::Terminal(Terminal::True));
    }

    #[test]
    fn identities_vanish() {
        assert_eq!(Exp::binary(Plus, reg(24), Exp::int(0)).simplify(), reg(24));
        assert_eq!(Exp::binary(Mult, reg(24), Exp::int(1)).simplify(), reg(24));
        assert_eq!(Exp::binary(BitAnd, reg(24), Exp::int(-1)).simplify(), reg(24));
        assert_eq!(Exp::binary(Mult, reg(24), Exp::int(0)).simplify(), Exp::int(0));
        assert_eq!(Exp::binary(BitXor, reg(24), reg(24)).simplify(), Exp::int(0));
    }

    #[test]
    fn minus_constant_normalises_at_top_only() {
        let e = Exp::binary(Minus, reg(24), Exp::int(4));
        assert_eq!(e.simplify(), Exp::binary(Plus, reg(24), Exp::int(-4)));
        // nested differences keep their shape
        let inner = Exp::binary(Minus, reg(24), Exp::int(4));
        let e = Exp::mem(inner.clone());
        assert_eq!(e.simplify(), Exp::mem(inner));
    }

    #[test]
    fn not_pushes_through_comparisons() {
        let cmp = Exp::binary(Le, reg(24), reg(25));
        let e = Exp::unary(UnaryOp::LogNot, cmp);
        assert_eq!(e.simplify(), Exp::binary(Gt, reg(24), reg(25)));
    }

    #[test]
    fn shifts_combine() {
        let e = Exp::binary(Shl, Exp::binary(Shl, reg(24), Exp::int(2)), Exp::int(3));
        assert_eq!(e.simplify(), Exp::binary(Shl, reg(24), Exp::int(5)));
    }

    #[test]
    fn addr_and_mem_collapse() {
        let e = Exp::addr_of(Exp::mem(reg(28)));
        assert_eq!(e.simplify(), reg(28));
        let e = Exp::mem(Exp::addr_of(Exp::local("x")));
        assert_eq!(e.simplify(), Exp::local("x"));
    }

    #[test]
    fn commutative_chains_sort() {
        let a = Exp::binary(Plus, reg(26), Exp::binary(Plus, reg(24), reg(25)));
        let b = Exp::binary(Plus, Exp::binary(Plus, reg(25), reg(26)), reg(24));
        assert_eq!(a.simplify(), b.simplify());
    }

    #[test]
    fn simplify_is_idempotent() {
        let cases = [
            Exp::binary(Minus, reg(24), Exp::int(4)),
            Exp::binary(Plus, reg(26), Exp::binary(Plus, reg(24), Exp::int(3))),
            Exp::unary(UnaryOp::LogNot, Exp::binary(Le, reg(24), reg(25))),
            Exp::mem(Exp::binary(Plus, reg(28), Exp::int(8))),
            Exp::ternary(TernaryOp::Cond, Exp::Terminal(Terminal::True), reg(1), reg(2)),
            Exp::binary(Div, reg(24), Exp::int(1)),
        ];
        for e in cases {
            let once = e.clone().simplify();
            let twice = once.clone().simplify();
            assert_eq!(once, twice, "not idempotent for {e}");
        }
    }

    mod properties {
        use super::*;
        use quickcheck::{Arbitrary, Gen};
        use quickcheck_macros::quickcheck;

        #[derive(Debug, Clone)]
        struct SmallExp(Exp);

        fn gen_exp(g: &mut Gen, depth: usize) -> Exp {
            if depth == 0 {
                return match u8::arbitrary(g) % 3 {
                    0 => Exp::int((i8::arbitrary(g)) as i64),
                    1 => Exp::reg((u8::arbitrary(g) % 8) as u16),
                    _ => Exp::local("x"),
                };
            }
            let ops = [Plus, Minus, Mult, BitAnd, BitOr, BitXor, Shl, Lt, Eq];
            match u8::arbitrary(g) % 4 {
                0 => gen_exp(g, 0),
                1 => Exp::unary(UnaryOp::Neg, gen_exp(g, depth - 1)),
                2 => Exp::mem(gen_exp(g, depth - 1)),
                _ => {
                    let op = ops[usize::arbitrary(g) % ops.len()];
                    Exp::binary(op, gen_exp(g, depth - 1), gen_exp(g, depth - 1))
                }
            }
        }

        impl Arbitrary for SmallExp {
            fn arbitrary(g: &mut Gen) -> Self {
                SmallExp(gen_exp(g, 3))
            }
        }

        #[quickcheck]
        fn simplify_is_idempotent_on_random_trees(e: SmallExp) -> bool {
            let once = e.0.simplify();
            once.clone().simplify() == once
        }

        #[quickcheck]
        fn simplify_preserves_constant_value(a: i8, b: i8, c: i8) -> bool {
            let e = Exp::binary(
                Plus,
                Exp::binary(Mult, Exp::int(a as i64), Exp::int(b as i64)),
                Exp::int(c as i64),
            );
            e.simplify() == Exp::int((a as i64).wrapping_mul(b as i64).wrapping_add(c as i64))
        }
    }
}
