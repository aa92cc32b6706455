//! Traversal of expression trees.
//!
//! Read-only passes implement [`ExpVisitor`]; rewriting passes implement
//! [`ExpModifier`]. The walker tracks, per level, whether anything below a
//! node changed, and re-simplifies exactly the altered ancestors. That keeps
//! wholesale rewrites (propagation, call bypass) from re-simplifying every
//! tree they merely walked past.

use crate::exp::Exp;

/// Read-only pre/post-order visitor. `visit_pre` may prune a subtree by
/// returning `false`.
pub trait ExpVisitor {
    /// Called before the children; return `false` to skip them.
    fn visit_pre(&mut self, e: &Exp) -> bool {
        let _ = e;
        true
    }

    /// Called after the children.
    fn visit_post(&mut self, e: &Exp) {
        let _ = e;
    }
}

/// Walk `e` with `v`, pre- and post-visiting every node.
pub fn walk_exp(e: &Exp, v: &mut dyn ExpVisitor) {
    if v.visit_pre(e) {
        e.for_children(&mut |c| walk_exp(c, &mut *v));
    }
    v.visit_post(e);
}

/// Result of [`ExpModifier::pre_modify`].
pub struct PreModify {
    /// The (possibly replaced) node.
    pub exp: Exp,
    /// Whether to descend into the children.
    pub recurse: bool,
    /// Whether the node was replaced.
    pub changed: bool,
}

impl PreModify {
    /// Keep the node and descend.
    pub fn recurse(exp: Exp) -> Self {
        Self {
            exp,
            recurse: true,
            changed: false,
        }
    }

    /// Replace the node and do not descend into the replacement.
    pub fn replace(exp: Exp) -> Self {
        Self {
            exp,
            recurse: false,
            changed: true,
        }
    }
}

/// Rewriting pre/post-order visitor.
pub trait ExpModifier {
    /// Called before the children; may replace the node or prune descent.
    fn pre_modify(&mut self, e: Exp) -> PreModify {
        PreModify::recurse(e)
    }

    /// Called after the children; returns the (possibly replaced) node and
    /// whether it was changed.
    fn post_modify(&mut self, e: Exp) -> (Exp, bool) {
        (e, false)
    }
}

/// Apply `m` over `e` bottom-up. Ancestors of a changed child are
/// re-simplified once; untouched subtrees are left alone.
pub fn modify_exp(e: Exp, m: &mut dyn ExpModifier) -> (Exp, bool) {
    let PreModify {
        exp: mut e,
        recurse,
        changed: pre_changed,
    } = m.pre_modify(e);

    let mut below = false;
    if recurse {
        e.for_children_mut(&mut |c| {
            let (new, ch) = modify_exp(core::mem::replace(c, Exp::int(0)), &mut *m);
            *c = new;
            below |= ch;
        });
    }

    let (mut out, post_changed) = m.post_modify(e);
    if below {
        out = out.simplify_node();
    }
    (out, pre_changed | below | post_changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::BinaryOp;

    struct CountRegs(usize);

    impl ExpVisitor for CountRegs {
        fn visit_pre(&mut self, e: &Exp) -> bool {
            if matches!(e, Exp::RegOf(_)) {
                self.0 += 1;
                // prune: the index constant is not a use of interest
                return false;
            }
            true
        }
    }

    struct ReplaceReg {
        from: Exp,
        to: Exp,
    }

    impl ExpModifier for ReplaceReg {
        fn pre_modify(&mut self, e: Exp) -> PreModify {
            if e == self.from {
                PreModify::replace(self.to.clone())
            } else {
                PreModify::recurse(e)
            }
        }
    }

    #[test]
    fn visitor_prunes_subtrees() {
        let e = Exp::binary(
            BinaryOp::Plus,
            Exp::reg(24),
            Exp::mem(Exp::binary(BinaryOp::Plus, Exp::reg(28), Exp::int(4))),
        );
        let mut v = CountRegs(0);
        walk_exp(&e, &mut v);
        assert_eq!(v.0, 2);
    }

    #[test]
    fn changed_ancestors_are_resimplified() {
        let e = Exp::binary(BinaryOp::Plus, Exp::reg(24), Exp::int(4));
        let mut m = ReplaceReg {
            from: Exp::reg(24),
            to: Exp::int(0),
        };
        let (out, changed) = modify_exp(e, &mut m);
        assert!(changed);
        // the altered parent folded 0 + 4 without a full simplify pass
        assert_eq!(out, Exp::int(4));
    }

    #[test]
    fn untouched_trees_report_unchanged() {
        let e = Exp::binary(BinaryOp::Plus, Exp::reg(24), Exp::int(4));
        let mut m = ReplaceReg {
            from: Exp::reg(99),
            to: Exp::int(0),
        };
        let (out, changed) = modify_exp(e.clone(), &mut m);
        assert!(!changed);
        assert_eq!(out, e);
    }
}
