use reloom_ir::{BranchKind, BranchStatement, Exp, Statement, StmtKind};
use reloom_types::{Address, BbId, StmtId};

use crate::cfg::{BbKind, Cfg};
use crate::dataflow::{DataFlow, RenamePolicy};
use crate::util::test_helpers::CfgBuilder;

fn branch_stmt(cond: Exp) -> Statement {
    Statement::new(StmtKind::Branch(BranchStatement {
        kind: BranchKind::Ne,
        is_float: false,
        cond,
        dest: Address::new(0),
    }))
}

fn def_r1(v: i64) -> Statement {
    Statement::assign(Exp::reg(1), Exp::int(v))
}

/// The worked example from the dominance-frontier literature: entry,
/// a loop header A with a conditional body and a join before the back
/// edge.
///
/// entry -> A; A -> B, C; B -> D; C -> D, E; D -> F; E -> F; F -> A.
struct Cytron {
    cfg: Cfg,
    entry: BbId,
    a: BbId,
    b: BbId,
    c: BbId,
    d: BbId,
    e: BbId,
    f: BbId,
}

fn cytron_graph() -> Cytron {
    let mut builder = CfgBuilder::new();
    let entry = builder.empty(BbKind::Fall);
    let a = builder.node(BbKind::TwoWay, vec![branch_stmt(Exp::reg(9))]);
    let b = builder.node(BbKind::Fall, vec![def_r1(1)]);
    let c = builder.node(BbKind::TwoWay, vec![branch_stmt(Exp::reg(9))]);
    let d = builder.empty(BbKind::Fall);
    let e = builder.node(BbKind::Fall, vec![def_r1(2)]);
    let f = builder.empty(BbKind::OneWay);
    builder.edge(entry, a);
    builder.edge(a, b).edge(a, c);
    builder.edge(b, d);
    builder.edge(c, d).edge(c, e);
    builder.edge(d, f);
    builder.edge(e, f);
    builder.edge(f, a);
    Cytron {
        cfg: builder.build(),
        entry,
        a,
        b,
        c,
        d,
        e,
        f,
    }
}

#[test]
fn cytron_dominators() {
    let g = cytron_graph();
    let df = DataFlow::build(&g.cfg);
    assert_eq!(df.idom(g.a), Some(g.entry));
    assert_eq!(df.idom(g.b), Some(g.a));
    assert_eq!(df.idom(g.c), Some(g.a));
    assert_eq!(df.idom(g.d), Some(g.a));
    assert_eq!(df.idom(g.e), Some(g.c));
    assert_eq!(df.idom(g.f), Some(g.a));
}

#[test]
fn cytron_dominance_frontiers() {
    let g = cytron_graph();
    let df = DataFlow::build(&g.cfg);
    let set = |ids: &[BbId]| ids.iter().copied().collect::<std::collections::BTreeSet<_>>();
    assert_eq!(*df.frontier(g.b), set(&[g.d]));
    assert_eq!(*df.frontier(g.c), set(&[g.d, g.f]));
    assert_eq!(*df.frontier(g.d), set(&[g.f]));
    assert_eq!(*df.frontier(g.e), set(&[g.f]));
    assert_eq!(*df.frontier(g.f), set(&[g.a]));
    assert_eq!(*df.frontier(g.a), set(&[g.a]));
}

// A variable defined in B and E gets phis at the iterated frontier:
// D, F and the loop header A.
#[test]
fn cytron_phi_placement() {
    let mut g = cytron_graph();
    let df = DataFlow::build(&g.cfg);
    df.place_phi_functions(&mut g.cfg, &RenamePolicy::new());

    let mut phi_blocks: Vec<BbId> = Vec::new();
    g.cfg.for_each_stmt(&mut |s| {
        if let StmtKind::Phi(p) = &s.kind {
            if p.lhs == Exp::reg(1) {
                phi_blocks.push(s.bb);
            }
        }
    });
    phi_blocks.sort();
    assert_eq!(phi_blocks, vec![g.a, g.d, g.f]);
}

// After renaming, every subscript refers to a statement that defines the
// location and dominates the use, or to an entry implicit.
#[test]
fn rename_subscripts_are_dominating_defs() {
    let mut g = cytron_graph();
    let df = DataFlow::build(&g.cfg);
    let policy = RenamePolicy::new();
    df.place_phi_functions(&mut g.cfg, &policy);
    df.rename(&mut g.cfg, &policy);

    let df2 = DataFlow::build(&g.cfg);
    let mut checked = 0;
    let mut all: Vec<(BbId, Exp, Option<StmtId>, bool)> = Vec::new();
    g.cfg.for_each_stmt(&mut |s| {
        let mut refs = Vec::new();
        s.collect_refs(&mut refs);
        for (base, def) in refs {
            all.push((s.bb, base, def, s.is_phi()));
        }
    });
    for (use_bb, base, def, is_phi) in all {
        let d = def.expect("all uses are subscripted after rename");
        let stmt = g.cfg.stmt(d).expect("subscript points at a statement");
        assert!(stmt.defines(&base), "{base} not defined by its subscript");
        // a phi argument's definition dominates the predecessor, not
        // necessarily the phi's own block
        if !is_phi && !stmt.is_implicit() {
            assert!(
                df2.dominates(stmt.bb, use_bb),
                "def of {base} does not dominate its use"
            );
        }
        checked += 1;
    }
    assert!(checked > 0);
}

#[test]
fn rename_diamond_builds_phi_operands() {
    let mut builder = CfgBuilder::new();
    let top = builder.node(BbKind::TwoWay, vec![branch_stmt(Exp::reg(9))]);
    let left = builder.node(BbKind::OneWay, vec![def_r1(1)]);
    let right = builder.node(BbKind::Fall, vec![def_r1(2)]);
    let join = builder.node(BbKind::Ret, vec![Statement::assign(Exp::reg(2), Exp::reg(1))]);
    builder.edge(top, left).edge(top, right);
    builder.edge(left, join);
    builder.edge(right, join);
    let mut cfg = builder.build();

    let df = DataFlow::build(&cfg);
    let policy = RenamePolicy::new();
    df.place_phi_functions(&mut cfg, &policy);
    df.rename(&mut cfg, &policy);

    let mut phi_args = Vec::new();
    let mut left_def = None;
    let mut right_def = None;
    cfg.for_each_stmt(&mut |s| {
        if let StmtKind::Phi(p) = &s.kind {
            phi_args = p.args.clone();
        }
        if s.bb == left && s.as_assign().is_some() {
            left_def = Some(s.id);
        }
        if s.bb == right && s.as_assign().is_some() {
            right_def = Some(s.id);
        }
    });
    assert_eq!(phi_args.len(), 2);
    for arg in &phi_args {
        if arg.pred == left {
            assert_eq!(arg.def, left_def);
        } else {
            assert_eq!(arg.pred, right);
            assert_eq!(arg.def, right_def);
        }
    }
}

// S2: x := 1; x := 2; y := x renames so y uses the second definition.
#[test]
fn straight_line_rename_uses_latest_def() {
    let mut builder = CfgBuilder::new();
    let b0 = builder.node(
        BbKind::Fall,
        vec![
            def_r1(1),
            def_r1(2),
            Statement::assign(Exp::reg(2), Exp::reg(1)),
        ],
    );
    let b1 = builder.empty(BbKind::Ret);
    builder.edge(b0, b1);
    let mut cfg = builder.build();

    let df = DataFlow::build(&cfg);
    let policy = RenamePolicy::new();
    df.place_phi_functions(&mut cfg, &policy);
    df.rename(&mut cfg, &policy);

    let second_def = cfg.stmt_ids()[1];
    let y = cfg.stmt_ids()[2];
    let rhs = cfg.stmt(y).unwrap().as_assign().unwrap().rhs.clone();
    assert_eq!(rhs, Exp::subscript(Exp::reg(1), Some(second_def)));
}

#[test]
fn unsubscript_all_restores_bare_form() {
    let mut builder = CfgBuilder::new();
    let b0 = builder.node(
        BbKind::Fall,
        vec![def_r1(1), Statement::assign(Exp::reg(2), Exp::reg(1))],
    );
    let b1 = builder.empty(BbKind::Ret);
    builder.edge(b0, b1);
    let mut cfg = builder.build();

    let df = DataFlow::build(&cfg);
    let policy = RenamePolicy::new();
    df.place_phi_functions(&mut cfg, &policy);
    df.rename(&mut cfg, &policy);
    crate::dataflow::unsubscript_all(&mut cfg);

    cfg.for_each_stmt(&mut |s| {
        let mut refs = Vec::new();
        s.collect_refs(&mut refs);
        assert!(refs.is_empty());
        assert!(!s.is_phi() && !s.is_implicit());
    });
}
