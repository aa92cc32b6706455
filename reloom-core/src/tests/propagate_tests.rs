use reloom_ir::{BinaryOp, Exp, Statement, StmtKind};

use crate::cfg::BbKind;
use crate::dataflow::{DataFlow, RenamePolicy};
use crate::propagate::{count_uses, propagate_statements, remove_dead_code};
use crate::session::Session;
use crate::util::test_helpers::CfgBuilder;

fn ssa_block(stmts: Vec<Statement>) -> crate::cfg::Cfg {
    let mut builder = CfgBuilder::new();
    let b0 = builder.node(BbKind::Fall, stmts);
    let b1 = builder.empty(BbKind::Ret);
    builder.edge(b0, b1);
    let mut cfg = builder.build();
    let df = DataFlow::build(&cfg);
    let policy = RenamePolicy::new();
    df.place_phi_functions(&mut cfg, &policy);
    df.rename(&mut cfg, &policy);
    cfg
}

// S2: after x := 1; x := 2; y := x, propagation folds y to the constant.
#[test]
fn constants_propagate_into_uses() {
    let mut cfg = ssa_block(vec![
        Statement::assign(Exp::reg(1), Exp::int(1)),
        Statement::assign(Exp::reg(1), Exp::int(2)),
        Statement::assign(Exp::reg(2), Exp::reg(1)),
    ]);
    let session = Session::default();
    let result = propagate_statements(&mut cfg, &session, &Default::default());
    assert!(result.changed);

    let y = cfg.stmt_ids()[2];
    let rhs = cfg.stmt(y).unwrap().as_assign().unwrap().rhs.clone();
    assert_eq!(rhs, Exp::int(2));

    // propagating again changes nothing
    let again = propagate_statements(&mut cfg, &session, &Default::default());
    assert!(!again.changed);
}

#[test]
fn single_use_expressions_propagate_and_fold() {
    let mut cfg = ssa_block(vec![
        Statement::assign(Exp::reg(1), Exp::binary(BinaryOp::Plus, Exp::reg(8), Exp::reg(9))),
        Statement::assign(
            Exp::reg(2),
            Exp::binary(
                BinaryOp::Minus,
                Exp::reg(1),
                Exp::binary(BinaryOp::Plus, Exp::reg(8), Exp::reg(9)),
            ),
        ),
    ]);
    let session = Session::default();
    propagate_statements(&mut cfg, &session, &Default::default());

    // r2 := (r8 + r9) - (r8 + r9) collapses to zero
    let y = cfg.stmt_ids()[1];
    let rhs = cfg.stmt(y).unwrap().as_assign().unwrap().rhs.clone();
    assert_eq!(rhs, Exp::int(0));
}

#[test]
fn depth_cap_stops_deep_rhs() {
    let deep = Exp::binary(
        BinaryOp::Mult,
        Exp::binary(
            BinaryOp::Plus,
            Exp::binary(BinaryOp::Plus, Exp::reg(8), Exp::reg(9)),
            Exp::binary(BinaryOp::Mult, Exp::reg(10), Exp::reg(11)),
        ),
        Exp::binary(BinaryOp::Plus, Exp::reg(12), Exp::reg(13)),
    );
    let mut cfg = ssa_block(vec![
        Statement::assign(Exp::reg(1), deep),
        Statement::assign(Exp::reg(2), Exp::reg(1)),
    ]);
    let mut session = Session::default();
    session.prop_max_depth = 2;
    propagate_statements(&mut cfg, &session, &Default::default());

    let uses = count_uses(&cfg);
    let def = cfg.stmt_ids()[0];
    // single use, but the right-hand side nests too deep to inline
    assert_eq!(uses.get(&def).copied().unwrap_or(0), 1);
}

#[test]
fn blacklisted_definitions_stay_put() {
    let mut cfg = ssa_block(vec![
        Statement::assign(Exp::reg(1), Exp::int(7)),
        Statement::assign(Exp::reg(2), Exp::reg(1)),
    ]);
    let session = Session::default();
    let blacklist = [Exp::reg(1)].into_iter().collect();
    propagate_statements(&mut cfg, &session, &blacklist);

    let y = cfg.stmt_ids()[1];
    let rhs = cfg.stmt(y).unwrap().as_assign().unwrap().rhs.clone();
    assert!(rhs.is_ref(), "blacklisted def was propagated: {rhs}");
}

#[test]
fn dead_definitions_disappear_but_stores_stay() {
    let mut cfg = ssa_block(vec![
        Statement::assign(Exp::reg(1), Exp::int(1)),
        Statement::assign(Exp::reg(2), Exp::int(2)),
        Statement::assign(Exp::mem(Exp::reg(28)), Exp::reg(2)),
    ]);
    let session = Session::default();
    propagate_statements(&mut cfg, &session, &Default::default());
    remove_dead_code(&mut cfg);

    let mut kinds = Vec::new();
    cfg.for_each_stmt(&mut |s| {
        if matches!(s.kind, StmtKind::Assign(_)) {
            kinds.push(s.as_assign().unwrap().lhs.clone());
        }
    });
    // r1 was never used and died; the store through r28 survives
    assert!(!kinds.contains(&Exp::reg(1)));
    assert!(kinds
        .iter()
        .any(|l| matches!(l.unsubscripted(), Exp::MemOf(_))));
}
