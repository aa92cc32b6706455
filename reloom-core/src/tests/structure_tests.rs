use reloom_ir::{BranchKind, BranchStatement, Exp, Statement, StmtKind};
use reloom_types::Address;

use crate::cfg::{BbKind, CondType, LoopType, StructType};
use crate::util::test_helpers::CfgBuilder;

fn branch_stmt() -> Statement {
    Statement::new(StmtKind::Branch(BranchStatement {
        kind: BranchKind::Ne,
        is_float: false,
        cond: Exp::reg(9),
        dest: Address::new(0),
    }))
}

// S5: `h: if cond goto h; else goto f` is a post-tested loop with latch h
// and follow f.
#[test]
fn self_loop_is_post_tested() {
    let mut builder = CfgBuilder::new();
    let h = builder.node(BbKind::TwoWay, vec![branch_stmt()]);
    let f = builder.empty(BbKind::Ret);
    builder.edge(h, h); // taken: back to the test
    builder.edge(h, f); // fall-through: out
    let mut cfg = builder.build();

    cfg.structure();
    assert!(cfg.is_structured());
    let header = cfg.bb(h);
    assert_eq!(header.loop_type, Some(LoopType::PostTested));
    assert_eq!(header.latch, Some(h));
    assert_eq!(header.loop_follow, Some(f));
}

#[test]
fn diamond_is_if_then_else_with_join_follow() {
    let mut builder = CfgBuilder::new();
    let top = builder.node(BbKind::TwoWay, vec![branch_stmt()]);
    let left = builder.empty(BbKind::OneWay);
    let right = builder.empty(BbKind::Fall);
    let join = builder.empty(BbKind::Ret);
    builder.edge(top, left).edge(top, right);
    builder.edge(left, join);
    builder.edge(right, join);
    let mut cfg = builder.build();

    cfg.structure();
    let head = cfg.bb(top);
    assert_eq!(head.struct_type, StructType::Cond);
    assert_eq!(head.cond_type, Some(CondType::IfThenElse));
    assert_eq!(head.cond_follow, Some(join));
}

#[test]
fn pre_tested_loop_classifies_and_finds_follow() {
    let mut builder = CfgBuilder::new();
    let entry = builder.empty(BbKind::Fall);
    let h = builder.node(BbKind::TwoWay, vec![branch_stmt()]);
    let body = builder.empty(BbKind::OneWay);
    let exit = builder.empty(BbKind::Ret);
    builder.edge(entry, h);
    builder.edge(h, body); // taken: loop body
    builder.edge(h, exit); // fall-through: leave
    builder.edge(body, h);
    let mut cfg = builder.build();

    cfg.structure();
    let header = cfg.bb(h);
    assert_eq!(header.loop_type, Some(LoopType::PreTested));
    assert_eq!(header.latch, Some(body));
    assert_eq!(header.loop_follow, Some(exit));
    assert_eq!(cfg.bb(body).loop_head, Some(h));
}

#[test]
fn post_tested_loop_with_body() {
    let mut builder = CfgBuilder::new();
    let entry = builder.empty(BbKind::Fall);
    let body = builder.empty(BbKind::Fall);
    let latch = builder.node(BbKind::TwoWay, vec![branch_stmt()]);
    let exit = builder.empty(BbKind::Ret);
    builder.edge(entry, body);
    builder.edge(body, latch);
    builder.edge(latch, body); // taken: repeat
    builder.edge(latch, exit); // fall-through: leave
    let mut cfg = builder.build();

    cfg.structure();
    let header = cfg.bb(body);
    assert_eq!(header.loop_type, Some(LoopType::PostTested));
    assert_eq!(header.latch, Some(latch));
    assert_eq!(header.loop_follow, Some(exit));
}

#[test]
fn structuring_skips_without_return_node() {
    // a single endless block reaching no return
    let mut builder = CfgBuilder::new();
    let a = builder.empty(BbKind::OneWay);
    builder.edge(a, a);
    let mut cfg = builder.build();
    cfg.structure();
    assert!(!cfg.is_structured());
}

#[test]
fn irreducible_graph_is_left_unstructured() {
    // two-entry cycle: top branches into both halves of the cycle
    let mut builder = CfgBuilder::new();
    let top = builder.node(BbKind::TwoWay, vec![branch_stmt()]);
    let x = builder.empty(BbKind::OneWay);
    let y = builder.node(BbKind::TwoWay, vec![branch_stmt()]);
    let exit = builder.empty(BbKind::Ret);
    builder.edge(top, x).edge(top, y);
    builder.edge(x, y);
    builder.edge(y, x).edge(y, exit);
    let mut cfg = builder.build();

    cfg.structure();
    assert!(!cfg.is_structured());
}
