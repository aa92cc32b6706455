use reloom_ir::{Exp, Rtl, Statement, StmtKind};
use reloom_types::{Address, BbId};

use crate::cfg::{BbKind, Cfg};

fn linear_bb(cfg: &mut Cfg, addrs: &[u64], kind: BbKind) -> BbId {
    let rtls: Vec<Rtl> = addrs
        .iter()
        .map(|a| {
            Rtl::with_stmts(
                Address::new(*a),
                vec![Statement::assign(Exp::reg(1), Exp::int(*a as i64))],
            )
        })
        .collect();
    cfg.new_bb(rtls, kind, 0).unwrap()
}

#[test]
fn label_splits_mid_block() {
    let mut cfg = Cfg::new();
    let top = linear_bb(&mut cfg, &[0x1000, 0x1004, 0x1008], BbKind::Ret);
    cfg.set_entry_at(Address::new(0x1000));

    let mut cur = top;
    assert!(cfg.label(Address::new(0x1004), &mut cur));
    // cur tracked the bottom half of the split
    assert_ne!(cur, top);
    assert_eq!(cfg.bb(top).kind, BbKind::Fall);
    assert_eq!(cfg.bb(cur).kind, BbKind::Ret);
    assert_eq!(cfg.bb(top).out_edges, vec![cur]);
    assert_eq!(cfg.bb(cur).in_edges, vec![top]);
    assert_eq!(cfg.bb(cur).low_addr, Address::new(0x1004));
    assert!(cfg.is_well_formed());
}

#[test]
fn label_of_unknown_address_records_placeholder() {
    let mut cfg = Cfg::new();
    let mut cur = BbId::INVALID;
    assert!(!cfg.label(Address::new(0x2000), &mut cur));
    assert!(cfg.bb_starting_at(Address::new(0x2000)).is_some());
    // an incomplete block makes the graph ill-formed
    assert!(!cfg.is_well_formed());
}

#[test]
fn new_bb_completes_placeholder_and_rejects_duplicates() {
    let mut cfg = Cfg::new();
    let mut cur = BbId::INVALID;
    cfg.label(Address::new(0x1000), &mut cur);

    let id = linear_bb(&mut cfg, &[0x1000], BbKind::Ret);
    assert!(cfg.bb(id).is_complete());

    let rtls = vec![Rtl::new(Address::new(0x1000))];
    let err = cfg.new_bb(rtls, BbKind::Ret, 0).unwrap_err();
    assert_eq!(err.0, id);
}

#[test]
fn overlapping_block_truncates_to_fall() {
    let mut cfg = Cfg::new();
    let high = linear_bb(&mut cfg, &[0x1008, 0x100c], BbKind::Ret);
    // decode again from below, running into the existing block
    let low = linear_bb(&mut cfg, &[0x1000, 0x1004, 0x1008, 0x100c], BbKind::Ret);
    assert_eq!(cfg.bb(low).kind, BbKind::Fall);
    assert_eq!(cfg.bb(low).rtls.len(), 2);
    assert_eq!(cfg.bb(low).out_edges, vec![high]);
    assert!(cfg.is_well_formed());
}

// Invariant: for every edge (u, v), v lists u and u lists v.
#[test]
fn edges_stay_symmetric_through_construction() {
    let mut cfg = Cfg::new();
    let a = linear_bb(&mut cfg, &[0x1000], BbKind::TwoWay);
    cfg.set_entry_at(Address::new(0x1000));
    cfg.add_out_edge_addr(a, Address::new(0x2000));
    let b = linear_bb(&mut cfg, &[0x2000], BbKind::Ret);
    cfg.add_out_edge_addr(a, Address::new(0x1000));

    for id in cfg.bb_order() {
        for out in &cfg.bb(id).out_edges {
            assert!(cfg.bb(*out).in_edges.contains(&id));
        }
        for inp in &cfg.bb(id).in_edges {
            assert!(cfg.bb(*inp).out_edges.contains(&id));
        }
    }
    assert_eq!(cfg.bb(b).in_edges, vec![a]);
}

#[test]
fn compress_folds_jump_chains() {
    let mut cfg = Cfg::new();
    let a = linear_bb(&mut cfg, &[0x1000], BbKind::Fall);
    cfg.set_entry_at(Address::new(0x1000));
    let j = cfg
        .new_bb(
            vec![Rtl::with_stmts(
                Address::new(0x1004),
                vec![Statement::new(StmtKind::Goto(reloom_ir::GotoStatement {
                    dest: Exp::addr(Address::new(0x1008)),
                    is_computed: false,
                }))],
            )],
            BbKind::OneWay,
            1,
        )
        .unwrap();
    let b = linear_bb(&mut cfg, &[0x1008], BbKind::Ret);
    cfg.add_out_edge(a, j);
    cfg.add_out_edge(j, b);

    cfg.compress();
    assert_eq!(cfg.bb(a).out_edges, vec![b]);
    assert!(cfg.bb(j).removed);
    assert!(cfg.is_well_formed());
}

#[test]
fn junctions_mark_confluences_only() {
    let mut cfg = Cfg::new();
    let a = linear_bb(&mut cfg, &[0x1000], BbKind::Fall);
    cfg.set_entry_at(Address::new(0x1000));
    let b = linear_bb(&mut cfg, &[0x1004], BbKind::Fall);
    let c = linear_bb(&mut cfg, &[0x1008], BbKind::Ret);
    cfg.add_out_edge(a, c);
    cfg.add_out_edge(b, c);
    cfg.number_statements();

    cfg.add_junctions();
    assert!(cfg.bb(c).first_stmt().unwrap().is_junction());
    assert!(!cfg.bb(a).first_stmt().unwrap().is_junction());

    cfg.remove_junctions();
    assert!(!cfg.bb(c).first_stmt().unwrap().is_junction());
}

#[test]
fn statement_numbering_is_stable_and_dense() {
    let mut cfg = Cfg::new();
    let a = linear_bb(&mut cfg, &[0x1000, 0x1004], BbKind::Fall);
    cfg.set_entry_at(Address::new(0x1000));
    let b = linear_bb(&mut cfg, &[0x1008], BbKind::Ret);
    cfg.add_out_edge(a, b);
    cfg.number_statements();

    let ids = cfg.stmt_ids();
    assert_eq!(ids.len(), 3);
    for (i, id) in ids.iter().enumerate() {
        assert_eq!(id.index(), i);
        assert!(cfg.stmt(*id).is_some());
    }

    // renumbering does not move existing ids
    cfg.number_statements();
    assert_eq!(cfg.stmt_ids(), ids);
}
