//! The data model must survive a serialisation round trip: that is the
//! whole contract of snapshotting a program between phases.

#![cfg(feature = "serde")]

use reloom_ir::{
    Assign, BinaryOp, BranchKind, BranchStatement, Exp, PhiArg, PhiAssign, Rtl, Statement,
    StmtKind, Type,
};
use reloom_types::{Address, BbId, StmtId};

fn roundtrip<T>(value: &T) -> T
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let json = serde_json::to_string(value).expect("serialise");
    serde_json::from_str(&json).expect("deserialise")
}

#[test]
fn expression_trees_roundtrip() {
    let e = Exp::binary(
        BinaryOp::Plus,
        Exp::subscript(Exp::reg(24), Some(StmtId::new(3))),
        Exp::mem(Exp::binary(BinaryOp::Plus, Exp::reg(28), Exp::int(-8))),
    );
    assert_eq!(roundtrip(&e), e);
}

#[test]
fn float_constants_keep_their_bits() {
    let e = Exp::flt(0.1f64 + 0.2f64);
    assert_eq!(roundtrip(&e), e);
}

#[test]
fn types_roundtrip() {
    let t = Type::Compound(vec![
        reloom_ir::Field {
            offset: 0,
            ty: Type::int(32),
            name: "x".into(),
        },
        reloom_ir::Field {
            offset: 32,
            ty: Type::ptr(Type::Char),
            name: "s".into(),
        },
    ]);
    assert_eq!(roundtrip(&t), t);
}

#[test]
fn rtls_and_statements_roundtrip() {
    let mut rtl = Rtl::new(Address::new(0x1000));
    rtl.append(Statement::new(StmtKind::Assign(Assign::typed(
        Type::int(32),
        Exp::reg(24),
        Exp::int(5),
    ))));
    rtl.append(Statement::new(StmtKind::Phi(PhiAssign {
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
    })));
    rtl.append(Statement::new(StmtKind::Branch(BranchStatement {
        kind: BranchKind::SLe,
        is_float: false,
        cond: Exp::binary(BinaryOp::Le, Exp::reg(24), Exp::int(0)),
        dest: Address::new(0x2000),
    })));
    assert_eq!(roundtrip(&rtl), rtl);
}
