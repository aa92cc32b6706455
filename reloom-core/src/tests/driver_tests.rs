use reloom_ir::Exp;
use reloom_types::Address;

use crate::driver::Decompiler;
use crate::emit::PseudoEmitter;
use crate::proc::ProcStatus;
use crate::session::Session;
use crate::util::test_helpers::{test_prog, TableDecoder};

// S6: a calls b calls a. The driver unifies both into one cycle group,
// drives it to a fixed point and finishes both procedures.
#[test]
fn mutual_recursion_converges() {
    super::trace_init();
    let mut table = TableDecoder::new();
    table.call(0x1000, 0x2000).ret(0x1004);
    table.call(0x2000, 0x1000).ret(0x2004);

    let mut prog = test_prog(0x1000);
    let session = Session::default();
    let driver = Decompiler::new(&session, &table);
    driver.decompile(&mut prog).unwrap();

    let a = prog.proc_at(Address::new(0x1000)).unwrap();
    let b = prog.proc_at(Address::new(0x2000)).unwrap();

    let ua = prog.user(a).unwrap();
    let ub = prog.user(b).unwrap();
    assert_eq!(ua.status, ProcStatus::Final);
    assert_eq!(ub.status, ProcStatus::Final);
    assert!(ua.cycle_grp.contains(&a) && ua.cycle_grp.contains(&b));
    assert!(ub.cycle_grp.contains(&a) && ub.cycle_grp.contains(&b));
    assert_eq!(ua.callees, vec![b]);
    assert!(ub.callers.contains(&a));
}

#[test]
fn straight_line_program_decompiles() {
    let mut table = TableDecoder::new();
    table
        .assign(0x1000, Exp::reg(1), Exp::int(1))
        .assign(0x1004, Exp::reg(2), Exp::int(2))
        .assign(
            0x1008,
            Exp::reg(1),
            Exp::binary(reloom_ir::BinaryOp::Plus, Exp::reg(1), Exp::reg(2)),
        )
        .ret(0x100c);

    let mut prog = test_prog(0x1000);
    let session = Session::default();
    let driver = Decompiler::new(&session, &table);
    driver.decompile(&mut prog).unwrap();

    let main = prog.proc_at(Address::new(0x1000)).unwrap();
    assert_eq!(prog.user(main).unwrap().status, ProcStatus::Final);
}

// Invariant: after decompilation no subscripted reference and no phi
// remains anywhere.
#[test]
fn final_form_is_free_of_ssa_artifacts() {
    let mut table = TableDecoder::new();
    table
        .assign(0x1000, Exp::reg(1), Exp::int(0))
        .branch(0x1004, Exp::binary(reloom_ir::BinaryOp::Ne, Exp::reg(9), Exp::int(0)), 0x1010)
        .assign(0x1008, Exp::reg(1), Exp::int(5))
        .jump(0x100c, 0x1010)
        .assign(0x1010, Exp::reg(2), Exp::reg(1))
        .ret(0x1014);

    let mut prog = test_prog(0x1000);
    let session = Session::default();
    let driver = Decompiler::new(&session, &table);
    driver.decompile(&mut prog).unwrap();

    let main = prog.proc_at(Address::new(0x1000)).unwrap();
    let u = prog.user(main).unwrap();
    u.cfg.for_each_stmt(&mut |s| {
        assert!(!s.is_phi(), "phi survived de-SSA: {s}");
        let mut refs = Vec::new();
        s.collect_refs(&mut refs);
        assert!(refs.is_empty(), "subscript survived de-SSA: {s}");
    });
}

// An unused return is removed from the callee's signature; a used one
// stays. Termination is the worklist argument of the removal pass.
#[test]
fn unused_returns_are_removed() {
    super::trace_init();
    let mut table = TableDecoder::new();
    // f: r24 := 5; return
    table.assign(0x2000, Exp::reg(24), Exp::int(5)).ret(0x2004);
    // main: call f; return (r24 never mentioned)
    table.call(0x1000, 0x2000).ret(0x1004);

    let mut prog = test_prog(0x1000);
    let session = Session::default();
    let driver = Decompiler::new(&session, &table);
    driver.decompile(&mut prog).unwrap();

    let f = prog.proc_at(Address::new(0x2000)).unwrap();
    let sig = prog.proc(f).signature();
    assert!(
        !sig.returns.iter().any(|r| r.exp == Exp::reg(24)),
        "unused return survived: {:?}",
        sig.returns
    );
}

#[test]
fn used_returns_survive() {
    let mut table = TableDecoder::new();
    // f: r24 := 5; return
    table.assign(0x2000, Exp::reg(24), Exp::int(5)).ret(0x2004);
    // main: call f; m[r28] := r24; return
    table.call(0x1000, 0x2000);
    table.assign(0x1004, Exp::mem(Exp::reg(28)), Exp::reg(24));
    table.ret(0x1008);

    let mut prog = test_prog(0x1000);
    let session = Session::default();
    let driver = Decompiler::new(&session, &table);
    driver.decompile(&mut prog).unwrap();

    let f = prog.proc_at(Address::new(0x2000)).unwrap();
    let sig = prog.proc(f).signature();
    assert!(
        sig.returns.iter().any(|r| r.exp == Exp::reg(24)),
        "used return was removed: {:?}",
        sig.returns
    );
}

// Calls into library procedures narrow against the fixed signature at the
// first middle pass: defines shrink to the declared returns, arguments come
// from the declared parameters, and a forced void signature strips every
// define.
#[test]
fn library_signatures_narrow_call_metadata() {
    use crate::proc::Signature;

    let mut table = TableDecoder::new();
    // main: r24 := write(...); m[r30] := r24; halt(); return
    table.call(0x1000, 0x2000);
    table.assign(0x1004, Exp::mem(Exp::reg(30)), Exp::reg(24));
    table.call(0x1008, 0x3000);
    table.ret(0x100c);

    let mut prog = test_prog(0x1000);
    let mut write_sig = Signature::new("write");
    write_sig.ensure_param(Exp::reg(8), reloom_ir::Type::int(32));
    write_sig.ensure_return(Exp::reg(24), reloom_ir::Type::int(32));
    write_sig.forced = true;
    let write_id = prog.add_lib_proc("write", Address::new(0x2000), write_sig);

    let mut halt_sig = Signature::new("halt");
    halt_sig.forced = true;
    let halt_id = prog.add_lib_proc("halt", Address::new(0x3000), halt_sig);

    let session = Session::default();
    let driver = Decompiler::new(&session, &table);
    driver.decompile(&mut prog).unwrap();

    assert!(prog.proc(write_id).is_lib());
    assert!(prog.proc(halt_id).is_lib());

    let main = prog.proc_at(Address::new(0x1000)).unwrap();
    let u = prog.user(main).unwrap();
    assert_eq!(u.callees, vec![write_id, halt_id]);

    let mut write_call = None;
    let mut halt_call = None;
    u.cfg.for_each_stmt(&mut |s| {
        if let Some(c) = s.as_call() {
            if c.callee == Some(write_id) {
                write_call = Some(c.clone());
            } else if c.callee == Some(halt_id) {
                halt_call = Some(c.clone());
            }
        }
    });

    // the conservative define set (every register main mentions) shrank
    // to the one declared return
    let write_call = write_call.expect("call to write resolved");
    assert_eq!(write_call.defines.len(), 1);
    assert_eq!(write_call.args.len(), 1);
    assert_eq!(write_call.args[0].lhs, Exp::reg(8));

    // a forced void signature leaves nothing defined
    let halt_call = halt_call.expect("call to halt resolved");
    assert!(halt_call.defines.is_empty());
    assert!(halt_call.args.is_empty());
}

#[test]
fn parameters_are_discovered_from_entry_uses() {
    let mut table = TableDecoder::new();
    // f uses r8's entry value
    table.assign(0x1000, Exp::reg(1), Exp::reg(8)).ret(0x1004);

    let mut prog = test_prog(0x1000);
    let session = Session::default();
    let driver = Decompiler::new(&session, &table);
    driver.decompile(&mut prog).unwrap();

    let f = prog.proc_at(Address::new(0x1000)).unwrap();
    let sig = prog.proc(f).signature();
    assert!(sig.params.iter().any(|p| p.exp == Exp::reg(8)));
    // the stack pointer is plumbing, never a parameter
    assert!(!sig.params.iter().any(|p| p.exp == Exp::reg(28)));
}

#[test]
fn code_generation_emits_every_final_proc() {
    let mut table = TableDecoder::new();
    table.call(0x1000, 0x2000).ret(0x1004);
    table.assign(0x2000, Exp::reg(1), Exp::int(1)).ret(0x2004);

    let mut prog = test_prog(0x1000);
    let session = Session::default();
    let driver = Decompiler::new(&session, &table);
    driver.decompile(&mut prog).unwrap();

    let mut em = PseudoEmitter::new();
    driver.generate_code(&mut prog, &mut em);
    let listing = em.finish();
    assert!(listing.contains("proc_0x1000"));
    assert!(listing.contains("proc_0x2000"));

    let main = prog.proc_at(Address::new(0x1000)).unwrap();
    assert_eq!(prog.user(main).unwrap().status, ProcStatus::CodeGenerated);
}

#[test]
fn data_section_accesses_become_globals() {
    use crate::image::{Endian, Section};

    let mut table = TableDecoder::new();
    table
        .assign(
            0x1000,
            Exp::mem(Exp::addr(Address::new(0x8000))),
            Exp::int(7),
        )
        .ret(0x1004);

    // test_prog maps only code; this image adds a data section covering
    // the accessed address
    let mut image = crate::image::MemoryImage::new(
        crate::image::Machine::Sparc,
        crate::image::Platform::Elf,
    );
    image.add_section(
        Section {
            name: ".text".into(),
            addr: Address::new(0x1000),
            size: 0x1000,
            is_code: true,
            is_data: false,
            is_read_only: true,
            is_bss: false,
            endian: Endian::Big,
        },
        vec![0; 0x1000],
    );
    image.add_section(
        Section {
            name: ".data".into(),
            addr: Address::new(0x8000),
            size: 0x100,
            is_code: false,
            is_data: true,
            is_read_only: false,
            is_bss: false,
            endian: Endian::Big,
        },
        vec![0; 0x100],
    );
    image.set_entry(Address::new(0x1000));
    let mut prog = crate::prog::Prog::new("test", Box::new(image));
    let session = Session::default();
    let driver = Decompiler::new(&session, &table);
    driver.decompile(&mut prog).unwrap();

    assert_eq!(prog.globals().len(), 1);
    let g = &prog.globals()[0];
    assert_eq!(g.addr, Address::new(0x8000));

    // the store now goes through the named global
    let main = prog.proc_at(Address::new(0x1000)).unwrap();
    let mut stores_global = false;
    prog.user(main).unwrap().cfg.for_each_stmt(&mut |s| {
        if let Some(a) = s.as_assign() {
            if a.lhs == Exp::global(g.name.clone()) {
                stores_global = true;
            }
        }
    });
    assert!(stores_global);
}

#[test]
fn decode_failure_marks_block_invalid_but_program_continues() {
    let mut table = TableDecoder::new();
    // main calls f and returns; f's body is undecodable
    table.call(0x1000, 0x2000).ret(0x1004);

    let mut prog = test_prog(0x1000);
    let session = Session::default();
    let driver = Decompiler::new(&session, &table);
    driver.decompile(&mut prog).unwrap();

    let main = prog.proc_at(Address::new(0x1000)).unwrap();
    let f = prog.proc_at(Address::new(0x2000)).unwrap();
    assert_eq!(prog.user(main).unwrap().status, ProcStatus::Final);
    // f's body became a single invalid block; the failure stayed local
    let uf = prog.user(f).unwrap();
    let invalid = uf
        .cfg
        .bb_ids()
        .any(|id| uf.cfg.bb(id).kind == crate::cfg::BbKind::Invalid);
    assert!(invalid);
}
