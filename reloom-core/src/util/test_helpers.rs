//! Builders for tests and embedders: hand-built CFGs, a table-driven stub
//! decoder and a ready-made image around it.

use std::collections::BTreeMap;

use reloom_ir::{
    Assign, BranchKind, BranchStatement, CallStatement, Exp, GotoStatement, ReturnStatement,
    Rtl, Statement, StmtKind,
};
use reloom_types::{Address, BbId};

use crate::cfg::{BbKind, Cfg};
use crate::decode::{DecodedInstruction, InstructionDecoder};
use crate::error::{DecompileError, Result};
use crate::image::{Endian, Image, Machine, MemoryImage, Platform, Section};
use crate::prog::Prog;

/// Builds a CFG node by node for dominator and structuring tests.
#[derive(Debug, Default)]
pub struct CfgBuilder {
    cfg: Cfg,
    next_addr: u64,
    entry: Option<BbId>,
}

impl CfgBuilder {
    /// Empty builder; nodes get consecutive fake addresses.
    pub fn new() -> Self {
        Self {
            cfg: Cfg::new(),
            next_addr: 0x1000,
            entry: None,
        }
    }

    /// Add a block holding `stmts` at the next fake address. The first
    /// block becomes the entry.
    pub fn node(&mut self, kind: BbKind, stmts: Vec<Statement>) -> BbId {
        let addr = Address::new(self.next_addr);
        self.next_addr += 0x10;
        let rtls = vec![Rtl::with_stmts(addr, stmts)];
        let id = self
            .cfg
            .new_bb(rtls, kind, 0)
            .unwrap_or_else(|e| e.0);
        if self.entry.is_none() {
            self.entry = Some(id);
            self.cfg.set_entry_at(addr);
        }
        id
    }

    /// Empty block.
    pub fn empty(&mut self, kind: BbKind) -> BbId {
        self.node(kind, Vec::new())
    }

    /// Edge from `a` to `b`; order of calls fixes out-edge order.
    pub fn edge(&mut self, a: BbId, b: BbId) -> &mut Self {
        self.cfg.add_out_edge(a, b);
        self
    }

    /// Finish, numbering all statements.
    pub fn build(mut self) -> Cfg {
        self.cfg.number_statements();
        self.cfg
    }
}

/// A table-driven decoder: fixed-width instructions looked up by address.
#[derive(Debug, Default)]
pub struct TableDecoder {
    instrs: BTreeMap<Address, Vec<Statement>>,
}

/// Instruction width of the stub decoder.
pub const INSN_BYTES: u8 = 4;

impl TableDecoder {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw entry: the statements decoded at `addr`.
    pub fn put(&mut self, addr: u64, stmts: Vec<Statement>) -> &mut Self {
        self.instrs.insert(Address::new(addr), stmts);
        self
    }

    /// `lhs := rhs` instruction.
    pub fn assign(&mut self, addr: u64, lhs: Exp, rhs: Exp) -> &mut Self {
        self.put(addr, vec![Statement::assign(lhs, rhs)])
    }

    /// Unconditional jump.
    pub fn jump(&mut self, addr: u64, dest: u64) -> &mut Self {
        self.put(
            addr,
            vec![Statement::new(StmtKind::Goto(GotoStatement {
                dest: Exp::addr(Address::new(dest)),
                is_computed: false,
            }))],
        )
    }

    /// Conditional branch on `cond`.
    pub fn branch(&mut self, addr: u64, cond: Exp, dest: u64) -> &mut Self {
        self.put(
            addr,
            vec![Statement::new(StmtKind::Branch(BranchStatement {
                kind: BranchKind::Ne,
                is_float: false,
                cond,
                dest: Address::new(dest),
            }))],
        )
    }

    /// Direct call.
    pub fn call(&mut self, addr: u64, dest: u64) -> &mut Self {
        self.put(
            addr,
            vec![Statement::new(StmtKind::Call(CallStatement::direct(
                Address::new(dest),
            )))],
        )
    }

    /// Return.
    pub fn ret(&mut self, addr: u64) -> &mut Self {
        self.put(
            addr,
            vec![Statement::new(StmtKind::Ret(ReturnStatement::default()))],
        )
    }

    /// Return `values`, as `loc := value` pairs.
    pub fn ret_values(&mut self, addr: u64, values: Vec<(Exp, Exp)>) -> &mut Self {
        let returns: Vec<Assign> = values
            .into_iter()
            .map(|(l, r)| Assign::new(l, r))
            .collect();
        self.put(
            addr,
            vec![Statement::new(StmtKind::Ret(ReturnStatement {
                modifieds: returns.clone(),
                returns,
                col: Default::default(),
            }))],
        )
    }
}

impl InstructionDecoder for TableDecoder {
    fn decode_instruction(&self, _image: &dyn Image, pc: Address) -> Result<DecodedInstruction> {
        let stmts = self
            .instrs
            .get(&pc)
            .cloned()
            .ok_or(DecompileError::Decode { pc })?;
        Ok(DecodedInstruction {
            rtl: Rtl::with_stmts(pc, stmts),
            num_bytes: INSN_BYTES,
        })
    }
}

/// A program over an image whose single code section spans the stub
/// decoder's address range.
pub fn test_prog(entry: u64) -> Prog {
    let mut image = MemoryImage::new(Machine::Sparc, Platform::Elf);
    image.add_section(
        Section {
            name: ".text".into(),
            addr: Address::new(0x1000),
            size: 0x10000,
            is_code: true,
            is_data: false,
            is_read_only: true,
            is_bss: false,
            endian: Endian::Big,
        },
        vec![0; 0x10000],
    );
    image.set_entry(Address::new(entry));
    Prog::new("test", Box::new(image))
}
