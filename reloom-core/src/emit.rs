//! The code-emitter interface and the walk that drives it.
//!
//! The high-level language back end is an external collaborator: the core
//! hands it fully-typed expressions and named locals through
//! [`CodeEmitter`] callbacks and decides only the order. [`PseudoEmitter`]
//! renders a plain pseudo-C listing, used by tests and as the fallback
//! back end.

use std::collections::BTreeSet;

use reloom_ir::{Exp, StmtKind, Type};
use reloom_types::BbId;

use crate::cfg::BbKind;
use crate::proc::{ProcStatus, Signature, UserProc};
use crate::prog::{Global, Prog};

/// Callbacks the emitter implements.
pub trait CodeEmitter {
    /// A procedure is about to be emitted.
    fn proc_prototype(&mut self, sig: &Signature);
    /// A global definition.
    fn global(&mut self, global: &Global);
    /// Open a compound block.
    fn compound_start(&mut self);
    /// Close a compound block.
    fn compound_end(&mut self);
    /// A jump label.
    fn label(&mut self, name: &str);
    /// An assignment.
    fn assign(&mut self, ty: &Type, lhs: &Exp, rhs: &Exp);
    /// A conditional branch to `target`.
    fn branch(&mut self, cond: &Exp, target: &str);
    /// An unconditional jump to `target`.
    fn goto_stmt(&mut self, target: &str);
    /// A call with arguments and result locations.
    fn call(&mut self, dest: &Exp, args: &[Exp], results: &[Exp]);
    /// A return of zero or more values.
    fn ret(&mut self, values: &[Exp]);
}

fn label_name(proc: &UserProc, bb: BbId) -> String {
    format!("L{:x}", proc.cfg.bb(bb).low_addr.value())
}

/// Emit one procedure: prototype, body, labels where jumps land, explicit
/// gotos where fall-through order breaks.
pub fn generate_proc(proc: &UserProc, em: &mut dyn CodeEmitter) {
    em.proc_prototype(&proc.signature);
    em.compound_start();

    let order = proc.cfg.bb_order();

    // blocks that are the destination of an explicit jump need labels
    let mut labelled: BTreeSet<BbId> = BTreeSet::new();
    for id in &order {
        let bb = proc.cfg.bb(*id);
        match bb.kind {
            BbKind::OneWay | BbKind::Nway => labelled.extend(bb.out_edges.iter().copied()),
            BbKind::TwoWay => labelled.extend(bb.out_edges.first().copied()),
            _ => {}
        }
    }

    for (pos, id) in order.iter().enumerate() {
        let bb = proc.cfg.bb(*id);
        if labelled.contains(id) {
            em.label(&label_name(proc, *id));
        }

        for rtl in &bb.rtls {
            for stmt in &rtl.stmts {
                match &stmt.kind {
                    StmtKind::Assign(a) => em.assign(&a.ty, &a.lhs, &a.rhs),
                    StmtKind::Bool(b) => em.assign(&b.ty, &b.lhs, &b.cond),
                    StmtKind::Branch(br) => {
                        if let Some(taken) = bb.out_edges.first() {
                            em.branch(&br.cond, &label_name(proc, *taken));
                        }
                    }
                    StmtKind::Goto(_) => {
                        if let Some(dest) = bb.out_edges.first() {
                            em.goto_stmt(&label_name(proc, *dest));
                        }
                    }
                    StmtKind::Case(c) => {
                        // emitted as a computed goto; the emitter may
                        // render a switch from the descriptor
                        em.goto_stmt(&c.dest.to_string());
                    }
                    StmtKind::Call(c) => {
                        let args: Vec<Exp> = c.args.iter().map(|a| a.rhs.clone()).collect();
                        let results: Vec<Exp> =
                            c.defines.iter().map(|d| d.lhs.clone()).collect();
                        em.call(&c.dest, &args, &results);
                    }
                    StmtKind::Ret(r) => {
                        let values: Vec<Exp> =
                            r.returns.iter().map(|a| a.rhs.clone()).collect();
                        em.ret(&values);
                    }
                    StmtKind::Phi(_)
                    | StmtKind::Implicit(_)
                    | StmtKind::Junction
                    | StmtKind::ImpRef(_) => {}
                }
            }
        }

        // fall-through that does not reach the next emitted block becomes
        // an explicit goto
        if matches!(bb.kind, BbKind::Fall | BbKind::Call) {
            if let Some(succ) = bb.out_edges.first() {
                let next = order.get(pos + 1);
                if next != Some(succ) {
                    em.goto_stmt(&label_name(proc, *succ));
                }
            }
        }
    }

    em.compound_end();
}

/// Emit the whole program: globals first, then every analysed procedure.
pub fn generate_prog(prog: &mut Prog, em: &mut dyn CodeEmitter) {
    for g in prog.globals().to_vec() {
        em.global(&g);
    }
    let ids: Vec<_> = prog.proc_ids().collect();
    for id in ids {
        let ready = prog
            .user(id)
            .map(|u| u.status >= ProcStatus::Final)
            .unwrap_or(false);
        if ready {
            if let Some(user) = prog.user(id) {
                generate_proc(user, em);
            }
            if let Some(user) = prog.user_mut(id) {
                user.status = ProcStatus::CodeGenerated;
            }
        }
    }
}

/// A plain pseudo-C emitter writing into a string.
#[derive(Debug, Default)]
pub struct PseudoEmitter {
    out: String,
    indent: usize,
}

impl PseudoEmitter {
    /// Empty emitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// The emitted listing.
    pub fn finish(self) -> String {
        self.out
    }

    fn line(&mut self, s: &str) {
        for _ in 0..self.indent {
            self.out.push_str("    ");
        }
        self.out.push_str(s);
        self.out.push('\n');
    }
}

impl CodeEmitter for PseudoEmitter {
    fn proc_prototype(&mut self, sig: &Signature) {
        let params: Vec<String> = sig
            .params
            .iter()
            .map(|p| format!("{} {}", p.ty, p.name))
            .collect();
        let ret = sig
            .returns
            .first()
            .map(|r| r.ty.to_string())
            .unwrap_or_else(|| "void".into());
        self.line(&format!("{ret} {}({})", sig.name, params.join(", ")));
    }

    fn global(&mut self, global: &Global) {
        self.line(&format!("{} {}; // {}", global.ty, global.name, global.addr));
    }

    fn compound_start(&mut self) {
        self.line("{");
        self.indent += 1;
    }

    fn compound_end(&mut self) {
        self.indent = self.indent.saturating_sub(1);
        self.line("}");
    }

    fn label(&mut self, name: &str) {
        self.out.push_str(name);
        self.out.push_str(":\n");
    }

    fn assign(&mut self, _ty: &Type, lhs: &Exp, rhs: &Exp) {
        self.line(&format!("{lhs} = {rhs};"));
    }

    fn branch(&mut self, cond: &Exp, target: &str) {
        self.line(&format!("if ({cond}) goto {target};"));
    }

    fn goto_stmt(&mut self, target: &str) {
        self.line(&format!("goto {target};"));
    }

    fn call(&mut self, dest: &Exp, args: &[Exp], results: &[Exp]) {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        match results.first() {
            Some(r) => self.line(&format!("{r} = {dest}({});", args.join(", "))),
            None => self.line(&format!("{dest}({});", args.join(", "))),
        }
    }

    fn ret(&mut self, values: &[Exp]) {
        match values.first() {
            Some(v) => self.line(&format!("return {v};")),
            None => self.line("return;"),
        }
    }
}
