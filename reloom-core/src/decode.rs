//! Instruction decoding into the CFG.
//!
//! The target-specific decoder is an external collaborator implementing
//! [`InstructionDecoder`]; the recursive-descent drive loop that feeds its
//! RTLs into a [`Cfg`] lives here and is the same for every target.

use reloom_ir::{Rtl, StmtKind};
use reloom_types::Address;
use tracing::{debug, warn};

use crate::cfg::{BbKind, Cfg};
use crate::error::Result;
use crate::image::Image;
use crate::session::{DebugFlags, Session};

/// One decoded machine instruction.
#[derive(Debug, Clone)]
pub struct DecodedInstruction {
    /// Semantics of the instruction.
    pub rtl: Rtl,
    /// Size of the encoding in bytes.
    pub num_bytes: u8,
}

/// Target-specific instruction decoder.
pub trait InstructionDecoder {
    /// Decode the instruction at `pc`.
    fn decode_instruction(&self, image: &dyn Image, pc: Address) -> Result<DecodedInstruction>;

    /// Target-specific rewrite of a freshly decoded call site, applied
    /// before any analysis: argument-convention fixups live here.
    fn extra_process_call(&self, call: &mut reloom_ir::CallStatement, decoded: &[Rtl]) {
        let _ = (call, decoded);
    }
}

/// What the decode of one procedure discovered.
#[derive(Debug, Default)]
pub struct DecodeOutcome {
    /// Fixed destinations of call statements, for the driver to schedule.
    pub call_targets: Vec<Address>,
    /// Whether any instruction failed to decode.
    pub had_failures: bool,
}

/// Recursively decode the procedure starting at `entry` into `cfg`.
///
/// Follows both edges of branches, falls through calls, and stops a path at
/// returns, computed jumps, already-decoded blocks and decode failures.
pub fn decode_proc(
    cfg: &mut Cfg,
    image: &dyn Image,
    decoder: &dyn InstructionDecoder,
    entry: Address,
    session: &Session,
) -> Result<DecodeOutcome> {
    let mut outcome = DecodeOutcome::default();
    let mut targets = vec![entry];

    while let Some(start) = targets.pop() {
        if cfg.is_complete_at(start) {
            continue; // already decoded, or mid-block (label split it)
        }
        decode_run(
            cfg,
            image,
            decoder,
            start,
            session,
            &mut targets,
            &mut outcome,
        )?;
    }

    cfg.set_entry_at(entry);
    Ok(outcome)
}

/// Decode one straight-line run starting at `start`.
fn decode_run(
    cfg: &mut Cfg,
    image: &dyn Image,
    decoder: &dyn InstructionDecoder,
    start: Address,
    session: &Session,
    targets: &mut Vec<Address>,
    outcome: &mut DecodeOutcome,
) -> Result<()> {
    let mut rtls: Vec<Rtl> = Vec::new();
    let mut pc = start;

    loop {
        let decoded = match decoder.decode_instruction(image, pc) {
            Ok(d) => d,
            Err(err) => {
                warn!(%pc, %err, "marking block invalid");
                outcome.had_failures = true;
                rtls.push(Rtl::new(pc));
                let _ = cfg.new_bb(rtls, BbKind::Invalid, 0);
                return Ok(());
            }
        };

        let next_pc = pc + decoded.num_bytes as u64;
        let mut rtl = decoded.rtl;
        rtl.addr = pc;

        // Calls get their target-specific fixup before anything else sees
        // them, and their fixed destinations are collected for the driver.
        let mut is_call = false;
        let mut is_computed_call = false;
        if let Some(last) = rtl.last_mut() {
            if let StmtKind::Call(call) = &mut last.kind {
                decoder.extra_process_call(call, &rtls);
                is_call = true;
                is_computed_call = call.is_computed;
                if let Some(dest) = call.fixed_dest() {
                    outcome.call_targets.push(dest);
                }
            }
        }

        let terminator = rtl.last().map(|s| s.kind.clone());
        rtls.push(rtl);

        match terminator {
            Some(StmtKind::Goto(g)) if !g.is_computed => {
                let dest = g.dest.addr_value().unwrap_or(Address::INVALID);
                if let Ok(bb) = cfg.new_bb(rtls, BbKind::OneWay, 1) {
                    // a truncated block already fell through elsewhere
                    if cfg.bb(bb).kind == BbKind::OneWay && dest.is_valid() {
                        cfg.add_out_edge_addr(bb, dest);
                        targets.push(dest);
                    }
                    if session.debugging(DebugFlags::DECODE) {
                        debug!(%start, %dest, "one-way block");
                    }
                }
                return Ok(());
            }
            Some(StmtKind::Goto(_)) => {
                let _ = cfg.new_bb(rtls, BbKind::CompJump, 0);
                return Ok(());
            }
            Some(StmtKind::Branch(b)) => {
                if let Ok(bb) = cfg.new_bb(rtls, BbKind::TwoWay, 2) {
                    if cfg.bb(bb).kind == BbKind::TwoWay {
                        // out[0] is the taken edge, out[1] the fall-through
                        cfg.add_out_edge_addr(bb, b.dest);
                        cfg.add_out_edge_addr(bb, next_pc);
                        targets.push(b.dest);
                        targets.push(next_pc);
                    }
                }
                return Ok(());
            }
            Some(StmtKind::Case(c)) => {
                let dests: Vec<Address> = c
                    .info
                    .as_ref()
                    .map(|info| read_jump_table(image, info))
                    .unwrap_or_default();
                if let Ok(bb) = cfg.new_bb(rtls, BbKind::Nway, dests.len()) {
                    if cfg.bb(bb).kind == BbKind::Nway {
                        for d in &dests {
                            cfg.add_out_edge_addr(bb, *d);
                            targets.push(*d);
                        }
                    }
                }
                return Ok(());
            }
            Some(StmtKind::Call(_)) => {
                let kind = if is_computed_call {
                    BbKind::CompCall
                } else {
                    BbKind::Call
                };
                debug_assert!(is_call);
                if let Ok(bb) = cfg.new_bb(rtls, kind, 1) {
                    if cfg.bb(bb).kind == kind {
                        cfg.add_out_edge_addr(bb, next_pc);
                        targets.push(next_pc);
                    }
                }
                return Ok(());
            }
            Some(StmtKind::Ret(_)) => {
                let _ = cfg.new_bb(rtls, BbKind::Ret, 0);
                return Ok(());
            }
            _ => {
                // Plain fall-through; close the block when the next
                // address is a known leader.
                if cfg.bb_starting_at(next_pc).is_some() {
                    if let Ok(bb) = cfg.new_bb(rtls, BbKind::Fall, 1) {
                        if cfg.bb(bb).out_edges.is_empty() {
                            cfg.add_out_edge_addr(bb, next_pc);
                        }
                    }
                    return Ok(());
                }
                pc = next_pc;
            }
        }
    }
}

/// Read the destinations out of a decoded jump-table descriptor.
fn read_jump_table(image: &dyn Image, info: &reloom_ir::SwitchInfo) -> Vec<Address> {
    use reloom_ir::SwitchKind;
    let mut dests = Vec::new();
    for i in 0..info.num_cases {
        let slot = info.table + i * 8;
        match image.read(slot, 8) {
            Ok(raw) => {
                let dest = match info.kind {
                    SwitchKind::Absolute | SwitchKind::Hashed => Address::new(raw),
                    SwitchKind::Offset | SwitchKind::Relative => info.table + raw,
                };
                if dest.is_valid() {
                    dests.push(dest);
                }
            }
            Err(_) => break,
        }
    }
    dests
}
