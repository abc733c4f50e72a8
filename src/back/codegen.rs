//! Lowering from the three-address IR to MIR.
//!
//! Blocks are linearized by depth-first traversal that takes the *false*
//! successor before the *true* one, so a conditional's false edge becomes
//! textual fall-through.  Each lowering emits virtual registers as
//! destinations; fixed-register constraints (division, the return value)
//! surface as physical operands and implicit def/use sets instead of early
//! assignment, which keeps the allocator honest.

use thiserror::Error;
use tracing::trace;

use crate::middle::ir;
use crate::middle::ir::BlockId;

use super::mir::{Block, Function, Instruction, Opcode, Operand, Program, VReg};
use super::x86::PhysReg;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LoweringError {
    #[error("internal compiler error: no lowering for IR opcode {0} on this target")]
    Unsupported(ir::Opcode),
    #[error("internal compiler error: malformed operand arity for IR opcode {0}")]
    Arity(ir::Opcode),
    #[error("internal compiler error: comparison in block {0} has no true successor")]
    MissingSuccessor(BlockId),
}

/// Lower every function of `program`.
pub fn generate(program: &ir::Program) -> Result<Program, LoweringError> {
    let mut mir = Program::default();
    for (id, cfg) in program.cfgs.iter().enumerate() {
        mir.functions.push(generate_function(id, cfg)?);
    }
    Ok(mir)
}

fn generate_function(id: usize, cfg: &ir::Cfg) -> Result<Function, LoweringError> {
    let mut order = Vec::new();
    let mut visited = vec![false; cfg.blocks.len()];
    linearize(cfg, cfg.entry, &mut visited, &mut order);

    let mut function = Function::new(id);
    for block_id in &order {
        let block = lower_block(cfg.block(*block_id))?;
        function.blocks.push(block);
    }

    // Predecessor edges are the successor edges, inverted.
    let edges: Vec<(usize, usize)> = function
        .blocks
        .iter()
        .flat_map(|b| b.succs.iter().map(move |s| (b.id, *s)))
        .collect();
    for (from, to) in edges {
        if let Some(block) = function.blocks.iter_mut().find(|b| b.id == to) {
            block.preds.push(from);
        }
    }

    trace!(function = id, blocks = function.blocks.len(), "lowered to MIR");
    Ok(function)
}

fn linearize(cfg: &ir::Cfg, id: BlockId, visited: &mut [bool], order: &mut Vec<BlockId>) {
    if visited[id] {
        return;
    }
    visited[id] = true;
    order.push(id);
    if let Some(ff) = cfg.block(id).succ_false {
        linearize(cfg, ff, visited, order);
    }
    if let Some(tt) = cfg.block(id).succ_true {
        linearize(cfg, tt, visited, order);
    }
}

fn operand(inst: &ir::Instruction, index: usize) -> Result<Operand, LoweringError> {
    match inst.operands.get(index) {
        Some(ir::Operand::Temp(t)) => Ok(Operand::Virtual(VReg(t.0))),
        Some(ir::Operand::Imm(v)) => Ok(Operand::Imm(*v)),
        None => Err(LoweringError::Arity(inst.opcode)),
    }
}

fn result_reg(inst: &ir::Instruction) -> Result<Operand, LoweringError> {
    inst.result
        .map(|t| Operand::Virtual(VReg(t.0)))
        .ok_or(LoweringError::Arity(inst.opcode))
}

// MOV_RR or MOV_RI depending on the source carrier.
fn mov_into(src: Operand, dst: Operand) -> Instruction {
    match src {
        Operand::Imm(value) => Instruction::mov_ri(value, dst),
        _ => Instruction::mov_rr(src, dst),
    }
}

fn lower_block(bb: &ir::BasicBlock) -> Result<Block, LoweringError> {
    let mut block = Block::new(bb.id);
    block.succs.extend(bb.succ_false);
    block.succs.extend(bb.succ_true);
    block.insts.push(Instruction::def_label(bb.id));

    for inst in &bb.insts {
        lower_instruction(bb, inst, &mut block.insts)?;
    }
    Ok(block)
}

fn lower_instruction(
    bb: &ir::BasicBlock,
    inst: &ir::Instruction,
    out: &mut Vec<Instruction>,
) -> Result<(), LoweringError> {
    match inst.opcode {
        ir::Opcode::Store => {
            let src = operand(inst, 0)?;
            let dst = result_reg(inst)?;
            out.push(mov_into(src, dst));
        }
        ir::Opcode::Add | ir::Opcode::Mul => {
            let dst = result_reg(inst)?;
            let lhs = operand(inst, 0)?;
            let rhs = operand(inst, 1)?;
            let (rr, ri) = match inst.opcode {
                ir::Opcode::Add => (Opcode::AddRr, Opcode::AddRi),
                _ => (Opcode::MulRr, Opcode::MulRi),
            };
            // Commutative, so an immediate may sit on either side.
            match (lhs.is_register(), rhs.is_register()) {
                (true, true) => {
                    out.push(Instruction::mov_rr(lhs, dst));
                    out.push(Instruction::arith(rr, dst, rhs));
                }
                (true, false) => {
                    out.push(Instruction::mov_rr(lhs, dst));
                    out.push(Instruction::arith(ri, dst, rhs));
                }
                (false, true) => {
                    out.push(Instruction::mov_rr(rhs, dst));
                    out.push(Instruction::arith(ri, dst, lhs));
                }
                (false, false) => {
                    out.push(mov_into(lhs, dst));
                    out.push(Instruction::arith(ri, dst, rhs));
                }
            }
        }
        ir::Opcode::Sub => {
            let dst = result_reg(inst)?;
            let lhs = operand(inst, 0)?;
            let rhs = operand(inst, 1)?;
            // Operand order is semantic here; the left side always lands in
            // the destination first.
            out.push(mov_into(lhs, dst));
            let opcode = if rhs.is_register() { Opcode::SubRr } else { Opcode::SubRi };
            out.push(Instruction::arith(opcode, dst, rhs));
        }
        ir::Opcode::Div | ir::Opcode::Mod => {
            let dst = result_reg(inst)?;
            let lhs = operand(inst, 0)?;
            let rhs = operand(inst, 1)?;
            out.push(mov_into(lhs, Operand::Physical(PhysReg::Eax)));
            let divisor = if rhs.is_register() {
                rhs
            } else {
                // An immediate divisor has no encoding; park it in the
                // destination register, which is dead until the result move.
                out.push(mov_into(rhs, dst));
                dst
            };
            if inst.opcode == ir::Opcode::Div {
                out.push(Instruction::div_rr(divisor));
                out.push(Instruction::mov_rr(Operand::Physical(PhysReg::Eax), dst));
            } else {
                out.push(Instruction::mod_rr(divisor));
                out.push(Instruction::mov_rr(Operand::Physical(PhysReg::Edx), dst));
            }
        }
        ir::Opcode::Neg => {
            let dst = result_reg(inst)?;
            let src = operand(inst, 0)?;
            out.push(mov_into(src, dst));
            out.push(Instruction::neg(dst));
        }
        ir::Opcode::Ret => {
            let src = operand(inst, 0)?;
            out.push(mov_into(src, Operand::Physical(PhysReg::Eax)));
            out.push(Instruction::ret());
        }
        ir::Opcode::Lt => {
            let lhs = operand(inst, 0)?;
            let rhs = operand(inst, 1)?;
            let target = bb.succ_true.ok_or(LoweringError::MissingSuccessor(bb.id))?;
            out.push(Instruction::cmp(lhs, rhs));
            // The false successor is fall-through in the linearization.
            out.push(Instruction::jl(target));
        }
        ir::Opcode::Jmp => {
            let target = match operand(inst, 0)? {
                Operand::Imm(id) => id as usize,
                _ => return Err(LoweringError::Arity(inst.opcode)),
            };
            out.push(Instruction::jmp(target));
        }
        ir::Opcode::Le
        | ir::Opcode::Gt
        | ir::Opcode::Ge
        | ir::Opcode::Eq
        | ir::Opcode::Ne => {
            return Err(LoweringError::Unsupported(inst.opcode));
        }
    }
    Ok(())
}
