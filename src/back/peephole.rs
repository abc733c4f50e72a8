//! Local MIR rewrites.
//!
//! Each block is scanned to a fixed point: applying any rewrite restarts the
//! scan, and the outer loop keeps going while a pass changed something.
//! Every rewrite either removes an instruction or turns a load into a move
//! (which the redundant-move rule may then remove), so the fixed point is
//! reached after finitely many passes.
//!
//! The pass runs after register allocation; patterns match on physical
//! registers only.

use tracing::{debug, warn};

use super::mir::{Block, Instruction, Opcode, Operand, Program};

pub fn run(program: &mut Program) {
    for function in &mut program.functions {
        for block in &mut function.blocks {
            transform_block(block);
        }
    }
}

fn transform_block(block: &mut Block) {
    let mut pass_count = 0;
    loop {
        pass_count += 1;
        debug!(block = block.id, pass = pass_count, "peephole pass");
        if !scan_block(block) {
            break;
        }
    }
}

// One scan over the block; true when a rewrite fired (the caller restarts).
fn scan_block(block: &mut Block) -> bool {
    for index in 0..block.insts.len() {
        if rewrite_redundant_mov(block, index)
            || rewrite_store_fusion(block, index)
            || rewrite_store_then_load(block, index)
        {
            return true;
        }
    }
    false
}

fn physical(operand: &Operand) -> Option<super::x86::PhysReg> {
    match operand {
        Operand::Physical(reg) => Some(*reg),
        _ => None,
    }
}

// MOV_RR r, r does nothing once both sides are the same physical register.
fn rewrite_redundant_mov(block: &mut Block, index: usize) -> bool {
    let inst = &block.insts[index];
    if inst.opcode != Opcode::MovRr {
        return false;
    }
    let (Some(src), Some(dst)) = (inst.ins.first(), inst.outs.first()) else {
        return false;
    };
    match (physical(src), physical(dst)) {
        (Some(from), Some(to)) => {
            if from == to {
                block.insts.remove(index);
                return true;
            }
        }
        _ => {
            warn!("MOV_RR with unallocated operands; register allocation probably failed");
        }
    }
    false
}

// MOV_RI imm -> r followed by a store of r becomes a store of the immediate,
// provided nothing later in the block reads r again.
fn rewrite_store_fusion(block: &mut Block, index: usize) -> bool {
    if index + 1 >= block.insts.len() {
        return false;
    }
    let (inst, next) = (&block.insts[index], &block.insts[index + 1]);
    if inst.opcode != Opcode::MovRi || next.opcode != Opcode::StoreMemReg {
        return false;
    }
    let (Some(imm), Some(mov_dst)) = (inst.ins.first(), inst.outs.first()) else {
        return false;
    };
    let Some(store_src) = next.ins.first() else {
        return false;
    };
    let (Some(mov_reg), Some(store_reg)) = (physical(mov_dst), physical(store_src)) else {
        return false;
    };
    if mov_reg != store_reg {
        return false;
    }
    if block.insts[index + 2..].iter().any(|later| reads_register(later, mov_reg)) {
        return false;
    }

    let Operand::Imm(value) = *imm else {
        return false;
    };
    let mem = block.insts[index + 1].outs[0];
    block.insts[index + 1] = Instruction::store_mem_imm(mem, value);
    block.insts.remove(index);
    true
}

// A load from the slot just stored to is the stored register, possibly under
// a different name; replace the load with a move and let the redundant-move
// rule clean up the same-register case.
fn rewrite_store_then_load(block: &mut Block, index: usize) -> bool {
    if index + 1 >= block.insts.len() {
        return false;
    }
    let (inst, next) = (&block.insts[index], &block.insts[index + 1]);
    if inst.opcode != Opcode::StoreMemReg || next.opcode != Opcode::LoadRegMem {
        return false;
    }
    let (Some(store_slot), Some(store_src)) = (inst.outs.first(), inst.ins.first()) else {
        return false;
    };
    let (Some(load_slot), Some(load_dst)) = (next.ins.first(), next.outs.first()) else {
        return false;
    };
    let (Operand::Slot(stored), Operand::Slot(loaded)) = (store_slot, load_slot) else {
        return false;
    };
    if stored != loaded {
        return false;
    }

    let (src, dst) = (*store_src, *load_dst);
    block.insts[index + 1] = Instruction::mov_rr(src, dst);
    true
}

fn reads_register(inst: &Instruction, reg: super::x86::PhysReg) -> bool {
    inst.reg_reads()
        .iter()
        .any(|read| matches!(read, super::mir::Reg::Physical(p) if *p == reg))
}
