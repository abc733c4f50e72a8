//! Intel-syntax assembly emission.
//!
//! Runs after register allocation, so every register operand must be
//! physical by now; anything else is an internal error.  Labels are
//! `.L<block_id>` and each one is defined exactly once, by its block's
//! `DEF_LABEL`.

use std::fmt::Write as _;

use thiserror::Error;

use super::mir::{Instruction, Opcode, Operand, Program};
use super::x86::PhysReg;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EmitError {
    #[error("internal compiler error: operand '{operand}' not supported by the {opcode} printer")]
    Operand { opcode: Opcode, operand: String },
}

fn unsupported(opcode: Opcode, operand: &Operand) -> EmitError {
    EmitError::Operand { opcode, operand: operand.to_string() }
}

/// The process prologue: `main` calls the compiled `_main` and hands its
/// result to the exit syscall.
const PROLOGUE: &str = "\
.intel_syntax noprefix
.global main
.global _main
.text
main:
call _main
mov\trdi, rax
mov\trax, 0x3C
syscall
_main:
";

pub fn emit(program: &Program) -> Result<String, EmitError> {
    let mut out = String::from(PROLOGUE);
    for function in &program.functions {
        for block in &function.blocks {
            for inst in &block.insts {
                emit_instruction(inst, &mut out)?;
            }
        }
    }
    Ok(out)
}

// The register named by an operand, for printers that require one.
fn reg(inst: &Instruction, operand: &Operand) -> Result<PhysReg, EmitError> {
    match operand {
        Operand::Physical(reg) => Ok(*reg),
        _ => Err(unsupported(inst.opcode, operand)),
    }
}

fn imm(inst: &Instruction, operand: &Operand) -> Result<i32, EmitError> {
    match operand {
        Operand::Imm(value) => Ok(*value),
        _ => Err(unsupported(inst.opcode, operand)),
    }
}

// Memory carriers render with an explicit operand size; 32-bit everywhere.
fn mem(inst: &Instruction, operand: &Operand) -> Result<String, EmitError> {
    let (base, offset) = match operand {
        Operand::Mem(mem) => (mem.base, mem.offset),
        Operand::Slot(slot) => (slot.base, slot.offset),
        _ => return Err(unsupported(inst.opcode, operand)),
    };
    if offset < 0 {
        Ok(format!("DWORD PTR [{base}-{}]", -i64::from(offset)))
    } else {
        Ok(format!("DWORD PTR [{base}+{offset}]"))
    }
}

fn in_op(inst: &Instruction, index: usize) -> Result<Operand, EmitError> {
    inst.ins.get(index).copied().ok_or_else(|| EmitError::Operand {
        opcode: inst.opcode,
        operand: format!("<missing in[{index}]>"),
    })
}

fn out_op(inst: &Instruction, index: usize) -> Result<Operand, EmitError> {
    inst.outs.get(index).copied().ok_or_else(|| EmitError::Operand {
        opcode: inst.opcode,
        operand: format!("<missing out[{index}]>"),
    })
}

fn emit_instruction(inst: &Instruction, out: &mut String) -> Result<(), EmitError> {
    match inst.opcode {
        Opcode::DefLabel => {
            let id = imm(inst, &in_op(inst, 0)?)?;
            writeln!(out, ".L{id}:").ok();
        }
        Opcode::MovRr => {
            let dst = reg(inst, &out_op(inst, 0)?)?;
            let src = reg(inst, &in_op(inst, 0)?)?;
            writeln!(out, "mov\t{dst}, {src}").ok();
        }
        Opcode::MovRi => {
            let dst = reg(inst, &out_op(inst, 0)?)?;
            let value = imm(inst, &in_op(inst, 0)?)?;
            writeln!(out, "mov\t{dst}, {value}").ok();
        }
        Opcode::AddRr | Opcode::SubRr => {
            let mnemonic = if inst.opcode == Opcode::AddRr { "add" } else { "sub" };
            let dst = reg(inst, &in_op(inst, 0)?)?;
            let src = reg(inst, &in_op(inst, 1)?)?;
            writeln!(out, "{mnemonic}\t{dst}, {src}").ok();
        }
        Opcode::AddRi | Opcode::SubRi => {
            let mnemonic = if inst.opcode == Opcode::AddRi { "add" } else { "sub" };
            let dst = reg(inst, &in_op(inst, 0)?)?;
            let value = imm(inst, &in_op(inst, 1)?)?;
            writeln!(out, "{mnemonic}\t{dst}, {value}").ok();
        }
        Opcode::MulRr => {
            let dst = reg(inst, &in_op(inst, 0)?)?;
            let src = reg(inst, &in_op(inst, 1)?)?;
            writeln!(out, "imul\t{dst}, {src}").ok();
        }
        Opcode::MulRi => {
            let dst = reg(inst, &in_op(inst, 0)?)?;
            let value = imm(inst, &in_op(inst, 1)?)?;
            writeln!(out, "imul\t{dst}, {dst}, {value}").ok();
        }
        Opcode::DivRr | Opcode::ModRr => {
            // idiv consumes edx:eax; cdq sign-extends eax into edx first.
            let divisor = reg(inst, &in_op(inst, 0)?)?;
            writeln!(out, "cdq").ok();
            writeln!(out, "idiv\t{divisor}").ok();
        }
        Opcode::NegR => {
            let target = reg(inst, &in_op(inst, 0)?)?;
            writeln!(out, "neg\t{target}").ok();
        }
        Opcode::LoadRegMem => {
            let dst = reg(inst, &out_op(inst, 0)?)?;
            let src = mem(inst, &in_op(inst, 0)?)?;
            writeln!(out, "mov\t{dst}, {src}").ok();
        }
        Opcode::StoreMemReg => {
            let dst = mem(inst, &out_op(inst, 0)?)?;
            let src = reg(inst, &in_op(inst, 0)?)?;
            writeln!(out, "mov\t{dst}, {src}").ok();
        }
        Opcode::StoreMemImm => {
            let dst = mem(inst, &out_op(inst, 0)?)?;
            let value = imm(inst, &in_op(inst, 0)?)?;
            writeln!(out, "mov\t{dst}, {value}").ok();
        }
        Opcode::Cmp => {
            let lhs = reg(inst, &in_op(inst, 0)?)?;
            let rhs = in_op(inst, 1)?;
            match rhs {
                Operand::Physical(reg) => writeln!(out, "cmp\t{lhs}, {reg}").ok(),
                Operand::Imm(value) => writeln!(out, "cmp\t{lhs}, {value}").ok(),
                other => return Err(unsupported(inst.opcode, &other)),
            };
        }
        Opcode::Jl => {
            let target = imm(inst, &in_op(inst, 0)?)?;
            writeln!(out, "jl\t.L{target}").ok();
        }
        Opcode::Jmp => {
            let target = imm(inst, &in_op(inst, 0)?)?;
            writeln!(out, "jmp\t.L{target}").ok();
        }
        Opcode::Ret => {
            writeln!(out, "ret").ok();
        }
    }
    Ok(())
}
