//! The machine-level IR.
//!
//! Instructions carry explicit `ins`/`outs` operand lists plus implicit
//! def/use sets for opcodes that clobber fixed physical registers (integer
//! division writes `eax` and `edx` no matter what the operands say).
//! Liveness and interference read those four lists and nothing else.
//!
//! Functions own their blocks in linearization order; successor and
//! predecessor edges are block ids, never pointers.

use derive_more::Display;

use super::x86::PhysReg;

/// An allocator-assigned register-to-be, identified by its numeral.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[display("vreg{_0}")]
pub struct VReg(pub usize);

/// A frame location; reserved for future spill support.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display("stack[{base}+{offset}]")]
pub struct StackSlot {
    pub base: PhysReg,
    pub offset: i32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
#[display("[{base}+{offset}]")]
pub struct MemoryAccess {
    pub base: PhysReg,
    pub offset: i32,
}

/// The five operand carriers.  Every consumer must handle every case.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Operand {
    Virtual(VReg),
    Physical(PhysReg),
    Slot(StackSlot),
    #[display("#{_0}")]
    Imm(i32),
    Mem(MemoryAccess),
}

/// A register reference extracted from an operand, for liveness bookkeeping.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Reg {
    Virtual(VReg),
    Physical(PhysReg),
}

impl Operand {
    pub fn is_register(&self) -> bool {
        matches!(self, Operand::Virtual(_) | Operand::Physical(_))
    }

    pub fn is_immediate(&self) -> bool {
        matches!(self, Operand::Imm(_))
    }

    /// The register named directly by this operand, if any.
    pub fn as_reg(&self) -> Option<Reg> {
        match self {
            Operand::Virtual(v) => Some(Reg::Virtual(*v)),
            Operand::Physical(p) => Some(Reg::Physical(*p)),
            Operand::Slot(_) | Operand::Imm(_) | Operand::Mem(_) => None,
        }
    }

    /// The base register of a memory carrier.  Writing through memory still
    /// reads the base.
    fn base_reg(&self) -> Option<Reg> {
        match self {
            Operand::Slot(slot) => Some(Reg::Physical(slot.base)),
            Operand::Mem(mem) => Some(Reg::Physical(mem.base)),
            Operand::Virtual(_) | Operand::Physical(_) | Operand::Imm(_) => None,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display)]
pub enum Opcode {
    #[display("MOV_RR")]
    MovRr,
    #[display("MOV_RI")]
    MovRi,
    #[display("STORE_MEM_REG")]
    StoreMemReg,
    #[display("STORE_MEM_IMM")]
    StoreMemImm,
    #[display("LOAD_REG_MEM")]
    LoadRegMem,
    #[display("ADD_RR")]
    AddRr,
    #[display("ADD_RI")]
    AddRi,
    #[display("SUB_RR")]
    SubRr,
    #[display("SUB_RI")]
    SubRi,
    #[display("MUL_RR")]
    MulRr,
    #[display("MUL_RI")]
    MulRi,
    #[display("DIV_RR")]
    DivRr,
    #[display("MOD_RR")]
    ModRr,
    #[display("NEG_R")]
    NegR,
    #[display("CMP")]
    Cmp,
    #[display("JMP")]
    Jmp,
    #[display("JL")]
    Jl,
    #[display("RET")]
    Ret,
    #[display("DEF_LABEL")]
    DefLabel,
}

#[derive(Clone, Debug)]
pub struct Instruction {
    pub opcode: Opcode,
    pub ins: Vec<Operand>,
    pub outs: Vec<Operand>,
    pub implicit_defs: Vec<Operand>,
    pub implicit_uses: Vec<Operand>,
}

impl Instruction {
    pub fn new(opcode: Opcode) -> Instruction {
        Instruction {
            opcode,
            ins: Vec::new(),
            outs: Vec::new(),
            implicit_defs: Vec::new(),
            implicit_uses: Vec::new(),
        }
    }

    fn with(
        opcode: Opcode,
        ins: Vec<Operand>,
        outs: Vec<Operand>,
        implicit_defs: Vec<Operand>,
        implicit_uses: Vec<Operand>,
    ) -> Instruction {
        Instruction { opcode, ins, outs, implicit_defs, implicit_uses }
    }

    pub fn mov_rr(src: Operand, dst: Operand) -> Instruction {
        Instruction::with(Opcode::MovRr, vec![src], vec![dst], vec![], vec![])
    }

    pub fn mov_ri(imm: i32, dst: Operand) -> Instruction {
        Instruction::with(Opcode::MovRi, vec![Operand::Imm(imm)], vec![dst], vec![], vec![])
    }

    /// Two-operand arithmetic: `dst op= rhs`.  `opcode` picks the RR or RI
    /// form; `dst` is read and written.
    pub fn arith(opcode: Opcode, dst: Operand, rhs: Operand) -> Instruction {
        Instruction::with(opcode, vec![dst, rhs], vec![dst], vec![], vec![])
    }

    /// Integer division.  The quotient and remainder land in `eax`/`edx`,
    /// which the operand lists cannot express, hence the implicit sets.
    pub fn div_rr(divisor: Operand) -> Instruction {
        Instruction::with(
            Opcode::DivRr,
            vec![divisor],
            vec![],
            vec![Operand::Physical(PhysReg::Eax), Operand::Physical(PhysReg::Edx)],
            vec![Operand::Physical(PhysReg::Eax), Operand::Physical(PhysReg::Edx)],
        )
    }

    pub fn mod_rr(divisor: Operand) -> Instruction {
        Instruction::with(
            Opcode::ModRr,
            vec![divisor],
            vec![],
            vec![Operand::Physical(PhysReg::Eax), Operand::Physical(PhysReg::Edx)],
            vec![Operand::Physical(PhysReg::Eax), Operand::Physical(PhysReg::Edx)],
        )
    }

    pub fn neg(reg: Operand) -> Instruction {
        Instruction::with(Opcode::NegR, vec![reg], vec![reg], vec![], vec![])
    }

    pub fn cmp(lhs: Operand, rhs: Operand) -> Instruction {
        Instruction::with(Opcode::Cmp, vec![lhs, rhs], vec![], vec![], vec![])
    }

    pub fn jmp(block_id: usize) -> Instruction {
        Instruction::with(Opcode::Jmp, vec![Operand::Imm(block_id as i32)], vec![], vec![], vec![])
    }

    pub fn jl(block_id: usize) -> Instruction {
        Instruction::with(Opcode::Jl, vec![Operand::Imm(block_id as i32)], vec![], vec![], vec![])
    }

    /// The integer return value travels in `eax`.
    pub fn ret() -> Instruction {
        Instruction::with(Opcode::Ret, vec![], vec![], vec![], vec![Operand::Physical(PhysReg::Eax)])
    }

    pub fn def_label(block_id: usize) -> Instruction {
        Instruction::with(Opcode::DefLabel, vec![Operand::Imm(block_id as i32)], vec![], vec![], vec![])
    }

    pub fn store_mem_reg(mem: Operand, src: Operand) -> Instruction {
        Instruction::with(Opcode::StoreMemReg, vec![src], vec![mem], vec![], vec![])
    }

    pub fn store_mem_imm(mem: Operand, imm: i32) -> Instruction {
        Instruction::with(Opcode::StoreMemImm, vec![Operand::Imm(imm)], vec![mem], vec![], vec![])
    }

    pub fn load_reg_mem(mem: Operand, dst: Operand) -> Instruction {
        Instruction::with(Opcode::LoadRegMem, vec![mem], vec![dst], vec![], vec![])
    }

    /// Registers this instruction reads: `ins ∪ implicit_uses`, plus the base
    /// registers of any memory carrier in the written lists.
    pub fn reg_reads(&self) -> Vec<Reg> {
        let mut reads = Vec::new();
        for operand in self.ins.iter().chain(&self.implicit_uses) {
            reads.extend(operand.as_reg());
            reads.extend(operand.base_reg());
        }
        for operand in self.outs.iter().chain(&self.implicit_defs) {
            reads.extend(operand.base_reg());
        }
        reads
    }

    /// Registers this instruction writes: `outs ∪ implicit_defs`.
    pub fn reg_writes(&self) -> Vec<Reg> {
        self.outs
            .iter()
            .chain(&self.implicit_defs)
            .filter_map(|operand| operand.as_reg())
            .collect()
    }

    /// All operand slots, for post-allocation rewriting.
    pub fn operands_mut(&mut self) -> impl Iterator<Item = &mut Operand> {
        self.ins
            .iter_mut()
            .chain(self.outs.iter_mut())
            .chain(self.implicit_defs.iter_mut())
            .chain(self.implicit_uses.iter_mut())
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn print(
            f: &mut std::fmt::Formatter<'_>,
            prefix: &str,
            ops: &[Operand],
        ) -> std::fmt::Result {
            if ops.is_empty() {
                return Ok(());
            }
            write!(f, " {prefix}:")?;
            for op in ops {
                write!(f, " {op}")?;
            }
            Ok(())
        }
        write!(f, "{}", self.opcode)?;
        print(f, "out", &self.outs)?;
        print(f, "in", &self.ins)?;
        print(f, "impl_def", &self.implicit_defs)?;
        print(f, "impl_use", &self.implicit_uses)?;
        Ok(())
    }
}

/// A machine basic block.  The id mirrors the IR block it was lowered from,
/// which is what jump operands and `DEF_LABEL` refer to.
#[derive(Clone, Debug)]
pub struct Block {
    pub id: usize,
    pub insts: Vec<Instruction>,
    pub succs: Vec<usize>,
    pub preds: Vec<usize>,
}

impl Block {
    pub fn new(id: usize) -> Block {
        Block { id, insts: Vec::new(), succs: Vec::new(), preds: Vec::new() }
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "block {}:", self.id)?;
        for inst in &self.insts {
            writeln!(f, "  {inst}")?;
        }
        Ok(())
    }
}

/// Blocks are stored in linearization order; the entry block comes first and
/// fall-through between adjacent blocks is part of the layout.
#[derive(Clone, Debug)]
pub struct Function {
    pub id: usize,
    pub frame_size: usize,
    pub blocks: Vec<Block>,
}

impl Function {
    pub fn new(id: usize) -> Function {
        Function { id, frame_size: 0, blocks: Vec::new() }
    }

    pub fn entry_block(&self) -> Option<&Block> {
        self.blocks.first()
    }

    /// The linearized instruction stream liveness and interference walk.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.insts.iter())
    }

    pub fn instructions_mut(&mut self) -> impl Iterator<Item = &mut Instruction> {
        self.blocks.iter_mut().flat_map(|b| b.insts.iter_mut())
    }

    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.insts.len()).sum()
    }
}

impl std::fmt::Display for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "function {}:", self.id)?;
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
pub struct Program {
    pub functions: Vec<Function>,
}

impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for function in &self.functions {
            write!(f, "{function}")?;
        }
        Ok(())
    }
}
