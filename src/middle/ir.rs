//! The three-address IR.
//!
//! Every instruction yields at most one fresh temporary.  Blocks form a
//! control-flow graph per function; each CFG owns its blocks in a vector and
//! successor edges are indices into it.

use derive_more::Display;

/// A virtual value produced by the IR builder, identified by its numeral.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Display)]
#[display("t{_0}")]
pub struct Temp(pub usize);

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Operand {
    Temp(Temp),
    #[display("#{_0}")]
    Imm(i32),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Display)]
pub enum Opcode {
    #[display("ADD")]
    Add,
    #[display("SUB")]
    Sub,
    #[display("MUL")]
    Mul,
    #[display("DIV")]
    Div,
    #[display("MOD")]
    Mod,
    #[display("NEG")]
    Neg,
    #[display("LT")]
    Lt,
    #[display("LE")]
    Le,
    #[display("GT")]
    Gt,
    #[display("GE")]
    Ge,
    #[display("EQ")]
    Eq,
    #[display("NE")]
    Ne,
    #[display("RET")]
    Ret,
    #[display("JMP")]
    Jmp,
    #[display("STORE")]
    Store,
}

#[derive(Clone, Debug)]
pub struct Instruction {
    pub opcode: Opcode,
    pub operands: Vec<Operand>,
    pub result: Option<Temp>,
}

impl Instruction {
    pub fn new(opcode: Opcode, operands: Vec<Operand>, result: Option<Temp>) -> Instruction {
        Instruction { opcode, operands, result }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.result {
            Some(result) => write!(f, "{result} <- {}", self.opcode)?,
            None => write!(f, "{}", self.opcode)?,
        }
        for operand in &self.operands {
            write!(f, " {operand}")?;
        }
        Ok(())
    }
}

pub type BlockId = usize;

#[derive(Debug, Default)]
pub struct BasicBlock {
    pub id: BlockId,
    pub insts: Vec<Instruction>,
    pub succ_true: Option<BlockId>,
    pub succ_false: Option<BlockId>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> BasicBlock {
        BasicBlock { id, ..BasicBlock::default() }
    }
}

impl std::fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "block {}:", self.id)?;
        for inst in &self.insts {
            writeln!(f, "  {inst}")?;
        }
        match (self.succ_true, self.succ_false) {
            (Some(t), Some(fa)) => writeln!(f, "  succs: true -> {t}, false -> {fa}"),
            (Some(t), None) => writeln!(f, "  succs: {t}"),
            (None, Some(fa)) => writeln!(f, "  succs: {fa}"),
            (None, None) => Ok(()),
        }
    }
}

/// One function's control-flow graph.  Block ids double as indices.
#[derive(Debug)]
pub struct Cfg {
    pub entry: BlockId,
    pub blocks: Vec<BasicBlock>,
}

impl Cfg {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id]
    }
}

impl std::fmt::Display for Cfg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for block in &self.blocks {
            write!(f, "{block}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Program {
    pub cfgs: Vec<Cfg>,
}

impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (index, cfg) in self.cfgs.iter().enumerate() {
            writeln!(f, "function {index}:")?;
            write!(f, "{cfg}")?;
        }
        Ok(())
    }
}
