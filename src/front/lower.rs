//! AST to IR lowering.
//!
//! Every expression value gets a fresh temporary; mutable variables are
//! mapped to dedicated temporaries that assignments STORE into.  Comparisons
//! terminate their block with the true/false successor split the machine
//! lowering expects, and unconditional transfers end blocks with `JMP`.

use crate::common::{Id, Map};
use crate::middle::ir::{BasicBlock, BlockId, Cfg, Instruction, Opcode, Operand, Program, Temp};

use super::ast;
use super::ast::{BOp, Expr, Stmt};

pub fn lower(program: &ast::Program<'_>) -> Program {
    let mut lowering = Lowering::default();
    let cfg = lowering.lower_function(&program.func);
    Program { cfgs: vec![cfg] }
}

#[derive(Default)]
struct Lowering {
    temp_count: usize,
    blocks: Vec<BasicBlock>,
    current: BlockId,
    vars: Map<Id, Temp>,
}

impl Lowering {
    fn fresh_temp(&mut self) -> Temp {
        let temp = Temp(self.temp_count);
        self.temp_count += 1;
        temp
    }

    fn push_block(&mut self) -> BlockId {
        let id = self.blocks.len();
        self.blocks.push(BasicBlock::new(id));
        id
    }

    fn emit(&mut self, inst: Instruction) {
        self.blocks[self.current].insts.push(inst);
    }

    // A block is closed once it ends in RET or JMP or has successors.
    fn current_is_closed(&self) -> bool {
        let block = &self.blocks[self.current];
        block.succ_true.is_some()
            || block.succ_false.is_some()
            || matches!(
                block.insts.last(),
                Some(Instruction { opcode: Opcode::Ret | Opcode::Jmp, .. })
            )
    }

    fn lower_function(&mut self, func: &ast::Function<'_>) -> Cfg {
        let entry = self.push_block();
        self.current = entry;
        self.lower_stmts(&func.body);
        // Control may fall off the end when the only returns sit inside
        // branches; give execution a defined way out.
        if !self.current_is_closed() {
            self.emit(Instruction::new(Opcode::Ret, vec![Operand::Imm(0)], None));
        }
        Cfg { entry, blocks: std::mem::take(&mut self.blocks) }
    }

    fn lower_stmts(&mut self, stmts: &[Stmt<'_>]) {
        for stmt in stmts {
            self.lower_stmt(stmt);
        }
    }

    fn var_temp(&mut self, name: Id) -> Temp {
        if let Some(temp) = self.vars.get(&name) {
            return *temp;
        }
        let temp = self.fresh_temp();
        self.vars.insert(name, temp);
        temp
    }

    fn lower_stmt(&mut self, stmt: &Stmt<'_>) {
        match stmt {
            Stmt::Declare { name, init, .. } => {
                let dst = self.var_temp(*name);
                if let Some(init) = init {
                    let value = self.lower_expr(init);
                    self.emit(Instruction::new(Opcode::Store, vec![value], Some(dst)));
                }
            }
            Stmt::Assign { name, value, .. } => {
                let dst = self.var_temp(*name);
                let value = self.lower_expr(value);
                self.emit(Instruction::new(Opcode::Store, vec![value], Some(dst)));
            }
            Stmt::Return { value, .. } => {
                let value = self.lower_expr(value);
                self.emit(Instruction::new(Opcode::Ret, vec![value], None));
            }
            Stmt::If { cond, then_body, else_body, .. } => {
                self.lower_comparison(cond);
                let cond_block = self.current;

                let then_block = self.push_block();
                self.current = then_block;
                self.lower_stmts(then_body);
                let then_end = self.current;

                if else_body.is_empty() {
                    let merge = self.push_block();
                    self.blocks[cond_block].succ_true = Some(then_block);
                    self.blocks[cond_block].succ_false = Some(merge);
                    self.jump_to(then_end, merge);
                    self.current = merge;
                } else {
                    let else_block = self.push_block();
                    self.current = else_block;
                    self.lower_stmts(else_body);
                    let else_end = self.current;

                    let merge = self.push_block();
                    self.blocks[cond_block].succ_true = Some(then_block);
                    self.blocks[cond_block].succ_false = Some(else_block);
                    self.jump_to(then_end, merge);
                    self.jump_to(else_end, merge);
                    self.current = merge;
                }
            }
            Stmt::While { cond, body, .. } => {
                let header = self.push_block();
                self.jump_to(self.current, header);

                self.current = header;
                self.lower_comparison(cond);

                let body_block = self.push_block();
                self.current = body_block;
                self.lower_stmts(body);
                let body_end = self.current;

                let exit = self.push_block();
                self.blocks[header].succ_true = Some(body_block);
                self.blocks[header].succ_false = Some(exit);
                self.jump_to(body_end, header);
                self.current = exit;
            }
        }
    }

    // End `from` with an explicit jump to `to`, unless it already returned
    // or branched away.
    fn jump_to(&mut self, from: BlockId, to: BlockId) {
        let block = &self.blocks[from];
        let closed = block.succ_true.is_some()
            || block.succ_false.is_some()
            || matches!(
                block.insts.last(),
                Some(Instruction { opcode: Opcode::Ret | Opcode::Jmp, .. })
            );
        if closed {
            return;
        }
        self.blocks[from]
            .insts
            .push(Instruction::new(Opcode::Jmp, vec![Operand::Imm(to as i32)], None));
        self.blocks[from].succ_false = Some(to);
    }

    // Conditions reach us as `a < b`; anything else was rejected by the
    // semantic pass.  The comparison closes the current block, with the
    // successors filled in by the caller.
    fn lower_comparison(&mut self, cond: &Expr<'_>) {
        let (lhs, rhs) = match cond {
            Expr::BOp { op: BOp::Lt, lhs, rhs, .. } => (*lhs, *rhs),
            // Error recovery only; sema already rejected the program.
            _ => {
                let result = self.fresh_temp();
                self.emit(Instruction::new(Opcode::Lt, vec![Operand::Imm(0), Operand::Imm(1)], Some(result)));
                return;
            }
        };
        let lhs = self.lower_expr(lhs);
        let rhs = self.lower_expr(rhs);
        // cmp with an immediate on the left has no machine encoding.
        let lhs = self.materialize(lhs);
        let result = self.fresh_temp();
        self.emit(Instruction::new(Opcode::Lt, vec![lhs, rhs], Some(result)));
    }

    fn materialize(&mut self, operand: Operand) -> Operand {
        match operand {
            Operand::Temp(_) => operand,
            Operand::Imm(_) => {
                let temp = self.fresh_temp();
                self.emit(Instruction::new(Opcode::Store, vec![operand], Some(temp)));
                Operand::Temp(temp)
            }
        }
    }

    fn lower_expr(&mut self, expr: &Expr<'_>) -> Operand {
        match expr {
            Expr::Num { value, .. } => Operand::Imm(*value as i32),
            Expr::Var { name, .. } => Operand::Temp(self.var_temp(*name)),
            Expr::Negate { operand, .. } => {
                let src = self.lower_expr(operand);
                // Fold negation of a constant instead of spending a NEG.
                if let Operand::Imm(value) = src {
                    return Operand::Imm(value.wrapping_neg());
                }
                let result = self.fresh_temp();
                self.emit(Instruction::new(Opcode::Neg, vec![src], Some(result)));
                Operand::Temp(result)
            }
            Expr::BOp { op, lhs, rhs, .. } => {
                let opcode = match op {
                    BOp::Add => Opcode::Add,
                    BOp::Sub => Opcode::Sub,
                    BOp::Mul => Opcode::Mul,
                    BOp::Div => Opcode::Div,
                    BOp::Mod => Opcode::Mod,
                    BOp::Lt => Opcode::Lt,
                };
                let lhs = self.lower_expr(lhs);
                let rhs = self.lower_expr(rhs);
                // The machine lowering wants at least one register operand.
                let lhs = if matches!((lhs, rhs), (Operand::Imm(_), Operand::Imm(_))) {
                    self.materialize(lhs)
                } else {
                    lhs
                };
                let result = self.fresh_temp();
                self.emit(Instruction::new(opcode, vec![lhs, rhs], Some(result)));
                Operand::Temp(result)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::arena::Arena;
    use crate::front::parse::parse;

    fn lower_source(source: &str) -> Program {
        let arena = Arena::new();
        let program = parse(&arena, Id::new("test.c".into()), source).unwrap();
        lower(&program)
    }

    #[test]
    fn straight_line_program_is_one_block() {
        let ir = lower_source("int main() { int a = 7; int b = a - 2; return b + a; }");
        let cfg = &ir.cfgs[0];
        assert_eq!(cfg.blocks.len(), 1);
        let opcodes: Vec<Opcode> = cfg.blocks[0].insts.iter().map(|i| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![Opcode::Store, Opcode::Sub, Opcode::Store, Opcode::Add, Opcode::Ret]
        );
    }

    #[test]
    fn each_instruction_defines_at_most_one_temp() {
        let ir = lower_source("int main() { int a = 2 + 3 * 4; return a / 2; }");
        let mut seen = std::collections::BTreeSet::new();
        for block in &ir.cfgs[0].blocks {
            for inst in &block.insts {
                if let Some(result) = inst.result {
                    // Variables are re-stored, so only expression temps are fresh.
                    if inst.opcode != Opcode::Store {
                        assert!(seen.insert(result), "temp {result} defined twice");
                    }
                }
            }
        }
    }

    #[test]
    fn if_splits_into_true_and_false_successors() {
        let ir = lower_source(
            "int main() { int a = 1; if (a < 2) { a = 5; } else { a = 6; } return a; }",
        );
        let cfg = &ir.cfgs[0];
        let entry = cfg.block(cfg.entry);
        assert!(matches!(entry.insts.last(), Some(Instruction { opcode: Opcode::Lt, .. })));
        let tt = entry.succ_true.unwrap();
        let ff = entry.succ_false.unwrap();
        assert_ne!(tt, ff);
        // Both arms jump to the merge block.
        assert!(matches!(cfg.block(tt).insts.last(), Some(Instruction { opcode: Opcode::Jmp, .. })));
        assert!(matches!(cfg.block(ff).insts.last(), Some(Instruction { opcode: Opcode::Jmp, .. })));
    }

    #[test]
    fn while_loops_back_to_the_header() {
        let ir = lower_source("int main() { int i = 0; while (i < 3) { i = i + 1; } return i; }");
        let cfg = &ir.cfgs[0];
        let header = cfg.blocks.iter().find(|b| {
            matches!(b.insts.last(), Some(Instruction { opcode: Opcode::Lt, .. }))
        }).unwrap();
        let body = header.succ_true.unwrap();
        assert_eq!(cfg.block(body).succ_false, Some(header.id));
    }

    #[test]
    fn constant_negation_folds() {
        let ir = lower_source("int main() { int x = -5; return -x; }");
        let block = &ir.cfgs[0].blocks[0];
        assert!(matches!(
            block.insts[0],
            Instruction { opcode: Opcode::Store, .. }
        ));
        assert_eq!(block.insts[0].operands, vec![Operand::Imm(-5)]);
        assert!(block.insts.iter().any(|i| i.opcode == Opcode::Neg));
    }

    #[test]
    fn fall_off_the_end_returns_zero() {
        let ir = lower_source("int main() { int a = 1; if (a < 2) { return 1; } }");
        let cfg = &ir.cfgs[0];
        let last = cfg.blocks.last().unwrap();
        assert!(matches!(last.insts.last(), Some(Instruction { opcode: Opcode::Ret, .. })));
        assert_eq!(last.insts.last().unwrap().operands, vec![Operand::Imm(0)]);
    }
}
