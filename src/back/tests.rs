//! Back-end unit tests: lowering shapes, liveness, interference, coloring,
//! peephole rewrites, and emission.

use crate::common::bitset::AdjacencyList;
use crate::common::{Map, Set};
use crate::middle::ir;

use super::mir::{Block, Function, Instruction, Opcode, Operand, Program, Reg, StackSlot, VReg};
use super::regmap::RegisterMap;
use super::x86::PhysReg;
use super::{codegen, emit, interference, liveness, peephole, regalloc, x86};

fn vr(n: usize) -> Operand {
    Operand::Virtual(VReg(n))
}

fn pr(reg: PhysReg) -> Operand {
    Operand::Physical(reg)
}

fn function_of(insts: Vec<Instruction>) -> Program {
    let mut block = Block::new(0);
    block.insts = insts;
    let mut function = Function::new(0);
    function.blocks.push(block);
    Program { functions: vec![function] }
}

// IR for `int main() { int a = 7; int b = a - 2; return b + a; }` with
// a = t0, b = t1.
fn sub_add_ir() -> ir::Program {
    use ir::{BasicBlock, Cfg, Instruction as I, Opcode as Op, Operand as O, Temp};
    let mut block = BasicBlock::new(0);
    block.insts = vec![
        I::new(Op::Store, vec![O::Imm(7)], Some(Temp(0))),
        I::new(Op::Sub, vec![O::Temp(Temp(0)), O::Imm(2)], Some(Temp(2))),
        I::new(Op::Store, vec![O::Temp(Temp(2))], Some(Temp(1))),
        I::new(Op::Add, vec![O::Temp(Temp(1)), O::Temp(Temp(0))], Some(Temp(3))),
        I::new(Op::Ret, vec![O::Temp(Temp(3))], None),
    ];
    ir::Program { cfgs: vec![Cfg { entry: 0, blocks: vec![block] }] }
}

// IR for `return 10 / 3;` after the front end materialized the left side.
fn div_ir(opcode: ir::Opcode) -> ir::Program {
    use ir::{BasicBlock, Cfg, Instruction as I, Opcode as Op, Operand as O, Temp};
    let mut block = BasicBlock::new(0);
    block.insts = vec![
        I::new(Op::Store, vec![O::Imm(10)], Some(Temp(0))),
        I::new(opcode, vec![O::Temp(Temp(0)), O::Imm(3)], Some(Temp(1))),
        I::new(Op::Ret, vec![O::Temp(Temp(1))], None),
    ];
    ir::Program { cfgs: vec![Cfg { entry: 0, blocks: vec![block] }] }
}

#[test]
fn store_lowers_to_a_single_move() {
    let mir = codegen::generate(&sub_add_ir()).unwrap();
    let opcodes: Vec<Opcode> = mir.functions[0].instructions().map(|i| i.opcode).collect();
    assert_eq!(
        opcodes,
        vec![
            Opcode::DefLabel,
            Opcode::MovRi,
            Opcode::MovRr,
            Opcode::SubRi,
            Opcode::MovRr,
            Opcode::MovRr,
            Opcode::AddRr,
            Opcode::MovRr,
            Opcode::Ret,
        ]
    );
}

#[test]
fn division_pins_eax_and_edx_in_the_implicit_sets() {
    let mir = codegen::generate(&div_ir(ir::Opcode::Div)).unwrap();
    let div = mir.functions[0]
        .instructions()
        .find(|i| i.opcode == Opcode::DivRr)
        .expect("no DIV_RR emitted");
    assert_eq!(div.implicit_defs, vec![pr(PhysReg::Eax), pr(PhysReg::Edx)]);
    assert_eq!(div.implicit_uses, vec![pr(PhysReg::Eax), pr(PhysReg::Edx)]);

    // Dividend moves into eax first, result moves out of eax.
    let moves: Vec<&Instruction> = mir.functions[0]
        .instructions()
        .filter(|i| i.opcode == Opcode::MovRr)
        .collect();
    assert!(moves.iter().any(|m| m.outs == vec![pr(PhysReg::Eax)]));
    assert!(moves.iter().any(|m| m.ins == vec![pr(PhysReg::Eax)]));
}

#[test]
fn modulo_reads_the_remainder_from_edx() {
    let mir = codegen::generate(&div_ir(ir::Opcode::Mod)).unwrap();
    let stream: Vec<&Instruction> = mir.functions[0].instructions().collect();
    let pos = stream.iter().position(|i| i.opcode == Opcode::ModRr).unwrap();
    assert_eq!(stream[pos + 1].opcode, Opcode::MovRr);
    assert_eq!(stream[pos + 1].ins, vec![pr(PhysReg::Edx)]);
}

#[test]
fn comparisons_branch_to_the_true_successor() {
    use ir::{BasicBlock, Cfg, Instruction as I, Opcode as Op, Operand as O, Temp};
    let mut cond = BasicBlock::new(0);
    cond.insts = vec![
        I::new(Op::Store, vec![O::Imm(1)], Some(Temp(0))),
        I::new(Op::Lt, vec![O::Temp(Temp(0)), O::Imm(5)], Some(Temp(1))),
    ];
    cond.succ_true = Some(2);
    cond.succ_false = Some(1);
    let mut ff = BasicBlock::new(1);
    ff.insts = vec![I::new(Op::Ret, vec![O::Imm(0)], None)];
    let mut tt = BasicBlock::new(2);
    tt.insts = vec![I::new(Op::Ret, vec![O::Imm(1)], None)];
    let program = ir::Program { cfgs: vec![Cfg { entry: 0, blocks: vec![cond, ff, tt] }] };

    let mir = codegen::generate(&program).unwrap();
    let blocks = &mir.functions[0].blocks;
    // False successor is laid out right after the comparison block.
    assert_eq!(blocks.iter().map(|b| b.id).collect::<Vec<_>>(), vec![0, 1, 2]);
    let jl = mir.functions[0]
        .instructions()
        .find(|i| i.opcode == Opcode::Jl)
        .expect("no JL emitted");
    assert_eq!(jl.ins, vec![Operand::Imm(2)]);
}

#[test]
fn unsupported_comparison_is_an_internal_error() {
    use ir::{BasicBlock, Cfg, Instruction as I, Opcode as Op, Operand as O, Temp};
    let mut block = BasicBlock::new(0);
    block.insts = vec![I::new(Op::Eq, vec![O::Temp(Temp(0)), O::Imm(1)], Some(Temp(1)))];
    block.succ_true = Some(0);
    let program = ir::Program { cfgs: vec![Cfg { entry: 0, blocks: vec![block] }] };
    assert_eq!(
        codegen::generate(&program).unwrap_err(),
        codegen::LoweringError::Unsupported(Op::Eq)
    );
}

// Recompute the backward dataflow equation independently and compare.
#[test]
fn liveness_satisfies_the_dataflow_equation() {
    let mir = codegen::generate(&sub_add_ir()).unwrap();
    let mut rmap = RegisterMap::new();
    let result = liveness::analyze(&mir, &mut rmap);
    let lines = result.live_in(0);
    let stream: Vec<&Instruction> = mir.functions[0].instructions().collect();
    assert_eq!(lines.len(), stream.len());

    for (pos, inst) in stream.iter().enumerate() {
        let uses: Set<usize> = inst.reg_reads().iter().map(|r| rmap.from_reg(*r)).collect();
        let defs: Set<usize> = inst.reg_writes().iter().map(|r| rmap.from_reg(*r)).collect();
        let out: Set<usize> = match lines.get(pos + 1) {
            Some(next) => next.iter().collect(),
            None => Set::new(),
        };
        let expected: Set<usize> = uses.union(&out.difference(&defs).copied().collect()).copied().collect();
        let actual: Set<usize> = lines[pos].iter().collect();
        assert_eq!(actual, expected, "live-in mismatch at position {pos}");
    }
}

#[test]
fn return_value_is_live_into_the_terminator() {
    let mir = codegen::generate(&sub_add_ir()).unwrap();
    let mut rmap = RegisterMap::new();
    let result = liveness::analyze(&mir, &mut rmap);
    let lines = result.live_in(0);
    let eax = rmap.from_physical(PhysReg::Eax);
    let last = lines.last().unwrap();
    assert_eq!(last.iter().collect::<Vec<_>>(), vec![eax]);
}

#[test]
fn variables_live_across_the_subtraction_interfere() {
    let mir = codegen::generate(&sub_add_ir()).unwrap();
    let mut rmap = RegisterMap::new();
    let result = liveness::analyze(&mir, &mut rmap);
    let graph = interference::build(&mir, &result, &mut rmap);
    let a = rmap.from_virtual(VReg(0));
    let b = rmap.from_virtual(VReg(1));
    assert!(graph.has_edge(a, b), "a and b are simultaneously live");
}

// Every pair simultaneously live somewhere must be an edge.
#[test]
fn interference_covers_all_simultaneously_live_pairs() {
    let mir = codegen::generate(&div_ir(ir::Opcode::Div)).unwrap();
    let mut rmap = RegisterMap::new();
    let result = liveness::analyze(&mir, &mut rmap);
    let graph = interference::build(&mir, &result, &mut rmap);
    for line in result.live_in(0) {
        let members: Vec<usize> = line.iter().collect();
        for (i, u) in members.iter().enumerate() {
            for v in &members[i + 1..] {
                assert!(graph.has_edge(*u, *v), "missing edge ({u}, {v})");
            }
        }
    }
}

#[test]
fn division_result_interferes_with_both_fixed_registers() {
    let mir = codegen::generate(&div_ir(ir::Opcode::Div)).unwrap();
    let mut rmap = RegisterMap::new();
    let result = liveness::analyze(&mir, &mut rmap);
    let graph = interference::build(&mir, &result, &mut rmap);
    let res = rmap.from_virtual(VReg(1));
    let eax = rmap.from_physical(PhysReg::Eax);
    let edx = rmap.from_physical(PhysReg::Edx);
    assert!(graph.has_edge(res, eax));
    assert!(graph.has_edge(res, edx));
}

#[test]
fn mcs_orders_a_chordal_graph_deterministically() {
    // A triangle with a pendant vertex; any simplicial elimination ordering
    // must keep the triangle contiguous ahead of the pendant's turn.
    let mut graph = AdjacencyList::new(4);
    graph.add_clique(&[0, 1, 2]);
    graph.add_edge(2, 3);
    let first = regalloc::simplicial_elimination_order(&graph, &[]);
    let second = regalloc::simplicial_elimination_order(&graph, &[]);
    assert_eq!(first, second);
    assert_eq!(first.len(), 4);
    assert_eq!(first[0], 0, "ties break toward the smallest id");
}

#[test]
fn precolored_vertices_are_excluded_but_push_weight() {
    let mut graph = AdjacencyList::new(3);
    graph.add_clique(&[0, 1, 2]);
    let ordering = regalloc::simplicial_elimination_order(&graph, &[(1, 0)]);
    assert!(!ordering.contains(&1));
    assert_eq!(ordering.len(), 2);
}

#[test]
fn greedy_coloring_respects_every_edge() {
    let mut graph = AdjacencyList::new(5);
    graph.add_clique(&[0, 1, 2]);
    graph.add_edge(2, 3);
    graph.add_edge(3, 4);
    let ordering = regalloc::simplicial_elimination_order(&graph, &[]);
    let mut colors = Map::new();
    regalloc::greedy_coloring(&graph, &ordering, &mut colors);
    for u in 0..graph.len() {
        for v in 0..graph.len() {
            if graph.has_edge(u, v) {
                assert_ne!(colors[&u], colors[&v]);
            }
        }
    }
    // Chordal bound: the clique number is 3, so 3 colors suffice.
    assert!(colors.values().all(|c| *c < 3));
}

#[test]
fn allocation_replaces_every_virtual_operand() {
    let mut mir = codegen::generate(&sub_add_ir()).unwrap();
    let mut rmap = RegisterMap::new();
    let result = liveness::analyze(&mir, &mut rmap);
    let graph = interference::build(&mir, &result, &mut rmap);
    let allocation = regalloc::allocate(&mut mir, &graph, &rmap).unwrap();

    for inst in mir.functions[0].instructions() {
        for operand in inst.ins.iter().chain(&inst.outs) {
            assert!(!matches!(operand, Operand::Virtual(_)), "unallocated {operand} in {inst}");
        }
    }
    // Precolored vertices keep their seeded colors.
    for (id, reg) in rmap.physical_live_ids() {
        assert_eq!(allocation.colors[&id], x86::color_of(reg).unwrap());
    }
}

#[test]
fn coloring_is_proper_on_the_generated_graph() {
    let mut mir = codegen::generate(&div_ir(ir::Opcode::Div)).unwrap();
    let mut rmap = RegisterMap::new();
    let result = liveness::analyze(&mir, &mut rmap);
    let graph = interference::build(&mir, &result, &mut rmap);
    let allocation = regalloc::allocate(&mut mir, &graph, &rmap).unwrap();
    for u in 0..graph.len() {
        for v in 0..graph.len() {
            if graph.has_edge(u, v) {
                assert_ne!(allocation.colors[&u], allocation.colors[&v]);
            }
        }
    }
}

#[test]
fn too_much_register_pressure_fails_allocation() {
    // A clique one larger than the register file cannot be colored.
    let n = x86::ALLOCATABLE.len() + 1;
    let mut rmap = RegisterMap::new();
    let ids: Vec<usize> = (0..n).map(|v| rmap.from_virtual(VReg(v))).collect();
    let mut graph = AdjacencyList::new(rmap.len());
    graph.add_clique(&ids);
    let mut program = Program::default();
    let err = regalloc::allocate(&mut program, &graph, &rmap).unwrap_err();
    assert!(matches!(err, regalloc::AllocError::RegisterPressure { available: 14, .. }));
}

#[test]
fn peephole_erases_same_register_moves() {
    let mut program = function_of(vec![
        Instruction::def_label(0),
        Instruction::mov_rr(pr(PhysReg::Eax), pr(PhysReg::Eax)),
        Instruction::ret(),
    ]);
    peephole::run(&mut program);
    let opcodes: Vec<Opcode> = program.functions[0].instructions().map(|i| i.opcode).collect();
    assert_eq!(opcodes, vec![Opcode::DefLabel, Opcode::Ret]);
}

#[test]
fn peephole_fuses_immediate_stores() {
    let slot = Operand::Slot(StackSlot { base: PhysReg::Ebp, offset: -8 });
    let mut program = function_of(vec![
        Instruction::mov_ri(42, pr(PhysReg::Ecx)),
        Instruction::store_mem_reg(slot, pr(PhysReg::Ecx)),
        Instruction::ret(),
    ]);
    peephole::run(&mut program);
    let stream: Vec<&Instruction> = program.functions[0].instructions().collect();
    assert_eq!(stream.len(), 2);
    assert_eq!(stream[0].opcode, Opcode::StoreMemImm);
    assert_eq!(stream[0].ins, vec![Operand::Imm(42)]);
    assert_eq!(stream[0].outs, vec![slot]);
}

#[test]
fn store_fusion_keeps_registers_that_are_read_later() {
    let slot = Operand::Slot(StackSlot { base: PhysReg::Ebp, offset: -8 });
    let mut program = function_of(vec![
        Instruction::mov_ri(42, pr(PhysReg::Ecx)),
        Instruction::store_mem_reg(slot, pr(PhysReg::Ecx)),
        Instruction::mov_rr(pr(PhysReg::Ecx), pr(PhysReg::Eax)),
        Instruction::ret(),
    ]);
    peephole::run(&mut program);
    let opcodes: Vec<Opcode> = program.functions[0].instructions().map(|i| i.opcode).collect();
    assert!(opcodes.contains(&Opcode::MovRi), "fusion must not kill a live value");
}

#[test]
fn store_then_matching_load_collapses() {
    let slot = Operand::Slot(StackSlot { base: PhysReg::Ebp, offset: -16 });
    let mut program = function_of(vec![
        Instruction::store_mem_reg(slot, pr(PhysReg::Ecx)),
        Instruction::load_reg_mem(slot, pr(PhysReg::Ecx)),
        Instruction::ret(),
    ]);
    peephole::run(&mut program);
    let opcodes: Vec<Opcode> = program.functions[0].instructions().map(|i| i.opcode).collect();
    // The reload of the just-stored value disappears entirely.
    assert_eq!(opcodes, vec![Opcode::StoreMemReg, Opcode::Ret]);
}

#[test]
fn store_then_load_into_another_register_becomes_a_move() {
    let slot = Operand::Slot(StackSlot { base: PhysReg::Ebp, offset: -16 });
    let mut program = function_of(vec![
        Instruction::store_mem_reg(slot, pr(PhysReg::Ecx)),
        Instruction::load_reg_mem(slot, pr(PhysReg::Esi)),
        Instruction::ret(),
    ]);
    peephole::run(&mut program);
    let stream: Vec<&Instruction> = program.functions[0].instructions().collect();
    assert_eq!(stream[1].opcode, Opcode::MovRr);
    assert_eq!(stream[1].ins, vec![pr(PhysReg::Ecx)]);
    assert_eq!(stream[1].outs, vec![pr(PhysReg::Esi)]);
}

#[test]
fn peephole_never_increases_instruction_count() {
    let slot = Operand::Slot(StackSlot { base: PhysReg::Ebp, offset: -8 });
    let mut program = function_of(vec![
        Instruction::mov_ri(1, pr(PhysReg::Ecx)),
        Instruction::store_mem_reg(slot, pr(PhysReg::Ecx)),
        Instruction::load_reg_mem(slot, pr(PhysReg::Edi)),
        Instruction::mov_rr(pr(PhysReg::Edi), pr(PhysReg::Edi)),
        Instruction::ret(),
    ]);
    let before = program.functions[0].instruction_count();
    peephole::run(&mut program);
    let after = program.functions[0].instruction_count();
    assert!(after <= before);
    // Idempotent at the fixed point.
    peephole::run(&mut program);
    assert_eq!(program.functions[0].instruction_count(), after);
}

#[test]
fn emitter_prints_the_fixed_prologue_and_labels() {
    let program = function_of(vec![
        Instruction::def_label(0),
        Instruction::mov_ri(0, pr(PhysReg::Eax)),
        Instruction::ret(),
    ]);
    let asm = emit::emit(&program).unwrap();
    for line in [
        ".intel_syntax noprefix",
        ".global main",
        ".global _main",
        "main:",
        "call _main",
        "mov\trdi, rax",
        "mov\trax, 0x3C",
        "syscall",
        "_main:",
        ".L0:",
        "mov\teax, 0",
        "ret",
    ] {
        assert!(asm.contains(line), "missing line {line:?} in:\n{asm}");
    }
    // Exactly one definition per label.
    assert_eq!(asm.matches(".L0:").count(), 1);
}

#[test]
fn division_emits_the_sign_extension() {
    let program = function_of(vec![
        Instruction::mov_ri(10, pr(PhysReg::Eax)),
        Instruction::mov_ri(3, pr(PhysReg::Ebx)),
        Instruction::div_rr(pr(PhysReg::Ebx)),
        Instruction::ret(),
    ]);
    let asm = emit::emit(&program).unwrap();
    let cdq = asm.find("cdq").unwrap();
    let idiv = asm.find("idiv\tebx").unwrap();
    assert!(cdq < idiv);
}

#[test]
fn emitting_an_unallocated_operand_is_an_internal_error() {
    let program = function_of(vec![Instruction::mov_rr(vr(0), pr(PhysReg::Eax))]);
    let err = emit::emit(&program).unwrap_err();
    assert!(matches!(err, emit::EmitError::Operand { opcode: Opcode::MovRr, .. }));
}

#[test]
fn memory_operands_render_with_signed_offsets() {
    let negative = Operand::Slot(StackSlot { base: PhysReg::Ebp, offset: -8 });
    let positive = Operand::Mem(super::mir::MemoryAccess { base: PhysReg::Esp, offset: 16 });
    let program = function_of(vec![
        Instruction::store_mem_imm(negative, 1),
        Instruction::load_reg_mem(positive, pr(PhysReg::Eax)),
        Instruction::ret(),
    ]);
    let asm = emit::emit(&program).unwrap();
    assert!(asm.contains("mov\tDWORD PTR [ebp-8], 1"));
    assert!(asm.contains("mov\teax, DWORD PTR [esp+16]"));
}

#[test]
fn reads_include_memory_base_registers() {
    let slot = Operand::Slot(StackSlot { base: PhysReg::Ebp, offset: -8 });
    let store = Instruction::store_mem_reg(slot, pr(PhysReg::Ecx));
    let reads: Vec<Reg> = store.reg_reads();
    assert!(reads.contains(&Reg::Physical(PhysReg::Ecx)));
    assert!(reads.contains(&Reg::Physical(PhysReg::Ebp)), "a store still reads its base");
    assert!(store.reg_writes().is_empty());
}
