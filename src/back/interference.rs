//! Interference-graph construction.
//!
//! Walk the linearized stream in parallel with the recorded live-in sets.
//! Everything simultaneously live forms a clique; implicit defs additionally
//! interfere with everything live at their instruction, because the clobber
//! happens whether or not the value is consumed.

use crate::common::bitset::AdjacencyList;

use super::liveness::Liveness;
use super::mir::Program;
use super::regmap::RegisterMap;

pub fn build(program: &Program, liveness: &Liveness, rmap: &mut RegisterMap) -> AdjacencyList {
    let mut graph = AdjacencyList::new(rmap.len());

    for function in &program.functions {
        let lines = liveness.live_in(function.id);
        for (inst, line) in function.instructions().zip(lines) {
            let members: Vec<usize> = line.iter().collect();
            graph.add_clique(&members);

            for reg in inst.implicit_defs.iter().filter_map(|op| op.as_reg()) {
                let id = rmap.from_reg(reg);
                for member in &members {
                    graph.add_edge(id, *member);
                }
            }
        }
    }

    graph
}
