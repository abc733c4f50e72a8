//! Liveness analysis over the linearized instruction stream.
//!
//! One backward pass per function: `live_in = uses ∪ (live_out \ defs)`,
//! where `live_out` of an instruction is the `live_in` of its successor in
//! the linearization (the empty set at the function exit).  A single pass is
//! exact for the acyclic fall-through layout the generator produces; loop
//! liveness is approximate until full-graph iteration lands.

use tracing::debug;

use crate::common::bitset::BitSet;
use crate::common::Map;

use super::mir::{Function, Program};
use super::regmap::RegisterMap;

/// Per function id, the live-in set for each position of its instruction
/// stream.
pub struct Liveness {
    per_function: Map<usize, Vec<BitSet>>,
}

impl Liveness {
    pub fn live_in(&self, function: usize) -> &[BitSet] {
        self.per_function
            .get(&function)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Human-readable dump for pass tracing.
    pub fn dump(&self, rmap: &RegisterMap) -> String {
        let mut out = String::new();
        for (function, lines) in &self.per_function {
            out.push_str(&format!("function {function}:\n"));
            for (index, line) in lines.iter().enumerate() {
                let names: Vec<String> = line.iter().map(|id| rmap.display_live(id)).collect();
                out.push_str(&format!("  line {}: {{{}}}\n", index + 1, names.join(", ")));
            }
        }
        out
    }
}

/// Analyse every function of `program`.  All register operands are entered
/// into `rmap` first so the bitsets share one dense id space.
pub fn analyze(program: &Program, rmap: &mut RegisterMap) -> Liveness {
    for function in &program.functions {
        for inst in function.instructions() {
            for reg in inst.reg_reads().into_iter().chain(inst.reg_writes()) {
                rmap.from_reg(reg);
            }
        }
    }

    let mut per_function = Map::new();
    for function in &program.functions {
        per_function.insert(function.id, analyze_function(function, rmap));
    }

    let liveness = Liveness { per_function };
    debug!("liveness:\n{}", liveness.dump(rmap));
    liveness
}

fn analyze_function(function: &Function, rmap: &mut RegisterMap) -> Vec<BitSet> {
    let width = rmap.len();
    let stream: Vec<_> = function.instructions().collect();

    // Live-out of the last instruction is empty; everything the calling
    // convention consumes is an explicit implicit-use (RET reads eax).
    let mut prev_line = BitSet::new(width);
    let mut lines = Vec::with_capacity(stream.len());

    for inst in stream.into_iter().rev() {
        let mut live = BitSet::new(width);
        for reg in inst.reg_reads() {
            live.set(rmap.from_reg(reg));
        }
        let mut carried = prev_line.clone();
        for reg in inst.reg_writes() {
            carried.reset(rmap.from_reg(reg));
        }
        live |= &carried;
        lines.push(live.clone());
        prev_line = live;
    }

    lines.reverse();
    lines
}
