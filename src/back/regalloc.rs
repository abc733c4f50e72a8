//! Graph-coloring register allocation.
//!
//! Two stages over the interference graph: maximum cardinality search
//! produces a simplicial elimination ordering (exact for chordal graphs,
//! which straight-line liveness produces), then greedy coloring walks that
//! ordering and takes the smallest free color per vertex.  Physical
//! registers enter as precolored vertices: they are preprocessed out of the
//! search but still bump their neighbors' weights, and their colors seed the
//! coloring.  There is no spilling; running out of colors is a user-visible
//! error.

use thiserror::Error;
use tracing::debug;

use crate::common::bitset::{AdjacencyList, BitSet};
use crate::common::{Map, Set};

use super::mir::{Operand, Program};
use super::regmap::RegisterMap;
use super::x86;
use super::x86::PhysReg;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AllocError {
    #[error(
        "program needs {required} registers but the target provides only {available}; \
         the input is too register-pressured"
    )]
    RegisterPressure { required: usize, available: usize },
    #[error("internal compiler error: reserved register {0} entered allocation")]
    Reserved(PhysReg),
}

/// The allocator's output, kept around for tests and dumps.  The MIR itself
/// is rewritten in place.
#[derive(Debug)]
pub struct Allocation {
    /// Simplicial elimination ordering, as produced.
    pub ordering: Vec<usize>,
    /// Live id to color.
    pub colors: Map<usize, usize>,
    /// Virtual numeral to assigned register.
    pub assignment: Map<usize, PhysReg>,
}

pub fn allocate(
    program: &mut Program,
    graph: &AdjacencyList,
    rmap: &RegisterMap,
) -> Result<Allocation, AllocError> {
    let mut precolored = Vec::new();
    for (id, reg) in rmap.physical_live_ids() {
        let color = x86::color_of(reg).ok_or(AllocError::Reserved(reg))?;
        precolored.push((id, color));
    }

    let ordering = simplicial_elimination_order(graph, &precolored);
    let mut colors: Map<usize, usize> = precolored.iter().copied().collect();
    greedy_coloring(graph, &ordering, &mut colors);

    let available = x86::ALLOCATABLE.len();
    let mut assignment = Map::new();
    for (id, color) in &colors {
        let reg = x86::register_for_color(*color).ok_or_else(|| {
            let required = colors.values().copied().max().unwrap_or(0) + 1;
            AllocError::RegisterPressure { required, available }
        })?;
        if let Some(vreg) = rmap.virtual_from_live(*id) {
            assignment.insert(vreg.0, reg);
        }
    }

    debug!(
        ordering = ?ordering.iter().map(|id| rmap.display_live(*id)).collect::<Vec<_>>(),
        "elimination ordering"
    );
    for (numeral, reg) in &assignment {
        debug!("vreg{numeral} -> {reg}");
    }

    apply(program, &assignment);
    Ok(Allocation { ordering, colors, assignment })
}

/// Maximum cardinality search.  Precolored vertices are removed up front but
/// first push weight onto their unordered neighbors; afterwards the vertex
/// with the greatest weight is appended until none remain.  Ties break to
/// the smallest id so the ordering is deterministic.
pub fn simplicial_elimination_order(
    graph: &AdjacencyList,
    precolored: &[(usize, usize)],
) -> Vec<usize> {
    let n = graph.len();
    let mut weight = vec![0usize; n];
    let mut unordered = BitSet::filled(n);

    for (vertex, _) in precolored {
        for neighbor in graph.neighbors(*vertex) {
            if unordered.test(neighbor) {
                weight[neighbor] += 1;
            }
        }
        unordered.reset(*vertex);
    }

    let mut ordering = Vec::with_capacity(n.saturating_sub(precolored.len()));
    loop {
        let mut best: Option<usize> = None;
        for vertex in unordered.iter() {
            match best {
                Some(current) if weight[vertex] <= weight[current] => {}
                _ => best = Some(vertex),
            }
        }
        let Some(vertex) = best else { break };

        ordering.push(vertex);
        for neighbor in graph.neighbors(vertex) {
            if unordered.test(neighbor) {
                weight[neighbor] += 1;
            }
        }
        unordered.reset(vertex);
    }
    ordering
}

/// Walk `ordering` and give each vertex the smallest color its neighbors
/// have not taken.  `colors` arrives seeded with the precolored vertices.
pub fn greedy_coloring(
    graph: &AdjacencyList,
    ordering: &[usize],
    colors: &mut Map<usize, usize>,
) {
    for vertex in ordering {
        let taken: Set<usize> = graph
            .neighbors(*vertex)
            .iter()
            .filter_map(|neighbor| colors.get(&neighbor).copied())
            .collect();
        let mut color = 0;
        while taken.contains(&color) {
            color += 1;
        }
        colors.insert(*vertex, color);
    }
}

// Substitute assigned registers for virtual operands everywhere.
fn apply(program: &mut Program, assignment: &Map<usize, PhysReg>) {
    for function in &mut program.functions {
        for inst in function.instructions_mut() {
            for operand in inst.operands_mut() {
                if let Operand::Virtual(vreg) = operand {
                    if let Some(reg) = assignment.get(&vreg.0) {
                        *operand = Operand::Physical(*reg);
                    }
                }
            }
        }
    }
}
