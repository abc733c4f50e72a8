//! The compilation pipeline.
//!
//! A compilation is a pure function from source text to assembly: parse,
//! analyze, lower to IR, lower to MIR, liveness, interference, coloring,
//! peephole, emit.  Semantic errors accumulate in the diagnostics collector
//! so the user sees the whole batch; internal errors abort the pipeline at
//! the failing stage.

use thiserror::Error;
use tracing::debug;

use crate::back;
use crate::back::regmap::RegisterMap;
use crate::common::arena::Arena;
use crate::diag::{Diagnostics, SourceManager};
use crate::front;
use crate::middle::ir;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error(transparent)]
    Parse(#[from] front::parse::ParseError),
    #[error("{0} semantic error(s); see diagnostics")]
    Semantic(usize),
    #[error(transparent)]
    Lowering(#[from] back::codegen::LoweringError),
    #[error(transparent)]
    Alloc(#[from] back::regalloc::AllocError),
    #[error(transparent)]
    Emit(#[from] back::emit::EmitError),
}

/// Everything after the front end, exposed separately so tools can feed a
/// hand-built IR through the back end.
pub fn compile_ir(ir: &ir::Program, optimize: bool) -> Result<String, CompileError> {
    let mut mir = back::codegen::generate(ir)?;
    debug!("mir:\n{mir}");

    let mut rmap = RegisterMap::new();
    let liveness = back::liveness::analyze(&mir, &mut rmap);
    let graph = back::interference::build(&mir, &liveness, &mut rmap);
    back::regalloc::allocate(&mut mir, &graph, &rmap)?;
    if optimize {
        back::peephole::run(&mut mir);
    }
    Ok(back::emit::emit(&mir)?)
}

/// Compile `source` to assembly text, appending any diagnostics to `diags`.
pub fn compile(
    source: &str,
    sources: &SourceManager,
    optimize: bool,
    diags: &mut Diagnostics,
) -> Result<String, CompileError> {
    let arena = Arena::new();
    let ast = front::parse(&arena, sources.file(), source)?;
    front::analyze(&ast, sources, diags);
    if diags.has_errors() {
        return Err(CompileError::Semantic(diags.error_count()));
    }
    let ir = front::lower(&ast);
    debug!("ir:\n{ir}");
    compile_ir(&ir, optimize)
}
