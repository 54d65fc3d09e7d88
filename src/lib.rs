//! The crate cross-compiles a small HLSL-like shading language to HLSL, Metal Shading Language and SPIR-V.
//!
//! Compilation runs as a straight pipeline, each stage consuming the previous one's output:
//! - [frontend] lexes and parses source text into an [frontend::ast::Program]
//! - [sema] resolves names and types and validates entry points, producing a [sema::TypedModule]
//! - [ir] lowers that into a control-flow graph of basic blocks shared by all targets
//! - [back] writes the graph out as [back::hlsl], [back::msl] or [back::spirv]
//!
//! The first error in any stage stops compilation. [validate] and the `compile_to_*` functions collapse that
//! into `bool`/[Option]; [compile] and friends keep the [CompileError] for diagnostics.
//! No stage holds global mutable state, so independent sources may be compiled from any number of threads.

#[macro_use]
extern crate num_derive;

pub mod back;
pub mod frontend;
pub mod ir;
pub mod sema;
pub mod types;

use log::debug;
use thiserror::Error;

use back::EmitError;
use frontend::FrontendError;
use ir::LoweringError;
use sema::{SemanticError, TypedModule};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error(transparent)]
    Frontend(#[from] FrontendError),
    #[error("semantic error: {0}")]
    Semantic(#[from] SemanticError),
    #[error(transparent)]
    Lowering(#[from] LoweringError),
    #[error("emit error: {0}")]
    Emit(#[from] EmitError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Hlsl,
    Msl,
    SpirV,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    Text(String),
    Binary(Vec<u32>),
}

/// Parse and analyze `source`
pub fn analyze_source(source: &str) -> Result<TypedModule, CompileError> {
    let program = frontend::parse_source(source)?;
    debug!("parsed {} declarations", program.items.len());
    Ok(sema::analyze(&program)?)
}

/// Parse, analyze and lower `source` to the shared IR
pub fn lower_source(source: &str) -> Result<ir::Module, CompileError> {
    let module = analyze_source(source)?;
    Ok(ir::lower(&module)?)
}

pub fn compile(source: &str, target: Target) -> Result<Artifact, CompileError> {
    let result = lower_source(source).and_then(|module| {
        Ok(match target {
            Target::Hlsl => Artifact::Text(back::hlsl::emit(&module)?),
            Target::Msl => Artifact::Text(back::msl::emit(&module)?),
            Target::SpirV => Artifact::Binary(back::spirv::emit(&module)?),
        })
    });
    if let Err(e) = &result {
        debug!("compiling for {:?} failed: {}", target, e);
    }
    result
}

/// Whether `source` passes every front-end and semantic check
pub fn validate(source: &str) -> bool {
    match analyze_source(source) {
        Ok(_) => true,
        Err(e) => {
            debug!("validation failed: {}", e);
            false
        }
    }
}

pub fn compile_to_hlsl(source: &str) -> Option<String> {
    match compile(source, Target::Hlsl).ok()? {
        Artifact::Text(text) => Some(text),
        Artifact::Binary(_) => None,
    }
}

pub fn compile_to_msl(source: &str) -> Option<String> {
    match compile(source, Target::Msl).ok()? {
        Artifact::Text(text) => Some(text),
        Artifact::Binary(_) => None,
    }
}

/// SPIR-V 1.3 words, header first
pub fn compile_to_spirv(source: &str) -> Option<Vec<u32>> {
    match compile(source, Target::SpirV).ok()? {
        Artifact::Binary(words) => Some(words),
        Artifact::Text(_) => None,
    }
}
