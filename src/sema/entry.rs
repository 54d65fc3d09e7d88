//! Stage restrictions and entry-point interface validation.

use std::collections::HashSet;

use crate::{
    frontend::{ast, Position},
    types::{ScalarKind, Type},
};

use super::{
    classify_semantic,
    error::{bail, SemaResult},
    tast::{Builtin, EntryPoint, Function, FunctionId, InterfaceVar, IoBinding, IoSource, Stage},
    Analyzer, SemanticClass,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Input,
    Output,
}

/// An interface value before locations are assigned
struct Candidate {
    name: String,
    ty: Type,
    class: Option<SemanticClass>,
    semantic: Option<String>,
    source: IoSource,
}

/// Builtins a stage may read or write, with the type each must have
fn builtin_type(stage: Stage, direction: Direction, builtin: Builtin) -> Option<&'static [Type]> {
    use Builtin::*;
    const FLOAT4: &[Type] = &[Type::Vector(ScalarKind::Float, 4)];
    const FLOAT: &[Type] = &[Type::Scalar(ScalarKind::Float)];
    const BOOL: &[Type] = &[Type::Scalar(ScalarKind::Bool)];
    const INDEX: &[Type] = &[Type::Scalar(ScalarKind::Uint), Type::Scalar(ScalarKind::Int)];
    const UINT: &[Type] = &[Type::Scalar(ScalarKind::Uint)];
    const UINT3: &[Type] = &[Type::Vector(ScalarKind::Uint, 3)];

    match (stage, direction, builtin) {
        (Stage::Vertex, Direction::Input, VertexIndex | InstanceIndex) => Some(INDEX),
        (Stage::Vertex, Direction::Output, Position) => Some(FLOAT4),
        (Stage::Fragment, Direction::Input, Position) => Some(FLOAT4),
        (Stage::Fragment, Direction::Input, FrontFacing) => Some(BOOL),
        (Stage::Fragment, Direction::Output, FragDepth) => Some(FLOAT),
        (Stage::Compute, Direction::Input, GlobalInvocationId | WorkgroupId | LocalInvocationId) => Some(UINT3),
        (Stage::Compute, Direction::Input, LocalInvocationIndex) => Some(UINT),
        _ => None,
    }
}

impl<'p> Analyzer<'p> {
    /// `discard` and implicit-LOD sampling need derivatives or fragment kill, so nothing reachable from a vertex or
    /// compute entry point may use them.
    pub(super) fn check_stage_restrictions(&self) -> SemaResult<()> {
        let stages = self.reaching_stages();
        for (index, facts) in self.facts.iter().enumerate() {
            let Some(other) = stages[index].iter().find(|s| **s != Stage::Fragment) else {
                continue;
            };
            if let Some(position) = facts.discard {
                bail!(
                    DiscardOutsideFragment,
                    position,
                    "discard in '{}' is reachable from a {} entry point",
                    self.signatures[index].name,
                    other.name()
                );
            }
            if let Some(position) = facts.implicit_lod {
                bail!(
                    ImplicitLodOutsideFragment,
                    position,
                    "Sample in '{}' is reachable from a {} entry point, use SampleLevel",
                    self.signatures[index].name,
                    other.name()
                );
            }
        }
        Ok(())
    }

    pub(super) fn check_entry_points(&self, functions: &[Function]) -> SemaResult<Vec<EntryPoint>> {
        let mut entry_points: Vec<EntryPoint> = vec![];
        for (index, function) in functions.iter().enumerate() {
            let signature = &self.signatures[index];
            let Some(stage) = function.stage else {
                if signature.numthreads.is_some() {
                    bail!(
                        InvalidEntryPoint,
                        function.position,
                        "[numthreads] on '{}', which is not a compute entry point",
                        function.name
                    );
                }
                continue;
            };
            if let Some(existing) = entry_points.iter().find(|e| e.stage == stage) {
                bail!(
                    InvalidEntryPoint,
                    function.position,
                    "'{}' is a second {} entry point after '{}'",
                    function.name,
                    stage.name(),
                    existing.name
                );
            }
            entry_points.push(self.check_entry_point(FunctionId(index), function, stage)?);
        }
        if entry_points.is_empty() {
            bail!(
                InvalidEntryPoint,
                Position::start(),
                "no entry point, mark a function [vertex], [fragment] or [compute]"
            );
        }
        Ok(entry_points)
    }

    fn check_entry_point(&self, id: FunctionId, function: &Function, stage: Stage) -> SemaResult<EntryPoint> {
        let position = function.position;
        let numthreads = self.signatures[id.0].numthreads;
        let workgroup_size = match (stage, numthreads) {
            (Stage::Compute, Some(size)) => size,
            (Stage::Compute, None) => bail!(
                InvalidEntryPoint,
                position,
                "compute entry point '{}' needs [numthreads(x, y, z)]",
                function.name
            ),
            (_, Some(_)) => bail!(
                InvalidEntryPoint,
                position,
                "[numthreads] is only valid on compute entry points"
            ),
            (_, None) => [1, 1, 1],
        };
        match (stage, function.return_type.is_void()) {
            (Stage::Compute, false) => bail!(
                InvalidEntryPoint,
                position,
                "compute entry point '{}' must return void",
                function.name
            ),
            (Stage::Vertex | Stage::Fragment, true) => bail!(
                InvalidEntryPoint,
                position,
                "{} entry point '{}' must return a value",
                stage.name(),
                function.name
            ),
            _ => {}
        }

        let mut inputs = vec![];
        for (index, param) in function.params.iter().enumerate() {
            self.expand(
                &mut inputs,
                &param.name,
                &param.ty,
                param.semantic.as_deref(),
                IoSource::Param(index),
                |member| IoSource::ParamMember { param: index, member },
                position,
            )?;
        }
        let mut outputs = vec![];
        if !function.return_type.is_void() {
            self.expand(
                &mut outputs,
                "value",
                &function.return_type,
                function.return_semantic.as_deref(),
                IoSource::Return,
                IoSource::ReturnMember,
                position,
            )?;
        }

        let inputs = self.assign_bindings(stage, Direction::Input, inputs, position)?;
        let outputs = self.assign_bindings(stage, Direction::Output, outputs, position)?;
        Ok(EntryPoint {
            name: function.name.clone(),
            stage,
            function: id,
            workgroup_size,
            inputs,
            outputs,
        })
    }

    /// A struct parameter or return value contributes one interface value per member
    #[allow(clippy::too_many_arguments)]
    fn expand(
        &self,
        candidates: &mut Vec<Candidate>,
        name: &str,
        ty: &Type,
        semantic: Option<&str>,
        whole: IoSource,
        member_source: impl Fn(usize) -> IoSource,
        position: Position,
    ) -> SemaResult<()> {
        let classify = |semantic: Option<&str>| -> SemaResult<Option<SemanticClass>> {
            semantic
                .map(|name| {
                    classify_semantic(&ast::Semantic {
                        name: name.to_owned(),
                        position,
                    })
                })
                .transpose()
        };
        match ty {
            Type::Struct(id) => {
                if semantic.is_some() {
                    bail!(
                        InvalidEntryPoint,
                        position,
                        "'{}' is a struct, put semantics on its members",
                        name
                    );
                }
                for (index, member) in self.structs[id.0].members.iter().enumerate() {
                    candidates.push(Candidate {
                        name: member.name.clone(),
                        ty: member.ty.clone(),
                        class: classify(member.semantic.as_deref())?,
                        semantic: member.semantic.clone(),
                        source: member_source(index),
                    });
                }
            }
            _ => candidates.push(Candidate {
                name: name.to_owned(),
                ty: ty.clone(),
                class: classify(semantic)?,
                semantic: semantic.map(str::to_owned),
                source: whole,
            }),
        }
        Ok(())
    }

    fn assign_bindings(
        &self,
        stage: Stage,
        direction: Direction,
        mut candidates: Vec<Candidate>,
        position: Position,
    ) -> SemaResult<Vec<InterfaceVar>> {
        for candidate in &candidates {
            if !candidate.ty.is_scalar_or_vector() {
                bail!(
                    InvalidEntryPoint,
                    position,
                    "interface value '{}' has type {}, only scalars and vectors can cross stages",
                    candidate.name,
                    candidate.ty.named(&self.structs)
                );
            }
        }

        // A vertex shader without an explicit SV_Position outputs its first unannotated float4 as the position
        if stage == Stage::Vertex && direction == Direction::Output {
            let explicit = candidates
                .iter()
                .any(|c| c.class == Some(SemanticClass::Builtin(Builtin::Position)));
            if !explicit {
                let promoted = candidates
                    .iter_mut()
                    .find(|c| c.class.is_none() && c.ty == Type::Vector(ScalarKind::Float, 4));
                match promoted {
                    Some(c) => c.class = Some(SemanticClass::Builtin(Builtin::Position)),
                    None => bail!(
                        InvalidEntryPoint,
                        position,
                        "vertex entry point must output a float4 position"
                    ),
                }
            }
        }

        let mut builtins = HashSet::new();
        let mut used_locations = HashSet::new();
        for candidate in &candidates {
            match &candidate.class {
                Some(SemanticClass::Builtin(builtin)) => {
                    let allowed = builtin_type(stage, direction, *builtin);
                    match allowed {
                        Some(types) if types.contains(&candidate.ty) => {}
                        Some(types) => bail!(
                            InvalidEntryPoint,
                            position,
                            "'{}' must have type {}, found {}",
                            candidate.name,
                            types[0].named(&self.structs),
                            candidate.ty.named(&self.structs)
                        ),
                        None => bail!(
                            InvalidEntryPoint,
                            position,
                            "{:?} is not a {} {:?}",
                            builtin,
                            stage.name(),
                            direction
                        ),
                    }
                    if !builtins.insert(*builtin) {
                        bail!(InvalidEntryPoint, position, "{:?} is bound twice", builtin);
                    }
                }
                Some(SemanticClass::Target(n)) => {
                    if (stage, direction) != (Stage::Fragment, Direction::Output) {
                        bail!(
                            InvalidEntryPoint,
                            position,
                            "SV_Target is only valid on fragment outputs"
                        );
                    }
                    if !used_locations.insert(*n) {
                        bail!(InvalidEntryPoint, position, "render target {} is written twice", n);
                    }
                }
                Some(SemanticClass::User) | None => {
                    if stage == Stage::Compute {
                        bail!(
                            InvalidEntryPoint,
                            position,
                            "compute entry points only take system values, '{}' has none",
                            candidate.name
                        );
                    }
                }
            }
            let is_builtin = matches!(candidate.class, Some(SemanticClass::Builtin(_)));
            if !is_builtin && candidate.ty.scalar_kind() == Some(ScalarKind::Bool) {
                bail!(
                    InvalidEntryPoint,
                    position,
                    "interface value '{}' cannot be bool",
                    candidate.name
                );
            }
        }

        let mut next_location = 0;
        let mut vars = vec![];
        for candidate in candidates {
            let binding = match candidate.class {
                Some(SemanticClass::Builtin(builtin)) => IoBinding::Builtin(builtin),
                Some(SemanticClass::Target(n)) => IoBinding::Location(n),
                Some(SemanticClass::User) | None => {
                    while used_locations.contains(&next_location) {
                        next_location += 1;
                    }
                    used_locations.insert(next_location);
                    IoBinding::Location(next_location)
                }
            };
            let flat = matches!(binding, IoBinding::Location(_))
                && candidate.ty.scalar_kind().map_or(false, |k| k.is_integer());
            let semantic = match candidate.class {
                Some(SemanticClass::User) => candidate.semantic,
                _ => None,
            };
            vars.push(InterfaceVar {
                name: candidate.name,
                ty: candidate.ty,
                binding,
                flat,
                semantic,
                source: candidate.source,
            });
        }
        Ok(vars)
    }
}
