//! Name resolution, type checking and validation of a parsed [Program].
//!
//! Analysis runs in a fixed sequence of passes over the declarations:
//! 1. struct names are registered, then their members resolved and checked for cycles
//! 2. function signatures and stage attributes are resolved, so calls may refer forwards
//! 3. resources and function bodies are checked in source order, so a function only sees resources declared above it
//! 4. the call graph is checked for recursion and for stage-restricted operations
//! 5. entry points and their interfaces are validated
//!
//! The first error stops analysis.

mod entry;
pub mod error;
mod expr;
pub mod intrinsics;
pub mod kinds;
pub mod scope;
mod stmt;
pub mod tast;

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::{
    frontend::{
        ast::{self, Item, Program, TypeRef},
        Position,
    },
    types::{builtin_type, ResourceKind, ScalarKind, StructDef, StructId, StructMember, Type},
};

pub use error::{SemanticError, SemanticErrorKind};
pub use intrinsics::Intrinsic;
pub use tast::TypedModule;

use error::{bail, sema_err, SemaResult};
use scope::{ScopeStack, Symbol};
use tast::{Function, FunctionId, Resource, ResourceId, Stage, Variable};

/// Analyze a parsed program
pub fn analyze(program: &Program) -> Result<TypedModule, SemanticError> {
    let module = Analyzer::new(program).run()?;
    debug!(
        "analyzed {} structs, {} resources, {} functions, {} entry points",
        module.structs.len(),
        module.resources.len(),
        module.functions.len(),
        module.entry_points.len()
    );
    Ok(module)
}

/// Classification of a semantic string attached to a parameter, member or return value
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SemanticClass {
    Builtin(tast::Builtin),
    /// `SV_Target` / `SV_TargetN`
    Target(u32),
    /// Any non-system name such as `TEXCOORD0`
    User,
}

pub(crate) fn classify_semantic(semantic: &ast::Semantic) -> SemaResult<SemanticClass> {
    use tast::Builtin;
    let upper = semantic.name.to_ascii_uppercase();
    let Some(system) = upper.strip_prefix("SV_") else {
        return Ok(SemanticClass::User);
    };
    let builtin = match system {
        "POSITION" => Builtin::Position,
        "VERTEXID" => Builtin::VertexIndex,
        "INSTANCEID" => Builtin::InstanceIndex,
        "ISFRONTFACE" => Builtin::FrontFacing,
        "DEPTH" => Builtin::FragDepth,
        "DISPATCHTHREADID" => Builtin::GlobalInvocationId,
        "GROUPID" => Builtin::WorkgroupId,
        "GROUPTHREADID" => Builtin::LocalInvocationId,
        "GROUPINDEX" => Builtin::LocalInvocationIndex,
        "TARGET" => return Ok(SemanticClass::Target(0)),
        _ => match system.strip_prefix("TARGET").map(|n| n.parse::<u32>()) {
            Some(Ok(n)) if n < 8 => return Ok(SemanticClass::Target(n)),
            _ => bail!(
                UnknownSemantic,
                semantic.position,
                "unknown system-value semantic '{}'",
                semantic.name
            ),
        },
    };
    Ok(SemanticClass::Builtin(builtin))
}

/// A function's resolved signature, known before any body is checked
#[derive(Debug, Clone)]
struct Signature {
    name: String,
    params: Vec<(String, Type, Option<String>)>,
    return_type: Type,
    stage: Option<Stage>,
    numthreads: Option<[u32; 3]>,
}

/// Things learned while checking a body, consumed by the whole-module checks
#[derive(Debug, Clone, Default)]
struct FunctionFacts {
    calls: Vec<(FunctionId, Position)>,
    discard: Option<Position>,
    implicit_lod: Option<Position>,
}

/// Per-body state
struct FunctionState {
    id: FunctionId,
    locals: Vec<Variable>,
    const_vars: HashSet<usize>,
    return_type: Type,
    loop_depth: usize,
}
impl Default for FunctionState {
    fn default() -> Self {
        Self {
            id: FunctionId(0),
            locals: vec![],
            const_vars: HashSet::new(),
            return_type: Type::Void,
            loop_depth: 0,
        }
    }
}

pub(crate) struct Analyzer<'p> {
    program: &'p Program,
    structs: Vec<StructDef>,
    struct_ids: HashMap<String, StructId>,
    signatures: Vec<Signature>,
    function_ids: HashMap<String, FunctionId>,
    resources: Vec<Resource>,
    slots: HashMap<u32, ResourceId>,
    scopes: ScopeStack,
    current: FunctionState,
    facts: Vec<FunctionFacts>,
}

/// A matrix reachable from `ty` whose rows do not fill a 16-byte buffer row
fn narrow_matrix(ty: &Type, structs: &[StructDef]) -> Option<Type> {
    match ty {
        Type::Matrix { cols, .. } if *cols < 4 => Some(ty.clone()),
        Type::Struct(id) => structs[id.0]
            .members
            .iter()
            .find_map(|m| narrow_matrix(&m.ty, structs)),
        Type::Array(elem, _) => narrow_matrix(elem, structs),
        _ => None,
    }
}

const RESOURCE_TYPE_NAMES: [&str; 5] = [
    "ConstantBuffer",
    "Texture2D",
    "SamplerState",
    "StructuredBuffer",
    "RWStructuredBuffer",
];

impl<'p> Analyzer<'p> {
    fn new(program: &'p Program) -> Self {
        Self {
            program,
            structs: vec![],
            struct_ids: HashMap::new(),
            signatures: vec![],
            function_ids: HashMap::new(),
            resources: vec![],
            slots: HashMap::new(),
            scopes: ScopeStack::new(),
            current: FunctionState::default(),
            facts: vec![],
        }
    }

    fn run(mut self) -> SemaResult<TypedModule> {
        self.declare_structs()?;
        self.declare_functions()?;

        let mut functions: Vec<Option<Function>> = vec![None; self.signatures.len()];
        let program = self.program;
        for item in &program.items {
            match item {
                Item::Struct(_) => {}
                Item::Resource(decl) => self.declare_resource(decl)?,
                Item::Function(decl) => {
                    let id = self.function_ids[&decl.name];
                    functions[id.0] = Some(self.check_function(id, decl)?);
                }
            }
        }
        let functions: Vec<Function> = functions.into_iter().flatten().collect();

        let call_order = self.check_call_graph()?;
        self.check_stage_restrictions()?;
        let entry_points = self.check_entry_points(&functions)?;

        Ok(TypedModule {
            structs: self.structs,
            resources: self.resources,
            functions,
            call_order,
            entry_points,
        })
    }

    fn is_reserved_type_name(name: &str) -> bool {
        builtin_type(name).is_some() || name == "void" || RESOURCE_TYPE_NAMES.contains(&name)
    }

    // ---- structs ----

    fn declare_structs(&mut self) -> SemaResult<()> {
        let program = self.program;
        let decls: Vec<&ast::StructDecl> = program
            .items
            .iter()
            .filter_map(|item| match item {
                Item::Struct(s) => Some(s),
                _ => None,
            })
            .collect();

        for decl in &decls {
            if Self::is_reserved_type_name(&decl.name) {
                bail!(Redefinition, decl.position, "'{}' is a builtin type", decl.name);
            }
            if self.struct_ids.contains_key(&decl.name) {
                bail!(Redefinition, decl.position, "struct '{}' is already defined", decl.name);
            }
            self.struct_ids
                .insert(decl.name.clone(), StructId(self.structs.len()));
            self.structs.push(StructDef {
                name: decl.name.clone(),
                members: vec![],
            });
        }

        for (index, decl) in decls.iter().enumerate() {
            let mut members: Vec<StructMember> = vec![];
            for field in &decl.members {
                if members.iter().any(|m| m.name == field.name) {
                    bail!(Redefinition, field.position, "duplicate member '{}'", field.name);
                }
                let ty = self.resolve_type(&field.ty)?;
                let ty = self.with_array(ty, field.array_len, field.position)?;
                if !ty.is_storable() {
                    bail!(
                        InvalidType,
                        field.position,
                        "member '{}' cannot have type {}",
                        field.name,
                        ty.named(&self.structs)
                    );
                }
                if let Some(semantic) = &field.semantic {
                    classify_semantic(semantic)?;
                }
                members.push(StructMember {
                    name: field.name.clone(),
                    ty,
                    semantic: field.semantic.as_ref().map(|s| s.name.clone()),
                });
            }
            self.structs[index].members = members;
        }

        // A struct may not contain itself, directly or through other structs and arrays
        for (index, decl) in decls.iter().enumerate() {
            let mut stack = vec![StructId(index)];
            let mut seen = HashSet::new();
            while let Some(id) = stack.pop() {
                for member in &self.structs[id.0].members {
                    let mut ty = &member.ty;
                    while let Type::Array(elem, _) = ty {
                        ty = elem;
                    }
                    if let Type::Struct(inner) = ty {
                        if inner.0 == index {
                            bail!(
                                InvalidType,
                                decl.position,
                                "struct '{}' contains itself",
                                decl.name
                            );
                        }
                        if seen.insert(*inner) {
                            stack.push(*inner);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    // ---- types ----

    fn resolve_type(&self, ty: &TypeRef) -> SemaResult<Type> {
        let generic = match &ty.generic_arg {
            Some(arg) => Some(self.resolve_type(arg)?),
            None => None,
        };
        let no_generic = |resolved: Type| match &generic {
            Some(_) => Err(sema_err!(
                InvalidType,
                ty.position,
                "'{}' does not take a type argument",
                ty.name
            )),
            None => Ok(resolved),
        };

        if let Some(builtin) = builtin_type(&ty.name) {
            return no_generic(builtin);
        }
        if let Some(id) = self.struct_ids.get(&ty.name) {
            return no_generic(Type::Struct(*id));
        }
        let resource = match ty.name.as_str() {
            "void" => return no_generic(Type::Void),
            "ConstantBuffer" => match &generic {
                Some(Type::Struct(id)) => ResourceKind::ConstantBuffer(*id),
                _ => bail!(
                    InvalidResourceType,
                    ty.position,
                    "ConstantBuffer needs a struct type argument"
                ),
            },
            "Texture2D" => match &generic {
                None | Some(Type::Vector(ScalarKind::Float, 4)) => {
                    ResourceKind::Texture2D
                }
                Some(_) => bail!(
                    InvalidResourceType,
                    ty.position,
                    "only Texture2D<float4> is supported"
                ),
            },
            "SamplerState" => {
                no_generic(Type::Void)?;
                ResourceKind::Sampler
            }
            "StructuredBuffer" | "RWStructuredBuffer" => match &generic {
                Some(element) => ResourceKind::StructuredBuffer {
                    element: Box::new(element.clone()),
                    writable: ty.name.starts_with("RW"),
                },
                None => bail!(
                    InvalidResourceType,
                    ty.position,
                    "{} needs an element type",
                    ty.name
                ),
            },
            _ => bail!(UndefinedSymbol, ty.position, "unknown type '{}'", ty.name),
        };
        Ok(Type::Resource(resource))
    }

    fn with_array(&self, ty: Type, len: Option<u64>, position: Position) -> SemaResult<Type> {
        match len {
            None => Ok(ty),
            Some(0) => bail!(InvalidType, position, "arrays must have at least one element"),
            Some(len) => {
                if !ty.is_storable() {
                    bail!(
                        InvalidType,
                        position,
                        "cannot make an array of {}",
                        ty.named(&self.structs)
                    );
                }
                Ok(Type::Array(Box::new(ty), Some(len as u32)))
            }
        }
    }

    /// Resolve a type that must be usable for locals, parameters and return values
    fn resolve_value_type(&self, ty: &TypeRef, len: Option<u64>, position: Position) -> SemaResult<Type> {
        let resolved = self.resolve_type(ty)?;
        let resolved = self.with_array(resolved, len, position)?;
        if !resolved.is_storable() {
            bail!(
                InvalidType,
                ty.position,
                "{} cannot be used as a value type",
                resolved.named(&self.structs)
            );
        }
        Ok(resolved)
    }

    // ---- functions ----

    fn parse_attributes(&self, decl: &ast::FunctionDecl) -> SemaResult<(Option<Stage>, Option<[u32; 3]>)> {
        let mut stage = None;
        let mut numthreads = None;
        for attribute in &decl.attributes {
            let new_stage = match attribute.name.as_str() {
                "vertex" => Stage::Vertex,
                "fragment" => Stage::Fragment,
                "compute" => Stage::Compute,
                "numthreads" => {
                    if attribute.args.len() != 3 {
                        bail!(
                            InvalidEntryPoint,
                            attribute.position,
                            "numthreads takes three sizes"
                        );
                    }
                    let mut size = [0u32; 3];
                    for (dim, arg) in size.iter_mut().zip(&attribute.args) {
                        if *arg < 1 || *arg > u16::MAX as i64 {
                            bail!(
                                InvalidEntryPoint,
                                attribute.position,
                                "numthreads sizes must be positive, found {}",
                                arg
                            );
                        }
                        *dim = *arg as u32;
                    }
                    if numthreads.replace(size).is_some() {
                        bail!(InvalidEntryPoint, attribute.position, "duplicate numthreads");
                    }
                    continue;
                }
                other => bail!(
                    InvalidEntryPoint,
                    attribute.position,
                    "unknown attribute '{}'",
                    other
                ),
            };
            if !attribute.args.is_empty() {
                bail!(
                    InvalidEntryPoint,
                    attribute.position,
                    "stage attributes take no arguments"
                );
            }
            if stage.replace(new_stage).is_some() {
                bail!(
                    InvalidEntryPoint,
                    attribute.position,
                    "'{}' has more than one stage attribute",
                    decl.name
                );
            }
        }
        Ok((stage, numthreads))
    }

    fn declare_functions(&mut self) -> SemaResult<()> {
        let program = self.program;
        for item in &program.items {
            let Item::Function(decl) = item else {
                continue;
            };
            if self.function_ids.contains_key(&decl.name)
                || self.struct_ids.contains_key(&decl.name)
            {
                bail!(Redefinition, decl.position, "'{}' is already defined", decl.name);
            }
            if Self::is_reserved_type_name(&decl.name) || Intrinsic::lookup(&decl.name).is_some() {
                bail!(
                    Redefinition,
                    decl.position,
                    "'{}' is a builtin name",
                    decl.name
                );
            }

            let mut params = vec![];
            for param in &decl.params {
                let ty = self.resolve_value_type(&param.ty, param.array_len, param.position)?;
                if let Some(semantic) = &param.semantic {
                    classify_semantic(semantic)?;
                }
                params.push((
                    param.name.clone(),
                    ty,
                    param.semantic.as_ref().map(|s| s.name.clone()),
                ));
            }

            let return_type = self.resolve_type(&decl.return_type)?;
            match &return_type {
                Type::Array(..) => bail!(
                    InvalidType,
                    decl.return_type.position,
                    "functions cannot return arrays"
                ),
                Type::Resource(_) => bail!(
                    InvalidType,
                    decl.return_type.position,
                    "functions cannot return resources"
                ),
                _ => {}
            }
            if let Some(semantic) = &decl.return_semantic {
                classify_semantic(semantic)?;
            }

            let (stage, numthreads) = self.parse_attributes(decl)?;
            self.function_ids
                .insert(decl.name.clone(), FunctionId(self.signatures.len()));
            self.signatures.push(Signature {
                name: decl.name.clone(),
                params,
                return_type,
                stage,
                numthreads,
            });
            self.facts.push(FunctionFacts::default());
        }
        Ok(())
    }

    // ---- resources ----

    fn declare_resource(&mut self, decl: &ast::ResourceDecl) -> SemaResult<()> {
        let ty = self.resolve_type(&decl.ty)?;
        let Type::Resource(kind) = ty else {
            bail!(
                InvalidResourceType,
                decl.ty.position,
                "'{}' is not a resource type",
                decl.ty.name
            );
        };
        if let ResourceKind::StructuredBuffer { element, .. } = &kind {
            if !element.is_host_shareable(&self.structs) {
                bail!(
                    InvalidResourceType,
                    decl.ty.position,
                    "{} cannot be stored in a buffer",
                    element.named(&self.structs)
                );
            }
        }
        if let ResourceKind::ConstantBuffer(id) = &kind {
            if !Type::Struct(*id).is_host_shareable(&self.structs) {
                bail!(
                    InvalidResourceType,
                    decl.ty.position,
                    "struct '{}' cannot be stored in a buffer",
                    self.structs[id.0].name
                );
            }
        }
        let contents = match &kind {
            ResourceKind::ConstantBuffer(id) => Some(Type::Struct(*id)),
            ResourceKind::StructuredBuffer { element, .. } => Some((**element).clone()),
            ResourceKind::Texture2D | ResourceKind::Sampler => None,
        };
        if let Some(matrix) = contents.and_then(|ty| narrow_matrix(&ty, &self.structs)) {
            bail!(
                InvalidResourceType,
                decl.ty.position,
                "{} cannot be stored in a buffer, buffer matrices need four columns",
                matrix.named(&self.structs)
            );
        }

        if decl.binding < 0 {
            bail!(
                InvalidBinding,
                decl.binding_position,
                "binding slot {} is negative",
                decl.binding
            );
        }
        let slot = u32::try_from(decl.binding).map_err(|_| {
            sema_err!(
                InvalidBinding,
                decl.binding_position,
                "binding slot {} is too large",
                decl.binding
            )
        })?;
        if slot > kind.max_slot() {
            bail!(
                InvalidBinding,
                decl.binding_position,
                "binding slot {} is out of range, {} slots end at {}",
                slot,
                kind.keyword(),
                kind.max_slot()
            );
        }
        if let Some(existing) = self.slots.get(&slot) {
            bail!(
                DuplicateBinding,
                decl.binding_position,
                "slot {} is already used by '{}'",
                slot,
                self.resources[existing.0].name
            );
        }

        if self.function_ids.contains_key(&decl.name) || self.struct_ids.contains_key(&decl.name) {
            bail!(Redefinition, decl.position, "'{}' is already defined", decl.name);
        }
        let id = ResourceId(self.resources.len());
        if self.scopes.declare(&decl.name, Symbol::Resource(id)).is_err() {
            bail!(Redefinition, decl.position, "'{}' is already defined", decl.name);
        }
        self.slots.insert(slot, id);
        self.resources.push(Resource {
            name: decl.name.clone(),
            kind,
            slot,
            position: decl.position,
        });
        Ok(())
    }

    // ---- whole-module checks ----

    /// Reject recursion, then order functions callees-first
    fn check_call_graph(&self) -> SemaResult<Vec<FunctionId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(
            f: usize,
            facts: &[FunctionFacts],
            signatures: &[Signature],
            marks: &mut [Mark],
            order: &mut Vec<FunctionId>,
        ) -> SemaResult<()> {
            marks[f] = Mark::Active;
            for (callee, position) in &facts[f].calls {
                match marks[callee.0] {
                    Mark::Active => bail!(
                        RecursiveCall,
                        *position,
                        "call to '{}' from '{}' is recursive",
                        signatures[callee.0].name,
                        signatures[f].name
                    ),
                    Mark::New => visit(callee.0, facts, signatures, marks, order)?,
                    Mark::Done => {}
                }
            }
            marks[f] = Mark::Done;
            order.push(FunctionId(f));
            Ok(())
        }

        let mut marks = vec![Mark::New; self.signatures.len()];
        let mut order = vec![];
        for f in 0..self.signatures.len() {
            if marks[f] == Mark::New {
                visit(f, &self.facts, &self.signatures, &mut marks, &mut order)?;
            }
        }
        Ok(order)
    }

    /// The stages whose entry points can reach each function
    fn reaching_stages(&self) -> Vec<HashSet<Stage>> {
        let mut stages = vec![HashSet::new(); self.signatures.len()];
        for (index, signature) in self.signatures.iter().enumerate() {
            let Some(stage) = signature.stage else {
                continue;
            };
            let mut stack = vec![index];
            while let Some(f) = stack.pop() {
                if stages[f].insert(stage) {
                    stack.extend(self.facts[f].calls.iter().map(|(callee, _)| callee.0));
                }
            }
        }
        stages
    }
}
