//! SPIR-V 1.3 binary output for Vulkan.
//!
//! The module is written into one buffer per logical layout section, so types and constants can be interned on
//! first use while function bodies are being written. Every IR local becomes a `Function` variable and every IR
//! value becomes one result id, which keeps the mapping from the block-local SSA form direct. Entry points get a
//! `void()` wrapper that loads the interface variables, calls the user function and stores its results.
//!
//! A `floatRxC` is an `OpTypeMatrix` of R columns of `vecC`, i.e. the transpose of the HLSL matrix, so `mul`
//! operands are swapped. Finished modules are run through [check::check] before they are returned.

mod check;
pub mod spec;

use std::collections::HashMap;

use log::{debug, trace};

use crate::{
    ir::{
        self, BinaryOp, Block, Builtin, Constant, EntryPoint, Function, FunctionId, InterfaceVar, Intrinsic,
        IoBinding, IoSource, Merge, Module, Place, PlaceIndex, PlaceRoot, Stage, Terminator, UnaryOp, ValueId,
    },
    types::{ResourceKind, ScalarKind, StructId, Type},
};

use super::{layout, EmitError, EmitResult};
use spec::{
    AddressingModel, BuiltIn, Capability, Decoration, ExecutionMode, ExecutionModel, GLSLstd450, MemoryModel, Op,
    StorageClass, CONTROL_NONE, DIM_2D, EXT_GLSL_STD_450, FORMAT_UNKNOWN, GENERATOR, IMAGE_OPERANDS_LOD, MAGIC,
    VERSION_1_3,
};

pub use check::check;

/// Structural identity of a type. Structs are nominal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TypeKey {
    Void,
    Bool,
    Int { signed: bool },
    Float,
    Vector(u32, u8),
    Matrix(u32, u8),
    Array(u32, u32),
    RuntimeArray(u32),
    Struct(usize),
    /// The `Block` wrapper of one resource
    Block(usize),
    Image,
    Sampler,
    SampledImage(u32),
    Pointer(StorageClass, u32),
    Function(u32, Vec<u32>),
}

fn instruction(out: &mut Vec<u32>, op: Op, operands: &[u32]) {
    out.push(((operands.len() as u32 + 1) << 16) | op as u32);
    out.extend_from_slice(operands);
}

/// Nul-terminated, padded to a whole word
fn string(text: &str) -> Vec<u32> {
    let mut bytes = text.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes
        .chunks(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn invalid<T>(message: impl Into<String>) -> EmitResult<T> {
    Err(EmitError::InvalidModule(message.into()))
}

fn contains_matrix(ty: &Type) -> bool {
    match ty {
        Type::Matrix { .. } => true,
        Type::Array(elem, _) => contains_matrix(elem),
        _ => false,
    }
}

fn zero(kind: ScalarKind) -> Constant {
    match kind {
        ScalarKind::Bool => Constant::Bool(false),
        ScalarKind::Int => Constant::Int(0),
        ScalarKind::Uint => Constant::Uint(0),
        ScalarKind::Float => Constant::Float(0.0),
    }
}

fn one(kind: ScalarKind) -> Constant {
    match kind {
        ScalarKind::Bool => Constant::Bool(true),
        ScalarKind::Int => Constant::Int(1),
        ScalarKind::Uint => Constant::Uint(1),
        ScalarKind::Float => Constant::Float(1.0),
    }
}

fn builtin(builtin: Builtin, stage: Stage) -> BuiltIn {
    match builtin {
        Builtin::Position if stage == Stage::Fragment => BuiltIn::FragCoord,
        Builtin::Position => BuiltIn::Position,
        Builtin::VertexIndex => BuiltIn::VertexIndex,
        Builtin::InstanceIndex => BuiltIn::InstanceIndex,
        Builtin::FrontFacing => BuiltIn::FrontFacing,
        Builtin::FragDepth => BuiltIn::FragDepth,
        Builtin::GlobalInvocationId => BuiltIn::GlobalInvocationId,
        Builtin::WorkgroupId => BuiltIn::WorkgroupId,
        Builtin::LocalInvocationId => BuiltIn::LocalInvocationId,
        Builtin::LocalInvocationIndex => BuiltIn::LocalInvocationIndex,
    }
}

fn storage_class(kind: &ResourceKind) -> StorageClass {
    match kind {
        ResourceKind::ConstantBuffer(_) => StorageClass::Uniform,
        ResourceKind::StructuredBuffer { .. } => StorageClass::StorageBuffer,
        ResourceKind::Texture2D | ResourceKind::Sampler => StorageClass::UniformConstant,
    }
}

struct Writer<'m> {
    module: &'m Module,
    next_id: u32,
    glsl: u32,
    entry_points: Vec<u32>,
    execution_modes: Vec<u32>,
    names: Vec<u32>,
    decorations: Vec<u32>,
    /// Types, constants and global variables, in definition order
    globals: Vec<u32>,
    functions: Vec<u32>,
    types: HashMap<TypeKey, u32>,
    constants: HashMap<(Op, u32, Vec<u32>), u32>,
    function_ids: Vec<u32>,
    resources: Vec<u32>,
}

impl<'m> Writer<'m> {
    fn new(module: &'m Module) -> Self {
        let mut w = Self {
            module,
            next_id: 1,
            glsl: 0,
            entry_points: vec![],
            execution_modes: vec![],
            names: vec![],
            decorations: vec![],
            globals: vec![],
            functions: vec![],
            types: HashMap::new(),
            constants: HashMap::new(),
            function_ids: vec![],
            resources: vec![],
        };
        w.glsl = w.id();
        let function_ids = module.functions.iter().map(|_| w.id()).collect();
        w.function_ids = function_ids;
        w
    }

    fn id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn name(&mut self, target: u32, name: &str) {
        let mut operands = vec![target];
        operands.extend(string(name));
        instruction(&mut self.names, Op::Name, &operands);
    }

    fn member_name(&mut self, target: u32, member: u32, name: &str) {
        let mut operands = vec![target, member];
        operands.extend(string(name));
        instruction(&mut self.names, Op::MemberName, &operands);
    }

    fn decorate(&mut self, target: u32, decoration: Decoration, extra: &[u32]) {
        let mut operands = vec![target, decoration as u32];
        operands.extend_from_slice(extra);
        instruction(&mut self.decorations, Op::Decorate, &operands);
    }

    fn member_decorate(&mut self, target: u32, member: u32, decoration: Decoration, extra: &[u32]) {
        let mut operands = vec![target, member, decoration as u32];
        operands.extend_from_slice(extra);
        instruction(&mut self.decorations, Op::MemberDecorate, &operands);
    }

    // ---- types ----

    fn intern(&mut self, key: TypeKey, op: Op, operands: &[u32]) -> u32 {
        if let Some(id) = self.types.get(&key) {
            return *id;
        }
        let id = self.id();
        let mut words = vec![id];
        words.extend_from_slice(operands);
        instruction(&mut self.globals, op, &words);
        self.types.insert(key, id);
        id
    }

    fn scalar_type(&mut self, kind: ScalarKind) -> u32 {
        match kind {
            ScalarKind::Bool => self.intern(TypeKey::Bool, Op::TypeBool, &[]),
            ScalarKind::Int => self.intern(TypeKey::Int { signed: true }, Op::TypeInt, &[32, 1]),
            ScalarKind::Uint => self.intern(TypeKey::Int { signed: false }, Op::TypeInt, &[32, 0]),
            ScalarKind::Float => self.intern(TypeKey::Float, Op::TypeFloat, &[32]),
        }
    }

    fn pointer(&mut self, class: StorageClass, pointee: u32) -> u32 {
        self.intern(TypeKey::Pointer(class, pointee), Op::TypePointer, &[class as u32, pointee])
    }

    fn ty(&mut self, ty: &Type) -> EmitResult<u32> {
        let module = self.module;
        let structs = &module.structs;
        Ok(match ty {
            Type::Void => self.intern(TypeKey::Void, Op::TypeVoid, &[]),
            Type::Scalar(kind) => self.scalar_type(*kind),
            Type::Vector(kind, n) => {
                let component = self.scalar_type(*kind);
                self.intern(TypeKey::Vector(component, *n), Op::TypeVector, &[component, *n as u32])
            }
            Type::Matrix { rows, cols } => {
                let column = self.ty(&Type::Vector(ScalarKind::Float, *cols))?;
                self.intern(TypeKey::Matrix(column, *rows), Op::TypeMatrix, &[column, *rows as u32])
            }
            Type::Array(elem, Some(len)) => {
                let element = self.ty(elem)?;
                let length = self.constant(Constant::Uint(*len));
                let key = TypeKey::Array(element, length);
                if let Some(id) = self.types.get(&key) {
                    return Ok(*id);
                }
                let id = self.intern(key, Op::TypeArray, &[element, length]);
                if elem.is_host_shareable(structs) {
                    self.decorate(id, Decoration::ArrayStride, &[layout::array_stride(elem, structs)]);
                }
                id
            }
            Type::Array(elem, None) => {
                let element = self.ty(elem)?;
                let key = TypeKey::RuntimeArray(element);
                if let Some(id) = self.types.get(&key) {
                    return Ok(*id);
                }
                let id = self.intern(key, Op::TypeRuntimeArray, &[element]);
                self.decorate(
                    id,
                    Decoration::ArrayStride,
                    &[layout::runtime_array_stride(elem, structs)],
                );
                id
            }
            Type::Struct(id) => self.struct_type(*id)?,
            Type::Resource(ResourceKind::Texture2D) => {
                let sampled = self.scalar_type(ScalarKind::Float);
                self.intern(
                    TypeKey::Image,
                    Op::TypeImage,
                    &[sampled, DIM_2D, 0, 0, 0, 1, FORMAT_UNKNOWN],
                )
            }
            Type::Resource(ResourceKind::Sampler) => self.intern(TypeKey::Sampler, Op::TypeSampler, &[]),
            Type::Resource(other) => return invalid(format!("{} used as a value", other.keyword())),
        })
    }

    fn struct_type(&mut self, id: StructId) -> EmitResult<u32> {
        if let Some(existing) = self.types.get(&TypeKey::Struct(id.0)) {
            return Ok(*existing);
        }
        let module = self.module;
        let structs = &module.structs;
        let def = &structs[id.0];
        let members = def
            .members
            .iter()
            .map(|m| self.ty(&m.ty))
            .collect::<EmitResult<Vec<_>>>()?;
        let result = self.intern(TypeKey::Struct(id.0), Op::TypeStruct, &members);
        self.name(result, &def.name);
        for (index, member) in def.members.iter().enumerate() {
            self.member_name(result, index as u32, &member.name);
        }
        if Type::Struct(id).is_host_shareable(structs) {
            let offsets = layout::member_offsets(def, structs);
            for (index, (member, offset)) in def.members.iter().zip(offsets).enumerate() {
                self.member_decorate(result, index as u32, Decoration::Offset, &[offset]);
                if contains_matrix(&member.ty) {
                    self.member_decorate(result, index as u32, Decoration::ColMajor, &[]);
                    self.member_decorate(
                        result,
                        index as u32,
                        Decoration::MatrixStride,
                        &[layout::MATRIX_STRIDE],
                    );
                }
            }
        }
        Ok(result)
    }

    fn function_type(&mut self, ret: u32, params: Vec<u32>) -> u32 {
        let mut operands = vec![ret];
        operands.extend(&params);
        self.intern(TypeKey::Function(ret, params), Op::TypeFunction, &operands)
    }

    // ---- constants ----

    fn intern_constant(&mut self, op: Op, ty: u32, operands: &[u32]) -> u32 {
        let key = (op, ty, operands.to_vec());
        if let Some(id) = self.constants.get(&key) {
            return *id;
        }
        let id = self.id();
        let mut words = vec![ty, id];
        words.extend_from_slice(operands);
        instruction(&mut self.globals, op, &words);
        self.constants.insert(key, id);
        id
    }

    fn constant(&mut self, constant: Constant) -> u32 {
        match constant {
            Constant::Bool(b) => {
                let ty = self.scalar_type(ScalarKind::Bool);
                let op = if b { Op::ConstantTrue } else { Op::ConstantFalse };
                self.intern_constant(op, ty, &[])
            }
            Constant::Int(v) => {
                let ty = self.scalar_type(ScalarKind::Int);
                self.intern_constant(Op::Constant, ty, &[v as u32])
            }
            Constant::Uint(v) => {
                let ty = self.scalar_type(ScalarKind::Uint);
                self.intern_constant(Op::Constant, ty, &[v])
            }
            Constant::Float(v) => {
                let ty = self.scalar_type(ScalarKind::Float);
                self.intern_constant(Op::Constant, ty, &[v.to_bits()])
            }
        }
    }

    /// `constant` in every component of `ty`
    fn splat_constant(&mut self, constant: Constant, ty: &Type) -> EmitResult<u32> {
        let scalar = self.constant(constant);
        match ty {
            Type::Vector(_, n) => {
                let vector = self.ty(ty)?;
                Ok(self.intern_constant(Op::ConstantComposite, vector, &vec![scalar; *n as usize]))
            }
            _ => Ok(scalar),
        }
    }

    fn null(&mut self, ty: u32) -> u32 {
        self.intern_constant(Op::ConstantNull, ty, &[])
    }

    // ---- globals ----

    fn resources(&mut self) -> EmitResult<()> {
        let module = self.module;
        for (index, resource) in module.resources.iter().enumerate() {
            let class = storage_class(&resource.kind);
            let ty = match &resource.kind {
                ResourceKind::ConstantBuffer(s) => {
                    let inner = self.struct_type(*s)?;
                    self.block(index, inner, &Type::Struct(*s), false)
                }
                ResourceKind::StructuredBuffer { element, writable } => {
                    let array = Type::Array(element.clone(), None);
                    let inner = self.ty(&array)?;
                    self.block(index, inner, &array, !writable)
                }
                other => self.ty(&Type::Resource(other.clone()))?,
            };
            let pointer = self.pointer(class, ty);
            let variable = self.id();
            instruction(&mut self.globals, Op::Variable, &[pointer, variable, class as u32]);
            self.name(variable, &resource.name);
            self.decorate(variable, Decoration::DescriptorSet, &[0]);
            self.decorate(variable, Decoration::Binding, &[resource.binding.slot]);
            self.resources.push(variable);
        }
        Ok(())
    }

    /// Single-member `Block` struct a buffer resource is declared through
    fn block(&mut self, resource: usize, inner: u32, inner_ty: &Type, read_only: bool) -> u32 {
        let id = self.intern(TypeKey::Block(resource), Op::TypeStruct, &[inner]);
        let name = format!("{}_block", self.module.resources[resource].name);
        self.name(id, &name);
        self.decorate(id, Decoration::Block, &[]);
        self.member_decorate(id, 0, Decoration::Offset, &[0]);
        if read_only {
            self.member_decorate(id, 0, Decoration::NonWritable, &[]);
        }
        if contains_matrix(inner_ty) {
            self.member_decorate(id, 0, Decoration::ColMajor, &[]);
            self.member_decorate(id, 0, Decoration::MatrixStride, &[layout::MATRIX_STRIDE]);
        }
        id
    }

    // ---- functions ----

    fn function(&mut self, id: FunctionId) -> EmitResult<()> {
        let module = self.module;
        let function = &module.functions[id.0];
        let ret = self.ty(&function.return_type)?;
        let params = function
            .params
            .iter()
            .map(|p| self.ty(&p.ty))
            .collect::<EmitResult<Vec<_>>>()?;
        let function_type = self.function_type(ret, params.clone());
        let result = self.function_ids[id.0];
        self.name(result, &function.name);

        let mut out = vec![];
        instruction(&mut out, Op::Function, &[ret, result, CONTROL_NONE, function_type]);
        let mut values = vec![None; function.value_types.len()];
        for (index, param) in params.iter().enumerate() {
            let param_id = self.id();
            instruction(&mut out, Op::FunctionParameter, &[*param, param_id]);
            values[index] = Some(param_id);
        }
        let labels: Vec<u32> = function.blocks.iter().map(|_| self.id()).collect();
        instruction(&mut out, Op::Label, &[labels[0]]);

        // All variables go at the top of the first block. Parameter copies are stored before any read.
        let mut locals = vec![];
        for (index, local) in function.locals.iter().enumerate() {
            let ty = self.ty(&local.ty)?;
            let pointer = self.pointer(StorageClass::Function, ty);
            let variable = self.id();
            let class = StorageClass::Function as u32;
            if index < function.params.len() {
                instruction(&mut out, Op::Variable, &[pointer, variable, class]);
            } else {
                let null = self.null(ty);
                instruction(&mut out, Op::Variable, &[pointer, variable, class, null]);
            }
            self.name(variable, &local.name);
            locals.push(variable);
        }

        let mut body = Body {
            w: self,
            function,
            values,
            labels,
            locals,
            out,
        };
        for (index, block) in function.blocks.iter().enumerate() {
            if index > 0 {
                let label = body.labels[index];
                body.emit(Op::Label, &[label]);
            }
            body.block(block)?;
        }
        body.emit(Op::FunctionEnd, &[]);
        let out = body.out;
        trace!("function '{}': {} words", function.name, out.len());
        self.functions.extend(out);
        Ok(())
    }

    fn interface_variable(&mut self, var: &InterfaceVar, class: StorageClass, stage: Stage) -> EmitResult<u32> {
        let ty = self.ty(&var.ty)?;
        let pointer = self.pointer(class, ty);
        let id = self.id();
        instruction(&mut self.globals, Op::Variable, &[pointer, id, class as u32]);
        self.name(id, &var.name);
        match var.binding {
            IoBinding::Location(location) => {
                self.decorate(id, Decoration::Location, &[location]);
                if var.flat && class == StorageClass::Input && stage == Stage::Fragment {
                    self.decorate(id, Decoration::Flat, &[]);
                }
            }
            IoBinding::Builtin(b) => self.decorate(id, Decoration::BuiltIn, &[builtin(b, stage) as u32]),
        }
        Ok(id)
    }

    fn entry_point(&mut self, entry: &EntryPoint) -> EmitResult<()> {
        let module = self.module;
        let function = &module.functions[entry.function.0];
        let inputs = entry
            .inputs
            .iter()
            .map(|var| self.interface_variable(var, StorageClass::Input, entry.stage))
            .collect::<EmitResult<Vec<_>>>()?;
        let outputs = entry
            .outputs
            .iter()
            .map(|var| self.interface_variable(var, StorageClass::Output, entry.stage))
            .collect::<EmitResult<Vec<_>>>()?;

        let void = self.ty(&Type::Void)?;
        let wrapper_type = self.function_type(void, vec![]);
        let wrapper = self.id();
        let label = self.id();
        let mut out = vec![];
        instruction(&mut out, Op::Function, &[void, wrapper, CONTROL_NONE, wrapper_type]);
        instruction(&mut out, Op::Label, &[label]);

        let mut args: Vec<Option<u32>> = vec![None; function.params.len()];
        let mut members: Vec<Vec<Option<u32>>> = function
            .params
            .iter()
            .map(|p| match &p.ty {
                Type::Struct(s) => vec![None; module.structs[s.0].members.len()],
                _ => vec![],
            })
            .collect();
        for (var, variable) in entry.inputs.iter().zip(&inputs) {
            let ty = self.ty(&var.ty)?;
            let value = self.id();
            instruction(&mut out, Op::Load, &[ty, value, *variable]);
            match var.source {
                IoSource::Param(index) => args[index] = Some(value),
                IoSource::ParamMember { param, member } => members[param][member] = Some(value),
                IoSource::Return | IoSource::ReturnMember(_) => {}
            }
        }
        for (index, param) in function.params.iter().enumerate() {
            let Type::Struct(s) = &param.ty else {
                continue;
            };
            let mut parts = vec![self.ty(&param.ty)?, 0];
            for (value, member) in members[index].iter().zip(&module.structs[s.0].members) {
                let part = match value {
                    Some(value) => *value,
                    None => {
                        let ty = self.ty(&member.ty)?;
                        self.null(ty)
                    }
                };
                parts.push(part);
            }
            let composite = self.id();
            parts[1] = composite;
            instruction(&mut out, Op::CompositeConstruct, &parts);
            args[index] = Some(composite);
        }

        let ret = self.ty(&function.return_type)?;
        let result = self.id();
        let mut call = vec![ret, result, self.function_ids[entry.function.0]];
        for (index, arg) in args.into_iter().enumerate() {
            match arg {
                Some(arg) => call.push(arg),
                None => return invalid(format!("entry point '{}' leaves parameter {} unset", entry.name, index)),
            }
        }
        instruction(&mut out, Op::FunctionCall, &call);

        for (var, variable) in entry.outputs.iter().zip(&outputs) {
            let value = match (var.source, &function.return_type) {
                (IoSource::ReturnMember(member), Type::Struct(s)) => {
                    let ty = self.ty(&module.structs[s.0].members[member].ty)?;
                    let value = self.id();
                    instruction(&mut out, Op::CompositeExtract, &[ty, value, result, member as u32]);
                    value
                }
                (IoSource::Return, _) => result,
                _ => return invalid(format!("output '{}' of '{}' is not part of the result", var.name, entry.name)),
            };
            instruction(&mut out, Op::Store, &[*variable, value]);
        }
        instruction(&mut out, Op::Return, &[]);
        instruction(&mut out, Op::FunctionEnd, &[]);
        self.functions.extend(out);

        let model = match entry.stage {
            Stage::Vertex => ExecutionModel::Vertex,
            Stage::Fragment => ExecutionModel::Fragment,
            Stage::Compute => ExecutionModel::GLCompute,
        };
        let mut operands = vec![model as u32, wrapper];
        operands.extend(string(&entry.name));
        operands.extend(&inputs);
        operands.extend(&outputs);
        instruction(&mut self.entry_points, Op::EntryPoint, &operands);

        match entry.stage {
            Stage::Fragment => {
                instruction(
                    &mut self.execution_modes,
                    Op::ExecutionMode,
                    &[wrapper, ExecutionMode::OriginUpperLeft as u32],
                );
                if entry
                    .outputs
                    .iter()
                    .any(|v| v.binding == IoBinding::Builtin(Builtin::FragDepth))
                {
                    instruction(
                        &mut self.execution_modes,
                        Op::ExecutionMode,
                        &[wrapper, ExecutionMode::DepthReplacing as u32],
                    );
                }
            }
            Stage::Compute => {
                let [x, y, z] = entry.workgroup_size;
                instruction(
                    &mut self.execution_modes,
                    Op::ExecutionMode,
                    &[wrapper, ExecutionMode::LocalSize as u32, x, y, z],
                );
            }
            Stage::Vertex => {}
        }
        trace!("entry point '{}' wraps %{}", entry.name, self.function_ids[entry.function.0]);
        Ok(())
    }

    fn finish(self) -> Vec<u32> {
        let mut words = vec![MAGIC, VERSION_1_3, GENERATOR, self.next_id, 0];
        instruction(&mut words, Op::Capability, &[Capability::Shader as u32]);
        let mut import = vec![self.glsl];
        import.extend(string(EXT_GLSL_STD_450));
        instruction(&mut words, Op::ExtInstImport, &import);
        instruction(
            &mut words,
            Op::MemoryModel,
            &[AddressingModel::Logical as u32, MemoryModel::GLSL450 as u32],
        );
        for section in [
            self.entry_points,
            self.execution_modes,
            self.names,
            self.decorations,
            self.globals,
            self.functions,
        ] {
            words.extend(section);
        }
        words
    }
}

/// Writes one function's blocks
struct Body<'w, 'm> {
    w: &'w mut Writer<'m>,
    function: &'m Function,
    values: Vec<Option<u32>>,
    labels: Vec<u32>,
    locals: Vec<u32>,
    out: Vec<u32>,
}

impl<'w, 'm> Body<'w, 'm> {
    fn emit(&mut self, op: Op, operands: &[u32]) {
        instruction(&mut self.out, op, operands);
    }

    fn value(&self, value: ValueId) -> EmitResult<u32> {
        match self.values.get(value.0 as usize) {
            Some(Some(id)) => Ok(*id),
            _ => invalid(format!("'{}' uses %{} before it is defined", self.function.name, value.0)),
        }
    }

    fn values(&self, values: &[ValueId]) -> EmitResult<Vec<u32>> {
        values.iter().map(|v| self.value(*v)).collect()
    }

    fn label(&self, block: ir::BlockId) -> u32 {
        self.labels[block.0 as usize]
    }

    /// Emits `op` with a fresh result of type `ty`
    fn result(&mut self, ty: &Type, op: Op, operands: &[u32]) -> EmitResult<u32> {
        let ty = self.w.ty(ty)?;
        let id = self.w.id();
        let mut words = vec![ty, id];
        words.extend_from_slice(operands);
        self.emit(op, &words);
        Ok(id)
    }

    fn ext(&mut self, ty: &Type, instruction: GLSLstd450, operands: &[u32]) -> EmitResult<u32> {
        let mut words = vec![self.w.glsl, instruction as u32];
        words.extend_from_slice(operands);
        self.result(ty, Op::ExtInst, &words)
    }

    fn access(&mut self, place: &Place) -> EmitResult<u32> {
        let function = self.function;
        let module = self.w.module;
        let (base, class, through_block) = match place.root {
            PlaceRoot::Local(local) => (self.locals[local.0 as usize], StorageClass::Function, false),
            PlaceRoot::Resource(resource) => {
                let kind = &module.resources[resource.0].kind;
                (
                    self.w.resources[resource.0],
                    storage_class(kind),
                    matches!(
                        kind,
                        ResourceKind::ConstantBuffer(_) | ResourceKind::StructuredBuffer { .. }
                    ),
                )
            }
        };
        if place.path.is_empty() && !through_block {
            return Ok(base);
        }
        let mut indices = vec![];
        if through_block {
            indices.push(self.w.constant(Constant::Uint(0)));
        }
        for index in &place.path {
            indices.push(match index {
                PlaceIndex::Field(i) | PlaceIndex::Const(i) => self.w.constant(Constant::Uint(*i)),
                PlaceIndex::Dynamic(v) => self.value(*v)?,
            });
        }
        let Some(ty) = module.place_type(function, place) else {
            return invalid(format!("ill-typed place in '{}'", function.name));
        };
        let pointee = self.w.ty(&ty)?;
        let pointer = self.w.pointer(class, pointee);
        let id = self.w.id();
        let mut words = vec![pointer, id, base];
        words.extend(indices);
        self.emit(Op::AccessChain, &words);
        Ok(id)
    }

    fn block(&mut self, block: &Block) -> EmitResult<()> {
        for instruction in &block.instructions {
            self.instruction(instruction)?;
        }
        match block.merge {
            Some(Merge::Selection(merge)) => {
                let merge = self.label(merge);
                self.emit(Op::SelectionMerge, &[merge, CONTROL_NONE]);
            }
            Some(Merge::Loop { merge, continuing }) => {
                let (merge, continuing) = (self.label(merge), self.label(continuing));
                self.emit(Op::LoopMerge, &[merge, continuing, CONTROL_NONE]);
            }
            None => {}
        }
        match block.terminator {
            Terminator::Branch(target) => {
                let target = self.label(target);
                self.emit(Op::Branch, &[target]);
            }
            Terminator::CondBranch {
                cond,
                accept,
                reject,
            } => {
                let words = [self.value(cond)?, self.label(accept), self.label(reject)];
                self.emit(Op::BranchConditional, &words);
            }
            Terminator::Return(Some(value)) => {
                let value = self.value(value)?;
                self.emit(Op::ReturnValue, &[value]);
            }
            Terminator::Return(None) => self.emit(Op::Return, &[]),
            Terminator::Kill => self.emit(Op::Kill, &[]),
            Terminator::Unreachable => self.emit(Op::Unreachable, &[]),
        }
        Ok(())
    }

    fn instruction(&mut self, instruction: &ir::Instruction) -> EmitResult<()> {
        let function = self.function;
        let Some(result) = instruction.result else {
            let ir::Op::Store { place, value } = &instruction.op else {
                return invalid(format!("{:?} without a result", instruction.op));
            };
            let pointer = self.access(place)?;
            let value = self.value(*value)?;
            self.emit(Op::Store, &[pointer, value]);
            return Ok(());
        };
        let ty = function.value_type(result);
        let id = match &instruction.op {
            ir::Op::Constant(c) => self.w.constant(*c),
            ir::Op::Composite(values) => {
                let values = self.values(values)?;
                self.result(ty, Op::CompositeConstruct, &values)?
            }
            ir::Op::Load(place) => {
                let pointer = self.access(place)?;
                self.result(ty, Op::Load, &[pointer])?
            }
            ir::Op::Store { .. } => return invalid("store with a result"),
            ir::Op::Unary(op, v) => {
                let kind = function.value_type(*v).scalar_kind();
                let op = match (op, kind) {
                    (UnaryOp::Neg, Some(ScalarKind::Float)) => Op::FNegate,
                    (UnaryOp::Neg, _) => Op::SNegate,
                    (UnaryOp::Not, _) => Op::LogicalNot,
                    (UnaryOp::BitNot, _) => Op::Not,
                };
                let v = self.value(*v)?;
                self.result(ty, op, &[v])?
            }
            ir::Op::Binary(op, a, b) => self.binary(ty, *op, *a, *b)?,
            ir::Op::Convert(v) => self.convert(ty, *v)?,
            ir::Op::Extract(v, index) => {
                let v = self.value(*v)?;
                self.result(ty, Op::CompositeExtract, &[v, *index])?
            }
            ir::Op::ExtractDynamic(v, index) => {
                if !function.value_type(*v).is_vector() {
                    return invalid("dynamic extract from a value that is not a vector");
                }
                let words = [self.value(*v)?, self.value(*index)?];
                self.result(ty, Op::VectorExtractDynamic, &words)?
            }
            ir::Op::Swizzle(v, components) => {
                let v = self.value(*v)?;
                let mut words = vec![v, v];
                words.extend(components.iter().map(|c| *c as u32));
                self.result(ty, Op::VectorShuffle, &words)?
            }
            ir::Op::Splat(v) => {
                let v = self.value(*v)?;
                match ty {
                    Type::Vector(_, n) => self.result(ty, Op::CompositeConstruct, &vec![v; *n as usize])?,
                    _ => v,
                }
            }
            ir::Op::Call(callee, args) => {
                let mut words = vec![self.w.function_ids[callee.0]];
                words.extend(self.values(args)?);
                self.result(ty, Op::FunctionCall, &words)?
            }
            ir::Op::Intrinsic(intrinsic, args) => self.intrinsic(ty, *intrinsic, args)?,
            ir::Op::Sample {
                texture,
                sampler,
                coord,
                lod,
            } => {
                let image_ty = Type::Resource(ResourceKind::Texture2D);
                let (texture, sampler) = (self.w.resources[texture.0], self.w.resources[sampler.0]);
                let image = self.result(&image_ty, Op::Load, &[texture])?;
                let sampler = self.result(&Type::Resource(ResourceKind::Sampler), Op::Load, &[sampler])?;
                let image_type = self.w.ty(&image_ty)?;
                let sampled_type = self
                    .w
                    .intern(TypeKey::SampledImage(image_type), Op::TypeSampledImage, &[image_type]);
                let sampled = self.w.id();
                self.emit(Op::SampledImage, &[sampled_type, sampled, image, sampler]);
                let coord = self.value(*coord)?;
                match lod {
                    Some(lod) => {
                        let lod = self.value(*lod)?;
                        self.result(ty, Op::ImageSampleExplicitLod, &[sampled, coord, IMAGE_OPERANDS_LOD, lod])?
                    }
                    None => self.result(ty, Op::ImageSampleImplicitLod, &[sampled, coord])?,
                }
            }
            ir::Op::Select {
                cond,
                accept,
                reject,
            } => {
                let words = [self.value(*cond)?, self.value(*accept)?, self.value(*reject)?];
                self.result(ty, Op::Select, &words)?
            }
        };
        self.values[result.0 as usize] = Some(id);
        Ok(())
    }

    fn binary(&mut self, ty: &Type, op: BinaryOp, a: ValueId, b: ValueId) -> EmitResult<u32> {
        use ScalarKind::*;
        let function = self.function;
        let operand = function.value_type(a);
        let kind = operand.scalar_kind().unwrap_or(Float);
        let op = match (op, kind) {
            (BinaryOp::Mul, _) if matches!(operand, Type::Matrix { .. }) => Op::MatrixTimesScalar,
            (BinaryOp::Add, Float) => Op::FAdd,
            (BinaryOp::Add, _) => Op::IAdd,
            (BinaryOp::Sub, Float) => Op::FSub,
            (BinaryOp::Sub, _) => Op::ISub,
            (BinaryOp::Mul, Float) => Op::FMul,
            (BinaryOp::Mul, _) => Op::IMul,
            (BinaryOp::Div, Float) => Op::FDiv,
            (BinaryOp::Div, Int) => Op::SDiv,
            (BinaryOp::Div, _) => Op::UDiv,
            (BinaryOp::Rem, Float) => Op::FRem,
            (BinaryOp::Rem, Int) => Op::SRem,
            (BinaryOp::Rem, _) => Op::UMod,
            (BinaryOp::BitAnd, _) => Op::BitwiseAnd,
            (BinaryOp::BitOr, _) => Op::BitwiseOr,
            (BinaryOp::BitXor, _) => Op::BitwiseXor,
            (BinaryOp::Shl, _) => Op::ShiftLeftLogical,
            (BinaryOp::Shr, Int) => Op::ShiftRightArithmetic,
            (BinaryOp::Shr, _) => Op::ShiftRightLogical,
            (BinaryOp::Eq, Bool) => Op::LogicalEqual,
            (BinaryOp::Eq, Float) => Op::FOrdEqual,
            (BinaryOp::Eq, _) => Op::IEqual,
            (BinaryOp::Ne, Bool) => Op::LogicalNotEqual,
            (BinaryOp::Ne, Float) => Op::FUnordNotEqual,
            (BinaryOp::Ne, _) => Op::INotEqual,
            (BinaryOp::Lt, Float) => Op::FOrdLessThan,
            (BinaryOp::Lt, Int) => Op::SLessThan,
            (BinaryOp::Lt, _) => Op::ULessThan,
            (BinaryOp::Gt, Float) => Op::FOrdGreaterThan,
            (BinaryOp::Gt, Int) => Op::SGreaterThan,
            (BinaryOp::Gt, _) => Op::UGreaterThan,
            (BinaryOp::Le, Float) => Op::FOrdLessThanEqual,
            (BinaryOp::Le, Int) => Op::SLessThanEqual,
            (BinaryOp::Le, _) => Op::ULessThanEqual,
            (BinaryOp::Ge, Float) => Op::FOrdGreaterThanEqual,
            (BinaryOp::Ge, Int) => Op::SGreaterThanEqual,
            (BinaryOp::Ge, _) => Op::UGreaterThanEqual,
            (BinaryOp::LogicalAnd, _) => Op::LogicalAnd,
            (BinaryOp::LogicalOr, _) => Op::LogicalOr,
        };
        let words = [self.value(a)?, self.value(b)?];
        self.result(ty, op, &words)
    }

    fn convert(&mut self, ty: &Type, value: ValueId) -> EmitResult<u32> {
        use ScalarKind::*;
        let function = self.function;
        let source = function.value_type(value);
        let v = self.value(value)?;
        let (Some(from), Some(to)) = (source.scalar_kind(), ty.scalar_kind()) else {
            return invalid("conversion of a value without an element kind");
        };
        let op = match (from, to) {
            _ if from == to => return Ok(v),
            (Float, Int) => Op::ConvertFToS,
            (Float, Uint) => Op::ConvertFToU,
            (Int, Float) => Op::ConvertSToF,
            (Uint, Float) => Op::ConvertUToF,
            (Int, Uint) | (Uint, Int) => Op::Bitcast,
            (Bool, kind) => {
                let accept = self.w.splat_constant(one(kind), ty)?;
                let reject = self.w.splat_constant(zero(kind), ty)?;
                return self.result(ty, Op::Select, &[v, accept, reject]);
            }
            (kind, _) => {
                let nothing = self.w.splat_constant(zero(kind), source)?;
                let op = if kind == Float {
                    Op::FUnordNotEqual
                } else {
                    Op::INotEqual
                };
                return self.result(ty, op, &[v, nothing]);
            }
        };
        self.result(ty, op, &[v])
    }

    fn intrinsic(&mut self, ty: &Type, intrinsic: Intrinsic, args: &[ValueId]) -> EmitResult<u32> {
        use GLSLstd450 as G;
        let function = self.function;
        let values = self.values(args)?;
        let kind = args
            .first()
            .and_then(|a| function.value_type(*a).scalar_kind())
            .unwrap_or(ScalarKind::Float);
        let by_kind = |float: G, signed: G, unsigned: G| match kind {
            ScalarKind::Float => float,
            ScalarKind::Int => signed,
            _ => unsigned,
        };
        let instruction = match intrinsic {
            Intrinsic::Abs => by_kind(G::FAbs, G::SAbs, G::SAbs),
            Intrinsic::Min => by_kind(G::FMin, G::SMin, G::UMin),
            Intrinsic::Max => by_kind(G::FMax, G::SMax, G::UMax),
            Intrinsic::Clamp => by_kind(G::FClamp, G::SClamp, G::UClamp),
            Intrinsic::Sqrt => G::Sqrt,
            Intrinsic::Rsqrt => G::InverseSqrt,
            Intrinsic::Sin => G::Sin,
            Intrinsic::Cos => G::Cos,
            Intrinsic::Tan => G::Tan,
            Intrinsic::Exp => G::Exp,
            Intrinsic::Exp2 => G::Exp2,
            Intrinsic::Log => G::Log,
            Intrinsic::Log2 => G::Log2,
            Intrinsic::Pow => G::Pow,
            Intrinsic::Floor => G::Floor,
            Intrinsic::Ceil => G::Ceil,
            Intrinsic::Frac => G::Fract,
            Intrinsic::Lerp => G::FMix,
            Intrinsic::Step => G::Step,
            Intrinsic::SmoothStep => G::SmoothStep,
            Intrinsic::Normalize => G::Normalize,
            Intrinsic::Length => G::Length,
            Intrinsic::Distance => G::Distance,
            Intrinsic::Cross => G::Cross,
            Intrinsic::Reflect => G::Reflect,
            Intrinsic::Saturate => {
                let [x] = values.as_slice() else {
                    return invalid("saturate with other than one argument");
                };
                let low = self.w.splat_constant(Constant::Float(0.0), ty)?;
                let high = self.w.splat_constant(Constant::Float(1.0), ty)?;
                return self.ext(ty, G::FClamp, &[*x, low, high]);
            }
            Intrinsic::Dot => return self.result(ty, Op::Dot, &values),
            Intrinsic::Transpose => return self.result(ty, Op::Transpose, &values),
            Intrinsic::Any => return self.result(ty, Op::Any, &values),
            Intrinsic::All => return self.result(ty, Op::All, &values),
            Intrinsic::Select => return self.result(ty, Op::Select, &values),
            Intrinsic::Mul => {
                // Both operands are stored transposed, so the product is taken in the other order
                let op = match (args, values.as_slice()) {
                    ([a, b], [_, _]) => match (function.value_type(*a), function.value_type(*b)) {
                        (Type::Matrix { .. }, Type::Vector(..)) => Op::VectorTimesMatrix,
                        (Type::Vector(..), Type::Matrix { .. }) => Op::MatrixTimesVector,
                        (Type::Matrix { .. }, Type::Matrix { .. }) => Op::MatrixTimesMatrix,
                        _ => return invalid("mul without a matrix operand"),
                    },
                    _ => return invalid("mul with other than two arguments"),
                };
                return self.result(ty, op, &[values[1], values[0]]);
            }
        };
        self.ext(ty, instruction, &values)
    }
}

pub fn emit(module: &Module) -> EmitResult<Vec<u32>> {
    let mut w = Writer::new(module);
    w.resources()?;
    for id in &module.function_order {
        w.function(*id)?;
    }
    for entry in &module.entry_points {
        w.entry_point(entry)?;
    }
    let words = w.finish();
    check::check(&words)?;
    debug!("emitted {} SPIR-V words", words.len());
    Ok(words)
}
