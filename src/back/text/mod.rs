//! The structured text writer shared by the HLSL and MSL backends.
//!
//! Function bodies are rebuilt from the CFG using the merge annotations: a selection merge becomes an
//! `if`/`else`, a loop merge becomes `while (true)` with `break`/`continue` for branches to the merge and
//! continue targets. SSA values become `const` locals named `_eN`, constants are written inline.
//! Everything that differs between the two languages goes through [Syntax].
//!
//! Structs reachable from a buffer are declared with `uint` padding words so that each member sits at its
//! [layout] offset and the struct spans its [layout] size. Scalars and two- or three-component vectors inside
//! fixed arrays, and three-component vectors in structured buffers, are wrapped in a 16-byte `Padded_T` struct
//! and accessed through `.value`, giving those arrays the same stride as the SPIR-V output.

pub mod namer;

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    marker::PhantomData,
};

use crate::{
    ir::{
        cfg, BinaryOp, Block, BlockId, Constant, EntryPoint, Function, FunctionId, Intrinsic, IoSource, Merge,
        Module, Op, Place, PlaceIndex, PlaceRoot, ResourceId, Terminator, UnaryOp, ValueId,
    },
    types::{ScalarKind, StructDef, StructId, Type},
};

use super::{layout, EmitError, EmitResult};
use namer::Namer;

const COMPONENTS: [char; 4] = ['x', 'y', 'z', 'w'];

/// The per-language table driving [TextWriter]
pub trait Syntax {
    const BACKEND: &'static str;
    /// `array<T, N> name` rather than `T name[N]`
    const ARRAY_TEMPLATE: bool;
    /// Resources are not globals and have to be passed down to every function that uses them
    const THREAD_RESOURCES: bool;

    fn is_reserved(name: &str) -> bool;
    fn float_literal(value: f32) -> String;
    /// Element-kind conversion or scalar splat to `ty`
    fn cast(ty: &str, value: &str) -> String;
    /// Initializer giving a local of type `ty` its zero value. `scalars` counts the scalars of its declared form,
    /// padding included.
    fn zero(ty: &Type, ty_name: &str, scalars: u32) -> String;
    /// A struct member line. `buffer` is set for structs laid out for buffer memory.
    fn member(ty: &Type, declaration: String, buffer: bool) -> String;
    fn rem(is_float: bool, lhs: &str, rhs: &str) -> String;
    fn select(cond: &str, accept: &str, reject: &str) -> String;
    fn intrinsic(intrinsic: Intrinsic, args: &[String], types: &[&Type]) -> EmitResult<String>;
    fn sample(texture: &str, sampler: &str, coord: &str, lod: Option<&str>) -> String;
    fn discard() -> &'static str;
}

/// Array elements that are declared inside a 16-byte `Padded_T` wrapper, as `(kind, components)`
pub fn padded_element(elem: &Type, runtime: bool) -> Option<(ScalarKind, u8)> {
    match elem {
        Type::Scalar(k) if k.is_numeric() && !runtime => Some((*k, 1)),
        Type::Vector(k, 2) if k.is_numeric() && !runtime => Some((*k, 2)),
        Type::Vector(k, 3) if k.is_numeric() => Some((*k, 3)),
        _ => None,
    }
}

/// Whether indexing an array of type `ty` has to step into the element wrapper
fn is_padded_array(ty: &Type) -> bool {
    match ty {
        Type::Array(elem, len) => padded_element(elem, len.is_none()).is_some(),
        _ => false,
    }
}

fn collect_padded(ty: &Type, out: &mut BTreeSet<(ScalarKind, u8)>) {
    if let Type::Array(elem, len) = ty {
        out.extend(padded_element(elem, len.is_none()));
        collect_padded(elem, out);
    }
}

/// Structs whose declaration is laid out for buffer memory: everything reachable from a buffer resource
fn buffer_structs(module: &Module) -> Vec<bool> {
    fn mark(ty: &Type, structs: &[StructDef], marks: &mut [bool]) {
        match ty {
            Type::Struct(id) if !marks[id.0] => {
                marks[id.0] = true;
                for member in &structs[id.0].members {
                    mark(&member.ty, structs, marks);
                }
            }
            Type::Array(elem, _) => mark(elem, structs, marks),
            _ => {}
        }
    }
    let mut marks = vec![false; module.structs.len()];
    for index in 0..module.resources.len() {
        mark(&module.resource_type(ResourceId(index)), &module.structs, &mut marks);
    }
    marks
}

/// One line of a struct body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Member(usize),
    /// A `uint` filling four bytes up to the next member or the end of the struct
    Pad(String),
}

/// Members interleaved with the padding words that put them at their buffer offsets
fn padded_fields(def: &StructDef, size: u32, structs: &[StructDef], namer: &mut Namer) -> Vec<Field> {
    let mut fields = vec![];
    let mut end = 0;
    for (index, (member, offset)) in def.members.iter().zip(layout::member_offsets(def, structs)).enumerate() {
        for _ in 0..(offset - end) / 4 {
            fields.push(Field::Pad(namer.name("_pad")));
        }
        fields.push(Field::Member(index));
        end = offset + layout::std140(&member.ty, structs).size;
    }
    for _ in 0..size.saturating_sub(end) / 4 {
        fields.push(Field::Pad(namer.name("_pad")));
    }
    fields
}

/// Identifiers for everything declared at module scope
pub struct ModuleNames {
    pub structs: Vec<String>,
    pub members: Vec<Vec<String>>,
    /// Body of each struct, padded when [buffer](Self::buffer) is set
    pub fields: Vec<Vec<Field>>,
    pub buffer: Vec<bool>,
    /// Wrapper struct names by element kind and width
    pub padded: BTreeMap<(ScalarKind, u8), String>,
    pub resources: Vec<String>,
    /// Entry point functions get an `_impl` suffix, their source name goes to the wrapper
    pub functions: Vec<String>,
    /// Wrapper names, one per entry point
    pub entries: Vec<String>,
    pub globals: Namer,
}
impl ModuleNames {
    pub fn new<S: Syntax>(module: &Module) -> Self {
        let mut globals = Namer::new(S::is_reserved);
        let entries = module
            .entry_points
            .iter()
            .map(|e| globals.name(&e.name))
            .collect();
        let structs = module.structs.iter().map(|s| globals.name(&s.name)).collect();
        let buffer = buffer_structs(module);
        let mut members = vec![];
        let mut fields = vec![];
        for (index, def) in module.structs.iter().enumerate() {
            let mut namer = Namer::new(S::is_reserved);
            members.push(def.members.iter().map(|m| namer.name(&m.name)).collect());
            fields.push(if buffer[index] {
                let size = layout::std140(&Type::Struct(StructId(index)), &module.structs).size;
                padded_fields(def, size, &module.structs, &mut namer)
            } else {
                (0..def.members.len()).map(Field::Member).collect()
            });
        }
        let resources = module.resources.iter().map(|r| globals.name(&r.name)).collect();
        let functions = module
            .functions
            .iter()
            .map(|f| match f.stage {
                Some(_) => globals.name(&format!("{}_impl", f.name)),
                None => globals.name(&f.name),
            })
            .collect();

        let mut elements = BTreeSet::new();
        for def in &module.structs {
            for member in &def.members {
                collect_padded(&member.ty, &mut elements);
            }
        }
        for index in 0..module.resources.len() {
            collect_padded(&module.resource_type(ResourceId(index)), &mut elements);
        }
        for function in &module.functions {
            let types = function.locals.iter().map(|l| &l.ty).chain(&function.value_types);
            for ty in types.chain([&function.return_type]) {
                collect_padded(ty, &mut elements);
            }
        }
        let padded = elements
            .into_iter()
            .map(|(kind, n)| {
                let name = globals.name(&format!("Padded_{}", Type::vector(kind, n).named(&module.structs)));
                ((kind, n), name)
            })
            .collect();

        Self {
            structs,
            members,
            fields,
            buffer,
            padded,
            resources,
            functions,
            entries,
            globals,
        }
    }
}

pub struct TextWriter<'m, S: Syntax> {
    pub module: &'m Module,
    pub names: ModuleNames,
    out: String,
    indent: usize,
    usage: Vec<BTreeSet<ResourceId>>,
    syntax: PhantomData<S>,
}

impl<'m, S: Syntax> TextWriter<'m, S> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            names: ModuleNames::new::<S>(module),
            out: String::new(),
            indent: 0,
            usage: cfg::resource_usage(module),
            syntax: PhantomData,
        }
    }

    pub fn finish(self) -> String {
        self.out
    }

    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.indent {
                self.out.push_str("    ");
            }
            self.out.push_str(text);
        }
        self.out.push('\n');
    }

    pub fn indent(&mut self) {
        self.indent += 1;
    }

    pub fn dedent(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }

    pub fn unsupported<T>(construct: impl Into<String>) -> EmitResult<T> {
        Err(EmitError::Unsupported {
            backend: S::BACKEND,
            construct: construct.into(),
        })
    }

    pub fn type_name(&self, ty: &Type) -> String {
        match ty {
            Type::Void => "void".to_owned(),
            Type::Scalar(k) => k.name().to_owned(),
            Type::Vector(k, n) => format!("{}{}", k.name(), n),
            Type::Matrix { rows, cols } => format!("float{}x{}", rows, cols),
            Type::Struct(id) => self.names.structs[id.0].clone(),
            Type::Array(elem, Some(len)) if S::ARRAY_TEMPLATE => {
                format!("array<{}, {}>", self.element_name(elem, false), len)
            }
            Type::Array(elem, len) => self.element_name(elem, len.is_none()),
            Type::Resource(r) => r.keyword().to_owned(),
        }
    }

    /// The declared type of an array element, a `Padded_T` wrapper where [padded_element] says so
    pub fn element_name(&self, elem: &Type, runtime: bool) -> String {
        padded_element(elem, runtime)
            .and_then(|key| self.names.padded.get(&key).cloned())
            .unwrap_or_else(|| self.type_name(elem))
    }

    /// `T name`, with C array suffixes where the language uses them
    pub fn declaration(&self, ty: &Type, name: &str) -> String {
        let mut suffix = String::new();
        let mut base = ty;
        if !S::ARRAY_TEMPLATE {
            while let Type::Array(elem, Some(len)) = base {
                suffix.push_str(&format!("[{}]", len));
                base = elem;
            }
        }
        let base_name = if suffix.is_empty() {
            self.type_name(base)
        } else {
            self.element_name(base, false)
        };
        format!("{} {}{}", base_name, name, suffix)
    }

    /// Scalars in the declared form of `ty`, counting padding words and wrapped elements
    pub fn scalar_count(&self, ty: &Type) -> u32 {
        let structs = &self.module.structs;
        match ty {
            Type::Scalar(_) => 1,
            Type::Vector(_, n) => *n as u32,
            Type::Matrix { rows, cols } => (*rows as u32) * (*cols as u32),
            Type::Struct(id) => self.names.fields[id.0]
                .iter()
                .map(|field| match field {
                    Field::Member(m) => self.scalar_count(&structs[id.0].members[*m].ty),
                    Field::Pad(_) => 1,
                })
                .sum(),
            Type::Array(elem, Some(len)) if padded_element(elem, false).is_some() => len * 4,
            Type::Array(elem, Some(len)) => len * self.scalar_count(elem),
            Type::Array(_, None) | Type::Void | Type::Resource(_) => 0,
        }
    }

    /// Declare the element wrappers, then every struct with its padding
    pub fn structs(&mut self) {
        let mut lines = vec![];
        for (&(kind, n), name) in &self.names.padded {
            let ty = Type::vector(kind, n);
            lines.push(format!("struct {} {{", name));
            let mut body = vec![S::member(&ty, self.declaration(&ty, "value"), true)];
            body.extend((0..4 - n).map(|pad| format!("uint _pad{}", pad)));
            lines.extend(body.into_iter().map(|line| format!("    {};", line)));
            lines.push("};".to_owned());
            lines.push(String::new());
        }
        for (index, def) in self.module.structs.iter().enumerate() {
            lines.push(format!("struct {} {{", self.names.structs[index]));
            for field in &self.names.fields[index] {
                let line = match field {
                    Field::Member(m) => {
                        let ty = &def.members[*m].ty;
                        let declaration = self.declaration(ty, &self.names.members[index][*m]);
                        S::member(ty, declaration, self.names.buffer[index])
                    }
                    Field::Pad(name) => format!("uint {}", name),
                };
                lines.push(format!("    {};", line));
            }
            lines.push("};".to_owned());
            lines.push(String::new());
        }
        for line in lines {
            self.line(line);
        }
    }

    /// Resources a function needs passed in, in binding order
    pub fn threaded_resources(&self, function: FunctionId) -> Vec<ResourceId> {
        if S::THREAD_RESOURCES {
            self.usage[function.0].iter().copied().collect()
        } else {
            vec![]
        }
    }

    /// Names of a function's locals, parameters first
    pub fn local_names(&self, function: FunctionId) -> Vec<String> {
        let mut namer = self.names.globals.clone();
        self.module.functions[function.0]
            .locals
            .iter()
            .map(|l| namer.name(&l.name))
            .collect()
    }

    /// Statements that rebuild an entry point's arguments from its interface values and call it, plus one
    /// expression per output. `inputs` holds the expression reading each input.
    pub fn entry_call(&self, entry: &EntryPoint, inputs: &[String], namer: &mut Namer) -> (Vec<String>, Vec<String>) {
        let function = &self.module.functions[entry.function.0];
        let mut lines = vec![];
        let mut args = vec![String::new(); function.params.len()];
        for (index, param) in function.params.iter().enumerate() {
            if let Type::Struct(_) = param.ty {
                let name = namer.name(&param.name);
                let zero = S::zero(&param.ty, &self.type_name(&param.ty), self.scalar_count(&param.ty));
                lines.push(format!("{} = {};", self.declaration(&param.ty, &name), zero));
                args[index] = name;
            }
        }
        for (var, value) in entry.inputs.iter().zip(inputs) {
            match var.source {
                IoSource::Param(index) => args[index] = value.clone(),
                IoSource::ParamMember { param, member } => {
                    if let Type::Struct(id) = function.params[param].ty {
                        lines.push(format!("{}.{} = {};", args[param], self.names.members[id.0][member], value));
                    }
                }
                IoSource::Return | IoSource::ReturnMember(_) => {}
            }
        }
        for resource in self.threaded_resources(entry.function) {
            args.push(self.names.resources[resource.0].clone());
        }

        let call = format!("{}({})", self.names.functions[entry.function.0], args.join(", "));
        let result = if function.return_type.is_void() {
            lines.push(format!("{};", call));
            String::new()
        } else {
            let result = namer.name("result");
            lines.push(format!("{} = {};", self.declaration(&function.return_type, &result), call));
            result
        };
        let outputs = entry
            .outputs
            .iter()
            .map(|var| match (var.source, &function.return_type) {
                (IoSource::ReturnMember(member), Type::Struct(id)) => {
                    format!("{}.{}", result, self.names.members[id.0][member])
                }
                _ => result.clone(),
            })
            .collect();
        (lines, outputs)
    }

    /// Write a function. `header` receives the local names and returns the signature line.
    pub fn function<F>(&mut self, id: FunctionId, header: F) -> EmitResult<()>
    where
        F: FnOnce(&Self, &[String]) -> String,
    {
        let locals = self.local_names(id);
        let signature = header(self, &locals);
        self.line(format!("{} {{", signature));
        self.indent();
        BodyWriter::new(self, id, locals).run()?;
        self.dedent();
        self.line("}");
        self.line("");
        Ok(())
    }
}

struct LoopFrame {
    header: BlockId,
    merge: BlockId,
    continuing: BlockId,
}

struct BodyWriter<'w, 'm, S: Syntax> {
    w: &'w mut TextWriter<'m, S>,
    module: &'m Module,
    function: &'m Function,
    locals: Vec<String>,
    namer: Namer,
    constants: HashMap<ValueId, Constant>,
    loops: Vec<LoopFrame>,
}

impl<'w, 'm, S: Syntax> BodyWriter<'w, 'm, S> {
    fn new(w: &'w mut TextWriter<'m, S>, id: FunctionId, locals: Vec<String>) -> Self {
        let module = w.module;
        let function = &module.functions[id.0];
        let mut namer = w.names.globals.clone();
        for name in &locals {
            namer.name(name);
        }
        let constants = function
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter_map(|i| match (i.result, &i.op) {
                (Some(result), Op::Constant(c)) => Some((result, *c)),
                _ => None,
            })
            .collect();
        Self {
            w,
            module,
            function,
            locals,
            namer,
            constants,
            loops: vec![],
        }
    }

    fn run(mut self) -> EmitResult<()> {
        let function = self.function;
        for (index, local) in function.locals.iter().enumerate().skip(function.params.len()) {
            let ty_name = self.w.type_name(&local.ty);
            let declaration = self.w.declaration(&local.ty, &self.locals[index]);
            let zero = S::zero(&local.ty, &ty_name, self.w.scalar_count(&local.ty));
            self.w.line(format!("{} = {};", declaration, zero));
        }
        self.walk(BlockId(0), None)
    }

    // ---- values ----

    fn literal(constant: Constant) -> String {
        match constant {
            Constant::Bool(b) => b.to_string(),
            Constant::Int(i32::MIN) => "(-2147483647 - 1)".to_owned(),
            Constant::Int(v) if v < 0 => format!("({})", v),
            Constant::Int(v) => v.to_string(),
            Constant::Uint(v) => format!("{}u", v),
            Constant::Float(v) if v.is_sign_negative() => format!("({})", S::float_literal(v)),
            Constant::Float(v) => S::float_literal(v),
        }
    }

    fn value(&self, value: ValueId) -> String {
        if self.function.is_param(value) {
            return self.locals[value.0 as usize].clone();
        }
        match self.constants.get(&value) {
            Some(c) => Self::literal(*c),
            None => format!("_e{}", value.0),
        }
    }

    fn values(&self, values: &[ValueId]) -> Vec<String> {
        values.iter().map(|v| self.value(*v)).collect()
    }

    fn place(&self, place: &Place) -> EmitResult<String> {
        let (mut text, mut ty) = match place.root {
            PlaceRoot::Local(local) => (
                self.locals[local.0 as usize].clone(),
                self.function.locals[local.0 as usize].ty.clone(),
            ),
            PlaceRoot::Resource(id) => (self.w.names.resources[id.0].clone(), self.module.resource_type(id)),
        };
        for index in &place.path {
            ty = match (ty, index) {
                (Type::Struct(id), PlaceIndex::Field(field)) => {
                    text.push('.');
                    text.push_str(&self.w.names.members[id.0][*field as usize]);
                    self.module.structs[id.0].members[*field as usize].ty.clone()
                }
                (ty, PlaceIndex::Const(i)) => {
                    text.push_str(&format!("[{}]", i));
                    if is_padded_array(&ty) {
                        text.push_str(".value");
                    }
                    element_type(&ty)
                }
                (ty, PlaceIndex::Dynamic(v)) => {
                    text.push_str(&format!("[{}]", self.value(*v)));
                    if is_padded_array(&ty) {
                        text.push_str(".value");
                    }
                    element_type(&ty)
                }
                (ty, PlaceIndex::Field(_)) => {
                    return TextWriter::<S>::unsupported(format!("field access on {:?}", ty))
                }
            };
        }
        Ok(text)
    }

    fn call(&self, callee: FunctionId, args: &[ValueId]) -> String {
        let mut args = self.values(args);
        for resource in self.w.threaded_resources(callee) {
            args.push(self.w.names.resources[resource.0].clone());
        }
        format!("{}({})", self.w.names.functions[callee.0], args.join(", "))
    }

    fn expression(&self, op: &Op, ty: &Type) -> EmitResult<String> {
        let types = |values: &[ValueId]| -> Vec<&Type> {
            values.iter().map(|v| self.function.value_type(*v)).collect()
        };
        Ok(match op {
            Op::Constant(c) => Self::literal(*c),
            Op::Load(place) => self.place(place)?,
            Op::Composite(values) => format!("{}({})", self.w.type_name(ty), self.values(values).join(", ")),
            Op::Unary(op, v) => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Not => "!",
                    UnaryOp::BitNot => "~",
                };
                format!("({}{})", symbol, self.value(*v))
            }
            Op::Binary(BinaryOp::Rem, a, b) => {
                let is_float = self.function.value_type(*a).scalar_kind() == Some(ScalarKind::Float);
                S::rem(is_float, &self.value(*a), &self.value(*b))
            }
            Op::Binary(op, a, b) => format!("({} {} {})", self.value(*a), op.symbol(), self.value(*b)),
            Op::Convert(v) | Op::Splat(v) => S::cast(&self.w.type_name(ty), &self.value(*v)),
            Op::Extract(v, index) => {
                let base = self.value(*v);
                match self.function.value_type(*v) {
                    Type::Struct(id) => format!("{}.{}", base, self.w.names.members[id.0][*index as usize]),
                    Type::Vector(..) => format!("{}.{}", base, COMPONENTS[*index as usize]),
                    ty if is_padded_array(ty) => format!("{}[{}].value", base, index),
                    _ => format!("{}[{}]", base, index),
                }
            }
            Op::ExtractDynamic(v, index) => format!("{}[{}]", self.value(*v), self.value(*index)),
            Op::Swizzle(v, components) => {
                let mask: String = components.iter().map(|c| COMPONENTS[*c as usize]).collect();
                format!("{}.{}", self.value(*v), mask)
            }
            Op::Call(callee, args) => self.call(*callee, args),
            Op::Intrinsic(intrinsic, args) => S::intrinsic(*intrinsic, &self.values(args), &types(args))?,
            Op::Sample {
                texture,
                sampler,
                coord,
                lod,
            } => {
                let lod = lod.map(|l| self.value(l));
                S::sample(
                    &self.w.names.resources[texture.0],
                    &self.w.names.resources[sampler.0],
                    &self.value(*coord),
                    lod.as_deref(),
                )
            }
            Op::Select {
                cond,
                accept,
                reject,
            } => S::select(&self.value(*cond), &self.value(*accept), &self.value(*reject)),
            Op::Store { .. } => return TextWriter::<S>::unsupported("store used as a value"),
        })
    }

    fn instructions(&mut self, block: &Block) -> EmitResult<()> {
        for instruction in &block.instructions {
            match (&instruction.op, instruction.result) {
                (Op::Constant(_), _) => {}
                (Op::Store { place, value }, _) => {
                    if self.function.is_param_copy(instruction) {
                        continue;
                    }
                    let line = format!("{} = {};", self.place(place)?, self.value(*value));
                    self.w.line(line);
                }
                (op, Some(result)) => {
                    let ty = self.function.value_type(result);
                    let expression = self.expression(op, ty)?;
                    let line = if ty.is_void() {
                        format!("{};", expression)
                    } else {
                        format!(
                            "const {} = {};",
                            self.w.declaration(ty, &format!("_e{}", result.0)),
                            expression
                        )
                    };
                    self.w.line(line);
                }
                (op, None) => return TextWriter::<S>::unsupported(format!("{:?} without a result", op)),
            }
        }
        Ok(())
    }

    // ---- control flow ----

    /// The statement for a branch that leaves the current structured construct
    fn exit(&self, target: BlockId) -> Option<&'static str> {
        let frame = self.loops.last()?;
        if target == frame.merge {
            Some("break;")
        } else if target == frame.continuing {
            Some("continue;")
        } else {
            None
        }
    }

    fn walk(&mut self, start: BlockId, end: Option<BlockId>) -> EmitResult<()> {
        let function = self.function;
        let mut current = start;
        loop {
            if Some(current) == end || self.loops.last().map(|l| l.header) == Some(current) {
                return Ok(());
            }
            let block = function.block(current);
            if let Some(Merge::Loop { merge, continuing }) = block.merge {
                self.emit_loop(current, merge, continuing)?;
                current = merge;
                continue;
            }
            self.instructions(block)?;
            match block.terminator {
                Terminator::Branch(target) => {
                    if Some(target) == end {
                        return Ok(());
                    }
                    if let Some(exit) = self.exit(target) {
                        self.w.line(exit);
                        return Ok(());
                    }
                    current = target;
                }
                Terminator::CondBranch {
                    cond,
                    accept,
                    reject,
                } => {
                    let cond = self.value(cond);
                    match block.merge {
                        Some(Merge::Selection(merge)) => {
                            if accept == merge {
                                self.w.line(format!("if (!({})) {{", cond));
                                self.arm(reject, merge)?;
                            } else {
                                self.w.line(format!("if ({}) {{", cond));
                                self.arm(accept, merge)?;
                                if reject != merge {
                                    self.w.line("} else {");
                                    self.arm(reject, merge)?;
                                }
                            }
                            self.w.line("}");
                            current = merge;
                        }
                        _ => {
                            let (exit, test, next) = match (self.exit(accept), self.exit(reject)) {
                                (_, Some(exit)) => (exit, format!("!({})", cond), accept),
                                (Some(exit), None) => (exit, cond, reject),
                                (None, None) => {
                                    return TextWriter::<S>::unsupported("unstructured conditional branch")
                                }
                            };
                            self.w.line(format!("if ({}) {{", test));
                            self.w.indent();
                            self.w.line(exit);
                            self.w.dedent();
                            self.w.line("}");
                            current = next;
                        }
                    }
                }
                Terminator::Return(value) => {
                    let line = match value {
                        Some(v) => format!("return {};", self.value(v)),
                        None => "return;".to_owned(),
                    };
                    self.w.line(line);
                    return Ok(());
                }
                Terminator::Kill => {
                    self.w.line(S::discard());
                    return Ok(());
                }
                Terminator::Unreachable => return Ok(()),
            }
        }
    }

    fn arm(&mut self, start: BlockId, merge: BlockId) -> EmitResult<()> {
        self.w.indent();
        let result = self.walk(start, Some(merge));
        self.w.dedent();
        result
    }

    fn emit_loop(&mut self, header: BlockId, merge: BlockId, continuing: BlockId) -> EmitResult<()> {
        let Terminator::Branch(first) = self.function.block(header).terminator else {
            return TextWriter::<S>::unsupported("loop header without a plain branch");
        };
        let continuing_block = self.function.block(continuing);
        let trivial =
            continuing_block.instructions.is_empty() && continuing_block.terminator == Terminator::Branch(header);

        // The continuing block runs at the top of every iteration but the first, so `continue` needs no copy of it
        let flag = if trivial {
            None
        } else {
            let flag = self.namer.name("_loop_init");
            self.w.line(format!("bool {} = true;", flag));
            Some(flag)
        };
        self.w.line("while (true) {");
        self.w.indent();
        self.loops.push(LoopFrame {
            header,
            merge,
            continuing,
        });
        let result = self.loop_body(flag.as_deref(), header, first, continuing);
        self.loops.pop();
        self.w.dedent();
        self.w.line("}");
        result
    }

    fn loop_body(&mut self, flag: Option<&str>, header: BlockId, first: BlockId, continuing: BlockId) -> EmitResult<()> {
        if let Some(flag) = flag {
            self.w.line(format!("if (!{}) {{", flag));
            self.arm(continuing, header)?;
            self.w.line("}");
            self.w.line(format!("{} = false;", flag));
        }
        self.walk(first, Some(continuing))
    }
}

fn element_type(ty: &Type) -> Type {
    match ty {
        Type::Array(elem, _) => (**elem).clone(),
        Type::Vector(kind, _) => Type::Scalar(*kind),
        Type::Matrix { cols, .. } => Type::Vector(ScalarKind::Float, *cols),
        other => other.clone(),
    }
}
