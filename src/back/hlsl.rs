//! HLSL (Shader Model 5 style) text output.
//!
//! Resources are globals with `register()` bindings taken unchanged from the IR binding record. Matrices are
//! declared `row_major` so that `floatRxC` rows are contiguous in buffer memory, matching the other backends.
//!
//! Vertex inputs keep the semantic written in source, so input layouts bind by name; an input without one, or
//! whose semantic is already taken, becomes `TEXCOORDn` for its location. All other varyings are `TEXCOORDn` and
//! fragment outputs `SV_Targetn`, with `n` the location the other backends use.

use std::collections::HashSet;

use log::debug;
use phf::phf_set;

use crate::{
    ir::{Builtin, EntryPoint, Intrinsic, IoBinding, Module, Stage},
    types::{builtin_type, ResourceKind, Type, INT, UINT},
};

use super::{
    text::{namer::Namer, Syntax, TextWriter},
    EmitResult,
};

pub struct Hlsl;

static RESERVED: phf::Set<&'static str> = phf_set! {
    "AppendStructuredBuffer", "BlendState", "Buffer", "ByteAddressBuffer", "CompileShader", "ComputeShader",
    "ConsumeStructuredBuffer", "DepthStencilState", "DepthStencilView", "DomainShader", "GeometryShader",
    "HullShader", "InputPatch", "LineStream", "NULL", "OutputPatch", "PixelShader", "PointStream",
    "RWBuffer", "RWByteAddressBuffer", "RWStructuredBuffer", "RWTexture1D", "RWTexture1DArray", "RWTexture2D",
    "RWTexture2DArray", "RWTexture3D", "RasterizerState", "RenderTargetView", "SamplerComparisonState",
    "SamplerState", "StructuredBuffer", "Texture1D", "Texture1DArray", "Texture2D", "Texture2DArray",
    "Texture2DMS", "Texture2DMSArray", "Texture3D", "TextureCube", "TextureCubeArray", "TriangleStream",
    "VertexShader", "asm", "bool", "break", "case", "cbuffer", "centroid", "class", "column_major",
    "compile", "const", "continue", "default", "discard", "do", "double", "dword", "else", "export", "extern",
    "false", "float", "for", "groupshared", "half", "if", "in", "inline", "inout", "int", "interface", "line",
    "lineadj", "linear", "matrix", "min16float", "min16int", "min16uint", "namespace", "nointerpolation",
    "noperspective", "out", "packoffset", "pass", "point", "precise", "register", "return", "row_major",
    "sample", "sampler", "shared", "snorm", "static", "string", "struct", "switch", "tbuffer", "technique",
    "texture", "triangle", "triangleadj", "true", "typedef", "uint", "uniform", "unorm", "unsigned", "vector",
    "void", "volatile", "while",
    "abs", "all", "any", "asfloat", "asint", "asuint", "ceil", "clamp", "cos", "cross", "distance", "dot",
    "exp", "exp2", "floor", "fmod", "frac", "length", "lerp", "log", "log2", "mad", "max", "min", "mul",
    "normalize", "pow", "reflect", "rsqrt", "saturate", "select", "sin", "smoothstep", "sqrt", "step", "tan",
    "transpose",
};

impl Syntax for Hlsl {
    const BACKEND: &'static str = "HLSL";
    const ARRAY_TEMPLATE: bool = false;
    const THREAD_RESOURCES: bool = false;

    fn is_reserved(name: &str) -> bool {
        RESERVED.contains(name) || builtin_type(name).is_some() || name.starts_with("SV_")
    }

    fn float_literal(value: f32) -> String {
        format!("{:?}", value)
    }

    fn cast(ty: &str, value: &str) -> String {
        format!("(({}){})", ty, value)
    }

    fn zero(ty: &Type, ty_name: &str, scalars: u32) -> String {
        match ty {
            // Aggregate initializers are flattened to scalars
            Type::Array(..) => {
                let zeros = vec!["0"; scalars as usize];
                format!("{{ {} }}", zeros.join(", "))
            }
            _ => format!("({})0", ty_name),
        }
    }

    fn member(ty: &Type, declaration: String, _buffer: bool) -> String {
        if is_matrix(ty) {
            format!("row_major {}", declaration)
        } else {
            declaration
        }
    }

    fn rem(_is_float: bool, lhs: &str, rhs: &str) -> String {
        format!("({} % {})", lhs, rhs)
    }

    fn select(cond: &str, accept: &str, reject: &str) -> String {
        format!("({} ? {} : {})", cond, accept, reject)
    }

    fn intrinsic(intrinsic: Intrinsic, args: &[String], _types: &[&Type]) -> EmitResult<String> {
        Ok(format!("{}({})", intrinsic.name(), args.join(", ")))
    }

    fn sample(texture: &str, sampler: &str, coord: &str, lod: Option<&str>) -> String {
        match lod {
            Some(lod) => format!("{}.SampleLevel({}, {}, {})", texture, sampler, coord, lod),
            None => format!("{}.Sample({}, {})", texture, sampler, coord),
        }
    }

    fn discard() -> &'static str {
        "discard;"
    }
}

fn system_value(builtin: Builtin) -> &'static str {
    match builtin {
        Builtin::Position => "SV_Position",
        Builtin::VertexIndex => "SV_VertexID",
        Builtin::InstanceIndex => "SV_InstanceID",
        Builtin::FrontFacing => "SV_IsFrontFace",
        Builtin::FragDepth => "SV_Depth",
        Builtin::GlobalInvocationId => "SV_DispatchThreadID",
        Builtin::WorkgroupId => "SV_GroupID",
        Builtin::LocalInvocationId => "SV_GroupThreadID",
        Builtin::LocalInvocationIndex => "SV_GroupIndex",
    }
}

fn is_matrix(ty: &Type) -> bool {
    match ty {
        Type::Matrix { .. } => true,
        Type::Array(elem, _) => is_matrix(elem),
        _ => false,
    }
}

pub fn emit(module: &Module) -> EmitResult<String> {
    let mut w = TextWriter::<Hlsl>::new(module);

    w.structs();

    for (index, resource) in module.resources.iter().enumerate() {
        let name = w.names.resources[index].clone();
        let register = format!(
            "register({}{})",
            resource.binding.class.register_letter(),
            resource.binding.slot
        );
        match &resource.kind {
            ResourceKind::ConstantBuffer(s) => {
                let block = w.names.globals.name(&format!("{}_block", name));
                w.line(format!("cbuffer {} : {} {{", block, register));
                w.indent();
                w.line(format!("{} {};", w.names.structs[s.0], name));
                w.dedent();
                w.line("};");
            }
            ResourceKind::Texture2D => w.line(format!("Texture2D<float4> {} : {};", name, register)),
            ResourceKind::Sampler => w.line(format!("SamplerState {} : {};", name, register)),
            ResourceKind::StructuredBuffer { element, writable } => {
                let keyword = if *writable {
                    "RWStructuredBuffer"
                } else {
                    "StructuredBuffer"
                };
                let modifier = if is_matrix(element) { "row_major " } else { "" };
                w.line(format!(
                    "{}<{}{}> {} : {};",
                    keyword,
                    modifier,
                    w.element_name(element, true),
                    name,
                    register
                ));
            }
        }
    }
    if !module.resources.is_empty() {
        w.line("");
    }

    for id in &module.function_order {
        let function = &module.functions[id.0];
        w.function(*id, |w, locals| {
            let params: Vec<String> = function
                .params
                .iter()
                .enumerate()
                .map(|(i, p)| w.declaration(&p.ty, &locals[i]))
                .collect();
            format!(
                "{} {}({})",
                w.type_name(&function.return_type),
                w.names.functions[id.0],
                params.join(", ")
            )
        })?;
    }

    for (index, entry) in module.entry_points.iter().enumerate() {
        let name = w.names.entries[index].clone();
        let input_struct = w.names.globals.name(&format!("{}_Input", name));
        let output_struct = w.names.globals.name(&format!("{}_Output", name));
        let mut namer = w.names.globals.clone();
        let input = namer.name("input");
        let output = namer.name("output");

        let semantics = input_semantics(entry);
        let mut input_reads = vec![];
        let mut fields = Namer::new(Hlsl::is_reserved);
        if !entry.inputs.is_empty() {
            w.line(format!("struct {} {{", input_struct));
            w.indent();
            for (var, semantic) in entry.inputs.iter().zip(&semantics) {
                let field = fields.name(&var.name);
                let (ty, read) = match (var.binding, &var.ty) {
                    // Vertex and instance ids are uint, user code may take them as int
                    (IoBinding::Builtin(Builtin::VertexIndex | Builtin::InstanceIndex), ty) => {
                        let read = format!("{}.{}", input, field);
                        let read = if *ty == INT {
                            Hlsl::cast("int", &read)
                        } else {
                            read
                        };
                        (UINT, read)
                    }
                    (_, ty) => (ty.clone(), format!("{}.{}", input, field)),
                };
                w.line(format!(
                    "{}{} : {};",
                    if var.flat { "nointerpolation " } else { "" },
                    w.declaration(&ty, &field),
                    semantic
                ));
                input_reads.push(read);
            }
            w.dedent();
            w.line("};");
            w.line("");
        }

        let mut fields = Namer::new(Hlsl::is_reserved);
        let output_fields: Vec<String> = entry.outputs.iter().map(|v| fields.name(&v.name)).collect();
        if !entry.outputs.is_empty() {
            w.line(format!("struct {} {{", output_struct));
            w.indent();
            for (var, field) in entry.outputs.iter().zip(&output_fields) {
                w.line(format!(
                    "{}{} : {};",
                    if var.flat { "nointerpolation " } else { "" },
                    w.declaration(&var.ty, field),
                    semantic(entry.stage, true, var.binding)
                ));
            }
            w.dedent();
            w.line("};");
            w.line("");
        }

        if entry.stage == Stage::Compute {
            let [x, y, z] = entry.workgroup_size;
            w.line(format!("[numthreads({}, {}, {})]", x, y, z));
        }
        let return_type = if entry.outputs.is_empty() {
            "void".to_owned()
        } else {
            output_struct.clone()
        };
        let params = if entry.inputs.is_empty() {
            String::new()
        } else {
            format!("{} {}", input_struct, input)
        };
        w.line(format!("{} {}({}) {{", return_type, name, params));
        w.indent();
        let (lines, outputs) = w.entry_call(entry, &input_reads, &mut namer);
        for line in lines {
            w.line(line);
        }
        if !entry.outputs.is_empty() {
            w.line(format!("{} {};", output_struct, output));
            for (field, value) in output_fields.iter().zip(outputs) {
                w.line(format!("{}.{} = {};", output, field, value));
            }
            w.line(format!("return {};", output));
        }
        w.dedent();
        w.line("}");
        w.line("");
    }

    let text = w.finish();
    debug!("emitted {} bytes of HLSL", text.len());
    Ok(text)
}

/// Semantic of each entry input
fn input_semantics(entry: &EntryPoint) -> Vec<String> {
    let mut taken = HashSet::new();
    let written: Vec<Option<String>> = entry
        .inputs
        .iter()
        .map(|var| match (entry.stage, &var.semantic) {
            (Stage::Vertex, Some(name)) if taken.insert(name.to_ascii_uppercase()) => Some(name.clone()),
            _ => None,
        })
        .collect();
    entry
        .inputs
        .iter()
        .zip(written)
        .map(|(var, written)| {
            written.unwrap_or_else(|| {
                let mut fallback = semantic(entry.stage, false, var.binding);
                if let IoBinding::Location(mut n) = var.binding {
                    while !taken.insert(fallback.to_ascii_uppercase()) {
                        n += 1;
                        fallback = format!("TEXCOORD{}", n);
                    }
                }
                fallback
            })
        })
        .collect()
}

fn semantic(stage: Stage, output: bool, binding: IoBinding) -> String {
    match binding {
        IoBinding::Builtin(builtin) => system_value(builtin).to_owned(),
        IoBinding::Location(n) if stage == Stage::Fragment && output => format!("SV_Target{}", n),
        IoBinding::Location(n) => format!("TEXCOORD{}", n),
    }
}
