//! Metal Shading Language text output.
//!
//! Metal has no global resources: every resource is an argument of the stage function, placed in the argument
//! table from the binding slot, and passed on to each helper that (transitively) uses it. A `floatRxC` is
//! declared as Metal's `floatRxC`, i.e. R columns of C components, so the product order in `mul` is reversed.
//! Three-component vectors in buffer structs are declared `packed_T3`, so members keep their buffer offsets.

use log::debug;
use phf::phf_set;

use crate::{
    ir::{Builtin, GlobalResource, Intrinsic, IoBinding, Module, Stage},
    types::{ResourceKind, Type, INT, UINT},
};

use super::{
    text::{namer::Namer, Syntax, TextWriter},
    EmitResult,
};

pub struct Msl;

/// Highest index of each Metal argument table
const MAX_BUFFER: u32 = 30;
const MAX_TEXTURE: u32 = 127;
const MAX_SAMPLER: u32 = 15;

static RESERVED: phf::Set<&'static str> = phf_set! {
    "alignas", "alignof", "and", "and_eq", "asm", "atomic", "auto", "bitand", "bitor", "bool", "break", "case",
    "catch", "char", "class", "compl", "const", "const_cast", "constant", "constexpr", "continue", "decltype",
    "default", "delete", "device", "do", "double", "dynamic_cast", "else", "enum", "explicit", "export", "extern",
    "false", "float", "for", "fragment", "friend", "goto", "half", "if", "inline", "int", "kernel", "long",
    "main", "metal", "mutable", "namespace", "new", "noexcept", "not", "not_eq", "nullptr", "operator", "or",
    "or_eq", "private", "protected", "public", "register", "reinterpret_cast", "return", "sampler", "short",
    "signed", "sizeof", "static", "static_assert", "static_cast", "struct", "switch", "template", "this",
    "thread", "threadgroup", "throw", "true", "try", "typedef", "typeid", "typename", "uint", "union",
    "unsigned", "using", "vertex", "virtual", "void", "volatile", "while", "xor", "xor_eq",
    "abs", "all", "any", "array", "ceil", "clamp", "cos", "cross", "discard_fragment", "distance", "dot", "exp",
    "exp2", "floor", "fmod", "fract", "length", "level", "log", "log2", "max", "min", "mix", "normalize", "pow",
    "reflect", "rsqrt", "saturate", "select", "sin", "smoothstep", "sqrt", "step", "tan", "texture2d",
    "transpose",
};

fn is_type_name(name: &str) -> bool {
    let base = name.trim_end_matches(|c: char| c.is_ascii_digit() || c == 'x');
    matches!(base, "bool" | "int" | "uint" | "float" | "half" | "short" | "ushort" | "char" | "uchar")
        && base.len() != name.len()
}

impl Syntax for Msl {
    const BACKEND: &'static str = "MSL";
    const ARRAY_TEMPLATE: bool = true;
    const THREAD_RESOURCES: bool = true;

    fn is_reserved(name: &str) -> bool {
        RESERVED.contains(name) || is_type_name(name)
    }

    fn float_literal(value: f32) -> String {
        format!("{:?}f", value)
    }

    fn cast(ty: &str, value: &str) -> String {
        format!("{}({})", ty, value)
    }

    fn zero(_ty: &Type, _ty_name: &str, _scalars: u32) -> String {
        "{}".to_owned()
    }

    fn member(ty: &Type, declaration: String, buffer: bool) -> String {
        // 12 bytes at 4-byte alignment, a following scalar shares its 16-byte row
        match ty {
            Type::Vector(_, 3) if buffer => format!("packed_{}", declaration),
            _ => declaration,
        }
    }

    fn rem(is_float: bool, lhs: &str, rhs: &str) -> String {
        if is_float {
            format!("fmod({}, {})", lhs, rhs)
        } else {
            format!("({} % {})", lhs, rhs)
        }
    }

    fn select(cond: &str, accept: &str, reject: &str) -> String {
        format!("select({}, {}, {})", reject, accept, cond)
    }

    fn intrinsic(intrinsic: Intrinsic, args: &[String], _types: &[&Type]) -> EmitResult<String> {
        let name = match intrinsic {
            // Operands are stored transposed, see the module docs
            Intrinsic::Mul => {
                return match args {
                    [a, b] => Ok(format!("({} * {})", b, a)),
                    _ => TextWriter::<Msl>::unsupported("mul with other than two arguments"),
                }
            }
            Intrinsic::Select => {
                return match args {
                    [cond, accept, reject] => Ok(Self::select(cond, accept, reject)),
                    _ => TextWriter::<Msl>::unsupported("select with other than three arguments"),
                }
            }
            Intrinsic::Frac => "fract",
            Intrinsic::Lerp => "mix",
            other => other.name(),
        };
        Ok(format!("{}({})", name, args.join(", ")))
    }

    fn sample(texture: &str, sampler: &str, coord: &str, lod: Option<&str>) -> String {
        match lod {
            Some(lod) => format!("{}.sample({}, {}, level({}))", texture, sampler, coord, lod),
            None => format!("{}.sample({}, {})", texture, sampler, coord),
        }
    }

    fn discard() -> &'static str {
        "discard_fragment();"
    }
}

/// A resource as a function parameter, with its argument-table attribute on stage functions
fn resource_param(w: &TextWriter<Msl>, resource: &GlobalResource, name: &str, attribute: bool) -> EmitResult<String> {
    let slot = resource.binding.slot;
    let (declaration, table, max) = match &resource.kind {
        ResourceKind::ConstantBuffer(s) => (format!("constant {}& {}", w.names.structs[s.0], name), "buffer", MAX_BUFFER),
        ResourceKind::StructuredBuffer { element, writable } => (
            format!(
                "device {}{}* {}",
                if *writable { "" } else { "const " },
                w.element_name(element, true),
                name
            ),
            "buffer",
            MAX_BUFFER,
        ),
        ResourceKind::Texture2D => (format!("texture2d<float> {}", name), "texture", MAX_TEXTURE),
        ResourceKind::Sampler => (format!("sampler {}", name), "sampler", MAX_SAMPLER),
    };
    if !attribute {
        return Ok(declaration);
    }
    if slot > max {
        return TextWriter::<Msl>::unsupported(format!(
            "'{}' at {} index {}, the table ends at {}",
            resource.name, table, slot, max
        ));
    }
    Ok(format!("{} [[{}({})]]", declaration, table, slot))
}

fn builtin_attribute(builtin: Builtin) -> &'static str {
    match builtin {
        Builtin::Position => "position",
        Builtin::VertexIndex => "vertex_id",
        Builtin::InstanceIndex => "instance_id",
        Builtin::FrontFacing => "front_facing",
        Builtin::FragDepth => "depth(any)",
        Builtin::GlobalInvocationId => "thread_position_in_grid",
        Builtin::WorkgroupId => "threadgroup_position_in_grid",
        Builtin::LocalInvocationId => "thread_position_in_threadgroup",
        Builtin::LocalInvocationIndex => "thread_index_in_threadgroup",
    }
}

fn location_attribute(stage: Stage, output: bool, location: u32, flat: bool) -> String {
    let attribute = match (stage, output) {
        (Stage::Vertex, false) => return format!("attribute({})", location),
        (Stage::Fragment, true) => return format!("color({})", location),
        _ => format!("user(locn{})", location),
    };
    if flat {
        format!("{}, flat", attribute)
    } else {
        attribute
    }
}

pub fn emit(module: &Module) -> EmitResult<String> {
    let mut w = TextWriter::<Msl>::new(module);
    w.line("#include <metal_stdlib>");
    w.line("using namespace metal;");
    w.line("");

    w.structs();

    for id in &module.function_order {
        let function = &module.functions[id.0];
        let mut resources = vec![];
        for resource in w.threaded_resources(*id) {
            resources.push(resource_param(&w, &module.resources[resource.0], &w.names.resources[resource.0], false)?);
        }
        w.function(*id, |w, locals| {
            let params: Vec<String> = function
                .params
                .iter()
                .enumerate()
                .map(|(i, p)| w.declaration(&p.ty, &locals[i]))
                .chain(resources)
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
        let input_struct = w.names.globals.name(&format!("{}_In", name));
        let output_struct = w.names.globals.name(&format!("{}_Out", name));
        let mut namer = w.names.globals.clone();
        let input = namer.name("input");
        let output = namer.name("output");

        let mut params = vec![];
        let mut input_reads = vec![];
        let mut fields = Namer::new(Msl::is_reserved);
        let mut stage_in = vec![];
        for var in &entry.inputs {
            match var.binding {
                IoBinding::Location(location) => {
                    let field = fields.name(&var.name);
                    stage_in.push(format!(
                        "{} [[{}]];",
                        w.declaration(&var.ty, &field),
                        location_attribute(entry.stage, false, location, var.flat)
                    ));
                    input_reads.push(format!("{}.{}", input, field));
                }
                IoBinding::Builtin(builtin) => {
                    let param = namer.name(&var.name);
                    let read = match builtin {
                        // Metal hands these out as uint only
                        Builtin::VertexIndex | Builtin::InstanceIndex => {
                            params.push(format!("{} [[{}]]", w.declaration(&UINT, &param), builtin_attribute(builtin)));
                            if var.ty == INT {
                                Msl::cast("int", &param)
                            } else {
                                param
                            }
                        }
                        _ => {
                            params.push(format!("{} [[{}]]", w.declaration(&var.ty, &param), builtin_attribute(builtin)));
                            param
                        }
                    };
                    input_reads.push(read);
                }
            }
        }
        if !stage_in.is_empty() {
            w.line(format!("struct {} {{", input_struct));
            w.indent();
            for line in &stage_in {
                w.line(line);
            }
            w.dedent();
            w.line("};");
            w.line("");
            params.insert(0, format!("{} {} [[stage_in]]", input_struct, input));
        }
        for resource in w.threaded_resources(entry.function) {
            params.push(resource_param(&w, &module.resources[resource.0], &w.names.resources[resource.0], true)?);
        }

        let mut fields = Namer::new(Msl::is_reserved);
        let output_fields: Vec<String> = entry.outputs.iter().map(|v| fields.name(&v.name)).collect();
        if !entry.outputs.is_empty() {
            w.line(format!("struct {} {{", output_struct));
            w.indent();
            for (var, field) in entry.outputs.iter().zip(&output_fields) {
                let attribute = match var.binding {
                    IoBinding::Builtin(builtin) => builtin_attribute(builtin).to_owned(),
                    IoBinding::Location(location) => location_attribute(entry.stage, true, location, var.flat),
                };
                w.line(format!("{} [[{}]];", w.declaration(&var.ty, field), attribute));
            }
            w.dedent();
            w.line("};");
            w.line("");
        }

        let return_type = if entry.outputs.is_empty() {
            "void".to_owned()
        } else {
            output_struct.clone()
        };
        let keyword = match entry.stage {
            Stage::Vertex => "vertex",
            Stage::Fragment => "fragment",
            Stage::Compute => "kernel",
        };
        w.line(format!("{} {} {}({}) {{", keyword, return_type, name, params.join(", ")));
        w.indent();
        let (lines, outputs) = w.entry_call(entry, &input_reads, &mut namer);
        for line in lines {
            w.line(line);
        }
        if !entry.outputs.is_empty() {
            w.line(format!("{} {} = {{}};", output_struct, output));
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
    debug!("emitted {} bytes of MSL", text.len());
    Ok(text)
}
