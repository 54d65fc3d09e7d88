use std::collections::BTreeMap;

use num_traits::FromPrimitive;
use turnip_shader_xc::{
    back::spirv::spec::{Decoration, Op, HEADER_WORDS},
    compile, compile_to_hlsl, compile_to_msl, compile_to_spirv,
    sema::SemanticErrorKind,
    validate, CompileError, Target,
};

/// One struct in a constant buffer and a structured buffer, next to a buffer of `float3`
const SHARED: &str = "
struct Params { float3 light; float scale; float weights[4]; };
ConstantBuffer<Params> params : binding(0);
RWStructuredBuffer<Params> history : binding(1);
StructuredBuffer<float3> normals : binding(2);

[compute]
[numthreads(1, 1, 1)]
void cs_main(uint3 id : SV_DispatchThreadID) {
    history[id.x].light = normals[id.x] * params.scale;
    history[id.x].scale = params.weights[2];
    history[id.x].weights[id.x] = params.light.y;
}
";

const GAPS: &str = "
struct Light { float intensity; float4 color; float2 range; };
ConstantBuffer<Light> light : binding(0);
[fragment]
float4 ps() : SV_Target { return light.color * light.intensity + light.range.x; }
";

/// Member offsets of every struct that has them, by struct id
fn spirv_offsets(words: &[u32]) -> BTreeMap<u32, Vec<u32>> {
    let mut offsets: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for (op, operands) in instructions(words) {
        if op == Op::MemberDecorate && operands[2] == Decoration::Offset as u32 {
            offsets.entry(operands[0]).or_default().push(operands[3]);
        }
    }
    offsets
}

fn spirv_strides(words: &[u32]) -> Vec<u32> {
    instructions(words)
        .into_iter()
        .filter(|(op, operands)| *op == Op::Decorate && operands[1] == Decoration::ArrayStride as u32)
        .map(|(_, operands)| operands[2])
        .collect()
}

fn instructions(words: &[u32]) -> Vec<(Op, Vec<u32>)> {
    let mut offset = HEADER_WORDS;
    let mut out = vec![];
    while offset < words.len() {
        let count = (words[offset] >> 16) as usize;
        let op = Op::from_u32(words[offset] & 0xffff).expect("Unknown opcode");
        out.push((op, words[offset + 1..offset + count].to_vec()));
        offset += count;
    }
    out
}

#[test]
fn test_spirv_offsets() {
    let words = compile_to_spirv(SHARED).expect("SPIR-V compile failure");
    assert!(spirv_offsets(&words).values().any(|o| o == &[0, 12, 16]));
    let strides = spirv_strides(&words);
    // weights and the float3 buffer step by 16, the Params buffer by the struct size
    assert!(strides.contains(&16));
    assert!(strides.contains(&80));
    assert!(!strides.contains(&4));
    assert!(!strides.contains(&12));
}

#[test]
fn test_hlsl_matches_offsets() {
    let text = compile_to_hlsl(SHARED).expect("HLSL compile failure");
    assert!(text.contains("struct Padded_float {\n    float value;\n    uint _pad0;\n    uint _pad1;\n    uint _pad2;\n};"));
    assert!(text.contains("struct Padded_float3 {\n    float3 value;\n    uint _pad0;\n};"));
    // light 0, scale 12, weights 16 with a 16-byte stride
    assert!(text.contains("struct Params {\n    float3 light;\n    float scale;\n    Padded_float weights[4];\n};"));
    assert!(text.contains("RWStructuredBuffer<Params> history : register(u1);"));
    assert!(text.contains("StructuredBuffer<Padded_float3> normals"));
    assert!(text.contains("params.weights[2].value"));
    assert!(text.contains("normals[_e"));
    assert!(text.contains("].value;"));
}

#[test]
fn test_msl_matches_offsets() {
    let text = compile_to_msl(SHARED).expect("MSL compile failure");
    assert!(text.contains("struct Padded_float3 {\n    packed_float3 value;\n    uint _pad0;\n};"));
    assert!(text.contains(
        "struct Params {\n    packed_float3 light;\n    float scale;\n    array<Padded_float, 4> weights;\n};"
    ));
    assert!(text.contains("device Params* history [[buffer(1)]]"));
    assert!(text.contains("device const Padded_float3* normals [[buffer(2)]]"));
    assert!(text.contains("params.weights[2].value"));
}

#[test]
fn test_padding_words() {
    let words = compile_to_spirv(GAPS).expect("SPIR-V compile failure");
    assert!(spirv_offsets(&words).values().any(|o| o == &[0, 16, 32]));

    // intensity 0, color 16, range 32, size 48
    let hlsl = compile_to_hlsl(GAPS).expect("HLSL compile failure");
    assert!(hlsl.contains(
        "struct Light {\n    float intensity;\n    uint _pad;\n    uint _pad_1;\n    uint _pad_2;\n    float4 color;\n    \
         float2 range;\n    uint _pad_3;\n    uint _pad_4;\n};"
    ));
    let msl = compile_to_msl(GAPS).expect("MSL compile failure");
    assert!(msl.contains(
        "struct Light {\n    float intensity;\n    uint _pad;\n    uint _pad_1;\n    uint _pad_2;\n    float4 color;\n    \
         float2 range;\n    uint _pad_3;\n    uint _pad_4;\n};"
    ));
}

#[test]
fn test_structs_outside_buffers_unpadded() {
    let source = "
struct Pair { float a; float4 b; };
float4 pick(Pair p) { return p.b * p.a; }
[fragment]
float4 ps(float4 c : COLOR) : SV_Target { Pair p; p.a = 2.0; p.b = c; return pick(p); }
";
    let text = compile_to_hlsl(source).expect("HLSL compile failure");
    assert!(text.contains("struct Pair {\n    float a;\n    float4 b;\n};"));
}

#[test]
fn test_local_arrays_use_wrappers() {
    let source = "
[fragment]
float4 ps(float4 c : COLOR) : SV_Target {
    float w[2];
    w[1] = c.x;
    return c * w[1];
}
";
    let hlsl = compile_to_hlsl(source).expect("HLSL compile failure");
    assert!(hlsl.contains("Padded_float w[2] = { 0, 0, 0, 0, 0, 0, 0, 0 };"));
    assert!(hlsl.contains("w[1].value = "));
    let msl = compile_to_msl(source).expect("MSL compile failure");
    assert!(msl.contains("array<Padded_float, 2> w = {};"));
    assert!(msl.contains("w[1].value = "));
}

#[test]
fn test_narrow_matrix_rejected() {
    let source = "
struct Basis { float3x3 rotation; };
ConstantBuffer<Basis> basis : binding(0);
[fragment]
float4 ps(float3 n : NORMAL) : SV_Target { return float4(mul(basis.rotation, n), 1.0); }
";
    assert!(!validate(source));
    for target in [Target::Hlsl, Target::Msl, Target::SpirV] {
        assert!(matches!(
            compile(source, target),
            Err(CompileError::Semantic(e)) if e.kind == SemanticErrorKind::InvalidResourceType
        ));
    }

    let wide = source.replace("float3x3 rotation", "float3x4 rotation").replace("float3 n", "float4 n");
    assert!(validate(&wide));
}
