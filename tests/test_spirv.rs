use std::collections::{BTreeSet, HashSet};

use num_traits::FromPrimitive;
use turnip_shader_xc::{
    back::{
        spirv::{
            check,
            spec::{Decoration, ExecutionMode, ExecutionModel, Op, HEADER_WORDS, MAGIC, VERSION_1_3},
        },
        EmitError,
    },
    compile_to_spirv,
};

#[derive(Debug)]
struct Instruction {
    op: Op,
    operands: Vec<u32>,
}

fn spirv(source: &str) -> Vec<u32> {
    compile_to_spirv(source).expect("SPIR-V compile failure")
}

fn instructions(words: &[u32]) -> Vec<Instruction> {
    let mut offset = HEADER_WORDS;
    let mut out = vec![];
    while offset < words.len() {
        let count = (words[offset] >> 16) as usize;
        let op = Op::from_u32(words[offset] & 0xffff).expect("Unknown opcode");
        out.push(Instruction {
            op,
            operands: words[offset + 1..offset + count].to_vec(),
        });
        offset += count;
    }
    out
}

/// Nul-terminated UTF-8 packed little-endian into words
fn literal_string(words: &[u32]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .take_while(|b| *b != 0)
        .collect();
    String::from_utf8(bytes).expect("Bad string")
}

fn entry_points(words: &[u32]) -> Vec<(u32, String)> {
    instructions(words)
        .into_iter()
        .filter(|i| i.op == Op::EntryPoint)
        .map(|i| (i.operands[0], literal_string(&i.operands[2..])))
        .collect()
}

fn has_op(words: &[u32], op: Op) -> bool {
    instructions(words).iter().any(|i| i.op == op)
}

const VSOUT: &str = "struct VSOut { float4 pos; }; [vertex] VSOut main() { VSOut o; o.pos = float4(0,0,0,1); return o; }";

const TEXTURED: &str = "
struct Camera { float4x4 view_proj; float4 tint; };
ConstantBuffer<Camera> camera : binding(0);
Texture2D albedo : binding(1);
SamplerState albedo_sampler : binding(2);

struct VertexIn { float3 position : POSITION; float2 uv : TEXCOORD0; };
struct VertexOut { float4 clip : SV_Position; float2 uv : TEXCOORD0; };

[vertex]
VertexOut vs_main(VertexIn input) {
    VertexOut o;
    o.clip = mul(camera.view_proj, float4(input.position, 1.0));
    o.uv = input.uv;
    return o;
}

[fragment]
float4 ps_main(VertexOut input) : SV_Target {
    float4 c = albedo.Sample(albedo_sampler, input.uv) * camera.tint;
    if (c.a < 0.1) { discard; }
    return c;
}
";

const COMPUTE: &str = "
struct Particle { float3 position; float3 velocity; };
RWStructuredBuffer<Particle> particles : binding(0);

[compute]
[numthreads(64, 1, 1)]
void cs_main(uint3 id : SV_DispatchThreadID) {
    float damping = 1.0;
    for (int i = 0; i < 4; i++) {
        if (damping < 0.1) { break; }
        damping = damping * 0.5;
    }
    particles[id.x].velocity = particles[id.x].velocity * damping;
    particles[id.x].position = particles[id.x].position + particles[id.x].velocity * 0.016;
}
";

#[test]
fn test_header() {
    let words = spirv(VSOUT);
    assert_eq!(words[0], MAGIC);
    assert_eq!(words[0], 0x0723_0203);
    assert_eq!(words[1], VERSION_1_3);
    assert_eq!(words[4], 0);
    assert!(words[3] > 1);
    let first = &instructions(&words)[0];
    assert_eq!(first.op, Op::Capability);
    assert_eq!(first.operands, vec![1]);
}

#[test]
fn test_modules_pass_check() {
    for source in [VSOUT, TEXTURED, COMPUTE] {
        check(&spirv(source)).expect("Generated module fails its own check");
    }
}

#[test]
fn test_check_rejects_damage() {
    let mut words = spirv(VSOUT);
    words[3] = 1;
    assert!(matches!(check(&words), Err(EmitError::InvalidModule(_))));
    let mut words = spirv(VSOUT);
    words[0] = 0xdead_beef;
    assert!(matches!(check(&words), Err(EmitError::InvalidModule(_))));
    let words = spirv(VSOUT);
    assert!(check(&words[..HEADER_WORDS - 1]).is_err());
}

#[test]
fn test_entry_points() {
    assert_eq!(
        entry_points(&spirv(VSOUT)),
        vec![(ExecutionModel::Vertex as u32, "main".to_owned())]
    );
    assert_eq!(
        entry_points(&spirv(TEXTURED)),
        vec![
            (ExecutionModel::Vertex as u32, "vs_main".to_owned()),
            (ExecutionModel::Fragment as u32, "ps_main".to_owned()),
        ]
    );
}

#[test]
fn test_execution_modes() {
    let modes: Vec<Vec<u32>> = instructions(&spirv(COMPUTE))
        .into_iter()
        .filter(|i| i.op == Op::ExecutionMode)
        .map(|i| i.operands[1..].to_vec())
        .collect();
    assert_eq!(modes, vec![vec![ExecutionMode::LocalSize as u32, 64, 1, 1]]);

    let modes: Vec<u32> = instructions(&spirv(TEXTURED))
        .into_iter()
        .filter(|i| i.op == Op::ExecutionMode)
        .map(|i| i.operands[1])
        .collect();
    assert_eq!(modes, vec![ExecutionMode::OriginUpperLeft as u32]);
}

#[test]
fn test_resource_decorations() {
    let words = spirv(TEXTURED);
    let decorations: Vec<_> = instructions(&words)
        .into_iter()
        .filter(|i| i.op == Op::Decorate)
        .collect();
    let bindings: BTreeSet<u32> = decorations
        .iter()
        .filter(|i| i.operands[1] == Decoration::Binding as u32)
        .map(|i| i.operands[2])
        .collect();
    assert_eq!(bindings, BTreeSet::from([0, 1, 2]));
    assert!(decorations
        .iter()
        .filter(|i| i.operands[1] == Decoration::DescriptorSet as u32)
        .all(|i| i.operands[2] == 0));
    assert!(decorations.iter().any(|i| i.operands[1] == Decoration::Block as u32));
}

#[test]
fn test_ids_within_bound() {
    let words = spirv(TEXTURED);
    let bound = words[3];
    let mut labels = HashSet::new();
    for instruction in instructions(&words) {
        if instruction.op == Op::Label {
            let id = instruction.operands[0];
            assert!(id != 0 && id < bound);
            assert!(labels.insert(id), "label %{} defined twice", id);
        }
    }
}

#[test]
fn test_one_terminator_per_block() {
    for source in [VSOUT, TEXTURED, COMPUTE] {
        let mut open = false;
        for instruction in instructions(&spirv(source)) {
            match instruction.op {
                Op::Label => {
                    assert!(!open, "block opened before the previous one ended");
                    open = true;
                }
                op if op.is_terminator() => {
                    assert!(open, "{:?} outside a block", op);
                    open = false;
                }
                Op::FunctionEnd => assert!(!open, "function ends inside a block"),
                _ => {}
            }
        }
    }
}

#[test]
fn test_structured_control_flow() {
    let words = spirv(COMPUTE);
    assert!(has_op(&words, Op::LoopMerge));
    assert!(has_op(&words, Op::SelectionMerge));
    // Every merge instruction sits directly before a branch
    let instructions = instructions(&words);
    for pair in instructions.windows(2) {
        if matches!(pair[0].op, Op::LoopMerge | Op::SelectionMerge) {
            assert!(matches!(pair[1].op, Op::Branch | Op::BranchConditional));
        }
    }
}

#[test]
fn test_fragment_operations() {
    let words = spirv(TEXTURED);
    assert!(has_op(&words, Op::ImageSampleImplicitLod));
    assert!(has_op(&words, Op::SampledImage));
    assert!(has_op(&words, Op::Kill));
    // mul(M, v) with HLSL matrix layout
    assert!(has_op(&words, Op::VectorTimesMatrix));
}

#[test]
fn test_glsl_import() {
    let words = spirv(VSOUT);
    let import = instructions(&words)
        .into_iter()
        .find(|i| i.op == Op::ExtInstImport)
        .expect("No import");
    assert_eq!(literal_string(&import.operands[1..]), "GLSL.std.450");
}

#[test]
fn test_deterministic() {
    assert_eq!(spirv(TEXTURED), spirv(TEXTURED));
    assert_eq!(spirv(COMPUTE), spirv(COMPUTE));
}
