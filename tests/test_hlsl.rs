use turnip_shader_xc::compile_to_hlsl;

fn hlsl(source: &str) -> String {
    compile_to_hlsl(source).expect("HLSL compile failure")
}

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
        damping = damping * 0.5;
    }
    particles[id.x].velocity = particles[id.x].velocity * damping;
    particles[id.x].position = particles[id.x].position + particles[id.x].velocity * 0.016;
}
";

#[test]
fn test_vertex_scenario() {
    let text = hlsl("struct VSOut { float4 pos; }; [vertex] VSOut main() { VSOut o; o.pos = float4(0,0,0,1); return o; }");
    assert!(text.contains("struct VSOut {\n    float4 pos;\n};"));
    assert!(text.contains("struct main_Output {\n    float4 pos : SV_Position;\n};"));
    // The user function is renamed so the wrapper keeps the entry point name
    assert!(text.contains("VSOut main_impl() {"));
    assert!(text.contains("main_Output main() {"));
    assert!(text.contains("return output;"));
    assert!(!text.contains("_Input"));
}

#[test]
fn test_resources() {
    let text = hlsl(TEXTURED);
    assert!(text.contains("cbuffer camera_block : register(b0) {\n    Camera camera;\n};"));
    assert!(text.contains("    row_major float4x4 view_proj;"));
    assert!(text.contains("Texture2D<float4> albedo : register(t1);"));
    assert!(text.contains("SamplerState albedo_sampler : register(s2);"));
}

#[test]
fn test_stage_interfaces() {
    let text = hlsl(TEXTURED);
    // Vertex inputs keep their source semantics
    assert!(text.contains("struct vs_main_Input {\n    float3 position : POSITION;\n    float2 uv : TEXCOORD0;\n};"));
    assert!(text.contains("struct vs_main_Output {\n    float4 clip : SV_Position;\n    float2 uv : TEXCOORD0;\n};"));
    assert!(text.contains("struct ps_main_Input {\n    float4 clip : SV_Position;\n    float2 uv : TEXCOORD0;\n};"));
    assert!(text.contains("struct ps_main_Output {\n    float4 value : SV_Target0;\n};"));
    assert!(text.contains("vs_main_Output vs_main(vs_main_Input input) {"));
    assert!(text.contains("ps_main_Output ps_main(ps_main_Input input) {"));
}

#[test]
fn test_function_bodies() {
    let text = hlsl(TEXTURED);
    assert!(text.contains("mul("));
    assert!(text.contains("albedo.Sample(albedo_sampler, "));
    assert!(text.contains("discard;"));
    assert!(text.contains("if ("));
}

#[test]
fn test_compute() {
    let text = hlsl(COMPUTE);
    assert!(text.contains("RWStructuredBuffer<Particle> particles : register(u0);"));
    assert!(text.contains("struct cs_main_Input {\n    uint3 id : SV_DispatchThreadID;\n};"));
    assert!(text.contains("[numthreads(64, 1, 1)]\nvoid cs_main(cs_main_Input input) {"));
    assert!(text.contains("while (true) {"));
    assert!(text.contains("break;"));
}

#[test]
fn test_flat_interpolation() {
    let text = hlsl(
        "
struct VertexOut { float4 clip : SV_Position; int material : MATERIAL; };
[vertex]
VertexOut vs(float4 p : POSITION, int material : MATERIAL) {
    VertexOut o;
    o.clip = p;
    o.material = material;
    return o;
}
",
    );
    assert!(text.contains("nointerpolation int material : MATERIAL;"));
    assert!(text.contains("nointerpolation int material : TEXCOORD0;"));
}

#[test]
fn test_reserved_names() {
    let text = hlsl(
        "
[fragment]
float4 ps(float4 sample : COLOR) : SV_Target {
    float4 line = sample * 2.0;
    return line;
}
",
    );
    assert!(text.contains("sample_"));
    assert!(text.contains("line_"));
    assert!(!text.contains("float4 line ="));
}

#[test]
fn test_deterministic() {
    assert_eq!(hlsl(TEXTURED), hlsl(TEXTURED));
}
