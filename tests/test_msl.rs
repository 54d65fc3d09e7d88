use turnip_shader_xc::compile_to_msl;

fn msl(source: &str) -> String {
    compile_to_msl(source).expect("MSL compile failure")
}

const TEXTURED: &str = "
struct Camera { float4x4 view_proj; float4 tint; };
ConstantBuffer<Camera> camera : binding(0);
Texture2D albedo : binding(1);
SamplerState albedo_sampler : binding(2);

struct VertexIn { float3 position : POSITION; float2 uv : TEXCOORD0; };
struct VertexOut { float4 clip : SV_Position; float2 uv : TEXCOORD0; };

float4 shade(float2 uv) {
    return albedo.Sample(albedo_sampler, uv);
}

[vertex]
VertexOut vs_main(VertexIn input) {
    VertexOut o;
    o.clip = mul(camera.view_proj, float4(input.position, 1.0));
    o.uv = input.uv;
    return o;
}

[fragment]
float4 ps_main(VertexOut input) : SV_Target {
    float4 c = shade(input.uv) * camera.tint;
    if (c.a < 0.1) { discard; }
    return c;
}
";

#[test]
fn test_prelude() {
    let text = msl("[fragment] float4 ps() : SV_Target { return float4(1.0, 1.0, 1.0, 1.0); }");
    assert!(text.starts_with("#include <metal_stdlib>\nusing namespace metal;\n"));
}

#[test]
fn test_vertex_scenario() {
    let text = msl("struct VSOut { float4 pos; }; [vertex] VSOut main() { VSOut o; o.pos = float4(0,0,0,1); return o; }");
    assert!(text.contains("struct VSOut {\n    float4 pos;\n};"));
    // `main` is taken in Metal
    assert!(text.contains("struct main__Out {\n    float4 pos [[position]];\n};"));
    assert!(text.contains("vertex main__Out main_() {"));
    assert!(text.contains("VSOut main_impl() {"));
    assert!(!text.contains("[[stage_in]]"));
}

#[test]
fn test_vertex_stage() {
    let text = msl(TEXTURED);
    assert!(text.contains("struct vs_main_In {\n    float3 position [[attribute(0)]];\n    float2 uv [[attribute(1)]];\n};"));
    assert!(text.contains("struct vs_main_Out {\n    float4 clip [[position]];\n    float2 uv [[user(locn0)]];\n};"));
    assert!(text.contains(
        "vertex vs_main_Out vs_main(vs_main_In input [[stage_in]], constant Camera& camera [[buffer(0)]]) {"
    ));
    // Metal matrices are column-major, so the product is reversed
    assert!(!text.contains("mul("));
}

#[test]
fn test_fragment_stage() {
    let text = msl(TEXTURED);
    assert!(text.contains("struct ps_main_In {\n    float2 uv [[user(locn0)]];\n};"));
    assert!(text.contains("struct ps_main_Out {\n    float4 value [[color(0)]];\n};"));
    assert!(text.contains(
        "fragment ps_main_Out ps_main(ps_main_In input [[stage_in]], float4 clip [[position]], \
         constant Camera& camera [[buffer(0)]], texture2d<float> albedo [[texture(1)]], \
         sampler albedo_sampler [[sampler(2)]]) {"
    ));
    assert!(text.contains("discard_fragment();"));
}

#[test]
fn test_resources_threaded_to_helpers() {
    let text = msl(TEXTURED);
    assert!(text.contains("float4 shade(float2 uv, texture2d<float> albedo, sampler albedo_sampler) {"));
    assert!(text.contains("albedo.sample(albedo_sampler, "));
    assert!(text.contains("shade("));
}

#[test]
fn test_compute_stage() {
    let text = msl(
        "
struct Particle { float3 position; float3 velocity; };
RWStructuredBuffer<Particle> particles : binding(0);
StructuredBuffer<float> weights : binding(1);

[compute]
[numthreads(64, 1, 1)]
void cs_main(uint3 id : SV_DispatchThreadID) {
    particles[id.x].position = particles[id.x].position + particles[id.x].velocity * weights[id.x];
}
",
    );
    assert!(text.contains(
        "kernel void cs_main(uint3 id [[thread_position_in_grid]], device Particle* particles [[buffer(0)]], \
         device const float* weights [[buffer(1)]]) {"
    ));
}

#[test]
fn test_intrinsic_renames() {
    let text = msl(
        "
[fragment]
float4 ps(float4 color : COLOR) : SV_Target {
    return lerp(color, frac(color), 0.5);
}
",
    );
    assert!(text.contains("mix("));
    assert!(text.contains("fract("));
    assert!(!text.contains("lerp("));
}

#[test]
fn test_argument_table_edges() {
    let text = msl(
        "
Texture2D far : binding(127);
SamplerState samp : binding(15);
[fragment]
float4 ps(float2 uv : TEXCOORD0) : SV_Target { return far.Sample(samp, uv); }
",
    );
    assert!(text.contains("texture2d<float> far [[texture(127)]]"));
    assert!(text.contains("sampler samp [[sampler(15)]]"));
}

#[test]
fn test_buffer_structs_packed() {
    let text = msl(
        "
struct Light { float3 direction; float intensity; float2 range; };
ConstantBuffer<Light> light : binding(0);
[fragment]
float4 ps() : SV_Target { return float4(light.direction * light.intensity, light.range.x); }
",
    );
    assert!(text.contains(
        "struct Light {\n    packed_float3 direction;\n    float intensity;\n    float2 range;\n    uint _pad;\n    uint _pad_1;\n};"
    ));
    assert!(text.contains("constant Light& light [[buffer(0)]]"));
}
