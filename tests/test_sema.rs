use turnip_shader_xc::{
    analyze_source,
    ir::{Builtin, IoBinding, IoSource, Stage},
    sema::SemanticErrorKind,
    types::{ScalarKind, Type},
    CompileError,
};

/// A fragment entry point to make otherwise entry-less snippets complete
const FRAGMENT: &str = "
[fragment]
float4 ps_main() : SV_Target { return float4(1.0, 0.0, 0.0, 1.0); }
";

fn error_kind(source: &str) -> SemanticErrorKind {
    match analyze_source(source) {
        Err(CompileError::Semantic(e)) => e.kind,
        Err(other) => panic!("expected a semantic error, got {}", other),
        Ok(_) => panic!("analysis should have failed"),
    }
}

fn with_fragment(source: &str) -> String {
    format!("{}\n{}", source, FRAGMENT)
}

#[test]
fn test_vertex_scenario() {
    let module = analyze_source(
        "struct VSOut { float4 pos; }; [vertex] VSOut main() { VSOut o; o.pos = float4(0,0,0,1); return o; }",
    )
    .expect("Analysis failure");
    assert_eq!(module.entry_points.len(), 1);
    let entry = &module.entry_points[0];
    assert_eq!(entry.stage, Stage::Vertex);
    assert_eq!(entry.name, "main");
    assert!(entry.inputs.is_empty());
    assert_eq!(entry.outputs.len(), 1);
    // The only float4 output becomes the position
    assert_eq!(entry.outputs[0].binding, IoBinding::Builtin(Builtin::Position));
    assert_eq!(entry.outputs[0].source, IoSource::ReturnMember(0));
}

#[test]
fn test_interface_locations() {
    let module = analyze_source(
        "
struct VertexIn { float3 position : POSITION; uint id : SV_VertexID; int material : MATERIAL; };
struct VertexOut { float4 clip : SV_Position; float2 uv : TEXCOORD0; int material : MATERIAL; };

[vertex]
VertexOut vs_main(VertexIn input) {
    VertexOut o;
    o.clip = float4(input.position, 1.0);
    o.uv = float2(0.0, 0.0);
    o.material = input.material;
    return o;
}
",
    )
    .expect("Analysis failure");
    let entry = &module.entry_points[0];
    let bindings: Vec<_> = entry.inputs.iter().map(|v| v.binding).collect();
    assert_eq!(
        bindings,
        vec![
            IoBinding::Location(0),
            IoBinding::Builtin(Builtin::VertexIndex),
            IoBinding::Location(1),
        ]
    );
    assert_eq!(
        entry.inputs[2].source,
        IoSource::ParamMember { param: 0, member: 2 }
    );
    // Integer varyings are never interpolated
    assert!(entry.inputs[2].flat);
    assert!(!entry.inputs[0].flat);
    let outputs: Vec<_> = entry.outputs.iter().map(|v| (v.binding, v.flat)).collect();
    assert_eq!(
        outputs,
        vec![
            (IoBinding::Builtin(Builtin::Position), false),
            (IoBinding::Location(0), false),
            (IoBinding::Location(1), true),
        ]
    );
}

#[test]
fn test_fragment_targets() {
    let module = analyze_source(
        "
struct Targets { float4 color : SV_Target1; float4 normal; };
[fragment]
Targets ps(float4 frag : SV_Position, bool front : SV_IsFrontFace) {
    Targets t;
    t.color = frag;
    t.normal = front ? float4(1.0, 1.0, 1.0, 1.0) : float4(0.0, 0.0, 0.0, 0.0);
    return t;
}
",
    )
    .expect("Analysis failure");
    let entry = &module.entry_points[0];
    assert_eq!(entry.inputs[0].binding, IoBinding::Builtin(Builtin::Position));
    assert_eq!(entry.inputs[1].binding, IoBinding::Builtin(Builtin::FrontFacing));
    assert_eq!(entry.outputs[0].binding, IoBinding::Location(1));
    // The unannotated target takes the first free location
    assert_eq!(entry.outputs[1].binding, IoBinding::Location(0));
}

#[test]
fn test_compute_entry() {
    let module = analyze_source(
        "
RWStructuredBuffer<float> data : binding(0);
[compute]
[numthreads(64, 2, 1)]
void cs(uint3 id : SV_DispatchThreadID) {
    data[id.x] = data[id.x] * 2.0;
}
",
    )
    .expect("Analysis failure");
    let entry = &module.entry_points[0];
    assert_eq!(entry.stage, Stage::Compute);
    assert_eq!(entry.workgroup_size, [64, 2, 1]);
    assert_eq!(entry.inputs[0].ty, Type::Vector(ScalarKind::Uint, 3));
    assert_eq!(module.resources[0].slot, 0);
}

#[test]
fn test_forward_call_order() {
    let module = analyze_source(&with_fragment(
        "
float twice(float x) { return helper(x) * 2.0; }
float helper(float x) { return x + 1.0; }
",
    ))
    .expect("Analysis failure");
    let names: Vec<_> = module
        .call_order
        .iter()
        .map(|id| module.functions[id.0].name.as_str())
        .collect();
    let helper = names.iter().position(|n| *n == "helper");
    let twice = names.iter().position(|n| *n == "twice");
    assert!(helper < twice);
}

#[test]
fn test_implicit_conversions() {
    analyze_source(&with_fragment(
        "
float widen(int i, uint u) {
    float a = i;
    float2 b = float2(1, 2) * 3;
    float c = u + 1;
    int3 d = int3(1, 2, 3) + 1;
    return a + b.x + c + (float)d.y;
}
",
    ))
    .expect("Analysis failure");
}

#[test]
fn test_type_mismatch() {
    assert_eq!(
        error_kind(&with_fragment("void f() { float x = 1.5; int i = x; }")),
        SemanticErrorKind::TypeMismatch
    );
    assert_eq!(
        error_kind(&with_fragment("void f() { int i = 1; uint u = i; }")),
        SemanticErrorKind::TypeMismatch
    );
    assert_eq!(
        error_kind(&with_fragment("void f() { float3 v = float4(0.0, 0.0, 0.0, 0.0); }")),
        SemanticErrorKind::TypeMismatch
    );
}

#[test]
fn test_undefined_and_redefined() {
    assert_eq!(
        error_kind(&with_fragment("float f() { return missing; }")),
        SemanticErrorKind::UndefinedSymbol
    );
    assert_eq!(
        error_kind(&with_fragment("void f() { float x = 1.0; float x = 2.0; }")),
        SemanticErrorKind::Redefinition
    );
    // Shadowing in an inner block is fine
    analyze_source(&with_fragment("void f() { float x = 1.0; { float x = 2.0; } }")).expect("Analysis failure");
}

#[test]
fn test_resource_visible_after_declaration() {
    assert_eq!(
        error_kind(
            "
[fragment]
float4 ps(float2 uv : TEXCOORD0) : SV_Target { return tex.Sample(samp, uv); }
Texture2D tex : binding(0);
SamplerState samp : binding(1);
"
        ),
        SemanticErrorKind::UndefinedSymbol
    );
}

#[test]
fn test_duplicate_binding() {
    assert_eq!(
        error_kind(&with_fragment(
            "
Texture2D color : binding(0);
SamplerState color_sampler : binding(0);
"
        )),
        SemanticErrorKind::DuplicateBinding
    );
}

#[test]
fn test_negative_binding() {
    assert_eq!(
        error_kind(&with_fragment("Texture2D color : binding(-1);")),
        SemanticErrorKind::InvalidBinding
    );
}

#[test]
fn test_missing_return() {
    assert_eq!(
        error_kind(&with_fragment(
            "float f(float x) { if (x > 0.0) { return 1.0; } }"
        )),
        SemanticErrorKind::MissingReturn
    );
    assert_eq!(
        error_kind(&with_fragment(
            "float f(float x) { while (x > 0.0) { return 1.0; } }"
        )),
        SemanticErrorKind::MissingReturn
    );
    analyze_source(&with_fragment(
        "float f(float x) { if (x > 0.0) { return 1.0; } else { return 2.0; } }",
    ))
    .expect("Analysis failure");
}

#[test]
fn test_discard_outside_fragment() {
    assert_eq!(
        error_kind(
            "
[vertex]
float4 vs(float4 p : POSITION) : SV_Position {
    if (p.x < 0.0) { discard; }
    return p;
}
"
        ),
        SemanticErrorKind::DiscardOutsideFragment
    );
    // Also through a helper called from a vertex entry point
    assert_eq!(
        error_kind(
            "
void kill(float x) { if (x < 0.0) { discard; } }
[vertex]
float4 vs(float4 p : POSITION) : SV_Position {
    kill(p.x);
    return p;
}
"
        ),
        SemanticErrorKind::DiscardOutsideFragment
    );
}

#[test]
fn test_implicit_lod_outside_fragment() {
    assert_eq!(
        error_kind(
            "
Texture2D tex : binding(0);
SamplerState samp : binding(1);
[vertex]
float4 vs(float2 uv : TEXCOORD0) : SV_Position { return tex.Sample(samp, uv); }
"
        ),
        SemanticErrorKind::ImplicitLodOutsideFragment
    );
    analyze_source(
        "
Texture2D tex : binding(0);
SamplerState samp : binding(1);
[vertex]
float4 vs(float2 uv : TEXCOORD0) : SV_Position { return tex.SampleLevel(samp, uv, 0.0); }
",
    )
    .expect("Analysis failure");
}

#[test]
fn test_control_flow_errors() {
    assert_eq!(
        error_kind(&with_fragment("void f() { break; }")),
        SemanticErrorKind::InvalidControlFlow
    );
    assert_eq!(
        error_kind(&with_fragment(
            "float f(float x) { return g(x); } float g(float x) { return f(x); }"
        )),
        SemanticErrorKind::RecursiveCall
    );
}

#[test]
fn test_entry_point_errors() {
    assert_eq!(
        error_kind("float f() { return 1.0; }"),
        SemanticErrorKind::InvalidEntryPoint
    );
    assert_eq!(
        error_kind("[compute] void cs() {}"),
        SemanticErrorKind::InvalidEntryPoint
    );
    assert_eq!(
        error_kind(&with_fragment(
            "[fragment] float4 other() : SV_Target { return float4(0.0, 0.0, 0.0, 0.0); }"
        )),
        SemanticErrorKind::InvalidEntryPoint
    );
    // Vertex shaders must output a position
    assert_eq!(
        error_kind("[vertex] float2 vs() : TEXCOORD0 { return float2(0.0, 0.0); }"),
        SemanticErrorKind::InvalidEntryPoint
    );
}

#[test]
fn test_swizzle_and_index() {
    assert_eq!(
        error_kind(&with_fragment("float f(float4 v) { return v.q; }")),
        SemanticErrorKind::InvalidSwizzle
    );
    analyze_source(&with_fragment(
        "float f(float4 v, float3x3 m) { float a[4]; a[1] = v.w; return a[1] + v.rgb.g + m[2].z; }",
    ))
    .expect("Analysis failure");
}

#[test]
fn test_intrinsic_arguments() {
    assert_eq!(
        error_kind(&with_fragment("float f(float x) { return clamp(x, 0.0); }")),
        SemanticErrorKind::ArgumentCount
    );
    analyze_source(&with_fragment(
        "
float3 f(float3 n, float3 l, float4x4 m) {
    float d = saturate(dot(n, l));
    float4 p = mul(m, float4(n, 1.0));
    float3 r = reflect(-l, normalize(n));
    return lerp(r, cross(n, l), d) + p.xyz * (any(n > l) ? 1.0 : 0.0);
}
",
    ))
    .expect("Analysis failure");
}

#[test]
fn test_do_while_returns() {
    analyze_source(&with_fragment(
        "float f(float x) { do { return x; } while (x > 0.0); }",
    ))
    .expect("Analysis failure");
    analyze_source(&with_fragment(
        "float f(float x) { do { if (x > 1.0) { return 2.0; } else { return x; } } while (true); }",
    ))
    .expect("Analysis failure");
    // A break or continue can reach the code after the loop
    assert_eq!(
        error_kind(&with_fragment(
            "float f(float x) { do { if (x > 1.0) { break; } return x; } while (x > 0.0); }"
        )),
        SemanticErrorKind::MissingReturn
    );
    assert_eq!(
        error_kind(&with_fragment(
            "float f(float x) { do { if (x > 1.0) { continue; } return x; } while (x > 0.0); }"
        )),
        SemanticErrorKind::MissingReturn
    );
}

#[test]
fn test_binding_ceilings() {
    analyze_source(&with_fragment("Texture2D t : binding(127); SamplerState s : binding(15);"))
        .expect("Analysis failure");
    for declaration in [
        "Texture2D t : binding(128);",
        "SamplerState s : binding(16);",
        "struct C { float4 v; }; ConstantBuffer<C> c : binding(31);",
        "RWStructuredBuffer<uint> counts : binding(31);",
    ] {
        assert_eq!(
            error_kind(&with_fragment(declaration)),
            SemanticErrorKind::InvalidBinding
        );
    }
}

#[test]
fn test_buffer_matrices_need_four_columns() {
    for declaration in [
        "StructuredBuffer<float4x3> m : binding(0);",
        "struct S { float2x2 m; }; ConstantBuffer<S> s : binding(0);",
        "struct T { float3x3 m[2]; }; struct S { T t; }; RWStructuredBuffer<S> s : binding(0);",
    ] {
        assert_eq!(
            error_kind(&with_fragment(declaration)),
            SemanticErrorKind::InvalidResourceType
        );
    }
    analyze_source(&with_fragment("StructuredBuffer<float3x4> m : binding(0);")).expect("Analysis failure");
}

#[test]
fn test_vertex_input_semantics_kept() {
    let module = analyze_source(
        "
struct VertexIn { float3 position : POSITION; float2 uv : TEXCOORD0; };
[vertex]
float4 vs(VertexIn input, uint id : SV_VertexID) : SV_Position { return float4(input.position, input.uv.x); }
",
    )
    .expect("Analysis failure");
    let inputs = &module.entry_points[0].inputs;
    assert_eq!(inputs[0].semantic.as_deref(), Some("POSITION"));
    assert_eq!(inputs[1].semantic.as_deref(), Some("TEXCOORD0"));
    assert_eq!(inputs[2].semantic, None);
}
