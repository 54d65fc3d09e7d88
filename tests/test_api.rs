use std::thread;

use turnip_shader_xc::{
    compile, compile_to_hlsl, compile_to_msl, compile_to_spirv,
    frontend::{FrontendError, LexErrorReason},
    sema::SemanticErrorKind,
    validate, Artifact, CompileError, Target,
};

const VSOUT: &str = "struct VSOut { float4 pos; }; [vertex] VSOut main() { VSOut o; o.pos = float4(0,0,0,1); return o; }";

fn semantic_kind(source: &str) -> SemanticErrorKind {
    match compile(source, Target::SpirV) {
        Err(CompileError::Semantic(e)) => e.kind,
        other => panic!("expected a semantic error, got {:?}", other),
    }
}

fn rejected_everywhere(source: &str) {
    assert!(!validate(source));
    assert!(compile_to_hlsl(source).is_none());
    assert!(compile_to_msl(source).is_none());
    assert!(compile_to_spirv(source).is_none());
}

#[test]
fn test_vertex_scenario_all_targets() {
    assert!(validate(VSOUT));
    assert!(compile_to_hlsl(VSOUT).is_some());
    assert!(compile_to_msl(VSOUT).is_some());
    let words = compile_to_spirv(VSOUT).expect("SPIR-V compile failure");
    assert_eq!(words[0], 0x0723_0203);
}

#[test]
fn test_compile_artifacts() {
    assert!(matches!(compile(VSOUT, Target::Hlsl), Ok(Artifact::Text(_))));
    assert!(matches!(compile(VSOUT, Target::Msl), Ok(Artifact::Text(_))));
    assert!(matches!(compile(VSOUT, Target::SpirV), Ok(Artifact::Binary(_))));
}

#[test]
fn test_unterminated_comment() {
    let source = "struct A { float x; }; /* never closed";
    rejected_everywhere(source);
    assert!(matches!(
        compile(source, Target::Hlsl),
        Err(CompileError::Frontend(FrontendError::Lex(e))) if e.reason == LexErrorReason::UnterminatedComment
    ));
}

#[test]
fn test_syntax_error() {
    let source = "[fragment] float4 ps() : SV_Target { return float4(1.0, 1.0, 1.0, 1.0) }";
    rejected_everywhere(source);
    assert!(matches!(
        compile(source, Target::Msl),
        Err(CompileError::Frontend(FrontendError::Syntax(_)))
    ));
}

#[test]
fn test_discard_in_vertex() {
    let source = "
[vertex]
float4 vs(float4 p : POSITION) : SV_Position {
    if (p.w < 0.0) { discard; }
    return p;
}
";
    rejected_everywhere(source);
    assert_eq!(semantic_kind(source), SemanticErrorKind::DiscardOutsideFragment);
}

#[test]
fn test_duplicate_binding() {
    let source = "
Texture2D a : binding(3);
Texture2D b : binding(3);
SamplerState s : binding(0);
[fragment]
float4 ps(float2 uv : TEXCOORD0) : SV_Target { return a.Sample(s, uv) + b.Sample(s, uv); }
";
    rejected_everywhere(source);
    assert_eq!(semantic_kind(source), SemanticErrorKind::DuplicateBinding);
}

#[test]
fn test_missing_return() {
    let source = "
float pick(float x) { if (x > 0.0) { return 1.0; } }
[fragment]
float4 ps() : SV_Target { return float4(pick(1.0), 0.0, 0.0, 1.0); }
";
    rejected_everywhere(source);
    assert_eq!(semantic_kind(source), SemanticErrorKind::MissingReturn);
}

#[test]
fn test_error_messages_have_positions() {
    let error = compile("[fragment]\nfloat4 ps() : SV_Target { return missing; }", Target::Hlsl)
        .expect_err("Compile should fail");
    let CompileError::Semantic(semantic) = &error else {
        panic!("expected a semantic error, got {}", error);
    };
    assert_eq!(semantic.kind, SemanticErrorKind::UndefinedSymbol);
    assert_eq!(semantic.position.line, 2);
    assert!(error.to_string().contains("'missing' is not defined"));
}

#[test]
fn test_deterministic() {
    for target in [Target::Hlsl, Target::Msl, Target::SpirV] {
        assert_eq!(compile(VSOUT, target), compile(VSOUT, target));
    }
}

#[test]
fn test_parallel_compiles() {
    let expected = compile_to_spirv(VSOUT).expect("SPIR-V compile failure");
    let handles: Vec<_> = (0..8)
        .map(|i| {
            thread::spawn(move || {
                if i % 2 == 0 {
                    compile_to_spirv(VSOUT)
                } else {
                    compile_to_hlsl(VSOUT).map(|_| vec![])
                }
            })
        })
        .collect();
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.join().expect("Compile thread panicked");
        if i % 2 == 0 {
            assert_eq!(result.as_deref(), Some(expected.as_slice()));
        } else {
            assert!(result.is_some());
        }
    }
}

#[test]
fn test_binding_ceilings() {
    let constant = |slot: u32| {
        format!(
            "struct C {{ float4 tint; }};\nConstantBuffer<C> c : binding({});\n[fragment]\nfloat4 ps() : SV_Target {{ return c.tint; }}",
            slot
        )
    };
    let sampled = |texture: u32, sampler: u32| {
        format!(
            "Texture2D t : binding({}); SamplerState s : binding({});\n[fragment]\nfloat4 ps(float2 uv : TEXCOORD0) : SV_Target {{ return t.Sample(s, uv); }}",
            texture, sampler
        )
    };

    for source in [constant(30), sampled(127, 15)] {
        assert!(validate(&source));
        assert!(compile_to_hlsl(&source).is_some());
        assert!(compile_to_msl(&source).is_some());
        assert!(compile_to_spirv(&source).is_some());
    }
    for source in [constant(31), sampled(128, 0), sampled(0, 16)] {
        rejected_everywhere(&source);
        assert_eq!(semantic_kind(&source), SemanticErrorKind::InvalidBinding);
    }
}

#[test]
fn test_deep_nesting() {
    let nested = |n: usize| {
        format!(
            "[fragment]\nfloat4 ps(float4 c : COLOR) : SV_Target {{ return c * {}0.5{}; }}",
            "(".repeat(n),
            ")".repeat(n)
        )
    };
    let shallow = nested(100);
    assert!(validate(&shallow));
    assert!(compile_to_hlsl(&shallow).is_some());
    assert!(compile_to_msl(&shallow).is_some());
    assert!(compile_to_spirv(&shallow).is_some());

    let deep = nested(2000);
    rejected_everywhere(&deep);
    assert!(matches!(
        compile(&deep, Target::SpirV),
        Err(CompileError::Frontend(FrontendError::Syntax(_)))
    ));
}
