use std::collections::BTreeSet;

use turnip_shader_xc::{
    ir::{cfg, verify::verify, BindingClass, BlockId, Function, Merge, Module, Op, ResourceId, Terminator},
    lower_source,
};

fn lower(source: &str) -> Module {
    lower_source(source).expect("Lowering failure")
}

fn function<'a>(module: &'a Module, name: &str) -> &'a Function {
    module
        .functions
        .iter()
        .find(|f| f.name == name)
        .expect("No such function")
}

fn merges(function: &Function) -> Vec<Merge> {
    function.blocks.iter().filter_map(|b| b.merge).collect()
}

const RESOURCES: &str = "
struct Params { float4 tint; float scale; };
ConstantBuffer<Params> params : binding(0);
Texture2D tex : binding(1);
SamplerState samp : binding(2);
StructuredBuffer<float4> colors : binding(3);
RWStructuredBuffer<uint> counters : binding(4);

float4 tinted(float2 uv) {
    return tex.Sample(samp, uv) * params.tint;
}

[fragment]
float4 ps(float2 uv : TEXCOORD0, uint index : INDEX) : SV_Target {
    counters[index] = counters[index] + 1u;
    return tinted(uv) + colors[index];
}
";

#[test]
fn test_binding_classes() {
    let module = lower(RESOURCES);
    let classes: Vec<_> = module
        .resources
        .iter()
        .map(|r| (r.binding.class.register_letter(), r.binding.slot))
        .collect();
    assert_eq!(classes, vec![('b', 0), ('t', 1), ('s', 2), ('t', 3), ('u', 4)]);
    assert_eq!(module.resources[4].binding.class, BindingClass::UnorderedAccess);
}

#[test]
fn test_resource_usage() {
    let module = lower(RESOURCES);
    let usage = cfg::resource_usage(&module);
    let tinted = module.functions.iter().position(|f| f.name == "tinted").expect("No tinted");
    let ps = module.functions.iter().position(|f| f.name == "ps").expect("No ps");
    assert_eq!(
        usage[tinted],
        BTreeSet::from([ResourceId(0), ResourceId(1), ResourceId(2)])
    );
    // Callers see everything their callees touch
    assert_eq!(usage[ps].len(), 5);
}

#[test]
fn test_parameters_copied_to_locals() {
    let module = lower(RESOURCES);
    let tinted = function(&module, "tinted");
    assert_eq!(tinted.params.len(), 1);
    assert_eq!(tinted.locals[0].name, "uv");
    let entry = &tinted.blocks[0];
    assert!(tinted.is_param_copy(&entry.instructions[0]));
}

#[test]
fn test_if_else_structure() {
    let module = lower(
        "
float pick(float x) {
    float r;
    if (x > 0.5) {
        r = 1.0;
    } else {
        r = 2.0;
    }
    return r;
}
[fragment]
float4 ps() : SV_Target { return float4(pick(0.0), 0.0, 0.0, 1.0); }
",
    );
    let pick = function(&module, "pick");
    let merges = merges(pick);
    assert_eq!(merges.len(), 1);
    let Merge::Selection(merge) = merges[0] else {
        panic!("expected a selection merge");
    };
    assert!(matches!(pick.blocks[0].terminator, Terminator::CondBranch { .. }));
    // The merge block comes after both arms
    assert_eq!(merge, BlockId(pick.blocks.len() as u32 - 1));
    assert!(matches!(pick.block(merge).terminator, Terminator::Return(Some(_))));
}

#[test]
fn test_loop_structure() {
    let module = lower(
        "
float sum(int n) {
    float total = 0.0;
    for (int i = 0; i < n; i++) {
        if (i == 3) { continue; }
        if (i == 7) { break; }
        total += 1.0;
    }
    return total;
}
[fragment]
float4 ps() : SV_Target { return float4(sum(10), 0.0, 0.0, 1.0); }
",
    );
    let sum = function(&module, "sum");
    let loops: Vec<_> = merges(sum)
        .into_iter()
        .filter_map(|m| match m {
            Merge::Loop { merge, continuing } => Some((merge, continuing)),
            Merge::Selection(_) => None,
        })
        .collect();
    assert_eq!(loops.len(), 1);
    let (merge, continuing) = loops[0];
    // The continuing block branches back to the loop header
    let header = sum
        .blocks
        .iter()
        .position(|b| matches!(b.merge, Some(Merge::Loop { .. })))
        .expect("No loop header");
    assert_eq!(
        sum.block(continuing).terminator,
        Terminator::Branch(BlockId(header as u32))
    );
    assert!(merge.0 > continuing.0);
}

#[test]
fn test_short_circuit_uses_local() {
    let module = lower(
        "
bool both(float a, float b) { return a > 0.0 && b > 0.0; }
[fragment]
float4 ps() : SV_Target { return both(1.0, 2.0) ? float4(1.0, 1.0, 1.0, 1.0) : float4(0.0, 0.0, 0.0, 0.0); }
",
    );
    let both = function(&module, "both");
    // The right-hand side is only evaluated in its own block
    assert!(both.blocks.len() >= 3);
    assert!(both.locals.len() > both.params.len());
    assert!(matches!(merges(both).as_slice(), [Merge::Selection(_)]));
}

#[test]
fn test_discard_kills() {
    let module = lower(
        "
[fragment]
float4 ps(float4 color : COLOR) : SV_Target {
    if (color.a < 0.5) { discard; }
    return color;
}
",
    );
    let ps = function(&module, "ps");
    assert!(ps.blocks.iter().any(|b| b.terminator == Terminator::Kill));
}

#[test]
fn test_blocks_in_reverse_postorder() {
    let module = lower(RESOURCES);
    for function in &module.functions {
        let order = cfg::reverse_postorder(function);
        let expected: Vec<_> = (0..function.blocks.len() as u32).map(BlockId).collect();
        assert_eq!(order, expected, "'{}' is not compacted", function.name);
    }
}

#[test]
fn test_values_defined_before_use() {
    let module = lower(RESOURCES);
    verify(&module).expect("Verification failure");
    for function in &module.functions {
        for block in &function.blocks {
            let mut defined: Vec<_> = (0..function.params.len() as u32)
                .map(turnip_shader_xc::ir::ValueId)
                .collect();
            for instruction in &block.instructions {
                for operand in instruction.op.operands() {
                    assert!(defined.contains(&operand), "{} used before definition", operand);
                }
                defined.extend(instruction.result);
            }
        }
    }
}

#[test]
fn test_matrix_product() {
    let module = lower(
        "
struct Camera { float4x4 view_proj; };
ConstantBuffer<Camera> camera : binding(0);
[vertex]
float4 vs(float3 p : POSITION) : SV_Position { return mul(camera.view_proj, float4(p, 1.0)); }
",
    );
    let vs = function(&module, "vs");
    let ops: Vec<&Op> = vs.blocks.iter().flat_map(|b| &b.instructions).map(|i| &i.op).collect();
    assert!(ops.iter().any(|op| matches!(op, Op::Intrinsic(i, args) if i.name() == "mul" && args.len() == 2)));
    assert!(ops.iter().any(|op| matches!(op, Op::Load(_))));
}

#[test]
fn test_display() {
    let module = lower(RESOURCES);
    let text = module.to_string();
    assert!(text.contains("res0 params: ConstantBuffer<Params> @ b0"));
    assert!(text.contains("fn tinted(%0: float2 uv) -> float4 {"));
    assert!(text.contains("fn ps(%0: float2 uv, %1: uint index) -> float4 [fragment] {"));
    assert!(text.contains("entry fragment ps"));
}
