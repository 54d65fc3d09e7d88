//! Enumerants from the SPIR-V 1.3 unified specification and the GLSL.std.450 extended instruction set.
//! Only the values this crate emits are listed.

#![allow(non_camel_case_types)]

pub const MAGIC: u32 = 0x0723_0203;
pub const VERSION_1_3: u32 = 0x0001_0300;
/// Unregistered tool id in the high half, tool version in the low half
pub const GENERATOR: u32 = 0x0000_0001;
pub const HEADER_WORDS: usize = 5;

pub const EXT_GLSL_STD_450: &str = "GLSL.std.450";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum Op {
    Name = 5,
    MemberName = 6,
    ExtInstImport = 11,
    ExtInst = 12,
    MemoryModel = 14,
    EntryPoint = 15,
    ExecutionMode = 16,
    Capability = 17,
    TypeVoid = 19,
    TypeBool = 20,
    TypeInt = 21,
    TypeFloat = 22,
    TypeVector = 23,
    TypeMatrix = 24,
    TypeImage = 25,
    TypeSampler = 26,
    TypeSampledImage = 27,
    TypeArray = 28,
    TypeRuntimeArray = 29,
    TypeStruct = 30,
    TypePointer = 32,
    TypeFunction = 33,
    ConstantTrue = 41,
    ConstantFalse = 42,
    Constant = 43,
    ConstantComposite = 44,
    ConstantNull = 46,
    Function = 54,
    FunctionParameter = 55,
    FunctionEnd = 56,
    FunctionCall = 57,
    Variable = 59,
    Load = 61,
    Store = 62,
    AccessChain = 65,
    Decorate = 71,
    MemberDecorate = 72,
    VectorExtractDynamic = 77,
    VectorShuffle = 79,
    CompositeConstruct = 80,
    CompositeExtract = 81,
    Transpose = 84,
    SampledImage = 86,
    ImageSampleImplicitLod = 87,
    ImageSampleExplicitLod = 88,
    ConvertFToU = 109,
    ConvertFToS = 110,
    ConvertSToF = 111,
    ConvertUToF = 112,
    Bitcast = 124,
    SNegate = 126,
    FNegate = 127,
    IAdd = 128,
    FAdd = 129,
    ISub = 130,
    FSub = 131,
    IMul = 132,
    FMul = 133,
    UDiv = 134,
    SDiv = 135,
    FDiv = 136,
    UMod = 137,
    SRem = 138,
    FRem = 140,
    MatrixTimesScalar = 143,
    VectorTimesMatrix = 144,
    MatrixTimesVector = 145,
    MatrixTimesMatrix = 146,
    Dot = 148,
    Any = 154,
    All = 155,
    LogicalEqual = 164,
    LogicalNotEqual = 165,
    LogicalOr = 166,
    LogicalAnd = 167,
    LogicalNot = 168,
    Select = 169,
    IEqual = 170,
    INotEqual = 171,
    UGreaterThan = 172,
    SGreaterThan = 173,
    UGreaterThanEqual = 174,
    SGreaterThanEqual = 175,
    ULessThan = 176,
    SLessThan = 177,
    ULessThanEqual = 178,
    SLessThanEqual = 179,
    FOrdEqual = 180,
    FOrdNotEqual = 182,
    FUnordNotEqual = 183,
    FOrdLessThan = 184,
    FOrdGreaterThan = 186,
    FOrdLessThanEqual = 188,
    FOrdGreaterThanEqual = 190,
    ShiftRightLogical = 194,
    ShiftRightArithmetic = 195,
    ShiftLeftLogical = 196,
    BitwiseOr = 197,
    BitwiseXor = 198,
    BitwiseAnd = 199,
    Not = 200,
    LoopMerge = 246,
    SelectionMerge = 247,
    Label = 248,
    Branch = 249,
    BranchConditional = 250,
    Kill = 252,
    Return = 253,
    ReturnValue = 254,
    Unreachable = 255,
}
impl Op {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Op::Branch | Op::BranchConditional | Op::Kill | Op::Return | Op::ReturnValue | Op::Unreachable
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum Capability {
    Shader = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum AddressingModel {
    Logical = 0,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum MemoryModel {
    GLSL450 = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum ExecutionModel {
    Vertex = 0,
    Fragment = 4,
    GLCompute = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum ExecutionMode {
    OriginUpperLeft = 7,
    DepthReplacing = 12,
    LocalSize = 17,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum StorageClass {
    UniformConstant = 0,
    Input = 1,
    Uniform = 2,
    Output = 3,
    Function = 7,
    StorageBuffer = 12,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum Decoration {
    Block = 2,
    ColMajor = 5,
    ArrayStride = 6,
    MatrixStride = 7,
    BuiltIn = 11,
    Flat = 14,
    NonWritable = 24,
    Location = 30,
    Binding = 33,
    DescriptorSet = 34,
    Offset = 35,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum BuiltIn {
    Position = 0,
    FragCoord = 15,
    FrontFacing = 17,
    FragDepth = 22,
    WorkgroupId = 26,
    LocalInvocationId = 27,
    GlobalInvocationId = 28,
    LocalInvocationIndex = 29,
    VertexIndex = 42,
    InstanceIndex = 43,
}

/// `Dim`
pub const DIM_2D: u32 = 1;
/// `ImageFormat`
pub const FORMAT_UNKNOWN: u32 = 0;
/// `ImageOperands` mask bit
pub const IMAGE_OPERANDS_LOD: u32 = 0x2;
/// `FunctionControl`, `SelectionControl` and `LoopControl` with no bits set
pub const CONTROL_NONE: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromPrimitive)]
pub enum GLSLstd450 {
    FAbs = 4,
    SAbs = 5,
    Floor = 8,
    Ceil = 9,
    Fract = 10,
    Sin = 13,
    Cos = 14,
    Tan = 15,
    Pow = 26,
    Exp = 27,
    Log = 28,
    Exp2 = 29,
    Log2 = 30,
    Sqrt = 31,
    InverseSqrt = 32,
    FMin = 37,
    UMin = 38,
    SMin = 39,
    FMax = 40,
    UMax = 41,
    SMax = 42,
    FClamp = 43,
    UClamp = 44,
    SClamp = 45,
    FMix = 46,
    Step = 48,
    SmoothStep = 49,
    Length = 66,
    Distance = 67,
    Cross = 68,
    Normalize = 69,
    Reflect = 71,
}
