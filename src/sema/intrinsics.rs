//! Builtin functions and their argument rules.

use phf::phf_map;

use super::kinds::{KindMask, ShapeMask};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Abs,
    Min,
    Max,
    Clamp,
    Sqrt,
    Rsqrt,
    Sin,
    Cos,
    Tan,
    Exp,
    Exp2,
    Log,
    Log2,
    Pow,
    Floor,
    Ceil,
    Frac,
    Lerp,
    Step,
    SmoothStep,
    Saturate,
    Normalize,
    Length,
    Distance,
    Dot,
    Cross,
    Reflect,
    Mul,
    Transpose,
    Any,
    All,
    Select,
}

pub static INTRINSICS: phf::Map<&'static str, Intrinsic> = phf_map! {
    "abs" => Intrinsic::Abs,
    "min" => Intrinsic::Min,
    "max" => Intrinsic::Max,
    "clamp" => Intrinsic::Clamp,
    "sqrt" => Intrinsic::Sqrt,
    "rsqrt" => Intrinsic::Rsqrt,
    "sin" => Intrinsic::Sin,
    "cos" => Intrinsic::Cos,
    "tan" => Intrinsic::Tan,
    "exp" => Intrinsic::Exp,
    "exp2" => Intrinsic::Exp2,
    "log" => Intrinsic::Log,
    "log2" => Intrinsic::Log2,
    "pow" => Intrinsic::Pow,
    "floor" => Intrinsic::Floor,
    "ceil" => Intrinsic::Ceil,
    "frac" => Intrinsic::Frac,
    "lerp" => Intrinsic::Lerp,
    "step" => Intrinsic::Step,
    "smoothstep" => Intrinsic::SmoothStep,
    "saturate" => Intrinsic::Saturate,
    "normalize" => Intrinsic::Normalize,
    "length" => Intrinsic::Length,
    "distance" => Intrinsic::Distance,
    "dot" => Intrinsic::Dot,
    "cross" => Intrinsic::Cross,
    "reflect" => Intrinsic::Reflect,
    "mul" => Intrinsic::Mul,
    "transpose" => Intrinsic::Transpose,
    "any" => Intrinsic::Any,
    "all" => Intrinsic::All,
    "select" => Intrinsic::Select,
};

/// How the analyzer types a call to an intrinsic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// `arity` arguments unified to one scalar or vector type, which is also the result type
    Componentwise {
        arity: usize,
        kinds: KindMask,
        shapes: ShapeMask,
    },
    /// `arity` float vectors of one type, reduced to a float scalar
    Reduce { arity: usize },
    /// `float3 x float3 -> float3`
    Cross,
    /// Matrix/vector products, see [crate::sema::expr]
    Mul,
    /// `floatRxC -> floatCxR`
    Transpose,
    /// `bool`/`boolN -> bool`
    Test,
    /// `select(cond, accept, reject)`, component-wise when `cond` is a vector
    Select,
}

impl Intrinsic {
    pub fn lookup(name: &str) -> Option<Self> {
        INTRINSICS.get(name).copied()
    }

    pub fn name(&self) -> &'static str {
        INTRINSICS
            .entries()
            .find(|(_, i)| *i == self)
            .map(|(name, _)| *name)
            .unwrap_or("?")
    }

    pub fn signature(&self) -> Signature {
        use Intrinsic::*;
        let float = |arity| Signature::Componentwise {
            arity,
            kinds: KindMask::FLOAT,
            shapes: ShapeMask::SCALAR_OR_VECTOR,
        };
        match self {
            Abs => Signature::Componentwise {
                arity: 1,
                kinds: KindMask::SIGNED,
                shapes: ShapeMask::SCALAR_OR_VECTOR,
            },
            Min | Max => Signature::Componentwise {
                arity: 2,
                kinds: KindMask::NUMERIC,
                shapes: ShapeMask::SCALAR_OR_VECTOR,
            },
            Clamp => Signature::Componentwise {
                arity: 3,
                kinds: KindMask::NUMERIC,
                shapes: ShapeMask::SCALAR_OR_VECTOR,
            },
            Sqrt | Rsqrt | Sin | Cos | Tan | Exp | Exp2 | Log | Log2 | Floor | Ceil | Frac
            | Saturate => float(1),
            Pow | Step => float(2),
            Lerp | SmoothStep => float(3),
            Normalize => Signature::Componentwise {
                arity: 1,
                kinds: KindMask::FLOAT,
                shapes: ShapeMask::VECTOR,
            },
            Reflect => Signature::Componentwise {
                arity: 2,
                kinds: KindMask::FLOAT,
                shapes: ShapeMask::VECTOR,
            },
            Length => Signature::Reduce { arity: 1 },
            Distance | Dot => Signature::Reduce { arity: 2 },
            Cross => Signature::Cross,
            Mul => Signature::Mul,
            Transpose => Signature::Transpose,
            Any | All => Signature::Test,
            Select => Signature::Select,
        }
    }

    pub fn arity(&self) -> usize {
        match self.signature() {
            Signature::Componentwise { arity, .. } | Signature::Reduce { arity } => arity,
            Signature::Cross | Signature::Mul => 2,
            Signature::Transpose | Signature::Test => 1,
            Signature::Select => 3,
        }
    }
}
