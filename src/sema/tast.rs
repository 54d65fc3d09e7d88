//! Typed, validated module produced by the analyzer.
//!
//! Names are resolved to ids, every expression carries its [Type], and implicit conversions are explicit
//! [ExprKind::Convert]/[ExprKind::Splat] nodes. Compound assignments and `++`/`--` are already desugared.

use arrayvec::ArrayVec;

use crate::{
    frontend::{
        ast::{BinaryOp, UnaryOp},
        Position,
    },
    types::{ResourceKind, ScalarKind, StructDef, Type},
};

use super::intrinsics::Intrinsic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FunctionId(pub usize);

/// A function-local variable. Parameters come first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct TypedModule {
    pub structs: Vec<StructDef>,
    pub resources: Vec<Resource>,
    /// In declaration order, indexed by [FunctionId]
    pub functions: Vec<Function>,
    /// Every function, callees before their callers, otherwise in declaration order
    pub call_order: Vec<FunctionId>,
    pub entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
    pub slot: u32,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub var: VarId,
    pub semantic: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub return_semantic: Option<String>,
    pub locals: Vec<Variable>,
    pub body: Vec<Stmt>,
    pub stage: Option<Stage>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Declaration point of a local. Without an initializer the local keeps its zero value.
    Local { var: VarId, init: Option<Expr> },
    Assign { target: Expr, value: Expr },
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Vec<Stmt>,
    },
    /// `while`, `for` and `do`/`while`. `for` initializers are hoisted into an enclosing [Stmt::Block].
    Loop {
        cond: Option<Expr>,
        body: Vec<Stmt>,
        step: Vec<Stmt>,
        /// `false` for `do`/`while`
        test_first: bool,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Discard,
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
}
impl Literal {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Bool(_) => ScalarKind::Bool,
            Self::Int(_) => ScalarKind::Int,
            Self::Uint(_) => ScalarKind::Uint,
            Self::Float(_) => ScalarKind::Float,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Local(VarId),
    Resource(ResourceId),
    /// Struct field by index, on a struct value or a constant buffer
    Member { base: Box<Expr>, index: usize },
    /// Vector component selection. A single component yields a scalar.
    Swizzle {
        base: Box<Expr>,
        components: ArrayVec<u8, 4>,
    },
    /// Array element, vector component, matrix row or structured buffer element
    Index { base: Box<Expr>, index: Box<Expr> },
    Unary { op: UnaryOp, operand: Box<Expr> },
    /// Operands have identical types, except `matrix * scalar` where the matrix is on the left
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `cond ? accept : reject` with a scalar bool condition. Only the chosen side is evaluated.
    Conditional {
        cond: Box<Expr>,
        accept: Box<Expr>,
        reject: Box<Expr>,
    },
    /// Element-kind conversion to `ty`, same shape
    Convert(Box<Expr>),
    /// Scalar to vector `ty`
    Splat(Box<Expr>),
    /// Vector, matrix (from row vectors) construction
    Construct(Vec<Expr>),
    Call { function: FunctionId, args: Vec<Expr> },
    Intrinsic { intrinsic: Intrinsic, args: Vec<Expr> },
    Sample {
        texture: ResourceId,
        sampler: ResourceId,
        coord: Box<Expr>,
        /// Explicit level of detail for `SampleLevel`
        lod: Option<Box<Expr>>,
    },
}

impl Expr {
    pub fn literal(lit: Literal) -> Self {
        Self {
            ty: Type::Scalar(lit.kind()),
            kind: ExprKind::Literal(lit),
        }
    }

    /// Value of a constant integer index expression
    pub fn const_index(&self) -> Option<i64> {
        match self.kind {
            ExprKind::Literal(Literal::Int(v)) => Some(v as i64),
            ExprKind::Literal(Literal::Uint(v)) => Some(v as i64),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Vertex,
    Fragment,
    Compute,
}
impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }
}

/// Builtin values a stage can read or write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    /// Clip-space position out of a vertex shader, window coordinates into a fragment shader
    Position,
    VertexIndex,
    InstanceIndex,
    FrontFacing,
    FragDepth,
    GlobalInvocationId,
    WorkgroupId,
    LocalInvocationId,
    LocalInvocationIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoBinding {
    Builtin(Builtin),
    /// User varying, vertex attribute or render target index
    Location(u32),
}

/// Where an interface value lives relative to the entry function's signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoSource {
    Param(usize),
    ParamMember { param: usize, member: usize },
    Return,
    ReturnMember(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceVar {
    pub name: String,
    pub ty: Type,
    pub binding: IoBinding,
    /// Integer varyings are never interpolated
    pub flat: bool,
    /// Non-system semantic written in source, e.g. `POSITION` or `TEXCOORD0`
    pub semantic: Option<String>,
    pub source: IoSource,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntryPoint {
    pub name: String,
    pub stage: Stage,
    pub function: FunctionId,
    /// `[numthreads]`, `[1, 1, 1]` outside compute
    pub workgroup_size: [u32; 3],
    pub inputs: Vec<InterfaceVar>,
    pub outputs: Vec<InterfaceVar>,
}
