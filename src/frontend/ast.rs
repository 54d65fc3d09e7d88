//! Untyped syntax tree. Every node owns its children and carries the [Position] it started at.

use super::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Struct(StructDecl),
    Resource(ResourceDecl),
    Function(FunctionDecl),
}

/// A type as written in source, e.g. `float4`, `VSOut` or `StructuredBuffer<Particle>`
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    pub name: String,
    pub generic_arg: Option<Box<TypeRef>>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Semantic {
    pub name: String,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub members: Vec<FieldDecl>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub ty: TypeRef,
    pub name: String,
    pub array_len: Option<u64>,
    pub semantic: Option<Semantic>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDecl {
    pub ty: TypeRef,
    pub name: String,
    /// Kept signed so that negative slots can be diagnosed by the analyzer
    pub binding: i64,
    pub binding_position: Position,
    pub position: Position,
}

/// `[vertex]`, `[numthreads(8, 8, 1)]`
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub args: Vec<i64>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub attributes: Vec<Attribute>,
    pub return_type: TypeRef,
    pub name: String,
    pub params: Vec<Param>,
    pub return_semantic: Option<Semantic>,
    pub body: Block,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub ty: TypeRef,
    pub name: String,
    pub array_len: Option<u64>,
    pub semantic: Option<Semantic>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub is_const: bool,
    pub ty: TypeRef,
    pub name: String,
    pub array_len: Option<u64>,
    pub init: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    VarDecl(VarDecl),
    /// `target = value`, or `target op= value` when `op` is set
    Assign {
        target: Expr,
        op: Option<BinaryOp>,
        value: Expr,
    },
    /// `x++`, `--x`
    IncDec {
        target: Expr,
        increment: bool,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    While {
        cond: Expr,
        body: Block,
    },
    DoWhile {
        body: Block,
        cond: Expr,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Box<Stmt>>,
        body: Block,
    },
    Break,
    Continue,
    Return(Option<Expr>),
    Discard,
    Block(Block),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    IntLit { value: u64, unsigned: bool },
    FloatLit(f32),
    BoolLit(bool),
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        accept: Box<Expr>,
        reject: Box<Expr>,
    },
    /// Function, intrinsic or constructor call: `f(a)`, `dot(a, b)`, `float4(a, 1)`
    Call { callee: String, args: Vec<Expr> },
    /// `tex.Sample(samp, uv)`
    MethodCall {
        receiver: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    /// Struct field or vector swizzle
    Member { base: Box<Expr>, name: String },
    Index { base: Box<Expr>, index: Box<Expr> },
    /// `(float3)value`
    Cast { ty: TypeRef, value: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    LogicalAnd,
    LogicalOr,
}
impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Gt => ">",
            Self::Le => "<=",
            Self::Ge => ">=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
        }
    }
}
