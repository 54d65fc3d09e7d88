//! The type model shared by the analyzer, the IR and every backend.
//!
//! Scalars, vectors and matrices compare structurally; structs compare nominally through their [StructId].
//! Matrices are always `float` and are described as `rows x cols`, i.e. `float4x3` has four rows of three columns.

use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScalarKind {
    Bool,
    Int,
    Uint,
    Float,
}
impl ScalarKind {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, Self::Bool)
    }
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Int | Self::Uint)
    }
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Uint => "uint",
            Self::Float => "float",
        }
    }
}

/// Index of a struct in the module's struct table
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// `ConstantBuffer<S>`, read-only uniform data
    ConstantBuffer(StructId),
    /// `Texture2D`, always sampled as `float4`
    Texture2D,
    /// `SamplerState`
    Sampler,
    /// `StructuredBuffer<T>` or `RWStructuredBuffer<T>`
    StructuredBuffer { element: Box<Type>, writable: bool },
}
impl ResourceKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::ConstantBuffer(_) => "ConstantBuffer",
            Self::Texture2D => "Texture2D",
            Self::Sampler => "SamplerState",
            Self::StructuredBuffer { writable: false, .. } => "StructuredBuffer",
            Self::StructuredBuffer { writable: true, .. } => "RWStructuredBuffer",
        }
    }

    /// Highest binding slot every backend can give a resource of this kind. Metal's argument tables are the
    /// smallest: 31 buffers, 128 textures and 16 samplers.
    pub fn max_slot(&self) -> u32 {
        match self {
            Self::ConstantBuffer(_) | Self::StructuredBuffer { .. } => 30,
            Self::Texture2D => 127,
            Self::Sampler => 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Void,
    Scalar(ScalarKind),
    /// A vector of 2..=4 components
    Vector(ScalarKind, u8),
    Matrix { rows: u8, cols: u8 },
    Struct(StructId),
    /// `None` length is only produced for the contents of structured buffers
    Array(Box<Type>, Option<u32>),
    Resource(ResourceKind),
}

pub const FLOAT: Type = Type::Scalar(ScalarKind::Float);
pub const INT: Type = Type::Scalar(ScalarKind::Int);
pub const UINT: Type = Type::Scalar(ScalarKind::Uint);
pub const BOOL: Type = Type::Scalar(ScalarKind::Bool);

impl Type {
    /// A scalar when `n == 1`, otherwise a vector
    pub fn vector(kind: ScalarKind, n: u8) -> Self {
        if n == 1 {
            Self::Scalar(kind)
        } else {
            Self::Vector(kind, n)
        }
    }

    /// The element kind of scalars, vectors and matrices
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Self::Scalar(k) | Self::Vector(k, _) => Some(*k),
            Self::Matrix { .. } => Some(ScalarKind::Float),
            _ => None,
        }
    }

    /// Number of components of a scalar (1) or vector
    pub fn components(&self) -> Option<u8> {
        match self {
            Self::Scalar(_) => Some(1),
            Self::Vector(_, n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Self::Scalar(_))
    }
    pub fn is_vector(&self) -> bool {
        matches!(self, Self::Vector(..))
    }
    pub fn is_scalar_or_vector(&self) -> bool {
        matches!(self, Self::Scalar(_) | Self::Vector(..))
    }
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Same shape, different element kind. Only meaningful for scalars and vectors.
    pub fn with_kind(&self, kind: ScalarKind) -> Self {
        match self {
            Self::Scalar(_) => Self::Scalar(kind),
            Self::Vector(_, n) => Self::Vector(kind, *n),
            other => other.clone(),
        }
    }

    /// Types that can be stored in local variables, passed and returned by value
    pub fn is_storable(&self) -> bool {
        match self {
            Self::Void | Self::Resource(_) => false,
            Self::Array(elem, len) => len.is_some() && elem.is_storable(),
            _ => true,
        }
    }

    /// Types that may live in buffer memory shared with the host
    pub fn is_host_shareable(&self, structs: &[StructDef]) -> bool {
        match self {
            Self::Scalar(k) | Self::Vector(k, _) => k.is_numeric(),
            Self::Matrix { .. } => true,
            Self::Struct(id) => structs[id.0]
                .members
                .iter()
                .all(|m| m.ty.is_host_shareable(structs)),
            Self::Array(elem, Some(_)) => elem.is_host_shareable(structs),
            Self::Array(_, None) | Self::Void | Self::Resource(_) => false,
        }
    }

    /// Display helper that knows struct names
    pub fn named<'a>(&'a self, structs: &'a [StructDef]) -> NamedType<'a> {
        NamedType { ty: self, structs }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructMember {
    pub name: String,
    pub ty: Type,
    /// Semantic written in source, e.g. `SV_Position`
    pub semantic: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub members: Vec<StructMember>,
}
impl StructDef {
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }
}

pub struct NamedType<'a> {
    ty: &'a Type,
    structs: &'a [StructDef],
}
impl Display for NamedType<'_> {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.ty {
            Type::Void => write!(f, "void"),
            Type::Scalar(k) => write!(f, "{}", k.name()),
            Type::Vector(k, n) => write!(f, "{}{}", k.name(), n),
            Type::Matrix { rows, cols } => write!(f, "float{}x{}", rows, cols),
            Type::Struct(id) => match self.structs.get(id.0) {
                Some(s) => write!(f, "{}", s.name),
                None => write!(f, "struct#{}", id.0),
            },
            Type::Array(elem, Some(len)) => write!(f, "{}[{}]", elem.named(self.structs), len),
            Type::Array(elem, None) => write!(f, "{}[]", elem.named(self.structs)),
            Type::Resource(ResourceKind::ConstantBuffer(id)) => {
                write!(f, "ConstantBuffer<{}>", Type::Struct(*id).named(self.structs))
            }
            Type::Resource(ResourceKind::StructuredBuffer { element, writable }) => write!(
                f,
                "{}StructuredBuffer<{}>",
                if *writable { "RW" } else { "" },
                element.named(self.structs)
            ),
            Type::Resource(r) => write!(f, "{}", r.keyword()),
        }
    }
}

/// Builtin type names usable in declarations, casts and constructors
pub fn builtin_type(name: &str) -> Option<Type> {
    let (kind, rest) = [
        ("bool", ScalarKind::Bool),
        ("int", ScalarKind::Int),
        ("uint", ScalarKind::Uint),
        ("float", ScalarKind::Float),
    ]
    .iter()
    .find_map(|(prefix, kind)| name.strip_prefix(prefix).map(|rest| (*kind, rest)))?;

    let digit = |c: u8| match c {
        b'2'..=b'4' => Some(c - b'0'),
        _ => None,
    };
    match rest.as_bytes() {
        [] => Some(Type::Scalar(kind)),
        [n] => Some(Type::Vector(kind, digit(*n)?)),
        [r, b'x', c] if kind == ScalarKind::Float => Some(Type::Matrix {
            rows: digit(*r)?,
            cols: digit(*c)?,
        }),
        _ => None,
    }
}
