//! Target-independent IR: each function is a CFG of basic blocks holding SSA values.
//!
//! Values never cross block boundaries. Anything that must flow between blocks goes through a function-local
//! variable, which is why `&&`, `||` and `?:` lower to a temporary. Structured control flow is kept as merge
//! annotations on the block that opens a construct, in the same shape SPIR-V requires, so text backends can
//! rebuild `if`/`while` without recovering structure from the graph.

pub mod builder;
pub mod cfg;
mod display;
pub mod verify;

use arrayvec::ArrayVec;
use thiserror::Error;

use crate::types::{ResourceKind, StructDef, Type};

pub use crate::frontend::ast::{BinaryOp, UnaryOp};
pub use crate::sema::intrinsics::Intrinsic;
pub use crate::sema::tast::{
    Builtin, EntryPoint, FunctionId, InterfaceVar, IoBinding, IoSource, ResourceId, Stage,
};
pub use builder::lower;

/// An internal invariant was broken while lowering or verifying. Never caused by user input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("internal lowering error in '{function}': {message}")]
pub struct LoweringError {
    pub function: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

/// Parameters occupy the first locals, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocalId(pub u32);

/// Register class of a resource, shared by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingClass {
    /// `b`
    ConstantBuffer,
    /// `t`, textures and read-only buffers
    ShaderResource,
    /// `s`
    Sampler,
    /// `u`, writable buffers
    UnorderedAccess,
}
impl BindingClass {
    pub fn of(kind: &ResourceKind) -> Self {
        match kind {
            ResourceKind::ConstantBuffer(_) => Self::ConstantBuffer,
            ResourceKind::Texture2D | ResourceKind::StructuredBuffer { writable: false, .. } => {
                Self::ShaderResource
            }
            ResourceKind::Sampler => Self::Sampler,
            ResourceKind::StructuredBuffer { writable: true, .. } => Self::UnorderedAccess,
        }
    }

    pub fn register_letter(&self) -> char {
        match self {
            Self::ConstantBuffer => 'b',
            Self::ShaderResource => 't',
            Self::Sampler => 's',
            Self::UnorderedAccess => 'u',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Binding {
    pub slot: u32,
    pub class: BindingClass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalResource {
    pub name: String,
    pub kind: ResourceKind,
    pub binding: Binding,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub structs: Vec<StructDef>,
    pub resources: Vec<GlobalResource>,
    /// Declaration order, indexed by [FunctionId]
    pub functions: Vec<Function>,
    /// Callees before callers
    pub function_order: Vec<FunctionId>,
    pub entry_points: Vec<EntryPoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<Variable>,
    pub return_type: Type,
    /// Starts with one local per parameter, which the entry block initializes from the parameter value
    pub locals: Vec<Variable>,
    /// Type of every value. `ValueId(i)` for `i < params.len()` is parameter `i`.
    pub value_types: Vec<Type>,
    /// `blocks[0]` is the entry block
    pub blocks: Vec<Block>,
    pub stage: Option<Stage>,
}
impl Function {
    pub fn value_type(&self, value: ValueId) -> &Type {
        &self.value_types[value.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn is_param(&self, value: ValueId) -> bool {
        (value.0 as usize) < self.params.len()
    }

    /// The store a parameter's local is initialized with on entry
    pub fn is_param_copy(&self, instruction: &Instruction) -> bool {
        match &instruction.op {
            Op::Store { place, value } => {
                place.path.is_empty()
                    && place.root == PlaceRoot::Local(LocalId(value.0))
                    && self.is_param(*value)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
    /// Set on a block that opens an `if` or a loop
    pub merge: Option<Merge>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// The block where both arms of a conditional meet again
    Selection(BlockId),
    /// Loop header annotation. `continuing` runs between iterations and branches back to the header.
    Loop { merge: BlockId, continuing: BlockId },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub result: Option<ValueId>,
    pub op: Op,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Float(f32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Constant(Constant),
    /// Vector from scalars and vectors, matrix from row vectors
    Composite(Vec<ValueId>),
    Load(Place),
    Store { place: Place, value: ValueId },
    Unary(UnaryOp, ValueId),
    /// Never `&&` or `||`, those are lowered to branches
    Binary(BinaryOp, ValueId, ValueId),
    /// Element-kind conversion to the result type
    Convert(ValueId),
    /// Struct member, vector component, matrix row or array element of a value
    Extract(ValueId, u32),
    /// Vector component chosen at runtime
    ExtractDynamic(ValueId, ValueId),
    /// Two or more vector components
    Swizzle(ValueId, ArrayVec<u8, 4>),
    /// Scalar to the vector result type
    Splat(ValueId),
    Call(FunctionId, Vec<ValueId>),
    Intrinsic(Intrinsic, Vec<ValueId>),
    Sample {
        texture: ResourceId,
        sampler: ResourceId,
        coord: ValueId,
        lod: Option<ValueId>,
    },
    /// Component-wise when the condition is a vector
    Select {
        cond: ValueId,
        accept: ValueId,
        reject: ValueId,
    },
}
impl Op {
    /// Values read by this operation, in operand order
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Op::Constant(_) => vec![],
            Op::Composite(values) | Op::Call(_, values) | Op::Intrinsic(_, values) => values.clone(),
            Op::Load(place) => place.dynamic_indices(),
            Op::Store { place, value } => {
                let mut values = place.dynamic_indices();
                values.push(*value);
                values
            }
            Op::Unary(_, v) | Op::Convert(v) | Op::Extract(v, _) | Op::Swizzle(v, _) | Op::Splat(v) => vec![*v],
            Op::Binary(_, a, b) | Op::ExtractDynamic(a, b) => vec![*a, *b],
            Op::Sample { coord, lod, .. } => std::iter::once(*coord).chain(*lod).collect(),
            Op::Select {
                cond,
                accept,
                reject,
            } => vec![*cond, *accept, *reject],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceRoot {
    Local(LocalId),
    Resource(ResourceId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaceIndex {
    Field(u32),
    Const(u32),
    Dynamic(ValueId),
}

/// A memory location: a local or resource followed by member and element selections.
/// A structured buffer root is indexed as an unsized array of its element type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Place {
    pub root: PlaceRoot,
    pub path: Vec<PlaceIndex>,
}
impl Place {
    pub fn local(id: LocalId) -> Self {
        Self {
            root: PlaceRoot::Local(id),
            path: vec![],
        }
    }

    pub fn dynamic_indices(&self) -> Vec<ValueId> {
        self.path
            .iter()
            .filter_map(|index| match index {
                PlaceIndex::Dynamic(v) => Some(*v),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Branch(BlockId),
    CondBranch {
        cond: ValueId,
        accept: BlockId,
        reject: BlockId,
    },
    Return(Option<ValueId>),
    /// `discard`
    Kill,
    Unreachable,
}
impl Terminator {
    pub fn targets(&self) -> ArrayVec<BlockId, 2> {
        let mut targets = ArrayVec::new();
        match self {
            Terminator::Branch(target) => targets.push(*target),
            Terminator::CondBranch { accept, reject, .. } => {
                targets.push(*accept);
                targets.push(*reject);
            }
            Terminator::Return(_) | Terminator::Kill | Terminator::Unreachable => {}
        }
        targets
    }
}

impl Module {
    /// Type of the resource as seen through a [Place] root
    pub fn resource_type(&self, id: ResourceId) -> Type {
        match &self.resources[id.0].kind {
            ResourceKind::ConstantBuffer(s) => Type::Struct(*s),
            ResourceKind::StructuredBuffer { element, .. } => Type::Array(element.clone(), None),
            other => Type::Resource(other.clone()),
        }
    }

    /// Type of the value stored at `place`
    pub fn place_type(&self, function: &Function, place: &Place) -> Option<Type> {
        let mut ty = match place.root {
            PlaceRoot::Local(local) => function.locals.get(local.0 as usize)?.ty.clone(),
            PlaceRoot::Resource(id) => self.resource_type(id),
        };
        for index in &place.path {
            ty = match (ty, index) {
                (Type::Struct(id), PlaceIndex::Field(field)) => {
                    self.structs.get(id.0)?.members.get(*field as usize)?.ty.clone()
                }
                (Type::Array(elem, _), PlaceIndex::Const(_) | PlaceIndex::Dynamic(_)) => *elem,
                (Type::Vector(kind, _), PlaceIndex::Const(_) | PlaceIndex::Dynamic(_)) => Type::Scalar(kind),
                (Type::Matrix { cols, .. }, PlaceIndex::Const(_) | PlaceIndex::Dynamic(_)) => {
                    Type::Vector(crate::types::ScalarKind::Float, cols)
                }
                _ => return None,
            };
        }
        Some(ty)
    }
}
