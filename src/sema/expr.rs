//! Expression typing and the implicit conversion rules.
//!
//! Implicit conversions are narrow: `int`/`uint` widen to `float` element-wise, unsuffixed integer
//! literals adapt to `int`, `uint` or `float`, and scalars splat to vectors only as operands. Everything else
//! needs an explicit cast.

use arrayvec::ArrayVec;

use crate::{
    frontend::{
        ast::{self, BinaryOp, UnaryOp},
        Position,
    },
    types::{builtin_type, ResourceKind, ScalarKind, Type, BOOL, FLOAT},
};

use super::{
    error::{bail, sema_err, SemaResult},
    intrinsics::{Intrinsic, Signature},
    kinds::{KindMask, ShapeMask},
    scope::Symbol,
    tast::{Expr, ExprKind, Literal, ResourceId},
    Analyzer,
};

/// An expression being checked. Unsuffixed integer literals keep their value so they can take the type they meet.
#[derive(Debug, Clone)]
pub(super) struct Operand {
    pub expr: Expr,
    pub literal: Option<i64>,
    pub position: Position,
}
impl Operand {
    fn typed(expr: Expr, position: Position) -> Self {
        Self {
            expr,
            literal: None,
            position,
        }
    }

    fn abstract_int(value: i64, position: Position) -> Self {
        Self {
            expr: Expr::literal(Literal::Int(value as i32)),
            literal: Some(value),
            position,
        }
    }

    fn ty(&self) -> &Type {
        &self.expr.ty
    }
}

fn fold_convert(lit: Literal, kind: ScalarKind) -> Literal {
    match (lit, kind) {
        (Literal::Bool(b), ScalarKind::Bool) => Literal::Bool(b),
        (Literal::Bool(b), ScalarKind::Int) => Literal::Int(b as i32),
        (Literal::Bool(b), ScalarKind::Uint) => Literal::Uint(b as u32),
        (Literal::Bool(b), ScalarKind::Float) => Literal::Float(if b { 1.0 } else { 0.0 }),
        (Literal::Int(v), ScalarKind::Bool) => Literal::Bool(v != 0),
        (Literal::Int(v), ScalarKind::Int) => Literal::Int(v),
        (Literal::Int(v), ScalarKind::Uint) => Literal::Uint(v as u32),
        (Literal::Int(v), ScalarKind::Float) => Literal::Float(v as f32),
        (Literal::Uint(v), ScalarKind::Bool) => Literal::Bool(v != 0),
        (Literal::Uint(v), ScalarKind::Int) => Literal::Int(v as i32),
        (Literal::Uint(v), ScalarKind::Uint) => Literal::Uint(v),
        (Literal::Uint(v), ScalarKind::Float) => Literal::Float(v as f32),
        (Literal::Float(v), ScalarKind::Bool) => Literal::Bool(v != 0.0),
        (Literal::Float(v), ScalarKind::Int) => Literal::Int(v as i32),
        (Literal::Float(v), ScalarKind::Uint) => Literal::Uint(v as u32),
        (Literal::Float(v), ScalarKind::Float) => Literal::Float(v),
    }
}

/// Element-kind conversion, folded for literals
pub(super) fn convert(expr: Expr, kind: ScalarKind) -> Expr {
    if expr.ty.scalar_kind() == Some(kind) {
        return expr;
    }
    match expr.kind {
        ExprKind::Literal(lit) => Expr::literal(fold_convert(lit, kind)),
        _ => Expr {
            ty: expr.ty.with_kind(kind),
            kind: ExprKind::Convert(Box::new(expr)),
        },
    }
}

pub(super) fn splat(expr: Expr, n: u8) -> Expr {
    match (&expr.ty, n) {
        (_, 1) | (Type::Vector(..), _) => expr,
        (Type::Scalar(kind), _) => Expr {
            ty: Type::Vector(*kind, n),
            kind: ExprKind::Splat(Box::new(expr)),
        },
        _ => expr,
    }
}

fn parse_swizzle(name: &str) -> Option<ArrayVec<u8, 4>> {
    const SETS: [&str; 2] = ["xyzw", "rgba"];
    let first = name.chars().next()?;
    let set = SETS.iter().find(|set| set.contains(first))?;
    let mut components = ArrayVec::new();
    for c in name.chars() {
        let index = set.find(c)?;
        components.try_push(index as u8).ok()?;
    }
    Some(components)
}

impl<'p> Analyzer<'p> {
    // ---- conversions ----

    fn literal_as(&self, value: i64, kind: ScalarKind, position: Position) -> SemaResult<Literal> {
        match kind {
            ScalarKind::Int => i32::try_from(value).map(Literal::Int).map_err(|_| {
                sema_err!(LiteralOutOfRange, position, "{} does not fit in int", value)
            }),
            ScalarKind::Uint if value < 0 => bail!(
                TypeMismatch,
                position,
                "negative literal {} cannot be uint",
                value
            ),
            ScalarKind::Uint => u32::try_from(value).map(Literal::Uint).map_err(|_| {
                sema_err!(LiteralOutOfRange, position, "{} does not fit in uint", value)
            }),
            ScalarKind::Float => Ok(Literal::Float(value as f32)),
            ScalarKind::Bool => bail!(
                TypeMismatch,
                position,
                "cannot implicitly convert integer literal to bool"
            ),
        }
    }

    /// Fix the type of an operand that met no other type
    pub(super) fn concrete(&self, op: Operand) -> SemaResult<Expr> {
        match op.literal {
            Some(value) => Ok(Expr::literal(self.literal_as(value, ScalarKind::Int, op.position)?)),
            None => Ok(op.expr),
        }
    }

    /// Apply the implicit conversion rules to reach `target`
    pub(super) fn coerce(&self, op: Operand, target: &Type) -> SemaResult<Expr> {
        if let Some(value) = op.literal {
            if let Type::Scalar(kind) = target {
                return Ok(Expr::literal(self.literal_as(value, *kind, op.position)?));
            }
        }
        let source = op.ty();
        if source == target {
            return self.concrete(op);
        }
        let widens = matches!(target.scalar_kind(), Some(ScalarKind::Float))
            && source.is_scalar_or_vector()
            && source.scalar_kind().map_or(false, |k| k.is_integer())
            && source.with_kind(ScalarKind::Float) == *target;
        if widens && op.literal.is_none() {
            return Ok(convert(op.expr, ScalarKind::Float));
        }
        bail!(
            TypeMismatch,
            op.position,
            "cannot implicitly convert {} to {}",
            source.named(&self.structs),
            target.named(&self.structs)
        )
    }

    /// Bring operands to one scalar or vector type. Scalars splat to the common width.
    /// With `promote`, integer operands of a float-only operation widen to float.
    pub(super) fn unify(
        &self,
        ops: Vec<Operand>,
        kinds: KindMask,
        shapes: ShapeMask,
        promote: bool,
        what: &str,
        position: Position,
    ) -> SemaResult<(Vec<Expr>, Type)> {
        let mut width = None;
        for op in &ops {
            match op.ty() {
                Type::Scalar(_) => {}
                Type::Vector(_, n) => match width {
                    None => width = Some(*n),
                    Some(w) if w == *n => {}
                    Some(w) => bail!(
                        TypeMismatch,
                        op.position,
                        "{} mixes vectors of {} and {} components",
                        what,
                        w,
                        n
                    ),
                },
                other => bail!(
                    InvalidOperands,
                    op.position,
                    "{} cannot be applied to {}",
                    what,
                    other.named(&self.structs)
                ),
            }
        }
        let width = width.unwrap_or(1);
        let shape = if width == 1 {
            ShapeMask::SCALAR
        } else {
            ShapeMask::VECTOR
        };
        if !shapes.contains(shape) {
            bail!(
                InvalidOperands,
                position,
                "{} needs {} operands",
                what,
                if width == 1 { "vector" } else { "scalar" }
            );
        }

        let concrete: Vec<ScalarKind> = ops
            .iter()
            .filter(|op| op.literal.is_none())
            .filter_map(|op| op.ty().scalar_kind())
            .collect();
        let has = |k: ScalarKind| concrete.contains(&k);
        let mut kind = if has(ScalarKind::Bool) {
            if concrete.iter().any(|k| *k != ScalarKind::Bool) || ops.iter().any(|op| op.literal.is_some()) {
                bail!(TypeMismatch, position, "{} mixes bool and numeric operands", what);
            }
            ScalarKind::Bool
        } else if has(ScalarKind::Float) {
            ScalarKind::Float
        } else if has(ScalarKind::Int) && has(ScalarKind::Uint) {
            bail!(
                TypeMismatch,
                position,
                "{} mixes int and uint operands, a cast is required",
                what
            );
        } else if has(ScalarKind::Uint) {
            ScalarKind::Uint
        } else {
            ScalarKind::Int
        };
        if !kinds.accepts(kind) {
            if promote && kind.is_integer() && kinds.accepts(ScalarKind::Float) {
                kind = ScalarKind::Float;
            } else {
                bail!(
                    InvalidOperands,
                    position,
                    "{} needs {} operands, found {}",
                    what,
                    kinds.describe(),
                    kind.name()
                );
            }
        }

        let exprs = ops
            .into_iter()
            .map(|op| {
                let n = op.ty().components().unwrap_or(1);
                let expr = self.coerce(op, &Type::vector(kind, n))?;
                Ok(splat(expr, width))
            })
            .collect::<SemaResult<Vec<Expr>>>()?;
        Ok((exprs, Type::vector(kind, width)))
    }

    // ---- entry points used by statements ----

    /// Check an expression and fix its type
    pub(super) fn value(&mut self, e: &ast::Expr) -> SemaResult<Expr> {
        let op = self.check_expr(e)?;
        self.concrete(op)
    }

    pub(super) fn expect_type(&mut self, e: &ast::Expr, target: &Type) -> SemaResult<Expr> {
        let op = self.check_expr(e)?;
        self.coerce(op, target)
    }

    pub(super) fn condition(&mut self, e: &ast::Expr) -> SemaResult<Expr> {
        let op = self.check_expr(e)?;
        if op.ty() != &BOOL {
            bail!(
                TypeMismatch,
                e.position,
                "condition must be bool, found {}",
                op.ty().named(&self.structs)
            );
        }
        Ok(op.expr)
    }

    // ---- expressions ----

    pub(super) fn check_expr(&mut self, e: &ast::Expr) -> SemaResult<Operand> {
        use ast::ExprKind as A;
        let position = e.position;
        let expr = match &e.kind {
            A::IntLit { value, unsigned } => {
                let value = i64::try_from(*value).unwrap_or(i64::MAX);
                if !*unsigned {
                    return Ok(Operand::abstract_int(value, position));
                }
                Expr::literal(self.literal_as(value, ScalarKind::Uint, position)?)
            }
            A::FloatLit(v) => Expr::literal(Literal::Float(*v)),
            A::BoolLit(b) => Expr::literal(Literal::Bool(*b)),
            A::Ident(name) => self.identifier(name, position)?,
            A::Unary { op, operand } => return self.unary(*op, operand, position),
            A::Binary { op, lhs, rhs } => {
                let lhs = self.check_expr(lhs)?;
                let rhs = self.check_expr(rhs)?;
                return self.binary(*op, lhs, rhs, position);
            }
            A::Ternary {
                cond,
                accept,
                reject,
            } => self.conditional(cond, accept, reject, position)?,
            A::Call { callee, args } => self.call(callee, args, position)?,
            A::MethodCall {
                receiver,
                method,
                args,
            } => self.method_call(receiver, method, args, position)?,
            A::Member { base, name } => {
                let base = self.value(base)?;
                self.member(base, name, position)?
            }
            A::Index { base, index } => {
                let base = self.value(base)?;
                self.index(base, index, position)?
            }
            A::Cast { ty, value } => {
                let target = self.resolve_type(ty)?;
                let op = self.check_expr(value)?;
                self.cast(op, &target, position)?
            }
        };
        Ok(Operand::typed(expr, position))
    }

    fn identifier(&self, name: &str, position: Position) -> SemaResult<Expr> {
        match self.scopes.lookup(name) {
            Some(Symbol::Local { var, .. }) => Ok(Expr {
                ty: self.current.locals[var.0].ty.clone(),
                kind: ExprKind::Local(var),
            }),
            Some(Symbol::Resource(id)) => Ok(Expr {
                ty: Type::Resource(self.resources[id.0].kind.clone()),
                kind: ExprKind::Resource(id),
            }),
            None => bail!(UndefinedSymbol, position, "'{}' is not defined", name),
        }
    }

    fn unary(&mut self, op: UnaryOp, operand: &ast::Expr, position: Position) -> SemaResult<Operand> {
        let operand = self.check_expr(operand)?;
        if let (UnaryOp::Neg, Some(value)) = (op, operand.literal) {
            return Ok(Operand::abstract_int(-value, position));
        }
        if let (UnaryOp::Neg, ExprKind::Literal(Literal::Float(v))) = (op, &operand.expr.kind) {
            return Ok(Operand::typed(Expr::literal(Literal::Float(-v)), position));
        }

        let (kinds, symbol) = match op {
            UnaryOp::Neg => (KindMask::NUMERIC, "-"),
            UnaryOp::Not => (KindMask::BOOL, "!"),
            UnaryOp::BitNot => (KindMask::INTEGER, "~"),
        };
        let operand = self.concrete(operand)?;
        let accepted = operand.ty.is_scalar_or_vector()
            && operand.ty.scalar_kind().map_or(false, |k| kinds.accepts(k));
        if !accepted {
            bail!(
                InvalidOperands,
                position,
                "operator {} cannot be applied to {}",
                symbol,
                operand.ty.named(&self.structs)
            );
        }
        Ok(Operand::typed(
            Expr {
                ty: operand.ty.clone(),
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
            },
            position,
        ))
    }

    pub(super) fn binary(
        &mut self,
        op: BinaryOp,
        lhs: Operand,
        rhs: Operand,
        position: Position,
    ) -> SemaResult<Operand> {
        let what = format!("operator {}", op.symbol());
        let make = |lhs: Expr, rhs: Expr, ty: Type| {
            Operand::typed(
                Expr {
                    ty,
                    kind: ExprKind::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                },
                position,
            )
        };

        match op {
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                for side in [&lhs, &rhs] {
                    if side.ty() != &BOOL || side.literal.is_some() {
                        bail!(
                            InvalidOperands,
                            side.position,
                            "{} needs bool operands, found {}",
                            what,
                            side.ty().named(&self.structs)
                        );
                    }
                }
                Ok(make(lhs.expr, rhs.expr, BOOL))
            }
            BinaryOp::Mul
                if matches!(lhs.ty(), Type::Matrix { .. }) || matches!(rhs.ty(), Type::Matrix { .. }) =>
            {
                let lhs_matrix = matches!(lhs.ty(), Type::Matrix { .. });
                let rhs_matrix = matches!(rhs.ty(), Type::Matrix { .. });
                let (matrix, scalar) = match (lhs_matrix, rhs_matrix) {
                    (true, true) => bail!(
                        InvalidOperands,
                        position,
                        "matrix products are written mul(a, b)"
                    ),
                    (true, false) => (lhs, rhs),
                    _ => (rhs, lhs),
                };
                if !(scalar.ty().is_scalar() && scalar.ty().scalar_kind() != Some(ScalarKind::Bool)) {
                    bail!(
                        InvalidOperands,
                        position,
                        "a matrix can only be scaled by a scalar, found {}",
                        scalar.ty().named(&self.structs)
                    );
                }
                let scalar = self.coerce(scalar, &FLOAT)?;
                let ty = matrix.expr.ty.clone();
                Ok(make(matrix.expr, scalar, ty))
            }
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
                let (mut exprs, ty) = self.unify(
                    vec![lhs, rhs],
                    KindMask::NUMERIC,
                    ShapeMask::SCALAR_OR_VECTOR,
                    false,
                    &what,
                    position,
                )?;
                let rhs = exprs.pop();
                let lhs = exprs.pop();
                match (lhs, rhs) {
                    (Some(lhs), Some(rhs)) => Ok(make(lhs, rhs, ty)),
                    _ => bail!(ArgumentCount, position, "{} needs two operands", what),
                }
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::Shl | BinaryOp::Shr => {
                let (mut exprs, ty) = self.unify(
                    vec![lhs, rhs],
                    KindMask::INTEGER,
                    ShapeMask::SCALAR_OR_VECTOR,
                    false,
                    &what,
                    position,
                )?;
                let rhs = exprs.pop();
                let lhs = exprs.pop();
                match (lhs, rhs) {
                    (Some(lhs), Some(rhs)) => Ok(make(lhs, rhs, ty)),
                    _ => bail!(ArgumentCount, position, "{} needs two operands", what),
                }
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                let kinds = if matches!(op, BinaryOp::Eq | BinaryOp::Ne) {
                    KindMask::ALL
                } else {
                    KindMask::NUMERIC
                };
                let (mut exprs, ty) = self.unify(
                    vec![lhs, rhs],
                    kinds,
                    ShapeMask::SCALAR_OR_VECTOR,
                    false,
                    &what,
                    position,
                )?;
                let width = ty.components().unwrap_or(1);
                let rhs = exprs.pop();
                let lhs = exprs.pop();
                match (lhs, rhs) {
                    (Some(lhs), Some(rhs)) => Ok(make(lhs, rhs, Type::vector(ScalarKind::Bool, width))),
                    _ => bail!(ArgumentCount, position, "{} needs two operands", what),
                }
            }
        }
    }

    fn conditional(
        &mut self,
        cond: &ast::Expr,
        accept: &ast::Expr,
        reject: &ast::Expr,
        position: Position,
    ) -> SemaResult<Expr> {
        let cond = self.check_expr(cond)?;
        if cond.ty() != &BOOL || cond.literal.is_some() {
            bail!(
                TypeMismatch,
                cond.position,
                "?: needs a bool condition, found {} (use select for vectors)",
                cond.ty().named(&self.structs)
            );
        }
        let accept = self.check_expr(accept)?;
        let reject = self.check_expr(reject)?;

        let (accept, reject, ty) = if accept.ty().is_scalar_or_vector() && reject.ty().is_scalar_or_vector() {
            let (mut exprs, ty) = self.unify(
                vec![accept, reject],
                KindMask::ALL,
                ShapeMask::SCALAR_OR_VECTOR,
                false,
                "?:",
                position,
            )?;
            let reject = exprs.pop();
            let accept = exprs.pop();
            match (accept, reject) {
                (Some(a), Some(r)) => (a, r, ty),
                _ => bail!(ArgumentCount, position, "?: needs two values"),
            }
        } else if accept.ty() == reject.ty() && accept.ty().is_storable() {
            let ty = accept.ty().clone();
            (accept.expr, reject.expr, ty)
        } else {
            bail!(
                TypeMismatch,
                position,
                "?: branches have types {} and {}",
                accept.ty().named(&self.structs),
                reject.ty().named(&self.structs)
            );
        };
        Ok(Expr {
            ty,
            kind: ExprKind::Conditional {
                cond: Box::new(cond.expr),
                accept: Box::new(accept),
                reject: Box::new(reject),
            },
        })
    }

    fn member(&self, base: Expr, name: &str, position: Position) -> SemaResult<Expr> {
        let struct_id = match &base.ty {
            Type::Struct(id) | Type::Resource(ResourceKind::ConstantBuffer(id)) => *id,
            Type::Scalar(_) | Type::Vector(..) => return self.swizzle(base, name, position),
            other => bail!(
                UndefinedSymbol,
                position,
                "{} has no member '{}'",
                other.named(&self.structs),
                name
            ),
        };
        let def = &self.structs[struct_id.0];
        match def.member_index(name) {
            Some(index) => Ok(Expr {
                ty: def.members[index].ty.clone(),
                kind: ExprKind::Member {
                    base: Box::new(base),
                    index,
                },
            }),
            None => bail!(
                UndefinedSymbol,
                position,
                "struct '{}' has no member '{}'",
                def.name,
                name
            ),
        }
    }

    fn swizzle(&self, base: Expr, name: &str, position: Position) -> SemaResult<Expr> {
        let (kind, width) = match base.ty {
            Type::Scalar(k) => (k, 1),
            Type::Vector(k, n) => (k, n),
            _ => bail!(InvalidSwizzle, position, "only vectors can be swizzled"),
        };
        let components = match parse_swizzle(name) {
            Some(c) if c.iter().all(|i| *i < width) => c,
            _ => bail!(
                InvalidSwizzle,
                position,
                "'.{}' is not a valid swizzle of a {}-component value",
                name,
                width
            ),
        };
        let len = components.len() as u8;
        if width == 1 {
            // `s.x` is `s`, `s.xxx` is a splat
            return Ok(splat(base, len));
        }
        Ok(Expr {
            ty: Type::vector(kind, len),
            kind: ExprKind::Swizzle {
                base: Box::new(base),
                components,
            },
        })
    }

    fn index(&mut self, base: Expr, index: &ast::Expr, position: Position) -> SemaResult<Expr> {
        let (element, bound) = match &base.ty {
            Type::Array(elem, len) => ((**elem).clone(), *len),
            Type::Vector(kind, n) => (Type::Scalar(*kind), Some(*n as u32)),
            Type::Matrix { rows, cols } => (Type::Vector(ScalarKind::Float, *cols), Some(*rows as u32)),
            Type::Resource(ResourceKind::StructuredBuffer { element, .. }) => ((**element).clone(), None),
            other => bail!(
                InvalidIndex,
                position,
                "{} cannot be indexed",
                other.named(&self.structs)
            ),
        };

        let index_op = self.check_expr(index)?;
        let index = match index_op.literal {
            Some(v) if v < 0 => bail!(InvalidIndex, index.position, "negative index {}", v),
            _ => self.concrete(index_op)?,
        };
        if !matches!(index.ty, Type::Scalar(ScalarKind::Int | ScalarKind::Uint)) {
            bail!(
                InvalidIndex,
                position,
                "index must be an int or uint scalar, found {}",
                index.ty.named(&self.structs)
            );
        }
        if let (Some(value), Some(bound)) = (index.const_index(), bound) {
            if value < 0 || value >= bound as i64 {
                bail!(
                    InvalidIndex,
                    position,
                    "index {} is out of bounds for {} elements",
                    value,
                    bound
                );
            }
        }
        Ok(Expr {
            ty: element,
            kind: ExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            },
        })
    }

    /// Explicit conversion, `(T)value` or a one-argument constructor
    pub(super) fn cast(&self, op: Operand, target: &Type, position: Position) -> SemaResult<Expr> {
        let (target_kind, target_width) = match target {
            Type::Scalar(k) => (*k, 1),
            Type::Vector(k, n) => (*k, *n),
            Type::Matrix { .. } if op.ty() == target => return Ok(op.expr),
            other => bail!(
                InvalidCast,
                position,
                "cannot cast to {}",
                other.named(&self.structs)
            ),
        };

        if let Some(value) = op.literal {
            let lit = match target_kind {
                ScalarKind::Bool => Literal::Bool(value != 0),
                ScalarKind::Int => Literal::Int(value as i32),
                ScalarKind::Uint => Literal::Uint(value as u32),
                ScalarKind::Float => Literal::Float(value as f32),
            };
            return Ok(splat(Expr::literal(lit), target_width));
        }

        let source = op.expr;
        match source.ty.clone() {
            Type::Scalar(_) => Ok(splat(convert(source, target_kind), target_width)),
            Type::Vector(_, n) if n == target_width => Ok(convert(source, target_kind)),
            Type::Vector(kind, n) if n > target_width => {
                let components: ArrayVec<u8, 4> = (0..target_width).collect();
                let truncated = Expr {
                    ty: Type::vector(kind, target_width),
                    kind: ExprKind::Swizzle {
                        base: Box::new(source),
                        components,
                    },
                };
                Ok(convert(truncated, target_kind))
            }
            other => bail!(
                InvalidCast,
                position,
                "cannot cast {} to {}",
                other.named(&self.structs),
                target.named(&self.structs)
            ),
        }
    }

    // ---- calls ----

    fn call(&mut self, callee: &str, args: &[ast::Expr], position: Position) -> SemaResult<Expr> {
        if let Some(ty) = builtin_type(callee) {
            return self.construct(ty, args, position);
        }
        if let Some(intrinsic) = Intrinsic::lookup(callee) {
            return self.intrinsic(intrinsic, args, position);
        }
        let Some(id) = self.function_ids.get(callee).copied() else {
            bail!(UndefinedSymbol, position, "function '{}' is not defined", callee);
        };
        let signature = self.signatures[id.0].clone();
        if signature.stage.is_some() {
            bail!(
                InvalidEntryPoint,
                position,
                "entry point '{}' cannot be called",
                callee
            );
        }
        if signature.params.len() != args.len() {
            bail!(
                ArgumentCount,
                position,
                "'{}' takes {} arguments, found {}",
                callee,
                signature.params.len(),
                args.len()
            );
        }
        let mut typed_args = vec![];
        for (arg, (_, ty, _)) in args.iter().zip(&signature.params) {
            typed_args.push(self.expect_type(arg, ty)?);
        }
        let caller = self.current.id;
        self.facts[caller.0].calls.push((id, position));
        Ok(Expr {
            ty: signature.return_type,
            kind: ExprKind::Call {
                function: id,
                args: typed_args,
            },
        })
    }

    fn construct(&mut self, ty: Type, args: &[ast::Expr], position: Position) -> SemaResult<Expr> {
        let ops = args
            .iter()
            .map(|a| self.check_expr(a))
            .collect::<SemaResult<Vec<Operand>>>()?;

        match &ty {
            Type::Scalar(_) | Type::Vector(..) if ops.len() == 1 => {
                let op = ops.into_iter().next();
                match op {
                    Some(op) if op.ty().is_scalar_or_vector() => self.cast(op, &ty, position),
                    Some(op) => bail!(
                        InvalidCast,
                        op.position,
                        "cannot construct {} from {}",
                        ty.named(&self.structs),
                        op.ty().named(&self.structs)
                    ),
                    None => bail!(ArgumentCount, position, "missing constructor argument"),
                }
            }
            Type::Vector(kind, n) => {
                let args = self.components_of(ops, *kind, *n as usize, &ty, position)?;
                Ok(Expr {
                    ty,
                    kind: ExprKind::Construct(args),
                })
            }
            Type::Matrix { rows, cols } => {
                let row_ty = Type::Vector(ScalarKind::Float, *cols);
                let all_scalars = ops.iter().all(|op| op.ty().is_scalar());
                let rows_exprs = if all_scalars && ops.len() == (*rows as usize) * (*cols as usize) {
                    let scalars = self.components_of(ops, ScalarKind::Float, ops_len(rows, cols), &ty, position)?;
                    scalars
                        .chunks(*cols as usize)
                        .map(|chunk| Expr {
                            ty: row_ty.clone(),
                            kind: ExprKind::Construct(chunk.to_vec()),
                        })
                        .collect()
                } else if ops.len() == *rows as usize {
                    ops.into_iter()
                        .map(|op| {
                            if op.ty().components() != Some(*cols) {
                                bail!(
                                    TypeMismatch,
                                    op.position,
                                    "matrix rows must be {}",
                                    row_ty.named(&self.structs)
                                );
                            }
                            let expr = self.concrete(op)?;
                            Ok(convert(expr, ScalarKind::Float))
                        })
                        .collect::<SemaResult<Vec<Expr>>>()?
                } else {
                    bail!(
                        ArgumentCount,
                        position,
                        "{} needs {} scalars or {} rows",
                        ty.named(&self.structs),
                        rows * cols,
                        rows
                    );
                };
                Ok(Expr {
                    ty,
                    kind: ExprKind::Construct(rows_exprs),
                })
            }
            _ => bail!(
                ArgumentCount,
                position,
                "{} takes exactly one argument",
                ty.named(&self.structs)
            ),
        }
    }

    /// Constructor arguments converted to `kind`, checked to supply exactly `count` components
    fn components_of(
        &self,
        ops: Vec<Operand>,
        kind: ScalarKind,
        count: usize,
        ty: &Type,
        position: Position,
    ) -> SemaResult<Vec<Expr>> {
        let mut total = 0usize;
        let mut exprs = vec![];
        for op in ops {
            match op.ty().components() {
                Some(n) => total += n as usize,
                None => bail!(
                    TypeMismatch,
                    op.position,
                    "{} cannot be used to construct {}",
                    op.ty().named(&self.structs),
                    ty.named(&self.structs)
                ),
            }
            let expr = match op.literal {
                Some(_) => self.cast(op, &Type::Scalar(kind), position)?,
                None => convert(op.expr, kind),
            };
            exprs.push(expr);
        }
        if total != count {
            bail!(
                ArgumentCount,
                position,
                "{} needs {} components, found {}",
                ty.named(&self.structs),
                count,
                total
            );
        }
        Ok(exprs)
    }

    fn intrinsic(&mut self, intrinsic: Intrinsic, args: &[ast::Expr], position: Position) -> SemaResult<Expr> {
        let name = intrinsic.name();
        if args.len() != intrinsic.arity() {
            bail!(
                ArgumentCount,
                position,
                "{} takes {} arguments, found {}",
                name,
                intrinsic.arity(),
                args.len()
            );
        }
        let ops = args
            .iter()
            .map(|a| self.check_expr(a))
            .collect::<SemaResult<Vec<Operand>>>()?;

        let (args, ty) = match intrinsic.signature() {
            Signature::Componentwise { kinds, shapes, .. } => {
                self.unify(ops, kinds, shapes, true, name, position)?
            }
            Signature::Reduce { .. } => {
                let (args, _) = self.unify(ops, KindMask::FLOAT, ShapeMask::VECTOR, true, name, position)?;
                (args, FLOAT)
            }
            Signature::Cross => {
                let float3 = Type::Vector(ScalarKind::Float, 3);
                let args = ops
                    .into_iter()
                    .map(|op| self.coerce(op, &float3))
                    .collect::<SemaResult<Vec<Expr>>>()?;
                (args, float3)
            }
            Signature::Mul => self.mul(ops, position)?,
            Signature::Transpose => {
                let op = ops.into_iter().next();
                match op {
                    Some(op) => match op.ty().clone() {
                        Type::Matrix { rows, cols } => (vec![op.expr], Type::Matrix { rows: cols, cols: rows }),
                        other => bail!(
                            InvalidOperands,
                            op.position,
                            "transpose needs a matrix, found {}",
                            other.named(&self.structs)
                        ),
                    },
                    None => bail!(ArgumentCount, position, "transpose takes one argument"),
                }
            }
            Signature::Test => {
                let op = ops.into_iter().next();
                match op {
                    Some(op) if op.ty().is_scalar_or_vector() => {
                        let expr = self.concrete(op)?;
                        (vec![convert(expr, ScalarKind::Bool)], BOOL)
                    }
                    Some(op) => bail!(
                        InvalidOperands,
                        op.position,
                        "{} needs a scalar or vector, found {}",
                        name,
                        op.ty().named(&self.structs)
                    ),
                    None => bail!(ArgumentCount, position, "{} takes one argument", name),
                }
            }
            Signature::Select => return self.select(ops, position),
        };
        Ok(Expr {
            ty,
            kind: ExprKind::Intrinsic { intrinsic, args },
        })
    }

    /// `mul(matrix, vector)`, `mul(vector, matrix)` and `mul(matrix, matrix)` with row-vector conventions
    fn mul(&self, ops: Vec<Operand>, position: Position) -> SemaResult<(Vec<Expr>, Type)> {
        let mut ops = ops.into_iter();
        let (Some(a), Some(b)) = (ops.next(), ops.next()) else {
            bail!(ArgumentCount, position, "mul takes two arguments");
        };
        let float_vector = |op: Operand| -> SemaResult<Expr> {
            let n = op.ty().components().unwrap_or(1);
            self.coerce(op, &Type::Vector(ScalarKind::Float, n))
        };
        match (a.ty().clone(), b.ty().clone()) {
            (Type::Matrix { rows, cols }, Type::Vector(_, n)) if n == cols => {
                Ok((vec![a.expr, float_vector(b)?], Type::Vector(ScalarKind::Float, rows)))
            }
            (Type::Vector(_, n), Type::Matrix { rows, cols }) if n == rows => {
                Ok((vec![float_vector(a)?, b.expr], Type::Vector(ScalarKind::Float, cols)))
            }
            (Type::Matrix { rows, cols: inner }, Type::Matrix { rows: inner_b, cols }) if inner == inner_b => {
                Ok((vec![a.expr, b.expr], Type::Matrix { rows, cols }))
            }
            (Type::Matrix { .. }, _) | (_, Type::Matrix { .. }) => bail!(
                TypeMismatch,
                position,
                "mul dimensions do not agree: {} and {}",
                a.ty().named(&self.structs),
                b.ty().named(&self.structs)
            ),
            _ => bail!(
                InvalidOperands,
                position,
                "mul needs a matrix operand, use * for component-wise products"
            ),
        }
    }

    fn select(&self, ops: Vec<Operand>, position: Position) -> SemaResult<Expr> {
        let mut ops = ops.into_iter();
        let (Some(cond), Some(accept), Some(reject)) = (ops.next(), ops.next(), ops.next()) else {
            bail!(ArgumentCount, position, "select takes three arguments");
        };
        let cond_width = match cond.ty() {
            Type::Scalar(ScalarKind::Bool) if cond.literal.is_none() => 1,
            Type::Vector(ScalarKind::Bool, n) => *n,
            other => bail!(
                TypeMismatch,
                cond.position,
                "select needs a bool or bool vector condition, found {}",
                other.named(&self.structs)
            ),
        };
        let (values, ty) = self.unify(
            vec![accept, reject],
            KindMask::ALL,
            ShapeMask::SCALAR_OR_VECTOR,
            false,
            "select",
            position,
        )?;
        let width = ty.components().unwrap_or(1);
        let (values, ty) = match (cond_width, width) {
            (1, _) => (values, ty),
            (c, 1) => (
                values.into_iter().map(|v| splat(v, c)).collect(),
                Type::vector(ty.scalar_kind().unwrap_or(ScalarKind::Float), c),
            ),
            (c, w) if c == w => (values, ty),
            (c, w) => bail!(
                TypeMismatch,
                position,
                "select condition has {} components but values have {}",
                c,
                w
            ),
        };
        let mut args = vec![cond.expr];
        args.extend(values);
        Ok(Expr {
            ty,
            kind: ExprKind::Intrinsic {
                intrinsic: Intrinsic::Select,
                args,
            },
        })
    }

    // ---- texture sampling ----

    fn resource_arg(&mut self, e: &ast::Expr) -> SemaResult<(ResourceId, ResourceKind)> {
        let op = self.check_expr(e)?;
        match op.expr.kind {
            ExprKind::Resource(id) => Ok((id, self.resources[id.0].kind.clone())),
            _ => bail!(
                TypeMismatch,
                e.position,
                "expected a resource, found {}",
                op.expr.ty.named(&self.structs)
            ),
        }
    }

    fn method_call(
        &mut self,
        receiver: &ast::Expr,
        method: &str,
        args: &[ast::Expr],
        position: Position,
    ) -> SemaResult<Expr> {
        let (texture, kind) = self.resource_arg(receiver)?;
        if kind != ResourceKind::Texture2D {
            bail!(
                InvalidOperands,
                position,
                "'{}' is not a Texture2D",
                self.resources[texture.0].name
            );
        }
        let explicit_lod = match method {
            "Sample" => false,
            "SampleLevel" => true,
            other => bail!(UndefinedSymbol, position, "Texture2D has no method '{}'", other),
        };
        let arity = if explicit_lod { 3 } else { 2 };
        if args.len() != arity {
            bail!(
                ArgumentCount,
                position,
                "{} takes {} arguments, found {}",
                method,
                arity,
                args.len()
            );
        }

        let (sampler, sampler_kind) = self.resource_arg(&args[0])?;
        if sampler_kind != ResourceKind::Sampler {
            bail!(
                TypeMismatch,
                args[0].position,
                "'{}' is not a SamplerState",
                self.resources[sampler.0].name
            );
        }
        let coord = self.expect_type(&args[1], &Type::Vector(ScalarKind::Float, 2))?;
        let lod = if explicit_lod {
            Some(Box::new(self.expect_type(&args[2], &FLOAT)?))
        } else {
            let current = self.current.id;
            self.facts[current.0].implicit_lod.get_or_insert(position);
            None
        };
        Ok(Expr {
            ty: Type::Vector(ScalarKind::Float, 4),
            kind: ExprKind::Sample {
                texture,
                sampler,
                coord: Box::new(coord),
                lod,
            },
        })
    }
}

fn ops_len(rows: &u8, cols: &u8) -> usize {
    (*rows as usize) * (*cols as usize)
}
