//! Lowering of a [TypedModule] into the IR.

use log::{debug, trace};

use crate::{
    sema::tast::{self, Expr, ExprKind, Literal, Stmt, TypedModule},
    types::{Type, BOOL},
};

use super::{
    cfg, verify, BinaryOp, Binding, BindingClass, Block, BlockId, Constant, Function, FunctionId,
    GlobalResource, Instruction, Intrinsic, LocalId, LoweringError, Merge, Module, Op, Place,
    PlaceIndex, PlaceRoot, Terminator, ValueId, Variable,
};

type LowerResult<T> = Result<T, LoweringError>;

/// Lower an analyzed module and verify the result
pub fn lower(module: &TypedModule) -> Result<Module, LoweringError> {
    let resources = module
        .resources
        .iter()
        .map(|r| GlobalResource {
            name: r.name.clone(),
            kind: r.kind.clone(),
            binding: Binding {
                slot: r.slot,
                class: BindingClass::of(&r.kind),
            },
        })
        .collect();

    let mut functions = vec![];
    for function in &module.functions {
        let mut lowered = FunctionBuilder::new(function).build()?;
        cfg::compact(&mut lowered);
        trace!(
            "lowered '{}': {} blocks, {} values",
            lowered.name,
            lowered.blocks.len(),
            lowered.value_types.len()
        );
        functions.push(lowered);
    }

    let lowered = Module {
        structs: module.structs.clone(),
        resources,
        functions,
        function_order: module.call_order.clone(),
        entry_points: module.entry_points.clone(),
    };
    verify::verify(&lowered)?;
    debug!("lowered {} functions", lowered.functions.len());
    Ok(lowered)
}

struct LoopTargets {
    merge: BlockId,
    continuing: BlockId,
}

struct FunctionBuilder<'a> {
    source: &'a tast::Function,
    function: Function,
    current: BlockId,
    loops: Vec<LoopTargets>,
}

impl<'a> FunctionBuilder<'a> {
    fn new(source: &'a tast::Function) -> Self {
        let params: Vec<Variable> = source
            .params
            .iter()
            .map(|p| Variable {
                name: p.name.clone(),
                ty: p.ty.clone(),
            })
            .collect();
        let function = Function {
            name: source.name.clone(),
            value_types: params.iter().map(|p| p.ty.clone()).collect(),
            params,
            return_type: source.return_type.clone(),
            locals: source
                .locals
                .iter()
                .map(|l| Variable {
                    name: l.name.clone(),
                    ty: l.ty.clone(),
                })
                .collect(),
            blocks: vec![],
            stage: source.stage,
        };
        Self {
            source,
            function,
            current: BlockId(0),
            loops: vec![],
        }
    }

    fn error(&self, message: impl Into<String>) -> LoweringError {
        LoweringError {
            function: self.function.name.clone(),
            message: message.into(),
        }
    }

    fn build(mut self) -> LowerResult<Function> {
        let source = self.source;
        self.current = self.new_block();
        for (index, param) in source.params.iter().enumerate() {
            let value = ValueId(index as u32);
            self.push_void(Op::Store {
                place: Place::local(LocalId(param.var.0 as u32)),
                value,
            });
        }
        self.stmts(&source.body)?;
        let end = if self.function.return_type.is_void() {
            Terminator::Return(None)
        } else {
            Terminator::Unreachable
        };
        self.terminate(end);
        Ok(self.function)
    }

    // ---- blocks and instructions ----

    fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.function.blocks.len() as u32);
        self.function.blocks.push(Block {
            instructions: vec![],
            terminator: Terminator::Unreachable,
            merge: None,
        });
        id
    }

    fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.function.blocks[id.0 as usize]
    }

    fn terminate(&mut self, terminator: Terminator) {
        let current = self.current;
        self.block_mut(current).terminator = terminator;
    }

    /// End the current block and continue in `next`
    fn switch_to(&mut self, terminator: Terminator, next: BlockId) {
        self.terminate(terminator);
        self.current = next;
    }

    /// After a jump, code until the next merge point is dead. It goes into a fresh block that nothing reaches.
    fn jump(&mut self, terminator: Terminator) {
        let dead = self.new_block();
        self.switch_to(terminator, dead);
    }

    fn push(&mut self, ty: Type, op: Op) -> ValueId {
        let result = ValueId(self.function.value_types.len() as u32);
        self.function.value_types.push(ty);
        let current = self.current;
        self.block_mut(current).instructions.push(Instruction {
            result: Some(result),
            op,
        });
        result
    }

    fn push_void(&mut self, op: Op) {
        let current = self.current;
        self.block_mut(current)
            .instructions
            .push(Instruction { result: None, op });
    }

    fn temporary(&mut self, ty: Type) -> LocalId {
        let id = LocalId(self.function.locals.len() as u32);
        self.function.locals.push(Variable {
            name: format!("_t{}", id.0),
            ty,
        });
        id
    }

    // ---- statements ----

    fn stmts(&mut self, stmts: &[Stmt]) -> LowerResult<()> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &Stmt) -> LowerResult<()> {
        match stmt {
            Stmt::Local { var, init } => {
                if let Some(init) = init {
                    let value = self.expr(init)?;
                    self.push_void(Op::Store {
                        place: Place::local(LocalId(var.0 as u32)),
                        value,
                    });
                }
            }
            Stmt::Assign { target, value } => self.assign(target, value)?,
            Stmt::Expr(e) => {
                self.expr(e)?;
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.expr(cond)?;
                let then_block = self.new_block();
                let else_block = if else_branch.is_empty() {
                    None
                } else {
                    Some(self.new_block())
                };
                let merge = self.new_block();
                let current = self.current;
                self.block_mut(current).merge = Some(Merge::Selection(merge));
                self.switch_to(
                    Terminator::CondBranch {
                        cond,
                        accept: then_block,
                        reject: else_block.unwrap_or(merge),
                    },
                    then_block,
                );
                self.stmts(then_branch)?;
                match else_block {
                    Some(else_block) => {
                        self.switch_to(Terminator::Branch(merge), else_block);
                        self.stmts(else_branch)?;
                        self.switch_to(Terminator::Branch(merge), merge);
                    }
                    None => self.switch_to(Terminator::Branch(merge), merge),
                }
            }
            Stmt::Loop {
                cond,
                body,
                step,
                test_first,
            } => self.lower_loop(cond.as_ref(), body, step, *test_first)?,
            Stmt::Break => {
                let target = self.innermost_loop()?.merge;
                self.jump(Terminator::Branch(target));
            }
            Stmt::Continue => {
                let target = self.innermost_loop()?.continuing;
                self.jump(Terminator::Branch(target));
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(e) => Some(self.expr(e)?),
                    None => None,
                };
                self.jump(Terminator::Return(value));
            }
            Stmt::Discard => self.jump(Terminator::Kill),
            Stmt::Block(stmts) => self.stmts(stmts)?,
        }
        Ok(())
    }

    fn innermost_loop(&self) -> LowerResult<&LoopTargets> {
        self.loops
            .last()
            .ok_or_else(|| self.error("break or continue outside of a loop"))
    }

    /// ```text
    /// header [loop merge] -> check -> body -> continuing -> header
    ///                          \-> merge
    /// ```
    /// `do`/`while` evaluates the condition at the end of the continuing block instead.
    fn lower_loop(
        &mut self,
        cond: Option<&Expr>,
        body: &[Stmt],
        step: &[Stmt],
        test_first: bool,
    ) -> LowerResult<()> {
        let header = self.new_block();
        let body_block = self.new_block();
        let continuing = self.new_block();
        let merge = self.new_block();

        self.switch_to(Terminator::Branch(header), header);
        self.block_mut(header).merge = Some(Merge::Loop { merge, continuing });

        if test_first {
            if let Some(cond) = cond {
                let check = self.new_block();
                self.switch_to(Terminator::Branch(check), check);
                let cond = self.expr(cond)?;
                self.switch_to(
                    Terminator::CondBranch {
                        cond,
                        accept: body_block,
                        reject: merge,
                    },
                    body_block,
                );
            } else {
                self.switch_to(Terminator::Branch(body_block), body_block);
            }
        } else {
            self.switch_to(Terminator::Branch(body_block), body_block);
        }

        self.loops.push(LoopTargets { merge, continuing });
        let lowered = self.stmts(body);
        self.loops.pop();
        lowered?;

        self.switch_to(Terminator::Branch(continuing), continuing);
        self.stmts(step)?;
        let back_edge = match (test_first, cond) {
            (false, Some(cond)) => {
                let cond = self.expr(cond)?;
                Terminator::CondBranch {
                    cond,
                    accept: header,
                    reject: merge,
                }
            }
            _ => Terminator::Branch(header),
        };
        self.switch_to(back_edge, merge);
        Ok(())
    }

    fn assign(&mut self, target: &Expr, value: &Expr) -> LowerResult<()> {
        if let ExprKind::Swizzle { base, components } = &target.kind {
            if components.len() > 1 {
                let place = self.place(base)?;
                let value = self.expr(value)?;
                let kind = value_kind(&target.ty);
                for (i, component) in components.iter().enumerate() {
                    let element = self.push(kind.clone(), Op::Extract(value, i as u32));
                    let mut place = place.clone();
                    place.path.push(PlaceIndex::Const(*component as u32));
                    self.push_void(Op::Store {
                        place,
                        value: element,
                    });
                }
                return Ok(());
            }
        }
        let place = self.place(target)?;
        let value = self.expr(value)?;
        self.push_void(Op::Store { place, value });
        Ok(())
    }

    // ---- places ----

    fn is_place(e: &Expr) -> bool {
        match &e.kind {
            ExprKind::Local(_) | ExprKind::Resource(_) => true,
            ExprKind::Member { base, .. } | ExprKind::Index { base, .. } => Self::is_place(base),
            ExprKind::Swizzle { base, components } => components.len() == 1 && Self::is_place(base),
            _ => false,
        }
    }

    fn place(&mut self, e: &Expr) -> LowerResult<Place> {
        match &e.kind {
            ExprKind::Local(var) => Ok(Place::local(LocalId(var.0 as u32))),
            ExprKind::Resource(id) => Ok(Place {
                root: PlaceRoot::Resource(*id),
                path: vec![],
            }),
            ExprKind::Member { base, index } => {
                let mut place = self.place(base)?;
                place.path.push(PlaceIndex::Field(*index as u32));
                Ok(place)
            }
            ExprKind::Index { base, index } => {
                let mut place = self.place(base)?;
                let index = match index.const_index() {
                    Some(i) => PlaceIndex::Const(i as u32),
                    None => PlaceIndex::Dynamic(self.expr(index)?),
                };
                place.path.push(index);
                Ok(place)
            }
            ExprKind::Swizzle { base, components } if components.len() == 1 => {
                let mut place = self.place(base)?;
                place.path.push(PlaceIndex::Const(components[0] as u32));
                Ok(place)
            }
            _ => Err(self.error("expression is not a memory location")),
        }
    }

    // ---- expressions ----

    fn expr(&mut self, e: &Expr) -> LowerResult<ValueId> {
        let ty = e.ty.clone();
        if Self::is_place(e) && !matches!(e.kind, ExprKind::Resource(_)) {
            let place = self.place(e)?;
            return Ok(self.push(ty, Op::Load(place)));
        }
        let value = match &e.kind {
            ExprKind::Literal(lit) => self.push(ty, Op::Constant(constant(*lit))),
            ExprKind::Local(_) | ExprKind::Resource(_) => {
                return Err(self.error("resources cannot be used as values"))
            }
            ExprKind::Member { base, index } => {
                let base = self.expr(base)?;
                self.push(ty, Op::Extract(base, *index as u32))
            }
            ExprKind::Swizzle { base, components } => {
                let base = self.expr(base)?;
                if components.len() == 1 {
                    self.push(ty, Op::Extract(base, components[0] as u32))
                } else {
                    self.push(ty, Op::Swizzle(base, components.clone()))
                }
            }
            ExprKind::Index { base, index } => self.index_value(base, index, ty)?,
            ExprKind::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                self.push(ty, Op::Unary(*op, operand))
            }
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                    self.short_circuit(*op == BinaryOp::LogicalAnd, lhs, rhs)?
                }
                _ => {
                    let lhs = self.expr(lhs)?;
                    let rhs = self.expr(rhs)?;
                    self.push(ty, Op::Binary(*op, lhs, rhs))
                }
            },
            ExprKind::Conditional {
                cond,
                accept,
                reject,
            } => self.conditional(cond, accept, reject, ty)?,
            ExprKind::Convert(inner) => {
                let inner = self.expr(inner)?;
                self.push(ty, Op::Convert(inner))
            }
            ExprKind::Splat(inner) => {
                let inner = self.expr(inner)?;
                self.push(ty, Op::Splat(inner))
            }
            ExprKind::Construct(args) => {
                let args = self.exprs(args)?;
                self.push(ty, Op::Composite(args))
            }
            ExprKind::Call { function, args } => {
                let args = self.exprs(args)?;
                let function: FunctionId = *function;
                self.push(ty, Op::Call(function, args))
            }
            ExprKind::Intrinsic { intrinsic, args } => self.intrinsic(*intrinsic, args, ty)?,
            ExprKind::Sample {
                texture,
                sampler,
                coord,
                lod,
            } => {
                let coord = self.expr(coord)?;
                let lod = match lod {
                    Some(lod) => Some(self.expr(lod)?),
                    None => None,
                };
                self.push(
                    ty,
                    Op::Sample {
                        texture: *texture,
                        sampler: *sampler,
                        coord,
                        lod,
                    },
                )
            }
        };
        Ok(value)
    }

    fn exprs(&mut self, exprs: &[Expr]) -> LowerResult<Vec<ValueId>> {
        exprs.iter().map(|e| self.expr(e)).collect()
    }

    fn index_value(&mut self, base: &Expr, index: &Expr, ty: Type) -> LowerResult<ValueId> {
        let base_value = self.expr(base)?;
        if let Some(i) = index.const_index() {
            return Ok(self.push(ty, Op::Extract(base_value, i as u32)));
        }
        let index = self.expr(index)?;
        if base.ty.is_vector() {
            return Ok(self.push(ty, Op::ExtractDynamic(base_value, index)));
        }
        // Arrays and matrices are only indexed dynamically through memory
        let spill = self.temporary(base.ty.clone());
        self.push_void(Op::Store {
            place: Place::local(spill),
            value: base_value,
        });
        let place = Place {
            root: PlaceRoot::Local(spill),
            path: vec![PlaceIndex::Dynamic(index)],
        };
        Ok(self.push(ty, Op::Load(place)))
    }

    /// `a && b` is `t = a; if (t) { t = b; }` and `a || b` is `t = a; if (!t) { t = b; }`
    fn short_circuit(&mut self, is_and: bool, lhs: &Expr, rhs: &Expr) -> LowerResult<ValueId> {
        let temp = self.temporary(BOOL);
        let lhs = self.expr(lhs)?;
        self.push_void(Op::Store {
            place: Place::local(temp),
            value: lhs,
        });
        let rhs_block = self.new_block();
        let merge = self.new_block();
        let current = self.current;
        self.block_mut(current).merge = Some(Merge::Selection(merge));
        let (accept, reject) = if is_and {
            (rhs_block, merge)
        } else {
            (merge, rhs_block)
        };
        self.switch_to(
            Terminator::CondBranch {
                cond: lhs,
                accept,
                reject,
            },
            rhs_block,
        );
        let rhs = self.expr(rhs)?;
        self.push_void(Op::Store {
            place: Place::local(temp),
            value: rhs,
        });
        self.switch_to(Terminator::Branch(merge), merge);
        Ok(self.push(BOOL, Op::Load(Place::local(temp))))
    }

    fn conditional(&mut self, cond: &Expr, accept: &Expr, reject: &Expr, ty: Type) -> LowerResult<ValueId> {
        let temp = self.temporary(ty.clone());
        let cond = self.expr(cond)?;
        let accept_block = self.new_block();
        let reject_block = self.new_block();
        let merge = self.new_block();
        let current = self.current;
        self.block_mut(current).merge = Some(Merge::Selection(merge));
        self.switch_to(
            Terminator::CondBranch {
                cond,
                accept: accept_block,
                reject: reject_block,
            },
            accept_block,
        );
        for (side, next) in [(accept, reject_block), (reject, merge)] {
            let value = self.expr(side)?;
            self.push_void(Op::Store {
                place: Place::local(temp),
                value,
            });
            self.switch_to(Terminator::Branch(merge), next);
        }
        Ok(self.push(ty, Op::Load(Place::local(temp))))
    }

    fn intrinsic(&mut self, intrinsic: Intrinsic, args: &[Expr], ty: Type) -> LowerResult<ValueId> {
        let values = self.exprs(args)?;
        match (intrinsic, values.as_slice()) {
            (Intrinsic::Select, [cond, accept, reject]) => {
                let cond = match (&args[0].ty, &ty) {
                    (Type::Scalar(_), Type::Vector(_, n)) => {
                        self.push(Type::Vector(crate::types::ScalarKind::Bool, *n), Op::Splat(*cond))
                    }
                    _ => *cond,
                };
                Ok(self.push(
                    ty,
                    Op::Select {
                        cond,
                        accept: *accept,
                        reject: *reject,
                    },
                ))
            }
            (Intrinsic::Select, _) => Err(self.error("select takes three arguments")),
            (Intrinsic::Any | Intrinsic::All, [value]) if args[0].ty.is_scalar() => Ok(*value),
            _ => Ok(self.push(ty, Op::Intrinsic(intrinsic, values.clone()))),
        }
    }
}

fn value_kind(ty: &Type) -> Type {
    Type::Scalar(ty.scalar_kind().unwrap_or(crate::types::ScalarKind::Float))
}

fn constant(lit: Literal) -> Constant {
    match lit {
        Literal::Bool(b) => Constant::Bool(b),
        Literal::Int(v) => Constant::Int(v),
        Literal::Uint(v) => Constant::Uint(v),
        Literal::Float(v) => Constant::Float(v),
    }
}
