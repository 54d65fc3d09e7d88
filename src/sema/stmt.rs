//! Function bodies: statements, lvalues and return-path analysis.

use std::collections::HashSet;

use crate::{
    frontend::{
        ast::{self, BinaryOp, StmtKind},
        Position,
    },
    types::{ResourceKind, ScalarKind, Type},
};

use super::{
    error::{bail, SemaResult},
    expr::Operand,
    scope::Symbol,
    tast::{Expr, ExprKind, Function, FunctionId, Literal, Param, Stmt, VarId, Variable},
    Analyzer, FunctionState,
};

/// Whether every path through `stmts` ends in a `return`
fn always_returns(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| match stmt {
        Stmt::Return(_) => true,
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => always_returns(then_branch) && always_returns(else_branch),
        Stmt::Block(inner) => always_returns(inner),
        // The body of a `do`/`while` runs at least once
        Stmt::Loop {
            body,
            test_first: false,
            ..
        } => always_returns(body) && !leaves_loop(body),
        _ => false,
    })
}

/// Whether `stmts` can `break` or `continue` the loop they belong to
fn leaves_loop(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| match stmt {
        Stmt::Break | Stmt::Continue => true,
        Stmt::If {
            then_branch,
            else_branch,
            ..
        } => leaves_loop(then_branch) || leaves_loop(else_branch),
        Stmt::Block(inner) => leaves_loop(inner),
        _ => false,
    })
}

impl<'p> Analyzer<'p> {
    pub(super) fn check_function(&mut self, id: FunctionId, decl: &ast::FunctionDecl) -> SemaResult<Function> {
        let signature = self.signatures[id.0].clone();
        self.current = FunctionState {
            id,
            return_type: signature.return_type.clone(),
            ..FunctionState::default()
        };

        self.scopes.push();
        let mut params = vec![];
        for ((name, ty, semantic), decl) in signature.params.iter().zip(&decl.params) {
            let var = self.declare_local(name, ty.clone(), false, decl.position)?;
            params.push(Param {
                name: name.clone(),
                ty: ty.clone(),
                var,
                semantic: semantic.clone(),
            });
        }
        // Parameters share the body's outermost scope
        let body = self.check_stmts(&decl.body.stmts);
        self.scopes.pop();
        let body = body?;

        if !signature.return_type.is_void() && !always_returns(&body) {
            bail!(
                MissingReturn,
                decl.position,
                "not every path through '{}' returns a value",
                decl.name
            );
        }

        let state = std::mem::take(&mut self.current);
        Ok(Function {
            name: signature.name,
            params,
            return_type: signature.return_type,
            return_semantic: decl.return_semantic.as_ref().map(|s| s.name.clone()),
            locals: state.locals,
            body,
            stage: signature.stage,
            position: decl.position,
        })
    }

    fn declare_local(&mut self, name: &str, ty: Type, is_const: bool, position: Position) -> SemaResult<VarId> {
        let var = VarId(self.current.locals.len());
        if let Err(existing) = self.scopes.declare(name, Symbol::Local { var, is_const }) {
            let what = match existing {
                Symbol::Resource(_) => "a resource",
                Symbol::Local { .. } => "a variable",
            };
            bail!(
                Redefinition,
                position,
                "'{}' is already declared as {} in this scope",
                name,
                what
            );
        }
        self.current.locals.push(Variable {
            name: name.to_owned(),
            ty,
        });
        if is_const {
            self.current.const_vars.insert(var.0);
        }
        Ok(var)
    }

    fn check_stmts(&mut self, stmts: &[ast::Stmt]) -> SemaResult<Vec<Stmt>> {
        stmts.iter().map(|s| self.check_stmt(s)).collect()
    }

    fn check_block(&mut self, block: &ast::Block) -> SemaResult<Vec<Stmt>> {
        self.scopes.push();
        let stmts = self.check_stmts(&block.stmts);
        self.scopes.pop();
        stmts
    }

    fn check_loop_body(&mut self, block: &ast::Block) -> SemaResult<Vec<Stmt>> {
        self.current.loop_depth += 1;
        let body = self.check_block(block);
        self.current.loop_depth -= 1;
        body
    }

    fn check_stmt(&mut self, stmt: &ast::Stmt) -> SemaResult<Stmt> {
        let position = stmt.position;
        Ok(match &stmt.kind {
            StmtKind::VarDecl(decl) => {
                let ty = self.resolve_value_type(&decl.ty, decl.array_len, position)?;
                if !ty.is_storable() {
                    bail!(
                        InvalidType,
                        decl.ty.position,
                        "'{}' cannot have type {}",
                        decl.name,
                        ty.named(&self.structs)
                    );
                }
                if decl.is_const && decl.init.is_none() {
                    bail!(
                        InvalidAssignment,
                        position,
                        "const '{}' needs an initializer",
                        decl.name
                    );
                }
                // The initializer cannot see the variable it initializes
                let init = match &decl.init {
                    Some(init) => Some(self.expect_type(init, &ty)?),
                    None => None,
                };
                let var = self.declare_local(&decl.name, ty, decl.is_const, position)?;
                Stmt::Local { var, init }
            }
            StmtKind::Assign { target, op, value } => {
                let target = self.lvalue(target)?;
                let value = match op {
                    None => self.expect_type(value, &target.ty)?,
                    Some(op) => {
                        let rhs = self.check_expr(value)?;
                        let lhs = Operand {
                            expr: target.clone(),
                            literal: None,
                            position,
                        };
                        let result = self.binary(*op, lhs, rhs, position)?;
                        self.coerce(result, &target.ty)?
                    }
                };
                Stmt::Assign { target, value }
            }
            StmtKind::IncDec { target, increment } => {
                let target = self.lvalue(target)?;
                let one = match target.ty {
                    Type::Scalar(ScalarKind::Int) => Literal::Int(1),
                    Type::Scalar(ScalarKind::Uint) => Literal::Uint(1),
                    Type::Scalar(ScalarKind::Float) => Literal::Float(1.0),
                    ref other => bail!(
                        InvalidOperands,
                        position,
                        "{} cannot be applied to {}",
                        if *increment { "++" } else { "--" },
                        other.named(&self.structs)
                    ),
                };
                let op = if *increment { BinaryOp::Add } else { BinaryOp::Sub };
                let value = Expr {
                    ty: target.ty.clone(),
                    kind: ExprKind::Binary {
                        op,
                        lhs: Box::new(target.clone()),
                        rhs: Box::new(Expr::literal(one)),
                    },
                };
                Stmt::Assign { target, value }
            }
            StmtKind::Expr(e) => Stmt::Expr(self.value(e)?),
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond = self.condition(cond)?;
                let then_branch = self.check_block(then_branch)?;
                let else_branch = match else_branch {
                    Some(block) => self.check_block(block)?,
                    None => vec![],
                };
                Stmt::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
            StmtKind::While { cond, body } => {
                let cond = self.condition(cond)?;
                let body = self.check_loop_body(body)?;
                Stmt::Loop {
                    cond: Some(cond),
                    body,
                    step: vec![],
                    test_first: true,
                }
            }
            StmtKind::DoWhile { body, cond } => {
                let body = self.check_loop_body(body)?;
                let cond = self.condition(cond)?;
                Stmt::Loop {
                    cond: Some(cond),
                    body,
                    step: vec![],
                    test_first: false,
                }
            }
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                // The init variable is scoped to the loop
                self.scopes.push();
                let result = self.check_for(init.as_deref(), cond.as_ref(), step.as_deref(), body);
                self.scopes.pop();
                result?
            }
            StmtKind::Break | StmtKind::Continue => {
                let is_break = matches!(stmt.kind, StmtKind::Break);
                if self.current.loop_depth == 0 {
                    bail!(
                        InvalidControlFlow,
                        position,
                        "'{}' outside of a loop",
                        if is_break { "break" } else { "continue" }
                    );
                }
                if is_break {
                    Stmt::Break
                } else {
                    Stmt::Continue
                }
            }
            StmtKind::Return(value) => {
                let return_type = self.current.return_type.clone();
                match (value, return_type.is_void()) {
                    (None, true) => Stmt::Return(None),
                    (None, false) => bail!(
                        TypeMismatch,
                        position,
                        "return needs a value of type {}",
                        return_type.named(&self.structs)
                    ),
                    (Some(_), true) => bail!(
                        TypeMismatch,
                        position,
                        "void function cannot return a value"
                    ),
                    (Some(value), false) => Stmt::Return(Some(self.expect_type(value, &return_type)?)),
                }
            }
            StmtKind::Discard => {
                let current = self.current.id;
                self.facts[current.0].discard.get_or_insert(position);
                Stmt::Discard
            }
            StmtKind::Block(block) => Stmt::Block(self.check_block(block)?),
        })
    }

    fn check_for(
        &mut self,
        init: Option<&ast::Stmt>,
        cond: Option<&ast::Expr>,
        step: Option<&ast::Stmt>,
        body: &ast::Block,
    ) -> SemaResult<Stmt> {
        let init = match init {
            Some(init) => Some(self.check_stmt(init)?),
            None => None,
        };
        let cond = match cond {
            Some(cond) => Some(self.condition(cond)?),
            None => None,
        };
        let step = match step {
            Some(step) => vec![self.check_stmt(step)?],
            None => vec![],
        };
        let body = self.check_loop_body(body)?;
        let looped = Stmt::Loop {
            cond,
            body,
            step,
            test_first: true,
        };
        Ok(Stmt::Block(init.into_iter().chain(std::iter::once(looped)).collect()))
    }

    /// Check an assignment target
    fn lvalue(&mut self, e: &ast::Expr) -> SemaResult<Expr> {
        let target = self.value(e)?;
        self.check_writable(&target, e.position)?;
        Ok(target)
    }

    fn check_writable(&self, target: &Expr, position: Position) -> SemaResult<()> {
        match &target.kind {
            ExprKind::Local(var) => {
                if self.current.const_vars.contains(&var.0) {
                    bail!(
                        InvalidAssignment,
                        position,
                        "cannot assign to const '{}'",
                        self.current.locals[var.0].name
                    );
                }
                Ok(())
            }
            ExprKind::Member { base, .. } => self.check_writable(base, position),
            ExprKind::Swizzle { base, components } => {
                let unique: HashSet<&u8> = components.iter().collect();
                if unique.len() != components.len() {
                    bail!(
                        InvalidAssignment,
                        position,
                        "cannot assign to a swizzle with repeated components"
                    );
                }
                self.check_writable(base, position)
            }
            ExprKind::Index { base, .. } => match &base.kind {
                ExprKind::Resource(id) => match &self.resources[id.0].kind {
                    ResourceKind::StructuredBuffer { writable: true, .. } => Ok(()),
                    _ => bail!(
                        InvalidAssignment,
                        position,
                        "'{}' is read-only",
                        self.resources[id.0].name
                    ),
                },
                _ => self.check_writable(base, position),
            },
            ExprKind::Resource(id) => bail!(
                InvalidAssignment,
                position,
                "cannot assign to resource '{}'",
                self.resources[id.0].name
            ),
            _ => bail!(InvalidAssignment, position, "expression is not assignable"),
        }
    }
}
