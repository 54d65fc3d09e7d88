//! Recursive-descent parser for declarations and statements, with a binding-power loop for binary operators.
//!
//! Parsing stops at the first error.

use std::collections::VecDeque;

use crate::types::builtin_type;

use super::{
    ast::*,
    error::{FrontendError, LexError, SyntaxError},
    lexer::tokenize,
    token::{Keyword, Punct, Token, TokenKind},
    Position,
};

type ParseResult<T> = Result<T, FrontendError>;

/// Lex and parse a complete source string
pub fn parse_source(source: &str) -> ParseResult<Program> {
    parse(tokenize(source))
}

/// Parse a token stream into a [Program]. Lexer errors are reported as soon as the parser reaches them.
pub fn parse<I>(tokens: I) -> ParseResult<Program>
where
    I: IntoIterator<Item = Result<Token, LexError>>,
{
    let mut parser = Parser {
        tokens: tokens.into_iter(),
        lookahead: VecDeque::new(),
        last_position: Position::start(),
        depth: 0,
    };
    parser.program()
}

struct Parser<I: Iterator<Item = Result<Token, LexError>>> {
    tokens: I,
    lookahead: VecDeque<Token>,
    last_position: Position,
    /// Current nesting of statements and expressions
    depth: usize,
}

/// Deepest nesting of statements and expressions accepted. Every later pass recurses over the tree, so this
/// bounds their stack use too.
pub const MAX_NESTING: usize = 256;

/// Binding power of each binary operator. Higher binds tighter.
fn binary_op(kind: TokenKind) -> Option<(BinaryOp, u8)> {
    let TokenKind::Punct(p) = kind else {
        return None;
    };
    let op = match p {
        Punct::OrOr => (BinaryOp::LogicalOr, 1),
        Punct::AndAnd => (BinaryOp::LogicalAnd, 2),
        Punct::Pipe => (BinaryOp::BitOr, 3),
        Punct::Caret => (BinaryOp::BitXor, 4),
        Punct::Amp => (BinaryOp::BitAnd, 5),
        Punct::EqEq => (BinaryOp::Eq, 6),
        Punct::NotEq => (BinaryOp::Ne, 6),
        Punct::Lt => (BinaryOp::Lt, 7),
        Punct::Gt => (BinaryOp::Gt, 7),
        Punct::LtEq => (BinaryOp::Le, 7),
        Punct::GtEq => (BinaryOp::Ge, 7),
        Punct::Shl => (BinaryOp::Shl, 8),
        Punct::Shr => (BinaryOp::Shr, 8),
        Punct::Plus => (BinaryOp::Add, 9),
        Punct::Minus => (BinaryOp::Sub, 9),
        Punct::Star => (BinaryOp::Mul, 10),
        Punct::Slash => (BinaryOp::Div, 10),
        Punct::Percent => (BinaryOp::Rem, 10),
        _ => return None,
    };
    Some(op)
}

fn assign_op(kind: TokenKind) -> Option<Option<BinaryOp>> {
    let TokenKind::Punct(p) = kind else {
        return None;
    };
    let op = match p {
        Punct::Assign => None,
        Punct::PlusAssign => Some(BinaryOp::Add),
        Punct::MinusAssign => Some(BinaryOp::Sub),
        Punct::StarAssign => Some(BinaryOp::Mul),
        Punct::SlashAssign => Some(BinaryOp::Div),
        Punct::PercentAssign => Some(BinaryOp::Rem),
        Punct::AmpAssign => Some(BinaryOp::BitAnd),
        Punct::PipeAssign => Some(BinaryOp::BitOr),
        Punct::CaretAssign => Some(BinaryOp::BitXor),
        Punct::ShlAssign => Some(BinaryOp::Shl),
        Punct::ShrAssign => Some(BinaryOp::Shr),
        _ => return None,
    };
    Some(op)
}

impl<I: Iterator<Item = Result<Token, LexError>>> Parser<I> {
    // ---- token plumbing ----

    fn peek_nth(&mut self, n: usize) -> ParseResult<&Token> {
        while self.lookahead.len() <= n {
            let token = match self.tokens.next() {
                Some(token) => token?,
                // The lexer stops after Eof; keep answering Eof
                None => Token {
                    kind: TokenKind::Eof,
                    lexeme: String::new(),
                    position: self.last_position,
                },
            };
            self.last_position = token.position;
            self.lookahead.push_back(token);
        }
        Ok(&self.lookahead[n])
    }

    fn peek(&mut self) -> ParseResult<&Token> {
        self.peek_nth(0)
    }

    fn peek_kind(&mut self) -> ParseResult<TokenKind> {
        Ok(self.peek()?.kind)
    }

    fn bump(&mut self) -> ParseResult<Token> {
        self.peek()?;
        let position = self.last_position;
        Ok(self.lookahead.pop_front().unwrap_or(Token {
            kind: TokenKind::Eof,
            lexeme: String::new(),
            position,
        }))
    }

    fn at_punct(&mut self, p: Punct) -> ParseResult<bool> {
        Ok(self.peek_kind()? == TokenKind::Punct(p))
    }

    fn at_keyword(&mut self, k: Keyword) -> ParseResult<bool> {
        Ok(self.peek_kind()? == TokenKind::Keyword(k))
    }

    fn eat_punct(&mut self, p: Punct) -> ParseResult<bool> {
        if self.at_punct(p)? {
            self.bump()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn error<T>(&mut self, expected: impl Into<String>) -> ParseResult<T> {
        let token = self.peek()?;
        Err(SyntaxError {
            position: token.position,
            expected: expected.into(),
            found: token.to_string(),
        }
        .into())
    }

    /// Go one nesting level deeper, the caller undoes it by decrementing `depth` once the construct is parsed
    fn enter(&mut self) -> ParseResult<()> {
        if self.depth >= MAX_NESTING {
            return self.error(format!("at most {} levels of nesting", MAX_NESTING));
        }
        self.depth += 1;
        Ok(())
    }

    fn expect_punct(&mut self, p: Punct) -> ParseResult<Token> {
        if self.at_punct(p)? {
            self.bump()
        } else {
            self.error(format!("'{}'", p.as_str()))
        }
    }

    fn expect_keyword(&mut self, k: Keyword) -> ParseResult<Token> {
        if self.at_keyword(k)? {
            self.bump()
        } else {
            self.error(TokenKind::Keyword(k).to_string())
        }
    }

    fn expect_ident(&mut self, what: &str) -> ParseResult<(String, Position)> {
        if self.peek_kind()? == TokenKind::Ident {
            let token = self.bump()?;
            Ok((token.lexeme, token.position))
        } else {
            self.error(what)
        }
    }

    fn expect_int(&mut self, what: &str) -> ParseResult<(u64, Position)> {
        match self.peek_kind()? {
            TokenKind::Int { value, .. } => {
                let token = self.bump()?;
                Ok((value, token.position))
            }
            _ => self.error(what),
        }
    }

    /// An integer that may be preceded by a minus sign
    fn expect_signed_int(&mut self, what: &str) -> ParseResult<(i64, Position)> {
        let negative = self.at_punct(Punct::Minus)?;
        let position = self.peek()?.position;
        if negative {
            self.bump()?;
        }
        let (value, _) = self.expect_int(what)?;
        let value = value as i64;
        Ok((if negative { -value } else { value }, position))
    }

    // ---- declarations ----

    fn program(&mut self) -> ParseResult<Program> {
        let mut items = vec![];
        loop {
            match self.peek_kind()? {
                TokenKind::Eof => break,
                TokenKind::Keyword(Keyword::Struct) => items.push(Item::Struct(self.struct_decl()?)),
                TokenKind::Punct(Punct::LBracket) | TokenKind::Ident => items.push(self.global()?),
                _ => return self.error("a struct, resource or function declaration"),
            }
        }
        Ok(Program { items })
    }

    fn struct_decl(&mut self) -> ParseResult<StructDecl> {
        let position = self.expect_keyword(Keyword::Struct)?.position;
        let (name, _) = self.expect_ident("a struct name")?;
        self.expect_punct(Punct::LBrace)?;
        let mut members = vec![];
        while !self.at_punct(Punct::RBrace)? {
            let ty = self.type_ref()?;
            let (name, position) = self.expect_ident("a field name")?;
            let array_len = self.array_suffix()?;
            let semantic = self.semantic()?;
            self.expect_punct(Punct::Semicolon)?;
            members.push(FieldDecl {
                ty,
                name,
                array_len,
                semantic,
                position,
            });
        }
        self.expect_punct(Punct::RBrace)?;
        self.eat_punct(Punct::Semicolon)?;
        Ok(StructDecl {
            name,
            members,
            position,
        })
    }

    fn global(&mut self) -> ParseResult<Item> {
        let attributes = self.attributes()?;
        let return_type = self.type_ref()?;
        let (name, position) = self.expect_ident("a declaration name")?;

        if attributes.is_empty() && self.at_punct(Punct::Colon)? {
            self.bump()?;
            let (keyword, _) = self.expect_ident("'binding'")?;
            if keyword != "binding" {
                return Err(SyntaxError {
                    position,
                    expected: "'binding'".into(),
                    found: format!("'{}'", keyword),
                }
                .into());
            }
            self.expect_punct(Punct::LParen)?;
            let (binding, binding_position) = self.expect_signed_int("a binding slot")?;
            self.expect_punct(Punct::RParen)?;
            self.expect_punct(Punct::Semicolon)?;
            return Ok(Item::Resource(ResourceDecl {
                ty: return_type,
                name,
                binding,
                binding_position,
                position,
            }));
        }

        self.expect_punct(Punct::LParen)?;
        let mut params = vec![];
        if !self.at_punct(Punct::RParen)? {
            loop {
                let ty = self.type_ref()?;
                let (name, position) = self.expect_ident("a parameter name")?;
                let array_len = self.array_suffix()?;
                let semantic = self.semantic()?;
                params.push(Param {
                    ty,
                    name,
                    array_len,
                    semantic,
                    position,
                });
                if !self.eat_punct(Punct::Comma)? {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen)?;
        let return_semantic = self.semantic()?;
        let body = self.block()?;
        Ok(Item::Function(FunctionDecl {
            attributes,
            return_type,
            name,
            params,
            return_semantic,
            body,
            position,
        }))
    }

    fn attributes(&mut self) -> ParseResult<Vec<Attribute>> {
        let mut attributes = vec![];
        while self.at_punct(Punct::LBracket)? {
            self.bump()?;
            let (name, position) = self.expect_ident("an attribute name")?;
            let mut args = vec![];
            if self.eat_punct(Punct::LParen)? {
                loop {
                    let (value, _) = self.expect_signed_int("an integer attribute argument")?;
                    args.push(value);
                    if !self.eat_punct(Punct::Comma)? {
                        break;
                    }
                }
                self.expect_punct(Punct::RParen)?;
            }
            self.expect_punct(Punct::RBracket)?;
            attributes.push(Attribute {
                name,
                args,
                position,
            });
        }
        Ok(attributes)
    }

    fn type_ref(&mut self) -> ParseResult<TypeRef> {
        let (name, position) = self.expect_ident("a type name")?;
        let generic_arg = if self.eat_punct(Punct::Lt)? {
            let arg = self.type_ref()?;
            self.expect_punct(Punct::Gt)?;
            Some(Box::new(arg))
        } else {
            None
        };
        Ok(TypeRef {
            name,
            generic_arg,
            position,
        })
    }

    fn array_suffix(&mut self) -> ParseResult<Option<u64>> {
        if self.eat_punct(Punct::LBracket)? {
            let (len, _) = self.expect_int("an array length")?;
            self.expect_punct(Punct::RBracket)?;
            Ok(Some(len))
        } else {
            Ok(None)
        }
    }

    fn semantic(&mut self) -> ParseResult<Option<Semantic>> {
        if self.eat_punct(Punct::Colon)? {
            let (name, position) = self.expect_ident("a semantic")?;
            Ok(Some(Semantic { name, position }))
        } else {
            Ok(None)
        }
    }

    // ---- statements ----

    fn block(&mut self) -> ParseResult<Block> {
        let position = self.expect_punct(Punct::LBrace)?.position;
        let mut stmts = vec![];
        while !self.at_punct(Punct::RBrace)? {
            stmts.push(self.statement()?);
        }
        self.bump()?;
        Ok(Block { stmts, position })
    }

    /// The body of an `if`/loop: a braced block or a single statement
    fn body(&mut self) -> ParseResult<Block> {
        if self.at_punct(Punct::LBrace)? {
            self.block()
        } else {
            let stmt = self.statement()?;
            Ok(Block {
                position: stmt.position,
                stmts: vec![stmt],
            })
        }
    }

    fn statement(&mut self) -> ParseResult<Stmt> {
        self.enter()?;
        let stmt = self.statement_kind()?;
        self.depth -= 1;
        Ok(stmt)
    }

    fn statement_kind(&mut self) -> ParseResult<Stmt> {
        let position = self.peek()?.position;
        let kind = match self.peek_kind()? {
            TokenKind::Punct(Punct::LBrace) => StmtKind::Block(self.block()?),
            TokenKind::Punct(Punct::Semicolon) => {
                self.bump()?;
                StmtKind::Block(Block {
                    stmts: vec![],
                    position,
                })
            }
            TokenKind::Keyword(Keyword::If) => {
                self.bump()?;
                self.expect_punct(Punct::LParen)?;
                let cond = self.expr()?;
                self.expect_punct(Punct::RParen)?;
                let then_branch = self.body()?;
                let else_branch = if self.at_keyword(Keyword::Else)? {
                    self.bump()?;
                    Some(self.body()?)
                } else {
                    None
                };
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                }
            }
            TokenKind::Keyword(Keyword::While) => {
                self.bump()?;
                self.expect_punct(Punct::LParen)?;
                let cond = self.expr()?;
                self.expect_punct(Punct::RParen)?;
                let body = self.body()?;
                StmtKind::While { cond, body }
            }
            TokenKind::Keyword(Keyword::Do) => {
                self.bump()?;
                let body = self.body()?;
                self.expect_keyword(Keyword::While)?;
                self.expect_punct(Punct::LParen)?;
                let cond = self.expr()?;
                self.expect_punct(Punct::RParen)?;
                self.expect_punct(Punct::Semicolon)?;
                StmtKind::DoWhile { body, cond }
            }
            TokenKind::Keyword(Keyword::For) => {
                self.bump()?;
                self.expect_punct(Punct::LParen)?;
                let init = if self.at_punct(Punct::Semicolon)? {
                    None
                } else {
                    Some(Box::new(self.simple_statement()?))
                };
                self.expect_punct(Punct::Semicolon)?;
                let cond = if self.at_punct(Punct::Semicolon)? {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect_punct(Punct::Semicolon)?;
                let step = if self.at_punct(Punct::RParen)? {
                    None
                } else {
                    Some(Box::new(self.simple_statement()?))
                };
                self.expect_punct(Punct::RParen)?;
                let body = self.body()?;
                StmtKind::For {
                    init,
                    cond,
                    step,
                    body,
                }
            }
            TokenKind::Keyword(Keyword::Break) => {
                self.bump()?;
                self.expect_punct(Punct::Semicolon)?;
                StmtKind::Break
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.bump()?;
                self.expect_punct(Punct::Semicolon)?;
                StmtKind::Continue
            }
            TokenKind::Keyword(Keyword::Discard) => {
                self.bump()?;
                self.expect_punct(Punct::Semicolon)?;
                StmtKind::Discard
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.bump()?;
                let value = if self.at_punct(Punct::Semicolon)? {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.expect_punct(Punct::Semicolon)?;
                StmtKind::Return(value)
            }
            _ => {
                let stmt = self.simple_statement()?;
                self.expect_punct(Punct::Semicolon)?;
                return Ok(stmt);
            }
        };
        Ok(Stmt { kind, position })
    }

    /// Declarations, assignments, increments and expression statements, without the trailing `;`
    fn simple_statement(&mut self) -> ParseResult<Stmt> {
        let position = self.peek()?.position;

        let is_decl = self.at_keyword(Keyword::Const)?
            || (self.peek_kind()? == TokenKind::Ident && self.peek_nth(1)?.kind == TokenKind::Ident);
        if is_decl {
            let is_const = if self.at_keyword(Keyword::Const)? {
                self.bump()?;
                true
            } else {
                false
            };
            let ty = self.type_ref()?;
            let (name, _) = self.expect_ident("a variable name")?;
            let array_len = self.array_suffix()?;
            let init = if self.eat_punct(Punct::Assign)? {
                Some(self.expr()?)
            } else {
                None
            };
            return Ok(Stmt {
                kind: StmtKind::VarDecl(VarDecl {
                    is_const,
                    ty,
                    name,
                    array_len,
                    init,
                }),
                position,
            });
        }

        if self.at_punct(Punct::PlusPlus)? || self.at_punct(Punct::MinusMinus)? {
            let increment = self.bump()?.kind == TokenKind::Punct(Punct::PlusPlus);
            let target = self.unary()?;
            return Ok(Stmt {
                kind: StmtKind::IncDec { target, increment },
                position,
            });
        }

        let target = self.expr()?;
        let kind = match self.peek_kind()? {
            TokenKind::Punct(Punct::PlusPlus) => {
                self.bump()?;
                StmtKind::IncDec {
                    target,
                    increment: true,
                }
            }
            TokenKind::Punct(Punct::MinusMinus) => {
                self.bump()?;
                StmtKind::IncDec {
                    target,
                    increment: false,
                }
            }
            kind => match assign_op(kind) {
                Some(op) => {
                    self.bump()?;
                    let value = self.expr()?;
                    StmtKind::Assign { target, op, value }
                }
                None => StmtKind::Expr(target),
            },
        };
        Ok(Stmt { kind, position })
    }

    // ---- expressions ----

    pub fn expr(&mut self) -> ParseResult<Expr> {
        let cond = self.binary(0)?;
        if self.at_punct(Punct::Question)? {
            self.bump()?;
            let accept = self.expr()?;
            self.expect_punct(Punct::Colon)?;
            let reject = self.expr()?;
            return Ok(Expr {
                position: cond.position,
                kind: ExprKind::Ternary {
                    cond: Box::new(cond),
                    accept: Box::new(accept),
                    reject: Box::new(reject),
                },
            });
        }
        Ok(cond)
    }

    fn binary(&mut self, min_power: u8) -> ParseResult<Expr> {
        let mut lhs = self.unary()?;
        // Each operator folded into `lhs` nests it one level deeper
        let mut chain = 0;
        loop {
            let Some((op, power)) = binary_op(self.peek_kind()?) else {
                break;
            };
            if power < min_power {
                break;
            }
            self.enter()?;
            chain += 1;
            self.bump()?;
            let rhs = self.binary(power + 1)?;
            lhs = Expr {
                position: lhs.position,
                kind: ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            };
        }
        self.depth -= chain;
        Ok(lhs)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        self.enter()?;
        let expr = self.prefixed()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn prefixed(&mut self) -> ParseResult<Expr> {
        let position = self.peek()?.position;
        let op = match self.peek_kind()? {
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Tilde) => Some(UnaryOp::BitNot),
            TokenKind::Punct(Punct::Plus) => {
                self.bump()?;
                return self.unary();
            }
            _ => None,
        };
        if let Some(op) = op {
            self.bump()?;
            let operand = self.unary()?;
            return Ok(Expr {
                kind: ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                position,
            });
        }

        // `(float3)x` - only builtin type names can be cast to, so `(a)` stays a parenthesised expression
        if self.at_punct(Punct::LParen)?
            && self.peek_nth(1)?.kind == TokenKind::Ident
            && builtin_type(&self.peek_nth(1)?.lexeme).is_some()
            && self.peek_nth(2)?.kind == TokenKind::Punct(Punct::RParen)
        {
            self.bump()?;
            let ty = self.type_ref()?;
            self.expect_punct(Punct::RParen)?;
            let value = self.unary()?;
            return Ok(Expr {
                kind: ExprKind::Cast {
                    ty,
                    value: Box::new(value),
                },
                position,
            });
        }

        let primary = self.primary()?;
        self.postfix(primary)
    }

    fn call_args(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect_punct(Punct::LParen)?;
        let mut args = vec![];
        if !self.at_punct(Punct::RParen)? {
            loop {
                args.push(self.expr()?);
                if !self.eat_punct(Punct::Comma)? {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen)?;
        Ok(args)
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let position = self.peek()?.position;
        let kind = match self.peek_kind()? {
            TokenKind::Int { value, unsigned } => {
                self.bump()?;
                ExprKind::IntLit { value, unsigned }
            }
            TokenKind::Float(v) => {
                self.bump()?;
                ExprKind::FloatLit(v)
            }
            TokenKind::Keyword(Keyword::True) => {
                self.bump()?;
                ExprKind::BoolLit(true)
            }
            TokenKind::Keyword(Keyword::False) => {
                self.bump()?;
                ExprKind::BoolLit(false)
            }
            TokenKind::Ident => {
                let name = self.bump()?.lexeme;
                if self.at_punct(Punct::LParen)? {
                    let args = self.call_args()?;
                    ExprKind::Call { callee: name, args }
                } else {
                    ExprKind::Ident(name)
                }
            }
            TokenKind::Punct(Punct::LParen) => {
                self.bump()?;
                let inner = self.expr()?;
                self.expect_punct(Punct::RParen)?;
                return Ok(inner);
            }
            _ => return self.error("an expression"),
        };
        Ok(Expr { kind, position })
    }

    fn postfix(&mut self, mut expr: Expr) -> ParseResult<Expr> {
        let mut chain = 0;
        loop {
            if self.at_punct(Punct::Dot)? || self.at_punct(Punct::LBracket)? {
                self.enter()?;
                chain += 1;
            }
            if self.eat_punct(Punct::Dot)? {
                let (name, _) = self.expect_ident("a member name")?;
                let position = expr.position;
                expr = if self.at_punct(Punct::LParen)? {
                    let args = self.call_args()?;
                    Expr {
                        kind: ExprKind::MethodCall {
                            receiver: Box::new(expr),
                            method: name,
                            args,
                        },
                        position,
                    }
                } else {
                    Expr {
                        kind: ExprKind::Member {
                            base: Box::new(expr),
                            name,
                        },
                        position,
                    }
                };
            } else if self.eat_punct(Punct::LBracket)? {
                let index = self.expr()?;
                self.expect_punct(Punct::RBracket)?;
                let position = expr.position;
                expr = Expr {
                    kind: ExprKind::Index {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                    position,
                };
            } else {
                self.depth -= chain;
                return Ok(expr);
            }
        }
    }
}
