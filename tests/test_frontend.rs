use turnip_shader_xc::frontend::{
    ast::{BinaryOp, ExprKind, Item, StmtKind},
    parse_source, tokenize, FrontendError, Keyword, LexErrorReason, Punct, TokenKind,
};

fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source)
        .map(|t| t.expect("Lex failure").kind)
        .collect()
}

fn lex_error(source: &str) -> LexErrorReason {
    let error = tokenize(source)
        .find_map(|t| t.err())
        .expect("Lexing should have failed");
    error.reason
}

#[test]
fn test_lex_declaration() {
    assert_eq!(
        kinds("float4 x = 1.5f;"),
        vec![
            TokenKind::Ident,
            TokenKind::Ident,
            TokenKind::Punct(Punct::Assign),
            TokenKind::Float(1.5),
            TokenKind::Punct(Punct::Semicolon),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_lex_numbers() {
    assert_eq!(
        kinds("12 0x1F 7u 1. .5 2e3 3f"),
        vec![
            TokenKind::Int {
                value: 12,
                unsigned: false
            },
            TokenKind::Int {
                value: 31,
                unsigned: false
            },
            TokenKind::Int {
                value: 7,
                unsigned: true
            },
            TokenKind::Float(1.0),
            TokenKind::Float(0.5),
            TokenKind::Float(2000.0),
            TokenKind::Float(3.0),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_lex_longest_punctuation() {
    assert_eq!(
        kinds("a <<= b >> c && !d"),
        vec![
            TokenKind::Ident,
            TokenKind::Punct(Punct::ShlAssign),
            TokenKind::Ident,
            TokenKind::Punct(Punct::Shr),
            TokenKind::Ident,
            TokenKind::Punct(Punct::AndAnd),
            TokenKind::Punct(Punct::Bang),
            TokenKind::Ident,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_lex_comments_and_keywords() {
    let source = "
// line comment
if /* block
comment */ return discard
";
    assert_eq!(
        kinds(source),
        vec![
            TokenKind::Keyword(Keyword::If),
            TokenKind::Keyword(Keyword::Return),
            TokenKind::Keyword(Keyword::Discard),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_lex_positions() {
    let tokens: Vec<_> = tokenize("a\n  bc").map(|t| t.expect("Lex failure")).collect();
    assert_eq!((tokens[0].position.line, tokens[0].position.column), (1, 1));
    assert_eq!((tokens[1].position.line, tokens[1].position.column), (2, 3));
    assert_eq!(tokens[1].lexeme, "bc");
    assert_eq!(tokens[1].position.offset, 4);
}

#[test]
fn test_lex_single_eof() {
    let tokens: Vec<_> = tokenize("").collect();
    assert_eq!(tokens.len(), 1);
    assert!(matches!(&tokens[0], Ok(t) if t.kind == TokenKind::Eof));
}

#[test]
fn test_lex_errors() {
    assert_eq!(lex_error("/* never closed"), LexErrorReason::UnterminatedComment);
    assert_eq!(lex_error("a @ b"), LexErrorReason::UnexpectedChar('@'));
    assert!(matches!(lex_error("0x"), LexErrorReason::MalformedNumber(_)));
    assert!(matches!(lex_error("1e"), LexErrorReason::MalformedNumber(_)));
    assert!(matches!(lex_error("12abc"), LexErrorReason::MalformedNumber(_)));
    assert!(matches!(lex_error("4294967296"), LexErrorReason::IntegerOverflow(_)));
}

#[test]
fn test_lex_stops_after_error() {
    let results: Vec<_> = tokenize("a $ b").collect();
    assert_eq!(results.len(), 2);
    assert!(results[1].is_err());
}

#[test]
fn test_parse_declarations() {
    let program = parse_source(
        "
struct Light { float3 direction; float4 color[2] : COLOR; };
ConstantBuffer<Light> light : binding(3);
Texture2D<float4> tex : binding(-1);

[compute]
[numthreads(8, 8, 1)]
void main(uint3 id : SV_DispatchThreadID) {}
",
    )
    .expect("Parse failure");
    assert_eq!(program.items.len(), 4);

    let Item::Struct(light) = &program.items[0] else {
        panic!("expected a struct");
    };
    assert_eq!(light.members.len(), 2);
    assert_eq!(light.members[1].array_len, Some(2));
    assert_eq!(
        light.members[1].semantic.as_ref().map(|s| s.name.as_str()),
        Some("COLOR")
    );

    let Item::Resource(buffer) = &program.items[1] else {
        panic!("expected a resource");
    };
    assert_eq!(buffer.ty.name, "ConstantBuffer");
    assert_eq!(buffer.ty.generic_arg.as_ref().map(|t| t.name.as_str()), Some("Light"));
    assert_eq!(buffer.binding, 3);

    let Item::Resource(texture) = &program.items[2] else {
        panic!("expected a resource");
    };
    assert_eq!(texture.binding, -1);

    let Item::Function(main) = &program.items[3] else {
        panic!("expected a function");
    };
    assert_eq!(main.attributes.len(), 2);
    assert_eq!(main.attributes[1].name, "numthreads");
    assert_eq!(main.attributes[1].args, vec![8, 8, 1]);
    assert_eq!(
        main.params[0].semantic.as_ref().map(|s| s.name.as_str()),
        Some("SV_DispatchThreadID")
    );
}

#[test]
fn test_parse_precedence() {
    let program = parse_source("float f() { return 1 + 2 * 3 < 4 || false; }").expect("Parse failure");
    let Item::Function(f) = &program.items[0] else {
        panic!("expected a function");
    };
    let StmtKind::Return(Some(value)) = &f.body.stmts[0].kind else {
        panic!("expected a return");
    };
    let ExprKind::Binary { op, lhs, .. } = &value.kind else {
        panic!("expected a binary expression");
    };
    assert_eq!(*op, BinaryOp::LogicalOr);
    let ExprKind::Binary { op, lhs, .. } = &lhs.kind else {
        panic!("expected a comparison");
    };
    assert_eq!(*op, BinaryOp::Lt);
    let ExprKind::Binary { op, rhs, .. } = &lhs.kind else {
        panic!("expected an addition");
    };
    assert_eq!(*op, BinaryOp::Add);
    assert!(matches!(
        rhs.kind,
        ExprKind::Binary {
            op: BinaryOp::Mul,
            ..
        }
    ));
}

#[test]
fn test_parse_statements() {
    let program = parse_source(
        "
void f() {
    int i = 0;
    i += 2;
    i++;
    for (int j = 0; j < 4; ++j) { continue; }
    while (i > 0) { i--; break; }
    do { i = i - 1; } while (i > 0);
    if (i == 0) { discard; } else { return; }
    float3 v = (float3)i;
    float4 s = tex.SampleLevel(samp, v.xy, 0.0);
}
",
    )
    .expect("Parse failure");
    let Item::Function(f) = &program.items[0] else {
        panic!("expected a function");
    };
    let kinds: Vec<_> = f.body.stmts.iter().map(|s| &s.kind).collect();
    assert!(matches!(kinds[0], StmtKind::VarDecl(_)));
    assert!(matches!(
        kinds[1],
        StmtKind::Assign {
            op: Some(BinaryOp::Add),
            ..
        }
    ));
    assert!(matches!(kinds[2], StmtKind::IncDec { increment: true, .. }));
    assert!(matches!(kinds[3], StmtKind::For { .. }));
    assert!(matches!(kinds[4], StmtKind::While { .. }));
    assert!(matches!(kinds[5], StmtKind::DoWhile { .. }));
    assert!(matches!(kinds[6], StmtKind::If { else_branch: Some(_), .. }));
    let StmtKind::VarDecl(cast) = kinds[7] else {
        panic!("expected a declaration");
    };
    assert!(matches!(
        cast.init.as_ref().map(|e| &e.kind),
        Some(ExprKind::Cast { .. })
    ));
    let StmtKind::VarDecl(sample) = kinds[8] else {
        panic!("expected a declaration");
    };
    assert!(matches!(
        sample.init.as_ref().map(|e| &e.kind),
        Some(ExprKind::MethodCall { method, args, .. }) if method == "SampleLevel" && args.len() == 3
    ));
}

#[test]
fn test_parse_syntax_error() {
    let error = parse_source("float f() { return 1 }").expect_err("Parse should fail");
    let error = match error {
        FrontendError::Syntax(error) => error,
        other => panic!("expected a syntax error, got {:?}", other),
    };
    assert_eq!(error.position.line, 1);
    assert_eq!(error.expected, "';'");
    assert_eq!(error.found, "'}'");
}

#[test]
fn test_parse_reports_lex_error() {
    let error = parse_source("struct A { float x; }; /* open").expect_err("Parse should fail");
    assert!(matches!(
        error,
        FrontendError::Lex(e) if e.reason == LexErrorReason::UnterminatedComment
    ));
}

fn nesting_error(source: &str) -> String {
    match parse_source(source) {
        Err(FrontendError::Syntax(error)) => error.expected,
        other => panic!("expected a syntax error, got {:?}", other),
    }
}

#[test]
fn test_parse_nesting_limit() {
    let parens = |n: usize| format!("float f() {{ return {}1.0{}; }}", "(".repeat(n), ")".repeat(n));
    let blocks = |n: usize| format!("void f() {{ {}{} }}", "{".repeat(n), "}".repeat(n));
    let chain = |n: usize| format!("float f() {{ return 1.0{}; }}", " + 1.0".repeat(n));
    let negations = |n: usize| format!("float f() {{ return {}1.0; }}", "- ".repeat(n));
    let members = |n: usize| format!("float f(float4 v) {{ return v{}; }}", ".x".repeat(n));

    for source in [parens(200), blocks(200), chain(200), negations(200), members(1)] {
        assert!(parse_source(&source).is_ok());
    }
    for source in [parens(300), blocks(300), chain(300), negations(300), members(300)] {
        assert_eq!(nesting_error(&source), "at most 256 levels of nesting");
    }
    // Far past the limit is still an error rather than a stack overflow
    assert_eq!(nesting_error(&parens(100_000)), "at most 256 levels of nesting");
}
