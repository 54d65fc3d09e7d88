//! Lazy lexer. Each call to [Lexer::next] skips trivia and runs the nom token parsers on the remaining input.

use nom::{
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_until, take_while},
    character::complete::{alpha1, alphanumeric1, digit0, digit1, multispace1, not_line_ending, one_of},
    combinator::{opt, recognize},
    multi::many0_count,
    sequence::{pair, tuple},
    IResult,
};

use super::{
    error::{LexError, LexErrorReason, LexFailure},
    token::{Token, TokenKind, KEYWORDS, PUNCTUATION},
    Position,
};

type LexResult<'a, T> = IResult<&'a str, T, LexFailure>;

/// Start lexing `source`. Tokens are produced on demand.
pub fn tokenize(source: &str) -> Lexer<'_> {
    Lexer {
        rest: source,
        position: Position::start(),
        finished: false,
    }
}

pub struct Lexer<'a> {
    rest: &'a str,
    position: Position,
    finished: bool,
}

impl<'a> Lexer<'a> {
    fn advance(&mut self, consumed: &str) {
        for c in consumed.chars() {
            if c == '\n' {
                self.position.line += 1;
                self.position.column = 1;
            } else {
                self.position.column += 1;
            }
        }
        self.position.offset += consumed.len();
        self.rest = &self.rest[consumed.len()..];
    }

    fn fail(&mut self, reason: LexErrorReason) -> Option<Result<Token, LexError>> {
        self.finished = true;
        Some(Err(LexError {
            position: self.position,
            reason,
        }))
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Result<Token, LexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match skip_trivia(self.rest) {
            Ok((rest, _)) => {
                let consumed = &self.rest[..self.rest.len() - rest.len()];
                self.advance(consumed);
            }
            Err(nom::Err::Failure(LexFailure::Lex(reason))) => return self.fail(reason),
            Err(_) => {}
        }

        let position = self.position;
        if self.rest.is_empty() {
            self.finished = true;
            return Some(Ok(Token {
                kind: TokenKind::Eof,
                lexeme: String::new(),
                position,
            }));
        }

        match alt((number, identifier, punctuation))(self.rest) {
            Ok((rest, kind)) => {
                let lexeme = self.rest[..self.rest.len() - rest.len()].to_owned();
                self.advance(&lexeme);
                Some(Ok(Token {
                    kind,
                    lexeme,
                    position,
                }))
            }
            Err(nom::Err::Failure(LexFailure::Lex(reason))) => self.fail(reason),
            Err(_) => {
                let c = self.rest.chars().next().unwrap_or('\0');
                self.fail(LexErrorReason::UnexpectedChar(c))
            }
        }
    }
}

fn skip_trivia(data: &str) -> LexResult<usize> {
    many0_count(alt((multispace1, line_comment, block_comment)))(data)
}

fn line_comment(data: &str) -> LexResult<&str> {
    recognize(pair(tag("//"), not_line_ending))(data)
}

fn block_comment(data: &str) -> LexResult<&str> {
    let (rest, _) = tag("/*")(data)?;
    let (rest, _) = take_until("*/")(rest)
        .map_err(|_: nom::Err<LexFailure>| LexErrorReason::UnterminatedComment)?;
    let (rest, _) = tag("*/")(rest)?;
    Ok((rest, &data[..data.len() - rest.len()]))
}

fn identifier(data: &str) -> LexResult<TokenKind> {
    let (rest, ident) = recognize(pair(
        alt((alpha1, tag("_"))),
        many0_count(alt((alphanumeric1, tag("_")))),
    ))(data)?;
    let kind = match KEYWORDS.get(ident) {
        Some(k) => TokenKind::Keyword(*k),
        None => TokenKind::Ident,
    };
    Ok((rest, kind))
}

fn punctuation(data: &str) -> LexResult<TokenKind> {
    for len in (1..=3).rev() {
        if let Some(p) = data.get(..len).and_then(|s| PUNCTUATION.get(s)) {
            return Ok((&data[len..], TokenKind::Punct(*p)));
        }
    }
    Err(nom::Err::Error(LexFailure::NoMatch))
}

fn number(data: &str) -> LexResult<TokenKind> {
    let (rest, kind) = alt((hex_number, decimal_number))(data)?;
    // `12abc` is one malformed token, not a number followed by an identifier
    if rest.starts_with(|c: char| c.is_alphanumeric() || c == '_') {
        let (_, tail) = take_while(|c: char| c.is_alphanumeric() || c == '_')(rest)?;
        let text = &data[..data.len() - rest.len() + tail.len()];
        return Err(LexErrorReason::MalformedNumber(text.to_owned()).into());
    }
    Ok((rest, kind))
}

fn hex_number(data: &str) -> LexResult<TokenKind> {
    let (rest, _) = tag_no_case("0x")(data)?;
    let (rest, digits) = take_while(|c: char| c.is_ascii_hexdigit())(rest)?;
    if digits.is_empty() {
        return Err(LexErrorReason::MalformedNumber(data[..2].to_owned()).into());
    }
    let (rest, suffix) = opt(one_of("uU"))(rest)?;
    let text = &data[..data.len() - rest.len()];
    let value = u64::from_str_radix(digits, 16)
        .ok()
        .filter(|v| *v <= u32::MAX as u64)
        .ok_or_else(|| LexErrorReason::IntegerOverflow(text.to_owned()))?;
    Ok((
        rest,
        TokenKind::Int {
            value,
            unsigned: suffix.is_some(),
        },
    ))
}

fn exponent(data: &str) -> LexResult<&str> {
    let (rest, _) = one_of("eE")(data)?;
    let (rest, _) = opt(one_of("+-"))(rest)?;
    let (rest, digits) = digit0(rest)?;
    if digits.is_empty() {
        let text = &data[..data.len() - rest.len()];
        return Err(LexErrorReason::MalformedNumber(text.to_owned()).into());
    }
    Ok((rest, &data[..data.len() - rest.len()]))
}

fn decimal_number(data: &str) -> LexResult<TokenKind> {
    // 1  1.  1.5  1e3  1.5e-3  .5
    let (rest, body) = alt((
        recognize(tuple((digit1, opt(pair(tag("."), digit0)), opt(exponent)))),
        recognize(tuple((tag("."), digit1, opt(exponent)))),
    ))(data)?;
    let (rest, suffix) = opt(one_of("fFuU"))(rest)?;
    let text = &data[..data.len() - rest.len()];
    let is_float_body = body.contains(|c| matches!(c, '.' | 'e' | 'E'));

    match suffix {
        Some('u' | 'U') if is_float_body => {
            Err(LexErrorReason::MalformedNumber(text.to_owned()).into())
        }
        Some('f' | 'F') => float_value(rest, body, text),
        _ if is_float_body => float_value(rest, body, text),
        _ => {
            let value = body
                .parse::<u64>()
                .ok()
                .filter(|v| *v <= u32::MAX as u64)
                .ok_or_else(|| LexErrorReason::IntegerOverflow(text.to_owned()))?;
            Ok((
                rest,
                TokenKind::Int {
                    value,
                    unsigned: suffix.is_some(),
                },
            ))
        }
    }
}

fn float_value<'a>(rest: &'a str, body: &str, text: &str) -> LexResult<'a, TokenKind> {
    match body.parse::<f32>() {
        Ok(v) if v.is_finite() => Ok((rest, TokenKind::Float(v))),
        _ => Err(LexErrorReason::MalformedNumber(text.to_owned()).into()),
    }
}
