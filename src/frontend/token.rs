use std::fmt::{Display, Formatter};

use phf::phf_map;

use super::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TokenKind {
    Ident,
    /// Integer literal. `unsigned` is set by a `u` suffix.
    Int { value: u64, unsigned: bool },
    Float(f32),
    Keyword(Keyword),
    Punct(Punct),
    Eof,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Struct,
    If,
    Else,
    For,
    While,
    Do,
    Break,
    Continue,
    Return,
    Discard,
    True,
    False,
    Const,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Punct {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    ShlAssign,
    ShrAssign,
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    PlusPlus,
    MinusMinus,
    Question,
    Colon,
    Dot,
    Comma,
    Semicolon,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
}

pub(super) static KEYWORDS: phf::Map<&'static str, Keyword> = phf_map! {
    "struct" => Keyword::Struct,
    "if" => Keyword::If,
    "else" => Keyword::Else,
    "for" => Keyword::For,
    "while" => Keyword::While,
    "do" => Keyword::Do,
    "break" => Keyword::Break,
    "continue" => Keyword::Continue,
    "return" => Keyword::Return,
    "discard" => Keyword::Discard,
    "true" => Keyword::True,
    "false" => Keyword::False,
    "const" => Keyword::Const,
};

/// Every operator and punctuation spelling. The lexer tries three, then two, then one character.
pub(super) static PUNCTUATION: phf::Map<&'static str, Punct> = phf_map! {
    "<<=" => Punct::ShlAssign,
    ">>=" => Punct::ShrAssign,
    "+=" => Punct::PlusAssign,
    "-=" => Punct::MinusAssign,
    "*=" => Punct::StarAssign,
    "/=" => Punct::SlashAssign,
    "%=" => Punct::PercentAssign,
    "&=" => Punct::AmpAssign,
    "|=" => Punct::PipeAssign,
    "^=" => Punct::CaretAssign,
    "==" => Punct::EqEq,
    "!=" => Punct::NotEq,
    "<=" => Punct::LtEq,
    ">=" => Punct::GtEq,
    "&&" => Punct::AndAnd,
    "||" => Punct::OrOr,
    "<<" => Punct::Shl,
    ">>" => Punct::Shr,
    "++" => Punct::PlusPlus,
    "--" => Punct::MinusMinus,
    "+" => Punct::Plus,
    "-" => Punct::Minus,
    "*" => Punct::Star,
    "/" => Punct::Slash,
    "%" => Punct::Percent,
    "=" => Punct::Assign,
    "<" => Punct::Lt,
    ">" => Punct::Gt,
    "!" => Punct::Bang,
    "&" => Punct::Amp,
    "|" => Punct::Pipe,
    "^" => Punct::Caret,
    "~" => Punct::Tilde,
    "?" => Punct::Question,
    ":" => Punct::Colon,
    "." => Punct::Dot,
    "," => Punct::Comma,
    ";" => Punct::Semicolon,
    "(" => Punct::LParen,
    ")" => Punct::RParen,
    "{" => Punct::LBrace,
    "}" => Punct::RBrace,
    "[" => Punct::LBracket,
    "]" => Punct::RBracket,
};

impl Punct {
    pub fn as_str(&self) -> &'static str {
        PUNCTUATION
            .entries()
            .find(|(_, p)| *p == self)
            .map(|(s, _)| *s)
            .unwrap_or("?")
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Self::Ident => write!(f, "identifier"),
            Self::Int { .. } => write!(f, "integer literal"),
            Self::Float(_) => write!(f, "float literal"),
            Self::Keyword(k) => write!(f, "'{}'", format!("{:?}", k).to_lowercase()),
            Self::Punct(p) => write!(f, "'{}'", p.as_str()),
            Self::Eof => write!(f, "end of input"),
        }
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self.kind {
            TokenKind::Eof => write!(f, "end of input"),
            _ => write!(f, "'{}'", self.lexeme),
        }
    }
}
