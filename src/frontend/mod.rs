//! Source text to AST: the lexer produces [Token]s lazily and the parser builds an [ast::Program] from them.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod token;

use std::fmt::{Display, Formatter};

pub use error::{FrontendError, LexError, LexErrorReason, SyntaxError};
pub use lexer::{tokenize, Lexer};
pub use parser::{parse, parse_source};
pub use token::{Keyword, Punct, Token, TokenKind};

/// A location in the source text. Lines and columns start at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    pub offset: usize,
    pub line: u32,
    pub column: u32,
}
impl Position {
    pub fn start() -> Self {
        Self {
            offset: 0,
            line: 1,
            column: 1,
        }
    }
}
impl Display for Position {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}
