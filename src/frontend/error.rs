use nom::error::{ErrorKind, ParseError};
use thiserror::Error;

use super::Position;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexErrorReason {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("unterminated block comment")]
    UnterminatedComment,
    #[error("malformed numeric literal '{0}'")]
    MalformedNumber(String),
    #[error("integer literal '{0}' does not fit in 32 bits")]
    IntegerOverflow(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{position}: {reason}")]
pub struct LexError {
    pub position: Position,
    pub reason: LexErrorReason,
}

/// Error type threaded through the lexer's nom parsers
#[derive(Debug)]
pub(super) enum LexFailure {
    /// No token parser matched here
    NoMatch,
    Lex(LexErrorReason),
}
impl<I> ParseError<I> for LexFailure {
    fn from_error_kind(_: I, _: ErrorKind) -> Self {
        LexFailure::NoMatch
    }

    fn append(_: I, _: ErrorKind, other: Self) -> Self {
        other
    }
}
impl From<LexErrorReason> for nom::Err<LexFailure> {
    fn from(value: LexErrorReason) -> Self {
        nom::Err::Failure(LexFailure::Lex(value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{position}: expected {expected}, found {found}")]
pub struct SyntaxError {
    pub position: Position,
    pub expected: String,
    pub found: String,
}

/// Anything that can stop the front end
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrontendError {
    #[error("lex error: {0}")]
    Lex(#[from] LexError),
    #[error("syntax error: {0}")]
    Syntax(#[from] SyntaxError),
}
