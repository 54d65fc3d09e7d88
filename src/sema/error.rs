use thiserror::Error;

use crate::frontend::Position;

/// Stable classification of analyzer failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticErrorKind {
    UndefinedSymbol,
    Redefinition,
    TypeMismatch,
    InvalidOperands,
    DuplicateBinding,
    InvalidBinding,
    InvalidEntryPoint,
    MissingReturn,
    InvalidControlFlow,
    DiscardOutsideFragment,
    ImplicitLodOutsideFragment,
    RecursiveCall,
    InvalidAssignment,
    ArgumentCount,
    InvalidSwizzle,
    InvalidIndex,
    InvalidType,
    InvalidCast,
    UnknownSemantic,
    LiteralOutOfRange,
    InvalidResourceType,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{position}: {kind:?}: {message}")]
pub struct SemanticError {
    pub kind: SemanticErrorKind,
    pub position: Position,
    pub message: String,
}
impl SemanticError {
    pub fn new(kind: SemanticErrorKind, position: Position, message: impl Into<String>) -> Self {
        Self {
            kind,
            position,
            message: message.into(),
        }
    }
}

pub type SemaResult<T> = Result<T, SemanticError>;

/// `bail!(Kind, position, "fmt", args...)` returns a [SemanticError] from the enclosing function
macro_rules! bail {
    ($kind:ident, $pos:expr, $($arg:tt)+) => {
        return Err($crate::sema::error::SemanticError::new(
            $crate::sema::error::SemanticErrorKind::$kind,
            $pos,
            format!($($arg)+),
        ))
    };
}
pub(crate) use bail;

/// Like [bail] but produces the error value instead of returning it
macro_rules! sema_err {
    ($kind:ident, $pos:expr, $($arg:tt)+) => {
        $crate::sema::error::SemanticError::new(
            $crate::sema::error::SemanticErrorKind::$kind,
            $pos,
            format!($($arg)+),
        )
    };
}
pub(crate) use sema_err;
