//! Backends turning an [crate::ir::Module] into target code.
//!
//! HLSL and MSL share one structured text writer ([text]) and differ only in their [text::Syntax] tables.
//! SPIR-V is written as binary words and checked by its own decoder before being returned.

pub mod hlsl;
pub mod layout;
pub mod msl;
pub mod spirv;
pub mod text;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmitError {
    /// The module uses something the target cannot express
    #[error("{backend} backend does not support {construct}")]
    Unsupported {
        backend: &'static str,
        construct: String,
    },
    /// The SPIR-V self-check rejected the produced words
    #[error("invalid SPIR-V module: {0}")]
    InvalidModule(String),
    #[error("formatting failed")]
    Fmt(#[from] std::fmt::Error),
}

pub type EmitResult<T> = Result<T, EmitError>;
