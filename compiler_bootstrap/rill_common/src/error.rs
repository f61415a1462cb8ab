//! Error handling utilities for the Rill toolchain

use thiserror::Error;

/// The main error type shared by compiler and VM crates.
///
/// Compile-time internal errors (invariant violations in IR/bytecode
/// construction) use `InternalError` and are programmer bugs: they abort
/// the compilation rather than being collected as diagnostics.
#[derive(Error, Debug, Clone)]
pub enum RillError {
    #[error("lexical error: {message}")]
    LexError { message: String },

    #[error("parse error: {message}")]
    ParseError { message: String },

    #[error("semantic error: {message}")]
    SemanticError { message: String },

    #[error("internal compiler error: {message}")]
    InternalError { message: String },

    #[error("code generation error: {message}")]
    CodegenError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },

    #[error("configuration error: {message}")]
    ConfigError { message: String },

    #[error("runtime panic: {message}")]
    RuntimeError { message: String },

    #[error("module loader error: {message}")]
    LoaderError { message: String },
}

/// Result type alias for Rill toolchain operations.
pub type RillResult<T> = Result<T, RillError>;

impl RillError {
    pub fn lex_error(message: impl Into<String>) -> Self {
        Self::LexError { message: message.into() }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::ParseError { message: message.into() }
    }

    pub fn semantic_error(message: impl Into<String>) -> Self {
        Self::SemanticError { message: message.into() }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    pub fn codegen_error(message: impl Into<String>) -> Self {
        Self::CodegenError { message: message.into() }
    }

    pub fn io_error(message: impl Into<String>) -> Self {
        Self::IoError { message: message.into() }
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::RuntimeError { message: message.into() }
    }

    pub fn loader_error(message: impl Into<String>) -> Self {
        Self::LoaderError { message: message.into() }
    }
}
