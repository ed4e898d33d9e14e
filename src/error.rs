//! Crate-level error type.

use thiserror::Error;

use crate::compose::ComposeError;
use crate::config::ConfigError;
use crate::generators::GeneratorError;
use crate::lexer::LexError;
use crate::parser::ParseError;
use crate::validator::ValidationError;

/// Result type for whole-pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

/// Any failure between reading a schema and writing the last artifact
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Generator(#[from] GeneratorError),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[cfg(not(target_arch = "wasm32"))]
    #[error(transparent)]
    Plugin(#[from] crate::plugin::PluginError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
