//! Error types for the asmpp pipeline.

use thiserror::Error;

/// Errors raised while preprocessing source files or splicing objects
#[derive(Error, Debug)]
pub enum Error {
    /// The input violated a declared contract: an unknown directive, a bad
    /// alignment, a size disagreement between the dummy code and the real
    /// assembly, a missing or doubly-defined symbol, and so on.
    ///
    /// The CLI renders this as `Error: <message>` and exits with status 1.
    #[error("{0}")]
    Failure(String),

    /// Underlying I/O failure (unreadable source, unwritable object)
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Text that cannot be represented in the requested encoding
    #[error("encoding error: {0}")]
    Encode(String),
}

impl Error {
    /// Builds the contract-violation variant from any displayable message.
    pub fn failure(message: impl Into<String>) -> Error {
        Error::Failure(message.into())
    }
}

/// Result type alias using the asmpp error type
pub type Result<T> = std::result::Result<T, Error>;
