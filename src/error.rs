//! Error types.

use std::io;
use std::path::PathBuf;

/// Errors raised by VM operations.
#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("out of memory: allocating {requested} bytes would exceed the {limit} byte heap limit")]
    OutOfMemory { requested: usize, limit: usize },
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack slot {0} is out of range")]
    InvalidSlot(usize),
    #[error("no active call frame")]
    NoFrame,
    #[error("invalid object reference")]
    InvalidRef,
    #[error("expected a {expected}")]
    TypeMismatch { expected: &'static str },
    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String },
    #[error("too many constants in one chunk")]
    ConstantPoolOverflow,
}

/// Errors raised while loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
