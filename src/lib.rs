//! npa - the runtime core of a small bytecode interpreter
//!
//! This library provides the managed heap, the mark-and-sweep collector,
//! the hash table used for globals and string interning, the VM state that
//! owns them, and the token scanner that feeds the front end.

pub mod compiler;
pub mod config;
pub mod error;
pub mod exit;
pub mod vm;

// Re-export commonly used types
pub use config::{ReportFormat, RuntimeConfig};
pub use error::{ConfigError, VmError};
pub use exit::ExitStatus;
pub use vm::{Chunk, GcRef, Op, VM, Value};
