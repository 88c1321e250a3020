//! Process exit statuses of the front end.

use std::process::ExitCode;

use crate::error::VmError;

/// How a run ended. The numeric codes follow BSD `sysexits.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Ok,
    /// Bad command-line usage (`EX_USAGE`).
    Usage,
    /// Compile-time error in the input (`EX_DATAERR`).
    CompileError,
    /// Error while running the program (`EX_SOFTWARE`).
    RuntimeError,
    /// Unreadable input or exhausted memory (`EX_IOERR`).
    IoError,
}

impl ExitStatus {
    pub fn code(self) -> u8 {
        match self {
            ExitStatus::Ok => 0,
            ExitStatus::Usage => 64,
            ExitStatus::CompileError => 65,
            ExitStatus::RuntimeError => 70,
            ExitStatus::IoError => 74,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

impl From<&VmError> for ExitStatus {
    /// Running out of memory is fatal and reported like an I/O failure;
    /// everything else is a runtime error.
    fn from(err: &VmError) -> Self {
        match err {
            VmError::OutOfMemory { .. } => ExitStatus::IoError,
            _ => ExitStatus::RuntimeError,
        }
    }
}
