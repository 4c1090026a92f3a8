//! Kernel-wide result and error types
//!
//! Kernel code returns `KernelResult<T>` and propagates with `?`; the
//! syscall dispatcher is the single place errors are converted back to
//! the user-visible convention. Errors split into two classes: faults
//! caused by the user process (which terminate it with exit status -1
//! and never surface through a return value) and ordinary failures
//! (which surface as a `false`/`-1` sentinel).

use core::fmt::{self, Display, Formatter};

pub type KernelResult<T> = Result<T, KernelError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Pointer outside user space, unmapped and not stack growth
    BadAddress { addr: usize },
    /// Write to a read-only page
    WriteViolation { addr: usize },
    /// Stack grew past its limit
    StackOverflow { addr: usize },
    /// fd out of range, or an operation that kills on an empty slot
    BadFileDescriptor { fd: usize },
    /// A directory fd where a regular file is required
    IsADirectory,
    /// A regular-file fd where a directory is required
    NotADirectory,
    /// Path did not resolve, or an empty fd slot surfaced as -1
    NotFound,
    /// Open file table has no free slot
    TooManyOpenFiles,
}

impl KernelError {
    /// Whether this error terminates the offending process.
    pub fn kills(&self) -> bool {
        matches!(
            self,
            Self::BadAddress { .. }
                | Self::WriteViolation { .. }
                | Self::StackOverflow { .. }
                | Self::BadFileDescriptor { .. }
                | Self::IsADirectory
                | Self::NotADirectory
        )
    }

    /// Sentinel returned through the syscall result for non-killing errors.
    pub fn as_retval(&self) -> isize {
        -1
    }
}

impl Display for KernelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadAddress { addr } => write!(f, "bad address: {:#x}", addr),
            Self::WriteViolation { addr } => write!(f, "write to read-only page at {:#x}", addr),
            Self::StackOverflow { addr } => write!(f, "stack limit exceeded at {:#x}", addr),
            Self::BadFileDescriptor { fd } => write!(f, "bad file descriptor {}", fd),
            Self::IsADirectory => write!(f, "is a directory"),
            Self::NotADirectory => write!(f, "not a directory"),
            Self::NotFound => write!(f, "file or directory not found"),
            Self::TooManyOpenFiles => write!(f, "too many open files"),
        }
    }
}
