//! Kernel-wide error types.
//!
//! Structured error values replace bare string literals at every fallible
//! seam. Raw-pointer interfaces with a frozen C-style contract (`kmalloc`
//! returning null, `pmm` returning `Option`) keep their shape; everything
//! above them reports through [`KernelError`].

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// An allocation could not be satisfied.
    OutOfMemory { requested: usize },
    /// A pool of fixed-size resources is exhausted (TCB slots, physical
    /// frames, ...).
    ResourceExhausted { resource: &'static str },
    /// An address is outside the range an operation accepts.
    InvalidAddress { addr: u64 },
    /// A subsystem was used before its `init()` ran.
    NotInitialized { subsystem: &'static str },
    /// An object was in the wrong state for the requested operation.
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    /// A caller-supplied argument is unacceptable.
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
}

/// Result alias used throughout the kernel.
pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::OutOfMemory { requested } => {
                write!(f, "out of memory (requested {} bytes)", requested)
            }
            KernelError::ResourceExhausted { resource } => {
                write!(f, "resource exhausted: {}", resource)
            }
            KernelError::InvalidAddress { addr } => {
                write!(f, "invalid address {:#x}", addr)
            }
            KernelError::NotInitialized { subsystem } => {
                write!(f, "{} not initialized", subsystem)
            }
            KernelError::InvalidState { expected, actual } => {
                write!(f, "invalid state: expected {}, got {}", expected, actual)
            }
            KernelError::InvalidArgument { name, value } => {
                write!(f, "invalid argument {}: {}", name, value)
            }
        }
    }
}
