//! ferrite-os kernel library.
//!
//! A small x86_64 kernel: GDT/TSS, IDT with frame-returning interrupt
//! stubs, bitmap physical allocator, four-level page-table manager, bump
//! heap, round-robin task scheduler on the PIT tick, a SYSCALL/SYSRET
//! ring-3 gate, and a keyboard-driven shell.
//!
//! The crate builds for the bare-metal target and for the host: hardware
//! entry points are `target_os = "none"`-only, while the logic core
//! (allocators, page-table walker, scheduler, keyboard ring, parsers)
//! compiles everywhere so the standard test harness can exercise it.

#![no_std]

// Host builds (unit tests, integration tests) get std so test code can
// allocate normally.
#[cfg(not(target_os = "none"))]
extern crate std;

#[macro_use]
pub mod print;

pub mod arch;
pub mod drivers;
pub mod error;
pub mod logger;
pub mod mm;
pub mod sched;
pub mod serial;
pub mod shell;
pub mod syscall;

pub use error::{KernelError, KernelResult};
