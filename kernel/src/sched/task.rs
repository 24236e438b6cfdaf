//! Task control blocks.

use crate::arch::x86_64::interrupts::RegisterFrame;

/// Scheduling state of a task.
///
/// Blocked is reserved: no event source drives it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Ready,
    Running,
    Blocked,
    Sleeping,
    Zombie,
}

/// Maximum length of a task name shown by the `tasks` command.
pub const TASK_NAME_MAX: usize = 32;

/// One task control block.
///
/// The saved frame pointer always lies within the task's own stack
/// (`stack_base..stack_base + stack_size`); the scheduler resumes the
/// task by pointing the IRQ return path at it.
#[derive(Debug, Clone, Copy)]
pub struct Tcb {
    pub pid: u32,
    pub name: &'static str,
    pub state: TaskState,
    pub stack_base: u64,
    pub stack_size: u64,
    pub frame: *mut RegisterFrame,
    pub sleep_until: u64,
}

impl Tcb {
    /// True when `frame` points inside this task's stack.
    pub fn owns_frame(&self, frame: *const RegisterFrame) -> bool {
        if self.stack_size == 0 {
            return false;
        }
        let addr = frame as u64;
        addr >= self.stack_base
            && addr + core::mem::size_of::<RegisterFrame>() as u64
                <= self.stack_base + self.stack_size
    }
}

/// Read-only view of a task for diagnostics (`tasks` command).
#[derive(Debug, Clone, Copy)]
pub struct TaskSnapshot {
    pub pid: u32,
    pub name: &'static str,
    pub state: TaskState,
    pub stack_size: u64,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Ready => "ready",
            TaskState::Running => "running",
            TaskState::Blocked => "blocked",
            TaskState::Sleeping => "sleeping",
            TaskState::Zombie => "zombie",
        }
    }
}
