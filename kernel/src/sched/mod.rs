//! Preemptive task subsystem.
//!
//! A fixed TCB table driven round-robin from the PIT tick. All access to
//! the shared table goes through [`with_tasks`], which masks interrupts
//! so a preemption tick can never observe a half-written TCB; the IRQ0
//! path itself runs with interrupts off and takes the same lock.

pub mod scheduler;
pub mod task;

pub use scheduler::{TaskTable, MAX_TASKS};
pub use task::{TaskSnapshot, TaskState};

use spin::Mutex;

use crate::arch::x86_64::interrupts::RegisterFrame;
use crate::error::{KernelError, KernelResult};
use crate::mm::heap;

static TASKS: Mutex<TaskTable> = Mutex::new(TaskTable::new());

/// Default stack size for kernel tasks.
pub const DEFAULT_STACK_SIZE: u64 = 32 * 1024;

/// Run `f` on the task table with interrupts masked.
fn with_tasks<R>(f: impl FnOnce(&mut TaskTable) -> R) -> R {
    x86_64::instructions::interrupts::without_interrupts(|| f(&mut TASKS.lock()))
}

/// Install the PID-0 sentinel for the boot context.
pub fn init() {
    with_tasks(|tasks| tasks.bootstrap());
    println!("[TASK] task table ready ({} slots)", MAX_TASKS);
}

/// Create a kernel task. TCB bookkeeping lives in the table; the stack
/// comes from the kernel heap and is leaked on exit (v0).
pub fn spawn(
    name: &'static str,
    entry: extern "C" fn() -> !,
    stack_size: u64,
) -> KernelResult<u32> {
    let stack = heap::kmalloc(stack_size as usize);
    if stack.is_null() {
        return Err(KernelError::OutOfMemory {
            requested: stack_size as usize,
        });
    }
    with_tasks(|tasks| {
        tasks.create_with_stack(name, entry as usize as u64, stack as u64, stack_size)
    })
}

/// Scheduler entry point, called from the IRQ0 handler on quantum
/// boundaries. Interrupts are already off; the returned frame becomes
/// the IRQ return stack.
pub fn timer_tick(frame: *mut RegisterFrame, now: u64) -> *mut RegisterFrame {
    TASKS.lock().switch(frame, now)
}

/// Put the calling task to sleep for at least `ticks` timer ticks. The
/// switch away happens at the next quantum boundary; the deadline is
/// honored by the wake-up scan.
pub fn sleep(ticks: u64) {
    let deadline = crate::arch::x86_64::pit::ticks() + ticks;
    with_tasks(|tasks| tasks.sleep_current(crate::arch::x86_64::pit::ticks(), ticks));
    // Idle until the scheduler has both parked and woken us.
    while crate::arch::x86_64::pit::ticks() < deadline {
        crate::arch::x86_64::wait_for_interrupt();
    }
}

/// Terminate the calling task. The TCB stays as a Zombie and the stack
/// is leaked; the CPU idles here until the next tick switches away.
pub fn exit() -> ! {
    with_tasks(|tasks| tasks.exit_current());
    loop {
        crate::arch::x86_64::wait_for_interrupt();
    }
}

/// Number of TCBs, including the PID-0 sentinel.
pub fn task_count() -> usize {
    with_tasks(|tasks| tasks.count())
}

/// Snapshot of the task at `index` for the `tasks` command.
pub fn task_by_index(index: usize) -> Option<TaskSnapshot> {
    with_tasks(|tasks| tasks.snapshot(index))
}
