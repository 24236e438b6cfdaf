//! Round-robin scheduler over saved interrupt frames.
//!
//! The scheduler runs only inside the IRQ0 handler. It mutates the frame
//! pointer the common interrupt stub will restore from, which is the
//! entire context-switch mechanism: returning a different task's frame
//! makes `iretq` resume that task.

use core::mem::size_of;

use crate::arch::x86_64::interrupts::RegisterFrame;
use crate::error::{KernelError, KernelResult};

use super::task::{TaskSnapshot, TaskState, Tcb};

/// Size of the fixed TCB table.
pub const MAX_TASKS: usize = 64;

/// Selectors baked into freshly created kernel-task frames.
const KERNEL_CODE_SELECTOR: u64 = 0x08;
const KERNEL_DATA_SELECTOR: u64 = 0x10;
/// IF set plus the always-one reserved bit.
const DEFAULT_RFLAGS: u64 = 0x202;

/// The task table and round-robin state.
///
/// Slots `0..count` are densely occupied; tasks are never removed in v0
/// (Zombie is terminal).
pub struct TaskTable {
    tasks: [Option<Tcb>; MAX_TASKS],
    count: usize,
    current: usize,
    next_pid: u32,
}

// SAFETY: Raw frame pointers are only dereferenced by the owning task's
// context or the IRQ0 path; the table itself is guarded by its Mutex and
// interrupt masking.
unsafe impl Send for TaskTable {}

impl TaskTable {
    pub const fn new() -> Self {
        Self {
            tasks: [None; MAX_TASKS],
            count: 0,
            current: 0,
            next_pid: 1,
        }
    }

    /// Install the PID-0 sentinel describing the boot context.
    ///
    /// The sentinel keeps the boot `hlt` loop addressable so its frame
    /// can be saved on the first tick, but the scheduler never selects
    /// it: the idle path only runs until the first real switch.
    pub fn bootstrap(&mut self) {
        self.tasks[0] = Some(Tcb {
            pid: 0,
            name: "idle",
            state: TaskState::Running,
            stack_base: 0,
            stack_size: 0,
            frame: core::ptr::null_mut(),
            sleep_until: 0,
        });
        self.count = 1;
        self.current = 0;
    }

    /// Create a task whose stack the caller has already allocated.
    ///
    /// A `RegisterFrame` is reserved near the (16-byte aligned) stack
    /// top with zeroed general registers, kernel selectors, IF enabled,
    /// `rip` at the entry, and `rsp` at the SysV entry position.
    pub fn create_with_stack(
        &mut self,
        name: &'static str,
        entry: u64,
        stack_base: u64,
        stack_size: u64,
    ) -> KernelResult<u32> {
        if self.count >= MAX_TASKS {
            return Err(KernelError::ResourceExhausted {
                resource: "task slots",
            });
        }
        if stack_size < size_of::<RegisterFrame>() as u64 + 32 {
            return Err(KernelError::InvalidArgument {
                name: "stack_size",
                value: "smaller than one register frame",
            });
        }

        let stack_top = (stack_base + stack_size) & !0xF;
        // SysV entry alignment: a function expects RSP = 16n - 8, as if
        // it had been reached by a call.
        let entry_rsp = stack_top - 8;
        let frame_addr = entry_rsp - size_of::<RegisterFrame>() as u64;
        let frame = frame_addr as *mut RegisterFrame;

        // SAFETY: The caller owns `stack_base..stack_base+stack_size`
        // exclusively; frame_addr lies within it by the size check above.
        unsafe {
            frame.write(RegisterFrame {
                ds: KERNEL_DATA_SELECTOR,
                es: KERNEL_DATA_SELECTOR,
                fs: KERNEL_DATA_SELECTOR,
                gs: KERNEL_DATA_SELECTOR,
                rip: entry,
                cs: KERNEL_CODE_SELECTOR,
                rflags: DEFAULT_RFLAGS,
                rsp: entry_rsp,
                ss: KERNEL_DATA_SELECTOR,
                ..RegisterFrame::default()
            });
        }

        let pid = self.next_pid;
        self.next_pid += 1;
        self.tasks[self.count] = Some(Tcb {
            pid,
            name,
            state: TaskState::Ready,
            stack_base,
            stack_size,
            frame,
            sleep_until: 0,
        });
        self.count += 1;
        Ok(pid)
    }

    /// Round-robin selection, called from the timer interrupt.
    ///
    /// Saves `current_frame` into the outgoing task, wakes expired
    /// sleepers encountered during the circular scan, and returns the
    /// frame of the first Ready task (now Running). When nothing is
    /// runnable the current frame is returned unchanged.
    pub fn switch(&mut self, current_frame: *mut RegisterFrame, now: u64) -> *mut RegisterFrame {
        if self.count == 0 {
            return current_frame;
        }

        if let Some(task) = self.tasks[self.current].as_mut() {
            // The outgoing task owns the interrupted frame even when it
            // just put itself to sleep; only a Running task goes back to
            // the Ready pool.
            task.frame = current_frame;
            if task.state == TaskState::Running {
                task.state = TaskState::Ready;
            }
        }

        let outgoing = self.current;
        let start = (self.current + 1) % self.count;
        for step in 0..self.count {
            let index = (start + step) % self.count;
            let task = self.tasks[index].as_mut().expect("dense task table");

            if task.pid == 0 {
                continue;
            }
            if task.state == TaskState::Sleeping && task.sleep_until <= now {
                task.state = TaskState::Ready;
            }
            if task.state == TaskState::Ready {
                task.state = TaskState::Running;
                self.current = index;
                return task.frame;
            }
        }

        // Nothing runnable: stay on the interrupted context.
        if let Some(task) = self.tasks[outgoing].as_mut() {
            if task.state == TaskState::Ready {
                task.state = TaskState::Running;
            }
        }
        current_frame
    }

    /// Put the current task to sleep for `ticks` timer ticks. The switch
    /// away happens at the next quantum boundary.
    pub fn sleep_current(&mut self, now: u64, ticks: u64) {
        if let Some(task) = self.tasks[self.current].as_mut() {
            if task.pid != 0 {
                task.state = TaskState::Sleeping;
                task.sleep_until = now + ticks;
            }
        }
    }

    /// Mark the current task Zombie. Stack and TCB are leaked in v0.
    pub fn exit_current(&mut self) {
        if let Some(task) = self.tasks[self.current].as_mut() {
            if task.pid != 0 {
                task.state = TaskState::Zombie;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn current_pid(&self) -> u32 {
        self.tasks[self.current].map(|t| t.pid).unwrap_or(0)
    }

    pub fn snapshot(&self, index: usize) -> Option<TaskSnapshot> {
        self.tasks.get(index)?.map(|t| TaskSnapshot {
            pid: t.pid,
            name: t.name,
            state: t.state,
            stack_size: t.stack_size,
        })
    }

    /// State of the task with the given pid, if it exists.
    pub fn state_of(&self, pid: u32) -> Option<TaskState> {
        self.tasks[..self.count]
            .iter()
            .flatten()
            .find(|t| t.pid == pid)
            .map(|t| t.state)
    }
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;

    /// A task fixture with a heap-backed stack the table can write
    /// frames into.
    struct FakeTask {
        stack: std::vec::Vec<u8>,
    }

    impl FakeTask {
        fn new() -> Self {
            Self {
                stack: std::vec![0u8; 16 * 1024],
            }
        }

        fn base(&self) -> u64 {
            self.stack.as_ptr() as u64
        }
    }

    fn boot_frame() -> (std::boxed::Box<RegisterFrame>, *mut RegisterFrame) {
        let mut frame = std::boxed::Box::new(RegisterFrame::default());
        let ptr = &mut *frame as *mut RegisterFrame;
        (frame, ptr)
    }

    fn table_with_tasks(fakes: &[&FakeTask]) -> TaskTable {
        let mut table = TaskTable::new();
        table.bootstrap();
        for (i, fake) in fakes.iter().enumerate() {
            table
                .create_with_stack("worker", 0x1000 + i as u64, fake.base(), fake.stack.len() as u64)
                .unwrap();
        }
        table
    }

    #[test]
    fn created_frame_lies_within_stack() {
        let fake = FakeTask::new();
        let mut table = TaskTable::new();
        table.bootstrap();
        let pid = table
            .create_with_stack("worker", 0xDEAD, fake.base(), fake.stack.len() as u64)
            .unwrap();
        assert_eq!(pid, 1);

        let tcb = {
            // Reach through the snapshotting API plus the frame check.
            let snapshot = table.snapshot(1).unwrap();
            assert_eq!(snapshot.pid, 1);
            table.tasks[1].unwrap()
        };
        assert!(tcb.owns_frame(tcb.frame));

        let frame = unsafe { *tcb.frame };
        assert_eq!(frame.rip, 0xDEAD);
        assert_eq!(frame.cs, 0x08);
        assert_eq!(frame.ss, 0x10);
        assert_eq!(frame.ds, 0x10);
        assert_eq!(frame.rflags, 0x202);
        // Entry alignment: 16n - 8, as if reached by a call.
        assert_eq!(frame.rsp % 16, 8);
        assert_eq!(frame.rax, 0);
    }

    #[test]
    fn round_robin_cycles_and_skips_pid_zero() {
        let a = FakeTask::new();
        let b = FakeTask::new();
        let mut table = table_with_tasks(&[&a, &b]);
        let (_keep, boot) = boot_frame();

        // First tick leaves the boot context for task 1.
        let f1 = table.switch(boot, 1);
        assert_eq!(table.current_pid(), 1);
        assert_eq!(table.state_of(1), Some(TaskState::Running));

        // Subsequent ticks alternate between 1 and 2, never 0.
        let f2 = table.switch(f1, 2);
        assert_eq!(table.current_pid(), 2);
        assert_ne!(f2, f1);
        let f3 = table.switch(f2, 3);
        assert_eq!(table.current_pid(), 1);
        let f4 = table.switch(f3, 4);
        assert_eq!(table.current_pid(), 2);
        assert_ne!(f4, f3);
    }

    #[test]
    fn switch_returns_running_tasks_frame_only() {
        let a = FakeTask::new();
        let b = FakeTask::new();
        let mut table = table_with_tasks(&[&a, &b]);
        let (_keep, boot) = boot_frame();

        // Feed each returned frame back in, as the IRQ path does.
        let mut frame = boot;
        for tick in 1..20 {
            frame = table.switch(frame, tick);
            if frame != boot {
                let current = table.tasks[table.current].unwrap();
                assert_eq!(current.state, TaskState::Running);
                assert!(current.owns_frame(frame));
            }
        }
    }

    #[test]
    fn sleeping_task_waits_for_deadline() {
        let a = FakeTask::new();
        let b = FakeTask::new();
        let mut table = table_with_tasks(&[&a, &b]);
        let (_keep, boot) = boot_frame();

        table.switch(boot, 1); // task 1 running
        table.sleep_current(1, 10); // sleeps until tick 11

        // Until the deadline, only task 2 is selected.
        for tick in 2..11 {
            table.switch(boot, tick);
            assert_eq!(table.current_pid(), 2, "tick {}", tick);
        }

        // At tick 11 the sleeper wakes and is selected again.
        table.switch(boot, 11);
        assert_eq!(table.current_pid(), 1);
        assert_eq!(table.state_of(1), Some(TaskState::Running));
    }

    #[test]
    fn zombie_is_never_selected() {
        let a = FakeTask::new();
        let b = FakeTask::new();
        let mut table = table_with_tasks(&[&a, &b]);
        let (_keep, boot) = boot_frame();

        table.switch(boot, 1); // task 1 running
        table.exit_current();
        assert_eq!(table.state_of(1), Some(TaskState::Zombie));

        for tick in 2..10 {
            table.switch(boot, tick);
            assert_eq!(table.current_pid(), 2);
        }
    }

    #[test]
    fn no_ready_task_keeps_current_frame() {
        let a = FakeTask::new();
        let mut table = table_with_tasks(&[&a]);
        let (_keep, boot) = boot_frame();

        let f1 = table.switch(boot, 1);
        table.sleep_current(1, 100);

        // Nothing runnable: the interrupted frame comes back unchanged.
        let frame = table.switch(f1, 2);
        assert_eq!(frame, f1);
    }

    #[test]
    fn table_capacity_is_enforced() {
        let mut table = TaskTable::new();
        table.bootstrap();
        let fake = FakeTask::new();
        for _ in 0..MAX_TASKS - 1 {
            table
                .create_with_stack("filler", 0x1000, fake.base(), fake.stack.len() as u64)
                .unwrap();
        }
        let err = table
            .create_with_stack("overflow", 0x1000, fake.base(), fake.stack.len() as u64)
            .unwrap_err();
        assert!(matches!(err, KernelError::ResourceExhausted { .. }));
    }

    #[test]
    fn tiny_stack_is_rejected() {
        let mut table = TaskTable::new();
        table.bootstrap();
        let err = table
            .create_with_stack("tiny", 0x1000, 0x100000, 64)
            .unwrap_err();
        assert!(matches!(err, KernelError::InvalidArgument { .. }));
    }
}
