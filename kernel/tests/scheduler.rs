//! End-to-end scheduler runs: fairness over long tick sequences, the
//! PID-0 exclusion, and mixed sleep/exit workloads.

use ferrite_kernel::arch::x86_64::interrupts::RegisterFrame;
use ferrite_kernel::sched::{TaskState, TaskTable};

struct Stack {
    bytes: Vec<u8>,
}

impl Stack {
    fn new() -> Self {
        Self {
            bytes: vec![0u8; 16 * 1024],
        }
    }

    fn base(&self) -> u64 {
        self.bytes.as_ptr() as u64
    }
}

fn spawn(table: &mut TaskTable, name: &'static str, stack: &Stack) -> u32 {
    table
        .create_with_stack(name, 0x1000, stack.base(), stack.bytes.len() as u64)
        .expect("create task")
}

#[test]
fn three_tasks_share_1000_ticks_fairly() {
    let mut table = TaskTable::new();
    table.bootstrap();

    let stacks: Vec<Stack> = (0..3).map(|_| Stack::new()).collect();
    let shell = spawn(&mut table, "shell", &stacks[0]);
    let worker_a = spawn(&mut table, "worker-a", &stacks[1]);
    let worker_b = spawn(&mut table, "worker-b", &stacks[2]);

    let mut boot = Box::new(RegisterFrame::default());
    let mut frame = &mut *boot as *mut RegisterFrame;

    let mut selections = std::collections::HashMap::new();
    for tick in 1..=1000u64 {
        frame = table.switch(frame, tick);
        *selections.entry(table.current_pid()).or_insert(0u64) += 1;
    }

    // All three tasks ran, PID 0 never did while others were ready.
    assert!(selections.get(&shell).copied().unwrap_or(0) > 0);
    assert!(selections.get(&worker_a).copied().unwrap_or(0) > 0);
    assert!(selections.get(&worker_b).copied().unwrap_or(0) > 0);
    assert_eq!(selections.get(&0), None);

    // Round-robin keeps the split within one tick of perfectly even.
    for pid in [shell, worker_a, worker_b] {
        let count = selections[&pid];
        assert!((333..=334).contains(&count), "pid {} ran {} times", pid, count);
    }
}

#[test]
fn sleepers_and_zombies_leave_the_rotation() {
    let mut table = TaskTable::new();
    table.bootstrap();

    let stacks: Vec<Stack> = (0..3).map(|_| Stack::new()).collect();
    let a = spawn(&mut table, "a", &stacks[0]);
    let b = spawn(&mut table, "b", &stacks[1]);
    let c = spawn(&mut table, "c", &stacks[2]);

    let mut boot = Box::new(RegisterFrame::default());
    let mut frame = &mut *boot as *mut RegisterFrame;

    // Advance until task `a` is current, then put it to sleep until 50
    // and let `c` exit as soon as it runs.
    let mut slept_at = 0;
    for tick in 1..=10u64 {
        frame = table.switch(frame, tick);
        if table.current_pid() == a && slept_at == 0 {
            table.sleep_current(tick, 50 - tick);
            slept_at = tick;
        }
        if table.current_pid() == c {
            table.exit_current();
        }
    }
    assert!(slept_at > 0);
    assert_eq!(table.state_of(c), Some(TaskState::Zombie));

    // Between the sleep and tick 49 only `b` is ever selected.
    for tick in 11..50u64 {
        frame = table.switch(frame, tick);
        assert_eq!(table.current_pid(), b, "tick {}", tick);
    }

    // From tick 50 the sleeper is back in rotation; the zombie stays out.
    let mut woke = false;
    for tick in 50..60u64 {
        frame = table.switch(frame, tick);
        let pid = table.current_pid();
        assert_ne!(pid, c);
        if pid == a {
            woke = true;
        }
    }
    assert!(woke, "sleeper never woke");
}

#[test]
fn sentinel_runs_only_the_boot_context() {
    let mut table = TaskTable::new();
    table.bootstrap();
    assert_eq!(table.count(), 1);
    assert_eq!(table.current_pid(), 0);

    // With no other task, the boot frame keeps running.
    let mut boot = Box::new(RegisterFrame::default());
    let frame = &mut *boot as *mut RegisterFrame;
    assert_eq!(table.switch(frame, 1), frame);
    assert_eq!(table.current_pid(), 0);
}
