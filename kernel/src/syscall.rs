//! Syscall layer
//!
//! Register-based dispatch over the scheduling services. The call number
//! rides in RAX, arguments in RBX/RCX, and the result replaces RAX in the
//! caller's saved frame. Unknown numbers answer `u64::MAX`.
//!
//! Only the thread/process services live here; memory and filesystem
//! calls belong to their own subsystems.

use crate::arch::x86_64::context::TrapFrame;
use crate::arch::x86_64::idt;
use crate::scheduler::{self, Priority};

pub const SYS_THREAD_CREATE: u64 = 0;
pub const SYS_THREAD_ID: u64 = 1;
pub const SYS_PROCESS_ID: u64 = 2;
pub const SYS_SLEEP: u64 = 3;
pub const SYS_THREAD_WAIT: u64 = 4;
pub const SYS_PROCESS_WAIT: u64 = 5;
pub const SYS_THREAD_EXIT: u64 = 6;
pub const SYS_PROCESS_EXIT: u64 = 7;

/// Register the syscall gate handler.
pub fn init() {
    idt::register_handler(idt::SYSCALL_VECTOR, dispatch);
    log::info!("syscall: gate {:#04x} ready", idt::SYSCALL_VECTOR);
}

/// Syscall dispatch. Blocking services (sleep, wait, exit) switch away in
/// place; when the caller is eventually resumed, it returns through the
/// same frame.
fn dispatch(frame: *mut TrapFrame) -> *mut TrapFrame {
    let f = unsafe { &mut *frame };

    match f.rax {
        SYS_THREAD_CREATE => {
            f.rax = sys_thread_create(f.rbx, f.rcx);
        }
        SYS_THREAD_ID => {
            f.rax = scheduler::current_thread_id().unwrap_or(u64::MAX);
        }
        SYS_PROCESS_ID => {
            f.rax = sys_process_id();
        }
        SYS_SLEEP => {
            scheduler::sleep_ms(f.rbx);
        }
        SYS_THREAD_WAIT => {
            f.rax = scheduler::wait_thread(f.rbx).unwrap_or(u64::MAX);
        }
        SYS_PROCESS_WAIT => {
            scheduler::wait_process(f.rbx);
            f.rax = 0;
        }
        SYS_THREAD_EXIT => {
            scheduler::exit_current(f.rbx);
        }
        SYS_PROCESS_EXIT => {
            scheduler::exit_process_current(f.rbx);
        }
        _ => {
            f.rax = u64::MAX;
        }
    }

    frame
}

/// Spawn a user thread in the caller's process at `entry` with
/// `user_stack`; answers the new thread id, or `u64::MAX` when context
/// allocation fails.
fn sys_thread_create(entry: u64, user_stack: u64) -> u64 {
    let Some(process) = scheduler::SCHEDULER.current_process() else {
        return u64::MAX;
    };

    match scheduler::spawn_user(&process, "user", entry, user_stack, Priority::Normal) {
        Ok(id) => id,
        Err(err) => {
            log::warn!("syscall: thread creation failed: {}", err);
            u64::MAX
        }
    }
}

fn sys_process_id() -> u64 {
    scheduler::SCHEDULER
        .current_process()
        .map(|p| p.id())
        .unwrap_or(u64::MAX)
}
