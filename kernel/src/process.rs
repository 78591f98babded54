//! Processes and address spaces
//!
//! A process owns exactly one address-space handle and the identity of its
//! threads. The scheduler structures own the thread control blocks
//! themselves; a thread reaches back to its process through a shared
//! handle, and the address-space switch at dispatch time happens exactly
//! when the incoming thread's process root differs from the outgoing one.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Once;

use crate::scheduler::thread::ThreadId;
use crate::sync::IrqMutex;

pub type ProcessId = u64;

/// Root of a page-table hierarchy (CR3 value). Opaque to the scheduler;
/// only equality and the raw root matter here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace(u64);

impl AddressSpace {
    pub const fn new(root: u64) -> Self {
        Self(root)
    }

    pub fn root(&self) -> u64 {
        self.0
    }
}

pub struct Process {
    id: ProcessId,
    name: Box<str>,
    dir: AddressSpace,
    threads: IrqMutex<Vec<ThreadId>>,
}

impl Process {
    pub fn new(id: ProcessId, name: &str, dir: AddressSpace) -> Self {
        Self {
            id,
            name: name.into(),
            dir,
            threads: IrqMutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> AddressSpace {
        self.dir
    }

    pub fn attach_thread(&self, id: ThreadId) {
        self.threads.lock().push(id);
    }

    /// Remove a thread id; returns true when this was the last one.
    pub fn detach_thread(&self, id: ThreadId) -> bool {
        let mut threads = self.threads.lock();
        threads.retain(|&t| t != id);
        threads.is_empty()
    }

    pub fn thread_count(&self) -> usize {
        self.threads.lock().len()
    }
}

/// The kernel's own process, created at init; owns every kernel thread.
static KERNEL_PROCESS: Once<Arc<Process>> = Once::new();

/// All live processes.
static REGISTRY: IrqMutex<Vec<Arc<Process>>> = IrqMutex::new(Vec::new());

static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(1);

/// Create the kernel process around the boot address space.
pub fn init(kernel_dir: AddressSpace) {
    let kernel = Arc::new(Process::new(0, "kernel", kernel_dir));
    REGISTRY.lock().push(kernel.clone());
    KERNEL_PROCESS.call_once(|| kernel);
    log::info!("process: kernel process ready (dir={:#x})", kernel_dir.root());
}

pub fn kernel_process() -> Arc<Process> {
    KERNEL_PROCESS
        .get()
        .expect("process subsystem not initialized")
        .clone()
}

/// Create a process with its own address space.
pub fn create(name: &str, dir: AddressSpace) -> Arc<Process> {
    let id = NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed);
    let process = Arc::new(Process::new(id, name, dir));
    REGISTRY.lock().push(process.clone());
    log::info!("process: '{}' created (pid {})", name, id);
    process
}

pub fn find(id: ProcessId) -> Option<Arc<Process>> {
    REGISTRY.lock().iter().find(|p| p.id() == id).cloned()
}

pub fn exists(id: ProcessId) -> bool {
    REGISTRY.lock().iter().any(|p| p.id() == id)
}

/// Detach a thread from its process; a user process whose last thread is
/// gone leaves the registry. The kernel process is permanent.
pub fn detach_thread(process: &Arc<Process>, id: ThreadId) {
    let now_empty = process.detach_thread(id);
    if now_empty && process.id() != 0 {
        REGISTRY.lock().retain(|p| p.id() != process.id());
        log::info!("process: pid {} exited", process.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_membership_bookkeeping() {
        let p = Process::new(7, "p", AddressSpace::new(0x2000));
        p.attach_thread(1);
        p.attach_thread(2);
        assert_eq!(p.thread_count(), 2);

        assert!(!p.detach_thread(1));
        assert!(p.detach_thread(2));
        assert_eq!(p.thread_count(), 0);
    }

    #[test]
    fn registry_create_find_remove() {
        let p = create("transient", AddressSpace::new(0x3000));
        let pid = p.id();
        assert!(exists(pid));
        assert_eq!(find(pid).unwrap().dir(), AddressSpace::new(0x3000));

        p.attach_thread(99);
        detach_thread(&p, 99);
        assert!(!exists(pid));
    }

    #[test]
    fn address_space_equality_drives_switch_decision() {
        let a = AddressSpace::new(0x1000);
        let b = AddressSpace::new(0x1000);
        let c = AddressSpace::new(0x2000);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
