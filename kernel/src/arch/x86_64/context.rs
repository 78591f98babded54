//! Execution context for x86_64
//!
//! The saved machine state of a suspended thread: its kernel stack, the
//! stack pointer where its register image lives, segment-override bases,
//! and the floating-point image. [`Context::new`] pre-populates the kernel
//! stack with a synthetic interrupt-return frame so the first run of a
//! thread takes exactly the same `iretq` path as every resumption.

use core::alloc::Layout;
use core::mem::size_of;
use core::ptr::NonNull;

use bitflags::bitflags;

use super::fpu::{self, FpuState};
use super::gdt;
use crate::scheduler::error::{SchedulerError, SchedulerResult};

extern crate alloc;
use alloc::alloc as heap_alloc;

bitflags! {
    /// RFLAGS bits used when fabricating frames.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RFlags: u64 {
        /// Bit 1 always reads as one.
        const RESERVED = 1 << 1;
        /// IF: maskable interrupts enabled.
        const INTERRUPT_ENABLE = 1 << 9;
    }
}

/// RFLAGS value for a fresh thread: interrupts on so the timer can preempt
/// it from the first instruction.
pub const INITIAL_RFLAGS: u64 = RFlags::RESERVED.bits() | RFlags::INTERRUPT_ENABLE.bits();

/// The register image shared by interrupt entry, context creation, and the
/// `iretq` resume path.
///
/// Layout contract: field order must match the push/pop order of the
/// interrupt stubs in `idt.rs`: 15 general-purpose registers pushed by
/// the stub, the vector/error-code pair, then the five values the CPU
/// itself pushes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rdi: u64,
    pub rsi: u64,
    pub rbp: u64,
    pub rdx: u64,
    pub rcx: u64,
    pub rbx: u64,
    pub rax: u64,
    pub vector: u64,
    pub error_code: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

/// Execution context: one per thread, exclusively owned by it.
pub struct Context {
    /// Kernel stack allocation (base address).
    stack: NonNull<u8>,
    stack_size: usize,
    /// Saved stack pointer; while the thread is suspended it addresses the
    /// thread's [`TrapFrame`].
    pub rsp: u64,
    /// FS segment base (thread-local addressing). Neutral by default,
    /// written through only when it differs from the outgoing thread's.
    pub fs_base: u64,
    /// GS segment base.
    pub gs_base: u64,
    /// Floating-point register image.
    pub fpu: FpuState,
}

// Safety: the kernel stack allocation is exclusively owned by this context
// and never aliased; moving the context between scheduler structures moves
// that ownership with it.
unsafe impl Send for Context {}

impl Context {
    /// Allocate a kernel stack and fabricate the interrupt-return frame
    /// that the restore path expects.
    ///
    /// Kernel threads start on their own stack top; user threads start on
    /// `user_stack` in ring 3, with the kernel stack reserved for
    /// interrupt entry. Allocation failure is reported to the caller with
    /// no state left behind.
    pub fn new(entry: u64, user_stack: u64, user: bool, stack_size: usize) -> SchedulerResult<Self> {
        let layout = Layout::from_size_align(stack_size, 16)
            .map_err(|_| SchedulerError::StackAllocationFailed { size: stack_size })?;

        let ptr = unsafe { heap_alloc::alloc(layout) };
        let Some(stack) = NonNull::new(ptr) else {
            return Err(SchedulerError::ContextAllocationFailed { size: stack_size });
        };

        let stack_top = (ptr as usize + stack_size) & !0xF;
        let frame_addr = stack_top - size_of::<TrapFrame>();

        let frame = TrapFrame {
            rip: entry,
            cs: if user {
                (gdt::USER_CODE_SELECTOR | gdt::USER_RPL) as u64
            } else {
                gdt::KERNEL_CODE_SELECTOR as u64
            },
            rflags: INITIAL_RFLAGS,
            // Entry functions see the same stack alignment as after a call.
            rsp: if user {
                user_stack
            } else {
                (stack_top - 8) as u64
            },
            ss: if user {
                (gdt::USER_DATA_SELECTOR | gdt::USER_RPL) as u64
            } else {
                gdt::KERNEL_DATA_SELECTOR as u64
            },
            ..TrapFrame::default()
        };

        unsafe { core::ptr::write(frame_addr as *mut TrapFrame, frame) };

        Ok(Self {
            stack,
            stack_size,
            rsp: frame_addr as u64,
            fs_base: 0,
            gs_base: 0,
            fpu: fpu::default_image(),
        })
    }

    /// Top of the kernel stack; the value programmed into TSS.RSP0 while
    /// this thread runs.
    pub fn kernel_stack_top(&self) -> u64 {
        ((self.stack.as_ptr() as usize + self.stack_size) & !0xF) as u64
    }

    /// The saved register image.
    ///
    /// # Safety
    /// Only meaningful while the thread is suspended: `rsp` must address a
    /// live `TrapFrame` on this context's kernel stack.
    pub unsafe fn frame(&self) -> &TrapFrame {
        &*(self.rsp as *const TrapFrame)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // Reached only after the owning thread left every scheduler
        // structure; the stack cannot be live.
        unsafe {
            let layout = Layout::from_size_align_unchecked(self.stack_size, 16);
            heap_alloc::dealloc(self.stack.as_ptr(), layout);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KERNEL_STACK_SIZE;
    use static_assertions::const_assert_eq;

    // 15 GPRs + vector/error pair + 5-word iretq image.
    const_assert_eq!(size_of::<TrapFrame>(), 22 * 8);

    #[test]
    fn kernel_frame_targets_ring0() {
        let ctx = Context::new(0xFFFF_8000_0040_0000, 0, false, KERNEL_STACK_SIZE).unwrap();
        let frame = unsafe { ctx.frame() };

        assert_eq!(frame.rip, 0xFFFF_8000_0040_0000);
        assert_eq!(frame.cs, gdt::KERNEL_CODE_SELECTOR as u64);
        assert_eq!(frame.ss, gdt::KERNEL_DATA_SELECTOR as u64);
        assert_eq!(frame.rflags, 0x202);
        assert_eq!(frame.rsp, ctx.kernel_stack_top() - 8);
        assert_eq!(frame.rax, 0);
        assert_eq!(frame.r15, 0);
    }

    #[test]
    fn user_frame_targets_ring3() {
        let ctx = Context::new(0x40_0000, 0x7FFF_F000, true, KERNEL_STACK_SIZE).unwrap();
        let frame = unsafe { ctx.frame() };

        assert_eq!(frame.cs, 0x1B);
        assert_eq!(frame.ss, 0x23);
        assert_eq!(frame.rsp, 0x7FFF_F000);
        assert_eq!(frame.rflags & (1 << 9), 1 << 9);
    }

    #[test]
    fn frame_sits_at_stack_top() {
        let ctx = Context::new(0x1000, 0, false, KERNEL_STACK_SIZE).unwrap();
        assert_eq!(
            ctx.rsp + size_of::<TrapFrame>() as u64,
            ctx.kernel_stack_top()
        );
        // FXSAVE and iretq both want 16-byte alignment here.
        assert_eq!(ctx.rsp % 16, 0);
    }

    #[test]
    fn segment_overrides_default_neutral() {
        let ctx = Context::new(0x1000, 0, false, KERNEL_STACK_SIZE).unwrap();
        assert_eq!(ctx.fs_base, 0);
        assert_eq!(ctx.gs_base, 0);
    }

    #[test]
    fn fresh_context_carries_default_fpu_image() {
        let ctx = Context::new(0x1000, 0, false, KERNEL_STACK_SIZE).unwrap();
        // Without a captured boot image the reset image is used.
        assert_eq!(ctx.fpu.control_word(), FpuState::reset_image().control_word());
    }
}
