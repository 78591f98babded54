//! Global Descriptor Table and TSS
//!
//! Flat segmentation for x86_64 plus the Task State Segment whose RSP0
//! slot tells the CPU which kernel stack to use on the next privilege
//! transition. The scheduler points RSP0 at the incoming thread's kernel
//! stack on every switch; a stale value would make the next interrupt
//! push onto an unrelated thread's stack.

use core::cell::UnsafeCell;
use core::mem::size_of;
use core::ptr::addr_of_mut;

/// Selectors
pub const KERNEL_CODE_SELECTOR: u16 = 0x08;
pub const KERNEL_DATA_SELECTOR: u16 = 0x10;
pub const USER_CODE_SELECTOR: u16 = 0x18;
pub const USER_DATA_SELECTOR: u16 = 0x20;
pub const TSS_SELECTOR: u16 = 0x28;

/// Requested privilege level for ring 3 selectors
pub const USER_RPL: u16 = 3;

/// GDT entry
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        GdtEntry {
            limit_low: 0,
            base_low: 0,
            base_middle: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    const fn new(base: u32, limit: u32, access: u8, flags: u8) -> Self {
        GdtEntry {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_middle: ((base >> 16) & 0xFF) as u8,
            access,
            granularity: (((limit >> 16) & 0x0F) as u8) | (flags & 0xF0),
            base_high: ((base >> 24) & 0xFF) as u8,
        }
    }

    const fn kernel_code() -> Self {
        // Present, Ring 0, Code, Execute/Read; Long mode, page granularity
        Self::new(0, 0xFFFFF, 0x9A, 0xA0)
    }

    const fn kernel_data() -> Self {
        // Present, Ring 0, Data, Read/Write
        Self::new(0, 0xFFFFF, 0x92, 0xC0)
    }

    const fn user_code() -> Self {
        // Present, Ring 3, Code, Execute/Read
        Self::new(0, 0xFFFFF, 0xFA, 0xA0)
    }

    const fn user_data() -> Self {
        // Present, Ring 3, Data, Read/Write
        Self::new(0, 0xFFFFF, 0xF2, 0xC0)
    }
}

/// 64-bit TSS system descriptor (occupies two GDT slots)
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
struct TssDescriptor {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
    base_upper: u32,
    reserved: u32,
}

impl TssDescriptor {
    const fn empty() -> Self {
        TssDescriptor {
            limit_low: 0,
            base_low: 0,
            base_middle: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
            base_upper: 0,
            reserved: 0,
        }
    }

    fn for_tss(base: u64, limit: u32) -> Self {
        TssDescriptor {
            limit_low: (limit & 0xFFFF) as u16,
            base_low: (base & 0xFFFF) as u16,
            base_middle: ((base >> 16) & 0xFF) as u8,
            access: 0x89, // present, available 64-bit TSS
            granularity: ((limit >> 16) & 0x0F) as u8,
            base_high: ((base >> 24) & 0xFF) as u8,
            base_upper: (base >> 32) as u32,
            reserved: 0,
        }
    }
}

/// Task State Segment
#[repr(C, packed)]
struct TaskStateSegment {
    _reserved1: u32,
    rsp0: u64, // stack pointer for ring 0 entry
    rsp1: u64,
    rsp2: u64,
    _reserved2: u64,
    ist: [u64; 7],
    _reserved3: u64,
    _reserved4: u16,
    iomap_base: u16,
}

impl TaskStateSegment {
    const fn new() -> Self {
        TaskStateSegment {
            _reserved1: 0,
            rsp0: 0,
            rsp1: 0,
            rsp2: 0,
            _reserved2: 0,
            ist: [0; 7],
            _reserved3: 0,
            _reserved4: 0,
            iomap_base: size_of::<TaskStateSegment>() as u16,
        }
    }
}

#[repr(C, align(16))]
struct Gdt {
    null: GdtEntry,
    kernel_code: GdtEntry,
    kernel_data: GdtEntry,
    user_code: GdtEntry,
    user_data: GdtEntry,
    tss: TssDescriptor,
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u64,
}

/// GDT + TSS behind `UnsafeCell` instead of `static mut` (which permits
/// aliased `&mut` and is unsound).
struct GdtState {
    gdt: UnsafeCell<Gdt>,
    tss: UnsafeCell<TaskStateSegment>,
}

// Safety: single CPU. The GDT and the TSS descriptor are written only in
// init(), before interrupts are enabled. TSS.RSP0 is written only from the
// dispatch path with interrupts disabled.
unsafe impl Sync for GdtState {}

static STATE: GdtState = GdtState {
    gdt: UnsafeCell::new(Gdt {
        null: GdtEntry::null(),
        kernel_code: GdtEntry::kernel_code(),
        kernel_data: GdtEntry::kernel_data(),
        user_code: GdtEntry::user_code(),
        user_data: GdtEntry::user_data(),
        tss: TssDescriptor::empty(),
    }),
    tss: UnsafeCell::new(TaskStateSegment::new()),
};

/// Build the TSS descriptor, load the GDT, reload the segment registers,
/// and load the task register.
pub fn init() {
    unsafe {
        let tss_base = STATE.tss.get() as u64;
        let tss_limit = (size_of::<TaskStateSegment>() - 1) as u32;
        (*STATE.gdt.get()).tss = TssDescriptor::for_tss(tss_base, tss_limit);

        let gdt_ptr = GdtPointer {
            limit: (size_of::<Gdt>() - 1) as u16,
            base: STATE.gdt.get() as u64,
        };

        load(&gdt_ptr);
    }
}

#[cfg(target_os = "none")]
unsafe fn load(gdt_ptr: &GdtPointer) {
    core::arch::asm!(
        "lgdt [{}]",
        in(reg) gdt_ptr,
        options(readonly, nostack, preserves_flags)
    );

    // Far-return to reload CS, then refresh the data segments.
    core::arch::asm!(
        "push 0x08",
        "lea rax, [rip + 2f]",
        "push rax",
        "retfq",
        "2:",
        "mov ax, 0x10",
        "mov ds, ax",
        "mov es, ax",
        "mov ss, ax",
        out("rax") _,
    );

    core::arch::asm!(
        "ltr ax",
        in("ax") TSS_SELECTOR,
        options(nomem, nostack, preserves_flags)
    );
}

#[cfg(not(target_os = "none"))]
unsafe fn load(_gdt_ptr: &GdtPointer) {}

/// Program the privileged stack pointer used on the next interrupt entry.
///
/// Called exactly once per context switch, before control transfers to the
/// incoming thread.
pub fn set_kernel_stack(rsp0: u64) {
    unsafe {
        addr_of_mut!((*STATE.tss.get()).rsp0).write_unaligned(rsp0);
    }
}

/// Current TSS.RSP0 value (diagnostics and tests).
pub fn kernel_stack() -> u64 {
    unsafe { core::ptr::addr_of!((*STATE.tss.get()).rsp0).read_unaligned() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tss_descriptor_encodes_base_and_limit() {
        let d = TssDescriptor::for_tss(0x1122_3344_5566_7788, 0x67);
        assert_eq!({ d.limit_low }, 0x0067);
        assert_eq!({ d.base_low }, 0x7788);
        assert_eq!({ d.base_middle }, 0x66);
        assert_eq!({ d.base_high }, 0x55);
        assert_eq!({ d.base_upper }, 0x1122_3344);
        assert_eq!({ d.access }, 0x89);
    }

    #[test]
    fn tss_iomap_base_points_past_the_segment() {
        let tss = TaskStateSegment::new();
        assert_eq!({ tss.iomap_base }, size_of::<TaskStateSegment>() as u16);
    }

    #[test]
    fn selectors_carry_expected_rpl() {
        assert_eq!(USER_CODE_SELECTOR | USER_RPL, 0x1B);
        assert_eq!(USER_DATA_SELECTOR | USER_RPL, 0x23);
    }
}
