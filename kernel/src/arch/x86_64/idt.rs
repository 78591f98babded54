//! Interrupt Descriptor Table and entry stubs
//!
//! Three vectors matter to this kernel: the timer IRQ, the forced-switch
//! software interrupt, and the syscall gate. Each stub materializes a
//! [`TrapFrame`] on the interrupted thread's kernel stack, hands its
//! address to [`ferrox_interrupt_dispatch`], then *resumes whatever frame
//! comes back* (`mov rsp, rax`, the pop sequence, `iretq`). Returning a
//! different frame pointer than the one passed in IS the context switch;
//! first runs and resumptions are indistinguishable here.

use core::arch::global_asm;
use core::cell::UnsafeCell;
use core::mem::size_of;

use super::context::TrapFrame;
use super::pic;

const IDT_ENTRIES: usize = 256;

/// Timer IRQ (PIC line 0 after remap)
pub const TIMER_VECTOR: u8 = pic::PIC1_OFFSET;
/// Forced-switch software interrupt (yield / sleep / exit trigger)
pub const SWITCH_VECTOR: u8 = 0x3E;
/// Syscall gate
pub const SYSCALL_VECTOR: u8 = 0x3F;

const IDT_PRESENT: u8 = 0x80;
const IDT_INTERRUPT_GATE: u8 = 0x0E;

/// IDT entry (16 bytes in long mode)
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    ist: u8,
    type_attr: u8,
    offset_mid: u16,
    offset_high: u32,
    reserved: u32,
}

impl IdtEntry {
    const fn missing() -> Self {
        IdtEntry {
            offset_low: 0,
            selector: 0,
            ist: 0,
            type_attr: 0,
            offset_mid: 0,
            offset_high: 0,
            reserved: 0,
        }
    }

    fn set_handler(&mut self, handler: usize, dpl: u8) {
        self.offset_low = handler as u16;
        self.selector = super::gdt::KERNEL_CODE_SELECTOR;
        self.ist = 0;
        self.type_attr = IDT_PRESENT | IDT_INTERRUPT_GATE | ((dpl & 0x03) << 5);
        self.offset_mid = (handler >> 16) as u16;
        self.offset_high = (handler >> 32) as u32;
        self.reserved = 0;
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u64,
}

/// A registered handler receives the interrupted frame and returns the
/// frame to resume: the same one for a plain return, a different thread's
/// for a switch.
pub type InterruptHandler = fn(*mut TrapFrame) -> *mut TrapFrame;

/// IDT and handler table behind `UnsafeCell` to avoid `static mut`.
struct InterruptState {
    idt: UnsafeCell<[IdtEntry; IDT_ENTRIES]>,
    handlers: UnsafeCell<[Option<InterruptHandler>; IDT_ENTRIES]>,
}

// Safety: single CPU. The IDT is written in init() before interrupts are
// enabled; handler slots are written with interrupts disabled and read
// from dispatch in interrupt context (IF clear), so no aliasing mutation
// can occur.
unsafe impl Sync for InterruptState {}

static STATE: InterruptState = InterruptState {
    idt: UnsafeCell::new([IdtEntry::missing(); IDT_ENTRIES]),
    handlers: UnsafeCell::new([None; IDT_ENTRIES]),
};

extern "C" {
    fn timer_interrupt_stub();
    fn switch_interrupt_stub();
    fn syscall_interrupt_stub();
}

/// Install the three gates and load the IDT.
pub fn init() {
    unsafe {
        let idt = &mut *STATE.idt.get();

        idt[TIMER_VECTOR as usize].set_handler(timer_interrupt_stub as usize, 0);
        idt[SWITCH_VECTOR as usize].set_handler(switch_interrupt_stub as usize, 0);
        // Ring 3 may raise the syscall gate.
        idt[SYSCALL_VECTOR as usize].set_handler(syscall_interrupt_stub as usize, 3);

        let idt_ptr = IdtPointer {
            limit: (size_of::<[IdtEntry; IDT_ENTRIES]>() - 1) as u16,
            base: STATE.idt.get() as u64,
        };

        load(&idt_ptr);
    }
}

#[cfg(target_os = "none")]
unsafe fn load(idt_ptr: &IdtPointer) {
    core::arch::asm!(
        "lidt [{}]",
        in(reg) idt_ptr,
        options(readonly, nostack, preserves_flags)
    );
}

#[cfg(not(target_os = "none"))]
unsafe fn load(_idt_ptr: &IdtPointer) {}

/// Register a handler for `vector`. Call with interrupts disabled (or
/// before they are first enabled).
pub fn register_handler(vector: u8, handler: InterruptHandler) {
    super::without_interrupts(|| unsafe {
        (*STATE.handlers.get())[vector as usize] = Some(handler);
    });
    log::debug!("idt: handler registered for vector {:#04x}", vector);
}

/// Common dispatch called by every stub.
///
/// Looks up the registered handler, forwards the frame, acknowledges the
/// PIC for hardware IRQs *before* the returned frame is resumed, and hands
/// the resume target back to the stub.
#[no_mangle]
extern "C" fn ferrox_interrupt_dispatch(frame: *mut TrapFrame) -> *mut TrapFrame {
    let vector = unsafe { (*frame).vector } as u8;

    let handler = unsafe { (*STATE.handlers.get())[vector as usize] };

    let next = match handler {
        Some(handler) => handler(frame),
        None => {
            log::warn!("unhandled interrupt vector {:#04x}", vector);
            frame
        }
    };

    if (pic::PIC1_OFFSET..pic::PIC2_OFFSET + 8).contains(&vector) {
        pic::send_eoi(vector - pic::PIC1_OFFSET);
    }

    next
}

// Entry stubs. Push order is the reverse of the TrapFrame field order:
// the dummy error-code slot and the vector land just below the CPU-pushed
// iretq image, then the 15 general-purpose registers down to r15 at the
// lowest address. The epilogue unwinds past the vector/error pair before
// `iretq`; this is the single resume sequence for interrupted and fresh
// contexts alike.
macro_rules! interrupt_stub_asm {
    ($name:ident, $vector:expr) => {
        global_asm!(
            concat!(
                ".section .text\n",
                ".global ", stringify!($name), "\n",
                stringify!($name), ":\n",
                "    cli\n",
                "    push 0\n",
                "    push {vector}\n",
                "    push rax\n",
                "    push rbx\n",
                "    push rcx\n",
                "    push rdx\n",
                "    push rbp\n",
                "    push rsi\n",
                "    push rdi\n",
                "    push r8\n",
                "    push r9\n",
                "    push r10\n",
                "    push r11\n",
                "    push r12\n",
                "    push r13\n",
                "    push r14\n",
                "    push r15\n",
                "    mov rdi, rsp\n",
                "    and rsp, -16\n",
                "    call ferrox_interrupt_dispatch\n",
                "    mov rsp, rax\n",
                "    pop r15\n",
                "    pop r14\n",
                "    pop r13\n",
                "    pop r12\n",
                "    pop r11\n",
                "    pop r10\n",
                "    pop r9\n",
                "    pop r8\n",
                "    pop rdi\n",
                "    pop rsi\n",
                "    pop rbp\n",
                "    pop rdx\n",
                "    pop rcx\n",
                "    pop rbx\n",
                "    pop rax\n",
                "    add rsp, 16\n",
                "    iretq\n",
            ),
            vector = const $vector,
        );
    };
}

interrupt_stub_asm!(timer_interrupt_stub, TIMER_VECTOR);
interrupt_stub_asm!(switch_interrupt_stub, SWITCH_VECTOR);
interrupt_stub_asm!(syscall_interrupt_stub, SYSCALL_VECTOR);
