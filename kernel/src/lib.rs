// src/lib.rs
// Kernel library root
#![no_std]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod logger;
pub mod process;
pub mod scheduler;
pub mod sync;
pub mod syscall;

#[cfg(target_os = "none")]
use core::panic::PanicInfo;

/// `print!` over the serial port
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => {
        $crate::_print(format_args!($($arg)*))
    };
}

#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => {
        $crate::print!("{}\n", format_args!($($arg)*))
    };
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    use core::fmt::Write;

    struct SerialWriter;

    impl core::fmt::Write for SerialWriter {
        fn write_str(&mut self, s: &str) -> core::fmt::Result {
            arch::x86_64::serial::write_str(s);
            Ok(())
        }
    }

    let _ = SerialWriter.write_fmt(args);
}

/// Global heap, seeded from the multiboot2 memory map in `kernel_main`.
/// Hosted builds (tests) use std's allocator instead.
#[cfg(target_os = "none")]
#[global_allocator]
static ALLOCATOR: linked_list_allocator::LockedHeap = linked_list_allocator::LockedHeap::empty();

/// Kernel panic handler
#[cfg(target_os = "none")]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    arch::x86_64::disable_interrupts();
    println!("[KERNEL PANIC] {}", info);
    loop {
        core::hint::spin_loop();
    }
}

/// Kernel entry, called from the boot shim with the multiboot2 info
/// pointer and magic.
#[cfg(target_os = "none")]
pub fn kernel_main(multiboot_info_ptr: u64, multiboot_magic: u32) -> ! {
    arch::x86_64::serial::init();
    logger::init();

    println!("===========================================");
    println!("  Ferrox Kernel v0.1.0");
    println!("  Architecture: x86_64");
    println!("===========================================");

    if multiboot_magic != 0x36d7_6289 {
        panic!("invalid multiboot2 magic: {:#x}", multiboot_magic);
    }

    let boot_info = unsafe {
        use multiboot2::{BootInformation, BootInformationHeader};
        BootInformation::load(multiboot_info_ptr as *const BootInformationHeader)
            .expect("failed to load multiboot2 information")
    };

    init_heap(&boot_info);

    log::info!("arch init...");
    arch::x86_64::init();

    log::info!("scheduler init...");
    scheduler::init();

    log::info!("syscall init...");
    syscall::init();

    // Two demo threads exercising preemption, sleeping, and exit.
    scheduler::spawn("demo_a", demo_a, scheduler::Priority::Normal)
        .expect("demo thread allocation failed");
    scheduler::spawn("demo_b", demo_b, scheduler::Priority::Normal)
        .expect("demo thread allocation failed");

    log::info!("handing over to the scheduler");
    scheduler::start()
}

/// Seed the heap on the first usable region above 1 MiB.
#[cfg(target_os = "none")]
fn init_heap(boot_info: &multiboot2::BootInformation) {
    use multiboot2::MemoryAreaType;

    let memory_map = boot_info
        .memory_map_tag()
        .expect("no memory map in boot information");

    for area in memory_map.memory_areas() {
        let start = area.start_address();
        let size = area.end_address() - start;

        if area.typ() == MemoryAreaType::Available && size > 1024 * 1024 {
            // Skip the low 64K of the region for boot leftovers; cap the
            // heap at 16 MiB.
            let heap_start = start as usize + 0x10000;
            let heap_size = (size as usize).saturating_sub(0x10000).min(16 * 1024 * 1024);

            unsafe {
                ALLOCATOR.lock().init(heap_start as *mut u8, heap_size);
            }

            log::info!(
                "heap: {:#x}..{:#x} ({} KB)",
                heap_start,
                heap_start + heap_size,
                heap_size / 1024
            );
            return;
        }
    }

    panic!("no usable memory region for the heap");
}

#[cfg(target_os = "none")]
fn demo_a() -> ! {
    loop {
        log::info!("[demo_a] tick (tid {:?})", scheduler::current_thread_id());
        scheduler::sleep_ms(500);
    }
}

#[cfg(target_os = "none")]
fn demo_b() -> ! {
    for _ in 0..10 {
        log::info!("[demo_b] tick");
        scheduler::yield_now();
        scheduler::sleep_ms(200);
    }
    scheduler::exit_current(0);
}
