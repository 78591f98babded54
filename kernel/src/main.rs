// src/main.rs
// Ferrox kernel boot binary. The real entry is `_start` on the bare-metal
// target; hosted builds get an inert main so the workspace builds there.
#![cfg_attr(target_os = "none", no_std, no_main)]

/// Entry from the boot shim: RDI carries the multiboot2 info pointer,
/// RSI the magic.
#[cfg(target_os = "none")]
#[no_mangle]
pub extern "C" fn _start(multiboot_info_ptr: u64, multiboot_magic: u32) -> ! {
    ferrox_kernel::kernel_main(multiboot_info_ptr, multiboot_magic)
}

#[cfg(not(target_os = "none"))]
fn main() {
    eprintln!("ferrox-kernel only runs on x86_64-unknown-none");
}
