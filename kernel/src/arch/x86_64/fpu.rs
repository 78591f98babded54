//! FPU/SSE state save and restore
//!
//! Every context carries a 512-byte FXSAVE image. New contexts start from
//! the default image captured at boot (post-`fninit`), so a thread's first
//! run sees the same floating-point environment as a resumed one.

use spin::Once;

/// FXSAVE area size
const FPU_STATE_SIZE: usize = 512;

/// FXSAVE image, 16-byte aligned as the instruction requires.
#[repr(C, align(16))]
#[derive(Clone)]
pub struct FpuState {
    data: [u8; FPU_STATE_SIZE],
}

impl FpuState {
    pub const fn zeroed() -> Self {
        Self {
            data: [0; FPU_STATE_SIZE],
        }
    }

    /// The architectural reset image: x87 control word 0x037F (all
    /// exceptions masked, 64-bit precision), MXCSR 0x1F80 (all SIMD
    /// exceptions masked).
    pub fn reset_image() -> Self {
        let mut state = Self::zeroed();
        state.data[0..2].copy_from_slice(&0x037Fu16.to_le_bytes());
        state.data[24..28].copy_from_slice(&0x1F80u32.to_le_bytes());
        state
    }

    /// Capture the CPU's floating-point state into this image.
    ///
    /// # Safety
    /// FXSR must be enabled (done in [`init`] on bare metal).
    pub unsafe fn save(&mut self) {
        core::arch::asm!(
            "fxsave64 [{}]",
            in(reg) self.data.as_mut_ptr(),
            options(nostack)
        );
    }

    /// Load this image into the CPU.
    ///
    /// # Safety
    /// The image must be a valid FXSAVE area.
    pub unsafe fn restore(&self) {
        core::arch::asm!(
            "fxrstor64 [{}]",
            in(reg) self.data.as_ptr(),
            options(nostack)
        );
    }

    /// x87 control word (diagnostics and tests).
    pub fn control_word(&self) -> u16 {
        u16::from_le_bytes([self.data[0], self.data[1]])
    }

    /// SSE control/status register (diagnostics and tests).
    pub fn mxcsr(&self) -> u32 {
        u32::from_le_bytes([self.data[24], self.data[25], self.data[26], self.data[27]])
    }
}

/// Default image captured once at boot.
static BOOT_IMAGE: Once<FpuState> = Once::new();

/// Enable FXSAVE/SSE and capture the default state.
pub fn init() {
    let cpuid = raw_cpuid::CpuId::new();
    let has_fxsr = cpuid
        .get_feature_info()
        .map_or(false, |f| f.has_fxsave_fxstor());
    crate::sched_assert!(has_fxsr, "CPU lacks FXSAVE/FXRSTOR");

    #[cfg(target_os = "none")]
    unsafe {
        enable_sse();
    }

    BOOT_IMAGE.call_once(|| {
        let mut image = FpuState::zeroed();
        unsafe {
            core::arch::asm!("fninit", options(nomem, nostack));
            image.save();
        }
        image
    });

    log::debug!(
        "fpu: default image captured (fcw={:#06x}, mxcsr={:#06x})",
        default_image().control_word(),
        default_image().mxcsr()
    );
}

/// The image installed into every new context.
pub fn default_image() -> FpuState {
    BOOT_IMAGE
        .get()
        .cloned()
        .unwrap_or_else(FpuState::reset_image)
}

/// CR0.MP set, CR0.EM clear, CR4.OSFXSR + CR4.OSXMMEXCPT set.
#[cfg(target_os = "none")]
unsafe fn enable_sse() {
    let mut cr0: u64;
    core::arch::asm!("mov {}, cr0", out(reg) cr0, options(nomem, nostack));
    cr0 &= !(1 << 2); // EM
    cr0 |= 1 << 1; // MP
    core::arch::asm!("mov cr0, {}", in(reg) cr0, options(nomem, nostack));

    let mut cr4: u64;
    core::arch::asm!("mov {}, cr4", out(reg) cr4, options(nomem, nostack));
    cr4 |= (1 << 9) | (1 << 10); // OSFXSR | OSXMMEXCPT
    core::arch::asm!("mov cr4, {}", in(reg) cr4, options(nomem, nostack));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_image_masks_everything() {
        let image = FpuState::reset_image();
        assert_eq!(image.control_word(), 0x037F);
        assert_eq!(image.mxcsr(), 0x1F80);
    }

    #[test]
    fn save_restore_roundtrip() {
        // FXSAVE/FXRSTOR are unprivileged, so this exercises the real
        // instructions on the host.
        let mut saved = FpuState::zeroed();
        unsafe {
            saved.save();
            saved.restore();
        }
        let mut again = FpuState::zeroed();
        unsafe { again.save() };
        assert_eq!(saved.control_word(), again.control_word());
    }
}
