//! Architecture support
//!
//! Everything privileged lives under here. The scheduler proper is
//! architecture-neutral and reaches the hardware only through this module:
//! context creation/restore, the TSS kernel-stack slot, CR3, the FS/GS
//! base MSRs, and the interrupt plumbing.

pub mod x86_64;
