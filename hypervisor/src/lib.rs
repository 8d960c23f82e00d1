//! Brings a logical processor into and out of Intel VMX root operation.
//!
//! The crate covers the part of a hypervisor that runs before any guest exists: detecting VMX,
//! conditioning CR0, CR4 and IA32_FEATURE_CONTROL, allocating the VMXON and VMCS regions and
//! executing VMXON, VMXOFF, VMPTRLD, VMCLEAR, VMREAD and VMWRITE. Hardware access goes through
//! [`intel::support::HardwarePort`] and physical memory comes from a
//! [`utils::alloc::PageAllocator`] supplied by the host.
//!
//! ```no_run
//! use vmx_root::{intel::{support::X86Port, vmx::Vmx}, utils::alloc::IdentityMappedAllocator};
//!
//! let port = X86Port;
//! let allocator = IdentityMappedAllocator;
//! let mut vmx = Vmx::new(&port, &allocator);
//!
//! let session = vmx.enable()?;
//! log::info!("VMXON region at {:#x}", session.vmxon_region);
//! vmx.disable()?;
//! # Ok::<(), vmx_root::error::HypervisorError>(())
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod intel;
#[cfg(target_arch = "x86_64")]
pub mod logger;
pub mod utils;

#[cfg(test)]
mod testing;
