//! The VMCS region.
//!
//! Only the architectural header is laid out here. The control, guest-state and host-state
//! areas beyond offset 8 are in an implementation-specific format and are reached through
//! VMREAD and VMWRITE on the current VMCS, never through memory.

use {crate::intel::vmxon::PAGE_SIZE, static_assertions::const_assert_eq};

/// Represents the VMCS region in memory.
///
/// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 25.2 FORMAT OF THE VMCS REGION
#[repr(C, align(4096))]
pub struct Vmcs {
    /// Bits 30:0 revision identifier, bit 31 shadow-VMCS indicator.
    pub revision_id: u32,
    /// Written non-zero by the processor on a VMX abort.
    pub abort_indicator: u32,
    pub reserved: [u8; PAGE_SIZE - 8],
}

const_assert_eq!(core::mem::size_of::<Vmcs>(), PAGE_SIZE);
const_assert_eq!(core::mem::offset_of!(Vmcs, abort_indicator), 4);
