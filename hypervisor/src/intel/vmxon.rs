//! The VMXON region: the page a logical processor supplies to enter VMX root operation.

use {static_assertions::const_assert_eq, x86::bits64::paging::BASE_PAGE_SIZE};

pub const PAGE_SIZE: usize = BASE_PAGE_SIZE;

/// A representation of the VMXON region in memory.
///
/// The processor only inspects the revision identifier, bits 30:0 of the first dword with
/// bit 31 clear; the rest of the page is reserved for its own use and starts zeroed.
///
/// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 25.11.5 VMXON Region
#[repr(C, align(4096))]
pub struct Vmxon {
    pub revision_id: u32,
    pub data: [u8; PAGE_SIZE - 4],
}

const_assert_eq!(core::mem::size_of::<Vmxon>(), PAGE_SIZE);
const_assert_eq!(core::mem::align_of::<Vmxon>(), PAGE_SIZE);
