//! Page-granularity physical memory for VMX regions.
//!
//! The hypervisor never allocates physical memory on its own. The host environment hands it a
//! `PageAllocator`, the same way a kernel driver hands over `MmAllocateContiguousMemory`, and the
//! region code only ever asks it for single 4-KByte pages.

use {
    crate::utils::addresses::PhysicalAddress,
    alloc::alloc::{alloc_zeroed, dealloc, Layout},
    core::ptr::NonNull,
    x86::bits64::paging::BASE_PAGE_SIZE,
};

/// One 4-KByte page of physically contiguous memory.
///
/// `va` is the mapping the hypervisor writes through, `pa` is what the hardware sees.
#[derive(Debug)]
pub struct PhysicalPage {
    pub va: NonNull<u8>,
    pub pa: PhysicalAddress,
}

/// Source of physically contiguous pages.
///
/// Implementations must be safe to call concurrently from every logical processor.
pub trait PageAllocator {
    /// Allocates one page, or `None` if no page is available.
    fn allocate_page(&self) -> Option<PhysicalPage>;

    /// Releases a page previously returned by `allocate_page`.
    ///
    /// # Safety
    ///
    /// `page` must come from this allocator and must not be referenced by the processor
    /// (for a VMXON region: VMXOFF has executed).
    unsafe fn free_page(&self, page: PhysicalPage);
}

/// Allocator for environments where physical memory is identity mapped (UEFI, early boot).
///
/// Pages come from the global allocator with 4-KByte alignment, and the physical address is the
/// virtual address.
pub struct IdentityMappedAllocator;

impl IdentityMappedAllocator {
    fn layout() -> Layout {
        // Size and alignment are both a non-zero power of two.
        unsafe { Layout::from_size_align_unchecked(BASE_PAGE_SIZE, BASE_PAGE_SIZE) }
    }
}

impl PageAllocator for IdentityMappedAllocator {
    fn allocate_page(&self) -> Option<PhysicalPage> {
        let va = NonNull::new(unsafe { alloc_zeroed(Self::layout()) })?;
        let pa = PhysicalAddress::from_pa(va.as_ptr() as u64);

        Some(PhysicalPage { va, pa })
    }

    unsafe fn free_page(&self, page: PhysicalPage) {
        dealloc(page.va.as_ptr(), Self::layout());
    }
}
