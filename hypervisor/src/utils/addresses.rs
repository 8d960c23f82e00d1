//! Abstraction over physical addresses with the checks VMX places on region pointers.
//!
//! This module introduces the `PhysicalAddress` structure that wraps the `x86` crate's `PAddr`
//! and answers the two questions the VMXON and VMPTRLD instructions ask of their operand:
//! is it 4-KByte aligned, and does it fit within the processor's physical-address width.

use {
    core::ops::Deref,
    x86::bits64::paging::{PAddr, BASE_PAGE_SHIFT, BASE_PAGE_SIZE},
};

/// A representation of physical addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicalAddress(PAddr);

impl PhysicalAddress {
    /// Constructs a `PhysicalAddress` from a given physical address.
    pub fn from_pa(pa: u64) -> Self {
        Self(PAddr::from(pa))
    }

    /// Constructs a `PhysicalAddress` from a given page frame number (PFN).
    pub fn from_pfn(pfn: u64) -> Self {
        Self(PAddr::from(pfn << BASE_PAGE_SHIFT))
    }

    /// Retrieves the page frame number (PFN) for the physical address.
    pub fn pfn(&self) -> u64 {
        self.0.as_u64() >> BASE_PAGE_SHIFT
    }

    /// Retrieves the physical address.
    pub fn pa(&self) -> u64 {
        self.0.as_u64()
    }

    /// Bits 11:0 are clear.
    pub fn is_page_aligned(&self) -> bool {
        self.pa() & (BASE_PAGE_SIZE as u64 - 1) == 0
    }

    /// No bit at or above `width` is set.
    pub fn fits_width(&self, width: u8) -> bool {
        width >= 64 || self.pa() >> width == 0
    }

    /// Whether this address may be the operand of VMXON or VMPTRLD.
    pub fn is_valid_region_pointer(&self, width: u8) -> bool {
        self.is_page_aligned() && self.fits_width(width)
    }
}

impl Deref for PhysicalAddress {
    type Target = PAddr;

    /// Dereferences the `PhysicalAddress` to retrieve the underlying `PAddr`.
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl core::fmt::LowerHex for PhysicalAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::LowerHex::fmt(&self.pa(), f)
    }
}
