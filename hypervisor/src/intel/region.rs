//! Allocation and release of the physical pages backing VMXON and VMCS regions.
//!
//! A region leaves this module only as a `PhysicalRegion` handle: callers see its physical
//! address, never the mapping the revision identifier was written through.

use {
    crate::{
        error::HypervisorError,
        intel::{
            capability::{physical_address_width, vmcs_revision_id},
            support::HardwarePort,
            vmcs::Vmcs,
            vmxon::{Vmxon, PAGE_SIZE},
        },
        utils::{
            addresses::PhysicalAddress,
            alloc::{PageAllocator, PhysicalPage},
        },
    },
    bitfield::BitMut,
};

/// What a region is used as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Vmxon,
    Vmcs,
}

/// Handle to an allocated, revision-stamped region.
///
/// The handle stays valid until it is passed to `free_region`; afterwards it is released and
/// freeing it again does nothing. Dropping a handle that still holds its page leaks the page:
/// the processor may reference it, so it is never returned to the allocator implicitly.
#[derive(Debug)]
#[must_use]
pub struct PhysicalRegion {
    kind: RegionKind,
    page: Option<PhysicalPage>,
}

impl PhysicalRegion {
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// Physical address of the region, `None` once released.
    pub fn pa(&self) -> Option<PhysicalAddress> {
        self.page.as_ref().map(|page| page.pa)
    }

    pub fn is_released(&self) -> bool {
        self.page.is_none()
    }

    /// The revision identifier currently stored in the region.
    pub fn revision_id(&self) -> Option<u32> {
        self.page
            .as_ref()
            .map(|page| unsafe { page.va.cast::<u32>().as_ptr().read_volatile() })
    }
}

impl Drop for PhysicalRegion {
    fn drop(&mut self) {
        if let Some(page) = &self.page {
            log::warn!("{:?} region at {:#x} dropped without being freed", self.kind, page.pa);
        }
    }
}

/// Allocates one zeroed page and stamps it with the processor's VMCS revision identifier.
///
/// The page is handed back to the allocator if its physical address cannot be used as a
/// VMXON or VMCS pointer on this processor.
pub(crate) fn allocate_region<P, A>(
    port: &P,
    allocator: &A,
    kind: RegionKind,
) -> Result<PhysicalRegion, HypervisorError>
where
    P: HardwarePort + ?Sized,
    A: PageAllocator + ?Sized,
{
    let page = allocator
        .allocate_page()
        .ok_or(HypervisorError::MemoryAllocationFailed)?;

    let width = physical_address_width(port);
    if !page.pa.is_valid_region_pointer(width) {
        let pa = page.pa.pa();
        log::error!("{:?} region at {:#x} unusable with {}-bit physical addresses", kind, pa, width);
        unsafe { allocator.free_page(page) };
        return Err(HypervisorError::InvalidPhysicalAddress(pa));
    }

    unsafe { core::ptr::write_bytes(page.va.as_ptr(), 0, PAGE_SIZE) };

    let revision_id = vmcs_revision_id(port);

    match kind {
        RegionKind::Vmxon => {
            let vmxon_region = unsafe { page.va.cast::<Vmxon>().as_mut() };
            vmxon_region.revision_id = revision_id;
            vmxon_region.revision_id.set_bit(31, false);
        }
        RegionKind::Vmcs => {
            let vmcs_region = unsafe { page.va.cast::<Vmcs>().as_mut() };
            vmcs_region.revision_id = revision_id;
            vmcs_region.revision_id.set_bit(31, false);
            vmcs_region.abort_indicator = 0;
        }
    }

    log::info!("{:?} Region Virtual Address: {:p}", kind, page.va);
    log::info!("{:?} Region Physical Addresss: {:#x}", kind, page.pa);
    log::debug!("{:?} revision identifier: {:#x}", kind, revision_id);

    Ok(PhysicalRegion {
        kind,
        page: Some(page),
    })
}

/// Returns the region's page to the allocator. A released handle is left untouched.
///
/// The caller guarantees the processor no longer references the region.
pub(crate) fn free_region<A: PageAllocator + ?Sized>(allocator: &A, region: &mut PhysicalRegion) {
    if let Some(page) = region.page.take() {
        log::info!("Releasing {:?} region at {:#x}", region.kind, page.pa);
        unsafe { allocator.free_page(page) };
    }
}
