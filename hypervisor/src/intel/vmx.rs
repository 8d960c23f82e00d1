//! This module drives a logical processor into and out of VMX root operation.
//!
//! `Vmx` owns the processor's VMXON region and is the only place it is allocated or released:
//! the region is created right before VMXON and released right after VMXOFF. VMCS regions are
//! handed to the caller as `PhysicalRegion` handles and selected with `load_vmcs`.

use crate::{
    error::HypervisorError,
    intel::{
        capability::has_vmx_support,
        controls,
        processor::{LogicalProcessor, VmxState},
        region::{allocate_region, free_region, PhysicalRegion, RegionKind},
        support::{self, HardwarePort},
        vmerror::VmxFailure,
    },
    utils::{addresses::PhysicalAddress, alloc::PageAllocator},
};

/// Tunables of the enable sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmxConfig {
    /// How many times VMXON is executed before giving up.
    ///
    /// VMXON has been seen to fail on a first attempt and succeed on the next with no change
    /// in state; the cause is not known. Values below 1 are treated as 1.
    pub vmxon_attempts: u32,
}

impl VmxConfig {
    pub const DEFAULT_VMXON_ATTEMPTS: u32 = 2;

    fn attempts(&self) -> u32 {
        self.vmxon_attempts.max(1)
    }
}

impl Default for VmxConfig {
    fn default() -> Self {
        Self {
            vmxon_attempts: Self::DEFAULT_VMXON_ATTEMPTS,
        }
    }
}

/// Proof of a successful `enable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmxSession {
    /// Physical address of the VMXON region the processor entered root operation with.
    pub vmxon_region: PhysicalAddress,
    /// VMXON executions it took, at most `VmxConfig::vmxon_attempts`.
    pub attempts: u32,
}

/// VMX operation controller for one logical processor.
///
/// The caller must keep the executing thread on the same processor from `enable` to `disable`.
pub struct Vmx<'a, P: HardwarePort + ?Sized, A: PageAllocator + ?Sized> {
    port: &'a P,
    allocator: &'a A,
    config: VmxConfig,
    processor: LogicalProcessor,
    vmxon_region: Option<PhysicalRegion>,
}

impl<'a, P: HardwarePort + ?Sized, A: PageAllocator + ?Sized> Vmx<'a, P, A> {
    pub fn new(port: &'a P, allocator: &'a A) -> Self {
        Self::with_config(port, allocator, VmxConfig::default())
    }

    pub fn with_config(port: &'a P, allocator: &'a A, config: VmxConfig) -> Self {
        Self {
            port,
            allocator,
            config,
            processor: LogicalProcessor::new(),
            vmxon_region: None,
        }
    }

    pub fn config(&self) -> &VmxConfig {
        &self.config
    }

    pub fn processor(&self) -> &LogicalProcessor {
        &self.processor
    }

    pub fn state(&self) -> VmxState {
        self.processor.state
    }

    /// Enters VMX root operation.
    ///
    /// Detection, control register conditioning, VMXON region allocation and VMXON run in that
    /// order. On any failure the processor is left outside VMX operation with no region
    /// allocated.
    pub fn enable(&mut self) -> Result<VmxSession, HypervisorError> {
        if self.processor.is_root_operation() {
            return Err(HypervisorError::VMXAlreadyEnabled);
        }

        /* Intel® 64 and IA-32 Architectures Software Developer's Manual: 24.6 DISCOVERING SUPPORT FOR VMX */
        if !has_vmx_support(self.port) {
            log::error!("Virtual Machine Extension (VMX) technology is not supported");
            return Err(HypervisorError::VMXUnsupported);
        }
        log::info!("Virtual Machine Extension (VMX) technology is supported");

        self.processor.reset();

        /* Intel® 64 and IA-32 Architectures Software Developer's Manual: 24.7 ENABLING AND ENTERING VMX OPERATION */
        if let Err(error) = controls::condition(self.port, &mut self.processor) {
            controls::restore_vmx_bit(self.port, &mut self.processor);
            return Err(error);
        }

        log::info!("Setting up VMXON region");
        let mut vmxon_region =
            match allocate_region(self.port, self.allocator, RegionKind::Vmxon) {
                Ok(region) => region,
                Err(error) => {
                    controls::restore_vmx_bit(self.port, &mut self.processor);
                    return Err(error);
                }
            };

        let entered = match vmxon_region.pa() {
            Some(pa) => self.enter_root_operation(pa).map(|attempts| (pa, attempts)),
            None => Err(HypervisorError::InvalidRegion),
        };

        match entered {
            Ok((vmxon_region_physical_address, attempts)) => {
                self.processor.state = VmxState::RootOperation;
                self.vmxon_region = Some(vmxon_region);
                log::info!("VMXON successful!");

                Ok(VmxSession {
                    vmxon_region: vmxon_region_physical_address,
                    attempts,
                })
            }
            Err(error) => {
                free_region(self.allocator, &mut vmxon_region);
                controls::restore_vmx_bit(self.port, &mut self.processor);
                Err(error)
            }
        }
    }

    /// Executes VMXON until it succeeds or the configured attempts are used up, returning the
    /// number of executions.
    fn enter_root_operation(&self, vmxon_region: PhysicalAddress) -> Result<u32, HypervisorError> {
        let attempts = self.config.attempts();
        let mut reason = VmxFailure::Invalid;

        for attempt in 1..=attempts {
            match support::vmxon(self.port, vmxon_region) {
                Ok(()) => return Ok(attempt),
                Err(failure) => {
                    log::warn!("VMXON attempt {}/{} failed: {}", attempt, attempts, failure);
                    reason = failure;
                }
            }
        }

        log::error!("VMXON failed after {} attempt(s)", attempts);
        Err(HypervisorError::VMXONFailed { attempts, reason })
    }

    /// Leaves VMX root operation and releases the VMXON region.
    ///
    /// Every active VMCS is cleared first. Does nothing when the processor is not in root
    /// operation. If VMCLEAR or VMXOFF fails the processor stays in root operation and keeps its
    /// VMXON region.
    pub fn disable(&mut self) -> Result<(), HypervisorError> {
        if !self.processor.is_root_operation() {
            return Ok(());
        }

        // VMXOFF does not write back VMCS data the processor still caches.
        while let Some(&vmcs_region) = self.processor.active_vmcs.first() {
            self.clear_address(vmcs_region)?;
        }

        log::info!("Executing VMXOFF");
        support::vmxoff(self.port)?;

        self.processor.state = VmxState::Disabled;

        if let Some(mut vmxon_region) = self.vmxon_region.take() {
            free_region(self.allocator, &mut vmxon_region);
        }

        controls::restore_vmx_bit(self.port, &mut self.processor);
        log::info!("VMXOFF successful!");

        Ok(())
    }

    /// Allocates a revision-stamped VMCS region.
    ///
    /// The region must be given back through `free_vmcs`; a handle that is simply dropped leaks
    /// its page.
    pub fn allocate_vmcs(&self) -> Result<PhysicalRegion, HypervisorError> {
        log::info!("Setting up VMCS region");
        allocate_region(self.port, self.allocator, RegionKind::Vmcs)
    }

    /// Releases a VMCS region, clearing it first if VMPTRLD ever made it active.
    ///
    /// Freeing an already released handle does nothing.
    pub fn free_vmcs(&mut self, vmcs_region: &mut PhysicalRegion) -> Result<(), HypervisorError> {
        if vmcs_region.kind() != RegionKind::Vmcs {
            return Err(HypervisorError::InvalidRegion);
        }

        let Some(pa) = vmcs_region.pa() else {
            return Ok(());
        };

        if self.processor.is_vmcs_active(pa) {
            self.clear_vmcs(vmcs_region)?;
        }

        free_region(self.allocator, vmcs_region);
        Ok(())
    }

    /// Makes `vmcs_region` the current VMCS.
    pub fn load_vmcs(&mut self, vmcs_region: &PhysicalRegion) -> Result<(), HypervisorError> {
        let pa = self.vmcs_address(vmcs_region)?;

        support::vmptrld(self.port, pa)?;
        self.processor.activate_vmcs(pa);
        log::info!("VMPTRLD successful!");

        Ok(())
    }

    /// Flushes `vmcs_region` to memory and marks it clear. It stops being current if it was.
    pub fn clear_vmcs(&mut self, vmcs_region: &PhysicalRegion) -> Result<(), HypervisorError> {
        let pa = self.vmcs_address(vmcs_region)?;
        self.clear_address(pa)
    }

    fn clear_address(&mut self, vmcs_region: PhysicalAddress) -> Result<(), HypervisorError> {
        support::vmclear(self.port, vmcs_region)?;
        self.processor.deactivate_vmcs(vmcs_region);
        log::info!("VMCLEAR successful!");

        Ok(())
    }

    /// Physical address of the current VMCS, if any.
    pub fn current_vmcs(&self) -> Option<PhysicalAddress> {
        self.processor.current_vmcs
    }

    /// Reads a field of the current VMCS.
    pub fn read_field(&self, field: u32) -> Result<u64, HypervisorError> {
        self.require_current_vmcs()?;
        support::vmread(self.port, field)
    }

    /// Reads a field of the current VMCS, yielding zero on any failure.
    pub fn read_field_lenient(&self, field: u32) -> u64 {
        match self.require_current_vmcs() {
            Ok(()) => support::vmreadz(self.port, field),
            Err(_) => 0,
        }
    }

    /// Writes a field of the current VMCS.
    pub fn write_field(&self, field: u32, value: u64) -> Result<(), HypervisorError> {
        self.require_current_vmcs()?;
        support::vmwrite(self.port, field, value)
    }

    fn vmcs_address(&self, vmcs_region: &PhysicalRegion) -> Result<PhysicalAddress, HypervisorError> {
        if !self.processor.is_root_operation() {
            return Err(HypervisorError::VMXNotEnabled);
        }

        match (vmcs_region.kind(), vmcs_region.pa()) {
            (RegionKind::Vmcs, Some(pa)) => Ok(pa),
            _ => Err(HypervisorError::InvalidRegion),
        }
    }

    fn require_current_vmcs(&self) -> Result<(), HypervisorError> {
        if !self.processor.is_root_operation() {
            return Err(HypervisorError::VMXNotEnabled);
        }

        match self.processor.current_vmcs {
            Some(_) => Ok(()),
            None => Err(HypervisorError::NoCurrentVmcs),
        }
    }
}
