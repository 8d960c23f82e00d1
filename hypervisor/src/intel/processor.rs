//! Per-processor VMX state.

use {crate::utils::addresses::PhysicalAddress, alloc::vec::Vec};

/// Whether the logical processor is in VMX root operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum VmxState {
    #[default]
    Disabled,
    RootOperation,
}

/// What the hypervisor knows about the logical processor it is running on.
///
/// Rebuilt from hardware on every enable sequence, never shared between processors.
#[derive(Debug, Default, Clone)]
pub struct LogicalProcessor {
    pub state: VmxState,

    /// CR0 as last written by the control register conditioning.
    pub cr0: Option<u64>,

    /// CR4 as last written by the control register conditioning.
    pub cr4: Option<u64>,

    /// CR4.VMXE as found before conditioning set it.
    pub vmxe_was_set: Option<bool>,

    /// Physical address of the current VMCS.
    pub current_vmcs: Option<PhysicalAddress>,

    /// Every VMCS launched into the active state by VMPTRLD and not yet cleared, the current
    /// one included. The processor may keep any of them cached until VMCLEAR.
    pub active_vmcs: Vec<PhysicalAddress>,
}

impl LogicalProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_root_operation(&self) -> bool {
        self.state == VmxState::RootOperation
    }

    pub fn is_vmcs_active(&self, vmcs_region: PhysicalAddress) -> bool {
        self.active_vmcs.contains(&vmcs_region)
    }

    /// Records a successful VMPTRLD.
    pub(crate) fn activate_vmcs(&mut self, vmcs_region: PhysicalAddress) {
        if !self.is_vmcs_active(vmcs_region) {
            self.active_vmcs.push(vmcs_region);
        }
        self.current_vmcs = Some(vmcs_region);
    }

    /// Records a successful VMCLEAR.
    pub(crate) fn deactivate_vmcs(&mut self, vmcs_region: PhysicalAddress) {
        self.active_vmcs.retain(|&pa| pa != vmcs_region);
        if self.current_vmcs == Some(vmcs_region) {
            self.current_vmcs = None;
        }
    }

    /// Forget everything learned during the last sequence.
    pub(crate) fn reset(&mut self) {
        *self = Self::default();
    }
}
