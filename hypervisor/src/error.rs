use {crate::intel::vmerror::VmxFailure, thiserror_no_std::Error};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HypervisorError {
    #[error("VMX is not supported")]
    VMXUnsupported,
    #[error("VMX locked off in BIOS")]
    VMXBIOSLock,
    #[error("Failed allocate memory via PageAllocator")]
    MemoryAllocationFailed,
    #[error("Physical address {0:#x} cannot back a VMX region")]
    InvalidPhysicalAddress(u64),
    #[error("Region handle is released or of the wrong kind")]
    InvalidRegion,
    #[error("VMX operation is not enabled on this processor")]
    VMXNotEnabled,
    #[error("VMX operation is already enabled on this processor")]
    VMXAlreadyEnabled,
    #[error("No current VMCS is loaded")]
    NoCurrentVmcs,
    #[error("Failed to execute VMXON after {attempts} attempt(s): {reason}")]
    VMXONFailed { attempts: u32, reason: VmxFailure },
    #[error("Failed to execute VMXOFF: {0}")]
    VMXOFFFailed(VmxFailure),
    #[error("Failed to execute VMPTRLD: {0}")]
    VMPTRLDFailed(VmxFailure),
    #[error("Failed to execute VMCLEAR: {0}")]
    VMCLEARFailed(VmxFailure),
    #[error("Failed to execute VMREAD on field {field:#x}: {reason}")]
    VMREADFailed { field: u32, reason: VmxFailure },
    #[error("Failed to execute VMWRITE on field {field:#x}: {reason}")]
    VMWRITEFailed { field: u32, reason: VmxFailure },
}

impl HypervisorError {
    /// Whether a later call may succeed without a reset of the processor.
    ///
    /// `VMXBIOSLock` in particular persists until the next power-on reset.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HypervisorError::VMXONFailed { .. } | HypervisorError::MemoryAllocationFailed
        )
    }
}
