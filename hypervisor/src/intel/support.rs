//! The hardware boundary: every privileged instruction the hypervisor executes goes through
//! a `HardwarePort`, and the VMX instruction wrappers below translate the RFLAGS-encoded
//! outcome of each instruction into a typed error.

use {
    crate::{
        error::HypervisorError,
        intel::vmerror::VmxFailure,
        utils::addresses::PhysicalAddress,
    },
    x86::{
        cpuid::CpuIdResult,
        vmx::{vmcs::ro, VmFail},
    },
};

#[cfg(target_arch = "x86_64")]
use core::arch::asm;

/// Privileged instructions of the logical processor the caller is pinned to.
///
/// Control registers and MSRs are core-local: the caller must not migrate to another
/// processor between calls belonging to one sequence.
pub trait HardwarePort {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuIdResult;

    fn read_msr(&self, msr: u32) -> u64;
    fn write_msr(&self, msr: u32, value: u64);

    fn read_cr0(&self) -> u64;
    fn write_cr0(&self, value: u64);
    fn read_cr4(&self) -> u64;
    fn write_cr4(&self, value: u64);

    fn vmxon(&self, vmxon_region: u64) -> Result<(), VmFail>;
    fn vmxoff(&self) -> Result<(), VmFail>;
    fn vmptrld(&self, vmcs_region: u64) -> Result<(), VmFail>;
    fn vmclear(&self, vmcs_region: u64) -> Result<(), VmFail>;
    fn vmread(&self, field: u32) -> Result<u64, VmFail>;
    fn vmwrite(&self, field: u32, value: u64) -> Result<(), VmFail>;
}

/// The processor the code is executing on, accessed through the `x86` crate.
#[cfg(target_arch = "x86_64")]
pub struct X86Port;

#[cfg(target_arch = "x86_64")]
impl HardwarePort for X86Port {
    fn cpuid(&self, leaf: u32, subleaf: u32) -> CpuIdResult {
        x86::cpuid::native_cpuid::cpuid_count(leaf, subleaf)
    }

    fn read_msr(&self, msr: u32) -> u64 {
        unsafe { x86::msr::rdmsr(msr) }
    }

    fn write_msr(&self, msr: u32, value: u64) {
        unsafe { x86::msr::wrmsr(msr, value) }
    }

    // `x86::controlregs` goes through `Cr0`/`Cr4` flags and drops bits they do not name
    // (CR4.CET, CR4.PKS, ...), so the registers are moved as raw values.
    fn read_cr0(&self) -> u64 {
        let value: u64;
        unsafe { asm!("mov {}, cr0", out(reg) value, options(nomem, nostack, preserves_flags)) };
        value
    }

    fn write_cr0(&self, value: u64) {
        unsafe { asm!("mov cr0, {}", in(reg) value, options(nostack, preserves_flags)) };
    }

    fn read_cr4(&self) -> u64 {
        let value: u64;
        unsafe { asm!("mov {}, cr4", out(reg) value, options(nomem, nostack, preserves_flags)) };
        value
    }

    fn write_cr4(&self, value: u64) {
        unsafe { asm!("mov cr4, {}", in(reg) value, options(nostack, preserves_flags)) };
    }

    fn vmxon(&self, vmxon_region: u64) -> Result<(), VmFail> {
        unsafe { x86::bits64::vmx::vmxon(vmxon_region) }
    }

    fn vmxoff(&self) -> Result<(), VmFail> {
        unsafe { x86::bits64::vmx::vmxoff() }
    }

    fn vmptrld(&self, vmcs_region: u64) -> Result<(), VmFail> {
        unsafe { x86::bits64::vmx::vmptrld(vmcs_region) }
    }

    fn vmclear(&self, vmcs_region: u64) -> Result<(), VmFail> {
        unsafe { x86::bits64::vmx::vmclear(vmcs_region) }
    }

    fn vmread(&self, field: u32) -> Result<u64, VmFail> {
        unsafe { x86::bits64::vmx::vmread(field) }
    }

    fn vmwrite(&self, field: u32, value: u64) -> Result<(), VmFail> {
        unsafe { x86::bits64::vmx::vmwrite(field, value) }
    }
}

/// Decodes a failed VMX instruction, fetching the error number for VMfailValid.
fn failure<P: HardwarePort + ?Sized>(port: &P, fail: VmFail) -> VmxFailure {
    let instruction_error = match &fail {
        VmFail::VmFailValid => port.vmread(ro::VM_INSTRUCTION_ERROR).unwrap_or(0),
        VmFail::VmFailInvalid => 0,
    };
    VmxFailure::new(fail, instruction_error)
}

/// Enable VMX operation.
pub fn vmxon<P: HardwarePort + ?Sized>(
    port: &P,
    vmxon_region: PhysicalAddress,
) -> Result<(), VmxFailure> {
    port.vmxon(vmxon_region.pa()).map_err(|e| failure(port, e))
}

/// Disable VMX operation.
pub fn vmxoff<P: HardwarePort + ?Sized>(port: &P) -> Result<(), HypervisorError> {
    port.vmxoff()
        .map_err(|e| HypervisorError::VMXOFFFailed(failure(port, e)))
}

/// Clear VMCS.
pub fn vmclear<P: HardwarePort + ?Sized>(
    port: &P,
    vmcs_region: PhysicalAddress,
) -> Result<(), HypervisorError> {
    port.vmclear(vmcs_region.pa())
        .map_err(|e| HypervisorError::VMCLEARFailed(failure(port, e)))
}

/// Load current VMCS pointer.
pub fn vmptrld<P: HardwarePort + ?Sized>(
    port: &P,
    vmcs_region: PhysicalAddress,
) -> Result<(), HypervisorError> {
    port.vmptrld(vmcs_region.pa())
        .map_err(|e| HypervisorError::VMPTRLDFailed(failure(port, e)))
}

/// Read a specified field from the current VMCS.
pub fn vmread<P: HardwarePort + ?Sized>(port: &P, field: u32) -> Result<u64, HypervisorError> {
    port.vmread(field).map_err(|e| HypervisorError::VMREADFailed {
        field,
        reason: failure(port, e),
    })
}

/// Read a specified field from the current VMCS, yielding zero if the read fails.
pub fn vmreadz<P: HardwarePort + ?Sized>(port: &P, field: u32) -> u64 {
    port.vmread(field).unwrap_or(0)
}

/// Write to a specified field in the current VMCS.
pub fn vmwrite<P: HardwarePort + ?Sized, T: Into<u64>>(
    port: &P,
    field: u32,
    val: T,
) -> Result<(), HypervisorError> {
    port.vmwrite(field, val.into())
        .map_err(|e| HypervisorError::VMWRITEFailed {
            field,
            reason: failure(port, e),
        })
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{intel::vmerror::VmInstructionError, testing::MockPort},
    };

    #[test]
    fn vmfail_invalid_does_not_read_error_field() {
        let port = MockPort::new();
        port.fail_vmptrld(VmFail::VmFailInvalid);

        let result = vmptrld(&port, PhysicalAddress::from_pa(0x1000));

        assert_eq!(
            result,
            Err(HypervisorError::VMPTRLDFailed(VmxFailure::Invalid))
        );
        assert_eq!(port.vmread_count(), 0);
    }

    #[test]
    fn vmfail_valid_reports_instruction_error() {
        let port = MockPort::new();
        port.set_field(ro::VM_INSTRUCTION_ERROR, 13);
        port.fail_vmwrite(VmFail::VmFailValid);

        let result = vmwrite(&port, 0x6800, 0u64);

        assert_eq!(
            result,
            Err(HypervisorError::VMWRITEFailed {
                field: 0x6800,
                reason: VmxFailure::Valid(Some(VmInstructionError::VmwriteReadonlyVmcsComponent)),
            })
        );
    }

    #[test]
    fn lenient_read_yields_zero() {
        let port = MockPort::new();
        port.set_field(0x681e, 0xfffff800_00001000);
        assert_eq!(vmreadz(&port, 0x681e), 0xfffff800_00001000);

        port.fail_vmread(VmFail::VmFailInvalid);
        assert_eq!(vmreadz(&port, 0x681e), 0);
    }
}
