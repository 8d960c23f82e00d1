//! Discovering support for VMX and the values VMX regions depend on.
//!
//! Nothing here is cached: the answers belong to the processor executing the call and are
//! read again on every sequence.
//!
//! Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 24.6 DISCOVERING SUPPORT FOR VMX

use {
    crate::intel::support::HardwarePort,
    bit_field::BitField,
    x86::msr,
};

const CPUID_FEATURE_INFORMATION: u32 = 0x1;
const CPUID_EXTENDED_FUNCTION_MAX: u32 = 0x8000_0000;
const CPUID_ADDRESS_SIZES: u32 = 0x8000_0008;

/// Width assumed when CPUID does not report one.
const DEFAULT_PHYSICAL_ADDRESS_WIDTH: u8 = 36;

/// IA32_VMX_BASIC\[48]: VMXON, VMCS and referenced structures are limited to 32-bit addresses.
const VMX_BASIC_PHYSICAL_ADDRESS_32BIT: usize = 48;

/// Check processor supports for Virtual Machine Extension (VMX) technology - CPUID.1:ECX.VMX\[bit 5] = 1
pub fn has_vmx_support<P: HardwarePort + ?Sized>(port: &P) -> bool {
    port.cpuid(CPUID_FEATURE_INFORMATION, 0).ecx.get_bit(5)
}

/// Get the Virtual Machine Control Structure revision identifier (VMCS revision ID).
///
/// Bits 30:0 of IA32_VMX_BASIC, bit 31 clear.
pub fn vmcs_revision_id<P: HardwarePort + ?Sized>(port: &P) -> u32 {
    (port.read_msr(msr::IA32_VMX_BASIC) as u32).get_bits(0..31)
}

/// Number of physical-address bits a VMXON or VMCS pointer may use.
pub fn physical_address_width<P: HardwarePort + ?Sized>(port: &P) -> u8 {
    if port
        .read_msr(msr::IA32_VMX_BASIC)
        .get_bit(VMX_BASIC_PHYSICAL_ADDRESS_32BIT)
    {
        return 32;
    }

    if port.cpuid(CPUID_EXTENDED_FUNCTION_MAX, 0).eax < CPUID_ADDRESS_SIZES {
        return DEFAULT_PHYSICAL_ADDRESS_WIDTH;
    }

    port.cpuid(CPUID_ADDRESS_SIZES, 0).eax.get_bits(0..8) as u8
}
