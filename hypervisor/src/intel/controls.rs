//! Module for conditioning the processor before VMXON.
//!
//! VMXON requires CR4.VMXE set, IA32_FEATURE_CONTROL locked with VMXON outside SMX allowed,
//! and CR0/CR4 holding the values IA32_VMX_CRx_FIXED0/1 mandate. Every value is read from the
//! hardware when it is needed, since firmware may have locked it until the next reset.
//!
//! Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual:
//! - 24.7 ENABLING AND ENTERING VMX OPERATION
//! - 24.8 RESTRICTIONS ON VMX OPERATION

use {
    crate::{
        error::HypervisorError,
        intel::{processor::LogicalProcessor, support::HardwarePort},
    },
    bit_field::BitField,
    bitflags::bitflags,
    x86::msr,
};

/// CR4.VMXE
pub const CR4_VMX_ENABLE_BIT: usize = 13;

bitflags! {
    /// IA32_FEATURE_CONTROL (0x3A) bits relevant to VMX.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FeatureControl: u64 {
        const LOCKED = 1 << 0;
        const VMXON_INSIDE_SMX = 1 << 1;
        const VMXON_OUTSIDE_SMX = 1 << 2;
    }
}

/// Control registers with VMX fixed bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRegister {
    Cr0,
    Cr4,
}

impl ControlRegister {
    fn read<P: HardwarePort + ?Sized>(self, port: &P) -> u64 {
        match self {
            ControlRegister::Cr0 => port.read_cr0(),
            ControlRegister::Cr4 => port.read_cr4(),
        }
    }

    fn write<P: HardwarePort + ?Sized>(self, port: &P, value: u64) {
        match self {
            ControlRegister::Cr0 => port.write_cr0(value),
            ControlRegister::Cr4 => port.write_cr4(value),
        }
    }

    /// The (FIXED0, FIXED1) MSR pair of this register.
    fn fixed_msrs(self) -> (u32, u32) {
        match self {
            ControlRegister::Cr0 => (msr::IA32_VMX_CR0_FIXED0, msr::IA32_VMX_CR0_FIXED1),
            ControlRegister::Cr4 => (msr::IA32_VMX_CR4_FIXED0, msr::IA32_VMX_CR4_FIXED1),
        }
    }
}

/// Runs the three conditioning steps in order, stopping at the first failure.
pub fn condition<P: HardwarePort + ?Sized>(
    port: &P,
    processor: &mut LogicalProcessor,
) -> Result<(), HypervisorError> {
    log::info!("Enabling Virtual Machine Extensions (VMX)");
    enable_vmx_bit(port, processor);

    log::info!("Setting Lock Bit set via IA32_FEATURE_CONTROL");
    set_lock_bit(port)?;

    log::info!("Adjusting Control Registers");
    processor.cr0 = Some(adjust_control_register(port, ControlRegister::Cr0));
    processor.cr4 = Some(adjust_control_register(port, ControlRegister::Cr4));

    Ok(())
}

/// Sets CR4.VMXE, remembering whether it already was.
pub fn enable_vmx_bit<P: HardwarePort + ?Sized>(port: &P, processor: &mut LogicalProcessor) {
    let mut cr4 = port.read_cr4();

    // Only the first pass of a sequence sees the value from before VMX.
    if processor.vmxe_was_set.is_none() {
        processor.vmxe_was_set = Some(cr4.get_bit(CR4_VMX_ENABLE_BIT));
    }

    cr4.set_bit(CR4_VMX_ENABLE_BIT, true);
    port.write_cr4(cr4);
    processor.cr4 = Some(cr4);
}

/// Clears CR4.VMXE again if it was clear before `enable_vmx_bit`.
///
/// Must not be called while in VMX operation: clearing CR4.VMXE then raises #GP.
pub fn restore_vmx_bit<P: HardwarePort + ?Sized>(port: &P, processor: &mut LogicalProcessor) {
    if processor.vmxe_was_set.take() != Some(false) {
        return;
    }

    let mut cr4 = port.read_cr4();
    cr4.set_bit(CR4_VMX_ENABLE_BIT, false);
    port.write_cr4(cr4);
    processor.cr4 = Some(cr4);
    log::debug!("CR4.VMXE cleared");
}

/// Makes IA32_FEATURE_CONTROL allow VMXON outside SMX and locks it.
///
/// A register that already has both bits is left alone. A locked register without VMXON
/// outside SMX cannot be written until the next power-on reset.
pub fn set_lock_bit<P: HardwarePort + ?Sized>(port: &P) -> Result<(), HypervisorError> {
    let required = FeatureControl::LOCKED | FeatureControl::VMXON_OUTSIDE_SMX;

    let raw = port.read_msr(msr::IA32_FEATURE_CONTROL);
    let ia32_feature_control = FeatureControl::from_bits_retain(raw);

    if ia32_feature_control.contains(required) {
        return Ok(());
    }

    if ia32_feature_control.contains(FeatureControl::LOCKED) {
        log::error!("IA32_FEATURE_CONTROL locked as {:#x}", raw);
        return Err(HypervisorError::VMXBIOSLock);
    }

    log::debug!(
        "IA32_FEATURE_CONTROL {:#x} -> {:#x}",
        raw,
        (ia32_feature_control | required).bits()
    );
    port.write_msr(msr::IA32_FEATURE_CONTROL, (ia32_feature_control | required).bits());

    Ok(())
}

/// Clears the bits FIXED1 forbids, then sets the bits FIXED0 requires, and writes the result.
pub fn adjust_control_register<P: HardwarePort + ?Sized>(
    port: &P,
    register: ControlRegister,
) -> u64 {
    let (fixed0_msr, fixed1_msr) = register.fixed_msrs();
    let fixed0 = port.read_msr(fixed0_msr);
    let fixed1 = port.read_msr(fixed1_msr);

    let mut value = register.read(port);
    value &= fixed1;
    value |= fixed0;

    register.write(port, value);
    log::debug!("{:?} adjusted to {:#x}", register, value);

    value
}
