//! VMX instruction failure reporting.
//!
//! Every VMX instruction reports its outcome through RFLAGS: CF set means VMfailInvalid
//! (no current VMCS to record an error number in), ZF set means VMfailValid and the
//! error number can be read from the VM-instruction error field of the current VMCS.
//!
//! Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 31.2 CONVENTIONS

use x86::vmx::VmFail;

/// The decoded failure of a single VMX instruction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VmxFailure {
    /// VMfailInvalid (CF = 1).
    Invalid,
    /// VMfailValid (ZF = 1) with the error number, if it could be decoded.
    Valid(Option<VmInstructionError>),
}

impl VmxFailure {
    /// Builds a failure from the `x86` crate status and the raw VM-instruction error field.
    ///
    /// `instruction_error` is only consulted for VMfailValid.
    pub fn new(fail: VmFail, instruction_error: u64) -> Self {
        match fail {
            VmFail::VmFailInvalid => Self::Invalid,
            VmFail::VmFailValid => Self::Valid(VmInstructionError::from_u32(instruction_error as u32)),
        }
    }
}

impl core::fmt::Display for VmxFailure {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Invalid => write!(f, "VMfailInvalid"),
            Self::Valid(Some(error)) => write!(f, "VMfailValid ({})", error),
            Self::Valid(None) => write!(f, "VMfailValid (unknown error number)"),
        }
    }
}

/// Represents the VM instruction error numbers.
///
/// These error numbers correspond to specific errors that can occur when executing VMX instructions.
/// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: 31.4 VM INSTRUCTION ERROR NUMBERS
/// Reference: Intel® 64 and IA-32 Architectures Software Developer's Manual: Table 31-1. VM-Instruction Error Numbers
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VmInstructionError {
    VmcallInRoot = 1,
    VmclearInvalidAddress = 2,
    VmclearWithVmxonPointer = 3,
    VmlaunchNonClearVmcs = 4,
    VmresumeNonLaunchedVmcs = 5,
    VmresumeAfterVmxoff = 6,
    VmEntryInvalidControlFields = 7,
    VmEntryInvalidHostState = 8,
    VmptrldInvalidAddress = 9,
    VmptrldWithVmxonPointer = 10,
    VmptrldIncorrectVmcsRevision = 11,
    VmreadVmwriteUnsupportedVmcsComponent = 12,
    VmwriteReadonlyVmcsComponent = 13,
    VmxonInRoot = 15,
    VmEntryInvalidExecutiveVmcsPointer = 16,
    VmEntryNonLaunchedExecutiveVmcs = 17,
    VmEntryExecutiveVmcsPointerNotVmxonPointer = 18,
    VmcallNonClearVmcs = 19,
    VmcallInvalidVmExitControlFields = 20,
    VmcallIncorrectMsegRevision = 22,
    VmxoffUnderDualMonitorTreatment = 23,
    VmcallInvalidSmmMonitorFeatures = 24,
    VmEntryInvalidVmExecutionControlFieldsExecutiveVmcs = 25,
    VmEntryEventsBlockedByMovSs = 26,
    InvalidOperandToInveptInvvpid = 28,
}

/// Intel® 64 and IA-32 Architectures Software Developer's Manual: 31.4 VM INSTRUCTION ERROR NUMBERS
/// Intel® 64 and IA-32 Architectures Software Developer's Manual: Table 31-1. VM-Instruction Error Numbers
impl VmInstructionError {
    /// Converts a u32 value to the corresponding `VmInstructionError` variant.
    ///
    /// This method helps in interpreting the error numbers provided by VMX instructions.
    pub fn from_u32(value: u32) -> Option<Self> {
        use VmInstructionError::*;
        match value {
            1 => Some(VmcallInRoot),
            2 => Some(VmclearInvalidAddress),
            3 => Some(VmclearWithVmxonPointer),
            4 => Some(VmlaunchNonClearVmcs),
            5 => Some(VmresumeNonLaunchedVmcs),
            6 => Some(VmresumeAfterVmxoff),
            7 => Some(VmEntryInvalidControlFields),
            8 => Some(VmEntryInvalidHostState),
            9 => Some(VmptrldInvalidAddress),
            10 => Some(VmptrldWithVmxonPointer),
            11 => Some(VmptrldIncorrectVmcsRevision),
            12 => Some(VmreadVmwriteUnsupportedVmcsComponent),
            13 => Some(VmwriteReadonlyVmcsComponent),
            15 => Some(VmxonInRoot),
            16 => Some(VmEntryInvalidExecutiveVmcsPointer),
            17 => Some(VmEntryNonLaunchedExecutiveVmcs),
            18 => Some(VmEntryExecutiveVmcsPointerNotVmxonPointer),
            19 => Some(VmcallNonClearVmcs),
            20 => Some(VmcallInvalidVmExitControlFields),
            22 => Some(VmcallIncorrectMsegRevision),
            23 => Some(VmxoffUnderDualMonitorTreatment),
            24 => Some(VmcallInvalidSmmMonitorFeatures),
            25 => Some(VmEntryInvalidVmExecutionControlFieldsExecutiveVmcs),
            26 => Some(VmEntryEventsBlockedByMovSs),
            28 => Some(InvalidOperandToInveptInvvpid),
            _ => None,
        }
    }
}

/// Intel® 64 and IA-32 Architectures Software Developer's Manual: 31.4 VM INSTRUCTION ERROR NUMBERS
/// Intel® 64 and IA-32 Architectures Software Developer's Manual: Table 31-1. VM-Instruction Error Numbers
impl core::fmt::Display for VmInstructionError {
    /// Provides a descriptive string for a `VmInstructionError` variant.
    ///
    /// This implementation aids in debugging by providing a human-readable description of each instruction error.
    #[rustfmt::skip]
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        use VmInstructionError::*;
        let description = match *self {
            VmcallInRoot => "1: VMCALL executed in VMX root operation",
            VmclearInvalidAddress => "2: VMCLEAR with invalid physical address",
            VmclearWithVmxonPointer => "3: VMCLEAR with VMXON pointer",
            VmlaunchNonClearVmcs => "4: VMLAUNCH with non-clear VMCS",
            VmresumeNonLaunchedVmcs => "5: VMRESUME with non-launched VMCS",
            VmresumeAfterVmxoff => "6: VMRESUME after VMXOFF",
            VmEntryInvalidControlFields => "7: VM entry with invalid control field(s)",
            VmEntryInvalidHostState => "8: VM entry with invalid host-state field(s)",
            VmptrldInvalidAddress => "9: VMPTRLD with invalid physical address",
            VmptrldWithVmxonPointer => "10: VMPTRLD with VMXON pointer",
            VmptrldIncorrectVmcsRevision => "11: VMPTRLD with incorrect VMCS revision identifier",
            VmreadVmwriteUnsupportedVmcsComponent => "12: VMREAD/VMWRITE from/to unsupported VMCS component",
            VmwriteReadonlyVmcsComponent => "13: VMWRITE to read-only VMCS component",
            VmxonInRoot => "15: VMXON executed in VMX root operation",
            VmEntryInvalidExecutiveVmcsPointer => "16: VM entry with invalid executive-VMCS pointer",
            VmEntryNonLaunchedExecutiveVmcs => "17: VM entry with non-launched executive VMCS",
            VmEntryExecutiveVmcsPointerNotVmxonPointer => "18: VM entry with executive-VMCS pointer not VMXON pointer",
            VmcallNonClearVmcs => "19: VMCALL with non-clear VMCS",
            VmcallInvalidVmExitControlFields => "20: VMCALL with invalid VM-exit control fields",
            VmcallIncorrectMsegRevision => "22: VMCALL with incorrect MSEG revision identifier",
            VmxoffUnderDualMonitorTreatment => "23: VMXOFF under dual-monitor treatment of SMIs and SMM",
            VmcallInvalidSmmMonitorFeatures => "24: VMCALL with invalid SMM-monitor features",
            VmEntryInvalidVmExecutionControlFieldsExecutiveVmcs => "25: VM entry with invalid VM-execution control fields in executive VMCS",
            VmEntryEventsBlockedByMovSs => "26: VM entry with events blocked by MOV SS.",
            InvalidOperandToInveptInvvpid => "28: Invalid operand to INVEPT/INVVPID.",
        };
        write!(f, "{}", description)
    }
}
