//! Scriptable stand-ins for the processor and the page allocator.

use {
    crate::{
        intel::support::HardwarePort,
        utils::{
            addresses::PhysicalAddress,
            alloc::{PageAllocator, PhysicalPage},
        },
    },
    std::{
        alloc::{alloc_zeroed, dealloc, Layout},
        cell::{Cell, RefCell},
        collections::BTreeMap,
        ptr::NonNull,
    },
    x86::{cpuid::CpuIdResult, msr, vmx::VmFail},
};

const PAGE_SIZE: usize = 0x1000;

/// VMX instructions in the order the mock executed them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Vmxon,
    Vmxoff,
    Vmptrld,
    Vmclear,
    Vmread,
    Vmwrite,
}

/// A scripted failure, `true` for VMfailValid.
type Failure = Option<bool>;

fn vm_fail(valid: bool) -> VmFail {
    if valid {
        VmFail::VmFailValid
    } else {
        VmFail::VmFailInvalid
    }
}

fn is_valid(fail: VmFail) -> bool {
    matches!(fail, VmFail::VmFailValid)
}

struct State {
    vmx_supported: bool,
    physical_address_width: Option<u8>,
    msrs: BTreeMap<u32, u64>,
    msr_writes: Vec<(u32, u64)>,
    cr0: u64,
    cr4: u64,
    cr_writes: usize,
    vmxon_failures: u32,
    vmxon_operands: Vec<u64>,
    vmclear_operands: Vec<u64>,
    vmxoff_failure: Failure,
    vmptrld_failure: Failure,
    vmclear_failure: Failure,
    vmread_failure: Failure,
    vmwrite_failure: Failure,
    fields: BTreeMap<u32, u64>,
    vmread_count: usize,
    instructions: Vec<Instruction>,
}

/// A VMX-capable processor with firmware that locked IA32_FEATURE_CONTROL correctly.
pub struct MockPort {
    state: RefCell<State>,
}

impl MockPort {
    pub fn new() -> Self {
        let msrs = BTreeMap::from([
            (msr::IA32_FEATURE_CONTROL, 0b101),
            (msr::IA32_VMX_BASIC, 0x00da_1000_0000_0004),
            (msr::IA32_VMX_CR0_FIXED0, 0x8000_0021),
            (msr::IA32_VMX_CR0_FIXED1, 0xffff_ffff),
            (msr::IA32_VMX_CR4_FIXED0, 0x2000),
            (msr::IA32_VMX_CR4_FIXED1, 0x3767ff),
        ]);

        Self {
            state: RefCell::new(State {
                vmx_supported: true,
                physical_address_width: Some(48),
                msrs,
                msr_writes: Vec::new(),
                cr0: 0x8005_0033,
                cr4: 0x06f8,
                cr_writes: 0,
                vmxon_failures: 0,
                vmxon_operands: Vec::new(),
                vmclear_operands: Vec::new(),
                vmxoff_failure: None,
                vmptrld_failure: None,
                vmclear_failure: None,
                vmread_failure: None,
                vmwrite_failure: None,
                fields: BTreeMap::new(),
                vmread_count: 0,
                instructions: Vec::new(),
            }),
        }
    }

    pub fn set_vmx_supported(&self, supported: bool) {
        self.state.borrow_mut().vmx_supported = supported;
    }

    /// `None` hides CPUID leaf 0x8000_0008.
    pub fn set_physical_address_width(&self, width: Option<u8>) {
        self.state.borrow_mut().physical_address_width = width;
    }

    pub fn set_msr(&self, msr: u32, value: u64) {
        self.state.borrow_mut().msrs.insert(msr, value);
    }

    pub fn msr(&self, msr: u32) -> u64 {
        self.state.borrow().msrs.get(&msr).copied().unwrap_or(0)
    }

    pub fn msr_writes(&self) -> Vec<(u32, u64)> {
        self.state.borrow().msr_writes.clone()
    }

    pub fn set_cr0(&self, value: u64) {
        self.state.borrow_mut().cr0 = value;
    }

    pub fn set_cr4(&self, value: u64) {
        self.state.borrow_mut().cr4 = value;
    }

    pub fn cr0(&self) -> u64 {
        self.state.borrow().cr0
    }

    pub fn cr4(&self) -> u64 {
        self.state.borrow().cr4
    }

    pub fn cr_writes(&self) -> usize {
        self.state.borrow().cr_writes
    }

    /// The next `count` VMXON executions fail with VMfailInvalid.
    pub fn fail_vmxon(&self, count: u32) {
        self.state.borrow_mut().vmxon_failures = count;
    }

    pub fn fail_vmxoff(&self, fail: VmFail) {
        self.state.borrow_mut().vmxoff_failure = Some(is_valid(fail));
    }

    pub fn fail_vmptrld(&self, fail: VmFail) {
        self.state.borrow_mut().vmptrld_failure = Some(is_valid(fail));
    }

    pub fn fail_vmptrld_clear(&self) {
        self.state.borrow_mut().vmptrld_failure = None;
    }

    pub fn fail_vmclear(&self, fail: Option<VmFail>) {
        self.state.borrow_mut().vmclear_failure = fail.map(is_valid);
    }

    pub fn fail_vmread(&self, fail: VmFail) {
        self.state.borrow_mut().vmread_failure = Some(is_valid(fail));
    }

    pub fn fail_vmwrite(&self, fail: VmFail) {
        self.state.borrow_mut().vmwrite_failure = Some(is_valid(fail));
    }

    pub fn set_field(&self, field: u32, value: u64) {
        self.state.borrow_mut().fields.insert(field, value);
    }

    pub fn vmxon_operands(&self) -> Vec<u64> {
        self.state.borrow().vmxon_operands.clone()
    }

    pub fn vmclear_operands(&self) -> Vec<u64> {
        self.state.borrow().vmclear_operands.clone()
    }

    pub fn vmread_count(&self) -> usize {
        self.state.borrow().vmread_count
    }

    pub fn instructions(&self) -> Vec<Instruction> {
        self.state.borrow().instructions.clone()
    }

    fn execute(&self, instruction: Instruction, failure: Failure) -> Result<(), VmFail> {
        self.state.borrow_mut().instructions.push(instruction);
        match failure {
            Some(valid) => Err(vm_fail(valid)),
            None => Ok(()),
        }
    }
}

impl HardwarePort for MockPort {
    fn cpuid(&self, leaf: u32, _subleaf: u32) -> CpuIdResult {
        let state = self.state.borrow();
        let (eax, ecx) = match leaf {
            0x1 => (0, if state.vmx_supported { 1 << 5 } else { 0 }),
            0x8000_0000 => match state.physical_address_width {
                Some(_) => (0x8000_0008, 0),
                None => (0x8000_0004, 0),
            },
            0x8000_0008 => (
                u32::from(state.physical_address_width.unwrap_or(0)) | (48 << 8),
                0,
            ),
            _ => (0, 0),
        };

        CpuIdResult {
            eax,
            ebx: 0,
            ecx,
            edx: 0,
        }
    }

    fn read_msr(&self, msr: u32) -> u64 {
        self.msr(msr)
    }

    fn write_msr(&self, msr: u32, value: u64) {
        let mut state = self.state.borrow_mut();
        state.msrs.insert(msr, value);
        state.msr_writes.push((msr, value));
    }

    fn read_cr0(&self) -> u64 {
        self.cr0()
    }

    fn write_cr0(&self, value: u64) {
        let mut state = self.state.borrow_mut();
        state.cr0 = value;
        state.cr_writes += 1;
    }

    fn read_cr4(&self) -> u64 {
        self.cr4()
    }

    fn write_cr4(&self, value: u64) {
        let mut state = self.state.borrow_mut();
        state.cr4 = value;
        state.cr_writes += 1;
    }

    fn vmxon(&self, vmxon_region: u64) -> Result<(), VmFail> {
        let failure = {
            let mut state = self.state.borrow_mut();
            state.vmxon_operands.push(vmxon_region);
            if state.vmxon_failures > 0 {
                state.vmxon_failures -= 1;
                Some(false)
            } else {
                None
            }
        };
        self.execute(Instruction::Vmxon, failure)
    }

    fn vmxoff(&self) -> Result<(), VmFail> {
        let failure = self.state.borrow().vmxoff_failure;
        self.execute(Instruction::Vmxoff, failure)
    }

    fn vmptrld(&self, _vmcs_region: u64) -> Result<(), VmFail> {
        let failure = self.state.borrow().vmptrld_failure;
        self.execute(Instruction::Vmptrld, failure)
    }

    fn vmclear(&self, vmcs_region: u64) -> Result<(), VmFail> {
        let failure = {
            let mut state = self.state.borrow_mut();
            state.vmclear_operands.push(vmcs_region);
            state.vmclear_failure
        };
        self.execute(Instruction::Vmclear, failure)
    }

    fn vmread(&self, field: u32) -> Result<u64, VmFail> {
        let failure = {
            let mut state = self.state.borrow_mut();
            state.vmread_count += 1;
            state.vmread_failure
        };
        self.execute(Instruction::Vmread, failure)?;
        Ok(self.state.borrow().fields.get(&field).copied().unwrap_or(0))
    }

    fn vmwrite(&self, field: u32, value: u64) -> Result<(), VmFail> {
        let failure = self.state.borrow().vmwrite_failure;
        self.execute(Instruction::Vmwrite, failure)?;
        self.state.borrow_mut().fields.insert(field, value);
        Ok(())
    }
}

/// Page allocator that keeps count of what is outstanding.
pub struct CountingAllocator {
    allocations: Cell<usize>,
    frees: Cell<usize>,
    fail: Cell<bool>,
    dirty: Cell<bool>,
    pa_offset: Cell<u64>,
}

impl CountingAllocator {
    pub fn new() -> Self {
        Self {
            allocations: Cell::new(0),
            frees: Cell::new(0),
            fail: Cell::new(false),
            dirty: Cell::new(false),
            pa_offset: Cell::new(0),
        }
    }

    fn layout() -> Layout {
        Layout::from_size_align(PAGE_SIZE, PAGE_SIZE).unwrap()
    }

    /// Successful allocations so far.
    pub fn allocations(&self) -> usize {
        self.allocations.get()
    }

    pub fn frees(&self) -> usize {
        self.frees.get()
    }

    pub fn outstanding(&self) -> usize {
        self.allocations.get() - self.frees.get()
    }

    pub fn fail_allocations(&self, fail: bool) {
        self.fail.set(fail);
    }

    /// Hand out pages filled with garbage instead of zeroes.
    pub fn dirty_pages(&self, dirty: bool) {
        self.dirty.set(dirty);
    }

    /// Report physical addresses this far above the virtual address.
    pub fn set_pa_offset(&self, offset: u64) {
        self.pa_offset.set(offset);
    }
}

impl PageAllocator for CountingAllocator {
    fn allocate_page(&self) -> Option<PhysicalPage> {
        if self.fail.get() {
            return None;
        }

        let va = NonNull::new(unsafe { alloc_zeroed(Self::layout()) })?;
        if self.dirty.get() {
            unsafe { va.as_ptr().write_bytes(0xaa, PAGE_SIZE) };
        }

        self.allocations.set(self.allocations.get() + 1);
        let pa = PhysicalAddress::from_pa(va.as_ptr() as u64 + self.pa_offset.get());

        Some(PhysicalPage { va, pa })
    }

    unsafe fn free_page(&self, page: PhysicalPage) {
        self.frees.set(self.frees.get() + 1);
        dealloc(page.va.as_ptr(), Self::layout());
    }
}
