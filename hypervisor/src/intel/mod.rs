pub mod capability;
pub mod controls;
pub mod processor;
pub mod region;
pub mod support;
pub mod vmcs;
pub mod vmerror;
pub mod vmx;
pub mod vmxon;
