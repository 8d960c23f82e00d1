//! Serial-port logging for hosts without a kernel debugger.
//!
//! Everything in this crate logs through the `log` facade. On bare metal, or once a guest is
//! running and the host's own logger can no longer be trusted, the records are sent to a COM
//! port instead, where VMware Workstation or QEMU can pick them up.

use log::LevelFilter;

/// COM2.
pub const SERIAL_PORT: u16 = 0x2f8;

/// Installs the COM2 logger with the given maximum level.
pub fn init(level: LevelFilter) {
    init_with_port(SERIAL_PORT, level);
}

/// Installs the logger on the COM port at `base`.
///
/// Only the first installation takes effect.
pub fn init_with_port(base: u16, level: LevelFilter) {
    com_logger::builder().base(base).filter(level).setup();
}
