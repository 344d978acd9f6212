#![no_std]
pub mod converter;
pub mod firmware_functions;
pub mod hid;
pub mod keymap;
pub mod line;
pub mod report;
pub mod translate;
pub mod usb;

#[cfg(feature = "test-utils")]
pub mod pin_test_stub;
#[cfg(feature = "test-utils")]
pub mod time_driver_test_stub;
#[cfg(feature = "test-utils")]
pub mod usb_test_stub;

#[macro_use]
mod macros;

/// Lowest keyboard-page usage carried in the bitmap report.
pub const MIN_KEY: u8 = 0x04;

/// Bit-array bytes in the report; 168 usages starting at [`MIN_KEY`].
pub(crate) const KEY_BITS_SIZE: usize = 21;

/// Full report: 21 bytes of key bits plus the modifier byte.
pub const REPORT_LEN: usize = KEY_BITS_SIZE + 1;
