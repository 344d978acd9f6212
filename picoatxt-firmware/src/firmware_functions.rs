use core::cell::Cell;

use embassy_sync::blocking_mutex::CriticalSectionMutex;

pub type ResetFn = &'static (dyn Fn() + Sync);

static RESET: CriticalSectionMutex<Cell<Option<ResetFn>>> = CriticalSectionMutex::new(Cell::new(None));
static RESET_TO_USB_BOOT: CriticalSectionMutex<Cell<Option<ResetFn>>> =
    CriticalSectionMutex::new(Cell::new(None));

/// Restart the firmware. Does nothing until the board installs a handler.
pub fn reset() {
    RESET.lock(|f| {
        if let Some(f) = f.take() {
            f();
        }
    });
}

/// Drop off the bus and enter the mass-storage bootloader.
pub fn reset_to_usb_boot() {
    RESET_TO_USB_BOOT.lock(|f| {
        if let Some(f) = f.take() {
            f();
        }
    });
}

pub fn handle_reset(value: Option<ResetFn>) {
    RESET.lock(|f| f.set(value));
}

pub fn handle_reset_to_usb_boot(value: Option<ResetFn>) {
    RESET_TO_USB_BOOT.lock(|f| f.set(value));
}
