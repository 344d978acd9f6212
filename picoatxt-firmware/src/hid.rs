use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use embassy_sync::blocking_mutex::{raw::CriticalSectionRawMutex, Mutex};
use embassy_usb::driver::{Driver, Endpoint, EndpointError, EndpointIn};

use crate::REPORT_LEN;

pub struct HidWriter<'d, D: Driver<'d>, const N: usize> {
    ep_in: D::EndpointIn,
}

impl<'d, D: Driver<'d>, const N: usize> HidWriter<'d, D, N> {
    pub fn new(ep_in: <D>::EndpointIn) -> Self {
        Self { ep_in }
    }

    /// Writes `report` to its interrupt endpoint.
    pub async fn write(&mut self, report: &[u8]) -> Result<(), EndpointError> {
        assert!(report.len() <= N);

        let max_packet_size = usize::from(self.ep_in.info().max_packet_size);
        let zlp_needed = report.len() < N && report.len() % max_packet_size == 0;
        for chunk in report.chunks(max_packet_size) {
            self.ep_in.write(chunk).await?;
        }

        if zlp_needed {
            self.ep_in.write(&[]).await?;
        }

        Ok(())
    }
}

/// Lock-light bits as the host sends them in the LED output report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LedState(pub u8);

impl LedState {
    pub fn num_lock(self) -> bool {
        self.0 & 0x01 != 0
    }

    pub fn caps_lock(self) -> bool {
        self.0 & 0x02 != 0
    }

    pub fn scroll_lock(self) -> bool {
        self.0 & 0x04 != 0
    }

    pub fn any(self) -> bool {
        self.0 & 0x07 != 0
    }

    /// Argument byte for the keyboard's 0xED command, which orders the
    /// lights scroll, num, caps from bit 0 up.
    pub fn locklight_argument(self) -> u8 {
        (self.scroll_lock() as u8)
            | (self.num_lock() as u8) << 1
            | (self.caps_lock() as u8) << 2
    }
}

/// Host-side HID state, written by the USB control handler and read by the
/// converter task. Both run on the same executor; the atomics only ever
/// need plain loads and stores.
pub struct HidShared {
    leds: AtomicU8,
    leds_changed: AtomicBool,
    boot_protocol: AtomicBool,
    idle_rate: AtomicU8,
    report: Mutex<CriticalSectionRawMutex, RefCell<[u8; REPORT_LEN]>>,
}

impl Default for HidShared {
    fn default() -> Self {
        Self::new()
    }
}

impl HidShared {
    pub const fn new() -> Self {
        Self {
            leds: AtomicU8::new(0),
            leds_changed: AtomicBool::new(false),
            boot_protocol: AtomicBool::new(false),
            idle_rate: AtomicU8::new(0),
            report: Mutex::new(RefCell::new([0; REPORT_LEN])),
        }
    }

    pub fn leds(&self) -> LedState {
        LedState(self.leds.load(Ordering::Relaxed))
    }

    pub fn set_leds(&self, bits: u8) {
        self.leds.store(bits, Ordering::Relaxed);
        self.leds_changed.store(true, Ordering::Relaxed);
    }

    pub fn take_leds_changed(&self) -> bool {
        if self.leds_changed.load(Ordering::Relaxed) {
            self.leds_changed.store(false, Ordering::Relaxed);
            return true;
        }
        false
    }

    pub fn boot_protocol(&self) -> bool {
        self.boot_protocol.load(Ordering::Relaxed)
    }

    pub fn set_boot_protocol(&self, boot: bool) {
        self.boot_protocol.store(boot, Ordering::Relaxed);
    }

    pub fn idle_rate(&self) -> u8 {
        self.idle_rate.load(Ordering::Relaxed)
    }

    pub fn set_idle_rate(&self, rate: u8) {
        self.idle_rate.store(rate, Ordering::Relaxed);
    }

    /// An idle rate of zero means "report only on change".
    pub fn inhibit_duplicates(&self) -> bool {
        self.idle_rate() == 0
    }

    /// Keeps a copy of the last composed report for Get_Report.
    pub fn store_report(&self, report: &[u8; REPORT_LEN]) {
        self.report.lock(|r| r.borrow_mut().copy_from_slice(report));
    }

    pub fn report(&self) -> [u8; REPORT_LEN] {
        self.report.lock(|r| *r.borrow())
    }
}
