use embassy_usb::driver::Driver;

use crate::hid::{HidShared, HidWriter, LedState};
use crate::keymap::PAUSE_USAGE;
use crate::{KEY_BITS_SIZE, MIN_KEY, REPORT_LEN};

/// ErrorRollOver, reported in every boot-report key slot past six held keys.
const OVERRUN_USAGE: u8 = 0x01;

const MODIFIER_MIN: u8 = 0xe0;
const MODIFIER_MAX: u8 = 0xe7;

/// 1 ms ticks the Pause bit stays set after its make sequence; the wire
/// never sends a break for it.
const PAUSE_TICKS: u8 = 33;

pub const BOOT_REPORT_LEN: usize = 8;

/// The layered counterpart of `usage`, and whether the layer is active for
/// the given lock state. F9/F10 become F11/F12 under Scroll Lock; the keypad
/// becomes the navigation cluster when Num Lock is off.
fn layered(usage: u8, leds: LedState) -> Option<(u8, bool)> {
    match usage {
        0x42 => Some((0x44, leds.scroll_lock())), // F9 -> F11
        0x43 => Some((0x45, leds.scroll_lock())), // F10 -> F12
        0x59 => Some((0x4d, !leds.num_lock())),   // keypad 1 -> End
        0x5a => Some((0x51, !leds.num_lock())),   // keypad 2 -> Down
        0x5b => Some((0x4e, !leds.num_lock())),   // keypad 3 -> Page Down
        0x5c => Some((0x50, !leds.num_lock())),   // keypad 4 -> Left
        0x5e => Some((0x4f, !leds.num_lock())),   // keypad 6 -> Right
        0x5f => Some((0x4a, !leds.num_lock())),   // keypad 7 -> Home
        0x60 => Some((0x52, !leds.num_lock())),   // keypad 8 -> Up
        0x61 => Some((0x4b, !leds.num_lock())),   // keypad 9 -> Page Up
        0x62 => Some((0x49, !leds.num_lock())),   // keypad 0 -> Insert
        0x63 => Some((0x4c, !leds.num_lock())),   // keypad . -> Delete
        _ => None,
    }
}

fn bit_position(usage: u8) -> Option<(usize, u8)> {
    if (MODIFIER_MIN..=MODIFIER_MAX).contains(&usage) {
        return Some((KEY_BITS_SIZE, 1 << (usage & 7)));
    }
    if usage < MIN_KEY || usage >= MIN_KEY + (KEY_BITS_SIZE as u8) * 8 {
        return None;
    }
    let offset = usage - MIN_KEY;
    Some(((offset >> 3) as usize, 1 << (offset & 7)))
}

fn compose_boot(keys: &[u8; REPORT_LEN]) -> [u8; BOOT_REPORT_LEN] {
    let mut report = [0u8; BOOT_REPORT_LEN];
    report[0] = keys[KEY_BITS_SIZE];
    let mut slot = 0;
    for (index, byte) in keys[..KEY_BITS_SIZE].iter().enumerate() {
        if *byte == 0 {
            continue;
        }
        for bit in 0..8u8 {
            if byte & (1 << bit) != 0 {
                if slot == 6 {
                    report[2..].fill(OVERRUN_USAGE);
                    return report;
                }
                report[2 + slot] = MIN_KEY + (index as u8) * 8 + bit;
                slot += 1;
            }
        }
    }
    report
}

/// Owns the key bitmap and the HID endpoint: 21 bytes of key bits from
/// [`MIN_KEY`] plus the modifier byte, emitted whole in report mode or
/// squeezed into the 8-byte boot format when the host asked for it.
pub struct Reporter<'d, D: Driver<'d>> {
    writer: HidWriter<'d, D, REPORT_LEN>,
    shared: &'d HidShared,
    keys: [u8; REPORT_LEN],
    pause_tick: u8,
    duplicate_report: bool,
}

impl<'d, D: Driver<'d>> Reporter<'d, D> {
    pub fn new(writer: HidWriter<'d, D, REPORT_LEN>, shared: &'d HidShared) -> Self {
        Self {
            writer,
            shared,
            keys: [0; REPORT_LEN],
            pause_tick: 0,
            duplicate_report: false,
        }
    }

    pub fn key_event(&mut self, usage: u8, is_down: bool, leds: LedState) {
        if usage == PAUSE_USAGE {
            // one-shot: the tick clears it, wire breaks are ignored
            if is_down {
                self.pause_tick = PAUSE_TICKS;
                self.set_key(PAUSE_USAGE, true);
            }
            return;
        }
        match layered(usage, leds) {
            Some((layer_key, active)) => {
                let (logical, opposite) = if active {
                    (layer_key, usage)
                } else {
                    (usage, layer_key)
                };
                self.set_key(logical, is_down);
                // never let the host see both halves of the pair
                self.set_key(opposite, false);
            }
            None => self.set_key(usage, is_down),
        }
    }

    fn set_key(&mut self, usage: u8, is_down: bool) {
        let Some((index, mask)) = bit_position(usage) else {
            crate::error!("invalid key! {}", usage);
            return;
        };
        let old = self.keys[index];
        let new = if is_down { old | mask } else { old & !mask };
        if new != old {
            self.keys[index] = new;
            self.duplicate_report = false;
        }
    }

    pub fn held(&self, usage: u8) -> bool {
        bit_position(usage).is_some_and(|(index, mask)| self.keys[index] & mask != 0)
    }

    pub fn overrun(&mut self) {
        self.clear_all();
        // key state is unknown; the host gets told even if nothing was held
        self.duplicate_report = false;
    }

    pub fn clear_all(&mut self) {
        if self.keys.iter().any(|b| *b != 0) {
            self.duplicate_report = false;
        }
        self.keys = [0; REPORT_LEN];
        self.pause_tick = 0;
    }

    /// Runs once per 1 ms tick, after emission, so a fresh Pause make is
    /// visible for its full count of reports.
    pub fn tick_pause(&mut self) {
        if self.pause_tick > 0 {
            self.pause_tick -= 1;
            if self.pause_tick == 0 {
                self.set_key(PAUSE_USAGE, false);
            }
        }
    }

    pub async fn emit(&mut self) {
        if self.duplicate_report && self.shared.inhibit_duplicates() {
            return;
        }
        let result = if self.shared.boot_protocol() {
            self.writer.write(&compose_boot(&self.keys)).await
        } else {
            self.writer.write(&self.keys).await
        };
        self.shared.store_report(&self.keys);
        self.duplicate_report = true;
        if let Err(e) = result {
            crate::warn!("failed to send report: {:?}", e);
        }
    }
}

/// Boot-format view of a stored report, for Get_Report in boot mode.
pub fn boot_view(keys: &[u8; REPORT_LEN]) -> [u8; BOOT_REPORT_LEN] {
    compose_boot(keys)
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
#[path = "report_test.rs"]
mod test;
