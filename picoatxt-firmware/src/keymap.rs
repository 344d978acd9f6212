//! IBM scan-code set 1 (XT) and set 2 (AT) mapped to USB HID usages.
//!
//! Each protocol carries four 256-slot tables, one per translator shift
//! state. The tables are reference data fixed by the IBM sets; they are
//! filled at compile time from `(scan code, usage)` pair lists over an
//! all-`None` default, with XT break entries derived as `code | 0x80`.

use crate::translate::Shift;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Entry {
    /// Unassigned; resets the translator's shift state.
    None,
    Key(u8),
    /// Keyboard buffer overrun marker; drops every held key.
    Overrun,
    /// Prefix byte; selects the next shift state.
    Extended,
    /// AT 0xF0: the following code is a release.
    BreakNext,
    /// XT release: the same slot with bit 7 clear names the key.
    BreakCode,
}

pub struct ScanTables {
    pub normal: [Entry; 256],
    pub extended: [Entry; 256],
    pub pause: [Entry; 256],
    pub pause_next: [Entry; 256],
}

impl ScanTables {
    pub fn table(&self, shift: Shift) -> &[Entry; 256] {
        match shift {
            Shift::Normal => &self.normal,
            Shift::Extended => &self.extended,
            Shift::Pause => &self.pause,
            Shift::PauseNext => &self.pause_next,
        }
    }
}

const fn keys(pairs: &[(u8, u8)], xt_breaks: bool) -> [Entry; 256] {
    let mut table = [Entry::None; 256];
    let mut i = 0;
    while i < pairs.len() {
        let code = pairs[i].0;
        table[code as usize] = Entry::Key(pairs[i].1);
        if xt_breaks {
            table[(code | 0x80) as usize] = Entry::BreakCode;
        }
        i += 1;
    }
    table
}

const fn overlay(mut table: [Entry; 256], entries: &[(u8, Entry)]) -> [Entry; 256] {
    let mut i = 0;
    while i < entries.len() {
        table[entries[i].0 as usize] = entries[i].1;
        i += 1;
    }
    table
}

#[rustfmt::skip]
const XT_KEYS: &[(u8, u8)] = &[
    (0x01, 0x29), // Esc
    (0x02, 0x1e), (0x03, 0x1f), (0x04, 0x20), (0x05, 0x21), (0x06, 0x22), // 1-5
    (0x07, 0x23), (0x08, 0x24), (0x09, 0x25), (0x0a, 0x26), (0x0b, 0x27), // 6-0
    (0x0c, 0x2d), // -
    (0x0d, 0x2e), // =
    (0x0e, 0x2a), // Backspace
    (0x0f, 0x2b), // Tab
    (0x10, 0x14), (0x11, 0x1a), (0x12, 0x08), (0x13, 0x15), (0x14, 0x17), // Q W E R T
    (0x15, 0x1c), (0x16, 0x18), (0x17, 0x0c), (0x18, 0x12), (0x19, 0x13), // Y U I O P
    (0x1a, 0x2f), // [
    (0x1b, 0x30), // ]
    (0x1c, 0x28), // Enter
    (0x1d, 0xe0), // Left Ctrl
    (0x1e, 0x04), (0x1f, 0x16), (0x20, 0x07), (0x21, 0x09), (0x22, 0x0a), // A S D F G
    (0x23, 0x0b), (0x24, 0x0d), (0x25, 0x0e), (0x26, 0x0f),               // H J K L
    (0x27, 0x33), // ;
    (0x28, 0x34), // '
    (0x29, 0x35), // `
    (0x2a, 0xe1), // Left Shift
    (0x2b, 0x31), // backslash
    (0x2c, 0x1d), (0x2d, 0x1b), (0x2e, 0x06), (0x2f, 0x19), (0x30, 0x05), // Z X C V B
    (0x31, 0x11), (0x32, 0x10),                                           // N M
    (0x33, 0x36), // ,
    (0x34, 0x37), // .
    (0x35, 0x38), // /
    (0x36, 0xe5), // Right Shift
    (0x37, 0x55), // keypad *
    (0x38, 0xe2), // Left Alt
    (0x39, 0x2c), // Space
    (0x3a, 0x39), // Caps Lock
    (0x3b, 0x3a), (0x3c, 0x3b), (0x3d, 0x3c), (0x3e, 0x3d), (0x3f, 0x3e), // F1-F5
    (0x40, 0x3f), (0x41, 0x40), (0x42, 0x41), (0x43, 0x42), (0x44, 0x43), // F6-F10
    (0x45, 0x53), // Num Lock
    (0x46, 0x47), // Scroll Lock
    (0x47, 0x5f), (0x48, 0x60), (0x49, 0x61), // keypad 7 8 9
    (0x4a, 0x56), // keypad -
    (0x4b, 0x5c), (0x4c, 0x5d), (0x4d, 0x5e), // keypad 4 5 6
    (0x4e, 0x57), // keypad +
    (0x4f, 0x59), (0x50, 0x5a), (0x51, 0x5b), // keypad 1 2 3
    (0x52, 0x62), // keypad 0
    (0x53, 0x63), // keypad .
    (0x56, 0x64), // 102nd key
    (0x57, 0x44), // F11
    (0x58, 0x45), // F12
];

#[rustfmt::skip]
const XT_EXTENDED_KEYS: &[(u8, u8)] = &[
    (0x1c, 0x58), // keypad Enter
    (0x1d, 0xe4), // Right Ctrl
    (0x35, 0x54), // keypad /
    (0x37, 0x46), // Print Screen
    (0x38, 0xe6), // Right Alt
    (0x46, 0x48), // Ctrl-Break
    (0x47, 0x4a), // Home
    (0x48, 0x52), // Up
    (0x49, 0x4b), // Page Up
    (0x4b, 0x50), // Left
    (0x4d, 0x4f), // Right
    (0x4f, 0x4d), // End
    (0x50, 0x51), // Down
    (0x51, 0x4e), // Page Down
    (0x52, 0x49), // Insert
    (0x53, 0x4c), // Delete
    (0x5b, 0xe3), // Left GUI
    (0x5c, 0xe7), // Right GUI
    (0x5d, 0x65), // Menu
];

#[rustfmt::skip]
const AT_KEYS: &[(u8, u8)] = &[
    (0x01, 0x42), // F9
    (0x03, 0x3e), // F5
    (0x04, 0x3c), // F3
    (0x05, 0x3a), // F1
    (0x06, 0x3b), // F2
    (0x07, 0x45), // F12
    (0x09, 0x43), // F10
    (0x0a, 0x41), // F8
    (0x0b, 0x3f), // F6
    (0x0c, 0x3d), // F4
    (0x0d, 0x2b), // Tab
    (0x0e, 0x35), // `
    (0x11, 0xe2), // Left Alt
    (0x12, 0xe1), // Left Shift
    (0x14, 0xe0), // Left Ctrl
    (0x15, 0x14), // Q
    (0x16, 0x1e), // 1
    (0x1a, 0x1d), // Z
    (0x1b, 0x16), // S
    (0x1c, 0x04), // A
    (0x1d, 0x1a), // W
    (0x1e, 0x1f), // 2
    (0x21, 0x06), // C
    (0x22, 0x1b), // X
    (0x23, 0x07), // D
    (0x24, 0x08), // E
    (0x25, 0x21), // 4
    (0x26, 0x20), // 3
    (0x29, 0x2c), // Space
    (0x2a, 0x19), // V
    (0x2b, 0x09), // F
    (0x2c, 0x17), // T
    (0x2d, 0x15), // R
    (0x2e, 0x22), // 5
    (0x31, 0x11), // N
    (0x32, 0x05), // B
    (0x33, 0x0b), // H
    (0x34, 0x0a), // G
    (0x35, 0x1c), // Y
    (0x36, 0x23), // 6
    (0x3a, 0x10), // M
    (0x3b, 0x0d), // J
    (0x3c, 0x18), // U
    (0x3d, 0x24), // 7
    (0x3e, 0x25), // 8
    (0x41, 0x36), // ,
    (0x42, 0x0e), // K
    (0x43, 0x0c), // I
    (0x44, 0x12), // O
    (0x45, 0x27), // 0
    (0x46, 0x26), // 9
    (0x49, 0x37), // .
    (0x4a, 0x38), // /
    (0x4b, 0x0f), // L
    (0x4c, 0x33), // ;
    (0x4d, 0x13), // P
    (0x4e, 0x2d), // -
    (0x52, 0x34), // '
    (0x54, 0x2f), // [
    (0x55, 0x2e), // =
    (0x58, 0x39), // Caps Lock
    (0x59, 0xe5), // Right Shift
    (0x5a, 0x28), // Enter
    (0x5b, 0x30), // ]
    (0x5d, 0x31), // backslash
    (0x61, 0x64), // 102nd key
    (0x66, 0x2a), // Backspace
    (0x69, 0x59), // keypad 1
    (0x6b, 0x5c), // keypad 4
    (0x6c, 0x5f), // keypad 7
    (0x70, 0x62), // keypad 0
    (0x71, 0x63), // keypad .
    (0x72, 0x5a), // keypad 2
    (0x73, 0x5d), // keypad 5
    (0x74, 0x5e), // keypad 6
    (0x75, 0x60), // keypad 8
    (0x76, 0x29), // Esc
    (0x77, 0x53), // Num Lock
    (0x78, 0x44), // F11
    (0x79, 0x57), // keypad +
    (0x7a, 0x5b), // keypad 3
    (0x7b, 0x56), // keypad -
    (0x7c, 0x55), // keypad *
    (0x7d, 0x61), // keypad 9
    (0x7e, 0x47), // Scroll Lock
    (0x83, 0x40), // F7
];

#[rustfmt::skip]
const AT_EXTENDED_KEYS: &[(u8, u8)] = &[
    (0x11, 0xe6), // Right Alt
    (0x14, 0xe4), // Right Ctrl
    (0x1f, 0xe3), // Left GUI
    (0x27, 0xe7), // Right GUI
    (0x2f, 0x65), // Menu
    (0x4a, 0x54), // keypad /
    (0x5a, 0x58), // keypad Enter
    (0x69, 0x4d), // End
    (0x6b, 0x50), // Left
    (0x6c, 0x4a), // Home
    (0x70, 0x49), // Insert
    (0x71, 0x4c), // Delete
    (0x72, 0x51), // Down
    (0x74, 0x4f), // Right
    (0x75, 0x52), // Up
    (0x7a, 0x4e), // Page Down
    (0x7c, 0x46), // Print Screen
    (0x7d, 0x4b), // Page Up
    (0x7e, 0x48), // Ctrl-Break
];

/// Usage reported for the Pause key; it only ever appears on the wire as a
/// make, via the E1-prefixed sequences below.
pub const PAUSE_USAGE: u8 = 0x48;

pub static XT: ScanTables = ScanTables {
    normal: overlay(
        keys(XT_KEYS, true),
        &[
            (0xe0, Entry::Extended),
            (0xe1, Entry::Extended),
            (0x00, Entry::Overrun),
            (0xff, Entry::Overrun),
        ],
    ),
    extended: keys(XT_EXTENDED_KEYS, true),
    // E1 1D 45 / E1 9D C5: both halves walk pause -> pause_next
    pause: overlay(
        [Entry::None; 256],
        &[(0x1d, Entry::Extended), (0x9d, Entry::Extended)],
    ),
    pause_next: keys(&[(0x45, PAUSE_USAGE)], true),
};

pub static AT: ScanTables = ScanTables {
    normal: overlay(
        keys(AT_KEYS, false),
        &[
            (0xe0, Entry::Extended),
            (0xe1, Entry::Extended),
            (0xf0, Entry::BreakNext),
            (0x00, Entry::Overrun),
            (0xff, Entry::Overrun),
        ],
    ),
    extended: overlay(keys(AT_EXTENDED_KEYS, false), &[(0xf0, Entry::BreakNext)]),
    // E1 14 77 then E1 F0 14 F0 77
    pause: overlay(
        [Entry::None; 256],
        &[(0x14, Entry::Extended), (0xf0, Entry::BreakNext)],
    ),
    pause_next: overlay(
        keys(&[(0x77, PAUSE_USAGE)], false),
        &[(0xf0, Entry::BreakNext)],
    ),
};

#[cfg(test)]
#[path = "keymap_test.rs"]
mod test;
