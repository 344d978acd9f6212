use crate::keymap::{Entry, ScanTables};
use crate::line::Protocol;

/// Selector among the four per-protocol tables. Distinct from the Shift key:
/// this tracks prefix bytes, not modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Shift {
    Normal,
    Extended,
    Pause,
    PauseNext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Decoded {
    Nothing,
    Key { usage: u8, is_down: bool },
    /// The keyboard's internal buffer overflowed; key state is unknown.
    Overrun,
}

pub struct Translator {
    tables: &'static ScanTables,
    shift: Shift,
    is_break: bool,
}

impl Translator {
    pub fn new(protocol: Protocol) -> Self {
        Self {
            tables: match protocol {
                Protocol::Xt => &crate::keymap::XT,
                Protocol::At => &crate::keymap::AT,
            },
            shift: Shift::Normal,
            is_break: false,
        }
    }

    /// Drops any half-consumed prefix, e.g. across a keyboard reset.
    pub fn reset(&mut self) {
        self.shift = Shift::Normal;
        self.is_break = false;
    }

    pub fn feed(&mut self, byte: u8) -> Decoded {
        match self.tables.table(self.shift)[byte as usize] {
            Entry::None => {
                self.reset();
                Decoded::Nothing
            }
            Entry::Overrun => {
                self.reset();
                Decoded::Overrun
            }
            Entry::BreakNext => {
                self.is_break = true;
                Decoded::Nothing
            }
            Entry::Extended => {
                self.shift = match (self.shift, byte) {
                    (Shift::Normal, 0xe1) => Shift::Pause,
                    (Shift::Pause | Shift::PauseNext, _) => Shift::PauseNext,
                    _ => Shift::Extended,
                };
                Decoded::Nothing
            }
            Entry::BreakCode => {
                // XT: same slot with bit 7 clear names the released key
                let released = self.tables.table(self.shift)[(byte & 0x7f) as usize];
                self.reset();
                match released {
                    Entry::Key(usage) => Decoded::Key {
                        usage,
                        is_down: false,
                    },
                    _ => Decoded::Nothing,
                }
            }
            Entry::Key(usage) => {
                let is_down = !self.is_break;
                self.reset();
                Decoded::Key { usage, is_down }
            }
        }
    }
}

#[cfg(test)]
#[path = "translate_test.rs"]
mod test;
