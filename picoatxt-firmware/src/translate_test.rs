extern crate std;
use std::vec::Vec;

use super::*;
use crate::keymap::{self, Entry, PAUSE_USAGE};

fn feed(translator: &mut Translator, bytes: &[u8]) -> Vec<Decoded> {
    bytes
        .iter()
        .map(|b| translator.feed(*b))
        .filter(|d| *d != Decoded::Nothing)
        .collect()
}

fn key(usage: u8, is_down: bool) -> Decoded {
    Decoded::Key { usage, is_down }
}

#[test]
fn xt_make_then_bit7_break_for_every_key() {
    let mut t = Translator::new(Protocol::Xt);
    for code in 0..0x80u8 {
        let Entry::Key(usage) = keymap::XT.normal[code as usize] else {
            continue;
        };
        assert_eq!(t.feed(code), key(usage, true), "make {code:#x}");
        assert_eq!(t.feed(code | 0x80), key(usage, false), "break {code:#x}");
    }
}

#[test]
fn at_break_prefix() {
    let mut t = Translator::new(Protocol::At);
    assert_eq!(feed(&mut t, &[0xf0, 0x1c]), [key(0x04, false)]);
    // no residual break state
    assert_eq!(t.feed(0x1c), key(0x04, true));
}

#[test]
fn unassigned_byte_resets_shift_and_break() {
    let mut t = Translator::new(Protocol::At);
    // 0x08 is unassigned in set 2
    assert!(feed(&mut t, &[0xe0, 0x08]).is_empty());
    assert_eq!(t.shift, Shift::Normal);
    assert_eq!(t.feed(0x1c), key(0x04, true), "extended state leaked");

    assert!(feed(&mut t, &[0xf0, 0x08]).is_empty());
    assert!(!t.is_break);
    assert_eq!(t.feed(0x1c), key(0x04, true), "break state leaked");
}

#[test]
fn overrun_from_any_state() {
    for protocol in [Protocol::Xt, Protocol::At] {
        let mut t = Translator::new(protocol);
        assert_eq!(t.feed(0x00), Decoded::Overrun);
        assert_eq!(t.feed(0xff), Decoded::Overrun);
        t.feed(0xe0);
        // prefix state must not survive the overrun reset
        assert_eq!(t.feed(0xff), Decoded::Overrun);
        assert_eq!(t.shift, Shift::Normal);
    }
}

#[test]
fn at_extended_keys() {
    let mut t = Translator::new(Protocol::At);
    assert_eq!(feed(&mut t, &[0xe0, 0x75]), [key(0x52, true)]);
    assert_eq!(feed(&mut t, &[0xe0, 0xf0, 0x75]), [key(0x52, false)]);
}

#[test]
fn xt_extended_keys() {
    let mut t = Translator::new(Protocol::Xt);
    assert_eq!(feed(&mut t, &[0xe0, 0x48]), [key(0x52, true)]);
    assert_eq!(feed(&mut t, &[0xe0, 0xc8]), [key(0x52, false)]);
}

#[test]
fn at_pause_sequence() {
    let mut t = Translator::new(Protocol::At);
    assert_eq!(feed(&mut t, &[0xe1, 0x14, 0x77]), [key(PAUSE_USAGE, true)]);
    // the canned break tail decodes as a release; policy ignores it
    assert_eq!(
        feed(&mut t, &[0xe1, 0xf0, 0x14, 0xf0, 0x77]),
        [key(PAUSE_USAGE, false)]
    );
    assert_eq!(t.shift, Shift::Normal);
}

#[test]
fn xt_pause_sequence() {
    let mut t = Translator::new(Protocol::Xt);
    assert_eq!(feed(&mut t, &[0xe1, 0x1d, 0x45]), [key(PAUSE_USAGE, true)]);
    assert_eq!(feed(&mut t, &[0xe1, 0x9d, 0xc5]), [key(PAUSE_USAGE, false)]);
    assert_eq!(t.shift, Shift::Normal);
}

#[test]
fn reset_drops_half_consumed_prefix() {
    let mut t = Translator::new(Protocol::At);
    t.feed(0xe1);
    t.feed(0x14);
    t.reset();
    assert_eq!(t.feed(0x1c), key(0x04, true));
}
