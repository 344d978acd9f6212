use embassy_futures::block_on;

use crate::hid::{HidShared, HidWriter, LedState};
use crate::usb_test_stub::{MyDriver, MyEndpointIn};

use super::*;

extern crate alloc;
use alloc::vec;

const NUM_ON: LedState = LedState(0x01);
const NUM_OFF: LedState = LedState(0);
const SCROLL_ON: LedState = LedState(0x04);

macro_rules! setup {
    ($messages:ident, $shared:ident, $rep:ident, $x:tt) => {
        block_on(async {
            let ep_in = MyEndpointIn::default();
            let $messages = ep_in.messages.clone();
            let $shared = HidShared::new();
            // suppression off unless a test asks for it
            $shared.set_idle_rate(125);
            let mut $rep: Reporter<'_, MyDriver> = Reporter::new(HidWriter::new(ep_in), &$shared);
            $x
        });
    };
}

fn bit(report: &[u8], usage: u8) -> bool {
    let offset = usage - MIN_KEY;
    report[(offset >> 3) as usize] & (1 << (offset & 7)) != 0
}

#[test]
fn bitmap_indexing() {
    setup!(messages, _shared, rep, {
        rep.key_event(0x04, true, NUM_ON); // A
        rep.key_event(0xab, true, NUM_ON); // last slot of the bit array
        rep.key_event(0xe1, true, NUM_ON); // Left Shift
        rep.key_event(0xe7, true, NUM_ON); // Right GUI
        rep.emit().await;

        let report = messages.get();
        assert_eq!(report.len(), REPORT_LEN);
        assert_eq!(report[0], 0x01);
        assert_eq!(report[20], 0x80);
        assert_eq!(report[21], 0x82);

        rep.key_event(0x04, false, NUM_ON);
        rep.key_event(0xe1, false, NUM_ON);
        rep.emit().await;
        let report = messages.get();
        assert_eq!(report[0], 0);
        assert_eq!(report[21], 0x80);
    });
}

#[test]
fn out_of_range_usage_is_dropped() {
    setup!(messages, _shared, rep, {
        rep.key_event(0x02, true, NUM_ON);
        rep.key_event(0xd0, true, NUM_ON);
        rep.emit().await;
        assert_eq!(messages.get(), vec![0; REPORT_LEN]);
    });
}

#[test]
fn duplicate_suppression() {
    setup!(messages, shared, rep, {
        shared.set_idle_rate(0); // report only on change
        rep.key_event(0x04, true, NUM_ON);
        rep.emit().await;
        rep.emit().await;
        rep.emit().await;
        assert_eq!(messages.count(), 1);
        messages.get();

        // releasing an already-up key changes nothing
        rep.key_event(0x05, false, NUM_ON);
        rep.emit().await;
        assert_eq!(messages.count(), 0);

        rep.key_event(0x04, false, NUM_ON);
        rep.emit().await;
        assert_eq!(messages.count(), 1);
    });
}

#[test]
fn nonzero_idle_rate_reports_every_tick() {
    setup!(messages, _shared, rep, {
        rep.emit().await;
        rep.emit().await;
        assert_eq!(messages.count(), 2);
    });
}

#[test]
fn pause_one_shot() {
    setup!(messages, _shared, rep, {
        rep.key_event(PAUSE_USAGE, true, NUM_ON);
        let mut held = 0;
        for _ in 0..40 {
            rep.emit().await;
            rep.tick_pause();
            if bit(&messages.get(), PAUSE_USAGE) {
                held += 1;
            }
        }
        assert_eq!(held, 33);
        // wire-side breaks are ignored; the one-shot owns the release
        rep.key_event(PAUSE_USAGE, false, NUM_ON);
        rep.key_event(PAUSE_USAGE, true, NUM_ON);
        rep.emit().await;
        assert!(bit(&messages.get(), PAUSE_USAGE));
    });
}

#[test]
fn function_key_layer() {
    setup!(messages, _shared, rep, {
        // Scroll Lock off: F9 is F9 and F11 stays untouched
        rep.key_event(0x42, true, NUM_ON);
        rep.emit().await;
        let report = messages.get();
        assert!(bit(&report, 0x42));
        assert!(!bit(&report, 0x44));

        rep.key_event(0x42, false, NUM_ON);
        rep.emit().await;
        assert_eq!(messages.get(), vec![0; REPORT_LEN]);

        // toggle Scroll Lock mid-hold: the release lands on F11 and the
        // opposite key is forced up with it
        rep.key_event(0x42, true, NUM_OFF);
        rep.key_event(0x42, false, SCROLL_ON);
        rep.emit().await;
        assert_eq!(messages.get(), vec![0; REPORT_LEN]);

        rep.key_event(0x43, true, SCROLL_ON);
        rep.emit().await;
        assert!(bit(&messages.get(), 0x45)); // F12
    });
}

#[test]
fn keypad_layer_follows_num_lock() {
    setup!(messages, _shared, rep, {
        rep.key_event(0x5c, true, NUM_OFF); // keypad 4 -> Left
        rep.emit().await;
        let report = messages.get();
        assert!(bit(&report, 0x50));
        assert!(!bit(&report, 0x5c));
        rep.key_event(0x5c, false, NUM_OFF);

        rep.key_event(0x5c, true, NUM_ON);
        rep.emit().await;
        let report = messages.get();
        assert!(bit(&report, 0x5c));
        assert!(!bit(&report, 0x50));

        // keypad 5 and keypad minus have no layered counterpart
        rep.key_event(0x5d, true, NUM_OFF);
        rep.key_event(0x56, true, NUM_OFF);
        rep.emit().await;
        let report = messages.get();
        assert!(bit(&report, 0x5d));
        assert!(bit(&report, 0x56));
    });
}

#[test]
fn overrun_clears_everything() {
    setup!(messages, _shared, rep, {
        rep.key_event(0x04, true, NUM_ON);
        rep.key_event(0xe1, true, NUM_ON);
        rep.key_event(PAUSE_USAGE, true, NUM_ON);
        rep.overrun();
        rep.emit().await;
        assert_eq!(messages.get(), vec![0; REPORT_LEN]);

        // the stale one-shot must not resurrect the Pause bit
        for _ in 0..40 {
            rep.tick_pause();
        }
        rep.emit().await;
        assert_eq!(messages.get(), vec![0; REPORT_LEN]);
    });
}

#[test]
fn boot_report_lists_up_to_six() {
    setup!(messages, shared, rep, {
        shared.set_boot_protocol(true);
        rep.key_event(0x07, true, NUM_ON);
        rep.key_event(0x04, true, NUM_ON);
        rep.key_event(0xe0, true, NUM_ON);
        rep.emit().await;
        assert_eq!(messages.get(), vec![0x01, 0, 0x04, 0x07, 0, 0, 0, 0]);
    });
}

#[test]
fn boot_report_overrun_fill() {
    setup!(messages, shared, rep, {
        shared.set_boot_protocol(true);
        for usage in 0x04..0x0b {
            rep.key_event(usage, true, NUM_ON);
        }
        rep.emit().await;
        assert_eq!(messages.get(), vec![0, 0, 1, 1, 1, 1, 1, 1]);
    });
}

#[test]
fn get_report_snapshot() {
    setup!(messages, shared, rep, {
        rep.key_event(0x04, true, NUM_ON);
        rep.emit().await;
        let _ = messages.get();
        let snapshot = shared.report();
        assert!(bit(&snapshot, 0x04));
        assert_eq!(boot_view(&snapshot), [0, 0, 0x04, 0, 0, 0, 0, 0]);
    });
}
