use embassy_futures::block_on;
use embassy_futures::join::join;
use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;

use crate::pin_test_stub::{wire, KeyboardSim, Pin};

use super::*;

extern crate alloc;
use alloc::vec::Vec;

type TestChannel = LineChannel<NoopRawMutex>;
type TestEngine<'c> = LineEngine<'c, Pin, Pin, NoopRawMutex>;

fn engine(channel: &TestChannel) -> (TestEngine<'_>, KeyboardSim) {
    let ((clk_in, data_in, clk_out, data_out), sim) = wire();
    (
        LineEngine::new(clk_in, data_in, clk_out, data_out, channel),
        sim,
    )
}

/// Runs the receive loop until the keyboard script finishes.
async fn run_while<F: core::future::Future>(engine: &mut TestEngine<'_>, script: F) -> F::Output {
    match select(engine.run(), script).await {
        Either::First(never) => never,
        Either::Second(output) => output,
    }
}

fn drain_data(channel: &TestChannel) -> Vec<Option<u8>> {
    let mut out = Vec::new();
    while let Some(packet) = channel.get_packet() {
        out.push(packet.data);
    }
    out
}

#[test]
fn ring_preserves_wire_order_and_fails_once() {
    let ch = TestChannel::new();
    assert!(ch.push_frame(1));
    assert!(ch.push_frame(2));
    assert_eq!(ch.get_packet().unwrap().data, Some(1));

    assert!(ch.push_frame(3));
    ch.latch_fail();

    // bytes received before the failure keep wire order, then the failure
    // marker is delivered exactly once
    assert_eq!(drain_data(&ch), [Some(2), Some(3), None]);
    assert_eq!(ch.get_packet(), None);

    assert!(ch.push_frame(4));
    assert_eq!(drain_data(&ch), [Some(4)]);
}

#[test]
fn ring_overflow_latches_fail() {
    let ch = TestChannel::new();
    for n in 0..63u8 {
        assert!(ch.push_frame(n), "push {n}");
    }
    assert!(!ch.push_frame(63));

    let mut delivered = drain_data(&ch);
    assert_eq!(delivered.pop(), Some(None));
    assert_eq!(delivered.len(), 63);
    assert!(delivered.iter().all(|d| d.is_some()));
}

#[test]
fn write_preconditions() {
    let ch = TestChannel::new();
    ch.set_protocol(Protocol::At);

    // most of a frame already clocked in
    ch.frame_started();
    ch.bit_clocked(9);
    assert_eq!(ch.send_command(Command::Echo), Err(Error::Clocking));
    ch.bit_clocked(3);
    assert_eq!(ch.send_command(Command::Echo), Ok(()));
    assert_eq!(ch.try_take_write(), Some(WriteRequest::AtByte(0xee)));
    ch.frame_ended();

    // the echo is still unanswered, even once its reply is buffered
    assert_eq!(ch.send_command(Command::Echo), Err(Error::Contention));
    ch.push_frame(0xee);
    assert_eq!(ch.send_command(Command::Echo), Err(Error::Contention));
    let _ = ch.get_packet().unwrap();

    // data waiting with no command outstanding
    ch.push_frame(0x1c);
    assert_eq!(ch.send_command(Command::Echo), Err(Error::RingBufferNotEmpty));
    let _ = ch.get_packet().unwrap();
    assert_eq!(ch.send_command(Command::Echo), Ok(()));
}

#[test]
fn xt_rejects_at_commands() {
    let ch = TestChannel::new();
    ch.set_protocol(Protocol::Xt);
    assert_eq!(ch.send_command(Command::SetLocklights), Err(Error::AtXt));
    assert_eq!(ch.send_command(Command::Echo), Err(Error::AtXt));
    assert_eq!(ch.send_at_command(0x00), Err(Error::AtXt));
    assert_eq!(ch.send_command(Command::Reset), Ok(()));
    assert_eq!(ch.try_take_write(), Some(WriteRequest::XtReset));
}

#[test]
fn detects_xt_bat() {
    block_on(async {
        let ch = TestChannel::new();
        let (mut engine, mut kb) = engine(&ch);
        let (result, _) = join(engine.init(), kb.send_xt_byte(0xaa)).await;
        assert_eq!(result, Ok(Protocol::Xt));
        assert!(!engine.is_legacy());
        assert_eq!(ch.protocol(), Some(Protocol::Xt));
        // inhibited until the receive loop starts
        assert!(kb.host_clk.get());
    });
}

#[test]
fn detects_at_bat() {
    block_on(async {
        let ch = TestChannel::new();
        let (mut engine, mut kb) = engine(&ch);
        let (result, _) = join(engine.init(), kb.send_at_byte(0xaa)).await;
        assert_eq!(result, Ok(Protocol::At));
        assert_eq!(ch.protocol(), Some(Protocol::At));
    });
}

#[test]
fn silent_keyboard_reset_and_legacy_xt() {
    block_on(async {
        let ch = TestChannel::new();
        let (engine, mut kb) = engine(&ch);
        let mut engine = engine.bat_timeout(Duration::from_millis(5));
        let script = async {
            // nothing until the converter gives up and yanks CLK
            kb.wait_reset_pulse().await;
            kb.send_xt_byte(0xaa).await;
        };
        let (result, _) = join(engine.init(), script).await;
        assert_eq!(result, Ok(Protocol::Xt));
        assert!(engine.is_legacy());
    });
}

#[test]
fn bat_detection_gives_up() {
    block_on(async {
        let ch = TestChannel::new();
        let (engine, _kb) = engine(&ch);
        let mut engine = engine.bat_timeout(Duration::from_millis(5));
        assert_eq!(engine.init().await, Err(Error::FailedToGetXtBat));
    });
}

#[test]
fn garbled_bat_gives_up() {
    block_on(async {
        let ch = TestChannel::new();
        let (mut engine, mut kb) = engine(&ch);
        let (result, _) = join(engine.init(), kb.send_at_byte(0x55)).await;
        assert_eq!(result, Err(Error::FailedToReadBat));
    });
}

#[test]
fn receives_at_frames_in_order() {
    block_on(async {
        let ch = TestChannel::new();
        let (mut engine, mut kb) = engine(&ch);
        let (result, _) = join(engine.init(), kb.send_at_byte(0xaa)).await;
        assert_eq!(result, Ok(Protocol::At));

        run_while(&mut engine, async {
            kb.send_at_byte(0x1c).await;
            kb.send_at_byte(0xf0).await;
            kb.send_at_byte(0x1c).await;
        })
        .await;

        assert_eq!(drain_data(&ch), [Some(0x1c), Some(0xf0), Some(0x1c)]);
    });
}

#[test]
fn receives_xt_frames_with_break_bytes() {
    block_on(async {
        let ch = TestChannel::new();
        let (mut engine, mut kb) = engine(&ch);
        let (result, _) = join(engine.init(), kb.send_xt_byte(0xaa)).await;
        assert_eq!(result, Ok(Protocol::Xt));

        run_while(&mut engine, async {
            kb.send_xt_byte(0x1e).await;
            kb.send_xt_byte(0x9e).await;
        })
        .await;

        assert_eq!(drain_data(&ch), [Some(0x1e), Some(0x9e)]);
    });
}

#[test]
fn bad_parity_latches_fail_and_inhibits() {
    block_on(async {
        let ch = TestChannel::new();
        let (mut engine, mut kb) = engine(&ch);
        let (result, _) = join(engine.init(), kb.send_at_byte(0xaa)).await;
        assert_eq!(result, Ok(Protocol::At));

        run_while(&mut engine, async {
            let good_parity = 0x1cu8.count_ones() & 1 == 0;
            kb.send_at_frame(0x1c, !good_parity).await;
        })
        .await;

        assert_eq!(
            ch.get_packet(),
            Some(Packet {
                data: None,
                last_command: None
            })
        );
        assert_eq!(ch.get_packet(), None);
        // both lines forced low until the main loop writes
        assert!(kb.host_clk.get());
        assert!(kb.host_data.get());
    });
}

#[test]
fn writes_command_and_reads_tagged_reply() {
    block_on(async {
        let ch = TestChannel::new();
        let (mut engine, mut kb) = engine(&ch);
        let (result, _) = join(engine.init(), kb.send_at_byte(0xaa)).await;
        assert_eq!(result, Ok(Protocol::At));
        let _ = ch.get_packet(); // nothing buffered, but be explicit

        ch.send_command(Command::SetLocklights).unwrap();
        let written = run_while(&mut engine, async {
            let written = kb.receive_host_byte().await;
            kb.send_at_byte(ACK).await;
            written
        })
        .await;

        assert_eq!(written, 0xed);
        assert_eq!(
            ch.get_packet(),
            Some(Packet {
                data: Some(ACK),
                last_command: Some(0xed)
            })
        );
    });
}

#[test]
fn unacked_write_is_recoverable() {
    block_on(async {
        let ch = TestChannel::new();
        let (mut engine, mut kb) = engine(&ch);
        let (result, _) = join(engine.init(), kb.send_at_byte(0xaa)).await;
        assert_eq!(result, Ok(Protocol::At));

        ch.send_command(Command::Echo).unwrap();
        let written = run_while(&mut engine, async { kb.receive_host_byte_no_ack().await }).await;
        assert_eq!(written, 0xee);

        // the failure marker carries the command, so the main loop re-sends
        assert_eq!(
            ch.get_packet(),
            Some(Packet {
                data: None,
                last_command: Some(0xee)
            })
        );
    });
}

#[test]
fn xt_reset_write_pulses_clock() {
    block_on(async {
        let ch = TestChannel::new();
        let (mut engine, mut kb) = engine(&ch);
        let (result, _) = join(engine.init(), kb.send_xt_byte(0xaa)).await;
        assert_eq!(result, Ok(Protocol::Xt));

        ch.send_command(Command::Reset).unwrap();
        run_while(&mut engine, async {
            kb.wait_reset_pulse().await;
            kb.send_xt_byte(0xaa).await;
        })
        .await;

        assert_eq!(
            ch.get_packet(),
            Some(Packet {
                data: Some(BAT_PASS),
                last_command: Some(0xff)
            })
        );
    });
}
