use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_time::{Duration, Ticker};
use embassy_usb::driver::Driver;

use crate::firmware_functions;
use crate::hid::HidShared;
use crate::line::{self, Command, LineChannel, Packet, Protocol};
use crate::report::Reporter;
use crate::translate::{Decoded, Translator};

const SCROLL_LOCK: u8 = 0x47;
const KEYPAD_MINUS: u8 = 0x56;
const RIGHT_SHIFT: u8 = 0xe5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Write {
    Command(Command),
    Data(u8),
}

fn requeue(cmd: u8) -> Write {
    if cmd == Command::Reset.code() {
        // reset is special on XT (a long clock hold, not a frame)
        Write::Command(Command::Reset)
    } else {
        Write::Data(cmd)
    }
}

/// The main loop: drains received frames through the translator into the
/// report bitmap, answers keyboard replies to our own commands, and emits a
/// HID report on every 1 ms tick.
pub struct Converter<'d, D: Driver<'d>, M: RawMutex> {
    line: &'d LineChannel<M>,
    shared: &'d HidShared,
    translator: Translator,
    reporter: Reporter<'d, D>,
    protocol: Protocol,
    change_leds: bool,
    waiting_for_bat: bool,
    queued: Option<Write>,
    escape_armed: bool,
}

impl<'d, D: Driver<'d>, M: RawMutex> Converter<'d, D, M> {
    pub fn new(
        protocol: Protocol,
        line: &'d LineChannel<M>,
        shared: &'d HidShared,
        reporter: Reporter<'d, D>,
    ) -> Self {
        Self {
            line,
            shared,
            translator: Translator::new(protocol),
            reporter,
            protocol,
            change_leds: false,
            waiting_for_bat: false,
            queued: None,
            escape_armed: false,
        }
    }

    pub async fn run(&mut self) -> ! {
        let mut ticker = Ticker::every(Duration::from_millis(1));
        loop {
            match select(self.line.packet_ready(), ticker.next()).await {
                Either::First(_) => {
                    while let Some(packet) = self.line.get_packet() {
                        self.handle_packet(packet);
                    }
                }
                Either::Second(_) => self.tick().await,
            }
            self.pump_writes();
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        let Some(byte) = packet.data else {
            // framing failure; the lines stay held low until our next write
            self.queued = Some(match packet.last_command {
                Some(cmd) => requeue(cmd),
                None if self.protocol == Protocol::At => Write::Command(Command::Resend),
                None => Write::Command(Command::Reset),
            });
            return;
        };
        if let Some(cmd) = packet.last_command {
            self.command_reply(cmd, byte);
            return;
        }
        if self.waiting_for_bat {
            self.waiting_for_bat = false;
            if byte == line::BAT_PASS {
                self.keyboard_reset();
            } else {
                crate::warn!("expected BAT status, got {:#x}", byte);
                self.queued = Some(Write::Command(Command::Reset));
            }
            return;
        }
        self.decode(byte);
    }

    fn command_reply(&mut self, cmd: u8, byte: u8) {
        if byte == line::RESEND {
            self.queued = Some(requeue(cmd));
            return;
        }
        match cmd {
            _ if cmd == Command::Reset.code() => match self.protocol {
                Protocol::At => match byte {
                    // ACK now, BAT status follows as its own frame
                    line::ACK => self.waiting_for_bat = true,
                    line::BAT_PASS => self.keyboard_reset(),
                    _ => self.queued = Some(Write::Command(Command::Reset)),
                },
                Protocol::Xt => {
                    // no ACK on XT; the BAT status is the whole reply
                    if byte == line::BAT_PASS {
                        self.keyboard_reset();
                    } else {
                        self.queued = Some(Write::Command(Command::Reset));
                    }
                }
            },
            _ if cmd == Command::SetLocklights.code() => {
                if byte == line::ACK {
                    self.queued = Some(Write::Data(self.shared.leds().locklight_argument()));
                }
            }
            _ if cmd == Command::Resend.code() => {
                // the reply to a resend is the retransmitted scan byte
                self.decode(byte);
            }
            _ if cmd & 0x80 == 0 => {
                // the lock-light argument byte itself
                if byte == line::ACK {
                    self.change_leds = false;
                }
            }
            _ => {}
        }
    }

    fn decode(&mut self, byte: u8) {
        match self.translator.feed(byte) {
            Decoded::Nothing => {}
            Decoded::Overrun => {
                crate::warn!("keyboard overrun");
                self.reporter.overrun();
            }
            Decoded::Key { usage, is_down } => {
                self.reporter.key_event(usage, is_down, self.shared.leds());
            }
        }
    }

    /// The keyboard came back from a reset with all keys up and its lights
    /// dark; restore the lights if the host had any on.
    fn keyboard_reset(&mut self) {
        self.reporter.clear_all();
        self.translator.reset();
        if self.shared.leds().any() {
            self.change_leds = true;
        }
    }

    async fn tick(&mut self) {
        if self.shared.take_leds_changed() {
            self.change_leds = true;
        }
        if self.escape_armed {
            // the empty report went out on the previous tick
            firmware_functions::reset_to_usb_boot();
            return;
        }
        if self.reporter.held(SCROLL_LOCK)
            && self.reporter.held(KEYPAD_MINUS)
            && self.reporter.held(RIGHT_SHIFT)
        {
            crate::info!("bootloader escape chord");
            self.escape_armed = true;
            self.reporter.clear_all();
        }
        self.reporter.emit().await;
        self.reporter.tick_pause();
    }

    fn pump_writes(&mut self) {
        if let Some(write) = self.queued.take() {
            if let Err(err) = self.try_write(write) {
                // ring busy or a write still unacknowledged; retry after it drains
                crate::debug!("write deferred: {:?}", err);
                self.queued = Some(write);
            }
            return;
        }
        if self.change_leds && self.protocol == Protocol::At && self.line.is_idle() {
            let _ = self.try_write(Write::Command(Command::SetLocklights));
        }
    }

    fn try_write(&mut self, write: Write) -> Result<(), line::Error> {
        match write {
            Write::Command(cmd) => self.line.send_command(cmd),
            Write::Data(byte) => self.line.send_at_command(byte),
        }
    }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
#[path = "converter_test.rs"]
mod test;
