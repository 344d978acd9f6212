use core::cell::RefCell;

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::{raw::RawMutex, Mutex};
use embassy_sync::signal::Signal;
use embassy_time::{block_for, with_timeout, Duration, Instant, Timer};
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal_async::digital::Wait;

/// Keyboard replies.
pub const ACK: u8 = 0xFA;
pub const RESEND: u8 = 0xFE;
pub const BAT_PASS: u8 = 0xAA;
pub const BAT_FAIL: u8 = 0xFC;

const RING_SIZE: usize = 64;

/// Window for the whole power-on self-test exchange before we assume a
/// keyboard that never announces itself.
const BAT_TIMEOUT: Duration = Duration::from_micros(2_500_000);
/// Gap after the ninth clocked bit that decides an XT frame is over and the
/// AT parity/stop cycles are not coming.
const BAT_TAIL_WINDOW: Duration = Duration::from_micros(400);
const BAT_BIT_WINDOW: Duration = Duration::from_millis(2);

/// Bus CLK held low to reset an XT keyboard (or kick a silent one).
const RESET_HOLD: Duration = Duration::from_micros(12_500);
/// Request-to-send: bus CLK held low before we place the start bit.
const RTS_HOLD: Duration = Duration::from_micros(60);
/// Data setup delay after each write-side clock edge.
const WRITE_SETTLE: Duration = Duration::from_micros(10);
/// Whole-write watchdog; the keyboard must clock all eleven cycles in this.
const WRITE_TIMEOUT: Duration = Duration::from_millis(20);

/// Runt clock pulses from old XT boards die within this.
const RUNT_PULSE_CHECK: Duration = Duration::from_micros(20);
/// Some XT boards raise a second idle edge right after a frame; edges inside
/// this window are not a new start bit.
const XT_EDGE_DEBOUNCE: Duration = Duration::from_micros(60);

const WRITE_STRIKE_LIMIT: u8 = 3;

const XT_BAT_FRAME: u16 = 0x155;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    Xt,
    At,
}

impl Protocol {
    pub const fn num_cycles(self) -> u8 {
        match self {
            Protocol::Xt => 9,
            Protocol::At => 11,
        }
    }

    /// Four slow bit cells of slack; 3.6 ms for XT, 4.4 ms for AT.
    pub fn frame_timeout(self) -> Duration {
        Duration::from_micros(self.num_cycles() as u64 * 400)
    }

    /// Extracts the data byte of a completed frame, or `None` when framing
    /// or parity is bad.
    fn validate(self, frame: u16) -> Option<u8> {
        match self {
            // 1 start (high) + 8 data
            Protocol::Xt => (frame & 1 == 1).then(|| (frame >> 1) as u8),
            // 1 start (low) + 8 data + odd parity + stop; the stop cell is
            // not checked, only start and the 9-bit parity group
            Protocol::At => {
                (frame & 1 == 0 && ((frame >> 1) & 0x1ff).count_ones() & 1 == 1)
                    .then(|| (frame >> 1) as u8)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// A write was requested while most of an incoming frame had clocked in.
    Clocking,
    RingBufferNotEmpty,
    /// AT-only command on an XT keyboard.
    AtXt,
    /// A write is already in flight or unacknowledged.
    Contention,
    FailedToReadBat,
    FailedToGetXtBat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Reset,
    Resend,
    SetLocklights,
    Echo,
    SetDelay,
    EnableScanning,
    DisableScanning,
    ResetChanges,
}

impl Command {
    pub const fn code(self) -> u8 {
        match self {
            Command::Reset => 0xff,
            Command::Resend => 0xfe,
            Command::SetLocklights => 0xed,
            Command::Echo => 0xee,
            Command::SetDelay => 0xf3,
            Command::EnableScanning => 0xf4,
            Command::DisableScanning => 0xf5,
            Command::ResetChanges => 0xf6,
        }
    }
}

/// One dequeued event. `data = None` means the most recent frame failed, the
/// lines are held low, and the main loop must resend (AT) or reset (XT).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Packet {
    pub data: Option<u8>,
    pub last_command: Option<u8>,
}

struct FrameRing {
    frames: [u8; RING_SIZE],
    head: u8,
    tail: u8,
    will_overflow: bool,
    fail: bool,
}

impl FrameRing {
    const fn new() -> Self {
        Self {
            frames: [0; RING_SIZE],
            head: 0,
            tail: 0,
            will_overflow: false,
            fail: false,
        }
    }

    fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    fn push(&mut self, byte: u8) -> bool {
        let next = (self.head + 1) & (RING_SIZE as u8 - 1);
        if next == self.tail {
            self.will_overflow = true;
            self.fail = true;
            return false;
        }
        self.frames[self.head as usize] = byte;
        self.head = next;
        true
    }

    fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.frames[self.tail as usize];
        self.tail = (self.tail + 1) & (RING_SIZE as u8 - 1);
        self.will_overflow = false;
        Some(byte)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteRequest {
    AtByte(u8),
    XtReset,
}

enum FrameOutcome {
    Done(u16),
    Abort(WriteRequest),
}

struct Shared {
    ring: FrameRing,
    last_command: Option<u8>,
    protocol: Option<Protocol>,
    clocking: bool,
    clocked_bits: u8,
    writing: bool,
}

/// State shared between the line task and the main loop. All mutation goes
/// through the blocking mutex; with `CriticalSectionRawMutex` that is the
/// masked-interrupts discipline the wire state machine requires.
pub struct LineChannel<M: RawMutex> {
    shared: Mutex<M, RefCell<Shared>>,
    rx: Signal<M, ()>,
    tx: Signal<M, WriteRequest>,
}

impl<M: RawMutex> Default for LineChannel<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> LineChannel<M> {
    pub const fn new() -> Self {
        Self {
            shared: Mutex::new(RefCell::new(Shared {
                ring: FrameRing::new(),
                last_command: None,
                protocol: None,
                clocking: false,
                clocked_bits: 0,
                writing: false,
            })),
            rx: Signal::new(),
            tx: Signal::new(),
        }
    }

    pub fn protocol(&self) -> Option<Protocol> {
        self.shared.lock(|s| s.borrow().protocol)
    }

    /// Dequeues the next received frame, or the one-shot failure marker.
    /// Frames already received before a failure keep wire order; the marker
    /// follows them and is delivered exactly once.
    pub fn get_packet(&self) -> Option<Packet> {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            if let Some(byte) = s.ring.pop() {
                let last_command = s.last_command.take();
                return Some(Packet {
                    data: Some(byte),
                    last_command,
                });
            }
            if s.ring.fail {
                s.ring.fail = false;
                s.ring.will_overflow = false;
                let last_command = s.last_command.take();
                return Some(Packet {
                    data: None,
                    last_command,
                });
            }
            None
        })
    }

    /// Resolves once `get_packet` has something to deliver.
    pub async fn packet_ready(&self) {
        loop {
            if self
                .shared
                .lock(|s| {
                    let s = s.borrow();
                    s.ring.fail || !s.ring.is_empty()
                })
            {
                return;
            }
            self.rx.wait().await;
        }
    }

    /// Nothing buffered, no failure latched, no write in flight or awaiting
    /// its reply.
    pub fn is_idle(&self) -> bool {
        self.shared.lock(|s| {
            let s = s.borrow();
            s.ring.is_empty() && !s.ring.fail && !s.writing && s.last_command.is_none()
        })
    }

    pub fn send_command(&self, command: Command) -> Result<(), Error> {
        if self.protocol() == Some(Protocol::Xt) {
            if command != Command::Reset {
                return Err(Error::AtXt);
            }
            return self.queue_write(command.code(), WriteRequest::XtReset);
        }
        self.queue_write(command.code(), WriteRequest::AtByte(command.code()))
    }

    /// Queues a raw byte write; used for command arguments such as the
    /// lock-light bitmap that follows 0xED.
    pub fn send_at_command(&self, byte: u8) -> Result<(), Error> {
        if self.protocol() == Some(Protocol::Xt) {
            return Err(Error::AtXt);
        }
        self.queue_write(byte, WriteRequest::AtByte(byte))
    }

    fn queue_write(&self, byte: u8, request: WriteRequest) -> Result<(), Error> {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            if s.writing || s.last_command.is_some() {
                return Err(Error::Contention);
            }
            if !s.ring.is_empty() || s.ring.fail {
                return Err(Error::RingBufferNotEmpty);
            }
            if s.clocking && s.clocked_bits > 8 {
                return Err(Error::Clocking);
            }
            s.last_command = Some(byte);
            s.writing = true;
            Ok(())
        })?;
        self.tx.signal(request);
        Ok(())
    }

    pub(crate) fn set_protocol(&self, protocol: Protocol) {
        self.shared.lock(|s| s.borrow_mut().protocol = Some(protocol));
    }

    pub(crate) fn frame_started(&self) {
        self.shared.lock(|s| {
            let mut s = s.borrow_mut();
            s.clocking = true;
            s.clocked_bits = 0;
        });
    }

    pub(crate) fn bit_clocked(&self, bits: u8) {
        self.shared.lock(|s| s.borrow_mut().clocked_bits = bits);
    }

    pub(crate) fn frame_ended(&self) {
        self.shared.lock(|s| s.borrow_mut().clocking = false);
    }

    pub(crate) fn push_frame(&self, byte: u8) -> bool {
        let pushed = self.shared.lock(|s| s.borrow_mut().ring.push(byte));
        self.rx.signal(());
        pushed
    }

    pub(crate) fn latch_fail(&self) {
        self.shared.lock(|s| s.borrow_mut().ring.fail = true);
        self.rx.signal(());
    }

    pub(crate) async fn next_write(&self) -> WriteRequest {
        self.tx.wait().await
    }

    pub(crate) fn write_done(&self) {
        self.shared.lock(|s| s.borrow_mut().writing = false);
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub(crate) fn try_take_write(&self) -> Option<WriteRequest> {
        let request = self.tx.try_take();
        if request.is_some() {
            self.write_done();
        }
        request
    }
}

/// The wire-side half: owns the four GPIO pins and turns edges into frames.
///
/// The level shifter inverts both directions: an input pin reading high means
/// the 5 V line is low, and driving an output high pulls the 5 V line low.
pub struct LineEngine<'c, I: InputPin + Wait, O: OutputPin, M: RawMutex> {
    clk_in: I,
    data_in: I,
    clk_out: O,
    data_out: O,
    channel: &'c LineChannel<M>,
    protocol: Protocol,
    legacy: bool,
    nak_strikes: u8,
    last_frame_end: Instant,
    bat_timeout: Duration,
}

impl<'c, I: InputPin + Wait, O: OutputPin, M: RawMutex> LineEngine<'c, I, O, M> {
    pub fn new(clk_in: I, data_in: I, clk_out: O, data_out: O, channel: &'c LineChannel<M>) -> Self {
        Self {
            clk_in,
            data_in,
            clk_out,
            data_out,
            channel,
            protocol: Protocol::At,
            legacy: false,
            nak_strikes: 0,
            last_frame_end: Instant::MIN,
            bat_timeout: BAT_TIMEOUT,
        }
    }

    /// Shrinks the detection window; keyboard simulators should not have to
    /// stay silent for the full two and a half seconds.
    #[cfg(any(test, feature = "test-utils"))]
    pub fn bat_timeout(mut self, timeout: Duration) -> Self {
        self.bat_timeout = timeout;
        self
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy
    }

    /// Waits for the keyboard's power-on self-test and decides the protocol
    /// from its framing: nine clocked bits are an XT BAT, eleven an AT one.
    /// A keyboard that stays silent is reset once and retried as legacy XT.
    ///
    /// Leaves both lines held low; `run` releases them once spawned.
    pub async fn init(&mut self) -> Result<Protocol, Error> {
        self.release_clk();
        self.release_data();
        let mut retried = false;
        loop {
            match with_timeout(self.bat_timeout, self.read_bat()).await {
                Ok(result) => {
                    let protocol = result?;
                    self.protocol = protocol;
                    self.channel.set_protocol(protocol);
                    self.inhibit();
                    self.last_frame_end = Instant::now();
                    crate::info!("detected {:?} keyboard", protocol);
                    return Ok(protocol);
                }
                Err(_timeout) => {
                    if retried {
                        return Err(Error::FailedToGetXtBat);
                    }
                    // no BAT at all: force a reset and listen once more,
                    // assuming an old XT board from here on
                    retried = true;
                    self.legacy = true;
                    self.pulse_reset().await;
                }
            }
        }
    }

    async fn read_bat(&mut self) -> Result<Protocol, Error> {
        let _ = self.clk_in.wait_for_rising_edge().await;
        let mut frame: u16 = 0;
        let mut bits = 0u8;
        while bits < Protocol::At.num_cycles() {
            let window = if bits >= Protocol::Xt.num_cycles() {
                BAT_TAIL_WINDOW
            } else {
                BAT_BIT_WINDOW
            };
            match with_timeout(window, self.clk_in.wait_for_falling_edge()).await {
                Ok(_) => {
                    frame |= (self.data_bit() as u16) << bits;
                    bits += 1;
                }
                Err(_timeout) => break,
            }
        }
        match bits {
            9 if frame == XT_BAT_FRAME => Ok(Protocol::Xt),
            11 if Protocol::At.validate(frame) == Some(BAT_PASS) => Ok(Protocol::At),
            _ => {
                crate::error!("bad BAT frame {:#x} ({} bits)", frame, bits);
                Err(Error::FailedToReadBat)
            }
        }
    }

    pub async fn run(&mut self) -> ! {
        self.release_clk();
        self.release_data();
        loop {
            let channel = self.channel;
            match select(channel.next_write(), self.clk_in.wait_for_rising_edge()).await {
                Either::First(request) => self.perform_write(request).await,
                Either::Second(_) => self.receive_frame().await,
            }
        }
    }

    async fn receive_frame(&mut self) {
        if self.protocol == Protocol::Xt && self.last_frame_end.elapsed() < XT_EDGE_DEBOUNCE {
            // second idle edge straight after a frame, not a start bit
            return;
        }
        self.channel.frame_started();
        let cycles = self.protocol.num_cycles();
        let result = with_timeout(self.protocol.frame_timeout(), self.clock_frame(cycles)).await;
        self.channel.frame_ended();
        self.last_frame_end = Instant::now();
        match result {
            Ok(FrameOutcome::Done(frame)) => self.complete_frame(frame),
            Ok(FrameOutcome::Abort(request)) => {
                // a write stole the bus; the request-to-send hold makes the
                // keyboard drop the partial frame and retransmit later
                self.perform_write(request).await;
            }
            Err(_timeout) => {
                crate::warn!("frame timed out mid-clock");
                self.fail();
            }
        }
    }

    async fn clock_frame(&mut self, cycles: u8) -> FrameOutcome {
        let mut frame: u16 = 0;
        let mut bits = 0u8;
        while bits < cycles {
            if bits <= 8 {
                // still abortable; a queued write may claim the bus
                match select(
                    self.channel.next_write(),
                    self.clk_in.wait_for_falling_edge(),
                )
                .await
                {
                    Either::First(request) => return FrameOutcome::Abort(request),
                    Either::Second(_) => {}
                }
            } else {
                let _ = self.clk_in.wait_for_falling_edge().await;
            }
            let bit = self.data_bit();
            if self.legacy {
                block_for(RUNT_PULSE_CHECK);
                if self.clk_in.is_high().unwrap_or(false) {
                    // runt clock pulse; the cell never happened
                    continue;
                }
            }
            frame |= (bit as u16) << bits;
            bits += 1;
            self.channel.bit_clocked(bits);
        }
        FrameOutcome::Done(frame)
    }

    fn complete_frame(&mut self, frame: u16) {
        match self.protocol.validate(frame) {
            Some(byte) => {
                if !self.channel.push_frame(byte) {
                    crate::warn!("frame ring overflow");
                    self.inhibit();
                }
            }
            None => {
                crate::warn!("bad frame {:#x}", frame);
                self.fail();
            }
        }
    }

    async fn perform_write(&mut self, request: WriteRequest) {
        let acked = match request {
            WriteRequest::XtReset => {
                self.pulse_reset().await;
                true
            }
            WriteRequest::AtByte(byte) => {
                match with_timeout(WRITE_TIMEOUT, self.write_at_byte(byte)).await {
                    Ok(acked) => acked,
                    Err(_timeout) => false,
                }
            }
        };
        self.channel.write_done();
        self.last_frame_end = Instant::now();
        if acked {
            self.nak_strikes = 0;
            return;
        }
        crate::warn!("keyboard did not take the written byte");
        self.fail();
        self.nak_strikes += 1;
        if self.nak_strikes >= WRITE_STRIKE_LIMIT {
            // writes stopped landing altogether; put the keyboard back
            // through its self-test instead of hammering resends
            crate::error!("write failed {} times, forcing keyboard reset", WRITE_STRIKE_LIMIT);
            self.nak_strikes = 0;
            self.pulse_reset().await;
        }
    }

    /// Clocks one byte out. The keyboard supplies the clock once we release
    /// it after the request-to-send hold; we place each bit after its edge.
    async fn write_at_byte(&mut self, byte: u8) -> bool {
        self.hold_clk_low();
        Timer::after(RTS_HOLD).await;
        self.hold_data_low(); // start bit
        block_for(WRITE_SETTLE);
        self.release_clk();

        let parity = byte.count_ones() & 1 == 0;
        let mut bits = byte as u16 | ((parity as u16) << 8);
        for cell in 0..10 {
            let _ = self.clk_in.wait_for_falling_edge().await;
            block_for(WRITE_SETTLE);
            if cell < 9 {
                if bits & 1 == 1 {
                    self.release_data();
                } else {
                    self.hold_data_low();
                }
                bits >>= 1;
            } else {
                self.release_data(); // stop bit
            }
        }

        // the keyboard pulls DATA low over the last cell to acknowledge
        let _ = self.clk_in.wait_for_falling_edge().await;
        self.bus_data_is_low()
    }

    async fn pulse_reset(&mut self) {
        self.release_data();
        self.hold_clk_low();
        Timer::after(RESET_HOLD).await;
        self.release_clk();
    }

    fn fail(&mut self) {
        self.inhibit();
        self.channel.latch_fail();
    }

    fn inhibit(&mut self) {
        self.hold_clk_low();
        self.hold_data_low();
    }

    // Logical value of the (inverted) data line.
    fn data_bit(&mut self) -> bool {
        self.data_in.is_low().unwrap_or(false)
    }

    fn bus_data_is_low(&mut self) -> bool {
        self.data_in.is_high().unwrap_or(false)
    }

    fn hold_clk_low(&mut self) {
        let _ = self.clk_out.set_high();
    }

    fn release_clk(&mut self) {
        let _ = self.clk_out.set_low();
    }

    fn hold_data_low(&mut self) {
        let _ = self.data_out.set_high();
    }

    fn release_data(&mut self) {
        let _ = self.data_out.set_low();
    }
}

#[cfg(test)]
extern crate std;

#[cfg(test)]
#[path = "line_test.rs"]
mod test;
