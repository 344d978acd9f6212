//! Simulated GPIO pins plus the keyboard side of the XT/AT wire.
//!
//! Pins are shared: the engine owns one clone, the simulator another, so the
//! simulator can both drive the engine's inputs and observe its outputs.
//! The same level-shifter inversion applies: a pin driven high means the
//! 5 V line is pulled low.

extern crate std;

use embassy_futures::yield_now;
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, signal::Signal};
use embedded_hal::digital::{Error, ErrorType, InputPin, OutputPin};
use embedded_hal_async::digital::Wait;
use std::rc::Rc;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug)]
pub struct TestError;

impl Error for TestError {
    fn kind(&self) -> embedded_hal::digital::ErrorKind {
        embedded_hal::digital::ErrorKind::Other
    }
}

struct PinShared {
    n: u8,
    state: Mutex<bool>,
    signal: Signal<NoopRawMutex, bool>,
}

#[derive(Clone)]
pub struct Pin(Rc<PinShared>);

impl core::fmt::Debug for Pin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Pin")
            .field("n", &self.0.n)
            .field("high", &*self.0.state.lock().unwrap())
            .finish()
    }
}

impl Pin {
    pub fn new(n: u8) -> Self {
        Self(Rc::new(PinShared {
            n,
            state: Mutex::new(false),
            signal: Signal::new(),
        }))
    }

    pub fn get(&self) -> bool {
        *self.0.state.lock().unwrap()
    }

    fn set(&self, high: bool) {
        let mut state = self.0.state.lock().unwrap();
        if *state != high {
            *state = high;
            self.0.signal.signal(high);
        }
    }
}

impl ErrorType for Pin {
    type Error = TestError;
}

impl InputPin for Pin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.get())
    }
}

impl OutputPin for Pin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.set(true);
        Ok(())
    }
}

impl Wait for Pin {
    async fn wait_for_high(&mut self) -> Result<(), Self::Error> {
        if self.get() {
            return Ok(());
        }
        while !self.0.signal.wait().await {}
        Ok(())
    }

    async fn wait_for_low(&mut self) -> Result<(), Self::Error> {
        if !self.get() {
            return Ok(());
        }
        while self.0.signal.wait().await {}
        Ok(())
    }

    async fn wait_for_rising_edge(&mut self) -> Result<(), Self::Error> {
        self.wait_for_low().await?;
        while !self.0.signal.wait().await {}
        Ok(())
    }

    async fn wait_for_falling_edge(&mut self) -> Result<(), Self::Error> {
        self.wait_for_high().await?;
        while self.0.signal.wait().await {}
        Ok(())
    }

    async fn wait_for_any_edge(&mut self) -> Result<(), Self::Error> {
        self.0.signal.wait().await;
        Ok(())
    }
}

/// Plays the device end of the wire. `clk`/`data` are the converter's input
/// pins (we drive them), `host_clk`/`host_data` its output pins (we read
/// them, inverted).
pub struct KeyboardSim {
    pub clk: Pin,
    pub data: Pin,
    pub host_clk: Pin,
    pub host_data: Pin,
}

impl KeyboardSim {
    /// Real-time gap; the converter debounces XT edges that follow a frame
    /// too closely, and its detection windows are real durations.
    pub fn settle(&self, micros: u64) {
        std::thread::sleep(Duration::from_micros(micros));
    }

    async fn pulse_clk(&mut self) {
        self.clk.set(true);
        yield_now().await;
        self.clk.set(false);
        yield_now().await;
    }

    async fn send_bit(&mut self, bit: bool) {
        self.data.set(!bit);
        yield_now().await;
        self.pulse_clk().await;
    }

    pub async fn send_xt_byte(&mut self, byte: u8) {
        self.settle(80);
        self.send_bit(true).await; // start
        for i in 0..8 {
            self.send_bit(byte & (1 << i) != 0).await;
        }
        self.data.set(false);
        yield_now().await;
    }

    pub async fn send_at_byte(&mut self, byte: u8) {
        let parity = byte.count_ones() & 1 == 0;
        self.send_at_frame(byte, parity).await;
    }

    /// Frame with an explicit parity bit, for exercising bad frames.
    pub async fn send_at_frame(&mut self, byte: u8, parity: bool) {
        self.send_bit(false).await; // start
        for i in 0..8 {
            self.send_bit(byte & (1 << i) != 0).await;
        }
        self.send_bit(parity).await;
        self.send_bit(true).await; // stop
        self.data.set(false);
        yield_now().await;
    }

    /// Waits out the converter's request-to-send hold, clocks the written
    /// frame in, acknowledges it, and returns the decoded byte.
    pub async fn receive_host_byte(&mut self) -> u8 {
        let _ = self.host_clk.wait_for_high().await;
        let _ = self.host_clk.wait_for_low().await;
        assert!(self.host_data.get(), "no start bit on DATA");

        let mut bits = 0u16;
        for cell in 0..10 {
            self.pulse_clk().await;
            let bit = !self.host_data.get();
            bits |= (bit as u16) << cell;
        }
        assert!(bits & (1 << 9) != 0, "stop bit not released");
        let byte = (bits & 0xff) as u8;
        let parity = bits & (1 << 8) != 0;
        assert_eq!(
            (byte.count_ones() & 1 == 0),
            parity,
            "bad parity for {byte:#x}"
        );

        // ack: pull DATA low over one more clock
        self.data.set(true);
        yield_now().await;
        self.pulse_clk().await;
        self.data.set(false);
        yield_now().await;
        byte
    }

    /// Swallows the written frame without acknowledging it.
    pub async fn receive_host_byte_no_ack(&mut self) -> u8 {
        let _ = self.host_clk.wait_for_high().await;
        let _ = self.host_clk.wait_for_low().await;
        let mut bits = 0u16;
        for cell in 0..10 {
            self.pulse_clk().await;
            let bit = !self.host_data.get();
            bits |= (bit as u16) << cell;
        }
        self.pulse_clk().await;
        (bits & 0xff) as u8
    }

    /// Waits for the converter to hold CLK low long enough to mean "reset".
    pub async fn wait_reset_pulse(&mut self) {
        let _ = self.host_clk.wait_for_high().await;
        let _ = self.host_clk.wait_for_low().await;
    }
}

/// Four fresh wire pins: `(engine pins, simulator)`.
pub fn wire() -> ((Pin, Pin, Pin, Pin), KeyboardSim) {
    let clk = Pin::new(1);
    let data = Pin::new(2);
    let host_clk = Pin::new(3);
    let host_data = Pin::new(4);
    (
        (clk.clone(), data.clone(), host_clk.clone(), host_data.clone()),
        KeyboardSim {
            clk,
            data,
            host_clk,
            host_data,
        },
    )
}
