#![no_std]
#![no_main]

use defmt::{error, info};
use defmt_rtt as _;
use panic_probe as _;

use embassy_executor::Spawner;
use embassy_rp::bind_interrupts;
use embassy_rp::gpio::{Drive, Input, Level, Output, Pull, SlewRate};
use embassy_rp::peripherals::USB;
use embassy_rp::usb::{Driver, InterruptHandler};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_time::Timer;
use static_cell::StaticCell;

use picoatxt_firmware::converter::Converter;
use picoatxt_firmware::firmware_functions;
use picoatxt_firmware::hid::{HidShared, HidWriter};
use picoatxt_firmware::line::{LineChannel, LineEngine};
use picoatxt_firmware::report::Reporter;
use picoatxt_firmware::usb::{Configurator, State, UsbBuffers};

// ---------------- User Config ------------------
// The keyboard connector arrives through an inverting 5 V level shifter:
// CLK on GPIO21 in / GPIO11 out, DATA on GPIO20 in / GPIO10 out.

const VENDOR_ID: u16 = 0x1209;
const PRODUCT_ID: u16 = 0xa1c0;
const MANUFACTURER: &str = "picoatxt";
const PRODUCT: &str = "XT/AT keyboard converter";
const SERIAL_NUMBER: &str = "picoatxt:0001";
const MAX_POWER_MA: u16 = 100;

// ----------- End of user config ----------------

bind_interrupts!(struct Irqs {
    USBCTRL_IRQ => InterruptHandler<USB>;
});

fn reset() {
    cortex_m::peripheral::SCB::sys_reset()
}

fn reset_to_usb_boot() {
    embassy_rp::rom_data::reset_to_usb_boot(0, 0);
    #[allow(clippy::empty_loop)]
    loop {
        // Waiting for the reset to happen
    }
}

type UsbDriver = Driver<'static, USB>;
type Engine = LineEngine<'static, Input<'static>, Output<'static>, CriticalSectionRawMutex>;

static LINE_CHANNEL: LineChannel<CriticalSectionRawMutex> = LineChannel::new();
static HID_SHARED: HidShared = HidShared::new();

static USB_BUFFERS: StaticCell<UsbBuffers> = StaticCell::new();
static USB_CONFIG: StaticCell<Configurator<'static>> = StaticCell::new();
static USB_STATE: StaticCell<State<'static>> = StaticCell::new();

#[embassy_executor::task]
async fn line(mut engine: Engine) {
    engine.run().await
}

#[embassy_executor::task]
async fn convert(mut converter: Converter<'static, UsbDriver, CriticalSectionRawMutex>) {
    converter.run().await
}

fn output_pin(pin: Output<'static>) -> Output<'static> {
    let mut pin = pin;
    pin.set_drive_strength(Drive::_2mA);
    pin.set_slew_rate(SlewRate::Fast);
    pin
}

#[embassy_executor::main]
async fn main(spawner: Spawner) -> ! {
    let p = embassy_rp::init(Default::default());

    let clk_in = Input::new(p.PIN_21, Pull::Down);
    let data_in = Input::new(p.PIN_20, Pull::Down);
    let clk_out = output_pin(Output::new(p.PIN_11, Level::Low));
    let data_out = output_pin(Output::new(p.PIN_10, Level::Low));
    let mut led = Output::new(p.PIN_25, Level::Low);

    firmware_functions::handle_reset(Some(&reset));
    firmware_functions::handle_reset_to_usb_boot(Some(&reset_to_usb_boot));

    let mut engine: Engine = LineEngine::new(clk_in, data_in, clk_out, data_out, &LINE_CHANNEL);
    let protocol = match engine.init().await {
        Ok(protocol) => protocol,
        Err(err) => loop {
            error!("no usable keyboard: {:?}", err);
            led.toggle();
            Timer::after_secs(1).await;
        },
    };
    info!("{:?} keyboard attached", protocol);
    led.set_high();

    let mut device_config = embassy_usb::Config::new(VENDOR_ID, PRODUCT_ID);
    device_config.manufacturer = Some(MANUFACTURER);
    device_config.product = Some(PRODUCT);
    device_config.serial_number = Some(SERIAL_NUMBER);
    device_config.max_power = MAX_POWER_MA;
    device_config.max_packet_size_0 = 64;

    let driver = Driver::new(p.USB, Irqs);
    let usb_buffers = USB_BUFFERS.init(UsbBuffers::default());
    let usb_config: &'static mut Configurator<'static> =
        USB_CONFIG.init(Configurator::new(device_config));
    let usb_state = USB_STATE.init(State::new());

    let mut builder = usb_config.usb_builder(driver, usb_buffers).unwrap();
    let writer: HidWriter<'static, UsbDriver, { picoatxt_firmware::REPORT_LEN }> =
        usb_config.add_keyboard_iface(&mut builder, &HID_SHARED, usb_state);
    let mut device = builder.build();

    let reporter = Reporter::new(writer, &HID_SHARED);
    let converter = Converter::new(protocol, &LINE_CHANNEL, &HID_SHARED, reporter);

    spawner.spawn(line(engine)).unwrap();
    spawner.spawn(convert(converter)).unwrap();

    device.run().await
}
