use core::mem::MaybeUninit;

use embassy_usb::{
    control::{InResponse, OutResponse, Recipient, Request, RequestType},
    driver::Driver,
    types::InterfaceNumber,
    Builder, Config, Handler,
};

use crate::hid::{HidShared, HidWriter};
use crate::report;
use crate::REPORT_LEN;

// HID
const HID_DESC_DESCTYPE_HID: u8 = 0x21;
const HID_DESC_DESCTYPE_HID_REPORT: u8 = 0x22;
const HID_DESC_SPEC_1_11: [u8; 2] = [0x11, 0x01];
const HID_DESC_COUNTRY_UNSPEC: u8 = 0x00;

const HID_REQ_GET_REPORT: u8 = 0x01;
const HID_REQ_GET_IDLE: u8 = 0x02;
const HID_REQ_GET_PROTOCOL: u8 = 0x03;
const HID_REQ_SET_REPORT: u8 = 0x09;
const HID_REQ_SET_IDLE: u8 = 0x0a;
const HID_REQ_SET_PROTOCOL: u8 = 0x0b;

const SUBCLASS_BOOT: u8 = 1;
const PROTOCOL_KEYBOARD: u8 = 1;

/// Report-mode layout: a dense 168-bit array for usages 0x04..0xAC followed
/// by the eight modifier bits, no report ID. Boot mode reuses the same
/// endpoint with the fixed 8-byte format.
#[rustfmt::skip]
pub const REPORT_DESC: [u8; 57] = [
    0x05, 0x01, // (GLOBAL) USAGE_PAGE         0x0001 Generic Desktop Page
    0x09, 0x06, // (LOCAL)  USAGE              0x00010006 Keyboard (Application Collection)
    0xA1, 0x01, // (MAIN)   COLLECTION         0x01 Application
    0x05, 0x07, //   (GLOBAL) USAGE_PAGE         0x0007 Keyboard/Keypad Page
    0x19, 0x04, //   (LOCAL)  USAGE_MINIMUM      0x00070004 Keyboard A
    0x29, 0xAB, //   (LOCAL)  USAGE_MAXIMUM      0x000700AB
    0x15, 0x00, //   (GLOBAL) LOGICAL_MINIMUM    0x00 (0)
    0x25, 0x01, //   (GLOBAL) LOGICAL_MAXIMUM    0x01 (1)
    0x95, 0xA8, //   (GLOBAL) REPORT_COUNT       0xA8 (168) Number of fields
    0x75, 0x01, //   (GLOBAL) REPORT_SIZE        0x01 (1) Number of bits per field
    0x81, 0x02, //   (MAIN)   INPUT              (168 fields x 1 bit) 0=Data 1=Variable 0=Absolute
    0x05, 0x07, //   (GLOBAL) USAGE_PAGE         0x0007 Keyboard/Keypad Page
    0x19, 0xE0, //   (LOCAL)  USAGE_MINIMUM      0x000700E0 Keyboard LeftControl
    0x29, 0xE7, //   (LOCAL)  USAGE_MAXIMUM      0x000700E7 Keyboard Right GUI
    0x15, 0x00, //   (GLOBAL) LOGICAL_MINIMUM    0x00 (0)
    0x25, 0x01, //   (GLOBAL) LOGICAL_MAXIMUM    0x01 (1)
    0x95, 0x08, //   (GLOBAL) REPORT_COUNT       0x08 (8) Number of fields
    0x75, 0x01, //   (GLOBAL) REPORT_SIZE        0x01 (1) Number of bits per field
    0x81, 0x02, //   (MAIN)   INPUT              (8 fields x 1 bit) 0=Data 1=Variable 0=Absolute
    0x05, 0x08, //   (GLOBAL) USAGE_PAGE         0x0008 LED Page
    0x19, 0x01, //   (LOCAL)  USAGE_MINIMUM      0x00080001 Num Lock (On/Off Control)
    0x29, 0x05, //   (LOCAL)  USAGE_MAXIMUM      0x00080005 Kana (On/Off Control)
    0x95, 0x05, //   (GLOBAL) REPORT_COUNT       0x05 (5) Number of fields
    0x75, 0x01, //   (GLOBAL) REPORT_SIZE        0x01 (1) Number of bits per field
    0x91, 0x02, //   (MAIN)   OUTPUT             (5 fields x 1 bit) 0=Data 1=Variable 0=Absolute
    0x95, 0x01, //   (GLOBAL) REPORT_COUNT       0x01 (1) Number of fields
    0x75, 0x03, //   (GLOBAL) REPORT_SIZE        0x03 (3) Number of bits per field
    0x91, 0x01, //   (MAIN)   OUTPUT             (1 field x 3 bits) 1=Constant, pad
    0xC0,       // (MAIN)   END_COLLECTION     Application
];

/// Internal state for the USB HID interface.
pub struct State<'d> {
    control: MaybeUninit<Control<'d>>,
}

impl Default for State<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl State<'_> {
    pub const fn new() -> Self {
        State {
            control: MaybeUninit::uninit(),
        }
    }
}

const CONFIG_SIZE: usize = 128;
const BOS_SIZE: usize = 32;
const MSOS_SIZE: usize = 0;
const CONTROL_SIZE: usize = 256;

pub struct UsbBuffers {
    config_descriptor_buf: [u8; CONFIG_SIZE],
    bos_descriptor_buf: [u8; BOS_SIZE],
    msos_descriptor_buf: [u8; MSOS_SIZE],
    control_buf: [u8; CONTROL_SIZE],
}

impl Default for UsbBuffers {
    fn default() -> Self {
        Self {
            config_descriptor_buf: [0; CONFIG_SIZE],
            bos_descriptor_buf: [0; BOS_SIZE],
            msos_descriptor_buf: [0; MSOS_SIZE],
            control_buf: [0; CONTROL_SIZE],
        }
    }
}

pub struct Configurator<'d> {
    device_config: Option<Config<'d>>,
    max_packet_size: u16,
    poll_ms: u8,
}

impl<'d> Configurator<'d> {
    pub fn new(device_config: Config<'d>) -> Self {
        Self {
            device_config: Some(device_config),
            max_packet_size: device_config.max_packet_size_0 as u16,
            poll_ms: 1,
        }
    }

    pub fn usb_builder<D: Driver<'d>>(
        &mut self,
        driver: D,
        buffers: &'d mut UsbBuffers,
    ) -> Option<Builder<'d, D>> {
        self.device_config.take().map(|device_config| {
            Builder::new(
                driver,
                device_config,
                &mut buffers.config_descriptor_buf,
                &mut buffers.bos_descriptor_buf,
                &mut buffers.msos_descriptor_buf,
                &mut buffers.control_buf,
            )
        })
    }

    /// Adds the boot-capable keyboard interface and returns its writer.
    pub fn add_keyboard_iface<D: Driver<'d>>(
        &'d self,
        builder: &mut Builder<'d, D>,
        shared: &'d HidShared,
        state: &'d mut State<'d>,
    ) -> HidWriter<'d, D, REPORT_LEN> {
        let mut func = builder.function(3, SUBCLASS_BOOT, PROTOCOL_KEYBOARD);
        let mut iface = func.interface();
        let if_num = iface.interface_number();
        let mut alt = iface.alt_setting(3, SUBCLASS_BOOT, PROTOCOL_KEYBOARD, None);

        let len = REPORT_DESC.len();
        alt.descriptor(
            HID_DESC_DESCTYPE_HID,
            &[
                HID_DESC_SPEC_1_11[0],
                HID_DESC_SPEC_1_11[1],
                HID_DESC_COUNTRY_UNSPEC,
                1, // one descriptor follows
                HID_DESC_DESCTYPE_HID_REPORT,
                (len & 0xff) as u8,
                (len >> 8 & 0xff) as u8,
            ],
        );

        let ep_in = alt.endpoint_interrupt_in(self.max_packet_size, self.poll_ms);

        drop(func);

        let control = state.control.write(Control::new(if_num, shared));
        builder.handler(control);
        HidWriter::new(ep_in)
    }
}

struct Control<'d> {
    if_num: InterfaceNumber,
    shared: &'d HidShared,
    hid_descriptor: [u8; 9],
}

impl<'d> Control<'d> {
    fn new(if_num: InterfaceNumber, shared: &'d HidShared) -> Self {
        Control {
            if_num,
            shared,
            hid_descriptor: [
                9, // length, including this byte
                HID_DESC_DESCTYPE_HID,
                HID_DESC_SPEC_1_11[0],
                HID_DESC_SPEC_1_11[1],
                HID_DESC_COUNTRY_UNSPEC,
                1, // one descriptor follows
                HID_DESC_DESCTYPE_HID_REPORT,
                (REPORT_DESC.len() & 0xff) as u8,
                (REPORT_DESC.len() >> 8 & 0xff) as u8,
            ],
        }
    }
}

impl Handler for Control<'_> {
    fn reset(&mut self) {
        // back to report protocol, per the HID class default
        self.shared.set_boot_protocol(false);
    }

    fn control_out(&mut self, req: Request, data: &[u8]) -> Option<OutResponse> {
        if (req.request_type, req.recipient, req.index)
            != (
                RequestType::Class,
                Recipient::Interface,
                self.if_num.0 as u16,
            )
        {
            return None;
        }

        match req.request {
            HID_REQ_SET_IDLE => {
                // high byte is the rate in 4 ms units; zero means
                // "only report changes"
                self.shared.set_idle_rate((req.value >> 8) as u8);
                Some(OutResponse::Accepted)
            }
            HID_REQ_SET_REPORT => match data.first() {
                // no report IDs; the only output report is the LED bitmap
                Some(leds) => {
                    self.shared.set_leds(*leds);
                    Some(OutResponse::Accepted)
                }
                None => Some(OutResponse::Rejected),
            },
            HID_REQ_SET_PROTOCOL => {
                self.shared.set_boot_protocol(req.value == 0);
                Some(OutResponse::Accepted)
            }
            _ => Some(OutResponse::Rejected),
        }
    }

    fn control_in<'a>(&'a mut self, req: Request, buf: &'a mut [u8]) -> Option<InResponse<'a>> {
        if req.index != self.if_num.0 as u16 {
            return None;
        }

        match (req.request_type, req.recipient) {
            (RequestType::Standard, Recipient::Interface) => match req.request {
                Request::GET_DESCRIPTOR => match (req.value >> 8) as u8 {
                    HID_DESC_DESCTYPE_HID_REPORT => Some(InResponse::Accepted(&REPORT_DESC)),
                    HID_DESC_DESCTYPE_HID => Some(InResponse::Accepted(&self.hid_descriptor)),
                    _ => Some(InResponse::Rejected),
                },
                _ => Some(InResponse::Rejected),
            },
            (RequestType::Class, Recipient::Interface) => match req.request {
                HID_REQ_GET_REPORT => {
                    let report = self.shared.report();
                    let len = if self.shared.boot_protocol() {
                        let boot = report::boot_view(&report);
                        buf[..boot.len()].copy_from_slice(&boot);
                        boot.len()
                    } else {
                        buf[..REPORT_LEN].copy_from_slice(&report);
                        REPORT_LEN
                    };
                    Some(InResponse::Accepted(&buf[..len]))
                }
                HID_REQ_GET_IDLE => {
                    buf[0] = self.shared.idle_rate();
                    Some(InResponse::Accepted(&buf[0..1]))
                }
                HID_REQ_GET_PROTOCOL => {
                    buf[0] = if self.shared.boot_protocol() { 0 } else { 1 };
                    Some(InResponse::Accepted(&buf[0..1]))
                }
                _ => Some(InResponse::Rejected),
            },
            _ => None,
        }
    }
}
