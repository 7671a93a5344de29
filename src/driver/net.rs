//! UDP-attached LED devices (spec.md §4.5 "Variants" / §6 "UDP: a plain
//! `UdpSocket` per device, one write per refresh").
//!
//! Grounded on `original_source`'s `DriverNetLifx`/`DriverNetCololight`
//! classes for wire layout, and on `LedDeviceAWA_spi`/`ProviderUdp` for the
//! Adalight-over-UDP variant, which reuses [`super::adalight`]'s framing
//! unchanged — only the transport differs from the SPI variant.
//!
//! These backends use `std::net::UdpSocket` rather than `tokio::net::UdpSocket`:
//! [`super::LedDevice::update_leds`] is a synchronous, bounded-latency call
//! driven from the supervisor's blocking write path (see DESIGN.md), so a
//! blocking socket with a short write timeout matches the rest of the
//! driver layer better than threading an async runtime through a single
//! `sendto`.

use std::io::Write;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

use byteorder::{BigEndian, LittleEndian, WriteBytesExt};

use super::{adalight, DeviceConfig, DriverError, DriverRegistry, LedDevice};

fn invalid(msg: impl Into<String>) -> DriverError {
    DriverError::InvalidConfig(msg.into())
}

fn dial(addr: SocketAddr, write_timeout: Duration) -> Result<UdpSocket, DriverError> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(addr)?;
    socket.set_write_timeout(Some(write_timeout))?;
    Ok(socket)
}

/// Adalight "Awa" framing carried over UDP instead of a serial/SPI link —
/// same header, payload and Fletcher-16 trailer as [`super::spi::AdalightSpiDevice`].
pub struct AdalightUdpDevice {
    socket: Option<UdpSocket>,
    led_count: usize,
}

impl Default for AdalightUdpDevice {
    fn default() -> Self {
        Self { socket: None, led_count: 0 }
    }
}

impl LedDevice for AdalightUdpDevice {
    fn init(&mut self, config: &DeviceConfig) -> Result<(), DriverError> {
        self.led_count = config.led_count;
        let host = config.param_str("host").ok_or_else(|| invalid("missing `host`"))?;
        let port = config.param_u64("port", 19446) as u16;
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| invalid("invalid host/port"))?;
        self.socket = Some(dial(addr, Duration::from_millis(200))?);
        Ok(())
    }

    fn open(&mut self) -> Result<(), DriverError> {
        if self.socket.is_none() {
            return Err(DriverError::NotOpen);
        }
        Ok(())
    }

    fn update_leds(&mut self, colors: &[(u8, u8, u8)]) -> Result<i32, DriverError> {
        let socket = self.socket.as_ref().ok_or(DriverError::NotOpen)?;
        let frame = adalight::build_frame(colors);
        let n = socket.send(&frame)?;
        Ok(n as i32)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.socket = None;
        Ok(())
    }

    fn led_count(&self) -> usize {
        self.led_count
    }

    fn name(&self) -> &'static str {
        "adalight-udp"
    }
}

/// Cololight framing (spec.md §6): a fixed 10-byte header
/// (`'S','Z',appId(u16 BE),0x00,size(u32 BE),0x00`), a 16-byte all-zero
/// security block, then a TL1 command `{verb, ctag, len(u16 BE), payload}`.
/// We emit a single `SET` command carrying the raw RGB array as payload;
/// discovery/handshake and the other TL1 verbs (`READ`, `SETEEPROM`,
/// `SETVAR`) are out of scope (service discovery is a non-goal).
pub struct CololightDevice {
    socket: Option<UdpSocket>,
    led_count: usize,
    ctag: u8,
}

/// `appId` TL1 sets into header bytes 3-4 (`DriverNetCololight.cpp`'s
/// `sendRequest`) on every frame it writes.
const COLOLIGHT_APP_ID: u16 = 0x8000;
const TL1_VERB_SET: u8 = 1;

impl Default for CololightDevice {
    fn default() -> Self {
        Self { socket: None, led_count: 0, ctag: 0 }
    }
}

impl CololightDevice {
    fn build_frame(&mut self, colors: &[(u8, u8, u8)]) -> Vec<u8> {
        let mut payload = Vec::with_capacity(colors.len() * 3);
        for &(r, g, b) in colors {
            payload.push(r);
            payload.push(g);
            payload.push(b);
        }
        self.ctag = self.ctag.wrapping_add(1);
        let packet_len = 10 + 16 + 4 + payload.len();
        let mut out = Vec::with_capacity(packet_len);
        out.push(b'S');
        out.push(b'Z');
        out.write_u16::<BigEndian>(COLOLIGHT_APP_ID).expect("write to Vec never fails");
        out.push(0);
        out.write_u32::<BigEndian>(packet_len as u32).expect("write to Vec never fails");
        out.push(0);
        out.extend_from_slice(&[0u8; 16]);
        out.push(TL1_VERB_SET);
        out.push(self.ctag);
        out.write_u16::<BigEndian>(payload.len() as u16).expect("write to Vec never fails");
        out.extend_from_slice(&payload);
        out
    }
}

impl LedDevice for CololightDevice {
    fn init(&mut self, config: &DeviceConfig) -> Result<(), DriverError> {
        self.led_count = config.led_count;
        let host = config.param_str("host").ok_or_else(|| invalid("missing `host`"))?;
        let port = config.param_u64("port", 8900) as u16;
        let addr: SocketAddr = format!("{host}:{port}")
            .parse()
            .map_err(|_| invalid("invalid host/port"))?;
        self.socket = Some(dial(addr, Duration::from_millis(200))?);
        Ok(())
    }

    fn open(&mut self) -> Result<(), DriverError> {
        if self.socket.is_none() {
            return Err(DriverError::NotOpen);
        }
        Ok(())
    }

    fn update_leds(&mut self, colors: &[(u8, u8, u8)]) -> Result<i32, DriverError> {
        let socket = self.socket.as_ref().ok_or(DriverError::NotOpen)?;
        let frame = self.build_frame(colors);
        let n = socket.send(&frame)?;
        Ok(n as i32)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.socket = None;
        Ok(())
    }

    fn led_count(&self) -> usize {
        self.led_count
    }

    fn name(&self) -> &'static str {
        "cololight"
    }
}

/// LIFX LAN protocol, `SetColor`/`SetPower` only — discovery (`GetService`)
/// is out of scope, so the device targets a pre-configured IP. Header
/// layout follows the public LIFX LAN protocol spec: 8-byte frame, 8-byte
/// frame-address (MAC target), 8-byte protocol header, then payload.
pub struct LifxDevice {
    socket: Option<UdpSocket>,
    led_count: usize,
    target_mac: [u8; 6],
    sequence: u8,
}

const LIFX_PORT: u16 = 56700;
const LIFX_SET_COLOR: u16 = 102;
const LIFX_SET_POWER: u16 = 21;

impl Default for LifxDevice {
    fn default() -> Self {
        Self { socket: None, led_count: 0, target_mac: [0; 6], sequence: 0 }
    }
}

impl LifxDevice {
    fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn header(&self, size: u16, msg_type: u16, sequence: u8) -> Vec<u8> {
        let mut out = Vec::with_capacity(36);
        out.write_u16::<LittleEndian>(size).unwrap();
        // protocol=1024, origin=0, tagged=0, addressable=1 -> 0x1400 little-endian.
        out.write_u16::<LittleEndian>(0x1400).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap(); // source
        out.extend_from_slice(&self.target_mac);
        out.extend_from_slice(&[0u8; 2]); // target padding to 8 bytes
        out.extend_from_slice(&[0u8; 6]); // frame-address reserved
        out.push(0); // res_required/ack_required
        out.push(sequence);
        out.extend_from_slice(&[0u8; 8]); // protocol header reserved
        out.write_u16::<LittleEndian>(msg_type).unwrap();
        out.extend_from_slice(&[0u8; 2]);
        out
    }

    /// `SetColor` payload: reserved byte, HSBK (16 bits each), transition
    /// duration in ms. The strip's mean color drives a single HSBK command
    /// since LIFX bulbs are single-zone fixtures.
    fn set_color_frame(&mut self, hsbk: (u16, u16, u16, u16)) -> Vec<u8> {
        let mut payload = vec![0u8];
        payload.write_u16::<LittleEndian>(hsbk.0).unwrap();
        payload.write_u16::<LittleEndian>(hsbk.1).unwrap();
        payload.write_u16::<LittleEndian>(hsbk.2).unwrap();
        payload.write_u16::<LittleEndian>(hsbk.3).unwrap();
        payload.write_u32::<LittleEndian>(0).unwrap(); // duration_ms
        let sequence = self.next_sequence();
        let mut frame = self.header((36 + payload.len()) as u16, LIFX_SET_COLOR, sequence);
        frame.extend_from_slice(&payload);
        frame
    }
}

/// Converts an 8-bit RGB mean color to LIFX's 16-bit HSBK fields.
fn rgb_to_hsbk(r: u8, g: u8, b: u8) -> (u16, u16, u16, u16) {
    let rf = r as f32 / 255.0;
    let gf = g as f32 / 255.0;
    let bf = b as f32 / 255.0;
    let max = rf.max(gf).max(bf);
    let min = rf.min(gf).min(bf);
    let delta = max - min;
    let hue_deg = if delta == 0.0 {
        0.0
    } else if max == rf {
        60.0 * (((gf - bf) / delta) % 6.0)
    } else if max == gf {
        60.0 * ((bf - rf) / delta + 2.0)
    } else {
        60.0 * ((rf - gf) / delta + 4.0)
    };
    let hue_deg = if hue_deg < 0.0 { hue_deg + 360.0 } else { hue_deg };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };
    let hue = (hue_deg / 360.0 * 65535.0) as u16;
    let sat = (saturation * 65535.0) as u16;
    let brightness = (max * 65535.0) as u16;
    (hue, sat, brightness, 3500)
}

impl LedDevice for LifxDevice {
    fn init(&mut self, config: &DeviceConfig) -> Result<(), DriverError> {
        self.led_count = config.led_count;
        let host = config.param_str("host").ok_or_else(|| invalid("missing `host`"))?;
        let addr: SocketAddr = format!("{host}:{LIFX_PORT}")
            .parse()
            .map_err(|_| invalid("invalid host"))?;
        if let Some(mac) = config.param_str("mac") {
            let mut bytes = [0u8; 6];
            for (i, part) in mac.split(':').enumerate().take(6) {
                bytes[i] = u8::from_str_radix(part, 16).map_err(|_| invalid("invalid mac"))?;
            }
            self.target_mac = bytes;
        }
        self.socket = Some(dial(addr, Duration::from_millis(200))?);
        Ok(())
    }

    fn open(&mut self) -> Result<(), DriverError> {
        if self.socket.is_none() {
            return Err(DriverError::NotOpen);
        }
        Ok(())
    }

    fn switch_on(&mut self) -> Result<(), DriverError> {
        let socket = self.socket.as_ref().ok_or(DriverError::NotOpen)?;
        let sequence = self.next_sequence();
        let mut payload = vec![];
        payload.write_u16::<LittleEndian>(65535).unwrap();
        let mut frame = self.header((36 + payload.len()) as u16, LIFX_SET_POWER, sequence);
        frame.extend_from_slice(&payload);
        socket.send(&frame)?;
        Ok(())
    }

    fn switch_off(&mut self) -> Result<(), DriverError> {
        let socket = self.socket.as_ref().ok_or(DriverError::NotOpen)?;
        let sequence = self.next_sequence();
        let mut payload = vec![];
        payload.write_u16::<LittleEndian>(0).unwrap();
        let mut frame = self.header((36 + payload.len()) as u16, LIFX_SET_POWER, sequence);
        frame.extend_from_slice(&payload);
        socket.send(&frame)?;
        Ok(())
    }

    fn update_leds(&mut self, colors: &[(u8, u8, u8)]) -> Result<i32, DriverError> {
        let mean = if colors.is_empty() {
            (0, 0, 0)
        } else {
            let (mut r, mut g, mut b) = (0u32, 0u32, 0u32);
            for &(cr, cg, cb) in colors {
                r += cr as u32;
                g += cg as u32;
                b += cb as u32;
            }
            let n = colors.len() as u32;
            ((r / n) as u8, (g / n) as u8, (b / n) as u8)
        };
        let hsbk = rgb_to_hsbk(mean.0, mean.1, mean.2);
        let frame = self.set_color_frame(hsbk);
        let socket = self.socket.as_ref().ok_or(DriverError::NotOpen)?;
        let n = socket.send(&frame)?;
        Ok(n as i32)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.socket = None;
        Ok(())
    }

    fn led_count(&self) -> usize {
        self.led_count
    }

    fn name(&self) -> &'static str {
        "lifx"
    }
}

pub fn register_builtins(registry: &mut DriverRegistry) {
    registry.register("adalight-udp", || Box::new(AdalightUdpDevice::default()));
    registry.register("cololight", || Box::new(CololightDevice::default()));
    registry.register("lifx", || Box::new(LifxDevice::default()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cololight_frame_has_header_security_block_and_command() {
        let mut device = CololightDevice::default();
        let frame = device.build_frame(&[(1, 2, 3), (4, 5, 6)]);
        assert_eq!(&frame[0..2], b"SZ");
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), COLOLIGHT_APP_ID);
        assert_eq!(frame[4], 0);
        assert_eq!(u32::from_be_bytes([frame[5], frame[6], frame[7], frame[8]]), frame.len() as u32);
        assert_eq!(frame[9], 0);
        assert_eq!(&frame[10..26], &[0u8; 16]);
        assert_eq!(frame[26], TL1_VERB_SET);
        assert_eq!(u16::from_be_bytes([frame[28], frame[29]]), 6);
        assert_eq!(&frame[30..36], &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn cololight_ctag_increments_per_frame() {
        let mut device = CololightDevice::default();
        let first = device.build_frame(&[]);
        let second = device.build_frame(&[]);
        assert_eq!(first[27] + 1, second[27]);
    }

    #[test]
    fn rgb_to_hsbk_white_has_zero_saturation() {
        let (_, sat, brightness, _) = rgb_to_hsbk(255, 255, 255);
        assert_eq!(sat, 0);
        assert!(brightness > 60000);
    }

    #[test]
    fn rgb_to_hsbk_black_has_zero_brightness() {
        let (_, _, brightness, _) = rgb_to_hsbk(0, 0, 0);
        assert_eq!(brightness, 0);
    }

    #[test]
    fn lifx_header_is_36_bytes() {
        let device = LifxDevice::default();
        let header = device.header(40, LIFX_SET_COLOR, 1);
        assert_eq!(header.len(), 36);
        assert_eq!(u16::from_le_bytes([header[0], header[1]]), 40);
    }
}
