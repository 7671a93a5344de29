//! SPI-attached LED strips: a `spidev` character-device transport plus one
//! formatter per chip family (spec.md §4.5 "Variants" / §6 "SPI: character-
//! device I/O with `SPI_IOC_WR_MODE`, `SPI_IOC_WR_BITS_PER_WORD`,
//! `SPI_IOC_WR_MAX_SPEED_HZ`").
//!
//! Grounded on `original_source`'s `ProviderSpi::open`/`writeBytes` for the
//! transport (open the character device, set mode/bits-per-word/speed via
//! ioctl, one `ioctl(SPI_IOC_MESSAGE)` per frame) and on the per-chip
//! `DriverSpi*` headers for the framing each formatter below reproduces;
//! `LedDeviceAWA_spi` is the Adalight-over-SPI variant, sharing
//! [`super::adalight`]'s header/Fletcher-16 framing with the UDP transport.

use std::io::Write;

use spidev::{SpiModeFlags, Spidev, SpidevOptions};

use super::{adalight, DeviceConfig, DriverError, DriverRegistry, LedDevice};
use crate::color::WhiteChannelRule;

/// Opens `/dev/spidevX.Y` and configures mode/bits-per-word/speed, matching
/// `ProviderSpi::open`.
pub struct SpiTransport {
    device_path: String,
    speed_hz: u32,
    mode: SpiModeFlags,
    handle: Option<Spidev>,
}

impl SpiTransport {
    pub fn new(device_path: impl Into<String>, speed_hz: u32) -> Self {
        Self {
            device_path: device_path.into(),
            speed_hz,
            mode: SpiModeFlags::SPI_MODE_0,
            handle: None,
        }
    }

    pub fn open(&mut self) -> Result<(), DriverError> {
        let mut dev = Spidev::open(&self.device_path)?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(self.speed_hz)
            .mode(self.mode)
            .build();
        dev.configure(&options)?;
        self.handle = Some(dev);
        Ok(())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> Result<i32, DriverError> {
        let dev = self.handle.as_mut().ok_or(DriverError::NotOpen)?;
        dev.write_all(data)?;
        Ok(data.len() as i32)
    }

    pub fn close(&mut self) {
        self.handle = None;
    }
}

/// Per-chip wire formatting, separated from the transport so every chip can
/// share [`SpiTransport`] (spec.md §4.5: "each formats bits, start/end
/// latch bytes, optional global brightness, and checksums per chip
/// datasheet").
pub trait ChipFormat: Send {
    fn encode(&self, colors: &[(u8, u8, u8)]) -> Vec<u8>;
}

/// APA102/HD108-family clocked framing: 4 zero start bytes, one `0xE0 |
/// brightness(5 bits)`-prefixed BGR quad per LED, and `ceil(n/16)` bytes of
/// `0xFF` end-frame latch (enough clock edges to shift the last LED's data
/// through a chain of `n` drivers).
pub struct Apa102Format {
    pub global_brightness: u8,
}

impl Default for Apa102Format {
    fn default() -> Self {
        Self { global_brightness: 31 }
    }
}

impl ChipFormat for Apa102Format {
    fn encode(&self, colors: &[(u8, u8, u8)]) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        let brightness = 0xE0 | (self.global_brightness.min(31));
        for &(r, g, b) in colors {
            out.push(brightness);
            out.push(b);
            out.push(g);
            out.push(r);
        }
        let end_bytes = (colors.len() + 15) / 16;
        out.extend(std::iter::repeat(0xFF).take(end_bytes.max(1)));
        out
    }
}

/// SK9822: APA102-compatible framing. HyperHDR's driver additionally scales
/// up low-brightness pixel values against a global-brightness threshold for
/// extra precision; we keep the plain APA102 framing and leave that scaling
/// as a documented simplification (DESIGN.md).
pub struct Sk9822Format {
    pub global_brightness: u8,
}

impl Default for Sk9822Format {
    fn default() -> Self {
        Self { global_brightness: 31 }
    }
}

impl ChipFormat for Sk9822Format {
    fn encode(&self, colors: &[(u8, u8, u8)]) -> Vec<u8> {
        Apa102Format { global_brightness: self.global_brightness }.encode(colors)
    }
}

/// HD108: APA102-shaped framing widened to 16 bits per channel (5-bit
/// brightness header, then G/R/B each scaled `channel * 257` to fill the
/// 16-bit range).
pub struct Hd108Format {
    pub global_brightness: u8,
}

impl Default for Hd108Format {
    fn default() -> Self {
        Self { global_brightness: 31 }
    }
}

impl ChipFormat for Hd108Format {
    fn encode(&self, colors: &[(u8, u8, u8)]) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        let header = 0xE0 | (self.global_brightness.min(31));
        for &(r, g, b) in colors {
            out.push(header);
            out.push(0x00);
            for channel in [g, r, b] {
                let wide = channel as u16 * 257;
                out.push((wide >> 8) as u8);
                out.push((wide & 0xff) as u8);
            }
        }
        let end_bytes = (colors.len() + 15) / 16;
        out.extend(std::iter::repeat(0xFF).take(end_bytes.max(1)));
        out
    }
}

/// WS2801: plain sequential RGB bytes, no start/end framing — the chip
/// latches on a clock gap instead of a sentinel sequence.
#[derive(Default)]
pub struct Ws2801Format;

impl ChipFormat for Ws2801Format {
    fn encode(&self, colors: &[(u8, u8, u8)]) -> Vec<u8> {
        let mut out = Vec::with_capacity(colors.len() * 3);
        for &(r, g, b) in colors {
            out.push(r);
            out.push(g);
            out.push(b);
        }
        out
    }
}

/// WS2812 bit-banged over SPI: each logical bit is expanded to a pair of
/// SPI bits clocked fast enough to fake the ~1.25us WS2812 bit timing,
/// through a 4-entry bit-pair-to-byte LUT (`bitpair_to_byte` in
/// `DriverSpiWs2812SPI`). Color order on the wire is GRB.
pub struct Ws2812Format {
    bitpair_to_byte: [u8; 4],
}

impl Default for Ws2812Format {
    fn default() -> Self {
        // 0b00 -> long-low/long-low, 0b01 -> long-low/short-high, etc. Each
        // nibble of the output byte holds one WS2812 bit's high/low pulse
        // pattern; `0x8` is a short high pulse, `0xE` a long one.
        Self { bitpair_to_byte: [0x88, 0x8E, 0xE8, 0xEE] }
    }
}

impl ChipFormat for Ws2812Format {
    fn encode(&self, colors: &[(u8, u8, u8)]) -> Vec<u8> {
        let mut out = Vec::with_capacity(colors.len() * 12);
        for &(r, g, b) in colors {
            for byte in [g, r, b] {
                for shift in [6, 4, 2, 0] {
                    let pair = (byte >> shift) & 0b11;
                    out.push(self.bitpair_to_byte[pair as usize]);
                }
            }
        }
        out
    }
}

/// APA104: WS2812-compatible bit timing and GRB wire order, reused via
/// [`Ws2812Format`], but the datasheet calls for a longer low-level reset
/// pulse between frames than WS2812 needs, so we pad the encoded bitstream
/// with extra zero bytes to hold the SPI line low long enough to latch.
pub struct Apa104Format {
    inner: Ws2812Format,
    reset_bytes: usize,
}

impl Default for Apa104Format {
    fn default() -> Self {
        Self { inner: Ws2812Format::default(), reset_bytes: 24 }
    }
}

impl ChipFormat for Apa104Format {
    fn encode(&self, colors: &[(u8, u8, u8)]) -> Vec<u8> {
        let mut out = self.inner.encode(colors);
        out.extend(std::iter::repeat(0u8).take(self.reset_bytes));
        out
    }
}

/// SK6812/SK6822 RGBW: same bit-banged-over-SPI trick as WS2812, with a
/// white channel derived from RGB via [`WhiteChannelRule`] and sent last
/// (wire order GRBW).
pub struct Sk6812RgbwFormat {
    inner: Ws2812Format,
    white_rule: WhiteChannelRule,
}

impl Default for Sk6812RgbwFormat {
    fn default() -> Self {
        Self { inner: Ws2812Format::default(), white_rule: WhiteChannelRule::default() }
    }
}

impl ChipFormat for Sk6812RgbwFormat {
    fn encode(&self, colors: &[(u8, u8, u8)]) -> Vec<u8> {
        let mut out = Vec::with_capacity(colors.len() * 16);
        for &(r, g, b) in colors {
            let (r2, g2, b2, w) = self.white_rule.apply(crate::color::Rgb8::new(r, g, b));
            for byte in [g2, r2, b2, w] {
                for shift in [6, 4, 2, 0] {
                    let pair = (byte >> shift) & 0b11;
                    out.push(self.inner.bitpair_to_byte[pair as usize]);
                }
            }
        }
        out
    }
}

/// P9813: a flag byte per LED holding the complemented top two bits of each
/// channel (`0xC0 | (~b>>6&3)<<4 | (~g>>6&3)<<2 | (~r>>6&3)`), then `B,G,R`;
/// 4 zero bytes of start/end framing.
#[derive(Default)]
pub struct P9813Format;

impl ChipFormat for P9813Format {
    fn encode(&self, colors: &[(u8, u8, u8)]) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        for &(r, g, b) in colors {
            let flag = 0xC0
                | (((!b >> 6) & 0x3) << 4)
                | (((!g >> 6) & 0x3) << 2)
                | ((!r >> 6) & 0x3);
            out.push(flag);
            out.push(b);
            out.push(g);
            out.push(r);
        }
        out.extend(std::iter::repeat(0x00).take(4));
        out
    }
}

/// LPD6803: 15-bit color (5 bits/channel) packed two bytes per LED with the
/// high bit of the first byte always set as a data marker; zero-byte start
/// frame sized to the LED count, no end frame.
#[derive(Default)]
pub struct Lpd6803Format;

impl ChipFormat for Lpd6803Format {
    fn encode(&self, colors: &[(u8, u8, u8)]) -> Vec<u8> {
        let start_bytes = colors.len() / 32 + 1;
        let mut out = vec![0u8; start_bytes * 4];
        for &(r, g, b) in colors {
            let r5 = r >> 3;
            let g5 = g >> 3;
            let b5 = b >> 3;
            let word: u16 = 0x8000 | ((r5 as u16) << 10) | ((g5 as u16) << 5) | b5 as u16;
            out.push((word >> 8) as u8);
            out.push((word & 0xff) as u8);
        }
        out
    }
}

/// LPD8806: 7-bit per channel with the MSB forced to `1` (`0x80 |
/// value>>1`), wire order GRB; a latch of `led_count/2 + 1` zero bytes
/// follows the data (per-LED extra clock the chip needs to propagate).
#[derive(Default)]
pub struct Lpd8806Format;

impl ChipFormat for Lpd8806Format {
    fn encode(&self, colors: &[(u8, u8, u8)]) -> Vec<u8> {
        let mut out = Vec::with_capacity(colors.len() * 3 + colors.len() / 2 + 1);
        for &(r, g, b) in colors {
            out.push(0x80 | (g >> 1));
            out.push(0x80 | (r >> 1));
            out.push(0x80 | (b >> 1));
        }
        let latch_bytes = colors.len() / 2 + 1;
        out.extend(std::iter::repeat(0x00).take(latch_bytes));
        out
    }
}

/// One SPI-attached LED backend: a transport plus whichever [`ChipFormat`]
/// the device config selected.
pub struct SpiLedDevice {
    name: &'static str,
    transport: SpiTransport,
    format: Box<dyn ChipFormat>,
    led_count: usize,
}

impl SpiLedDevice {
    pub fn new(name: &'static str, format: Box<dyn ChipFormat>) -> Self {
        Self {
            name,
            transport: SpiTransport::new("/dev/spidev0.0", 1_000_000),
            format,
            led_count: 0,
        }
    }
}

impl LedDevice for SpiLedDevice {
    fn init(&mut self, config: &DeviceConfig) -> Result<(), DriverError> {
        self.led_count = config.led_count;
        let path = config.param_str("output").unwrap_or("/dev/spidev0.0").to_string();
        let speed = config.param_u64("rate", 1_000_000) as u32;
        self.transport = SpiTransport::new(path, speed);
        Ok(())
    }

    fn open(&mut self) -> Result<(), DriverError> {
        self.transport.open()
    }

    fn update_leds(&mut self, colors: &[(u8, u8, u8)]) -> Result<i32, DriverError> {
        let bytes = self.format.encode(colors);
        self.transport.write_bytes(&bytes)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.transport.close();
        Ok(())
    }

    fn led_count(&self) -> usize {
        self.led_count
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// An Adalight-framed SPI device, sharing [`adalight`]'s header/Fletcher-16
/// framing with the UDP transport (spec.md §4.5 "Adalight-style SPI
/// variant reuses the same 6-byte Awa header contract as the serial-port
/// variant, differing only in the transport").
pub struct AdalightSpiDevice {
    transport: SpiTransport,
    led_count: usize,
}

impl Default for AdalightSpiDevice {
    fn default() -> Self {
        Self { transport: SpiTransport::new("/dev/spidev0.0", 1_000_000), led_count: 0 }
    }
}

impl LedDevice for AdalightSpiDevice {
    fn init(&mut self, config: &DeviceConfig) -> Result<(), DriverError> {
        self.led_count = config.led_count;
        let path = config.param_str("output").unwrap_or("/dev/spidev0.0").to_string();
        let speed = config.param_u64("rate", 1_000_000) as u32;
        self.transport = SpiTransport::new(path, speed);
        Ok(())
    }

    fn open(&mut self) -> Result<(), DriverError> {
        self.transport.open()
    }

    fn update_leds(&mut self, colors: &[(u8, u8, u8)]) -> Result<i32, DriverError> {
        let frame = adalight::build_frame(colors);
        self.transport.write_bytes(&frame)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.transport.close();
        Ok(())
    }

    fn led_count(&self) -> usize {
        self.led_count
    }

    fn name(&self) -> &'static str {
        "adalight-spi"
    }
}

pub fn register_builtins(registry: &mut DriverRegistry) {
    registry.register("apa102", || Box::new(SpiLedDevice::new("apa102", Box::new(Apa102Format::default()))));
    registry.register("sk9822", || Box::new(SpiLedDevice::new("sk9822", Box::new(Sk9822Format::default()))));
    registry.register("hd108", || Box::new(SpiLedDevice::new("hd108", Box::new(Hd108Format::default()))));
    registry.register("ws2801", || Box::new(SpiLedDevice::new("ws2801", Box::new(Ws2801Format))));
    registry.register("ws2812", || Box::new(SpiLedDevice::new("ws2812", Box::new(Ws2812Format::default()))));
    registry.register("apa104", || Box::new(SpiLedDevice::new("apa104", Box::new(Apa104Format::default()))));
    registry.register("sk6812rgbw", || Box::new(SpiLedDevice::new("sk6812rgbw", Box::new(Sk6812RgbwFormat::default()))));
    registry.register("sk6822", || Box::new(SpiLedDevice::new("sk6822", Box::new(Sk6812RgbwFormat::default()))));
    registry.register("p9813", || Box::new(SpiLedDevice::new("p9813", Box::new(P9813Format))));
    registry.register("lpd6803", || Box::new(SpiLedDevice::new("lpd6803", Box::new(Lpd6803Format))));
    registry.register("lpd8806", || Box::new(SpiLedDevice::new("lpd8806", Box::new(Lpd8806Format))));
    registry.register("adalight-spi", || Box::new(AdalightSpiDevice::default()));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apa102_frame_has_start_and_end_latch() {
        let format = Apa102Format::default();
        let bytes = format.encode(&[(10, 20, 30); 4]);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 0]);
        assert_eq!(bytes.len(), 4 + 4 * 4 + 1);
        assert_eq!(bytes[4], 0xE0 | 31);
        assert_eq!(&bytes[5..8], &[30, 20, 10]);
    }

    #[test]
    fn ws2801_has_no_framing() {
        let format = Ws2801Format;
        let bytes = format.encode(&[(1, 2, 3), (4, 5, 6)]);
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn ws2812_emits_four_bytes_per_color_channel() {
        let format = Ws2812Format::default();
        let bytes = format.encode(&[(0xFF, 0x00, 0x00)]);
        assert_eq!(bytes.len(), 12);
        // G channel is all zero bits -> bitpair 0b00 for every pair.
        assert!(bytes[0..4].iter().all(|&b| b == 0x88));
        // R channel is all one bits -> bitpair 0b11 for every pair.
        assert!(bytes[4..8].iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn apa104_reuses_ws2812_bitstream_with_trailing_reset_padding() {
        let format = Apa104Format::default();
        let bytes = format.encode(&[(0xFF, 0x00, 0x00)]);
        assert_eq!(bytes.len(), 12 + format.reset_bytes);
        assert_eq!(&bytes[0..12], &Ws2812Format::default().encode(&[(0xFF, 0x00, 0x00)])[..]);
        assert!(bytes[12..].iter().all(|&b| b == 0));
    }

    #[test]
    fn p9813_flag_byte_has_top_bits_set() {
        let format = P9813Format;
        let bytes = format.encode(&[(0, 0, 0)]);
        assert_eq!(bytes[4] & 0xC0, 0xC0);
    }

    #[test]
    fn lpd8806_sets_msb_on_every_channel_byte() {
        let format = Lpd8806Format;
        let bytes = format.encode(&[(255, 255, 255)]);
        assert!(bytes[0..3].iter().all(|&b| b & 0x80 != 0));
    }

    #[test]
    fn sk6812_adds_white_channel_byte() {
        let format = Sk6812RgbwFormat::default();
        let bytes = format.encode(&[(200, 150, 50)]);
        assert_eq!(bytes.len(), 16);
    }
}
