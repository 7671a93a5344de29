//! Adalight-over-TTY: the same wire framing as [`super::spi::AdalightSpiDevice`]
//! and [`super::net::AdalightUdpDevice`], carried over a plain serial port
//! instead of a SPI/UDP link.
//!
//! Grounded on Helion's own `serial-rust`-backed write path (its one and
//! only device: open a named port at a fixed baud rate, write the Awa
//! frame, no handshake) — `serialport`, the maintained successor to that
//! crate, replaces it here (see DESIGN.md).

use std::io::Write;
use std::time::Duration;

use serialport::SerialPort;

use super::{adalight, DeviceConfig, DriverError, DriverRegistry, LedDevice};

fn invalid(msg: impl Into<String>) -> DriverError {
    DriverError::InvalidConfig(msg.into())
}

pub struct AdalightSerialDevice {
    port: Option<Box<dyn SerialPort>>,
    led_count: usize,
}

impl Default for AdalightSerialDevice {
    fn default() -> Self {
        Self { port: None, led_count: 0 }
    }
}

impl LedDevice for AdalightSerialDevice {
    fn init(&mut self, config: &DeviceConfig) -> Result<(), DriverError> {
        self.led_count = config.led_count;
        let path = config.param_str("output").ok_or_else(|| invalid("missing `output`"))?;
        let baud_rate = config.param_u64("rate", 115_200) as u32;
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(200))
            .open()
            .map_err(|e| DriverError::Unavailable(e.to_string()))?;
        self.port = Some(port);
        Ok(())
    }

    fn open(&mut self) -> Result<(), DriverError> {
        if self.port.is_none() {
            return Err(DriverError::NotOpen);
        }
        Ok(())
    }

    fn update_leds(&mut self, colors: &[(u8, u8, u8)]) -> Result<i32, DriverError> {
        let port = self.port.as_mut().ok_or(DriverError::NotOpen)?;
        let frame = adalight::build_frame(colors);
        port.write_all(&frame)?;
        Ok(frame.len() as i32)
    }

    fn close(&mut self) -> Result<(), DriverError> {
        self.port = None;
        Ok(())
    }

    fn led_count(&self) -> usize {
        self.led_count
    }

    fn name(&self) -> &'static str {
        "adalight-serial"
    }
}

pub fn register_builtins(registry: &mut DriverRegistry) {
    registry.register("adalight-serial", || Box::new(AdalightSerialDevice::default()) as Box<dyn LedDevice>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_without_output_param_is_invalid_config() {
        let mut device = AdalightSerialDevice::default();
        let config = DeviceConfig { led_count: 3, params: serde_json::json!({}) };
        let err = device.init(&config).unwrap_err();
        assert!(matches!(err, DriverError::InvalidConfig(_)));
    }

    #[test]
    fn update_leds_before_open_is_not_open() {
        let mut device = AdalightSerialDevice::default();
        let err = device.update_leds(&[(1, 2, 3)]).unwrap_err();
        assert!(matches!(err, DriverError::NotOpen));
    }
}
