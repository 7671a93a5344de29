//! LED device driver layer: a uniform lifecycle/write contract over
//! heterogeneous backends (SPI chip strips, UDP-attached luminaires),
//! plus the state machine, retry policy, refresh pacing and identify
//! pattern shared by every backend (spec.md §4.5).
//!
//! Grounded on `alixinne-hyperion.rs`'s `Instance::device` (an async
//! `Device` wrapping one concrete backend behind retry/enable state) and on
//! `original_source`'s `LedDevice`/`ProviderSpi`/`ProviderUdp` hierarchy,
//! whose `init`/`open`/`switchOn`/`write`/`switchOff`/`close` lifecycle this
//! module's [`LedDevice`] trait reproduces as a flat Rust trait plus a
//! string-keyed factory registry instead of a virtual-dispatch class tree.

mod adalight;
pub mod net;
pub mod serial;
pub mod spi;

pub use adalight::{adalight_checksum, adalight_header, fletcher16};

use std::collections::HashMap;

use thiserror::Error;

use crate::color::Rgb8;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid device configuration: {0}")]
    InvalidConfig(String),
    #[error("device unavailable: {0}")]
    Unavailable(String),
    #[error("driver not open")]
    NotOpen,
    #[error("unknown driver type: {0}")]
    UnknownDriverType(String),
    #[error("retries exhausted after {0} attempts")]
    RetriesExhausted(u32),
}

/// Driver lifecycle state (spec.md §4.5 state diagram). `Writing` is folded
/// into `On` — a write never changes state by itself, only a failed write
/// does (-> `Error`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriverState {
    Uninitialized,
    Initialized,
    Open,
    On,
    Off,
    Closed,
    Error,
}

/// A diagnostic pattern `identify` writes before restoring the previous
/// frame (spec.md §4.5 "Identify/blink").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdentifyPattern {
    /// Cycle the whole strip red, then green, then blue.
    RgbCycle,
    /// Flash a single LED white.
    FlashLed(usize),
}

/// Configuration handed to [`LedDevice::init`]. Device-specific keys live in
/// `params` (the opaque tree described in spec.md §6's `device` document);
/// the fields lifted out are the ones every backend needs regardless of
/// type.
#[derive(Clone, Debug)]
pub struct DeviceConfig {
    pub led_count: usize,
    pub params: serde_json::Value,
}

impl DeviceConfig {
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn param_u64(&self, key: &str, default: u64) -> u64 {
        self.params.get(key).and_then(|v| v.as_u64()).unwrap_or(default)
    }

    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        self.params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }
}

/// The contract every backend implements (spec.md §4.5). Only
/// [`LedDevice::update_leds`] is on the hot path; everything else runs off
/// it (open/retry/power/identify).
pub trait LedDevice: Send {
    fn init(&mut self, config: &DeviceConfig) -> Result<(), DriverError>;
    fn open(&mut self) -> Result<(), DriverError>;
    fn switch_on(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
    fn switch_off(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
    /// Write one full LED-color frame, already calibrated and byte-order
    /// permuted. Returns the byte count written on success.
    fn update_leds(&mut self, colors: &[(u8, u8, u8)]) -> Result<i32, DriverError>;
    fn close(&mut self) -> Result<(), DriverError> {
        Ok(())
    }
    fn led_count(&self) -> usize;
    fn name(&self) -> &'static str;
}

/// Pacing sources for the refresh/latch timer (spec.md §4.5 "Pacing").
/// Precedence: forced > smoother > user.
#[derive(Clone, Copy, Debug, Default)]
pub struct PacingConfig {
    pub user_refresh_ms: i64,
    pub device_forced_ms: Option<i64>,
    pub smoother_interval_ms: i64,
}

impl PacingConfig {
    /// The effective refresh interval, or `0` for "write only when the
    /// upstream emits a new frame".
    pub fn effective_interval_ms(&self) -> i64 {
        if let Some(forced) = self.device_forced_ms {
            if forced > 0 {
                return forced;
            }
        }
        if self.smoother_interval_ms > 0 {
            return self.smoother_interval_ms;
        }
        self.user_refresh_ms.max(0)
    }
}

pub const DEFAULT_MAX_RETRY: u32 = 60;

/// Wraps one concrete [`LedDevice`] with the retry/pacing/identify behavior
/// spec.md §4.5 describes as shared across every backend.
pub struct DriverHandle {
    device: Box<dyn LedDevice>,
    state: DriverState,
    led_count: usize,
    max_retry: u32,
    retry_count: u32,
    last_written: Vec<Rgb8>,
    pre_identify: Option<Vec<Rgb8>>,
    saved_on_switch_off: Option<Vec<Rgb8>>,
}

impl DriverHandle {
    pub fn new(device: Box<dyn LedDevice>, led_count: usize) -> Self {
        Self {
            device,
            state: DriverState::Uninitialized,
            led_count,
            max_retry: DEFAULT_MAX_RETRY,
            retry_count: 0,
            last_written: vec![Rgb8::BLACK; led_count],
            pre_identify: None,
            saved_on_switch_off: None,
        }
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// `init` then `open` (spec.md §4.5 "start() calls init then enable()").
    /// On failure, enters `Error`; the caller is expected to call
    /// [`DriverHandle::retry`] on the next 1s retry tick.
    pub fn start(&mut self, config: &DeviceConfig) -> Result<(), DriverError> {
        match self.device.init(config).and_then(|_| self.device.open()) {
            Ok(()) => {
                self.state = DriverState::Open;
                self.retry_count = 0;
                Ok(())
            }
            Err(e) => {
                log::error!("{} failed to start: {e}", self.device.name());
                self.state = DriverState::Error;
                Err(e)
            }
        }
    }

    /// Called by the retry timer (every 1s while in `Error`); gives up once
    /// `max_retry` attempts have been spent.
    pub fn retry(&mut self, config: &DeviceConfig) -> Result<(), DriverError> {
        if self.state != DriverState::Error {
            return Ok(());
        }
        if self.retry_count >= self.max_retry {
            log::error!(
                "{} gave up after {} retries",
                self.device.name(),
                self.max_retry
            );
            return Err(DriverError::RetriesExhausted(self.max_retry));
        }
        self.retry_count += 1;
        let result = self.start(config);
        if result.is_ok() {
            log::info!("{} recovered after {} retries", self.device.name(), self.retry_count);
        }
        result
    }

    pub fn switch_on(&mut self) -> Result<(), DriverError> {
        self.device.switch_on()?;
        self.state = DriverState::On;
        Ok(())
    }

    /// Restores the saved state if one was captured, otherwise writes black
    /// (spec.md §4.5: "switchOff() restores state or writes a black frame").
    pub fn switch_off(&mut self) -> Result<(), DriverError> {
        if let Some(saved) = self.saved_on_switch_off.take() {
            self.write(&saved)?;
        } else {
            self.write(&vec![Rgb8::BLACK; self.led_count])?;
        }
        self.device.switch_off()?;
        self.state = DriverState::Off;
        Ok(())
    }

    pub fn save_state_for_switch_off(&mut self) {
        self.saved_on_switch_off = Some(self.last_written.clone());
    }

    /// Pads a short vector with black (invariant 5) and writes it. A
    /// failure transitions into `Error` and the caller is expected to
    /// schedule retries.
    pub fn write(&mut self, colors: &[Rgb8]) -> Result<i32, DriverError> {
        let mut padded = colors.to_vec();
        padded.resize(self.led_count, Rgb8::BLACK);
        let wire: Vec<(u8, u8, u8)> = padded.iter().map(|c| (c.r, c.g, c.b)).collect();
        match self.device.update_leds(&wire) {
            Ok(n) => {
                self.last_written = padded;
                self.state = DriverState::On;
                Ok(n)
            }
            Err(e) => {
                log::warn!("{} write failed: {e}", self.device.name());
                self.state = DriverState::Error;
                Err(e)
            }
        }
    }

    /// `shutdown_flag` set: per spec.md §5 "on process termination ... the
    /// driver's write path emits a final all-black vector and returns".
    pub fn write_final_black(&mut self) {
        let _ = self.write(&vec![Rgb8::BLACK; self.led_count]);
    }

    pub fn close(&mut self) -> Result<(), DriverError> {
        self.device.close()?;
        self.state = DriverState::Closed;
        Ok(())
    }

    /// Writes a short diagnostic pattern, then restores whatever was on the
    /// strip before the call.
    pub fn identify(&mut self, pattern: IdentifyPattern) -> Result<(), DriverError> {
        self.pre_identify = Some(self.last_written.clone());
        let frames: Vec<Vec<Rgb8>> = match pattern {
            IdentifyPattern::RgbCycle => vec![
                vec![Rgb8::new(255, 0, 0); self.led_count],
                vec![Rgb8::new(0, 255, 0); self.led_count],
                vec![Rgb8::new(0, 0, 255); self.led_count],
            ],
            IdentifyPattern::FlashLed(i) => {
                let mut frame = vec![Rgb8::BLACK; self.led_count];
                if let Some(slot) = frame.get_mut(i) {
                    *slot = Rgb8::new(255, 255, 255);
                }
                vec![frame]
            }
        };
        for frame in frames {
            self.write(&frame)?;
        }
        if let Some(restore) = self.pre_identify.take() {
            self.write(&restore)?;
        }
        Ok(())
    }
}

type Factory = Box<dyn Fn() -> Box<dyn LedDevice> + Send + Sync>;

/// Process-wide registry of driver factories keyed by name (spec.md §6
/// "Driver identity" / §9 "implement as a type-erased registry of factories
/// keyed by string"); initialize before any instance starts, as the device
/// config's `device.type` selects from here.
#[derive(Default)]
pub struct DriverRegistry {
    factories: HashMap<String, Factory>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: impl Fn() -> Box<dyn LedDevice> + Send + Sync + 'static) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn LedDevice>, DriverError> {
        self.factories
            .get(name)
            .map(|f| f())
            .ok_or_else(|| DriverError::UnknownDriverType(name.to_string()))
    }

    /// Registers every built-in driver this crate ships (spi::* and net::*).
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        spi::register_builtins(&mut reg);
        net::register_builtins(&mut reg);
        serial::register_builtins(&mut reg);
        reg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubDevice {
        count: usize,
        fail_next: bool,
    }

    impl LedDevice for StubDevice {
        fn init(&mut self, _config: &DeviceConfig) -> Result<(), DriverError> {
            Ok(())
        }
        fn open(&mut self) -> Result<(), DriverError> {
            Ok(())
        }
        fn update_leds(&mut self, colors: &[(u8, u8, u8)]) -> Result<i32, DriverError> {
            if self.fail_next {
                return Err(DriverError::Unavailable("stub failure".into()));
            }
            Ok((colors.len() * 3) as i32)
        }
        fn led_count(&self) -> usize {
            self.count
        }
        fn name(&self) -> &'static str {
            "stub"
        }
    }

    fn config(led_count: usize) -> DeviceConfig {
        DeviceConfig { led_count, params: serde_json::json!({}) }
    }

    #[test]
    fn start_transitions_to_open() {
        let mut handle = DriverHandle::new(Box::new(StubDevice { count: 3, fail_next: false }), 3);
        handle.start(&config(3)).unwrap();
        assert_eq!(handle.state(), DriverState::Open);
    }

    #[test]
    fn short_vector_is_padded_with_black() {
        let mut handle = DriverHandle::new(Box::new(StubDevice { count: 4, fail_next: false }), 4);
        handle.start(&config(4)).unwrap();
        let n = handle.write(&[Rgb8::new(1, 2, 3)]).unwrap();
        assert_eq!(n, 12);
        assert_eq!(handle.last_written.len(), 4);
        assert_eq!(handle.last_written[1], Rgb8::BLACK);
    }

    #[test]
    fn failed_write_enters_error_state() {
        let mut handle = DriverHandle::new(Box::new(StubDevice { count: 2, fail_next: true }), 2);
        handle.start(&config(2)).unwrap();
        assert!(handle.write(&[Rgb8::BLACK; 2]).is_err());
        assert_eq!(handle.state(), DriverState::Error);
    }

    #[test]
    fn retry_gives_up_after_max_attempts() {
        let mut handle = DriverHandle::new(Box::new(StubDevice { count: 1, fail_next: false }), 1).with_max_retry(2);
        handle.state = DriverState::Error;
        handle.retry(&config(1)).unwrap();
        assert_eq!(handle.state(), DriverState::Open);
    }

    #[test]
    fn pacing_precedence_is_forced_then_smoother_then_user() {
        let mut pacing = PacingConfig { user_refresh_ms: 100, device_forced_ms: None, smoother_interval_ms: 40 };
        assert_eq!(pacing.effective_interval_ms(), 40);
        pacing.device_forced_ms = Some(16);
        assert_eq!(pacing.effective_interval_ms(), 16);
        pacing.smoother_interval_ms = 0;
        pacing.device_forced_ms = None;
        assert_eq!(pacing.effective_interval_ms(), 100);
    }

    #[test]
    fn identify_restores_previous_frame() {
        let mut handle = DriverHandle::new(Box::new(StubDevice { count: 2, fail_next: false }), 2);
        handle.start(&config(2)).unwrap();
        handle.write(&[Rgb8::new(9, 9, 9), Rgb8::new(9, 9, 9)]).unwrap();
        handle.identify(IdentifyPattern::FlashLed(0)).unwrap();
        assert_eq!(handle.last_written, vec![Rgb8::new(9, 9, 9); 2]);
    }

    #[test]
    fn switch_off_without_saved_state_writes_black() {
        let mut handle = DriverHandle::new(Box::new(StubDevice { count: 2, fail_next: false }), 2);
        handle.start(&config(2)).unwrap();
        handle.write(&[Rgb8::new(9, 9, 9), Rgb8::new(9, 9, 9)]).unwrap();
        handle.switch_off().unwrap();
        assert_eq!(handle.last_written, vec![Rgb8::BLACK; 2]);
        assert_eq!(handle.state(), DriverState::Off);
    }

    #[test]
    fn switch_off_with_saved_state_restores_it() {
        let mut handle = DriverHandle::new(Box::new(StubDevice { count: 2, fail_next: false }), 2);
        handle.start(&config(2)).unwrap();
        handle.write(&[Rgb8::new(9, 9, 9), Rgb8::new(1, 1, 1)]).unwrap();
        handle.save_state_for_switch_off();
        handle.write(&[Rgb8::new(5, 5, 5), Rgb8::new(5, 5, 5)]).unwrap();
        handle.switch_off().unwrap();
        assert_eq!(handle.last_written, vec![Rgb8::new(9, 9, 9), Rgb8::new(1, 1, 1)]);
    }
}
