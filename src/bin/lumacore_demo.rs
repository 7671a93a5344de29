//! A small binary exercising one [`lumacore::supervisor::Instance`] end to
//! end: a synthetic color-cycling source feeding the full arbitrator ->
//! reducer -> calibrator -> smoother -> driver pipeline, in the spirit of
//! Helion's `main.rs` capture-to-wire loop — but against a synthetic source
//! rather than a real screen capture, which this crate does not own
//! (spec.md §1 "capture-device enumeration and decoding ... external
//! collaborators").
//!
//! Real deployments select a hardware driver (`--device apa102`, `--device
//! adalight-serial`, ...) and feed it real capture frames; this binary only
//! demonstrates the wiring.

use std::time::Duration;

use clap::Parser;
use lumacore::calibrator::Calibration;
use lumacore::color::Rgb8;
use lumacore::driver::{DeviceConfig, DriverError, DriverRegistry, LedDevice, PacingConfig};
use lumacore::layout::{LedDescriptor, LedRect, Layout};
use lumacore::reducer::ReducerPolicy;
use lumacore::smoothing::{SmoothingConfig, SmoothingModel};
use lumacore::supervisor::Instance;

#[derive(Parser, Debug)]
#[command(about = "Demonstrates one ambient-lighting instance against a synthetic color cycle")]
struct Args {
    /// Number of LEDs in the synthetic strip.
    #[arg(long, default_value_t = 30)]
    led_count: usize,

    /// Driver to write to: any name in `DriverRegistry::with_builtins`, or
    /// "log" for the built-in stderr logger (default, needs no hardware).
    #[arg(long, default_value = "log")]
    device: String,

    /// Serial/SPI device path or network host, passed through as the
    /// device's `output`/`host` param.
    #[arg(long)]
    target: Option<String>,

    /// How many color-cycle steps to run before exiting.
    #[arg(long, default_value_t = 20)]
    steps: u32,
}

/// Logs the wire frame it receives instead of writing to hardware — the
/// default device so this binary runs with no LED strip attached.
struct LoggingDevice {
    led_count: usize,
}

impl LedDevice for LoggingDevice {
    fn init(&mut self, config: &DeviceConfig) -> Result<(), DriverError> {
        self.led_count = config.led_count;
        Ok(())
    }

    fn open(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    fn update_leds(&mut self, colors: &[(u8, u8, u8)]) -> Result<i32, DriverError> {
        log::info!("frame: {colors:?}");
        Ok((colors.len() * 3) as i32)
    }

    fn led_count(&self) -> usize {
        self.led_count
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// A strip running along the bottom edge, left to right.
fn synthetic_layout(led_count: usize) -> Layout {
    let leds = (0..led_count)
        .map(|i| {
            let min_x = i as f32 / led_count as f32;
            let max_x = (i + 1) as f32 / led_count as f32;
            LedDescriptor::new(LedRect { min_x, max_x, min_y: 0.9, max_y: 1.0 })
        })
        .collect();
    Layout::new(leds)
}

/// Cycles hue around the color wheel, one step per call.
fn cycle_color(step: u32) -> Rgb8 {
    let hue = (step % 360) as f32;
    let (r, g, b) = hsv_to_rgb(hue, 1.0, 1.0);
    Rgb8::new(r, g, b)
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;
    let (r, g, b) = match h as u32 {
        0..=59 => (c, x, 0.0),
        60..=119 => (x, c, 0.0),
        120..=179 => (0.0, c, x),
        180..=239 => (0.0, x, c),
        240..=299 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    (
        ((r + m) * 255.0).round() as u8,
        ((g + m) * 255.0).round() as u8,
        ((b + m) * 255.0).round() as u8,
    )
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut registry = DriverRegistry::with_builtins();
    registry.register("log", || Box::new(LoggingDevice { led_count: 0 }) as Box<dyn LedDevice>);

    let mut params = serde_json::json!({});
    if let Some(target) = &args.target {
        params["output"] = serde_json::Value::String(target.clone());
        params["host"] = serde_json::Value::String(target.clone());
    }

    let mut instance = Instance::new(
        synthetic_layout(args.led_count),
        Calibration::default(),
        ReducerPolicy::Mean,
        1,
        1,
        SmoothingConfig {
            settling_time_ms: 150,
            update_interval_ms: 30,
            model: SmoothingModel::Linear,
            ..SmoothingConfig::default()
        },
        DeviceConfig { led_count: args.led_count, params },
        &args.device,
        PacingConfig { user_refresh_ms: 30, device_forced_ms: None, smoother_interval_ms: 0 },
        &registry,
    )?;

    log::info!("driving {} LEDs through device '{}'", args.led_count, args.device);

    for step in 0..args.steps {
        let color = cycle_color(step * 18);
        instance.set_color(10, &[color], -1, "demo")?;
        for _ in 0..5 {
            instance.tick()?;
            std::thread::sleep(Duration::from_millis(30));
        }
    }

    Ok(())
}
