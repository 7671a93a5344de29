//! Typed views over the opaque `color`/`leds`/`device`/`smoothing` settings
//! documents the supervisor accepts (spec.md §6), generalized from
//! Helion's `config.rs` approach of one `Deserialize` struct per settings
//! section — reused here over the nested trees named in spec.md rather
//! than Helion's flat `LedsConfig`.
//!
//! Each section type round-trips through `serde_json::Value` at the
//! supervisor boundary and converts into the domain type the matching
//! component owns ([`crate::layout::Layout`], [`crate::calibrator::Calibration`],
//! [`crate::driver::DeviceConfig`], [`crate::smoothing::SmoothingConfig`]).

use serde::{Deserialize, Serialize};

use crate::calibrator::{
    identity_blue, identity_cyan, identity_green, identity_magenta, identity_red, identity_yellow,
    Calibration, ChannelAdjustment, LuminanceTransform,
};
use crate::color::ColorOrder;
use crate::driver::DeviceConfig;
use crate::layout::{LedDescriptor, LedRect, Layout};
use crate::smoothing::{SmoothingConfig, SmoothingModel, SpringParams};
use crate::CoreError;

/// One entry of the `color` settings document: a calibration id plus its
/// six-target adjustments and luminance transform.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ColorSettingsEntry {
    pub id: u32,
    #[serde(default = "identity_red")]
    pub red: ChannelAdjustment,
    #[serde(default = "identity_green")]
    pub green: ChannelAdjustment,
    #[serde(default = "identity_blue")]
    pub blue: ChannelAdjustment,
    #[serde(default = "identity_cyan")]
    pub cyan: ChannelAdjustment,
    #[serde(default = "identity_magenta")]
    pub magenta: ChannelAdjustment,
    #[serde(default = "identity_yellow")]
    pub yellow: ChannelAdjustment,
    #[serde(default)]
    pub brightness: Option<f64>,
    #[serde(default)]
    pub brightness_compensation: Option<f64>,
    #[serde(default)]
    pub gamma_r: Option<f64>,
    #[serde(default)]
    pub gamma_g: Option<f64>,
    #[serde(default)]
    pub gamma_b: Option<f64>,
    #[serde(default)]
    pub backlight_threshold: Option<f64>,
    #[serde(default)]
    pub backlight_colored: Option<bool>,
    #[serde(default)]
    pub color_order: ColorOrder,
}

/// The `color` settings document: a default calibration (`id: 0`) plus any
/// number of additional per-LED-group calibrations (spec.md §6 "`color` —
/// calibration entries and per-LED ids").
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ColorSettings {
    #[serde(default)]
    pub calibrations: Vec<ColorSettingsEntry>,
}

impl ColorSettingsEntry {
    pub fn to_calibration(&self) -> Calibration {
        let mut luminance = LuminanceTransform::default();
        if let Some(v) = self.brightness {
            luminance.brightness = v;
        }
        if let Some(v) = self.brightness_compensation {
            luminance.brightness_compensation = v;
        }
        if let Some(v) = self.gamma_r {
            luminance.gamma_r = v;
        }
        if let Some(v) = self.gamma_g {
            luminance.gamma_g = v;
        }
        if let Some(v) = self.gamma_b {
            luminance.gamma_b = v;
        }
        if let Some(v) = self.backlight_threshold {
            luminance.backlight_threshold = v;
        }
        if let Some(v) = self.backlight_colored {
            luminance.backlight_colored = v;
        }
        Calibration {
            red: self.red,
            green: self.green,
            blue: self.blue,
            cyan: self.cyan,
            magenta: self.magenta,
            yellow: self.yellow,
            luminance,
            color_order: self.color_order,
        }
    }
}

/// One entry of the `leds` layout array (spec.md §6 "`leds` — layout
/// array").
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LedSettingsEntry {
    pub hmin: f32,
    pub hmax: f32,
    pub vmin: f32,
    pub vmax: f32,
    #[serde(default)]
    pub color_order: Option<ColorOrder>,
    #[serde(default = "default_group")]
    pub group: i32,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub calibration_id: Option<u32>,
}

fn default_group() -> i32 {
    -1
}

impl LedSettingsEntry {
    pub fn to_descriptor(&self, fallback_color_order: ColorOrder) -> LedDescriptor {
        LedDescriptor {
            rect: LedRect { min_x: self.hmin, max_x: self.hmax, min_y: self.vmin, max_y: self.vmax },
            color_order: self.color_order.unwrap_or(fallback_color_order),
            group: self.group,
            disabled: self.disabled,
            calibration_id: self.calibration_id,
        }
    }
}

/// The `leds` settings document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LedsSettings {
    pub leds: Vec<LedSettingsEntry>,
    #[serde(default)]
    pub horizontal_border: u32,
    #[serde(default)]
    pub vertical_border: u32,
}

impl LedsSettings {
    pub fn to_layout(&self, device_color_order: ColorOrder) -> Layout {
        Layout {
            leds: self.leds.iter().map(|e| e.to_descriptor(device_color_order)).collect(),
            horizontal_border: self.horizontal_border,
            vertical_border: self.vertical_border,
        }
    }
}

/// The `device` settings document (spec.md §6: "driver type +
/// device-specific parameters + `hardwareLedCount`, `colorOrder`,
/// `refreshTime`").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(rename = "hardwareLedCount")]
    pub hardware_led_count: usize,
    #[serde(rename = "colorOrder", default)]
    pub color_order: ColorOrder,
    /// Forced refresh interval in ms, or `0` to let the smoother/user
    /// refresh rate decide (spec.md §4.5 pacing precedence).
    #[serde(rename = "refreshTime", default)]
    pub refresh_time_ms: i64,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl DeviceSettings {
    pub fn to_device_config(&self) -> DeviceConfig {
        DeviceConfig { led_count: self.hardware_led_count, params: self.params.clone() }
    }
}

fn model_from_str(s: &str) -> Result<SmoothingModel, CoreError> {
    match s {
        "Stepper" => Ok(SmoothingModel::Stepper),
        "Linear" => Ok(SmoothingModel::Linear),
        "Alternative" => Ok(SmoothingModel::Alternative),
        "RgbInterp" => Ok(SmoothingModel::RgbInterp),
        "YuvInterp" => Ok(SmoothingModel::YuvInterp),
        "HybridInterp" => Ok(SmoothingModel::HybridInterp),
        "HybridRgb" => Ok(SmoothingModel::HybridRgb),
        "Exponential" => Ok(SmoothingModel::Exponential),
        other => Err(CoreError::InvalidConfig(format!("unknown smoothing type `{other}`"))),
    }
}

/// The `smoothing` settings document, using spec.md §6's literal key names
/// (`enable`, `time_ms`, `updateFrequency`, `type`, `continuousOutput`,
/// `lowLightAntiFlickeringTreshold`, `lowLightAntiFlickeringValue`,
/// `lowLightAntiFlickeringTimeout`, `smoothingFactor`, `stiffness`,
/// `damping`, `y_limit`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SmoothingSettings {
    #[serde(default)]
    pub enable: bool,
    #[serde(rename = "time_ms", default = "default_time_ms")]
    pub time_ms: i64,
    #[serde(rename = "updateFrequency", default = "default_update_frequency")]
    pub update_frequency_hz: f64,
    #[serde(rename = "type", default = "default_type")]
    pub smoothing_type: String,
    #[serde(rename = "continuousOutput", default)]
    pub continuous_output: bool,
    #[serde(rename = "lowLightAntiFlickeringTreshold", default)]
    pub anti_flicker_threshold: u8,
    #[serde(rename = "lowLightAntiFlickeringValue", default)]
    pub anti_flicker_step: u8,
    #[serde(rename = "lowLightAntiFlickeringTimeout", default)]
    pub anti_flicker_timeout_ms: i64,
    #[serde(rename = "smoothingFactor", default = "default_smoothing_factor")]
    pub smoothing_factor: f32,
    #[serde(default)]
    pub stiffness: Option<f32>,
    #[serde(default)]
    pub damping: Option<f32>,
    #[serde(rename = "y_limit", default)]
    pub y_limit: Option<f32>,
}

fn default_time_ms() -> i64 {
    200
}

fn default_update_frequency() -> f64 {
    25.0
}

fn default_type() -> String {
    "Linear".to_string()
}

fn default_smoothing_factor() -> f32 {
    0.2
}

impl SmoothingSettings {
    pub fn to_smoothing_config(&self) -> Result<SmoothingConfig, CoreError> {
        let model = model_from_str(&self.smoothing_type)?;
        let update_interval_ms = if self.update_frequency_hz > 0.0 {
            (1000.0 / self.update_frequency_hz).round() as i64
        } else {
            40
        };
        let spring = if model.uses_spring_params() {
            Some(SpringParams {
                stiffness: self.stiffness.unwrap_or(90.0),
                damping: self.damping.unwrap_or(19.0),
            })
        } else {
            None
        };
        Ok(SmoothingConfig {
            paused: !self.enable,
            settling_time_ms: self.time_ms,
            update_interval_ms,
            model,
            continuous_output: self.continuous_output,
            anti_flicker_threshold: self.anti_flicker_threshold,
            anti_flicker_step: self.anti_flicker_step,
            anti_flicker_timeout_ms: self.anti_flicker_timeout_ms,
            spring,
            max_luminance_per_step: self.y_limit,
            smoothing_factor: self.smoothing_factor,
        })
    }
}

/// Whether a model needs [`SpringParams`] (the `*Interp`/`Hybrid*` family).
/// Exposed here rather than made public on [`SmoothingModel`] directly,
/// since only settings parsing needs to ask the question from outside the
/// smoothing module.
trait UsesSpringParams {
    fn uses_spring_params(self) -> bool;
}

impl UsesSpringParams for SmoothingModel {
    fn uses_spring_params(self) -> bool {
        matches!(
            self,
            SmoothingModel::RgbInterp
                | SmoothingModel::YuvInterp
                | SmoothingModel::HybridInterp
                | SmoothingModel::HybridRgb
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothing_settings_parse_from_json() {
        let json = serde_json::json!({
            "enable": true,
            "time_ms": 300,
            "updateFrequency": 25.0,
            "type": "HybridRgb",
            "continuousOutput": false,
            "lowLightAntiFlickeringTreshold": 3,
            "lowLightAntiFlickeringValue": 1,
            "lowLightAntiFlickeringTimeout": 300,
            "smoothingFactor": 0.25,
            "stiffness": 120.0,
            "damping": 20.0,
            "y_limit": 0.05
        });
        let settings: SmoothingSettings = serde_json::from_value(json).unwrap();
        let config = settings.to_smoothing_config().unwrap();
        assert_eq!(config.model, SmoothingModel::HybridRgb);
        assert_eq!(config.settling_time_ms, 300);
        assert_eq!(config.update_interval_ms, 40);
        assert!(config.spring.is_some());
        assert_eq!(config.max_luminance_per_step, Some(0.05));
        assert!(!config.paused);
    }

    #[test]
    fn smoothing_settings_disable_maps_to_paused() {
        let json = serde_json::json!({ "enable": false, "type": "Linear" });
        let settings: SmoothingSettings = serde_json::from_value(json).unwrap();
        let config = settings.to_smoothing_config().unwrap();
        assert!(config.paused);
        assert!(config.spring.is_none());
    }

    #[test]
    fn unknown_smoothing_type_is_an_error() {
        let json = serde_json::json!({ "enable": true, "type": "Quantum" });
        let settings: SmoothingSettings = serde_json::from_value(json).unwrap();
        assert!(settings.to_smoothing_config().is_err());
    }

    #[test]
    fn device_settings_round_trip_params() {
        let json = serde_json::json!({
            "type": "ws2812",
            "hardwareLedCount": 60,
            "colorOrder": "grb",
            "refreshTime": 16,
            "params": { "output": "/dev/spidev0.0" }
        });
        let settings: DeviceSettings = serde_json::from_value(json).unwrap();
        let config = settings.to_device_config();
        assert_eq!(config.led_count, 60);
        assert_eq!(config.param_str("output"), Some("/dev/spidev0.0"));
    }

    #[test]
    fn leds_settings_convert_to_layout() {
        let json = serde_json::json!({
            "leds": [
                { "hmin": 0.0, "hmax": 0.25, "vmin": 0.0, "vmax": 1.0 },
                { "hmin": 0.75, "hmax": 1.0, "vmin": 0.0, "vmax": 1.0, "disabled": true }
            ]
        });
        let settings: LedsSettings = serde_json::from_value(json).unwrap();
        let layout = settings.to_layout(ColorOrder::Rgb);
        assert_eq!(layout.led_count(), 2);
        assert!(layout.leds[1].disabled);
    }

    #[test]
    fn color_settings_build_calibration() {
        let entry = ColorSettingsEntry {
            id: 0,
            red: identity_red(),
            green: identity_green(),
            blue: identity_blue(),
            cyan: identity_cyan(),
            magenta: identity_magenta(),
            yellow: identity_yellow(),
            brightness: Some(1.2),
            brightness_compensation: None,
            gamma_r: Some(2.2),
            gamma_g: None,
            gamma_b: None,
            backlight_threshold: None,
            backlight_colored: None,
            color_order: ColorOrder::Rgb,
        };
        let calibration = entry.to_calibration();
        assert_eq!(calibration.luminance.brightness, 1.2);
        assert_eq!(calibration.luminance.gamma_r, 2.2);
    }
}
