//! Per-LED color calibration: primary/secondary decomposition, brightness
//! and backlight rules, gamma, and the final hardware byte-order
//! permutation.
//!
//! Generalized from Helion's `AdditiveColorConf`/`Transform` (per-channel
//! threshold/gamma/blacklevel/whitelevel applied to a named led range) into
//! the six-target (R,G,B,C,M,Y) adjustment this engine's calibrator needs;
//! the adjustments referenced by `alixinne-hyperion.rs`'s
//! `ChannelAdjustments` are the same idea at the instance level and ground
//! the one-id-per-LED indirection here.

use serde::{Deserialize, Serialize};

use crate::color::{ColorOrder, Rgb8};

/// A per-channel correction factor applied to one of the six decomposition
/// targets (R, G, B, C, M, Y).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelAdjustment {
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

impl ChannelAdjustment {
    const fn new(red: f64, green: f64, blue: f64) -> Self {
        Self { red, green, blue }
    }

    fn apply(&self, weight: f64) -> (f64, f64, f64) {
        (self.red * weight, self.green * weight, self.blue * weight)
    }
}

/// Identity adjustment for each of the six decomposition targets: the
/// target's own RGB vertex on the color hexagon, so an unmodified
/// [`Calibration`] reconstructs its input exactly (spec.md §8: "Applying
/// calibration with all gamma=1 and identity primary vectors is the
/// identity on every color"). Used both as [`Calibration::default`]'s
/// per-field values and as `settings.rs`'s per-field `serde(default = ...)`.
pub fn identity_red() -> ChannelAdjustment {
    ChannelAdjustment::new(1.0, 0.0, 0.0)
}
pub fn identity_green() -> ChannelAdjustment {
    ChannelAdjustment::new(0.0, 1.0, 0.0)
}
pub fn identity_blue() -> ChannelAdjustment {
    ChannelAdjustment::new(0.0, 0.0, 1.0)
}
pub fn identity_cyan() -> ChannelAdjustment {
    ChannelAdjustment::new(0.0, 1.0, 1.0)
}
pub fn identity_magenta() -> ChannelAdjustment {
    ChannelAdjustment::new(1.0, 0.0, 1.0)
}
pub fn identity_yellow() -> ChannelAdjustment {
    ChannelAdjustment::new(1.0, 1.0, 0.0)
}

/// The luminance transform applied after primary/secondary recombination
/// (spec.md §4.3: brightness/backlight rule + per-channel gamma).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LuminanceTransform {
    pub brightness: f64,
    pub brightness_compensation: f64,
    pub gamma_r: f64,
    pub gamma_g: f64,
    pub gamma_b: f64,
    /// Minimum mean luminance; frames darker than this are boosted.
    pub backlight_threshold: f64,
    /// Whether the backlight boost keeps hue (true) or clamps to white.
    pub backlight_colored: bool,
}

impl Default for LuminanceTransform {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            brightness_compensation: 0.0,
            gamma_r: 1.0,
            gamma_g: 1.0,
            gamma_b: 1.0,
            backlight_threshold: 0.0,
            backlight_colored: true,
        }
    }
}

/// One full calibration: six target adjustments plus the luminance
/// transform and the hardware color order for LEDs using it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub red: ChannelAdjustment,
    pub green: ChannelAdjustment,
    pub blue: ChannelAdjustment,
    pub cyan: ChannelAdjustment,
    pub magenta: ChannelAdjustment,
    pub yellow: ChannelAdjustment,
    pub luminance: LuminanceTransform,
    pub color_order: ColorOrder,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            red: identity_red(),
            green: identity_green(),
            blue: identity_blue(),
            cyan: identity_cyan(),
            magenta: identity_magenta(),
            yellow: identity_yellow(),
            luminance: LuminanceTransform::default(),
            color_order: ColorOrder::default(),
        }
    }
}

impl Calibration {
    /// Decompose `c` into an achromatic (grey) level plus six hue-hexagon
    /// sector weights (R, Y, G, C, B, M vertices), then linearly recombine
    /// the adjusted vectors (spec.md §4.3 steps 1-2). The chromatic part of
    /// `c` always lands in exactly one 60-degree sector of the hexagon, so
    /// it is an exact sum of its two bounding vertices' weights; the grey
    /// level passes straight through unadjusted. With every adjustment at
    /// its [`identity_red`]-family default this recombination is the
    /// identity (spec.md §8).
    fn decompose_and_recombine(&self, c: Rgb8) -> (f64, f64, f64) {
        let r = c.r as f64 / 255.0;
        let g = c.g as f64 / 255.0;
        let b = c.b as f64 / 255.0;

        let grey = r.min(g).min(b);
        let (r1, g1, b1) = (r - grey, g - grey, b - grey);

        // weights in order: red, green, blue, cyan, magenta, yellow
        let mut w = [0.0f64; 6];
        if b1 <= 0.0 {
            if r1 >= g1 {
                w[0] = r1 - g1;
                w[5] = g1;
            } else {
                w[5] = r1;
                w[1] = g1 - r1;
            }
        } else if r1 <= 0.0 {
            if g1 >= b1 {
                w[1] = g1 - b1;
                w[3] = b1;
            } else {
                w[3] = g1;
                w[2] = b1 - g1;
            }
        } else if b1 >= r1 {
            w[2] = b1 - r1;
            w[4] = r1;
        } else {
            w[4] = b1;
            w[0] = r1 - b1;
        }

        let adjustments = [&self.red, &self.green, &self.blue, &self.cyan, &self.magenta, &self.yellow];
        let (mut or, mut og, mut ob) = (grey, grey, grey);
        for (adj, weight) in adjustments.iter().zip(w.iter()) {
            let (dr, dg, db) = adj.apply(*weight);
            or += dr;
            og += dg;
            ob += db;
        }
        (or, og, ob)
    }

    /// Boosts a dark frame towards `backlight_threshold`. The trigger is the
    /// frame's mean luminance (spec.md §4.3 step 3: "the mean luminance of
    /// the frame"), not this LED's own luma — a single dim LED in an
    /// otherwise bright frame must not get boosted on its own.
    fn apply_backlight(&self, r: f64, g: f64, b: f64, mean_frame_luma: f64) -> (f64, f64, f64) {
        let threshold = self.luminance.backlight_threshold;
        if mean_frame_luma >= threshold || threshold <= 0.0 {
            return (r, g, b);
        }
        if self.luminance.backlight_colored {
            let luma = 0.2126 * r + 0.7152 * g + 0.0722 * b;
            if luma <= 0.0 {
                (threshold, threshold, threshold)
            } else {
                let scale = threshold / luma;
                (r * scale, g * scale, b * scale)
            }
        } else {
            (threshold, threshold, threshold)
        }
    }

    fn apply_gamma(&self, r: f64, g: f64, b: f64) -> (f64, f64, f64) {
        (
            r.max(0.0).powf(self.luminance.gamma_r),
            g.max(0.0).powf(self.luminance.gamma_g),
            b.max(0.0).powf(self.luminance.gamma_b),
        )
    }

    /// Decomposition, brightness/backlight, gamma and clamp-to-8-bit, but
    /// *without* the final byte-order permutation — the stage the
    /// supervisor's pipeline runs before handing off to the smoother, which
    /// still reasons about logical R/G/B (spring integration, YUV luma)
    /// rather than hardware wire order.
    pub fn apply_linear(&self, c: Rgb8, mean_frame_luma: f64) -> Rgb8 {
        let (r, g, b) = self.decompose_and_recombine(c);
        let brightness = self.luminance.brightness
            + self.luminance.brightness_compensation * (1.0 - mean_frame_luma);
        let (r, g, b) = (r * brightness, g * brightness, b * brightness);
        let (r, g, b) = self.apply_backlight(r, g, b, mean_frame_luma);
        let (r, g, b) = self.apply_gamma(r, g, b);
        let clamp8 = |x: f64| (x * 255.0).round().clamp(0.0, 255.0) as u8;
        Rgb8::new(clamp8(r), clamp8(g), clamp8(b))
    }

    /// Run the full per-LED pipeline: [`Calibration::apply_linear`] then
    /// byte-order permutation, for callers that want calibration and
    /// hardware wire order in a single step (spec.md §4.3 steps 1-5).
    pub fn apply(&self, c: Rgb8, mean_frame_luma: f64) -> (u8, u8, u8) {
        let out = self.apply_linear(c, mean_frame_luma);
        self.color_order.permute(out)
    }
}

/// Maps each LED to its [`Calibration`] (by `calibration_id`, falling back
/// to a default calibration) and runs the pipeline over a whole frame.
pub struct Calibrator {
    default: Calibration,
    by_id: Vec<(u32, Calibration)>,
}

impl Calibrator {
    pub fn new(default: Calibration) -> Self {
        Self { default, by_id: Vec::new() }
    }

    pub fn set_calibration(&mut self, id: u32, calibration: Calibration) {
        if let Some(slot) = self.by_id.iter_mut().find(|(i, _)| *i == id) {
            slot.1 = calibration;
        } else {
            self.by_id.push((id, calibration));
        }
    }

    pub fn calibration_for(&self, id: Option<u32>) -> &Calibration {
        id.and_then(|id| self.by_id.iter().find(|(i, _)| *i == id).map(|(_, c)| c))
            .unwrap_or(&self.default)
    }

    fn mean_luma(colors: &[Rgb8]) -> f64 {
        if colors.is_empty() {
            0.0
        } else {
            let sum: f64 = colors
                .iter()
                .map(|c| crate::color::luma_bt709(c.to_f32()) as f64)
                .sum();
            sum / colors.len() as f64
        }
    }

    /// Calibrate one reduced LED-color vector, returning wire-order byte
    /// triplets ready for the driver.
    pub fn calibrate(&self, colors: &[Rgb8], calibration_ids: &[Option<u32>]) -> Vec<(u8, u8, u8)> {
        let mean_luma = Self::mean_luma(colors);
        colors
            .iter()
            .zip(calibration_ids.iter())
            .map(|(c, id)| self.calibration_for(*id).apply(*c, mean_luma))
            .collect()
    }

    /// Calibrate without the final byte-order permutation, for the
    /// supervisor's pipeline position ahead of the smoother (spec.md's
    /// `Calibrator -> Smoother -> Driver` ordering); the permutation is
    /// applied once, per-LED, right before the driver write.
    pub fn calibrate_linear(&self, colors: &[Rgb8], calibration_ids: &[Option<u32>]) -> Vec<Rgb8> {
        let mean_luma = Self::mean_luma(colors);
        colors
            .iter()
            .zip(calibration_ids.iter())
            .map(|(c, id)| self.calibration_for(*id).apply_linear(*c, mean_luma))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_calibration_preserves_color() {
        let calibration = Calibration::default();
        let (r, g, b) = calibration.apply(Rgb8::new(10, 20, 30), 0.5);
        assert_eq!((r, g, b), (10, 20, 30));
    }

    #[test]
    fn identity_calibration_preserves_black_and_white() {
        let calibration = Calibration::default();
        assert_eq!(calibration.apply(Rgb8::BLACK, 0.0), (0, 0, 0));
        assert_eq!(calibration.apply(Rgb8::new(255, 255, 255), 1.0), (255, 255, 255));
    }

    #[test]
    fn backlight_boosts_dark_frame_when_colored() {
        let mut calibration = Calibration::default();
        calibration.luminance.backlight_threshold = 0.5;
        calibration.luminance.backlight_colored = true;
        let (r, g, b) = calibration.apply(Rgb8::new(10, 10, 10), 0.1);
        assert!(r > 10 && g > 10 && b > 10);
    }

    /// A dim LED inside an otherwise bright frame is not boosted on its
    /// own — the trigger is the frame's mean luminance, not the per-LED one.
    #[test]
    fn backlight_trigger_uses_frame_mean_not_per_led_luma() {
        let mut calibration = Calibration::default();
        calibration.luminance.backlight_threshold = 0.5;
        calibration.luminance.backlight_colored = true;
        let (r, g, b) = calibration.apply(Rgb8::new(10, 10, 10), 0.9);
        assert_eq!((r, g, b), (10, 10, 10));
    }

    #[test]
    fn calibrator_falls_back_to_default_for_unknown_id() {
        let calibrator = Calibrator::new(Calibration::default());
        let colors = vec![Rgb8::new(5, 5, 5)];
        let out = calibrator.calibrate(&colors, &[Some(99)]);
        assert_eq!(out[0], (5, 5, 5));
    }

    #[test]
    fn byte_order_permutation_is_applied_last() {
        let mut calibration = Calibration::default();
        calibration.color_order = ColorOrder::Bgr;
        let (r, g, b) = calibration.apply(Rgb8::new(10, 20, 30), 0.5);
        assert_eq!((r, g, b), (30, 20, 10));
    }
}
