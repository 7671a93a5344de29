//! Color types and the transforms shared by the reducer, calibrator and
//! smoother: an 8-bit RGB pixel, a float RGB/YUV pair used by the spring
//! interpolators, hardware byte-order permutation, and RGB->RGBW derivation.
//!
//! Generalized from Helion's `color.rs`, which covered a 3-channel
//! `AdditiveColorConf`/`HSVTransformer` pipeline for a single fixed Adalight
//! device; this module keeps the gain/gamma/black-white-level shape of that
//! pipeline but drops the HSV path (not named anywhere in this engine's
//! calibrator) and adds the YUV space and white-channel derivation the
//! wider driver set needs.

use serde::{Deserialize, Serialize};

/// An 8-bit-per-channel RGB pixel, the wire format every driver ultimately
/// writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb8 {
    pub const BLACK: Rgb8 = Rgb8 { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Whether this pixel is anything but pure black, used by the
    /// anti-flicker deadband (spec.md §4.4).
    pub fn has_color(&self) -> bool {
        self.r != 0 || self.g != 0 || self.b != 0
    }

    pub fn min_channel(&self) -> u8 {
        self.r.min(self.g).min(self.b)
    }

    pub fn max_channel(&self) -> u8 {
        self.r.max(self.g).max(self.b)
    }

    pub fn to_f32(self) -> RgbF32 {
        RgbF32 {
            r: self.r as f32 / 255.0,
            g: self.g as f32 / 255.0,
            b: self.b as f32 / 255.0,
        }
    }
}

/// A pixel in normalized (`0.0..=1.0`) floating point, used wherever
/// intermediate math needs more precision than 8 bits — the smoother's
/// spring integrators and the calibrator's double-precision pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RgbF32 {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl RgbF32 {
    pub const ZERO: RgbF32 = RgbF32 {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    pub fn to_rgb8_clamped(self) -> Rgb8 {
        Rgb8 {
            r: (self.r * 255.0).round().clamp(0.0, 255.0) as u8,
            g: (self.g * 255.0).round().clamp(0.0, 255.0) as u8,
            b: (self.b * 255.0).round().clamp(0.0, 255.0) as u8,
        }
    }

    pub fn max_abs_diff(self, other: RgbF32) -> f32 {
        (self.r - other.r)
            .abs()
            .max((self.g - other.g).abs())
            .max((self.b - other.b).abs())
    }
}

impl std::ops::Sub for RgbF32 {
    type Output = RgbF32;
    fn sub(self, rhs: RgbF32) -> RgbF32 {
        RgbF32::new(self.r - rhs.r, self.g - rhs.g, self.b - rhs.b)
    }
}

impl std::ops::Add for RgbF32 {
    type Output = RgbF32;
    fn add(self, rhs: RgbF32) -> RgbF32 {
        RgbF32::new(self.r + rhs.r, self.g + rhs.g, self.b + rhs.b)
    }
}

impl std::ops::Mul<f32> for RgbF32 {
    type Output = RgbF32;
    fn mul(self, rhs: f32) -> RgbF32 {
        RgbF32::new(self.r * rhs, self.g * rhs, self.b * rhs)
    }
}

/// A triplet in BT.709 luma/chroma space: `y` is luma, `u`/`v` are the
/// chroma components. Used by the `Hybrid*` smoother variants so that
/// motion reads perceptually smoother than interpolating RGB directly.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct YuvF32 {
    pub y: f32,
    pub u: f32,
    pub v: f32,
}

impl YuvF32 {
    pub fn new(y: f32, u: f32, v: f32) -> Self {
        Self { y, u, v }
    }

    pub fn max_abs_diff(self, other: YuvF32) -> f32 {
        (self.y - other.y)
            .abs()
            .max((self.u - other.u).abs())
            .max((self.v - other.v).abs())
    }
}

impl std::ops::Sub for YuvF32 {
    type Output = YuvF32;
    fn sub(self, rhs: YuvF32) -> YuvF32 {
        YuvF32::new(self.y - rhs.y, self.u - rhs.u, self.v - rhs.v)
    }
}

impl std::ops::Add for YuvF32 {
    type Output = YuvF32;
    fn add(self, rhs: YuvF32) -> YuvF32 {
        YuvF32::new(self.y + rhs.y, self.u + rhs.u, self.v + rhs.v)
    }
}

impl std::ops::Mul<f32> for YuvF32 {
    type Output = YuvF32;
    fn mul(self, rhs: f32) -> YuvF32 {
        YuvF32::new(self.y * rhs, self.u * rhs, self.v * rhs)
    }
}

/// BT.709 luma, `Y = 0.2126 R + 0.7152 G + 0.0722 B`.
pub fn luma_bt709(c: RgbF32) -> f32 {
    0.2126 * c.r + 0.7152 * c.g + 0.0722 * c.b
}

/// BT.709 full-range RGB -> YUV. `u`/`v` land in `-0.5..=0.5`.
pub fn rgb_to_bt709(c: RgbF32) -> YuvF32 {
    let y = luma_bt709(c);
    let u = (c.b - y) / 1.8556;
    let v = (c.r - y) / 1.5748;
    YuvF32::new(y, u, v)
}

/// Inverse of [`rgb_to_bt709`].
pub fn bt709_to_rgb(c: YuvF32) -> RgbF32 {
    let r = c.y + 1.5748 * c.v;
    let b = c.y + 1.8556 * c.u;
    let g = (c.y - 0.2126 * r - 0.0722 * b) / 0.7152;
    RgbF32::new(r, g, b)
}

/// Hardware wiring order of an LED's three channels, permuted just before
/// the bytes are handed to the driver (spec.md §3, §4.3).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorOrder {
    Rgb,
    Bgr,
    Rbg,
    Grb,
    Gbr,
    Brg,
}

impl Default for ColorOrder {
    fn default() -> Self {
        ColorOrder::Rgb
    }
}

impl ColorOrder {
    /// Permute `c` into wire byte order `(byte0, byte1, byte2)`.
    ///
    /// `Rgb`, `Bgr`, `Rbg` and `Grb` are each their own inverse (spec.md
    /// invariant 6); `Gbr`/`Brg` instead form a 3-cycle with identity, so
    /// applying `Gbr` then `Brg` returns the original color.
    pub fn permute(self, c: Rgb8) -> (u8, u8, u8) {
        match self {
            ColorOrder::Rgb => (c.r, c.g, c.b),
            ColorOrder::Bgr => (c.b, c.g, c.r),
            ColorOrder::Rbg => (c.r, c.b, c.g),
            ColorOrder::Grb => (c.g, c.r, c.b),
            ColorOrder::Gbr => (c.g, c.b, c.r),
            ColorOrder::Brg => (c.b, c.r, c.g),
        }
    }
}

/// Rule for deriving a fourth, white LED channel from an RGB color
/// (spec.md §3: "an additional white channel derived from RGB by a
/// configurable rule (limit + per-channel correction)").
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct WhiteChannelRule {
    /// Maximum white value that may be extracted, `0..=255`.
    pub limit: u8,
    /// Per-channel correction factor applied to the RGB remainder after
    /// white has been subtracted out.
    pub red_correction: f32,
    pub green_correction: f32,
    pub blue_correction: f32,
}

impl Default for WhiteChannelRule {
    fn default() -> Self {
        Self {
            limit: 255,
            red_correction: 1.0,
            green_correction: 1.0,
            blue_correction: 1.0,
        }
    }
}

impl WhiteChannelRule {
    /// Extract `(r, g, b, w)` for an RGBW strip: `w` is the common minimum
    /// of the three channels (capped by `limit`), and the RGB channels are
    /// reduced by that amount and then corrected.
    pub fn apply(&self, c: Rgb8) -> (u8, u8, u8, u8) {
        let w = c.min_channel().min(self.limit);
        let correct = |channel: u8, factor: f32| -> u8 {
            (channel.saturating_sub(w) as f32 * factor)
                .round()
                .clamp(0.0, 255.0) as u8
        };
        (
            correct(c.r, self.red_correction),
            correct(c.g, self.green_correction),
            correct(c.b, self.blue_correction),
            w,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_order_permutes_rgb_identity() {
        let c = Rgb8::new(1, 2, 3);
        assert_eq!(ColorOrder::Rgb.permute(c), (1, 2, 3));
        assert_eq!(ColorOrder::Bgr.permute(c), (3, 2, 1));
        assert_eq!(ColorOrder::Rbg.permute(c), (1, 3, 2));
        assert_eq!(ColorOrder::Grb.permute(c), (2, 1, 3));
        assert_eq!(ColorOrder::Gbr.permute(c), (2, 3, 1));
        assert_eq!(ColorOrder::Brg.permute(c), (3, 1, 2));
    }

    #[test]
    fn color_order_involutions() {
        let c = Rgb8::new(10, 20, 30);
        for order in [ColorOrder::Rgb, ColorOrder::Bgr, ColorOrder::Rbg, ColorOrder::Grb] {
            let (a, b, cc) = order.permute(c);
            let once = Rgb8::new(a, b, cc);
            let (a2, b2, c2) = order.permute(once);
            assert_eq!((a2, b2, c2), (c.r, c.g, c.b));
        }
    }

    #[test]
    fn color_order_gbr_brg_three_cycle() {
        let c = Rgb8::new(10, 20, 30);
        let (a, b, cc) = ColorOrder::Gbr.permute(c);
        let step1 = Rgb8::new(a, b, cc);
        let (a2, b2, c2) = ColorOrder::Brg.permute(step1);
        assert_eq!((a2, b2, c2), (c.r, c.g, c.b));
    }

    #[test]
    fn yuv_round_trip() {
        let c = RgbF32::new(0.2, 0.6, 0.9);
        let yuv = rgb_to_bt709(c);
        let back = bt709_to_rgb(yuv);
        assert!((back.r - c.r).abs() < 1e-4);
        assert!((back.g - c.g).abs() < 1e-4);
        assert!((back.b - c.b).abs() < 1e-4);
    }

    #[test]
    fn white_channel_extracts_common_minimum() {
        let rule = WhiteChannelRule::default();
        let (r, g, b, w) = rule.apply(Rgb8::new(200, 150, 50));
        assert_eq!(w, 50);
        assert_eq!(r, 150);
        assert_eq!(g, 100);
        assert_eq!(b, 0);
    }

    #[test]
    fn white_channel_respects_limit() {
        let rule = WhiteChannelRule {
            limit: 30,
            ..Default::default()
        };
        let (_, _, _, w) = rule.apply(Rgb8::new(200, 150, 50));
        assert_eq!(w, 30);
    }
}
