//! LED layout: the fractional screen rectangle, wiring order and grouping
//! of each physical LED.
//!
//! Generalized from Helion's `config::Region`/`LedAxisPos` (a `hscan`/`vscan`
//! pair of `{minimum, maximum}` fractions read out of a HyperCon JSON dump)
//! into the fuller per-LED descriptor this engine's reducer and calibrator
//! need: byte order, group, disabled flag and an optional calibration id.

use serde::{Deserialize, Serialize};

use crate::color::ColorOrder;

/// The fractional rectangle on the normalized image `[0, 1]` that one LED
/// averages over.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedRect {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl LedRect {
    /// A rectangle covering no area (spec.md §3: "zero-length lists mark
    /// LEDs excluded from averaging").
    pub fn empty() -> Self {
        Self {
            min_x: 0.0,
            max_x: 0.0,
            min_y: 0.0,
            max_y: 0.0,
        }
    }

    pub fn has_area(&self) -> bool {
        (self.max_x - self.min_x) > 1e-6 && (self.max_y - self.min_y) > 1e-6
    }

    pub fn touches_left(&self) -> bool {
        self.min_x == 0.0
    }

    pub fn touches_right(&self) -> bool {
        self.max_x == 1.0
    }

    pub fn touches_top(&self) -> bool {
        self.min_y == 0.0
    }

    pub fn touches_bottom(&self) -> bool {
        self.max_y == 1.0
    }
}

/// One physical LED's placement, wiring and grouping (spec.md §3).
///
/// Invariant: `rect.max_x > rect.min_x` and `rect.max_y > rect.min_y` for
/// any LED that contributes to averaging; an LED that doesn't (a fill LED
/// with no matching screen area) carries [`LedRect::empty`] and is skipped
/// by the reducer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedDescriptor {
    pub rect: LedRect,
    #[serde(default)]
    pub color_order: ColorOrder,
    /// `-1` means no group; LEDs sharing a non-negative group are averaged
    /// together by the reducer after per-LED reduction.
    #[serde(default = "default_group")]
    pub group: i32,
    #[serde(default)]
    pub disabled: bool,
    /// Index into the calibrator's per-calibration-id table, or `None` to
    /// use the layout's default calibration.
    #[serde(default)]
    pub calibration_id: Option<u32>,
}

fn default_group() -> i32 {
    -1
}

impl LedDescriptor {
    pub fn new(rect: LedRect) -> Self {
        Self {
            rect,
            color_order: ColorOrder::default(),
            group: -1,
            disabled: false,
            calibration_id: None,
        }
    }
}

/// The full ordered set of LEDs for one instance, plus the border margins
/// the reducer excludes from sampling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub leds: Vec<LedDescriptor>,
    #[serde(default)]
    pub horizontal_border: u32,
    #[serde(default)]
    pub vertical_border: u32,
}

impl Layout {
    pub fn new(leds: Vec<LedDescriptor>) -> Self {
        Self {
            leds,
            horizontal_border: 0,
            vertical_border: 0,
        }
    }

    pub fn led_count(&self) -> usize {
        self.leds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_rect_has_no_area() {
        assert!(!LedRect::empty().has_area());
    }

    #[test]
    fn rect_area_requires_strict_ordering() {
        let r = LedRect {
            min_x: 0.0,
            max_x: 0.25,
            min_y: 0.0,
            max_y: 1.0,
        };
        assert!(r.has_area());
        assert!(r.touches_left());
        assert!(!r.touches_right());
        assert!(r.touches_top());
        assert!(r.touches_bottom());
    }

    #[test]
    fn default_led_has_no_group() {
        let led = LedDescriptor::new(LedRect::empty());
        assert_eq!(led.group, -1);
        assert!(!led.disabled);
        assert_eq!(led.calibration_id, None);
    }
}
