//! Frame-to-LED reducer: precomputes a per-LED pixel-index map for the
//! current layout and image size, then averages pixels to one color per LED
//! under a chosen policy.
//!
//! Grounded on HyperHDR's `ImageToLedsMap`: the signed-index trick for the
//! *weighted* policy's near/far halves, the gamma LUT + sqrt recombination
//! for *advanced*, and sparse striding, carried over arithmetic-for-
//! arithmetic. Helion's `ImageAnalyzer::average_color` is the same idea at
//! a smaller scale (one region, no policy choice, no index map caching) and
//! grounds the plain per-LED rectangle scan this module falls back to for
//! *mean*.

use crate::color::Rgb8;
use crate::image::Image;
use crate::layout::Layout;

const SPARSE_THRESHOLD: usize = 1_600;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReducerPolicy {
    Mean,
    Unicolor,
    Weighted,
    Advanced,
}

/// Per-LED list of signed pixel offsets into the row-major RGB buffer.
/// Negative offsets (stored as `-(offset as i64)`, since offset 0 must also
/// be representable as "far") mark the *weighted*/`Advanced` far half.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct LedIndices(Vec<i64>);

/// A 256-entry gamma-linearize LUT for the *advanced* policy.
pub fn gamma_lut(gamma: f64) -> [u16; 256] {
    let mut lut = [0u16; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        let x = i as f64 / 255.0;
        *slot = (x.powf(gamma) * 65535.0).round().clamp(0.0, 65535.0) as u16;
    }
    lut
}

fn identity_lut() -> [u16; 256] {
    let mut lut = [0u16; 256];
    for (i, slot) in lut.iter_mut().enumerate() {
        *slot = ((i as u32 * 65535 / 255) as u16).min(65535);
    }
    lut
}

/// The precomputed index map plus the geometry it was built for; rebuilt
/// whenever image size, layout or the sparse flag changes (spec.md §4.2).
pub struct Reducer {
    policy: ReducerPolicy,
    sparse: bool,
    width: usize,
    height: usize,
    led_count: usize,
    indices: Vec<LedIndices>,
    lut: [u16; 256],
}

impl Reducer {
    pub fn new(policy: ReducerPolicy, sparse: bool, layout: &Layout, width: usize, height: usize) -> Self {
        let mut r = Self {
            policy,
            sparse,
            width: 0,
            height: 0,
            led_count: 0,
            indices: Vec::new(),
            lut: identity_lut(),
        };
        r.rebuild(layout, width, height);
        r
    }

    pub fn set_gamma(&mut self, gamma: f64) {
        self.lut = gamma_lut(gamma);
    }

    pub fn needs_rebuild(&self, layout: &Layout, width: usize, height: usize) -> bool {
        self.width != width || self.height != height || self.led_count != layout.led_count()
    }

    /// Rebuild the pixel-index map for a new layout/size. The previous map
    /// stays valid on `self` until this returns, so callers mid-reduce on
    /// the old map (e.g. a concurrent read through a cloned `Reducer`) keep
    /// working off their own snapshot.
    pub fn rebuild(&mut self, layout: &Layout, width: usize, height: usize) {
        let x_offset = layout.vertical_border as usize;
        let y_offset = layout.horizontal_border as usize;
        let actual_width = width.saturating_sub(2 * x_offset).max(1);
        let actual_height = height.saturating_sub(2 * y_offset).max(1);
        let increment = if self.sparse { 2 } else { 1 };

        let mut indices = Vec::with_capacity(layout.leds.len());
        for led in &layout.leds {
            if !led.rect.has_area() {
                indices.push(LedIndices::default());
                continue;
            }

            let mut min_x = x_offset + (actual_width as f32 * led.rect.min_x).round() as usize;
            let mut max_x = x_offset + (actual_width as f32 * led.rect.max_x).round() as usize;
            let mut min_y = y_offset + (actual_height as f32 * led.rect.min_y).round() as usize;
            let mut max_y = y_offset + (actual_height as f32 * led.rect.max_y).round() as usize;

            min_x = min_x.min(x_offset + actual_width - 1);
            if min_x == max_x {
                max_x += 1;
            }
            min_y = min_y.min(y_offset + actual_height - 1);
            if min_y == max_y {
                max_y += 1;
            }

            let max_x_count = max_x.min(x_offset + actual_width);
            let max_y_count = max_y.min(y_offset + actual_height);

            let mut offsets = Vec::new();
            if self.policy == ReducerPolicy::Weighted || self.policy == ReducerPolicy::Advanced {
                let left = led.rect.touches_left();
                let right = led.rect.touches_right();
                let top = led.rect.touches_top();
                let bottom = led.rect.touches_bottom();
                let is_corner = [left, right, top, bottom].iter().filter(|b| **b).count() == 1;

                if !is_corner {
                    push_plain(&mut offsets, min_y, max_y_count, min_x, max_x_count, width, increment);
                } else if bottom {
                    let mid = (min_y + max_y_count) / 2;
                    push_far(&mut offsets, min_y, mid, min_x, max_x_count, width, increment);
                    push_plain(&mut offsets, mid, max_y_count, min_x, max_x_count, width, increment);
                } else if top {
                    let mid = (min_y + max_y_count) / 2;
                    push_plain(&mut offsets, min_y, mid, min_x, max_x_count, width, increment);
                    push_far(&mut offsets, mid, max_y_count, min_x, max_x_count, width, increment);
                } else if left {
                    let mid = (min_x + max_x_count) / 2;
                    for y in (min_y..max_y_count).step_by(increment) {
                        push_plain(&mut offsets, y, y + 1, min_x, mid, width, increment);
                        push_far(&mut offsets, y, y + 1, mid, max_x_count, width, increment);
                    }
                } else {
                    // right
                    let mid = (min_x + max_x_count) / 2;
                    for y in (min_y..max_y_count).step_by(increment) {
                        push_far(&mut offsets, y, y + 1, min_x, mid, width, increment);
                        push_plain(&mut offsets, y, y + 1, mid, max_x_count, width, increment);
                    }
                }
            } else {
                push_plain(&mut offsets, min_y, max_y_count, min_x, max_x_count, width, increment);
            }
            indices.push(LedIndices(offsets));
        }

        self.width = width;
        self.height = height;
        self.led_count = layout.leds.len();
        self.indices = indices;
    }

    /// Reduce `image` to one color per LED, then apply group averaging and
    /// the disabled mask.
    pub fn reduce(&self, image: &Image, layout: &Layout) -> Vec<Rgb8> {
        let mut colors: Vec<Rgb8> = match self.policy {
            ReducerPolicy::Unicolor => vec![image.mean_color(); self.indices.len()],
            ReducerPolicy::Advanced => self
                .indices
                .iter()
                .map(|idx| calc_mean_adv_color(image, idx, &self.lut))
                .collect(),
            ReducerPolicy::Mean => self.indices.iter().map(|idx| calc_mean_color(image, idx)).collect(),
            ReducerPolicy::Weighted => self
                .indices
                .iter()
                .map(|idx| calc_mean_weighted_color(image, idx))
                .collect(),
        };

        apply_groups(&mut colors, layout);
        apply_disabled_mask(&mut colors, layout);
        colors
    }
}

fn push_plain(
    out: &mut Vec<i64>,
    y0: usize,
    y1: usize,
    x0: usize,
    x1: usize,
    width: usize,
    increment: usize,
) {
    for y in (y0..y1).step_by(increment) {
        for x in (x0..x1).step_by(increment) {
            out.push((y * width + x) as i64);
        }
    }
}

fn push_far(
    out: &mut Vec<i64>,
    y0: usize,
    y1: usize,
    x0: usize,
    x1: usize,
    width: usize,
    increment: usize,
) {
    for y in (y0..y1).step_by(increment) {
        for x in (x0..x1).step_by(increment) {
            out.push(-((y * width + x) as i64) - 1);
        }
    }
}

fn calc_mean_color(image: &Image, indices: &LedIndices) -> Rgb8 {
    if indices.0.is_empty() {
        return Rgb8::BLACK;
    }
    let (mut r, mut g, mut b) = (0u64, 0u64, 0u64);
    let pixels = image.pixels();
    for &offset in &indices.0 {
        let idx = if offset >= 0 { offset as usize } else { (-offset - 1) as usize };
        let p = pixels[idx];
        r += p.r as u64;
        g += p.g as u64;
        b += p.b as u64;
    }
    let n = indices.0.len() as u64;
    Rgb8::new((r / n) as u8, (g / n) as u8, (b / n) as u8)
}

/// Near/far 3:1 weighted mean for corner LEDs (`ImageToLedsMap.cpp`'s
/// `calcMeanAdvColor` weighting, applied to the raw linear channel values
/// rather than the gamma-LUT'd ones `Advanced` uses).
fn calc_mean_weighted_color(image: &Image, indices: &LedIndices) -> Rgb8 {
    if indices.0.is_empty() {
        return Rgb8::BLACK;
    }
    let pixels = image.pixels();
    let (mut r1, mut g1, mut b1, mut n1) = (0u64, 0u64, 0u64, 0u64);
    let (mut r2, mut g2, mut b2, mut n2) = (0u64, 0u64, 0u64, 0u64);

    for &offset in &indices.0 {
        if offset >= 0 {
            let p = pixels[offset as usize];
            r1 += p.r as u64;
            g1 += p.g as u64;
            b1 += p.b as u64;
            n1 += 1;
        } else {
            let p = pixels[(-offset - 1) as usize];
            r2 += p.r as u64;
            g2 += p.g as u64;
            b2 += p.b as u64;
            n2 += 1;
        }
    }

    let recombine = |s1: u64, s2: u64| -> u8 {
        if n1 > 0 && n2 > 0 {
            ((s1 * 3) / n1 + s2 / n2) / 4
        } else {
            (s1 + s2) / (n1 + n2).max(1)
        }
        .min(255) as u8
    };

    Rgb8::new(recombine(r1, r2), recombine(g1, g2), recombine(b1, b2))
}

fn calc_mean_adv_color(image: &Image, indices: &LedIndices, lut: &[u16; 256]) -> Rgb8 {
    if indices.0.is_empty() {
        return Rgb8::BLACK;
    }
    let pixels = image.pixels();
    let (mut r1, mut g1, mut b1, mut n1) = (0u64, 0u64, 0u64, 0u64);
    let (mut r2, mut g2, mut b2, mut n2) = (0u64, 0u64, 0u64, 0u64);

    for &offset in &indices.0 {
        if offset >= 0 {
            let p = pixels[offset as usize];
            r1 += lut[p.r as usize] as u64;
            g1 += lut[p.g as usize] as u64;
            b1 += lut[p.b as usize] as u64;
            n1 += 1;
        } else {
            let p = pixels[(-offset - 1) as usize];
            r2 += lut[p.r as usize] as u64;
            g2 += lut[p.g as usize] as u64;
            b2 += lut[p.b as usize] as u64;
            n2 += 1;
        }
    }

    let recombine = |s1: u64, s2: u64| -> u8 {
        let avg = if n1 > 0 && n2 > 0 {
            ((s1 * 3) / n1 + s2 / n2) / 4
        } else {
            (s1 + s2) / (n1 + n2).max(1)
        };
        ((avg as f64).sqrt() as u32).min(255) as u8
    };

    Rgb8::new(recombine(r1, r2), recombine(g1, g2), recombine(b1, b2))
}

fn apply_groups(colors: &mut [Rgb8], layout: &Layout) {
    use std::collections::HashMap;
    let mut sums: HashMap<i32, (u64, u64, u64, u64)> = HashMap::new();
    for (led, color) in layout.leds.iter().zip(colors.iter()) {
        if led.group > 0 {
            let entry = sums.entry(led.group).or_insert((0, 0, 0, 0));
            entry.0 += color.r as u64;
            entry.1 += color.g as u64;
            entry.2 += color.b as u64;
            entry.3 += 1;
        }
    }
    let averages: HashMap<i32, Rgb8> = sums
        .into_iter()
        .map(|(g, (r, gr, b, n))| (g, Rgb8::new((r / n) as u8, (gr / n) as u8, (b / n) as u8)))
        .collect();
    for (led, color) in layout.leds.iter().zip(colors.iter_mut()) {
        if led.group > 0 {
            *color = averages[&led.group];
        }
    }
}

fn apply_disabled_mask(colors: &mut [Rgb8], layout: &Layout) {
    for (led, color) in layout.leds.iter().zip(colors.iter_mut()) {
        if led.disabled {
            *color = Rgb8::BLACK;
        }
    }
}
