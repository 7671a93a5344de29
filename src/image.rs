//! A captured frame: a packed 24-bit RGB buffer plus its dimensions.
//!
//! Generalized from Helion's `ImageAnalyzer`, which paired a borrowed BGR8
//! slice with a fixed resize ratio for exactly one capture backend; `Image`
//! instead owns its pixels so it can be passed across the arbitrator/reducer
//! boundary (and, eventually, an async channel) without tying the core to
//! any particular capture crate's pixel type.

use crate::color::Rgb8;

/// A width x height RGB frame, row-major, no padding.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    width: usize,
    height: usize,
    pixels: Vec<Rgb8>,
}

impl Image {
    /// Build an image from a row-major pixel buffer. Panics if `pixels.len()
    /// != width * height` — the caller is expected to hand over a buffer it
    /// just decoded, where that invariant is cheap to maintain at the call
    /// site and expensive to recover from silently.
    pub fn new(width: usize, height: usize, pixels: Vec<Rgb8>) -> Self {
        assert_eq!(
            pixels.len(),
            width * height,
            "image buffer length does not match width * height"
        );
        Self {
            width,
            height,
            pixels,
        }
    }

    /// A `width x height` image filled with a single color, used for the
    /// "set color" arbitrator path represented as a 1x1 image and for tests.
    pub fn solid(width: usize, height: usize, color: Rgb8) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width * height],
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn pixels(&self) -> &[Rgb8] {
        &self.pixels
    }

    /// A 1x1 image is the arbitrator's encoding of a plain color source
    /// (spec.md invariant: "size=1 routes as color, not image").
    pub fn is_color(&self) -> bool {
        self.width == 1 && self.height == 1
    }

    pub fn get(&self, x: usize, y: usize) -> Rgb8 {
        self.pixels[y * self.width + x]
    }

    /// Mean color over the whole frame, used by the reducer's `unicolor`
    /// policy and by `calc_mean_color` with an empty index set.
    pub fn mean_color(&self) -> Rgb8 {
        if self.pixels.is_empty() {
            return Rgb8::BLACK;
        }
        let (mut r, mut g, mut b) = (0u64, 0u64, 0u64);
        for p in &self.pixels {
            r += p.r as u64;
            g += p.g as u64;
            b += p.b as u64;
        }
        let n = self.pixels.len() as u64;
        Rgb8::new((r / n) as u8, (g / n) as u8, (b / n) as u8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_image_is_uniform() {
        let img = Image::solid(4, 3, Rgb8::new(10, 20, 30));
        assert_eq!(img.get(2, 1), Rgb8::new(10, 20, 30));
        assert_eq!(img.mean_color(), Rgb8::new(10, 20, 30));
    }

    #[test]
    fn one_by_one_image_is_color() {
        let img = Image::solid(1, 1, Rgb8::new(1, 2, 3));
        assert!(img.is_color());
        let img2 = Image::solid(2, 1, Rgb8::new(1, 2, 3));
        assert!(!img2.is_color());
    }

    #[test]
    fn mean_color_averages_channels() {
        let pixels = vec![Rgb8::new(0, 0, 0), Rgb8::new(255, 255, 255)];
        let img = Image::new(2, 1, pixels);
        assert_eq!(img.mean_color(), Rgb8::new(127, 127, 127));
    }
}
