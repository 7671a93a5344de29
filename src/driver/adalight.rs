//! The Adalight-style "Awa" wire framing shared by the SPI and UDP
//! transports (spec.md §6): a 6-byte header followed by `ledCount*3` RGB
//! bytes and a two-byte Fletcher-16 trailer over that RGB region.
//!
//! Grounded on `original_source`'s `LedDeviceAWA_spi::CreateHeader`/`write`
//! (header layout, checksum byte, Fletcher-16 loop) — we share the framing
//! between the SPI and network Adalight variants instead of duplicating it,
//! since both transports carry the identical byte contract.

use crate::color::Rgb8;

/// The header's checksum byte: `HI(ledCount-1) XOR LO(ledCount-1) XOR 0x55`
/// (spec.md invariant 7).
pub fn adalight_checksum(led_count: usize) -> u8 {
    let total = (led_count.saturating_sub(1)) as u16;
    let hi = (total >> 8) as u8;
    let lo = (total & 0xff) as u8;
    hi ^ lo ^ 0x55
}

/// The fixed 6-byte `"Awa" HI LO checksum` header for `led_count` LEDs.
pub fn adalight_header(led_count: usize) -> [u8; 6] {
    let total = (led_count.saturating_sub(1)) as u16;
    let hi = (total >> 8) as u8;
    let lo = (total & 0xff) as u8;
    [b'A', b'w', b'a', hi, lo, hi ^ lo ^ 0x55]
}

/// Fletcher-16 checksum over `data`, returned as `(sum1, sum2)` — the two
/// trailer bytes in send order.
pub fn fletcher16(data: &[u8]) -> (u8, u8) {
    let mut sum1: u32 = 0;
    let mut sum2: u32 = 0;
    for &byte in data {
        sum1 = (sum1 + byte as u32) % 255;
        sum2 = (sum2 + sum1) % 255;
    }
    (sum1 as u8, sum2 as u8)
}

/// Builds a full Awa frame: header + RGB payload + Fletcher-16 trailer.
pub fn build_frame(colors: &[(u8, u8, u8)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(6 + colors.len() * 3 + 2);
    out.extend_from_slice(&adalight_header(colors.len()));
    let payload_start = out.len();
    for &(r, g, b) in colors {
        out.push(r);
        out.push(g);
        out.push(b);
    }
    let (s1, s2) = fletcher16(&out[payload_start..]);
    out.push(s1);
    out.push(s2);
    out
}

/// Same as [`build_frame`] but from [`Rgb8`], for callers that haven't
/// already flattened to byte triplets.
pub fn build_frame_rgb8(colors: &[Rgb8]) -> Vec<u8> {
    let triplets: Vec<(u8, u8, u8)> = colors.iter().map(|c| (c.r, c.g, c.b)).collect();
    build_frame(&triplets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_matches_spec_s6_example() {
        // spec.md §8 S6: ledCount=3 -> HI=0x00, LO=0x02, checksum=0x57.
        assert_eq!(adalight_header(3), [b'A', b'w', b'a', 0x00, 0x02, 0x57]);
    }

    #[test]
    fn checksum_matches_invariant_7() {
        for n in [1usize, 3, 4, 300, 1024] {
            let expected = adalight_checksum(n);
            let total = (n - 1) as u16;
            let hi = (total >> 8) as u8;
            let lo = (total & 0xff) as u8;
            assert_eq!(expected, hi ^ lo ^ 0x55);
        }
    }

    #[test]
    fn full_frame_matches_spec_s6_example() {
        let frame = build_frame(&[(1, 2, 3), (4, 5, 6), (7, 8, 9)]);
        assert_eq!(&frame[0..6], &[b'A', b'w', b'a', 0x00, 0x02, 0x57]);
        assert_eq!(&frame[6..15], &[1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(frame.len(), 17);
    }

    #[test]
    fn fletcher16_of_empty_is_zero() {
        assert_eq!(fletcher16(&[]), (0, 0));
    }
}
