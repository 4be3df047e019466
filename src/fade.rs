//! Fade math: gamma-correct blending and temporal dithering.
//!
//! Channel values are gamma encoded, so blending them linearly makes a fade
//! look almost finished long before it is. Blends here happen in linear
//! light: `linear = (v / 255)^2.2`, interpolate, then encode back with the
//! inverse exponent.

use crate::{Color, ColorVector};

/// Exponent of the sRGB-like transfer curve.
pub const GAMMA: f32 = 2.2;

/// One LED's color at full float precision, 0.0..=255.0 per channel.
pub type Channels = [f32; 3];

/// Decode an encoded channel value (0–255) to linear light (0–1).
pub fn to_linear(value: f32) -> f32 {
    (value.clamp(0.0, 255.0) / 255.0).powf(GAMMA)
}

/// Encode linear light (0–1) back to a channel value (0–255).
pub fn from_linear(linear: f32) -> f32 {
    255.0 * linear.clamp(0.0, 1.0).powf(1.0 / GAMMA)
}

/// Blend `from` → `to` at fraction `t` in linear light.
///
/// `t` is clamped to 0..=1; `t = 0` gives `from`, `t = 1` gives `to`.
pub fn gamma_blend(from: Channels, to: Channels, t: f32) -> Channels {
    let t = t.clamp(0.0, 1.0);
    let mut out = [0.0; 3];
    for (o, (&a, &b)) in out.iter_mut().zip(from.iter().zip(&to)) {
        let (la, lb) = (to_linear(a), to_linear(b));
        *o = from_linear(la + (lb - la) * t);
    }
    out
}

/// Blend whole frames. Both frames must have the same length.
pub fn blend_frames(from: &[Color], to: &[Color], t: f32) -> ColorVector {
    debug_assert_eq!(from.len(), to.len());
    from.iter()
        .zip(to)
        .map(|(a, b)| Color::from_f32(gamma_blend(a.to_f32(), b.to_f32(), t)))
        .collect()
}

/// Pick up to `count` distinct indices out of `0..len`.
///
/// A partial Fisher–Yates shuffle: no index repeats within one call, but
/// successive calls are independent, so an LED may be picked again before
/// others are picked at all.
pub fn dither_subset(len: usize, count: usize, rng: &mut fastrand::Rng) -> Vec<usize> {
    let count = count.min(len);
    let mut indices: Vec<usize> = (0..len).collect();
    for i in 0..count {
        let j = rng.usize(i..len);
        indices.swap(i, j);
    }
    indices.truncate(count);
    indices
}

/// Snap a float frame to 8-bit colors.
pub fn quantize(frame: &[Channels]) -> ColorVector {
    frame.iter().map(|&c| Color::from_f32(c)).collect()
}

/// Lift an 8-bit frame to float precision.
pub fn lift(frame: &[Color]) -> Vec<Channels> {
    frame.iter().map(|c| c.to_f32()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const TARGET: Channels = [255.0, 180.0, 40.0];

    #[rstest]
    #[case(0.0)]
    #[case(1.0)]
    #[case(64.0)]
    #[case(128.0)]
    #[case(255.0)]
    fn linear_round_trip(#[case] v: f32) {
        assert!((from_linear(to_linear(v)) - v).abs() < 1e-3);
    }

    #[test]
    fn blend_endpoints() {
        assert_eq!(Color::from_f32(gamma_blend([0.0; 3], TARGET, 0.0)), Color::BLACK);
        assert_eq!(
            Color::from_f32(gamma_blend([0.0; 3], TARGET, 1.0)),
            Color::from_f32(TARGET)
        );
    }

    #[test]
    fn midpoint_is_half_the_light_not_half_the_value() {
        let mid = gamma_blend([0.0; 3], TARGET, 0.5);
        for (m, t) in mid.iter().zip(TARGET) {
            let expected = 0.5 * to_linear(t);
            assert!((to_linear(*m) - expected).abs() < 1e-4);
        }
        // Half the light of full red is ~186, far brighter than 127.5
        assert!((mid[0] - 186.0).abs() < 1.0, "{}", mid[0]);
    }

    #[test]
    fn blend_is_monotonic_when_brightening() {
        let mut last = -1.0;
        for step in 0..=100 {
            let v = gamma_blend([0.0; 3], TARGET, step as f32 / 100.0)[1];
            assert!(v >= last);
            last = v;
        }
    }

    #[test]
    fn blend_clamps_t() {
        assert_eq!(gamma_blend([0.0; 3], TARGET, 3.0), gamma_blend([0.0; 3], TARGET, 1.0));
        assert_eq!(gamma_blend([0.0; 3], TARGET, -1.0), [0.0; 3]);
    }

    #[test]
    fn blend_frames_fades_out() {
        let lit = vec![Color::new(200, 100, 50); 3];
        let black = vec![Color::BLACK; 3];
        assert_eq!(blend_frames(&lit, &black, 1.0), black);
        assert_eq!(blend_frames(&lit, &black, 0.0), lit);
    }

    #[rstest]
    #[case(10, 4)]
    #[case(10, 10)]
    #[case(3, 16)]
    #[case(0, 5)]
    fn dither_subset_is_distinct_and_bounded(#[case] len: usize, #[case] count: usize) {
        let mut rng = fastrand::Rng::with_seed(5);
        let mut picked = dither_subset(len, count, &mut rng);
        assert_eq!(picked.len(), count.min(len));
        assert!(picked.iter().all(|&i| i < len));
        picked.sort_unstable();
        picked.dedup();
        assert_eq!(picked.len(), count.min(len));
    }

    #[test]
    fn dither_subset_eventually_reaches_everyone() {
        let mut rng = fastrand::Rng::with_seed(1);
        let mut seen = vec![false; 50];
        for _ in 0..200 {
            for i in dither_subset(50, 5, &mut rng) {
                seen[i] = true;
            }
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn quantize_and_lift_round_trip() {
        let frame = vec![Color::new(1, 2, 3), Color::new(250, 128, 0)];
        assert_eq!(quantize(&lift(&frame)), frame);
    }
}
